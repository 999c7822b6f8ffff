//! 설정 관리 — lumberyard.toml 파싱 및 런타임 설정
//!
//! [`LumberyardConfig`]는 모든 모듈의 설정을 담는 최상위 구조체입니다.
//!
//! # 설정 로딩 우선순위
//! 1. CLI 인자 (최고 우선)
//! 2. 환경변수 (`LUMBERYARD_INPUT_BIND_ADDR=0.0.0.0:5044` 형식)
//! 3. 설정 파일 (`lumberyard.toml`)
//! 4. 기본값 (`Default` 구현)
//!
//! # 사용 예시
//! ```no_run
//! # async fn example() -> Result<(), lumberyard_core::error::LumberyardError> {
//! use lumberyard_core::config::LumberyardConfig;
//!
//! // 파일에서 로드 + 환경변수 오버라이드
//! let config = LumberyardConfig::load("lumberyard.toml").await?;
//!
//! // TOML 문자열에서 직접 파싱
//! let config = LumberyardConfig::parse("[general]\nlog_level = \"debug\"")?;
//! # Ok(())
//! # }
//! ```

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{ConfigError, LumberyardError};
use crate::types::{FailureKind, MultilineWhat};

/// Lumberyard 통합 설정
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LumberyardConfig {
    /// 일반 설정
    #[serde(default)]
    pub general: GeneralConfig,
    /// lumberjack 입력 설정
    #[serde(default)]
    pub input: InputConfig,
    /// 메트릭 엔드포인트 설정
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl LumberyardConfig {
    /// TOML 파일에서 설정을 로드하고 환경변수 오버라이드를 적용합니다.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, LumberyardError> {
        let mut config = Self::from_file(path).await?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// TOML 파일에서 설정을 로드합니다 (환경변수 오버라이드 없음).
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self, LumberyardError> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                LumberyardError::Config(ConfigError::FileNotFound {
                    path: path.display().to_string(),
                })
            } else {
                LumberyardError::Io(e)
            }
        })?;
        Self::parse(&content)
    }

    /// TOML 문자열에서 설정을 파싱합니다.
    pub fn parse(toml_str: &str) -> Result<Self, LumberyardError> {
        toml::from_str(toml_str).map_err(|e| {
            LumberyardError::Config(ConfigError::ParseFailed {
                reason: e.to_string(),
            })
        })
    }

    /// 환경변수로 설정값을 오버라이드합니다.
    ///
    /// 환경변수 네이밍 규칙: `LUMBERYARD_{SECTION}_{FIELD}`
    pub fn apply_env_overrides(&mut self) {
        // General
        override_string(&mut self.general.log_level, "LUMBERYARD_GENERAL_LOG_LEVEL");
        override_string(&mut self.general.log_format, "LUMBERYARD_GENERAL_LOG_FORMAT");
        override_string(&mut self.general.pid_file, "LUMBERYARD_GENERAL_PID_FILE");

        // Input
        override_string(&mut self.input.bind_addr, "LUMBERYARD_INPUT_BIND_ADDR");
        override_string(
            &mut self.input.payload_field,
            "LUMBERYARD_INPUT_PAYLOAD_FIELD",
        );
        override_string(
            &mut self.input.client_address_field,
            "LUMBERYARD_INPUT_CLIENT_ADDRESS_FIELD",
        );
        override_u64(
            &mut self.input.congestion_threshold_secs,
            "LUMBERYARD_INPUT_CONGESTION_THRESHOLD_SECS",
        );
        override_usize(
            &mut self.input.queue_capacity,
            "LUMBERYARD_INPUT_QUEUE_CAPACITY",
        );

        // Breaker
        override_u32(
            &mut self.input.breaker.error_threshold,
            "LUMBERYARD_BREAKER_ERROR_THRESHOLD",
        );
        override_i64(
            &mut self.input.breaker.backoff_delay_secs,
            "LUMBERYARD_BREAKER_BACKOFF_DELAY_SECS",
        );

        // Metrics
        override_bool(&mut self.metrics.enabled, "LUMBERYARD_METRICS_ENABLED");
        override_string(&mut self.metrics.listen_addr, "LUMBERYARD_METRICS_LISTEN_ADDR");
        override_u16(&mut self.metrics.port, "LUMBERYARD_METRICS_PORT");
    }

    /// 설정값의 유효성을 검증합니다.
    pub fn validate(&self) -> Result<(), LumberyardError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.general.log_level.as_str()) {
            return Err(ConfigError::invalid(
                "general.log_level",
                format!("must be one of: {}", valid_levels.join(", ")),
            )
            .into());
        }

        let valid_formats = ["json", "pretty"];
        if !valid_formats.contains(&self.general.log_format.as_str()) {
            return Err(ConfigError::invalid(
                "general.log_format",
                format!("must be one of: {}", valid_formats.join(", ")),
            )
            .into());
        }

        self.input.validate()?;

        if self.metrics.enabled && self.metrics.port == 0 {
            return Err(ConfigError::invalid("metrics.port", "must not be 0 when enabled").into());
        }

        Ok(())
    }
}

/// 일반 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// 로그 레벨 (trace, debug, info, warn, error)
    pub log_level: String,
    /// 로그 형식 (json, pretty)
    pub log_format: String,
    /// PID 파일 경로 (빈 문자열이면 사용하지 않음)
    pub pid_file: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_owned(),
            log_format: "json".to_owned(),
            pid_file: String::new(),
        }
    }
}

/// lumberjack 입력 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InputConfig {
    /// 수신 바인드 주소
    pub bind_addr: String,
    /// 레코드에서 페이로드를 담은 필드명
    pub payload_field: String,
    /// 클라이언트 주소를 기록할 이벤트 필드명 (빈 문자열이면 기록하지 않음)
    pub client_address_field: String,
    /// 큐 push 타임아웃 (초). 이 시간 안에 소비자가 비우지 못하면 혼잡으로 간주합니다.
    pub congestion_threshold_secs: u64,
    /// 브로커 큐 용량
    pub queue_capacity: usize,
    /// 차단기가 열렸을 때 accept 재시도 간격 (밀리초)
    pub accept_backoff_ms: u64,
    /// 종료 시 워커 태스크를 기다리는 최대 시간 (초)
    pub drain_timeout_secs: u64,
    /// 한 레코드(한 줄)의 최대 크기 (바이트)
    pub max_line_bytes: usize,
    /// 차단기 설정
    pub breaker: BreakerConfig,
    /// 식별자별 디코더 캐시 설정
    pub decoders: DecoderCacheConfig,
    /// 코덱 설정
    pub codec: CodecConfig,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:5044".to_owned(),
            payload_field: "line".to_owned(),
            client_address_field: String::new(),
            congestion_threshold_secs: 5,
            queue_capacity: 1,
            accept_backoff_ms: 500,
            drain_timeout_secs: 5,
            max_line_bytes: 1024 * 1024, // 1MB
            breaker: BreakerConfig::default(),
            decoders: DecoderCacheConfig::default(),
            codec: CodecConfig::default(),
        }
    }
}

impl InputConfig {
    /// 큐 push 타임아웃을 반환합니다.
    pub fn congestion_threshold(&self) -> Duration {
        Duration::from_secs(self.congestion_threshold_secs)
    }

    /// accept 재시도 간격을 반환합니다.
    pub fn accept_backoff(&self) -> Duration {
        Duration::from_millis(self.accept_backoff_ms)
    }

    /// 워커 드레인 타임아웃을 반환합니다.
    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.drain_timeout_secs)
    }

    /// 클라이언트 주소 필드명 (설정된 경우)
    pub fn client_address_field(&self) -> Option<&str> {
        if self.client_address_field.is_empty() {
            None
        } else {
            Some(&self.client_address_field)
        }
    }

    /// 입력 설정을 검증합니다.
    pub fn validate(&self) -> Result<(), ConfigError> {
        const MAX_QUEUE_CAPACITY: usize = 1_000_000;

        self.bind_addr.parse::<SocketAddr>().map_err(|e| {
            ConfigError::invalid("input.bind_addr", format!("'{}': {e}", self.bind_addr))
        })?;

        if self.payload_field.is_empty() {
            return Err(ConfigError::invalid(
                "input.payload_field",
                "must not be empty",
            ));
        }

        if self.congestion_threshold_secs == 0 {
            return Err(ConfigError::invalid(
                "input.congestion_threshold_secs",
                "must be greater than 0",
            ));
        }

        if self.queue_capacity == 0 || self.queue_capacity > MAX_QUEUE_CAPACITY {
            return Err(ConfigError::invalid(
                "input.queue_capacity",
                format!("must be 1-{MAX_QUEUE_CAPACITY}"),
            ));
        }

        if self.max_line_bytes == 0 {
            return Err(ConfigError::invalid(
                "input.max_line_bytes",
                "must be greater than 0",
            ));
        }

        if self.accept_backoff_ms == 0 {
            return Err(ConfigError::invalid(
                "input.accept_backoff_ms",
                "must be greater than 0",
            ));
        }

        self.breaker.validate()?;
        self.decoders.validate()?;
        self.codec.validate()?;
        Ok(())
    }
}

/// 차단기 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerConfig {
    /// 허용 실패 횟수. 이 값을 넘으면 차단기가 열립니다.
    pub error_threshold: u32,
    /// 열린 차단기가 다시 닫히기까지의 대기 시간 (초). 음수는 설정 오류입니다.
    pub backoff_delay_secs: i64,
    /// 집계 대상 실패 유형
    pub monitored: Vec<FailureKind>,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            error_threshold: 5,
            backoff_delay_secs: 10,
            monitored: vec![FailureKind::Timeout],
        }
    }
}

impl BreakerConfig {
    /// 대기 시간을 `Duration`으로 변환합니다.
    ///
    /// 음수이면 `ConfigError`를 반환합니다.
    pub fn backoff_delay(&self) -> Result<Duration, ConfigError> {
        u64::try_from(self.backoff_delay_secs)
            .map(Duration::from_secs)
            .map_err(|_| {
                ConfigError::invalid(
                    "input.breaker.backoff_delay_secs",
                    format!("must not be negative (got {})", self.backoff_delay_secs),
                )
            })
    }

    /// 차단기 설정을 검증합니다.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.backoff_delay()?;
        Ok(())
    }
}

/// 식별자별 디코더 캐시 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DecoderCacheConfig {
    /// 이 시간 동안 쓰이지 않은 디코더는 축출됩니다 (초)
    pub idle_timeout_secs: u64,
    /// 최대 디코더 수. 초과 시 가장 오래 쓰이지 않은 디코더를 축출합니다.
    pub max_entries: usize,
    /// 유휴 축출 검사 주기 (초)
    pub sweep_interval_secs: u64,
}

impl Default for DecoderCacheConfig {
    fn default() -> Self {
        Self {
            idle_timeout_secs: 300,
            max_entries: 10_000,
            sweep_interval_secs: 30,
        }
    }
}

impl DecoderCacheConfig {
    /// 유휴 타임아웃을 반환합니다.
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    /// 축출 검사 주기를 반환합니다.
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.idle_timeout_secs == 0 {
            return Err(ConfigError::invalid(
                "input.decoders.idle_timeout_secs",
                "must be greater than 0",
            ));
        }
        if self.max_entries == 0 {
            return Err(ConfigError::invalid(
                "input.decoders.max_entries",
                "must be greater than 0",
            ));
        }
        if self.sweep_interval_secs == 0 {
            return Err(ConfigError::invalid(
                "input.decoders.sweep_interval_secs",
                "must be greater than 0",
            ));
        }
        Ok(())
    }
}

/// 코덱 설정
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CodecConfig {
    /// 페이로드 하나당 이벤트 하나
    #[default]
    Plain,
    /// 여러 줄 집계
    Multiline(MultilineConfig),
    /// 페이로드를 JSON 객체로 파싱
    Json,
}

impl CodecConfig {
    /// 코덱 이름을 반환합니다.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Plain => "plain",
            Self::Multiline(_) => "multiline",
            Self::Json => "json",
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        match self {
            Self::Multiline(multiline) => multiline.validate(),
            Self::Plain | Self::Json => Ok(()),
        }
    }
}

/// 여러 줄 코덱 설정
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MultilineConfig {
    /// 줄 판별 정규식
    pub pattern: String,
    /// true이면 패턴에 맞지 않는 줄을 집계 대상으로 봅니다
    pub negate: bool,
    /// 집계 방향
    pub what: MultilineWhat,
    /// 이벤트 하나에 담을 최대 줄 수
    pub max_lines: usize,
    /// 이벤트 하나에 담을 최대 바이트 수
    pub max_bytes: usize,
}

impl Default for MultilineConfig {
    fn default() -> Self {
        Self {
            pattern: r"^\s".to_owned(),
            negate: false,
            what: MultilineWhat::Previous,
            max_lines: 500,
            max_bytes: 10 * 1024 * 1024, // 10MB
        }
    }
}

impl MultilineConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.pattern.is_empty() {
            return Err(ConfigError::invalid(
                "input.codec.pattern",
                "must not be empty",
            ));
        }
        if self.max_lines == 0 {
            return Err(ConfigError::invalid(
                "input.codec.max_lines",
                "must be greater than 0",
            ));
        }
        if self.max_bytes == 0 {
            return Err(ConfigError::invalid(
                "input.codec.max_bytes",
                "must be greater than 0",
            ));
        }
        Ok(())
    }
}

/// 메트릭 엔드포인트 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// 활성화 여부
    pub enabled: bool,
    /// 리슨 주소
    pub listen_addr: String,
    /// 리슨 포트
    pub port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen_addr: "127.0.0.1".to_owned(),
            port: 9100,
        }
    }
}

// --- 환경변수 오버라이드 헬퍼 ---

fn override_string(target: &mut String, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        *target = val;
    }
}

fn override_parsed<T: std::str::FromStr>(target: &mut T, env_key: &str, type_name: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<T>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                expected = type_name,
                "failed to parse env var, ignoring"
            ),
        }
    }
}

fn override_bool(target: &mut bool, env_key: &str) {
    override_parsed(target, env_key, "bool");
}

fn override_usize(target: &mut usize, env_key: &str) {
    override_parsed(target, env_key, "usize");
}

fn override_u16(target: &mut u16, env_key: &str) {
    override_parsed(target, env_key, "u16");
}

fn override_u32(target: &mut u32, env_key: &str) {
    override_parsed(target, env_key, "u32");
}

fn override_u64(target: &mut u64, env_key: &str) {
    override_parsed(target, env_key, "u64");
}

fn override_i64(target: &mut i64, env_key: &str) {
    override_parsed(target, env_key, "i64");
}
