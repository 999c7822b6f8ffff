//! 입력 모듈 에러 타입
//!
//! [`InputError`]는 lumberjack 입력 내부에서 발생하는 에러를 표현합니다.
//! `From<InputError> for LumberyardError` 변환이 구현되어 있어
//! 상위 레이어에서 `?` 연산자로 자연스럽게 전파할 수 있습니다.
//!
//! 차단기 신호([`BreakerError`](crate::breaker::BreakerError))와 큐 push 실패
//! ([`PushError`](crate::queue::PushError))는 에러가 아니라 흐름 제어 결과이므로
//! 각자의 모듈에 정의되어 있습니다.

use lumberyard_core::error::{ConfigError, LumberyardError, PipelineError};

/// lumberjack 입력 도메인 에러
#[derive(Debug, thiserror::Error)]
pub enum InputError {
    /// 설정 에러 (시작 중단)
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// 리스너 바인드 실패
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// 바인드 주소
        addr: String,
        /// 원인
        source: std::io::Error,
    },

    /// 연결 수락 실패
    #[error("accept error: {0}")]
    Accept(std::io::Error),

    /// 레코드 읽기 실패
    #[error("read error from {peer}: {reason}")]
    Read {
        /// 상대 주소
        peer: String,
        /// 실패 사유
        reason: String,
    },

    /// 형식이 잘못된 레코드
    #[error("malformed record from {peer}: {reason}")]
    MalformedRecord {
        /// 상대 주소
        peer: String,
        /// 실패 사유
        reason: String,
    },

    /// 코덱 설정/생성 실패
    #[error("codec error: {codec}: {reason}")]
    Codec {
        /// 코덱 이름
        codec: String,
        /// 실패 사유
        reason: String,
    },

    /// 싱크 전달 실패
    #[error("sink error: {0}")]
    Sink(String),

    /// I/O 에러
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<InputError> for LumberyardError {
    fn from(err: InputError) -> Self {
        match err {
            InputError::Config(e) => LumberyardError::Config(e),
            InputError::Io(e) => LumberyardError::Io(e),
            other => LumberyardError::Pipeline(PipelineError::InitFailed(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_error_display_includes_peer() {
        let err = InputError::Read {
            peer: "10.0.0.7:51234".to_owned(),
            reason: "connection reset".to_owned(),
        };
        let msg = err.to_string();
        assert!(msg.contains("10.0.0.7:51234"));
        assert!(msg.contains("connection reset"));
    }

    #[test]
    fn config_error_stays_config_error() {
        let err = InputError::from(ConfigError::invalid("input.queue_capacity", "zero"));
        let top: LumberyardError = err.into();
        assert!(matches!(top, LumberyardError::Config(_)));
    }

    #[test]
    fn sink_error_converts_to_pipeline_error() {
        let top: LumberyardError = InputError::Sink("closed".to_owned()).into();
        assert!(matches!(top, LumberyardError::Pipeline(_)));
    }

    #[test]
    fn bind_error_display() {
        let err = InputError::Bind {
            addr: "0.0.0.0:5044".to_owned(),
            source: std::io::Error::new(std::io::ErrorKind::AddrInUse, "in use"),
        };
        assert!(err.to_string().contains("0.0.0.0:5044"));
    }
}
