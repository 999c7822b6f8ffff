//! 차단기 -- 감시 대상 작업의 실패를 집계하여 "진행 가능" 여부를 결정합니다.
//!
//! # 상태
//! ```text
//! CLOSED (error_count <= threshold)
//!    │  감시 대상 실패가 누적되어 threshold 초과
//!    ▼
//! OPEN   (error_count > threshold)
//!    │  마지막 실패 이후 backoff_delay 경과 → error_count = 0
//!    ▼
//! CLOSED
//! ```
//!
//! 반열림(half-open) 상태는 저장되지 않습니다. [`BreakerError::HalfOpen`]은
//! 작업이 실패했지만 차단기가 아직 닫혀 있다는 신호일 뿐입니다.
//!
//! # 회복 정책
//! 성공한 작업은 실패 카운트를 초기화하지 않습니다. 회복은 오직 backoff 경과로만
//! 일어나며, 간헐적으로 느린 소비자 앞에서 차단기가 열림/닫힘을 반복하지 않습니다.

use std::collections::HashSet;
use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use lumberyard_core::config::BreakerConfig;
use lumberyard_core::error::ConfigError;
use lumberyard_core::metrics as m;
use lumberyard_core::types::FailureKind;

/// 실패를 차단기 집계 유형으로 분류합니다.
///
/// `None`을 반환하는 실패는 감시 대상이 아니며 그대로 전파됩니다.
pub trait Classify {
    /// 실패 유형을 반환합니다.
    fn failure_kind(&self) -> Option<FailureKind>;
}

/// [`Breaker::execute`]의 거부 결과
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum BreakerError<E> {
    /// 작업이 실패했지만 차단기는 아직 닫혀 있습니다.
    /// 호출자는 현재 작업 단위만 포기합니다.
    #[error("operation failed, breaker still closed")]
    HalfOpen,

    /// 차단기가 열렸습니다. `is_closed()`가 다시 true가 될 때까지 작업을 보내지 않아야 합니다.
    #[error("breaker is open")]
    Open,

    /// 감시 대상이 아닌 실패 (집계하지 않음)
    #[error("{0}")]
    Inner(E),
}

impl<E> BreakerError<E> {
    /// 차단기 신호(`HalfOpen`/`Open`)인지 확인합니다.
    pub fn is_breaker_signal(&self) -> bool {
        matches!(self, Self::HalfOpen | Self::Open)
    }
}

#[derive(Debug, Default)]
struct BreakerState {
    error_count: u32,
    last_failure: Option<Instant>,
}

/// 실패율 게이트
///
/// 내부 상태는 하나의 mutex로 보호되며, 잠금은 `.await` 경계를 넘지 않습니다.
/// 여러 워커가 `Arc<Breaker>`로 공유합니다.
#[derive(Debug)]
pub struct Breaker {
    name: String,
    monitored: HashSet<FailureKind>,
    error_threshold: u32,
    backoff_delay: Duration,
    state: Mutex<BreakerState>,
}

impl Breaker {
    /// 설정으로 차단기를 생성합니다.
    ///
    /// `backoff_delay_secs`가 음수이면 `ConfigError`를 반환합니다.
    pub fn new(name: impl Into<String>, config: &BreakerConfig) -> Result<Self, ConfigError> {
        let backoff_delay = config.backoff_delay()?;
        Ok(Self::with_delay(
            name,
            config.monitored.iter().copied(),
            config.error_threshold,
            backoff_delay,
        ))
    }

    /// 검증된 값으로 차단기를 직접 생성합니다.
    pub fn with_delay(
        name: impl Into<String>,
        monitored: impl IntoIterator<Item = FailureKind>,
        error_threshold: u32,
        backoff_delay: Duration,
    ) -> Self {
        Self {
            name: name.into(),
            monitored: monitored.into_iter().collect(),
            error_threshold,
            backoff_delay,
            state: Mutex::new(BreakerState::default()),
        }
    }

    /// 차단기 이름
    pub fn name(&self) -> &str {
        &self.name
    }

    /// 허용 실패 횟수
    pub fn error_threshold(&self) -> u32 {
        self.error_threshold
    }

    /// 열린 뒤 다시 닫히기까지의 대기 시간
    pub fn backoff_delay(&self) -> Duration {
        self.backoff_delay
    }

    /// 현재 실패 카운트
    pub fn error_count(&self) -> u32 {
        self.lock().error_count
    }

    /// 주어진 실패 유형을 집계하는지 확인합니다.
    pub fn monitors(&self, kind: FailureKind) -> bool {
        self.monitored.contains(&kind)
    }

    /// 작업을 진행해도 되는지 확인합니다.
    ///
    /// 열린 상태에서 backoff가 경과했으면 카운트를 0으로 되돌리고 true를 반환합니다.
    pub fn is_closed(&self) -> bool {
        let mut state = self.lock();
        self.closed_locked(&mut state, Instant::now())
    }

    /// 작업을 실행하고 결과를 차단기 정책에 따라 분류합니다.
    ///
    /// - 차단기가 열려 있으면 작업을 실행하지 않고 `Open`을 반환합니다.
    /// - 성공하면 값을 그대로 반환합니다 (카운트는 유지).
    /// - 감시 대상 실패면 카운트를 올리고 `HalfOpen` 또는 `Open`을 반환합니다.
    /// - 그 밖의 실패는 `Inner`로 감싸 집계 없이 반환합니다.
    pub async fn execute<F, Fut, T, E>(&self, operation: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Classify,
    {
        if !self.is_closed() {
            return Err(BreakerError::Open);
        }

        match operation().await {
            Ok(value) => Ok(value),
            Err(err) => match err.failure_kind() {
                Some(kind) if self.monitored.contains(&kind) => Err(self.record_failure(kind)),
                _ => Err(BreakerError::Inner(err)),
            },
        }
    }

    fn record_failure<E>(&self, kind: FailureKind) -> BreakerError<E> {
        let mut state = self.lock();
        let was_closed = state.error_count <= self.error_threshold;
        state.error_count = state.error_count.saturating_add(1);
        state.last_failure = Some(Instant::now());

        if state.error_count <= self.error_threshold {
            debug!(
                breaker = %self.name,
                kind = %kind,
                error_count = state.error_count,
                threshold = self.error_threshold,
                "monitored failure, breaker still closed"
            );
            return BreakerError::HalfOpen;
        }

        if was_closed {
            warn!(
                breaker = %self.name,
                kind = %kind,
                error_count = state.error_count,
                backoff_secs = self.backoff_delay.as_secs_f64(),
                "breaker opened"
            );
            metrics::counter!(m::BREAKER_OPENED_TOTAL, m::LABEL_BREAKER => self.name.clone())
                .increment(1);
        }
        BreakerError::Open
    }

    fn closed_locked(&self, state: &mut BreakerState, now: Instant) -> bool {
        if state.error_count <= self.error_threshold {
            return true;
        }

        let elapsed = state
            .last_failure
            .map_or(self.backoff_delay, |at| now.saturating_duration_since(at));
        if elapsed >= self.backoff_delay {
            state.error_count = 0;
            info!(breaker = %self.name, "backoff elapsed, breaker closed");
            true
        } else {
            false
        }
    }

    fn lock(&self) -> MutexGuard<'_, BreakerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    enum TestError {
        Slow,
        Broken,
    }

    impl Classify for TestError {
        fn failure_kind(&self) -> Option<FailureKind> {
            match self {
                Self::Slow => Some(FailureKind::Timeout),
                Self::Broken => None,
            }
        }
    }

    fn breaker(threshold: u32, backoff_secs: i64) -> Breaker {
        let config = BreakerConfig {
            error_threshold: threshold,
            backoff_delay_secs: backoff_secs,
            monitored: vec![FailureKind::Timeout],
        };
        Breaker::new("testing", &config).unwrap()
    }

    async fn fail(breaker: &Breaker) -> BreakerError<TestError> {
        breaker
            .execute(|| async { Err::<(), _>(TestError::Slow) })
            .await
            .unwrap_err()
    }

    #[test]
    fn negative_backoff_is_configuration_error() {
        let config = BreakerConfig {
            backoff_delay_secs: -10,
            ..Default::default()
        };
        let err = Breaker::new("testing", &config).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn non_negative_backoff_is_accepted() {
        for secs in [0, 10] {
            let config = BreakerConfig {
                backoff_delay_secs: secs,
                ..Default::default()
            };
            let breaker = Breaker::new("testing", &config).unwrap();
            assert_eq!(breaker.backoff_delay(), Duration::from_secs(secs as u64));
        }
    }

    #[test]
    fn fresh_breaker_is_closed() {
        let breaker = breaker(1, 10);
        assert!(breaker.is_closed());
        assert_eq!(breaker.error_count(), 0);
        assert_eq!(breaker.name(), "testing");
    }

    #[tokio::test]
    async fn first_failure_is_half_open_second_is_open() {
        let breaker = breaker(1, 10);

        assert_eq!(fail(&breaker).await, BreakerError::HalfOpen);
        assert!(breaker.is_closed());

        assert_eq!(fail(&breaker).await, BreakerError::Open);
        assert!(!breaker.is_closed());
        assert_eq!(breaker.error_count(), 2);
    }

    #[tokio::test]
    async fn zero_threshold_opens_on_first_failure() {
        let breaker = breaker(0, 10);
        assert_eq!(fail(&breaker).await, BreakerError::Open);
        assert!(!breaker.is_closed());
    }

    #[tokio::test]
    async fn open_breaker_does_not_run_operation() {
        let breaker = breaker(1, 10);
        fail(&breaker).await;
        fail(&breaker).await;

        let mut ran = false;
        let result = breaker
            .execute(|| {
                ran = true;
                async { Ok::<_, TestError>(()) }
            })
            .await;
        assert_eq!(result, Err(BreakerError::Open));
        assert!(!ran);
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_elapsed_closes_and_resets_count() {
        let breaker = breaker(1, 10);
        fail(&breaker).await;
        fail(&breaker).await;
        assert!(!breaker.is_closed());

        tokio::time::advance(Duration::from_secs(9)).await;
        assert!(!breaker.is_closed(), "still inside backoff window");

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(breaker.is_closed());
        assert_eq!(breaker.error_count(), 0);

        // 초기화되었으므로 다음 실패 하나는 다시 HalfOpen
        assert_eq!(fail(&breaker).await, BreakerError::HalfOpen);
        assert!(breaker.is_closed());
    }

    #[tokio::test]
    async fn success_does_not_heal_error_count() {
        let breaker = breaker(1, 10);
        assert_eq!(fail(&breaker).await, BreakerError::HalfOpen);

        let value = breaker
            .execute(|| async { Ok::<_, TestError>(42) })
            .await
            .unwrap();
        assert_eq!(value, 42);
        assert_eq!(breaker.error_count(), 1);

        // 성공 뒤에도 다음 실패가 차단기를 연다
        assert_eq!(fail(&breaker).await, BreakerError::Open);
    }

    #[tokio::test]
    async fn non_monitored_failure_propagates_uncounted() {
        let breaker = breaker(0, 10);
        let err = breaker
            .execute(|| async { Err::<(), _>(TestError::Broken) })
            .await
            .unwrap_err();
        assert_eq!(err, BreakerError::Inner(TestError::Broken));
        assert!(!err.is_breaker_signal());
        assert_eq!(breaker.error_count(), 0);
        assert!(breaker.is_closed());
    }

    #[tokio::test]
    async fn unmonitored_kind_is_not_counted() {
        let breaker = Breaker::with_delay("closed-only", [FailureKind::Closed], 0, Duration::ZERO);
        assert!(!breaker.monitors(FailureKind::Timeout));
        let err = fail(&breaker).await;
        assert_eq!(err, BreakerError::Inner(TestError::Slow));
        assert_eq!(breaker.error_count(), 0);
    }

    #[tokio::test]
    async fn zero_backoff_recovers_immediately() {
        let breaker = breaker(0, 0);
        assert_eq!(fail(&breaker).await, BreakerError::Open);
        assert!(breaker.is_closed());
        assert_eq!(breaker.error_count(), 0);
    }
}
