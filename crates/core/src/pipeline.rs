//! 파이프라인 trait — 모듈 확장 포인트 정의

use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};

use crate::error::LumberyardError;
use crate::event::Event;

/// `dyn` 호환이 필요한 곳에서 사용하는 boxed future
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// 모듈 건강 상태
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum HealthStatus {
    /// 정상
    Healthy,
    /// 동작하지만 성능 저하 (사유 포함)
    Degraded(String),
    /// 비정상 (사유 포함)
    Unhealthy(String),
}

impl HealthStatus {
    /// 정상 상태인지 확인합니다.
    pub fn is_healthy(&self) -> bool {
        matches!(self, Self::Healthy)
    }

    /// 비정상 상태인지 확인합니다.
    pub fn is_unhealthy(&self) -> bool {
        matches!(self, Self::Unhealthy(_))
    }
}

/// 생명주기를 가진 모듈이 구현하는 trait
///
/// # 생명주기
/// ```text
/// Initialized → start() → Running → stop() → Stopped
/// ```
pub trait Pipeline: Send {
    /// 모듈을 시작합니다. 백그라운드 태스크를 스폰하고 즉시 반환합니다.
    fn start(&mut self) -> impl Future<Output = Result<(), LumberyardError>> + Send;

    /// 모듈을 정지합니다.
    ///
    /// 버퍼에 남은 상태를 모두 내보낸 뒤 반환해야 합니다.
    fn stop(&mut self) -> impl Future<Output = Result<(), LumberyardError>> + Send;

    /// 모듈의 건강 상태를 확인합니다.
    fn health_check(&self) -> impl Future<Output = HealthStatus> + Send;
}

/// 식별자(identity)별 상태를 가진 디코더
///
/// 원시 페이로드를 받아 0개 이상의 완성된 이벤트를 동기적으로 내보냅니다.
/// 여러 줄 집계처럼 부분 상태를 버퍼링하는 디코더는 [`Decoder::flush`]에서
/// 남은 상태를 반드시 내보내야 합니다.
pub trait Decoder: Send {
    /// 코덱 이름 (로깅용)
    fn name(&self) -> &str;

    /// 페이로드 하나를 디코딩하고 완성된 이벤트를 `emit`으로 전달합니다.
    fn decode(&mut self, payload: &str, emit: &mut dyn FnMut(Event));

    /// 버퍼링된 부분 이벤트를 모두 `emit`으로 내보냅니다.
    fn flush(&mut self, emit: &mut dyn FnMut(Event));

    /// 버퍼링된 부분 상태가 있는지 확인합니다.
    fn has_pending(&self) -> bool {
        false
    }
}
