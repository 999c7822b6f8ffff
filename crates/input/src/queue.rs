//! 시간 제한 큐 -- 다수 생산자와 단일 소비자 사이의 고정 용량 FIFO
//!
//! push에는 마감 시간이 있고 pop에는 없습니다. push 타임아웃이 이 시스템의
//! 유일한 backpressure 신호이며, 차단기가 이를 집계합니다.
//!
//! 기본 용량 1에서 큐는 버퍼라기보다 랑데부 지점에 가깝습니다.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::SendTimeoutError;

use lumberyard_core::error::ConfigError;
use lumberyard_core::types::FailureKind;

use crate::breaker::Classify;

/// push 실패. 넣지 못한 항목을 돌려줍니다.
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum PushError<T> {
    /// 마감 시간 안에 빈 자리가 생기지 않았습니다.
    #[error("queue push timed out")]
    Timeout(T),

    /// 소비자가 사라졌습니다.
    #[error("queue closed")]
    Closed(T),
}

impl<T> PushError<T> {
    /// 넣지 못한 항목을 꺼냅니다.
    pub fn into_inner(self) -> T {
        match self {
            Self::Timeout(item) | Self::Closed(item) => item,
        }
    }
}

impl<T> Classify for PushError<T> {
    fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            Self::Timeout(_) => Some(FailureKind::Timeout),
            Self::Closed(_) => Some(FailureKind::Closed),
        }
    }
}

/// 고정 용량 큐를 생성합니다.
///
/// 용량 0은 `ConfigError`입니다.
pub fn bounded_timed_queue<T>(
    capacity: usize,
) -> Result<(QueueProducer<T>, QueueConsumer<T>), ConfigError> {
    if capacity == 0 {
        return Err(ConfigError::invalid(
            "input.queue_capacity",
            "must be greater than 0",
        ));
    }
    let (tx, rx) = mpsc::channel(capacity);
    Ok((QueueProducer { tx }, QueueConsumer { rx }))
}

/// 생산자 핸들 (복제 가능)
#[derive(Debug)]
pub struct QueueProducer<T> {
    tx: mpsc::Sender<T>,
}

impl<T> Clone for QueueProducer<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<T> QueueProducer<T> {
    /// 항목을 넣습니다. `timeout` 안에 자리가 나지 않으면 항목을 돌려줍니다.
    pub async fn push(&self, item: T, timeout: Duration) -> Result<(), PushError<T>> {
        self.tx.send_timeout(item, timeout).await.map_err(|e| match e {
            SendTimeoutError::Timeout(item) => PushError::Timeout(item),
            SendTimeoutError::Closed(item) => PushError::Closed(item),
        })
    }

    /// 자리가 날 때까지 기다렸다가 항목을 넣습니다.
    ///
    /// 종료/축출 flush 경로 전용입니다. 소비자가 사라졌으면 항목을 돌려줍니다.
    pub async fn push_wait(&self, item: T) -> Result<(), PushError<T>> {
        self.tx.send(item).await.map_err(|e| PushError::Closed(e.0))
    }

    /// 현재 큐에 들어 있는 항목 수
    pub fn len(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    /// 큐가 비었는지 확인합니다.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 큐 용량
    pub fn capacity(&self) -> usize {
        self.tx.max_capacity()
    }

    /// 소비자가 사라졌는지 확인합니다.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// 소비자 핸들 (단일)
#[derive(Debug)]
pub struct QueueConsumer<T> {
    rx: mpsc::Receiver<T>,
}

impl<T> QueueConsumer<T> {
    /// 항목이 생길 때까지 기다립니다. 타임아웃은 없습니다.
    ///
    /// 모든 생산자가 사라지고 큐가 비었을 때만 `None`을 반환합니다.
    pub async fn pop(&mut self) -> Option<T> {
        self.rx.recv().await
    }

    /// 대기 없이 항목을 꺼냅니다.
    pub fn try_pop(&mut self) -> Option<T> {
        self.rx.try_recv().ok()
    }

    /// 현재 큐에 들어 있는 항목 수
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    /// 큐가 비었는지 확인합니다.
    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEADLINE: Duration = Duration::from_secs(5);

    #[test]
    fn zero_capacity_is_rejected() {
        let err = bounded_timed_queue::<u32>(0).unwrap_err();
        assert!(err.to_string().contains("queue_capacity"));
    }

    #[tokio::test]
    async fn push_into_empty_queue_succeeds_immediately() {
        let (producer, mut consumer) = bounded_timed_queue(1).unwrap();
        producer.push(1, Duration::ZERO).await.unwrap();
        assert_eq!(producer.len(), 1);
        assert_eq!(consumer.pop().await, Some(1));
        assert!(producer.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn second_push_times_out_when_undrained() {
        let (producer, consumer) = bounded_timed_queue(1).unwrap();
        producer.push("first", DEADLINE).await.unwrap();

        let start = tokio::time::Instant::now();
        let err = producer.push("second", DEADLINE).await.unwrap_err();
        assert_eq!(err, PushError::Timeout("second"));
        assert!(start.elapsed() >= DEADLINE);
        assert_eq!(err.failure_kind(), Some(FailureKind::Timeout));

        // 실패한 항목은 큐에 들어가지 않는다
        assert_eq!(consumer.len(), 1);
        assert!(producer.len() <= producer.capacity());
    }

    #[tokio::test(start_paused = true)]
    async fn blocked_push_completes_once_drained() {
        let (producer, mut consumer) = bounded_timed_queue(1).unwrap();
        producer.push(1, DEADLINE).await.unwrap();

        let pusher = {
            let producer = producer.clone();
            tokio::spawn(async move { producer.push(2, DEADLINE).await })
        };
        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(consumer.pop().await, Some(1));

        pusher.await.unwrap().unwrap();
        assert_eq!(consumer.pop().await, Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn pop_waits_without_timeout() {
        let (producer, mut consumer) = bounded_timed_queue(1).unwrap();
        let popper = tokio::spawn(async move { consumer.pop().await });

        tokio::time::advance(Duration::from_secs(3600)).await;
        tokio::task::yield_now().await;
        assert!(!popper.is_finished());

        producer.push("late", DEADLINE).await.unwrap();
        assert_eq!(popper.await.unwrap(), Some("late"));
    }

    #[tokio::test]
    async fn pop_returns_none_after_producers_dropped() {
        let (producer, mut consumer) = bounded_timed_queue(2).unwrap();
        let second = producer.clone();
        producer.push(1, DEADLINE).await.unwrap();
        drop(producer);
        second.push(2, DEADLINE).await.unwrap();
        drop(second);

        assert_eq!(consumer.pop().await, Some(1));
        assert_eq!(consumer.pop().await, Some(2));
        assert_eq!(consumer.pop().await, None);
    }

    #[tokio::test]
    async fn push_after_consumer_dropped_is_closed() {
        let (producer, consumer) = bounded_timed_queue(1).unwrap();
        drop(consumer);
        assert!(producer.is_closed());

        let err = producer.push(7, DEADLINE).await.unwrap_err();
        assert_eq!(err.failure_kind(), Some(FailureKind::Closed));
        assert_eq!(err.into_inner(), 7);

        let err = producer.push_wait(8).await.unwrap_err();
        assert_eq!(err, PushError::Closed(8));
    }

    #[tokio::test]
    async fn fifo_order_is_preserved() {
        let (producer, mut consumer) = bounded_timed_queue(4).unwrap();
        for i in 0..4 {
            producer.push(i, DEADLINE).await.unwrap();
        }
        assert_eq!(consumer.try_pop(), Some(0));
        for i in 1..4 {
            assert_eq!(consumer.pop().await, Some(i));
        }
        assert!(consumer.is_empty());
    }
}
