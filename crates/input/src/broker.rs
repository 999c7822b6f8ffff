//! 브로커 -- 큐의 단일 소비자. 이벤트를 싱크로 넘깁니다.
//!
//! pop에는 타임아웃이 없습니다. 모든 생산자가 사라지고 큐가 비면 루프가 끝나고
//! 싱크를 돌려줍니다. 싱크 에러는 기록만 하고 다음 이벤트로 넘어갑니다.

use tracing::{error, info};

use lumberyard_core::event::Event;
use lumberyard_core::metrics as m;

use crate::queue::QueueConsumer;
use crate::sink::Sink;

/// 큐가 닫힐 때까지 이벤트를 싱크로 전달하고 싱크를 반환합니다.
pub async fn run<S: Sink>(mut consumer: QueueConsumer<Event>, mut sink: S) -> S {
    let mut delivered: u64 = 0;
    while let Some(event) = consumer.pop().await {
        match sink.append(event).await {
            Ok(()) => delivered += 1,
            Err(e) => {
                error!(error = %e, "sink append failed, event dropped");
                metrics::counter!(m::SINK_ERRORS_TOTAL).increment(1);
            }
        }
    }

    if let Err(e) = sink.flush().await {
        error!(error = %e, "sink flush failed");
        metrics::counter!(m::SINK_ERRORS_TOTAL).increment(1);
    }
    info!(delivered, "queue closed, broker stopped");
    sink
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::error::InputError;
    use crate::queue::bounded_timed_queue;
    use crate::sink::MemorySink;

    struct FlakySink {
        seen: Vec<String>,
    }

    impl Sink for FlakySink {
        async fn append(&mut self, event: Event) -> Result<(), InputError> {
            let message = event.message().unwrap_or_default().to_owned();
            if message == "bad" {
                return Err(InputError::Sink("rejected".to_owned()));
            }
            self.seen.push(message);
            Ok(())
        }
    }

    #[tokio::test]
    async fn drains_queue_and_returns_sink() {
        let (producer, consumer) = bounded_timed_queue(1).unwrap();
        let broker = tokio::spawn(run(consumer, MemorySink::new()));

        for m in ["a", "b", "c"] {
            producer
                .push(Event::from_message(m), Duration::from_secs(5))
                .await
                .unwrap();
        }
        drop(producer);

        let sink = broker.await.unwrap();
        let messages: Vec<_> = sink.events().iter().filter_map(Event::message).collect();
        assert_eq!(messages, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn sink_errors_are_not_fatal() {
        let (producer, consumer) = bounded_timed_queue(4).unwrap();
        for m in ["ok", "bad", "after"] {
            producer
                .push(Event::from_message(m), Duration::from_secs(1))
                .await
                .unwrap();
        }
        drop(producer);

        let sink = run(consumer, FlakySink { seen: Vec::new() }).await;
        assert_eq!(sink.seen, vec!["ok", "after"]);
    }
}
