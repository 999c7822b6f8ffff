//! 디스패처 -- 연결 수락 루프와 연결별 워커 태스크
//!
//! # 수락 루프
//! 차단기가 닫혀 있을 때만 연결을 수락합니다. 열려 있으면 `accept_backoff`만큼
//! 쉬었다가 다시 확인합니다. 하류가 밀리는 동안 새 연결은 커널 backlog에서 대기합니다.
//!
//! # 워커
//! 연결 하나당 tokio 태스크 하나가 레코드를 읽고, 디코딩하고, 이벤트를 큐에 넣습니다.
//! 차단기 신호를 받으면 연결을 닫아 클라이언트가 재접속 후 재전송하도록 합니다.
//! 한 워커의 실패(패닉 포함)는 다른 워커나 수락 루프에 영향을 주지 않습니다.
//!
//! # 종료
//! stop 토큰이 취소되면 수락 루프가 리스너를 버리고, 워커를 최대 `drain_timeout`
//! 동안 기다린 뒤 남은 워커를 중단합니다.

use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use lumberyard_core::config::InputConfig;
use lumberyard_core::event::Event;
use lumberyard_core::metrics as m;

use crate::breaker::{Breaker, BreakerError};
use crate::queue::{PushError, QueueProducer};
use crate::router::{DecoderRouter, identity};
use crate::transport::{Connection, Listener};

/// 워커가 공유하는 상태
#[derive(Debug)]
pub struct WorkerContext {
    /// 차단기
    pub breaker: Arc<Breaker>,
    /// 디코더 라우터
    pub router: Arc<DecoderRouter>,
    /// 브로커 큐 생산자
    pub producer: QueueProducer<Event>,
    /// push 타임아웃
    pub congestion_threshold: Duration,
}

/// 워커 종료 사유
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerExit {
    /// 상대가 연결을 끝냄
    Eof,
    /// stop 토큰 취소
    Stopped,
    /// 차단기 거부 (`HalfOpen` 또는 `Open`)
    Rejected,
    /// 읽기 실패 또는 감시 대상이 아닌 push 실패
    Failed(String),
}

/// 수락 루프 + 워커 집합
pub struct Dispatcher<L: Listener> {
    listener: L,
    context: Arc<WorkerContext>,
    cancel: CancellationToken,
    accept_backoff: Duration,
    drain_timeout: Duration,
}

impl<L: Listener> Dispatcher<L> {
    /// 디스패처를 생성합니다.
    pub fn new(
        listener: L,
        context: WorkerContext,
        cancel: CancellationToken,
        config: &InputConfig,
    ) -> Self {
        Self {
            listener,
            context: Arc::new(context),
            cancel,
            accept_backoff: config.accept_backoff(),
            drain_timeout: config.drain_timeout(),
        }
    }

    /// stop 토큰이 취소될 때까지 연결을 수락합니다.
    ///
    /// 워커를 모두 정리한 뒤 반환합니다.
    pub async fn run(self) {
        let Self {
            mut listener,
            context,
            cancel,
            accept_backoff,
            drain_timeout,
        } = self;
        let mut workers = JoinSet::new();

        loop {
            if cancel.is_cancelled() {
                break;
            }

            if !context.breaker.is_closed() {
                warn!(
                    breaker = context.breaker.name(),
                    backoff_ms = accept_backoff.as_millis() as u64,
                    "breaker open, not accepting connections"
                );
                metrics::counter!(m::CONNECTIONS_REFUSED_TOTAL).increment(1);
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(accept_backoff) => continue,
                }
            }

            tokio::select! {
                biased;

                _ = cancel.cancelled() => break,

                Some(joined) = workers.join_next(), if !workers.is_empty() => {
                    log_worker_result(joined);
                }

                accepted = listener.accept() => match accepted {
                    Ok(Some(conn)) => {
                        debug!(peer = conn.peer(), "connection accepted");
                        metrics::counter!(m::CONNECTIONS_ACCEPTED_TOTAL).increment(1);
                        workers.spawn(serve_connection(
                            conn,
                            Arc::clone(&context),
                            cancel.clone(),
                        ));
                    }
                    Ok(None) => {
                        info!("listener closed, waiting for stop");
                        cancel.cancelled().await;
                        break;
                    }
                    Err(e) => {
                        error!(error = %e, "accept failed");
                        tokio::select! {
                            _ = cancel.cancelled() => break,
                            _ = tokio::time::sleep(accept_backoff) => {}
                        }
                    }
                },
            }
        }

        drop(listener);
        drain_workers(&mut workers, drain_timeout).await;
        info!("dispatcher stopped");
    }
}

async fn drain_workers(workers: &mut JoinSet<WorkerExit>, drain_timeout: Duration) {
    if workers.is_empty() {
        return;
    }

    info!(workers = workers.len(), "draining connection workers");
    let drain = async {
        while let Some(joined) = workers.join_next().await {
            log_worker_result(joined);
        }
    };
    if tokio::time::timeout(drain_timeout, drain).await.is_err() {
        warn!(
            remaining = workers.len(),
            timeout_secs = drain_timeout.as_secs_f64(),
            "drain timeout elapsed, aborting remaining workers"
        );
        workers.shutdown().await;
    }
}

fn log_worker_result(joined: Result<WorkerExit, JoinError>) {
    match joined {
        Ok(exit) => debug!(exit = ?exit, "worker finished"),
        Err(e) if e.is_panic() => {
            error!(panic = %panic_message(e.into_panic()), "connection worker panicked");
        }
        Err(e) => debug!(error = %e, "worker cancelled"),
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}

/// 연결 하나를 끝까지 처리합니다.
pub async fn serve_connection<C: Connection>(
    mut conn: C,
    context: Arc<WorkerContext>,
    cancel: CancellationToken,
) -> WorkerExit {
    let peer = conn.peer().to_owned();
    metrics::gauge!(m::ACTIVE_CONNECTIONS).increment(1.0);

    let exit = 'records: loop {
        let record = tokio::select! {
            biased;
            _ = cancel.cancelled() => break WorkerExit::Stopped,
            record = conn.next_record() => record,
        };

        let fields = match record {
            Ok(Some(fields)) => fields,
            Ok(None) => break WorkerExit::Eof,
            Err(e) => {
                error!(peer = %peer, error = %e, "record read failed, closing connection");
                break WorkerExit::Failed(e.to_string());
            }
        };
        metrics::counter!(m::RECORDS_RECEIVED_TOTAL).increment(1);

        let source = identity(&fields);
        let events = context.router.decode(fields, Some(&peer));
        for event in events {
            match publish(&context, event).await {
                Ok(()) => {}
                Err(BreakerError::HalfOpen) | Err(BreakerError::Open) => {
                    warn!(
                        peer = %peer,
                        identity = %source,
                        error_count = context.breaker.error_count(),
                        "downstream congested, closing connection"
                    );
                    break 'records WorkerExit::Rejected;
                }
                Err(BreakerError::Inner(e)) => {
                    error!(
                        peer = %peer,
                        identity = %source,
                        error = %e,
                        "event publish failed, closing connection"
                    );
                    break 'records WorkerExit::Failed(e.to_string());
                }
            }
        }
    };

    match exit {
        WorkerExit::Eof => debug!(peer = %peer, "connection closed by peer"),
        WorkerExit::Stopped => debug!(peer = %peer, "stop requested, closing connection"),
        _ => {}
    }
    conn.close().await;
    metrics::gauge!(m::ACTIVE_CONNECTIONS).decrement(1.0);
    exit
}

async fn publish(
    context: &WorkerContext,
    event: Event,
) -> Result<(), BreakerError<PushError<Event>>> {
    context
        .breaker
        .execute(move || async move {
            let pushed = context
                .producer
                .push(event, context.congestion_threshold)
                .await;
            match &pushed {
                Ok(()) => metrics::counter!(m::EVENTS_PUBLISHED_TOTAL).increment(1),
                Err(PushError::Timeout(_)) => {
                    metrics::counter!(m::PUSH_TIMEOUTS_TOTAL).increment(1);
                }
                Err(PushError::Closed(_)) => {}
            }
            pushed
        })
        .await
}
