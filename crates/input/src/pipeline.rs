//! lumberjack 입력 -- 차단기, 큐, 디스패처, 브로커, 디코더 라우터를 조립합니다.
//!
//! [`LumberjackInput`]은 core의 [`Pipeline`] trait을 구현하여
//! `lumberyard-daemon`에서 start/stop/health_check 생명주기로 관리됩니다.
//!
//! # 내부 아키텍처
//! ```text
//! Listener -> Dispatcher -> worker (per connection)
//!                              │ DecoderRouter.decode
//!                              │ Breaker.execute(queue.push)
//!                              ▼
//!                        BoundedTimedQueue -> Broker -> Sink
//!                              ▲
//!          sweeper (idle eviction, evicted events via push_wait)
//! ```
//!
//! 축출 이벤트는 `max_entries` 용량의 대기열을 거칩니다. 하류가 멈춰 대기열이
//! 가득 차면 축출 이벤트는 버려지고 `lumberyard_evicted_events_dropped_total`로
//! 집계됩니다.
//!
//! # 종료 순서
//! 1. stop 토큰 취소
//! 2. 디스패처: 리스너 해제, 워커 정리 (drain 타임아웃 후 중단)
//! 3. sweeper 종료, 축출 대기열을 돌려받음
//! 4. 워커가 모두 끝난 뒤 축출 대기열과 `DecoderRouter::flush` 결과를 큐에 넣음
//! 5. 생산자 해제 → 브로커가 큐를 비우고 싱크를 돌려줌

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use lumberyard_core::config::InputConfig;
use lumberyard_core::error::{ConfigError, LumberyardError, PipelineError};
use lumberyard_core::event::Event;
use lumberyard_core::metrics as m;
use lumberyard_core::pipeline::{HealthStatus, Pipeline};

use crate::breaker::Breaker;
use crate::broker;
use crate::codec::CodecFactory;
use crate::dispatcher::{Dispatcher, WorkerContext};
use crate::error::InputError;
use crate::queue::{QueueConsumer, QueueProducer, bounded_timed_queue};
use crate::router::DecoderRouter;
use crate::sink::Sink;
use crate::transport::Listener;

/// 차단기 이름 (로그/메트릭 레이블)
pub const BREAKER_NAME: &str = "lumberjack";

/// 입력 실행 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InputState {
    /// 초기화됨, 아직 시작하지 않음
    Initialized,
    /// 실행 중
    Running,
    /// 정지됨
    Stopped,
}

/// lumberjack 입력
///
/// # 사용 예시
/// ```ignore
/// use lumberyard_input::{LumberjackInputBuilder, StdoutSink, TcpJsonListener};
///
/// let listener = TcpJsonListener::bind(&config.bind_addr, config.max_line_bytes).await?;
/// let mut input = LumberjackInputBuilder::new()
///     .config(config)
///     .listener(listener)
///     .sink(StdoutSink::stdout())
///     .build()?;
///
/// input.start().await?;
/// // ...
/// input.stop().await?; // 버퍼링된 여러 줄 이벤트까지 싱크로 전달
/// ```
pub struct LumberjackInput<L: Listener, S: Sink> {
    config: InputConfig,
    state: InputState,
    breaker: Arc<Breaker>,
    router: Arc<DecoderRouter>,
    cancel: CancellationToken,
    listener: Option<L>,
    sink: Option<S>,
    producer: Option<QueueProducer<Event>>,
    consumer: Option<QueueConsumer<Event>>,
    evicted_rx: Option<mpsc::Receiver<Event>>,
    local_addr: Option<SocketAddr>,
    dispatcher_task: Option<JoinHandle<()>>,
    sweeper_task: Option<JoinHandle<mpsc::Receiver<Event>>>,
    broker_task: Option<JoinHandle<S>>,
}

impl<L: Listener, S: Sink> LumberjackInput<L, S> {
    /// 현재 상태 이름
    pub fn state_name(&self) -> &'static str {
        match self.state {
            InputState::Initialized => "initialized",
            InputState::Running => "running",
            InputState::Stopped => "stopped",
        }
    }

    /// 입력 설정
    pub fn config(&self) -> &InputConfig {
        &self.config
    }

    /// 공유 차단기
    pub fn breaker(&self) -> &Arc<Breaker> {
        &self.breaker
    }

    /// 디코더 라우터
    pub fn router(&self) -> &Arc<DecoderRouter> {
        &self.router
    }

    /// 리스너 로컬 주소 (시작 후)
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// 정지 후 싱크를 꺼냅니다. 실행 중이거나 이미 꺼냈으면 `None`입니다.
    pub fn take_sink(&mut self) -> Option<S> {
        if self.state == InputState::Running {
            return None;
        }
        self.sink.take()
    }

    fn spawn_sweeper(
        &self,
        producer: QueueProducer<Event>,
        mut evicted_rx: mpsc::Receiver<Event>,
    ) -> JoinHandle<mpsc::Receiver<Event>> {
        let router = Arc::clone(&self.router);
        let cancel = self.cancel.clone();
        let period = self.config.decoders.sweep_interval();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    Some(event) = evicted_rx.recv() => forward_evicted(&producer, event).await,
                    _ = interval.tick() => {
                        router.evict_idle(Instant::now());
                    }
                }
            }

            // 정지 중인 워커가 아직 축출할 수 있으므로 대기열은 stop이 비움
            debug!("decoder sweeper stopped");
            evicted_rx
        })
    }
}

async fn forward_evicted(producer: &QueueProducer<Event>, event: Event) {
    if let Err(e) = producer.push_wait(event).await {
        error!(error = %e, "failed to forward evicted decoder event");
    }
}

async fn join_task<T>(name: &str, task: Option<JoinHandle<T>>) -> Option<T> {
    let task = task?;
    match task.await {
        Ok(value) => Some(value),
        Err(e) => {
            error!(task = name, error = %e, "background task failed");
            None
        }
    }
}

impl<L: Listener, S: Sink> Pipeline for LumberjackInput<L, S> {
    async fn start(&mut self) -> Result<(), LumberyardError> {
        match self.state {
            InputState::Running => return Err(PipelineError::AlreadyRunning.into()),
            InputState::Stopped => {
                return Err(PipelineError::InitFailed(
                    "lumberjack input cannot be restarted after stop".to_owned(),
                )
                .into());
            }
            InputState::Initialized => {}
        }

        let (Some(listener), Some(sink), Some(producer), Some(consumer), Some(evicted_rx)) = (
            self.listener.take(),
            self.sink.take(),
            self.producer.clone(),
            self.consumer.take(),
            self.evicted_rx.take(),
        ) else {
            return Err(PipelineError::InitFailed("input already consumed".to_owned()).into());
        };

        let address = listener.local_addr().map_err(InputError::from)?;
        self.local_addr = Some(address);
        info!(
            address = %address,
            codec = self.router.codec_name(),
            "Starting lumberjack input listener"
        );

        self.broker_task = Some(tokio::spawn(broker::run(consumer, sink)));

        let context = WorkerContext {
            breaker: Arc::clone(&self.breaker),
            router: Arc::clone(&self.router),
            producer: producer.clone(),
            congestion_threshold: self.config.congestion_threshold(),
        };
        let dispatcher = Dispatcher::new(listener, context, self.cancel.clone(), &self.config);
        self.dispatcher_task = Some(tokio::spawn(dispatcher.run()));

        self.sweeper_task = Some(self.spawn_sweeper(producer, evicted_rx));

        self.state = InputState::Running;
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), LumberyardError> {
        if self.state != InputState::Running {
            return Err(PipelineError::NotRunning.into());
        }

        info!("stopping lumberjack input");
        self.cancel.cancel();

        join_task("dispatcher", self.dispatcher_task.take()).await;
        let evicted_rx = join_task("sweeper", self.sweeper_task.take()).await;

        let producer = self.producer.take();
        let mut pending = Vec::new();
        if let Some(mut evicted_rx) = evicted_rx {
            while let Ok(event) = evicted_rx.try_recv() {
                pending.push(event);
            }
        }
        let flushed = self.router.flush(|identity, event| {
            debug!(identity = %identity, "flushing buffered event");
            pending.push(event);
        });
        if flushed > 0 {
            info!(events = flushed, "flushing buffered partial events");
        }
        if let Some(producer) = producer {
            for event in pending {
                forward_evicted(&producer, event).await;
            }
        }

        // 마지막 생산자 해제 → 브로커가 큐를 비우고 종료
        let sink = join_task("broker", self.broker_task.take()).await;
        if sink.is_none() {
            warn!("broker did not return the sink");
        }
        self.sink = sink;

        self.state = InputState::Stopped;
        info!("lumberjack input stopped");
        Ok(())
    }

    fn health_check(&self) -> impl Future<Output = HealthStatus> + Send {
        let status = match self.state {
            InputState::Running if self.breaker.is_closed() => HealthStatus::Healthy,
            InputState::Running => HealthStatus::Degraded(format!(
                "breaker open after {} failures, not accepting connections",
                self.breaker.error_count()
            )),
            InputState::Initialized => HealthStatus::Unhealthy("not started".to_owned()),
            InputState::Stopped => HealthStatus::Unhealthy("stopped".to_owned()),
        };
        // 리스너/싱크가 Sync가 아닐 수 있으므로 &self를 future에 담지 않음
        std::future::ready(status)
    }
}

/// lumberjack 입력 빌더
pub struct LumberjackInputBuilder<L, S> {
    config: InputConfig,
    listener: Option<L>,
    sink: Option<S>,
}

impl<L: Listener, S: Sink> LumberjackInputBuilder<L, S> {
    /// 기본 설정으로 빌더를 생성합니다.
    pub fn new() -> Self {
        Self {
            config: InputConfig::default(),
            listener: None,
            sink: None,
        }
    }

    /// 입력 설정을 지정합니다.
    pub fn config(mut self, config: InputConfig) -> Self {
        self.config = config;
        self
    }

    /// 리스너를 지정합니다.
    pub fn listener(mut self, listener: L) -> Self {
        self.listener = Some(listener);
        self
    }

    /// 싱크를 지정합니다.
    pub fn sink(mut self, sink: S) -> Self {
        self.sink = Some(sink);
        self
    }

    /// 설정을 검증하고 입력을 조립합니다.
    ///
    /// 차단기 backoff가 음수이거나 코덱 패턴이 잘못되었으면 실패합니다.
    pub fn build(self) -> Result<LumberjackInput<L, S>, InputError> {
        self.config.validate()?;
        let listener = self
            .listener
            .ok_or_else(|| ConfigError::invalid("listener", "must be provided"))?;
        let sink = self
            .sink
            .ok_or_else(|| ConfigError::invalid("sink", "must be provided"))?;

        let breaker = Breaker::new(BREAKER_NAME, &self.config.breaker)?;
        let factory = CodecFactory::new(&self.config.codec)?;
        let (producer, consumer) = bounded_timed_queue(self.config.queue_capacity)?;

        let (evicted_tx, evicted_rx) = mpsc::channel(self.config.decoders.max_entries.max(1));
        let mut router = DecoderRouter::new(&self.config, factory);
        router.on_evicted(move |identity, event| {
            let reason = match evicted_tx.try_send(event) {
                Ok(()) => return,
                Err(mpsc::error::TrySendError::Full(_)) => "eviction backlog full",
                Err(mpsc::error::TrySendError::Closed(_)) => "input stopped",
            };
            metrics::counter!(m::EVICTED_EVENTS_DROPPED_TOTAL).increment(1);
            warn!(identity = %identity, reason, "evicted event dropped");
        });

        Ok(LumberjackInput {
            config: self.config,
            state: InputState::Initialized,
            breaker: Arc::new(breaker),
            router: Arc::new(router),
            cancel: CancellationToken::new(),
            listener: Some(listener),
            sink: Some(sink),
            producer: Some(producer),
            consumer: Some(consumer),
            evicted_rx: Some(evicted_rx),
            local_addr: None,
            dispatcher_task: None,
            sweeper_task: None,
            broker_task: None,
        })
    }
}

impl<L: Listener, S: Sink> Default for LumberjackInputBuilder<L, S> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use lumberyard_core::config::{CodecConfig, MultilineConfig};
    use lumberyard_core::event::Fields;

    use crate::sink::MemorySink;
    use crate::transport::{ChannelConnector, ChannelListener, channel_listener};

    fn record(file: &str, line: &str) -> Fields {
        Fields::from([
            ("host".to_owned(), "machineA".to_owned()),
            ("file".to_owned(), file.to_owned()),
            ("line".to_owned(), line.to_owned()),
        ])
    }

    fn build(config: InputConfig) -> (ChannelConnector, LumberjackInput<ChannelListener, MemorySink>) {
        let (connector, listener) = channel_listener();
        let input = LumberjackInputBuilder::new()
            .config(config)
            .listener(listener)
            .sink(MemorySink::new())
            .build()
            .unwrap();
        (connector, input)
    }

    fn multiline_config() -> InputConfig {
        InputConfig {
            codec: CodecConfig::Multiline(MultilineConfig {
                pattern: "^2015".to_owned(),
                negate: true,
                ..Default::default()
            }),
            queue_capacity: 16,
            ..Default::default()
        }
    }

    #[test]
    fn negative_backoff_fails_build() {
        let mut config = InputConfig::default();
        config.breaker.backoff_delay_secs = -1;
        let (_connector, listener) = channel_listener();
        let result = LumberjackInputBuilder::new()
            .config(config)
            .listener(listener)
            .sink(MemorySink::new())
            .build();
        assert!(matches!(result, Err(InputError::Config(_))));
    }

    #[test]
    fn missing_listener_fails_build() {
        let result: Result<LumberjackInput<ChannelListener, MemorySink>, _> =
            LumberjackInputBuilder::new().sink(MemorySink::new()).build();
        let err = result.err().unwrap();
        assert!(err.to_string().contains("listener"));
    }

    #[tokio::test]
    async fn lifecycle_and_health() {
        let (_connector, mut input) = build(InputConfig::default());
        assert_eq!(input.state_name(), "initialized");
        assert!(input.health_check().await.is_unhealthy());
        assert!(input.stop().await.is_err());

        input.start().await.unwrap();
        assert!(input.health_check().await.is_healthy());
        assert!(input.start().await.is_err());
        assert!(input.take_sink().is_none());

        input.stop().await.unwrap();
        assert_eq!(input.state_name(), "stopped");
        assert!(input.health_check().await.is_unhealthy());
        assert!(input.start().await.is_err());
        assert!(input.take_sink().is_some());
    }

    #[tokio::test]
    async fn stop_flushes_buffered_multiline_events() {
        let (connector, mut input) = build(multiline_config());
        input.start().await.unwrap();

        let conn = connector.connect("10.0.0.9:5000").unwrap();
        for line in ["2015 first", "cont 1", "2015 second", "cont 2"] {
            conn.send(record("/var/log/line", line)).await.unwrap();
        }
        drop(conn);
        // 워커가 EOF까지 읽을 시간
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(input.router().contains("machineA-/var/log/line"));

        input.stop().await.unwrap();
        let sink = input.take_sink().unwrap();
        let messages: Vec<_> = sink.events().iter().filter_map(Event::message).collect();
        assert_eq!(messages, vec!["2015 first\ncont 1", "2015 second\ncont 2"]);
        assert!(input.router().is_empty());
    }

    #[tokio::test]
    async fn events_evicted_while_stopping_reach_sink() {
        let mut config = multiline_config();
        config.decoders.max_entries = 1;
        let (_connector, mut input) = build(config);
        input.start().await.unwrap();

        // 정지 신호 뒤에도 워커는 읽어 둔 레코드를 디코딩할 수 있음
        input.cancel.cancel();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(input.router().decode(record("/a", "2015 a"), None).is_empty());
        // 용량 1: /b가 /a를 축출
        assert!(input.router().decode(record("/b", "2015 b"), None).is_empty());

        input.stop().await.unwrap();
        let sink = input.take_sink().unwrap();
        let messages: Vec<_> = sink.events().iter().filter_map(Event::message).collect();
        assert_eq!(messages, vec!["2015 a", "2015 b"]);
    }

    #[test]
    fn eviction_backlog_is_bounded_by_max_entries() {
        let mut config = multiline_config();
        config.decoders.max_entries = 1;
        let (_connector, mut input) = build(config);

        // 소비자가 없는 동안 세 번 축출
        for file in ["/a", "/b", "/c", "/d"] {
            input
                .router()
                .decode(record(file, &format!("2015 {}", &file[1..])), None);
        }

        let evicted_rx = input.evicted_rx.as_mut().unwrap();
        assert_eq!(evicted_rx.try_recv().unwrap().message(), Some("2015 a"));
        assert!(evicted_rx.try_recv().is_err());
        assert_eq!(input.router().len(), 1);
    }

    #[tokio::test]
    async fn health_degrades_while_breaker_open() {
        let mut config = InputConfig::default();
        config.breaker.error_threshold = 0;
        let (_connector, mut input) = build(config);
        input.start().await.unwrap();

        let _ = input
            .breaker()
            .execute(|| async { Err::<(), _>(crate::queue::PushError::Timeout(())) })
            .await;
        assert!(matches!(
            input.health_check().await,
            HealthStatus::Degraded(_)
        ));
        input.stop().await.unwrap();
    }
}
