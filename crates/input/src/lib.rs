#![doc = include_str!("../README.md")]
//!
//! # 모듈 구성
//!
//! - [`breaker`]: 실패 횟수 기반 차단기 (backoff 경과로만 회복)
//! - [`queue`]: push 타임아웃이 있는 유계 큐
//! - [`dispatcher`]: 수락 루프와 연결별 워커
//! - [`broker`]: 큐 소비자, 싱크 전달
//! - [`router`]: 식별자별 디코더 캐시 (유휴/용량 축출, 정지 시 flush)
//! - [`codec`]: plain, multiline, json 디코더
//! - [`transport`]: TCP JSON 줄 리스너, 인메모리 채널 리스너
//! - [`sink`]: 이벤트 하류 대상
//! - [`pipeline`]: 전체 조립 (`Pipeline` trait 구현)
//! - [`error`]: 도메인 에러 타입
//!
//! # 아키텍처
//!
//! ```text
//! Listener -> Dispatcher -> workers -> DecoderRouter -> Breaker(queue.push)
//!                                                            |
//!                                   Sink <- Broker <- BoundedTimedQueue
//! ```

pub mod breaker;
pub mod broker;
pub mod codec;
pub mod dispatcher;
pub mod error;
pub mod pipeline;
pub mod queue;
pub mod router;
pub mod sink;
pub mod transport;

// --- 주요 타입 re-export ---

// 입력
pub use pipeline::{LumberjackInput, LumberjackInputBuilder};

// 에러
pub use error::InputError;

// 차단기
pub use breaker::{Breaker, BreakerError, Classify};

// 큐
pub use queue::{PushError, QueueConsumer, QueueProducer, bounded_timed_queue};

// 디스패처
pub use dispatcher::{Dispatcher, WorkerContext, WorkerExit};

// 라우터
pub use router::{DecoderRouter, identity};

// 코덱
pub use codec::{CodecFactory, JsonDecoder, MultilineDecoder, PlainDecoder};

// 전송
pub use transport::{
    ChannelConnector, ChannelListener, Connection, ConnectionHandle, Listener, TcpJsonListener,
    channel_listener,
};

// 싱크
pub use sink::{ChannelSink, JsonLinesSink, MemorySink, Sink, StdoutSink};
