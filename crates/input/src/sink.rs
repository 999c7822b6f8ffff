//! 싱크 -- 브로커가 이벤트를 넘겨주는 하류 대상
//!
//! - [`ChannelSink`]: 프로세스 내부 하류로 mpsc 채널 전달
//! - [`StdoutSink`]: 표준 출력에 JSON 한 줄씩 기록 (데몬 기본값)
//! - [`MemorySink`]: 메모리에 모아 두기

use std::future::Future;

use tokio::io::{AsyncWrite, AsyncWriteExt, BufWriter, Stdout};
use tokio::sync::mpsc;

use lumberyard_core::event::Event;

use crate::error::InputError;

/// 이벤트 하류 대상
///
/// 브로커 태스크 하나만 호출하므로 `&mut self`를 받습니다.
pub trait Sink: Send + 'static {
    /// 이벤트 하나를 전달합니다.
    fn append(&mut self, event: Event) -> impl Future<Output = Result<(), InputError>> + Send;

    /// 버퍼링된 출력을 내보냅니다. 브로커가 종료 직전에 호출합니다.
    fn flush(&mut self) -> impl Future<Output = Result<(), InputError>> + Send {
        async { Ok(()) }
    }
}

/// mpsc 채널로 이벤트를 넘기는 싱크
///
/// 채널이 가득 차면 `append`가 기다리므로 하류의 속도가 그대로 브로커에 전달됩니다.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<Event>,
}

impl ChannelSink {
    /// 송신측으로 싱크를 생성합니다.
    pub fn new(tx: mpsc::Sender<Event>) -> Self {
        Self { tx }
    }

    /// 지정한 용량의 채널을 만들고 싱크와 수신측을 반환합니다.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Event>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

impl Sink for ChannelSink {
    async fn append(&mut self, event: Event) -> Result<(), InputError> {
        self.tx
            .send(event)
            .await
            .map_err(|e| InputError::Sink(format!("downstream channel closed: {e}")))
    }
}

/// JSON 한 줄씩 쓰는 싱크
#[derive(Debug)]
pub struct JsonLinesSink<W> {
    writer: BufWriter<W>,
}

/// 표준 출력 싱크
pub type StdoutSink = JsonLinesSink<Stdout>;

impl StdoutSink {
    /// 표준 출력 싱크를 생성합니다.
    pub fn stdout() -> Self {
        Self::new(tokio::io::stdout())
    }
}

impl<W: AsyncWrite + Unpin + Send + 'static> JsonLinesSink<W> {
    /// 임의의 writer로 싱크를 생성합니다.
    pub fn new(writer: W) -> Self {
        Self {
            writer: BufWriter::new(writer),
        }
    }

    /// 내부 writer를 꺼냅니다. 버퍼는 먼저 `flush`해야 합니다.
    pub fn into_inner(self) -> W {
        self.writer.into_inner()
    }
}

impl<W: AsyncWrite + Unpin + Send + 'static> Sink for JsonLinesSink<W> {
    async fn append(&mut self, event: Event) -> Result<(), InputError> {
        let mut line = event
            .to_json_line()
            .map_err(|e| InputError::Sink(format!("serialize failed: {e}")))?;
        line.push('\n');
        self.writer.write_all(line.as_bytes()).await?;
        Ok(())
    }

    async fn flush(&mut self) -> Result<(), InputError> {
        self.writer.flush().await?;
        Ok(())
    }
}

/// 이벤트를 메모리에 모으는 싱크
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Vec<Event>,
}

impl MemorySink {
    /// 빈 싱크를 생성합니다.
    pub fn new() -> Self {
        Self::default()
    }

    /// 모은 이벤트
    pub fn events(&self) -> &[Event] {
        &self.events
    }

    /// 모은 이벤트를 꺼냅니다.
    pub fn into_events(self) -> Vec<Event> {
        self.events
    }
}

impl Sink for MemorySink {
    async fn append(&mut self, event: Event) -> Result<(), InputError> {
        self.events.push(event);
        Ok(())
    }
}
