//! 프로세스 내부 전송 -- mpsc 채널로 연결과 레코드를 주입합니다.
//!
//! 다른 모듈이 이미 필드 맵 형태의 레코드를 갖고 있을 때 네트워크를 거치지 않고
//! 입력에 연결할 수 있습니다. 연결 수명 관찰이 쉬워 테스트에도 사용합니다.
//!
//! ```text
//! ConnectionHandle --records--> ChannelConnection
//! channel_listener().0 --connections--> ChannelListener
//! ```

use std::io;
use std::net::{Ipv4Addr, SocketAddr};

use tokio::sync::mpsc;

use lumberyard_core::event::Fields;

use super::{Connection, Listener};
use crate::error::InputError;

/// 연결 하나에 버퍼링할 수 있는 레코드 수
const RECORD_BUFFER: usize = 64;

/// 채널 리스너와 연결 주입용 송신측을 생성합니다.
///
/// 송신측이 모두 사라지면 리스너의 `accept`는 `Ok(None)`을 반환합니다.
pub fn channel_listener() -> (ChannelConnector, ChannelListener) {
    let (tx, rx) = mpsc::unbounded_channel();
    (ChannelConnector { tx }, ChannelListener { rx })
}

/// 새 연결을 리스너에 주입합니다.
#[derive(Debug, Clone)]
pub struct ChannelConnector {
    tx: mpsc::UnboundedSender<ChannelConnection>,
}

impl ChannelConnector {
    /// 새 연결을 열고 레코드 송신 핸들을 반환합니다.
    ///
    /// 리스너가 사라졌으면 `None`을 반환합니다.
    pub fn connect(&self, peer: impl Into<String>) -> Option<ConnectionHandle> {
        let (handle, conn) = ChannelConnection::pair(peer);
        self.tx.send(conn).ok()?;
        Some(handle)
    }
}

/// mpsc 채널 기반 리스너
#[derive(Debug)]
pub struct ChannelListener {
    rx: mpsc::UnboundedReceiver<ChannelConnection>,
}

impl Listener for ChannelListener {
    type Conn = ChannelConnection;

    async fn accept(&mut self) -> io::Result<Option<ChannelConnection>> {
        Ok(self.rx.recv().await)
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        Ok(SocketAddr::from((Ipv4Addr::LOCALHOST, 0)))
    }
}

/// 연결에 레코드를 보내는 클라이언트 측 핸들
///
/// 핸들을 drop하면 연결은 EOF를 봅니다.
#[derive(Debug)]
pub struct ConnectionHandle {
    tx: mpsc::Sender<Result<Fields, String>>,
}

impl ConnectionHandle {
    /// 레코드를 보냅니다. 연결이 닫혔으면 레코드를 돌려줍니다.
    pub async fn send(&self, record: Fields) -> Result<(), Fields> {
        self.tx.send(Ok(record)).await.map_err(|e| match e.0 {
            Ok(record) => record,
            Err(_) => Fields::new(),
        })
    }

    /// 연결이 읽기 에러를 보도록 합니다.
    pub async fn fail(&self, reason: impl Into<String>) -> bool {
        self.tx.send(Err(reason.into())).await.is_ok()
    }

    /// 서버 측이 연결을 닫았는지 확인합니다.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// 서버 측이 연결을 닫을 때까지 기다립니다.
    pub async fn closed(&self) {
        self.tx.closed().await;
    }
}

/// mpsc 채널 기반 연결
#[derive(Debug)]
pub struct ChannelConnection {
    peer: String,
    rx: mpsc::Receiver<Result<Fields, String>>,
}

impl ChannelConnection {
    /// 연결과 클라이언트 측 핸들을 생성합니다.
    pub fn pair(peer: impl Into<String>) -> (ConnectionHandle, Self) {
        let (tx, rx) = mpsc::channel(RECORD_BUFFER);
        (
            ConnectionHandle { tx },
            Self {
                peer: peer.into(),
                rx,
            },
        )
    }
}

impl Connection for ChannelConnection {
    fn peer(&self) -> &str {
        &self.peer
    }

    async fn next_record(&mut self) -> Result<Option<Fields>, InputError> {
        match self.rx.recv().await {
            Some(Ok(record)) => Ok(Some(record)),
            Some(Err(reason)) => Err(InputError::Read {
                peer: self.peer.clone(),
                reason,
            }),
            None => Ok(None),
        }
    }

    async fn close(&mut self) {
        self.rx.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(line: &str) -> Fields {
        Fields::from([("line".to_owned(), line.to_owned())])
    }

    #[tokio::test]
    async fn records_flow_until_handle_dropped() {
        let (handle, mut conn) = ChannelConnection::pair("10.0.0.1:4000");
        handle.send(record("a")).await.unwrap();
        drop(handle);

        let got = conn.next_record().await.unwrap().unwrap();
        assert_eq!(got.get("line").map(String::as_str), Some("a"));
        assert!(conn.next_record().await.unwrap().is_none());
        assert_eq!(conn.peer(), "10.0.0.1:4000");
    }

    #[tokio::test]
    async fn close_is_visible_to_client() {
        let (handle, mut conn) = ChannelConnection::pair("peer");
        assert!(!handle.is_closed());
        conn.close().await;
        assert!(handle.is_closed());
        assert_eq!(handle.send(record("late")).await.unwrap_err(), record("late"));
    }

    #[tokio::test]
    async fn injected_failure_is_read_error() {
        let (handle, mut conn) = ChannelConnection::pair("peer");
        assert!(handle.fail("reset by peer").await);
        let err = conn.next_record().await.unwrap_err();
        assert!(matches!(err, InputError::Read { ref reason, .. } if reason == "reset by peer"));
    }

    #[tokio::test]
    async fn listener_ends_when_connectors_dropped() {
        let (connector, mut listener) = channel_listener();
        let _handle = connector.connect("peer").unwrap();
        drop(connector);

        let conn = listener.accept().await.unwrap().unwrap();
        assert_eq!(conn.peer(), "peer");
        assert!(listener.accept().await.unwrap().is_none());
    }
}
