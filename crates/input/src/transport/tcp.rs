//! TCP 전송 -- 줄 단위 JSON 레코드
//!
//! 한 줄이 레코드 하나이며, 각 줄은 JSON 객체입니다. 문자열이 아닌 값은
//! JSON 텍스트로 저장됩니다. 빈 줄은 건너뜁니다.
//!
//! ```text
//! {"host":"machineA","file":"/var/log/line","line":"2015-11-10 10:14:38,907 line 1"}\n
//! ```

use std::io;
use std::net::SocketAddr;

use serde_json::{Map, Value};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tracing::debug;

use lumberyard_core::event::Fields;

use super::{Connection, Listener};
use crate::error::InputError;

/// 줄 단위 JSON TCP 리스너
#[derive(Debug)]
pub struct TcpJsonListener {
    listener: TcpListener,
    max_line_bytes: usize,
}

impl TcpJsonListener {
    /// 주소에 바인드합니다.
    pub async fn bind(addr: &str, max_line_bytes: usize) -> Result<Self, InputError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| InputError::Bind {
                addr: addr.to_owned(),
                source,
            })?;
        Ok(Self {
            listener,
            max_line_bytes,
        })
    }
}

impl Listener for TcpJsonListener {
    type Conn = TcpJsonConnection;

    async fn accept(&mut self) -> io::Result<Option<TcpJsonConnection>> {
        let (stream, addr) = self.listener.accept().await?;
        debug!(peer = %addr, "accepted tcp connection");
        Ok(Some(TcpJsonConnection::new(stream, addr, self.max_line_bytes)))
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }
}

/// 줄 단위 JSON TCP 연결
#[derive(Debug)]
pub struct TcpJsonConnection {
    reader: BufReader<TcpStream>,
    peer: String,
    max_line_bytes: usize,
    line: String,
    closed: bool,
}

impl TcpJsonConnection {
    fn new(stream: TcpStream, addr: SocketAddr, max_line_bytes: usize) -> Self {
        Self {
            reader: BufReader::new(stream),
            peer: addr.to_string(),
            max_line_bytes,
            line: String::new(),
            closed: false,
        }
    }

    fn parse_record(&self, line: &str) -> Result<Fields, InputError> {
        let object: Map<String, Value> =
            serde_json::from_str(line).map_err(|e| InputError::MalformedRecord {
                peer: self.peer.clone(),
                reason: e.to_string(),
            })?;

        Ok(object
            .into_iter()
            .map(|(key, value)| match value {
                Value::String(s) => (key, s),
                other => (key, other.to_string()),
            })
            .collect())
    }
}

impl Connection for TcpJsonConnection {
    fn peer(&self) -> &str {
        &self.peer
    }

    async fn next_record(&mut self) -> Result<Option<Fields>, InputError> {
        loop {
            if self.closed {
                return Ok(None);
            }

            self.line.clear();
            // 한도 + 개행 1바이트까지만 읽음
            let limit = self.max_line_bytes as u64 + 1;
            let read = (&mut self.reader)
                .take(limit)
                .read_line(&mut self.line)
                .await
                .map_err(|e| InputError::Read {
                    peer: self.peer.clone(),
                    reason: e.to_string(),
                })?;

            if read == 0 {
                return Ok(None);
            }
            if !self.line.ends_with('\n') && read as u64 >= limit {
                return Err(InputError::MalformedRecord {
                    peer: self.peer.clone(),
                    reason: format!("line exceeds {} bytes", self.max_line_bytes),
                });
            }

            let trimmed = self.line.trim();
            if trimmed.is_empty() {
                continue;
            }
            return self.parse_record(trimmed).map(Some);
        }
    }

    async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Err(e) = self.reader.get_mut().shutdown().await {
            debug!(peer = %self.peer, error = %e, "tcp shutdown failed");
        }
    }
}
