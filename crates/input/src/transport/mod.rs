//! 전송 계층 -- 연결을 수락하고 원시 레코드를 읽어 옵니다.
//!
//! 디스패처는 [`Listener`]와 [`Connection`] trait을 통해서만 전송 계층과
//! 대화합니다. 레코드는 모든 값이 문자열인 필드 맵([`Fields`])입니다.
//!
//! # 구현체
//! - [`TcpJsonListener`]: 줄 단위 JSON 객체를 읽는 TCP 리스너
//! - [`ChannelListener`]: 프로세스 내부 mpsc 채널 기반 리스너 (임베딩, 테스트용)

pub mod channel;
pub mod tcp;

use std::future::Future;
use std::io;
use std::net::SocketAddr;

use lumberyard_core::event::Fields;

use crate::error::InputError;

pub use channel::{
    ChannelConnection, ChannelConnector, ChannelListener, ConnectionHandle, channel_listener,
};
pub use tcp::{TcpJsonConnection, TcpJsonListener};

/// 연결 수락기
pub trait Listener: Send + 'static {
    /// 수락한 연결 타입
    type Conn: Connection;

    /// 다음 연결을 기다립니다.
    ///
    /// 리스너가 더 이상 연결을 만들 수 없으면 `Ok(None)`을 반환합니다.
    /// `select!` 안에서 취소될 수 있어야 합니다 (취소 시 연결을 잃지 않음).
    fn accept(&mut self) -> impl Future<Output = io::Result<Option<Self::Conn>>> + Send;

    /// 바인드된 로컬 주소
    fn local_addr(&self) -> io::Result<SocketAddr>;
}

/// 수락된 클라이언트 연결
pub trait Connection: Send + 'static {
    /// 상대 주소 (로깅, `client_address_field`용)
    fn peer(&self) -> &str;

    /// 다음 레코드를 읽습니다. 상대가 연결을 끝냈으면 `Ok(None)`입니다.
    ///
    /// `select!` 안에서 취소될 수 있으며, 취소된 뒤에는 [`Connection::close`]만 호출됩니다.
    fn next_record(&mut self) -> impl Future<Output = Result<Option<Fields>, InputError>> + Send;

    /// 연결을 닫습니다. 이미 닫혔으면 아무 일도 하지 않습니다.
    fn close(&mut self) -> impl Future<Output = ()> + Send;
}
