//! plain 코덱 -- 페이로드를 그대로 `message`로 담습니다.

use lumberyard_core::event::Event;
use lumberyard_core::pipeline::Decoder;

pub(crate) const NAME: &str = "plain";

/// 페이로드 하나당 이벤트 하나를 만드는 무상태 디코더
#[derive(Debug, Default)]
pub struct PlainDecoder;

impl Decoder for PlainDecoder {
    fn name(&self) -> &str {
        NAME
    }

    fn decode(&mut self, payload: &str, emit: &mut dyn FnMut(Event)) {
        emit(Event::from_message(payload));
    }

    fn flush(&mut self, _emit: &mut dyn FnMut(Event)) {}
}
