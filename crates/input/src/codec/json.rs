//! JSON 코덱 -- 페이로드를 JSON 객체로 파싱하여 이벤트 필드로 사용합니다.
//!
//! - 객체 → 이벤트 하나
//! - 객체 배열 → 원소마다 이벤트 하나
//! - 그 밖의 값이나 잘못된 JSON → 페이로드를 `message`로 담고 `_jsonparsefailure` 태그

use serde_json::Value;
use tracing::debug;

use lumberyard_core::event::{Event, FIELD_TIMESTAMP, now_rfc3339};
use lumberyard_core::pipeline::Decoder;

use super::TAG_JSON_PARSE_FAILURE;

pub(crate) const NAME: &str = "json";

/// 무상태 JSON 디코더
#[derive(Debug, Default)]
pub struct JsonDecoder;

impl JsonDecoder {
    fn object_event(map: serde_json::Map<String, Value>) -> Event {
        let mut event = Event::from(map);
        if !event.contains_key(FIELD_TIMESTAMP) {
            event.insert(FIELD_TIMESTAMP, now_rfc3339());
        }
        event
    }

    fn failure_event(payload: &str) -> Event {
        let mut event = Event::from_message(payload);
        event.add_tag(TAG_JSON_PARSE_FAILURE);
        event
    }
}

impl Decoder for JsonDecoder {
    fn name(&self) -> &str {
        NAME
    }

    fn decode(&mut self, payload: &str, emit: &mut dyn FnMut(Event)) {
        if payload.trim().is_empty() {
            return;
        }

        match serde_json::from_str::<Value>(payload) {
            Ok(Value::Object(map)) => emit(Self::object_event(map)),
            Ok(Value::Array(items)) if items.iter().all(Value::is_object) => {
                for item in items {
                    if let Value::Object(map) = item {
                        emit(Self::object_event(map));
                    }
                }
            }
            Ok(_) => emit(Self::failure_event(payload)),
            Err(e) => {
                debug!(error = %e, "json payload parse failed");
                emit(Self::failure_event(payload));
            }
        }
    }

    fn flush(&mut self, _emit: &mut dyn FnMut(Event)) {}
}
