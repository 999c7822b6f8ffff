//! 이벤트 모델 — 디코더가 생성하고 싱크가 소비하는 구조화 이벤트
//!
//! [`Event`]는 순서가 보장된 JSON 객체입니다. 디코더는 `message`와
//! `@timestamp`를 채우고, 라우터는 원시 레코드의 나머지 필드를 병합합니다.
//! [`Fields`]는 전송 계층이 만들어 내는 원시 레코드(문자열 필드 맵)입니다.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// 메시지 본문 필드명
pub const FIELD_MESSAGE: &str = "message";
/// 이벤트 타임스탬프 필드명 (RFC 3339, UTC)
pub const FIELD_TIMESTAMP: &str = "@timestamp";
/// 태그 배열 필드명
pub const FIELD_TAGS: &str = "tags";

/// 전송 계층이 만드는 원시 레코드
///
/// lumberjack 데이터 프레임처럼 모든 값이 문자열입니다.
pub type Fields = BTreeMap<String, String>;

/// 구조화 이벤트
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Event {
    fields: Map<String, Value>,
}

impl Event {
    /// 빈 이벤트를 생성합니다.
    pub fn new() -> Self {
        Self::default()
    }

    /// 메시지와 현재 시각을 담은 이벤트를 생성합니다.
    pub fn from_message(message: impl Into<String>) -> Self {
        let mut event = Self::new();
        event.insert(FIELD_MESSAGE, message.into());
        event.insert(FIELD_TIMESTAMP, now_rfc3339());
        event
    }

    /// `message` 필드를 문자열로 반환합니다.
    pub fn message(&self) -> Option<&str> {
        self.get_str(FIELD_MESSAGE)
    }

    /// 필드 값을 반환합니다.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// 문자열 필드 값을 반환합니다.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(Value::as_str)
    }

    /// 필드가 존재하는지 확인합니다.
    pub fn contains_key(&self, key: &str) -> bool {
        self.fields.contains_key(key)
    }

    /// 필드를 설정하고 이전 값을 반환합니다.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.fields.insert(key.into(), value.into())
    }

    /// 필드를 제거합니다.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.fields.remove(key)
    }

    /// 태그를 추가합니다. 이미 있는 태그는 중복 추가하지 않습니다.
    ///
    /// `tags`가 배열이 아니면 기존 값을 첫 원소로 하는 배열로 바꿉니다.
    pub fn add_tag(&mut self, tag: &str) {
        let entry = self
            .fields
            .entry(FIELD_TAGS)
            .or_insert_with(|| Value::Array(Vec::new()));
        if !entry.is_array() {
            let previous = entry.take();
            *entry = Value::Array(vec![previous]);
        }
        if let Value::Array(tags) = entry {
            if !tags.iter().any(|t| t.as_str() == Some(tag)) {
                tags.push(Value::String(tag.to_owned()));
            }
        }
    }

    /// 태그 보유 여부를 확인합니다.
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags().contains(&tag)
    }

    /// 문자열 태그 목록을 반환합니다.
    pub fn tags(&self) -> Vec<&str> {
        match self.fields.get(FIELD_TAGS) {
            Some(Value::Array(tags)) => tags.iter().filter_map(Value::as_str).collect(),
            _ => Vec::new(),
        }
    }

    /// 필드 맵에 대한 참조를 반환합니다.
    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    /// 필드 수를 반환합니다.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// 필드가 하나도 없는지 확인합니다.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// 한 줄짜리 JSON 문자열로 직렬화합니다.
    pub fn to_json_line(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&self.fields)
    }
}

impl From<Map<String, Value>> for Event {
    fn from(fields: Map<String, Value>) -> Self {
        Self { fields }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.message() {
            Some(message) => write!(f, "event({} fields) {message:?}", self.fields.len()),
            None => write!(f, "event({} fields)", self.fields.len()),
        }
    }
}

/// 현재 시각을 RFC 3339 (밀리초, `Z` 접미사) 문자열로 반환합니다.
pub fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}
