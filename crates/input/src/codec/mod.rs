//! 코덱 -- 페이로드를 이벤트로 바꾸는 식별자별 디코더
//!
//! [`CodecFactory`]는 설정을 한 번 검증하고(정규식 컴파일 포함) 식별자마다
//! 새 [`Decoder`] 인스턴스를 만들어 줍니다.
//!
//! # 지원 코덱
//! - `plain`: 페이로드 하나당 이벤트 하나
//! - `multiline`: 패턴 기반 여러 줄 집계
//! - `json`: 페이로드를 JSON 객체로 파싱

pub mod json;
pub mod multiline;
pub mod plain;

use lumberyard_core::config::CodecConfig;
use lumberyard_core::pipeline::Decoder;

use crate::error::InputError;

pub use json::JsonDecoder;
pub use multiline::{MultilineDecoder, MultilineSettings};
pub use plain::PlainDecoder;

/// 여러 줄로 합쳐진 이벤트 태그
pub const TAG_MULTILINE: &str = "multiline";
/// 최대 줄 수에 걸려 잘린 이벤트 태그
pub const TAG_MAX_LINES_REACHED: &str = "multiline_codec_max_lines_reached";
/// 최대 바이트 수에 걸려 잘린 이벤트 태그
pub const TAG_MAX_BYTES_REACHED: &str = "multiline_codec_max_bytes_reached";
/// JSON 파싱 실패 태그
pub const TAG_JSON_PARSE_FAILURE: &str = "_jsonparsefailure";

#[derive(Debug, Clone)]
enum CodecKind {
    Plain,
    Multiline(MultilineSettings),
    Json,
}

/// 검증된 코덱 설정으로 디코더를 생성합니다.
#[derive(Debug, Clone)]
pub struct CodecFactory {
    kind: CodecKind,
}

impl CodecFactory {
    /// 설정을 검증하고 팩토리를 생성합니다.
    ///
    /// 여러 줄 코덱의 정규식이 잘못되었으면 `InputError::Codec`을 반환합니다.
    pub fn new(config: &CodecConfig) -> Result<Self, InputError> {
        let kind = match config {
            CodecConfig::Plain => CodecKind::Plain,
            CodecConfig::Multiline(multiline) => {
                CodecKind::Multiline(MultilineSettings::compile(multiline)?)
            }
            CodecConfig::Json => CodecKind::Json,
        };
        Ok(Self { kind })
    }

    /// 코덱 이름
    pub fn name(&self) -> &'static str {
        match self.kind {
            CodecKind::Plain => plain::NAME,
            CodecKind::Multiline(_) => multiline::NAME,
            CodecKind::Json => json::NAME,
        }
    }

    /// 새 디코더 인스턴스를 생성합니다.
    pub fn build(&self) -> Box<dyn Decoder> {
        match &self.kind {
            CodecKind::Plain => Box::new(PlainDecoder),
            CodecKind::Multiline(settings) => Box::new(MultilineDecoder::new(settings.clone())),
            CodecKind::Json => Box::new(JsonDecoder),
        }
    }
}

impl Default for CodecFactory {
    fn default() -> Self {
        Self {
            kind: CodecKind::Plain,
        }
    }
}
