//! 여러 줄 코덱 -- 패턴으로 연속 줄을 판별하여 하나의 이벤트로 합칩니다.
//!
//! 줄마다 `matched = pattern.is_match(line) != negate`를 계산합니다.
//!
//! - `what = previous`: 매치된 줄은 앞 줄에 붙습니다. 매치되지 않은 줄이 오면
//!   버퍼를 내보내고 새 그룹을 시작합니다.
//! - `what = next`: 매치된 줄은 다음 줄에 붙습니다. 매치되지 않은 줄까지 담고
//!   버퍼를 내보냅니다.
//!
//! 이벤트 본문은 `max_lines`줄, `max_bytes`바이트(줄바꿈 포함)를 넘지 않습니다.
//! 다음 줄이 한도를 넘기게 하면 버퍼를 먼저 내보내고 한도 태그를 붙입니다.
//! 한 줄이 `max_bytes`보다 길면 그 줄만으로 이벤트가 됩니다.
//!
//! 시간 기반 flush는 없습니다. 마지막 그룹은 다음 그룹이 시작되거나
//! [`Decoder::flush`]가 호출될 때만 나갑니다.

use regex::Regex;

use lumberyard_core::config::MultilineConfig;
use lumberyard_core::event::{Event, FIELD_TIMESTAMP, now_rfc3339};
use lumberyard_core::pipeline::Decoder;
use lumberyard_core::types::MultilineWhat;

use super::{TAG_MAX_BYTES_REACHED, TAG_MAX_LINES_REACHED, TAG_MULTILINE};
use crate::error::InputError;

pub(crate) const NAME: &str = "multiline";

/// 컴파일된 여러 줄 코덱 설정
///
/// `Regex`는 내부적으로 공유되므로 복제 비용이 낮습니다.
#[derive(Debug, Clone)]
pub struct MultilineSettings {
    pattern: Regex,
    negate: bool,
    what: MultilineWhat,
    max_lines: usize,
    max_bytes: usize,
}

impl MultilineSettings {
    /// 설정의 정규식을 컴파일합니다.
    pub fn compile(config: &MultilineConfig) -> Result<Self, InputError> {
        let pattern = Regex::new(&config.pattern).map_err(|e| InputError::Codec {
            codec: NAME.to_owned(),
            reason: format!("invalid pattern '{}': {e}", config.pattern),
        })?;
        Ok(Self {
            pattern,
            negate: config.negate,
            what: config.what,
            max_lines: config.max_lines.max(1),
            max_bytes: config.max_bytes.max(1),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Cut {
    Boundary,
    MaxLines,
    MaxBytes,
}

/// 여러 줄 집계 디코더 (식별자마다 하나)
#[derive(Debug)]
pub struct MultilineDecoder {
    settings: MultilineSettings,
    lines: Vec<String>,
    bytes: usize,
    started_at: Option<String>,
}

impl MultilineDecoder {
    /// 빈 버퍼로 디코더를 생성합니다.
    pub fn new(settings: MultilineSettings) -> Self {
        Self {
            settings,
            lines: Vec::new(),
            bytes: 0,
            started_at: None,
        }
    }

    /// 버퍼에 쌓인 줄 수
    pub fn buffered_lines(&self) -> usize {
        self.lines.len()
    }

    /// `line`을 더하면 한도를 넘는지 확인합니다. 빈 버퍼는 항상 받습니다.
    fn overflow(&self, line: &str) -> Option<Cut> {
        if self.lines.is_empty() {
            None
        } else if self.lines.len() >= self.settings.max_lines {
            Some(Cut::MaxLines)
        } else if self.bytes + 1 + line.len() > self.settings.max_bytes {
            Some(Cut::MaxBytes)
        } else {
            None
        }
    }

    fn buffer(&mut self, line: &str) {
        if self.lines.is_empty() {
            self.started_at = Some(now_rfc3339());
        } else {
            // 줄 사이 '\n'
            self.bytes += 1;
        }
        self.bytes += line.len();
        self.lines.push(line.to_owned());
    }

    fn emit_buffer(&mut self, cut: Cut, emit: &mut dyn FnMut(Event)) {
        if self.lines.is_empty() {
            return;
        }

        let merged = self.lines.len() > 1;
        let mut event = Event::from_message(self.lines.join("\n"));
        if let Some(started_at) = self.started_at.take() {
            event.insert(FIELD_TIMESTAMP, started_at);
        }
        if merged {
            event.add_tag(TAG_MULTILINE);
        }
        match cut {
            Cut::MaxLines => event.add_tag(TAG_MAX_LINES_REACHED),
            Cut::MaxBytes => event.add_tag(TAG_MAX_BYTES_REACHED),
            Cut::Boundary => {}
        }

        self.lines.clear();
        self.bytes = 0;
        emit(event);
    }

    fn decode_line(&mut self, line: &str, emit: &mut dyn FnMut(Event)) {
        let matched = self.settings.pattern.is_match(line) != self.settings.negate;
        match self.settings.what {
            MultilineWhat::Previous => {
                if !matched {
                    self.emit_buffer(Cut::Boundary, emit);
                } else if let Some(cut) = self.overflow(line) {
                    self.emit_buffer(cut, emit);
                }
                self.buffer(line);
            }
            MultilineWhat::Next => {
                if let Some(cut) = self.overflow(line) {
                    self.emit_buffer(cut, emit);
                }
                self.buffer(line);
                if !matched {
                    self.emit_buffer(Cut::Boundary, emit);
                } else if self.lines.len() >= self.settings.max_lines {
                    self.emit_buffer(Cut::MaxLines, emit);
                }
            }
        }
    }
}

impl Decoder for MultilineDecoder {
    fn name(&self) -> &str {
        NAME
    }

    fn decode(&mut self, payload: &str, emit: &mut dyn FnMut(Event)) {
        for line in payload.lines() {
            self.decode_line(line, emit);
        }
    }

    fn flush(&mut self, emit: &mut dyn FnMut(Event)) {
        self.emit_buffer(Cut::Boundary, emit);
    }

    fn has_pending(&self) -> bool {
        !self.lines.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decoder(pattern: &str, negate: bool, what: MultilineWhat) -> MultilineDecoder {
        let config = MultilineConfig {
            pattern: pattern.to_owned(),
            negate,
            what,
            ..Default::default()
        };
        MultilineDecoder::new(MultilineSettings::compile(&config).unwrap())
    }

    fn feed(decoder: &mut MultilineDecoder, lines: &[&str]) -> Vec<Event> {
        let mut out = Vec::new();
        for line in lines {
            decoder.decode(line, &mut |e| out.push(e));
        }
        out
    }

    fn messages(events: &[Event]) -> Vec<&str> {
        events.iter().filter_map(Event::message).collect()
    }

    #[test]
    fn previous_with_negate_groups_continuation_lines() {
        let mut d = decoder("^2015", true, MultilineWhat::Previous);
        let mut out = feed(
            &mut d,
            &[
                "2015-11-10 10:14:38,907 line 1",
                "line 1.1",
                "2015-11-10 10:16:38,907 line 2",
                "line 2.1",
                "line 2.2",
            ],
        );
        assert_eq!(
            messages(&out),
            vec!["2015-11-10 10:14:38,907 line 1\nline 1.1"]
        );
        assert!(out[0].has_tag(TAG_MULTILINE));
        assert!(d.has_pending());

        d.flush(&mut |e| out.push(e));
        assert_eq!(
            messages(&out)[1],
            "2015-11-10 10:16:38,907 line 2\nline 2.1\nline 2.2"
        );
        assert!(!d.has_pending());
    }

    #[test]
    fn single_line_group_is_not_tagged() {
        let mut d = decoder("^2015", true, MultilineWhat::Previous);
        let mut out = feed(&mut d, &["2015-11-10 10:18:38,907 line 3"]);
        d.flush(&mut |e| out.push(e));
        assert_eq!(out.len(), 1);
        assert!(out[0].tags().is_empty());
    }

    #[test]
    fn what_next_joins_with_following_line() {
        // 줄 끝의 역슬래시는 다음 줄로 이어짐
        let mut d = decoder(r"\\$", false, MultilineWhat::Next);
        let out = feed(&mut d, &["first \\", "second \\", "third", "alone"]);
        assert_eq!(messages(&out), vec!["first \\\nsecond \\\nthird", "alone"]);
        assert!(out[0].has_tag(TAG_MULTILINE));
        assert!(!d.has_pending());
    }

    #[test]
    fn max_lines_cuts_group() {
        let config = MultilineConfig {
            pattern: r"^\s".to_owned(),
            max_lines: 2,
            ..Default::default()
        };
        let mut d = MultilineDecoder::new(MultilineSettings::compile(&config).unwrap());
        let mut out = feed(&mut d, &["head", " a", " b", " c"]);
        d.flush(&mut |e| out.push(e));

        assert_eq!(messages(&out), vec!["head\n a", " b\n c"]);
        assert!(out[0].has_tag(TAG_MAX_LINES_REACHED));
        assert!(!out[1].has_tag(TAG_MAX_LINES_REACHED));
    }

    #[test]
    fn max_bytes_cuts_group() {
        let config = MultilineConfig {
            pattern: r"^\s".to_owned(),
            max_bytes: 8,
            ..Default::default()
        };
        let mut d = MultilineDecoder::new(MultilineSettings::compile(&config).unwrap());
        let out = feed(&mut d, &["12345678", " next"]);
        assert_eq!(messages(&out), vec!["12345678"]);
        assert!(out[0].has_tag(TAG_MAX_BYTES_REACHED));
        assert_eq!(d.buffered_lines(), 1);
    }

    #[test]
    fn continuation_that_would_exceed_max_bytes_starts_new_group() {
        let config = MultilineConfig {
            pattern: r"^\s".to_owned(),
            max_bytes: 8,
            ..Default::default()
        };
        let mut d = MultilineDecoder::new(MultilineSettings::compile(&config).unwrap());
        let mut out = feed(&mut d, &["1234567", " 234567", " 3", " 4"]);
        d.flush(&mut |e| out.push(e));

        assert_eq!(messages(&out), vec!["1234567", " 234567", " 3\n 4"]);
        assert!(out[0].has_tag(TAG_MAX_BYTES_REACHED));
        assert!(out[1].has_tag(TAG_MAX_BYTES_REACHED));
        assert!(out.iter().all(|e| e.message().unwrap().len() <= 8));
    }

    #[test]
    fn what_next_respects_max_bytes() {
        let config = MultilineConfig {
            pattern: r"\\$".to_owned(),
            what: MultilineWhat::Next,
            max_bytes: 10,
            ..Default::default()
        };
        let mut d = MultilineDecoder::new(MultilineSettings::compile(&config).unwrap());
        let out = feed(&mut d, &["abcd \\", "efgh \\", "end"]);

        assert_eq!(messages(&out), vec!["abcd \\", "efgh \\\nend"]);
        assert!(out[0].has_tag(TAG_MAX_BYTES_REACHED));
        assert!(out.iter().all(|e| e.message().unwrap().len() <= 10));
    }

    #[test]
    fn oversized_line_forms_its_own_event() {
        let config = MultilineConfig {
            pattern: r"^\s".to_owned(),
            max_bytes: 4,
            ..Default::default()
        };
        let mut d = MultilineDecoder::new(MultilineSettings::compile(&config).unwrap());
        let mut out = feed(&mut d, &["too long", " x"]);
        d.flush(&mut |e| out.push(e));
        assert_eq!(messages(&out), vec!["too long", " x"]);
    }

    #[test]
    fn multi_line_payload_is_split() {
        let mut d = decoder("^2015", true, MultilineWhat::Previous);
        let mut out = feed(&mut d, &["2015 a\ncontinued\n2015 b"]);
        d.flush(&mut |e| out.push(e));
        assert_eq!(messages(&out), vec!["2015 a\ncontinued", "2015 b"]);
    }

    #[test]
    fn timestamp_comes_from_first_line() {
        let mut d = decoder("^2015", true, MultilineWhat::Previous);
        let mut out = feed(&mut d, &["2015 a", "b"]);
        d.flush(&mut |e| out.push(e));
        assert!(out[0].get_str(FIELD_TIMESTAMP).is_some());
    }

    #[test]
    fn flush_on_empty_buffer_emits_nothing() {
        let mut d = decoder("^2015", true, MultilineWhat::Previous);
        let mut count = 0;
        d.flush(&mut |_| count += 1);
        assert_eq!(count, 0);
    }
}
