//! 디코더 라우터 -- 식별자(identity)별 상태 디코더를 보관하고 레코드를 분배합니다.
//!
//! 식별자는 레코드의 `host`와 `file`을 `-`로 이어 붙인 문자열입니다.
//! 같은 식별자의 레코드는 연결이 달라도 같은 디코더를 거치므로, 재접속한
//! 클라이언트의 여러 줄 집계가 이어집니다.
//!
//! # 캐시 정책
//! - 유휴 축출: [`DecoderRouter::evict_idle`]이 `idle_timeout` 동안 쓰이지 않은
//!   디코더를 제거합니다.
//! - 용량 축출: 새 식별자가 `max_entries`를 넘게 하면 가장 오래 쓰이지 않은
//!   디코더를 먼저 제거합니다.
//! - 종료: [`DecoderRouter::flush`]가 모든 디코더를 비웁니다.
//!
//! 어떤 경로로 제거되든 디코더의 `flush` 출력은 버려지지 않습니다. 축출 출력은
//! [`DecoderRouter::on_evicted`]로 등록한 콜백이 받습니다. 이때 원시 레코드의
//! 나머지 필드는 남아 있지 않으므로 디코더가 만든 필드만 전달됩니다.
//!
//! # 동시성
//! 잠금 순서는 항상 맵 → 슬롯입니다. 축출은 맵 잠금을 쥔 채 슬롯을 은퇴시키고
//! 비웁니다. 오래된 슬롯을 잡은 워커는 은퇴 표시를 보고 다시 조회하므로,
//! 같은 식별자에 대한 생성/flush/축출은 서로 겹치지 않습니다.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use lumberyard_core::config::InputConfig;
use lumberyard_core::event::{Event, Fields};
use lumberyard_core::metrics as m;
use lumberyard_core::pipeline::Decoder;

use crate::codec::CodecFactory;

/// 식별자 구성 필드: 호스트
pub const FIELD_HOST: &str = "host";
/// 식별자 구성 필드: 파일 경로
pub const FIELD_FILE: &str = "file";

/// 축출 콜백 `(identity, event)`
///
/// 맵 잠금을 쥔 상태에서 호출되므로 라우터를 다시 호출하면 안 됩니다.
pub type EvictionCallback = Box<dyn Fn(&str, Event) + Send + Sync>;

/// 레코드의 식별자를 계산합니다.
///
/// `host`와 `file`을 `-`로 잇고, 없는 쪽은 생략합니다. 둘 다 없으면 빈 문자열입니다.
pub fn identity(fields: &Fields) -> String {
    match (fields.get(FIELD_HOST), fields.get(FIELD_FILE)) {
        (Some(host), Some(file)) => format!("{host}-{file}"),
        (Some(host), None) => host.clone(),
        (None, Some(file)) => file.clone(),
        (None, None) => String::new(),
    }
}

struct Slot {
    decoder: Box<dyn Decoder>,
    retired: bool,
}

struct Entry {
    slot: Arc<Mutex<Slot>>,
    last_used: Instant,
}

/// 식별자별 디코더 캐시 + 레코드 분배기
pub struct DecoderRouter {
    factory: CodecFactory,
    payload_field: String,
    client_address_field: Option<String>,
    idle_timeout: Duration,
    max_entries: usize,
    entries: Mutex<HashMap<String, Entry>>,
    on_evicted: Option<EvictionCallback>,
}

impl DecoderRouter {
    /// 입력 설정과 코덱 팩토리로 라우터를 생성합니다.
    pub fn new(config: &InputConfig, factory: CodecFactory) -> Self {
        Self {
            factory,
            payload_field: config.payload_field.clone(),
            client_address_field: config.client_address_field().map(str::to_owned),
            idle_timeout: config.decoders.idle_timeout(),
            max_entries: config.decoders.max_entries.max(1),
            entries: Mutex::new(HashMap::new()),
            on_evicted: None,
        }
    }

    /// 축출 콜백을 등록합니다. 이전 콜백은 대체됩니다.
    pub fn on_evicted(&mut self, callback: impl Fn(&str, Event) + Send + Sync + 'static) {
        self.on_evicted = Some(Box::new(callback));
    }

    /// 코덱 이름
    pub fn codec_name(&self) -> &'static str {
        self.factory.name()
    }

    /// 보관 중인 디코더 수
    pub fn len(&self) -> usize {
        self.lock_entries().len()
    }

    /// 보관 중인 디코더가 없는지 확인합니다.
    pub fn is_empty(&self) -> bool {
        self.lock_entries().is_empty()
    }

    /// 식별자의 디코더가 있는지 확인합니다.
    pub fn contains(&self, identity: &str) -> bool {
        self.lock_entries().contains_key(identity)
    }

    /// 레코드 하나를 디코딩하여 완성된 이벤트를 반환합니다.
    ///
    /// 페이로드 필드를 꺼내 식별자의 디코더에 넣고, 나온 이벤트마다 나머지
    /// 원시 필드를 병합합니다. 원시 필드는 `message`를 포함해 디코더 필드를 덮어씁니다.
    /// `peer`는 `client_address_field`가 설정된 경우에만 기록됩니다.
    pub fn decode(&self, mut fields: Fields, peer: Option<&str>) -> Vec<Event> {
        let payload = fields.remove(&self.payload_field).unwrap_or_default();
        let identity = identity(&fields);

        let slot = self.resolve(&identity);
        let mut events = self.decode_in(&identity, slot, &payload);

        for event in &mut events {
            if let (Some(field), Some(peer)) = (&self.client_address_field, peer) {
                event.insert(field.as_str(), peer);
            }
            for (key, value) in &fields {
                event.insert(key.as_str(), value.as_str());
            }
        }
        events
    }

    /// 조회해 둔 슬롯에서 디코딩합니다. 그 사이 은퇴한 슬롯이면 식별자를 다시 조회합니다.
    fn decode_in(
        &self,
        identity: &str,
        mut slot: Arc<Mutex<Slot>>,
        payload: &str,
    ) -> Vec<Event> {
        let mut events = Vec::new();
        loop {
            let mut guard = lock_slot(&slot);
            if guard.retired {
                drop(guard);
                debug!(identity = %identity, "decoder retired during lookup, resolving again");
                slot = self.resolve(identity);
                continue;
            }
            guard.decoder.decode(payload, &mut |event| events.push(event));
            return events;
        }
    }

    /// `now` 기준으로 `idle_timeout` 이상 쓰이지 않은 디코더를 축출합니다.
    ///
    /// 축출된 디코더 수를 반환합니다.
    pub fn evict_idle(&self, now: Instant) -> usize {
        let mut entries = self.lock_entries();
        let idle: Vec<String> = entries
            .iter()
            .filter(|(_, entry)| now.saturating_duration_since(entry.last_used) >= self.idle_timeout)
            .map(|(identity, _)| identity.clone())
            .collect();

        for identity in &idle {
            if let Some(entry) = entries.remove(identity) {
                self.retire(identity, &entry, "idle");
            }
        }

        if !idle.is_empty() {
            info!(evicted = idle.len(), remaining = entries.len(), "evicted idle decoders");
            metrics::gauge!(m::DECODERS_ACTIVE).set(entries.len() as f64);
        }
        idle.len()
    }

    /// 모든 디코더를 비우고 버퍼링된 부분 이벤트를 `callback`으로 넘깁니다.
    ///
    /// 종료 시 한 번 호출합니다. 호출 뒤 캐시는 비어 있습니다.
    pub fn flush(&self, mut callback: impl FnMut(&str, Event)) -> usize {
        let mut entries = self.lock_entries();
        let mut flushed = 0;
        for (identity, entry) in entries.drain() {
            let mut slot = lock_slot(&entry.slot);
            slot.retired = true;
            slot.decoder.flush(&mut |event| {
                flushed += 1;
                callback(&identity, event);
            });
        }
        metrics::gauge!(m::DECODERS_ACTIVE).set(0.0);
        debug!(events = flushed, "flushed all decoders");
        flushed
    }

    fn resolve(&self, identity: &str) -> Arc<Mutex<Slot>> {
        let now = Instant::now();
        let mut entries = self.lock_entries();

        if let Some(entry) = entries.get_mut(identity) {
            entry.last_used = now;
            return Arc::clone(&entry.slot);
        }

        while entries.len() >= self.max_entries {
            let Some(oldest) = entries
                .iter()
                .min_by_key(|(_, entry)| entry.last_used)
                .map(|(identity, _)| identity.clone())
            else {
                break;
            };
            if let Some(entry) = entries.remove(&oldest) {
                self.retire(&oldest, &entry, "capacity");
            }
        }

        let slot = Arc::new(Mutex::new(Slot {
            decoder: self.factory.build(),
            retired: false,
        }));
        entries.insert(
            identity.to_owned(),
            Entry {
                slot: Arc::clone(&slot),
                last_used: now,
            },
        );
        debug!(identity = %identity, codec = self.factory.name(), "created decoder");
        metrics::gauge!(m::DECODERS_ACTIVE).set(entries.len() as f64);
        slot
    }

    /// 맵에서 이미 제거된 항목을 은퇴시키고 축출 콜백으로 비웁니다.
    fn retire(&self, identity: &str, entry: &Entry, reason: &'static str) {
        let mut slot = lock_slot(&entry.slot);
        slot.retired = true;

        let mut dropped = 0usize;
        slot.decoder.flush(&mut |event| match &self.on_evicted {
            Some(callback) => callback(identity, event),
            None => dropped += 1,
        });
        if dropped > 0 {
            warn!(
                identity = %identity,
                events = dropped,
                "no eviction callback registered, flushed events dropped"
            );
        }

        debug!(identity = %identity, reason, "evicted decoder");
        metrics::counter!(m::DECODERS_EVICTED_TOTAL, "reason" => reason).increment(1);
    }

    fn lock_entries(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for DecoderRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecoderRouter")
            .field("codec", &self.factory.name())
            .field("payload_field", &self.payload_field)
            .field("entries", &self.len())
            .field("max_entries", &self.max_entries)
            .finish()
    }
}

fn lock_slot(slot: &Mutex<Slot>) -> MutexGuard<'_, Slot> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}
