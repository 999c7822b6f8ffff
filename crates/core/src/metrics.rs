//! 메트릭 상수 및 설명 등록
//!
//! 모든 Prometheus 메트릭의 이름과 설명을 중앙에서 정의합니다.
//! 각 모듈은 이 상수를 사용하여 `metrics::counter!()`, `metrics::gauge!()`
//! 매크로를 호출합니다. 레코더가 설치되지 않았으면 호출은 아무 일도 하지 않습니다.
//!
//! # 네이밍 컨벤션
//!
//! - 접두어: `lumberyard_`
//! - 접미어: `_total` (counter), 없음 (gauge)

// ─── 레이블 키 상수 ────────────────────────────────────────────────

/// 차단기 이름 레이블 키
pub const LABEL_BREAKER: &str = "breaker";

/// 코덱 레이블 키 (plain, multiline, json)
pub const LABEL_CODEC: &str = "codec";

// ─── 연결 메트릭 ────────────────────────────────────────────────────

/// 수락된 연결 수 (counter)
pub const CONNECTIONS_ACCEPTED_TOTAL: &str = "lumberyard_connections_accepted_total";

/// 차단기가 열려 수락을 미룬 횟수 (counter)
pub const CONNECTIONS_REFUSED_TOTAL: &str = "lumberyard_connections_refused_total";

/// 현재 활성 연결 수 (gauge)
pub const ACTIVE_CONNECTIONS: &str = "lumberyard_active_connections";

// ─── 이벤트 흐름 메트릭 ─────────────────────────────────────────────

/// 수신한 원시 레코드 수 (counter)
pub const RECORDS_RECEIVED_TOTAL: &str = "lumberyard_records_received_total";

/// 큐에 성공적으로 넣은 이벤트 수 (counter)
pub const EVENTS_PUBLISHED_TOTAL: &str = "lumberyard_events_published_total";

/// 큐 push 타임아웃 수 (counter)
pub const PUSH_TIMEOUTS_TOTAL: &str = "lumberyard_push_timeouts_total";

/// 싱크 append 실패 수 (counter)
pub const SINK_ERRORS_TOTAL: &str = "lumberyard_sink_errors_total";

// ─── 차단기 / 디코더 메트릭 ─────────────────────────────────────────

/// 차단기가 열린 횟수 (counter, label: breaker)
pub const BREAKER_OPENED_TOTAL: &str = "lumberyard_breaker_opened_total";

/// 축출된 디코더 수 (counter)
pub const DECODERS_EVICTED_TOTAL: &str = "lumberyard_decoders_evicted_total";

/// 축출 대기열이 가득 차거나 닫혀 버린 축출 이벤트 수 (counter)
pub const EVICTED_EVENTS_DROPPED_TOTAL: &str = "lumberyard_evicted_events_dropped_total";

/// 현재 보유 중인 디코더 수 (gauge)
pub const DECODERS_ACTIVE: &str = "lumberyard_decoders_active";

/// 모든 메트릭 설명을 등록합니다.
///
/// 레코더 설치 직후 한 번 호출합니다.
pub fn describe_all() {
    use metrics::{describe_counter, describe_gauge};

    describe_counter!(
        CONNECTIONS_ACCEPTED_TOTAL,
        "Total client connections accepted"
    );
    describe_counter!(
        CONNECTIONS_REFUSED_TOTAL,
        "Accept loop back-offs while the breaker was open"
    );
    describe_gauge!(ACTIVE_CONNECTIONS, "Client connections currently open");
    describe_counter!(RECORDS_RECEIVED_TOTAL, "Total raw records received");
    describe_counter!(
        EVENTS_PUBLISHED_TOTAL,
        "Total decoded events handed to the broker queue"
    );
    describe_counter!(
        PUSH_TIMEOUTS_TOTAL,
        "Queue pushes that exceeded the congestion threshold"
    );
    describe_counter!(SINK_ERRORS_TOTAL, "Events the sink failed to append");
    describe_counter!(BREAKER_OPENED_TOTAL, "Times a circuit breaker tripped open");
    describe_counter!(
        DECODERS_EVICTED_TOTAL,
        "Per-identity decoders evicted and flushed"
    );
    describe_counter!(
        EVICTED_EVENTS_DROPPED_TOTAL,
        "Events flushed by decoder eviction that the eviction backlog could not hold"
    );
    describe_gauge!(DECODERS_ACTIVE, "Per-identity decoders currently held");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metric_names_are_prefixed() {
        for name in [
            CONNECTIONS_ACCEPTED_TOTAL,
            CONNECTIONS_REFUSED_TOTAL,
            ACTIVE_CONNECTIONS,
            RECORDS_RECEIVED_TOTAL,
            EVENTS_PUBLISHED_TOTAL,
            PUSH_TIMEOUTS_TOTAL,
            SINK_ERRORS_TOTAL,
            BREAKER_OPENED_TOTAL,
            DECODERS_EVICTED_TOTAL,
            EVICTED_EVENTS_DROPPED_TOTAL,
            DECODERS_ACTIVE,
        ] {
            assert!(name.starts_with("lumberyard_"), "{name}");
        }
    }

    #[test]
    fn counters_end_with_total() {
        for name in [
            CONNECTIONS_ACCEPTED_TOTAL,
            PUSH_TIMEOUTS_TOTAL,
            BREAKER_OPENED_TOTAL,
        ] {
            assert!(name.ends_with("_total"));
        }
    }

    #[test]
    fn describe_all_without_recorder_is_noop() {
        describe_all();
    }
}
