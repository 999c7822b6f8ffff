//! 도메인 타입 — 여러 크레이트가 공유하는 작은 열거형

use std::fmt;

use serde::{Deserialize, Serialize};

/// 차단기가 분류하는 실패 유형
///
/// 차단기는 설정된 유형의 실패만 집계하고, 나머지 실패는 그대로 전파합니다.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// 마감 시간 내에 작업을 끝내지 못함 (큐 push 타임아웃)
    Timeout,
    /// 상대편이 닫힘 (큐 소비자 종료)
    Closed,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => write!(f, "timeout"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

/// 여러 줄 집계 방향
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MultilineWhat {
    /// 패턴에 해당하는 줄을 이전 줄에 붙입니다 (기본값)
    #[default]
    Previous,
    /// 패턴에 해당하는 줄 뒤에 다음 줄을 붙입니다
    Next,
}

impl fmt::Display for MultilineWhat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Previous => write!(f, "previous"),
            Self::Next => write!(f, "next"),
        }
    }
}
