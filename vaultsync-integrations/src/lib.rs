pub mod ids;

use serde::{Deserialize, Serialize};

/// Lifecycle phase of a sync session as reported over D-Bus.
///
/// `Idle` has no folder, `Ready` has one but is not watching, `Active` is
/// watching the folder and listening to the cloud.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionPhase {
    Idle,
    Ready,
    Active,
}

impl SessionPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionPhase::Idle => "idle",
            SessionPhase::Ready => "ready",
            SessionPhase::Active => "active",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "idle" => Some(SessionPhase::Idle),
            "ready" => Some(SessionPhase::Ready),
            "active" => Some(SessionPhase::Active),
            _ => None,
        }
    }

    pub fn is_active(self) -> bool {
        self == SessionPhase::Active
    }
}

/// Phase plus the human-readable status line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub phase: SessionPhase,
    pub text: String,
}
