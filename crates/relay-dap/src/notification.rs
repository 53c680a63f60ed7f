//! Notifications pushed to the editor.

use serde::Serialize;
use serde_json::Value;

use crate::breakpoint::Breakpoint;
use crate::launch::LaunchConfiguration;
use crate::target::{TargetId, TargetSnapshot};
use crate::thread::ThreadSnapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangeKind {
    Add,
    Change,
    Remove,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ThreadEventKind {
    Create,
    Change,
    Terminate,
}

/// A thread transition on one target.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ThreadEvent {
    pub target: TargetId,
    pub kind: ThreadEventKind,
    /// Stop reason, "resume", "exited", ...
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    pub thread: ThreadSnapshot,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DebugNotification {
    Breakpoint {
        change: ChangeKind,
        breakpoint: Breakpoint,
    },
    Launch {
        change: ChangeKind,
        configuration: LaunchConfiguration,
    },
    Thread(ThreadEvent),
    Target {
        change: ChangeKind,
        target: TargetSnapshot,
    },
    /// Debuggee or adapter output.
    Output {
        target: TargetId,
        #[serde(skip_serializing_if = "Option::is_none")]
        category: Option<String>,
        output: String,
    },
}
