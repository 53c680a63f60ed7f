//! relay-dap: debug channel for the relay bridge.
//!
//! Breakpoints and launch configurations live here independent of any
//! adapter and are persisted across restarts. Running a launch
//! configuration starts (or reuses) the language's debug adapter, drives
//! the debug handshake and turns adapter events into thread and target
//! notifications for the editor.
pub mod breakpoint;
pub mod command;
pub mod deferred;
pub mod error;
pub mod frame;
pub mod launch;
pub mod manager;
pub mod notification;
pub mod protocol;
pub mod session;
pub mod store;
pub mod target;
pub mod template;
pub mod thread;

#[cfg(test)]
mod test_support;

pub use breakpoint::{Breakpoint, BreakpointCatalog, BreakpointId, BreakpointKind, BreakpointProperty};
pub use command::{error_value, CommandRouter, COMMANDS};
pub use deferred::{DeferredPool, VersionStamp};
pub use error::DebugError;
pub use frame::{DebugFrame, DebugScope, DebugVariable, LanguageRules, ScopeClass, VariableKind};
pub use launch::{LaunchAttribute, LaunchCatalog, LaunchConfiguration, LaunchId, LaunchMode};
pub use manager::{DebugContext, DebugManager, LaunchEdit, NewLaunch};
pub use notification::{ChangeKind, DebugNotification, ThreadEvent, ThreadEventKind};
pub use session::{AdapterEvent, DebugSession, EventStream};
pub use store::DebugStore;
pub use target::{DebugAction, DebugTarget, TargetId, TargetSnapshot, TargetState};
pub use template::{Template, TemplateVars};
pub use thread::{DebugThread, ThreadSnapshot, ThreadState};
