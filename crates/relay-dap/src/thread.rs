//! Debuggee threads.
//!
//! A thread's frames are fetched once per stop and kept until it resumes.
//! Every stop bumps the stop generation so results of a fetch started
//! before a resume/stop cycle are not stored against the newer stop.

use serde::Serialize;

use crate::frame::{DebugFrame, DebugScope, DebugVariable};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreadState {
    Running,
    Suspended,
    Terminated,
}

#[derive(Debug, Clone)]
pub struct DebugThread {
    pub id: i64,
    pub name: String,
    pub state: ThreadState,
    /// Why the thread last stopped.
    pub reason: Option<String>,
    pub description: Option<String>,
    stop_generation: u64,
    frames: Option<Vec<DebugFrame>>,
}

/// What the editor sees of a thread.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ThreadSnapshot {
    pub id: i64,
    pub name: String,
    pub state: ThreadState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Known only once frames were fetched.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frame_count: Option<usize>,
}

impl DebugThread {
    pub fn new(id: i64, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            state: ThreadState::Running,
            reason: None,
            description: None,
            stop_generation: 0,
            frames: None,
        }
    }

    /// Placeholder name for a thread first seen in an event.
    pub fn unnamed(id: i64) -> Self {
        Self::new(id, format!("Thread #{id}"))
    }

    pub fn is_suspended(&self) -> bool {
        self.state == ThreadState::Suspended
    }

    pub fn stop_generation(&self) -> u64 {
        self.stop_generation
    }

    pub fn suspend(&mut self, reason: &str, description: Option<String>) {
        self.state = ThreadState::Suspended;
        self.reason = Some(reason.to_string());
        self.description = description;
        self.stop_generation += 1;
        self.frames = None;
    }

    pub fn resume(&mut self) {
        if self.state == ThreadState::Terminated {
            return;
        }
        self.state = ThreadState::Running;
        self.reason = None;
        self.description = None;
        self.frames = None;
    }

    pub fn terminate(&mut self) {
        self.state = ThreadState::Terminated;
        self.frames = None;
    }

    pub fn frames(&self) -> Option<&[DebugFrame]> {
        self.frames.as_deref()
    }

    /// Cache frames fetched during stop `generation`. Ignored when the
    /// thread has moved on since.
    pub fn store_frames(&mut self, generation: u64, frames: Vec<DebugFrame>) -> bool {
        if !self.is_suspended() || self.stop_generation != generation {
            return false;
        }
        self.frames = Some(frames);
        true
    }

    /// Cache the scopes and variables of frame `index`.
    pub fn store_frame_contents(
        &mut self,
        generation: u64,
        index: usize,
        scopes: Vec<DebugScope>,
        variables: Vec<DebugVariable>,
    ) -> bool {
        if !self.is_suspended() || self.stop_generation != generation {
            return false;
        }
        match self.frames.as_mut().and_then(|frames| frames.get_mut(index)) {
            Some(frame) => {
                frame.scopes = Some(scopes);
                frame.variables = Some(variables);
                true
            }
            None => false,
        }
    }

    pub fn snapshot(&self) -> ThreadSnapshot {
        ThreadSnapshot {
            id: self.id,
            name: self.name.clone(),
            state: self.state,
            reason: self.reason.clone(),
            description: self.description.clone(),
            frame_count: self.frames.as_ref().map(Vec::len),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::StackFrame;

    fn frame(index: usize) -> DebugFrame {
        DebugFrame::from_protocol(
            index,
            StackFrame {
                id: index as i64 + 100,
                name: format!("f{index}"),
                source: None,
                line: 0,
                column: 0,
                presentation_hint: None,
            },
        )
    }

    #[test]
    fn new_thread_is_running() {
        let t = DebugThread::unnamed(4);
        assert_eq!(t.state, ThreadState::Running);
        assert_eq!(t.name, "Thread #4");
        assert!(t.frames().is_none());
    }

    #[test]
    fn suspend_bumps_generation_and_clears_frames() {
        let mut t = DebugThread::new(1, "main");
        t.suspend("breakpoint", None);
        let g = t.stop_generation();
        assert!(t.store_frames(g, vec![frame(0)]));
        assert_eq!(t.snapshot().frame_count, Some(1));

        t.suspend("step", Some("stepped".into()));
        assert_eq!(t.stop_generation(), g + 1);
        assert!(t.frames().is_none());
        assert!(!t.store_frames(g, vec![frame(0)]));
    }

    #[test]
    fn frames_not_stored_while_running() {
        let mut t = DebugThread::new(1, "main");
        t.suspend("pause", None);
        let g = t.stop_generation();
        t.resume();
        assert!(!t.store_frames(g, vec![frame(0)]));
        assert_eq!(t.reason, None);
    }

    #[test]
    fn frame_contents_cached_per_index() {
        let mut t = DebugThread::new(1, "main");
        t.suspend("breakpoint", None);
        let g = t.stop_generation();
        t.store_frames(g, vec![frame(0), frame(1)]);
        assert!(t.store_frame_contents(g, 1, vec![], vec![]));
        assert!(!t.store_frame_contents(g, 5, vec![], vec![]));
        let frames = t.frames().unwrap();
        assert!(frames[0].variables.is_none());
        assert_eq!(frames[1].variables.as_deref(), Some(&[][..]));
    }

    #[test]
    fn terminated_thread_stays_terminated() {
        let mut t = DebugThread::new(1, "main");
        t.terminate();
        t.resume();
        assert_eq!(t.state, ThreadState::Terminated);
        assert_eq!(
            serde_json::to_value(t.snapshot()).unwrap()["state"],
            "terminated"
        );
    }
}
