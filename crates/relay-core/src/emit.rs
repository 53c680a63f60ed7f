//! Push-style notification emitter.
//!
//! Components that produce asynchronous notifications for the editor
//! (breakpoint changes, thread events, diagnostics) hold an
//! `Arc<dyn Emitter<M>>`. `emit` is a synchronous call: when it returns the
//! message has been handed to the editor side, so notifications keep the
//! order in which they were produced.

use std::sync::mpsc;

/// Receives notifications of type `M`.
pub trait Emitter<M>: Send + Sync {
    /// Deliver one notification.
    fn emit(&self, message: M);
}

/// Forwards notifications over a standard channel to another thread.
#[derive(Debug)]
pub struct ChannelEmitter<M> {
    tx: mpsc::Sender<M>,
}

impl<M> ChannelEmitter<M> {
    /// Create an emitter plus the receiving end.
    pub fn channel() -> (Self, mpsc::Receiver<M>) {
        let (tx, rx) = mpsc::channel();
        (Self { tx }, rx)
    }
}

impl<M: Send> Emitter<M> for ChannelEmitter<M> {
    fn emit(&self, message: M) {
        if self.tx.send(message).is_err() {
            tracing::debug!("notification dropped: receiver closed");
        }
    }
}

/// Discards every notification.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullEmitter;

impl<M> Emitter<M> for NullEmitter {
    fn emit(&self, _message: M) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_emitter_preserves_order() {
        let (emitter, rx) = ChannelEmitter::channel();
        emitter.emit(1);
        emitter.emit(2);
        emitter.emit(3);
        let got: Vec<i32> = rx.try_iter().collect();
        assert_eq!(got, vec![1, 2, 3]);
    }

    #[test]
    fn channel_emitter_survives_closed_receiver() {
        let (emitter, rx) = ChannelEmitter::channel();
        drop(rx);
        emitter.emit("late"); // must not panic
    }

    #[test]
    fn null_emitter_accepts_anything() {
        let e = NullEmitter;
        Emitter::<String>::emit(&e, "x".into());
    }
}
