//! relay-core: shared primitives for the relay bridge.
//!
//! Source positions and the file-resolver collaborator boundary, the
//! push-style notification emitter, and log-file helpers.

pub mod emit;
pub mod error;
pub mod logging;
pub mod position;

pub use emit::{ChannelEmitter, Emitter, NullEmitter};
pub use error::CoreError;
pub use position::{Anchor, FsResolver, Position, RopeSource, SourceFile, SourceResolver};
