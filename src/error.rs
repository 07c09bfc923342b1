//! Recoverable error taxonomy.
//!
//! Programming errors (transfer into an empty context, scheduling from a
//! foreign OS thread, a double reap) are not represented here: they abort
//! the process with a diagnostic, the same way the reference runtime this
//! crate is modeled on treats them. `RuntimeError` covers only the handful
//! of call sites that can fail without violating a core invariant.

use thiserror::Error;

use crate::context::ContextId;

/// Errors a caller can recover from without the runtime's invariants being
/// violated.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RuntimeError {
    /// `ready()` was called on a context that is `ZOMBIE` or `DEAD`.
    #[error("context {0:?} cannot be readied: it has already terminated")]
    AlreadyTerminated(ContextId),

    /// The context table has no room for another live context.
    #[error("context table exhausted (at most {0} live contexts)")]
    OutOfContexts(usize),

    /// The stack pool could not satisfy an allocation under its hard cap.
    #[error("stack allocation failed (requested {requested} bytes, pool cap {cap} idle stacks)")]
    StackAllocationFailed { requested: usize, cap: usize },

    /// A native-extension vtable was loaded with an incompatible version.
    #[error("vtable version mismatch: runtime is {runtime}, extension expects {extension}")]
    VtableVersionMismatch { runtime: u32, extension: u32 },

    /// A channel's peer end was dropped while this side was waiting.
    #[error("channel closed while waiting")]
    ChannelClosed,
}
