//! A single-threaded cooperative coroutine runtime.
//!
//! `loomrt` gives a program many independent threads of execution —
//! [`Context`]s — that run on one OS thread and one native stack apiece,
//! switching between each other only at points the running context
//! chooses: [`cede`], a blocking call on a synchronization primitive in
//! [`sync`], [`timer::sleep`], or termination. Nothing preempts a
//! context mid-computation.
//!
//! ```
//! use loomrt::{Context, cede, terminate, values};
//!
//! let worker = Context::new(|_args| {
//!     cede();
//!     values![1, 2, 3]
//! });
//! worker.ready().unwrap();
//! let result = worker.join();
//! assert_eq!(result, values![1, 2, 3]);
//! ```
//!
//! # Layout
//!
//! - [`arch`] — the raw register-level stack switch.
//! - [`context`] — the [`Context`] handle and its lifecycle.
//! - [`scheduler`] — priority-bucketed ready queues and the reaper.
//! - [`reactor`]/[`timer`] — bridging to an external event loop.
//! - [`handle`] (unix only) — a blocking-style wrapper over a
//!   non-blocking descriptor, suspending the calling context instead of
//!   the OS thread.
//! - [`sync`] — semaphores, read/write locks, channels, signals.
//! - [`save`] — per-context globals localized across a transfer.
//! - [`ffi`] — a stable C ABI for driving the scheduler from outside.
//! - [`config`]/[`error`]/[`value`] — the ambient stack.
//!
//! # Thread confinement
//!
//! Every [`Context`] is tied to the OS thread it was created on: the
//! scheduler is a `thread_local!`, and [`Context`] deliberately does not
//! implement `Send`. Using a handle from a different OS thread than the
//! one that created it is a programming error.

pub mod arch;
pub mod config;
pub mod context;
pub mod error;
pub mod ffi;
#[cfg(unix)]
pub mod handle;
pub mod reactor;
pub mod save;
pub mod scheduler;
pub mod stack;
pub mod sync;
pub mod timer;
pub mod value;

pub use context::{Context, ContextId, Status, PRIO_MAX, PRIO_MIN, PRIO_NORMAL};
pub use error::RuntimeError;
pub use save::SaveMask;
pub use scheduler::{cede, cede_notself, current, schedule, set_idle_hook, stats, terminate, SchedulerStats};
pub use value::Value;
pub use config::RuntimeConfig;
