//! The context object (component B): a first-class handle to one
//! suspended thread of execution.
//!
//! `Context` itself is a cheap, `Copy` handle — an integer id into the
//! scheduler's context table, mirroring the "central context table and
//! integer handles" approach this runtime's cyclic references (wait
//! queues, join queues, the reaper's destroy list) are modeled with. All
//! the real state lives in [`ContextInner`], owned by the scheduler.

use std::collections::VecDeque;
use std::fmt;

use crate::arch::CpuState;
use crate::error::RuntimeError;
use crate::save::{Globals, SaveGuard, SaveMask};
use crate::scheduler;
use crate::stack::Stack;
use crate::value::Value;

/// Lowest legal priority.
pub const PRIO_MIN: i8 = -4;
/// Highest legal priority available to ordinary contexts. The reaper runs
/// one level above this, in a bucket user code cannot target.
pub const PRIO_MAX: i8 = 3;
/// Default priority for newly-created contexts.
pub const PRIO_NORMAL: i8 = 0;

/// The reaper's reserved bucket, one level above `PRIO_MAX`. Not a legal
/// argument to `Context::new`/`prio`/`nice` — there is no public constant
/// for it, by design.
pub(crate) const PRIO_REAPER: i8 = PRIO_MAX + 1;
pub(crate) const PRIO_LEVELS: usize = (PRIO_REAPER - PRIO_MIN + 1) as usize;

pub(crate) fn bucket_index(priority: i8) -> usize {
    (priority - PRIO_MIN) as usize
}

/// A unique, opaque handle into the scheduler's context table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextId(pub(crate) u64);

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ctx#{}", self.0)
    }
}

/// Where a context sits in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    New,
    Ready,
    Running,
    Suspended,
    /// Terminated; return values are final, but the stack has not yet
    /// been reclaimed by the reaper.
    Zombie,
    /// Reaped: stack freed, joiners woken. Return values remain
    /// retrievable.
    Dead,
}

impl Status {
    pub fn is_terminal(self) -> bool {
        matches!(self, Status::Zombie | Status::Dead)
    }
}

type Entry = Box<dyn FnOnce(Vec<Value>) -> Vec<Value>>;

/// The real state behind a [`Context`] handle. Lives in the scheduler's
/// context table; never moved out from under a live `rsp` pointing into
/// its stack.
pub(crate) struct ContextInner {
    pub id: ContextId,
    pub status: Status,
    pub priority: i8,
    pub desc: String,
    pub save_mask: SaveMask,
    pub saved_globals: Globals,
    pub cpu: CpuState,
    pub stack: Option<Stack>,
    /// `None` once the context has started running (taken by the
    /// trampoline) or if this is an empty, entry-less context.
    pub entry: Option<Entry>,
    pub args: Vec<Value>,
    /// True for a context created via `Context::empty`: never made
    /// `READY`, legal only as the `prev` slot of a transfer.
    pub is_empty: bool,
    pub return_values: Option<Vec<Value>>,
    pub join_queue: VecDeque<ContextId>,
}

impl ContextInner {
    pub fn is_runnable_entry(&self) -> bool {
        !self.is_empty
    }
}

/// A handle to one cooperative thread of execution.
///
/// Cloning a `Context` is cheap (it is just the id); all operations act
/// on the single shared context behind every clone.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Context(pub(crate) ContextId);

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Context({})", self.0)
    }
}

impl Context {
    /// Create a new context with an entry function and no arguments. The
    /// context starts `NEW`; call [`Context::ready`] to schedule it.
    pub fn new<F>(entry: F) -> Context
    where
        F: FnOnce(Vec<Value>) -> Vec<Value> + 'static,
    {
        Self::with_args(entry, Vec::new())
    }

    /// Create a new context with an entry function and an argument list
    /// delivered to it on first run.
    pub fn with_args<F>(entry: F, args: Vec<Value>) -> Context
    where
        F: FnOnce(Vec<Value>) -> Vec<Value> + 'static,
    {
        scheduler::with_scheduler(|sched| sched.spawn(Box::new(entry), args))
    }

    /// Create an "empty" context: no entry point, no stack. Its only
    /// legal use is as the `prev` slot of a transfer — the idiom for
    /// capturing "the currently running registers" into a fresh save
    /// area, e.g. to hand off from bootstrap code into the scheduler for
    /// the first time.
    pub fn empty() -> Context {
        scheduler::with_scheduler(|sched| sched.spawn_empty())
    }

    pub fn id(&self) -> ContextId {
        self.0
    }

    pub fn status(&self) -> Status {
        scheduler::with_scheduler(|sched| sched.status_of(self.0))
    }

    /// Move this context to `READY` if it is `NEW` or `SUSPENDED`. A
    /// no-op if already `READY`/`RUNNING`. An error if the context has
    /// already terminated, or if it is empty (invariant: an empty context
    /// is never ready).
    pub fn ready(&self) -> Result<(), RuntimeError> {
        scheduler::with_scheduler(|sched| sched.ready(self.0))
    }

    /// Store `values` as this context's return list, mark it `ZOMBIE`,
    /// and hand it to the reaper. If this is the *current* context,
    /// control never returns to the caller: a reschedule is forced
    /// immediately afterward and this context is never chosen again.
    pub fn cancel(&self, values: Vec<Value>) {
        let was_current = scheduler::with_scheduler(|sched| sched.cancel(self.0, values));
        if was_current {
            scheduler::schedule();
        }
    }

    /// Block the current context until this one terminates, then return
    /// its return list. Safe to call after the target is already `DEAD`:
    /// return lists outlive the stack.
    pub fn join(&self) -> Vec<Value> {
        scheduler::join(self.0)
    }

    pub fn prio(&self) -> i8 {
        scheduler::with_scheduler(|sched| sched.priority_of(self.0))
    }

    /// Set this context's priority. If it is `READY`, it is immediately
    /// re-bucketed, preserving arrival order within the new bucket (see
    /// the Open Question resolution documented alongside the scheduler).
    /// If it is `RUNNING`, the change takes effect at the next
    /// `schedule`.
    pub fn set_prio(&self, new: i8) {
        scheduler::with_scheduler(|sched| sched.set_priority(self.0, new));
    }

    pub fn nice(&self, delta: i8) {
        let current = self.prio();
        self.set_prio((current + delta).clamp(PRIO_MIN, PRIO_MAX));
    }

    pub fn desc(&self) -> String {
        scheduler::with_scheduler(|sched| sched.desc_of(self.0))
    }

    pub fn set_desc(&self, new: impl Into<String>) {
        scheduler::with_scheduler(|sched| sched.set_desc(self.0, new.into()));
    }

    pub fn save_flags(&self) -> SaveMask {
        scheduler::with_scheduler(|sched| sched.save_flags_of(self.0))
    }

    pub fn set_save_flags(&self, new: SaveMask) {
        scheduler::with_scheduler(|sched| sched.set_save_flags(self.0, new));
    }

    pub fn save_also(&self, extra: SaveMask) {
        let current = self.save_flags();
        self.set_save_flags(current | extra);
    }

    /// Widen (or narrow) the save mask for a bounded scope. Restores the
    /// previous mask exactly when the returned guard is dropped.
    pub fn guarded_save(&self, extra: SaveMask) -> SaveGuard {
        let previous = self.save_flags();
        self.set_save_flags(previous | extra);
        SaveGuard {
            target: self.0,
            previous,
        }
    }
}
