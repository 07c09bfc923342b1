//! The scheduler (component C) and the reaper it drives (component D).
//!
//! The scheduler is confined to the OS thread that first touches it: it
//! lives in a `thread_local!`, not a process-wide static, so a process
//! that runs the runtime on several OS threads gets an independent
//! instance per thread rather than undefined behavior (see §5 of the
//! design notes). Every suspension point follows the same three-step
//! shape seen throughout this module: borrow the scheduler, compute the
//! two `CpuState` pointers and do all bookkeeping that must happen before
//! the switch, drop the borrow, *then* perform the raw transfer. Holding
//! the `RefCell` borrow across the transfer would deadlock the first time
//! the resumed context tried to touch the scheduler itself.

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};

use log::{debug, error, trace};

use crate::arch::{loomrt_swap_context, CpuState};
use crate::config::RuntimeConfig;
use crate::context::{
    bucket_index, Context, ContextId, ContextInner, Status, PRIO_LEVELS, PRIO_MAX, PRIO_MIN,
    PRIO_REAPER,
};
use crate::error::RuntimeError;
use crate::save::{Globals, SaveMask};
use crate::stack::StackPool;
use crate::value::Value;

/// Read-only snapshot of scheduler activity, safe to call from anywhere
/// (never suspends).
#[derive(Debug, Clone, Default)]
pub struct SchedulerStats {
    pub live_contexts: usize,
    pub ready_by_priority: [usize; PRIO_LEVELS],
    pub total_switches: u64,
    pub total_reaped: u64,
}

impl SchedulerStats {
    pub fn ready_total(&self) -> usize {
        self.ready_by_priority.iter().sum()
    }
}

type Entry = Box<dyn FnOnce(Vec<Value>) -> Vec<Value>>;

enum ScheduleAction {
    Transfer {
        prev: *mut CpuState,
        next: *const CpuState,
    },
    Idle,
}

pub(crate) struct Scheduler {
    contexts: HashMap<ContextId, ContextInner>,
    ready: [VecDeque<ContextId>; PRIO_LEVELS],
    nready: usize,
    current: Option<ContextId>,
    next_id: u64,
    live_globals: Globals,
    stack_pool: StackPool,
    config: RuntimeConfig,
    reaper: ContextId,
    destroy_list: VecDeque<ContextId>,
    switches: u64,
    reaped: u64,
}

thread_local! {
    static SCHEDULER: RefCell<Scheduler> = RefCell::new(Scheduler::bootstrap(RuntimeConfig::default()));
    static IDLE_HOOK: RefCell<Box<dyn FnMut() -> bool>> = RefCell::new(Box::new(default_idle_hook));
    /// Set immediately before transferring into a context that has never
    /// run, so the generic trampoline landed on by `ret` knows which
    /// context's entry closure to take and call. Mirrors the
    /// `CURRENT_THREAD_ENTRY` hand-off used by simple green-thread
    /// schedulers that drive a shared trampoline this way.
    static ACTIVATING: Cell<Option<ContextId>> = Cell::new(None);
    /// Cleanup closures registered by whatever primitive a context is
    /// currently blocked in (a semaphore/channel/signal wait-queue, a
    /// timer heap, a reactor watch). `cancel()` runs and clears a
    /// context's hook before reaping it, so cancellation never leaves a
    /// dangling id behind in a queue it no longer belongs to; the owning
    /// primitive also clears its own hook on every ordinary wakeup.
    static CANCEL_HOOKS: RefCell<HashMap<ContextId, Box<dyn FnOnce()>>> =
        RefCell::new(HashMap::new());
}

/// Register `hook` to run once if `id` is cancelled before it is cleared.
/// At most one hook may be registered per context; a second call
/// silently replaces the first; a primitive must pair this with
/// [`clear_cancel_hook`] on every exit path of its own wait, cancelled or
/// not, so a stale hook is never left referencing state that has since
/// moved on.
pub(crate) fn set_cancel_hook(id: ContextId, hook: impl FnOnce() + 'static) {
    CANCEL_HOOKS.with(|c| {
        c.borrow_mut().insert(id, Box::new(hook));
    });
}

/// Remove `id`'s cancellation hook without running it, if one is set.
pub(crate) fn clear_cancel_hook(id: ContextId) {
    CANCEL_HOOKS.with(|c| {
        c.borrow_mut().remove(&id);
    });
}

fn run_cancel_hook(id: ContextId) {
    let hook = CANCEL_HOOKS.with(|c| c.borrow_mut().remove(&id));
    if let Some(hook) = hook {
        hook();
    }
}

/// Suspend the current context, having already recorded it in whatever
/// external wait-queue it is blocking on. Registers `on_cancel` so a
/// concurrent `cancel()` of this very context pulls it back out of that
/// queue before reaping it, then schedules away, then clears the hook
/// once control returns here — by that point the wait has resolved one
/// way or another and the hook no longer applies.
pub(crate) fn suspend_with_cancel_hook(on_cancel: impl FnOnce() + 'static) {
    let me = current().id();
    set_cancel_hook(me, on_cancel);
    schedule();
    clear_cancel_hook(me);
}

/// Print a diagnostic and exit with status 51, matching the historical
/// default idle hook. Event-loop adapters override this with
/// [`set_idle_hook`] to block on a reactor instead of terminating.
fn default_idle_hook() -> bool {
    error!("FATAL: deadlock detected");
    eprintln!("FATAL: deadlock detected");
    std::process::exit(51);
}

/// Run `f` with exclusive access to this OS thread's scheduler. Must
/// never be called re-entrantly (i.e. from within another `with_scheduler`
/// closure on the same thread) or from an idle hook that hasn't already
/// returned — doing so panics on the `RefCell` borrow, which is the
/// intended, loud failure mode for that programming error.
pub(crate) fn with_scheduler<R>(f: impl FnOnce(&mut Scheduler) -> R) -> R {
    SCHEDULER.with(|cell| f(&mut cell.borrow_mut()))
}

impl Scheduler {
    fn bootstrap(config: RuntimeConfig) -> Self {
        let mut contexts = HashMap::new();
        let main_id = ContextId(0);
        contexts.insert(
            main_id,
            ContextInner {
                id: main_id,
                status: Status::Running,
                priority: crate::context::PRIO_NORMAL,
                desc: "main".to_owned(),
                save_mask: config.default_save_mask(),
                saved_globals: Globals::new(),
                cpu: CpuState::empty(),
                stack: None,
                entry: None,
                args: Vec::new(),
                is_empty: false,
                return_values: None,
                join_queue: VecDeque::new(),
            },
        );

        let mut sched = Scheduler {
            contexts,
            ready: std::array::from_fn(|_| VecDeque::new()),
            nready: 0,
            current: Some(main_id),
            next_id: 1,
            live_globals: Globals::new(),
            stack_pool: StackPool::new(config.stack_pool_cap()),
            config,
            reaper: main_id, // placeholder, replaced below
            destroy_list: VecDeque::new(),
            switches: 0,
            reaped: 0,
        };

        let reaper_id = sched.spawn_inner(
            Box::new(reaper_entry),
            Vec::new(),
            PRIO_REAPER,
            "reaper".to_owned(),
        );
        // The reaper starts parked: it has never run, and it will be
        // activated on the first `cancel()` anywhere, which calls
        // `ready()` on it directly.
        sched.contexts.get_mut(&reaper_id).unwrap().status = Status::Suspended;
        sched.reaper = reaper_id;
        sched
    }

    pub fn current_id(&self) -> ContextId {
        self.current.expect("no current context set")
    }

    fn alloc_id(&mut self) -> ContextId {
        let id = ContextId(self.next_id);
        self.next_id += 1;
        id
    }

    fn spawn_inner(&mut self, entry: Entry, args: Vec<Value>, priority: i8, desc: String) -> ContextId {
        let id = self.alloc_id();
        let stack = self
            .stack_pool
            .acquire(self.config.stack_size())
            .expect("stack allocation failed");
        let top = stack.top();
        let cpu = unsafe { CpuState::fresh(top, loomrt_trampoline) };
        self.contexts.insert(
            id,
            ContextInner {
                id,
                status: Status::New,
                priority,
                desc,
                save_mask: self.config.default_save_mask(),
                saved_globals: Globals::new(),
                cpu,
                stack: Some(stack),
                entry: Some(entry),
                args,
                is_empty: false,
                return_values: None,
                join_queue: VecDeque::new(),
            },
        );
        debug!("spawned {id} at priority {priority}");
        id
    }

    pub fn spawn(&mut self, entry: Entry, args: Vec<Value>) -> Context {
        let id = self.spawn_inner(entry, args, crate::context::PRIO_NORMAL, String::new());
        Context(id)
    }

    pub fn spawn_empty(&mut self) -> Context {
        let id = self.alloc_id();
        self.contexts.insert(
            id,
            ContextInner {
                id,
                status: Status::New,
                priority: crate::context::PRIO_NORMAL,
                desc: "empty".to_owned(),
                save_mask: self.config.default_save_mask(),
                saved_globals: Globals::new(),
                cpu: CpuState::empty(),
                stack: None,
                entry: None,
                args: Vec::new(),
                is_empty: true,
                return_values: None,
                join_queue: VecDeque::new(),
            },
        );
        Context(id)
    }

    fn inner(&self, id: ContextId) -> &ContextInner {
        self.contexts.get(&id).expect("unknown context id")
    }

    fn inner_mut(&mut self, id: ContextId) -> &mut ContextInner {
        self.contexts.get_mut(&id).expect("unknown context id")
    }

    pub fn status_of(&self, id: ContextId) -> Status {
        self.inner(id).status
    }

    pub fn priority_of(&self, id: ContextId) -> i8 {
        self.inner(id).priority
    }

    pub fn desc_of(&self, id: ContextId) -> String {
        self.inner(id).desc.clone()
    }

    pub fn set_desc(&mut self, id: ContextId, desc: String) {
        self.inner_mut(id).desc = desc;
    }

    pub fn save_flags_of(&self, id: ContextId) -> SaveMask {
        self.inner(id).save_mask
    }

    pub fn set_save_flags(&mut self, id: ContextId, mask: SaveMask) {
        self.inner_mut(id).save_mask = mask;
    }

    /// Move a context to `READY`. No-op if already `READY`/`RUNNING`.
    pub fn ready(&mut self, id: ContextId) -> Result<(), RuntimeError> {
        let inner = self.inner_mut(id);
        match inner.status {
            Status::Ready | Status::Running => Ok(()),
            Status::Zombie | Status::Dead => Err(RuntimeError::AlreadyTerminated(id)),
            Status::New | Status::Suspended => {
                if inner.is_empty {
                    return Err(RuntimeError::AlreadyTerminated(id));
                }
                inner.status = Status::Ready;
                let prio = inner.priority;
                self.ready[bucket_index(prio)].push_back(id);
                self.nready += 1;
                trace!("{id} -> READY (prio {prio})");
                Ok(())
            }
        }
    }

    /// Remove a `READY` context from its bucket without changing any
    /// other bookkeeping. Used by priority changes and by cancellation.
    fn unready(&mut self, id: ContextId) {
        let prio = self.inner(id).priority;
        let bucket = &mut self.ready[bucket_index(prio)];
        if let Some(pos) = bucket.iter().position(|&c| c == id) {
            bucket.remove(pos);
            self.nready -= 1;
        }
    }

    /// Immediately re-bucket a `READY` context on a priority change,
    /// appended at the tail of its new bucket — this is the resolution of
    /// the documented "Open Question" (§9 of the design notes): priority
    /// changes to non-running ready contexts take effect right away
    /// rather than being deferred to the next reschedule.
    pub fn set_priority(&mut self, id: ContextId, new_prio: i8) {
        let new_prio = new_prio.clamp(PRIO_MIN, PRIO_MAX);
        let was_ready = matches!(self.inner(id).status, Status::Ready);
        if was_ready {
            self.unready(id);
        }
        self.inner_mut(id).priority = new_prio;
        if was_ready {
            self.ready[bucket_index(new_prio)].push_back(id);
            self.nready += 1;
        }
    }

    pub fn set_suspended(&mut self, id: ContextId) {
        self.inner_mut(id).status = Status::Suspended;
    }

    /// Mark `id` `ZOMBIE`, store its return values, and hand it to the
    /// reaper. Returns `true` if `id` was the current context, in which
    /// case the caller (outside any scheduler borrow) must call
    /// [`schedule`] immediately: this context must never run again.
    pub fn cancel(&mut self, id: ContextId, values: Vec<Value>) -> bool {
        {
            let inner = self.inner_mut(id);
            if inner.status.is_terminal() {
                return false;
            }
            if matches!(inner.status, Status::Ready) {
                self.unready(id);
            }
        }
        // Pull `id` out of any semaphore/channel/signal wait-queue, timer
        // heap, or reactor watch it is parked in. Must run before the
        // status flips to ZOMBIE: a hook that races back in here (it
        // can't, since we hold `&mut self`, but it may call `ready()` on
        // other ids) should see consistent bookkeeping either way.
        run_cancel_hook(id);
        let inner = self.inner_mut(id);
        inner.status = Status::Zombie;
        inner.return_values = Some(values);
        self.destroy_list.push_back(id);
        debug!("{id} -> ZOMBIE");
        let _ = self.ready(self.reaper);

        self.current == Some(id)
    }

    /// Drain the destroy list: finalize each zombie to `DEAD`, wake its
    /// joiners, and return its stack to the pool. Called only from the
    /// reaper's own context.
    fn drain_destroy_list(&mut self) {
        while let Some(id) = self.destroy_list.pop_front() {
            let stack = {
                let inner = self.inner_mut(id);
                inner.status = Status::Dead;
                inner.entry = None;
                inner.stack.take()
            };
            if let Some(stack) = stack {
                self.stack_pool.release(stack);
            }
            let joiners: Vec<ContextId> = {
                let inner = self.inner_mut(id);
                inner.join_queue.drain(..).collect()
            };
            for joiner in joiners {
                let _ = self.ready(joiner);
            }
            self.reaped += 1;
            debug!("{id} -> DEAD");
        }
    }

    pub fn try_join(&mut self, target: ContextId) -> Option<Vec<Value>> {
        let inner = self.inner(target);
        if inner.status.is_terminal() {
            inner.return_values.clone()
        } else {
            None
        }
    }

    pub fn park_current_on_join_queue(&mut self, target: ContextId) {
        let current = self.current_id();
        self.inner_mut(target).join_queue.push_back(current);
        self.set_suspended(current);
    }

    pub fn stats(&self) -> SchedulerStats {
        let mut ready_by_priority = [0usize; PRIO_LEVELS];
        for (i, bucket) in self.ready.iter().enumerate() {
            ready_by_priority[i] = bucket.len();
        }
        SchedulerStats {
            live_contexts: self.contexts.len(),
            ready_by_priority,
            total_switches: self.switches,
            total_reaped: self.reaped,
        }
    }

    /// Highest bucket containing an entry other than `exclude`, if any.
    /// With `exclude: None` this is simply the highest non-empty bucket.
    fn highest_ready_bucket_excluding(&self, exclude: Option<ContextId>) -> Option<usize> {
        self.ready
            .iter()
            .rposition(|bucket| bucket.iter().any(|&id| Some(id) != exclude))
    }

    /// Force the running context itself back into its own ready bucket,
    /// transitioning `Running -> Ready` unconditionally. Distinct from
    /// the public `ready()`, whose documented contract treats an
    /// already-`Running` context as already scheduled and no-ops —
    /// exactly the wrong behavior for a context that is suspending
    /// itself and needs to be found again. Returns the requeued id.
    fn requeue_current(&mut self) -> ContextId {
        let id = self.current_id();
        let prio = self.inner(id).priority;
        self.inner_mut(id).status = Status::Ready;
        self.ready[bucket_index(prio)].push_back(id);
        self.nready += 1;
        id
    }

    fn swap_globals(&mut self, leaving: ContextId, entering: ContextId) {
        let leaving_mask = self.inner(leaving).save_mask;
        {
            let inner = self.inner_mut(leaving);
            let mut saved = std::mem::take(&mut inner.saved_globals);
            saved.swap_masked(&mut self.live_globals, leaving_mask);
            self.inner_mut(leaving).saved_globals = saved;
        }
        let entering_mask = self.inner(entering).save_mask;
        let inner = self.inner_mut(entering);
        let mut saved = std::mem::take(&mut inner.saved_globals);
        saved.swap_masked(&mut self.live_globals, entering_mask);
        self.inner_mut(entering).saved_globals = saved;
    }

    /// Select the next context to run and prepare everything that must
    /// happen before the raw transfer: globals swap, status bookkeeping,
    /// and (for a never-run context) arming the trampoline hand-off.
    /// Returns the two `CpuState` pointers to swap, or `Idle` if nothing
    /// but `exclude` is ready.
    ///
    /// `exclude` never removes an entry from its queue — it only skips
    /// over it while picking who runs next, rotating it past anything
    /// else already waiting at the same priority so it is still found on
    /// a later call.
    fn prepare_schedule(&mut self, exclude: Option<ContextId>) -> ScheduleAction {
        let Some(bucket) = self.highest_ready_bucket_excluding(exclude) else {
            return ScheduleAction::Idle;
        };
        let next = loop {
            let candidate = self.ready[bucket]
                .pop_front()
                .expect("non-empty bucket had no head");
            self.nready -= 1;
            if Some(candidate) == exclude {
                self.ready[bucket].push_back(candidate);
                self.nready += 1;
                continue;
            }
            break candidate;
        };

        let current = self.current_id();
        self.swap_globals(current, next);

        if self.inner(next).entry.is_some() {
            ACTIVATING.with(|c| c.set(Some(next)));
        }

        self.inner_mut(next).status = Status::Running;
        self.current = Some(next);
        self.switches += 1;
        trace!("transfer {current} -> {next}");

        let prev_ptr: *mut CpuState = &mut self.inner_mut(current).cpu;
        let next_ptr: *const CpuState = &self.inner(next).cpu;
        ScheduleAction::Transfer {
            prev: prev_ptr,
            next: next_ptr,
        }
    }

    /// Prepare a direct transfer to `target`, bypassing ready-bucket
    /// selection entirely. Used only by the native-extension ABI's
    /// `transfer` entry point. Unlike `prepare_schedule`, the outgoing
    /// context's status is left untouched: the extension driving this is
    /// responsible for its own scheduling bookkeeping, the same way the
    /// raw register-swap primitive carries no scheduling semantics of
    /// its own.
    fn prepare_transfer_to(&mut self, target: ContextId) -> Result<ScheduleAction, RuntimeError> {
        let inner = self.inner(target);
        if inner.status.is_terminal() || inner.is_empty {
            return Err(RuntimeError::AlreadyTerminated(target));
        }
        if matches!(inner.status, Status::Ready) {
            self.unready(target);
        }
        let current = self.current_id();
        self.swap_globals(current, target);
        if self.inner(target).entry.is_some() {
            ACTIVATING.with(|c| c.set(Some(target)));
        }
        self.inner_mut(target).status = Status::Running;
        self.current = Some(target);
        self.switches += 1;
        trace!("transfer {current} -> {target} (direct)");

        let prev_ptr: *mut CpuState = &mut self.inner_mut(current).cpu;
        let next_ptr: *const CpuState = &self.inner(target).cpu;
        Ok(ScheduleAction::Transfer {
            prev: prev_ptr,
            next: next_ptr,
        })
    }
}

/// Run the idle hook until either something becomes ready or the hook
/// itself diverges (the default hook exits the process). Invoked with no
/// scheduler borrow held, so the hook is free to call `ready()`.
fn run_idle_hook() {
    IDLE_HOOK.with(|cell| {
        let mut hook = cell.borrow_mut();
        hook()
    });
}

/// The free function surface: `current`, `schedule`, `cede`,
/// `cede_notself`, `terminate`.
pub fn current() -> Context {
    with_scheduler(|s| Context(s.current_id()))
}

/// Suspend the current context and transfer to the highest-priority
/// ready context. If nothing is ready, the idle hook runs, retrying once
/// it returns.
pub fn schedule() {
    schedule_excluding(None)
}

/// Shared loop behind `schedule`/`cede_notself`: repeatedly prepare and
/// attempt a transfer, skipping `exclude` when picking who runs next,
/// until a transfer actually happens.
fn schedule_excluding(exclude: Option<ContextId>) {
    loop {
        let action = with_scheduler(|s| s.prepare_schedule(exclude));
        match action {
            ScheduleAction::Transfer { prev, next } => {
                unsafe { loomrt_swap_context(prev, next) };
                run_post_transfer_trampoline();
                return;
            }
            ScheduleAction::Idle => run_idle_hook(),
        }
    }
}

/// If this transfer landed on a never-run context for the first time,
/// run its entry closure on this (its own) stack and terminate with the
/// result. For an ordinary resumption this is a no-op and returns
/// immediately to the caller of `schedule`/`cede`/etc.
fn run_post_transfer_trampoline() {
    let Some(id) = ACTIVATING.with(|c| c.take()) else {
        return;
    };
    let (entry, args) = with_scheduler(|s| {
        let inner = s.inner_mut(id);
        (inner.entry.take(), std::mem::take(&mut inner.args))
    });
    let Some(entry) = entry else { return };

    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| entry(args)));
    let values = match result {
        Ok(values) => values,
        Err(payload) => {
            error!("context {id} panicked: {}", panic_message(&payload));
            Vec::new()
        }
    };
    terminate(values);
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}

/// The generic trampoline every freshly-fabricated stack lands on. Its
/// only job is to let `schedule`'s caller run
/// [`run_post_transfer_trampoline`] on the *new* context's own stack —
/// which it cannot do directly, because `run_post_transfer_trampoline`'s
/// caller is a different stack. Instead the trampoline immediately calls
/// back into `schedule`'s post-transfer step by... it cannot: the
/// post-transfer step already runs on the new stack by construction,
/// because `loomrt_swap_context`'s `ret` *is* what lands here. So this
/// trampoline simply forwards into the same helper.
extern "C" fn loomrt_trampoline() -> ! {
    run_post_transfer_trampoline();
    // `run_post_transfer_trampoline` always calls `terminate`, which
    // never returns, when landed on via the trampoline (ACTIVATING is
    // always set in that case). If it somehow returns, there is no valid
    // call frame to return to: abort rather than run off the end of the
    // stack.
    error!("loomrt_trampoline: entry function returned without going through terminate()");
    std::process::abort();
}

/// Give up the timeslice to contexts of equal or higher priority. A
/// lower-priority context is left waiting: `ready()` enqueues behind
/// anything already in this context's bucket, and `prepare_schedule`
/// never looks at a lower bucket while this one is non-empty.
pub fn cede() {
    with_scheduler(|s| {
        s.requeue_current();
    });
    schedule();
}

/// Like [`cede`], but the current context is never itself selected to
/// run next: it is still requeued (so it is not dropped from scheduling
/// and does not linger at status `Running` while not actually running),
/// it just is not a candidate for *this* transfer. Useful from an
/// idle-hook callback that wants to let *other* runnable work proceed
/// without immediately resuming itself.
pub fn cede_notself() {
    let id = with_scheduler(|s| s.requeue_current());
    schedule_excluding(Some(id));
}

/// Transfer directly to `target`, bypassing the ready queue. Backs the
/// native-extension ABI's `transfer` entry point; nothing in the crate's
/// own Rust-facing API calls this (it always schedules via `schedule`/
/// `cede` instead).
pub(crate) fn transfer_to(target: ContextId) -> Result<(), RuntimeError> {
    let action = with_scheduler(|s| s.prepare_transfer_to(target))?;
    match action {
        ScheduleAction::Transfer { prev, next } => {
            unsafe { loomrt_swap_context(prev, next) };
            run_post_transfer_trampoline();
            Ok(())
        }
        ScheduleAction::Idle => unreachable!("prepare_transfer_to never returns Idle"),
    }
}

/// Equivalent to `current().cancel(values)`. Always diverges: the current
/// context is, tautologically, current.
pub fn terminate(values: Vec<Value>) -> ! {
    let id = current().id();
    let was_current = with_scheduler(|s| s.cancel(id, values));
    debug_assert!(was_current, "terminate() must always cancel the current context");
    schedule();
    unreachable!("terminate: a ZOMBIE context must never be rescheduled");
}

/// Block until `target` terminates, then return its return list. Usable
/// even after `target` is already `DEAD`.
pub(crate) fn join(target: ContextId) -> Vec<Value> {
    loop {
        if let Some(values) = with_scheduler(|s| s.try_join(target)) {
            return values;
        }
        with_scheduler(|s| s.park_current_on_join_queue(target));
        schedule();
    }
}

/// Install a custom idle hook, replacing the default deadlock-and-exit
/// behavior. Typically installed once by an event-loop adapter.
pub fn set_idle_hook(hook: impl FnMut() -> bool + 'static) {
    IDLE_HOOK.with(|cell| *cell.borrow_mut() = Box::new(hook));
}

/// A read-only snapshot of this OS thread's scheduler activity.
pub fn stats() -> SchedulerStats {
    with_scheduler(|s| s.stats())
}

fn reaper_entry(_args: Vec<Value>) -> Vec<Value> {
    loop {
        with_scheduler(|s| {
            let id = s.current_id();
            s.set_suspended(id);
        });
        schedule();
        with_scheduler(|s| s.drain_destroy_list());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;
    use std::cell::RefCell as StdRefCell;
    use std::rc::Rc;

    #[test]
    fn hand_off_runs_in_fifo_order_within_a_priority() {
        let log = Rc::new(StdRefCell::new(Vec::<&'static str>::new()));

        let log_a = log.clone();
        let a = Context::new(move |_| {
            log_a.borrow_mut().push("a1");
            cede();
            log_a.borrow_mut().push("a2");
            terminate(Vec::new());
        });
        let log_b = log.clone();
        let b = Context::new(move |_| {
            log_b.borrow_mut().push("b1");
            cede();
            log_b.borrow_mut().push("b2");
            terminate(Vec::new());
        });

        a.ready().unwrap();
        b.ready().unwrap();

        cede();
        a.join();
        b.join();

        assert_eq!(*log.borrow(), vec!["a1", "b1", "a2", "b2"]);
    }

    #[test]
    fn higher_priority_context_runs_to_completion_first() {
        let log = Rc::new(StdRefCell::new(Vec::<&'static str>::new()));

        let log_a = log.clone();
        let a = Context::new(move |_| {
            log_a.borrow_mut().push("a");
            terminate(Vec::new());
        });
        let log_b = log.clone();
        let b = Context::new(move |_| {
            log_b.borrow_mut().push("b");
            terminate(Vec::new());
        });

        a.ready().unwrap();
        b.set_prio(1);
        b.ready().unwrap();

        cede();
        a.join();
        b.join();

        assert_eq!(*log.borrow(), vec!["b", "a"]);
    }

    #[test]
    fn join_on_dead_context_still_returns_stored_values() {
        let c = Context::new(|_| crate::values![99]);
        c.ready().unwrap();
        let values = c.join();
        assert_eq!(values, crate::values![99]);
        // Joining again after DEAD must still work.
        assert_eq!(c.join(), crate::values![99]);
    }

    #[test]
    fn cancel_overrides_a_context_s_natural_return_value() {
        let c = Context::new(|_| {
            cede();
            crate::values![7, 8]
        });
        c.ready().unwrap();
        cede(); // let c run until its first cede
        c.cancel(crate::values![42]);
        assert_eq!(c.join(), crate::values![42]);
    }

    #[test]
    fn ready_on_a_ready_context_is_a_no_op() {
        let c = Context::new(|_| terminate(Vec::new()));
        c.ready().unwrap();
        let before = stats().ready_total();
        c.ready().unwrap();
        let after = stats().ready_total();
        assert_eq!(before, after);
        c.join();
    }

    #[test]
    fn guarded_save_restores_previous_mask_on_drop() {
        let c = Context::new(|_| terminate(Vec::new()));
        let original = c.save_flags();
        {
            let _guard = c.guarded_save(SaveMask::ERRSV);
            assert!(c.save_flags().contains(SaveMask::ERRSV));
        }
        assert_eq!(c.save_flags(), original);
        c.ready().unwrap();
        c.join();
    }
}
