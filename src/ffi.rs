//! The native-extension ABI (component F): a stable, versioned vtable
//! that lets code built against a different compiler (or a different
//! language entirely, via `cdylib`) drive the scheduler without linking
//! against this crate's Rust types directly.
//!
//! A version mismatch is a programming error, not a recoverable one: an
//! extension built for a vtable layout this runtime does not speak could
//! read or write past the end of a real struct, so the loader aborts
//! immediately on mismatch rather than degrading gracefully.

use std::os::raw::c_int;

use crate::context::ContextId;
use crate::save::SaveMask;
use crate::scheduler;

/// Bumped whenever a field is added, removed, or reordered.
pub const LOOMRT_ABI_VERSION: u32 = 1;

/// A transparent wrapper around [`ContextId`] safe to pass across an FFI
/// boundary; callers must treat the payload as opaque.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct FfiContextId(pub u64);

impl From<ContextId> for FfiContextId {
    fn from(id: ContextId) -> Self {
        FfiContextId(id.0)
    }
}

impl From<FfiContextId> for ContextId {
    fn from(id: FfiContextId) -> Self {
        ContextId(id.0)
    }
}

/// The stable function-pointer table. Every entry mirrors a free
/// function in [`crate::scheduler`] (`transfer` is the one exception —
/// it has no Rust-facing equivalent; the crate's own API only ever
/// schedules via the ready queue). `abi_version` must be checked by the
/// loading extension (or by [`checked_vtable_for`]'s caller) before any
/// other field is read.
#[repr(C)]
pub struct LoomrtVtable {
    pub abi_version: u32,
    pub transfer: extern "C" fn(FfiContextId) -> c_int,
    pub schedule: extern "C" fn(),
    pub cede: extern "C" fn(),
    pub cede_notself: extern "C" fn(),
    pub current: extern "C" fn() -> FfiContextId,
    pub ready: extern "C" fn(FfiContextId) -> c_int,
    pub is_ready: extern "C" fn(FfiContextId) -> c_int,
    pub nready: extern "C" fn() -> usize,
    pub get_save: extern "C" fn(FfiContextId) -> u8,
    pub set_save: extern "C" fn(FfiContextId, u8),
}

/// Transfer directly to `target`, bypassing the ready queue entirely.
/// Unlike `schedule`/`cede`, this does not re-enqueue the caller: an
/// extension driving its own scheduling policy through this entry point
/// is responsible for calling `ready` on the outgoing context itself, if
/// it wants it resumable again. Returns `0` without transferring if
/// `target` is terminal or empty.
extern "C" fn ffi_transfer(target: FfiContextId) -> c_int {
    match scheduler::transfer_to(ContextId::from(target)) {
        Ok(()) => 1,
        Err(_) => 0,
    }
}

extern "C" fn ffi_schedule() {
    scheduler::schedule();
}

extern "C" fn ffi_cede() {
    scheduler::cede();
}

extern "C" fn ffi_cede_notself() {
    scheduler::cede_notself();
}

extern "C" fn ffi_current() -> FfiContextId {
    scheduler::current().id().into()
}

extern "C" fn ffi_ready(id: FfiContextId) -> c_int {
    match crate::context::Context(ContextId::from(id)).ready() {
        Ok(()) => 1,
        Err(_) => 0,
    }
}

extern "C" fn ffi_is_ready(id: FfiContextId) -> c_int {
    let status = crate::context::Context(ContextId::from(id)).status();
    if matches!(status, crate::context::Status::Ready) {
        1
    } else {
        0
    }
}

extern "C" fn ffi_nready() -> usize {
    scheduler::stats().ready_total()
}

extern "C" fn ffi_get_save(id: FfiContextId) -> u8 {
    crate::context::Context(ContextId::from(id)).save_flags().bits()
}

extern "C" fn ffi_set_save(id: FfiContextId, mask: u8) {
    crate::context::Context(ContextId::from(id))
        .set_save_flags(SaveMask::from_bits_truncate(mask));
}

/// Build the vtable for this build of the crate.
pub const fn vtable() -> LoomrtVtable {
    LoomrtVtable {
        abi_version: LOOMRT_ABI_VERSION,
        transfer: ffi_transfer,
        schedule: ffi_schedule,
        cede: ffi_cede,
        cede_notself: ffi_cede_notself,
        current: ffi_current,
        ready: ffi_ready,
        is_ready: ffi_is_ready,
        nready: ffi_nready,
        get_save: ffi_get_save,
        set_save: ffi_set_save,
    }
}

/// Check an extension-reported ABI version against this build's, and
/// abort the process with a diagnostic on mismatch rather than handing
/// back a vtable the extension would misinterpret.
pub fn checked_vtable_for(extension_abi_version: u32) -> LoomrtVtable {
    if extension_abi_version != LOOMRT_ABI_VERSION {
        eprintln!(
            "FATAL: loomrt ABI mismatch: runtime is {LOOMRT_ABI_VERSION}, extension expects {extension_abi_version}"
        );
        std::process::abort();
    }
    vtable()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vtable_reports_the_current_abi_version() {
        let vt = vtable();
        assert_eq!(vt.abi_version, LOOMRT_ABI_VERSION);
    }

    #[test]
    fn ffi_current_and_ready_round_trip_through_the_vtable() {
        let vt = vtable();
        let c = crate::context::Context::new(|_| scheduler::terminate(Vec::new()));
        let id: FfiContextId = c.id().into();
        assert_eq!((vt.ready)(id), 1);
        assert_eq!((vt.is_ready)(id), 1);
        c.join();
    }

    #[test]
    fn ffi_get_save_and_set_save_round_trip_bits() {
        let vt = vtable();
        let c = crate::context::Context::new(|_| scheduler::terminate(Vec::new()));
        let id: FfiContextId = c.id().into();
        let original = (vt.get_save)(id);
        (vt.set_save)(id, SaveMask::ERRSV.bits());
        assert_eq!((vt.get_save)(id), SaveMask::ERRSV.bits());
        (vt.set_save)(id, original);
        c.cancel(Vec::new());
    }

    #[test]
    fn ffi_transfer_switches_directly_to_the_named_context_and_back() {
        let vt = vtable();
        // `transfer` bypasses the ready queue entirely and does not
        // re-enqueue the outgoing context, so the only way back to this
        // call site is for `c` to `transfer` here explicitly in turn.
        let main_id: FfiContextId = scheduler::current().id().into();
        let log = std::rc::Rc::new(std::cell::RefCell::new(Vec::<&'static str>::new()));
        let log2 = log.clone();
        let c = crate::context::Context::new(move |_| {
            log2.borrow_mut().push("ran");
            (vtable().transfer)(main_id);
            unreachable!("nothing transfers back to a cancelled context");
        });
        let id: FfiContextId = c.id().into();
        assert_eq!((vt.transfer)(id), 1);
        assert_eq!(*log.borrow(), vec!["ran"]);
        c.cancel(Vec::new());
    }
}
