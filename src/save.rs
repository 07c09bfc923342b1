//! Per-context "globals" and the save mask that selects which of them
//! participate in save/restore on `transfer`.
//!
//! These five slots mirror a fixed set of process-wide values that a
//! cooperative runtime must localize per context: a positional-argument
//! vector, an implicit scalar, a pending-error slot, an input record
//! separator, and a default output stream. Each is just a field on
//! [`Globals`]; the mask decides which fields move between the live
//! thread-local copy and a context's saved copy when that context stops
//! or starts running.

use std::cell::RefCell;
use std::rc::Rc;

use bitflags::bitflags;

use crate::context::ContextId;
use crate::value::Value;

bitflags! {
    /// Selects which per-context globals are saved on transfer-out and
    /// restored on transfer-in.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SaveMask: u8 {
        /// The positional-argument vector.
        const DEFAV = 0b0_0001;
        /// The implicit scalar.
        const DEFSV = 0b0_0010;
        /// The pending-error slot.
        const ERRSV = 0b0_0100;
        /// The input record separator.
        const IRSSV = 0b0_1000;
        /// The current default output stream.
        const DEFFH = 0b1_0000;
    }
}

impl SaveMask {
    /// OR of every recognized flag.
    pub const ALL: SaveMask = SaveMask::from_bits_truncate(
        SaveMask::DEFAV.bits()
            | SaveMask::DEFSV.bits()
            | SaveMask::ERRSV.bits()
            | SaveMask::IRSSV.bits()
            | SaveMask::DEFFH.bits(),
    );

    /// The default mask applied to newly-created contexts. Equal to
    /// [`SaveMask::ALL`].
    pub const DEF: SaveMask = SaveMask::ALL;
}

impl Default for SaveMask {
    fn default() -> Self {
        SaveMask::DEF
    }
}

/// A shared, writable handle to one of the five process-wide slots
/// `transfer` can localize. `DEFFH` (the default output stream) is the
/// only slot that is not trivially `Clone`, so every slot is stored
/// behind `Rc<RefCell<_>>` to keep the field types uniform.
#[derive(Debug, Clone, Default)]
pub struct Globals {
    pub defav: Rc<RefCell<Vec<String>>>,
    pub defsv: Rc<RefCell<Value>>,
    pub errsv: Rc<RefCell<Option<Value>>>,
    pub irssv: Rc<RefCell<Option<String>>>,
    pub deffh: Rc<RefCell<String>>,
}

impl Globals {
    pub fn new() -> Self {
        Globals {
            defav: Rc::new(RefCell::new(Vec::new())),
            defsv: Rc::new(RefCell::new(Value::Unit)),
            errsv: Rc::new(RefCell::new(None)),
            irssv: Rc::new(RefCell::new(Some("\n".to_owned()))),
            deffh: Rc::new(RefCell::new("stdout".to_owned())),
        }
    }

    /// Swap this saved copy with `live` for every flag set in `mask`.
    /// Used symmetrically on both transfer-out (context -> live) and
    /// transfer-in (live -> context).
    pub(crate) fn swap_masked(&mut self, live: &mut Globals, mask: SaveMask) {
        if mask.contains(SaveMask::DEFAV) {
            std::mem::swap(&mut self.defav, &mut live.defav);
        }
        if mask.contains(SaveMask::DEFSV) {
            std::mem::swap(&mut self.defsv, &mut live.defsv);
        }
        if mask.contains(SaveMask::ERRSV) {
            std::mem::swap(&mut self.errsv, &mut live.errsv);
        }
        if mask.contains(SaveMask::IRSSV) {
            std::mem::swap(&mut self.irssv, &mut live.irssv);
        }
        if mask.contains(SaveMask::DEFFH) {
            std::mem::swap(&mut self.deffh, &mut live.deffh);
        }
    }
}

/// A scoped reverter returned by `Context::guarded_save`. Restores the
/// context's previous save mask when dropped, so a bounded region of code
/// can temporarily widen or narrow what gets localized without the caller
/// having to remember the original value.
pub struct SaveGuard {
    pub(crate) target: ContextId,
    pub(crate) previous: SaveMask,
}

impl Drop for SaveGuard {
    fn drop(&mut self) {
        crate::scheduler::with_scheduler(|sched| {
            sched.set_save_flags(self.target, self.previous);
        });
    }
}
