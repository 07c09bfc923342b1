//! The stack-switch primitive (component A).
//!
//! `swap_context` is a hand-written x86-64 System V leaf: it saves the
//! caller's callee-saved registers and stack pointer into one
//! [`CpuState`] and loads them from another, then returns — except the
//! return lands wherever the *other* context was last suspended, because
//! we just swapped out from under it which `ret` it will execute next.
//!
//! It is written with `global_asm!` rather than inline `asm!` inside a
//! normal `fn` body: a normal function gets a compiler-generated prologue
//! and epilogue that may use the very registers we're about to repurpose
//! as a stack pointer, which a leaf in this position cannot tolerate.
//! `global_asm!` defines a true `extern "C"` symbol with no Rust-side
//! frame at all.

use std::arch::global_asm;

/// The complete callee-saved register set needed to resume execution
/// exactly where a context left off, plus the stack pointer itself.
/// Field order and offsets must match the `global_asm!` block below.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct CpuState {
    pub rsp: u64,
    pub rbx: u64,
    pub rbp: u64,
    pub r12: u64,
    pub r13: u64,
    pub r14: u64,
    pub r15: u64,
}

impl CpuState {
    /// An all-zero state. Only legal as the `prev` slot of a transfer
    /// performed from a context that has never run on its own stack (the
    /// "empty context as save slot" idiom), or as a placeholder before a
    /// context's real entry state is fabricated.
    pub const fn empty() -> Self {
        CpuState {
            rsp: 0,
            rbx: 0,
            rbp: 0,
            r12: 0,
            r13: 0,
            r14: 0,
            r15: 0,
        }
    }

    /// Fabricate the saved state for a context that has never run: when
    /// first transferred into, it must begin executing `entry` on a fresh
    /// stack topped out at `stack_top`.
    ///
    /// `stack_top` is rounded down to 16 bytes and then offset by a
    /// further 16, so that the slot at the resulting stack pointer holds
    /// `entry`'s address exactly where the `ret` in `swap_context`
    /// expects to find a return address. After that `ret` pops the
    /// address, `rsp` sits at `aligned_top - 8` — `≡ 8 (mod 16)`, which
    /// is what the System V ABI requires at a function's first
    /// instruction, as if `call entry` had just pushed it from a
    /// 16-aligned `rsp`.
    ///
    /// # Safety
    /// `stack_top` must be the high address of a writable allocation of
    /// at least 8 bytes that outlives this context.
    pub unsafe fn fresh(stack_top: usize, entry: extern "C" fn() -> !) -> Self {
        let aligned_top = stack_top & !0xf;
        let sp = aligned_top - 16;
        std::ptr::write(sp as *mut u64, entry as usize as u64);
        CpuState {
            rsp: sp as u64,
            rbx: 0,
            rbp: 0,
            r12: 0,
            r13: 0,
            r14: 0,
            r15: 0,
        }
    }
}

extern "C" {
    /// Save the running registers into `*prev`, load them from `*next`,
    /// and `ret`. Returns to the caller of whichever earlier `swap_context`
    /// call left `next` suspended — which, for a never-run context, is the
    /// entry trampoline baked into its stack by [`CpuState::fresh`].
    ///
    /// # Safety
    /// `next` must hold a state previously produced by `CpuState::fresh`
    /// or saved by a prior `swap_context` call into a stack that is still
    /// live. Calling this with a [`CpuState::empty`] `next` is a
    /// programming error and will crash instead of doing anything useful
    /// (there is deliberately no runtime guard here; callers must check
    /// `Status` before reaching this far — see `Scheduler::transfer_to`).
    pub fn loomrt_swap_context(prev: *mut CpuState, next: *const CpuState);
}

#[cfg(target_arch = "x86_64")]
global_asm!(
    r#"
.text
.globl loomrt_swap_context
.p2align 4
loomrt_swap_context:
    mov [rdi + 0],  rsp
    mov [rdi + 8],  rbx
    mov [rdi + 16], rbp
    mov [rdi + 24], r12
    mov [rdi + 32], r13
    mov [rdi + 40], r14
    mov [rdi + 48], r15

    mov rsp, [rsi + 0]
    mov rbx, [rsi + 8]
    mov rbp, [rsi + 16]
    mov r12, [rsi + 24]
    mov r13, [rsi + 32]
    mov r14, [rsi + 40]
    mov r15, [rsi + 48]
    ret
"#
);

#[cfg(not(target_arch = "x86_64"))]
compile_error!("loomrt's stack-switch primitive is implemented only for x86_64; see src/arch.rs");
