//! Architecture-specific context switching
//!
//! The portable contract is `SavedRegs` plus three operations:
//! `init_context` prepares a fresh stack so the first switch lands in
//! the entry trampoline, `context_switch` saves the callee-saved state
//! of the current context and restores another, and the trampoline
//! funnels a finished entry function into `fiber::fiber_finished`.

#[cfg(target_arch = "x86_64")]
pub mod x86_64;

#[cfg(target_arch = "aarch64")]
pub mod aarch64;

/// Callee-saved register state of a suspended context
///
/// Fixed layout; offsets are baked into the switch assembly.
#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
pub struct SavedRegs {
    pub rsp: u64,
    pub rip: u64,
    pub rbx: u64,
    pub rbp: u64,
    pub r12: u64,
    pub r13: u64,
    pub r14: u64,
    pub r15: u64,
}

// The switch assembly stores eight quadwords
const _: () = assert!(core::mem::size_of::<SavedRegs>() == 64);
