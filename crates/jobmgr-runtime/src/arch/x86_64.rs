//! x86_64 context switching
//!
//! Inline assembly voluntary switch, stable since Rust 1.88.

use super::SavedRegs;
use std::arch::naked_asm;

/// Initialize a fresh fiber context
///
/// Sets up the register area so that the first switch into it begins
/// executing `entry_fn(entry_arg)` via the trampoline.
///
/// # Safety
///
/// `regs` must point to valid `SavedRegs` memory and `stack_top` must be
/// the top of a mapped stack (16-byte alignment is established here).
#[inline]
pub unsafe fn init_context(
    regs: *mut SavedRegs,
    stack_top: *mut u8,
    entry_fn: usize,
    entry_arg: usize,
) {
    // System V AMD64: stack is 16-byte aligned at function entry minus
    // the return-address slot
    let sp = stack_top as usize;
    let aligned_sp = (sp & !0xF) - 8;

    let regs = unsafe { &mut *regs };
    regs.rsp = aligned_sp as u64;
    regs.rip = fiber_entry_trampoline as usize as u64;
    regs.rbx = 0;
    regs.rbp = 0;
    regs.r12 = entry_fn as u64;
    regs.r13 = entry_arg as u64;
    regs.r14 = 0;
    regs.r15 = 0;
}

/// Trampoline that calls the entry function with its argument
///
/// When the entry returns, control falls into the finish hook, which
/// switches back to the calling context and never returns here.
#[unsafe(naked)]
pub unsafe extern "C" fn fiber_entry_trampoline() {
    naked_asm!(
        "mov rdi, r13",
        "call r12",
        "call {finish}",
        "ud2",
        finish = sym crate::fiber::fiber_finished,
    );
}

/// Switch contexts: save callee-saved state to `old`, restore from `new`
#[unsafe(naked)]
pub unsafe extern "C" fn context_switch(_old: *mut SavedRegs, _new: *const SavedRegs) {
    naked_asm!(
        // Save callee-saved registers to old (RDI)
        "mov [rdi + 0x00], rsp",
        "lea rax, [rip + 1f]",
        "mov [rdi + 0x08], rax",
        "mov [rdi + 0x10], rbx",
        "mov [rdi + 0x18], rbp",
        "mov [rdi + 0x20], r12",
        "mov [rdi + 0x28], r13",
        "mov [rdi + 0x30], r14",
        "mov [rdi + 0x38], r15",
        // Load callee-saved registers from new (RSI)
        "mov rsp, [rsi + 0x00]",
        "mov rax, [rsi + 0x08]",
        "mov rbx, [rsi + 0x10]",
        "mov rbp, [rsi + 0x18]",
        "mov r12, [rsi + 0x20]",
        "mov r13, [rsi + 0x28]",
        "mov r14, [rsi + 0x30]",
        "mov r15, [rsi + 0x38]",
        // Jump to new RIP
        "jmp rax",
        // Return point for the saved context
        "1:",
        "ret",
    );
}
