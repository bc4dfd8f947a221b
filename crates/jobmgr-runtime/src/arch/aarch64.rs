//! aarch64 context switching
//!
//! TODO: port the switch assembly (x29/x30 + d8-d15 save set)

use super::SavedRegs;

/// Initialize a fresh fiber context
pub unsafe fn init_context(
    _regs: *mut SavedRegs,
    _stack_top: *mut u8,
    _entry_fn: usize,
    _entry_arg: usize,
) {
    todo!("aarch64 init_context not yet implemented")
}

/// Switch contexts
pub unsafe extern "C" fn context_switch(_old: *mut SavedRegs, _new: *const SavedRegs) {
    todo!("aarch64 context_switch not yet implemented")
}
