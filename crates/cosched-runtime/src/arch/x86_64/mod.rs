//! x86_64 context switching (System V AMD64)

use std::arch::naked_asm;

use super::EntryFn;

/// Saved execution state of a suspended context.
///
/// Field offsets are used by the assembly below; keep the layout in sync.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct Context {
    pub rsp: u64, // 0x00
    pub rip: u64, // 0x08
    pub rbx: u64, // 0x10
    pub rbp: u64, // 0x18
    pub r12: u64, // 0x20
    pub r13: u64, // 0x28
    pub r14: u64, // 0x30
    pub r15: u64, // 0x38
}

impl Context {
    pub const fn new() -> Self {
        Self { rsp: 0, rip: 0, rbx: 0, rbp: 0, r12: 0, r13: 0, r14: 0, r15: 0 }
    }
}

/// Prepare `ctx` so that switching into it runs `entry(arg)` on the stack
/// ending at `stack_top`.
///
/// The argument and the entry address are stored in the two highest
/// words of the stack; the trampoline pops them, leaving the stack
/// 16-byte aligned before the call.
///
/// # Safety
///
/// `ctx` must be valid for writes and `stack_top` must be the exclusive
/// upper end of a writable stack of at least a few hundred bytes.
pub unsafe fn init_context(ctx: *mut Context, stack_top: *mut u8, entry: EntryFn, arg: usize) {
    let top = (stack_top as usize) & !0xF;
    let sp = top - 16;

    let slots = sp as *mut u64;
    slots.write(arg as u64);
    slots.add(1).write(entry as *const () as usize as u64);

    let ctx = &mut *ctx;
    *ctx = Context::new();
    ctx.rsp = sp as u64;
    ctx.rip = coroutine_trampoline as *const () as usize as u64;
}

/// First code run on a fresh stack: `entry(arg)`, which never returns.
#[unsafe(naked)]
unsafe extern "C" fn coroutine_trampoline() {
    naked_asm!(
        "pop rdi",
        "pop rax",
        "xor ebp, ebp",
        "call rax",
        "ud2",
    );
}

/// Save the current context into `save` and resume `restore`.
///
/// Returns when some other context switches back into `save`.
///
/// # Safety
///
/// Both pointers must be valid; `restore` must hold a context produced by
/// `init_context` or by an earlier `context_switch`, whose stack is still
/// mapped.
#[unsafe(naked)]
pub unsafe extern "C" fn context_switch(_save: *mut Context, _restore: *const Context) {
    naked_asm!(
        // Save callee-saved registers into `save` (RDI)
        "mov [rdi + 0x00], rsp",
        "lea rax, [rip + 1f]",
        "mov [rdi + 0x08], rax",
        "mov [rdi + 0x10], rbx",
        "mov [rdi + 0x18], rbp",
        "mov [rdi + 0x20], r12",
        "mov [rdi + 0x28], r13",
        "mov [rdi + 0x30], r14",
        "mov [rdi + 0x38], r15",
        // Load from `restore` (RSI)
        "mov rsp, [rsi + 0x00]",
        "mov rax, [rsi + 0x08]",
        "mov rbx, [rsi + 0x10]",
        "mov rbp, [rsi + 0x18]",
        "mov r12, [rsi + 0x20]",
        "mov r13, [rsi + 0x28]",
        "mov r14, [rsi + 0x30]",
        "mov r15, [rsi + 0x38]",
        "jmp rax",
        // Resumed
        "1:",
        "ret",
    );
}
