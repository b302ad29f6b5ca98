//! aarch64 context switching (AAPCS64)

use std::arch::naked_asm;

use super::EntryFn;

/// Saved execution state of a suspended context.
///
/// x19-x29, the link register, sp and the low halves of v8-v15 are
/// callee-saved under AAPCS64. Offsets are used by the assembly below.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct Context {
    pub sp: u64,       // 0x00
    pub lr: u64,       // 0x08
    pub x: [u64; 11],  // 0x10 x19..x29
    pub d: [u64; 8],   // 0x68 d8..d15
}

impl Context {
    pub const fn new() -> Self {
        Self { sp: 0, lr: 0, x: [0; 11], d: [0; 8] }
    }
}

/// Prepare `ctx` so that switching into it runs `entry(arg)` on the stack
/// ending at `stack_top`.
///
/// # Safety
///
/// Same contract as the x86_64 backend.
pub unsafe fn init_context(ctx: *mut Context, stack_top: *mut u8, entry: EntryFn, arg: usize) {
    let top = (stack_top as usize) & !0xF;
    let sp = top - 16;

    let slots = sp as *mut u64;
    slots.write(arg as u64);
    slots.add(1).write(entry as *const () as usize as u64);

    let ctx = &mut *ctx;
    *ctx = Context::new();
    ctx.sp = sp as u64;
    ctx.lr = coroutine_trampoline as *const () as usize as u64;
}

#[unsafe(naked)]
unsafe extern "C" fn coroutine_trampoline() {
    naked_asm!(
        "ldp x0, x9, [sp], #16",
        "mov x29, xzr",
        "mov x30, xzr",
        "blr x9",
        "brk #0x1",
    );
}

/// Save the current context into `save` and resume `restore`.
///
/// # Safety
///
/// Same contract as the x86_64 backend.
#[unsafe(naked)]
pub unsafe extern "C" fn context_switch(_save: *mut Context, _restore: *const Context) {
    naked_asm!(
        "mov x9, sp",
        "str x9, [x0, #0x00]",
        "str x30, [x0, #0x08]",
        "stp x19, x20, [x0, #0x10]",
        "stp x21, x22, [x0, #0x20]",
        "stp x23, x24, [x0, #0x30]",
        "stp x25, x26, [x0, #0x40]",
        "stp x27, x28, [x0, #0x50]",
        "str x29, [x0, #0x60]",
        "stp d8, d9, [x0, #0x68]",
        "stp d10, d11, [x0, #0x78]",
        "stp d12, d13, [x0, #0x88]",
        "stp d14, d15, [x0, #0x98]",
        "ldr x9, [x1, #0x00]",
        "mov sp, x9",
        "ldr x30, [x1, #0x08]",
        "ldp x19, x20, [x1, #0x10]",
        "ldp x21, x22, [x1, #0x20]",
        "ldp x23, x24, [x1, #0x30]",
        "ldp x25, x26, [x1, #0x40]",
        "ldp x27, x28, [x1, #0x50]",
        "ldr x29, [x1, #0x60]",
        "ldp d8, d9, [x1, #0x68]",
        "ldp d10, d11, [x1, #0x78]",
        "ldp d12, d13, [x1, #0x88]",
        "ldp d14, d15, [x1, #0x98]",
        "ret",
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem::{offset_of, size_of};

    extern "C" fn never(_: usize) -> ! {
        std::process::abort()
    }

    #[test]
    fn test_layout() {
        assert_eq!(offset_of!(Context, sp), 0x00);
        assert_eq!(offset_of!(Context, lr), 0x08);
        assert_eq!(offset_of!(Context, x), 0x10);
        assert_eq!(offset_of!(Context, d), 0x68);
        assert_eq!(size_of::<Context>(), 0xa8);
    }

    #[test]
    fn test_init_context_layout() {
        let mut stack = vec![0u64; 64];
        let top = unsafe { stack.as_mut_ptr().add(64) } as *mut u8;
        let mut ctx = Context::new();
        unsafe { init_context(&mut ctx, top, never, 42) };

        assert_eq!(ctx.sp % 16, 0);
        assert_eq!(ctx.lr, coroutine_trampoline as *const () as usize as u64);
        let sp = ctx.sp as *const u64;
        unsafe {
            assert_eq!(*sp, 42);
            assert_eq!(*sp.add(1), never as *const () as usize as u64);
        }
    }
}
