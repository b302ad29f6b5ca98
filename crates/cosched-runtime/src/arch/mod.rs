//! Architecture-specific context switching
//!
//! Each backend provides the same surface:
//!
//! - `Context` - callee-saved register block for one execution context
//! - `init_context` - prepare a fresh context that starts `entry(arg)` on a stack
//! - `context_switch` - save the current registers and resume another context
//!
//! Only callee-saved state is saved. Every switch happens through an
//! ordinary function call, so the compiler already treats caller-saved
//! registers as clobbered.

cfg_if::cfg_if! {
    if #[cfg(target_arch = "x86_64")] {
        mod x86_64;
        pub use self::x86_64::*;
    } else if #[cfg(target_arch = "aarch64")] {
        mod aarch64;
        pub use self::aarch64::*;
    } else {
        compile_error!("cosched-runtime supports x86_64 and aarch64 only");
    }
}

/// Entry point for a fresh context. It must never return.
pub type EntryFn = extern "C" fn(usize) -> !;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::Stack;
    use std::cell::Cell;
    use std::ptr::addr_of_mut;

    thread_local! {
        static TRACE: Cell<u32> = const { Cell::new(0) };
    }

    static mut MAIN: Context = Context::new();
    static mut CHILD: Context = Context::new();

    extern "C" fn child_entry(arg: usize) -> ! {
        TRACE.with(|t| t.set(t.get() + arg as u32));
        unsafe { context_switch(addr_of_mut!(CHILD), addr_of_mut!(MAIN)) };
        TRACE.with(|t| t.set(t.get() * 10));
        unsafe { context_switch(addr_of_mut!(CHILD), addr_of_mut!(MAIN)) };
        std::process::abort();
    }

    #[test]
    fn test_switch_round_trip() {
        let stack = Stack::allocate(64 * 1024).unwrap();
        unsafe {
            init_context(addr_of_mut!(CHILD), stack.top(), child_entry, 7);
            context_switch(addr_of_mut!(MAIN), addr_of_mut!(CHILD));
        }
        assert_eq!(TRACE.with(|t| t.get()), 7);

        unsafe { context_switch(addr_of_mut!(MAIN), addr_of_mut!(CHILD)) };
        assert_eq!(TRACE.with(|t| t.get()), 70);
    }
}
