//! Process context: one scheduler plus the event loop it waits on
//!
//! `Runtime` ties the scheduler's idle wait to epoll, so a coroutine
//! suspended on a descriptor wakes as soon as the descriptor is ready.
//! While the runtime is driving, the interception layer finds it through
//! `tls::with_runtime`.

use std::rc::Rc;

use cosched_core::{kinfo, kprint};
use cosched_core::{CoroHandle, SchedResult};

use crate::config::RuntimeConfig;
use crate::event::EventLoop;
use crate::scheduler::{Scheduler, Stats};
use crate::tls;

/// Scheduler, event loop and configuration for one thread.
pub struct Runtime {
    config: RuntimeConfig,
    events: Rc<EventLoop>,
    sched: Scheduler,
}

impl Runtime {
    /// Build a runtime; fails on invalid configuration or when the
    /// multiplexer cannot be created.
    pub fn new(config: RuntimeConfig) -> SchedResult<Self> {
        config.validate()?;
        if config.debug_logging {
            kprint::set_log_level(kprint::LogLevel::Debug);
        }

        let events = Rc::new(EventLoop::new(config.effective_max_fds())?);
        let sched = Scheduler::with_policy(&config, Box::new(events.clone()))?;

        kinfo!(
            "runtime ready: {} coroutines, {} fds",
            config.max_coroutines,
            config.effective_max_fds()
        );

        Ok(Self { config, events, sched })
    }

    /// `new` with `RuntimeConfig::from_env()`.
    pub fn from_env() -> SchedResult<Self> {
        Self::new(RuntimeConfig::from_env())
    }

    #[inline]
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    #[inline]
    pub fn scheduler(&self) -> &Scheduler {
        &self.sched
    }

    #[inline]
    pub fn events(&self) -> &EventLoop {
        &self.events
    }

    /// See `Scheduler::dispatch`.
    pub fn dispatch<F>(&self, f: F) -> SchedResult<CoroHandle>
    where
        F: FnOnce() + 'static,
    {
        self.sched.dispatch(f)
    }

    pub fn stats(&self) -> Stats {
        self.sched.stats()
    }

    /// One scheduling iteration with this runtime entered.
    pub fn tick(&self) {
        let _guard = tls::enter_runtime(self);
        self.sched.tick();
    }

    /// Drive until every coroutine has finished.
    pub fn run_until_idle(&self) {
        while !self.sched.is_quiescent() {
            let _guard = tls::enter_runtime(self);
            self.sched.step(true);
        }
    }

    /// Drive forever.
    pub fn run_cycle(&self) -> ! {
        loop {
            self.tick();
        }
    }
}
