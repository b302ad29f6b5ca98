//! Echo server on cosched
//!
//! One coroutine accepts; every connection gets its own coroutine. When
//! the coroutine pool is full the connection is closed straight away.
//!
//! Usage:
//!     cargo build --release -p cosched-echo
//!     COS_LOG_LEVEL=info ./target/release/echo [port] [max_coroutines]
//!
//! Test with:
//!     echo "hello" | nc -q1 localhost 9999

use std::io::{self, Read, Write};

use cosched::{kerror, kinfo, kwarn};
use cosched::{CoListener, CoStream, Runtime, RuntimeConfig, SchedError};

const BUF_SIZE: usize = 4096;
const ERROR_BACKOFF_MS: u64 = 200;
const STATS_INTERVAL_MS: u64 = 10_000;

fn serve(mut stream: CoStream) {
    let mut buf = [0u8; BUF_SIZE];
    loop {
        let n = match stream.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            // Idle connection
            Err(e) if e.kind() == io::ErrorKind::TimedOut => break,
            Err(e) => {
                kwarn!("read failed: {}", e);
                break;
            }
        };
        if let Err(e) = stream.write_all(&buf[..n]) {
            kwarn!("write failed: {}", e);
            break;
        }
    }
}

fn accept_loop(listener: CoListener) {
    loop {
        match listener.accept() {
            Ok((stream, peer)) => match cosched::dispatch(move || serve(stream)) {
                Ok(_) => {}
                // Dropping the closure closed the stream
                Err(SchedError::Busy) => kwarn!("system busy, rejected {}", peer),
                Err(e) => kerror!("dispatch failed: {}", e),
            },
            Err(e) if e.kind() == io::ErrorKind::TimedOut => continue,
            Err(e) => {
                kwarn!("accept failed: {}", e);
                let _ = cosched::suspend_for(ERROR_BACKOFF_MS);
            }
        }
    }
}

fn report_stats() {
    loop {
        let _ = cosched::suspend_for(STATS_INTERVAL_MS);
        if let Some(stats) = cosched::runtime::tls::with_scheduler(|s| s.stats()) {
            kinfo!(
                "coroutines: total={} idle={} active={} suspended={} stacks={}",
                stats.total,
                stats.idle,
                stats.active,
                stats.suspended,
                stats.stacks_allocated
            );
        }
    }
}

fn main() {
    cosched::kprint::init();

    let mut args = std::env::args().skip(1);
    let port: u16 = args.next().and_then(|s| s.parse().ok()).unwrap_or(9999);

    let mut config = RuntimeConfig::from_env();
    if let Some(max) = args.next().and_then(|s| s.parse().ok()) {
        config = config.max_coroutines(max);
    }
    if config.debug_logging {
        config.print();
    }

    let rt = match Runtime::new(config) {
        Ok(rt) => rt,
        Err(e) => {
            kerror!("runtime init failed: {}", e);
            std::process::exit(1);
        }
    };

    let listener = match CoListener::bind(("0.0.0.0", port)) {
        Ok(l) => l,
        Err(e) => {
            kerror!("bind to port {} failed: {}", port, e);
            std::process::exit(1);
        }
    };
    kinfo!("echo listening on port {}", port);

    if let Err(e) = rt.dispatch(move || accept_loop(listener)) {
        kerror!("cannot start accept loop: {}", e);
        std::process::exit(1);
    }
    if let Err(e) = rt.dispatch(report_stats) {
        kwarn!("stats reporter not started: {}", e);
    }

    rt.run_cycle()
}
