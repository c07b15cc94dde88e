#![no_main]
//! Fuzz option validation with structured input.
//!
//! A validated config always has a target, a positive connection limit and
//! a positive leak check interval.

use arbitrary::Arbitrary;
use leasepool::{ConnectTarget, PoolOptions};
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Arbitrary)]
struct Input {
    host: Option<String>,
    socket_path: Option<String>,
    port: Option<u16>,
    connection_limit: Option<u32>,
    acquire_timeout: Option<i64>,
    pool_diagnostics: Option<bool>,
    slow_acquire_threshold: Option<i64>,
    leak_threshold: Option<i64>,
    leak_check_interval: Option<i64>,
    cleanup_threshold: Option<i64>,
}

fuzz_target!(|input: Input| {
    let mut options = PoolOptions::new();
    options.host = input.host;
    options.socket_path = input.socket_path.map(Into::into);
    options.port = input.port;
    options.connection_limit = input.connection_limit;
    options.acquire_timeout = input.acquire_timeout;
    options.pool_diagnostics = input.pool_diagnostics;
    options.slow_acquire_threshold = input.slow_acquire_threshold;
    options.leak_threshold = input.leak_threshold;
    options.leak_check_interval = input.leak_check_interval;
    options.cleanup_threshold = input.cleanup_threshold;

    let Ok(config) = options.validate() else {
        return;
    };

    assert!(config.connect().max_connections > 0);
    if config.diagnostics().enabled {
        assert!(!config.diagnostics().leak_check_interval.is_zero());
    }
    match &config.connect().target {
        ConnectTarget::Tcp { host, .. } => assert!(!host.trim().is_empty()),
        ConnectTarget::Socket(path) => assert!(!path.as_os_str().is_empty()),
    }
});
