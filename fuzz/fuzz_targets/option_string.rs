#![no_main]
//! Fuzz the key=value option string parser.
//!
//! Parsing and validation must return `Ok` or `Err`, never panic.

use leasepool::PoolOptions;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(s) = std::str::from_utf8(data) else {
        return;
    };

    if let Ok(options) = PoolOptions::from_option_string(s) {
        let _ = options.validate();
    }
});
