#![no_main]
//! Fuzz JSON pool options.

use leasepool::PoolOptions;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(value) = serde_json::from_slice::<serde_json::Value>(data) else {
        return;
    };

    if let Ok(options) = PoolOptions::from_json(value) {
        let _ = options.validate();
    }
});
