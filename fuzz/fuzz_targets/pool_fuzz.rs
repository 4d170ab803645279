//! Fuzz test for the semaphore pool decoder
//!
//! Pools are read back from a store other processes write to, so the decoder
//! sees whatever is there. It must reject bad input with an error, and every
//! pool it accepts must report a free count and first free slot that agree.
//!
//! Run with: cargo +nightly fuzz run pool_fuzz -- -max_total_time=60

#![no_main]

use larder_coordination::decode_pool;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(wire) = std::str::from_utf8(data) else {
        return;
    };

    if let Ok(pool) = decode_pool("fuzz", wire) {
        let free = pool.free_count(0);
        assert!(free <= pool.len());
        if let Some(index) = pool.first_free(0) {
            assert!(index < pool.len());
        } else {
            assert_eq!(free, 0);
        }
    }
});
