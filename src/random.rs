// Copyright 2014 Max Mertens
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// This file may not be copied, modified, or distributed except according to those terms.

//! Process-wide pseudo-random source, seeded once on first use from wall
//! clock time (mirrors `vsp_random_initialize`'s seed derivation). Not
//! cryptographic; used only for node IDs and handshake nonces.

use std::sync::{Mutex, OnceLock};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn rng() -> &'static Mutex<StdRng> {
    static RNG: OnceLock<Mutex<StdRng>> = OnceLock::new();
    RNG.get_or_init(|| {
        let seed = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0)
            ^ (std::process::id() as u64);
        Mutex::new(StdRng::seed_from_u64(seed))
    })
}

/// Draw the next 64 random bits from the process-wide generator.
pub fn next_u64() -> u64 {
    rng().lock().unwrap().gen()
}

/// Draw the next 16 random bits from the process-wide generator.
pub fn next_u16() -> u16 {
    rng().lock().unwrap().gen()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn successive_draws_differ() {
        let a = next_u64();
        let b = next_u64();
        assert_ne!(a, b);
    }
}
