// Copyright 2014 Max Mertens
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// This file may not be copied, modified, or distributed except according to those terms.

//! Wall-clock helpers. Wraps `std::time::Instant` the way `vsp_time` wraps
//! `clock_gettime`: a handful of free functions, no state of their own.

use std::time::{Duration, Instant};

/// Current monotonic instant.
pub fn now() -> Instant {
    Instant::now()
}

/// An instant `millis` milliseconds from now.
pub fn deadline(millis: u64) -> Instant {
    now() + Duration::from_millis(millis)
}

/// An instant `duration` from now.
pub fn deadline_after(duration: Duration) -> Instant {
    now() + duration
}

/// Whether `instant` is at or before the current time.
pub fn has_passed(instant: Instant) -> bool {
    now() >= instant
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn a_deadline_in_the_future_has_not_passed_yet() {
        let d = deadline(60_000);
        assert!(!has_passed(d));
    }

    #[test]
    fn a_deadline_of_zero_millis_has_passed() {
        let d = deadline(0);
        std::thread::sleep(Duration::from_millis(1));
        assert!(has_passed(d));
    }
}
