// Copyright 2014 Max Mertens
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// This file may not be copied, modified, or distributed except according to those terms.

//! Mutable integer state with locking, broadcast-on-change and timed
//! wait-for-state. Coordinates the node's reception thread with whichever
//! API thread called `start`/`stop`/`connect`.
//!
//! Ports `vsp_cmcp_state` (mutex + condition variable around a plain
//! `volatile int`) onto `std::sync::{Mutex, Condvar}`.

use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::Instant;

pub struct StateCell<T> {
    value: Mutex<T>,
    condition: Condvar,
}

impl<T: Copy + PartialEq> StateCell<T> {
    pub fn new(initial: T) -> StateCell<T> {
        StateCell {
            value: Mutex::new(initial),
            condition: Condvar::new(),
        }
    }

    /// Snapshot the current value without holding the lock across the call.
    pub fn get(&self) -> T {
        *self.value.lock().unwrap()
    }

    /// Lock, assign, broadcast, unlock. A `set` that does not change the
    /// value still broadcasts: every set is a wake-up.
    pub fn set(&self, state: T) {
        let mut guard = self.value.lock().unwrap();
        *guard = state;
        self.condition.notify_all();
    }

    /// Acquire the lock explicitly, for callers that need to check the
    /// state and then wait on it atomically.
    pub fn lock(&self) -> MutexGuard<'_, T> {
        self.value.lock().unwrap()
    }

    /// Wait for any state change or `deadline`, whichever comes first.
    /// `guard` must be the lock returned by [`StateCell::lock`].
    /// Returns `true` if signaled, `false` on timeout.
    pub fn wait<'a>(
        &self,
        guard: MutexGuard<'a, T>,
        deadline: Option<Instant>,
    ) -> MutexGuard<'a, T> {
        match deadline {
            None => self.condition.wait(guard).unwrap(),
            Some(deadline) => {
                let now = Instant::now();
                let timeout = deadline.saturating_duration_since(now);
                let (guard, _timeout_result) =
                    self.condition.wait_timeout(guard, timeout).unwrap();
                guard
            }
        }
    }

    /// Loop on [`StateCell::wait`] until `target` is observed or `deadline`
    /// elapses. `guard` must be the lock returned by [`StateCell::lock`].
    /// Returns `true` iff `target` was observed in time.
    pub fn await_state<'a>(
        &self,
        mut guard: MutexGuard<'a, T>,
        target: T,
        deadline: Option<Instant>,
    ) -> (MutexGuard<'a, T>, bool) {
        loop {
            if *guard == target {
                return (guard, true);
            }
            if let Some(deadline) = deadline {
                if Instant::now() >= deadline {
                    return (guard, *guard == target);
                }
            }
            guard = self.wait(guard, deadline);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[derive(Copy, Clone, PartialEq, Debug)]
    enum Flag {
        Off,
        On,
    }

    #[test]
    fn get_reflects_the_last_set_value() {
        let cell = StateCell::new(Flag::Off);
        assert_eq!(Flag::Off, cell.get());
        cell.set(Flag::On);
        assert_eq!(Flag::On, cell.get());
    }

    #[test]
    fn await_state_returns_success_once_target_is_set() {
        let cell = Arc::new(StateCell::new(Flag::Off));
        let setter = cell.clone();

        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            setter.set(Flag::On);
        });

        let guard = cell.lock();
        let (_guard, reached) =
            cell.await_state(guard, Flag::On, Some(Instant::now() + Duration::from_secs(2)));
        assert!(reached);

        handle.join().unwrap();
    }

    #[test]
    fn await_state_times_out_without_becoming_true() {
        let cell = StateCell::new(Flag::Off);
        let guard = cell.lock();
        let (_guard, reached) =
            cell.await_state(guard, Flag::On, Some(Instant::now() + Duration::from_millis(30)));
        assert!(!reached);
    }
}
