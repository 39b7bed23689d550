// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Compile-time configuration.
//!
//! Sizes that determine the layout of statics (pool geometry, queue depth)
//! are plain constants, because they have to be known at compile time. The
//! timing values are also gathered into a [`Config`], which [`System::new`]
//! checks before any task is created, so a board can tweak them without
//! editing this file.
//!
//! All times are in ticks. The reference board ticks at 1 kHz.
//!
//! [`System::new`]: crate::system::System::new

use crate::breath::LedMode;
use crate::time::Millis;

/// Number of blocks in the reference pool.
pub const POOL_BLOCKS: usize = 10;
/// Size of each pool block, in bytes.
pub const BLOCK_SIZE: usize = 32;

/// Depth of the key-state queue.
pub const KEY_QUEUE_CAPACITY: usize = 4;

/// Allocations per size class in one latency probe.
pub const TEST_COUNT: usize = 50;
/// Small latency-probe size class, in bytes.
pub const TEST_SMALL_SIZE: usize = 32;
/// Medium latency-probe size class, in bytes.
pub const TEST_MEDIUM_SIZE: usize = 128;
/// Large latency-probe size class, in bytes.
pub const TEST_LARGE_SIZE: usize = 512;

/// Number of blocks the pool exerciser holds at once.
pub const POOL_TEST_BLOCKS: usize = 5;

/// Brightness ceiling for the breath ramp.
pub const BREATH_MAX: u8 = 100;
/// Brightness change per breath update.
pub const BREATH_STEP: u8 = 10;

/// Timing knobs checked by `System::new`.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Config {
    /// Period of the breath timer.
    pub breath_period: Millis,
    /// Period of the status timer.
    pub status_period: Millis,
    /// Interval between key samples.
    pub debounce: Millis,
    /// Delay before the monitor and diagnostic tasks start.
    pub start_delay: Millis,
    /// Interval between monitor and heap reports.
    pub monitor_period: Millis,
    /// Delay between steps of the pool exerciser.
    pub pool_step_delay: Millis,
    /// Rest between pool exerciser rounds.
    pub pool_rest: Millis,
    /// Interval between latency probes.
    pub latency_period: Millis,
    /// What the dimmable LED does.
    pub led_mode: LedMode,
}

impl Config {
    /// The reference timing.
    pub const DEFAULT: Self = Self {
        breath_period: Millis(1000),
        status_period: Millis(1000),
        debounce: Millis(20),
        start_delay: Millis(1000),
        monitor_period: Millis(2000),
        pool_step_delay: Millis(200),
        pool_rest: Millis(5000),
        latency_period: Millis(10000),
        led_mode: LedMode::Breath,
    };

    /// Checks that every periodic loop sleeps at least one tick per round.
    ///
    /// On failure, returns the name of the timer or task that would spin.
    pub fn validate(&self) -> Result<(), &'static str> {
        let periodic = [
            ("BreathTimer", self.breath_period),
            ("StatusTimer", self.status_period),
            ("KEYTask", self.debounce),
            ("MonitorTask", self.monitor_period),
            ("MemPoolTestTask", self.pool_rest),
            ("MemTestTask", self.latency_period),
        ];
        for (name, period) in periodic {
            if period == Millis(0) {
                return Err(name);
            }
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::DEFAULT
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_valid() {
        assert_eq!(Config::DEFAULT.validate(), Ok(()));
    }

    #[test]
    fn zero_period_is_rejected() {
        let c = Config {
            status_period: Millis(0),
            ..Config::DEFAULT
        };
        assert_eq!(c.validate(), Err("StatusTimer"));

        let c = Config {
            debounce: Millis(0),
            ..Config::DEFAULT
        };
        assert_eq!(c.validate(), Err("KEYTask"));
    }
}
