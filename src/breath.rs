// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! LED behavior state: static, blinking, or breathing.
//!
//! # Sharing discipline
//!
//! There is exactly one writer, the breath timer callback, which calls
//! [`BreathState::advance`]. There is exactly one reader, the LED control
//! task, which calls [`BreathState::snapshot`]. Every field is its own atomic
//! and there is no lock. A reader can therefore observe the brightness from
//! one update with the direction from the next; the control task only uses
//! the brightness, and the status line tolerates the skew.
//!
//! Adding a second writer would break this. Put the state behind the pool's
//! kind of mutex first.

use portable_atomic::{AtomicBool, AtomicU32, AtomicU8, Ordering};

/// What the LED is doing.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[repr(u8)]
pub enum LedMode {
    /// Held at full brightness.
    Static = 0,
    /// Alternating between off and full brightness each update.
    Blink = 1,
    /// Ramping up and down in a triangle.
    Breath = 2,
}

impl LedMode {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => LedMode::Static,
            1 => LedMode::Blink,
            _ => LedMode::Breath,
        }
    }
}

impl core::fmt::Display for LedMode {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(match self {
            LedMode::Static => "static",
            LedMode::Blink => "blink",
            LedMode::Breath => "breath",
        })
    }
}

/// Ramp direction.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Direction {
    /// Brightness increasing.
    Up,
    /// Brightness decreasing.
    Down,
}

impl core::fmt::Display for Direction {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(match self {
            Direction::Up => "up",
            Direction::Down => "down",
        })
    }
}

/// A consistent-enough copy of the state for the reader.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct BreathSnapshot {
    /// Current mode.
    pub mode: LedMode,
    /// Brightness in `0..=max`.
    pub brightness: u8,
    /// Direction of the next breath step.
    pub direction: Direction,
    /// Number of blink updates so far.
    pub blinks: u32,
}

/// Single-writer, single-reader LED behavior state. See the module docs.
#[derive(Debug)]
pub struct BreathState {
    mode: AtomicU8,
    brightness: AtomicU8,
    /// `true` while ramping up.
    rising: AtomicBool,
    blinks: AtomicU32,
    max: u8,
    step: u8,
}

impl BreathState {
    /// Creates the state at brightness 0, ramping up.
    ///
    /// `step` of zero is treated as one so the ramp always moves.
    pub const fn new(mode: LedMode, max: u8, step: u8) -> Self {
        let step = if step == 0 { 1 } else { step };
        Self {
            mode: AtomicU8::new(mode as u8),
            brightness: AtomicU8::new(0),
            rising: AtomicBool::new(true),
            blinks: AtomicU32::new(0),
            max,
            step,
        }
    }

    /// Maximum brightness.
    pub fn max(&self) -> u8 {
        self.max
    }

    /// Performs one update. Only the breath timer callback may call this.
    ///
    /// - Static: brightness is pinned at max.
    /// - Blink: brightness alternates between 0 and max; the blink counter
    ///   goes up by one.
    /// - Breath: brightness moves one step in the current direction. The
    ///   step that lands on max turns the direction down; the step that
    ///   lands on 0 turns it up.
    pub fn advance(&self) {
        let b = self.brightness.load(Ordering::Relaxed);
        match LedMode::from_u8(self.mode.load(Ordering::Relaxed)) {
            LedMode::Static => {
                self.brightness.store(self.max, Ordering::Relaxed);
            }
            LedMode::Blink => {
                let next = if b == 0 { self.max } else { 0 };
                self.brightness.store(next, Ordering::Relaxed);
                self.blinks.fetch_add(1, Ordering::Relaxed);
            }
            LedMode::Breath => {
                if self.rising.load(Ordering::Relaxed) {
                    let next = b.saturating_add(self.step).min(self.max);
                    self.brightness.store(next, Ordering::Relaxed);
                    if next == self.max {
                        self.rising.store(false, Ordering::Relaxed);
                    }
                } else {
                    let next = b.saturating_sub(self.step);
                    self.brightness.store(next, Ordering::Relaxed);
                    if next == 0 {
                        self.rising.store(true, Ordering::Relaxed);
                    }
                }
            }
        }
    }

    /// Reads the state. Only the LED control and status tasks call this.
    pub fn snapshot(&self) -> BreathSnapshot {
        BreathSnapshot {
            mode: LedMode::from_u8(self.mode.load(Ordering::Relaxed)),
            brightness: self.brightness.load(Ordering::Relaxed),
            direction: if self.rising.load(Ordering::Relaxed) {
                Direction::Up
            } else {
                Direction::Down
            },
            blinks: self.blinks.load(Ordering::Relaxed),
        }
    }

    /// Brightness as a percentage of max, for a PWM duty cycle.
    pub fn percent(&self) -> u8 {
        if self.max == 0 {
            return 0;
        }
        let b = u16::from(self.brightness.load(Ordering::Relaxed));
        (b * 100 / u16::from(self.max)) as u8
    }
}

#[cfg(test)]
mod tests {
    use std::vec::Vec;

    use super::*;

    #[test]
    fn breath_is_a_closed_triangle() {
        let s = BreathState::new(LedMode::Breath, 100, 10);
        assert_eq!(s.snapshot().brightness, 0);
        assert_eq!(s.snapshot().direction, Direction::Up);

        let mut seen = Vec::new();
        for _ in 0..20 {
            s.advance();
            seen.push(s.snapshot().brightness);
        }
        let expected: Vec<u8> = (1..=10)
            .map(|i| i * 10)
            .chain((0..10).rev().map(|i| i * 10))
            .collect();
        assert_eq!(seen, expected);
        // Back at zero and heading up again.
        assert_eq!(s.snapshot().direction, Direction::Up);
        s.advance();
        assert_eq!(s.snapshot().brightness, 10);
    }

    #[test]
    fn reverses_on_reaching_max() {
        let s = BreathState::new(LedMode::Breath, 100, 10);
        for _ in 0..10 {
            s.advance();
        }
        assert_eq!(s.snapshot().brightness, 100);
        assert_eq!(s.snapshot().direction, Direction::Down);
        s.advance();
        assert_eq!(s.snapshot().brightness, 90);
    }

    #[test]
    fn uneven_step_clamps_to_bounds() {
        let s = BreathState::new(LedMode::Breath, 25, 10);
        let seen: Vec<u8> = (0..6)
            .map(|_| {
                s.advance();
                s.snapshot().brightness
            })
            .collect();
        assert_eq!(seen, [10, 20, 25, 15, 5, 0]);
    }

    #[test]
    fn blink_alternates_and_counts() {
        let s = BreathState::new(LedMode::Blink, 100, 10);
        s.advance();
        assert_eq!(s.snapshot().brightness, 100);
        s.advance();
        assert_eq!(s.snapshot().brightness, 0);
        assert_eq!(s.snapshot().blinks, 2);
    }

    #[test]
    fn static_holds_max() {
        let s = BreathState::new(LedMode::Static, 80, 10);
        s.advance();
        s.advance();
        assert_eq!(s.snapshot().brightness, 80);
        assert_eq!(s.percent(), 100);
    }
}
