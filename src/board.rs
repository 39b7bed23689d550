// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The seam between the tasks and the board's pins.
//!
//! Tasks never see a HAL type. They talk to a [`Leds`] implementation, which
//! is shared by reference across every task that drives an LED, and read the
//! key through [`read_key`]. [`LedBank`] implements `Leds` over any
//! `embedded-hal` 1.0 output pins and PWM channel.
//!
//! Pin errors are not something a task can do anything about, so they are
//! logged at `warn` and otherwise ignored.

use core::cell::RefCell;

use critical_section::Mutex as CsMutex;
use embedded_hal::digital::{Error as _, InputPin, StatefulOutputPin};
use embedded_hal::pwm::{Error as _, SetDutyCycle};

/// Which LED.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Led {
    /// Toggled by the LED1 and interrupt LED tasks.
    Led1,
    /// Toggled by the LED2 and interrupt LED tasks.
    Led2,
}

/// LED outputs shared between tasks.
pub trait Leds: Sync {
    /// Flips `led`.
    fn toggle(&self, led: Led);

    /// Sets the dimmable LED's duty cycle, in percent.
    fn set_brightness(&self, percent: u8);
}

/// [`Leds`] over two `embedded-hal` output pins and a PWM channel.
///
/// Each pin sits in its own critical-section mutex, so any task (or an ISR)
/// can drive it through `&self`.
pub struct LedBank<L1, L2, P> {
    led1: CsMutex<RefCell<L1>>,
    led2: CsMutex<RefCell<L2>>,
    pwm: CsMutex<RefCell<P>>,
}

impl<L1, L2, P> core::fmt::Debug for LedBank<L1, L2, P> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("LedBank").finish_non_exhaustive()
    }
}

impl<L1, L2, P> LedBank<L1, L2, P> {
    /// Takes ownership of the pins.
    pub const fn new(led1: L1, led2: L2, pwm: P) -> Self {
        Self {
            led1: CsMutex::new(RefCell::new(led1)),
            led2: CsMutex::new(RefCell::new(led2)),
            pwm: CsMutex::new(RefCell::new(pwm)),
        }
    }

    /// Gives the pins back.
    pub fn release(self) -> (L1, L2, P) {
        (
            self.led1.into_inner().into_inner(),
            self.led2.into_inner().into_inner(),
            self.pwm.into_inner().into_inner(),
        )
    }
}

impl<L1, L2, P> Leds for LedBank<L1, L2, P>
where
    L1: StatefulOutputPin + Send,
    L2: StatefulOutputPin + Send,
    P: SetDutyCycle + Send,
{
    fn toggle(&self, led: Led) {
        let r = critical_section::with(|cs| match led {
            Led::Led1 => self.led1.borrow_ref_mut(cs).toggle().map_err(|e| e.kind()),
            Led::Led2 => self.led2.borrow_ref_mut(cs).toggle().map_err(|e| e.kind()),
        });
        if let Err(kind) = r {
            log::warn!("board: toggling {:?} failed: {:?}", led, kind);
        }
    }

    fn set_brightness(&self, percent: u8) {
        let percent = percent.min(100);
        let r = critical_section::with(|cs| {
            self.pwm
                .borrow_ref_mut(cs)
                .set_duty_cycle_percent(percent)
                .map_err(|e| e.kind())
        });
        if let Err(kind) = r {
            log::warn!("board: setting duty cycle failed: {:?}", kind);
        }
    }
}

/// Samples the key: 1 for high (released), 0 for low (pressed).
///
/// A read error counts as released, so a flaky pin can't fake a press.
pub fn read_key<K: InputPin>(key: &mut K) -> u8 {
    match key.is_high() {
        Ok(true) => 1,
        Ok(false) => 0,
        Err(e) => {
            log::warn!("board: reading key failed: {:?}", e.kind());
            1
        }
    }
}
