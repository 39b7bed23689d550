// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The signal bus: one key event, three independent channels.
//!
//! A key press is announced on three primitives at once:
//!
//! - the [`Gate`], which wakes the LED1 task once per press;
//! - the [`EventFlags`] register, which any number of tasks wait on by mask;
//! - the key-state [`Queue`], which holds raw pin samples for a logger.
//!
//! They are fed by the same trigger but are otherwise unrelated. A task
//! waiting on one channel learns nothing about when a task on another
//! channel will run.
//!
//! There are two ways in. Task code that has detected a press calls
//! [`SignalBus::post_key_event`], which touches all three channels. The
//! external-interrupt handler calls [`SignalBus::on_key_interrupt`], which
//! only sets flag bits, because that is the only channel an ISR may touch
//! here.

use crate::config::KEY_QUEUE_CAPACITY;
use crate::flags::EventFlags;
use crate::gate::Gate;
use crate::queue::Queue;

/// Set by the key task; consumed by nothing in the reference roster.
pub const LED1_EVENT: u32 = 0x01;
/// Set by the key task; wakes the LED2 task.
pub const LED2_EVENT: u32 = 0x02;
/// Set by the key interrupt; wakes the interrupt LED task.
pub const INT_LED1_EVENT: u32 = 0x04;
/// Set by the key interrupt; wakes the interrupt LED task.
pub const INT_LED2_EVENT: u32 = 0x08;
/// Set by the breath timer; wakes the LED control task.
pub const BREATH_EVENT: u32 = 0x10;
/// Set by the status timer; wakes the status task.
pub const STATUS_EVENT: u32 = 0x20;

/// Bits raised by the task-context key path.
pub const KEY_TASK_EVENTS: u32 = LED1_EVENT | LED2_EVENT;
/// Bits raised by the interrupt-context key path.
pub const KEY_INTERRUPT_EVENTS: u32 = INT_LED1_EVENT | INT_LED2_EVENT;

/// Identifies an external interrupt line, as handed to the EXTI callback.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct PinId(pub u16);

/// What each channel did with one posted key event.
///
/// Nothing here is an error. A full gate means the press coalesced with one
/// that hasn't been consumed yet; a full queue means the sample was dropped.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct KeyFanout {
    /// The gate gained a permit.
    pub gate_released: bool,
    /// The key state was queued.
    pub queued: bool,
    /// The flag register after the set.
    pub flags: u32,
}

/// The three channels fed by the key, plus the key pin's interrupt line.
#[derive(Debug)]
pub struct SignalBus {
    /// Binary gate for the LED1 task.
    pub gate: Gate,
    /// Shared event-flag register.
    pub flags: EventFlags,
    /// Raw key samples, newest last.
    pub keys: Queue<u8, KEY_QUEUE_CAPACITY>,
    key_pin: PinId,
}

impl SignalBus {
    /// Creates a bus with every channel empty. Interrupts are only honored
    /// for `key_pin`.
    pub const fn new(key_pin: PinId) -> Self {
        Self {
            gate: Gate::binary(),
            flags: EventFlags::new(),
            keys: Queue::new(),
            key_pin,
        }
    }

    /// The interrupt line the bus answers to.
    pub fn key_pin(&self) -> PinId {
        self.key_pin
    }

    /// Announces a debounced key press from task context.
    ///
    /// Releases the gate, queues `state` if there is room, and sets
    /// [`KEY_TASK_EVENTS`]. Never waits.
    pub fn post_key_event(&self, state: u8) -> KeyFanout {
        let queued = self.keys.try_push(state).is_ok();
        let gate_released = self.gate.release().is_ok();
        let flags = self.flags.set(KEY_TASK_EVENTS);
        if !queued {
            log::trace!("bus: key queue full, sample dropped");
        }
        KeyFanout {
            gate_released,
            queued,
            flags,
        }
    }

    /// External-interrupt entry point.
    ///
    /// For the key pin, sets [`KEY_INTERRUPT_EVENTS`] through the ISR-safe
    /// path and returns whether a blocked task's wait now matches; the handler
    /// should request a context switch on exit if so. Other pins are ignored and
    /// return `false`.
    pub fn on_key_interrupt(&self, pin: PinId) -> bool {
        if pin != self.key_pin {
            return false;
        }
        log::trace!("bus: key interrupt");
        self.flags.set_from_isr(KEY_INTERRUPT_EVENTS)
    }
}

#[cfg(test)]
mod tests {
    use core::future::Future;
    use core::pin::pin;
    use core::task::Context;

    use super::*;
    use crate::exec::tests::spy_waker;
    use crate::flags::WaitFor;

    const KEY: PinId = PinId(0x0001);

    #[test]
    fn one_press_feeds_each_channel_once() {
        let bus = SignalBus::new(KEY);
        let report = bus.post_key_event(0);

        assert_eq!(
            report,
            KeyFanout {
                gate_released: true,
                queued: true,
                flags: LED1_EVENT | LED2_EVENT,
            }
        );
        assert_eq!(bus.gate.permits_available(), 1);
        assert_eq!(bus.keys.len(), 1);
        assert_eq!(bus.keys.try_pop(), Some(0));
        assert_eq!(bus.flags.get(), KEY_TASK_EVENTS);
    }

    #[test]
    fn full_queue_drops_sample_but_still_signals() {
        let bus = SignalBus::new(KEY);
        for _ in 0..KEY_QUEUE_CAPACITY {
            bus.keys.try_push(1).unwrap();
        }
        let report = bus.post_key_event(0);
        assert!(!report.queued);
        assert!(report.gate_released);
        assert_eq!(report.flags & LED2_EVENT, LED2_EVENT);
        assert_eq!(bus.keys.len(), KEY_QUEUE_CAPACITY);
    }

    #[test]
    fn unconsumed_press_coalesces_on_gate() {
        let bus = SignalBus::new(KEY);
        assert!(bus.post_key_event(0).gate_released);
        assert!(!bus.post_key_event(0).gate_released);
        assert_eq!(bus.gate.permits_available(), 1);
    }

    #[test]
    fn interrupt_sets_only_isr_bits() {
        let bus = SignalBus::new(KEY);
        assert!(!bus.on_key_interrupt(PinId(0x0040)));
        assert_eq!(bus.flags.get(), 0);

        // No waiter yet, so no switch requested, but the bits are latched.
        assert!(!bus.on_key_interrupt(KEY));
        assert_eq!(bus.flags.get(), KEY_INTERRUPT_EVENTS);
        assert_eq!(bus.gate.permits_available(), 0);
        assert!(bus.keys.is_empty());
    }

    #[test]
    fn interrupt_reports_woken_waiter() {
        let bus = SignalBus::new(KEY);
        let (_, waker) = spy_waker();
        let mut cx = Context::from_waker(&waker);

        let mut w = pin!(bus.flags.wait(WaitFor::any(KEY_INTERRUPT_EVENTS)));
        assert!(w.as_mut().poll(&mut cx).is_pending());
        assert!(bus.on_key_interrupt(KEY));
        assert_eq!(
            w.poll(&mut cx),
            core::task::Poll::Ready(KEY_INTERRUPT_EVENTS)
        );
        assert_eq!(bus.flags.get(), 0);
    }

    #[test]
    fn interrupt_without_matching_waiter_requests_no_switch() {
        let bus = SignalBus::new(KEY);
        let (_, waker) = spy_waker();
        let mut cx = Context::from_waker(&waker);

        let mut breath = pin!(bus.flags.wait(WaitFor::any(BREATH_EVENT)));
        let mut led2 = pin!(bus.flags.wait(WaitFor::any(LED2_EVENT)));
        assert!(breath.as_mut().poll(&mut cx).is_pending());
        assert!(led2.as_mut().poll(&mut cx).is_pending());

        assert!(!bus.on_key_interrupt(KEY));
        assert!(breath.as_mut().poll(&mut cx).is_pending());
        assert!(led2.as_mut().poll(&mut cx).is_pending());
        assert_eq!(bus.flags.get(), KEY_INTERRUPT_EVENTS);
    }
}
