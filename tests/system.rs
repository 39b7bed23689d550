// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Drives a complete `System` through `run`, the way a board would, with
//! mock pins and a hand-cranked tick.

use core::convert::Infallible;
use core::fmt;
use core::future::Future;
use core::pin::pin;
use core::task::Context;
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use embedded_hal::digital::{ErrorType, InputPin, OutputPin, StatefulOutputPin};
use embedded_hal::pwm::{self, SetDutyCycle};

use keyfan::board::LedBank;
use keyfan::bus::PinId;
use keyfan::config::Config;
use keyfan::diag::Console;
use keyfan::exec::noop_waker;
use keyfan::heap::TrackedHeap;
use keyfan::task::{Roster, TaskId, TaskState, TaskTable};
use keyfan::time::Timebase;
use keyfan::{Board, System};

const KEY_IRQ: PinId = PinId(1 << 0);

/// Output pin that counts toggles.
#[derive(Clone, Default)]
struct Led(Arc<AtomicUsize>);

impl Led {
    fn toggles(&self) -> usize {
        self.0.load(Ordering::Relaxed)
    }
}

impl ErrorType for Led {
    type Error = Infallible;
}

impl OutputPin for Led {
    fn set_low(&mut self) -> Result<(), Infallible> {
        Ok(())
    }
    fn set_high(&mut self) -> Result<(), Infallible> {
        Ok(())
    }
}

impl StatefulOutputPin for Led {
    fn is_set_high(&mut self) -> Result<bool, Infallible> {
        Ok(self.toggles() % 2 == 1)
    }
    fn is_set_low(&mut self) -> Result<bool, Infallible> {
        Ok(self.toggles() % 2 == 0)
    }
    fn toggle(&mut self) -> Result<(), Infallible> {
        self.0.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

/// PWM channel that remembers its duty cycle.
#[derive(Clone, Default)]
struct Pwm(Arc<AtomicU16>);

impl pwm::ErrorType for Pwm {
    type Error = Infallible;
}

impl SetDutyCycle for Pwm {
    fn max_duty_cycle(&self) -> u16 {
        100
    }
    fn set_duty_cycle(&mut self, duty: u16) -> Result<(), Infallible> {
        self.0.store(duty, Ordering::Relaxed);
        Ok(())
    }
}

/// Key input, high (released) until the test says otherwise.
#[derive(Clone)]
struct Key(Arc<AtomicBool>);

impl ErrorType for Key {
    type Error = Infallible;
}

impl InputPin for Key {
    fn is_high(&mut self) -> Result<bool, Infallible> {
        Ok(self.0.load(Ordering::Relaxed))
    }
    fn is_low(&mut self) -> Result<bool, Infallible> {
        Ok(!self.0.load(Ordering::Relaxed))
    }
}

#[derive(Default)]
struct Capture(Mutex<Vec<String>>);

impl Console for Capture {
    fn write_line(&self, line: fmt::Arguments<'_>) {
        self.0.lock().unwrap().push(line.to_string());
    }
}

impl Capture {
    fn count(&self, line: &str) -> usize {
        self.0.lock().unwrap().iter().filter(|l| *l == line).count()
    }

    fn clear(&self) {
        self.0.lock().unwrap().clear();
    }
}

#[test]
fn full_roster_end_to_end() {
    let timebase = Timebase::new();
    let led1 = Led::default();
    let led2 = Led::default();
    let pwm = Pwm::default();
    let leds = LedBank::new(led1.clone(), led2.clone(), pwm.clone());
    let heap = TrackedHeap::new(std::alloc::System, 15 * 1024);
    let console = Capture::default();
    let level = Arc::new(AtomicBool::new(true));

    let sys = System::new(
        Config::DEFAULT,
        Roster::FULL,
        Board {
            timebase: &timebase,
            leds: &leds,
            heap: &heap,
            console: &console,
            tasks: Box::leak(Box::new(TaskTable::new())),
            key_irq: KEY_IRQ,
        },
    )
    .unwrap();
    assert_eq!(sys.tasks().state(TaskId::Key), TaskState::Ready);
    assert_eq!(sys.tasks().state(TaskId::KeyLogger), TaskState::Unknown);

    let waker = noop_waker();
    let mut cx = Context::from_waker(&waker);
    let mut run = pin!(sys.run(Key(Arc::clone(&level))));
    let mut step = |ticks: u32| {
        timebase.advance(ticks);
        // Twice, so that bits set late in one pass are seen by tasks polled
        // earlier in it.
        assert!(run.as_mut().poll(&mut cx).is_pending());
        assert!(run.as_mut().poll(&mut cx).is_pending());
    };

    step(0);
    assert_eq!(sys.tasks().state(TaskId::Key), TaskState::Blocked);

    // Press and hold the key across several samples.
    level.store(false, Ordering::Relaxed);
    step(20);
    step(20);
    step(20);
    assert_eq!(console.count("Key Pressed!"), 1);
    assert_eq!(console.count("LED2 event received!"), 1);
    assert_eq!((led1.toggles(), led2.toggles()), (1, 1));
    // Nobody drains the queue with the logger off.
    assert_eq!(sys.bus().keys.len(), 1);

    // The external interrupt reaches the LEDs without the key task.
    assert!(sys.on_key_interrupt(KEY_IRQ));
    assert!(!sys.on_key_interrupt(PinId(1 << 5)));
    step(0);
    assert_eq!(console.count("LED1 Toggled by Interrupt"), 1);
    assert_eq!(console.count("LED2 Toggled by Interrupt"), 1);
    assert_eq!((led1.toggles(), led2.toggles()), (2, 2));

    // Release, then run up to the first timer and report period.
    level.store(true, Ordering::Relaxed);
    console.clear();
    step(1000 - 60);

    assert_eq!(console.count("SystemStatus"), 1);
    assert_eq!(console.count("LED1 Task: Blocked"), 1);
    assert_eq!(console.count("KEY Task: Blocked"), 1);
    assert_eq!(console.count("=== Memory Status ==="), 1);
    assert_eq!(console.count("Free Heap: 15360 bytes"), 1);
    assert_eq!(console.count("Memory block allocated: Block 0"), 1);
    assert_eq!(console.count("Small blocks (32 bytes) test time: 0ms"), 1);
    assert_eq!(console.count("Large blocks (512 bytes) test time: 0ms"), 1);
    assert_eq!(
        console.count("LED mode: breath, brightness: 10, direction: up, blinks: 0"),
        1
    );
    assert_eq!(pwm.0.load(Ordering::Relaxed), 10);

    // The latency probe gave back everything it took.
    assert_eq!(heap.stats().free, 15 * 1024);
    assert!(heap.stats().min_ever_free < 15 * 1024);
}

#[test]
fn interrupt_only_roster_ignores_the_key_pin() {
    let timebase = Timebase::new();
    let led1 = Led::default();
    let led2 = Led::default();
    let leds = LedBank::new(led1.clone(), led2.clone(), Pwm::default());
    let heap = TrackedHeap::new(std::alloc::System, 1024);
    let console = Capture::default();
    let level = Arc::new(AtomicBool::new(true));

    let sys = System::new(
        Config::DEFAULT,
        Roster::INTERRUPT_ONLY,
        Board {
            timebase: &timebase,
            leds: &leds,
            heap: &heap,
            console: &console,
            tasks: Box::leak(Box::new(TaskTable::new())),
            key_irq: KEY_IRQ,
        },
    )
    .unwrap();

    let waker = noop_waker();
    let mut cx = Context::from_waker(&waker);
    let mut run = pin!(sys.run(Key(Arc::clone(&level))));
    assert!(run.as_mut().poll(&mut cx).is_pending());

    level.store(false, Ordering::Relaxed);
    timebase.advance(2000);
    assert!(run.as_mut().poll(&mut cx).is_pending());
    assert_eq!(console.count("Key Pressed!"), 0);
    assert_eq!(console.count("SystemStatus"), 0);

    assert!(sys.on_key_interrupt(KEY_IRQ));
    assert!(run.as_mut().poll(&mut cx).is_pending());
    assert_eq!((led1.toggles(), led2.toggles()), (1, 1));
    assert_eq!(sys.tasks().state(TaskId::IntLed), TaskState::Blocked);
}
