// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The whole application: shared state plus the reactive tasks.
//!
//! A [`System`] is created once, checked, and then shared by reference with
//! every task future. Each task is an `async fn` on `System` that loops
//! forever in the same shape:
//!
//! 1. **Wait** on exactly one primitive (or a delay), with no timeout.
//! 2. **Act**: toggle a pin, update a counter, print a line. Never wait here.
//!
//! No task holds a primitive across its Act phase. The pool exerciser holds
//! *blocks* across delays, but the pool lock itself is only taken inside
//! `allocate` and `release`.
//!
//! [`System::run`] joins every task the roster enables into a single future.
//! Boards that want the tasks as separate executor tasks can call the task
//! methods directly instead; they are all public.
//!
//! # Interrupt entry points
//!
//! The board's interrupt handlers call [`Timebase::on_tick`] and
//! [`System::on_key_interrupt`]. Neither blocks and neither touches the pool.

use core::convert::Infallible;
use core::future::Future;

use embedded_hal::digital::InputPin;

use crate::board::{read_key, Led, Leds};
use crate::breath::BreathState;
use crate::bus::{
    PinId, SignalBus, BREATH_EVENT, INT_LED1_EVENT, INT_LED2_EVENT, KEY_INTERRUPT_EVENTS,
    LED2_EVENT, STATUS_EVENT,
};
use crate::config::{
    Config, BLOCK_SIZE, BREATH_MAX, BREATH_STEP, POOL_BLOCKS, POOL_TEST_BLOCKS, TEST_COUNT,
};
use crate::diag::{
    probe_latency, Console, HeapReport, HeapSummary, StatusReport, SIZE_CLASSES,
};
use crate::error::InitError;
use crate::flags::WaitFor;
use crate::heap::Heap;
use crate::pool::{BlockRef, Pool};
use crate::task::{Roster, TaskId, TaskState, TaskTable};
use crate::time::Timebase;
use crate::timer::{PeriodicTimer, TimerService};

/// Everything the system borrows from the board.
#[derive(Copy, Clone)]
pub struct Board<'a> {
    /// Tick counter, advanced by the tick interrupt.
    pub timebase: &'a Timebase,
    /// LED outputs.
    pub leds: &'a dyn Leds,
    /// General-purpose heap, for the memory diagnostics.
    pub heap: &'a dyn Heap,
    /// Diagnostic output.
    pub console: &'a dyn Console,
    /// Run-state table. Tracking hands out wakers that point into it, so it
    /// must live forever.
    pub tasks: &'static TaskTable,
    /// External interrupt line wired to the key.
    pub key_irq: PinId,
}

impl core::fmt::Debug for Board<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Board")
            .field("timebase", self.timebase)
            .field("key_irq", &self.key_irq)
            .finish_non_exhaustive()
    }
}

/// Application context shared by every task.
pub struct System<'a> {
    config: Config,
    roster: Roster<'a>,
    timebase: &'a Timebase,
    leds: &'a dyn Leds,
    heap: &'a dyn Heap,
    console: &'a dyn Console,
    bus: SignalBus,
    pool: Pool<POOL_BLOCKS, BLOCK_SIZE>,
    breath: BreathState,
    tasks: &'static TaskTable,
}

impl core::fmt::Debug for System<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("System")
            .field("config", &self.config)
            .field("bus", &self.bus)
            .field("pool", &self.pool)
            .field("breath", &self.breath)
            .field("tasks", self.tasks)
            .finish_non_exhaustive()
    }
}

impl<'a> System<'a> {
    /// Checks `config` and `roster` and builds the shared state.
    ///
    /// On failure, prints `<name> creation failed!` to the board console and
    /// returns the reason. The board should halt; nothing is retried.
    pub fn new(config: Config, roster: Roster<'a>, board: Board<'a>) -> Result<Self, InitError> {
        let checked = match roster.duplicate() {
            Some(id) => Err(InitError::DuplicateTask(id)),
            None => config.validate().map_err(InitError::ZeroPeriod),
        };
        if let Err(e) = checked {
            board
                .console
                .write_line(format_args!("{} creation failed!", e.subject()));
            return Err(e);
        }

        let tasks = board.tasks;
        for id in TaskId::ALL {
            let state = if roster.is_enabled(id) {
                TaskState::Ready
            } else {
                TaskState::Unknown
            };
            tasks.set(id, state);
        }

        Ok(Self {
            config,
            roster,
            timebase: board.timebase,
            leds: board.leds,
            heap: board.heap,
            console: board.console,
            bus: SignalBus::new(board.key_irq),
            pool: Pool::new(),
            breath: BreathState::new(config.led_mode, BREATH_MAX, BREATH_STEP),
            tasks,
        })
    }

    /// The configuration this system was built with.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The key channels.
    pub fn bus(&self) -> &SignalBus {
        &self.bus
    }

    /// The block pool.
    pub fn pool(&self) -> &Pool<POOL_BLOCKS, BLOCK_SIZE> {
        &self.pool
    }

    /// The LED behavior state.
    pub fn breath(&self) -> &BreathState {
        &self.breath
    }

    /// Run states of the tasks.
    pub fn tasks(&self) -> &'static TaskTable {
        self.tasks
    }

    /// External-interrupt entry point; see [`SignalBus::on_key_interrupt`].
    pub fn on_key_interrupt(&self, pin: PinId) -> bool {
        self.bus.on_key_interrupt(pin)
    }

    fn print(&self, line: core::fmt::Arguments<'_>) {
        self.console.write_line(line);
    }

    /// Runs every task the roster enables, forever.
    ///
    /// `key` is the key input pin; it belongs to the key task from here on.
    pub async fn run<K: InputPin>(&self, key: K) -> Infallible {
        let mut key = key;
        let (never, ..) = futures::join!(
            self.spawn(TaskId::Led1, self.led1_task()),
            self.spawn(TaskId::Led2, self.led2_task()),
            self.spawn(TaskId::IntLed, self.int_led_task()),
            self.spawn(TaskId::Key, self.key_task(&mut key)),
            self.spawn(TaskId::Monitor, self.monitor_task()),
            self.spawn(TaskId::MemMonitor, self.mem_monitor_task()),
            self.spawn(TaskId::PoolTest, self.pool_test_task()),
            self.spawn(TaskId::MemTest, self.mem_test_task()),
            self.spawn(TaskId::LedControl, self.led_control_task()),
            self.spawn(TaskId::Status, self.status_task()),
            self.spawn(TaskId::KeyLogger, self.key_logger_task()),
            self.spawn(TaskId::TimerService, self.timer_service_task()),
        );
        never
    }

    /// Runs `task` under run-state tracking if the roster enables `id`;
    /// otherwise never resolves and never polls `task`.
    async fn spawn<F>(&self, id: TaskId, task: F) -> Infallible
    where
        F: Future<Output = Infallible>,
    {
        if self.roster.is_enabled(id) {
            self.tasks.track(id, task).await
        } else {
            futures::future::pending().await
        }
    }

    /// Toggles LED1 once per gate permit.
    pub async fn led1_task(&self) -> Infallible {
        loop {
            self.bus.gate.acquire().await;
            self.leds.toggle(Led::Led1);
        }
    }

    /// Toggles LED2 each time `LED2_EVENT` is set.
    pub async fn led2_task(&self) -> Infallible {
        loop {
            let bits = self.bus.flags.wait(WaitFor::any(LED2_EVENT)).await;
            if bits & LED2_EVENT != 0 {
                self.print(format_args!("LED2 event received!"));
                self.leds.toggle(Led::Led2);
            }
        }
    }

    /// Toggles whichever LEDs the key interrupt flagged.
    pub async fn int_led_task(&self) -> Infallible {
        loop {
            let bits = self.bus.flags.wait(WaitFor::any(KEY_INTERRUPT_EVENTS)).await;
            if bits & INT_LED1_EVENT != 0 {
                self.leds.toggle(Led::Led1);
                self.print(format_args!("LED1 Toggled by Interrupt"));
            }
            if bits & INT_LED2_EVENT != 0 {
                self.leds.toggle(Led::Led2);
                self.print(format_args!("LED2 Toggled by Interrupt"));
            }
        }
    }

    /// Samples `key` every debounce interval and posts each press (a high to
    /// low transition between samples) to the bus.
    pub async fn key_task<K: InputPin>(&self, key: &mut K) -> Infallible {
        // Released, so a key held down at startup doesn't count as a press.
        let mut last = 1;
        loop {
            let state = read_key(key);
            if state == 0 && last == 1 {
                self.print(format_args!("Key Pressed!"));
                let fanout = self.bus.post_key_event(state);
                log::trace!("key: {:?}", fanout);
            }
            last = state;
            self.timebase.sleep_for(self.config.debounce).await;
        }
    }

    /// Prints the run states of the LED1, LED2 and key tasks periodically.
    pub async fn monitor_task(&self) -> Infallible {
        self.timebase.sleep_for(self.config.start_delay).await;
        let mut gate = self.timebase.periodic(self.config.monitor_period);
        loop {
            gate.next_time().await;
            StatusReport {
                led1: self.tasks.state(TaskId::Led1),
                led2: self.tasks.state(TaskId::Led2),
                key: self.tasks.state(TaskId::Key),
            }
            .emit(self.console);
        }
    }

    /// Prints the heap report periodically.
    pub async fn mem_monitor_task(&self) -> Infallible {
        self.timebase.sleep_for(self.config.start_delay).await;
        let mut gate = self.timebase.periodic(self.config.monitor_period);
        loop {
            gate.next_time().await;
            HeapReport(self.heap.stats()).emit(self.console);
        }
    }

    /// Repeatedly borrows a handful of pool blocks, fills them, and gives
    /// them back, printing each step.
    pub async fn pool_test_task(&self) -> Infallible {
        self.timebase.sleep_for(self.config.start_delay).await;
        loop {
            self.print(format_args!("=== Memory Pool Test ==="));
            self.print(format_args!("Allocating memory blocks..."));
            let mut held: [Option<BlockRef<'_, BLOCK_SIZE>>; POOL_TEST_BLOCKS] =
                Default::default();
            for (i, slot) in held.iter_mut().enumerate() {
                match self.pool.allocate().await {
                    Some(mut block) => {
                        block.fill(i as u8 + 1);
                        self.print(format_args!(
                            "Memory block allocated: Block {}",
                            block.index()
                        ));
                        *slot = Some(block);
                    }
                    None => self.print(format_args!("Memory block allocation failed")),
                }
                self.timebase.sleep_for(self.config.pool_step_delay).await;
            }

            self.print(format_args!("Freeing memory blocks..."));
            for slot in &mut held {
                if let Some(block) = slot.take() {
                    let index = block.index();
                    self.pool.release(block).await;
                    self.print(format_args!("Memory block freed: Block {}", index));
                }
                self.timebase.sleep_for(self.config.pool_step_delay).await;
            }

            self.print(format_args!("=== Test Complete ==="));
            self.timebase.sleep_for(self.config.pool_rest).await;
        }
    }

    /// Periodically measures how long the general heap takes to serve each
    /// size class.
    pub async fn mem_test_task(&self) -> Infallible {
        self.timebase.sleep_for(self.config.start_delay).await;
        loop {
            self.print(format_args!("=== Memory Allocation Performance Test ==="));
            for class in SIZE_CLASSES {
                self.print(format_args!("Testing {} block allocation...", class.label));
                probe_latency::<TEST_COUNT>(self.heap, self.timebase, class).emit(self.console);
            }
            HeapSummary(self.heap.stats()).emit(self.console);
            self.timebase.sleep_for(self.config.latency_period).await;
        }
    }

    /// Drives the PWM output from the breath state on each breath update.
    pub async fn led_control_task(&self) -> Infallible {
        loop {
            self.bus.flags.wait(WaitFor::any(BREATH_EVENT)).await;
            self.leds.set_brightness(self.breath.percent());
        }
    }

    /// Prints the LED status line on each status tick.
    pub async fn status_task(&self) -> Infallible {
        loop {
            self.bus.flags.wait(WaitFor::any(STATUS_EVENT)).await;
            let s = self.breath.snapshot();
            self.print(format_args!(
                "LED mode: {}, brightness: {}, direction: {}, blinks: {}",
                s.mode, s.brightness, s.direction, s.blinks
            ));
        }
    }

    /// Prints every key sample that makes it into the queue.
    pub async fn key_logger_task(&self) -> Infallible {
        loop {
            let state = self.bus.keys.pop().await;
            self.print(format_args!("Key state: {}", state));
        }
    }

    /// Runs the breath and status timers. Their callbacks only update state
    /// and set flag bits.
    pub async fn timer_service_task(&self) -> Infallible {
        let breath = || {
            self.breath.advance();
            self.bus.flags.set(BREATH_EVENT);
        };
        let status = || {
            self.bus.flags.set(STATUS_EVENT);
        };
        TimerService::new(
            self.timebase,
            [
                PeriodicTimer::new("BreathTimer", self.config.breath_period, &breath),
                PeriodicTimer::new("StatusTimer", self.config.status_period, &status),
            ],
        )
        .run()
        .await
    }
}
