// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Task identities, run-state tracking, and the roster.
//!
//! Every reactive task has a fixed [`TaskId`]. Which of them run is decided
//! by a [`Roster`], a plain list of [`TaskSpec`]s checked once at startup.
//!
//! Because this crate has no scheduler of its own, a task's run state is
//! inferred from how its future is being polled and woken. Wrapping the
//! future with [`TaskTable::track`] records:
//!
//! - `Ready` when the task is created, and again whenever it is woken;
//! - `Running` while the future is inside `poll`;
//! - `Blocked` after `poll` returns `Pending`, unless it was woken meanwhile;
//! - `Terminated` after `poll` returns `Ready`.
//!
//! Tasks that were never created read as `Unknown`.
//!
//! To see wakes, a tracked future is polled with a waker of its own that
//! marks the task `Ready` and then forwards to the executor's waker. Those
//! wakers point into the table, which is why tracking needs a
//! `&'static TaskTable`.

use core::future::Future;
use core::pin::Pin;
use core::task::{Context, Poll, RawWaker, RawWakerVTable, Waker};

use futures::task::AtomicWaker;
use pin_project::pin_project;
use portable_atomic::{AtomicU8, Ordering};

/// Identity of one reactive task.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
#[repr(u8)]
pub enum TaskId {
    /// Toggles LED1 on each gate permit.
    Led1,
    /// Toggles LED2 on `LED2_EVENT`.
    Led2,
    /// Toggles LEDs on the interrupt event bits.
    IntLed,
    /// Debounces the key and posts presses to the bus.
    Key,
    /// Prints task run states.
    Monitor,
    /// Prints heap occupancy.
    MemMonitor,
    /// Exercises the block pool.
    PoolTest,
    /// Measures general-allocator latency.
    MemTest,
    /// Drives the PWM output from the breath state.
    LedControl,
    /// Prints the breath status line.
    Status,
    /// Drains and prints the key queue.
    KeyLogger,
    /// Runs the periodic timers.
    TimerService,
}

impl TaskId {
    /// Number of task identities.
    pub const COUNT: usize = 12;

    /// Every identity, in declaration order.
    pub const ALL: [TaskId; Self::COUNT] = [
        TaskId::Led1,
        TaskId::Led2,
        TaskId::IntLed,
        TaskId::Key,
        TaskId::Monitor,
        TaskId::MemMonitor,
        TaskId::PoolTest,
        TaskId::MemTest,
        TaskId::LedControl,
        TaskId::Status,
        TaskId::KeyLogger,
        TaskId::TimerService,
    ];

    /// Name used in diagnostics.
    pub const fn name(self) -> &'static str {
        match self {
            TaskId::Led1 => "LED1Task",
            TaskId::Led2 => "LED2Task",
            TaskId::IntLed => "IntLedTask",
            TaskId::Key => "KEYTask",
            TaskId::Monitor => "MonitorTask",
            TaskId::MemMonitor => "MemMonitorTask",
            TaskId::PoolTest => "MemPoolTestTask",
            TaskId::MemTest => "MemTestTask",
            TaskId::LedControl => "LEDControlTask",
            TaskId::Status => "StatusTask",
            TaskId::KeyLogger => "KeyLoggerTask",
            TaskId::TimerService => "TimerService",
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

impl core::fmt::Display for TaskId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.name())
    }
}

/// Run state of a task, as reported by the monitor.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[repr(u8)]
pub enum TaskState {
    /// Created or woken, and waiting to be polled.
    Ready = 0,
    /// Currently being polled.
    Running = 1,
    /// Waiting on a primitive or a delay.
    Blocked = 2,
    /// Its future has completed.
    Terminated = 3,
    /// Not created, or not known.
    Unknown = 4,
}

impl TaskState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => TaskState::Ready,
            1 => TaskState::Running,
            2 => TaskState::Blocked,
            3 => TaskState::Terminated,
            _ => TaskState::Unknown,
        }
    }
}

impl core::fmt::Display for TaskState {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(match self {
            TaskState::Ready => "Ready",
            TaskState::Running => "Running",
            TaskState::Blocked => "Blocked",
            TaskState::Terminated => "Terminated",
            TaskState::Unknown => "Unknown",
        })
    }
}

/// Per-task record: the run state and the executor's waker to forward to.
struct Slot {
    state: AtomicU8,
    waker: AtomicWaker,
}

#[allow(clippy::declare_interior_mutable_const)]
const UNKNOWN: Slot = Slot {
    state: AtomicU8::new(TaskState::Unknown as u8),
    waker: AtomicWaker::new(),
};

impl Slot {
    fn load(&self) -> TaskState {
        TaskState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn store(&self, state: TaskState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Marks the task runnable and passes the wake on.
    fn wake(&self) {
        // A wake that lands while the task is being polled also counts;
        // `Tracked` leaves `Ready` alone when the poll ends.
        let _ = self
            .state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |s| match TaskState::from_u8(s) {
                TaskState::Blocked | TaskState::Running => Some(TaskState::Ready as u8),
                _ => None,
            });
        self.waker.wake();
    }

    fn forwarding_waker(&'static self) -> Waker {
        let data: *const Slot = self;
        // Safety: the vtable functions only ever treat `data` as a
        // `&'static Slot`, which it is.
        unsafe { Waker::from_raw(RawWaker::new(data.cast(), &TRACKED_VTABLE)) }
    }
}

static TRACKED_VTABLE: RawWakerVTable =
    RawWakerVTable::new(tracked_clone, tracked_wake, tracked_wake, tracked_drop);

unsafe fn tracked_clone(data: *const ()) -> RawWaker {
    RawWaker::new(data, &TRACKED_VTABLE)
}

unsafe fn tracked_wake(data: *const ()) {
    // Safety: `data` was made from a `&'static Slot` in
    // `Slot::forwarding_waker`.
    let slot = unsafe { &*data.cast::<Slot>() };
    slot.wake();
}

unsafe fn tracked_drop(_: *const ()) {}

/// Run state of every task. Safe to read from any context.
///
/// Tracking requires the table to live forever, so it's normally a
/// `static`:
///
/// ```ignore
/// static TASKS: TaskTable = TaskTable::new();
/// ```
pub struct TaskTable {
    slots: [Slot; TaskId::COUNT],
}

impl core::fmt::Debug for TaskTable {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let mut m = f.debug_map();
        for id in TaskId::ALL {
            m.entry(&id, &self.state(id));
        }
        m.finish()
    }
}

impl Default for TaskTable {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskTable {
    /// Creates a table with every task `Unknown`.
    pub const fn new() -> Self {
        Self {
            slots: [UNKNOWN; TaskId::COUNT],
        }
    }

    /// Current state of `id`.
    pub fn state(&self, id: TaskId) -> TaskState {
        self.slots[id.index()].load()
    }

    /// Records a state for `id`.
    pub fn set(&self, id: TaskId, state: TaskState) {
        self.slots[id.index()].store(state);
    }

    /// Marks `id` created and wraps its future so that polling and waking it
    /// keep the table current.
    pub fn track<F: Future>(&'static self, id: TaskId, future: F) -> Tracked<F> {
        self.set(id, TaskState::Ready);
        Tracked {
            inner: future,
            slot: &self.slots[id.index()],
        }
    }
}

/// Future wrapper produced by [`TaskTable::track`].
#[must_use = "futures do nothing unless you `.await` or poll them"]
#[pin_project]
pub struct Tracked<F> {
    #[pin]
    inner: F,
    slot: &'static Slot,
}

impl<F: core::fmt::Debug> core::fmt::Debug for Tracked<F> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Tracked")
            .field("inner", &self.inner)
            .field("state", &self.slot.load())
            .finish()
    }
}

impl<F: Future> Future for Tracked<F> {
    type Output = F::Output;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let p = self.project();
        let slot: &'static Slot = *p.slot;
        slot.waker.register(cx.waker());
        slot.store(TaskState::Running);

        let waker = slot.forwarding_waker();
        let r = p.inner.poll(&mut Context::from_waker(&waker));
        if r.is_ready() {
            slot.store(TaskState::Terminated);
        } else {
            // Fails, leaving `Ready`, if the task was woken during the poll.
            let _ = slot.state.compare_exchange(
                TaskState::Running as u8,
                TaskState::Blocked as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            );
        }
        r
    }
}

/// One roster line: a task and whether it runs.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct TaskSpec {
    /// Which task.
    pub id: TaskId,
    /// Whether it is created at startup.
    pub enabled: bool,
}

impl TaskSpec {
    /// A task that runs.
    pub const fn on(id: TaskId) -> Self {
        Self { id, enabled: true }
    }

    /// A task that is declared but not created.
    pub const fn off(id: TaskId) -> Self {
        Self { id, enabled: false }
    }
}

const INTERRUPT_ONLY_TASKS: &[TaskSpec] = &[
    TaskSpec::off(TaskId::Led1),
    TaskSpec::off(TaskId::Led2),
    TaskSpec::on(TaskId::IntLed),
    TaskSpec::off(TaskId::Key),
    TaskSpec::off(TaskId::Monitor),
    TaskSpec::off(TaskId::MemMonitor),
    TaskSpec::off(TaskId::PoolTest),
    TaskSpec::off(TaskId::MemTest),
    TaskSpec::off(TaskId::LedControl),
    TaskSpec::off(TaskId::Status),
    TaskSpec::off(TaskId::KeyLogger),
    TaskSpec::off(TaskId::TimerService),
];

const FULL_TASKS: &[TaskSpec] = &[
    TaskSpec::on(TaskId::Led1),
    TaskSpec::on(TaskId::Led2),
    TaskSpec::on(TaskId::IntLed),
    TaskSpec::on(TaskId::Key),
    TaskSpec::on(TaskId::Monitor),
    TaskSpec::on(TaskId::MemMonitor),
    TaskSpec::on(TaskId::PoolTest),
    TaskSpec::on(TaskId::MemTest),
    TaskSpec::on(TaskId::LedControl),
    TaskSpec::on(TaskId::Status),
    TaskSpec::off(TaskId::KeyLogger),
    TaskSpec::on(TaskId::TimerService),
];

/// Declarative list of which tasks run.
#[derive(Copy, Clone, Debug)]
pub struct Roster<'a> {
    tasks: &'a [TaskSpec],
}

impl<'a> Roster<'a> {
    /// Only the interrupt-driven LED task. Key presses still reach it through
    /// the external interrupt.
    pub const INTERRUPT_ONLY: Roster<'static> = Roster {
        tasks: INTERRUPT_ONLY_TASKS,
    };

    /// Everything except the key logger.
    pub const FULL: Roster<'static> = Roster { tasks: FULL_TASKS };

    /// Wraps a list of specs.
    pub const fn new(tasks: &'a [TaskSpec]) -> Self {
        Self { tasks }
    }

    /// The specs, in order.
    pub fn tasks(&self) -> &'a [TaskSpec] {
        self.tasks
    }

    /// Checks whether `id` is listed and enabled.
    pub fn is_enabled(&self, id: TaskId) -> bool {
        self.tasks.iter().any(|s| s.id == id && s.enabled)
    }

    /// Returns the first task listed more than once, if any.
    pub fn duplicate(&self) -> Option<TaskId> {
        self.tasks.iter().enumerate().find_map(|(i, s)| {
            self.tasks[..i].iter().any(|e| e.id == s.id).then_some(s.id)
        })
    }
}

#[cfg(test)]
mod tests {
    use core::pin::pin;

    use super::*;
    use crate::exec::tests::{spy_waker, wakes};
    use crate::exec::Notify;

    fn leaked_table() -> &'static TaskTable {
        Box::leak(Box::new(TaskTable::new()))
    }

    #[test]
    fn tracking_follows_poll_results() {
        let table = leaked_table();
        assert_eq!(table.state(TaskId::Led1), TaskState::Unknown);

        let (_, waker) = spy_waker();
        let mut cx = Context::from_waker(&waker);
        let mut polls = 0;
        let mut t = pin!(table.track(
            TaskId::Led1,
            futures::future::poll_fn(|_| {
                polls += 1;
                if polls < 2 {
                    Poll::Pending
                } else {
                    Poll::Ready(())
                }
            })
        ));
        assert_eq!(table.state(TaskId::Led1), TaskState::Ready);
        assert!(t.as_mut().poll(&mut cx).is_pending());
        assert_eq!(table.state(TaskId::Led1), TaskState::Blocked);
        assert!(t.as_mut().poll(&mut cx).is_ready());
        assert_eq!(table.state(TaskId::Led1), TaskState::Terminated);
        assert_eq!(table.state(TaskId::Led2), TaskState::Unknown);
    }

    #[test]
    fn running_is_visible_inside_poll() {
        let table = leaked_table();
        let (_, waker) = spy_waker();
        let mut cx = Context::from_waker(&waker);
        let mut seen = None;
        {
            let t = pin!(table.track(
                TaskId::Key,
                futures::future::poll_fn(|_| {
                    seen = Some(table.state(TaskId::Key));
                    Poll::Ready(())
                })
            ));
            assert!(t.poll(&mut cx).is_ready());
        }
        assert_eq!(seen, Some(TaskState::Running));
    }

    #[test]
    fn wake_marks_blocked_task_ready() {
        let table = leaked_table();
        let n: Notify = Notify::new();
        let (spy, waker) = spy_waker();
        let mut cx = Context::from_waker(&waker);

        let mut t = pin!(table.track(TaskId::Led2, n.until_racy(|| false)));
        assert!(t.as_mut().poll(&mut cx).is_pending());
        assert_eq!(table.state(TaskId::Led2), TaskState::Blocked);

        assert!(n.notify());
        assert_eq!(table.state(TaskId::Led2), TaskState::Ready);
        // The executor still hears about it.
        assert_eq!(wakes(&spy), 1);

        assert!(t.as_mut().poll(&mut cx).is_pending());
        assert_eq!(table.state(TaskId::Led2), TaskState::Blocked);
    }

    #[test]
    fn wake_during_poll_leaves_task_ready() {
        let table = leaked_table();
        let (spy, waker) = spy_waker();
        let mut cx = Context::from_waker(&waker);

        let mut t = pin!(table.track(
            TaskId::Monitor,
            futures::future::poll_fn(|cx| {
                cx.waker().wake_by_ref();
                Poll::<()>::Pending
            })
        ));
        assert!(t.as_mut().poll(&mut cx).is_pending());
        assert_eq!(table.state(TaskId::Monitor), TaskState::Ready);
        assert_eq!(wakes(&spy), 1);
    }

    #[test]
    fn wake_after_completion_changes_nothing() {
        let table = leaked_table();
        let (_, waker) = spy_waker();
        let mut cx = Context::from_waker(&waker);
        let mut kept = None;
        {
            let t = pin!(table.track(
                TaskId::Status,
                futures::future::poll_fn(|cx| {
                    kept = Some(cx.waker().clone());
                    Poll::Ready(())
                })
            ));
            assert!(t.poll(&mut cx).is_ready());
        }
        kept.unwrap().wake();
        assert_eq!(table.state(TaskId::Status), TaskState::Terminated);
    }

    #[test]
    fn presets_are_well_formed() {
        assert_eq!(Roster::FULL.duplicate(), None);
        assert_eq!(Roster::INTERRUPT_ONLY.duplicate(), None);
        assert!(Roster::INTERRUPT_ONLY.is_enabled(TaskId::IntLed));
        assert!(!Roster::INTERRUPT_ONLY.is_enabled(TaskId::Led1));
        assert!(!Roster::FULL.is_enabled(TaskId::KeyLogger));
        assert_eq!(Roster::FULL.tasks().len(), TaskId::COUNT);
    }

    #[test]
    fn duplicate_is_reported() {
        let specs = [
            TaskSpec::on(TaskId::Led1),
            TaskSpec::on(TaskId::Key),
            TaskSpec::off(TaskId::Led1),
        ];
        assert_eq!(Roster::new(&specs).duplicate(), Some(TaskId::Led1));
    }

    #[test]
    fn state_names() {
        assert_eq!(std::format!("{}", TaskState::Blocked), "Blocked");
        assert_eq!(std::format!("{}", TaskId::Key), "KEYTask");
    }
}
