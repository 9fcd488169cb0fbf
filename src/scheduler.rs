//! Cooperative task scheduler.
//!
//! A fixed table of periodic, non-blocking tasks ticked from the single
//! main loop. The scheduler only decides *which* task is due; the work is
//! done by a [`TaskDelegate`] so the engines it drives stay independently
//! testable.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │   main loop ──▶ FeederService::tick(now_ms)                  │
//! │                        │                                     │
//! │                        ▼                                     │
//! │   ┌──────────────────────────────────────────────────────┐   │
//! │   │ Scheduler::tick: scan in registration order          │   │
//! │   │  MotorMaintenance  10 ms   (actuator stepping)       │   │
//! │   │  FeedingMonitor   100 ms   (armed per feeding)       │   │
//! │   │  ScheduleMonitor   30 s    (on-time + recovery)      │   │
//! │   │  NetworkMonitor    10 s    (link edges)              │   │
//! │   │  TimeSync         500 ms   (failover state machine)  │   │
//! │   └────────────────────────┬─────────────────────────────┘   │
//! │                            ▼                                 │
//! │                TaskDelegate::run(task, now, ctl)             │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! A due task runs once and its last-run time becomes the invocation
//! time, not the ideal slot, so a late tick never produces a burst of
//! catch-up runs. There is no preemption: a slow callback delays every
//! task behind it in the same pass.

use crate::app::ports::TaskDelegate;
use log::{debug, info};

// ═══════════════════════════════════════════════════════════════
//  Task types
// ═══════════════════════════════════════════════════════════════

/// Every periodic job in the firmware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskId {
    /// Step generation for the feed motor.
    MotorMaintenance,
    /// Watches an in-flight feeding until the motor goes idle.
    FeedingMonitor,
    /// On-time and missed-feeding decisions.
    ScheduleMonitor,
    /// Network reachability edges.
    NetworkMonitor,
    /// Time-source failover state machine.
    TimeSync,
}

impl TaskId {
    pub fn name(self) -> &'static str {
        match self {
            Self::MotorMaintenance => "motor",
            Self::FeedingMonitor => "feed-monitor",
            Self::ScheduleMonitor => "schedule",
            Self::NetworkMonitor => "network",
            Self::TimeSync => "time-sync",
        }
    }
}

/// Enable/disable requests raised by a task body.
///
/// Requests are applied right after the callback returns, so a task may
/// disable itself or arm another task without aliasing the scheduler.
#[derive(Debug, Default)]
pub struct TaskControl {
    requests: heapless::Vec<(TaskId, bool), 4>,
}

impl TaskControl {
    pub fn enable(&mut self, task: TaskId) {
        self.request(task, true);
    }

    pub fn disable(&mut self, task: TaskId) {
        self.request(task, false);
    }

    fn request(&mut self, task: TaskId, enabled: bool) {
        // Later requests for the same task win.
        self.requests.retain(|(t, _)| *t != task);
        let _ = self.requests.push((task, enabled));
    }
}

/// Read-only view of one task, for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskStatus {
    pub task: TaskId,
    pub interval_ms: u64,
    pub enabled: bool,
    pub runs: u32,
}

// ═══════════════════════════════════════════════════════════════
//  Scheduler engine
// ═══════════════════════════════════════════════════════════════

/// Maximum number of registered tasks.
pub const MAX_TASKS: usize = 8;

#[derive(Debug, Clone)]
struct TaskSlot {
    task: TaskId,
    interval_ms: u64,
    enabled: bool,
    /// `None` until the first run (or after re-enable): due immediately.
    last_run_ms: Option<u64>,
    runs: u32,
}

impl TaskSlot {
    fn is_due(&self, now_ms: u64) -> bool {
        self.enabled
            && self
                .last_run_ms
                .is_none_or(|last| now_ms.saturating_sub(last) >= self.interval_ms)
    }
}

/// The cooperative scheduler.
pub struct Scheduler {
    tasks: heapless::Vec<TaskSlot, MAX_TASKS>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self { tasks: heapless::Vec::new() }
    }

    /// Register a task. Returns its slot index, or `None` if the table is
    /// full or the task is already registered.
    pub fn register(&mut self, task: TaskId, interval_ms: u64, start_enabled: bool) -> Option<usize> {
        if self.slot(task).is_some() {
            return None;
        }
        let slot = TaskSlot { task, interval_ms, enabled: start_enabled, last_run_ms: None, runs: 0 };
        self.tasks.push(slot).ok()?;
        info!(
            "Scheduler: registered '{}' every {} ms ({})",
            task.name(),
            interval_ms,
            if start_enabled { "enabled" } else { "disabled" }
        );
        Some(self.tasks.len() - 1)
    }

    /// Enable a task. A task that was disabled becomes due on the next pass.
    pub fn enable(&mut self, task: TaskId) {
        if let Some(slot) = self.slot_mut(task) {
            if !slot.enabled {
                slot.enabled = true;
                slot.last_run_ms = None;
                debug!("Scheduler: '{}' enabled", task.name());
            }
        }
    }

    pub fn disable(&mut self, task: TaskId) {
        if let Some(slot) = self.slot_mut(task) {
            if slot.enabled {
                slot.enabled = false;
                debug!("Scheduler: '{}' disabled", task.name());
            }
        }
    }

    pub fn is_enabled(&self, task: TaskId) -> bool {
        self.slot(task).is_some_and(|s| s.enabled)
    }

    /// Run every due task once, in registration order.
    pub fn tick(&mut self, now_ms: u64, delegate: &mut dyn TaskDelegate) {
        for i in 0..self.tasks.len() {
            let slot = &mut self.tasks[i];
            if !slot.is_due(now_ms) {
                continue;
            }
            slot.last_run_ms = Some(now_ms);
            slot.runs = slot.runs.wrapping_add(1);
            let task = slot.task;

            let mut ctl = TaskControl::default();
            delegate.run(task, now_ms, &mut ctl);
            for (target, enabled) in ctl.requests {
                if enabled {
                    self.enable(target);
                } else {
                    self.disable(target);
                }
            }
        }
    }

    /// Snapshot of every registered task, in registration order.
    pub fn statuses(&self) -> heapless::Vec<TaskStatus, MAX_TASKS> {
        self.tasks
            .iter()
            .map(|s| TaskStatus { task: s.task, interval_ms: s.interval_ms, enabled: s.enabled, runs: s.runs })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    fn slot(&self, task: TaskId) -> Option<&TaskSlot> {
        self.tasks.iter().find(|s| s.task == task)
    }

    fn slot_mut(&mut self, task: TaskId) -> Option<&mut TaskSlot> {
        self.tasks.iter_mut().find(|s| s.task == task)
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

// ═══════════════════════════════════════════════════════════════
//  Tests
// ═══════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    /// Test delegate that records every run and can raise control requests.
    struct RecordingDelegate {
        runs: Vec<(TaskId, u64)>,
        on_run: Option<fn(TaskId, &mut TaskControl)>,
    }

    impl RecordingDelegate {
        fn new() -> Self {
            Self { runs: Vec::new(), on_run: None }
        }

        fn count(&self, task: TaskId) -> usize {
            self.runs.iter().filter(|(t, _)| *t == task).count()
        }
    }

    impl TaskDelegate for RecordingDelegate {
        fn run(&mut self, task: TaskId, now_ms: u64, ctl: &mut TaskControl) {
            self.runs.push((task, now_ms));
            if let Some(hook) = self.on_run {
                hook(task, ctl);
            }
        }
    }

    #[test]
    fn runs_in_registration_order() {
        let mut sched = Scheduler::new();
        let mut delegate = RecordingDelegate::new();
        sched.register(TaskId::TimeSync, 100, true);
        sched.register(TaskId::MotorMaintenance, 10, true);

        sched.tick(0, &mut delegate);
        let order: Vec<TaskId> = delegate.runs.iter().map(|(t, _)| *t).collect();
        assert_eq!(order, vec![TaskId::TimeSync, TaskId::MotorMaintenance]);
    }

    #[test]
    fn fires_at_interval_without_catch_up() {
        let mut sched = Scheduler::new();
        let mut delegate = RecordingDelegate::new();
        sched.register(TaskId::ScheduleMonitor, 1_000, true);

        sched.tick(0, &mut delegate);
        sched.tick(999, &mut delegate);
        assert_eq!(delegate.count(TaskId::ScheduleMonitor), 1);

        // A 5 s stall yields exactly one run, re-anchored at the stall end.
        sched.tick(6_000, &mut delegate);
        assert_eq!(delegate.count(TaskId::ScheduleMonitor), 2);
        sched.tick(6_500, &mut delegate);
        assert_eq!(delegate.count(TaskId::ScheduleMonitor), 2);
        sched.tick(7_000, &mut delegate);
        assert_eq!(delegate.count(TaskId::ScheduleMonitor), 3);
    }

    #[test]
    fn disabled_task_is_skipped() {
        let mut sched = Scheduler::new();
        let mut delegate = RecordingDelegate::new();
        sched.register(TaskId::FeedingMonitor, 100, false);

        for t in 0..10 {
            sched.tick(t * 100, &mut delegate);
        }
        assert!(delegate.runs.is_empty());
        assert!(!sched.is_enabled(TaskId::FeedingMonitor));
    }

    #[test]
    fn enable_makes_task_due_on_next_pass() {
        let mut sched = Scheduler::new();
        let mut delegate = RecordingDelegate::new();
        sched.register(TaskId::FeedingMonitor, 100, false);
        sched.tick(0, &mut delegate);

        sched.enable(TaskId::FeedingMonitor);
        sched.tick(10, &mut delegate);
        assert_eq!(delegate.runs, vec![(TaskId::FeedingMonitor, 10)]);
    }

    #[test]
    fn task_can_disable_itself() {
        let mut sched = Scheduler::new();
        let mut delegate = RecordingDelegate::new();
        delegate.on_run = Some(|task, ctl| ctl.disable(task));
        sched.register(TaskId::FeedingMonitor, 100, true);

        sched.tick(0, &mut delegate);
        sched.tick(100, &mut delegate);
        sched.tick(200, &mut delegate);
        assert_eq!(delegate.count(TaskId::FeedingMonitor), 1);
    }

    #[test]
    fn task_can_arm_a_later_task_in_same_pass() {
        let mut sched = Scheduler::new();
        let mut delegate = RecordingDelegate::new();
        delegate.on_run = Some(|task, ctl| {
            if task == TaskId::ScheduleMonitor {
                ctl.enable(TaskId::FeedingMonitor);
            }
        });
        sched.register(TaskId::ScheduleMonitor, 30_000, true);
        sched.register(TaskId::FeedingMonitor, 100, false);

        sched.tick(0, &mut delegate);
        assert_eq!(delegate.count(TaskId::FeedingMonitor), 1);
    }

    #[test]
    fn duplicate_registration_rejected() {
        let mut sched = Scheduler::new();
        assert_eq!(sched.register(TaskId::TimeSync, 500, true), Some(0));
        assert_eq!(sched.register(TaskId::TimeSync, 500, true), None);
        assert_eq!(sched.len(), 1);
    }

    #[test]
    fn statuses_report_run_counts() {
        let mut sched = Scheduler::new();
        let mut delegate = RecordingDelegate::new();
        sched.register(TaskId::MotorMaintenance, 10, true);
        sched.register(TaskId::FeedingMonitor, 100, false);
        for t in 0..5 {
            sched.tick(t * 10, &mut delegate);
        }
        let st = sched.statuses();
        assert_eq!(st[0].runs, 5);
        assert!(st[0].enabled);
        assert_eq!(st[1].runs, 0);
        assert!(!st[1].enabled);
    }
}
