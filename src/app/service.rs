//! Application service: the hexagonal core.
//!
//! [`FeederService`] owns the cooperative scheduler and the three engines
//! (schedule, arbiter, time sync) plus status derivation. Hardware ports
//! are injected per call through [`ServicePorts`], so the whole service
//! runs against mocks on the host.
//!
//! ```text
//!  ClockPort ───▶ ┌──────────────────────────────┐ ──▶ EventSink
//!  NetworkPort ──▶│        FeederService         │ ──▶ StatusIndicator
//!  Ntp/Http ─────▶│ Scheduler · Schedule · Sync  │
//!  StoragePort ◀─▶│ Arbiter ─▶ ActuatorPort      │
//!                 └──────────────────────────────┘
//! ```

use chrono::NaiveDateTime;
use log::{debug, info, warn};

use crate::arbiter::{FeedGate, FeedSource, FeedTicket, FeedingArbiter};
use crate::config::{
    FeederConfig, CONFIG_SAVE_DEBOUNCE_MS, FEEDING_MONITOR_INTERVAL_MS, MOTOR_MAINTENANCE_INTERVAL_MS,
    NETWORK_MONITOR_INTERVAL_MS, SCHEDULE_MONITOR_INTERVAL_MS, TIME_SOURCES, TIME_SYNC_TASK_INTERVAL_MS,
};
use crate::drivers::button::ButtonEvent;
use crate::error::{Error, FeedError, ScheduleError};
use crate::schedule::{FeedingScheduleEngine, Trigger};
use crate::scheduler::{Scheduler, TaskControl, TaskId, TaskStatus, MAX_TASKS};
use crate::status::{StatusDeriver, StatusInputs, SystemStatus};
use crate::timesync::{is_clock_valid, SyncOutcome, SyncPorts, TimeSyncEngine};

use super::commands::{AppCommand, CommandResponse};
use super::events::AppEvent;
use super::ports::{
    ActuatorPort, ClockPort, ConfigPort, EventSink, HttpTransport, NetworkPort, NtpTransport, StatusIndicator,
    StoragePort, TaskDelegate,
};

/// Borrowed hardware for one call into the service.
pub struct ServicePorts<'a> {
    pub clock: &'a mut dyn ClockPort,
    pub network: &'a mut dyn NetworkPort,
    pub ntp: &'a mut dyn NtpTransport,
    pub http: &'a mut dyn HttpTransport,
    pub storage: &'a mut dyn StoragePort,
    pub indicator: &'a mut dyn StatusIndicator,
    pub sink: &'a mut dyn EventSink,
}

impl ServicePorts<'_> {
    fn sync(&mut self) -> SyncPorts<'_> {
        SyncPorts {
            clock: &mut *self.clock,
            network: &mut *self.network,
            ntp: &mut *self.ntp,
            http: &mut *self.http,
            storage: &mut *self.storage,
        }
    }
}

// ───────────────────────────────────────────────────────────────
// FeederService
// ───────────────────────────────────────────────────────────────

pub struct FeederService<A: ActuatorPort> {
    scheduler: Scheduler,
    schedule: FeedingScheduleEngine,
    arbiter: FeedingArbiter<A>,
    timesync: TimeSyncEngine,
    status: StatusDeriver,
    config: FeederConfig,
    /// Last good clock reading, used when the RTC read fails mid-command.
    last_now: Option<NaiveDateTime>,
    tick_count: u64,
    config_dirty: bool,
    dirty_since_ms: u64,
}

impl<A: ActuatorPort> FeederService<A> {
    /// Build the service and restore persisted schedule state.
    ///
    /// Does **not** touch the clock or network; call [`start`](Self::start) next.
    pub fn new(config: FeederConfig, actuator: A, storage: &mut dyn StoragePort) -> Self {
        let mut schedule = FeedingScheduleEngine::load(storage);
        if let Err(e) = schedule.set_tolerance(config.tolerance_minutes) {
            warn!("service: {}; keeping default", e);
        }
        if let Err(e) = schedule.set_max_recovery_hours(config.max_recovery_hours) {
            warn!("service: {}; keeping default", e);
        }

        let mut timesync = TimeSyncEngine::new(TIME_SOURCES, &config);
        timesync.begin(storage);

        let mut scheduler = Scheduler::new();
        // Motor first and fastest so the arbiter never reads a stale busy flag.
        let tasks = [
            (TaskId::MotorMaintenance, MOTOR_MAINTENANCE_INTERVAL_MS, true),
            (TaskId::FeedingMonitor, FEEDING_MONITOR_INTERVAL_MS, false),
            (TaskId::ScheduleMonitor, SCHEDULE_MONITOR_INTERVAL_MS, true),
            (TaskId::NetworkMonitor, NETWORK_MONITOR_INTERVAL_MS, true),
            (TaskId::TimeSync, TIME_SYNC_TASK_INTERVAL_MS, true),
        ];
        for (task, interval_ms, enabled) in tasks {
            if scheduler.register(task, interval_ms, enabled).is_none() {
                warn!("service: task table full, {} not registered", task.name());
            }
        }

        Self {
            scheduler,
            schedule,
            arbiter: FeedingArbiter::new(actuator, config.steps_per_portion),
            timesync,
            status: StatusDeriver::new(),
            config,
            last_now: None,
            tick_count: 0,
            config_dirty: false,
            dirty_since_ms: 0,
        }
    }

    // ── Lifecycle ─────────────────────────────────────────────

    /// Show the boot status and prime the next-feeding cache.
    pub fn start(&mut self, io: &mut ServicePorts<'_>) {
        io.indicator.show(SystemStatus::Booting);
        match self.wall_clock(io) {
            Some(now) => {
                self.schedule.recompute_next(now);
                if !is_clock_valid(now) {
                    warn!("service: RTC reads {}, waiting for time sync", now);
                }
            }
            None => warn!("service: RTC unreadable at boot, waiting for time sync"),
        }
        match self.schedule.next_occurrence() {
            Some(next) => info!("service: started, next feeding at {} (entry {})", next.at, next.index),
            None => info!("service: started, nothing scheduled"),
        }
    }

    // ── Per-tick orchestration ────────────────────────────────

    /// One cooperative pass: run due tasks, then re-derive the status.
    pub fn tick(&mut self, now_ms: u64, io: &mut ServicePorts<'_>) {
        self.tick_count += 1;

        let mut ctx = TaskContext {
            schedule: &mut self.schedule,
            arbiter: &mut self.arbiter,
            timesync: &mut self.timesync,
            last_now: &mut self.last_now,
            io: &mut *io,
        };
        self.scheduler.tick(now_ms, &mut ctx);

        self.update_status(now_ms, io);
    }

    fn update_status(&mut self, now_ms: u64, io: &mut ServicePorts<'_>) {
        let inputs = StatusInputs {
            feeding: self.arbiter.is_feeding(),
            actuator_ready: self.arbiter.is_ready(),
            syncing: self.timesync.is_sync_in_progress(),
            network_up: io.network.is_connected(),
        };
        if let Some(status) = self.status.update(now_ms, inputs, &mut *io.indicator) {
            io.sink.emit(&AppEvent::StatusChanged(status));
        }
    }

    // ── Feeding ───────────────────────────────────────────────

    /// Start a feeding through the arbiter and arm the completion monitor.
    /// With `record_in_schedule` the feeding is stamped as the last meal so
    /// the schedule does not repeat it.
    pub fn start_feeding(
        &mut self,
        portions: u8,
        record_in_schedule: bool,
        source: FeedSource,
        now_ms: u64,
        io: &mut ServicePorts<'_>,
    ) -> Result<FeedTicket, FeedError> {
        match self.arbiter.start(portions, source, now_ms) {
            Ok(ticket) => {
                self.scheduler.enable(TaskId::FeedingMonitor);
                if record_in_schedule {
                    match self.wall_clock(io) {
                        Some(now) => self.schedule.record_manual_feeding(now, &mut *io.storage),
                        None => warn!("service: clock unavailable, {:?} feeding not recorded", source),
                    }
                }
                io.sink.emit(&AppEvent::FeedingStarted(ticket));
                Ok(ticket)
            }
            Err(reason) => {
                io.sink.emit(&AppEvent::FeedingRejected { source, reason });
                Err(reason)
            }
        }
    }

    /// Stop the motor at once and show the cancel pulse. `false` when
    /// nothing was running.
    pub fn cancel_feeding(&mut self, now_ms: u64, io: &mut ServicePorts<'_>) -> bool {
        if !self.arbiter.cancel() {
            debug!("service: cancel ignored, nothing in progress");
            return false;
        }
        self.scheduler.disable(TaskId::FeedingMonitor);
        self.status.raise_cancel_pulse(now_ms, &mut *io.indicator);
        io.sink.emit(&AppEvent::FeedingCancelled);
        io.sink.emit(&AppEvent::StatusChanged(SystemStatus::CancelPulse));
        true
    }

    /// Long press feeds, short press cancels a running feeding.
    pub fn on_button(&mut self, event: ButtonEvent, now_ms: u64, io: &mut ServicePorts<'_>) {
        match event {
            ButtonEvent::LongPress => {
                info!("service: button long press, feeding {} portion(s)", self.config.button_portions);
                let _ = self.start_feeding(self.config.button_portions, true, FeedSource::Button, now_ms, io);
            }
            ButtonEvent::ShortPress if self.arbiter.is_feeding() => {
                info!("service: button short press, cancelling feeding");
                self.cancel_feeding(now_ms, io);
            }
            ButtonEvent::ShortPress => debug!("service: short press ignored while idle"),
        }
    }

    // ── Command handling ──────────────────────────────────────

    /// Process an external command. Rejections leave all state unchanged.
    pub fn handle_command(&mut self, cmd: AppCommand, now_ms: u64, io: &mut ServicePorts<'_>) -> CommandResponse {
        match cmd {
            AppCommand::FeedNow { portions } => {
                match self.start_feeding(portions, true, FeedSource::Manual, now_ms, io) {
                    Ok(ticket) => CommandResponse::Feeding(ticket),
                    Err(e) => CommandResponse::Rejected(e.into()),
                }
            }
            AppCommand::CancelFeeding => {
                if self.cancel_feeding(now_ms, io) {
                    CommandResponse::Ok
                } else {
                    CommandResponse::Rejected(FeedError::NotFeeding.into())
                }
            }
            AppCommand::AddSchedule(entry) => {
                let now = self.wall_clock(io);
                let result = self.schedule.add(entry, now, &mut *io.storage).map(|_| ());
                self.schedule_changed(result, io)
            }
            AppCommand::EditSchedule { index, entry } => {
                let now = self.wall_clock(io);
                let result = self.schedule.edit(index, entry, now, &mut *io.storage);
                self.schedule_changed(result, io)
            }
            AppCommand::RemoveSchedule { index } => {
                let now = self.wall_clock(io);
                let result = self.schedule.remove(index, now, &mut *io.storage).map(|_| ());
                self.schedule_changed(result, io)
            }
            AppCommand::SetScheduleEnabled(enabled) => {
                self.schedule.set_enabled(enabled, &mut *io.storage);
                self.schedule_changed(Ok(()), io)
            }
            AppCommand::SetEntryEnabled { index, enabled } => {
                let now = self.wall_clock(io);
                let result = self.schedule.set_entry_enabled(index, enabled, now, &mut *io.storage);
                self.schedule_changed(result, io)
            }
            AppCommand::ClearSchedules => {
                let now = self.wall_clock(io);
                self.schedule.clear_all(now, &mut *io.storage);
                self.schedule_changed(Ok(()), io)
            }
            AppCommand::SetTolerance(minutes) => {
                let result = self.schedule.set_tolerance(minutes);
                if result.is_ok() {
                    self.config.tolerance_minutes = minutes;
                    self.mark_config_dirty(now_ms);
                }
                self.schedule_changed(result, io)
            }
            AppCommand::SetMaxRecoveryHours(hours) => {
                let result = self.schedule.set_max_recovery_hours(hours);
                if result.is_ok() {
                    self.config.max_recovery_hours = hours;
                    self.mark_config_dirty(now_ms);
                }
                self.schedule_changed(result, io)
            }
            AppCommand::SetSyncInterval(interval_ms) => {
                let result = self.timesync.set_sync_interval(interval_ms);
                if result.is_ok() {
                    self.config.sync_interval_ms = interval_ms;
                    self.mark_config_dirty(now_ms);
                }
                result.into()
            }
            AppCommand::ForceTimeSync => {
                if self.timesync.is_sync_in_progress() {
                    CommandResponse::Rejected(Error::Busy("time sync already running"))
                } else if self.timesync.force_sync_now(now_ms, &mut io.sync()) {
                    CommandResponse::Ok
                } else {
                    CommandResponse::Rejected(super::ports::TransportError::NotConnected.into())
                }
            }
        }
    }

    fn schedule_changed(&mut self, result: Result<(), ScheduleError>, io: &mut ServicePorts<'_>) -> CommandResponse {
        match result {
            Ok(()) => {
                io.sink.emit(&AppEvent::ScheduleChanged);
                CommandResponse::Ok
            }
            Err(e) => {
                warn!("service: schedule change rejected: {}", e);
                CommandResponse::Rejected(e.into())
            }
        }
    }

    /// Read the RTC, falling back to the last good reading.
    fn wall_clock(&mut self, io: &mut ServicePorts<'_>) -> Option<NaiveDateTime> {
        match io.clock.now() {
            Ok(now) => {
                self.last_now = Some(now);
                Some(now)
            }
            Err(e) => {
                warn!("service: RTC read failed: {}", e);
                self.last_now
            }
        }
    }

    // ── Queries ───────────────────────────────────────────────

    pub fn schedule(&self) -> &FeedingScheduleEngine {
        &self.schedule
    }

    pub fn arbiter(&self) -> &FeedingArbiter<A> {
        &self.arbiter
    }

    pub fn timesync(&self) -> &TimeSyncEngine {
        &self.timesync
    }

    pub fn status(&self) -> SystemStatus {
        self.status.current()
    }

    pub fn is_feeding(&self) -> bool {
        self.arbiter.is_feeding()
    }

    /// Name, interval, enabled flag and run count of every task.
    pub fn task_statuses(&self) -> heapless::Vec<TaskStatus, MAX_TASKS> {
        self.scheduler.statuses()
    }

    pub fn is_task_enabled(&self, task: TaskId) -> bool {
        self.scheduler.is_enabled(task)
    }

    /// Cooperative passes executed since startup.
    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }

    pub fn current_config(&self) -> FeederConfig {
        self.config.clone()
    }

    // ── Config dirty-flag management ──────────────────────────

    /// Mark the config as modified by a runtime command.
    pub fn mark_config_dirty(&mut self, now_ms: u64) {
        if !self.config_dirty {
            self.config_dirty = true;
            self.dirty_since_ms = now_ms;
        }
    }

    /// Flush the config once it has been quiet for the debounce period.
    /// Returns `true` if the config was saved.
    pub fn auto_save_if_needed(&mut self, now_ms: u64, storage: &dyn ConfigPort) -> bool {
        if !self.config_dirty || now_ms.saturating_sub(self.dirty_since_ms) < CONFIG_SAVE_DEBOUNCE_MS {
            return false;
        }
        match storage.save(&self.config) {
            Ok(()) => {
                self.config_dirty = false;
                info!("service: config auto-saved to NVS");
                true
            }
            Err(e) => {
                warn!("service: config auto-save failed: {}", e);
                false
            }
        }
    }

    pub fn is_config_dirty(&self) -> bool {
        self.config_dirty
    }
}

// ───────────────────────────────────────────────────────────────
// Task bodies
// ───────────────────────────────────────────────────────────────

/// Short-lived view handed to the scheduler for one pass. Borrows the
/// engines disjointly from the scheduler that drives them.
struct TaskContext<'s, 'p, A: ActuatorPort> {
    schedule: &'s mut FeedingScheduleEngine,
    arbiter: &'s mut FeedingArbiter<A>,
    timesync: &'s mut TimeSyncEngine,
    last_now: &'s mut Option<NaiveDateTime>,
    io: &'s mut ServicePorts<'p>,
}

/// The schedule engine's only way to the arbiter.
struct ArbiterGate<'a, A: ActuatorPort> {
    arbiter: &'a mut FeedingArbiter<A>,
    now_ms: u64,
}

impl<A: ActuatorPort> FeedGate for ArbiterGate<'_, A> {
    fn is_feeding(&self) -> bool {
        self.arbiter.is_feeding()
    }

    fn dispatch(&mut self, portions: u8, source: FeedSource) -> Result<FeedTicket, FeedError> {
        self.arbiter.start(portions, source, self.now_ms)
    }
}

impl<A: ActuatorPort> TaskDelegate for TaskContext<'_, '_, A> {
    fn run(&mut self, task: TaskId, now_ms: u64, ctl: &mut TaskControl) {
        match task {
            TaskId::MotorMaintenance => self.arbiter.service(now_ms),
            TaskId::FeedingMonitor => {
                if let Some(done) = self.arbiter.poll_completion(now_ms) {
                    self.io.sink.emit(&AppEvent::FeedingCompleted {
                        ticket: done.ticket,
                        duration_ms: now_ms.saturating_sub(done.started_ms),
                    });
                }
                if !self.arbiter.is_feeding() {
                    ctl.disable(TaskId::FeedingMonitor);
                }
            }
            TaskId::ScheduleMonitor => self.process_schedule(now_ms, ctl),
            TaskId::NetworkMonitor => {
                let up = self.io.network.is_connected();
                let outcome = self.timesync.on_network_change(up, now_ms, &mut self.io.sync());
                self.report_sync(outcome);
            }
            TaskId::TimeSync => {
                let outcome = self.timesync.tick(now_ms, &mut self.io.sync());
                self.report_sync(outcome);
            }
        }
    }
}

impl<A: ActuatorPort> TaskContext<'_, '_, A> {
    fn process_schedule(&mut self, now_ms: u64, ctl: &mut TaskControl) {
        let now = match self.io.clock.now() {
            Ok(now) => now,
            Err(e) => {
                warn!("schedule: RTC read failed: {}", e);
                return;
            }
        };
        *self.last_now = Some(now);
        if !is_clock_valid(now) {
            debug!("schedule: clock not set, skipping");
            return;
        }

        let mut gate = ArbiterGate { arbiter: &mut *self.arbiter, now_ms };
        let Some(dispatched) = self.schedule.process(now, &mut gate, &mut *self.io.storage) else {
            return;
        };
        match dispatched.result {
            Ok(ticket) => {
                ctl.enable(TaskId::FeedingMonitor);
                self.io.sink.emit(&AppEvent::FeedingStarted(ticket));
            }
            Err(reason) => {
                let source = match dispatched.trigger {
                    Trigger::OnTime => FeedSource::Scheduled,
                    Trigger::Recovered { .. } => FeedSource::Recovered,
                };
                self.io.sink.emit(&AppEvent::FeedingRejected { source, reason });
            }
        }
    }

    fn report_sync(&mut self, outcome: Option<SyncOutcome>) {
        match outcome {
            Some(SyncOutcome::Synced { source, delta_secs, .. }) => {
                if let Ok(now) = self.io.clock.now() {
                    *self.last_now = Some(now);
                    self.schedule.recompute_next(now);
                }
                self.io.sink.emit(&AppEvent::TimeSynced { source, delta_secs });
            }
            Some(SyncOutcome::Failed) => self.io.sink.emit(&AppEvent::TimeSyncFailed),
            None => {}
        }
    }
}
