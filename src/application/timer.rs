use crate::domain::models::TimerStep;
use crate::infrastructure::error::InfraError;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

pub type NowProvider = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TimerStatus {
    Idle,
    Running,
    Paused,
    Stopped,
}

impl TimerStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Stopped => "stopped",
        }
    }
}

/// Per-task timer bookkeeping. The engine's `active` pointer names the one record
/// currently accruing time.
#[derive(Debug, Clone)]
struct TimerRecord {
    status: TimerStatus,
    accumulated_ms: i64,
    started_at: Option<DateTime<Utc>>,
    scheduled_seconds: u32,
    exceed_fired: bool,
    alert_active: bool,
}

impl TimerRecord {
    fn new_run(scheduled_seconds: u32, prior_elapsed_seconds: u32) -> Self {
        Self {
            status: TimerStatus::Idle,
            accumulated_ms: i64::from(prior_elapsed_seconds) * 1000,
            started_at: None,
            scheduled_seconds,
            exceed_fired: false,
            alert_active: false,
        }
    }

    fn elapsed_ms(&self, now: DateTime<Utc>) -> i64 {
        let running_ms = match (self.status, self.started_at) {
            (TimerStatus::Running, Some(started_at)) => {
                (now - started_at).num_milliseconds().max(0)
            }
            _ => 0,
        };
        self.accumulated_ms + running_ms
    }

    fn elapsed_seconds(&self, now: DateTime<Utc>) -> u32 {
        u32::try_from(self.elapsed_ms(now) / 1000).unwrap_or(u32::MAX)
    }

    fn remaining_seconds(&self, now: DateTime<Utc>) -> u32 {
        self.scheduled_seconds
            .saturating_sub(self.elapsed_seconds(now))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TimerSnapshot {
    pub task_id: String,
    pub status: TimerStatus,
    pub elapsed_seconds: u32,
    pub remaining_seconds: u32,
    pub completion_percentage: u8,
    pub exceeded: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StopOutcome {
    pub task_id: String,
    pub elapsed_seconds: u32,
    pub scheduled_seconds: u32,
    pub step: TimerStep,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartOutcome {
    pub snapshot: TimerSnapshot,
    /// The timer that was force-stopped to make room for this one.
    pub stopped: Option<StopOutcome>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickOutcome {
    pub snapshot: TimerSnapshot,
    /// True only on the tick where the scheduled duration was first exceeded in this run.
    pub exceeded_now: bool,
}

/// Single-active-timer state machine: idle -> running <-> paused -> stopped.
pub struct TimerEngine {
    records: HashMap<String, TimerRecord>,
    active: Option<String>,
    now_provider: NowProvider,
}

impl Default for TimerEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl TimerEngine {
    pub fn new() -> Self {
        Self {
            records: HashMap::new(),
            active: None,
            now_provider: Arc::new(Utc::now),
        }
    }

    pub fn with_now_provider(mut self, now_provider: NowProvider) -> Self {
        self.now_provider = now_provider;
        self
    }

    fn now(&self) -> DateTime<Utc> {
        (self.now_provider)()
    }

    pub fn active_task_id(&self) -> Option<&str> {
        self.active.as_deref()
    }

    /// Tasks with a running or paused timer, the running one first.
    pub fn unfinished_task_ids(&self) -> Vec<String> {
        let mut paused = self
            .records
            .iter()
            .filter(|(_, record)| record.status == TimerStatus::Paused)
            .map(|(task_id, _)| task_id.clone())
            .collect::<Vec<_>>();
        paused.sort();
        self.active.iter().cloned().chain(paused).collect()
    }

    /// Starts (or continues) `task_id`. Any other running timer is stopped first.
    /// A paused record continues from its accumulated time; otherwise a new run begins at
    /// `prior_elapsed_seconds`.
    pub fn start(
        &mut self,
        task_id: &str,
        scheduled_seconds: u32,
        prior_elapsed_seconds: u32,
    ) -> Result<StartOutcome, InfraError> {
        let task_id = task_id.trim();
        if task_id.is_empty() {
            return Err(InfraError::Validation("task_id must not be empty".to_string()));
        }

        if self.active.as_deref() == Some(task_id) {
            return Ok(StartOutcome {
                snapshot: self.snapshot_of(task_id)?,
                stopped: None,
            });
        }

        let stopped = match self.active.clone() {
            Some(previous) => Some(self.stop(&previous)?),
            None => None,
        };

        let now = self.now();
        let record = self
            .records
            .entry(task_id.to_string())
            .and_modify(|record| {
                if record.status != TimerStatus::Paused {
                    *record = TimerRecord::new_run(scheduled_seconds, prior_elapsed_seconds);
                }
            })
            .or_insert_with(|| TimerRecord::new_run(scheduled_seconds, prior_elapsed_seconds));
        record.scheduled_seconds = scheduled_seconds;
        record.status = TimerStatus::Running;
        record.started_at = Some(now);
        self.active = Some(task_id.to_string());

        Ok(StartOutcome {
            snapshot: self.snapshot_of(task_id)?,
            stopped,
        })
    }

    /// Continues a paused timer; fails for any other state.
    pub fn resume(&mut self, task_id: &str) -> Result<StartOutcome, InfraError> {
        let record = self
            .records
            .get(task_id)
            .ok_or_else(|| InfraError::InvalidTimerState(format!("no timer for task {task_id}")))?;
        if record.status != TimerStatus::Paused {
            return Err(InfraError::InvalidTimerState(format!(
                "timer for task {task_id} is {}, not paused",
                record.status.as_str()
            )));
        }
        let scheduled_seconds = record.scheduled_seconds;
        self.start(task_id, scheduled_seconds, 0)
    }

    /// Pauses the running timer, folding the running interval into its total.
    pub fn pause(&mut self) -> Result<TimerSnapshot, InfraError> {
        let task_id = self
            .active
            .take()
            .ok_or_else(|| InfraError::InvalidTimerState("timer is not running".to_string()))?;
        let now = self.now();
        if let Some(record) = self.records.get_mut(&task_id) {
            record.accumulated_ms = record.elapsed_ms(now);
            record.started_at = None;
            record.status = TimerStatus::Paused;
        }
        self.snapshot_of(&task_id)
    }

    /// Finalizes a running or paused timer and builds the closing timer step.
    pub fn stop(&mut self, task_id: &str) -> Result<StopOutcome, InfraError> {
        let now = self.now();
        let record = self
            .records
            .get_mut(task_id)
            .ok_or_else(|| InfraError::InvalidTimerState(format!("no timer for task {task_id}")))?;
        if !matches!(record.status, TimerStatus::Running | TimerStatus::Paused) {
            return Err(InfraError::InvalidTimerState(format!(
                "timer for task {task_id} is {}, not running or paused",
                record.status.as_str()
            )));
        }

        let elapsed_seconds = record.elapsed_seconds(now);
        record.accumulated_ms = i64::from(elapsed_seconds) * 1000;
        record.started_at = None;
        record.status = TimerStatus::Stopped;
        record.alert_active = false;
        let scheduled_seconds = record.scheduled_seconds;

        if self.active.as_deref() == Some(task_id) {
            self.active = None;
        }

        Ok(StopOutcome {
            task_id: task_id.to_string(),
            elapsed_seconds,
            scheduled_seconds,
            step: TimerStep {
                description: completion_step_description(elapsed_seconds, scheduled_seconds),
                elapsed_time: elapsed_seconds,
                recorded_at: now,
            },
        })
    }

    /// Clears the active timer unconditionally, discarding its unsaved time.
    pub fn reset(&mut self) -> Option<String> {
        let task_id = self.active.take()?;
        self.records.remove(&task_id);
        Some(task_id)
    }

    /// Drops all timer state for a task (used when the task is deleted).
    pub fn discard(&mut self, task_id: &str) -> bool {
        if self.active.as_deref() == Some(task_id) {
            self.active = None;
        }
        self.records.remove(task_id).is_some()
    }

    pub fn dismiss_alert(&mut self, task_id: &str) {
        if let Some(record) = self.records.get_mut(task_id) {
            record.alert_active = false;
        }
    }

    /// Advances the active timer; raises the exceeded alert at most once per run.
    pub fn tick(&mut self) -> Option<TickOutcome> {
        let task_id = self.active.clone()?;
        let now = self.now();
        let record = self.records.get_mut(&task_id)?;
        let mut exceeded_now = false;
        let overran = record.scheduled_seconds > 0 && record.remaining_seconds(now) == 0;
        if overran && !record.exceed_fired {
            record.exceed_fired = true;
            record.alert_active = true;
            exceeded_now = true;
        }
        let snapshot = self.snapshot_of(&task_id).ok()?;
        Some(TickOutcome {
            snapshot,
            exceeded_now,
        })
    }

    pub fn status(&self, task_id: &str) -> TimerStatus {
        self.records
            .get(task_id)
            .map(|record| record.status)
            .unwrap_or(TimerStatus::Idle)
    }

    pub fn snapshot(&self, task_id: &str) -> Option<TimerSnapshot> {
        self.snapshot_of(task_id).ok()
    }

    pub fn elapsed_seconds(&self, task_id: &str) -> u32 {
        let now = self.now();
        self.records
            .get(task_id)
            .map(|record| record.elapsed_seconds(now))
            .unwrap_or(0)
    }

    pub fn remaining_seconds(&self, task_id: &str) -> u32 {
        let now = self.now();
        self.records
            .get(task_id)
            .map(|record| record.remaining_seconds(now))
            .unwrap_or(0)
    }

    pub fn completion_percentage(&self, task_id: &str) -> u8 {
        let now = self.now();
        self.records
            .get(task_id)
            .map(|record| {
                completion_percentage(record.elapsed_seconds(now), record.scheduled_seconds)
            })
            .unwrap_or(0)
    }

    fn snapshot_of(&self, task_id: &str) -> Result<TimerSnapshot, InfraError> {
        let record = self
            .records
            .get(task_id)
            .ok_or_else(|| InfraError::InvalidTimerState(format!("no timer for task {task_id}")))?;
        let now = self.now();
        let elapsed_seconds = record.elapsed_seconds(now);
        Ok(TimerSnapshot {
            task_id: task_id.to_string(),
            status: record.status,
            elapsed_seconds,
            remaining_seconds: record.remaining_seconds(now),
            completion_percentage: completion_percentage(elapsed_seconds, record.scheduled_seconds),
            exceeded: record.alert_active,
        })
    }
}

/// Share of the scheduled duration already elapsed, capped at 100. Zero duration yields 0.
pub fn completion_percentage(elapsed_seconds: u32, scheduled_seconds: u32) -> u8 {
    if scheduled_seconds == 0 {
        return 0;
    }
    let percentage = u64::from(elapsed_seconds) * 100 / u64::from(scheduled_seconds);
    percentage.min(100) as u8
}

/// `MM:SS` under an hour, `H:MM:SS` from one hour on.
pub fn format_time(seconds: u32) -> String {
    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;
    let secs = seconds % 60;
    if hours > 0 {
        format!("{hours}:{minutes:02}:{secs:02}")
    } else {
        format!("{minutes:02}:{secs:02}")
    }
}

fn completion_step_description(elapsed_seconds: u32, scheduled_seconds: u32) -> String {
    if scheduled_seconds == 0 {
        return format!("Tracked {}", format_time(elapsed_seconds));
    }
    let difference = i64::from(elapsed_seconds) - i64::from(scheduled_seconds);
    let minutes = (difference.abs() + 30) / 60;
    let unit = if minutes == 1 { "minute" } else { "minutes" };
    match (difference.signum(), minutes) {
        (_, 0) => "Finished on time".to_string(),
        (1, _) => format!("Finished with {minutes} extra {unit}"),
        _ => format!("Finished {minutes} {unit} early"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use proptest::prelude::*;
    use std::sync::Mutex;

    #[derive(Clone)]
    struct ManualClock {
        now: Arc<Mutex<DateTime<Utc>>>,
    }

    impl ManualClock {
        fn new() -> Self {
            let start = DateTime::parse_from_rfc3339("2026-02-16T09:00:00Z")
                .expect("valid datetime")
                .with_timezone(&Utc);
            Self {
                now: Arc::new(Mutex::new(start)),
            }
        }

        fn advance(&self, duration: Duration) {
            let mut now = self.now.lock().expect("clock lock poisoned");
            *now += duration;
        }

        fn provider(&self) -> NowProvider {
            let now = Arc::clone(&self.now);
            Arc::new(move || *now.lock().expect("clock lock poisoned"))
        }
    }

    fn engine(clock: &ManualClock) -> TimerEngine {
        TimerEngine::new().with_now_provider(clock.provider())
    }

    #[test]
    fn exceeding_alert_fires_exactly_once_per_run() {
        let clock = ManualClock::new();
        let mut timer = engine(&clock);
        timer.start("task-a", 15 * 60, 0).expect("start timer");

        clock.advance(Duration::minutes(16));
        let first = timer.tick().expect("active tick");
        assert_eq!(first.snapshot.remaining_seconds, 0);
        assert!(first.exceeded_now);
        assert!(first.snapshot.exceeded);

        clock.advance(Duration::seconds(1));
        let second = timer.tick().expect("active tick");
        assert!(!second.exceeded_now);
        assert!(second.snapshot.exceeded);

        timer.dismiss_alert("task-a");
        clock.advance(Duration::seconds(1));
        let third = timer.tick().expect("active tick");
        assert!(!third.exceeded_now);
        assert!(!third.snapshot.exceeded);
    }

    #[test]
    fn stop_reports_elapsed_and_late_step() {
        let clock = ManualClock::new();
        let mut timer = engine(&clock);
        timer.start("task-a", 15 * 60, 0).expect("start timer");
        clock.advance(Duration::minutes(16));

        let outcome = timer.stop("task-a").expect("stop timer");
        assert_eq!(outcome.elapsed_seconds, 960);
        assert_eq!(outcome.step.elapsed_time, 960);
        assert_eq!(outcome.step.description, "Finished with 1 extra minute");
        assert_eq!(timer.status("task-a"), TimerStatus::Stopped);
        assert_eq!(timer.active_task_id(), None);
        assert!(timer.tick().is_none());
    }

    #[test]
    fn pause_freezes_and_start_continues_from_total() {
        let clock = ManualClock::new();
        let mut timer = engine(&clock);
        timer.start("task-a", 30 * 60, 0).expect("start timer");
        clock.advance(Duration::minutes(5));

        let paused = timer.pause().expect("pause timer");
        assert_eq!(paused.status, TimerStatus::Paused);
        assert_eq!(paused.elapsed_seconds, 300);
        assert_eq!(timer.active_task_id(), None);

        clock.advance(Duration::minutes(10));
        assert_eq!(timer.elapsed_seconds("task-a"), 300);

        let resumed = timer.resume("task-a").expect("resume timer");
        assert_eq!(resumed.snapshot.status, TimerStatus::Running);
        clock.advance(Duration::minutes(2));
        assert_eq!(timer.elapsed_seconds("task-a"), 420);

        let stopped = timer.stop("task-a").expect("stop timer");
        assert_eq!(stopped.step.description, "Finished 23 minutes early");
    }

    #[test]
    fn starting_another_task_stops_the_running_one_first() {
        let clock = ManualClock::new();
        let mut timer = engine(&clock);
        timer.start("task-a", 15 * 60, 0).expect("start a");
        clock.advance(Duration::minutes(15));

        let outcome = timer.start("task-b", 30 * 60, 0).expect("start b");
        let stopped = outcome.stopped.expect("task a stopped");
        assert_eq!(stopped.task_id, "task-a");
        assert_eq!(stopped.elapsed_seconds, 900);
        assert_eq!(stopped.step.description, "Finished on time");
        assert_eq!(timer.status("task-a"), TimerStatus::Stopped);
        assert_eq!(timer.status("task-b"), TimerStatus::Running);
        assert_eq!(timer.active_task_id(), Some("task-b"));
    }

    #[test]
    fn paused_timer_is_not_force_stopped_by_another_start() {
        let clock = ManualClock::new();
        let mut timer = engine(&clock);
        timer.start("task-a", 900, 0).expect("start a");
        timer.pause().expect("pause a");
        let outcome = timer.start("task-b", 900, 0).expect("start b");
        assert!(outcome.stopped.is_none());
        assert_eq!(timer.status("task-a"), TimerStatus::Paused);
        assert_eq!(timer.unfinished_task_ids(), vec!["task-b", "task-a"]);
        assert!(timer.stop("task-a").is_ok());
        assert_eq!(timer.unfinished_task_ids(), vec!["task-b"]);
    }

    #[test]
    fn invalid_transitions_are_rejected() {
        let clock = ManualClock::new();
        let mut timer = engine(&clock);
        assert!(matches!(timer.pause(), Err(InfraError::InvalidTimerState(_))));
        assert!(matches!(timer.stop("task-a"), Err(InfraError::InvalidTimerState(_))));
        assert!(matches!(timer.resume("task-a"), Err(InfraError::InvalidTimerState(_))));
        assert!(matches!(timer.start(" ", 900, 0), Err(InfraError::Validation(_))));

        timer.start("task-a", 900, 0).expect("start a");
        timer.stop("task-a").expect("stop a");
        assert!(matches!(timer.stop("task-a"), Err(InfraError::InvalidTimerState(_))));
    }

    #[test]
    fn restart_after_stop_continues_from_persisted_elapsed() {
        let clock = ManualClock::new();
        let mut timer = engine(&clock);
        timer.start("task-a", 900, 0).expect("start");
        clock.advance(Duration::minutes(5));
        let first = timer.stop("task-a").expect("stop");

        timer
            .start("task-a", 900, first.elapsed_seconds)
            .expect("restart");
        clock.advance(Duration::minutes(1));
        assert_eq!(timer.elapsed_seconds("task-a"), 360);
    }

    #[test]
    fn reset_and_discard_clear_state() {
        let clock = ManualClock::new();
        let mut timer = engine(&clock);
        timer.start("task-a", 900, 0).expect("start");
        clock.advance(Duration::minutes(3));
        assert_eq!(timer.reset().as_deref(), Some("task-a"));
        assert_eq!(timer.active_task_id(), None);
        assert_eq!(timer.status("task-a"), TimerStatus::Idle);
        assert_eq!(timer.elapsed_seconds("task-a"), 0);
        assert_eq!(timer.reset(), None);

        timer.start("task-b", 900, 0).expect("start b");
        assert!(timer.discard("task-b"));
        assert_eq!(timer.active_task_id(), None);
        assert!(!timer.discard("task-b"));
    }

    #[test]
    fn completion_percentage_handles_zero_duration() {
        assert_eq!(completion_percentage(120, 0), 0);
        assert_eq!(completion_percentage(450, 900), 50);
        assert_eq!(completion_percentage(1800, 900), 100);
    }

    #[test]
    fn format_time_switches_to_hours() {
        assert_eq!(format_time(0), "00:00");
        assert_eq!(format_time(965), "16:05");
        assert_eq!(format_time(3_725), "1:02:05");
    }

    proptest! {
        #[test]
        fn elapsed_is_monotonic_and_remaining_never_increases(
            scheduled_minutes in 1u32..120u32,
            steps in proptest::collection::vec(0i64..5_000i64, 1..40)
        ) {
            let clock = ManualClock::new();
            let mut timer = engine(&clock);
            timer.start("task-a", scheduled_minutes * 60, 0).expect("start");
            let mut previous = timer.tick().expect("tick").snapshot;
            let mut alerts = 0u32;

            for step in steps {
                clock.advance(Duration::milliseconds(step));
                let outcome = timer.tick().expect("tick");
                prop_assert!(outcome.snapshot.elapsed_seconds >= previous.elapsed_seconds);
                prop_assert!(outcome.snapshot.remaining_seconds <= previous.remaining_seconds);
                if outcome.exceeded_now {
                    alerts += 1;
                }
                previous = outcome.snapshot;
            }
            prop_assert!(alerts <= 1);
        }
    }
}
