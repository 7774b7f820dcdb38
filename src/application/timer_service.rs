use crate::application::store::TaskStore;
use crate::application::timer::{StopOutcome, TimerEngine, TimerSnapshot};
use crate::domain::models::{TaskEntry, TimerStep};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::notifier::{notify_best_effort, TimerNotification, TimerNotifier};
use crate::infrastructure::task_repository::TaskRepository;
use chrono::Utc;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Couples the timer engine to the task store. Owns the single ticker task, which only
/// exists while a timer is running.
pub struct TimerService<P: TaskRepository + 'static> {
    engine: Arc<Mutex<TimerEngine>>,
    store: Arc<TaskStore<P>>,
    notifier: Arc<dyn TimerNotifier>,
    snapshots: Arc<watch::Sender<Option<TimerSnapshot>>>,
    ticker: Mutex<Option<JoinHandle<()>>>,
    tick_interval: Duration,
}

fn lock_engine(engine: &Mutex<TimerEngine>) -> Result<MutexGuard<'_, TimerEngine>, InfraError> {
    engine
        .lock()
        .map_err(|error| InfraError::InvalidTimerState(format!("timer lock poisoned: {error}")))
}

impl<P: TaskRepository + 'static> TimerService<P> {
    pub fn new(
        store: Arc<TaskStore<P>>,
        notifier: Arc<dyn TimerNotifier>,
        tick_interval: Duration,
    ) -> Self {
        let (snapshots, _) = watch::channel(None);
        Self {
            engine: Arc::new(Mutex::new(TimerEngine::new())),
            store,
            notifier,
            snapshots: Arc::new(snapshots),
            ticker: Mutex::new(None),
            tick_interval,
        }
    }

    pub fn with_engine(mut self, engine: TimerEngine) -> Self {
        self.engine = Arc::new(Mutex::new(engine));
        self
    }

    /// Latest snapshot of the timer being displayed; `None` after a reset.
    pub fn subscribe(&self) -> watch::Receiver<Option<TimerSnapshot>> {
        self.snapshots.subscribe()
    }

    pub fn active_task_id(&self) -> Result<Option<String>, InfraError> {
        Ok(lock_engine(&self.engine)?.active_task_id().map(ToOwned::to_owned))
    }

    pub fn unfinished_task_ids(&self) -> Result<Vec<String>, InfraError> {
        Ok(lock_engine(&self.engine)?.unfinished_task_ids())
    }

    pub fn snapshot(&self, task_id: &str) -> Result<Option<TimerSnapshot>, InfraError> {
        Ok(lock_engine(&self.engine)?.snapshot(task_id))
    }

    pub fn completion_percentage(&self, task_id: &str) -> Result<u8, InfraError> {
        Ok(lock_engine(&self.engine)?.completion_percentage(task_id))
    }

    /// Starts `task_id`, force-stopping and persisting any other running timer first.
    /// A failure to persist the previous timer is logged and left in the store's error slot;
    /// the new timer still starts.
    pub async fn start(&self, task_id: &str) -> Result<TimerSnapshot, InfraError> {
        let entry = self
            .store
            .entry(task_id)?
            .ok_or_else(|| InfraError::NotFound(format!("task {task_id}")))?;
        let scheduled_seconds = match &entry {
            TaskEntry::Scheduled(scheduled) => scheduled.duration_minutes() * 60,
            TaskEntry::ParkingLot(_) => 0,
        };
        let prior_elapsed = entry.task().timer_elapsed.unwrap_or(0);

        let outcome = lock_engine(&self.engine)?.start(task_id, scheduled_seconds, prior_elapsed)?;
        if let Some(stopped) = outcome.stopped {
            info!(task_id = %stopped.task_id, "stopping running timer before starting another");
            if let Err(error) = self.finish(stopped).await {
                warn!(%error, "force-stopped timer result was not persisted");
            }
        }

        notify_best_effort(
            self.notifier.as_ref(),
            TimerNotification::Started {
                task_id: task_id.to_string(),
            },
        );
        self.publish(Some(outcome.snapshot.clone()));
        self.ensure_ticker()?;
        info!(task_id, scheduled_seconds, prior_elapsed, "timer started");
        Ok(outcome.snapshot)
    }

    pub fn pause(&self) -> Result<TimerSnapshot, InfraError> {
        let snapshot = lock_engine(&self.engine)?.pause()?;
        self.stop_ticker()?;
        self.publish(Some(snapshot.clone()));
        info!(task_id = %snapshot.task_id, elapsed = snapshot.elapsed_seconds, "timer paused");
        Ok(snapshot)
    }

    pub fn resume(&self, task_id: &str) -> Result<TimerSnapshot, InfraError> {
        let outcome = lock_engine(&self.engine)?.resume(task_id)?;
        notify_best_effort(
            self.notifier.as_ref(),
            TimerNotification::Started {
                task_id: task_id.to_string(),
            },
        );
        self.publish(Some(outcome.snapshot.clone()));
        self.ensure_ticker()?;
        info!(task_id, "timer resumed");
        Ok(outcome.snapshot)
    }

    /// Stops the timer and persists its total and closing step. The stopped state stands
    /// even when persistence fails; the error is returned for display.
    pub async fn stop(&self, task_id: &str) -> Result<StopOutcome, InfraError> {
        let outcome = lock_engine(&self.engine)?.stop(task_id)?;
        self.stop_ticker_if_idle()?;
        let snapshot = self.snapshot(task_id)?;
        self.publish(snapshot);
        self.finish(outcome.clone()).await?;
        Ok(outcome)
    }

    async fn finish(&self, outcome: StopOutcome) -> Result<(), InfraError> {
        notify_best_effort(
            self.notifier.as_ref(),
            TimerNotification::Stopped {
                task_id: outcome.task_id.clone(),
                elapsed_seconds: outcome.elapsed_seconds,
            },
        );
        info!(
            task_id = %outcome.task_id,
            elapsed = outcome.elapsed_seconds,
            scheduled = outcome.scheduled_seconds,
            "timer stopped"
        );
        self.store
            .record_timer_result(&outcome.task_id, outcome.elapsed_seconds, outcome.step)
            .await
            .inspect_err(|error| {
                warn!(task_id = %outcome.task_id, %error, "timer result diverges from stored task");
            })
    }

    /// Abandons the active timer without saving anything.
    pub fn reset(&self) -> Result<Option<String>, InfraError> {
        let cleared = lock_engine(&self.engine)?.reset();
        self.stop_ticker()?;
        self.publish(None);
        if let Some(task_id) = &cleared {
            info!(%task_id, "timer reset");
        }
        Ok(cleared)
    }

    /// Drops timer state for a deleted task.
    pub fn discard(&self, task_id: &str) -> Result<bool, InfraError> {
        let discarded = lock_engine(&self.engine)?.discard(task_id);
        self.stop_ticker_if_idle()?;
        if discarded {
            let displayed = self.snapshots.borrow().as_ref().map(|s| s.task_id == task_id);
            if displayed == Some(true) {
                self.publish(None);
            }
        }
        Ok(discarded)
    }

    pub fn dismiss_alert(&self, task_id: &str) -> Result<(), InfraError> {
        let snapshot = {
            let mut engine = lock_engine(&self.engine)?;
            engine.dismiss_alert(task_id);
            engine.snapshot(task_id)
        };
        if snapshot.is_some() {
            self.publish(snapshot);
        }
        Ok(())
    }

    /// Records a checkpoint at the task's current elapsed time.
    pub async fn add_checkpoint(
        &self,
        task_id: &str,
        description: &str,
    ) -> Result<TimerStep, InfraError> {
        let description = description.trim();
        if description.is_empty() {
            return Err(InfraError::Validation(
                "checkpoint description must not be empty".to_string(),
            ));
        }
        let elapsed_time = lock_engine(&self.engine)?.elapsed_seconds(task_id);
        let step = TimerStep {
            description: description.to_string(),
            elapsed_time,
            recorded_at: Utc::now(),
        };
        self.store.add_timer_step(task_id, step.clone()).await?;
        Ok(step)
    }

    fn publish(&self, snapshot: Option<TimerSnapshot>) {
        self.snapshots.send_replace(snapshot);
    }

    fn ensure_ticker(&self) -> Result<(), InfraError> {
        let mut ticker = self.ticker.lock().map_err(|error| {
            InfraError::InvalidTimerState(format!("ticker lock poisoned: {error}"))
        })?;
        if ticker.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return Ok(());
        }
        *ticker = Some(tokio::spawn(run_ticker(
            Arc::clone(&self.engine),
            Arc::clone(&self.notifier),
            Arc::clone(&self.snapshots),
            self.tick_interval,
        )));
        Ok(())
    }

    fn stop_ticker(&self) -> Result<(), InfraError> {
        let mut ticker = self.ticker.lock().map_err(|error| {
            InfraError::InvalidTimerState(format!("ticker lock poisoned: {error}"))
        })?;
        if let Some(handle) = ticker.take() {
            handle.abort();
            debug!("timer ticker stopped");
        }
        Ok(())
    }

    fn stop_ticker_if_idle(&self) -> Result<(), InfraError> {
        if lock_engine(&self.engine)?.active_task_id().is_none() {
            self.stop_ticker()?;
        }
        Ok(())
    }

    pub fn ticker_running(&self) -> bool {
        self.ticker
            .lock()
            .map(|ticker| ticker.as_ref().is_some_and(|handle| !handle.is_finished()))
            .unwrap_or(false)
    }
}

impl<P: TaskRepository + 'static> Drop for TimerService<P> {
    fn drop(&mut self) {
        if let Ok(mut ticker) = self.ticker.lock() {
            if let Some(handle) = ticker.take() {
                handle.abort();
            }
        }
    }
}

async fn run_ticker(
    engine: Arc<Mutex<TimerEngine>>,
    notifier: Arc<dyn TimerNotifier>,
    snapshots: Arc<watch::Sender<Option<TimerSnapshot>>>,
    period: Duration,
) {
    let mut interval = interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        interval.tick().await;
        let outcome = match engine.lock() {
            Ok(mut engine) => engine.tick(),
            Err(error) => {
                warn!(%error, "timer lock poisoned; ticker exiting");
                return;
            }
        };
        let Some(outcome) = outcome else {
            debug!("no active timer; ticker exiting");
            return;
        };
        if outcome.exceeded_now {
            info!(task_id = %outcome.snapshot.task_id, "scheduled duration exceeded");
            notify_best_effort(
                notifier.as_ref(),
                TimerNotification::Exceeded {
                    task_id: outcome.snapshot.task_id.clone(),
                },
            );
        }
        snapshots.send_replace(Some(outcome.snapshot));
    }
}
