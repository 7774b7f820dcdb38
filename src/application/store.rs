use crate::application::optimistic::{lock_state, transact, StoreState};
use crate::application::scheduler::{
    apply_move, compute_occupied_slots, task_span, DropTarget, MoveOutcome, RejectReason,
};
use crate::domain::collections::TaskCollections;
use crate::domain::ids::next_id;
use crate::domain::models::{
    to_parking_lot, to_scheduled, NewTask, ParkingLotTask, Placement, ScheduledTask, TaskEntry,
    TaskPatch, TaskRecord, TimerStep,
};
use crate::domain::time::{fits_in_day, round_to_block, ClockTime, SLOT_MINUTES};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::task_repository::TaskRepository;
use chrono::NaiveDate;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

/// Result of a drag/drop request against the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MoveResult {
    Moved(TaskEntry),
    Rejected(RejectReason),
}

/// Owns the selected date's parking lot and timeline. Every mutation goes through
/// [`transact`], so a failed backend call restores the collections exactly.
pub struct TaskStore<P: TaskRepository> {
    repository: Arc<P>,
    user_id: String,
    state: Mutex<StoreState>,
}

impl<P: TaskRepository> TaskStore<P> {
    pub fn new(repository: Arc<P>, user_id: impl Into<String>) -> Self {
        Self {
            repository,
            user_id: user_id.into(),
            state: Mutex::new(StoreState::default()),
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn repository(&self) -> &Arc<P> {
        &self.repository
    }

    fn read<T>(&self, read: impl FnOnce(&StoreState) -> T) -> Result<T, InfraError> {
        let state = lock_state(&self.state)?;
        Ok(read(&state))
    }

    pub fn selected_date(&self) -> Result<Option<NaiveDate>, InfraError> {
        self.read(|state| state.selected_date)
    }

    pub fn collections(&self) -> Result<TaskCollections, InfraError> {
        self.read(|state| state.collections.clone())
    }

    pub fn parking_lot_tasks(&self) -> Result<Vec<ParkingLotTask>, InfraError> {
        self.read(|state| state.collections.parking_lot.clone())
    }

    pub fn scheduled_tasks(&self) -> Result<Vec<ScheduledTask>, InfraError> {
        self.read(|state| state.collections.scheduled.clone())
    }

    pub fn entry(&self, task_id: &str) -> Result<Option<TaskEntry>, InfraError> {
        self.read(|state| state.collections.entry(task_id))
    }

    pub fn is_in_flight(&self, key: &str) -> Result<bool, InfraError> {
        self.read(|state| state.in_flight.contains(key))
    }

    pub fn any_in_flight(&self) -> Result<bool, InfraError> {
        self.read(|state| !state.in_flight.is_empty())
    }

    pub fn last_error(&self) -> Result<Option<String>, InfraError> {
        self.read(|state| state.last_error.clone())
    }

    pub fn dismiss_error(&self) -> Result<(), InfraError> {
        lock_state(&self.state)?.last_error = None;
        Ok(())
    }

    fn record_error(&self, message: String) {
        if let Ok(mut state) = lock_state(&self.state) {
            state.last_error = Some(message);
        }
    }

    fn require_selected_date(&self) -> Result<NaiveDate, InfraError> {
        self.selected_date()?
            .ok_or_else(|| InfraError::Validation("no date selected".to_string()))
    }

    /// Switches to `date` and fetches its tasks. The previous date's collections are
    /// dropped immediately; a response for a date that is no longer selected is discarded.
    pub async fn load_date(&self, date: NaiveDate) -> Result<usize, InfraError> {
        let key = format!("load:{date}");
        {
            let mut state = lock_state(&self.state)?;
            state.selected_date = Some(date);
            state.collections = TaskCollections::default();
            state.in_flight.insert(key.clone());
        }

        let fetched = self.fetch(date).await;

        let mut state = lock_state(&self.state)?;
        state.in_flight.remove(&key);
        if state.selected_date != Some(date) {
            return Ok(0);
        }
        match fetched {
            Ok(collections) => {
                let count = collections.len();
                state.collections = collections;
                info!(%date, count, "loaded tasks");
                Ok(count)
            }
            Err(error) => {
                state.last_error = Some(format!("load failed: {error}"));
                warn!(%date, %error, "failed to load tasks");
                Err(error)
            }
        }
    }

    async fn fetch(&self, date: NaiveDate) -> Result<TaskCollections, InfraError> {
        let records = self
            .repository
            .list_tasks_for_date(&self.user_id, date)
            .await?;
        let entries = records
            .into_iter()
            .filter(|record| record.task.date == date)
            .map(|record| record.into_entry().map_err(InfraError::InvalidRecord))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(TaskCollections::from_entries(entries))
    }

    /// Appends a task to the parking lot; the returned task carries the backend id.
    pub async fn add_parking_lot_task(
        &self,
        new_task: NewTask,
    ) -> Result<ParkingLotTask, InfraError> {
        let provisional_id = next_id("tmp");
        let task = new_task
            .into_task(provisional_id.clone())
            .map_err(InfraError::Validation)?;
        let visible = self.selected_date()? == Some(task.date);

        let created = transact(
            &self.state,
            "add_parking_lot_task",
            &provisional_id,
            |collections| {
                let order = collections.next_parking_order();
                let entry = TaskEntry::ParkingLot(to_parking_lot(task, order));
                let record = TaskRecord::from(&entry);
                if visible {
                    collections.insert(entry);
                }
                Ok(record)
            },
            |record| async move { self.repository.create_task(&record, &self.user_id).await },
            |collections, created: &TaskRecord| {
                collections.replace_id(&provisional_id, &created.task.id);
            },
        )
        .await?;

        info!(task_id = %created.task.id, "added parking-lot task");
        let order = created.order.unwrap_or_default();
        Ok(ParkingLotTask {
            task: created.task,
            order,
        })
    }

    /// Places a new task directly on the timeline. Off-grid or midnight-crossing spans are
    /// rejected for any date; occupancy is checked against the loaded day only.
    pub async fn add_scheduled_task(
        &self,
        new_task: NewTask,
        time_slot: ClockTime,
        duration_minutes: u32,
    ) -> Result<ScheduledTask, InfraError> {
        if duration_minutes == 0 {
            return Err(InfraError::Validation("task duration must be positive".to_string()));
        }
        let provisional_id = next_id("tmp");
        let task = new_task
            .into_task(provisional_id.clone())
            .map_err(InfraError::Validation)?;
        ensure_span_fits(time_slot, round_to_block(duration_minutes))?;
        let visible = self.selected_date()? == Some(task.date);
        let scheduled = to_scheduled(task, time_slot, duration_minutes);

        let created = transact(
            &self.state,
            "add_scheduled_task",
            &provisional_id,
            |collections| {
                if visible {
                    ensure_span_free(collections, &scheduled, None)?;
                }
                let entry = TaskEntry::Scheduled(scheduled);
                let record = TaskRecord::from(&entry);
                if visible {
                    collections.insert(entry);
                }
                Ok(record)
            },
            |record| async move { self.repository.create_task(&record, &self.user_id).await },
            |collections, created: &TaskRecord| {
                collections.replace_id(&provisional_id, &created.task.id);
            },
        )
        .await?;

        info!(task_id = %created.task.id, slot = %time_slot, "added scheduled task");
        let time_slot = created.time_slot.unwrap_or(created.task.start_time);
        let duration = created.task.duration_minutes();
        Ok(to_scheduled(created.task, time_slot, duration))
    }

    /// Edits a task in place. Time edits on a scheduled task keep `time_slot` in step and
    /// must not collide with another task; moving between collections is [`Self::move_task`].
    pub async fn update_task(
        &self,
        task_id: &str,
        patch: TaskPatch,
    ) -> Result<TaskEntry, InfraError> {
        if patch.placement.is_some() {
            return Err(InfraError::Validation(
                "placement changes go through move_task".to_string(),
            ));
        }
        let selected_date = self.require_selected_date()?;

        let (entry, reordered) = transact(
            &self.state,
            "update_task",
            task_id,
            |collections| {
                let orders_before = parking_orders(collections);
                let (entry, sent) = edit_entry(collections, task_id, &patch)?;
                if entry.task().date != selected_date {
                    collections.remove(task_id);
                }
                let reordered = changed_orders(&orders_before, collections);
                Ok((entry, sent, reordered))
            },
            |(entry, sent, reordered)| async move {
                self.repository
                    .update_task(task_id, &sent, &self.user_id)
                    .await?;
                Ok::<_, InfraError>((entry, reordered))
            },
            |_, _| {},
        )
        .await?;

        self.persist_orders(&reordered).await;
        info!(task_id, "updated task");
        Ok(entry)
    }

    /// Removes a task; remaining parking-lot orders are compacted and persisted.
    pub async fn delete_task(&self, task_id: &str) -> Result<TaskEntry, InfraError> {
        let (removed, reordered) = transact(
            &self.state,
            "delete_task",
            task_id,
            |collections| {
                let orders_before = parking_orders(collections);
                let removed = collections
                    .remove(task_id)
                    .ok_or_else(|| InfraError::NotFound(format!("task {task_id}")))?;
                let reordered = changed_orders(&orders_before, collections);
                Ok::<_, InfraError>((removed, reordered))
            },
            |(removed, reordered)| async move {
                self.repository.delete_task(task_id, &self.user_id).await?;
                Ok::<_, InfraError>((removed, reordered))
            },
            |_, _| {},
        )
        .await?;

        self.persist_orders(&reordered).await;
        info!(task_id, "deleted task");
        Ok(removed)
    }

    /// Drops a task on a timeline slot or the parking lot. Rejected drops are reported, not
    /// raised, and leave the collections untouched.
    pub async fn move_task(
        &self,
        task_id: &str,
        target: DropTarget,
        default_duration_minutes: u32,
    ) -> Result<MoveResult, InfraError> {
        let (result, reordered) = transact(
            &self.state,
            "move_task",
            task_id,
            |collections| {
                let orders_before = parking_orders(collections);
                match apply_move(collections, task_id, target, default_duration_minutes) {
                    MoveOutcome::Moved {
                        collections: next,
                        entry,
                    } => {
                        *collections = next;
                        let mut reordered = changed_orders(&orders_before, collections);
                        reordered.retain(|(id, _)| id != task_id);
                        Ok((MoveResult::Moved(entry), reordered))
                    }
                    MoveOutcome::Unchanged(reason) => {
                        Ok((MoveResult::Rejected(reason), Vec::new()))
                    }
                }
            },
            |(result, reordered)| async move {
                if let MoveResult::Moved(entry) = &result {
                    self.repository
                        .update_task(task_id, &TaskPatch::placement_of(entry), &self.user_id)
                        .await?;
                }
                Ok::<_, InfraError>((result, reordered))
            },
            |_, _| {},
        )
        .await?;

        match &result {
            MoveResult::Moved(_) => {
                self.persist_orders(&reordered).await;
                info!(task_id, ?target, "moved task");
            }
            MoveResult::Rejected(reason) => info!(task_id, ?target, ?reason, "drop rejected"),
        }
        Ok(result)
    }

    /// Stores a stopped timer's total and its closing step. Timer writes are keyed apart from
    /// placement edits, so a pending move of the same task does not block them. A task that
    /// is not loaded (another date) is written to the backend only.
    pub async fn record_timer_result(
        &self,
        task_id: &str,
        elapsed_seconds: u32,
        step: TimerStep,
    ) -> Result<(), InfraError> {
        let recorded = step.clone();
        transact(
            &self.state,
            "record_timer_result",
            &timer_key(task_id),
            move |collections| {
                set_timer_result(collections, task_id, elapsed_seconds, recorded);
                Ok(())
            },
            |()| async move {
                let patch = TaskPatch {
                    timer_elapsed: Some(elapsed_seconds),
                    ..TaskPatch::default()
                };
                self.repository
                    .update_task(task_id, &patch, &self.user_id)
                    .await?;
                self.repository
                    .add_timer_step(task_id, &step, &self.user_id)
                    .await
            },
            |_, _| {},
        )
        .await
        .inspect_err(|error| {
            if matches!(error, InfraError::Busy(_)) {
                self.record_error(format!("timer result for task {task_id} not saved: {error}"));
            }
        })?;
        info!(task_id, elapsed_seconds, "recorded timer result");
        Ok(())
    }

    /// Appends a user checkpoint without touching the stored total.
    pub async fn add_timer_step(&self, task_id: &str, step: TimerStep) -> Result<(), InfraError> {
        let recorded = step.clone();
        transact(
            &self.state,
            "add_timer_step",
            &timer_key(task_id),
            move |collections| push_timer_step(collections, task_id, recorded),
            |()| async move {
                self.repository
                    .add_timer_step(task_id, &step, &self.user_id)
                    .await
            },
            |_, _| {},
        )
        .await
    }

    /// Follow-up order writes after a delete or move. The primary change already succeeded,
    /// so failures are surfaced but not rolled back.
    async fn persist_orders(&self, reordered: &[(String, u32)]) {
        for (id, order) in reordered {
            let patch = TaskPatch {
                placement: Some(Placement::ParkingLot { order: *order }),
                ..TaskPatch::default()
            };
            if let Err(error) = self.repository.update_task(id, &patch, &self.user_id).await {
                warn!(task_id = %id, order, %error, "failed to persist parking-lot order");
                self.record_error(format!("reorder failed: {error}"));
            }
        }
    }
}

fn timer_key(task_id: &str) -> String {
    format!("timer:{task_id}")
}

fn set_timer_result(
    collections: &mut TaskCollections,
    task_id: &str,
    elapsed_seconds: u32,
    step: TimerStep,
) {
    if let Some(scheduled) = collections.scheduled_mut(task_id) {
        scheduled.set_timer_result(elapsed_seconds, Some(step));
    } else if let Some(parked) = collections.parking_lot_mut(task_id) {
        parked.task.timer_elapsed = Some(elapsed_seconds);
        parked.task.timer_steps.push(step);
    }
}

fn push_timer_step(
    collections: &mut TaskCollections,
    task_id: &str,
    step: TimerStep,
) -> Result<(), InfraError> {
    if let Some(scheduled) = collections.scheduled_mut(task_id) {
        scheduled.push_timer_step(step);
        return Ok(());
    }
    collections
        .parking_lot_mut(task_id)
        .ok_or_else(|| InfraError::NotFound(format!("task {task_id}")))?
        .task
        .timer_steps
        .push(step);
    Ok(())
}

/// Slot alignment and the midnight bound; independent of what else is loaded.
fn ensure_span_fits(start: ClockTime, duration: u32) -> Result<(), InfraError> {
    if start.minute() % SLOT_MINUTES != 0 {
        return Err(InfraError::Validation(format!("{start} is not on a slot boundary")));
    }
    if !fits_in_day(start, duration) {
        return Err(InfraError::Validation(format!(
            "a {duration}-minute task at {start} would cross midnight"
        )));
    }
    Ok(())
}

fn ensure_span_free(
    collections: &TaskCollections,
    scheduled: &ScheduledTask,
    excluding: Option<&str>,
) -> Result<(), InfraError> {
    let start = scheduled.time_slot();
    let duration = scheduled.duration_minutes();
    ensure_span_fits(start, duration)?;
    let occupancy = compute_occupied_slots(&collections.scheduled);
    for slot in task_span(start, duration) {
        if occupancy.is_slot_occupied(slot, excluding) {
            return Err(InfraError::Validation(format!(
                "slot {slot} is occupied by task {}",
                occupancy.owner(slot).unwrap_or_default()
            )));
        }
    }
    Ok(())
}

/// Applies `patch` to the entry in memory and returns the entry plus the patch to persist,
/// with any time edits normalized to whole blocks.
fn edit_entry(
    collections: &mut TaskCollections,
    task_id: &str,
    patch: &TaskPatch,
) -> Result<(TaskEntry, TaskPatch), InfraError> {
    let mut sent = patch.clone();
    match collections.entry(task_id) {
        None => Err(InfraError::NotFound(format!("task {task_id}"))),
        Some(TaskEntry::ParkingLot(_)) if patch.touches_times() => Err(InfraError::Validation(
            "parking-lot tasks have no times; schedule the task first".to_string(),
        )),
        Some(TaskEntry::ParkingLot(mut parked)) => {
            parked.task.apply_details(patch).map_err(InfraError::Validation)?;
            if let Some(slot) = collections.parking_lot_mut(task_id) {
                *slot = parked.clone();
            }
            Ok((TaskEntry::ParkingLot(parked), sent))
        }
        Some(TaskEntry::Scheduled(mut scheduled)) => {
            scheduled.apply_details(patch).map_err(InfraError::Validation)?;
            if patch.touches_times() {
                scheduled.apply_times(patch).map_err(InfraError::Validation)?;
                ensure_span_free(collections, &scheduled, Some(task_id))?;
                let placement = TaskPatch::placement_of(&TaskEntry::Scheduled(scheduled.clone()));
                sent.start_time = placement.start_time;
                sent.end_time = placement.end_time;
                sent.duration_minutes = None;
                sent.placement = placement.placement;
            }
            if let Some(slot) = collections.scheduled_mut(task_id) {
                *slot = scheduled.clone();
            }
            collections.sort_scheduled();
            Ok((TaskEntry::Scheduled(scheduled), sent))
        }
    }
}

fn parking_orders(collections: &TaskCollections) -> HashMap<String, u32> {
    collections
        .parking_lot
        .iter()
        .map(|parked| (parked.id().to_string(), parked.order))
        .collect()
}

fn changed_orders(
    before: &HashMap<String, u32>,
    collections: &TaskCollections,
) -> Vec<(String, u32)> {
    collections
        .parking_lot
        .iter()
        .filter(|parked| before.get(parked.id()) != Some(&parked.order))
        .map(|parked| (parked.id().to_string(), parked.order))
        .collect()
}
