use crate::application::analytics::{summarize_day, DailySummary};
use crate::application::categorize::CategorizationDebouncer;
use crate::application::scheduler::{
    compute_occupied_slots, timeline_cells, validate_drop, DropDecision, DropTarget, TimelineCell,
};
use crate::application::store::{MoveResult, TaskStore};
use crate::application::timer::{StopOutcome, TimerEngine, TimerSnapshot};
use crate::application::timer_service::TimerService;
use crate::domain::models::{
    NewTask, ParkingLotTask, ScheduledTask, TaskEntry, TaskPatch, TimerStep,
};
use crate::domain::time::{slot_sequence, ClockTime};
use crate::infrastructure::assistant::{AssistantService, CategorySuggestion, ProcessSummary};
use crate::infrastructure::config::PlannerSettings;
use crate::infrastructure::error::InfraError;
use crate::infrastructure::notifier::TimerNotifier;
use crate::infrastructure::task_repository::TaskRepository;
use chrono::NaiveDate;
use std::sync::Arc;
use tracing::{info, warn};

/// Entry point for the UI layer. Every collaborator is passed in; nothing is global.
pub struct DayPlanner<P: TaskRepository + 'static> {
    settings: PlannerSettings,
    store: Arc<TaskStore<P>>,
    timers: TimerService<P>,
    assistant: AssistantService,
    categorizer: CategorizationDebouncer,
}

impl<P: TaskRepository + 'static> DayPlanner<P> {
    pub fn new(
        repository: Arc<P>,
        settings: PlannerSettings,
        assistant: AssistantService,
        notifier: Arc<dyn TimerNotifier>,
    ) -> Self {
        let store = Arc::new(TaskStore::new(repository, settings.user_id.clone()));
        let timers = TimerService::new(Arc::clone(&store), notifier, settings.tick_interval);
        let categorizer =
            CategorizationDebouncer::new(assistant.clone(), settings.categorize_debounce);
        Self {
            settings,
            store,
            timers,
            assistant,
            categorizer,
        }
    }

    pub fn with_timer_engine(mut self, engine: TimerEngine) -> Self {
        self.timers = self.timers.with_engine(engine);
        self
    }

    pub fn settings(&self) -> &PlannerSettings {
        &self.settings
    }

    pub fn store(&self) -> &TaskStore<P> {
        &self.store
    }

    pub fn timers(&self) -> &TimerService<P> {
        &self.timers
    }

    pub fn categorizer(&self) -> &CategorizationDebouncer {
        &self.categorizer
    }

    /// Switches the visible day. Running and paused timers are stopped and saved first
    /// because their tasks leave the loaded collections.
    pub async fn select_date(&self, date: NaiveDate) -> Result<usize, InfraError> {
        if self.store.selected_date()? == Some(date) {
            return Ok(self.store.collections()?.len());
        }
        self.categorizer.cancel();
        for task_id in self.timers.unfinished_task_ids()? {
            if let Err(error) = self.timers.stop(&task_id).await {
                warn!(%task_id, %error, "timer stopped on date change but not saved");
            }
        }
        info!(%date, "selecting date");
        self.store.load_date(date).await
    }

    pub async fn reload(&self) -> Result<usize, InfraError> {
        let date = self
            .store
            .selected_date()?
            .ok_or_else(|| InfraError::Validation("no date selected".to_string()))?;
        self.store.load_date(date).await
    }

    pub fn slots(&self) -> Vec<ClockTime> {
        slot_sequence(self.settings.timeline_start, self.settings.timeline_end)
    }

    pub fn timeline(&self) -> Result<Vec<TimelineCell>, InfraError> {
        Ok(timeline_cells(&self.slots(), &self.store.scheduled_tasks()?))
    }

    pub fn parking_lot(&self) -> Result<Vec<ParkingLotTask>, InfraError> {
        self.store.parking_lot_tasks()
    }

    pub fn scheduled(&self) -> Result<Vec<ScheduledTask>, InfraError> {
        self.store.scheduled_tasks()
    }

    pub fn is_slot_occupied(
        &self,
        slot: ClockTime,
        excluding: Option<&str>,
    ) -> Result<bool, InfraError> {
        let scheduled = self.store.scheduled_tasks()?;
        Ok(compute_occupied_slots(&scheduled).is_slot_occupied(slot, excluding))
    }

    /// Drag-over check; no state changes.
    pub fn can_drop(&self, task_id: &str, slot: ClockTime) -> Result<DropDecision, InfraError> {
        let collections = self.store.collections()?;
        Ok(validate_drop(
            &collections,
            slot,
            task_id,
            self.settings.default_duration_minutes,
        ))
    }

    pub async fn drop_task(
        &self,
        task_id: &str,
        target: DropTarget,
    ) -> Result<MoveResult, InfraError> {
        self.store
            .move_task(task_id, target, self.settings.default_duration_minutes)
            .await
    }

    pub async fn add_to_parking_lot(
        &self,
        new_task: NewTask,
    ) -> Result<ParkingLotTask, InfraError> {
        self.store.add_parking_lot_task(new_task).await
    }

    /// Schedules a new task; `None` uses the configured default duration.
    pub async fn add_scheduled(
        &self,
        new_task: NewTask,
        slot: ClockTime,
        duration_minutes: Option<u32>,
    ) -> Result<ScheduledTask, InfraError> {
        let duration = duration_minutes.unwrap_or(self.settings.default_duration_minutes);
        self.store.add_scheduled_task(new_task, slot, duration).await
    }

    pub async fn update_task(
        &self,
        task_id: &str,
        patch: TaskPatch,
    ) -> Result<TaskEntry, InfraError> {
        self.store.update_task(task_id, patch).await
    }

    /// Deletes a task and forgets any timer it had; unsaved timer time is lost.
    pub async fn delete_task(&self, task_id: &str) -> Result<TaskEntry, InfraError> {
        let removed = self.store.delete_task(task_id).await?;
        if self.timers.discard(task_id)? {
            info!(task_id, "discarded timer of deleted task");
        }
        Ok(removed)
    }

    pub async fn start_timer(&self, task_id: &str) -> Result<TimerSnapshot, InfraError> {
        self.timers.start(task_id).await
    }

    pub fn pause_timer(&self) -> Result<TimerSnapshot, InfraError> {
        self.timers.pause()
    }

    pub fn resume_timer(&self, task_id: &str) -> Result<TimerSnapshot, InfraError> {
        self.timers.resume(task_id)
    }

    pub async fn stop_timer(&self, task_id: &str) -> Result<StopOutcome, InfraError> {
        self.categorizer.cancel();
        self.timers.stop(task_id).await
    }

    pub fn reset_timer(&self) -> Result<Option<String>, InfraError> {
        self.timers.reset()
    }

    pub fn dismiss_timer_alert(&self, task_id: &str) -> Result<(), InfraError> {
        self.timers.dismiss_alert(task_id)
    }

    pub async fn add_checkpoint(
        &self,
        task_id: &str,
        description: &str,
    ) -> Result<TimerStep, InfraError> {
        self.timers.add_checkpoint(task_id, description).await
    }

    /// Feeds a title edit to the debounced categorizer.
    pub fn title_changed(&self, title: &str) {
        self.categorizer.title_changed(title);
    }

    pub fn close_editor(&self) {
        self.categorizer.cancel();
    }

    pub async fn suggest_category(&self, title: &str) -> CategorySuggestion {
        self.assistant.suggest_category(title).await
    }

    /// Stores the process write-up for a task together with a summary of it.
    pub async fn record_process(
        &self,
        task_id: &str,
        description: &str,
    ) -> Result<ProcessSummary, InfraError> {
        let summary = self.assistant.summarize(description).await;
        let patch = TaskPatch {
            process_description: Some(description.trim().to_string()),
            process_summary: Some(summary.text.clone()),
            ..TaskPatch::default()
        };
        self.store.update_task(task_id, patch).await?;
        Ok(summary)
    }

    /// Transcribes a voice note into the task's process write-up. `Ok(None)` when
    /// transcription is unavailable; the task is left unchanged then.
    pub async fn record_process_audio(
        &self,
        task_id: &str,
        audio: &[u8],
    ) -> Result<Option<ProcessSummary>, InfraError> {
        match self.assistant.transcribe(audio).await {
            Some(text) if !text.trim().is_empty() => {
                self.record_process(task_id, &text).await.map(Some)
            }
            _ => Ok(None),
        }
    }

    pub fn daily_summary(&self) -> Result<DailySummary, InfraError> {
        let date = self
            .store
            .selected_date()?
            .ok_or_else(|| InfraError::Validation("no date selected".to_string()))?;
        Ok(summarize_day(&self.store.collections()?, date))
    }

    pub fn last_error(&self) -> Result<Option<String>, InfraError> {
        self.store.last_error()
    }

    pub fn dismiss_error(&self) -> Result<(), InfraError> {
        self.store.dismiss_error()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::scheduler::{CellKind, RejectReason};
    use crate::application::timer::TimerStatus;
    use crate::domain::time::parse_clock_time;
    use crate::infrastructure::assistant::SummarySource;
    use crate::infrastructure::notifier::NoopNotifier;
    use crate::infrastructure::task_repository::InMemoryTaskRepository;

    fn at(value: &str) -> ClockTime {
        parse_clock_time(value).expect("valid clock time")
    }

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 2, 16).expect("valid date")
    }

    async fn planner() -> DayPlanner<InMemoryTaskRepository> {
        let planner = DayPlanner::new(
            Arc::new(InMemoryTaskRepository::default()),
            PlannerSettings::default(),
            AssistantService::disabled(),
            Arc::new(NoopNotifier),
        );
        planner.select_date(day()).await.expect("select date");
        planner
    }

    #[tokio::test]
    async fn parked_task_dropped_on_nine_spans_one_slot() {
        let planner = planner().await;
        let parked = planner
            .add_to_parking_lot(NewTask::titled("Plan week", day()))
            .await
            .expect("add");

        assert!(planner.can_drop(parked.id(), at("09:00")).expect("check").is_accepted());
        let result = planner
            .drop_task(parked.id(), DropTarget::Slot(at("09:00")))
            .await
            .expect("drop");
        assert!(matches!(result, MoveResult::Moved(TaskEntry::Scheduled(_))));

        let scheduled = planner.scheduled().expect("scheduled");
        assert_eq!(scheduled[0].task().start_time, at("09:00"));
        assert_eq!(scheduled[0].time_slot(), at("09:00"));
        assert_eq!(scheduled[0].task().end_time, at("09:15"));
        assert!(planner.is_slot_occupied(at("09:00"), None).expect("occupied"));
        assert!(!planner.is_slot_occupied(at("09:00"), Some(parked.id())).expect("excluded"));

        let cells = planner.timeline().expect("timeline");
        assert_eq!(cells.len(), 65);
        let nine = cells.iter().find(|cell| cell.slot == at("09:00")).expect("09:00 cell");
        assert!(matches!(nine.kind, CellKind::Start { span: 1, .. }));
    }

    #[tokio::test]
    async fn occupied_drop_is_rejected_without_error() {
        let planner = planner().await;
        planner
            .add_scheduled(NewTask::titled("Meeting", day()), at("09:00"), Some(45))
            .await
            .expect("schedule");
        let parked = planner
            .add_to_parking_lot(NewTask::titled("Emails", day()))
            .await
            .expect("park");

        let result = planner
            .drop_task(parked.id(), DropTarget::Slot(at("09:15")))
            .await
            .expect("drop");
        assert!(matches!(result, MoveResult::Rejected(RejectReason::Occupied { .. })));
        assert_eq!(planner.parking_lot().expect("parking lot").len(), 1);
        assert_eq!(planner.last_error().expect("error"), None);
    }

    #[tokio::test]
    async fn deleting_a_timed_task_discards_its_timer() {
        let planner = planner().await;
        let task = planner
            .add_scheduled(NewTask::titled("Workout", day()), at("07:00"), None)
            .await
            .expect("schedule");
        planner.start_timer(task.id()).await.expect("start");

        planner.delete_task(task.id()).await.expect("delete");
        assert_eq!(planner.timers().active_task_id().expect("active"), None);
        assert_eq!(planner.timers().snapshot(task.id()).expect("snapshot"), None);
        assert!(planner.scheduled().expect("scheduled").is_empty());
    }

    #[tokio::test]
    async fn switching_date_stops_and_saves_running_timer() {
        let planner = planner().await;
        let task = planner
            .add_scheduled(NewTask::titled("Write", day()), at("08:00"), Some(30))
            .await
            .expect("schedule");
        planner.start_timer(task.id()).await.expect("start");

        let tomorrow = day().succ_opt().expect("next day");
        assert_eq!(planner.select_date(tomorrow).await.expect("switch"), 0);
        let snapshot = planner
            .timers()
            .snapshot(task.id())
            .expect("snapshot")
            .expect("present");
        assert_eq!(snapshot.status, TimerStatus::Stopped);

        let stored = planner
            .store()
            .repository()
            .get("local", task.id())
            .expect("lookup")
            .expect("stored");
        assert_eq!(stored.task.timer_steps.len(), 1);
    }

    #[tokio::test]
    async fn switching_date_saves_a_paused_timer_too() {
        let planner = planner().await;
        let first = planner
            .add_scheduled(NewTask::titled("Read", day()), at("08:00"), Some(30))
            .await
            .expect("schedule first");
        let second = planner
            .add_scheduled(NewTask::titled("Write", day()), at("09:00"), Some(30))
            .await
            .expect("schedule second");
        planner.start_timer(first.id()).await.expect("start first");
        planner.pause_timer().expect("pause first");
        planner.start_timer(second.id()).await.expect("start second");

        let tomorrow = day().succ_opt().expect("next day");
        planner.select_date(tomorrow).await.expect("switch");
        assert!(planner.timers().unfinished_task_ids().expect("timers").is_empty());

        for task in [&first, &second] {
            let snapshot = planner
                .timers()
                .snapshot(task.id())
                .expect("snapshot")
                .expect("present");
            assert_eq!(snapshot.status, TimerStatus::Stopped);
            let stored = planner
                .store()
                .repository()
                .get("local", task.id())
                .expect("lookup")
                .expect("stored");
            assert!(stored.task.timer_elapsed.is_some());
            assert_eq!(stored.task.timer_steps.len(), 1);
        }
        assert_eq!(planner.last_error().expect("error"), None);
    }

    #[tokio::test]
    async fn off_grid_drop_is_rejected() {
        let planner = planner().await;
        planner
            .add_scheduled(NewTask::titled("Standup", day()), at("09:00"), Some(15))
            .await
            .expect("schedule");
        let parked = planner
            .add_to_parking_lot(NewTask::titled("Call", day()))
            .await
            .expect("park");

        assert!(!planner.can_drop(parked.id(), at("09:07")).expect("check").is_accepted());
        let result = planner
            .drop_task(parked.id(), DropTarget::Slot(at("09:07")))
            .await
            .expect("drop");
        assert_eq!(
            result,
            MoveResult::Rejected(RejectReason::OffGrid { slot: at("09:07") })
        );
        assert_eq!(planner.scheduled().expect("scheduled").len(), 1);
    }

    #[tokio::test]
    async fn process_summary_falls_back_locally() {
        let planner = planner().await;
        let parked = planner
            .add_to_parking_lot(NewTask::titled("Research", day()))
            .await
            .expect("add");

        let summary = planner
            .record_process(parked.id(), "Read three papers. Took notes on each.")
            .await
            .expect("record process");
        assert_eq!(summary.source, SummarySource::Local);
        assert_eq!(summary.text, "Read three papers.");

        let entry = planner.store().entry(parked.id()).expect("entry").expect("present");
        assert_eq!(entry.task().process_summary.as_deref(), Some("Read three papers."));
        assert_eq!(
            planner.record_process_audio(parked.id(), &[0u8; 8]).await.expect("audio"),
            None
        );

        let summary = planner.daily_summary().expect("summary");
        assert_eq!(summary.total_tasks, 1);
        assert_eq!(summary.parked_tasks, 1);
    }
}
