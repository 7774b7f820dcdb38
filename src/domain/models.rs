use crate::domain::time::{
    add_minutes, duration_minutes, fits_in_day, round_to_block, to_duration_blocks, ClockTime,
};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Admin,
    Creative,
    Strategic,
    Personal,
    Meetings,
    Work,
    Health,
    Finance,
    Education,
    Social,
    Errands,
    Home,
}

impl Category {
    pub const ALL: [Category; 12] = [
        Category::Admin,
        Category::Creative,
        Category::Strategic,
        Category::Personal,
        Category::Meetings,
        Category::Work,
        Category::Health,
        Category::Finance,
        Category::Education,
        Category::Social,
        Category::Errands,
        Category::Home,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Creative => "creative",
            Self::Strategic => "strategic",
            Self::Personal => "personal",
            Self::Meetings => "meetings",
            Self::Work => "work",
            Self::Health => "health",
            Self::Finance => "finance",
            Self::Education => "education",
            Self::Social => "social",
            Self::Errands => "errands",
            Self::Home => "home",
        }
    }
}

impl FromStr for Category {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim();
        Self::ALL
            .into_iter()
            .find(|candidate| candidate.as_str().eq_ignore_ascii_case(normalized))
            .ok_or_else(|| format!("unknown category '{value}'"))
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Energy {
    Gives,
    Takes,
}

impl Energy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Gives => "gives",
            Self::Takes => "takes",
        }
    }
}

impl FromStr for Energy {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "gives" => Ok(Self::Gives),
            "takes" => Ok(Self::Takes),
            _ => Err(format!("unknown energy '{value}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TaskValue {
    Low,
    Medium,
    High,
}

impl TaskValue {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

impl FromStr for TaskValue {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            _ => Err(format!("unknown value '{value}'")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TimerStep {
    pub description: String,
    /// Elapsed seconds on the task's timer when the step was recorded.
    pub elapsed_time: u32,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    pub title: String,
    pub category: Category,
    pub energy: Energy,
    pub value: TaskValue,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    pub start_time: ClockTime,
    pub end_time: ClockTime,
    pub date: NaiveDate,
    #[serde(default)]
    pub is_completed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub process_description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub process_summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timer_elapsed: Option<u32>,
    #[serde(default)]
    pub timer_steps: Vec<TimerStep>,
}

impl Task {
    pub fn duration_minutes(&self) -> u32 {
        duration_minutes(self.start_time, self.end_time)
    }

    pub fn validate(&self) -> Result<(), String> {
        validate_non_empty(&self.id, "task.id")?;
        validate_non_empty(&self.title, "task.title")?;
        if self.duration_minutes() == 0 {
            return Err("task.end_time must be after task.start_time".to_string());
        }
        Ok(())
    }

    pub fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }

    /// Applies the descriptive (non-placement, non-time) fields of a patch.
    pub fn apply_details(&mut self, patch: &TaskPatch) -> Result<(), String> {
        if let Some(title) = patch.title.as_deref() {
            let title = title.trim();
            validate_non_empty(title, "task.title")?;
            self.title = title.to_string();
        }
        if let Some(category) = patch.category {
            self.category = category;
        }
        if let Some(energy) = patch.energy {
            self.energy = energy;
        }
        if let Some(value) = patch.value {
            self.value = value;
        }
        if let Some(notes) = patch.notes.as_deref() {
            self.notes = non_empty(notes);
        }
        if let Some(date) = patch.date {
            self.date = date;
        }
        if let Some(is_completed) = patch.is_completed {
            self.is_completed = is_completed;
        }
        if let Some(description) = patch.process_description.as_deref() {
            self.process_description = non_empty(description);
        }
        if let Some(summary) = patch.process_summary.as_deref() {
            self.process_summary = non_empty(summary);
        }
        if let Some(elapsed) = patch.timer_elapsed {
            self.timer_elapsed = Some(elapsed);
        }
        if let Some(steps) = &patch.timer_steps {
            self.timer_steps = steps.clone();
        }
        Ok(())
    }
}

/// A task bound to the timeline. `time_slot` always equals `start_time`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledTask {
    task: Task,
    time_slot: ClockTime,
}

impl ScheduledTask {
    pub fn task(&self) -> &Task {
        &self.task
    }

    pub fn into_task(self) -> Task {
        self.task
    }

    pub fn id(&self) -> &str {
        &self.task.id
    }

    pub fn time_slot(&self) -> ClockTime {
        self.time_slot
    }

    pub fn duration_minutes(&self) -> u32 {
        self.task.duration_minutes()
    }

    pub fn span_blocks(&self) -> u32 {
        to_duration_blocks(self.duration_minutes())
    }

    /// Moves the task to `time_slot`, keeping its duration.
    pub fn reschedule(&mut self, time_slot: ClockTime) {
        let duration = self.duration_minutes();
        self.set_placement(time_slot, duration);
    }

    pub fn set_duration(&mut self, minutes: u32) {
        self.set_placement(self.time_slot, minutes);
    }

    pub fn apply_details(&mut self, patch: &TaskPatch) -> Result<(), String> {
        self.task.apply_details(patch)
    }

    pub(crate) fn set_id(&mut self, id: String) {
        self.task.id = id;
    }

    pub(crate) fn set_timer_result(&mut self, elapsed: u32, step: Option<TimerStep>) {
        self.task.timer_elapsed = Some(elapsed);
        self.task.timer_steps.extend(step);
    }

    pub(crate) fn push_timer_step(&mut self, step: TimerStep) {
        self.task.timer_steps.push(step);
    }

    /// Applies start/end/duration edits from a patch. An explicit duration wins over
    /// an explicit end time; otherwise the current duration is kept.
    pub fn apply_times(&mut self, patch: &TaskPatch) -> Result<(), String> {
        let start = patch.start_time.unwrap_or(self.time_slot);
        let duration = match (patch.duration_minutes, patch.end_time) {
            (Some(minutes), _) => minutes,
            (None, Some(end)) => duration_minutes(start, end),
            (None, None) => self.duration_minutes(),
        };
        if duration == 0 {
            return Err("task duration must be positive".to_string());
        }
        if !fits_in_day(start, round_to_block(duration)) {
            return Err(format!("a {duration}-minute task at {start} would cross midnight"));
        }
        self.set_placement(start, duration);
        Ok(())
    }

    fn set_placement(&mut self, time_slot: ClockTime, minutes: u32) {
        let minutes = round_to_block(minutes);
        self.time_slot = time_slot;
        self.task.start_time = time_slot;
        self.task.end_time = add_minutes(time_slot, minutes as i64);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParkingLotTask {
    pub task: Task,
    pub order: u32,
}

impl ParkingLotTask {
    pub fn id(&self) -> &str {
        &self.task.id
    }

    pub fn into_task(self) -> Task {
        self.task
    }
}

/// Converts a task into a scheduled task starting at `time_slot`.
pub fn to_scheduled(task: Task, time_slot: ClockTime, duration_minutes: u32) -> ScheduledTask {
    let mut scheduled = ScheduledTask {
        task,
        time_slot,
    };
    scheduled.set_placement(time_slot, duration_minutes);
    scheduled
}

/// Converts a task into a parking-lot task at `order`; clock times are zeroed.
pub fn to_parking_lot(mut task: Task, order: u32) -> ParkingLotTask {
    task.start_time = ClockTime::midnight();
    task.end_time = ClockTime::midnight();
    ParkingLotTask { task, order }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskEntry {
    ParkingLot(ParkingLotTask),
    Scheduled(ScheduledTask),
}

impl TaskEntry {
    pub fn id(&self) -> &str {
        self.task().id.as_str()
    }

    pub fn task(&self) -> &Task {
        match self {
            Self::ParkingLot(entry) => &entry.task,
            Self::Scheduled(entry) => entry.task(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum Placement {
    ParkingLot { order: u32 },
    Scheduled { time_slot: ClockTime },
}

/// Persisted record shape exchanged with the persistence backend.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TaskRecord {
    #[serde(flatten)]
    pub task: Task,
    pub scheduled: bool,
    pub parking_lot: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_slot: Option<ClockTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order: Option<u32>,
}

impl TaskRecord {
    pub fn into_entry(self) -> Result<TaskEntry, String> {
        match (self.scheduled, self.parking_lot) {
            (true, false) => {
                let time_slot = self.time_slot.unwrap_or(self.task.start_time);
                let duration = self.task.duration_minutes();
                Ok(TaskEntry::Scheduled(to_scheduled(self.task, time_slot, duration)))
            }
            (false, true) => {
                let order = self.order.unwrap_or(0);
                Ok(TaskEntry::ParkingLot(to_parking_lot(self.task, order)))
            }
            _ => Err(format!(
                "task {} must be either scheduled or in the parking lot",
                self.task.id
            )),
        }
    }

    /// Applies a partial update the way a backend would on `updateTask`.
    pub fn apply_patch(&mut self, patch: &TaskPatch) -> Result<(), String> {
        self.task.apply_details(patch)?;
        if let Some(start) = patch.start_time {
            self.task.start_time = start;
        }
        if let Some(end) = patch.end_time {
            self.task.end_time = end;
        }
        if let Some(minutes) = patch.duration_minutes {
            self.task.end_time = add_minutes(self.task.start_time, minutes as i64);
        }
        match &patch.placement {
            Some(Placement::Scheduled { time_slot }) => {
                self.scheduled = true;
                self.parking_lot = false;
                self.time_slot = Some(*time_slot);
                self.order = None;
            }
            Some(Placement::ParkingLot { order }) => {
                self.scheduled = false;
                self.parking_lot = true;
                self.time_slot = None;
                self.order = Some(*order);
            }
            None => {
                if self.scheduled {
                    self.time_slot = Some(self.task.start_time);
                }
            }
        }
        Ok(())
    }
}

impl From<&TaskEntry> for TaskRecord {
    fn from(entry: &TaskEntry) -> Self {
        match entry {
            TaskEntry::ParkingLot(parked) => Self {
                task: parked.task.clone(),
                scheduled: false,
                parking_lot: true,
                time_slot: None,
                order: Some(parked.order),
            },
            TaskEntry::Scheduled(scheduled) => Self {
                task: scheduled.task().clone(),
                scheduled: true,
                parking_lot: false,
                time_slot: Some(scheduled.time_slot()),
                order: None,
            },
        }
    }
}

/// Partial update; `None` leaves a field untouched, an empty string clears optional text.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct TaskPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<Category>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub energy: Option<Energy>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<TaskValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_completed: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<ClockTime>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<ClockTime>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_minutes: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub process_description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub process_summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timer_elapsed: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timer_steps: Option<Vec<TimerStep>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub placement: Option<Placement>,
}

impl TaskPatch {
    /// Patch carrying the full placement (times, slot or order) of an entry.
    pub fn placement_of(entry: &TaskEntry) -> Self {
        let task = entry.task();
        let placement = match entry {
            TaskEntry::ParkingLot(parked) => Placement::ParkingLot {
                order: parked.order,
            },
            TaskEntry::Scheduled(scheduled) => Placement::Scheduled {
                time_slot: scheduled.time_slot(),
            },
        };
        Self {
            start_time: Some(task.start_time),
            end_time: Some(task.end_time),
            placement: Some(placement),
            ..Self::default()
        }
    }

    pub fn touches_times(&self) -> bool {
        self.start_time.is_some() || self.end_time.is_some() || self.duration_minutes.is_some()
    }
}

/// User input for a new task; the id is assigned on insertion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTask {
    pub title: String,
    pub category: Category,
    pub energy: Energy,
    pub value: TaskValue,
    pub notes: Option<String>,
    pub date: NaiveDate,
}

impl NewTask {
    pub fn titled(title: impl Into<String>, date: NaiveDate) -> Self {
        Self {
            title: title.into(),
            category: Category::Personal,
            energy: Energy::Takes,
            value: TaskValue::Medium,
            notes: None,
            date,
        }
    }

    pub fn into_task(self, id: String) -> Result<Task, String> {
        let title = self.title.trim();
        validate_non_empty(title, "task.title")?;
        Ok(Task {
            id,
            title: title.to_string(),
            category: self.category,
            energy: self.energy,
            value: self.value,
            notes: self.notes.as_deref().and_then(non_empty),
            start_time: ClockTime::midnight(),
            end_time: ClockTime::midnight(),
            date: self.date,
            is_completed: false,
            process_description: None,
            process_summary: None,
            timer_elapsed: None,
            timer_steps: Vec::new(),
        })
    }
}

fn validate_non_empty(value: &str, field_name: &str) -> Result<(), String> {
    if value.trim().is_empty() {
        return Err(format!("{field_name} must not be empty"));
    }
    Ok(())
}

fn non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
