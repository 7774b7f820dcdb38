use crate::domain::ids::next_id;
use crate::domain::models::{
    Category, Energy, Task, TaskPatch, TaskRecord, TaskValue, TimerStep,
};
use crate::domain::time::{parse_clock_time, ClockTime};
use crate::infrastructure::error::InfraError;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

const SCHEMA_SQL: &str = include_str!("../../sql/schema.sql");

/// Remote record store. Every call is fallible and asynchronous.
#[async_trait]
pub trait TaskRepository: Send + Sync {
    async fn list_tasks_for_date(
        &self,
        user_id: &str,
        date: NaiveDate,
    ) -> Result<Vec<TaskRecord>, InfraError>;

    /// Stores a new task and returns it with the backend-assigned id.
    async fn create_task(&self, task: &TaskRecord, user_id: &str) -> Result<TaskRecord, InfraError>;

    async fn update_task(
        &self,
        id: &str,
        patch: &TaskPatch,
        user_id: &str,
    ) -> Result<TaskRecord, InfraError>;

    async fn delete_task(&self, id: &str, user_id: &str) -> Result<(), InfraError>;

    async fn add_timer_step(
        &self,
        task_id: &str,
        step: &TimerStep,
        user_id: &str,
    ) -> Result<(), InfraError>;
}

pub fn initialize_database(path: &Path) -> Result<(), InfraError> {
    let connection = Connection::open(path)?;
    connection.execute_batch(SCHEMA_SQL)?;
    Ok(())
}

#[derive(Debug, Clone)]
pub struct SqliteTaskRepository {
    db_path: PathBuf,
}

impl SqliteTaskRepository {
    pub fn new(db_path: impl AsRef<Path>) -> Self {
        Self {
            db_path: db_path.as_ref().to_path_buf(),
        }
    }

    fn connect(&self) -> Result<Connection, InfraError> {
        Connection::open(&self.db_path).map_err(InfraError::from)
    }

    fn load_record(
        connection: &Connection,
        id: &str,
        user_id: &str,
    ) -> Result<Option<TaskRecord>, InfraError> {
        let raw = connection
            .query_row(
                "SELECT id, title, category, energy, value, notes, start_time, end_time, date,
                        is_completed, process_description, process_summary, timer_elapsed,
                        scheduled, parking_lot, time_slot, sort_order
                 FROM tasks WHERE id = ?1 AND user_id = ?2",
                params![id, user_id],
                RawTaskRow::from_row,
            )
            .optional()?;
        let Some(raw) = raw else {
            return Ok(None);
        };
        let steps = Self::load_steps(connection, id)?;
        raw.into_record(steps).map(Some)
    }

    fn load_steps(connection: &Connection, task_id: &str) -> Result<Vec<TimerStep>, InfraError> {
        let mut statement = connection.prepare(
            "SELECT description, elapsed_time, recorded_at FROM timer_steps
             WHERE task_id = ?1 ORDER BY id",
        )?;
        let rows = statement
            .query_map(params![task_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, u32>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(description, elapsed_time, recorded_at_raw)| {
                let recorded_at = DateTime::parse_from_rfc3339(&recorded_at_raw)
                    .map_err(|error| {
                        InfraError::InvalidRecord(format!(
                            "invalid timer_steps.recorded_at '{recorded_at_raw}': {error}"
                        ))
                    })?
                    .with_timezone(&Utc);
                Ok(TimerStep {
                    description,
                    elapsed_time,
                    recorded_at,
                })
            })
            .collect()
    }

    fn insert_steps(
        connection: &Connection,
        task_id: &str,
        user_id: &str,
        steps: &[TimerStep],
    ) -> Result<(), InfraError> {
        for step in steps {
            connection.execute(
                "INSERT INTO timer_steps (task_id, user_id, description, elapsed_time, recorded_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    task_id,
                    user_id,
                    step.description,
                    step.elapsed_time,
                    step.recorded_at.to_rfc3339()
                ],
            )?;
        }
        Ok(())
    }

    fn write_record(
        connection: &Connection,
        record: &TaskRecord,
        user_id: &str,
    ) -> Result<(), InfraError> {
        let task = &record.task;
        connection.execute(
            "INSERT INTO tasks (id, user_id, title, category, energy, value, notes, start_time,
                                end_time, date, is_completed, process_description, process_summary,
                                timer_elapsed, scheduled, parking_lot, time_slot, sort_order)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9,
                     ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)
             ON CONFLICT(id) DO UPDATE SET
               title = excluded.title,
               category = excluded.category,
               energy = excluded.energy,
               value = excluded.value,
               notes = excluded.notes,
               start_time = excluded.start_time,
               end_time = excluded.end_time,
               date = excluded.date,
               is_completed = excluded.is_completed,
               process_description = excluded.process_description,
               process_summary = excluded.process_summary,
               timer_elapsed = excluded.timer_elapsed,
               scheduled = excluded.scheduled,
               parking_lot = excluded.parking_lot,
               time_slot = excluded.time_slot,
               sort_order = excluded.sort_order",
            params![
                task.id,
                user_id,
                task.title,
                task.category.as_str(),
                task.energy.as_str(),
                task.value.as_str(),
                task.notes,
                task.start_time.to_string(),
                task.end_time.to_string(),
                task.date.to_string(),
                task.is_completed,
                task.process_description,
                task.process_summary,
                task.timer_elapsed,
                record.scheduled,
                record.parking_lot,
                record.time_slot.map(|slot| slot.to_string()),
                record.order,
            ],
        )?;
        Ok(())
    }
}

#[async_trait]
impl TaskRepository for SqliteTaskRepository {
    async fn list_tasks_for_date(
        &self,
        user_id: &str,
        date: NaiveDate,
    ) -> Result<Vec<TaskRecord>, InfraError> {
        let connection = self.connect()?;
        let mut statement = connection.prepare(
            "SELECT id, title, category, energy, value, notes, start_time, end_time, date,
                    is_completed, process_description, process_summary, timer_elapsed,
                    scheduled, parking_lot, time_slot, sort_order
             FROM tasks WHERE user_id = ?1 AND date = ?2
             ORDER BY scheduled, sort_order, start_time, id",
        )?;
        let rows = statement
            .query_map(params![user_id, date.to_string()], RawTaskRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|raw| {
                let steps = Self::load_steps(&connection, &raw.id)?;
                raw.into_record(steps)
            })
            .collect()
    }

    async fn create_task(
        &self,
        task: &TaskRecord,
        user_id: &str,
    ) -> Result<TaskRecord, InfraError> {
        let mut created = task.clone();
        created.task.id = next_id("tsk");
        let connection = self.connect()?;
        Self::write_record(&connection, &created, user_id)?;
        Self::insert_steps(&connection, &created.task.id, user_id, &created.task.timer_steps)?;
        Ok(created)
    }

    async fn update_task(
        &self,
        id: &str,
        patch: &TaskPatch,
        user_id: &str,
    ) -> Result<TaskRecord, InfraError> {
        let connection = self.connect()?;
        let mut record = Self::load_record(&connection, id, user_id)?
            .ok_or_else(|| InfraError::NotFound(format!("task {id}")))?;
        record.apply_patch(patch).map_err(InfraError::Validation)?;
        Self::write_record(&connection, &record, user_id)?;
        if let Some(steps) = &patch.timer_steps {
            connection.execute("DELETE FROM timer_steps WHERE task_id = ?1", params![id])?;
            Self::insert_steps(&connection, id, user_id, steps)?;
        }
        Ok(record)
    }

    async fn delete_task(&self, id: &str, user_id: &str) -> Result<(), InfraError> {
        let connection = self.connect()?;
        connection.execute(
            "DELETE FROM timer_steps WHERE task_id = ?1 AND user_id = ?2",
            params![id, user_id],
        )?;
        let removed = connection.execute(
            "DELETE FROM tasks WHERE id = ?1 AND user_id = ?2",
            params![id, user_id],
        )?;
        if removed == 0 {
            return Err(InfraError::NotFound(format!("task {id}")));
        }
        Ok(())
    }

    async fn add_timer_step(
        &self,
        task_id: &str,
        step: &TimerStep,
        user_id: &str,
    ) -> Result<(), InfraError> {
        let connection = self.connect()?;
        let exists = connection
            .query_row(
                "SELECT 1 FROM tasks WHERE id = ?1 AND user_id = ?2",
                params![task_id, user_id],
                |_| Ok(()),
            )
            .optional()?
            .is_some();
        if !exists {
            return Err(InfraError::NotFound(format!("task {task_id}")));
        }
        Self::insert_steps(&connection, task_id, user_id, std::slice::from_ref(step))
    }
}

struct RawTaskRow {
    id: String,
    title: String,
    category: String,
    energy: String,
    value: String,
    notes: Option<String>,
    start_time: String,
    end_time: String,
    date: String,
    is_completed: bool,
    process_description: Option<String>,
    process_summary: Option<String>,
    timer_elapsed: Option<u32>,
    scheduled: bool,
    parking_lot: bool,
    time_slot: Option<String>,
    order: Option<u32>,
}

impl RawTaskRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            title: row.get(1)?,
            category: row.get(2)?,
            energy: row.get(3)?,
            value: row.get(4)?,
            notes: row.get(5)?,
            start_time: row.get(6)?,
            end_time: row.get(7)?,
            date: row.get(8)?,
            is_completed: row.get(9)?,
            process_description: row.get(10)?,
            process_summary: row.get(11)?,
            timer_elapsed: row.get(12)?,
            scheduled: row.get(13)?,
            parking_lot: row.get(14)?,
            time_slot: row.get(15)?,
            order: row.get(16)?,
        })
    }

    /// Strict decoding: values outside the closed enumerations are rejected, not defaulted.
    fn into_record(self, timer_steps: Vec<TimerStep>) -> Result<TaskRecord, InfraError> {
        let id = self.id;
        let invalid = |message: String| InfraError::InvalidRecord(format!("task {id}: {message}"));

        let category = self.category.parse::<Category>().map_err(invalid)?;
        let energy = self.energy.parse::<Energy>().map_err(invalid)?;
        let value = self.value.parse::<TaskValue>().map_err(invalid)?;
        let start_time = decode_clock(&self.start_time).map_err(invalid)?;
        let end_time = decode_clock(&self.end_time).map_err(invalid)?;
        let time_slot = self
            .time_slot
            .as_deref()
            .map(decode_clock)
            .transpose()
            .map_err(invalid)?;
        let date = NaiveDate::parse_from_str(&self.date, "%Y-%m-%d")
            .map_err(|error| invalid(format!("date must be YYYY-MM-DD: {error}")))?;

        Ok(TaskRecord {
            task: Task {
                id,
                title: self.title,
                category,
                energy,
                value,
                notes: self.notes,
                start_time,
                end_time,
                date,
                is_completed: self.is_completed,
                process_description: self.process_description,
                process_summary: self.process_summary,
                timer_elapsed: self.timer_elapsed,
                timer_steps,
            },
            scheduled: self.scheduled,
            parking_lot: self.parking_lot,
            time_slot,
            order: self.order,
        })
    }
}

fn decode_clock(value: &str) -> Result<ClockTime, String> {
    parse_clock_time(value).map_err(|error| error.to_string())
}

/// Process-local backend with the same contract as the SQLite repository.
#[derive(Debug, Default)]
pub struct InMemoryTaskRepository {
    records: Mutex<Vec<(String, TaskRecord)>>,
}

impl InMemoryTaskRepository {
    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Vec<(String, TaskRecord)>>, InfraError> {
        self.records.lock().map_err(|error| {
            InfraError::Persistence(format!("task repository lock poisoned: {error}"))
        })
    }

    pub fn seed(&self, user_id: &str, record: TaskRecord) -> Result<(), InfraError> {
        self.lock()?.push((user_id.to_string(), record));
        Ok(())
    }

    pub fn get(&self, user_id: &str, id: &str) -> Result<Option<TaskRecord>, InfraError> {
        Ok(self
            .lock()?
            .iter()
            .find(|(owner, record)| owner == user_id && record.task.id == id)
            .map(|(_, record)| record.clone()))
    }
}

#[async_trait]
impl TaskRepository for InMemoryTaskRepository {
    async fn list_tasks_for_date(
        &self,
        user_id: &str,
        date: NaiveDate,
    ) -> Result<Vec<TaskRecord>, InfraError> {
        Ok(self
            .lock()?
            .iter()
            .filter(|(owner, record)| owner == user_id && record.task.date == date)
            .map(|(_, record)| record.clone())
            .collect())
    }

    async fn create_task(
        &self,
        task: &TaskRecord,
        user_id: &str,
    ) -> Result<TaskRecord, InfraError> {
        let mut created = task.clone();
        created.task.id = next_id("tsk");
        self.lock()?.push((user_id.to_string(), created.clone()));
        Ok(created)
    }

    async fn update_task(
        &self,
        id: &str,
        patch: &TaskPatch,
        user_id: &str,
    ) -> Result<TaskRecord, InfraError> {
        let mut records = self.lock()?;
        let (_, record) = records
            .iter_mut()
            .find(|(owner, record)| owner == user_id && record.task.id == id)
            .ok_or_else(|| InfraError::NotFound(format!("task {id}")))?;
        record.apply_patch(patch).map_err(InfraError::Validation)?;
        Ok(record.clone())
    }

    async fn delete_task(&self, id: &str, user_id: &str) -> Result<(), InfraError> {
        let mut records = self.lock()?;
        let before = records.len();
        records.retain(|(owner, record)| !(owner == user_id && record.task.id == id));
        if records.len() == before {
            return Err(InfraError::NotFound(format!("task {id}")));
        }
        Ok(())
    }

    async fn add_timer_step(
        &self,
        task_id: &str,
        step: &TimerStep,
        user_id: &str,
    ) -> Result<(), InfraError> {
        let mut records = self.lock()?;
        let (_, record) = records
            .iter_mut()
            .find(|(owner, record)| owner == user_id && record.task.id == task_id)
            .ok_or_else(|| InfraError::NotFound(format!("task {task_id}")))?;
        record.task.timer_steps.push(step.clone());
        Ok(())
    }
}
