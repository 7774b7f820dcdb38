use crate::domain::collections::TaskCollections;
use crate::domain::models::{Category, Energy, TaskValue};
use chrono::NaiveDate;
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DailySummary {
    pub date: NaiveDate,
    pub total_tasks: usize,
    pub completed_tasks: usize,
    pub parked_tasks: usize,
    pub scheduled_minutes: u32,
    pub tracked_seconds: u64,
    pub minutes_by_category: BTreeMap<Category, u32>,
    pub energy_giving_minutes: u32,
    pub energy_taking_minutes: u32,
    /// Share of scheduled minutes spent on high-value tasks, 0..=100.
    pub high_value_percentage: u8,
}

/// Aggregates one day's tasks. Tasks dated elsewhere are ignored.
pub fn summarize_day(collections: &TaskCollections, date: NaiveDate) -> DailySummary {
    let mut summary = DailySummary {
        date,
        total_tasks: 0,
        completed_tasks: 0,
        parked_tasks: 0,
        scheduled_minutes: 0,
        tracked_seconds: 0,
        minutes_by_category: BTreeMap::new(),
        energy_giving_minutes: 0,
        energy_taking_minutes: 0,
        high_value_percentage: 0,
    };
    let mut high_value_minutes = 0u32;

    let parked = collections
        .parking_lot
        .iter()
        .map(|parked| (&parked.task, 0u32));
    let scheduled = collections
        .scheduled
        .iter()
        .map(|scheduled| (scheduled.task(), scheduled.duration_minutes()));

    for (task, minutes) in parked.chain(scheduled) {
        if task.date != date {
            continue;
        }
        summary.total_tasks += 1;
        if task.is_completed {
            summary.completed_tasks += 1;
        }
        if minutes == 0 {
            summary.parked_tasks += 1;
        }
        summary.tracked_seconds += u64::from(task.timer_elapsed.unwrap_or(0));
        if minutes == 0 {
            continue;
        }

        summary.scheduled_minutes += minutes;
        *summary.minutes_by_category.entry(task.category).or_default() += minutes;
        match task.energy {
            Energy::Gives => summary.energy_giving_minutes += minutes,
            Energy::Takes => summary.energy_taking_minutes += minutes,
        }
        if task.value == TaskValue::High {
            high_value_minutes += minutes;
        }
    }

    if summary.scheduled_minutes > 0 {
        summary.high_value_percentage =
            (u64::from(high_value_minutes) * 100 / u64::from(summary.scheduled_minutes)) as u8;
    }
    summary
}
