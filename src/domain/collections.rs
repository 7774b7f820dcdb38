use crate::domain::models::{ParkingLotTask, ScheduledTask, TaskEntry};

/// The parking lot and the timeline for one selected date.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskCollections {
    pub parking_lot: Vec<ParkingLotTask>,
    pub scheduled: Vec<ScheduledTask>,
}

impl TaskCollections {
    pub fn from_entries(entries: impl IntoIterator<Item = TaskEntry>) -> Self {
        let mut collections = Self::default();
        for entry in entries {
            match entry {
                TaskEntry::ParkingLot(parked) => collections.parking_lot.push(parked),
                TaskEntry::Scheduled(scheduled) => collections.scheduled.push(scheduled),
            }
        }
        collections.parking_lot.sort_by_key(|parked| parked.order);
        collections.reindex_parking_lot();
        collections.sort_scheduled();
        collections
    }

    pub fn len(&self) -> usize {
        self.parking_lot.len() + self.scheduled.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entry(id).is_some()
    }

    pub fn entry(&self, id: &str) -> Option<TaskEntry> {
        if let Some(parked) = self.parking_lot.iter().find(|parked| parked.id() == id) {
            return Some(TaskEntry::ParkingLot(parked.clone()));
        }
        self.scheduled
            .iter()
            .find(|scheduled| scheduled.id() == id)
            .cloned()
            .map(TaskEntry::Scheduled)
    }

    pub fn scheduled_mut(&mut self, id: &str) -> Option<&mut ScheduledTask> {
        self.scheduled.iter_mut().find(|scheduled| scheduled.id() == id)
    }

    pub fn parking_lot_mut(&mut self, id: &str) -> Option<&mut ParkingLotTask> {
        self.parking_lot.iter_mut().find(|parked| parked.id() == id)
    }

    /// Removes a task from whichever collection holds it. Parking-lot orders are
    /// reassigned so they stay contiguous from zero.
    pub fn remove(&mut self, id: &str) -> Option<TaskEntry> {
        if let Some(index) = self.parking_lot.iter().position(|parked| parked.id() == id) {
            let removed = self.parking_lot.remove(index);
            self.reindex_parking_lot();
            return Some(TaskEntry::ParkingLot(removed));
        }
        let index = self.scheduled.iter().position(|scheduled| scheduled.id() == id)?;
        Some(TaskEntry::Scheduled(self.scheduled.remove(index)))
    }

    pub fn insert(&mut self, entry: TaskEntry) {
        match entry {
            TaskEntry::ParkingLot(parked) => {
                let index = (parked.order as usize).min(self.parking_lot.len());
                self.parking_lot.insert(index, parked);
                self.reindex_parking_lot();
            }
            TaskEntry::Scheduled(scheduled) => {
                self.scheduled.push(scheduled);
                self.sort_scheduled();
            }
        }
    }

    pub fn next_parking_order(&self) -> u32 {
        self.parking_lot.len() as u32
    }

    /// Renumbers parking-lot tasks `0..n` by position; returns the ids whose order changed.
    pub fn reindex_parking_lot(&mut self) -> Vec<(String, u32)> {
        let mut changed = Vec::new();
        for (index, parked) in self.parking_lot.iter_mut().enumerate() {
            let order = index as u32;
            if parked.order != order {
                parked.order = order;
                changed.push((parked.id().to_string(), order));
            }
        }
        changed
    }

    pub fn sort_scheduled(&mut self) {
        self.scheduled.sort_by(|left, right| {
            left.time_slot()
                .cmp(&right.time_slot())
                .then_with(|| left.id().cmp(right.id()))
        });
    }

    /// Swaps a provisional id for the one the backend assigned.
    pub fn replace_id(&mut self, old_id: &str, new_id: &str) -> bool {
        if let Some(parked) = self.parking_lot_mut(old_id) {
            parked.task.id = new_id.to_string();
            return true;
        }
        if let Some(scheduled) = self.scheduled_mut(old_id) {
            scheduled.set_id(new_id.to_string());
            return true;
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{to_parking_lot, to_scheduled, NewTask};
    use crate::domain::time::parse_clock_time;
    use chrono::NaiveDate;

    fn task(id: &str) -> crate::domain::models::Task {
        NewTask::titled(format!("Task {id}"), NaiveDate::from_ymd_opt(2026, 2, 16).expect("date"))
            .into_task(id.to_string())
            .expect("valid task")
    }

    #[test]
    fn removing_parked_task_keeps_orders_contiguous() {
        let mut collections = TaskCollections::from_entries(vec![
            TaskEntry::ParkingLot(to_parking_lot(task("a"), 0)),
            TaskEntry::ParkingLot(to_parking_lot(task("b"), 1)),
            TaskEntry::ParkingLot(to_parking_lot(task("c"), 2)),
        ]);
        assert!(collections.remove("a").is_some());
        let orders = collections
            .parking_lot
            .iter()
            .map(|parked| (parked.id().to_string(), parked.order))
            .collect::<Vec<_>>();
        assert_eq!(orders, vec![("b".to_string(), 0), ("c".to_string(), 1)]);
    }

    #[test]
    fn scheduled_tasks_stay_sorted_by_slot() {
        let mut collections = TaskCollections::default();
        let late = parse_clock_time("14:00").expect("time");
        let early = parse_clock_time("09:00").expect("time");
        collections.insert(TaskEntry::Scheduled(to_scheduled(task("late"), late, 15)));
        collections.insert(TaskEntry::Scheduled(to_scheduled(task("early"), early, 30)));
        let ids = collections.scheduled.iter().map(|s| s.id()).collect::<Vec<_>>();
        assert_eq!(ids, vec!["early", "late"]);
        assert!(collections.replace_id("late", "tsk-99"));
        assert!(collections.contains("tsk-99"));
        assert!(!collections.contains("late"));
    }
}
