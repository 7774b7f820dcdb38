use crate::domain::collections::TaskCollections;
use crate::domain::models::{to_parking_lot, to_scheduled, ScheduledTask, TaskEntry};
use crate::domain::time::{
    add_minutes, fits_in_day, round_to_block, to_duration_blocks, ClockTime, SLOT_MINUTES,
};
use serde::Serialize;
use std::collections::HashMap;

/// Which task claims each occupied 15-minute slot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Occupancy {
    slots: HashMap<ClockTime, String>,
}

impl Occupancy {
    /// True if `slot` is claimed by any task other than `excluding`.
    pub fn is_slot_occupied(&self, slot: ClockTime, excluding: Option<&str>) -> bool {
        match self.slots.get(&slot) {
            Some(owner) => excluding != Some(owner.as_str()),
            None => false,
        }
    }

    pub fn owner(&self, slot: ClockTime) -> Option<&str> {
        self.slots.get(&slot).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn slots_of(&self, task_id: &str) -> Vec<ClockTime> {
        let mut slots = self
            .slots
            .iter()
            .filter(|(_, owner)| owner.as_str() == task_id)
            .map(|(slot, _)| *slot)
            .collect::<Vec<_>>();
        slots.sort();
        slots
    }
}

/// The consecutive slots a task of `duration_minutes` covers from `start`.
pub fn task_span(start: ClockTime, duration_minutes: u32) -> Vec<ClockTime> {
    (0..to_duration_blocks(duration_minutes))
        .map(|block| add_minutes(start, i64::from(block * SLOT_MINUTES)))
        .collect()
}

pub fn compute_occupied_slots(scheduled: &[ScheduledTask]) -> Occupancy {
    let mut slots = HashMap::new();
    for task in scheduled {
        for slot in task_span(task.time_slot(), task.duration_minutes()) {
            slots.entry(slot).or_insert_with(|| task.id().to_string());
        }
    }
    Occupancy { slots }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "reason")]
pub enum RejectReason {
    UnknownTask { task_id: String },
    Occupied { slot: ClockTime, task_id: String },
    OffGrid { slot: ClockTime },
    CrossesMidnight,
    AlreadyThere,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropDecision {
    Accept,
    Reject(RejectReason),
}

impl DropDecision {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accept)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "slot")]
pub enum DropTarget {
    Slot(ClockTime),
    ParkingLot,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MoveOutcome {
    Moved {
        collections: TaskCollections,
        entry: TaskEntry,
    },
    Unchanged(RejectReason),
}

/// Duration a task takes on the timeline when dropped: scheduled tasks keep theirs,
/// parking-lot tasks use any duration they encode or else `default_minutes`.
pub fn placement_duration(entry: &TaskEntry, default_minutes: u32) -> u32 {
    match entry {
        TaskEntry::Scheduled(scheduled) => scheduled.duration_minutes(),
        TaskEntry::ParkingLot(parked) => match parked.task.duration_minutes() {
            0 => round_to_block(default_minutes),
            minutes => round_to_block(minutes),
        },
    }
}

/// Checks every slot of the dragged task's span at `target`. The dragged task never
/// blocks itself.
pub fn validate_drop(
    collections: &TaskCollections,
    target: ClockTime,
    dragged_task_id: &str,
    default_minutes: u32,
) -> DropDecision {
    let Some(entry) = collections.entry(dragged_task_id) else {
        return DropDecision::Reject(RejectReason::UnknownTask {
            task_id: dragged_task_id.to_string(),
        });
    };
    if target.minute() % SLOT_MINUTES != 0 {
        return DropDecision::Reject(RejectReason::OffGrid { slot: target });
    }
    let duration = placement_duration(&entry, default_minutes);
    if !fits_in_day(target, duration) {
        return DropDecision::Reject(RejectReason::CrossesMidnight);
    }

    let occupancy = compute_occupied_slots(&collections.scheduled);
    for slot in task_span(target, duration) {
        if occupancy.is_slot_occupied(slot, Some(dragged_task_id)) {
            return DropDecision::Reject(RejectReason::Occupied {
                slot,
                task_id: occupancy.owner(slot).unwrap_or_default().to_string(),
            });
        }
    }
    DropDecision::Accept
}

/// Computes the collections after dropping `task_id` on `target`. Pure: the input is
/// left untouched and nothing is persisted here.
pub fn apply_move(
    collections: &TaskCollections,
    task_id: &str,
    target: DropTarget,
    default_minutes: u32,
) -> MoveOutcome {
    let Some(current) = collections.entry(task_id) else {
        return MoveOutcome::Unchanged(RejectReason::UnknownTask {
            task_id: task_id.to_string(),
        });
    };

    match (target, &current) {
        (DropTarget::ParkingLot, TaskEntry::ParkingLot(_)) => {
            MoveOutcome::Unchanged(RejectReason::AlreadyThere)
        }
        (DropTarget::Slot(slot), TaskEntry::Scheduled(scheduled))
            if scheduled.time_slot() == slot =>
        {
            MoveOutcome::Unchanged(RejectReason::AlreadyThere)
        }
        (DropTarget::Slot(slot), _) => {
            if let DropDecision::Reject(reason) =
                validate_drop(collections, slot, task_id, default_minutes)
            {
                return MoveOutcome::Unchanged(reason);
            }
            let duration = placement_duration(&current, default_minutes);
            let mut next = collections.clone();
            let moved = match next.remove(task_id) {
                Some(TaskEntry::Scheduled(mut scheduled)) => {
                    scheduled.reschedule(slot);
                    scheduled
                }
                Some(TaskEntry::ParkingLot(parked)) => {
                    to_scheduled(parked.into_task(), slot, duration)
                }
                None => {
                    return MoveOutcome::Unchanged(RejectReason::UnknownTask {
                        task_id: task_id.to_string(),
                    });
                }
            };
            let entry = TaskEntry::Scheduled(moved);
            next.insert(entry.clone());
            MoveOutcome::Moved {
                collections: next,
                entry,
            }
        }
        (DropTarget::ParkingLot, TaskEntry::Scheduled(_)) => {
            let mut next = collections.clone();
            let Some(TaskEntry::Scheduled(scheduled)) = next.remove(task_id) else {
                return MoveOutcome::Unchanged(RejectReason::UnknownTask {
                    task_id: task_id.to_string(),
                });
            };
            let entry = TaskEntry::ParkingLot(to_parking_lot(
                scheduled.into_task(),
                next.next_parking_order(),
            ));
            next.insert(entry.clone());
            MoveOutcome::Moved {
                collections: next,
                entry,
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum CellKind {
    Empty,
    /// First slot of a task; the only slot that renders and drags the task.
    Start { task_id: String, span: u32 },
    Continuation { task_id: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TimelineCell {
    pub slot: ClockTime,
    #[serde(flatten)]
    pub kind: CellKind,
}

impl TimelineCell {
    pub fn accepts_drops(&self) -> bool {
        !matches!(self.kind, CellKind::Continuation { .. })
    }

    pub fn is_draggable(&self) -> bool {
        matches!(self.kind, CellKind::Start { .. })
    }
}

pub fn timeline_cells(slots: &[ClockTime], scheduled: &[ScheduledTask]) -> Vec<TimelineCell> {
    let occupancy = compute_occupied_slots(scheduled);
    let starts = scheduled
        .iter()
        .map(|task| (task.time_slot(), task))
        .collect::<HashMap<_, _>>();

    slots
        .iter()
        .map(|slot| {
            let kind = match (starts.get(slot), occupancy.owner(*slot)) {
                (Some(task), Some(owner)) if task.id() == owner => CellKind::Start {
                    task_id: owner.to_string(),
                    span: task.span_blocks(),
                },
                (_, Some(owner)) => CellKind::Continuation {
                    task_id: owner.to_string(),
                },
                (_, None) => CellKind::Empty,
            };
            TimelineCell { slot: *slot, kind }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{NewTask, Task};
    use crate::domain::time::{generate_slot_sequence, parse_clock_time};
    use chrono::NaiveDate;
    use proptest::prelude::*;
    use std::collections::HashSet;

    fn at(value: &str) -> ClockTime {
        parse_clock_time(value).expect("valid clock time")
    }

    fn task(id: &str) -> Task {
        let date = NaiveDate::from_ymd_opt(2026, 2, 16).expect("date");
        NewTask::titled(format!("Task {id}"), date)
            .into_task(id.to_string())
            .expect("valid task")
    }

    fn collections_with(scheduled: Vec<(&str, &str, u32)>, parked: Vec<&str>) -> TaskCollections {
        let mut entries = scheduled
            .into_iter()
            .map(|(id, slot, minutes)| {
                TaskEntry::Scheduled(to_scheduled(task(id), at(slot), minutes))
            })
            .collect::<Vec<_>>();
        entries.extend(
            parked
                .into_iter()
                .enumerate()
                .map(|(order, id)| TaskEntry::ParkingLot(to_parking_lot(task(id), order as u32))),
        );
        TaskCollections::from_entries(entries)
    }

    #[test]
    fn three_block_task_occupies_three_slots() {
        let collections = collections_with(vec![("a", "09:00", 45)], vec!["b"]);
        let occupancy = compute_occupied_slots(&collections.scheduled);
        assert_eq!(occupancy.slots_of("a"), vec![at("09:00"), at("09:15"), at("09:30")]);
        assert!(!occupancy.is_slot_occupied(at("09:45"), None));
        assert!(occupancy.is_slot_occupied(at("09:15"), None));
        assert!(!occupancy.is_slot_occupied(at("09:15"), Some("a")));

        assert_eq!(
            validate_drop(&collections, at("09:15"), "b", 15),
            DropDecision::Reject(RejectReason::Occupied {
                slot: at("09:15"),
                task_id: "a".to_string(),
            })
        );
        assert!(validate_drop(&collections, at("09:45"), "b", 15).is_accepted());
    }

    #[test]
    fn parking_lot_drop_uses_default_duration() {
        let collections = collections_with(vec![], vec!["b"]);
        let MoveOutcome::Moved { collections: next, entry } =
            apply_move(&collections, "b", DropTarget::Slot(at("09:00")), 15)
        else {
            panic!("expected move");
        };
        let TaskEntry::Scheduled(scheduled) = entry else {
            panic!("expected scheduled entry");
        };
        assert_eq!(scheduled.task().start_time, at("09:00"));
        assert_eq!(scheduled.time_slot(), at("09:00"));
        assert_eq!(scheduled.task().end_time, at("09:15"));
        assert!(next.parking_lot.is_empty());
        assert_eq!(next.scheduled.len(), 1);
        assert_eq!(collections.parking_lot.len(), 1, "input is untouched");
    }

    #[test]
    fn scheduled_move_keeps_duration_and_may_overlap_itself() {
        let collections = collections_with(vec![("a", "09:00", 45)], vec![]);
        let MoveOutcome::Moved { entry, .. } =
            apply_move(&collections, "a", DropTarget::Slot(at("09:15")), 15)
        else {
            panic!("expected move");
        };
        let TaskEntry::Scheduled(scheduled) = entry else {
            panic!("expected scheduled entry");
        };
        assert_eq!(scheduled.task().end_time, at("10:00"));
    }

    #[test]
    fn rejected_drops_leave_state_unchanged() {
        let collections = collections_with(vec![("a", "09:00", 45), ("c", "10:00", 30)], vec!["b"]);
        assert_eq!(
            apply_move(&collections, "a", DropTarget::Slot(at("09:00")), 15),
            MoveOutcome::Unchanged(RejectReason::AlreadyThere)
        );
        assert_eq!(
            apply_move(&collections, "b", DropTarget::ParkingLot, 15),
            MoveOutcome::Unchanged(RejectReason::AlreadyThere)
        );
        assert!(matches!(
            apply_move(&collections, "a", DropTarget::Slot(at("09:30")), 15),
            MoveOutcome::Unchanged(RejectReason::Occupied { .. })
        ));
        assert_eq!(
            apply_move(&collections, "b", DropTarget::Slot(at("23:45")), 30),
            MoveOutcome::Unchanged(RejectReason::CrossesMidnight)
        );
        assert!(matches!(
            apply_move(&collections, "zzz", DropTarget::ParkingLot, 15),
            MoveOutcome::Unchanged(RejectReason::UnknownTask { .. })
        ));
    }

    #[test]
    fn drops_between_slot_boundaries_are_rejected() {
        let collections = collections_with(vec![("a", "09:00", 15)], vec!["b"]);
        assert_eq!(
            validate_drop(&collections, at("09:07"), "b", 15),
            DropDecision::Reject(RejectReason::OffGrid { slot: at("09:07") })
        );
        assert_eq!(
            apply_move(&collections, "a", DropTarget::Slot(at("10:10")), 15),
            MoveOutcome::Unchanged(RejectReason::OffGrid { slot: at("10:10") })
        );
        assert!(validate_drop(&collections, at("09:15"), "b", 15).is_accepted());
    }

    #[test]
    fn unscheduling_appends_to_parking_lot() {
        let collections = collections_with(vec![("a", "09:00", 45)], vec!["b", "c"]);
        let MoveOutcome::Moved { collections: next, entry } =
            apply_move(&collections, "a", DropTarget::ParkingLot, 15)
        else {
            panic!("expected move");
        };
        let TaskEntry::ParkingLot(parked) = entry else {
            panic!("expected parking-lot entry");
        };
        assert_eq!(parked.order, 2);
        assert_eq!(parked.task.start_time, ClockTime::midnight());
        assert!(next.scheduled.is_empty());
    }

    #[test]
    fn continuation_cells_are_not_drop_targets() {
        let collections = collections_with(vec![("a", "09:00", 45)], vec![]);
        let slots = generate_slot_sequence("08:45", "10:00");
        let cells = timeline_cells(&slots, &collections.scheduled);
        let kinds = cells.iter().map(|cell| cell.kind.clone()).collect::<Vec<_>>();
        assert_eq!(
            kinds,
            vec![
                CellKind::Empty,
                CellKind::Start {
                    task_id: "a".to_string(),
                    span: 3
                },
                CellKind::Continuation {
                    task_id: "a".to_string()
                },
                CellKind::Continuation {
                    task_id: "a".to_string()
                },
                CellKind::Empty,
                CellKind::Empty,
            ]
        );
        assert!(cells[1].is_draggable() && cells[1].accepts_drops());
        assert!(!cells[2].accepts_drops() && !cells[2].is_draggable());
    }

    proptest! {
        #[test]
        fn accepted_moves_keep_slots_exclusive(
            drops in proptest::collection::vec((0usize..6usize, 0u32..60u32, any::<bool>()), 1..40)
        ) {
            let ids = ["t0", "t1", "t2", "t3", "t4", "t5"];
            let mut collections = collections_with(vec![], ids.to_vec());
            for (task_index, slot_index, unschedule) in drops {
                let target = if unschedule {
                    DropTarget::ParkingLot
                } else {
                    DropTarget::Slot(add_minutes(at("06:00"), i64::from(slot_index * 15)))
                };
                if let MoveOutcome::Moved { collections: next, .. } =
                    apply_move(&collections, ids[task_index], target, 30)
                {
                    collections = next;
                }

                let mut seen = HashSet::new();
                for scheduled in &collections.scheduled {
                    for slot in task_span(scheduled.time_slot(), scheduled.duration_minutes()) {
                        prop_assert!(seen.insert(slot), "slot {} claimed twice", slot);
                    }
                }
                let orders = collections.parking_lot.iter().map(|p| p.order).collect::<Vec<_>>();
                let expected = (0..collections.parking_lot.len() as u32).collect::<Vec<_>>();
                prop_assert_eq!(orders, expected);
                prop_assert_eq!(collections.len(), ids.len());
            }
        }

        #[test]
        fn parking_round_trip_restores_fields(slot_index in 0u32..60u32) {
            let collections = collections_with(vec![], vec!["a", "b"]);
            let original = collections.entry("a").expect("task a");
            let slot = add_minutes(at("06:00"), i64::from(slot_index * 15));
            let MoveOutcome::Moved { collections: scheduled, .. } =
                apply_move(&collections, "a", DropTarget::Slot(slot), 15)
            else {
                panic!("expected move to slot");
            };
            let MoveOutcome::Moved { collections: back, .. } =
                apply_move(&scheduled, "a", DropTarget::ParkingLot, 15)
            else {
                panic!("expected move back");
            };
            let restored = back.entry("a").expect("task a");
            prop_assert_eq!(restored.task(), original.task());
        }
    }
}
