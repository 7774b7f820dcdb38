pub mod domain {
    pub mod collections;
    pub mod ids;
    pub mod models;
    pub mod time;
}

pub mod application {
    pub mod analytics;
    pub mod bootstrap;
    pub mod categorize;
    pub mod optimistic;
    pub mod planner;
    pub mod scheduler;
    pub mod store;
    pub mod timer;
    pub mod timer_service;
}

pub mod infrastructure {
    pub mod assistant;
    pub mod config;
    pub mod error;
    pub mod logging;
    pub mod notifier;
    pub mod task_repository;
}

pub use application::bootstrap::{bootstrap_workspace, open_planner, BootstrapResult};
pub use application::planner::DayPlanner;
pub use application::scheduler::{DropDecision, DropTarget, RejectReason, TimelineCell};
pub use application::store::{MoveResult, TaskStore};
pub use application::timer::{format_time, TimerSnapshot, TimerStatus};
pub use domain::models::{
    Category, Energy, NewTask, ParkingLotTask, ScheduledTask, Task, TaskEntry, TaskPatch,
    TaskValue, TimerStep,
};
pub use domain::time::{parse_clock_time, ClockTime};
pub use infrastructure::error::InfraError;
