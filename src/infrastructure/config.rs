use crate::domain::time::{parse_clock_time, ClockTime, SLOT_MINUTES};
use crate::infrastructure::error::InfraError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::warn;

const APP_JSON: &str = "app.json";
const TIMELINE_JSON: &str = "timeline.json";
const DEFAULT_USER_ID: &str = "local";
const DEFAULT_TIMELINE_START: &str = "06:00";
const DEFAULT_TIMELINE_END: &str = "22:00";
const DEFAULT_DURATION_MINUTES: u32 = 15;
const DEFAULT_TICK_INTERVAL_MS: u64 = 1_000;
const DEFAULT_CATEGORIZE_DEBOUNCE_MS: u64 = 800;

#[derive(Debug, Serialize, Deserialize)]
pub struct ConfigBundle {
    pub app: serde_json::Value,
    pub timeline: serde_json::Value,
}

/// Effective settings for one planner session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannerSettings {
    pub user_id: String,
    pub timeline_start: ClockTime,
    pub timeline_end: ClockTime,
    pub default_duration_minutes: u32,
    pub tick_interval: Duration,
    pub categorize_debounce: Duration,
}

impl Default for PlannerSettings {
    fn default() -> Self {
        Self {
            user_id: DEFAULT_USER_ID.to_string(),
            timeline_start: ClockTime::from_hm(6, 0).unwrap_or_else(ClockTime::midnight),
            timeline_end: ClockTime::from_hm(22, 0).unwrap_or_else(ClockTime::midnight),
            default_duration_minutes: DEFAULT_DURATION_MINUTES,
            tick_interval: Duration::from_millis(DEFAULT_TICK_INTERVAL_MS),
            categorize_debounce: Duration::from_millis(DEFAULT_CATEGORIZE_DEBOUNCE_MS),
        }
    }
}

fn default_files() -> HashMap<&'static str, serde_json::Value> {
    HashMap::from([
        (
            APP_JSON,
            serde_json::json!({
                "schema": 1,
                "appName": "DayPlanner",
                "userId": DEFAULT_USER_ID
            }),
        ),
        (
            TIMELINE_JSON,
            serde_json::json!({
                "schema": 1,
                "start": DEFAULT_TIMELINE_START,
                "end": DEFAULT_TIMELINE_END,
                "defaultDurationMinutes": DEFAULT_DURATION_MINUTES,
                "tickIntervalMs": DEFAULT_TICK_INTERVAL_MS,
                "categorizeDebounceMs": DEFAULT_CATEGORIZE_DEBOUNCE_MS
            }),
        ),
    ])
}

pub fn ensure_default_configs(config_dir: &Path) -> Result<(), InfraError> {
    for (name, value) in default_files() {
        let path = config_dir.join(name);
        if !path.exists() {
            let formatted = serde_json::to_string_pretty(&value)?;
            fs::write(path, format!("{formatted}\n"))?;
        }
    }
    Ok(())
}

fn read_config(path: &Path) -> Result<serde_json::Value, InfraError> {
    let raw = fs::read_to_string(path)?;
    let parsed: serde_json::Value = serde_json::from_str(&raw)?;
    let schema = parsed
        .get("schema")
        .and_then(serde_json::Value::as_u64)
        .ok_or_else(|| InfraError::InvalidConfig(format!("missing schema in {}", path.display())))?;
    if schema != 1 {
        return Err(InfraError::InvalidConfig(format!(
            "unsupported schema {} in {}",
            schema,
            path.display()
        )));
    }
    Ok(parsed)
}

pub fn load_configs(config_dir: &Path) -> Result<ConfigBundle, InfraError> {
    Ok(ConfigBundle {
        app: read_config(&config_dir.join(APP_JSON))?,
        timeline: read_config(&config_dir.join(TIMELINE_JSON))?,
    })
}

/// Reads both config files. Malformed timeline values fall back to defaults with a warning;
/// a missing file or wrong schema is an error.
pub fn load_planner_settings(config_dir: &Path) -> Result<PlannerSettings, InfraError> {
    let bundle = load_configs(config_dir)?;
    let defaults = PlannerSettings::default();

    let user_id = bundle
        .app
        .get("userId")
        .and_then(serde_json::Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToOwned::to_owned)
        .unwrap_or(defaults.user_id);

    let timeline = &bundle.timeline;
    let timeline_start = read_clock(timeline, "start").unwrap_or(defaults.timeline_start);
    let timeline_end = read_clock(timeline, "end").unwrap_or(defaults.timeline_end);
    let (timeline_start, timeline_end) = if timeline_start < timeline_end {
        (timeline_start, timeline_end)
    } else {
        warn!(
            start = %timeline_start,
            end = %timeline_end,
            "timeline end must follow start; using default timeline"
        );
        (defaults.timeline_start, defaults.timeline_end)
    };

    let default_duration_minutes = timeline
        .get("defaultDurationMinutes")
        .and_then(serde_json::Value::as_u64)
        .and_then(|value| u32::try_from(value).ok())
        .filter(|value| *value > 0 && value % SLOT_MINUTES == 0)
        .unwrap_or(defaults.default_duration_minutes);
    let tick_interval = read_millis(timeline, "tickIntervalMs").unwrap_or(defaults.tick_interval);
    let categorize_debounce =
        read_millis(timeline, "categorizeDebounceMs").unwrap_or(defaults.categorize_debounce);

    Ok(PlannerSettings {
        user_id,
        timeline_start,
        timeline_end,
        default_duration_minutes,
        tick_interval,
        categorize_debounce,
    })
}

fn read_clock(value: &serde_json::Value, key: &str) -> Option<ClockTime> {
    let raw = value.get(key).and_then(serde_json::Value::as_str)?;
    match parse_clock_time(raw) {
        Ok(time) if time.minute() % SLOT_MINUTES == 0 => Some(time),
        Ok(time) => {
            warn!(key, %time, "timeline bound is not on a slot boundary; using default");
            None
        }
        Err(error) => {
            warn!(key, %error, "ignoring invalid timeline bound");
            None
        }
    }
}

fn read_millis(value: &serde_json::Value, key: &str) -> Option<Duration> {
    value
        .get(key)
        .and_then(serde_json::Value::as_u64)
        .filter(|millis| *millis > 0)
        .map(Duration::from_millis)
}
