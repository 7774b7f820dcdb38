use crate::application::planner::DayPlanner;
use crate::infrastructure::assistant::AssistantService;
use crate::infrastructure::config::{ensure_default_configs, load_planner_settings, PlannerSettings};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::logging::init_logging;
use crate::infrastructure::notifier::TimerNotifier;
use crate::infrastructure::task_repository::{initialize_database, SqliteTaskRepository};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

#[derive(Debug)]
pub struct BootstrapResult {
    pub workspace_root: PathBuf,
    pub config_dir: PathBuf,
    pub logs_dir: PathBuf,
    pub database_path: PathBuf,
    pub settings: PlannerSettings,
}

/// Lays out `config/`, `state/` and `logs/` under the workspace root, writes default
/// configs where missing and creates the database schema.
pub fn bootstrap_workspace(workspace_root: &Path) -> Result<BootstrapResult, InfraError> {
    let config_dir = workspace_root.join("config");
    let state_dir = workspace_root.join("state");
    let logs_dir = workspace_root.join("logs");
    let database_path = state_dir.join("dayplanner.sqlite");

    fs::create_dir_all(&config_dir)?;
    fs::create_dir_all(&state_dir)?;
    fs::create_dir_all(&logs_dir)?;

    ensure_default_configs(&config_dir)?;
    let settings = load_planner_settings(&config_dir)?;
    initialize_database(&database_path)?;

    Ok(BootstrapResult {
        workspace_root: workspace_root.to_path_buf(),
        config_dir,
        logs_dir,
        database_path,
        settings,
    })
}

/// Bootstraps the workspace, installs file logging and returns a planner backed by the
/// local SQLite database.
pub fn open_planner(
    workspace_root: &Path,
    assistant: AssistantService,
    notifier: Arc<dyn TimerNotifier>,
) -> Result<DayPlanner<SqliteTaskRepository>, InfraError> {
    let result = bootstrap_workspace(workspace_root)?;
    let logging_installed = init_logging(&result.logs_dir)?;
    info!(
        workspace = %result.workspace_root.display(),
        database = %result.database_path.display(),
        logging_installed,
        "workspace ready"
    );
    let repository = Arc::new(SqliteTaskRepository::new(&result.database_path));
    Ok(DayPlanner::new(repository, result.settings, assistant, notifier))
}
