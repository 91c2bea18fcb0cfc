use crate::app::command_support::{load_context, render_optional, CliContext};
use crate::config::{default_settings_path, save_settings, Settings};
use crate::dispatch::{Dispatcher, DockerCli, StepExecutor};
use crate::permissions::SqlitePermissionStore;
use crate::runtime::{
    bootstrap_paths, load_serve_state, ownership_state, run_serve, stop_serve, OwnershipState,
    RuntimeError, RuntimeLog,
};
use std::path::Path;
use std::time::Duration;

pub fn cmd_setup(config: Option<&Path>) -> Result<String, String> {
    let settings_path = config.map_or_else(default_settings_path, Path::to_path_buf);
    let created = !settings_path.exists();
    if created {
        save_settings(&settings_path, &Settings::default()).map_err(|e| e.to_string())?;
    }

    let context = load_context(Some(settings_path.as_path()))?;
    bootstrap_paths(&context.paths).map_err(|e| e.to_string())?;
    context
        .queue_store()
        .ensure_dirs()
        .map_err(|e| e.to_string())?;
    let database = context.settings.permissions_database();
    SqlitePermissionStore::open(&database).map_err(|e| e.to_string())?;

    Ok(format!(
        "setup complete\nconfig={}\nconfig_created={created}\nstate_root={}\nlocker={}\npermissions={}",
        settings_path.display(),
        context.paths.root.display(),
        context.paths.locker_root().display(),
        database.display()
    ))
}

pub fn cmd_serve(context: &CliContext) -> Result<String, String> {
    let log = RuntimeLog::new(context.paths.runtime_log_path());
    let dispatcher = Dispatcher::new(DockerCli::from_settings(&context.settings.container), log);
    let executor = StepExecutor::new(dispatcher, context.paths.locker_root(), &context.settings);
    run_serve(&context.paths, &context.settings, executor).map_err(|e| e.to_string())?;
    Ok(format!(
        "stopped\nstate_root={}",
        context.paths.root.display()
    ))
}

pub fn cmd_stop(context: &CliContext) -> Result<String, String> {
    match stop_serve(&context.paths, Duration::from_secs(30)) {
        Ok(result) => Ok(format!(
            "stopped\npid={}\nforced={}",
            result.pid, result.forced
        )),
        Err(RuntimeError::NotRunning) => Ok("stopped\nrunning=false".to_string()),
        Err(err) => Err(err.to_string()),
    }
}

pub fn cmd_status(context: &CliContext) -> Result<String, String> {
    let ownership = ownership_state(&context.paths).map_err(|e| e.to_string())?;
    let state = load_serve_state(&context.paths).map_err(|e| e.to_string())?;
    let running = match ownership {
        OwnershipState::Running { pid } => format!("running=true\npid={pid}"),
        OwnershipState::Stale => "running=false\nstale=true".to_string(),
        OwnershipState::NotRunning => "running=false".to_string(),
    };
    Ok(format!(
        "{running}\nstate_root={}\nworker_limit={}\nstarted_at={}\nstopped_at={}\nlast_error={}",
        context.paths.root.display(),
        state.worker_limit,
        render_optional(state.started_at),
        render_optional(state.stopped_at),
        render_optional(state.last_error)
    ))
}
