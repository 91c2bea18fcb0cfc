use crate::app::command_support::{render_optional, CliContext};
use crate::identity::{resolve_job_meta, JobSource};
use crate::queue::{ControlRequest, QueueEntry};
use crate::recipe::{plan_recipe, RecipeTrigger};
use crate::shared::time::now_secs;
use std::fs;

/// Accepts a trigger as YAML or JSON, checks that it plans cleanly and drops
/// it into `incoming/` for the server to pick up.
pub fn cmd_submit(context: &CliContext, args: &[String]) -> Result<String, String> {
    let [path] = args else {
        return Err("usage: lemc submit <trigger.yaml>".to_string());
    };
    let raw = fs::read_to_string(path).map_err(|e| format!("failed to read {path}: {e}"))?;
    let trigger: RecipeTrigger =
        serde_yaml::from_str(&raw).map_err(|e| format!("invalid trigger in {path}: {e}"))?;

    let now = now_secs();
    let planned = plan_recipe(&trigger, now).map_err(|e| e.to_string())?;
    let mut lines = Vec::with_capacity(planned.len());
    for (request, schedule) in &planned {
        let job = resolve_job_meta(JobSource::Trigger(request)).map_err(|e| e.to_string())?;
        lines.push(format!(
            "job {} class={}",
            job.container_name(),
            schedule.class().as_str()
        ));
    }

    let store = context.queue_store();
    store.ensure_dirs().map_err(|e| e.to_string())?;
    let dropped = store
        .drop_trigger(&trigger, now)
        .map_err(|e| e.to_string())?;
    Ok(format!(
        "submitted\nfile={}\n{}",
        dropped.display(),
        lines.join("\n")
    ))
}

pub fn cmd_cancel(context: &CliContext, args: &[String]) -> Result<String, String> {
    let [key] = args else {
        return Err("usage: lemc cancel <job-key>".to_string());
    };
    let store = context.queue_store();
    store.ensure_dirs().map_err(|e| e.to_string())?;
    let dropped = store
        .drop_control(&ControlRequest::Cancel { key: key.clone() }, now_secs())
        .map_err(|e| e.to_string())?;
    Ok(format!(
        "cancel requested\nkey={key}\nfile={}",
        dropped.display()
    ))
}

pub fn cmd_job_status(context: &CliContext, key: &str) -> Result<String, String> {
    let statuses = context
        .queue_store()
        .read_status()
        .map_err(|e| e.to_string())?;
    let status = statuses
        .get(key)
        .ok_or_else(|| format!("no job with key `{key}`"))?;
    Ok(format!(
        "key={key}\nstatus={}\nclass={}\nattempt={}\nnext_run_at={}\nupdated_at={}\nlast_error={}",
        status.status.as_str(),
        status.class.as_str(),
        status.attempt,
        render_optional(status.next_run_at),
        status.updated_at,
        render_optional(status.last_error.as_deref())
    ))
}

pub fn cmd_queue(context: &CliContext) -> Result<String, String> {
    let store = context.queue_store();
    let live = store.list_entries().map_err(|e| e.to_string())?;
    let failed = store.list_failed().map_err(|e| e.to_string())?;
    if live.is_empty() && failed.is_empty() {
        return Ok("queue empty".to_string());
    }

    let mut lines = vec![format!("entries={} failed={}", live.len(), failed.len())];
    lines.extend(live.iter().map(render_entry));
    lines.extend(failed.iter().map(render_entry));
    Ok(lines.join("\n"))
}

fn render_entry(entry: &QueueEntry) -> String {
    let mut line = format!(
        "{} {} attempt={} key={} id={}",
        entry.status.as_str(),
        entry.schedule.class().as_str(),
        entry.attempt,
        entry.key,
        entry.id
    );
    if let Some(next) = entry.next_run_at() {
        line.push_str(&format!(" next_run_at={next}"));
    }
    if let Some(err) = &entry.last_error {
        line.push_str(&format!(" last_error={err:?}"));
    }
    line
}
