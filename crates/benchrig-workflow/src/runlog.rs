use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use time::macros::format_description;
use time::OffsetDateTime;
use tracing::{debug, warn};

use benchrig_model::{is_valid_bib_id, CommandResult, WorkflowSummary};

/// Repeated degradation warnings are throttled to one per this interval.
const WARN_THROTTLE: Duration = Duration::from_secs(5 * 60);

/// Creates per-run log directories `<base>/BIB_<id>/YYYY-MM-DD/` and hands
/// out [`RunLog`] appenders.
///
/// Every failure mode (bad path segment, permissions, full disk) degrades
/// the run to shared logging only; nothing here ever propagates an error
/// into the workflow.
pub struct RunLogger {
    base: PathBuf,
    last_warning: Mutex<Option<Instant>>,
}

impl RunLogger {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        RunLogger {
            base: base.into(),
            last_warning: Mutex::new(None),
        }
    }

    fn degrade(&self, reason: String) -> RunLog {
        let mut last = self.last_warning.lock();
        let due = last.map_or(true, |at| at.elapsed() >= WARN_THROTTLE);
        if due {
            *last = Some(Instant::now());
            warn!(reason = %reason, "per-run logging degraded to shared logger");
        } else {
            debug!(reason = %reason, "per-run logging degraded (warning throttled)");
        }
        RunLog {
            file: None,
            run_dir: None,
            bib_dir: None,
            uut_id: String::new(),
            port_index: 0,
            date: String::new(),
            degraded_reason: Some(reason),
        }
    }

    /// Prepares the log directory and file for one workflow run.
    pub fn begin_run(&self, bib_id: &str, uut_id: &str, port_index: u32) -> RunLog {
        // The same identifier rule the resolver enforces; client-derived
        // ids never become path segments unchecked.
        if !is_valid_bib_id(bib_id) {
            return self.degrade(format!("BIB id '{bib_id}' is not a safe path segment"));
        }
        if !is_valid_bib_id(uut_id) {
            return self.degrade(format!("UUT id '{uut_id}' is not a safe path segment"));
        }

        let now = OffsetDateTime::now_utc();
        let date_format = format_description!("[year]-[month]-[day]");
        let time_format = format_description!("[hour][minute]");
        let date = now
            .format(&date_format)
            .unwrap_or_else(|_| "1970-01-01".to_string());
        let hhmm = now.format(&time_format).unwrap_or_else(|_| "0000".to_string());

        let bib_dir = self.base.join(format!("BIB_{bib_id}"));
        let run_dir = bib_dir.join(&date);
        if let Err(err) = fs::create_dir_all(&run_dir) {
            return self.degrade(format!("cannot create {}: {err}", run_dir.display()));
        }

        // Probe write: directory creation can succeed on a filesystem that
        // then refuses writes (quota, read-only remount).
        let probe = run_dir.join(".probe");
        if let Err(err) = fs::write(&probe, b"probe") {
            return self.degrade(format!("cannot write in {}: {err}", run_dir.display()));
        }
        let _ = fs::remove_file(&probe);

        let file_name = format!("{uut_id}_port{port_index}_{hhmm}.log");
        let path = run_dir.join(&file_name);
        let file = match fs::OpenOptions::new().create(true).append(true).open(&path) {
            Ok(file) => file,
            Err(err) => {
                return self.degrade(format!("cannot open {}: {err}", path.display()));
            }
        };

        debug!(path = %path.display(), "per-run log opened");
        RunLog {
            file: Some(Mutex::new(file)),
            run_dir: Some(run_dir),
            bib_dir: Some(bib_dir),
            uut_id: uut_id.to_string(),
            port_index,
            date,
            degraded_reason: None,
        }
    }
}

/// Appender for one workflow's log file. One append per entry, serialized
/// by an internal mutex; all write failures are swallowed.
pub struct RunLog {
    file: Option<Mutex<fs::File>>,
    run_dir: Option<PathBuf>,
    bib_dir: Option<PathBuf>,
    uut_id: String,
    port_index: u32,
    date: String,
    degraded_reason: Option<String>,
}

impl RunLog {
    pub fn is_degraded(&self) -> bool {
        self.file.is_none()
    }

    pub fn degraded_reason(&self) -> Option<&str> {
        self.degraded_reason.as_deref()
    }

    pub fn append_line(&self, line: &str) {
        let Some(file) = &self.file else { return };
        let mut guard = file.lock();
        if let Err(err) = writeln!(guard, "{line}") {
            debug!(error = %err, "per-run log append failed");
        }
    }

    /// Appends one command result as a JSON line.
    pub fn append_result(&self, result: &CommandResult) {
        match serde_json::to_string(result) {
            Ok(json) => self.append_line(&json),
            Err(err) => debug!(error = %err, "command result serialization failed"),
        }
    }

    /// Writes the run summary, the daily summary line, and the "latest"
    /// marker.
    pub fn finish(&self, summary: &WorkflowSummary) {
        self.append_line(&summary.describe());

        let (Some(run_dir), Some(bib_dir)) = (&self.run_dir, &self.bib_dir) else {
            return;
        };

        let daily = run_dir.join(format!("daily_summary_{}.log", self.date));
        let line = format!(
            "{}_port{} {} ({} ms)\n",
            self.uut_id,
            self.port_index,
            summary.describe(),
            summary.total_duration.as_millis()
        );
        if let Err(err) = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&daily)
            .and_then(|mut f| f.write_all(line.as_bytes()))
        {
            debug!(error = %err, "daily summary append failed");
        }

        let latest_dir = bib_dir.join("latest");
        let marker = latest_dir.join(format!("{}_current.log", self.uut_id));
        if let Err(err) =
            fs::create_dir_all(&latest_dir).and_then(|_| fs::write(&marker, line.as_bytes()))
        {
            debug!(error = %err, "latest marker write failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsafe_bib_id_degrades() {
        let dir = tempfile::tempdir().unwrap();
        let logger = RunLogger::new(dir.path());
        let log = logger.begin_run("../escape", "u1", 1);
        assert!(log.is_degraded());
        assert!(log.degraded_reason().unwrap().contains("path segment"));
        // Appends on a degraded log are no-ops, not panics.
        log.append_line("entry");
    }

    #[test]
    fn unwritable_base_degrades() {
        let logger = RunLogger::new("/proc/benchrig-cannot-write-here");
        let log = logger.begin_run("bench_a", "u1", 1);
        assert!(log.is_degraded());
    }
}
