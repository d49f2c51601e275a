//! Batch reporting: elapsed time and console rendering.

use std::time::{Duration, Instant};

use comfy_table::{presets::UTF8_FULL_CONDENSED, Cell, Color, ContentArrangement, Table};
use tracing::{info, warn};

use crate::migration::model::{
    BatchResult, FailedImport, MissingDatabase, ProgressSnapshot, SnapshotItem,
};
use crate::migration::ops::ProgressSink;

// ─────────────────────────────────────────────────────────────────────────────
// Elapsed time
// ─────────────────────────────────────────────────────────────────────────────

/// Formats a duration as `HH:MM:SS`. Hours are not wrapped at 24.
pub fn format_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
}

type ElapsedEmitter = Box<dyn FnOnce(Duration) + Send>;

/// Reports the run's wall-clock time when dropped, on success and failure alike.
///
/// The report is emitted exactly once, through the emitter given at start.
pub struct ElapsedReport {
    started: Instant,
    emit: Option<ElapsedEmitter>,
}

impl ElapsedReport {
    /// Starts a report that logs and prints `Elapsed time: HH:MM:SS`.
    pub fn start() -> Self {
        Self::with_emitter(print_elapsed)
    }

    pub fn with_emitter(emit: impl FnOnce(Duration) + Send + 'static) -> Self {
        Self {
            started: Instant::now(),
            emit: Some(Box::new(emit)),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

impl Drop for ElapsedReport {
    fn drop(&mut self) {
        if let Some(emit) = self.emit.take() {
            emit(self.elapsed());
        }
    }
}

fn print_elapsed(elapsed: Duration) {
    let line = format!("Elapsed time: {}", format_elapsed(elapsed));
    info!("[MIGRATE] {}", line);
    println!("{}", line);
}

// ─────────────────────────────────────────────────────────────────────────────
// Tables
// ─────────────────────────────────────────────────────────────────────────────

fn new_table(headers: &[&str]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(
            headers
                .iter()
                .map(|h| Cell::new(h).fg(Color::Cyan))
                .collect::<Vec<Cell>>(),
        );
    table
}

fn opt(value: &Option<String>) -> String {
    value.clone().unwrap_or_else(|| "-".to_string())
}

/// Jobs not yet succeeded, one row each.
pub fn snapshot_table(items: &[SnapshotItem]) -> Table {
    let mut table = new_table(&[
        "Archive",
        "Operation",
        "Status",
        "Message",
        "Error",
        "Queued",
        "Modified",
    ]);
    for item in items {
        table.add_row(vec![
            Cell::new(&item.archive),
            Cell::new(opt(&item.handle)),
            Cell::new(item.status.as_str()),
            Cell::new(opt(&item.status_message)),
            Cell::new(opt(&item.error_message)),
            Cell::new(opt(&item.queued_time)),
            Cell::new(opt(&item.last_modified_time)),
        ]);
    }
    table
}

pub fn failure_table(failed: &[FailedImport]) -> Table {
    let mut table = new_table(&["Archive", "Database", "Operation", "Reason"]);
    for f in failed {
        let operation = if f.failed_to_start {
            "not started".to_string()
        } else {
            opt(&f.handle)
        };
        table.add_row(vec![
            Cell::new(&f.archive),
            Cell::new(&f.database_name),
            Cell::new(operation),
            Cell::new(opt(&f.reason)).fg(Color::Red),
        ]);
    }
    table
}

pub fn missing_table(missing: &[MissingDatabase]) -> Table {
    let mut table = new_table(&["Archive", "Expected database", "Check error"]);
    for m in missing {
        table.add_row(vec![
            Cell::new(&m.archive),
            Cell::new(&m.database_name),
            Cell::new(opt(&m.check_error)),
        ]);
    }
    table
}

// ─────────────────────────────────────────────────────────────────────────────
// ConsoleProgress
// ─────────────────────────────────────────────────────────────────────────────

/// Prints progress snapshots and the final report to stdout.
#[derive(Debug, Default)]
pub struct ConsoleProgress;

impl ProgressSink for ConsoleProgress {
    fn emit_progress(&self, snapshot: &ProgressSnapshot) {
        println!(
            "Iteration {}: {} import(s), {} not yet succeeded",
            snapshot.iteration, snapshot.total_jobs, snapshot.not_succeeded
        );
        if !snapshot.items.is_empty() {
            println!("{}", snapshot_table(&snapshot.items));
        }
    }

    fn emit_result(&self, result: &BatchResult) {
        let c = &result.counts;
        info!(
            "[MIGRATE] {} job(s): {} succeeded, {} failed, {} status unavailable, {} unresolved",
            result.total_jobs,
            c.succeeded,
            c.failed,
            c.status_unavailable,
            result.unresolved.len()
        );

        if !result.failed.is_empty() {
            warn!("[MIGRATE] {} import(s) failed", result.failed_count());
            println!("Failed imports:");
            println!("{}", failure_table(&result.failed));
        }
        if !result.missing.is_empty() {
            warn!("[MIGRATE] {} database(s) missing", result.missing.len());
            println!("Archives without a matching database:");
            println!("{}", missing_table(&result.missing));
        }
        if !result.unresolved.is_empty() {
            println!(
                "Still in progress when polling stopped: {}",
                result.unresolved.join(", ")
            );
        }
        if result.is_success() {
            println!("All {} import(s) completed", result.total_jobs);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    use crate::error::AppError;
    use crate::migration::model::ImportStatus;

    #[test]
    fn elapsed_format() {
        assert_eq!(format_elapsed(Duration::from_secs(0)), "00:00:00");
        assert_eq!(format_elapsed(Duration::from_secs(3723)), "01:02:03");
        assert_eq!(format_elapsed(Duration::from_millis(59_999)), "00:00:59");
        assert_eq!(format_elapsed(Duration::from_secs(90_000)), "25:00:00");
    }

    fn recorder() -> (Arc<Mutex<Vec<Duration>>>, impl FnOnce(Duration) + Send + 'static) {
        let reports = Arc::new(Mutex::new(Vec::new()));
        let sink = reports.clone();
        (reports, move |elapsed| sink.lock().unwrap().push(elapsed))
    }

    #[test]
    fn elapsed_report_emits_once_on_drop() {
        let (reports, emit) = recorder();
        let report = ElapsedReport::with_emitter(emit);
        std::thread::sleep(Duration::from_millis(5));
        assert!(reports.lock().unwrap().is_empty());

        drop(report);
        let reports = reports.lock().unwrap();
        assert_eq!(reports.len(), 1);
        assert!(reports[0] >= Duration::from_millis(5));
    }

    #[test]
    fn elapsed_report_emits_when_run_fails() {
        fn reconcile() -> Result<(), AppError> {
            Err(AppError::BatchFailed {
                failed_imports: 1,
                missing_databases: 0,
                unresolved: 0,
            })
        }

        fn failing_run(report: ElapsedReport) -> Result<(), AppError> {
            let _report = report;
            reconcile()?;
            Ok(())
        }

        let (reports, emit) = recorder();
        let result = failing_run(ElapsedReport::with_emitter(emit));
        assert!(matches!(result, Err(AppError::BatchFailed { .. })));
        assert_eq!(reports.lock().unwrap().len(), 1);
    }

    #[test]
    fn snapshot_table_shows_every_item() {
        let items = vec![SnapshotItem {
            archive: "b.bacpac".into(),
            handle: Some("op-2".into()),
            status: ImportStatus::InProgress,
            status_message: Some("Running, Progress = 45%".into()),
            error_message: None,
            queued_time: Some("3/22/2024 6:29:31 AM".into()),
            last_modified_time: None,
        }];
        let rendered = snapshot_table(&items).set_width(200).to_string();
        assert!(rendered.contains("b.bacpac"));
        assert!(rendered.contains("InProgress"));
        assert!(rendered.contains("op-2"));
    }

    #[test]
    fn failure_table_marks_unstarted_imports() {
        let failed = vec![FailedImport {
            archive: "b.bacpac".into(),
            database_name: "b".into(),
            handle: None,
            reason: Some("quota".into()),
            failed_to_start: true,
        }];
        let rendered = failure_table(&failed).set_width(200).to_string();
        assert!(rendered.contains("not started"));
        assert!(rendered.contains("quota"));
    }

    #[test]
    fn missing_table_lists_expected_names() {
        let missing = vec![MissingDatabase {
            archive: "c.bacpac".into(),
            database_name: "c".into(),
            check_error: None,
        }];
        let rendered = missing_table(&missing).set_width(200).to_string();
        assert!(rendered.contains("c.bacpac"));
        assert!(rendered.contains("Expected database"));
    }
}
