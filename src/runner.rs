use std::ops::Range;
use std::path::Path;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Local};
use tracing::{error, info};

use crate::config::{Credentials, PortalConfig};
use crate::portal::{Browser, PortalSession};
use crate::record_store::{excel_line, RecordStore};

/// Outcome of one `run`, printed when it finishes.
#[derive(Debug)]
pub struct RunReport {
    pub started_at: DateTime<Local>,
    pub finished_at: DateTime<Local>,
    pub rows_processed: usize,
    pub rows_failed: usize,
    pub procedures_confirmed: usize,
    /// Rows that shared the previous row's guia and skipped the search.
    pub searches_reused: usize,
}

impl RunReport {
    /// Wall-clock time of the run as `HH:MM:SS`.
    pub fn elapsed(&self) -> String {
        let secs = (self.finished_at - self.started_at).num_seconds().max(0);
        format!("{:02}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
    }

    pub fn display(&self) {
        let rows_ok = self.rows_processed - self.rows_failed;
        println!(
            "\nConfirmation run {} -> {} ({})",
            self.started_at.format("%d/%m/%Y %H:%M:%S"),
            self.finished_at.format("%d/%m/%Y %H:%M:%S"),
            self.elapsed()
        );
        println!("{}", "-".repeat(60));
        println!("{:<40} {:>19}", "Rows processed", self.rows_processed);
        println!("{:<40} {:>19}", "Rows completed", rows_ok);
        println!("{:<40} {:>19}", "Rows with ERRO", self.rows_failed);
        println!("{:<40} {:>19}", "Guia searches skipped (same guia)", self.searches_reused);
        println!("{:<40} {:>19}", "Procedures confirmed", self.procedures_confirmed);
        println!("{}\n", "-".repeat(60));
    }
}

/// Translate inclusive spreadsheet line numbers into row indices. Line 1 is
/// the header; without bounds every data row is covered.
pub fn row_range(
    total_rows: usize,
    start_line: Option<usize>,
    end_line: Option<usize>,
) -> Result<Range<usize>> {
    let first_line = excel_line(0);
    if total_rows == 0 && start_line.is_none() && end_line.is_none() {
        return Ok(0..0);
    }

    let last_line = excel_line(total_rows) - 1;
    let start = start_line.unwrap_or(first_line);
    let end = end_line.unwrap_or(last_line);

    if start < first_line {
        bail!("Start line must be at least {} (line 1 is the header)", first_line);
    }
    if end > last_line {
        bail!("End line {} is past the last data line {}", end, last_line);
    }
    if start > end {
        bail!("Start line {} is after end line {}", start, end);
    }

    Ok(start - first_line..end - first_line + 1)
}

/// Everything a run needs before a browser is started.
#[derive(Debug)]
pub struct RunPlan {
    pub credentials: Credentials,
    pub config: PortalConfig,
    pub store: RecordStore,
    pub rows: Range<usize>,
}

/// Resolve credentials first, then the config file, the spreadsheet and the
/// row range. Nothing past a missing credential is read.
pub fn prepare_run<F>(
    lookup: F,
    file: &Path,
    sheet: &str,
    config_path: Option<&Path>,
    start_line: Option<usize>,
    end_line: Option<usize>,
) -> Result<RunPlan>
where
    F: Fn(&str) -> Option<String>,
{
    let credentials = Credentials::from_lookup(lookup)?;
    let config = PortalConfig::load(config_path)?;
    let store =
        RecordStore::open(file, sheet).with_context(|| format!("Failed to load {:?}", file))?;
    let rows = row_range(store.len(), start_line, end_line)?;

    Ok(RunPlan {
        credentials,
        config,
        store,
        rows,
    })
}

/// Log in once, process every row in `rows` and close the browser whatever
/// happened. A failing row gets its ERRO column and the run moves on; a
/// failing login aborts the run.
pub async fn run<B: Browser>(
    mut session: PortalSession<B>,
    rows: Range<usize>,
) -> Result<RunReport> {
    let started_at = Local::now();
    let outcome = process_rows(&mut session, rows).await;
    let procedures_confirmed = session.confirmed_in_run();
    let searches_reused = session.searches_reused();
    session.shutdown().await;

    let (rows_processed, rows_failed) = outcome?;
    Ok(RunReport {
        started_at,
        finished_at: Local::now(),
        rows_processed,
        rows_failed,
        procedures_confirmed,
        searches_reused,
    })
}

async fn process_rows<B: Browser>(
    session: &mut PortalSession<B>,
    rows: Range<usize>,
) -> Result<(usize, usize)> {
    if rows.is_empty() {
        info!("No rows to process");
        return Ok((0, 0));
    }

    session.set_row(rows.start);
    session.login().await?;

    let mut processed = 0;
    let mut failed = 0;
    for idx in rows {
        session.set_row(idx);
        let line = excel_line(idx);
        info!("Processing line {}", line);

        match session.process_row().await {
            Ok(()) => session.save(),
            Err(e) => {
                let message = format!("{:#}", e);
                error!("Failed to process line {}: {}", line, message);
                session.record_error(&message);
                failed += 1;
            }
        }
        processed += 1;
    }

    info!("Finished {} rows ({} with errors)", processed, failed);
    Ok((processed, failed))
}
