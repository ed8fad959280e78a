// ABOUTME: Driver - sequences read, diff, transform and write for one run
// ABOUTME: Logs a count after each stage and reports how the run ended

use anyhow::{Context, Result};

use crate::diff::{compare_data, DiffPolicy};
use crate::record::SessionRecord;
use crate::transform::transform_data;
use crate::writer::{write_to_phoenix, UpsertTarget};

/// A store that can produce the full projection in one scoped read.
#[allow(async_fn_in_trait)]
pub trait RecordReader {
    /// Human-readable name of what is being read, for logs.
    fn describe(&self) -> String;

    async fn read_records(&self) -> Result<Vec<SessionRecord>>;
}

/// Per-run settings that are not connection details.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub target_table: String,
    pub diff_policy: DiffPolicy,
    pub dry_run: bool,
}

/// How a successful run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// The diff was empty; nothing was transformed or written.
    NoChanges {
        source_rows: usize,
        replica_rows: usize,
    },
    /// Changes were found and transformed but the write was skipped on request.
    DryRun {
        source_rows: usize,
        replica_rows: usize,
        changed_rows: usize,
    },
    Written {
        source_rows: usize,
        replica_rows: usize,
        changed_rows: usize,
        rows_written: usize,
    },
}

impl RunOutcome {
    /// Single status line for the scheduler log. The leading `status=` token
    /// separates an empty run from one that wrote rows.
    pub fn status_line(&self) -> String {
        match self {
            RunOutcome::NoChanges {
                source_rows,
                replica_rows,
            } => format!(
                "status=noop source_rows={} replica_rows={}",
                source_rows, replica_rows
            ),
            RunOutcome::DryRun {
                source_rows,
                replica_rows,
                changed_rows,
            } => format!(
                "status=dry-run source_rows={} replica_rows={} changed_rows={}",
                source_rows, replica_rows, changed_rows
            ),
            RunOutcome::Written {
                source_rows,
                replica_rows,
                changed_rows,
                rows_written,
            } => format!(
                "status=written source_rows={} replica_rows={} changed_rows={} rows={}",
                source_rows, replica_rows, changed_rows, rows_written
            ),
        }
    }

    pub fn rows_written(&self) -> usize {
        match self {
            RunOutcome::Written { rows_written, .. } => *rows_written,
            _ => 0,
        }
    }
}

/// Run one sync: source read, replica read, diff, transform, write.
///
/// Any stage failure aborts the run. An empty diff returns
/// [`RunOutcome::NoChanges`] without touching the target.
pub async fn run_pipeline<S, R, W>(
    source: &S,
    replica: &R,
    target: &W,
    config: &PipelineConfig,
) -> Result<RunOutcome>
where
    S: RecordReader,
    R: RecordReader,
    W: UpsertTarget,
{
    let source_rows = source
        .read_records()
        .await
        .with_context(|| format!("Failed to read {}", source.describe()))?;
    tracing::info!(
        "Retrieved {} records from {}.",
        source_rows.len(),
        source.describe()
    );

    let replica_rows = replica
        .read_records()
        .await
        .with_context(|| format!("Failed to read {}", replica.describe()))?;
    tracing::info!(
        "Retrieved {} records from {}.",
        replica_rows.len(),
        replica.describe()
    );

    let (changed, stats) = compare_data(&source_rows, &replica_rows, config.diff_policy);
    tracing::info!(
        "Found {} new/updated records ({} new, {} updated).",
        changed.len(),
        stats.new_rows,
        stats.updated_rows
    );

    if changed.is_empty() {
        tracing::info!("No new or updated records to transform or write. Exiting.");
        return Ok(RunOutcome::NoChanges {
            source_rows: source_rows.len(),
            replica_rows: replica_rows.len(),
        });
    }

    let transformed = transform_data(&changed);
    tracing::info!("Transformed {} records.", transformed.len());

    if config.dry_run {
        tracing::info!(
            "Dry run: skipping write of {} records to {}",
            transformed.len(),
            config.target_table
        );
        return Ok(RunOutcome::DryRun {
            source_rows: source_rows.len(),
            replica_rows: replica_rows.len(),
            changed_rows: changed.len(),
        });
    }

    let report = write_to_phoenix(target, &config.target_table, &transformed)
        .await
        .with_context(|| format!("Failed to write to Phoenix table {}", config.target_table))?;

    Ok(RunOutcome::Written {
        source_rows: source_rows.len(),
        replica_rows: replica_rows.len(),
        changed_rows: changed.len(),
        rows_written: report.rows_written,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_lines_are_distinguishable() {
        let noop = RunOutcome::NoChanges {
            source_rows: 3,
            replica_rows: 3,
        };
        let written = RunOutcome::Written {
            source_rows: 3,
            replica_rows: 2,
            changed_rows: 1,
            rows_written: 1,
        };
        assert!(noop.status_line().starts_with("status=noop"));
        assert!(written.status_line().starts_with("status=written"));
        assert!(written.status_line().ends_with("rows=1"));
        assert_eq!(noop.rows_written(), 0);
        assert_eq!(written.rows_written(), 1);
    }
}
