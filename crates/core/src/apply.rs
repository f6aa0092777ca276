use std::time::{Duration, Instant};

use async_trait::async_trait;
use thiserror::Error;
use tracing::{info, warn};

use crate::audit_trail::{unix_timestamp_millis, AuditOutcome, AuditRecord, AuditTrailError, FileAuditTrail};
use crate::ledger::{ChangeKind, ChangeLedger, ChangeRecord};
use crate::synthesizer::{synthesize, MetadataLookup, SynthesisFailure, SynthesizedStatement};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ApplyBackendError {
    message: String,
}

impl ApplyBackendError {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ApplyError {
    #[error("there are no pending changes to apply")]
    NothingToApply,
    #[error("failed to journal applied change: {0}")]
    Journal(#[from] AuditTrailError),
}

/// Executes one synthesized statement and reports the affected row count.
#[async_trait]
pub trait ChangeApplier {
    async fn execute(&self, sql: &str) -> Result<u64, ApplyBackendError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatementOutcome {
    Applied { rows_affected: u64 },
    Failed { error: ApplyBackendError },
}

#[derive(Debug, Clone, PartialEq)]
pub struct AppliedStatement {
    pub statement: SynthesizedStatement,
    pub outcome: StatementOutcome,
    pub elapsed: Duration,
    /// Ledger records removed because the statement succeeded.
    pub applied: Vec<ChangeRecord>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ApplySummary {
    pub statements: Vec<AppliedStatement>,
    /// Records no SQL could be built for; they stay in the ledger.
    pub rejected: Vec<SynthesisFailure>,
}

impl ApplySummary {
    #[must_use]
    pub fn succeeded(&self) -> usize {
        self.statements
            .iter()
            .filter(|statement| matches!(statement.outcome, StatementOutcome::Applied { .. }))
            .count()
    }

    #[must_use]
    pub fn failed(&self) -> usize {
        self.statements.len() - self.succeeded()
    }
}

/// Runs every pending change in ledger order. Successful statements drop the
/// ledger records they cover; failed and rejected ones stay pending.
pub async fn apply_pending<A, L>(
    applier: &A,
    ledger: &mut ChangeLedger,
    lookup: &L,
    journal: Option<&FileAuditTrail>,
) -> Result<ApplySummary, ApplyError>
where
    A: ChangeApplier + ?Sized,
    L: MetadataLookup + ?Sized,
{
    if ledger.is_empty() {
        return Err(ApplyError::NothingToApply);
    }

    let report = synthesize(ledger, lookup);
    let mut summary = ApplySummary::default();

    for failure in report.failures {
        if let Some(journal) = journal {
            let kind = ledger.get(&failure.key).map(ChangeRecord::kind);
            journal.append(&AuditRecord {
                timestamp_unix_ms: unix_timestamp_millis(),
                result_set: failure.key.result_set,
                row: failure.key.row,
                kind: kind.unwrap_or(ChangeKind::Update),
                outcome: AuditOutcome::Rejected,
                sql: None,
                rows_affected: None,
                elapsed_ms: None,
                error: Some(failure.error.to_string()),
            })?;
        }
        summary.rejected.push(failure);
    }

    for statement in report.statements {
        let started_at = Instant::now();
        let result = applier.execute(&statement.sql).await;
        let elapsed = started_at.elapsed();

        let mut applied = Vec::new();
        let outcome = match result {
            Ok(0) => {
                warn!(sql = %statement.sql, "statement matched no rows; change kept pending");
                StatementOutcome::Failed {
                    error: ApplyBackendError::new("statement matched no rows"),
                }
            }
            Ok(rows_affected) => {
                applied.extend(statement.keys.iter().filter_map(|key| ledger.revert(key)));
                StatementOutcome::Applied { rows_affected }
            }
            Err(error) => {
                warn!(sql = %statement.sql, %error, "statement failed; change kept pending");
                StatementOutcome::Failed { error }
            }
        };

        if let Some(journal) = journal {
            let (audit_outcome, rows_affected, error) = match &outcome {
                StatementOutcome::Applied { rows_affected } => {
                    (AuditOutcome::Succeeded, Some(*rows_affected), None)
                }
                StatementOutcome::Failed { error } => {
                    (AuditOutcome::Failed, None, Some(error.to_string()))
                }
            };
            journal.append(&AuditRecord {
                timestamp_unix_ms: unix_timestamp_millis(),
                result_set: statement.result_set,
                row: statement.row,
                kind: statement.kind,
                outcome: audit_outcome,
                sql: Some(statement.sql.clone()),
                rows_affected,
                elapsed_ms: Some(elapsed.as_millis()),
                error,
            })?;
        }

        summary.statements.push(AppliedStatement {
            statement,
            outcome,
            elapsed,
            applied,
        });
    }

    info!(
        succeeded = summary.succeeded(),
        failed = summary.failed(),
        rejected = summary.rejected.len(),
        "applied pending changes"
    );
    Ok(summary)
}
