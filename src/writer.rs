// ABOUTME: Writer - upserts transformed records into the target table in one transaction
// ABOUTME: Storage-agnostic over UpsertTarget so the all-or-nothing logic is testable without a server

use anyhow::Result;

use crate::error::EtlError;
use crate::record::{validate_table_name, TransformedRecord};

/// Target columns of the upsert, in parameter order.
pub const UPSERT_COLUMNS: [&str; 8] = [
    "ID",
    "SESSION_ID",
    "LOGIN_TIME",
    "LOGOUT_TIME",
    "IP_ADDRESS",
    "USER_NAME",
    "DEVICE_TYPE",
    "TRANSFORM_NOTES",
];

/// A positional upsert parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpsertParam {
    Long(i64),
    Text(Option<String>),
}

/// An open write transaction against the replica store.
///
/// Nothing issued through `execute_upsert` may become visible before `commit`.
#[allow(async_fn_in_trait)]
pub trait UpsertSession {
    async fn execute_upsert(&mut self, sql: &str, params: &[UpsertParam]) -> Result<()>;
    async fn commit(&mut self) -> Result<()>;
    async fn rollback(&mut self) -> Result<()>;
    /// Release the underlying connection. Failures are logged, not returned.
    async fn close(self);
}

/// Something that can open an [`UpsertSession`].
#[allow(async_fn_in_trait)]
pub trait UpsertTarget {
    type Session: UpsertSession;

    async fn begin(&self) -> Result<Self::Session>;
}

/// Outcome of a write stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteReport {
    pub table: String,
    pub rows_written: usize,
    /// True when there was nothing to write and no session was opened.
    pub skipped: bool,
}

/// Build the parameterized upsert. Times arrive as text and are converted with
/// `TO_TIMESTAMP` by the store.
pub fn build_upsert_statement(table: &str) -> String {
    format!(
        "UPSERT INTO {} ({}) VALUES (?, ?, TO_TIMESTAMP(?), TO_TIMESTAMP(?), ?, ?, ?, ?)",
        table,
        UPSERT_COLUMNS.join(", ")
    )
}

/// Parameters for one record, matching [`UPSERT_COLUMNS`].
pub fn upsert_params(row: &TransformedRecord) -> Vec<UpsertParam> {
    let r = &row.record;
    vec![
        UpsertParam::Long(r.id),
        UpsertParam::Text(r.session_id.clone()),
        UpsertParam::Text(r.login_time.clone()),
        UpsertParam::Text(r.logout_time.clone()),
        UpsertParam::Text(r.ip_address.clone()),
        UpsertParam::Text(r.user_name.clone()),
        UpsertParam::Text(r.device_type.clone()),
        UpsertParam::Text(Some(row.transform_notes.clone())),
    ]
}

/// Upsert `rows` into `table` in a single transaction.
///
/// An empty slice is a no-op and opens no session. Any failure while
/// upserting or committing rolls the transaction back and returns
/// [`EtlError::Write`]; nothing is committed in that case.
pub async fn write_to_phoenix<T: UpsertTarget>(
    target: &T,
    table: &str,
    rows: &[TransformedRecord],
) -> Result<WriteReport> {
    if rows.is_empty() {
        tracing::info!("No data to write to {}. Skipping.", table);
        return Ok(WriteReport {
            table: table.to_string(),
            rows_written: 0,
            skipped: true,
        });
    }

    validate_table_name(table).map_err(|e| EtlError::InvalidConfig(format!("{:#}", e)))?;
    let sql = build_upsert_statement(table);

    let mut session = target.begin().await?;

    let outcome = match apply_rows(&mut session, &sql, rows).await {
        Ok(()) => session
            .commit()
            .await
            .map_err(|e| format!("commit failed: {:#}", e)),
        Err(e) => Err(e),
    };

    if let Err(message) = outcome {
        if let Err(rollback_err) = session.rollback().await {
            tracing::warn!("Rollback on {} failed: {:#}", table, rollback_err);
        }
        session.close().await;
        return Err(EtlError::write(table, message).into());
    }

    session.close().await;

    tracing::info!("Wrote {} rows to Phoenix table: {}", rows.len(), table);

    Ok(WriteReport {
        table: table.to_string(),
        rows_written: rows.len(),
        skipped: false,
    })
}

async fn apply_rows<S: UpsertSession>(
    session: &mut S,
    sql: &str,
    rows: &[TransformedRecord],
) -> std::result::Result<(), String> {
    for row in rows {
        let params = upsert_params(row);
        session
            .execute_upsert(sql, &params)
            .await
            .map_err(|e| format!("row ID={}: {:#}", row.record.id, e))?;
    }
    Ok(())
}
