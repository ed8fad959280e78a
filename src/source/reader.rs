// ABOUTME: Source reader - reads the session projection from the relational source
// ABOUTME: Scoped tokio-postgres connection, rows decoded by column name and declared type

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use tokio::task::JoinHandle;
use tokio_postgres::types::Type;
use tokio_postgres::{Client, NoTls, Row};

use super::SourceConfig;
use crate::error::{EtlError, Store};
use crate::pipeline::RecordReader;
use crate::record::{
    format_timestamp, validate_table_name, Field, Projection, SessionRecord,
};

/// A source connection scoped to one read.
///
/// Dropping it drops the client and aborts the background connection task, so
/// the connection is released on every exit path.
pub struct SourceConnection {
    client: Client,
    task: JoinHandle<()>,
}

impl SourceConnection {
    pub async fn open(config: &SourceConfig) -> Result<Self> {
        let pg = config.to_pg_config();

        let (client, task) = if config.ssl {
            let connector = native_tls::TlsConnector::builder()
                .build()
                .map_err(|e| EtlError::connection(Store::Source, e))?;
            let tls = postgres_native_tls::MakeTlsConnector::new(connector);
            let (client, connection) = pg
                .connect(tls)
                .await
                .map_err(|e| EtlError::connection(Store::Source, e))?;
            let task = tokio::spawn(async move {
                if let Err(e) = connection.await {
                    tracing::warn!("Source connection closed with error: {}", e);
                }
            });
            (client, task)
        } else {
            let (client, connection) = pg
                .connect(NoTls)
                .await
                .map_err(|e| EtlError::connection(Store::Source, e))?;
            let task = tokio::spawn(async move {
                if let Err(e) = connection.await {
                    tracing::warn!("Source connection closed with error: {}", e);
                }
            });
            (client, task)
        };

        tracing::debug!(
            "Connected to source {}:{}/{}",
            config.host,
            config.port,
            config.service_name
        );

        Ok(Self { client, task })
    }

    pub fn client(&self) -> &Client {
        &self.client
    }
}

impl Drop for SourceConnection {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Reads the source table.
pub struct SourceReader {
    config: SourceConfig,
    table: String,
    projection: Projection,
}

impl SourceReader {
    pub fn new(config: SourceConfig, table: &str, projection: Projection) -> Result<Self> {
        validate_table_name(table).map_err(|e| EtlError::InvalidConfig(format!("{:#}", e)))?;
        Ok(Self {
            config,
            table: table.to_string(),
            projection,
        })
    }
}

impl RecordReader for SourceReader {
    fn describe(&self) -> String {
        format!("source table {}", self.table)
    }

    async fn read_records(&self) -> Result<Vec<SessionRecord>> {
        let query = self.projection.select_query(&self.table)?;

        let conn = SourceConnection::open(&self.config).await.with_context(|| {
            format!(
                "Failed to connect to source database at {}:{}",
                self.config.host, self.config.port
            )
        })?;

        let rows = conn
            .client()
            .query(query.as_str(), &[])
            .await
            .map_err(|e| EtlError::query(Store::Source, e))
            .with_context(|| format!("Failed to read source table {}", self.table))?;

        let columns = self.projection.columns();
        rows.iter()
            .map(|row| decode_named_row(row, &columns))
            .collect::<Result<Vec<_>>>()
            .with_context(|| format!("Failed to decode rows from source table {}", self.table))
    }
}

/// Decode a source row by column name. `columns` is the projection in select
/// order with the configured key and recency names.
pub fn decode_named_row(row: &Row, columns: &[&str]) -> Result<SessionRecord> {
    let mut record = SessionRecord::new(get_key(row, columns[0])?);
    for (field, column) in Field::COMPARABLE.iter().zip(&columns[1..7]) {
        record.set_field(*field, get_text(row, column)?);
    }
    record.last_updated = get_recency(row, columns[7])?;
    Ok(record)
}

fn column_type<'a>(row: &'a Row, column: &str) -> Result<(usize, &'a Type)> {
    let idx = row
        .columns()
        .iter()
        .position(|c| c.name().eq_ignore_ascii_case(column))
        .ok_or_else(|| {
            EtlError::query(Store::Source, format!("column {} missing from result", column))
        })?;
    Ok((idx, row.columns()[idx].type_()))
}

fn decode_err(column: &str, e: tokio_postgres::Error) -> anyhow::Error {
    EtlError::type_mismatch(column, "decodable value", e.to_string()).into()
}

fn get_key(row: &Row, column: &str) -> Result<i64> {
    let (idx, ty) = column_type(row, column)?;
    let value: Option<i64> = match *ty {
        Type::INT2 => row
            .try_get::<_, Option<i16>>(idx)
            .map_err(|e| decode_err(column, e))?
            .map(i64::from),
        Type::INT4 => row
            .try_get::<_, Option<i32>>(idx)
            .map_err(|e| decode_err(column, e))?
            .map(i64::from),
        Type::INT8 => row
            .try_get::<_, Option<i64>>(idx)
            .map_err(|e| decode_err(column, e))?,
        _ => {
            return Err(EtlError::type_mismatch(column, "integer", ty.name()).into());
        }
    };
    value.ok_or_else(|| EtlError::type_mismatch(column, "integer", "null").into())
}

fn get_text(row: &Row, column: &str) -> Result<Option<String>> {
    let (idx, ty) = column_type(row, column)?;
    match *ty {
        Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME => row
            .try_get::<_, Option<String>>(idx)
            .map_err(|e| decode_err(column, e)),
        Type::TIMESTAMP => Ok(row
            .try_get::<_, Option<NaiveDateTime>>(idx)
            .map_err(|e| decode_err(column, e))?
            .map(|ts| format_timestamp(&ts))),
        Type::TIMESTAMPTZ => Ok(row
            .try_get::<_, Option<DateTime<Utc>>>(idx)
            .map_err(|e| decode_err(column, e))?
            .map(|ts| format_timestamp(&ts.naive_utc()))),
        _ => Err(EtlError::type_mismatch(column, "string", ty.name()).into()),
    }
}

fn get_recency(row: &Row, column: &str) -> Result<Option<NaiveDateTime>> {
    let (idx, ty) = column_type(row, column)?;
    match *ty {
        Type::TIMESTAMP => row
            .try_get::<_, Option<NaiveDateTime>>(idx)
            .map_err(|e| decode_err(column, e)),
        Type::TIMESTAMPTZ => Ok(row
            .try_get::<_, Option<DateTime<Utc>>>(idx)
            .map_err(|e| decode_err(column, e))?
            .map(|ts| ts.naive_utc())),
        Type::DATE => Ok(row
            .try_get::<_, Option<NaiveDate>>(idx)
            .map_err(|e| decode_err(column, e))?
            .and_then(|d| d.and_hms_opt(0, 0, 0))),
        _ => Err(EtlError::type_mismatch(column, "timestamp", ty.name()).into()),
    }
}
