// ABOUTME: Replica reader - reads the session projection from Phoenix
// ABOUTME: Maps positional Avatica row values onto SessionRecord fields

use anyhow::{Context, Result};
use serde_json::Value;

use super::client::{AvaticaClient, AvaticaConnection};
use crate::error::{EtlError, Store};
use crate::pipeline::RecordReader;
use crate::record::{
    format_timestamp, parse_timestamp, timestamp_from_millis, validate_table_name, Field,
    Projection, SessionRecord, PROJECTION_COLUMNS,
};

/// Reads the replica table through the Phoenix Query Server.
pub struct PhoenixReader {
    client: AvaticaClient,
    table: String,
    projection: Projection,
}

impl PhoenixReader {
    pub fn new(client: AvaticaClient, table: &str, projection: Projection) -> Result<Self> {
        validate_table_name(table).map_err(|e| EtlError::InvalidConfig(format!("{:#}", e)))?;
        Ok(Self {
            client,
            table: table.to_string(),
            projection,
        })
    }
}

impl RecordReader for PhoenixReader {
    fn describe(&self) -> String {
        format!("Phoenix table {}", self.table)
    }

    async fn read_records(&self) -> Result<Vec<SessionRecord>> {
        let query = self.projection.select_query(&self.table)?;

        let conn = AvaticaConnection::open(&self.client, true)
            .await
            .with_context(|| format!("Failed to connect to Phoenix at {}", self.client.url()))?;

        let rows = conn.query_all(&query).await;
        conn.close().await;

        let rows = rows.with_context(|| format!("Failed to read Phoenix table {}", self.table))?;

        let columns = self.projection.columns();
        rows.iter()
            .map(|row| decode_positional_row(row, &columns))
            .collect::<Result<Vec<_>>>()
            .with_context(|| format!("Failed to decode rows from Phoenix table {}", self.table))
    }
}

/// Decode one positional row. Index order is [`PROJECTION_COLUMNS`]; `columns`
/// supplies the configured names for error messages.
pub fn decode_positional_row(row: &[Value], columns: &[&str]) -> Result<SessionRecord> {
    if row.len() != PROJECTION_COLUMNS.len() {
        return Err(EtlError::query(
            Store::Replica,
            format!(
                "expected {} columns per row, got {}",
                PROJECTION_COLUMNS.len(),
                row.len()
            ),
        )
        .into());
    }

    let mut record = SessionRecord::new(json_i64(columns[0], &row[0])?);
    record.set_field(Field::SessionId, json_text(columns[1], &row[1])?);
    record.set_field(Field::LoginTime, json_time_text(columns[2], &row[2])?);
    record.set_field(Field::LogoutTime, json_time_text(columns[3], &row[3])?);
    record.set_field(Field::IpAddress, json_text(columns[4], &row[4])?);
    record.set_field(Field::UserName, json_text(columns[5], &row[5])?);
    record.set_field(Field::DeviceType, json_text(columns[6], &row[6])?);
    record.last_updated = json_recency(columns[7], &row[7])?;

    Ok(record)
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn json_i64(column: &str, value: &Value) -> Result<i64> {
    if let Some(n) = value.as_i64() {
        return Ok(n);
    }
    // DECIMAL keys come back as floats.
    if let Some(f) = value.as_f64() {
        if f.fract() == 0.0 && f.abs() < i64::MAX as f64 {
            return Ok(f as i64);
        }
    }
    Err(EtlError::type_mismatch(column, "integer", kind(value)).into())
}

fn json_text(column: &str, value: &Value) -> Result<Option<String>> {
    match value {
        Value::Null => Ok(None),
        Value::String(s) => Ok(Some(s.clone())),
        other => Err(EtlError::type_mismatch(column, "string", kind(other)).into()),
    }
}

/// Text column that the replica may store as a TIMESTAMP (epoch millis on the wire).
fn json_time_text(column: &str, value: &Value) -> Result<Option<String>> {
    match value {
        Value::Number(n) => {
            let ts = n
                .as_i64()
                .and_then(timestamp_from_millis)
                .ok_or_else(|| EtlError::type_mismatch(column, "timestamp", n.to_string()))?;
            Ok(Some(format_timestamp(&ts)))
        }
        other => json_text(column, other),
    }
}

fn json_recency(column: &str, value: &Value) -> Result<Option<chrono::NaiveDateTime>> {
    match value {
        Value::Null => Ok(None),
        Value::Number(n) => n
            .as_i64()
            .and_then(timestamp_from_millis)
            .map(Some)
            .ok_or_else(|| EtlError::type_mismatch(column, "timestamp", n.to_string()).into()),
        Value::String(s) => parse_timestamp(s)
            .map(Some)
            .ok_or_else(|| EtlError::type_mismatch(column, "timestamp", s.clone()).into()),
        other => Err(EtlError::type_mismatch(column, "timestamp", kind(other)).into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn columns() -> Vec<&'static str> {
        PROJECTION_COLUMNS.to_vec()
    }

    fn row(values: Value) -> Vec<Value> {
        values.as_array().unwrap().clone()
    }

    #[test]
    fn test_decode_full_row() {
        let r = row(json!([
            1,
            "ABC",
            1_740_816_000_000i64,
            "2025-03-01 09:00:00",
            "10.0.0.1",
            "Alice",
            "Laptop",
            1_740_819_600_000i64
        ]));
        let record = decode_positional_row(&r, &columns()).unwrap();

        assert_eq!(record.id, 1);
        assert_eq!(record.session_id.as_deref(), Some("ABC"));
        assert_eq!(record.login_time.as_deref(), Some("2025-03-01 08:00:00.000"));
        assert_eq!(record.logout_time.as_deref(), Some("2025-03-01 09:00:00"));
        assert_eq!(record.ip_address.as_deref(), Some("10.0.0.1"));
        assert_eq!(record.user_name.as_deref(), Some("Alice"));
        assert_eq!(record.device_type.as_deref(), Some("Laptop"));
        assert_eq!(record.last_updated, timestamp_from_millis(1_740_819_600_000));
    }

    #[test]
    fn test_decode_nulls() {
        let r = row(json!([2, null, null, null, null, null, null, null]));
        let record = decode_positional_row(&r, &columns()).unwrap();
        assert_eq!(record, SessionRecord::new(2));
    }

    #[test]
    fn test_decode_string_recency() {
        let r = row(json!([3, null, null, null, null, null, null, "2025-03-01 10:00:00"]));
        let record = decode_positional_row(&r, &columns()).unwrap();
        assert_eq!(record.last_updated, parse_timestamp("2025-03-01 10:00:00"));
    }

    #[test]
    fn test_decode_decimal_key() {
        let r = row(json!([4.0, null, null, null, null, null, null, null]));
        assert_eq!(decode_positional_row(&r, &columns()).unwrap().id, 4);
    }

    #[test]
    fn test_wrong_shape_is_type_mismatch() {
        let r = row(json!([5, 12345, null, null, null, null, null, null]));
        let err = decode_positional_row(&r, &columns()).unwrap_err();
        match err.downcast_ref::<EtlError>() {
            Some(EtlError::TypeMismatch {
                column,
                expected,
                found,
            }) => {
                assert_eq!(column, "SESSION_ID");
                assert_eq!(*expected, "string");
                assert_eq!(found, "number");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_null_key_is_type_mismatch() {
        let r = row(json!([null, null, null, null, null, null, null, null]));
        let err = decode_positional_row(&r, &["SESSION_KEY"; 8]).unwrap_err();
        assert!(err.to_string().contains("SESSION_KEY"));
    }

    #[test]
    fn test_unparseable_recency_is_type_mismatch() {
        let r = row(json!([6, null, null, null, null, null, null, "last tuesday"]));
        let err = decode_positional_row(&r, &columns()).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<EtlError>(),
            Some(EtlError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn test_column_count_mismatch_is_query_error() {
        let r = row(json!([1, "abc"]));
        let err = decode_positional_row(&r, &columns()).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<EtlError>(),
            Some(EtlError::Query { .. })
        ));
    }

    #[test]
    fn test_reader_rejects_bad_table() {
        let client =
            AvaticaClient::new("http://localhost:8765/", std::time::Duration::from_secs(1)).unwrap();
        assert!(PhoenixReader::new(client, "x;DROP", Projection::default()).is_err());
    }
}
