// ABOUTME: Typed session-access records shared by readers, differ, transformer and writer
// ABOUTME: Also owns the projection column order and identifier validation for interpolated names

use anyhow::{bail, Result};
use chrono::NaiveDateTime;

/// Physical columns of the projection, in the order every reader selects them.
///
/// The first and last entries are placeholders for the configurable key and
/// recency columns; see [`Projection::columns`].
pub const PROJECTION_COLUMNS: [&str; 8] = [
    "ID",
    "SESSION_ID",
    "LOGIN_TIME",
    "LOGOUT_TIME",
    "IP_ADDRESS",
    "USER_NAME",
    "DEVICE_TYPE",
    "LAST_UPDATED",
];

/// Text rendering used when a store hands back a native timestamp for a text field.
pub const TEXT_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

/// One session-access row.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionRecord {
    pub id: i64,
    pub session_id: Option<String>,
    pub login_time: Option<String>,
    pub logout_time: Option<String>,
    pub ip_address: Option<String>,
    pub user_name: Option<String>,
    pub device_type: Option<String>,
    pub last_updated: Option<NaiveDateTime>,
}

/// The free-text fields compared between source and replica.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    SessionId,
    LoginTime,
    LogoutTime,
    IpAddress,
    UserName,
    DeviceType,
}

impl Field {
    pub const COMPARABLE: [Field; 6] = [
        Field::SessionId,
        Field::LoginTime,
        Field::LogoutTime,
        Field::IpAddress,
        Field::UserName,
        Field::DeviceType,
    ];

    pub fn column(self) -> &'static str {
        match self {
            Field::SessionId => "SESSION_ID",
            Field::LoginTime => "LOGIN_TIME",
            Field::LogoutTime => "LOGOUT_TIME",
            Field::IpAddress => "IP_ADDRESS",
            Field::UserName => "USER_NAME",
            Field::DeviceType => "DEVICE_TYPE",
        }
    }
}

impl SessionRecord {
    pub fn new(id: i64) -> Self {
        Self {
            id,
            ..Default::default()
        }
    }

    pub fn field(&self, field: Field) -> Option<&str> {
        match field {
            Field::SessionId => self.session_id.as_deref(),
            Field::LoginTime => self.login_time.as_deref(),
            Field::LogoutTime => self.logout_time.as_deref(),
            Field::IpAddress => self.ip_address.as_deref(),
            Field::UserName => self.user_name.as_deref(),
            Field::DeviceType => self.device_type.as_deref(),
        }
    }

    pub fn set_field(&mut self, field: Field, value: Option<String>) {
        let slot = match field {
            Field::SessionId => &mut self.session_id,
            Field::LoginTime => &mut self.login_time,
            Field::LogoutTime => &mut self.logout_time,
            Field::IpAddress => &mut self.ip_address,
            Field::UserName => &mut self.user_name,
            Field::DeviceType => &mut self.device_type,
        };
        *slot = value;
    }

    /// Builder-style setter, mostly for tests and fixtures.
    pub fn with(mut self, field: Field, value: &str) -> Self {
        self.set_field(field, Some(value.to_string()));
        self
    }

    pub fn updated_at(mut self, ts: NaiveDateTime) -> Self {
        self.last_updated = Some(ts);
        self
    }
}

/// A normalized record ready for the upsert, plus its provenance note.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformedRecord {
    pub record: SessionRecord,
    pub transform_notes: String,
}

/// Names used to build the fixed projection for one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Projection {
    pub id_col: String,
    pub last_updated_col: String,
}

impl Default for Projection {
    fn default() -> Self {
        Self {
            id_col: "ID".to_string(),
            last_updated_col: "LAST_UPDATED".to_string(),
        }
    }
}

impl Projection {
    pub fn new(id_col: &str, last_updated_col: &str) -> Result<Self> {
        validate_identifier(id_col)?;
        validate_identifier(last_updated_col)?;
        Ok(Self {
            id_col: id_col.to_string(),
            last_updated_col: last_updated_col.to_string(),
        })
    }

    /// Column names in select order, with the key and recency slots substituted.
    pub fn columns(&self) -> Vec<&str> {
        let last = PROJECTION_COLUMNS.len() - 1;
        PROJECTION_COLUMNS
            .iter()
            .enumerate()
            .map(|(idx, col)| match idx {
                0 => self.id_col.as_str(),
                i if i == last => self.last_updated_col.as_str(),
                _ => *col,
            })
            .collect()
    }

    /// `SELECT <columns> FROM <table>`.
    ///
    /// Incremental loads would add `WHERE <last_updated_col> >= <last run>`
    /// here; every run is currently a full scan.
    pub fn select_query(&self, table: &str) -> Result<String> {
        validate_table_name(table)?;
        Ok(format!(
            "SELECT {} FROM {}",
            self.columns().join(", "),
            table
        ))
    }
}

/// Validate a plain SQL identifier that will be interpolated unquoted.
///
/// Names stay unquoted so Phoenix and Oracle-style upper-case folding applies,
/// which means they must be restricted to letters, digits and underscores.
pub fn validate_identifier(identifier: &str) -> Result<()> {
    let trimmed = identifier.trim();
    if trimmed.is_empty() {
        bail!("Identifier cannot be empty or whitespace-only");
    }
    if trimmed != identifier {
        bail!(
            "Identifier '{}' must not have leading or trailing whitespace",
            sanitize_identifier(identifier)
        );
    }

    if trimmed.len() > 63 {
        bail!(
            "Identifier '{}' exceeds maximum length of 63 characters (got {})",
            sanitize_identifier(trimmed),
            trimmed.len()
        );
    }

    let mut chars = trimmed.chars();
    if let Some(first) = chars.next() {
        if !first.is_ascii_alphabetic() && first != '_' {
            bail!(
                "Identifier '{}' must start with a letter or underscore, not '{}'",
                sanitize_identifier(trimmed),
                first
            );
        }
    }

    for (i, c) in trimmed.chars().enumerate() {
        if !c.is_ascii_alphanumeric() && c != '_' {
            bail!(
                "Identifier '{}' contains invalid character '{}' at position {}. \
                 Only letters, digits, and underscores are allowed",
                sanitize_identifier(trimmed),
                if c.is_control() {
                    format!("\\x{:02x}", c as u32)
                } else {
                    c.to_string()
                },
                i
            );
        }
    }

    Ok(())
}

/// Validate a `[schema.]table` name.
pub fn validate_table_name(name: &str) -> Result<()> {
    let parts: Vec<&str> = name.split('.').collect();
    if parts.len() > 2 {
        bail!(
            "Table name '{}' must be 'table' or 'schema.table'",
            sanitize_identifier(name)
        );
    }
    for part in parts {
        validate_identifier(part)?;
    }
    Ok(())
}

/// Strip control characters and cap length so names are safe to echo in logs.
pub fn sanitize_identifier(identifier: &str) -> String {
    identifier
        .chars()
        .filter(|c| !c.is_control())
        .take(100)
        .collect()
}

/// Parse the recency value when a store returns it as text.
pub fn parse_timestamp(text: &str) -> Option<NaiveDateTime> {
    let text = text.trim();
    NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S"))
        .or_else(|_| NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f"))
        .ok()
}

pub fn timestamp_from_millis(millis: i64) -> Option<NaiveDateTime> {
    chrono::DateTime::from_timestamp_millis(millis).map(|dt| dt.naive_utc())
}

pub fn format_timestamp(ts: &NaiveDateTime) -> String {
    ts.format(TEXT_TIMESTAMP_FORMAT).to_string()
}
