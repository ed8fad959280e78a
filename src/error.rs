// ABOUTME: Error taxonomy for a sync run
// ABOUTME: Root causes carried inside anyhow chains and mapped to process exit codes

use thiserror::Error;

/// Which side of the sync an error came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Store {
    Source,
    Replica,
}

impl std::fmt::Display for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Store::Source => write!(f, "source"),
            Store::Replica => write!(f, "replica"),
        }
    }
}

/// Failure classes of a run.
///
/// None of these are recovered inside the job. They travel as the root cause of
/// an `anyhow::Error` so callers can layer context on top and the binary can
/// still pick an exit code with [`exit_code_for`].
#[derive(Debug, Error)]
pub enum EtlError {
    #[error("failed to connect to {store}: {message}")]
    Connection { store: Store, message: String },

    #[error("query against {store} failed: {message}")]
    Query { store: Store, message: String },

    #[error("column {column} expected {expected}, got {found}")]
    TypeMismatch {
        column: String,
        expected: &'static str,
        found: String,
    },

    #[error("upsert into {table} failed: {message}")]
    Write { table: String, message: String },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl EtlError {
    pub fn connection(store: Store, err: impl std::fmt::Display) -> Self {
        EtlError::Connection {
            store,
            message: err.to_string(),
        }
    }

    pub fn query(store: Store, err: impl std::fmt::Display) -> Self {
        EtlError::Query {
            store,
            message: err.to_string(),
        }
    }

    pub fn type_mismatch(column: &str, expected: &'static str, found: impl Into<String>) -> Self {
        EtlError::TypeMismatch {
            column: column.to_string(),
            expected,
            found: found.into(),
        }
    }

    pub fn write(table: &str, err: impl std::fmt::Display) -> Self {
        EtlError::Write {
            table: table.to_string(),
            message: err.to_string(),
        }
    }

    /// Process exit code for this failure class. Zero is success and 2 is left
    /// to clap for usage errors.
    pub fn exit_code(&self) -> u8 {
        match self {
            EtlError::Connection { .. } => 3,
            EtlError::Query { .. } => 4,
            EtlError::TypeMismatch { .. } => 5,
            EtlError::Write { .. } => 6,
            EtlError::InvalidConfig(_) => 64,
        }
    }
}

/// Find the `EtlError` anywhere in an anyhow chain and return its exit code,
/// or 1 for failures outside the taxonomy.
pub fn exit_code_for(err: &anyhow::Error) -> u8 {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<EtlError>())
        .map(EtlError::exit_code)
        .unwrap_or(1)
}
