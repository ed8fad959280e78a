// ABOUTME: HTTP client for the Phoenix Query Server's Avatica JSON protocol
// ABOUTME: Scoped connections, statement execution, frame paging and transaction control

use anyhow::{Context, Result};
use reqwest::Client;
use std::collections::HashMap;
use std::time::Duration;

use super::models::{
    ConnectionProperties, Frame, Request, Response, ResultSetResponse, StatementHandle,
    TypedValue,
};
use crate::error::{EtlError, Store};

/// Rows requested per frame when paging through a result set.
pub const FETCH_SIZE: i32 = 1000;

/// Stateless handle on one Query Server endpoint. Cheap to clone.
#[derive(Clone)]
pub struct AvaticaClient {
    client: Client,
    url: String,
}

impl AvaticaClient {
    pub fn new(url: &str, timeout: Duration) -> Result<Self> {
        let parsed = url::Url::parse(url).map_err(|e| {
            EtlError::InvalidConfig(format!("Phoenix URL '{}' is not valid: {}", url, e))
        })?;
        if parsed.scheme() != "http" && parsed.scheme() != "https" {
            return Err(EtlError::InvalidConfig(format!(
                "Phoenix URL must use http or https, got '{}'",
                parsed.scheme()
            ))
            .into());
        }

        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            url: url.to_string(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Send one RPC and decode the reply.
    ///
    /// Transport failures become [`EtlError::Connection`]; an `error` response
    /// from the server becomes [`EtlError::Query`].
    pub async fn call(&self, request: &Request) -> Result<Response> {
        tracing::trace!("Avatica {} -> {}", request.name(), self.url);

        let response = self
            .client
            .post(&self.url)
            .json(request)
            .send()
            .await
            .map_err(|e| EtlError::connection(Store::Replica, e))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| EtlError::connection(Store::Replica, e))?;

        // Avatica reports server-side failures as an error document with a 500.
        match serde_json::from_str::<Response>(&body) {
            Ok(Response::Error(err)) => {
                Err(EtlError::query(Store::Replica, format!("{}: {}", request.name(), err)).into())
            }
            Ok(reply) if status.is_success() => Ok(reply),
            Err(e) if status.is_success() => Err(EtlError::query(
                Store::Replica,
                format!("unreadable {} response: {}", request.name(), e),
            )
            .into()),
            _ => Err(EtlError::connection(
                Store::Replica,
                format!(
                    "{} returned HTTP {}: {}",
                    request.name(),
                    status,
                    truncate(&body, 200)
                ),
            )
            .into()),
        }
    }
}

fn truncate(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// One server-side Avatica connection.
///
/// Close it with [`AvaticaConnection::close`] on every path; the server keeps
/// the connection until it is closed or expires.
pub struct AvaticaConnection {
    client: AvaticaClient,
    id: String,
}

impl AvaticaConnection {
    /// Open a connection and set its autocommit mode.
    pub async fn open(client: &AvaticaClient, auto_commit: bool) -> Result<Self> {
        let id = uuid::Uuid::new_v4().to_string();

        client
            .call(&Request::OpenConnection {
                connection_id: id.clone(),
                info: HashMap::new(),
            })
            .await
            .map_err(as_connection_error)?;

        let conn = Self {
            client: client.clone(),
            id,
        };

        if let Err(e) = conn
            .client
            .call(&Request::ConnectionSync {
                connection_id: conn.id.clone(),
                conn_props: ConnectionProperties::auto_commit(auto_commit),
            })
            .await
        {
            conn.close().await;
            return Err(as_connection_error(e));
        }

        tracing::debug!(
            "Opened Phoenix connection {} (autocommit={})",
            conn.id,
            auto_commit
        );

        Ok(conn)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Run a query and collect every row, following fetch frames until done.
    pub async fn query_all(&self, sql: &str) -> Result<Vec<Vec<serde_json::Value>>> {
        let statement_id = match self
            .client
            .call(&Request::CreateStatement {
                connection_id: self.id.clone(),
            })
            .await?
        {
            Response::CreateStatement { statement_id, .. } => statement_id,
            other => return Err(unexpected("createStatement", &other)),
        };

        let result = self.execute_and_page(statement_id, sql).await;

        if let Err(e) = self
            .client
            .call(&Request::CloseStatement {
                connection_id: self.id.clone(),
                statement_id,
            })
            .await
        {
            tracing::debug!("Failed to close Phoenix statement {}: {:#}", statement_id, e);
        }

        result
    }

    async fn execute_and_page(
        &self,
        statement_id: u32,
        sql: &str,
    ) -> Result<Vec<Vec<serde_json::Value>>> {
        let results = match self
            .client
            .call(&Request::PrepareAndExecute {
                connection_id: self.id.clone(),
                statement_id,
                sql: sql.to_string(),
                max_rows_total: -1,
                max_rows_in_first_frame: FETCH_SIZE,
            })
            .await?
        {
            Response::ExecuteResults {
                missing_statement: true,
                ..
            } => {
                return Err(EtlError::query(
                    Store::Replica,
                    format!("statement {} missing on server", statement_id),
                )
                .into())
            }
            Response::ExecuteResults { results, .. } => results,
            other => return Err(unexpected("prepareAndExecute", &other)),
        };

        let first: ResultSetResponse = results.into_iter().next().ok_or_else(|| {
            EtlError::query(Store::Replica, "query returned no result set")
        })?;

        let mut frame = first.first_frame.unwrap_or_else(|| Frame {
            done: true,
            ..Frame::default()
        });
        let mut rows = Vec::new();

        loop {
            let fetched = frame.rows.len() as u64;
            let next_offset = frame.offset + fetched;
            let done = frame.done;
            rows.extend(frame.rows);

            if done {
                break;
            }

            frame = match self
                .client
                .call(&Request::Fetch {
                    connection_id: self.id.clone(),
                    statement_id,
                    offset: next_offset,
                    fetch_max_row_count: FETCH_SIZE,
                })
                .await?
            {
                Response::Fetch { frame } => frame,
                other => return Err(unexpected("fetch", &other)),
            };

            if frame.rows.is_empty() && !frame.done {
                return Err(EtlError::query(
                    Store::Replica,
                    format!("empty frame at offset {} not marked done", next_offset),
                )
                .into());
            }

            tracing::trace!("Fetched Phoenix frame at offset {}", next_offset);
        }

        Ok(rows)
    }

    pub async fn prepare(&self, sql: &str) -> Result<StatementHandle> {
        match self
            .client
            .call(&Request::Prepare {
                connection_id: self.id.clone(),
                sql: sql.to_string(),
                max_rows_total: -1,
            })
            .await?
        {
            Response::Prepare { statement } => Ok(statement),
            other => Err(unexpected("prepare", &other)),
        }
    }

    /// Execute a prepared statement and return its update count.
    pub async fn execute(
        &self,
        handle: &StatementHandle,
        params: Vec<TypedValue>,
    ) -> Result<i64> {
        match self
            .client
            .call(&Request::Execute {
                statement_handle: handle.clone(),
                parameter_values: params,
                max_row_count: -1,
            })
            .await?
        {
            Response::ExecuteResults {
                missing_statement: true,
                ..
            } => Err(EtlError::query(
                Store::Replica,
                format!("prepared statement {} missing on server", handle.id),
            )
            .into()),
            Response::ExecuteResults { results, .. } => {
                Ok(results.first().map(|r| r.update_count).unwrap_or(-1))
            }
            other => Err(unexpected("execute", &other)),
        }
    }

    pub async fn commit(&self) -> Result<()> {
        self.client
            .call(&Request::Commit {
                connection_id: self.id.clone(),
            })
            .await?;
        Ok(())
    }

    pub async fn rollback(&self) -> Result<()> {
        self.client
            .call(&Request::Rollback {
                connection_id: self.id.clone(),
            })
            .await?;
        Ok(())
    }

    /// Close the server-side connection. Failures are logged and swallowed so
    /// this can run on error paths without masking the original failure.
    pub async fn close(self) {
        match self
            .client
            .call(&Request::CloseConnection {
                connection_id: self.id.clone(),
            })
            .await
        {
            Ok(_) => tracing::debug!("Closed Phoenix connection {}", self.id),
            Err(e) => tracing::warn!("Failed to close Phoenix connection {}: {:#}", self.id, e),
        }
    }
}

fn unexpected(rpc: &str, response: &Response) -> anyhow::Error {
    EtlError::query(
        Store::Replica,
        format!("unexpected reply to {}: {:?}", rpc, response),
    )
    .into()
}

/// Anything that goes wrong while establishing a connection is a connection error.
fn as_connection_error(err: anyhow::Error) -> anyhow::Error {
    match err.downcast::<EtlError>() {
        Ok(EtlError::Query { message, .. }) => EtlError::connection(Store::Replica, message).into(),
        Ok(other) => other.into(),
        Err(err) => err,
    }
}
