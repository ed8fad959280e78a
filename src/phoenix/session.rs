// ABOUTME: Phoenix write session - UpsertTarget backed by an Avatica connection
// ABOUTME: Autocommit off, one prepared upsert reused for every row, explicit commit/rollback

use anyhow::{Context, Result};

use super::client::{AvaticaClient, AvaticaConnection};
use super::models::{StatementHandle, TypedValue};
use crate::writer::{UpsertParam, UpsertSession, UpsertTarget};

/// Opens transactional write sessions on the Phoenix Query Server.
pub struct PhoenixTarget {
    client: AvaticaClient,
}

impl PhoenixTarget {
    pub fn new(client: AvaticaClient) -> Self {
        Self { client }
    }
}

impl UpsertTarget for PhoenixTarget {
    type Session = PhoenixSession;

    async fn begin(&self) -> Result<PhoenixSession> {
        let conn = AvaticaConnection::open(&self.client, false)
            .await
            .with_context(|| format!("Failed to connect to Phoenix at {}", self.client.url()))?;
        Ok(PhoenixSession {
            conn,
            prepared: None,
        })
    }
}

pub struct PhoenixSession {
    conn: AvaticaConnection,
    /// Statement prepared for the most recent SQL text.
    prepared: Option<(String, StatementHandle)>,
}

impl PhoenixSession {
    async fn handle_for(&mut self, sql: &str) -> Result<StatementHandle> {
        if let Some((text, handle)) = &self.prepared {
            if text == sql {
                return Ok(handle.clone());
            }
        }
        let handle = self.conn.prepare(sql).await?;
        self.prepared = Some((sql.to_string(), handle.clone()));
        Ok(handle)
    }
}

pub fn to_typed_value(param: &UpsertParam) -> TypedValue {
    match param {
        UpsertParam::Long(v) => TypedValue::long(*v),
        UpsertParam::Text(v) => TypedValue::string(v.as_deref()),
    }
}

impl UpsertSession for PhoenixSession {
    async fn execute_upsert(&mut self, sql: &str, params: &[UpsertParam]) -> Result<()> {
        let handle = self.handle_for(sql).await?;
        let values = params.iter().map(to_typed_value).collect();
        self.conn.execute(&handle, values).await?;
        Ok(())
    }

    async fn commit(&mut self) -> Result<()> {
        self.conn.commit().await
    }

    async fn rollback(&mut self) -> Result<()> {
        self.conn.rollback().await
    }

    async fn close(self) {
        self.conn.close().await;
    }
}
