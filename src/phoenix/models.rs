// ABOUTME: Avatica JSON wire messages spoken by the Phoenix Query Server
// ABOUTME: Requests are tagged by "request", responses by "response"

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// An Avatica RPC request. Field names follow the JSON reference (camelCase).
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "request", rename_all = "camelCase")]
pub enum Request {
    #[serde(rename_all = "camelCase")]
    OpenConnection {
        connection_id: String,
        info: HashMap<String, String>,
    },
    #[serde(rename_all = "camelCase")]
    ConnectionSync {
        connection_id: String,
        conn_props: ConnectionProperties,
    },
    #[serde(rename_all = "camelCase")]
    CloseConnection { connection_id: String },
    #[serde(rename_all = "camelCase")]
    CreateStatement { connection_id: String },
    #[serde(rename_all = "camelCase")]
    CloseStatement {
        connection_id: String,
        statement_id: u32,
    },
    #[serde(rename_all = "camelCase")]
    PrepareAndExecute {
        connection_id: String,
        statement_id: u32,
        sql: String,
        max_rows_total: i64,
        max_rows_in_first_frame: i32,
    },
    #[serde(rename_all = "camelCase")]
    Fetch {
        connection_id: String,
        statement_id: u32,
        offset: u64,
        fetch_max_row_count: i32,
    },
    #[serde(rename_all = "camelCase")]
    Prepare {
        connection_id: String,
        sql: String,
        max_rows_total: i64,
    },
    #[serde(rename_all = "camelCase")]
    Execute {
        statement_handle: StatementHandle,
        parameter_values: Vec<TypedValue>,
        max_row_count: i64,
    },
    #[serde(rename_all = "camelCase")]
    Commit { connection_id: String },
    #[serde(rename_all = "camelCase")]
    Rollback { connection_id: String },
}

impl Request {
    /// RPC name, for log lines.
    pub fn name(&self) -> &'static str {
        match self {
            Request::OpenConnection { .. } => "openConnection",
            Request::ConnectionSync { .. } => "connectionSync",
            Request::CloseConnection { .. } => "closeConnection",
            Request::CreateStatement { .. } => "createStatement",
            Request::CloseStatement { .. } => "closeStatement",
            Request::PrepareAndExecute { .. } => "prepareAndExecute",
            Request::Fetch { .. } => "fetch",
            Request::Prepare { .. } => "prepare",
            Request::Execute { .. } => "execute",
            Request::Commit { .. } => "commit",
            Request::Rollback { .. } => "rollback",
        }
    }
}

/// Connection properties pushed with `connectionSync`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionProperties {
    conn_props: &'static str,
    pub auto_commit: bool,
    pub read_only: bool,
    pub dirty: bool,
}

impl ConnectionProperties {
    pub fn auto_commit(auto_commit: bool) -> Self {
        Self {
            conn_props: "connPropsImpl",
            auto_commit,
            read_only: false,
            dirty: true,
        }
    }
}

/// Server-side handle for a prepared statement. The signature is opaque to us
/// and echoed back verbatim on `execute`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatementHandle {
    pub connection_id: String,
    pub id: u32,
    #[serde(default)]
    pub signature: Option<serde_json::Value>,
}

/// A parameter value tagged with its Avatica representation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TypedValue {
    #[serde(rename = "type")]
    pub rep: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<serde_json::Value>,
}

impl TypedValue {
    pub fn long(value: i64) -> Self {
        Self {
            rep: "LONG",
            value: Some(value.into()),
        }
    }

    pub fn string(value: Option<&str>) -> Self {
        match value {
            Some(v) => Self {
                rep: "STRING",
                value: Some(v.into()),
            },
            None => Self::null(),
        }
    }

    pub fn null() -> Self {
        Self {
            rep: "NULL",
            value: None,
        }
    }
}

/// An Avatica RPC response.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "response", rename_all = "camelCase")]
pub enum Response {
    OpenConnection {},
    ConnectionSync {},
    CloseConnection {},
    #[serde(rename_all = "camelCase")]
    CreateStatement {
        connection_id: String,
        statement_id: u32,
    },
    CloseStatement {},
    #[serde(rename_all = "camelCase")]
    ExecuteResults {
        #[serde(default)]
        missing_statement: bool,
        #[serde(default)]
        results: Vec<ResultSetResponse>,
    },
    Fetch {
        frame: Frame,
    },
    Prepare {
        statement: StatementHandle,
    },
    Commit {},
    Rollback {},
    Error(ErrorResponse),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultSetResponse {
    pub connection_id: String,
    pub statement_id: u32,
    #[serde(default)]
    pub own_statement: bool,
    #[serde(default)]
    pub first_frame: Option<Frame>,
    #[serde(default = "no_update_count")]
    pub update_count: i64,
}

fn no_update_count() -> i64 {
    -1
}

/// A page of rows. Rows are positional, matching the select list.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Frame {
    pub offset: u64,
    pub done: bool,
    #[serde(default)]
    pub rows: Vec<Vec<serde_json::Value>>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub error_code: Option<i64>,
    #[serde(default)]
    pub sql_state: Option<String>,
    #[serde(default)]
    pub exceptions: Vec<String>,
}

impl std::fmt::Display for ErrorResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            self.error_message.as_deref().unwrap_or("unknown server error")
        )?;
        if let Some(state) = &self.sql_state {
            write!(f, " (SQLSTATE {})", state)?;
        }
        if let Some(code) = self.error_code {
            write!(f, " [code {}]", code)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_open_connection_request_shape() {
        let req = Request::OpenConnection {
            connection_id: "abc".to_string(),
            info: HashMap::new(),
        };
        assert_eq!(
            serde_json::to_value(&req).unwrap(),
            json!({"request": "openConnection", "connectionId": "abc", "info": {}})
        );
    }

    #[test]
    fn test_connection_sync_request_shape() {
        let req = Request::ConnectionSync {
            connection_id: "abc".to_string(),
            conn_props: ConnectionProperties::auto_commit(false),
        };
        let value = serde_json::to_value(&req).unwrap();
        assert_eq!(value["request"], "connectionSync");
        assert_eq!(value["connProps"]["connProps"], "connPropsImpl");
        assert_eq!(value["connProps"]["autoCommit"], false);
        assert_eq!(value["connProps"]["dirty"], true);
    }

    #[test]
    fn test_execute_request_shape() {
        let req = Request::Execute {
            statement_handle: StatementHandle {
                connection_id: "abc".to_string(),
                id: 4,
                signature: Some(json!({"sql": "UPSERT"})),
            },
            parameter_values: vec![TypedValue::long(1), TypedValue::string(None)],
            max_row_count: -1,
        };
        assert_eq!(
            serde_json::to_value(&req).unwrap(),
            json!({
                "request": "execute",
                "statementHandle": {"connectionId": "abc", "id": 4, "signature": {"sql": "UPSERT"}},
                "parameterValues": [{"type": "LONG", "value": 1}, {"type": "NULL"}],
                "maxRowCount": -1
            })
        );
    }

    #[test]
    fn test_parse_execute_results_with_frame() {
        let body = json!({
            "response": "executeResults",
            "missingStatement": false,
            "rpcMetadata": {"response": "rpcMetadata", "serverAddress": "pqs:8765"},
            "results": [{
                "response": "resultSet",
                "connectionId": "abc",
                "statementId": 3,
                "ownStatement": true,
                "signature": {"columns": []},
                "firstFrame": {"offset": 0, "done": false, "rows": [[1, "s1"], [2, null]]},
                "updateCount": -1
            }]
        });
        let response: Response = serde_json::from_value(body).unwrap();
        match response {
            Response::ExecuteResults { results, .. } => {
                assert_eq!(results.len(), 1);
                let frame = results[0].first_frame.as_ref().unwrap();
                assert!(!frame.done);
                assert_eq!(frame.rows.len(), 2);
                assert_eq!(frame.rows[1][1], serde_json::Value::Null);
                assert_eq!(results[0].update_count, -1);
            }
            other => panic!("unexpected response: {:?}", other),
        }
    }

    #[test]
    fn test_parse_prepare_and_fetch() {
        let prepare: Response = serde_json::from_value(json!({
            "response": "prepare",
            "statement": {"connectionId": "abc", "id": 9, "signature": {"parameters": []}}
        }))
        .unwrap();
        assert!(matches!(prepare, Response::Prepare { statement } if statement.id == 9));

        let fetch: Response = serde_json::from_value(json!({
            "response": "fetch",
            "frame": {"offset": 100, "done": true}
        }))
        .unwrap();
        match fetch {
            Response::Fetch { frame } => {
                assert_eq!(frame.offset, 100);
                assert!(frame.done);
                assert!(frame.rows.is_empty());
            }
            other => panic!("unexpected response: {:?}", other),
        }
    }

    #[test]
    fn test_parse_error_response() {
        let response: Response = serde_json::from_value(json!({
            "response": "error",
            "exceptions": ["org.apache.phoenix.schema.TableNotFoundException: ..."],
            "errorMessage": "Table undefined. tableName=VPN_USER_REPLICA",
            "errorCode": 1012,
            "sqlState": "42M03",
            "severity": {"severity": "ERROR"}
        }))
        .unwrap();
        match response {
            Response::Error(err) => {
                assert_eq!(
                    err.to_string(),
                    "Table undefined. tableName=VPN_USER_REPLICA (SQLSTATE 42M03) [code 1012]"
                );
                assert_eq!(err.exceptions.len(), 1);
            }
            other => panic!("unexpected response: {:?}", other),
        }
    }

    #[test]
    fn test_parse_empty_acknowledgements() {
        for name in ["openConnection", "commit", "rollback", "closeConnection"] {
            let response: Response =
                serde_json::from_value(json!({"response": name, "rpcMetadata": {}})).unwrap();
            assert!(!matches!(response, Response::Error(_)));
        }
    }
}
