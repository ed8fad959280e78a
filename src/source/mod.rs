// ABOUTME: Relational source access for the session-access table
// ABOUTME: Connection parameters plus the scoped reader

pub mod reader;

pub use reader::{decode_named_row, SourceConnection, SourceReader};

use std::time::Duration;

/// Connection parameters for the source database.
#[derive(Clone)]
pub struct SourceConfig {
    pub host: String,
    pub port: u16,
    /// Database (service) name.
    pub service_name: String,
    pub user: String,
    pub password: String,
    pub ssl: bool,
    pub connect_timeout: Duration,
}

impl SourceConfig {
    pub fn to_pg_config(&self) -> tokio_postgres::Config {
        let mut pg = tokio_postgres::Config::new();
        pg.host(&self.host)
            .port(self.port)
            .dbname(&self.service_name)
            .user(&self.user)
            .password(&self.password)
            .connect_timeout(self.connect_timeout)
            .application_name("replica-sync");
        pg
    }
}

// Hand-written so the password never reaches a log line.
impl std::fmt::Debug for SourceConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("service_name", &self.service_name)
            .field("user", &self.user)
            .field("password", &"***")
            .field("ssl", &self.ssl)
            .field("connect_timeout", &self.connect_timeout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> SourceConfig {
        SourceConfig {
            host: "db1.preprod.internal".to_string(),
            port: 1521,
            service_name: "ORCLPDB1".to_string(),
            user: "etl_user".to_string(),
            password: "s3cret".to_string(),
            ssl: false,
            connect_timeout: Duration::from_secs(30),
        }
    }

    #[test]
    fn test_debug_redacts_password() {
        let rendered = format!("{:?}", config());
        assert!(!rendered.contains("s3cret"));
        assert!(rendered.contains("etl_user"));
    }

    #[test]
    fn test_pg_config() {
        let pg = config().to_pg_config();
        assert_eq!(pg.get_dbname(), Some("ORCLPDB1"));
        assert_eq!(pg.get_user(), Some("etl_user"));
        assert_eq!(pg.get_ports(), &[1521]);
        assert_eq!(pg.get_password(), Some(&b"s3cret"[..]));
        assert_eq!(pg.get_connect_timeout(), Some(&Duration::from_secs(30)));
    }
}
