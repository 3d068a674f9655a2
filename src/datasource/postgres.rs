use super::{Connector, NodeConnection};
use futures::future::BoxFuture;
use secrecy::{ExposeSecret, SecretString};
use sqlx::postgres::{PgConnectOptions, PgConnection, PgSslMode};
use sqlx::{Connection as _, Row as _};

pub const DEFAULT_PORT: u16 = 6432;
pub const DEFAULT_DBNAME: &str = "postgres";
pub const APPLICATION_NAME: &str = "pgrc_exporter";

/// Connection parameters shared by every node of the cluster; only the host
/// differs.
#[derive(Clone, Debug)]
pub struct PgConnectorOptions {
    pub port: u16,
    pub dbname: String,
    pub user: String,
    pub password: SecretString,
    pub ssl_mode: PgSslMode,
}

impl PgConnectorOptions {
    #[must_use]
    pub fn new(user: &str, password: SecretString) -> Self {
        Self {
            port: DEFAULT_PORT,
            dbname: DEFAULT_DBNAME.to_string(),
            user: user.to_string(),
            password,
            ssl_mode: PgSslMode::Disable,
        }
    }

    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    #[must_use]
    pub fn with_dbname(mut self, dbname: &str) -> Self {
        self.dbname = dbname.to_string();
        self
    }

    #[must_use]
    pub fn with_ssl_mode(mut self, ssl_mode: PgSslMode) -> Self {
        self.ssl_mode = ssl_mode;
        self
    }
}

/// Opens plain (unpooled) `PostgreSQL` connections.
#[derive(Clone, Debug)]
pub struct PgConnector {
    options: PgConnectorOptions,
}

impl PgConnector {
    #[must_use]
    pub const fn new(options: PgConnectorOptions) -> Self {
        Self { options }
    }

    #[must_use]
    pub fn connect_options(&self, host: &str) -> PgConnectOptions {
        PgConnectOptions::new()
            .host(host)
            .port(self.options.port)
            .database(&self.options.dbname)
            .username(&self.options.user)
            .password(self.options.password.expose_secret())
            .ssl_mode(self.options.ssl_mode)
            .application_name(APPLICATION_NAME)
    }
}

impl Connector for PgConnector {
    type Connection = PgConnection;

    fn connect<'a>(&'a self, host: &'a str) -> BoxFuture<'a, Result<PgConnection, sqlx::Error>> {
        Box::pin(async move { PgConnection::connect_with(&self.connect_options(host)).await })
    }
}

impl NodeConnection for PgConnection {
    fn ping(&mut self) -> BoxFuture<'_, Result<(), sqlx::Error>> {
        Box::pin(async move { sqlx::Connection::ping(self).await })
    }

    fn query_value<'a>(&'a mut self, query: &'a str) -> BoxFuture<'a, Result<String, sqlx::Error>> {
        Box::pin(async move {
            // simple protocol returns every column as text, so `bool` and
            // `pg_lsn` read back as `t`/`f` and `HI/LO`
            let row = sqlx::Executor::fetch_one(&mut *self, sqlx::raw_sql(query)).await?;
            row.try_get_unchecked::<String, _>(0)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connector() -> PgConnector {
        PgConnector::new(
            PgConnectorOptions::new("monitor", SecretString::from("s3cret".to_string()))
                .with_port(5432)
                .with_dbname("app")
                .with_ssl_mode(PgSslMode::Prefer),
        )
    }

    #[test]
    fn test_connect_options_per_host() {
        let opts = connector().connect_options("db1.example.com");

        assert_eq!(opts.get_host(), "db1.example.com");
        assert_eq!(opts.get_port(), 5432);
        assert_eq!(opts.get_database(), Some("app"));
        assert_eq!(opts.get_username(), "monitor");
        assert!(matches!(opts.get_ssl_mode(), PgSslMode::Prefer));
        assert_eq!(opts.get_application_name(), Some(APPLICATION_NAME));
    }

    #[test]
    fn test_default_options() {
        let opts = PgConnectorOptions::new("monitor", SecretString::from("s3cret".to_string()));
        assert_eq!(opts.port, DEFAULT_PORT);
        assert_eq!(opts.dbname, DEFAULT_DBNAME);
        assert!(matches!(opts.ssl_mode, PgSslMode::Disable));
    }

    #[test]
    fn test_password_is_not_printed() {
        let opts = PgConnectorOptions::new("monitor", SecretString::from("s3cret".to_string()));
        assert!(!format!("{opts:?}").contains("s3cret"));
    }
}
