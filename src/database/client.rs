// file: src/database/client.rs
// description: PostGIS client wrapper over tokio-postgres with connection url helpers
// reference: https://docs.rs/tokio-postgres

use crate::error::{BnaError, Result};
use crate::tools::postgis;
use crate::utils::Validator;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use tokio_postgres::config::Host;
use tokio_postgres::{Client, NoTls};
use tracing::{debug, info, trace, warn};

pub const DEFAULT_PORT: u16 = 5432;

/// Parsed `postgresql://` URL, also rendered for the command line tools.
#[derive(Debug, Clone)]
pub struct DatabaseUrl {
    raw: String,
    config: tokio_postgres::Config,
}

impl DatabaseUrl {
    pub fn parse(url: &str) -> Result<Self> {
        let raw = url.trim().replace("postgresql+psycopg://", "postgresql://");
        let config = tokio_postgres::Config::from_str(&raw)
            .map_err(|e| BnaError::Config(format!("invalid database URL: {e}")))?;
        Ok(Self { raw, config })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn user(&self) -> Option<&str> {
        self.config.get_user()
    }

    pub fn password(&self) -> Option<String> {
        self.config
            .get_password()
            .map(|p| String::from_utf8_lossy(p).into_owned())
    }

    pub fn host(&self) -> String {
        self.config
            .get_hosts()
            .iter()
            .find_map(|host| match host {
                Host::Tcp(name) => Some(name.clone()),
                #[allow(unreachable_patterns)]
                _ => None,
            })
            .unwrap_or_else(|| "localhost".to_string())
    }

    pub fn port(&self) -> u16 {
        self.config
            .get_ports()
            .first()
            .copied()
            .unwrap_or(DEFAULT_PORT)
    }

    /// Database name, which defaults to the user name like libpq does.
    pub fn dbname(&self) -> String {
        self.config
            .get_dbname()
            .or_else(|| self.user())
            .unwrap_or("postgres")
            .to_string()
    }

    /// GDAL `PG:` connection string.
    pub fn ogr_connection(&self) -> String {
        let mut parts = vec![
            format!("host={}", self.host()),
            format!("port={}", self.port()),
        ];
        if let Some(user) = self.user() {
            parts.push(format!("user={user}"));
        }
        if let Some(password) = self.password() {
            parts.push(format!("password={password}"));
        }
        parts.push(format!("dbname={}", self.dbname()));
        format!("PG:{}", parts.join(" "))
    }
}

#[derive(Clone)]
pub struct PostgresClient {
    client: Arc<Client>,
    url: DatabaseUrl,
}

impl PostgresClient {
    pub async fn connect(url: &DatabaseUrl) -> Result<Self> {
        debug!(
            "Connecting to PostgreSQL at {}:{}/{}",
            url.host(),
            url.port(),
            url.dbname()
        );
        let (client, connection) = tokio_postgres::connect(url.as_str(), NoTls).await?;

        tokio::spawn(async move {
            if let Err(e) = connection.await {
                warn!("PostgreSQL connection error: {}", e);
            }
        });

        Ok(Self {
            client: Arc::new(client),
            url: url.clone(),
        })
    }

    /// Opens `size` independent connections for concurrent scripts.
    pub async fn connect_many(url: &DatabaseUrl, size: usize) -> Result<Vec<Self>> {
        let mut clients = Vec::with_capacity(size.max(1));
        for _ in 0..size.max(1) {
            clients.push(Self::connect(url).await?);
        }
        Ok(clients)
    }

    pub fn url(&self) -> &DatabaseUrl {
        &self.url
    }

    pub fn inner(&self) -> &Client {
        &self.client
    }

    pub async fn ping(&self) -> Result<bool> {
        self.client.simple_query("SELECT 1").await?;
        info!("PostgreSQL connection successful");
        Ok(true)
    }

    /// Runs one or more `;` separated statements in a single round trip.
    pub async fn execute(&self, sql: &str) -> Result<()> {
        trace!("{sql}");
        self.client.batch_execute(sql).await?;
        Ok(())
    }

    pub async fn execute_file(&self, path: &Path) -> Result<()> {
        let sql = read_script(path).await?;
        debug!("Execute {}", path.display());
        self.execute(&sql).await
    }

    /// Runs statements one by one outside of any transaction block.
    pub async fn execute_each<S: AsRef<str>>(&self, statements: &[S]) -> Result<()> {
        for statement in statements {
            debug!("{}", statement.as_ref());
            self.client.batch_execute(statement.as_ref()).await?;
        }
        Ok(())
    }

    pub async fn table_exists(&self, table: &str) -> Result<bool> {
        let row = self
            .client
            .query_one(
                "SELECT EXISTS (SELECT FROM information_schema.tables \
                 WHERE table_schema IN ('generated', 'received') AND table_name = $1)",
                &[&table],
            )
            .await?;
        Ok(row.get(0))
    }

    pub async fn column_exists(&self, table: &str, column: &str) -> Result<bool> {
        let row = self
            .client
            .query_one(
                "SELECT EXISTS (SELECT FROM information_schema.columns \
                 WHERE table_name = $1 AND column_name = $2)",
                &[&table, &column],
            )
            .await?;
        Ok(row.get(0))
    }

    pub async fn query_optional_i32(&self, sql: &str) -> Result<Option<i32>> {
        let row = self.client.query_opt(sql, &[]).await?;
        Ok(row.and_then(|r| r.get::<_, Option<i32>>(0)))
    }

    pub async fn query_i64(&self, sql: &str) -> Result<i64> {
        let row = self.client.query_one(sql, &[]).await?;
        Ok(row.get::<_, Option<i64>>(0).unwrap_or_default())
    }

    pub async fn query_optional_text(&self, sql: &str) -> Result<Option<String>> {
        let row = self.client.query_opt(sql, &[]).await?;
        Ok(row.and_then(|r| r.get::<_, Option<String>>(0)))
    }

    pub async fn query_texts(&self, sql: &str) -> Result<Vec<String>> {
        let rows = self.client.query(sql, &[]).await?;
        Ok(rows
            .iter()
            .filter_map(|r| r.get::<_, Option<String>>(0))
            .collect())
    }

    pub async fn query_i64s(&self, sql: &str) -> Result<Vec<i64>> {
        let rows = self.client.query(sql, &[]).await?;
        Ok(rows
            .iter()
            .filter_map(|r| r.get::<_, Option<i64>>(0))
            .collect())
    }

    /// Loads a CSV file with a header row through `psql \copy`.
    pub async fn import_csv_with_header(&self, csv: &Path, table: &str) -> Result<()> {
        Validator::validate_sql_identifier(table)?;
        let csv = csv.canonicalize().map_err(|e| BnaError::file(csv, e))?;
        let command = format!(
            "\\copy {table} FROM '{}' DELIMITER ',' CSV HEADER;",
            csv.display()
        );
        postgis::psql_command(&self.url, &command).await
    }

    /// Creates a table from a script, then loads the CSV file into it.
    pub async fn load_csv_file(&self, script: &Path, csv: &Path, table: &str) -> Result<()> {
        self.execute_file(script).await?;
        self.import_csv_with_header(csv, table).await
    }

    pub async fn export_to_csv(&self, csv: &Path, table: &str) -> Result<()> {
        Validator::validate_sql_identifier(table)?;
        let command = format!(
            "\\copy {table} TO '{}' WITH (FORMAT CSV, HEADER);",
            csv.display()
        );
        postgis::psql_command(&self.url, &command).await
    }
}

pub async fn read_script(path: &Path) -> Result<String> {
    if !path.is_file() {
        return Err(BnaError::MissingScript {
            path: path.to_path_buf(),
        });
    }
    tokio::fs::read_to_string(path)
        .await
        .map_err(|e| BnaError::file(path, e))
}
