// file: src/database/schema.rs
// description: PostgreSQL tuning, extensions and schema management
// reference: https://www.postgresql.org/docs/current/sql-altersystem.html

use crate::database::client::PostgresClient;
use crate::error::{BnaError, Result};
use crate::tools::docker;
use crate::utils::Validator;
use tracing::{info, warn};

pub const SCHEMAS: [&str; 3] = ["generated", "received", "scratch"];
pub const EXTENSIONS: [&str; 4] = ["postgis", "uuid-ossp", "hstore", "pgrouting"];

/// Server settings sized for the available cores and memory.
pub fn system_statements(cores: usize, memory_mb: u64) -> Vec<String> {
    vec![
        format!("ALTER SYSTEM SET shared_buffers TO '{}MB';", memory_mb / 4),
        format!("ALTER SYSTEM SET effective_cache_size TO '{}MB';", 3 * memory_mb / 4),
        format!("ALTER SYSTEM SET work_mem TO '{}MB';", 8 * memory_mb / 1024),
        format!("ALTER SYSTEM SET maintenance_work_mem TO '{}MB';", memory_mb / 16),
        format!("ALTER SYSTEM SET min_wal_size TO '{}MB';", memory_mb / 8),
        format!("ALTER SYSTEM SET max_wal_size TO '{}MB';", memory_mb / 2),
        "ALTER SYSTEM SET checkpoint_completion_target TO '0.9';".to_string(),
        "ALTER SYSTEM SET wal_buffers TO '-1';".to_string(),
        "ALTER SYSTEM SET listen_addresses TO '*';".to_string(),
        "ALTER SYSTEM SET max_connections TO '100';".to_string(),
        "ALTER SYSTEM SET random_page_cost TO '1.1';".to_string(),
        "ALTER SYSTEM SET effective_io_concurrency TO '200';".to_string(),
        format!("ALTER SYSTEM SET max_worker_processes TO '{cores}';"),
        format!("ALTER SYSTEM SET max_parallel_workers TO '{cores}';"),
        format!("ALTER SYSTEM SET max_parallel_workers_per_gather TO '{}';", cores / 2),
        format!("ALTER SYSTEM SET max_parallel_maintenance_workers TO '{}';", cores / 2),
    ]
}

pub fn extension_statements() -> Vec<String> {
    EXTENSIONS
        .iter()
        .map(|name| format!("CREATE EXTENSION IF NOT EXISTS \"{name}\";"))
        .collect()
}

pub fn schema_statements(pguser: &str) -> Result<Vec<String>> {
    Validator::validate_sql_identifier(pguser)?;
    let mut statements: Vec<String> = SCHEMAS
        .iter()
        .map(|schema| format!("CREATE SCHEMA IF NOT EXISTS {schema} AUTHORIZATION {pguser};"))
        .collect();
    statements.push(format!(
        "ALTER ROLE {pguser} SET search_path TO generated,received,scratch,\"$user\",public;"
    ));
    Ok(statements)
}

pub struct SchemaManager<'a> {
    client: &'a PostgresClient,
}

impl<'a> SchemaManager<'a> {
    pub fn new(client: &'a PostgresClient) -> Self {
        Self { client }
    }

    /// Requires superuser privileges. Changes apply after a server reload.
    pub async fn configure_system(&self, cores: usize, memory_mb: u64) -> Result<()> {
        info!("Configuring system parameters: {cores} cores, {memory_mb}MB");
        self.client
            .execute_each(&system_statements(cores, memory_mb))
            .await
    }

    pub async fn configure_extensions(&self) -> Result<()> {
        info!("Configuring extensions");
        self.client.execute_each(&extension_statements()).await
    }

    pub async fn configure_schemas(&self, pguser: &str) -> Result<()> {
        info!("Configuring schemas for {pguser}");
        self.client.execute_each(&schema_statements(pguser)?).await
    }

    /// Idempotent: every statement is guarded or overwrites its previous value.
    pub async fn configure_db(&self, cores: usize, memory_mb: u64, pguser: &str) -> Result<()> {
        self.configure_system(cores, memory_mb).await?;
        self.configure_extensions().await?;
        self.configure_schemas(pguser).await
    }

    /// Sizes the database after the resources of the docker engine.
    pub async fn configure_docker_db(&self) -> Result<()> {
        let pguser = self
            .client
            .url()
            .user()
            .ok_or_else(|| {
                BnaError::Config("the database URL must specify a PostgreSQL user".to_string())
            })?
            .to_string();
        let info = docker::docker_info().await?;
        self.configure_db(info.cpus, info.memory_mb(), &pguser).await
    }

    pub async fn list_tables(&self) -> Result<Vec<(String, String)>> {
        let rows = self
            .client
            .inner()
            .query(
                "SELECT table_schema::text, table_name::text FROM information_schema.tables \
                 WHERE table_schema = ANY($1) AND table_type = 'BASE TABLE' \
                 ORDER BY table_schema, table_name",
                &[&SCHEMAS.to_vec()],
            )
            .await?;
        Ok(rows.iter().map(|row| (row.get(0), row.get(1))).collect())
    }

    /// Drops every table created by a previous analysis.
    pub async fn reset_tables(&self) -> Result<usize> {
        let tables = self.list_tables().await?;
        if tables.is_empty() {
            info!("No table to reset");
            return Ok(0);
        }
        warn!("Dropping {} tables", tables.len());
        let statements: Vec<String> = tables
            .iter()
            .map(|(schema, table)| format!("DROP TABLE IF EXISTS {schema}.\"{table}\" CASCADE;"))
            .collect();
        self.client.execute_each(&statements).await?;
        Ok(tables.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_system_statements() {
        let statements = system_statements(8, 16384);
        assert_eq!(statements.len(), 16);
        assert_eq!(statements[0], "ALTER SYSTEM SET shared_buffers TO '4096MB';");
        assert_eq!(statements[1], "ALTER SYSTEM SET effective_cache_size TO '12288MB';");
        assert_eq!(statements[2], "ALTER SYSTEM SET work_mem TO '128MB';");
        assert_eq!(statements[3], "ALTER SYSTEM SET maintenance_work_mem TO '1024MB';");
        assert_eq!(statements[5], "ALTER SYSTEM SET max_wal_size TO '8192MB';");
        assert_eq!(
            statements[14],
            "ALTER SYSTEM SET max_parallel_workers_per_gather TO '4';"
        );
    }

    #[test]
    fn test_extension_statements() {
        assert_eq!(
            extension_statements()[1],
            "CREATE EXTENSION IF NOT EXISTS \"uuid-ossp\";"
        );
    }

    #[test]
    fn test_schema_statements() {
        let statements = schema_statements("bna").unwrap();
        assert_eq!(statements.len(), 4);
        assert_eq!(
            statements[0],
            "CREATE SCHEMA IF NOT EXISTS generated AUTHORIZATION bna;"
        );
        assert_eq!(
            statements[3],
            "ALTER ROLE bna SET search_path TO generated,received,scratch,\"$user\",public;"
        );
        assert!(schema_statements("bna; DROP ROLE x").is_err());
    }
}
