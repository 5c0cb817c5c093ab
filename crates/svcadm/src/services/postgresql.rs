//! PostgreSQL adapter
//!
//! Besides its own lifecycle, this adapter is the database administrator for
//! every service that keeps its data in postgres. All statements run through
//! `psql` inside the container as the `postgres` superuser, so the host never
//! needs to reach the database port.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::info;

use super::provisioning::{backup_timestamp, wait_for_command};
use super::{RuntimeArtifacts, ServiceAdapter, ServiceContext};
use crate::config::{ServiceSpec, User};
use crate::engine::{argv, RetryPolicy};
use crate::error::{Result, ServiceError};

const ADAPTER_TAG: &str = "psqladm";
const PASSWORD_ENV: &str = "POSTGRES_PASSWORD";
const PORT: u16 = 5432;
const READINESS: RetryPolicy = RetryPolicy::new(5, 15);

pub struct PostgresAdapter {
    spec: ServiceSpec,
    ctx: ServiceContext,
}

impl PostgresAdapter {
    pub fn new(spec: ServiceSpec, ctx: ServiceContext) -> Self {
        Self { spec, ctx }
    }

    /// Container name, also the hostname other containers connect to
    pub fn host(&self) -> &str {
        self.spec.container_name()
    }

    pub fn port(&self) -> u16 {
        PORT
    }

    /// Run one SQL statement and return its unaligned, tuples-only output.
    pub async fn psql(&self, sql: &str) -> Result<String> {
        let command = argv([
            "psql",
            "-v",
            "ON_ERROR_STOP=1",
            "-U",
            "postgres",
            "-d",
            "postgres",
            "-tA",
            "-c",
            sql,
        ]);
        let stdout = self.ctx.engine.exec_capture(self.host(), &command).await?;
        Ok(String::from_utf8_lossy(&stdout).trim().to_string())
    }

    pub async fn create_role(&self, name: &str, password: &str, superuser: bool) -> Result<()> {
        let mut sql = format!(
            "CREATE ROLE {} WITH LOGIN PASSWORD {}",
            quote_ident(name),
            quote_literal(password)
        );
        if superuser {
            sql.push_str(" SUPERUSER");
        }
        self.psql(&sql).await?;
        info!("{}: created role {}", ADAPTER_TAG, name);
        Ok(())
    }

    /// Create the login role `name`, or reset its password if it exists.
    pub async fn ensure_role(&self, name: &str, password: &str) -> Result<()> {
        let sql = format!(
            "DO $svcadm$ BEGIN \
             IF EXISTS (SELECT FROM pg_roles WHERE rolname = {literal}) THEN \
             ALTER ROLE {ident} WITH LOGIN PASSWORD {password}; \
             ELSE \
             CREATE ROLE {ident} WITH LOGIN PASSWORD {password}; \
             END IF; \
             END $svcadm$;",
            literal = quote_literal(name),
            ident = quote_ident(name),
            password = quote_literal(password),
        );
        self.psql(&sql).await?;
        Ok(())
    }

    pub async fn database_exists(&self, name: &str) -> Result<bool> {
        let output = self
            .psql(&format!(
                "SELECT 1 FROM pg_database WHERE datname = {}",
                quote_literal(name)
            ))
            .await?;
        Ok(output == "1")
    }

    pub async fn create_database(&self, name: &str, owner: &str) -> Result<()> {
        self.psql(&format!(
            "CREATE DATABASE {} OWNER {}",
            quote_ident(name),
            quote_ident(owner)
        ))
        .await?;
        info!("{}: created database {} owned by {}", ADAPTER_TAG, name, owner);
        Ok(())
    }

    pub async fn grant_all_on(&self, database: &str, user: &str) -> Result<()> {
        self.psql(&format!(
            "GRANT ALL PRIVILEGES ON DATABASE {} TO {}",
            quote_ident(database),
            quote_ident(user)
        ))
        .await?;
        Ok(())
    }

    pub async fn delete_database(&self, name: &str) -> Result<()> {
        self.psql(&format!("DROP DATABASE IF EXISTS {}", quote_ident(name)))
            .await?;
        info!("{}: dropped database {}", ADAPTER_TAG, name);
        Ok(())
    }

    pub async fn delete_user(&self, name: &str) -> Result<()> {
        self.psql(&format!("DROP ROLE IF EXISTS {}", quote_ident(name)))
            .await?;
        info!("{}: dropped role {}", ADAPTER_TAG, name);
        Ok(())
    }

    /// Role plus database for a dependent service. Safe to repeat: the role
    /// password is reset and an existing database is kept.
    pub async fn provision_database(&self, database: &str, owner: &str, password: &str) -> Result<()> {
        self.ensure_role(owner, password).await?;
        if self.database_exists(database).await? {
            info!("{}: database {} already exists", ADAPTER_TAG, database);
        } else {
            self.create_database(database, owner).await?;
        }
        self.grant_all_on(database, owner).await
    }

    /// Dump `database` into `dest/<database>_<timestamp>.sql`.
    pub async fn backup_database(&self, database: &str, dest: &Path) -> Result<PathBuf> {
        let dump = self
            .ctx
            .engine
            .exec_capture(
                self.host(),
                &argv(["pg_dump", "-U", "postgres", "--clean", "--if-exists", database]),
            )
            .await?;

        let path = dest.join(format!("{database}_{}.sql", backup_timestamp()));
        write_dump(&path, &dump).await?;
        info!("{}: dumped {} to {}", ADAPTER_TAG, database, path.display());
        Ok(path)
    }
}

async fn write_dump(path: &Path, dump: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, dump).await?;
    Ok(())
}

#[async_trait]
impl ServiceAdapter for PostgresAdapter {
    fn adapter_tag(&self) -> &'static str {
        ADAPTER_TAG
    }

    fn spec(&self) -> &ServiceSpec {
        &self.spec
    }

    fn context(&self) -> &ServiceContext {
        &self.ctx
    }

    async fn pre_init(&self) -> Result<RuntimeArtifacts> {
        let password = self
            .ctx
            .existing_or_random_secret(self.host(), PASSWORD_ENV)
            .await?;

        let mut artifacts = RuntimeArtifacts::default();
        artifacts.env.insert(PASSWORD_ENV.to_string(), password);
        artifacts.ports.insert(PORT, PORT);
        Ok(artifacts)
    }

    async fn create_user(&self, user: &User) -> Result<()> {
        self.create_role(&user.username, &user.password, false).await
    }

    async fn create_admin_user(&self, user: &User) -> Result<()> {
        self.create_role(&user.username, &user.password, true).await
    }

    /// Whole-cluster dump into `dest/<timestamp>.sql`
    async fn backup(&self, dest: &Path) -> Result<()> {
        let dump = self
            .ctx
            .engine
            .exec_capture(self.host(), &argv(["pg_dumpall", "-U", "postgres"]))
            .await
            .map_err(|e| ServiceError::provisioning(self.name(), e))?;

        let path = dest.join(format!("{}.sql", backup_timestamp()));
        write_dump(&path, &dump).await?;
        info!("{}: backed up the cluster to {}", ADAPTER_TAG, path.display());
        Ok(())
    }

    async fn wait_for(&self) -> Result<()> {
        wait_for_command(
            &self.ctx,
            self.host(),
            &["pg_isready", "-U", "postgres"],
            READINESS,
        )
        .await
    }
}

/// Quote an SQL identifier
pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// Quote an SQL string literal
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quoting() {
        assert_eq!(quote_ident("gitlab"), "\"gitlab\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
        assert_eq!(quote_literal("it's"), "'it''s'");
    }
}
