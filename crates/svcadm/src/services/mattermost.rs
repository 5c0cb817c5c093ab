//! Mattermost adapter

use async_trait::async_trait;
use std::path::Path;
use tracing::{info, warn};

use super::provisioning::{backup_timestamp, location_block, wait_for_json_field};
use super::{RuntimeArtifacts, ServiceAdapter, ServiceContext};
use crate::config::{ServiceSpec, User};
use crate::engine::{argv, RetryPolicy};
use crate::error::Result;

const ADAPTER_TAG: &str = "mattermostadm";
const DB_NAME: &str = "mattermost";
const DB_USER: &str = "mattermost";
const DB_PASSWORD_ENV: &str = "SVCADM_DB_PASSWORD";
const PORT: u16 = 8065;
const READINESS: RetryPolicy = RetryPolicy::new(20, 15);

pub struct MattermostAdapter {
    spec: ServiceSpec,
    ctx: ServiceContext,
}

impl MattermostAdapter {
    pub fn new(spec: ServiceSpec, ctx: ServiceContext) -> Self {
        Self { spec, ctx }
    }

    /// Local API base; the site lives under `/<name>` when proxied.
    fn local_url(&self) -> String {
        if self.spec.proxy_frontend {
            format!("http://localhost:{PORT}/{}", self.spec.name)
        } else {
            format!("http://localhost:{PORT}")
        }
    }

    async fn create_account(&self, user: &User, admin: bool) -> Result<()> {
        let mut command = argv([
            "mmctl",
            "user",
            "create",
            "--email",
            user.email.as_str(),
            "--username",
            user.username.as_str(),
            "--password",
            user.password.as_str(),
        ]);
        if admin {
            command.push("--system-admin".to_string());
        }
        command.push("--local".to_string());

        self.ctx
            .engine
            .exec(self.spec.container_name(), &command)
            .await?;
        Ok(())
    }
}

pub fn datasource(db_host: &str, password: &str) -> String {
    format!(
        "postgres://{DB_USER}:{password}@{db_host}:5432/{DB_NAME}\
         ?sslmode=disable&connect_timeout=10&binary_parameters=yes"
    )
}

#[async_trait]
impl ServiceAdapter for MattermostAdapter {
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
        let postgres = self.ctx.postgres(self.name()).await?;
        let db_password = self
            .ctx
            .existing_or_random_secret(self.spec.container_name(), DB_PASSWORD_ENV)
            .await?;
        postgres
            .provision_database(DB_NAME, DB_USER, &db_password)
            .await?;

        let mut artifacts = RuntimeArtifacts::default();
        artifacts.env.insert(
            "MM_SQLSETTINGS_DRIVERNAME".to_string(),
            "postgres".to_string(),
        );
        artifacts.env.insert(
            "MM_SQLSETTINGS_DATASOURCE".to_string(),
            datasource(postgres.host(), &db_password),
        );
        artifacts.env.insert(
            "MM_SERVICESETTINGS_ENABLELOCALMODE".to_string(),
            "true".to_string(),
        );
        if self.spec.proxy_frontend {
            artifacts.env.insert(
                "MM_SERVICESETTINGS_SITEURL".to_string(),
                format!("https://{}/{}", self.ctx.hostname, self.spec.name),
            );
        }
        artifacts
            .env
            .insert(DB_PASSWORD_ENV.to_string(), db_password);
        Ok(artifacts)
    }

    async fn create_user(&self, user: &User) -> Result<()> {
        self.create_account(user, false).await
    }

    async fn create_admin_user(&self, user: &User) -> Result<()> {
        self.create_account(user, true).await
    }

    async fn backup(&self, dest: &Path) -> Result<()> {
        let container = self.spec.container_name();

        match self.ctx.postgres(self.name()).await {
            Ok(postgres) => {
                postgres.backup_database(DB_NAME, dest).await?;
            }
            Err(e) => warn!("{}: skipping database dump: {}", ADAPTER_TAG, e),
        }

        let export = format!("/tmp/{}.zip", backup_timestamp());
        self.ctx
            .engine
            .exec(
                container,
                &argv([
                    "mmctl",
                    "export",
                    "create",
                    "--local",
                    "--no-attachments",
                    "--output",
                    export.as_str(),
                ]),
            )
            .await?;
        tokio::fs::create_dir_all(dest).await?;
        self.ctx.engine.copy_out(container, &export, dest).await?;
        self.ctx
            .engine
            .exec(container, &argv(["rm", "-f", export.as_str()]))
            .await?;

        info!("{}: backed up to {}", ADAPTER_TAG, dest.display());
        Ok(())
    }

    async fn wait_for(&self) -> Result<()> {
        let ping = format!("{}/api/v4/system/ping", self.local_url());
        wait_for_json_field(
            &self.ctx,
            self.spec.container_name(),
            &["curl", "-kfsL", ping.as_str()],
            "status",
            "OK",
            READINESS,
        )
        .await
    }

    fn proxy_fragment(&self) -> String {
        location_block(
            "Mattermost",
            &self.spec.name,
            &format!("http://{}:{PORT}", self.spec.container_name()),
            &[
                "proxy_http_version 1.1;",
                "proxy_set_header Upgrade $http_upgrade;",
                "proxy_set_header Connection $connection_upgrade;",
                "proxy_redirect off;",
            ],
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_datasource() {
        let dsn = datasource("svcadm-postgresql", "pw");
        assert!(dsn.starts_with("postgres://mattermost:pw@svcadm-postgresql:5432/mattermost?"));
    }
}
