//! GitLab adapter

use async_trait::async_trait;
use std::path::Path;
use tracing::{info, warn};

use super::provisioning::{backup_timestamp, location_block, wait_for_command};
use super::{RuntimeArtifacts, ServiceAdapter, ServiceContext};
use crate::config::{ServiceSpec, User};
use crate::engine::{argv, RetryPolicy};
use crate::error::Result;

const ADAPTER_TAG: &str = "gitlabadm";
const DB_NAME: &str = "gitlab";
const DB_USER: &str = "gitlab";
const DB_PASSWORD_ENV: &str = "SVCADM_DB_PASSWORD";
const ROOT_PASSWORD_ENV: &str = "GITLAB_ROOT_PASSWORD";
const OMNIBUS_ENV: &str = "GITLAB_OMNIBUS_CONFIG";
const BACKUP_DIR: &str = "/var/opt/gitlab/backups";
const READINESS: RetryPolicy = RetryPolicy::new(20, 15);

pub struct GitlabAdapter {
    spec: ServiceSpec,
    ctx: ServiceContext,
}

impl GitlabAdapter {
    pub fn new(spec: ServiceSpec, ctx: ServiceContext) -> Self {
        Self { spec, ctx }
    }

    async fn create_account(&self, user: &User, admin: bool) -> Result<()> {
        let script = user_script(user, admin);
        self.ctx
            .engine
            .exec(
                self.spec.container_name(),
                &argv(["gitlab-rails", "runner", "-e", "production", script.as_str()]),
            )
            .await?;
        Ok(())
    }
}

/// Omnibus settings: whatever the user configured, then the external URL
/// when proxied, then the database connection.
pub fn omnibus_config(
    configured: Option<&str>,
    external_url: Option<&str>,
    db_host: &str,
    db_password: &str,
) -> String {
    let mut settings = String::new();
    if let Some(configured) = configured.filter(|c| !c.trim().is_empty()) {
        settings.push_str(configured.trim_end());
        if !settings.ends_with(';') {
            settings.push(';');
        }
        settings.push(' ');
    }
    if let Some(url) = external_url {
        settings.push_str(&format!("external_url '{url}'; "));
    }
    settings.push_str(&format!(
        "gitlab_rails['db_adapter'] = 'postgresql'; \
         gitlab_rails['db_encoding'] = 'unicode'; \
         gitlab_rails['db_database'] = '{DB_NAME}'; \
         gitlab_rails['db_username'] = '{DB_USER}'; \
         gitlab_rails['db_password'] = '{}'; \
         gitlab_rails['db_host'] = '{db_host}'; \
         gitlab_rails['db_port'] = '5432'; \
         gitlab_rails['db_pool'] = 10; \
         postgresql['enable'] = false",
        ruby_escape(db_password)
    ));
    settings
}

fn user_script(user: &User, admin: bool) -> String {
    let username = ruby_escape(&user.username);
    let password = ruby_escape(&user.password);
    format!(
        "u = User.new(name: '{username}', username: '{username}', email: '{}', \
         password: '{password}', password_confirmation: '{password}'{}); \
         u.assign_personal_namespace(Organizations::Organization.default_organization); \
         u.skip_confirmation!; u.save!",
        ruby_escape(&user.email),
        if admin { ", admin: true" } else { "" }
    )
}

/// Escape a value for a single-quoted Ruby string
fn ruby_escape(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

#[async_trait]
impl ServiceAdapter for GitlabAdapter {
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
        let container = self.spec.container_name();
        let postgres = self.ctx.postgres(self.name()).await?;

        let db_password = self
            .ctx
            .existing_or_random_secret(container, DB_PASSWORD_ENV)
            .await?;
        let root_password = self
            .ctx
            .existing_or_random_secret(container, ROOT_PASSWORD_ENV)
            .await?;

        postgres
            .provision_database(DB_NAME, DB_USER, &db_password)
            .await?;
        info!("{}: database {} ready", ADAPTER_TAG, DB_NAME);

        let external_url = self
            .spec
            .proxy_frontend
            .then(|| format!("https://{}/{}", self.ctx.hostname, self.spec.name));
        let omnibus = omnibus_config(
            self.spec.container.env.get(OMNIBUS_ENV).map(String::as_str),
            external_url.as_deref(),
            postgres.host(),
            &db_password,
        );

        let mut artifacts = RuntimeArtifacts::default();
        artifacts.env.insert(OMNIBUS_ENV.to_string(), omnibus);
        artifacts
            .env
            .insert(ROOT_PASSWORD_ENV.to_string(), root_password);
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
        let stamp = backup_timestamp();

        match self.ctx.postgres(self.name()).await {
            Ok(postgres) => {
                postgres.backup_database(DB_NAME, dest).await?;
            }
            Err(e) => warn!("{}: skipping database dump: {}", ADAPTER_TAG, e),
        }

        let backup_arg = format!("BACKUP={stamp}");
        self.ctx
            .engine
            .exec(
                container,
                &argv(["gitlab-backup", "create", backup_arg.as_str()]),
            )
            .await?;

        let archive = format!("{BACKUP_DIR}/{stamp}_gitlab_backup.tar");
        tokio::fs::create_dir_all(dest).await?;
        self.ctx.engine.copy_out(container, &archive, dest).await?;
        self.ctx
            .engine
            .exec(container, &argv(["rm", "-f", archive.as_str()]))
            .await?;

        info!("{}: backed up to {}", ADAPTER_TAG, dest.display());
        Ok(())
    }

    async fn wait_for(&self) -> Result<()> {
        wait_for_command(
            &self.ctx,
            self.spec.container_name(),
            &["gitlab-healthcheck"],
            READINESS,
        )
        .await
    }

    fn proxy_fragment(&self) -> String {
        location_block(
            "GitLab",
            &self.spec.name,
            &format!("https://{}:443", self.spec.container_name()),
            &[],
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_external_url_only_when_given() {
        let proxied = omnibus_config(None, Some("https://dev.local/gitlab"), "pg", "secret");
        assert!(proxied.starts_with("external_url 'https://dev.local/gitlab'; "));
        assert!(proxied.contains("gitlab_rails['db_host'] = 'pg'"));

        let direct = omnibus_config(None, None, "pg", "secret");
        assert!(!direct.contains("external_url"));
    }

    #[test]
    fn test_configured_settings_are_kept_first() {
        let settings = omnibus_config(Some("nginx['listen_https'] = false"), None, "pg", "pw");
        assert!(settings.starts_with("nginx['listen_https'] = false; gitlab_rails"));
    }

    #[test]
    fn test_user_script_escapes_quotes() {
        let user = User {
            username: "adm".to_string(),
            password: "it's-secret".to_string(),
            email: "adm@example.com".to_string(),
        };
        let script = user_script(&user, true);
        assert!(script.contains("password: 'it\\'s-secret'"));
        assert!(script.contains("admin: true"));
        assert!(!user_script(&user, false).contains("admin: true"));
    }
}
