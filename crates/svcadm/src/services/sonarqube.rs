//! SonarQube adapter
//!
//! Users are managed through the web API from inside the container, with the
//! built-in `admin` account whose password is generated at pre-init.

use async_trait::async_trait;
use serde_json::json;
use std::path::Path;
use tracing::{info, warn};

use super::provisioning::{
    archive_out, backup_timestamp, location_block, nested_id, provision_users,
    wait_for_json_field,
};
use super::{RuntimeArtifacts, ServiceAdapter, ServiceContext};
use crate::config::{ServiceSpec, User};
use crate::engine::{argv, RetryPolicy};
use crate::error::{Result, ServiceError};

const ADAPTER_TAG: &str = "sonaradm";
const DB_NAME: &str = "sonarqube";
const DB_USER: &str = "sonarqube";
const ADMIN_PASSWORD_ENV: &str = "ADMIN_PASSWORD";
const DB_PASSWORD_ENV: &str = "SONAR_JDBC_PASSWORD";
const ADMIN_GROUP: &str = "sonar-administrators";
const PORT: u16 = 9000;
const READINESS: RetryPolicy = RetryPolicy::new(20, 15);

pub struct SonarqubeAdapter {
    spec: ServiceSpec,
    ctx: ServiceContext,
}

impl SonarqubeAdapter {
    pub fn new(spec: ServiceSpec, ctx: ServiceContext) -> Self {
        Self { spec, ctx }
    }

    /// Web context, `/sonarqube` when published behind the proxy
    fn web_context(&self) -> String {
        if self.spec.proxy_frontend {
            format!("/{}", self.spec.name)
        } else {
            String::new()
        }
    }

    fn api(&self, path: &str) -> String {
        format!("http://localhost:{PORT}{}/api/{path}", self.web_context())
    }

    async fn admin_password(&self) -> Result<String> {
        Ok(self
            .ctx
            .engine
            .container_env(self.spec.container_name(), ADMIN_PASSWORD_ENV)
            .await?)
    }

    async fn curl(&self, args: Vec<String>) -> Result<Vec<u8>> {
        let mut command = argv(["curl", "-kfsL"]);
        command.extend(args);
        Ok(self
            .ctx
            .engine
            .exec_capture(self.spec.container_name(), &command)
            .await?)
    }

    async fn change_default_admin_password(&self, password: &str) -> Result<()> {
        let new_password = format!("password={password}");
        let url = self.api("users/change_password");
        self.curl(argv([
            "-X",
            "POST",
            "-u",
            "admin:admin",
            "-d",
            "login=admin",
            "-d",
            new_password.as_str(),
            "-d",
            "previousPassword=admin",
            url.as_str(),
        ]))
        .await?;
        Ok(())
    }
}

#[async_trait]
impl ServiceAdapter for SonarqubeAdapter {
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
        let admin_password = self
            .ctx
            .existing_or_random_secret(container, ADMIN_PASSWORD_ENV)
            .await?;
        postgres
            .provision_database(DB_NAME, DB_USER, &db_password)
            .await?;

        let mut artifacts = RuntimeArtifacts::default();
        let env = &mut artifacts.env;
        env.insert(ADMIN_PASSWORD_ENV.to_string(), admin_password);
        env.insert(
            "SONAR_JDBC_URL".to_string(),
            format!("jdbc:postgresql://{}:5432/{DB_NAME}", postgres.host()),
        );
        env.insert("SONAR_JDBC_USERNAME".to_string(), DB_USER.to_string());
        env.insert(DB_PASSWORD_ENV.to_string(), db_password);
        env.insert("SONAR_ES_CONNECTION_TIMEOUT".to_string(), "1000".to_string());
        if self.spec.proxy_frontend {
            env.insert("SONAR_WEB_CONTEXT".to_string(), self.web_context());
        }
        Ok(artifacts)
    }

    async fn post_init(&self) -> Result<()> {
        self.wait_for().await?;

        let password = self.admin_password().await?;
        match self.change_default_admin_password(&password).await {
            Ok(()) => info!("{}: default admin password changed", ADAPTER_TAG),
            // Already changed by an earlier run
            Err(e) => warn!("{}: could not change the admin password: {}", ADAPTER_TAG, e),
        }

        provision_users(self, &self.ctx.users().await).await;
        Ok(())
    }

    async fn create_user(&self, user: &User) -> Result<()> {
        let password = self.admin_password().await?;
        let body = json!({
            "login": user.username,
            "name": user.username,
            "email": user.email,
            "password": user.password,
        })
        .to_string();
        let credentials = format!("admin:{password}");
        let url = self.api("v2/users-management/users");

        self.curl(argv([
            "-X",
            "POST",
            "-u",
            credentials.as_str(),
            "-H",
            "Content-Type: application/json",
            "-d",
            body.as_str(),
            url.as_str(),
        ]))
        .await?;
        Ok(())
    }

    async fn create_admin_user(&self, user: &User) -> Result<()> {
        self.create_user(user).await?;

        let credentials = format!("admin:{}", self.admin_password().await?);
        let url = self.api(&format!("v2/users-management/users?q={}", user.username));
        let users = self
            .curl(argv(["-u", credentials.as_str(), url.as_str()]))
            .await?;
        let user_id = nested_id(&users, "users", "login", &user.username).ok_or_else(|| {
            ServiceError::provisioning(
                self.name(),
                format!("{} created but not found, not added to {ADMIN_GROUP}", user.username),
            )
        })?;

        let url = self.api(&format!("v2/authorizations/groups?q={ADMIN_GROUP}"));
        let groups = self
            .curl(argv(["-u", credentials.as_str(), url.as_str()]))
            .await?;
        let group_id = nested_id(&groups, "groups", "name", ADMIN_GROUP).ok_or_else(|| {
            ServiceError::provisioning(self.name(), format!("group {ADMIN_GROUP} not found"))
        })?;

        let membership = json!({ "userId": user_id, "groupId": group_id }).to_string();
        let url = self.api("v2/authorizations/group-memberships");
        self.curl(argv([
            "-X",
            "POST",
            "-u",
            credentials.as_str(),
            "-H",
            "Content-Type: application/json",
            "-d",
            membership.as_str(),
            url.as_str(),
        ]))
        .await?;

        info!("{}: {} added to {}", ADAPTER_TAG, user.username, ADMIN_GROUP);
        Ok(())
    }

    async fn backup(&self, dest: &Path) -> Result<()> {
        match self.ctx.postgres(self.name()).await {
            Ok(postgres) => {
                postgres.backup_database(DB_NAME, dest).await?;
            }
            Err(e) => warn!("{}: skipping database dump: {}", ADAPTER_TAG, e),
        }

        archive_out(
            &self.ctx,
            self.spec.container_name(),
            &[
                "/opt/sonarqube/conf",
                "/opt/sonarqube/extensions",
                "/opt/sonarqube/data",
            ],
            &backup_timestamp(),
            dest,
        )
        .await
    }

    async fn wait_for(&self) -> Result<()> {
        let status = self.api("system/status");
        wait_for_json_field(
            &self.ctx,
            self.spec.container_name(),
            &["curl", "-kfsL", status.as_str()],
            "status",
            "UP",
            READINESS,
        )
        .await
    }

    fn proxy_fragment(&self) -> String {
        location_block(
            "SonarQube",
            &self.spec.name,
            &format!("http://{}:{PORT}", self.spec.container_name()),
            &[],
        )
    }
}
