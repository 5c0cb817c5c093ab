//! MinIO adapter

use async_trait::async_trait;
use std::path::Path;
use tracing::{debug, info};

use super::provisioning::{archive_out, backup_timestamp, provision_users};
use super::{CleanupTargets, RuntimeArtifacts, ServiceAdapter, ServiceContext};
use crate::config::{ServiceSpec, User};
use crate::engine::{argv, poll_until, RetryPolicy};
use crate::error::Result;

const ADAPTER_TAG: &str = "minioadm";
const ROOT_USER_ENV: &str = "MINIO_ROOT_USER";
const ROOT_PASSWORD_ENV: &str = "MINIO_ROOT_PASSWORD";
const DEFAULT_ROOT_USER: &str = "svcadm";
const DATA_VOLUME: &str = "minio-data";
const DATA_PATH: &str = "/data";
const CONSOLE_ADDRESS: &str = ":9001";
const LOCAL_API: &str = "http://localhost:9000";
/// Aliases shipped with the `mc` client
const DEFAULT_ALIASES: [&str; 4] = ["local", "gcs", "s3", "play"];
const READINESS: RetryPolicy = RetryPolicy::new(5, 30);

pub struct MinioAdapter {
    spec: ServiceSpec,
    ctx: ServiceContext,
}

impl MinioAdapter {
    pub fn new(spec: ServiceSpec, ctx: ServiceContext) -> Self {
        Self { spec, ctx }
    }

    /// `mc` alias pointing at this server
    fn alias(&self) -> &str {
        self.spec.container_name()
    }

    fn root_user(&self) -> &str {
        self.spec
            .container
            .env
            .get(ROOT_USER_ENV)
            .map(String::as_str)
            .filter(|user| !user.is_empty())
            .unwrap_or(DEFAULT_ROOT_USER)
    }

    fn alias_command(&self, root_password: &str) -> Vec<String> {
        argv([
            "mc",
            "alias",
            "set",
            self.alias(),
            LOCAL_API,
            self.root_user(),
            root_password,
        ])
    }

    async fn mc(&self, args: &[&str]) -> Result<()> {
        let mut command = argv(["mc"]);
        command.extend(args.iter().map(|arg| arg.to_string()));
        self.ctx
            .engine
            .exec(self.spec.container_name(), &command)
            .await?;
        Ok(())
    }

    async fn create_account(&self, user: &User, policy: &str) -> Result<()> {
        self.mc(&["admin", "user", "add", self.alias(), &user.username, &user.password])
            .await?;
        let target = format!("--user={}", user.username);
        self.mc(&["admin", "policy", "attach", self.alias(), policy, &target])
            .await
    }
}

#[async_trait]
impl ServiceAdapter for MinioAdapter {
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
        let root_password = match self.spec.container.env.get(ROOT_PASSWORD_ENV) {
            Some(password) if !password.is_empty() => password.clone(),
            _ => {
                self.ctx
                    .existing_or_random_secret(self.spec.container_name(), ROOT_PASSWORD_ENV)
                    .await?
            }
        };

        let mut artifacts = RuntimeArtifacts::default();
        let env = &mut artifacts.env;
        env.insert(ROOT_USER_ENV.to_string(), self.root_user().to_string());
        env.insert(ROOT_PASSWORD_ENV.to_string(), root_password);
        env.insert(
            "MINIO_CONSOLE_ADDRESS".to_string(),
            CONSOLE_ADDRESS.to_string(),
        );
        if self.spec.proxy_frontend {
            env.insert(
                "MINIO_BROWSER_REDIRECT_URL".to_string(),
                format!("https://{}/{}", self.ctx.hostname, self.spec.name),
            );
        }

        artifacts
            .volumes
            .insert(DATA_VOLUME.to_string(), DATA_PATH.to_string());
        artifacts.command = Some(argv([
            "server",
            DATA_PATH,
            "--console-address",
            CONSOLE_ADDRESS,
        ]));
        Ok(artifacts)
    }

    async fn post_init(&self) -> Result<()> {
        self.wait_for().await?;

        for alias in DEFAULT_ALIASES {
            if let Err(e) = self.mc(&["alias", "remove", alias]).await {
                debug!("{}: alias {} not removed: {}", ADAPTER_TAG, alias, e);
            }
        }

        let root_password = self
            .ctx
            .engine
            .container_env(self.spec.container_name(), ROOT_PASSWORD_ENV)
            .await?;
        self.ctx
            .engine
            .exec(self.spec.container_name(), &self.alias_command(&root_password))
            .await?;
        info!("{}: alias {} registered", ADAPTER_TAG, self.alias());

        provision_users(self, &self.ctx.users().await).await;
        Ok(())
    }

    async fn create_user(&self, user: &User) -> Result<()> {
        self.create_account(user, "readwrite").await
    }

    async fn create_admin_user(&self, user: &User) -> Result<()> {
        self.create_account(user, "consoleAdmin").await
    }

    async fn backup(&self, dest: &Path) -> Result<()> {
        archive_out(
            &self.ctx,
            self.spec.container_name(),
            &[DATA_PATH],
            &backup_timestamp(),
            dest,
        )
        .await
    }

    /// Ready once the client can register an alias with the root credentials.
    async fn wait_for(&self) -> Result<()> {
        let container = self.spec.container_name();
        let root_password = self
            .ctx
            .engine
            .container_env(container, ROOT_PASSWORD_ENV)
            .await?;
        let engine = self.ctx.engine.as_ref();
        let command = &self.alias_command(&root_password);

        poll_until(container, READINESS, &self.ctx.cancel, || async move {
            engine.exec(container, command).await.map(|_| true)
        })
        .await?;

        info!("{} is ready", container);
        Ok(())
    }

    fn cleanup(&self) -> CleanupTargets {
        CleanupTargets {
            volumes: vec![DATA_VOLUME.to_string()],
            host_paths: Vec::new(),
        }
    }

    fn proxy_fragment(&self) -> String {
        let container = self.spec.container_name();
        format!(
            r#"# MinIO console
location /{name}/ {{
    rewrite ^/{name}/(.*) /$1 break;
    proxy_set_header Host $http_host;
    proxy_set_header X-Real-IP $remote_addr;
    proxy_set_header X-Forwarded-For $proxy_add_x_forwarded_for;
    proxy_set_header X-Forwarded-Proto $scheme;
    proxy_set_header X-NginX-Proxy true;
    proxy_set_header Accept-Encoding "";
    proxy_http_version 1.1;
    proxy_set_header Connection "";
    proxy_buffering off;
    proxy_pass http://{container}:9001/;
}}
# MinIO API
location /{name}-api/ {{
    proxy_pass http://{container}:9000;
    proxy_set_header Host $http_host;
    proxy_set_header X-Real-IP $remote_addr;
    proxy_set_header X-Forwarded-For $proxy_add_x_forwarded_for;
    proxy_set_header X-Forwarded-Proto $scheme;
    proxy_http_version 1.1;
    proxy_set_header Connection "";
    proxy_buffering off;
}}"#,
            name = self.spec.name,
        )
    }
}
