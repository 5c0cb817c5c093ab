//! Reverse proxy adapter
//!
//! Renders one server configuration from the location fragments of every
//! enabled, proxied service and bind-mounts it into the nginx container.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::{build_adapter, CleanupTargets, RuntimeArtifacts, ServiceAdapter, ServiceContext};
use crate::config::ServiceSpec;
use crate::engine::{wait_for_container, RetryPolicy};
use crate::error::Result;

const ADAPTER_TAG: &str = "nginxadm";
const CONF_FILE: &str = "nginx.conf";
const CONF_MOUNT: &str = "/etc/nginx/conf.d/default.conf:Z";
const CERTIFICATE: &str = "/etc/ssl/certs/svcadm.crt";
const CERTIFICATE_KEY: &str = "/etc/ssl/private/svcadm.key";
const READINESS: RetryPolicy = RetryPolicy::new(5, 60);

pub struct NginxAdapter {
    spec: ServiceSpec,
    ctx: ServiceContext,
}

impl NginxAdapter {
    pub fn new(spec: ServiceSpec, ctx: ServiceContext) -> Self {
        Self { spec, ctx }
    }

    pub fn conf_path(&self) -> PathBuf {
        self.ctx.paths.nginx_dir().join(CONF_FILE)
    }

    /// Fragments of every enabled service published behind the proxy
    async fn collect_locations(&self) -> Result<Vec<String>> {
        let mut locations = Vec::new();
        for spec in self.ctx.enabled_services().await {
            if !spec.proxy_frontend || spec.name == self.spec.name {
                continue;
            }
            debug!("{}: adding location for {}", ADAPTER_TAG, spec.name);
            let fragment = build_adapter(spec, self.ctx.clone())?.proxy_fragment();
            if !fragment.is_empty() {
                locations.push(fragment);
            }
        }
        Ok(locations)
    }
}

/// The complete server configuration for `hostname`
pub fn render_config(hostname: &str, locations: &[String]) -> String {
    let body: String = locations
        .iter()
        .map(|location| indent(location, 4) + "\n")
        .collect();

    format!(
        r#"server {{
    listen 80;
    listen [::]:80;
    server_name {hostname};
    return 301 https://$host$request_uri;
}}

map $http_upgrade $connection_upgrade {{
    default upgrade;
    ''      "";
}}

server {{
    listen 443 ssl;
    listen [::]:443 ssl;
    server_name {hostname};
    ssl_certificate {CERTIFICATE};
    ssl_certificate_key {CERTIFICATE_KEY};
    ssl_protocols TLSv1.2 TLSv1.3;
    ssl_ciphers HIGH:!aNULL:!MD5;

{body}}}
"#
    )
}

fn indent(text: &str, width: usize) -> String {
    let pad = " ".repeat(width);
    text.lines()
        .map(|line| {
            if line.is_empty() {
                String::new()
            } else {
                format!("{pad}{line}")
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

async fn write_config(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, contents).await?;
    Ok(())
}

#[async_trait]
impl ServiceAdapter for NginxAdapter {
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
        let locations = self.collect_locations().await?;
        let path = self.conf_path();
        write_config(&path, &render_config(&self.ctx.hostname, &locations)).await?;
        info!(
            "{}: rendered {} location(s) into {}",
            ADAPTER_TAG,
            locations.len(),
            path.display()
        );

        let mut artifacts = RuntimeArtifacts::default();
        artifacts
            .volumes
            .insert(path.display().to_string(), CONF_MOUNT.to_string());
        Ok(artifacts)
    }

    async fn wait_for(&self) -> Result<()> {
        wait_for_container(
            self.ctx.engine.as_ref(),
            self.spec.container_name(),
            READINESS,
            &self.ctx.cancel,
        )
        .await?;
        Ok(())
    }

    fn cleanup(&self) -> CleanupTargets {
        CleanupTargets {
            volumes: Vec::new(),
            host_paths: vec![self.ctx.paths.nginx_dir()],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_indents_locations() {
        let config = render_config(
            "dev.local",
            &["# Vault\nlocation /vault/ {\n    proxy_pass http://v:8200/;\n}".to_string()],
        );

        assert!(config.contains("server_name dev.local;"));
        assert!(config.contains("\n    location /vault/ {\n        proxy_pass http://v:8200/;\n    }\n}"));
        assert!(config.contains("ssl_certificate /etc/ssl/certs/svcadm.crt;"));
    }

    #[test]
    fn test_render_without_locations() {
        let config = render_config("dev.local", &[]);
        assert!(config.ends_with("ssl_ciphers HIGH:!aNULL:!MD5;\n\n}\n"));
    }
}
