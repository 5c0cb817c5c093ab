//! Vault adapter
//!
//! Vault starts sealed. Post-init initialises it with five key shares, keeps
//! the shares and the root token under `<home>/vaultadm`, unseals it and
//! sets up userpass authentication with an `admin` policy.

use async_trait::async_trait;
use serde::Deserialize;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use super::provisioning::{
    archive_out, backup_timestamp, exec_output_contains, location_block, provision_users,
};
use super::{CleanupTargets, RuntimeArtifacts, ServiceAdapter, ServiceContext};
use crate::config::{ServiceSpec, User};
use crate::engine::{argv, poll_until, RetryPolicy};
use crate::error::{Result, ServiceError};

const ADAPTER_TAG: &str = "vaultadm";
const KEY_SHARES: usize = 5;
const KEY_THRESHOLD: usize = 3;
const LOCAL_CONFIG_ENV: &str = "VAULT_LOCAL_CONFIG";
const LOCAL_CONFIG: &str = r#"{"storage":{"file":{"path":"/vault/file"}},"listener":[{"tcp":{"address":"0.0.0.0:8200","tls_disable":true}}],"default_lease_ttl":"168h","max_lease_ttl":"720h","ui":true}"#;
const LOCAL_ADDR: &str = "http://127.0.0.1:8200";
const STORAGE_PATH: &str = "/vault/file";
const ROOT_TOKEN_FILE: &str = ".root_token";
const READINESS: RetryPolicy = RetryPolicy::new(5, 30);

const ADMIN_POLICY: &str = r#"path "sys/*" {
  capabilities = ["create", "read", "update", "delete", "list", "sudo"]
}
path "secret/*" {
  capabilities = ["create", "read", "update", "delete", "list"]
}
"#;

/// Secrets returned by `vault operator init`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct VaultInit {
    #[serde(rename = "unseal_keys_b64")]
    pub unseal_keys: Vec<String>,
    pub root_token: String,
}

#[derive(Debug, Deserialize)]
struct VaultStatus {
    initialized: bool,
    sealed: bool,
}

/// Parse `vault operator init` output.
///
/// JSON (`-format=json`) is preferred; the human-readable table is accepted
/// as a fallback.
pub fn parse_init_output(output: &str) -> Result<VaultInit> {
    let init = match serde_json::from_str::<VaultInit>(output) {
        Ok(init) => init,
        Err(_) => {
            let mut unseal_keys = Vec::new();
            let mut root_token = String::new();
            for line in output.lines() {
                let Some((label, value)) = line.split_once(": ") else {
                    continue;
                };
                if label.contains("Unseal Key") {
                    unseal_keys.push(value.trim().to_string());
                } else if label.contains("Initial Root Token") {
                    root_token = value.trim().to_string();
                }
            }
            VaultInit {
                unseal_keys,
                root_token,
            }
        }
    };

    if init.root_token.is_empty() || init.unseal_keys.len() < KEY_THRESHOLD {
        return Err(ServiceError::provisioning(
            "vault",
            format!(
                "init output carried {} unseal key(s) and {} root token",
                init.unseal_keys.len(),
                if init.root_token.is_empty() { "no" } else { "a" }
            ),
        ));
    }
    Ok(init)
}

pub struct VaultAdapter {
    spec: ServiceSpec,
    ctx: ServiceContext,
}

impl VaultAdapter {
    pub fn new(spec: ServiceSpec, ctx: ServiceContext) -> Self {
        Self { spec, ctx }
    }

    fn secrets_dir(&self) -> PathBuf {
        self.ctx.paths.vault_dir()
    }

    async fn vault(&self, args: &[&str]) -> Result<Vec<u8>> {
        let mut command = argv(["vault"]);
        command.extend(args.iter().map(|arg| arg.to_string()));
        Ok(self
            .ctx
            .engine
            .exec_capture(self.spec.container_name(), &command)
            .await?)
    }

    async fn status(&self) -> Result<VaultStatus> {
        // `vault status` exits 2 while sealed but still prints the status
        let stdout = match self.vault(&["status", "-format=json"]).await {
            Ok(stdout) => stdout,
            Err(ServiceError::Engine(e)) if !e.exec_stdout().is_empty() => {
                e.exec_stdout().as_bytes().to_vec()
            }
            Err(e) => return Err(e),
        };
        Ok(serde_json::from_slice(&stdout)?)
    }

    /// Write the root token and the unseal shares (`.seal_1`..`.seal_5`)
    /// readable by the owner only.
    pub fn save_secrets(dir: &Path, init: &VaultInit) -> std::io::Result<()> {
        std::fs::create_dir_all(dir)?;
        write_secret(&dir.join(ROOT_TOKEN_FILE), &init.root_token)?;
        for (index, key) in init.unseal_keys.iter().enumerate() {
            write_secret(&dir.join(format!(".seal_{}", index + 1)), key)?;
        }
        Ok(())
    }

    /// Secrets saved by an earlier initialisation
    pub fn load_secrets(dir: &Path) -> std::io::Result<VaultInit> {
        let root_token = std::fs::read_to_string(dir.join(ROOT_TOKEN_FILE))?
            .trim()
            .to_string();
        let mut unseal_keys = Vec::new();
        for index in 1..=KEY_SHARES {
            match std::fs::read_to_string(dir.join(format!(".seal_{index}"))) {
                Ok(key) => unseal_keys.push(key.trim().to_string()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => break,
                Err(e) => return Err(e),
            }
        }
        Ok(VaultInit {
            unseal_keys,
            root_token,
        })
    }

    async fn initialize(&self) -> Result<VaultInit> {
        let shares = format!("-key-shares={KEY_SHARES}");
        let threshold = format!("-key-threshold={KEY_THRESHOLD}");
        let output = self
            .vault(&["operator", "init", "-format=json", &shares, &threshold])
            .await?;
        let init = parse_init_output(&String::from_utf8_lossy(&output))?;

        let dir = self.secrets_dir();
        match Self::save_secrets(&dir, &init) {
            Ok(()) => info!("{}: root token and unseal keys saved in {}", ADAPTER_TAG, dir.display()),
            Err(e) => {
                return Err(ServiceError::provisioning(
                    self.name(),
                    format!("could not save the vault secrets in {}: {e}", dir.display()),
                ))
            }
        }
        Ok(init)
    }

    async fn unseal_and_login(&self, init: &VaultInit) -> Result<()> {
        for key in init.unseal_keys.iter().take(KEY_THRESHOLD) {
            self.vault(&["operator", "unseal", key]).await?;
        }
        info!("{}: vault unsealed", ADAPTER_TAG);

        self.vault(&["login", "-no-print", &init.root_token]).await?;
        Ok(())
    }

    async fn configure_auth(&self) -> Result<()> {
        self.vault(&["auth", "enable", "userpass"]).await?;

        let container = self.spec.container_name();
        let policy_file = "/tmp/admin.hcl";
        let write_policy = format!("printf '%s' \"$1\" > {policy_file}");
        self.ctx
            .engine
            .exec(
                container,
                &argv(["sh", "-c", write_policy.as_str(), "sh", ADMIN_POLICY]),
            )
            .await?;
        self.vault(&["policy", "write", "admin", policy_file]).await?;
        if let Err(e) = self
            .ctx
            .engine
            .exec(container, &argv(["rm", "-f", policy_file]))
            .await
        {
            warn!("{}: could not remove {}: {}", ADAPTER_TAG, policy_file, e);
        }

        info!("{}: userpass enabled with admin policy", ADAPTER_TAG);
        Ok(())
    }
}

fn write_secret(path: &Path, value: &str) -> std::io::Result<()> {
    let mut options = std::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(path)?;
    // The creation mode does not apply to a file left by an earlier run
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        file.set_permissions(std::fs::Permissions::from_mode(0o600))?;
    }
    file.write_all(value.as_bytes())?;
    Ok(())
}

#[async_trait]
impl ServiceAdapter for VaultAdapter {
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
        let mut artifacts = RuntimeArtifacts::default();
        artifacts.cap_add.push("IPC_LOCK".to_string());
        artifacts.command = Some(argv(["server"]));
        artifacts
            .env
            .insert("VAULT_ADDR".to_string(), LOCAL_ADDR.to_string());
        if !self.spec.container.env.contains_key(LOCAL_CONFIG_ENV) {
            artifacts
                .env
                .insert(LOCAL_CONFIG_ENV.to_string(), LOCAL_CONFIG.to_string());
        }
        Ok(artifacts)
    }

    async fn post_init(&self) -> Result<()> {
        self.wait_for().await?;

        let status = self.status().await?;
        if status.initialized {
            info!("{}: vault already initialized", ADAPTER_TAG);
            if status.sealed {
                let init = Self::load_secrets(&self.secrets_dir()).map_err(|e| {
                    ServiceError::provisioning(self.name(), format!("sealed and no saved keys: {e}"))
                })?;
                self.unseal_and_login(&init).await?;
            }
            return Ok(());
        }

        let init = self.initialize().await?;
        self.unseal_and_login(&init).await?;
        self.configure_auth().await?;

        provision_users(self, &self.ctx.users().await).await;
        Ok(())
    }

    async fn create_user(&self, user: &User) -> Result<()> {
        let path = format!("auth/userpass/users/{}", user.username);
        let password = format!("password={}", user.password);
        self.vault(&["write", &path, &password]).await?;
        Ok(())
    }

    async fn create_admin_user(&self, user: &User) -> Result<()> {
        let path = format!("auth/userpass/users/{}", user.username);
        let password = format!("password={}", user.password);
        self.vault(&["write", &path, &password, "policies=admin"])
            .await?;
        Ok(())
    }

    async fn backup(&self, dest: &Path) -> Result<()> {
        archive_out(
            &self.ctx,
            self.spec.container_name(),
            &[STORAGE_PATH],
            &backup_timestamp(),
            dest,
        )
        .await
    }

    /// Ready once `vault status` answers, sealed or not.
    async fn wait_for(&self) -> Result<()> {
        let container = self.spec.container_name();
        let engine = self.ctx.engine.as_ref();
        let command = &argv(["vault", "status"]);

        poll_until(container, READINESS, &self.ctx.cancel, || async move {
            match engine.exec_capture(container, command).await {
                Ok(_) => Ok(true),
                Err(e) if exec_output_contains(&e, "Build Date") => Ok(true),
                Err(e) => Err(e),
            }
        })
        .await?;

        info!("{} is ready", container);
        Ok(())
    }

    fn cleanup(&self) -> CleanupTargets {
        CleanupTargets {
            volumes: Vec::new(),
            host_paths: vec![self.secrets_dir()],
        }
    }

    fn proxy_fragment(&self) -> String {
        location_block(
            "Vault",
            &self.spec.name,
            &format!("http://{}:8200/", self.spec.container_name()),
            &["proxy_http_version 1.1;", "proxy_set_header Upgrade $http_upgrade;"],
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TABLE_OUTPUT: &str = "\
Unseal Key 1: k1
Unseal Key 2: k2
Unseal Key 3: k3
Unseal Key 4: k4
Unseal Key 5: k5

Initial Root Token: hvs.root

Vault initialized with 5 key shares and a key threshold of 3.";

    #[test]
    fn test_parse_json_output() {
        let output = r#"{"unseal_keys_b64":["a","b","c","d","e"],"unseal_keys_hex":[],"unseal_shares":5,"unseal_threshold":3,"root_token":"hvs.json"}"#;
        let init = parse_init_output(output).unwrap();
        assert_eq!(init.unseal_keys, vec!["a", "b", "c", "d", "e"]);
        assert_eq!(init.root_token, "hvs.json");
    }

    #[test]
    fn test_parse_table_output() {
        let init = parse_init_output(TABLE_OUTPUT).unwrap();
        assert_eq!(init.unseal_keys, vec!["k1", "k2", "k3", "k4", "k5"]);
        assert_eq!(init.root_token, "hvs.root");
    }

    #[test]
    fn test_parse_rejects_incomplete_output() {
        assert!(parse_init_output("Unseal Key 1: k1\n").is_err());
        assert!(parse_init_output("").is_err());
    }

    #[test]
    fn test_secrets_round_trip_with_owner_only_mode() {
        let dir = tempfile::tempdir().unwrap();
        let init = parse_init_output(TABLE_OUTPUT).unwrap();

        VaultAdapter::save_secrets(dir.path(), &init).unwrap();
        assert_eq!(VaultAdapter::load_secrets(dir.path()).unwrap(), init);

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            for file in [".root_token", ".seal_1", ".seal_5"] {
                let mode = std::fs::metadata(dir.path().join(file))
                    .unwrap()
                    .permissions()
                    .mode();
                assert_eq!(mode & 0o777, 0o600, "{file}");
            }
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_overwritten_secrets_are_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        for file in [".root_token", ".seal_1"] {
            let path = dir.path().join(file);
            std::fs::write(&path, "stale").unwrap();
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o644)).unwrap();
        }

        let init = parse_init_output(TABLE_OUTPUT).unwrap();
        VaultAdapter::save_secrets(dir.path(), &init).unwrap();

        for file in [".root_token", ".seal_1"] {
            let path = dir.path().join(file);
            let mode = std::fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600, "{file}");
        }
        assert_eq!(VaultAdapter::load_secrets(dir.path()).unwrap(), init);
    }
}
