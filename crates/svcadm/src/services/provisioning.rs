//! Helpers shared by the adapters: user provisioning, readiness probes run
//! inside containers, backup naming and proxy fragments.

use serde_json::Value;
use tracing::{debug, error, info};

use super::{ServiceAdapter, ServiceContext};
use crate::config::UserSet;
use crate::engine::{argv, poll_until, EngineError, RetryPolicy};
use crate::error::Result;

/// Create every admin, then every user. Failures are logged and do not stop
/// the remaining users.
pub async fn provision_users<A>(adapter: &A, users: &UserSet)
where
    A: ServiceAdapter + ?Sized,
{
    for admin in &users.admins {
        match adapter.create_admin_user(admin).await {
            Ok(()) => debug!("{}: created admin {}", adapter.adapter_tag(), admin.username),
            Err(e) => error!(
                "{}: could not create admin {}: {}",
                adapter.adapter_tag(),
                admin.username,
                e
            ),
        }
    }

    for user in &users.users {
        match adapter.create_user(user).await {
            Ok(()) => debug!("{}: created user {}", adapter.adapter_tag(), user.username),
            Err(e) => error!(
                "{}: could not create user {}: {}",
                adapter.adapter_tag(),
                user.username,
                e
            ),
        }
    }

    info!(
        "{}: provisioned {} admin(s) and {} user(s)",
        adapter.adapter_tag(),
        users.admins.len(),
        users.users.len()
    );
}

/// Poll until `command` exits zero inside `container`.
pub async fn wait_for_command(
    ctx: &ServiceContext,
    container: &str,
    command: &[&str],
    policy: RetryPolicy,
) -> Result<()> {
    let engine = ctx.engine.as_ref();
    let command = &argv(command.iter().copied());

    poll_until(container, policy, &ctx.cancel, || async move {
        engine.exec(container, command).await.map(|_| true)
    })
    .await?;

    info!("{} is ready", container);
    Ok(())
}

/// Poll until `command` prints a JSON object whose `field` equals `expected`.
pub async fn wait_for_json_field(
    ctx: &ServiceContext,
    container: &str,
    command: &[&str],
    field: &str,
    expected: &str,
    policy: RetryPolicy,
) -> Result<()> {
    let engine = ctx.engine.as_ref();
    let command = &argv(command.iter().copied());

    poll_until(container, policy, &ctx.cancel, || async move {
        let stdout = engine.exec_capture(container, command).await?;
        Ok(json_field(&stdout, field).as_deref() == Some(expected))
    })
    .await?;

    info!("{} is ready", container);
    Ok(())
}

/// String value of a top-level field of a JSON object.
pub fn json_field(body: &[u8], field: &str) -> Option<String> {
    let value: Value = serde_json::from_slice(body).ok()?;
    value.get(field)?.as_str().map(str::to_string)
}

/// Id of the entry in `body[collection]` whose `key` equals `value`.
///
/// Ids may be numbers or strings depending on the endpoint.
pub fn nested_id(body: &[u8], collection: &str, key: &str, value: &str) -> Option<String> {
    let parsed: Value = serde_json::from_slice(body).ok()?;
    parsed
        .get(collection)?
        .as_array()?
        .iter()
        .find(|entry| entry.get(key).and_then(Value::as_str) == Some(value))
        .and_then(|entry| match entry.get("id")? {
            Value::String(id) => Some(id.clone()),
            Value::Number(id) => Some(id.to_string()),
            _ => None,
        })
}

/// Timestamp used to name backup files
pub fn backup_timestamp() -> String {
    chrono::Local::now().format("%Y-%m-%d-%H-%M-%S").to_string()
}

/// Archive `paths` into `/tmp/<name>.tar.gz` inside the container, copy it
/// under `dest` and remove it from the container.
pub async fn archive_out(
    ctx: &ServiceContext,
    container: &str,
    paths: &[&str],
    name: &str,
    dest: &std::path::Path,
) -> Result<()> {
    let archive = format!("/tmp/{name}.tar.gz");
    let mut command = argv(["tar", "-czf", archive.as_str()]);
    command.extend(paths.iter().map(|p| p.to_string()));

    ctx.engine.exec(container, &command).await?;
    tokio::fs::create_dir_all(dest).await?;
    ctx.engine.copy_out(container, &archive, dest).await?;

    if let Err(e) = ctx
        .engine
        .exec(container, &argv(["rm", "-f", archive.as_str()]))
        .await
    {
        debug!("Could not remove {} from {}: {}", archive, container, e);
    }

    info!("Archived {} of {} into {}", paths.join(", "), container, dest.display());
    Ok(())
}

/// Headers shared by every proxied location
const FORWARDED_HEADERS: &str = "\
    proxy_set_header Host $host;
    proxy_set_header X-Real-IP $remote_addr;
    proxy_set_header X-Forwarded-For $proxy_add_x_forwarded_for;
    proxy_set_header X-Forwarded-Proto $scheme;";

/// A `location /<path>/` block forwarding to `upstream`, with `extra`
/// directives appended.
pub fn location_block(title: &str, path: &str, upstream: &str, extra: &[&str]) -> String {
    let mut block = format!("# {title}\nlocation /{path}/ {{\n    proxy_pass {upstream};\n");
    block.push_str(FORWARDED_HEADERS);
    block.push('\n');
    for directive in extra {
        block.push_str("    ");
        block.push_str(directive);
        block.push('\n');
    }
    block.push('}');
    block
}

/// Whether an exec failure printed `marker` on stdout
pub fn exec_output_contains(err: &EngineError, marker: &str) -> bool {
    err.exec_stdout().contains(marker)
}
