//! ClamAV adapter. No users and nothing to publish.

use async_trait::async_trait;

use super::provisioning::wait_for_command;
use super::{RuntimeArtifacts, ServiceAdapter, ServiceContext};
use crate::config::ServiceSpec;
use crate::engine::RetryPolicy;
use crate::error::Result;

const ADAPTER_TAG: &str = "clamavadm";
/// Signature databases load slowly on first start
const READINESS: RetryPolicy = RetryPolicy::new(10, 60);

pub struct ClamavAdapter {
    spec: ServiceSpec,
    ctx: ServiceContext,
}

impl ClamavAdapter {
    pub fn new(spec: ServiceSpec, ctx: ServiceContext) -> Self {
        Self { spec, ctx }
    }
}

#[async_trait]
impl ServiceAdapter for ClamavAdapter {
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
        Ok(RuntimeArtifacts::default())
    }

    async fn wait_for(&self) -> Result<()> {
        wait_for_command(
            &self.ctx,
            self.spec.container_name(),
            &["clamdcheck.sh"],
            READINESS,
        )
        .await
    }
}
