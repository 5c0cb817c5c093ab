//! Trivy server adapter. Stateless and without users.

use async_trait::async_trait;

use super::provisioning::location_block;
use super::{RuntimeArtifacts, ServiceAdapter, ServiceContext};
use crate::config::ServiceSpec;
use crate::engine::{argv, wait_for_container, RetryPolicy};
use crate::error::Result;

const ADAPTER_TAG: &str = "trivyadm";
const LISTEN: &str = "0.0.0.0:4954";
const READINESS: RetryPolicy = RetryPolicy::new(5, 30);

pub struct TrivyAdapter {
    spec: ServiceSpec,
    ctx: ServiceContext,
}

impl TrivyAdapter {
    pub fn new(spec: ServiceSpec, ctx: ServiceContext) -> Self {
        Self { spec, ctx }
    }
}

#[async_trait]
impl ServiceAdapter for TrivyAdapter {
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
        Ok(RuntimeArtifacts {
            command: Some(argv(["server", "--listen", LISTEN])),
            ..Default::default()
        })
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

    fn proxy_fragment(&self) -> String {
        location_block(
            "Trivy",
            &self.spec.name,
            &format!("http://{}:4954/", self.spec.container_name()),
            &[
                "proxy_http_version 1.1;",
                "proxy_set_header Upgrade $http_upgrade;",
                "proxy_set_header Connection \"upgrade\";",
            ],
        )
    }
}
