use crate::domain::model::ServiceKind;
use crate::domain::ports::{Host, Service};
use crate::utils::broadcast::LineStream;
use crate::utils::error::{FailureCause, Result};
use async_trait::async_trait;
use std::sync::Arc;

/// 由呼叫端直接驅動的 service：部署後 handle 交回呼叫端，生命週期 hook 都是 no-op
#[derive(Debug, Clone)]
pub struct CustomService {
    name: String,
}

impl CustomService {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait]
impl Service for CustomService {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ServiceKind {
        ServiceKind::Custom
    }

    async fn materialize(&self, host: Arc<dyn Host>) -> std::result::Result<(), FailureCause> {
        tracing::debug!("Custom service `{}` placed on `{}`", self.name, host.name());
        Ok(())
    }

    async fn on_start(&self) -> Result<()> {
        Ok(())
    }

    async fn on_stop(&self) -> Result<()> {
        Ok(())
    }

    fn stdout(&self) -> Result<LineStream> {
        Ok(LineStream::empty())
    }

    fn dematerialize(&self) {}
}
