use crate::domain::model::{Address, HostKind};
use crate::domain::ports::{Channel, Host, Reservation};
use crate::utils::error::FailureCause;
use async_trait::async_trait;
use std::sync::Arc;

/// 只能發起連線的 Host 視圖：對外連線交給底層 Host，不保留任何入站位址
#[derive(Debug, Clone)]
pub struct ClientOnlyHost {
    name: String,
    inner: Arc<dyn Host>,
}

impl ClientOnlyHost {
    pub fn new(inner: Arc<dyn Host>) -> Self {
        Self {
            name: format!("{} (client only)", inner.name()),
            inner,
        }
    }
}

#[async_trait]
impl Host for ClientOnlyHost {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> HostKind {
        HostKind::ClientOnly
    }

    async fn reserve_address(&self) -> Result<Reservation, FailureCause> {
        Err(FailureCause::AllocationFailed(format!(
            "host `{}` cannot accept inbound connections",
            self.name
        )))
    }

    async fn connect(&self, address: &Address) -> Result<Channel, FailureCause> {
        self.inner.connect(address).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::localhost::TcpHost;

    #[tokio::test]
    async fn test_client_only_refuses_reservations_but_connects() {
        let local: Arc<dyn Host> = Arc::new(TcpHost::local("localhost"));
        let client = ClientOnlyHost::new(Arc::clone(&local));

        assert!(client.is_client_only());
        assert!(!local.is_client_only());
        assert!(matches!(
            client.reserve_address().await,
            Err(FailureCause::AllocationFailed(_))
        ));

        let mut reservation = local.reserve_address().await.unwrap();
        let (connected, accepted) = tokio::join!(
            client.connect(&reservation.address),
            reservation.listener.accept()
        );
        assert!(connected.is_ok());
        assert!(accepted.is_ok());
    }
}
