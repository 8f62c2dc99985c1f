use crate::core::handle::ServicePorts;
use crate::domain::model::{Address, HostKind, ServiceKind};
use crate::utils::broadcast::LineStream;
use crate::utils::error::{FailureCause, Result};
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};

/// 已建立的雙向位元組通道
pub trait ChannelIo: AsyncRead + AsyncWrite + Send + Sync + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Sync + Unpin> ChannelIo for T {}

pub type Channel = Box<dyn ChannelIo>;

/// `reserve_address` 保留下來、正在監聽的端點
#[async_trait]
pub trait Listener: Send {
    async fn accept(&mut self) -> std::result::Result<Channel, FailureCause>;
}

pub struct Reservation {
    pub address: Address,
    pub listener: Box<dyn Listener>,
}

impl fmt::Debug for Reservation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reservation")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

/// Service 執行的位置
#[async_trait]
pub trait Host: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    fn kind(&self) -> HostKind;

    /// client-only 的 Host 只能作為 sender，無法保留入站位址
    fn is_client_only(&self) -> bool {
        self.kind() == HostKind::ClientOnly
    }

    async fn reserve_address(&self) -> std::result::Result<Reservation, FailureCause>;

    async fn connect(&self, address: &Address) -> std::result::Result<Channel, FailureCause>;
}

/// Service 的生命週期介面
#[async_trait]
pub trait Service: Send + Sync {
    fn name(&self) -> &str;

    fn kind(&self) -> ServiceKind;

    /// 在 Host 上準備好 service；可能是本地啟動，也可能是遠端佈建
    async fn materialize(&self, host: Arc<dyn Host>) -> std::result::Result<(), FailureCause>;

    /// 部署完成後交付已連線的 port（只有 managed service 會收到）
    fn attach(&self, _ports: ServicePorts) {}

    async fn on_start(&self) -> Result<()>;

    async fn on_stop(&self) -> Result<()>;

    fn stdout(&self) -> Result<LineStream>;

    /// 回滾用：同步釋放 materialize 取得的一切，可重複呼叫
    fn dematerialize(&self);
}
