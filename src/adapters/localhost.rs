use crate::domain::model::{Address, HostKind, Transport};
use crate::domain::ports::{Channel, Host, Listener, Reservation};
use crate::utils::error::FailureCause;
use async_trait::async_trait;
use tokio::net::{TcpListener, TcpStream};

pub const LOOPBACK: &str = "127.0.0.1";

/// 以 TCP 提供連線能力的 Host。
///
/// `local` 綁定 loopback；`remote` 綁定指定介面並對外公布另一個位址
/// （例如 `0.0.0.0` 綁定、公布公網 IP）。機器本身的佈建不在這裡處理。
#[derive(Debug, Clone)]
pub struct TcpHost {
    name: String,
    kind: HostKind,
    bind_ip: String,
    advertise: String,
}

impl TcpHost {
    pub fn local(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: HostKind::Local,
            bind_ip: LOOPBACK.to_string(),
            advertise: LOOPBACK.to_string(),
        }
    }

    pub fn remote(name: impl Into<String>, bind_ip: impl Into<String>, advertise: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: HostKind::Remote,
            bind_ip: bind_ip.into(),
            advertise: advertise.into(),
        }
    }
}

/// 依位址的 transport 建立本機出發的連線
pub(crate) async fn dial(address: &Address) -> Result<Channel, FailureCause> {
    let failed = |e: std::io::Error| FailureCause::ConnectFailed {
        address: address.clone(),
        reason: e.to_string(),
    };
    match address.transport {
        Transport::Tcp => {
            let stream = TcpStream::connect((address.host.as_str(), address.port))
                .await
                .map_err(failed)?;
            if let Err(e) = stream.set_nodelay(true) {
                tracing::debug!("Cannot disable Nagle on {}: {}", address, e);
            }
            Ok(Box::new(stream))
        }
        #[cfg(unix)]
        Transport::Unix => {
            let stream = tokio::net::UnixStream::connect(&address.host)
                .await
                .map_err(failed)?;
            Ok(Box::new(stream))
        }
        #[cfg(not(unix))]
        Transport::Unix => Err(FailureCause::ConnectFailed {
            address: address.clone(),
            reason: "unix sockets are not available on this platform".to_string(),
        }),
    }
}

#[async_trait]
impl Host for TcpHost {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> HostKind {
        self.kind
    }

    async fn reserve_address(&self) -> Result<Reservation, FailureCause> {
        let listener = TcpListener::bind((self.bind_ip.as_str(), 0))
            .await
            .map_err(|e| {
                FailureCause::AllocationFailed(format!(
                    "cannot bind {} on host `{}`: {}",
                    self.bind_ip, self.name, e
                ))
            })?;
        let local = listener.local_addr().map_err(|e| {
            FailureCause::AllocationFailed(format!("listener on `{}` has no local address: {}", self.name, e))
        })?;

        Ok(Reservation {
            address: Address::tcp(self.advertise.clone(), local.port()),
            listener: Box::new(TcpAcceptor { listener }),
        })
    }

    async fn connect(&self, address: &Address) -> Result<Channel, FailureCause> {
        dial(address).await
    }
}

struct TcpAcceptor {
    listener: TcpListener,
}

#[async_trait]
impl Listener for TcpAcceptor {
    async fn accept(&mut self) -> Result<Channel, FailureCause> {
        let (stream, peer) = self
            .listener
            .accept()
            .await
            .map_err(|e| FailureCause::HandshakeFailed(format!("accept failed: {}", e)))?;
        tracing::debug!("Accepted connection from {}", peer);
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!("Cannot disable Nagle for {}: {}", peer, e);
        }
        Ok(Box::new(stream))
    }
}
