use crate::adapters::localhost::dial;
use crate::domain::model::{Address, HostKind};
use crate::domain::ports::{Channel, Host, Listener, Reservation};
use crate::utils::error::FailureCause;
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::net::UnixListener;

static NEXT_SOCKET: AtomicU64 = AtomicU64::new(0);

/// 以 Unix domain socket 接受連線的本機 Host。
///
/// 每次保留位址都在 socket 目錄下建立新的 socket 檔案，listener 釋放時一併刪除。
/// 對外連線和 `TcpHost` 一樣可以連到 TCP 或 Unix 位址。
#[derive(Debug, Clone)]
pub struct UnixHost {
    name: String,
    dir: PathBuf,
}

impl UnixHost {
    /// socket 放在系統暫存目錄
    pub fn new(name: impl Into<String>) -> Self {
        Self::in_dir(name, std::env::temp_dir())
    }

    pub fn in_dir(name: impl Into<String>, dir: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            dir: dir.into(),
        }
    }

    fn next_path(&self) -> PathBuf {
        self.dir.join(format!(
            "small-deploy-{}-{}.sock",
            std::process::id(),
            NEXT_SOCKET.fetch_add(1, Ordering::Relaxed)
        ))
    }
}

#[async_trait]
impl Host for UnixHost {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> HostKind {
        HostKind::Local
    }

    async fn reserve_address(&self) -> Result<Reservation, FailureCause> {
        let path = self.next_path();
        let display = path.to_str().map(str::to_string).ok_or_else(|| {
            FailureCause::AllocationFailed(format!("socket path {:?} is not valid UTF-8", path))
        })?;

        match std::fs::remove_file(&path) {
            Ok(()) => {
                let socket = &display;
                tracing::debug!("Removed stale socket {}", socket)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(FailureCause::AllocationFailed(format!(
                    "cannot clear {} on host `{}`: {}",
                    display, self.name, e
                )))
            }
        }

        let listener = UnixListener::bind(&path).map_err(|e| {
            FailureCause::AllocationFailed(format!("cannot bind {} on host `{}`: {}", display, self.name, e))
        })?;

        Ok(Reservation {
            address: Address::unix(display),
            listener: Box::new(UnixAcceptor { listener, path }),
        })
    }

    async fn connect(&self, address: &Address) -> Result<Channel, FailureCause> {
        dial(address).await
    }
}

struct UnixAcceptor {
    listener: UnixListener,
    path: PathBuf,
}

#[async_trait]
impl Listener for UnixAcceptor {
    async fn accept(&mut self) -> Result<Channel, FailureCause> {
        let (stream, _) = self
            .listener
            .accept()
            .await
            .map_err(|e| FailureCause::HandshakeFailed(format!("accept failed: {}", e)))?;
        tracing::debug!("Accepted connection on {}", self.path.display());
        Ok(Box::new(stream))
    }
}

impl Drop for UnixAcceptor {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            tracing::debug!("Cannot remove socket {}: {}", self.path.display(), e);
        }
    }
}
