use crate::core::handle::ServicePorts;
use crate::domain::model::ServiceKind;
use crate::domain::ports::{Host, Service};
use crate::utils::broadcast::{LineBroadcast, LineStream};
use crate::utils::error::{DeployError, FailureCause, Result};
use async_trait::async_trait;
use futures::future::BoxFuture;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::UnboundedReceiverStream;

type Program = Box<dyn FnOnce(ServicePorts, StdoutWriter) -> BoxFuture<'static, anyhow::Result<()>> + Send>;

/// managed 程式的 stdout
#[derive(Debug, Clone)]
pub struct StdoutWriter {
    sender: mpsc::UnboundedSender<String>,
}

impl StdoutWriter {
    pub fn println(&self, line: impl Into<String>) {
        // 沒有人在讀時直接丟棄
        let _ = self.sender.send(line.into());
    }
}

#[derive(Default)]
struct Runtime {
    writer: Option<StdoutWriter>,
    broadcast: Option<LineBroadcast>,
    ports: Option<ServicePorts>,
    task: Option<JoinHandle<()>>,
}

/// 由部署引擎驅動的 service。程式只會在 `on_start` 被啟動，
/// 因此它的 sender 絕不會在 `start()` 之前送出資料。
pub struct ManagedService {
    name: String,
    program: Mutex<Option<Program>>,
    runtime: Mutex<Runtime>,
}

impl ManagedService {
    pub fn new<F, Fut>(name: impl Into<String>, program: F) -> Self
    where
        F: FnOnce(ServicePorts, StdoutWriter) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let program: Program = Box::new(move |ports, stdout| Box::pin(program(ports, stdout)));
        Self {
            name: name.into(),
            program: Mutex::new(Some(program)),
            runtime: Mutex::new(Runtime::default()),
        }
    }

    fn runtime(&self) -> MutexGuard<'_, Runtime> {
        self.runtime.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_running(&self) -> bool {
        self.runtime()
            .task
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }
}

#[async_trait]
impl Service for ManagedService {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ServiceKind {
        ServiceKind::Managed
    }

    async fn materialize(&self, host: Arc<dyn Host>) -> std::result::Result<(), FailureCause> {
        if self
            .program
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
        {
            return Err(FailureCause::ServiceMaterializeFailed(format!(
                "program of `{}` has already run",
                self.name
            )));
        }

        let mut runtime = self.runtime();
        if runtime.broadcast.is_some() {
            return Err(FailureCause::ServiceMaterializeFailed(format!(
                "`{}` is already materialized",
                self.name
            )));
        }

        let (sender, receiver) = mpsc::unbounded_channel();
        runtime.writer = Some(StdoutWriter { sender });
        runtime.broadcast = Some(LineBroadcast::spawn(
            self.name.clone(),
            UnboundedReceiverStream::new(receiver),
        ));
        tracing::debug!("Managed service `{}` materialized on `{}`", self.name, host.name());
        Ok(())
    }

    fn attach(&self, ports: ServicePorts) {
        self.runtime().ports = Some(ports);
    }

    async fn on_start(&self) -> Result<()> {
        let program = self
            .program
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or_else(|| DeployError::StartFailed {
                service: self.name.clone(),
                reason: "program has already run".to_string(),
            })?;

        let mut runtime = self.runtime();
        // 寫入端交給程式；程式結束時 stdout 隨之結束
        let writer = runtime.writer.take().ok_or(DeployError::NotDeployed {
            operation: "start a managed service",
        })?;
        let ports = runtime.ports.take().unwrap_or_default();

        let name = self.name.clone();
        runtime.task = Some(tokio::spawn(async move {
            match program(ports, writer).await {
                Ok(()) => tracing::info!("✅ Service `{}` finished", name),
                Err(e) => tracing::error!("❌ Service `{}` failed: {:#}", name, e),
            }
        }));
        tracing::debug!("▶️ Managed service `{}` started", self.name);
        Ok(())
    }

    async fn on_stop(&self) -> Result<()> {
        let mut runtime = self.runtime();
        if let Some(task) = runtime.task.take() {
            task.abort();
        }
        // 程式被中止後寫入端一併釋放，廣播會送完剩餘的行再結束
        runtime.writer = None;
        runtime.ports = None;
        Ok(())
    }

    fn stdout(&self) -> Result<LineStream> {
        self.runtime()
            .broadcast
            .as_ref()
            .map(LineBroadcast::subscribe)
            .ok_or(DeployError::NotDeployed {
                operation: "read stdout",
            })
    }

    fn dematerialize(&self) {
        let mut runtime = self.runtime();
        if let Some(task) = runtime.task.take() {
            task.abort();
        }
        *runtime = Runtime::default();
    }
}

impl Drop for ManagedService {
    fn drop(&mut self) {
        if let Some(task) = self.runtime().task.take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::localhost::TcpHost;
    use futures::StreamExt;

    fn host() -> Arc<dyn Host> {
        Arc::new(TcpHost::local("localhost"))
    }

    #[tokio::test]
    async fn test_program_runs_only_after_start() {
        let service = ManagedService::new("greeter", |_ports, stdout| async move {
            stdout.println("hello");
            Ok(())
        });

        assert!(matches!(service.stdout(), Err(DeployError::NotDeployed { .. })));
        service.materialize(host()).await.unwrap();
        let mut lines = service.stdout().unwrap();
        assert!(!service.is_running());

        service.on_start().await.unwrap();
        assert_eq!(lines.next().await.as_deref(), Some("hello"));
        assert_eq!(lines.next().await, None);
    }

    #[tokio::test]
    async fn test_program_runs_once() {
        let service = ManagedService::new("once", |_ports, _stdout| async move { Ok(()) });
        service.materialize(host()).await.unwrap();
        service.on_start().await.unwrap();
        assert!(matches!(
            service.on_start().await,
            Err(DeployError::StartFailed { .. })
        ));
    }

    #[tokio::test]
    async fn test_dematerialize_allows_materializing_again() {
        let service = ManagedService::new("retry", |_ports, _stdout| async move { Ok(()) });
        service.materialize(host()).await.unwrap();
        assert!(service.materialize(host()).await.is_err());

        service.dematerialize();
        assert!(service.stdout().is_err());
        assert!(service.materialize(host()).await.is_ok());
    }

    #[tokio::test]
    async fn test_stop_aborts_program() {
        let service = ManagedService::new("forever", |_ports, stdout| async move {
            stdout.println("up");
            futures::future::pending::<()>().await;
            Ok(())
        });
        service.materialize(host()).await.unwrap();
        let mut lines = service.stdout().unwrap();
        service.on_start().await.unwrap();
        assert_eq!(lines.next().await.as_deref(), Some("up"));

        service.on_stop().await.unwrap();
        assert_eq!(lines.next().await, None);
        assert!(!service.is_running());
    }
}
