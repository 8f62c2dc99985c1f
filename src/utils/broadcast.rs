use futures::{Stream, StreamExt};
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::UnboundedReceiverStream;

/// Service stdout 的訂閱端，來源結束時一併結束
pub struct LineStream {
    inner: Option<UnboundedReceiverStream<String>>,
}

impl LineStream {
    /// 立即結束的串流（custom service 沒有 stdout）
    pub fn empty() -> Self {
        Self { inner: None }
    }
}

impl Stream for LineStream {
    type Item = String;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<String>> {
        match self.get_mut().inner.as_mut() {
            Some(inner) => inner.poll_next_unpin(cx),
            None => Poll::Ready(None),
        }
    }
}

/// 訂閱者清單；`closed` 與清單共用同一把鎖，來源結束後不再接受新的訂閱者
#[derive(Default)]
struct Registry {
    senders: Vec<mpsc::UnboundedSender<String>>,
    closed: bool,
}

type Subscribers = Arc<Mutex<Registry>>;

/// 將一條行串流廣播給所有訂閱者；沒有訂閱者時交給 tracing
pub struct LineBroadcast {
    subscribers: Subscribers,
    task: JoinHandle<()>,
}

impl LineBroadcast {
    pub fn spawn<S>(label: impl Into<String>, mut lines: S) -> Self
    where
        S: Stream<Item = String> + Send + Unpin + 'static,
    {
        let label = label.into();
        let subscribers: Subscribers = Arc::new(Mutex::new(Registry::default()));
        let shared = Arc::clone(&subscribers);

        let task = tokio::spawn(async move {
            while let Some(line) = lines.next().await {
                let mut registry = shared.lock().unwrap_or_else(PoisonError::into_inner);
                registry.senders.retain(|sender| !sender.is_closed());

                let mut delivered = false;
                for sender in registry.senders.iter() {
                    delivered |= sender.send(line.clone()).is_ok();
                }

                if !delivered {
                    tracing::info!("[{}] {}", label, line);
                }
            }

            // 來源結束：放掉所有 sender，訂閱端隨之結束
            let mut registry = shared.lock().unwrap_or_else(PoisonError::into_inner);
            registry.closed = true;
            registry.senders.clear();
        });

        Self { subscribers, task }
    }

    pub fn subscribe(&self) -> LineStream {
        let (sender, receiver) = mpsc::unbounded_channel();
        let mut registry = self.subscribers.lock().unwrap_or_else(PoisonError::into_inner);
        if !registry.closed {
            registry.senders.push(sender);
        }
        drop(registry);
        LineStream {
            inner: Some(UnboundedReceiverStream::new(receiver)),
        }
    }
}

impl Drop for LineBroadcast {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_every_subscriber_receives_each_line() {
        let (tx, rx) = mpsc::unbounded_channel::<String>();
        let broadcast = LineBroadcast::spawn("svc", UnboundedReceiverStream::new(rx));

        let mut first = broadcast.subscribe();
        let mut second = broadcast.subscribe();

        tx.send("hello".to_string()).unwrap();
        assert_eq!(first.next().await.as_deref(), Some("hello"));
        assert_eq!(second.next().await.as_deref(), Some("hello"));
    }

    #[tokio::test]
    async fn test_subscribers_end_when_source_ends() {
        let (tx, rx) = mpsc::unbounded_channel::<String>();
        let broadcast = LineBroadcast::spawn("svc", UnboundedReceiverStream::new(rx));
        let mut lines = broadcast.subscribe();

        tx.send("last".to_string()).unwrap();
        drop(tx);

        assert_eq!(lines.next().await.as_deref(), Some("last"));
        assert_eq!(lines.next().await, None);
    }

    #[tokio::test]
    async fn test_late_subscriber_ends_after_source_ends() {
        let (tx, rx) = mpsc::unbounded_channel::<String>();
        let broadcast = LineBroadcast::spawn("svc", UnboundedReceiverStream::new(rx));
        let mut early = broadcast.subscribe();

        drop(tx);
        assert_eq!(early.next().await, None);

        // 來源已結束，但 task 可能尚未標記完成
        let mut late = broadcast.subscribe();
        assert_eq!(late.next().await, None);
    }

    #[tokio::test]
    async fn test_empty_stream_ends_immediately() {
        let mut lines = LineStream::empty();
        assert_eq!(lines.next().await, None);
    }
}
