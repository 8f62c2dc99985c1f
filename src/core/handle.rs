use crate::domain::model::{Address, PortId, PortRole};
use crate::domain::ports::Channel;
use crate::utils::error::{DeployError, Result};
use bytes::Bytes;
use futures::stream::SelectAll;
use futures::{SinkExt, Stream, StreamExt};
use std::collections::HashMap;
use std::fmt;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio_util::codec::{Framed, LengthDelimitedCodec};

/// 單一 payload 的上限，兩端的 codec 使用同一個值
pub const MAX_FRAME_LENGTH: usize = 8 * 1024 * 1024;

/// 以長度前綴切分 frame 的通道
pub type FramedChannel = Framed<Channel, LengthDelimitedCodec>;

pub fn framed(channel: Channel) -> FramedChannel {
    let codec = LengthDelimitedCodec::builder()
        .max_frame_length(MAX_FRAME_LENGTH)
        .new_codec();
    Framed::new(channel, codec)
}

/// Sink 連到的一個 receiver
struct Peer {
    receiver: PortId,
    address: Address,
    channel: FramedChannel,
    closed: bool,
}

/// Sender port 的寫入端。
///
/// 每個 Binding 對應一個 peer，依 Binding 順序排列。`send` 寫給所有仍存活的 peer；
/// `send_to` 只寫給指定的 receiver（keyed demux）。寫入失敗的 peer 會被標記為關閉，
/// 之後的 `send` 不再寫它。
pub struct Sink {
    port: String,
    peers: Vec<Peer>,
}

impl Sink {
    pub(crate) fn new(port: String, peers: Vec<(PortId, Address, FramedChannel)>) -> Self {
        let peers = peers
            .into_iter()
            .map(|(receiver, address, channel)| Peer {
                receiver,
                address,
                channel,
                closed: false,
            })
            .collect();
        Self { port, peers }
    }

    pub fn port(&self) -> &str {
        &self.port
    }

    pub fn addresses(&self) -> impl Iterator<Item = &Address> {
        self.peers.iter().map(|peer| &peer.address)
    }

    /// 依 Binding 順序列出連到的 receiver，可作為 `send_to` 的 key
    pub fn receivers(&self) -> impl Iterator<Item = PortId> + '_ {
        self.peers.iter().map(|peer| peer.receiver)
    }

    /// 送出一個 payload 並等到 flush 完成；fan-out 時依 Binding 順序寫給每個 receiver。
    /// 沒有任何 Binding 的 sink 直接丟棄 payload。
    ///
    /// 某個 receiver 寫入失敗時，其餘 receiver 仍會收到這個 payload，錯誤只列出失敗的位址。
    /// 因此收到 `ChannelClosed` 後重送，會讓存活的 receiver 收到重複的 payload。
    pub async fn send(&mut self, payload: impl Into<Bytes>) -> Result<()> {
        let payload = payload.into();
        self.check_size(&payload)?;
        if !self.peers.is_empty() && self.peers.iter().all(|peer| peer.closed) {
            return Err(DeployError::ChannelClosed {
                port: self.port.clone(),
                reason: "every receiver has shut down".to_string(),
            });
        }

        let mut failures = Vec::new();
        for peer in self.peers.iter_mut().filter(|peer| !peer.closed) {
            if let Err(e) = peer.channel.send(payload.clone()).await {
                peer.closed = true;
                failures.push(format!("{}: {}", peer.address, e));
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(DeployError::ChannelClosed {
                port: self.port.clone(),
                reason: failures.join("; "),
            })
        }
    }

    /// 只寫給 `receiver` 這條 Binding
    pub async fn send_to(&mut self, receiver: PortId, payload: impl Into<Bytes>) -> Result<()> {
        let payload = payload.into();
        self.check_size(&payload)?;
        let port = &self.port;
        let peer = self
            .peers
            .iter_mut()
            .find(|peer| peer.receiver == receiver)
            .ok_or_else(|| DeployError::UnknownEntity {
                kind: "binding",
                id: format!("{} -> {}", port, receiver),
            })?;
        if peer.closed {
            return Err(DeployError::ChannelClosed {
                port: port.clone(),
                reason: format!("{}: already shut down", peer.address),
            });
        }

        peer.channel.send(payload).await.map_err(|e| {
            peer.closed = true;
            DeployError::ChannelClosed {
                port: port.clone(),
                reason: format!("{}: {}", peer.address, e),
            }
        })
    }

    pub async fn close(mut self) -> Result<()> {
        for peer in self.peers.iter_mut().filter(|peer| !peer.closed) {
            SinkExt::<Bytes>::close(&mut peer.channel)
                .await
                .map_err(|e| DeployError::ChannelClosed {
                    port: self.port.clone(),
                    reason: format!("{}: {}", peer.address, e),
                })?;
        }
        Ok(())
    }

    fn check_size(&self, payload: &Bytes) -> Result<()> {
        if payload.len() > MAX_FRAME_LENGTH {
            return Err(DeployError::PayloadTooLarge {
                port: self.port.clone(),
                size: payload.len(),
                limit: MAX_FRAME_LENGTH,
            });
        }
        Ok(())
    }
}

impl fmt::Debug for Sink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sink")
            .field("port", &self.port)
            .field("peers", &self.addresses().collect::<Vec<_>>())
            .finish()
    }
}

type TaggedFrames = Pin<Box<dyn Stream<Item = io::Result<(PortId, Bytes)>> + Send + Sync>>;

/// Receiver port 的讀取端。
///
/// merge port 會把每個 sender 的子串流依到達順序合併；同一個 sender 的 payload 維持送出順序，
/// 不同 sender 之間沒有順序保證。所有 sender 關閉後串流結束。丟棄串流只釋放本端通道。
pub struct PortStream {
    port: String,
    inner: SelectAll<TaggedFrames>,
}

impl PortStream {
    pub(crate) fn new(port: String, sources: Vec<(PortId, FramedChannel)>) -> Self {
        let inner = futures::stream::select_all(sources.into_iter().map(|(sender, channel)| {
            let tagged = channel.map(move |frame| frame.map(|bytes| (sender, bytes.freeze())));
            Box::pin(tagged) as TaggedFrames
        }));
        Self { port, inner }
    }

    pub fn port(&self) -> &str {
        &self.port
    }

    /// 目前仍在傳送的 sender 數量
    pub fn live_senders(&self) -> usize {
        self.inner.len()
    }

    /// 改為附帶 sender PortId 的串流
    pub fn into_tagged(self) -> TaggedStream {
        TaggedStream { stream: self }
    }

    fn poll_tagged(&mut self, cx: &mut Context<'_>) -> Poll<Option<Result<(PortId, Bytes)>>> {
        match self.inner.poll_next_unpin(cx) {
            Poll::Ready(Some(Ok(item))) => Poll::Ready(Some(Ok(item))),
            Poll::Ready(Some(Err(e))) => Poll::Ready(Some(Err(DeployError::ChannelClosed {
                port: self.port.clone(),
                reason: e.to_string(),
            }))),
            Poll::Ready(None) => Poll::Ready(None),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Stream for PortStream {
    type Item = Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut()
            .poll_tagged(cx)
            .map(|item| item.map(|result| result.map(|(_, payload)| payload)))
    }
}

impl fmt::Debug for PortStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PortStream")
            .field("port", &self.port)
            .field("live_senders", &self.live_senders())
            .finish()
    }
}

pub struct TaggedStream {
    stream: PortStream,
}

impl Stream for TaggedStream {
    type Item = Result<(PortId, Bytes)>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().stream.poll_tagged(cx)
    }
}

#[derive(Debug)]
pub enum Connection {
    Sink(Sink),
    Stream(PortStream),
}

/// `server_port()` 的結果：已解析的位址加上尚未取出的 handle
#[derive(Debug)]
pub struct ServerPort {
    port: PortId,
    name: String,
    addresses: Vec<Address>,
    connection: Connection,
}

impl ServerPort {
    pub(crate) fn new(port: PortId, name: String, addresses: Vec<Address>, connection: Connection) -> Self {
        Self {
            port,
            name,
            addresses,
            connection,
        }
    }

    pub fn port(&self) -> PortId {
        self.port
    }

    /// receiver 為自己的位址；sender 為第一個對端 receiver 的位址
    pub fn address(&self) -> Option<&Address> {
        self.addresses.first()
    }

    pub fn addresses(&self) -> &[Address] {
        &self.addresses
    }

    pub fn into_sink(self) -> Result<Sink> {
        match self.connection {
            Connection::Sink(sink) => Ok(sink),
            Connection::Stream(_) => Err(DeployError::RoleMismatch {
                port: self.name,
                expected: PortRole::Sender,
                actual: PortRole::Receiver,
            }),
        }
    }

    pub fn into_stream(self) -> Result<PortStream> {
        match self.connection {
            Connection::Stream(stream) => Ok(stream),
            Connection::Sink(_) => Err(DeployError::RoleMismatch {
                port: self.name,
                expected: PortRole::Receiver,
                actual: PortRole::Sender,
            }),
        }
    }
}

/// managed service 的程式在啟動時拿到的 port 集合
#[derive(Debug, Default)]
pub struct ServicePorts {
    service: String,
    connections: HashMap<String, Connection>,
}

impl ServicePorts {
    pub(crate) fn new(service: String, connections: HashMap<String, Connection>) -> Self {
        Self {
            service,
            connections,
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.connections.contains_key(name)
    }

    pub fn take_sink(&mut self, name: &str) -> Result<Sink> {
        match self.take(name)? {
            Connection::Sink(sink) => Ok(sink),
            Connection::Stream(stream) => {
                self.connections.insert(name.to_string(), Connection::Stream(stream));
                Err(self.role_mismatch(name, PortRole::Sender, PortRole::Receiver))
            }
        }
    }

    pub fn take_stream(&mut self, name: &str) -> Result<PortStream> {
        match self.take(name)? {
            Connection::Stream(stream) => Ok(stream),
            Connection::Sink(sink) => {
                self.connections.insert(name.to_string(), Connection::Sink(sink));
                Err(self.role_mismatch(name, PortRole::Receiver, PortRole::Sender))
            }
        }
    }

    fn take(&mut self, name: &str) -> Result<Connection> {
        self.connections
            .remove(name)
            .ok_or_else(|| DeployError::HandleUnavailable {
                port: format!("{}.{}", self.service, name),
                reason: "no such port, or it was already taken".to_string(),
            })
    }

    fn role_mismatch(&self, name: &str, expected: PortRole, actual: PortRole) -> DeployError {
        DeployError::RoleMismatch {
            port: format!("{}.{}", self.service, name),
            expected,
            actual,
        }
    }
}
