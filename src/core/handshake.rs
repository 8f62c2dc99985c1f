use crate::core::graph::BindingGraph;
use crate::core::handle::{framed, FramedChannel, PortStream, Sink};
use crate::domain::model::{Address, Binding, BindingId, PortId, PortRole};
use crate::domain::ports::{Host, Listener, Reservation};
use crate::utils::error::{Culprit, DeployError, FailureCause, Result};
use bytes::Bytes;
use futures::future::{try_join, try_join_all};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// sender 連上後送出的第一個 frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hello {
    pub attempt: u64,
    pub binding: BindingId,
}

impl Hello {
    fn encode(&self) -> std::result::Result<Bytes, FailureCause> {
        serde_json::to_vec(self)
            .map(Bytes::from)
            .map_err(|e| FailureCause::HandshakeFailed(format!("cannot encode hello: {}", e)))
    }

    fn decode(frame: &[u8]) -> std::result::Result<Self, FailureCause> {
        serde_json::from_slice(frame)
            .map_err(|e| FailureCause::HandshakeFailed(format!("malformed hello frame: {}", e)))
    }
}

/// 一次成功 handshake 的產物
#[derive(Debug, Default)]
pub struct Wiring {
    pub addresses: HashMap<PortId, Address>,
    pub sinks: HashMap<PortId, Sink>,
    pub streams: HashMap<PortId, PortStream>,
}

/// 把 Binding 圖解析成實際連線：先保留所有 receiver 位址（全域屏障），再並行 connect / accept
pub struct HandshakeEngine<'a> {
    deployment: &'a str,
    graph: &'a BindingGraph,
    hosts: &'a [Arc<dyn Host>],
    attempt: u64,
    timeout: Duration,
}

impl<'a> HandshakeEngine<'a> {
    pub fn new(
        deployment: &'a str,
        graph: &'a BindingGraph,
        hosts: &'a [Arc<dyn Host>],
        attempt: u64,
        timeout: Duration,
    ) -> Self {
        Self {
            deployment,
            graph,
            hosts,
            attempt,
            timeout,
        }
    }

    pub async fn run(&self) -> Result<Wiring> {
        let reservations = self.reserve_all().await?;
        tracing::debug!(
            "🔒 Reserved {} receiver address(es) for attempt {}",
            reservations.len(),
            self.attempt
        );

        let addresses: HashMap<PortId, Address> = reservations
            .iter()
            .map(|(port, reservation)| (*port, reservation.address.clone()))
            .collect();
        let exchanged = self.exchange(&addresses)?;

        let listeners = reservations
            .into_iter()
            .map(|(port, reservation)| (port, reservation.listener))
            .collect::<Vec<_>>();

        let wired = tokio::time::timeout(
            self.timeout,
            try_join(self.connect_all(exchanged), self.accept_all(listeners)),
        )
        .await
        .map_err(|_| DeployError::DeployFailed {
            culprit: Culprit::Deployment(self.deployment.to_string()),
            cause: FailureCause::Timeout(self.timeout),
        })?;
        let (outbound, inbound) = wired?;

        self.assemble(addresses, outbound, inbound)
    }

    /// 第一階段：每個 receiver port 都向所在 Host 保留位址，彼此獨立並行
    async fn reserve_all(&self) -> Result<Vec<(PortId, Reservation)>> {
        try_join_all(self.graph.receivers().map(|port| async move {
            let host = self.host_of(port)?;
            let reservation = host
                .reserve_address()
                .await
                .map_err(|cause| self.port_failure(port, cause))?;
            tracing::debug!(
                "📍 {} reserved {} on host `{}`",
                self.graph.qualified_name(port),
                reservation.address,
                host.name()
            );
            Ok::<_, DeployError>((port, reservation))
        }))
        .await
    }

    /// 將 receiver 位址序列化後交給每個 Binding 的 sender 端
    fn exchange(&self, addresses: &HashMap<PortId, Address>) -> Result<Vec<(Binding, Vec<u8>)>> {
        self.graph
            .bindings()
            .iter()
            .map(|binding| -> Result<(Binding, Vec<u8>)> {
                let address = addresses.get(&binding.receiver).ok_or_else(|| {
                    self.port_failure(
                        binding.receiver,
                        FailureCause::AllocationFailed("no address was reserved".to_string()),
                    )
                })?;
                Ok((*binding, address.to_wire()?))
            })
            .collect()
    }

    async fn connect_all(
        &self,
        exchanged: Vec<(Binding, Vec<u8>)>,
    ) -> Result<Vec<(Binding, Address, FramedChannel)>> {
        try_join_all(
            exchanged
                .into_iter()
                .map(|(binding, wire)| self.connect_binding(binding, wire)),
        )
        .await
    }

    async fn connect_binding(
        &self,
        binding: Binding,
        wire: Vec<u8>,
    ) -> Result<(Binding, Address, FramedChannel)> {
        let address = Address::from_wire(&wire)?;
        let host = self.host_of(binding.sender)?;

        let channel = host
            .connect(&address)
            .await
            .map_err(|cause| self.port_failure(binding.sender, cause))?;
        let mut channel = framed(channel);

        let hello = Hello {
            attempt: self.attempt,
            binding: binding.id,
        }
        .encode()
        .map_err(|cause| self.port_failure(binding.sender, cause))?;
        channel.send(hello).await.map_err(|e| {
            self.port_failure(
                binding.sender,
                FailureCause::ConnectFailed {
                    address: address.clone(),
                    reason: e.to_string(),
                },
            )
        })?;

        tracing::debug!(
            "🔗 {} connected to {} ({})",
            self.graph.qualified_name(binding.sender),
            self.graph.qualified_name(binding.receiver),
            address
        );
        Ok((binding, address, channel))
    }

    async fn accept_all(
        &self,
        listeners: Vec<(PortId, Box<dyn Listener>)>,
    ) -> Result<Vec<(PortId, Vec<(Binding, FramedChannel)>)>> {
        try_join_all(
            listeners
                .into_iter()
                .map(|(port, listener)| self.accept_port(port, listener)),
        )
        .await
    }

    /// 在單一 receiver 上接受恰好 in-degree 條連線，並以 hello 對應到 Binding
    async fn accept_port(
        &self,
        port: PortId,
        mut listener: Box<dyn Listener>,
    ) -> Result<(PortId, Vec<(Binding, FramedChannel)>)> {
        let mut pending: HashMap<BindingId, Binding> =
            self.graph.incoming(port).map(|b| (b.id, *b)).collect();
        let mut accepted = Vec::with_capacity(pending.len());

        while !pending.is_empty() {
            let channel = listener
                .accept()
                .await
                .map_err(|cause| self.port_failure(port, cause))?;
            let mut channel = framed(channel);

            let frame = match channel.next().await {
                Some(Ok(frame)) => frame,
                Some(Err(e)) => {
                    return Err(self.port_failure(port, FailureCause::HandshakeFailed(e.to_string())))
                }
                None => {
                    tracing::warn!(
                        "⚠️ {} dropped a connection that closed before saying hello",
                        self.graph.qualified_name(port)
                    );
                    continue;
                }
            };
            let hello = Hello::decode(&frame).map_err(|cause| self.port_failure(port, cause))?;

            if hello.attempt != self.attempt {
                tracing::warn!(
                    "⚠️ {} dropped a stale connection from attempt {} (current {})",
                    self.graph.qualified_name(port),
                    hello.attempt,
                    self.attempt
                );
                continue;
            }

            match pending.remove(&hello.binding) {
                Some(binding) => accepted.push((binding, channel)),
                None => {
                    return Err(self.port_failure(
                        port,
                        FailureCause::HandshakeFailed(format!(
                            "unexpected hello for {}",
                            hello.binding
                        )),
                    ))
                }
            }
        }

        Ok((port, accepted))
    }

    fn assemble(
        &self,
        addresses: HashMap<PortId, Address>,
        outbound: Vec<(Binding, Address, FramedChannel)>,
        inbound: Vec<(PortId, Vec<(Binding, FramedChannel)>)>,
    ) -> Result<Wiring> {
        let mut peers: HashMap<PortId, Vec<(Binding, Address, FramedChannel)>> = HashMap::new();
        for (binding, address, channel) in outbound {
            peers.entry(binding.sender).or_default().push((binding, address, channel));
        }

        let mut sinks = HashMap::new();
        for (port, spec) in self.graph.ports() {
            if spec.role != PortRole::Sender {
                continue;
            }
            let mut channels = peers.remove(&port).unwrap_or_default();
            channels.sort_by_key(|(binding, _, _)| binding.id);
            let channels = channels
                .into_iter()
                .map(|(binding, address, channel)| (binding.receiver, address, channel))
                .collect();
            sinks.insert(port, Sink::new(self.graph.qualified_name(port), channels));
        }

        let mut streams = HashMap::new();
        for (port, mut channels) in inbound {
            channels.sort_by_key(|(binding, _)| binding.id);
            let sources = channels
                .into_iter()
                .map(|(binding, channel)| (binding.sender, channel))
                .collect();
            streams.insert(port, PortStream::new(self.graph.qualified_name(port), sources));
        }

        Ok(Wiring {
            addresses,
            sinks,
            streams,
        })
    }

    fn host_of(&self, port: PortId) -> Result<&Arc<dyn Host>> {
        let host = self.graph.host_of(port)?;
        self.hosts
            .get(host.index())
            .ok_or_else(|| DeployError::UnknownEntity {
                kind: "host",
                id: host.to_string(),
            })
    }

    fn port_failure(&self, port: PortId, cause: FailureCause) -> DeployError {
        DeployError::DeployFailed {
            culprit: Culprit::Port(self.graph.qualified_name(port)),
            cause,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::localhost::TcpHost;
    use crate::domain::model::HostId;

    fn local_hosts() -> Vec<Arc<dyn Host>> {
        let host: Arc<dyn Host> = Arc::new(TcpHost::local("localhost"));
        vec![host]
    }

    #[test]
    fn test_hello_round_trips_as_json() {
        let hello = Hello {
            attempt: 3,
            binding: BindingId(7),
        };
        let encoded = hello.encode().unwrap();
        assert_eq!(&encoded[..], br#"{"attempt":3,"binding":7}"#);
        assert_eq!(Hello::decode(&encoded).unwrap(), hello);
        assert!(Hello::decode(b"not json").is_err());
    }

    #[tokio::test]
    async fn test_every_binding_is_wired() {
        let mut graph = BindingGraph::new();
        let a = graph.add_service("a", HostId(0)).unwrap();
        let b = graph.add_service("b", HostId(0)).unwrap();
        let out = graph.declare_port(a, "out", PortRole::Sender).unwrap();
        let input = graph.declare_port(b, "in", PortRole::Receiver).unwrap();
        let idle = graph.declare_port(b, "idle", PortRole::Receiver).unwrap();
        graph.send_to(out, input).unwrap();

        let hosts = local_hosts();
        let engine = HandshakeEngine::new("test", &graph, &hosts, 1, Duration::from_secs(5));
        let mut wiring = engine.run().await.unwrap();

        assert!(wiring.addresses.contains_key(&input));
        assert!(wiring.addresses.contains_key(&idle));
        assert!(!wiring.addresses.contains_key(&out));

        let mut sink = wiring.sinks.remove(&out).unwrap();
        assert_eq!(sink.addresses().next(), wiring.addresses.get(&input));
        let mut stream = wiring.streams.remove(&input).unwrap();
        sink.send(&b"ping"[..]).await.unwrap();
        assert_eq!(stream.next().await.unwrap().unwrap(), Bytes::from_static(b"ping"));

        let mut unbound = wiring.streams.remove(&idle).unwrap();
        assert!(unbound.next().await.is_none());
    }
}
