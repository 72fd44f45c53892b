//! gRPC transport backed by a single tonic [`Channel`].
//!
//! Watch streams are opened on a dedicated forwarding task so that the caller
//! can queue create requests before the server sends response headers.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tonic::async_trait;
use tonic::codec::CompressionEncoding;
use tonic::transport::Channel;
use tonic::transport::Endpoint;
use tracing::debug;
use tracing::trace;
use tracing::warn;

use super::KvTransport;
use super::WatchStream;
use super::WatchTransport;
use crate::proto::etcdserverpb::cluster_client::ClusterClient;
use crate::proto::etcdserverpb::kv_client::KvClient;
use crate::proto::etcdserverpb::lease_client::LeaseClient;
use crate::proto::etcdserverpb::watch_client::WatchClient;
use crate::proto::etcdserverpb::CompactionRequest;
use crate::proto::etcdserverpb::CompactionResponse;
use crate::proto::etcdserverpb::DeleteRangeRequest;
use crate::proto::etcdserverpb::DeleteRangeResponse;
use crate::proto::etcdserverpb::LeaseGrantRequest;
use crate::proto::etcdserverpb::LeaseGrantResponse;
use crate::proto::etcdserverpb::LeaseKeepAliveRequest;
use crate::proto::etcdserverpb::LeaseKeepAliveResponse;
use crate::proto::etcdserverpb::LeaseRevokeRequest;
use crate::proto::etcdserverpb::LeaseRevokeResponse;
use crate::proto::etcdserverpb::MemberListRequest;
use crate::proto::etcdserverpb::MemberListResponse;
use crate::proto::etcdserverpb::PutRequest;
use crate::proto::etcdserverpb::PutResponse;
use crate::proto::etcdserverpb::RangeRequest;
use crate::proto::etcdserverpb::RangeResponse;
use crate::proto::etcdserverpb::WatchRequest;
use crate::proto::etcdserverpb::WatchResponse;
use crate::scoped_timer::ScopedTimer;
use crate::utils::address_str;
use crate::Error;
use crate::NetworkConfig;
use crate::NetworkError;
use crate::Result;
use crate::WatchError;

/// Frames buffered in each direction of a watch stream
const WATCH_STREAM_BUFFER: usize = 128;

#[derive(Debug, Clone)]
pub struct GrpcTransport {
    channel: Channel,
    endpoint: String,
    enable_compression: bool,
}

impl GrpcTransport {
    /// Connect to the first reachable endpoint.
    ///
    /// Endpoints are tried in random order so that a fleet of clients spreads
    /// over the cluster members.
    pub async fn connect(
        endpoints: &[String],
        config: &NetworkConfig,
    ) -> Result<Self> {
        let mut candidates: Vec<String> = endpoints.iter().map(|e| address_str(e)).collect();
        let mut rng = StdRng::from_entropy();
        candidates.shuffle(&mut rng);

        for addr in candidates {
            match Self::create_channel(addr.clone(), config).await {
                Ok(channel) => {
                    debug!(endpoint = %addr, "connected");
                    return Ok(Self {
                        channel,
                        endpoint: addr,
                        enable_compression: config.enable_compression,
                    });
                }
                Err(e) => {
                    warn!(endpoint = %addr, error = %e, "endpoint unreachable");
                }
            }
        }

        Err(NetworkError::NoEndpointAvailable(endpoints.to_vec()).into())
    }

    pub(crate) async fn create_channel(
        addr: String,
        config: &NetworkConfig,
    ) -> Result<Channel> {
        trace!("create_channel, addr = {:?}", &addr);
        let endpoint = Endpoint::try_from(addr.clone()).map_err(|_| NetworkError::InvalidURI(addr))?;
        endpoint
            .connect_timeout(config.connect_timeout())
            .timeout(config.request_timeout())
            .tcp_keepalive(Some(config.tcp_keepalive()))
            .http2_keep_alive_interval(config.http2_keep_alive_interval())
            .keep_alive_timeout(config.http2_keep_alive_timeout())
            .connect()
            .await
            .map_err(Into::into)
    }

    /// The endpoint this transport ended up connected to
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn kv_client(&self) -> KvClient<Channel> {
        let client = KvClient::new(self.channel.clone());
        if self.enable_compression {
            client
                .send_compressed(CompressionEncoding::Gzip)
                .accept_compressed(CompressionEncoding::Gzip)
        } else {
            client
        }
    }

    fn lease_client(&self) -> LeaseClient<Channel> {
        let client = LeaseClient::new(self.channel.clone());
        if self.enable_compression {
            client
                .send_compressed(CompressionEncoding::Gzip)
                .accept_compressed(CompressionEncoding::Gzip)
        } else {
            client
        }
    }

    fn cluster_client(&self) -> ClusterClient<Channel> {
        let client = ClusterClient::new(self.channel.clone());
        if self.enable_compression {
            client
                .send_compressed(CompressionEncoding::Gzip)
                .accept_compressed(CompressionEncoding::Gzip)
        } else {
            client
        }
    }

    fn watch_client(&self) -> WatchClient<Channel> {
        let client = WatchClient::new(self.channel.clone());
        if self.enable_compression {
            client
                .send_compressed(CompressionEncoding::Gzip)
                .accept_compressed(CompressionEncoding::Gzip)
        } else {
            client
        }
    }
}

#[async_trait]
impl WatchTransport for GrpcTransport {
    async fn open_stream(&self) -> Result<Box<dyn WatchStream>> {
        let (outbound_tx, outbound_rx) = mpsc::channel(WATCH_STREAM_BUFFER);
        let (inbound_tx, inbound_rx) = mpsc::channel(WATCH_STREAM_BUFFER);
        let mut client = self.watch_client();

        let task = tokio::spawn(async move {
            let mut inbound = match client.watch(ReceiverStream::new(outbound_rx)).await {
                Ok(response) => response.into_inner(),
                Err(status) => {
                    let _ = inbound_tx.send(Err(status)).await;
                    return;
                }
            };

            loop {
                match inbound.message().await {
                    Ok(Some(frame)) => {
                        if inbound_tx.send(Ok(frame)).await.is_err() {
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(status) => {
                        let _ = inbound_tx.send(Err(status)).await;
                        break;
                    }
                }
            }
            trace!("watch forwarding task exited");
        });

        Ok(Box::new(GrpcWatchStream {
            outbound: Some(outbound_tx),
            inbound: inbound_rx,
            task: Some(task),
        }))
    }
}

/// A watch RPC driven by a forwarding task
pub struct GrpcWatchStream {
    outbound: Option<mpsc::Sender<WatchRequest>>,
    inbound: mpsc::Receiver<std::result::Result<WatchResponse, tonic::Status>>,
    task: Option<JoinHandle<()>>,
}

#[async_trait]
impl WatchStream for GrpcWatchStream {
    async fn send(
        &mut self,
        request: WatchRequest,
    ) -> Result<()> {
        let Some(outbound) = &self.outbound else {
            return Err(WatchError::StreamClosed.into());
        };
        outbound
            .send(request)
            .await
            .map_err(|_| Error::Network(NetworkError::StreamEnded))
    }

    async fn recv(&mut self) -> Result<Option<WatchResponse>> {
        match self.inbound.recv().await {
            Some(Ok(frame)) => Ok(Some(frame)),
            Some(Err(status)) => Err(status.into()),
            None => Ok(None),
        }
    }

    async fn close(&mut self) {
        self.outbound.take();
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.inbound.close();
    }
}

impl Drop for GrpcWatchStream {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

#[async_trait]
impl KvTransport for GrpcTransport {
    async fn range(
        &self,
        request: RangeRequest,
    ) -> Result<RangeResponse> {
        let _timer = ScopedTimer::new("grpc::range");
        let response = self.kv_client().range(request).await?;
        Ok(response.into_inner())
    }

    async fn put(
        &self,
        request: PutRequest,
    ) -> Result<PutResponse> {
        let _timer = ScopedTimer::new("grpc::put");
        let response = self.kv_client().put(request).await?;
        Ok(response.into_inner())
    }

    async fn delete_range(
        &self,
        request: DeleteRangeRequest,
    ) -> Result<DeleteRangeResponse> {
        let _timer = ScopedTimer::new("grpc::delete_range");
        let response = self.kv_client().delete_range(request).await?;
        Ok(response.into_inner())
    }

    async fn compact(
        &self,
        request: CompactionRequest,
    ) -> Result<CompactionResponse> {
        let _timer = ScopedTimer::new("grpc::compact");
        let response = self.kv_client().compact(request).await?;
        Ok(response.into_inner())
    }

    async fn lease_grant(
        &self,
        request: LeaseGrantRequest,
    ) -> Result<LeaseGrantResponse> {
        let response = self.lease_client().lease_grant(request).await?;
        Ok(response.into_inner())
    }

    async fn lease_revoke(
        &self,
        request: LeaseRevokeRequest,
    ) -> Result<LeaseRevokeResponse> {
        let response = self.lease_client().lease_revoke(request).await?;
        Ok(response.into_inner())
    }

    async fn lease_keep_alive(
        &self,
        request: LeaseKeepAliveRequest,
    ) -> Result<LeaseKeepAliveResponse> {
        let mut inbound = self
            .lease_client()
            .lease_keep_alive(tokio_stream::once(request))
            .await?
            .into_inner();

        match inbound.message().await? {
            Some(response) => Ok(response),
            None => Err(NetworkError::StreamEnded.into()),
        }
    }

    async fn member_list(
        &self,
        request: MemberListRequest,
    ) -> Result<MemberListResponse> {
        let response = self.cluster_client().member_list(request).await?;
        Ok(response.into_inner())
    }
}
