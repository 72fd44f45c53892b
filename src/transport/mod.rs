//! Transport abstraction between the client and the etcd gRPC services
//!
//! The watch subsystem only ever talks to [`WatchTransport`] and the
//! [`WatchStream`] it opens; unary calls go through [`KvTransport`]. The
//! production implementation is [`GrpcTransport`]; tests substitute an
//! in-memory transport or the generated mocks.

mod grpc;

pub use grpc::*;


#[cfg(test)]
use mockall::automock;
use tonic::async_trait;

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
use crate::Result;

/// Opens bidirectional watch streams
#[cfg_attr(test, automock)]
#[async_trait]
pub trait WatchTransport: Send + Sync + 'static {
    /// Open a fresh watch stream.
    ///
    /// A successful open does not imply the server is reachable: link failures
    /// may surface later from [`WatchStream::recv`].
    async fn open_stream(&self) -> Result<Box<dyn WatchStream>>;
}

/// One transport-level bidirectional watch stream
#[cfg_attr(test, automock)]
#[async_trait]
pub trait WatchStream: Send + 'static {
    async fn send(
        &mut self,
        request: WatchRequest,
    ) -> Result<()>;

    /// Next inbound frame.
    ///
    /// `Ok(None)` means the server ended the stream; `Err` is a transport failure.
    /// Must be cancel safe: the caller polls it inside `select!`.
    async fn recv(&mut self) -> Result<Option<WatchResponse>>;

    /// Release the underlying resources. Calling it twice is harmless.
    async fn close(&mut self);
}

/// Unary calls against the KV, Lease and Cluster services
#[cfg_attr(test, automock)]
#[async_trait]
pub trait KvTransport: Send + Sync + 'static {
    async fn range(
        &self,
        request: RangeRequest,
    ) -> Result<RangeResponse>;

    async fn put(
        &self,
        request: PutRequest,
    ) -> Result<PutResponse>;

    async fn delete_range(
        &self,
        request: DeleteRangeRequest,
    ) -> Result<DeleteRangeResponse>;

    async fn compact(
        &self,
        request: CompactionRequest,
    ) -> Result<CompactionResponse>;

    async fn lease_grant(
        &self,
        request: LeaseGrantRequest,
    ) -> Result<LeaseGrantResponse>;

    async fn lease_revoke(
        &self,
        request: LeaseRevokeRequest,
    ) -> Result<LeaseRevokeResponse>;

    /// A single keep-alive round trip
    async fn lease_keep_alive(
        &self,
        request: LeaseKeepAliveRequest,
    ) -> Result<LeaseKeepAliveResponse>;

    async fn member_list(
        &self,
        request: MemberListRequest,
    ) -> Result<MemberListResponse>;
}
