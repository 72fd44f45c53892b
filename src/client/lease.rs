use tracing::debug;

use super::Client;
use crate::proto::etcdserverpb::LeaseGrantRequest;
use crate::proto::etcdserverpb::LeaseKeepAliveRequest;
use crate::proto::etcdserverpb::LeaseRevokeRequest;
use crate::Error;
use crate::Result;

/// A granted lease and its remaining time to live
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Lease {
    pub id: i64,
    /// Seconds; 0 or less once the lease has expired
    pub ttl: i64,
}

impl Lease {
    pub fn is_expired(&self) -> bool {
        self.ttl <= 0
    }
}

impl Client {
    /// Grant a lease with a server-chosen id
    pub async fn lease_grant(
        &self,
        ttl: i64,
    ) -> Result<Lease> {
        if ttl <= 0 {
            return Err(Error::InvalidArgument(format!("lease ttl must be positive, got {ttl}")));
        }

        let response = self.kv().lease_grant(LeaseGrantRequest { ttl, id: 0 }).await?;
        if !response.error.is_empty() {
            return Err(Error::InvalidArgument(response.error));
        }
        debug!(lease_id = response.id, ttl = response.ttl, "lease granted");
        Ok(Lease {
            id: response.id,
            ttl: response.ttl,
        })
    }

    /// Revoke a lease, deleting every key attached to it
    pub async fn lease_revoke(
        &self,
        id: i64,
    ) -> Result<()> {
        self.kv().lease_revoke(LeaseRevokeRequest { id }).await?;
        debug!(lease_id = id, "lease revoked");
        Ok(())
    }

    /// Refresh a lease once
    ///
    /// There is no background keep-alive loop; callers that need one schedule
    /// this themselves, well inside the ttl.
    pub async fn lease_keep_alive_once(
        &self,
        id: i64,
    ) -> Result<Lease> {
        let response = self.kv().lease_keep_alive(LeaseKeepAliveRequest { id }).await?;
        Ok(Lease {
            id: response.id,
            ttl: response.ttl,
        })
    }
}
