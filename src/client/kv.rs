use bytes::Bytes;
use tracing::debug;
use tracing::error;

use super::Client;
use crate::proto::etcdserverpb::CompactionRequest;
use crate::proto::etcdserverpb::DeleteRangeRequest;
use crate::proto::etcdserverpb::PutRequest;
use crate::proto::etcdserverpb::RangeRequest;
use crate::proto::mvccpb::KeyValue;
use crate::scoped_timer::ScopedTimer;
use crate::utils::prefix_range_end;
use crate::Error;
use crate::Result;

/// Key-value operations
///
/// Writes return the cluster revision they were committed at, which is the
/// natural `start_revision` for a watch that should observe everything after
/// the write.
impl Client {
    /// Retrieves a single key
    ///
    /// # Returns
    /// - `Ok(Some(KeyValue))` if the key exists
    /// - `Ok(None)` if it does not
    pub async fn get(
        &self,
        key: impl AsRef<[u8]>,
    ) -> Result<Option<KeyValue>> {
        let _timer = ScopedTimer::new("client::get");
        let request = RangeRequest {
            key: Bytes::copy_from_slice(key.as_ref()),
            ..Default::default()
        };

        let response = self.kv().range(request).await.inspect_err(|e| {
            error!(error = %e, "range request failed");
        })?;
        Ok(response.kvs.into_iter().next())
    }

    /// Retrieves every key starting with `prefix`, in key order
    pub async fn get_prefix(
        &self,
        prefix: impl AsRef<[u8]>,
    ) -> Result<Vec<KeyValue>> {
        let _timer = ScopedTimer::new("client::get_prefix");
        let prefix = prefix.as_ref();
        let request = RangeRequest {
            key: Bytes::copy_from_slice(prefix),
            range_end: prefix_range_end(prefix),
            ..Default::default()
        };

        let response = self.kv().range(request).await?;
        debug!(count = response.kvs.len(), more = response.more, "prefix range returned");
        Ok(response.kvs)
    }

    /// Stores a value, returning the revision of the write
    pub async fn put(
        &self,
        key: impl AsRef<[u8]>,
        value: impl AsRef<[u8]>,
    ) -> Result<i64> {
        self.put_with_lease(key, value, 0).await
    }

    /// Stores a value attached to a lease; it is deleted when the lease expires
    ///
    /// A `lease_id` of 0 stores the value without a lease.
    pub async fn put_with_lease(
        &self,
        key: impl AsRef<[u8]>,
        value: impl AsRef<[u8]>,
        lease_id: i64,
    ) -> Result<i64> {
        let _timer = ScopedTimer::new("client::put");
        let request = PutRequest {
            key: Bytes::copy_from_slice(key.as_ref()),
            value: Bytes::copy_from_slice(value.as_ref()),
            lease: lease_id,
            ..Default::default()
        };

        match self.kv().put(request).await {
            Ok(response) => {
                let revision = response.header.map(|h| h.revision).unwrap_or_default();
                debug!(revision, lease_id, "put committed");
                Ok(revision)
            }
            Err(e) => {
                error!(error = %e, "put request failed");
                Err(e)
            }
        }
    }

    /// Deletes a single key
    ///
    /// Returns whether the key existed.
    pub async fn delete(
        &self,
        key: impl AsRef<[u8]>,
    ) -> Result<bool> {
        let _timer = ScopedTimer::new("client::delete");
        let request = DeleteRangeRequest {
            key: Bytes::copy_from_slice(key.as_ref()),
            ..Default::default()
        };

        let response = self.kv().delete_range(request).await?;
        Ok(response.deleted > 0)
    }

    /// Deletes every key starting with `prefix`, returning how many were removed
    pub async fn delete_prefix(
        &self,
        prefix: impl AsRef<[u8]>,
    ) -> Result<i64> {
        let _timer = ScopedTimer::new("client::delete_prefix");
        let prefix = prefix.as_ref();
        let request = DeleteRangeRequest {
            key: Bytes::copy_from_slice(prefix),
            range_end: prefix_range_end(prefix),
            ..Default::default()
        };

        let response = self.kv().delete_range(request).await?;
        debug!(deleted = response.deleted, "prefix deleted");
        Ok(response.deleted)
    }

    /// Discards history before `revision`
    ///
    /// Watches that later ask to start at a discarded revision fail with
    /// [`WatchError::RevisionCompacted`](crate::WatchError::RevisionCompacted).
    /// With `physical` set, the call returns only once the compaction has been
    /// applied to the backend.
    pub async fn compact(
        &self,
        revision: i64,
        physical: bool,
    ) -> Result<()> {
        if revision <= 0 {
            return Err(Error::InvalidArgument(format!(
                "compaction revision must be positive, got {revision}"
            )));
        }
        let _timer = ScopedTimer::new("client::compact");

        self.kv()
            .compact(CompactionRequest { revision, physical })
            .await?;
        debug!(revision, physical, "history compacted");
        Ok(())
    }
}
