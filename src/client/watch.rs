use std::time::Duration;

use futures::StreamExt;
use tracing::debug;

use super::Client;
use crate::watch::Event;
use crate::watch::EventStream;
use crate::watch::ResponseStream;
use crate::watch::WatchCanceller;
use crate::watch::WatchId;
use crate::watch::WatchRequest;
use crate::watch::WatchResponse;
use crate::Result;
use crate::WatchError;

/// Watch operations
///
/// Every watch shares the client's single multiplexed stream. Per-watch
/// failures never surface here: they are delivered through the returned
/// stream or to the callback.
impl Client {
    /// Watch a single key from now on
    pub fn watch(
        &self,
        key: impl AsRef<[u8]>,
    ) -> Result<(EventStream, WatchCanceller)> {
        self.watch_with(WatchRequest::key(key))
    }

    /// Watch every key starting with `prefix`
    pub fn watch_prefix(
        &self,
        prefix: impl AsRef<[u8]>,
    ) -> Result<(EventStream, WatchCanceller)> {
        self.watch_with(WatchRequest::prefix(prefix))
    }

    /// Watch with full control over range, start revision and filters
    pub fn watch_with(
        &self,
        request: WatchRequest,
    ) -> Result<(EventStream, WatchCanceller)> {
        self.watch_manager().watch(request)
    }

    /// Like [`watch_with`](Self::watch_with), but yields whole responses,
    /// progress notifications included
    pub fn watch_response(
        &self,
        request: WatchRequest,
    ) -> Result<(ResponseStream, WatchCanceller)> {
        self.watch_manager().watch_responses(request)
    }

    /// Wait for the next change of `key`
    ///
    /// Fails with [`WatchError::WatchTimedOut`] if nothing changes within
    /// `timeout`. The watch is canceled before returning either way.
    pub async fn watch_once(
        &self,
        key: impl AsRef<[u8]>,
        timeout: Duration,
    ) -> Result<Event> {
        let (events, _canceller) = self.watch(key)?;
        first_item(events, timeout).await
    }

    /// Wait for the next change of any key under `prefix`
    pub async fn watch_prefix_once(
        &self,
        prefix: impl AsRef<[u8]>,
        timeout: Duration,
    ) -> Result<Event> {
        let (events, _canceller) = self.watch_prefix(prefix)?;
        first_item(events, timeout).await
    }

    /// Wait for the first response of an arbitrary watch
    pub async fn watch_once_response(
        &self,
        request: WatchRequest,
        timeout: Duration,
    ) -> Result<WatchResponse> {
        let (responses, _canceller) = self.watch_response(request)?;
        first_item(responses, timeout).await
    }

    /// Register `callback` for the watch described by `request`
    ///
    /// Returns the watch id, usable with [`cancel_watch`](Self::cancel_watch),
    /// and a canceller for the same watch.
    pub fn create_watch<F>(
        &self,
        request: WatchRequest,
        callback: F,
    ) -> Result<(WatchId, WatchCanceller)>
    where
        F: Fn(std::result::Result<WatchResponse, WatchError>) + Send + Sync + 'static,
    {
        let canceller = self.watch_manager().watch_with_callback(request, callback)?;
        debug!(watch_id = %canceller.id(), "callback watch registered");
        Ok((canceller.id(), canceller))
    }

    /// Invoke `callback` for every change of `key`
    pub fn add_watch_callback<F>(
        &self,
        key: impl AsRef<[u8]>,
        callback: F,
    ) -> Result<WatchId>
    where
        F: Fn(std::result::Result<WatchResponse, WatchError>) + Send + Sync + 'static,
    {
        self.create_watch(WatchRequest::key(key), callback).map(|(id, _)| id)
    }

    /// Invoke `callback` for every change under `prefix`
    pub fn add_watch_prefix_callback<F>(
        &self,
        prefix: impl AsRef<[u8]>,
        callback: F,
    ) -> Result<WatchId>
    where
        F: Fn(std::result::Result<WatchResponse, WatchError>) + Send + Sync + 'static,
    {
        self.create_watch(WatchRequest::prefix(prefix), callback)
            .map(|(id, _)| id)
    }

    /// Cancel a watch by id. Unknown or already canceled ids are ignored.
    pub fn cancel_watch(
        &self,
        id: WatchId,
    ) {
        self.watch_manager().cancel(id);
    }
}

/// First item of a watch sequence, bounded by `timeout`. Dropping the
/// sequence on return cancels the watch.
async fn first_item<S, T>(
    mut sequence: S,
    timeout: Duration,
) -> Result<T>
where
    S: futures::Stream<Item = std::result::Result<T, WatchError>> + Unpin,
{
    match tokio::time::timeout(timeout, sequence.next()).await {
        Ok(Some(Ok(item))) => Ok(item),
        Ok(Some(Err(e))) => Err(e.into()),
        // Canceled by id from elsewhere before anything arrived
        Ok(None) => Err(WatchError::Canceled.into()),
        Err(_) => Err(WatchError::WatchTimedOut { timeout }.into()),
    }
}
