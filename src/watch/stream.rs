use tracing::debug;

use crate::proto::etcdserverpb;
use crate::transport::WatchStream;
use crate::Result;
use crate::WatchError;

/// Owner of the manager's current transport stream
///
/// Every stream installed through [`replace`](Self::replace) gets a new
/// generation number; server watch ids are only meaningful within the
/// generation that issued them.
pub(crate) struct WatchStreamHandle {
    stream: Option<Box<dyn WatchStream>>,
    generation: u64,
}

impl WatchStreamHandle {
    pub(crate) fn new() -> Self {
        Self {
            stream: None,
            generation: 0,
        }
    }

    pub(crate) fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }

    /// Install a freshly opened stream, closing any previous one
    pub(crate) async fn replace(
        &mut self,
        stream: Box<dyn WatchStream>,
    ) {
        self.close().await;
        self.generation += 1;
        self.stream = Some(stream);
        debug!(generation = self.generation, "watch stream installed");
    }

    pub(crate) async fn send(
        &mut self,
        request: etcdserverpb::WatchRequest,
    ) -> Result<()> {
        match self.stream.as_mut() {
            Some(stream) => stream.send(request).await,
            None => Err(WatchError::StreamClosed.into()),
        }
    }

    /// Suspend until the next inbound frame.
    ///
    /// `Ok(None)` is a clean end of stream from the server.
    pub(crate) async fn next(&mut self) -> Result<Option<etcdserverpb::WatchResponse>> {
        match self.stream.as_mut() {
            Some(stream) => stream.recv().await,
            None => Err(WatchError::StreamClosed.into()),
        }
    }

    pub(crate) async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            stream.close().await;
            debug!(generation = self.generation, "watch stream closed");
        }
    }
}
