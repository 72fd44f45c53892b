use std::collections::VecDeque;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tonic::async_trait;

use crate::proto::etcdserverpb::WatchCancelRequest;
use crate::proto::etcdserverpb::WatchCreateRequest;
use crate::proto::etcdserverpb::WatchRequest;
use crate::proto::etcdserverpb::WatchResponse;
use crate::transport::WatchStream;
use crate::transport::WatchTransport;
use crate::Error;
use crate::NetworkError;
use crate::Result;

/// Upper bound on how long a test waits for the client to do something
const EXPECT_TIMEOUT: Duration = Duration::from_secs(5);

type Inbound = std::result::Result<WatchResponse, tonic::Status>;

/// Client side of an in-memory etcd watch service
pub(crate) struct FakeTransport {
    accepted: mpsc::UnboundedSender<FakeConnection>,
    open_failures: Arc<Mutex<VecDeque<String>>>,
    opens: Arc<AtomicUsize>,
}

/// Server side: hands out a [`FakeConnection`] per opened stream
pub(crate) struct FakeServer {
    accepted: mpsc::UnboundedReceiver<FakeConnection>,
    open_failures: Arc<Mutex<VecDeque<String>>>,
    opens: Arc<AtomicUsize>,
}

pub(crate) fn fake_transport() -> (Arc<FakeTransport>, FakeServer) {
    let (tx, rx) = mpsc::unbounded_channel();
    let open_failures = Arc::new(Mutex::new(VecDeque::new()));
    let opens = Arc::new(AtomicUsize::new(0));
    (
        Arc::new(FakeTransport {
            accepted: tx,
            open_failures: open_failures.clone(),
            opens: opens.clone(),
        }),
        FakeServer {
            accepted: rx,
            open_failures,
            opens,
        },
    )
}

#[async_trait]
impl WatchTransport for FakeTransport {
    async fn open_stream(&self) -> Result<Box<dyn WatchStream>> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        if let Some(reason) = self.open_failures.lock().pop_front() {
            return Err(tonic::Status::unavailable(reason).into());
        }

        let (request_tx, request_rx) = mpsc::unbounded_channel();
        let (response_tx, response_rx) = mpsc::unbounded_channel();
        let connection = FakeConnection {
            requests: request_rx,
            responses: Some(response_tx),
        };
        self.accepted
            .send(connection)
            .map_err(|_| Error::Network(NetworkError::StreamEnded))?;

        Ok(Box::new(FakeWatchStream {
            requests: Some(request_tx),
            responses: response_rx,
        }))
    }
}

impl FakeServer {
    /// Make the next `count` opens fail with `Unavailable`
    pub(crate) fn fail_next_opens(
        &self,
        count: usize,
    ) {
        let mut failures = self.open_failures.lock();
        for i in 0..count {
            failures.push_back(format!("scripted open failure {i}"));
        }
    }

    /// Number of `open_stream` calls so far, failed ones included
    pub(crate) fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub(crate) async fn accept(&mut self) -> FakeConnection {
        tokio::time::timeout(EXPECT_TIMEOUT, self.accepted.recv())
            .await
            .expect("client did not open a watch stream")
            .expect("fake transport dropped")
    }

    pub(crate) fn try_accept(&mut self) -> Option<FakeConnection> {
        self.accepted.try_recv().ok()
    }
}

/// One accepted watch stream, seen from the server
pub(crate) struct FakeConnection {
    requests: mpsc::UnboundedReceiver<WatchRequest>,
    responses: Option<mpsc::UnboundedSender<Inbound>>,
}

impl FakeConnection {
    pub(crate) async fn next_request(&mut self) -> WatchRequest {
        tokio::time::timeout(EXPECT_TIMEOUT, self.requests.recv())
            .await
            .expect("client sent nothing")
            .expect("client closed the stream")
    }

    pub(crate) async fn expect_create(&mut self) -> WatchCreateRequest {
        let request = self.next_request().await;
        request
            .as_create()
            .cloned()
            .unwrap_or_else(|| panic!("expected create request, got {:?}", request))
    }

    pub(crate) async fn expect_cancel(&mut self) -> WatchCancelRequest {
        let request = self.next_request().await;
        request
            .as_cancel()
            .cloned()
            .unwrap_or_else(|| panic!("expected cancel request, got {:?}", request))
    }

    /// A request the client already sent, without waiting
    pub(crate) fn try_next_request(&mut self) -> Option<WatchRequest> {
        self.requests.try_recv().ok()
    }

    /// Resolves once the client has closed its side of the stream
    pub(crate) async fn closed_by_client(&mut self) {
        loop {
            let next = tokio::time::timeout(EXPECT_TIMEOUT, self.requests.recv())
                .await
                .expect("client kept the stream open");
            if next.is_none() {
                return;
            }
        }
    }

    pub(crate) fn send(
        &self,
        frame: WatchResponse,
    ) {
        if let Some(responses) = &self.responses {
            let _ = responses.send(Ok(frame));
        }
    }

    /// Break the stream with a transport error
    pub(crate) fn fail(
        &mut self,
        status: tonic::Status,
    ) {
        if let Some(responses) = self.responses.take() {
            let _ = responses.send(Err(status));
        }
    }

    /// End the stream cleanly from the server side
    pub(crate) fn hang_up(&mut self) {
        self.responses.take();
    }
}

struct FakeWatchStream {
    requests: Option<mpsc::UnboundedSender<WatchRequest>>,
    responses: mpsc::UnboundedReceiver<Inbound>,
}

#[async_trait]
impl WatchStream for FakeWatchStream {
    async fn send(
        &mut self,
        request: WatchRequest,
    ) -> Result<()> {
        match &self.requests {
            Some(requests) => requests
                .send(request)
                .map_err(|_| Error::Network(NetworkError::StreamEnded)),
            None => Err(Error::Network(NetworkError::StreamEnded)),
        }
    }

    async fn recv(&mut self) -> Result<Option<WatchResponse>> {
        match self.responses.recv().await {
            Some(Ok(frame)) => Ok(Some(frame)),
            Some(Err(status)) => Err(status.into()),
            None => Ok(None),
        }
    }

    async fn close(&mut self) {
        self.requests.take();
        self.responses.close();
    }
}
