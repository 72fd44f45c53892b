//! Watch subsystem
//!
//! Multiplexes any number of key or prefix watches onto one long-lived
//! bidirectional stream and demultiplexes change notifications back to the
//! right subscriber.
//!
//! # Architecture
//!
//! - [`WatchManager`]: public entry point. A single control task per manager
//!   owns the registry, the stream handle and the reconnect state machine.
//! - `WatchRegistry`: client [`WatchId`] to subscriber state, plus the reverse
//!   index from [`ServerWatchId`].
//! - `WatchStreamHandle`: the current transport stream and its generation.
//! - Delivery: an [`EventStream`] / [`ResponseStream`] backed by a bounded
//!   queue, or a callback running on its own worker.
//!
//! # Delivery guarantees
//!
//! Events of one watch arrive in non-decreasing `mod_revision` order and are
//! never delivered twice. After a transport failure the watch is re-created
//! at `last_delivered_revision + 1`, or at its original start revision if
//! nothing was delivered yet. Nothing is dropped silently: compaction, a
//! consumer that falls behind, or an exhausted reconnect each end the watch
//! with a [`WatchError`](crate::WatchError).
//!
//! # Cancellation
//!
//! Cancel is idempotent and takes effect immediately on the consumer side:
//! events already queued for a canceled watch are discarded and its stream
//! ends cleanly.
//!
//! ```no_run
//! use futures::StreamExt;
//! use etcd3_client::{Client, WatchRequest};
//!
//! # async fn run(client: Client) -> etcd3_client::Result<()> {
//! let (mut events, canceller) = client.watch_with(WatchRequest::prefix("/config/"))?;
//! while let Some(event) = events.next().await {
//!     let event = event?;
//!     println!("{:?} {:?}", event.kind, event.key);
//!     if event.value.is_empty() {
//!         canceller.cancel();
//!     }
//! }
//! # Ok(())
//! # }
//! ```

mod manager;
mod registry;
mod sequence;
mod sink;
mod stream;
mod types;

pub use manager::*;
pub use sequence::*;
pub use sink::WatchCallback;
pub use types::*;

#[cfg(test)]
mod manager_test;
