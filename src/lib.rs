//! # etcd3-client
//!
//! An async client for etcd v3 built around a multiplexed, self-healing
//! watch subsystem.
//!
//! Any number of key or prefix watches share one bidirectional gRPC stream.
//! When the link breaks, the stream is re-opened and every watch resumes
//! right after the last revision it delivered, so consumers see each change
//! exactly once and in order. Failures that cannot be healed (compacted
//! history, a consumer that fell behind, exhausted reconnects) end only the
//! affected watch, with a typed [`WatchError`].
//!
//! Besides watches, [`Client`] offers thin KV, lease and cluster calls.
//!
//! ## Quick Start
//! ```no_run
//! use futures::StreamExt;
//! use etcd3_client::Client;
//!
//! # async fn run() -> etcd3_client::Result<()> {
//! let client = Client::builder(vec!["http://127.0.0.1:2379".into()])
//!     .build()
//!     .await?;
//!
//! let (mut events, canceller) = client.watch("/x")?;
//! client.put("/x", "1").await?;
//!
//! if let Some(event) = events.next().await {
//!     let event = event?;
//!     println!("{:?} at revision {}", event.kind, event.mod_revision);
//! }
//! canceller.cancel();
//! # Ok(())
//! # }
//! ```

mod client;
mod config;
mod errors;
pub mod proto;
mod scoped_timer;
mod transport;
mod utils;
mod watch;

pub use client::*;
pub use config::*;
pub use errors::*;
pub use proto::etcdserverpb::Member;
pub use proto::mvccpb::KeyValue;
pub use transport::GrpcTransport;
pub use transport::KvTransport;
pub use transport::WatchStream;
pub use transport::WatchTransport;
pub use utils::prefix_range_end;
pub use watch::*;

//-----------------------------------------------------------
// Test utils

#[cfg(test)]
pub(crate) mod test_utils;
