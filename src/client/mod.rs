//! Client module for an etcd v3 cluster
//!
//! Provides the components callers interact with:
//! - [`Client`] - Main entry point: KV, lease, cluster and watch operations
//! - [`ClientBuilder`] - Configurable client construction
//!
//! # Basic Usage
//! ```no_run
//! use std::time::Duration;
//!
//! use etcd3_client::Client;
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() {
//!     let client = Client::builder(vec![
//!         "http://node1:2379".into(),
//!         "http://node2:2379".into(),
//!     ])
//!     .connect_timeout(Duration::from_secs(3))
//!     .request_timeout(Duration::from_secs(1))
//!     .enable_compression(true)
//!     .build()
//!     .await
//!     .unwrap();
//!
//!     client.put("user:1001", "Alice").await.unwrap();
//!     let value = client.get("user:1001").await.unwrap();
//!     println!("User data: {:?}", value);
//!
//!     let event = client
//!         .watch_once("user:1001", Duration::from_secs(5))
//!         .await
//!         .unwrap();
//!     println!("Changed at revision {}", event.mod_revision);
//! }
//! ```

mod builder;
mod client;
mod cluster;
mod kv;
mod lease;
mod watch;

pub use builder::*;
pub use client::*;
pub use lease::*;
