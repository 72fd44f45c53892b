//! Protocol Buffer definitions and generated code for the etcd v3 RPC services.
//!
//! The generated sources under `generated/` are produced by `tonic-build` from the
//! upstream `rpc.proto` / `kv.proto` definitions and checked in, so building this
//! crate does not require `protoc`.

pub mod mvccpb {
    include!("generated/mvccpb.rs");
}

pub mod etcdserverpb {
    include!("generated/etcdserverpb.rs");
}

mod watch_ext;
