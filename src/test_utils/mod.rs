//! In-memory stand-ins for the etcd server shared by unit tests
mod fake_transport;
mod frames;

pub(crate) use fake_transport::*;
pub(crate) use frames::*;
