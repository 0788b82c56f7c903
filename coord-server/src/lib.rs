//! Hosts the `coord-core` engine behind a gRPC RPC surface: plan/mask/config
//! loading, the real Kubernetes-backed operator control plane, and the
//! `TestCoordinator` service implementation.

pub mod config;
pub mod error;
pub mod operator;
pub mod rpc;

pub use error::Error;
pub use rpc::proto;
