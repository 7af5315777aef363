//! Inbound routing and the per-feature subsystems behind [`Client`].

pub mod attribute;
pub mod client;
pub mod correlator;
pub mod provision;
pub mod publish;
pub mod registry;
pub mod rpc;

pub use attribute::{AttributeCallback, AttributeData, AttributeSubscription};
pub use client::{Client, DEFAULT_CAPACITY};
pub use provision::ProvisionCallback;
pub use registry::{KeyFilter, MethodMatch};
pub use rpc::{RpcHandler, RpcSubscription};
