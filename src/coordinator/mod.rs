//! Heartbeat-based discovery of relay instances.
//!
//! - `server`: the coordinator tracking instances and its RPC endpoint
//! - `instance`: heartbeat sender run by each relay
//! - `client`: fetches the live instance list
//! - `discovery`: relay picker for agents built on the client

mod client;
mod discovery;
mod instance;
mod rpc;
mod server;

pub use client::ClientCoordinator;
pub use discovery::DiscoveredRelays;
pub use instance::{
    InstanceConfig, InstanceCoordinator, DEFAULT_CALL_TIMEOUT, DEFAULT_HEART_BEAT_INTERVAL,
};
pub use rpc::{
    call, FetchInstancesParam, FetchInstancesResp, HeartBeatParam, HeartBeatResp, InstanceInfo,
    Request, Response,
};
pub use server::{
    serve, CoordinatorConfig, ServerCoordinator, DEFAULT_CLEAN_INTERVAL, DEFAULT_NO_CONTACT,
    MAX_REQUEST_SIZE,
};
