use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use super::rpc::{call, HeartBeatParam, Request, Response};
use crate::error::Error;
use crate::Result;

pub const DEFAULT_HEART_BEAT_INTERVAL: Duration = Duration::from_secs(60);
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct InstanceConfig {
    pub coordinator_addr: String,
    /// Address announced to the coordinator, reachable by agents
    pub instance_addr: String,
    pub heart_beat_interval: Duration,
    pub call_timeout: Duration,
}

impl InstanceConfig {
    pub fn new(coordinator_addr: impl Into<String>, instance_addr: impl Into<String>) -> Self {
        Self {
            coordinator_addr: coordinator_addr.into(),
            instance_addr: instance_addr.into(),
            heart_beat_interval: DEFAULT_HEART_BEAT_INTERVAL,
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }
}

/// Relay side of discovery: keeps announcing this instance.
pub struct InstanceCoordinator {
    config: InstanceConfig,
}

impl InstanceCoordinator {
    pub fn new(config: InstanceConfig) -> Self {
        Self { config }
    }

    pub async fn heart_beat(&self) -> Result<()> {
        let req = Request::HeartBeat(HeartBeatParam {
            instance_addr: self.config.instance_addr.clone(),
        });
        match call(&self.config.coordinator_addr, self.config.call_timeout, &req).await? {
            Response::HeartBeat(_) => Ok(()),
            Response::Error(e) => Err(Error::Rpc(e)),
            other => Err(Error::Rpc(format!("unexpected response {other:?}"))),
        }
    }

    /// Sends a heartbeat right away and then once per interval. Failures are
    /// logged and retried on the next tick. Abort the handle to go silent.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(
                comp = "instance",
                addr = %self.config.instance_addr,
                coordinator = %self.config.coordinator_addr,
                "client start working..."
            );
            let mut ticker = tokio::time::interval(self.config.heart_beat_interval);
            loop {
                ticker.tick().await;
                match self.heart_beat().await {
                    Ok(()) => debug!(comp = "instance", "heart beat sent"),
                    Err(e) => error!(
                        comp = "instance",
                        error = %e,
                        "fail to send heart beat req to server"
                    ),
                }
            }
        })
    }
}
