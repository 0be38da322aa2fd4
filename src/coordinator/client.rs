use std::time::Duration;

use super::instance::DEFAULT_CALL_TIMEOUT;
use super::rpc::{call, FetchInstancesParam, InstanceInfo, Request, Response};
use crate::error::Error;
use crate::Result;

/// Discovery client: asks the coordinator which relays are alive.
#[derive(Debug, Clone)]
pub struct ClientCoordinator {
    srv_addr: String,
    timeout: Duration,
}

impl ClientCoordinator {
    pub fn new(srv_addr: impl Into<String>) -> Self {
        Self::with_timeout(srv_addr, DEFAULT_CALL_TIMEOUT)
    }

    pub fn with_timeout(srv_addr: impl Into<String>, timeout: Duration) -> Self {
        Self {
            srv_addr: srv_addr.into(),
            timeout,
        }
    }

    pub async fn fetch_instances(&self) -> Result<Vec<InstanceInfo>> {
        let req = Request::FetchInstances(FetchInstancesParam {});
        match call(&self.srv_addr, self.timeout, &req).await? {
            Response::FetchInstances(resp) => Ok(resp.instances),
            Response::Error(e) => Err(Error::Rpc(e)),
            other => Err(Error::Rpc(format!("unexpected response {other:?}"))),
        }
    }
}
