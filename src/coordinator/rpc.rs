//! Wire format of the coordinator: one JSON document per line over TCP.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

use crate::error::Error;
use crate::Result;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceInfo {
    pub addr: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartBeatParam {
    pub instance_addr: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HeartBeatResp {}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FetchInstancesParam {}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FetchInstancesResp {
    pub instances: Vec<InstanceInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "method", content = "params")]
pub enum Request {
    HeartBeat(HeartBeatParam),
    FetchInstances(FetchInstancesParam),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Response {
    HeartBeat(HeartBeatResp),
    FetchInstances(FetchInstancesResp),
    Error(String),
}

/// Dials `addr`, sends one request and waits for its response.
pub async fn call(addr: &str, timeout: Duration, req: &Request) -> Result<Response> {
    let exchange = async {
        let stream = TcpStream::connect(addr).await?;
        let (reader, mut writer) = stream.into_split();

        let mut line = serde_json::to_string(req)?;
        line.push('\n');
        writer.write_all(line.as_bytes()).await?;

        let mut lines = BufReader::new(reader).lines();
        let resp = lines
            .next_line()
            .await?
            .ok_or_else(|| Error::Rpc("connection closed before response".to_string()))?;
        Ok::<_, Error>(serde_json::from_str::<Response>(&resp)?)
    };

    match tokio::time::timeout(timeout, exchange).await {
        Ok(resp) => resp,
        Err(_) => Err(Error::Rpc(format!("call to {addr} timed out after {timeout:?}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_wire_format() {
        let req = Request::HeartBeat(HeartBeatParam {
            instance_addr: "10.0.0.1:1081".to_string(),
        });
        assert_eq!(
            serde_json::to_string(&req).unwrap(),
            r#"{"method":"HeartBeat","params":{"instance_addr":"10.0.0.1:1081"}}"#
        );

        let req = Request::FetchInstances(FetchInstancesParam {});
        assert_eq!(
            serde_json::to_string(&req).unwrap(),
            r#"{"method":"FetchInstances","params":{}}"#
        );
    }

    #[test]
    fn test_response_wire_format() {
        let resp: Response =
            serde_json::from_str(r#"{"FetchInstances":{"instances":[{"addr":"a:1"}]}}"#).unwrap();
        match resp {
            Response::FetchInstances(resp) => {
                assert_eq!(resp.instances, vec![InstanceInfo { addr: "a:1".to_string() }]);
            }
            other => panic!("unexpected response {other:?}"),
        }
        assert_eq!(
            serde_json::to_string(&Response::HeartBeat(HeartBeatResp {})).unwrap(),
            r#"{"HeartBeat":{}}"#
        );
    }
}
