use parking_lot::RwLock;
use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::rpc::{FetchInstancesResp, HeartBeatResp, InstanceInfo, Request, Response};
use crate::Result;

pub const DEFAULT_CLEAN_INTERVAL: Duration = Duration::from_secs(3 * 60);
pub const DEFAULT_NO_CONTACT: Duration = Duration::from_secs(5 * 60);

/// Longest accepted request line, newline included.
pub const MAX_REQUEST_SIZE: u64 = 64 * 1024;

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Period of the stale-instance sweep
    pub clean_interval: Duration,
    /// Silence after which an instance is considered gone
    pub no_contact: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            clean_interval: DEFAULT_CLEAN_INTERVAL,
            no_contact: DEFAULT_NO_CONTACT,
        }
    }
}

struct Instance {
    info: InstanceInfo,
    /// Millis since the coordinator epoch
    last_recv: AtomicU64,
}

impl Instance {
    fn new(addr: &str, now: u64) -> Self {
        Self {
            info: InstanceInfo {
                addr: addr.to_string(),
            },
            last_recv: AtomicU64::new(now),
        }
    }

    fn recv_heart_beat(&self, now: u64) {
        self.last_recv.fetch_max(now, Ordering::SeqCst);
    }

    fn ahead(&self, deadline: u64) -> bool {
        self.last_recv.load(Ordering::SeqCst) < deadline
    }
}

/// Tracks live relay instances from their heartbeats.
pub struct ServerCoordinator {
    epoch: Instant,
    config: CoordinatorConfig,
    peers: RwLock<HashMap<String, Instance>>,
}

impl ServerCoordinator {
    /// Must be called inside a tokio runtime; starts the sweep daemon.
    pub fn new(config: CoordinatorConfig) -> Arc<Self> {
        let coordinator = Arc::new(Self {
            epoch: Instant::now(),
            config,
            peers: RwLock::new(HashMap::new()),
        });
        spawn_sweeper(Arc::downgrade(&coordinator), coordinator.config.clean_interval);
        coordinator
    }

    fn now(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    /// Registers `addr` or refreshes its timestamp.
    pub fn heart_beat(&self, addr: &str) {
        let now = self.now();
        {
            let peers = self.peers.read();
            if let Some(peer) = peers.get(addr) {
                peer.recv_heart_beat(now);
                return;
            }
        }

        let mut peers = self.peers.write();
        match peers.get(addr) {
            Some(peer) => peer.recv_heart_beat(now),
            None => {
                info!(comp = "coordinator", addr, "new instances joined");
                peers.insert(addr.to_string(), Instance::new(addr, now));
            }
        }
    }

    pub fn fetch_instances(&self) -> Vec<InstanceInfo> {
        self.peers
            .read()
            .values()
            .map(|peer| peer.info.clone())
            .collect()
    }

    /// Removes instances silent for longer than the no-contact duration and
    /// returns their addresses.
    pub fn clean(&self) -> Vec<String> {
        let no_contact = self.config.no_contact.as_millis() as u64;
        let Some(deadline) = self.now().checked_sub(no_contact) else {
            return Vec::new();
        };

        let candidates: Vec<String> = self
            .peers
            .read()
            .iter()
            .filter(|(_, peer)| peer.ahead(deadline))
            .map(|(addr, _)| addr.clone())
            .collect();
        if candidates.is_empty() {
            return Vec::new();
        }

        let mut removed = Vec::with_capacity(candidates.len());
        let mut peers = self.peers.write();
        for addr in candidates {
            // may have heartbeat between the scan and the write lock
            if peers.get(&addr).is_some_and(|peer| peer.ahead(deadline)) {
                peers.remove(&addr);
                removed.push(addr);
            }
        }
        drop(peers);

        if !removed.is_empty() {
            info!(
                comp = "coordinator",
                instances = %removed.join(", "),
                "following instances are cleaned"
            );
        }
        removed
    }

    pub fn dispatch(&self, req: Request) -> Response {
        match req {
            Request::HeartBeat(param) => {
                self.heart_beat(&param.instance_addr);
                Response::HeartBeat(HeartBeatResp {})
            }
            Request::FetchInstances(_) => Response::FetchInstances(FetchInstancesResp {
                instances: self.fetch_instances(),
            }),
        }
    }
}

fn spawn_sweeper(coordinator: Weak<ServerCoordinator>, every: Duration) {
    tokio::spawn(async move {
        info!(comp = "coordinator", interval = ?every, "coordinator start working");
        let mut ticker = tokio::time::interval(every);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let Some(coordinator) = coordinator.upgrade() else {
                break;
            };
            coordinator.clean();
        }
    });
}

/// Serves coordinator requests until accepting fails.
pub async fn serve(listener: TcpListener, coordinator: Arc<ServerCoordinator>) -> Result<()> {
    info!(comp = "coordinator", addr = %listener.local_addr()?, "coordinator listening");
    loop {
        let (conn, peer) = listener.accept().await?;
        let coordinator = Arc::clone(&coordinator);
        tokio::spawn(async move {
            if let Err(e) = serve_conn(conn, &coordinator).await {
                warn!(comp = "coordinator", peer = %peer, error = %e, "rpc connection failed");
            }
        });
    }
}

async fn serve_conn(conn: TcpStream, coordinator: &ServerCoordinator) -> Result<()> {
    let (reader, mut writer) = conn.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = Vec::new();

    loop {
        line.clear();
        if read_line(&mut reader, &mut line).await? == 0 {
            return Ok(());
        }

        let resp = if is_truncated(&line) {
            warn!(comp = "coordinator", limit = MAX_REQUEST_SIZE, "rpc request too large");
            skip_line(&mut reader, &mut line).await?;
            Response::Error(format!("request exceeds {MAX_REQUEST_SIZE} bytes"))
        } else {
            match serde_json::from_slice::<Request>(&line) {
                Ok(req) => {
                    debug!(comp = "coordinator", ?req, "rpc request");
                    coordinator.dispatch(req)
                }
                Err(e) => Response::Error(format!("bad request: {e}")),
            }
        };

        let mut out = serde_json::to_string(&resp)?;
        out.push('\n');
        writer.write_all(out.as_bytes()).await?;
    }
}

/// Reads one line, stopping early after `MAX_REQUEST_SIZE` bytes.
async fn read_line<R>(reader: &mut R, line: &mut Vec<u8>) -> io::Result<usize>
where
    R: AsyncBufRead + Unpin,
{
    (&mut *reader).take(MAX_REQUEST_SIZE).read_until(b'\n', line).await
}

fn is_truncated(line: &[u8]) -> bool {
    line.len() as u64 >= MAX_REQUEST_SIZE && line.last() != Some(&b'\n')
}

/// Discards the rest of an oversized line without buffering it.
async fn skip_line<R>(reader: &mut R, line: &mut Vec<u8>) -> io::Result<()>
where
    R: AsyncBufRead + Unpin,
{
    loop {
        line.clear();
        let n = read_line(reader, line).await?;
        if n == 0 || line.last() == Some(&b'\n') {
            return Ok(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    // sweeper effectively idle so tests drive clean() themselves
    fn config() -> CoordinatorConfig {
        CoordinatorConfig {
            clean_interval: Duration::from_secs(3600),
            no_contact: Duration::from_secs(100),
        }
    }

    fn addrs(coordinator: &ServerCoordinator) -> HashSet<String> {
        coordinator
            .fetch_instances()
            .into_iter()
            .map(|ins| ins.addr)
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_heart_beat_is_idempotent() {
        let coordinator = ServerCoordinator::new(config());
        coordinator.heart_beat("a:1");
        coordinator.heart_beat("a:1");
        coordinator.heart_beat("b:1");
        assert_eq!(coordinator.fetch_instances().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_first_heart_beats_create_one_entry() {
        let coordinator = ServerCoordinator::new(config());
        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let coordinator = Arc::clone(&coordinator);
                tokio::spawn(async move { coordinator.heart_beat("racy:1") })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }
        assert_eq!(coordinator.fetch_instances().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_clean_removes_only_silent_instances() {
        let coordinator = ServerCoordinator::new(config());
        coordinator.heart_beat("silent:1");
        coordinator.heart_beat("alive:1");

        tokio::time::advance(Duration::from_secs(60)).await;
        coordinator.heart_beat("alive:1");
        tokio::time::advance(Duration::from_secs(60)).await;

        assert_eq!(coordinator.clean(), vec!["silent:1".to_string()]);
        assert_eq!(addrs(&coordinator), HashSet::from(["alive:1".to_string()]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_runs_on_its_own() {
        let coordinator = ServerCoordinator::new(CoordinatorConfig {
            clean_interval: Duration::from_secs(60),
            no_contact: Duration::from_secs(100),
        });
        coordinator.heart_beat("gone:1");

        tokio::time::sleep(Duration::from_secs(181)).await;

        assert!(coordinator.fetch_instances().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejoin_after_removal_is_fresh() {
        let coordinator = ServerCoordinator::new(config());
        coordinator.heart_beat("back:1");
        tokio::time::advance(Duration::from_secs(101)).await;
        assert_eq!(coordinator.clean(), vec!["back:1".to_string()]);

        coordinator.heart_beat("back:1");
        assert_eq!(addrs(&coordinator), HashSet::from(["back:1".to_string()]));

        // a fresh entry gets the full no-contact window again
        tokio::time::advance(Duration::from_secs(99)).await;
        assert!(coordinator.clean().is_empty());
    }

    #[tokio::test]
    async fn test_oversized_request_is_refused_and_skipped() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let coordinator = ServerCoordinator::new(config());
        tokio::spawn(serve(listener, Arc::clone(&coordinator)));

        let conn = TcpStream::connect(addr).await.unwrap();
        let (reader, mut writer) = conn.into_split();
        let mut lines = BufReader::new(reader).lines();

        let mut req = vec![b'x'; MAX_REQUEST_SIZE as usize * 2];
        req.extend_from_slice(b"\n{\"method\":\"FetchInstances\",\"params\":{}}\n");
        let write = async { writer.write_all(&req).await.unwrap() };
        let read = async {
            let first = lines.next_line().await.unwrap().unwrap();
            let second = lines.next_line().await.unwrap().unwrap();
            (first, second)
        };
        let ((), (first, second)) = tokio::join!(write, read);

        assert!(first.starts_with("{\"Error\":\"request exceeds"));
        assert_eq!(second, "{\"FetchInstances\":{\"instances\":[]}}");
    }
}
