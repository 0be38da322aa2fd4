use sockpipe::dialer::TcpDialer;
use sockpipe::hello::{
    ClientSayHello, RelayPicker, ServerSayHello, StaticRelay, CLIENT_SECRET, SERVER_SECRET,
};
use sockpipe::manager::{AccessManager, ConnManager, ManagerConfig};
use sockpipe::server::TcpServer;
use sockpipe::socks5::{
    Auth, AuthMethodNegotiation, Command, CommandNegotiation, CONNECT, NO_AUTHENTICATION_REQUIRED,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

async fn spawn_echo() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let (mut conn, _) = listener.accept().await.unwrap();
            tokio::spawn(async move {
                let (mut r, mut w) = conn.split();
                let _ = tokio::io::copy(&mut r, &mut w).await;
            });
        }
    });
    addr
}

async fn spawn_relay() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let mngr = AccessManager::new(&ManagerConfig::default());

    let mut server = TcpServer::new(addr.to_string());
    server
        .use_handler(Arc::new(ServerSayHello))
        .use_handler(Arc::new(CommandNegotiation::new(vec![CONNECT])))
        .use_handler(Arc::new(Command::new(mngr.dialer())))
        .set_final_handler(mngr.pipe_handler());

    tokio::spawn(async move { server.serve(listener).await });
    addr
}

async fn spawn_agent(relays: Arc<dyn RelayPicker>) -> SocketAddr {
    spawn_agent_with_timeout(relays, Duration::from_secs(30)).await
}

async fn spawn_agent_with_timeout(relays: Arc<dyn RelayPicker>, timeout: Duration) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let mngr = AccessManager::new(&ManagerConfig::default());

    let mut server = TcpServer::new(addr.to_string());
    server
        .use_handler(Arc::new(AuthMethodNegotiation::new(vec![NO_AUTHENTICATION_REQUIRED])))
        .use_handler(Arc::new(Auth))
        .use_handler(Arc::new(
            ClientSayHello::new(Arc::new(TcpDialer::default()), relays).with_timeout(timeout),
        ))
        .set_final_handler(mngr.pipe_handler());

    tokio::spawn(async move { server.serve(listener).await });
    addr
}

async fn greet(client: &mut TcpStream) {
    client.write_all(&[0x05, 0x01, 0x00]).await.unwrap();
    let mut reply = [0u8; 2];
    client.read_exact(&mut reply).await.unwrap();
    assert_eq!(reply, [0x05, 0x00]);
}

async fn read_until_closed(conn: &mut TcpStream) -> Vec<u8> {
    let mut rest = Vec::new();
    tokio::time::timeout(Duration::from_secs(5), conn.read_to_end(&mut rest))
        .await
        .expect("connection left open")
        .unwrap_or(0);
    rest
}

struct NoRelay;

impl RelayPicker for NoRelay {
    fn pick(&self) -> Option<String> {
        None
    }
}

#[tokio::test]
async fn test_agent_tunnels_through_relay() {
    let echo = spawn_echo().await;
    let relay = spawn_relay().await;
    let agent = spawn_agent(Arc::new(StaticRelay(relay.to_string()))).await;

    let mut client = TcpStream::connect(agent).await.unwrap();
    greet(&mut client).await;

    let mut req = vec![0x05, 0x01, 0x00, 0x01, 127, 0, 0, 1];
    req.extend_from_slice(&echo.port().to_be_bytes());
    client.write_all(&req).await.unwrap();

    let mut reply = [0u8; 10];
    client.read_exact(&mut reply).await.unwrap();
    assert_eq!(reply[..4], [0x05, 0x00, 0x00, 0x01]);

    client.write_all(b"through the tunnel").await.unwrap();
    let mut buf = [0u8; 18];
    client.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"through the tunnel");

    client.shutdown().await.unwrap();
    assert!(read_until_closed(&mut client).await.is_empty());
}

#[tokio::test]
async fn test_relay_answers_secret() {
    let relay = spawn_relay().await;

    let mut conn = TcpStream::connect(relay).await.unwrap();
    conn.write_all(CLIENT_SECRET).await.unwrap();
    let mut token = [0u8; 6];
    conn.read_exact(&mut token).await.unwrap();
    assert_eq!(&token, SERVER_SECRET);
}

#[tokio::test]
async fn test_relay_rejects_wrong_secret() {
    let relay = spawn_relay().await;

    let mut conn = TcpStream::connect(relay).await.unwrap();
    conn.write_all(b"zzzzzz").await.unwrap();
    assert!(read_until_closed(&mut conn).await.is_empty());
}

#[tokio::test]
async fn test_agent_drops_client_on_bad_relay_token() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let fake = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (mut conn, _) = listener.accept().await.unwrap();
        let mut token = [0u8; 6];
        conn.read_exact(&mut token).await.unwrap();
        conn.write_all(b"000000").await.unwrap();
        let mut rest = Vec::new();
        let _ = conn.read_to_end(&mut rest).await;
    });
    let agent = spawn_agent(Arc::new(StaticRelay(fake.to_string()))).await;

    let mut client = TcpStream::connect(agent).await.unwrap();
    greet(&mut client).await;
    assert!(read_until_closed(&mut client).await.is_empty());
}

#[tokio::test]
async fn test_agent_without_relay_closes_client() {
    let agent = spawn_agent(Arc::new(NoRelay)).await;

    let mut client = TcpStream::connect(agent).await.unwrap();
    greet(&mut client).await;
    assert!(read_until_closed(&mut client).await.is_empty());
}

#[tokio::test]
async fn test_agent_gives_up_on_silent_relay() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let silent = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (mut conn, _) = listener.accept().await.unwrap();
        let mut rest = Vec::new();
        let _ = conn.read_to_end(&mut rest).await;
    });
    let relays = Arc::new(StaticRelay(silent.to_string()));
    let agent = spawn_agent_with_timeout(relays, Duration::from_millis(200)).await;

    let mut client = TcpStream::connect(agent).await.unwrap();
    greet(&mut client).await;

    let started = tokio::time::Instant::now();
    assert!(read_until_closed(&mut client).await.is_empty());
    assert!(started.elapsed() < Duration::from_secs(3));
}
