use clap::Parser;
use sockpipe::config::WolfArgs;
use sockpipe::coordinator::{ClientCoordinator, DiscoveredRelays};
use sockpipe::dialer::TcpDialer;
use sockpipe::hello::{ClientSayHello, RelayPicker, StaticRelay};
use sockpipe::logger::init_logger;
use sockpipe::manager::{AccessManager, ConnManager};
use sockpipe::server::TcpServer;
use sockpipe::socks5::{Auth, AuthMethodNegotiation, NO_AUTHENTICATION_REQUIRED};
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = WolfArgs::parse();
    init_logger(&args.log_level);

    let relays: Arc<dyn RelayPicker> = match &args.coordinator {
        Some(addr) => {
            info!(coordinator = %addr, "discovering relays");
            let discovered = DiscoveredRelays::new(ClientCoordinator::new(addr.as_str()));
            discovered.spawn_refresher(args.refresh_interval);
            discovered
        }
        None => {
            info!(relay = %args.relay, "tiger is at");
            Arc::new(StaticRelay(args.relay.clone()))
        }
    };

    let mngr = AccessManager::new(&args.manager_config());
    let dialer = Arc::new(TcpDialer::new(args.dial_timeout));

    let mut server = TcpServer::new(args.listen_addr());
    server
        .use_handler(Arc::new(AuthMethodNegotiation::new(vec![NO_AUTHENTICATION_REQUIRED])))
        .use_handler(Arc::new(Auth))
        .use_handler(Arc::new(
            ClientSayHello::new(dialer, relays).with_timeout(args.dial_timeout),
        ))
        .set_final_handler(mngr.pipe_handler());

    server.listen_and_serve().await?;
    Ok(())
}
