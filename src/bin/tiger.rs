use clap::Parser;
use sockpipe::config::{Mode, TigerArgs};
use sockpipe::coordinator::InstanceCoordinator;
use sockpipe::hello::ServerSayHello;
use sockpipe::logger::init_logger;
use sockpipe::manager::{AccessManager, ConnManager, QuotaManager};
use sockpipe::server::TcpServer;
use sockpipe::socks5::{
    Auth, AuthMethodNegotiation, Command, CommandNegotiation, CONNECT, NO_AUTHENTICATION_REQUIRED,
};
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = TigerArgs::parse();
    init_logger(&args.log_level);

    let config = args.manager.manager_config();
    let mngr: Arc<dyn ConnManager> = if args.manager.quota {
        Arc::new(QuotaManager::new(&config))
    } else {
        Arc::new(AccessManager::new(&config))
    };

    let mut server = TcpServer::new(args.listen_addr());
    match args.mode {
        Mode::Local => {
            server
                .use_handler(Arc::new(AuthMethodNegotiation::new(vec![NO_AUTHENTICATION_REQUIRED])))
                .use_handler(Arc::new(Auth));
        }
        Mode::Remote => {
            server.use_handler(Arc::new(ServerSayHello));
        }
    }
    server
        .use_handler(Arc::new(CommandNegotiation::new(vec![CONNECT])))
        .use_handler(Arc::new(Command::new(mngr.dialer())))
        .set_final_handler(mngr.pipe_handler());

    let _heart_beat = args.instance_config().map(|config| {
        info!(
            coordinator = %config.coordinator_addr,
            announce = %config.instance_addr,
            "joining coordinator"
        );
        InstanceCoordinator::new(config).spawn()
    });

    info!(mode = %args.mode, "tiger starting");
    server.listen_and_serve().await?;
    Ok(())
}
