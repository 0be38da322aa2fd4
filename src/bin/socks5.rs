use clap::Parser;
use sockpipe::config::Socks5Args;
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
    let args = Socks5Args::parse();
    init_logger(&args.log_level);

    let config = args.manager.manager_config();
    let mngr: Arc<dyn ConnManager> = if args.manager.quota {
        info!(
            quota = config.quota_per_period,
            refill = ?config.refill_interval,
            "quota manager enabled"
        );
        Arc::new(QuotaManager::new(&config))
    } else {
        Arc::new(AccessManager::new(&config))
    };

    let mut server = TcpServer::new(format!("{}:{}", args.ip, args.port));
    server
        .use_handler(Arc::new(AuthMethodNegotiation::new(vec![NO_AUTHENTICATION_REQUIRED])))
        .use_handler(Arc::new(Auth))
        .use_handler(Arc::new(CommandNegotiation::new(vec![CONNECT])))
        .use_handler(Arc::new(Command::new(mngr.dialer())))
        .set_final_handler(mngr.pipe_handler());

    server.listen_and_serve().await?;
    Ok(())
}
