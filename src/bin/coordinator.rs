use clap::Parser;
use sockpipe::config::CoordinatorArgs;
use sockpipe::coordinator::{serve, ServerCoordinator};
use sockpipe::logger::init_logger;
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = CoordinatorArgs::parse();
    init_logger(&args.log_level);

    let coordinator = ServerCoordinator::new(args.coordinator_config());
    let listener = TcpListener::bind(&args.listen).await?;
    serve(listener, coordinator).await?;
    Ok(())
}
