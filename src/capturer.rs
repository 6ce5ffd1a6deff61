use std::sync::Arc;

use capturer::roster::roster_from_config;
use capturer::segment::clock::SystemClock;
use clap::Parser;
use storage::{ClipStore, OpendalClipStore};
use tracing::{debug, error, info, warn};

mod log;
mod utils;

#[derive(Parser)]
#[command(version)]
struct Args {
    /// Set config file path
    #[arg(short, long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    let cfg: capturer::config::Config = utils::load("capturer", args.config);
    cfg.validate().unwrap();

    log::set(format!(
        "capturer={},clipwatch={},pubsub={},storage={},signal={}",
        cfg.log.level, cfg.log.level, cfg.log.level, cfg.log.level, cfg.log.level
    ));
    warn!("set log level : {}", cfg.log.level);
    debug!("config : {:?}", cfg);

    let store: Arc<dyn ClipStore> = Arc::new(
        OpendalClipStore::from_config(&cfg.storage)
            .await
            .unwrap(),
    );
    let pubsub = pubsub::connect(&cfg.pubsub).await.unwrap();
    let clock = Arc::new(SystemClock);
    let roster = roster_from_config(&cfg.roster, cfg.capturer.liveness_threshold(), clock.clone())
        .await
        .unwrap();

    let cancel = signal::root_token(utils::shutdown_signal());
    if let Err(e) = capturer::serve(
        cfg,
        roster,
        store,
        pubsub,
        clock,
        cancel,
    )
    .await
    {
        error!("capturer failed: {:?}", e);
        std::process::exit(1);
    }
    info!("Server shutdown");
}
