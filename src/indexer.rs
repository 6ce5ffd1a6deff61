use std::sync::Arc;

use clap::Parser;
use dispatch::Stage;
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

    /// Capability this instance serves, overrides the config file
    #[arg(long)]
    capability: Option<String>,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    let mut cfg: dispatch::config::Config = utils::load("stage", args.config);
    if let Some(capability) = args.capability {
        cfg.stage.capability = capability;
    }
    cfg.validate(Stage::Indexer).unwrap();

    log::set(format!(
        "indexer={},dispatch={},pubsub={},storage={},signal={}",
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

    let cancel = signal::root_token(utils::shutdown_signal());
    if let Err(e) = dispatch::serve(Stage::Indexer, cfg, store, pubsub, cancel).await {
        error!("{} failed: {:?}", Stage::Indexer, e);
        std::process::exit(1);
    }
    info!("Server shutdown");
}
