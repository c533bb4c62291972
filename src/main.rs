use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use clap::Parser;
use log::error;
use swarm_peer::block_store::BlockStore;
use swarm_peer::config::Config;
use swarm_peer::coordinator;
use swarm_peer::dependency_provider::{DependencyProvider, SwarmDeps};

/// Closed-swarm file sharing peer.
#[derive(Parser)]
#[command(version)]
struct Cli {
    /// This peer's id, as listed in PeerInfo.cfg
    peer_id: u32,
    /// Directory holding Common.cfg, PeerInfo.cfg and the per-peer file directories
    #[arg(long, default_value = ".")]
    config_dir: PathBuf,
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let config = match Config::load(&cli.config_dir, cli.peer_id) {
        Ok(config) => config,
        Err(err) => {
            error!("Invalid configuration: {}", err);
            return ExitCode::FAILURE;
        }
    };
    let block_store = match BlockStore::open(&config).await {
        Ok(block_store) => block_store,
        Err(err) => {
            error!("Could not open {}: {}", config.file_path.display(), err);
            return ExitCode::FAILURE;
        }
    };

    let deps: Arc<dyn SwarmDeps> = Arc::new(DependencyProvider::init(config, block_store));
    return match coordinator::task::run(deps).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{}", err);
            ExitCode::FAILURE
        }
    };
}
