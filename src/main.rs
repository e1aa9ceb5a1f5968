use clap::Parser;

use volary::auth::{AuthCore, ServerIdentity};
use volary::config::{Cli, Config};
use volary::handlers::ServerCore;
use volary::logging::{self, Level};
use volary::server;
use volary::storage::Storage;
use volary::vlogi;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let verbose = cli.verbose;
    let cfg = Config::resolve(cli)?;
    logging::init(if verbose { Level::Debug } else { Level::Info });

    std::fs::create_dir_all(&cfg.data_dir)?;
    std::fs::create_dir_all(&cfg.body_cache_dir)?;

    let storage = Storage::open(&cfg.data_dir.join("volary.db"))?;

    let mut auth = AuthCore::new(&cfg.data_dir, cfg.challenge_ttl_secs, cfg.access_ttl_secs);
    let identity = ServerIdentity::load_or_create(&cfg.data_dir)?;
    auth.activate(identity);

    let core = ServerCore::new(&cfg, storage, auth)?;
    vlogi!("volary: owner {} serving on {}", cfg.owner_did, cfg.bind_addr);

    server::run(&cfg.bind_addr, cfg.body_cache_dir.clone(), core).await?;
    Ok(())
}
