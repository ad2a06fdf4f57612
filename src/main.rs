//! Binary entry point: loads configuration, builds the pixel converter and
//! map catalog, and runs the broker's accept loop until it crashes or the
//! process is killed.

use std::path::Path;

use log::{error, info};
use pixsim_relay::config::RelayConfig;
use pixsim_relay::map::MapCatalog;
use pixsim_relay::pixel::{LookupTable, PixelConverter};
use pixsim_relay::script::ReqwestFetcher;
use pixsim_relay::Broker;

#[tokio::main]
async fn main() {
    env_logger::init();

    let config = load_config();

    let lookup_csv = match std::fs::read_to_string(&config.lookup_table_path) {
        Ok(csv) => csv,
        Err(err) => {
            error!("failed to read lookup table {}: {err}", config.lookup_table_path);
            std::process::exit(1);
        }
    };
    let lookup = match LookupTable::parse(&lookup_csv) {
        Ok(table) => table,
        Err(err) => {
            error!("malformed lookup table {}: {err}", config.lookup_table_path);
            std::process::exit(1);
        }
    };

    let dialect_ids: Vec<_> = config.dialects.iter().map(|d| d.id.as_str().into()).collect();
    let converter = PixelConverter::build(lookup, &config.dialects, &config.script_cache_dir, || {
        Box::new(ReqwestFetcher::new())
    })
    .await;

    let map_catalog = MapCatalog::scan(Path::new(&config.map_catalog_root), converter.lookup(), &dialect_ids);

    let broker = Broker::new(config, converter, map_catalog);

    info!("pixsim relay starting up");
    if let Err(err) = broker.run().await {
        error!("broker accept loop exited: {err}");
        std::process::exit(1);
    }
}

fn load_config() -> RelayConfig {
    let path = std::env::var("PIXSIM_RELAY_CONFIG").unwrap_or_else(|_| "pixsim-relay.toml".to_string());
    match std::fs::read_to_string(&path) {
        Ok(raw) => RelayConfig::from_toml_str(&raw).unwrap_or_else(|err| {
            error!("failed to parse {path}: {err}, using defaults");
            RelayConfig::default()
        }),
        Err(_) => RelayConfig::default(),
    }
}
