//
// Entrypoint: load config, initialize logging, build the shared state
// (storage, connector registry, key manager), spawn the background
// scheduler, and mount every HTTP component's routes (spec §6).
//
#[macro_use]
extern crate log;

#[cfg(feature = "enable_mimalloc")]
#[global_allocator]
static ALLOC: mimalloc::MiMalloc = mimalloc::MiMalloc;

mod api;
mod auth_request;
mod config;
mod connector;
mod crypto;
mod device;
mod error;
mod http_client;
mod keys;
mod ratelimit;
mod refresh;
mod scheduler;
mod secrets;
mod storage;
mod token;
mod util;

use std::sync::Arc;

use config::CONFIG;
use connector::ConnectorRegistry;
use keys::KeyManager;
use storage::{memory::MemoryStorage, Storage};

/// `fern` dispatch at the level configured by `LOG_LEVEL`, quieting
/// `rocket`'s own request logging since it duplicates what this crate's
/// handlers already log at the points that matter (spec §4.12, ambient
/// component O). Trimmed of the teacher's syslog/log-reopen machinery —
/// this crate has no admin panel to trigger a reopen and no deployment
/// target here that expects syslog over a plain stdout stream.
fn init_logging() -> Result<(), fern::InitError> {
    let level = CONFIG.log_level().parse().unwrap_or(log::LevelFilter::Info);

    fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!("[{}][{}][{}] {}", chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f"), record.target(), record.level(), message))
        })
        .level(level)
        .level_for("rocket", log::LevelFilter::Warn)
        .chain(std::io::stdout())
        .apply()?;
    Ok(())
}

fn rocket_config() -> rocket::figment::Figment {
    let addr: std::net::SocketAddr = CONFIG.listen_addr().parse().unwrap_or_else(|e| {
        println!("[ERROR] invalid LISTEN_ADDR `{}`: {e}", CONFIG.listen_addr());
        std::process::exit(12)
    });

    rocket::Config::figment()
        .merge(("address", addr.ip()))
        .merge(("port", addr.port()))
        .merge(("log_level", rocket::config::LogLevel::Off))
}

#[rocket::main]
async fn main() {
    init_logging().expect("failed to initialize logging");
    info!("starting openid-federator {} (issuer {})", env!("CARGO_PKG_VERSION"), CONFIG.issuer());

    let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
    let connectors = Arc::new(ConnectorRegistry::new(storage.clone()));
    let keys = Arc::new(KeyManager::new(storage.clone()));

    let _background = scheduler::spawn(storage.clone(), keys.clone());

    let launched = rocket::custom(rocket_config())
        .manage(storage)
        .manage(connectors)
        .manage(keys)
        .attach(util::AppHeaders())
        .attach(util::Cors())
        .mount("/", api::discovery::routes())
        .mount("/", api::auth::routes())
        .mount("/", api::token::routes())
        .mount("/", api::device::routes())
        .mount("/", api::introspect::routes())
        .mount("/", api::registration::routes())
        .launch()
        .await;

    if let Err(e) = launched {
        error!("server error: {e}");
        std::process::exit(1);
    }
}
