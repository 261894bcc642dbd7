use tracing::error;
use tracing_subscriber::EnvFilter;

use logcrafter::config::Config;
use logcrafter::server::LogCrafter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Optional single argument: path to a JSON configuration file.
    let config = match std::env::args().nth(1) {
        Some(path) => match Config::from_file(&path) {
            Ok(config) => config,
            Err(err) => {
                error!("{}", err);
                std::process::exit(1);
            }
        },
        None => Config::default(),
    };

    match LogCrafter::start(config) {
        Ok(server) => server.wait(),
        Err(err) => {
            error!("startup failed: {}", err);
            std::process::exit(1);
        }
    }
}
