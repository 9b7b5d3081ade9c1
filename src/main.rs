mod commands;

use anyhow::Result;
use contract_bind::config::Config;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr so stdout stays machine-readable JSON
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    let matches = commands::cli().get_matches();

    // Handle special commands first
    if matches.get_flag("generate-config") {
        let sample_config = Config::generate_sample();
        println!("{}", sample_config);
        return Ok(());
    }

    if matches.get_flag("config-path") {
        match Config::default_config_path() {
            Ok(path) => {
                println!("{}", path.display());
                return Ok(());
            }
            Err(e) => {
                error!("Could not determine default config path: {}", e);
                return Err(e);
            }
        }
    }

    // Explicit --config, else the default location if it exists
    let config_path = match matches.get_one::<String>("config") {
        Some(path) => Some(std::path::PathBuf::from(path)),
        None => Config::default_config_path().ok().filter(|path| path.exists()),
    };
    let mut config = Config::load_or_default(config_path).await;

    let network = matches.get_one::<String>("network").cloned();
    if let Some(network) = &network {
        config.default_network = network.clone();
    }

    if matches.get_flag("allow-writes") {
        config.security.allow_write_operations = true;
    }

    info!("Default network: {}", config.default_network);
    info!(
        "Write operations allowed: {}",
        config.security.allow_write_operations
    );

    let rpc_url = matches.get_one::<String>("rpc-url").cloned();
    let mut runner = commands::CommandRunner::new(config, network)?.with_rpc_url(rpc_url);
    match runner.run(&matches).await {
        Ok(output) => {
            println!("{}", serde_json::to_string_pretty(&output)?);
            Ok(())
        }
        Err(e) => {
            error!("{}", e);
            Err(e)
        }
    }
}
