//! Portcullis gateway entry point.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use portcullis_config::{ConfigLoader, GatewayConfig};
use portcullis_gateway::{build_chain, GatewayServer, ServerResult, VERSION};
use portcullis_telemetry::init_telemetry;
use tracing::info;

/// Portcullis API gateway.
#[derive(Debug, Parser)]
#[command(name = "portcullis", version, about)]
struct Args {
    /// Configuration file (TOML or JSON). Replaces the built-in defaults.
    #[arg(short, long, env = "PORTCULLIS_CONFIG")]
    config: Option<PathBuf>,

    /// Prefix for environment overrides, e.g. `PORTCULLIS__SERVER__HTTP_ADDR`.
    #[arg(long, default_value = "PORTCULLIS")]
    env_prefix: String,

    /// Start from development defaults (debug level, pretty logs).
    #[arg(long)]
    dev: bool,

    /// Load and validate the configuration, print the filter chain, then exit.
    #[arg(long)]
    validate: bool,
}

fn load_config(args: &Args) -> ServerResult<GatewayConfig> {
    let mut loader = if args.dev {
        ConfigLoader::new().with_development()
    } else {
        ConfigLoader::new().with_defaults()
    };
    if let Some(path) = &args.config {
        loader = loader.with_file(path)?;
    }
    Ok(loader.with_dotenv().with_env_prefix(&args.env_prefix).load()?)
}

async fn run(args: Args) -> ServerResult<()> {
    let config = load_config(&args)?;

    if args.validate {
        let chain = build_chain(&config)?;
        println!("configuration OK: {} routes, {} services", config.routes.len(), config.services.len());
        for (priority, name) in chain.describe() {
            println!("{priority:>12}  {name}");
        }
        return Ok(());
    }

    let telemetry = init_telemetry(&config.logging, &config.metrics)?;
    info!(version = VERSION, addr = %config.server.http_addr, "starting portcullis");

    let chain = build_chain(&config)?;
    GatewayServer::new(config, chain)
        .with_metrics(telemetry.metrics().cloned())
        .run()
        .await
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("portcullis: {e}");
            ExitCode::from(u8::try_from(e.exit_code()).unwrap_or(1))
        }
    }
}
