//! Playengine command-line entry point.

use anyhow::Result;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use playengine::cli::commands::CommandContext;
use playengine::cli::{Cli, Commands};
use playengine::config::{Config, LogFormat};
use playengine::executor::RunCode;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse_args();

    let config = match Config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("ERROR! {:#}", e);
            std::process::exit(RunCode::Error.exit_code());
        }
    };
    init_logging(&cli, &config);

    let ctx = CommandContext::new(&cli, config);
    let outcome = match &cli.command {
        Commands::Run(args) => args.execute(&ctx).await,
        Commands::Validate(args) => args.execute(&ctx).await,
    };

    let exit_code = match outcome {
        Ok(code) => code,
        Err(e) => {
            eprintln!("ERROR! {:#}", e);
            RunCode::Error.exit_code()
        }
    };
    std::process::exit(exit_code);
}

/// Install the tracing subscriber. `RUST_LOG` wins over `-v` flags, which
/// win over the configured level.
fn init_logging(cli: &Cli, config: &Config) {
    let level = cli.log_level().unwrap_or(config.logging.level.as_str());
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let format = cli.log_format.unwrap_or(config.logging.format);

    let registry = tracing_subscriber::registry().with(env_filter);
    match format {
        LogFormat::Json => registry.with(fmt::layer().json().with_writer(std::io::stderr)).init(),
        LogFormat::Text => registry
            .with(fmt::layer().with_target(cli.verbosity() >= 3).with_writer(std::io::stderr))
            .init(),
    }
}
