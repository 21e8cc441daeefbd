use anyhow::Result;
use clap::{Parser, Subcommand};
use std::process::ExitCode;

mod commands;

#[derive(Parser)]
#[command(name = "dvt")]
#[command(about = "Device verification monitor CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one monitoring session headless, printing events as JSON lines
    Monitor {
        /// Device id (e.g. 1:1:2:16:21:DIGIL_IND_0001)
        #[arg(long)]
        device: String,

        /// Installed sensor count (3 | 6 | 12). Defaults to engine.default_cardinality.
        #[arg(long)]
        sensors: Option<u8>,

        /// Location / UI tag. Defaults to engine.default_location.
        #[arg(long)]
        ui: Option<String>,

        #[arg(long)]
        timeout_minutes: Option<u32>,

        /// Accept observations of any age
        #[arg(long, default_value_t = false)]
        historical: bool,

        /// Live-mode recency window
        #[arg(long)]
        window_minutes: Option<u32>,

        /// Layered config paths in merge order
        #[arg(long = "config")]
        config_paths: Vec<String>,
    },

    /// Query telemetry once and report which expected metrics are present
    CheckMetrics {
        #[arg(long)]
        device: String,

        #[arg(long)]
        sensors: Option<u8>,

        #[arg(long)]
        ui: Option<String>,

        /// Look-back width
        #[arg(long, default_value_t = 10)]
        minutes: u32,

        #[arg(long = "config")]
        config_paths: Vec<String>,
    },

    /// Compute layered config hash + print canonical JSON
    ConfigHash {
        /// Paths in merge order (base -> environment -> overrides)
        #[arg(required = true)]
        paths: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Silent if the file does not exist.
    let _ = dotenvy::from_filename(".env.local");

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()),
        )
        .init();

    let cli = Cli::parse();
    match cli.cmd {
        Commands::Monitor {
            device,
            sensors,
            ui,
            timeout_minutes,
            historical,
            window_minutes,
            config_paths,
        } => {
            commands::monitor::run(commands::monitor::MonitorArgs {
                device,
                sensors,
                ui,
                timeout_minutes,
                historical,
                window_minutes,
                config_paths,
            })
            .await
        }
        Commands::CheckMetrics {
            device,
            sensors,
            ui,
            minutes,
            config_paths,
        } => {
            commands::check::run(commands::check::CheckArgs {
                device,
                sensors,
                ui,
                minutes,
                config_paths,
            })
            .await
        }
        Commands::ConfigHash { paths } => {
            let path_refs: Vec<&str> = paths.iter().map(|s| s.as_str()).collect();
            let loaded = dvt_config::load_layered_yaml(&path_refs)?;
            println!("config_hash={}", loaded.config_hash);
            println!("{}", loaded.canonical_json);
            for name in dvt_config::referenced_env_names(&loaded.config_json) {
                println!("env_ref={}", name);
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}
