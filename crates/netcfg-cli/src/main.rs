mod commands;

use clap::{Parser, Subcommand};
use commands::EXIT_FAILURE;
use netcfg_core::{ClassId, ConfigError, NetcfgConfig};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::debug;

#[derive(Debug, Parser)]
#[command(
    name = "netcfg",
    version,
    about = "Install and remove network configuration components under an exclusive store lock"
)]
struct Cli {
    /// Path to the configuration store directory (overrides the config file).
    #[arg(long, global = true)]
    store: Option<String>,

    /// Path to the config file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Name the write lock is taken under (overrides the config file).
    #[arg(long, global = true)]
    app_name: Option<String>,

    /// How long to wait for the write lock, in milliseconds.
    #[arg(long, global = true)]
    lock_timeout_ms: Option<u64>,

    /// Output results as structured JSON.
    #[arg(long, default_value_t = false, global = true)]
    json: bool,

    /// Enable verbose (debug) logging output.
    #[arg(short, long, default_value_t = false, global = true)]
    verbose: bool,

    /// Enable trace-level logging (more detailed than --verbose).
    #[arg(long, default_value_t = false, global = true)]
    trace: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Install a component.
    Install {
        /// Component id (e.g. "tap0901", "ms_pacer").
        component_id: String,
        /// Setup class: a UUID or one of adapter, client, service, protocol.
        #[arg(long, value_parser = parse_class)]
        class: ClassId,
        /// Install package to stage before installing.
        #[arg(long)]
        inf: Option<PathBuf>,
    },
    /// Uninstall a component.
    Uninstall {
        /// Component id.
        component_id: String,
    },
    /// List installed components.
    List,
    /// Show the effective configuration.
    Config,
}

fn parse_class(s: &str) -> Result<ClassId, String> {
    s.parse()
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_level = if cli.trace {
        "trace"
    } else if cli.verbose {
        "debug"
    } else {
        "warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("NETCFG_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .init();

    let config = match load_config(&cli) {
        Ok(c) => c,
        Err(msg) => {
            eprintln!("error: {msg}");
            return ExitCode::from(EXIT_FAILURE);
        }
    };
    let store_path = config
        .store
        .clone()
        .unwrap_or_else(|| expand_tilde("~/.local/share/netcfg"));
    let json_output = cli.json;
    debug!("using store {}", store_path.display());

    let result = match cli.command {
        Commands::Install {
            component_id,
            class,
            inf,
        } => commands::install::run(
            &store_path,
            &config,
            &component_id,
            class,
            inf.as_deref(),
            json_output,
        ),
        Commands::Uninstall { component_id } => {
            commands::uninstall::run(&store_path, &config, &component_id, json_output)
        }
        Commands::List => commands::list::run(&store_path, &config, json_output),
        Commands::Config => commands::show_config::run(&store_path, &config, json_output),
    };

    match result {
        Ok(code) => ExitCode::from(code),
        Err(msg) => {
            eprintln!("error: {msg}");
            ExitCode::from(EXIT_FAILURE)
        }
    }
}

/// Config file, then command-line overrides.
fn load_config(cli: &Cli) -> Result<NetcfgConfig, String> {
    let mut config = match &cli.config {
        Some(path) => NetcfgConfig::load(path).map_err(|e| e.to_string())?,
        None => match NetcfgConfig::load_default() {
            Ok(c) => c,
            Err(ConfigError::NoHome) => NetcfgConfig::default(),
            Err(e) => return Err(e.to_string()),
        },
    };
    if let Some(store) = &cli.store {
        config.store = Some(expand_tilde(store));
    }
    if let Some(name) = &cli.app_name {
        config.app_name.clone_from(name);
    }
    if let Some(ms) = cli.lock_timeout_ms {
        config.lock_timeout_ms = ms;
    }
    Ok(config)
}

fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join(stripped);
        }
    }
    PathBuf::from(path)
}
