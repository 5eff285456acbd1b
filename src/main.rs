use anyhow::Context;
use clap::{Parser, Subcommand};
use kagemori_nginx::conf;
use kagemori_nginx::config::Config;
use kagemori_nginx::process::{NginxController, NginxState, OsProbe, SystemRunner};
use kagemori_nginx::writer::ConfigWriter;
use kagemori_nginx::ProxyInstance;
use std::path::{Path, PathBuf};
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "kagemori-nginx", version, about = "Generate nginx configuration for auth-gated virtual hosts and control nginx")]
struct Cli {
    /// Settings file (TOML); defaults to ./kagemori-nginx.toml when present
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log at debug level
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Provision the prefix directory and write the nginx configuration
    Render,
    /// Write the configuration, then start nginx (or reload it when already running)
    Start,
    /// Stop nginx
    Stop,
    /// Write the configuration, then reload nginx
    Reload,
    /// Show whether nginx is running
    Status {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
    /// List the server names in the deployed configuration file
    Hosts,
}

fn main() {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(format!("kagemori_nginx={}", level).parse().expect("valid log directive")),
        )
        .init();

    if let Err(e) = run(cli) {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Render => {
            let instance = build_instance(&config)?;
            println!("{}", instance.config().path().display());
        }
        Commands::Start => {
            let mut instance = build_instance(&config)?;
            let acted = instance.start()?;
            info!(acted, "start finished");
        }
        Commands::Reload => {
            let mut instance = build_instance(&config)?;
            let acted = instance.reload()?;
            info!(acted, "reload finished");
        }
        Commands::Stop => {
            // Leaves the configuration file untouched
            let mut controller = NginxController::new(&config.nginx);
            let acted = controller.stop()?;
            info!(acted, "stop finished");
        }
        Commands::Status { json } => {
            let mut controller = NginxController::new(&config.nginx);
            let state = controller.refresh_state()?;
            print_status(state, controller.pid(), json)?;
        }
        Commands::Hosts => {
            let writer = ConfigWriter::new(config.nginx.config_path());
            let entries = writer.read()?;
            for name in deployed_server_names(&entries) {
                println!("{}", name);
            }
        }
    }

    Ok(())
}

const DEFAULT_CONFIG: &str = "kagemori-nginx.toml";

/// Load the settings file.
///
/// A path given with `--config` must exist. Without one, `kagemori-nginx.toml`
/// in the working directory is used if present, otherwise built-in defaults.
fn load_config(path: Option<&Path>) -> anyhow::Result<Config> {
    let path = match path {
        Some(path) => path,
        None if Path::new(DEFAULT_CONFIG).exists() => Path::new(DEFAULT_CONFIG),
        None => {
            info!(path = DEFAULT_CONFIG, "Settings file not found, using defaults");
            return Ok(Config::default());
        }
    };

    let config = Config::load(path)
        .with_context(|| format!("Failed to load settings from {}", path.display()))?;
    info!(
        path = %path.display(),
        prefix = %config.nginx.prefix.display(),
        hosts = config.hosts.len(),
        "Settings loaded"
    );
    Ok(config)
}

fn build_instance(config: &Config) -> anyhow::Result<ProxyInstance> {
    ProxyInstance::from_config(config, SystemRunner, OsProbe)
        .context("Failed to write nginx configuration")
}

fn print_status(state: NginxState, pid: Option<u32>, json: bool) -> anyhow::Result<()> {
    if json {
        let status = serde_json::json!({ "state": state, "pid": pid });
        println!("{}", serde_json::to_string(&status)?);
        return Ok(());
    }

    match (state, pid) {
        (NginxState::Running, Some(pid)) => println!("running (pid {})", pid),
        _ => println!("stopped"),
    }
    Ok(())
}

fn deployed_server_names(entries: &[conf::Entry]) -> Vec<String> {
    conf::blocks(entries, "http")
        .flat_map(|http| conf::blocks(http.children(), "server"))
        .filter_map(|server| conf::find_directive(server.children(), "server_name"))
        .flat_map(|args| args.iter().cloned())
        .collect()
}
