use clap::Parser;
use hostgate_core::{ConfigError, Gateway, GatewayConfig};
use std::error::Error;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tiny_http::Server;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::EnvFilter;

const DEFAULT_CONFIG: &str = "hostgate.toml";

#[derive(Parser)]
#[command(name = "hostgate", version, about = "Host provisioning gateway")]
struct Cli {
    /// Configuration file [default: ./hostgate.toml when present].
    #[arg(long)]
    config: Option<PathBuf>,

    /// Append the log to this file instead of stderr.
    ///
    /// The file is held open for the life of the process and is not
    /// reopened on SIGUSR1; rotate it with logrotate's `copytruncate`.
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Write the process id to this file while running.
    #[arg(long)]
    pid_file: Option<PathBuf>,
}

fn init_tracing(log_file: Option<&Path>) -> Result<Option<WorkerGuard>, Box<dyn Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let Some(path) = log_file else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
        return Ok(None);
    };

    let name = path
        .file_name()
        .ok_or_else(|| format!("invalid log file path: {}", path.display()))?;
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir)?;
    let appender = RollingFileAppender::builder()
        .rotation(Rotation::NEVER)
        .filename_prefix(name.to_string_lossy().into_owned())
        .build(dir)?;
    let (writer, guard) = tracing_appender::non_blocking(appender);
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .init();
    Ok(Some(guard))
}

fn load_config(path: Option<&Path>) -> Result<GatewayConfig, ConfigError> {
    match path {
        Some(path) => GatewayConfig::load(path),
        None if Path::new(DEFAULT_CONFIG).is_file() => GatewayConfig::load(Path::new(DEFAULT_CONFIG)),
        None => {
            info!("no {DEFAULT_CONFIG} found, using built-in defaults");
            Ok(GatewayConfig::default())
        }
    }
}

/// Holds `<pid>\n` for as long as the process runs.
struct PidFile(PathBuf);

impl PidFile {
    fn create(path: PathBuf) -> std::io::Result<Self> {
        fs::write(&path, format!("{}\n", std::process::id()))?;
        Ok(Self(path))
    }
}

impl Drop for PidFile {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.0) {
            warn!("failed to remove pid file {}: {e}", self.0.display());
        }
    }
}

fn run(cli: &Cli) -> Result<(), Box<dyn Error + Send + Sync>> {
    let config = load_config(cli.config.as_deref())?;
    let gateway = Arc::new(Gateway::from_config(&config)?);
    info!("playbooks: {}", config.automation.dir.display());
    info!("logs: {}", config.automation.log_dir.display());

    let server = Arc::new(Server::http(config.server.addr.as_str())?);
    let _pid = cli.pid_file.clone().map(PidFile::create).transpose()?;

    let handle = Arc::clone(&server);
    ctrlc::set_handler(move || {
        info!("shutdown requested");
        handle.unblock();
    })?;

    info!("hostgate listening on {}", config.server.addr);
    hostgate_server::serve(&server, &gateway);
    info!("hostgate stopped");
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let _guard = match init_tracing(cli.log_file.as_deref()) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("hostgate: failed to set up logging: {e}");
            return ExitCode::FAILURE;
        }
    };

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{e}");
            ExitCode::FAILURE
        }
    }
}
