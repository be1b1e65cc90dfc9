//! gdrive-ftp daemon entry point

use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use gdrive_ftp::adapter::FilesystemAdapter;
use gdrive_ftp::auth::{self, InstalledFlowProvider, TokenProviderWrapper};
use gdrive_ftp::config::{BackendConfig, Config, GDriveBackendConfig, LoggingConfig};
use gdrive_ftp::server::FtpServer;
use gdrive_ftp::store::gdrive::DriveStore;
use gdrive_ftp::store::memory::MemoryStore;
use gdrive_ftp::store::timeout::TimeoutStore;
use gdrive_ftp::store::ObjectStore;

/// Print usage information
fn print_usage() {
    eprintln!("Usage: gdrive-ftp <config.yaml>");
    eprintln!();
    eprintln!("gdrive-ftp - Serve a Google Drive folder over FTP");
    eprintln!();
    eprintln!("Arguments:");
    eprintln!("  config.yaml    Path to configuration file");
    eprintln!();
    eprintln!("Environment:");
    eprintln!("  OAUTH_CONSOLE  Set to 1/true/yes to authorize by pasting a code");
    eprintln!("  RUST_LOG       Overrides logging.level");
    eprintln!();
    eprintln!("Example:");
    eprintln!("  gdrive-ftp /etc/gdrive-ftp/config.yaml");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Parse arguments
    let args: Vec<String> = std::env::args().collect();
    if args.len() != 2 {
        print_usage();
        std::process::exit(1);
    }

    let config_path = PathBuf::from(&args[1]);

    // Load configuration
    let config = match Config::from_file(&config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config: {}", e);
            std::process::exit(1);
        }
    };

    // Validate configuration
    if let Err(e) = config.validate() {
        eprintln!("Configuration error: {}", e);
        std::process::exit(1);
    }

    init_logging(&config.logging)?;

    info!("gdrive-ftp starting");
    info!("Loaded configuration from {:?}", config_path);

    // Both ring and aws-lc may be linked; pick one for every TLS client
    let _ = rustls::crypto::ring::default_provider().install_default();

    let store: Arc<dyn ObjectStore> = match &config.backend {
        BackendConfig::GDrive(gdrive) => match connect_drive(gdrive).await {
            Ok(store) => store,
            Err(e) => {
                error!("Google Drive setup failed: {}", e);
                std::process::exit(1);
            }
        },
        BackendConfig::Memory => {
            info!("Using in-memory backend; contents are discarded on exit");
            Arc::new(MemoryStore::new(config.root_id()))
        }
    };

    let adapter = Arc::new(FilesystemAdapter::new(store, config.adapter_options()));
    let server = FtpServer::bind(config.server.clone(), adapter).await?;
    info!(
        "Serving {} as FTP root on {}",
        config.server.root_path,
        server.local_addr()?
    );

    // Set up signal handling for graceful shutdown
    let shutdown = server.shutdown_handle();
    ctrlc::set_handler(move || {
        info!("Received shutdown signal");
        shutdown.shutdown();
    })?;

    info!("Press Ctrl+C to stop");
    server.serve().await?;

    info!("Shut down, exiting");
    Ok(())
}

/// Authorize against Drive and build the time-bounded store
async fn connect_drive(
    config: &GDriveBackendConfig,
) -> Result<Arc<dyn ObjectStore>, Box<dyn std::error::Error>> {
    let env_console = std::env::var(auth::CONSOLE_ENV_VAR).ok();
    let console = auth::console_flow_requested(config.console_auth, env_console.as_deref());

    let provider =
        InstalledFlowProvider::new(&config.credentials_path, &config.token_path, console).await?;
    let tokens = TokenProviderWrapper::new(provider);

    // Run any interactive authorization before accepting clients
    tokens
        .warm_up()
        .await
        .map_err(|e| format!("Authorization failed: {}", e))?;
    info!("Authorized with Google Drive");

    let drive = DriveStore::new(tokens)?;
    Ok(Arc::new(
        TimeoutStore::new(drive, config.request_timeout).with_upload_limit(config.upload_timeout),
    ))
}

/// Initialize tracing; `RUST_LOG` takes precedence over the configured level
fn init_logging(config: &LoggingConfig) -> Result<(), Box<dyn std::error::Error>> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    match &config.file {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(std::sync::Mutex::new(file))
                .init();
        }
        None => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
        }
    }
    Ok(())
}
