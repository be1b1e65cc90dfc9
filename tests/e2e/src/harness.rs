//! Test harness for e2e tests
//!
//! Starts a real FTP server on an ephemeral loopback port, backed by an
//! in-memory object store the test can inspect directly.
//!
//! ```ignore
//! let server = TestServer::start().await?;
//! let mut client = server.client().await?;
//! client.stor("/hello.txt", b"hi").await?;
//! server.shutdown().await?;
//! ```

use crate::client::{FtpClient, Reply};
use anyhow::{Context, Result};
use gdrive_ftp::adapter::{AdapterOptions, FilesystemAdapter};
use gdrive_ftp::config::ServerConfig;
use gdrive_ftp::path;
use gdrive_ftp::server::{FtpServer, ShutdownHandle};
use gdrive_ftp::store::memory::MemoryStore;
use gdrive_ftp::store::{ObjectMetadata, ObjectStore};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::info;
use tracing_subscriber::EnvFilter;

pub const TEST_USER: &str = "tester";
pub const TEST_PASSWORD: &str = "s3cret";

/// Initialize logging for tests (call once per test run)
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_test_writer()
        .try_init();
}

/// Builder for a [`TestServer`] with non-default settings
pub struct HarnessBuilder {
    root_path: String,
    max_connections: usize,
    max_connections_per_ip: usize,
    idle_timeout: Duration,
    max_upload_size: u64,
    cache_ttl: Duration,
    max_list_entries: usize,
}

impl Default for HarnessBuilder {
    fn default() -> Self {
        let defaults = AdapterOptions::default();
        Self {
            root_path: "/".to_string(),
            max_connections: 64,
            max_connections_per_ip: 32,
            idle_timeout: Duration::from_secs(60),
            max_upload_size: 16 * 1024 * 1024,
            cache_ttl: defaults.cache_ttl,
            max_list_entries: defaults.max_list_entries,
        }
    }
}

impl HarnessBuilder {
    /// Expose only this store folder; it is created before the server starts
    pub fn root_path(mut self, root_path: &str) -> Self {
        self.root_path = root_path.to_string();
        self
    }

    pub fn max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    pub fn max_connections_per_ip(mut self, max: usize) -> Self {
        self.max_connections_per_ip = max;
        self
    }

    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    pub fn max_upload_size(mut self, max: u64) -> Self {
        self.max_upload_size = max;
        self
    }

    pub fn cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    pub fn max_list_entries(mut self, max: usize) -> Self {
        self.max_list_entries = max;
        self
    }

    pub async fn start(self) -> Result<TestServer> {
        init_logging();

        let store = Arc::new(MemoryStore::default());
        let adapter = Arc::new(FilesystemAdapter::new(
            store.clone(),
            AdapterOptions {
                root_id: store.root_id().to_string(),
                cache_ttl: self.cache_ttl,
                max_list_entries: self.max_list_entries,
                ..AdapterOptions::default()
            },
        ));

        // Create the exposed root folder chain
        let mut prefix = String::from("/");
        for segment in path::segments(&self.root_path) {
            prefix = path::join(&prefix, segment);
            adapter
                .create_directory(&prefix)
                .await
                .with_context(|| format!("Failed to create root folder {}", prefix))?;
        }

        let config = ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            username: TEST_USER.to_string(),
            password: TEST_PASSWORD.to_string(),
            root_path: self.root_path,
            max_connections: self.max_connections,
            max_connections_per_ip: self.max_connections_per_ip,
            passive_address: None,
            passive_ports: None,
            idle_timeout: self.idle_timeout,
            max_upload_size: self.max_upload_size,
        };

        let server = FtpServer::bind(config, adapter.clone()).await?;
        let addr = server.local_addr()?;
        let shutdown = server.shutdown_handle();
        let task = tokio::spawn(server.serve());

        info!("Test FTP server listening on {}", addr);

        Ok(TestServer {
            addr,
            store,
            adapter,
            shutdown,
            task,
        })
    }
}

/// A running FTP server over a [`MemoryStore`]
pub struct TestServer {
    addr: SocketAddr,
    store: Arc<MemoryStore>,
    adapter: Arc<FilesystemAdapter>,
    shutdown: ShutdownHandle,
    task: JoinHandle<gdrive_ftp::Result<()>>,
}

impl TestServer {
    /// Start a server with default settings
    pub async fn start() -> Result<Self> {
        Self::builder().start().await
    }

    pub fn builder() -> HarnessBuilder {
        HarnessBuilder::default()
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// The backing store, for checking what actually reached it
    pub fn store(&self) -> &MemoryStore {
        &self.store
    }

    /// The adapter the server uses
    pub fn adapter(&self) -> &FilesystemAdapter {
        &self.adapter
    }

    /// A logged-in client
    pub async fn client(&self) -> Result<FtpClient> {
        FtpClient::login(self.addr, TEST_USER, TEST_PASSWORD).await
    }

    /// A connected but not logged-in client, with the greeting
    pub async fn connect(&self) -> Result<(FtpClient, Reply)> {
        FtpClient::connect(self.addr).await
    }

    /// Children of a store folder, looked up by store path
    pub async fn store_children(&self, store_path: &str) -> Result<Vec<ObjectMetadata>> {
        let folder = self.adapter.stat(store_path).await?;
        Ok(self.store.list_children(&folder.id, None, usize::MAX).await?)
    }

    /// Stop accepting connections and wait for the accept loop to end
    pub async fn shutdown(self) -> Result<()> {
        self.shutdown.shutdown();
        self.task.await??;
        Ok(())
    }
}
