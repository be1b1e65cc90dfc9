//! gdrive-ftp: serve a Google Drive folder tree over FTP
//!
//! Drive addresses objects by opaque ID and parent links, while FTP
//! clients speak in slash-separated paths. This library bridges the two.
//!
//! # Architecture
//!
//! - **Object store**: the [`store::ObjectStore`] trait is the boundary to
//!   the remote service. [`store::gdrive::DriveStore`] talks to Drive,
//!   [`store::memory::MemoryStore`] keeps everything in process.
//! - **Resolution**: [`resolver::PathResolver`] walks a path segment by
//!   segment to the object it names, remembering every resolved prefix in
//!   a TTL [`cache::ResolutionCache`].
//! - **Adapter**: [`adapter::FilesystemAdapter`] offers stat, list, read,
//!   write, delete, mkdir and rename over paths and keeps the cache
//!   consistent with its own mutations.
//! - **Server**: [`server::FtpServer`] maps FTP commands onto adapter calls.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use gdrive_ftp::adapter::{AdapterOptions, FilesystemAdapter};
//! use gdrive_ftp::store::memory::MemoryStore;
//!
//! # async fn example() -> gdrive_ftp::Result<()> {
//! let adapter = FilesystemAdapter::new(Arc::new(MemoryStore::default()), AdapterOptions::default());
//! adapter.create_directory("/docs").await?;
//! adapter.write_file("/docs/hello.txt", "hi".into()).await?;
//! # Ok(())
//! # }
//! ```

pub mod adapter;
pub mod auth;
pub mod cache;
pub mod config;
pub mod env;
pub mod error;
pub mod path;
pub mod resolver;
pub mod server;
pub mod store;

pub use error::{GatewayError, Result};
