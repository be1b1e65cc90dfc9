//! E2E test harness for gdrive-ftp
//!
//! Runs the real FTP server in-process over an in-memory object store and
//! drives it through a small FTP client, so every test exercises the full
//! path from control connection to store.
//!
//! ```ignore
//! use gdrive_ftp_e2e::TestServer;
//!
//! #[tokio::test]
//! async fn my_test() -> anyhow::Result<()> {
//!     let server = TestServer::start().await?;
//!     let mut client = server.client().await?;
//!     client.mkd("/docs").await?;
//!     server.shutdown().await
//! }
//! ```

pub mod assertions;
pub mod client;
pub mod harness;

pub use assertions::*;
pub use client::{reply_code, FtpClient, Reply, UnexpectedReply};
pub use harness::{HarnessBuilder, TestServer, TEST_PASSWORD, TEST_USER};
