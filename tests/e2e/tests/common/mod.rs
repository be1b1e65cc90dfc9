//! Common test utilities and fixtures

#![allow(dead_code)]

pub use gdrive_ftp_e2e::*;

use anyhow::Result;

/// Start a default server and log one client in
pub async fn server_and_client() -> Result<(TestServer, FtpClient)> {
    let server = TestServer::start().await?;
    let client = server.client().await?;
    Ok((server, client))
}

/// Create a uniquely named directory for one test and return its path
pub async fn scratch_dir(client: &mut FtpClient, prefix: &str) -> Result<String> {
    let dir = format!("/{}", random_filename(prefix));
    client.mkd(&dir).await?;
    Ok(dir)
}
