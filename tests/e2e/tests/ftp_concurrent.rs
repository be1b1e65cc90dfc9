//! Concurrency tests
//!
//! Several sessions share one adapter and resolution cache.

mod common;

use anyhow::Result;
use common::*;
use futures::future::try_join_all;

/// Each client writes and reads back its own files
#[tokio::test]
async fn test_concurrent_clients_different_files() -> Result<()> {
    let server = TestServer::start().await?;
    let mut setup = server.client().await?;
    let dir = scratch_dir(&mut setup, "parallel").await?;

    let num_clients = 5;
    let tasks = (0..num_clients).map(|i| {
        let addr = server.addr();
        let dir = dir.clone();
        tokio::spawn(async move {
            let mut client = FtpClient::login(addr, TEST_USER, TEST_PASSWORD).await?;
            for j in 0..5 {
                let path = format!("{}/client-{}-{}.txt", dir, i, j);
                let content = format!("client {} iteration {}", i, j);
                client.stor(&path, content.as_bytes()).await?;
                assert_eq!(client.retr(&path).await?, content.as_bytes());
            }
            client.quit().await
        })
    });

    for result in try_join_all(tasks).await? {
        result?;
    }

    let names = setup.nlst(Some(&dir)).await?;
    assert_eq!(names.len(), num_clients * 5);

    server.shutdown().await
}

/// Concurrent writers to one path: the survivor is one whole payload
#[tokio::test]
async fn test_concurrent_writers_same_file() -> Result<()> {
    let server = TestServer::start().await?;
    let mut setup = server.client().await?;
    let dir = scratch_dir(&mut setup, "contended").await?;
    let target = format!("{}/shared.bin", dir);

    let payloads: Vec<Vec<u8>> = (0..4u8).map(|i| vec![i; 32 * 1024]).collect();
    let tasks = payloads.iter().cloned().map(|payload| {
        let addr = server.addr();
        let target = target.clone();
        tokio::spawn(async move {
            let mut client = FtpClient::login(addr, TEST_USER, TEST_PASSWORD).await?;
            client.stor(&target, &payload).await?;
            client.quit().await
        })
    });

    for result in try_join_all(tasks).await? {
        result?;
    }

    let content = setup.retr(&target).await?;
    assert!(
        payloads.contains(&content),
        "stored content is not any single writer's payload"
    );

    server.shutdown().await
}

#[cfg(feature = "stress")]
#[tokio::test]
async fn test_many_sessions_stress() -> Result<()> {
    let server = TestServer::builder()
        .max_connections(128)
        .max_connections_per_ip(128)
        .start()
        .await?;
    let mut setup = server.client().await?;
    let dir = scratch_dir(&mut setup, "stress").await?;

    let tasks = (0..100).map(|i| {
        let addr = server.addr();
        let dir = dir.clone();
        tokio::spawn(async move {
            let mut client = FtpClient::login(addr, TEST_USER, TEST_PASSWORD).await?;
            let content = random_bytes(4096);
            let path = format!("{}/s{}.bin", dir, i);
            client.stor(&path, &content).await?;
            assert_eq!(client.retr(&path).await?, content);
            client.quit().await
        })
    });

    for result in try_join_all(tasks).await? {
        result?;
    }

    server.shutdown().await
}
