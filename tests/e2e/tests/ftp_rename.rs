//! Rename tests
//!
//! Renames change the name only; the object stays in its folder.

mod common;

use anyhow::Result;
use common::*;

#[tokio::test]
async fn test_rename_file() -> Result<()> {
    let (server, mut client) = server_and_client().await?;
    let dir = scratch_dir(&mut client, "rename").await?;
    let old = format!("{}/old.txt", dir);
    let new = format!("{}/new.txt", dir);

    client.stor(&old, b"payload").await?;
    // Warm the cache on the old path before renaming
    assert_remote_content(&mut client, &old, b"payload").await;

    client.rename(&old, &new).await?;

    assert_not_exists(&mut client, &old).await;
    assert_remote_content(&mut client, &new, b"payload").await;
    assert_dir_contains_exactly(&mut client, &dir, &["new.txt"]).await;

    server.shutdown().await
}

#[tokio::test]
async fn test_rename_directory_moves_children_paths() -> Result<()> {
    let (server, mut client) = server_and_client().await?;
    let dir = scratch_dir(&mut client, "renamedir").await?;
    client.mkd(&format!("{}/before", dir)).await?;
    client
        .stor(&format!("{}/before/inner.txt", dir), b"inner")
        .await?;
    assert_remote_content(&mut client, &format!("{}/before/inner.txt", dir), b"inner").await;

    client
        .rename(&format!("{}/before", dir), &format!("{}/after", dir))
        .await?;

    assert_not_exists(&mut client, &format!("{}/before/inner.txt", dir)).await;
    assert_remote_content(&mut client, &format!("{}/after/inner.txt", dir), b"inner").await;

    server.shutdown().await
}

#[tokio::test]
async fn test_rename_onto_existing_name_is_rejected() -> Result<()> {
    let (server, mut client) = server_and_client().await?;
    let dir = scratch_dir(&mut client, "clash").await?;
    let a = format!("{}/a.txt", dir);
    let b = format!("{}/b.txt", dir);
    client.stor(&a, b"a").await?;
    client.stor(&b, b"b").await?;

    assert_reply_code(client.rename(&a, &b).await, 550);
    assert_remote_content(&mut client, &a, b"a").await;
    assert_remote_content(&mut client, &b, b"b").await;

    server.shutdown().await
}

#[tokio::test]
async fn test_rename_into_other_directory_keeps_parent() -> Result<()> {
    let (server, mut client) = server_and_client().await?;
    let src = scratch_dir(&mut client, "src").await?;
    let dst = scratch_dir(&mut client, "dst").await?;
    client.stor(&format!("{}/file.txt", src), b"x").await?;

    client
        .rename(&format!("{}/file.txt", src), &format!("{}/moved.txt", dst))
        .await?;

    assert_dir_contains_exactly(&mut client, &src, &["moved.txt"]).await;
    assert_dir_contains_exactly(&mut client, &dst, &[]).await;

    server.shutdown().await
}

#[tokio::test]
async fn test_rename_sequence_errors() -> Result<()> {
    let (server, mut client) = server_and_client().await?;

    let reply = client.command("RNTO /anything").await?;
    assert_eq!(reply.code, 503);

    let reply = client.command("RNFR /missing.txt").await?;
    assert_eq!(reply.code, 550);
    // A failed RNFR leaves nothing pending
    let reply = client.command("RNTO /other.txt").await?;
    assert_eq!(reply.code, 503);

    server.shutdown().await
}
