//! Assertions for e2e tests
//!
//! Provides assertion functions for verifying server and store state.

use crate::client::{reply_code, FtpClient};
use anyhow::Result;
use rand::distributions::Alphanumeric;
use rand::Rng;

/// Assert that a remote file has the expected content
pub async fn assert_remote_content(client: &mut FtpClient, path: &str, expected: &[u8]) {
    let actual = client
        .retr(path)
        .await
        .unwrap_or_else(|e| panic!("Failed to retrieve {}: {}", path, e));
    assert_eq!(
        actual,
        expected,
        "Content mismatch at {}\nExpected {} bytes, got {} bytes",
        path,
        expected.len(),
        actual.len()
    );
}

/// Assert that a listing of `dir` contains exactly these names, in any order
pub async fn assert_dir_contains_exactly(client: &mut FtpClient, dir: &str, expected: &[&str]) {
    let mut names = client
        .nlst(Some(dir))
        .await
        .unwrap_or_else(|e| panic!("Failed to list {}: {}", dir, e));
    names.sort();
    let mut expected: Vec<String> = expected.iter().map(|s| s.to_string()).collect();
    expected.sort();
    assert_eq!(names, expected, "Unexpected entries in {}", dir);
}

/// Assert that a listing of `dir` contains these names
pub async fn assert_dir_contains(client: &mut FtpClient, dir: &str, expected: &[&str]) {
    let names = client
        .nlst(Some(dir))
        .await
        .unwrap_or_else(|e| panic!("Failed to list {}: {}", dir, e));
    for name in expected {
        assert!(
            names.iter().any(|n| n == name),
            "Expected {} in {}, got {:?}",
            name,
            dir,
            names
        );
    }
}

/// Assert that a path does not exist remotely
pub async fn assert_not_exists(client: &mut FtpClient, path: &str) {
    let reply = client
        .command(&format!("MDTM {}", path))
        .await
        .unwrap_or_else(|e| panic!("MDTM {} failed: {}", path, e));
    assert_eq!(reply.code, 550, "Expected {} to be absent, got {}", path, reply);
}

/// Assert that an operation failed with the given reply code
pub fn assert_reply_code<T: std::fmt::Debug>(result: Result<T>, expected: u16) {
    match result {
        Ok(value) => panic!("Expected reply {}, but succeeded with {:?}", expected, value),
        Err(e) => assert_eq!(
            reply_code(&e),
            Some(expected),
            "Expected reply {}, got error {}",
            expected,
            e
        ),
    }
}

/// Generate random bytes of the specified size
pub fn random_bytes(size: usize) -> Vec<u8> {
    let mut rng = rand::thread_rng();
    (0..size).map(|_| rng.gen()).collect()
}

/// Generate a random filename with the given prefix
pub fn random_filename(prefix: &str) -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(12)
        .map(char::from)
        .collect();
    format!("{}-{}", prefix, suffix)
}
