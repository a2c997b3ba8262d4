//! Common test helper functions.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use sandterm::model::RunConfiguration;

const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Create a unique temporary directory for a test.
///
/// # Panics
///
/// Panics if the directory cannot be created.
#[must_use]
pub fn temp_dir(prefix: &str) -> PathBuf {
    let mut dir = std::env::temp_dir();
    let stamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    dir.push(format!("sandterm-{prefix}-{}-{stamp}", std::process::id()));

    #[allow(clippy::expect_used)]
    fs::create_dir_all(&dir).expect("failed to create temp directory");

    dir
}

/// Write a run configuration as JSON.
///
/// # Panics
///
/// Panics if serialization or file writing fails.
#[allow(clippy::expect_used)]
pub fn write_config(path: &Path, config: &RunConfiguration) {
    let json = serde_json::to_vec_pretty(config).expect("serialize config");
    fs::write(path, json).expect("write config");
}

/// Poll `condition` until it holds or `timeout` elapses.
///
/// Returns whether the condition was met.
pub async fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}
