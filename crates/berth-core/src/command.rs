//! External process execution.
//!
//! Every native tool berth relies on (`xcrun simctl`, `open`, `xcode-select`)
//! is invoked through the [`CommandRunner`] trait so the pipelines built on top
//! of it can be exercised with scripted fakes instead of a real Xcode install.

use std::io;
use std::process::Output;

use async_trait::async_trait;
use tracing::debug;

/// Runs an external program to completion and captures its output.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `program` with `args`, waiting for it to exit.
    ///
    /// A non-zero exit status is *not* an error at this level; callers inspect
    /// [`Output::status`] and decide how to classify the failure.
    async fn run(&self, program: &str, args: &[&str]) -> io::Result<Output>;
}

/// Production [`CommandRunner`] backed by `tokio::process`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn run(&self, program: &str, args: &[&str]) -> io::Result<Output> {
        debug!(program, ?args, "spawning");
        let output = tokio::process::Command::new(program)
            .args(args)
            .kill_on_drop(true)
            .output()
            .await?;
        debug!(program, status = ?output.status.code(), "exited");
        Ok(output)
    }
}

/// Lossy UTF-8 view of a captured stream, trimmed of trailing whitespace.
pub fn stream_text(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).trim_end().to_string()
}
