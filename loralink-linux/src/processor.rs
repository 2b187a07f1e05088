//! Post-processing: run the configured command on each archived upload.

use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{info, warn};

/// Consume archived paths until the sender side is dropped.
pub async fn run_processor(command: Option<String>, mut rx: UnboundedReceiver<PathBuf>) {
    while let Some(path) = rx.recv().await {
        let Some(command) = command.as_deref() else {
            continue;
        };
        if let Err(e) = process(command, &path).await {
            warn!("processing {}: {}", path.display(), e);
        }
    }
}

/// Run `<command> <path> 2>&1` through the shell, logging each output line.
pub async fn process(command: &str, path: &Path) -> io::Result<Vec<String>> {
    info!("processing {}", path.display());
    let mut child = Command::new("sh")
        .arg("-c")
        .arg(format!("{} \"$1\" 2>&1", command))
        .arg("loralink-process")
        .arg(path)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .spawn()?;

    let mut output = Vec::new();
    if let Some(stdout) = child.stdout.take() {
        let mut lines = BufReader::new(stdout).lines();
        while let Some(line) = lines.next_line().await? {
            info!("{}", line);
            output.push(line);
        }
    }
    let status = child.wait().await?;
    if !status.success() {
        warn!("{} exited with {}", command, status);
    }
    Ok(output)
}
