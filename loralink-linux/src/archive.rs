//! Gateway storage: one file per upload under `<root>/<node>/<date>/`.

use std::fs::{self, File};
use std::io::{self, Write as _};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use loralink_core::{GatewayCallbacks, NodeId, Writer};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{info, warn};

/// `<root>/<node id hex>/<YYYYMMDD>/<HHMMSS>_fkn.fkpb`
pub fn archive_path(root: &Path, node_id: NodeId, at: DateTime<Local>) -> PathBuf {
    root.join(node_id.to_hex())
        .join(at.format("%Y%m%d").to_string())
        .join(format!("{}_fkn.fkpb", at.format("%H%M%S")))
}

/// File sink created on first write, so an upload with no data leaves nothing behind.
pub struct FileWriter {
    path: PathBuf,
    file: Option<File>,
}

impl FileWriter {
    pub fn new(path: PathBuf) -> Self {
        Self { path, file: None }
    }

    fn file(&mut self) -> io::Result<&mut File> {
        if self.file.is_none() {
            if let Some(parent) = self.path.parent() {
                fs::create_dir_all(parent)?;
            }
            self.file = Some(File::create(&self.path)?);
        }
        self.file
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "archive file not open"))
    }
}

impl Writer for FileWriter {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.file()?.write_all(data)?;
        Ok(data.len())
    }

    fn close(&mut self) -> io::Result<()> {
        match self.file.take() {
            Some(f) => f.sync_all(),
            None => Ok(()),
        }
    }
}

pub struct ArchivingCallbacks {
    root: PathBuf,
    current: Option<PathBuf>,
    completed: Option<UnboundedSender<PathBuf>>,
}

impl ArchivingCallbacks {
    pub fn new(root: PathBuf) -> Self {
        Self {
            root,
            current: None,
            completed: None,
        }
    }

    /// Paths of successfully closed uploads are sent here.
    pub fn with_completed(mut self, tx: UnboundedSender<PathBuf>) -> Self {
        self.completed = Some(tx);
        self
    }
}

impl GatewayCallbacks for ArchivingCallbacks {
    fn open_writer(&mut self, node_id: NodeId, size: u32) -> io::Result<Box<dyn Writer>> {
        let path = archive_path(&self.root, node_id, Local::now());
        info!("archiving {} bytes from {} to {}", size, node_id, path.display());
        self.current = Some(path.clone());
        Ok(Box::new(FileWriter::new(path)))
    }

    fn close_writer(&mut self, writer: Box<dyn Writer>, success: bool) {
        drop(writer);
        let Some(path) = self.current.take() else {
            return;
        };
        if !success {
            warn!("incomplete upload at {}", path.display());
            return;
        }
        if !path.exists() {
            info!("empty upload, nothing archived");
            return;
        }
        info!("archived {}", path.display());
        if let Some(tx) = &self.completed {
            if tx.send(path).is_err() {
                warn!("processor is gone");
            }
        }
    }
}
