//! Node upload source: the same file, re-read on every cycle.

use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;

use loralink_core::{NodeCallbacks, OpenedReader, Reader, StreamReader};
use tracing::{info, warn};

pub struct FileUploadCallbacks {
    path: PathBuf,
}

impl FileUploadCallbacks {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

impl NodeCallbacks for FileUploadCallbacks {
    fn open_reader(&mut self) -> Option<OpenedReader> {
        let file = match File::open(&self.path) {
            Ok(f) => f,
            Err(e) => {
                warn!("cannot open {}: {}", self.path.display(), e);
                return None;
            }
        };
        let size = match file.metadata().map(|m| u32::try_from(m.len())) {
            Ok(Ok(size)) => size,
            Ok(Err(_)) => {
                warn!("{} is too large to upload", self.path.display());
                return None;
            }
            Err(e) => {
                warn!("cannot stat {}: {}", self.path.display(), e);
                return None;
            }
        };
        Some(OpenedReader::new(
            Box::new(StreamReader::new(BufReader::new(file))),
            size,
        ))
    }

    fn close_reader(&mut self, _reader: Box<dyn Reader>, success: bool) {
        if success {
            info!("uploaded {}", self.path.display());
        } else {
            warn!("upload of {} abandoned", self.path.display());
        }
    }
}
