use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::{
    fs::{File, OpenOptions},
    io::AsyncWriteExt,
    sync::Mutex,
};

use super::{HistoryEvent, HistoryStore};
use crate::error::HistoryError;

/// Append-only history file, one JSON document per line
#[derive(Debug)]
pub struct JsonLinesHistoryStore {
    path: PathBuf,
    file: Mutex<File>,
}

impl JsonLinesHistoryStore {
    /// Open (creating if needed) the history file at `path`
    ///
    /// # Errors
    ///
    /// If the file or its parent directory cannot be created or opened.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, HistoryError> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;

        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl HistoryStore for JsonLinesHistoryStore {
    async fn append(&self, event: &HistoryEvent) -> Result<(), HistoryError> {
        let mut line = serde_json::to_vec(event)?;
        line.push(b'\n');

        let mut file = self.file.lock().await;
        file.write_all(&line).await?;
        file.flush().await?;

        Ok(())
    }
}
