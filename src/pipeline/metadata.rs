use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

const METADATA_FILE: &str = "metadata.json";

/// Persistent pipeline cursor. One JSON document, replaced atomically on
/// every advance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineMetadata {
    #[serde(rename = "genesis-hash")]
    pub genesis_hash: String,
    pub network: String,
    #[serde(rename = "next-round")]
    pub next_round: u64,
}

/// On-disk store for [`PipelineMetadata`] at `<data_dir>/metadata.json`.
#[derive(Debug, Clone)]
pub struct MetadataStore {
    path: PathBuf,
}

impl MetadataStore {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            path: data_dir.join(METADATA_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the persisted record, seeding the file with `initial` when it
    /// is missing. A zero-length file (a crash between create and write) is
    /// deleted and reseeded rather than parsed.
    pub fn load_or_create(&self, initial: &PipelineMetadata) -> Result<PipelineMetadata> {
        match fs::metadata(&self.path) {
            Err(err) if err.kind() == ErrorKind::NotFound => {
                self.flush(initial)?;
                Ok(initial.clone())
            }
            Err(err) => {
                Err(err).with_context(|| format!("error opening '{}'", self.path.display()))
            }
            Ok(stat) if stat.len() == 0 => {
                fs::remove_file(&self.path).with_context(|| {
                    format!("error removing empty metadata file '{}'", self.path.display())
                })?;
                self.flush(initial)?;
                Ok(initial.clone())
            }
            Ok(_) => {
                let bytes = fs::read(&self.path).with_context(|| {
                    format!("error reading metadata '{}'", self.path.display())
                })?;
                serde_json::from_slice(&bytes).with_context(|| {
                    format!("error parsing metadata '{}'", self.path.display())
                })
            }
        }
    }

    /// Encode-and-replace: the record is written to `metadata.json.temp`
    /// and renamed over the final path, so a concurrent reader only ever
    /// observes a complete document.
    pub fn flush(&self, metadata: &PipelineMetadata) -> Result<()> {
        let temp = self.path.with_extension("json.temp");
        let encoded =
            serde_json::to_vec(metadata).context("failed to encode pipeline metadata")?;
        fs::write(&temp, encoded)
            .with_context(|| format!("failed to write temp metadata '{}'", temp.display()))?;
        fs::rename(&temp, &self.path).with_context(|| {
            format!("failed to replace metadata file '{}'", self.path.display())
        })?;
        Ok(())
    }
}
