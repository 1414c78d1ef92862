use super::stage::StageKind;
use std::fs;
use std::path::{Path, PathBuf};

/// Per-stage configuration handed to a plugin at init time.
///
/// `payload` is the stage-specific configuration serialized back out of the
/// pipeline document. `data_dir` is a directory reserved for the plugin; it
/// is `None` when creation failed and the stage must tolerate running
/// without one.
#[derive(Debug, Clone)]
pub struct PluginConfig {
    pub payload: String,
    pub data_dir: Option<PathBuf>,
}

impl PluginConfig {
    /// Builds the config for one stage, eagerly creating its data directory
    /// at `<root>/<kind>_<name>`. Creation failure is logged and leaves
    /// `data_dir` empty rather than failing initialization.
    pub fn for_stage(root: &Path, kind: StageKind, name: &str, payload: String) -> Self {
        let dir = root.join(format!("{kind}_{name}"));
        let data_dir = match fs::create_dir_all(&dir) {
            Ok(()) => Some(dir),
            Err(err) => {
                tracing::error!(
                    kind = %kind,
                    plugin = name,
                    error = %err,
                    "unable to create plugin data directory"
                );
                None
            }
        };
        Self { payload, data_dir }
    }
}
