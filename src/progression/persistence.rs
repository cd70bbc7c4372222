use std::{
    fs,
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};

use crate::progression::{
    error::{ProgressionError, persistence_failure},
    invariants::assert_ledger_consistency,
    store::ProgressionState,
};

const PERSISTENCE_VERSION: u64 = 1;

/// Versioned JSON snapshot of the whole progression state.
#[derive(Debug, Clone)]
pub struct ProgressionPersistence {
    path: PathBuf,
}

#[derive(Debug, Serialize)]
struct PersistedStateRef<'a> {
    version: u64,
    state: &'a ProgressionState,
}

#[derive(Debug, Deserialize)]
struct PersistedState {
    version: u64,
    state: ProgressionState,
}

impl ProgressionPersistence {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<Option<ProgressionState>, ProgressionError> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(persistence_failure(format!(
                    "failed to read progression state '{}': {err}",
                    self.path.display()
                )));
            }
        };

        let parsed: PersistedState = serde_json::from_str(&content).map_err(|err| {
            persistence_failure(format!(
                "failed to parse progression state '{}': {err}",
                self.path.display()
            ))
        })?;
        if parsed.version != PERSISTENCE_VERSION {
            return Err(persistence_failure(format!(
                "unsupported progression state version {} at '{}'",
                parsed.version,
                self.path.display()
            )));
        }

        assert_ledger_consistency(&parsed.state).map_err(|err| {
            persistence_failure(format!(
                "progression state '{}' is inconsistent: {err}",
                self.path.display()
            ))
        })?;

        Ok(Some(parsed.state))
    }

    /// Replaces the snapshot through a synced temp file, so readers see either
    /// the previous state or the new one.
    pub fn save(&self, state: &ProgressionState) -> Result<(), ProgressionError> {
        let parent = self.path.parent().ok_or_else(|| {
            persistence_failure(format!(
                "progression state path '{}' has no parent",
                self.path.display()
            ))
        })?;
        fs::create_dir_all(parent).map_err(|err| {
            persistence_failure(format!(
                "failed to create progression state directory '{}': {err}",
                parent.display()
            ))
        })?;

        let persisted = PersistedStateRef {
            version: PERSISTENCE_VERSION,
            state,
        };

        let tmp_path = self.path.with_extension("tmp");
        let file = fs::File::create(&tmp_path).map_err(|err| {
            persistence_failure(format!(
                "failed to create progression temp file '{}': {err}",
                tmp_path.display()
            ))
        })?;
        {
            let mut writer = BufWriter::new(file);
            serde_json::to_writer_pretty(&mut writer, &persisted).map_err(|err| {
                persistence_failure(format!(
                    "failed to serialize progression state '{}': {err}",
                    tmp_path.display()
                ))
            })?;
            writer.write_all(b"\n").map_err(|err| {
                persistence_failure(format!(
                    "failed to finalize progression state '{}': {err}",
                    tmp_path.display()
                ))
            })?;
            let file = writer.into_inner().map_err(|err| {
                persistence_failure(format!(
                    "failed to flush progression state '{}': {}",
                    tmp_path.display(),
                    err.error()
                ))
            })?;
            file.sync_all().map_err(|err| {
                persistence_failure(format!(
                    "failed to sync progression temp file '{}': {err}",
                    tmp_path.display()
                ))
            })?;
        }

        fs::rename(&tmp_path, &self.path).map_err(|err| {
            persistence_failure(format!(
                "failed to replace progression state '{}' from '{}': {err}",
                self.path.display(),
                tmp_path.display()
            ))
        })?;

        if let Ok(parent_file) = fs::File::open(parent) {
            let _ = parent_file.sync_all();
        }

        Ok(())
    }
}
