//! Vote, commit and purge markers kept next to the log segments.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::types::{ClusterLogId, ClusterVote};

const HARD_STATE_FILE: &str = "hard_state.json";

/// Small mutable state rewritten atomically on every change.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HardState {
    /// Last vote cast or granted.
    pub vote: Option<ClusterVote>,
    /// Highest log id known to be committed.
    pub committed: Option<ClusterLogId>,
    /// Last log id removed by compaction.
    pub last_purged: Option<ClusterLogId>,
}

impl HardState {
    /// Load the state from `dir`, or the default if none was written yet.
    pub fn load(dir: &Path) -> io::Result<Self> {
        let path = dir.join(HARD_STATE_FILE);
        if !path.exists() {
            return Ok(Self::default());
        }
        let reader = BufReader::new(File::open(&path)?);
        serde_json::from_reader(reader).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }

    /// Write the state to `dir` via a temp file and rename.
    pub fn store(&self, dir: &Path) -> io::Result<()> {
        let path = dir.join(HARD_STATE_FILE);
        let temp_path = path.with_extension("json.tmp");

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&temp_path)?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer(&mut writer, self)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        writer.flush()?;
        writer.get_ref().sync_all()?;

        fs::rename(&temp_path, &path)
    }
}
