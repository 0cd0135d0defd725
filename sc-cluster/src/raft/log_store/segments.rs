//! Segment files holding log entries as newline-delimited JSON.
//!
//! A segment is named after the index of its first entry. New entries go
//! to the last segment until it holds `max_entries`, then a new one starts.

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::types::ClusterEntry;

struct ActiveSegment {
    first_index: u64,
    entry_count: usize,
    writer: BufWriter<File>,
}

/// The segment directory and its writable tail.
pub struct Segments {
    dir: PathBuf,
    max_entries: usize,
    active: Option<ActiveSegment>,
}

fn invalid_data(e: serde_json::Error) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, e)
}

impl Segments {
    /// Open the directory, creating it if needed.
    pub fn open(dir: PathBuf, max_entries: usize) -> io::Result<Self> {
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            max_entries: max_entries.max(1),
            active: None,
        })
    }

    fn segment_path(&self, first_index: u64) -> PathBuf {
        self.dir.join(format!("seg_{:020}.log", first_index))
    }

    /// Segment files sorted by first index.
    pub fn list(&self) -> io::Result<Vec<(u64, PathBuf)>> {
        let mut segments = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            let first_index = path
                .file_name()
                .and_then(|name| name.to_str())
                .and_then(|name| name.strip_prefix("seg_"))
                .and_then(|name| name.strip_suffix(".log"))
                .and_then(|index| index.parse::<u64>().ok());
            if let Some(first_index) = first_index {
                segments.push((first_index, path));
            }
        }
        segments.sort_by_key(|(index, _)| *index);
        Ok(segments)
    }

    /// Read every entry with an index above `after` and reopen the tail
    /// segment for appends.
    pub fn load(&mut self, after: Option<u64>) -> io::Result<BTreeMap<u64, ClusterEntry>> {
        let mut logs = BTreeMap::new();
        let segments = self.list()?;
        for (pos, (_, path)) in segments.iter().enumerate() {
            read_segment(path, &mut logs, pos + 1 == segments.len())?;
        }
        if let Some(after) = after {
            logs = logs.split_off(&(after + 1));
        }

        if let Some((first_index, path)) = segments.last() {
            let entry_count = logs.range(*first_index..).count();
            if entry_count < self.max_entries {
                let file = OpenOptions::new().append(true).open(path)?;
                self.active = Some(ActiveSegment {
                    first_index: *first_index,
                    entry_count,
                    writer: BufWriter::new(file),
                });
            }
        }
        Ok(logs)
    }

    fn start_segment(&mut self, first_index: u64) -> io::Result<&mut ActiveSegment> {
        let path = self.segment_path(first_index);
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(self.active.insert(ActiveSegment {
            first_index,
            entry_count: 0,
            writer: BufWriter::new(file),
        }))
    }

    /// Append entries and fsync the tail segment.
    pub fn append(&mut self, entries: &[ClusterEntry]) -> io::Result<()> {
        for entry in entries {
            let needs_new = self
                .active
                .as_ref()
                .is_none_or(|active| active.entry_count >= self.max_entries);
            if needs_new {
                if let Some(full) = self.active.as_mut() {
                    full.writer.flush()?;
                    full.writer.get_ref().sync_all()?;
                }
                self.start_segment(entry.log_id.index)?;
            }
            let Some(active) = self.active.as_mut() else {
                continue;
            };
            let line = serde_json::to_string(entry).map_err(invalid_data)?;
            writeln!(active.writer, "{}", line)?;
            active.entry_count += 1;
        }

        if let Some(active) = self.active.as_mut() {
            active.writer.flush()?;
            active.writer.get_ref().sync_all()?;
        }
        Ok(())
    }

    /// Delete segments whose entries are all at or below `index`.
    ///
    /// `logs` holds the entries that remain after the purge.
    pub fn purge_through(&mut self, index: u64, logs: &BTreeMap<u64, ClusterEntry>) -> io::Result<()> {
        let segments = self.list()?;
        for (pos, (first_index, path)) in segments.iter().enumerate() {
            let last_index = match segments.get(pos + 1) {
                Some((next_first, _)) => next_first.saturating_sub(1),
                None => logs.keys().next_back().copied().unwrap_or(index),
            };
            if last_index > index {
                break;
            }
            if self.is_active(*first_index) {
                self.active = None;
            }
            fs::remove_file(path)?;
            tracing::debug!(first_index, last_index, "Removed purged log segment");
        }
        Ok(())
    }

    /// Drop every entry at or above `index` from disk.
    ///
    /// `logs` holds the entries that remain after truncation. The segment
    /// holding the cut point is rewritten and becomes the tail.
    pub fn truncate_from(&mut self, index: u64, logs: &BTreeMap<u64, ClusterEntry>) -> io::Result<()> {
        let mut tail = None;
        for (first_index, path) in self.list()? {
            if first_index >= index {
                if self.is_active(first_index) {
                    self.active = None;
                }
                fs::remove_file(&path)?;
            } else {
                tail = Some((first_index, path));
            }
        }

        let Some((first_index, path)) = tail else {
            return Ok(());
        };
        let kept: Vec<&ClusterEntry> = logs.range(first_index..index).map(|(_, e)| e).collect();
        self.active = None;
        rewrite_segment(&path, &kept)?;
        let file = OpenOptions::new().append(true).open(&path)?;
        self.active = Some(ActiveSegment {
            first_index,
            entry_count: kept.len(),
            writer: BufWriter::new(file),
        });
        Ok(())
    }

    fn is_active(&self, first_index: u64) -> bool {
        self.active
            .as_ref()
            .is_some_and(|active| active.first_index == first_index)
    }
}

/// Read one segment into `logs`.
///
/// On the tail segment an unterminated last line is the remains of an
/// append cut short by a crash. It was never acknowledged: if it parses the
/// missing newline is restored, otherwise the line is cut off the file.
fn read_segment(path: &Path, logs: &mut BTreeMap<u64, ClusterEntry>, is_tail: bool) -> io::Result<()> {
    let data = fs::read(path)?;
    let mut offset = 0;
    while offset < data.len() {
        let rest = &data[offset..];
        let (line, terminated) = match rest.iter().position(|b| *b == b'\n') {
            Some(end) => (&rest[..end], true),
            None => (rest, false),
        };

        if !terminated && is_tail {
            repair_torn_tail(path, line, offset as u64, logs)?;
            break;
        }
        if !line.is_empty() {
            let entry: ClusterEntry = serde_json::from_slice(line).map_err(invalid_data)?;
            logs.insert(entry.log_id.index, entry);
        }
        offset += line.len() + 1;
    }
    Ok(())
}

fn repair_torn_tail(
    path: &Path,
    line: &[u8],
    offset: u64,
    logs: &mut BTreeMap<u64, ClusterEntry>,
) -> io::Result<()> {
    let file = OpenOptions::new().append(true).open(path)?;
    match serde_json::from_slice::<ClusterEntry>(line) {
        Ok(entry) => {
            let mut writer = BufWriter::new(&file);
            writer.write_all(b"\n")?;
            writer.flush()?;
            logs.insert(entry.log_id.index, entry);
        }
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                bytes = line.len(),
                error = %e,
                "Dropping torn entry at the end of the raft log"
            );
            file.set_len(offset)?;
        }
    }
    file.sync_all()
}

fn rewrite_segment(path: &Path, entries: &[&ClusterEntry]) -> io::Result<()> {
    let temp_path = path.with_extension("log.tmp");
    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(&temp_path)?;
    let mut writer = BufWriter::new(file);
    for entry in entries {
        let line = serde_json::to_string(entry).map_err(invalid_data)?;
        writeln!(writer, "{}", line)?;
    }
    writer.flush()?;
    writer.get_ref().sync_all()?;
    fs::rename(&temp_path, path)
}
