use crate::error::SpoolError;
use crate::reading::Reading;
use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};

/// Durable, bounded, ordered staging store for readings that could not be
/// delivered. The on-disk file mirrors the in-memory deque after every
/// mutation; rewrites go through a temp file + rename so a crash mid-write
/// never leaves a half-written spool.
pub struct ReadingSpool {
    path: PathBuf,
    capacity: usize,
    entries: VecDeque<Reading>,
}

impl ReadingSpool {
    pub fn open(path: &Path, capacity: usize) -> Result<Self, SpoolError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let mut entries = VecDeque::new();
        if path.exists() {
            let raw = fs::read_to_string(path)?;
            match serde_json::from_str::<VecDeque<Reading>>(&raw) {
                Ok(loaded) => entries = loaded,
                Err(err) => {
                    let quarantine = path.with_extension("json.corrupt");
                    tracing::warn!(
                        error = %err,
                        path = %path.display(),
                        quarantine = %quarantine.display(),
                        "spool file is corrupt; quarantining and starting empty"
                    );
                    fs::rename(path, &quarantine)?;
                }
            }
        }

        let mut spool = Self {
            path: path.to_path_buf(),
            capacity: capacity.max(1),
            entries,
        };
        if spool.entries.len() > spool.capacity {
            let excess = spool.entries.len() - spool.capacity;
            tracing::warn!(
                dropped = excess,
                capacity = spool.capacity,
                "spool exceeds capacity on load; dropping oldest entries"
            );
            spool.entries.drain(..excess);
            spool.persist()?;
        }
        Ok(spool)
    }

    /// Appends at the tail, evicting from the head first when full. Never
    /// rejects a new reading; guarantees `len() <= capacity` afterwards.
    pub fn append(&mut self, reading: Reading) -> Result<(), SpoolError> {
        while self.entries.len() >= self.capacity {
            self.entries.pop_front();
            tracing::warn!(capacity = self.capacity, "spool full; evicted oldest reading");
        }
        self.entries.push_back(reading);
        self.persist()
    }

    /// Full ordered snapshot, oldest first, without removal.
    pub fn load_all(&self) -> Vec<Reading> {
        self.entries.iter().cloned().collect()
    }

    pub fn clear(&mut self) -> Result<(), SpoolError> {
        self.entries.clear();
        self.persist()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn persist(&self) -> Result<(), SpoolError> {
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_string(&self.entries)?)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}
