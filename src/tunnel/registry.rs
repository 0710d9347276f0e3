//! Detached port-forwards started from the command line.
//!
//! `mqtop forward start` leaves `kubectl` running after mqtop exits, so the
//! pid and command line are recorded in `~/.mqtop/forward_state.json` for
//! later `status` and `stop` invocations.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::launcher::{pid_alive, terminate_pid};

/// One recorded forward.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForwardRecord {
    pub pid: u32,
    pub command: Vec<String>,
}

/// What `stop` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// SIGTERM sent to a live process.
    Stopped(u32),
    /// The recorded process was already gone; its record was removed.
    AlreadyExited,
    /// Nothing recorded for this provider.
    NotRecorded,
}

/// Provider name to forward record, persisted as JSON.
#[derive(Debug)]
pub struct ForwardRegistry {
    path: PathBuf,
    records: BTreeMap<String, ForwardRecord>,
}

impl ForwardRegistry {
    /// Load the registry; a missing file is an empty registry.
    pub fn load(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        let records = match fs::read_to_string(&path) {
            Ok(content) => serde_json::from_str(&content)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e),
        };
        Ok(Self { path, records })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, provider: &str) -> Option<&ForwardRecord> {
        self.records.get(provider)
    }

    pub fn insert(&mut self, provider: &str, record: ForwardRecord) -> io::Result<()> {
        self.records.insert(provider.to_string(), record);
        self.save()
    }

    /// The record for `provider` if its process is still alive.
    /// A stale record is dropped from the file.
    pub fn live(&mut self, provider: &str) -> io::Result<Option<ForwardRecord>> {
        self.live_with(provider, pid_alive)
    }

    /// Send SIGTERM to the recorded forward and forget it.
    pub fn stop(&mut self, provider: &str) -> io::Result<StopOutcome> {
        let Some(record) = self.records.remove(provider) else {
            return Ok(StopOutcome::NotRecorded);
        };
        self.save()?;

        if !pid_alive(record.pid) {
            return Ok(StopOutcome::AlreadyExited);
        }
        match terminate_pid(record.pid) {
            Ok(()) => Ok(StopOutcome::Stopped(record.pid)),
            // raced with the process exiting on its own
            Err(_) => Ok(StopOutcome::AlreadyExited),
        }
    }

    fn live_with(
        &mut self,
        provider: &str,
        alive: impl Fn(u32) -> bool,
    ) -> io::Result<Option<ForwardRecord>> {
        match self.records.get(provider) {
            Some(record) if alive(record.pid) => Ok(Some(record.clone())),
            Some(_) => {
                self.records.remove(provider);
                self.save()?;
                Ok(None)
            }
            None => Ok(None),
        }
    }

    fn save(&self) -> io::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(&self.records)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        fs::write(&self.path, json)
    }
}
