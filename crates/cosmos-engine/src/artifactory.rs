// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Per-run artifact directories.
//!
//! Every run owns a directory `<root>/<sync_id>/<RFC3339 execution date>/`
//! holding one file per well-known slot: append-only logs for the pipeline
//! stages and single-object JSON documents for configs, catalog, and state.
//! Log slots open their backing file at most once per artifactory and prefix
//! every line with the attempt number that first opened them.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use tracing::warn;

use cosmos_core::config::{ARTIFACT_DIR_ENV, rewrite_to_host};
use cosmos_core::error::{Error, Result};

/// Well-known artifact slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    /// Source connector side-band output.
    Source,
    /// Destination connector side-band output.
    Destination,
    /// Normalization container output.
    Normalization,
    /// Pipeline stage errors and per-attempt diagnostics.
    Worker,
    /// Source endpoint configuration document.
    SourceConfig,
    /// Destination endpoint configuration document.
    DestinationConfig,
    /// Configured catalog document.
    Catalog,
    /// Sync state as it was when the attempt started.
    BeforeState,
    /// Sync state after the run committed.
    AfterState,
}

impl Slot {
    /// All slots, in file-name order.
    pub const ALL: [Slot; 9] = [
        Slot::Source,
        Slot::Destination,
        Slot::Normalization,
        Slot::Worker,
        Slot::SourceConfig,
        Slot::DestinationConfig,
        Slot::Catalog,
        Slot::BeforeState,
        Slot::AfterState,
    ];

    /// File name of the slot inside the per-run directory.
    pub fn name(self) -> &'static str {
        match self {
            Slot::Source => "source",
            Slot::Destination => "destination",
            Slot::Normalization => "normalization",
            Slot::Worker => "worker",
            Slot::SourceConfig => "source-config",
            Slot::DestinationConfig => "destination-config",
            Slot::Catalog => "catalog",
            Slot::BeforeState => "before-state",
            Slot::AfterState => "after-state",
        }
    }

    /// Resolve a slot from its file name.
    pub fn from_name(name: &str) -> Option<Slot> {
        Slot::ALL.iter().copied().find(|s| s.name() == name)
    }

    fn index(self) -> usize {
        Slot::ALL.iter().position(|s| *s == self).unwrap()
    }
}

/// An append-only, attempt-prefixed line writer for one log slot.
///
/// The prefix is fixed when the slot is first opened; writes are best-effort
/// the way log output is.
pub struct ArtifactRef {
    prefix: String,
    file: Mutex<File>,
}

impl ArtifactRef {
    /// Append one line. Write failures are logged and swallowed.
    pub fn println(&self, line: impl std::fmt::Display) {
        let mut file = self.file.lock().unwrap();
        if let Err(e) = writeln!(file, "{}{}", self.prefix, line) {
            warn!(error = %e, "failed to append artifact line");
        }
    }

    fn flush(&self) {
        let mut file = self.file.lock().unwrap();
        let _ = file.flush();
    }
}

/// Handle to one run's artifact directory.
pub struct Artifactory {
    root: PathBuf,
    path: PathBuf,
    refs: [Mutex<Option<Arc<ArtifactRef>>>; 9],
}

impl Artifactory {
    /// Open (creating if needed) the artifact directory for a run.
    pub fn open(root: &Path, sync_id: i64, execution_date: DateTime<Utc>) -> Result<Artifactory> {
        let path = root
            .join(sync_id.to_string())
            .join(execution_date.to_rfc3339_opts(SecondsFormat::Secs, false));

        std::fs::create_dir_all(&path)?;
        // Connector containers run as arbitrary users and write through the
        // bind mount.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o777))?;
        }

        Ok(Artifactory {
            root: root.to_path_buf(),
            path,
            refs: Default::default(),
        })
    }

    /// The process-visible per-run directory.
    pub fn dir(&self) -> &Path {
        &self.path
    }

    /// Get the append-only line writer for a log slot.
    ///
    /// The backing file is opened at most once per artifactory; the first
    /// caller's attempt number becomes the line prefix for the slot's
    /// lifetime. Safe against concurrent callers.
    pub fn get_ref(&self, slot: Slot, attempt: u32) -> Result<Arc<ArtifactRef>> {
        let mut guard = self.refs[slot.index()].lock().unwrap();
        if let Some(existing) = guard.as_ref() {
            return Ok(existing.clone());
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.path.join(slot.name()))?;
        let artifact = Arc::new(ArtifactRef {
            prefix: format!("[Attempt {attempt:03}] "),
            file: Mutex::new(file),
        });
        *guard = Some(artifact.clone());
        Ok(artifact)
    }

    /// Overwrite a single-object slot with the JSON encoding of `value`.
    /// A `None` value is a no-op.
    pub fn write<T: Serialize>(&self, slot: Slot, value: Option<&T>) -> Result<()> {
        let Some(value) = value else {
            return Ok(());
        };
        let bytes = serde_json::to_vec(value)?;
        std::fs::write(self.path.join(slot.name()), bytes)?;
        Ok(())
    }

    /// Host-visible path of a slot file, or `None` when the file does not
    /// exist. The process-visible root is rewritten to the host root from
    /// `ARTIFACT_DIR` because connector containers bind-mount these files.
    pub fn path_of(&self, slot: Slot) -> Option<PathBuf> {
        let path = self.path.join(slot.name());
        if !path.exists() {
            return None;
        }
        Some(rewrite_to_host(&path, &self.root, ARTIFACT_DIR_ENV))
    }

    /// Raw bytes of a slot file. `NotFound` when absent.
    pub fn read_bytes(&self, slot: Slot) -> Result<Vec<u8>> {
        let path = self.path.join(slot.name());
        if !path.exists() {
            return Err(Error::not_found("Requested artifact does not exist"));
        }
        Ok(std::fs::read(path)?)
    }

    /// Flush and drop all opened writers. Idempotent.
    pub fn close(&self) {
        for slot_ref in &self.refs {
            if let Some(artifact) = slot_ref.lock().unwrap().take() {
                artifact.flush();
            }
        }
    }
}

impl Drop for Artifactory {
    fn drop(&mut self) {
        self.close();
    }
}
