//! Ledger persistence.
//!
//! The ledger file is a single JSON document: version, lots, disposals
//! and the YTD cache. Keys are stable across versions and unknown keys
//! are ignored on load, so older binaries can read newer files.
//!
//! Writes are atomic: serialize to `<path>.tmp-<pid>` in the same
//! directory, fsync, then rename over the target. The previous file is
//! kept as `<path>.bak` and is never truncated before the rename, so a
//! concurrent reader (the lot viewer) always sees a complete document.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::error::{Result, TaxError};
use crate::ledger::{Disposal, FifoLedger, TaxLot};

/// Current on-disk document version.
pub const LEDGER_VERSION: u32 = 1;

/// On-disk ledger document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerDocument {
    pub version: u32,
    pub lots: Vec<TaxLot>,
    pub disposals: Vec<Disposal>,
    #[serde(default)]
    pub ytd_cache: BTreeMap<i32, Decimal>,
}

impl LedgerDocument {
    #[must_use]
    pub fn from_ledger(ledger: &FifoLedger) -> Self {
        Self {
            version: LEDGER_VERSION,
            lots: ledger.lots().to_vec(),
            disposals: ledger.disposals().to_vec(),
            ytd_cache: ledger.ytd_cache().clone(),
        }
    }

    #[must_use]
    pub fn into_ledger(self) -> FifoLedger {
        FifoLedger::from_parts(self.lots, self.disposals, self.ytd_cache)
    }
}

/// Storage seam for the FIFO ledger. The engine depends only on this
/// trait; the JSON file implementation is wired at startup.
pub trait LedgerStore: Send + Sync {
    /// Load the persisted document, or `None` when no ledger exists yet.
    fn load(&self) -> Result<Option<LedgerDocument>>;

    /// Persist the document atomically.
    fn save(&self, doc: &LedgerDocument) -> Result<()>;
}

/// JSON file store with atomic-rename writes and a `.bak` of the
/// previous generation.
#[derive(Debug, Clone)]
pub struct JsonLedgerStore {
    path: PathBuf,
}

impl JsonLedgerStore {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn backup_path(&self) -> PathBuf {
        let mut os = self.path.as_os_str().to_owned();
        os.push(".bak");
        PathBuf::from(os)
    }

    fn tmp_path(&self) -> PathBuf {
        let mut os = self.path.as_os_str().to_owned();
        os.push(format!(".tmp-{}", std::process::id()));
        PathBuf::from(os)
    }
}

impl LedgerStore for JsonLedgerStore {
    fn load(&self) -> Result<Option<LedgerDocument>> {
        if !self.path.exists() {
            info!(path = %self.path.display(), "No ledger file, starting fresh");
            return Ok(None);
        }
        let raw = fs::read_to_string(&self.path)?;
        let doc: LedgerDocument = serde_json::from_str(&raw)
            .map_err(|e| TaxError::LedgerCorruption(format!("{}: {e}", self.path.display())))?;
        info!(
            path = %self.path.display(),
            version = doc.version,
            lots = doc.lots.len(),
            disposals = doc.disposals.len(),
            "Ledger loaded"
        );
        Ok(Some(doc))
    }

    fn save(&self, doc: &LedgerDocument) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir)?;
        }

        let tmp = self.tmp_path();
        {
            let mut file = fs::File::create(&tmp)?;
            let json = serde_json::to_string_pretty(doc)?;
            file.write_all(json.as_bytes())?;
            file.sync_all()?;
        }

        // Keep the previous generation reachable as .bak. A hard link
        // preserves the old inode without a window where the target is
        // missing; fall back to a copy on filesystems without links.
        if self.path.exists() {
            let bak = self.backup_path();
            let _ = fs::remove_file(&bak);
            if fs::hard_link(&self.path, &bak).is_err() {
                if let Err(e) = fs::copy(&self.path, &bak) {
                    warn!(error = %e, "Failed to retain ledger backup");
                }
            }
        }

        if let Err(e) = fs::rename(&tmp, &self.path) {
            let _ = fs::remove_file(&tmp);
            return Err(e.into());
        }

        info!(
            path = %self.path.display(),
            lots = doc.lots.len(),
            "Ledger saved"
        );
        Ok(())
    }
}
