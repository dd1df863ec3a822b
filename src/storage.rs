// Manages local file storage for branches and their items.
//
// ⚠️ VERSION BUMP REQUIRED:
// Changes to the Item struct serialization require incrementing
// STORAGE_VERSION below and adding a step to `migrate_to_current`.
use crate::context::AppContext;
use crate::history::{HistoryEntry, ImportHistory};
use crate::import::{ImportRequest, ReconciliationPlan, plan};
use crate::model::{BranchListEntry, Item};
use crate::store::BranchStore;
use anyhow::{Context, Result, bail};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};

pub const DEFAULT_BRANCH: &str = "main";

// Version history:
// - v0: bare JSON array of items (hand-written files)
// - v1: {version, branch, items}
const STORAGE_VERSION: u32 = 1;

#[derive(Serialize, Deserialize)]
struct BranchData {
    #[serde(default)]
    version: u32,
    #[serde(default)]
    branch: String,
    items: Vec<Item>,
}

/// Tracks whether the last load of each branch file succeeded.
/// A failed load blocks saves so unreadable data is never overwritten.
static LOAD_STATE_MAP: OnceLock<Mutex<HashMap<PathBuf, LoadState>>> = OnceLock::new();

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoadState {
    Uninitialized,
    Success,
    Failed,
}

impl LoadState {
    fn get(path: &Path) -> LoadState {
        let map = LOAD_STATE_MAP.get_or_init(|| Mutex::new(HashMap::new()));
        map.lock()
            .map(|m| *m.get(path).unwrap_or(&LoadState::Uninitialized))
            .unwrap_or(LoadState::Uninitialized)
    }

    fn set(path: &Path, state: LoadState) {
        let map = LOAD_STATE_MAP.get_or_init(|| Mutex::new(HashMap::new()));
        if let Ok(mut m) = map.lock() {
            m.insert(path.to_path_buf(), state);
        }
    }
}

/// Branch names end up in file names: letters, digits, `-`, `_` and `.` only.
pub fn validate_branch_name(name: &str) -> Result<()> {
    if name.is_empty() {
        bail!("Branch name is empty");
    }
    if name.starts_with('.') {
        bail!("Branch name '{}' must not start with '.'", name);
    }
    if let Some(c) = name
        .chars()
        .find(|c| !(c.is_alphanumeric() || matches!(c, '-' | '_' | '.')))
    {
        bail!("Branch name '{}' contains invalid character '{}'", name, c);
    }
    Ok(())
}

/// Registry of known branches.
pub struct BranchRegistry;

impl BranchRegistry {
    // Caller holds the registry lock.
    fn read_unlocked(path: &Path) -> Result<Vec<BranchListEntry>> {
        if !path.exists() {
            return Ok(Vec::new());
        }
        let content = fs::read_to_string(path)?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse branch registry '{}'", path.display()))
    }

    /// Branches recorded on disk, in creation order.
    pub fn load(ctx: &dyn AppContext) -> Result<Vec<BranchListEntry>> {
        let path = ctx.get_registry_path()?;
        if !path.exists() {
            return Ok(Vec::new());
        }
        LocalStorage::with_lock(&path, || Self::read_unlocked(&path))
    }

    /// All branches, with `default_branch` first when it was never recorded.
    pub fn list(ctx: &dyn AppContext, default_branch: &str) -> Result<Vec<BranchListEntry>> {
        let mut branches = Self::load(ctx)?;
        if !branches.iter().any(|b| b.name == default_branch) {
            branches.insert(
                0,
                BranchListEntry {
                    name: default_branch.to_string(),
                },
            );
        }
        Ok(branches)
    }

    /// Records `name` if it is not there yet. Read and write happen under one
    /// lock so concurrent first commits of different branches all land.
    pub fn ensure(ctx: &dyn AppContext, name: &str) -> Result<()> {
        validate_branch_name(name)?;
        let path = ctx.get_registry_path()?;
        LocalStorage::with_lock(&path, || {
            let mut branches = Self::read_unlocked(&path)?;
            if branches.iter().any(|b| b.name == name) {
                return Ok(());
            }
            branches.push(BranchListEntry {
                name: name.to_string(),
            });
            let json = serde_json::to_string_pretty(&branches)?;
            LocalStorage::atomic_write(&path, json)
        })
    }
}

/// Result of [`LocalStorage::import_into_branch`].
#[derive(Debug, Clone)]
pub struct ImportReport {
    pub plan: ReconciliationPlan,
    pub committed: bool,
    pub written: usize,
}

pub struct LocalStorage;

impl LocalStorage {
    /// Helper to get a sidecar lock file path
    fn get_lock_path(file_path: &Path) -> PathBuf {
        let mut lock_path = file_path.to_path_buf();
        if let Some(ext) = lock_path.extension() {
            let mut new_ext = ext.to_os_string();
            new_ext.push(".lock");
            lock_path.set_extension(new_ext);
        } else {
            lock_path.set_extension("lock");
        }
        lock_path
    }

    /// Runs `f` while holding an exclusive lock on the sidecar lock file.
    /// Not reentrant: never call it for the same path from inside `f`.
    pub fn with_lock<F, T>(file_path: &Path, f: F) -> Result<T>
    where
        F: FnOnce() -> Result<T>,
    {
        let lock_path = Self::get_lock_path(file_path);
        let file = fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)
            .with_context(|| format!("Failed to open lock file '{}'", lock_path.display()))?;

        file.lock_exclusive()?;
        let result = f();
        file.unlock()?;
        result
    }

    /// Atomic write: Write to .tmp file then rename
    pub fn atomic_write<P: AsRef<Path>, C: AsRef<[u8]>>(path: P, contents: C) -> Result<()> {
        let path = path.as_ref();
        let tmp_path = path.with_extension("tmp");
        fs::write(&tmp_path, contents)?;
        fs::rename(tmp_path, path)?;
        Ok(())
    }

    // Caller holds the lock. `upgrade` rewrites files in an older format.
    fn read_unlocked(path: &Path, branch: &str, upgrade: bool) -> Result<Vec<Item>> {
        let result = if path.exists() {
            Self::read_versioned(path, branch, upgrade)
        } else {
            Ok(Vec::new())
        };
        match &result {
            Ok(_) => LoadState::set(path, LoadState::Success),
            Err(_) => LoadState::set(path, LoadState::Failed),
        }
        result
    }

    fn read_versioned(path: &Path, branch: &str, upgrade: bool) -> Result<Vec<Item>> {
        let json = fs::read_to_string(path)
            .with_context(|| format!("Failed to read branch file '{}'", path.display()))?;

        let (items, needs_upgrade) = match serde_json::from_str::<BranchData>(&json) {
            Ok(data) if data.version == STORAGE_VERSION => (data.items, false),
            Ok(data) => (Self::migrate_to_current(data.version, &json)?, true),
            Err(_) => (Self::migrate_to_current(0, &json)?, true),
        };

        if needs_upgrade && upgrade {
            Self::write_unlocked(path, branch, &items)?;
        }
        Ok(items)
    }

    // Caller holds the lock.
    fn write_unlocked(path: &Path, branch: &str, items: &[Item]) -> Result<()> {
        let data = BranchData {
            version: STORAGE_VERSION,
            branch: branch.to_string(),
            items: items.to_vec(),
        };
        let json = serde_json::to_string_pretty(&data)?;
        Self::atomic_write(path, json)
    }

    fn migrate_to_current(old_version: u32, json: &str) -> Result<Vec<Item>> {
        if old_version > STORAGE_VERSION {
            bail!(
                "Branch storage version {} is newer than supported version {}. Please upgrade.",
                old_version,
                STORAGE_VERSION
            );
        }
        log::info!(
            "Migrating branch storage from v{} to v{}",
            old_version,
            STORAGE_VERSION
        );
        match old_version {
            0 => serde_json::from_str::<Vec<Item>>(json)
                .or_else(|_| serde_json::from_str::<BranchData>(json).map(|d| d.items))
                .map_err(|e| anyhow::anyhow!("Failed to migrate v0 branch file: {}", e)),
            _ => bail!("Unknown branch storage version: {}", old_version),
        }
    }

    /// Loads the items of a branch. A missing file is an empty branch.
    ///
    /// Never ignore an error from this: a failed load blocks `save_branch` for
    /// that branch so the unreadable file is not replaced by an empty list.
    pub fn load_branch(ctx: &dyn AppContext, branch: &str) -> Result<Vec<Item>> {
        let path = ctx.get_branch_path(branch)?;
        Self::with_lock(&path, || Self::read_unlocked(&path, branch, true))
    }

    pub fn save_branch(ctx: &dyn AppContext, branch: &str, items: &[Item]) -> Result<()> {
        let path = ctx.get_branch_path(branch)?;
        Self::ensure_can_save(&path, branch)?;
        Self::with_lock(&path, || Self::write_unlocked(&path, branch, items))
    }

    /// Whether the last load of `branch` did not fail.
    pub fn can_save_branch(ctx: &dyn AppContext, branch: &str) -> bool {
        ctx.get_branch_path(branch)
            .map(|p| LoadState::get(&p) != LoadState::Failed)
            .unwrap_or(false)
    }

    fn ensure_can_save(path: &Path, branch: &str) -> Result<()> {
        if LoadState::get(path) == LoadState::Failed {
            bail!(
                "Cannot save branch '{}': previous load failed. This prevents overwriting data that couldn't be read.",
                branch
            );
        }
        Ok(())
    }

    /// Plans `request` against the stored branch and, when `commit` is set and
    /// the plan is not blocked, writes the result.
    ///
    /// The branch lock is held from load to the history append, so two imports
    /// into the same branch (from any process) never plan against the same
    /// stale snapshot and their history entries follow commit order. Without
    /// `commit` nothing is written, not even a format upgrade.
    pub fn import_into_branch(
        ctx: &dyn AppContext,
        request: &ImportRequest,
        commit: bool,
    ) -> Result<ImportReport> {
        let branch = request.branch_id.as_str();
        validate_branch_name(branch)?;
        let path = ctx.get_branch_path(branch)?;

        Self::with_lock(&path, || {
            let existing = Self::read_unlocked(&path, branch, commit)?;
            let plan = plan(&existing, request)?;

            if !commit || plan.has_blocking_errors || plan.is_noop() {
                return Ok(ImportReport {
                    plan,
                    committed: false,
                    written: 0,
                });
            }

            let mut store = BranchStore::new();
            store.insert(branch.to_string(), existing);
            let written = store.apply_plan(&plan)?;
            Self::write_unlocked(&path, branch, store.items(branch))?;

            // Lock order is branch, then registry or history.
            BranchRegistry::ensure(ctx, branch)?;
            ImportHistory::append(ctx, HistoryEntry::from_plan(&plan, request))?;

            Ok(ImportReport {
                plan,
                committed: true,
                written,
            })
        })
    }
}
