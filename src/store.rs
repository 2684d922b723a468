use std::fs::{File, OpenOptions};
use std::io::Write as _;
use std::path::{Path, PathBuf};

use chrono::{SubsecRound, Utc};
use fd_lock::RwLock;
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{KpiError, Result};
use crate::models::{ActionRecord, Priority, Status};

pub const DEFAULT_STORE_PATH: &str = "data/pda_actions.json";

/// Fields of an action supplied at creation. The id is always generated.
#[derive(Debug, Clone, Default)]
pub struct NewAction {
    pub agent: String,
    pub kpi: String,
    pub mois_ref: String,
    pub ecart_pct: f64,
    pub action_type: String,
    pub description: String,
    pub owner: String,
    pub due_date: String,
    pub priority: Priority,
    pub status: Status,
    pub preuve: String,
    pub expected_impact: String,
    pub tags: Vec<String>,
}

/// Partial update: only `Some` fields are written.
#[derive(Debug, Clone, Default)]
pub struct ActionPatch {
    pub agent: Option<String>,
    pub kpi: Option<String>,
    pub mois_ref: Option<String>,
    pub ecart_pct: Option<f64>,
    pub action_type: Option<String>,
    pub description: Option<String>,
    pub owner: Option<String>,
    pub due_date: Option<String>,
    pub priority: Option<Priority>,
    pub status: Option<Status>,
    pub preuve: Option<String>,
    pub expected_impact: Option<String>,
    pub tags: Option<Vec<String>>,
}

impl ActionPatch {
    fn apply(self, record: &mut ActionRecord) {
        if let Some(agent) = self.agent {
            record.agent = agent;
        }
        if let Some(kpi) = self.kpi {
            record.kpi = kpi;
        }
        if let Some(mois_ref) = self.mois_ref {
            record.mois_ref = mois_ref;
        }
        if let Some(ecart_pct) = self.ecart_pct {
            record.ecart_pct = ecart_pct;
        }
        if let Some(action_type) = self.action_type {
            record.action_type = action_type;
        }
        if let Some(description) = self.description {
            record.description = description;
        }
        if let Some(owner) = self.owner {
            record.owner = owner;
        }
        if let Some(due_date) = self.due_date {
            record.due_date = due_date;
        }
        if let Some(priority) = self.priority {
            record.priority = priority;
        }
        if let Some(status) = self.status {
            record.status = status;
        }
        if let Some(preuve) = self.preuve {
            record.preuve = preuve;
        }
        if let Some(expected_impact) = self.expected_impact {
            record.expected_impact = expected_impact;
        }
        if let Some(tags) = self.tags {
            record.tags = tags;
        }
    }
}

/// File-backed action plan collection.
///
/// Every mutation takes an exclusive lock on a sidecar `.lock` file, reloads
/// the collection, applies the change and atomically replaces the file. The
/// lock is held by the OS, so it serializes writers across handles and
/// processes. Reads take no lock.
pub struct ActionPlanStore {
    path: PathBuf,
}

impl ActionPlanStore {
    /// Opens the store, creating an empty collection if the file is absent.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let store = Self { path: path.into() };
        let mut lock = store.lock_file()?;
        let _guard = lock
            .write()
            .map_err(|err| KpiError::persistence(store.lock_path(), err))?;
        if !store.path.exists() {
            info!(path = %store.path.display(), "creating empty action plan file");
            store.save(&[])?;
        }
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// All records, in insertion order.
    pub fn list(&self) -> Result<Vec<ActionRecord>> {
        let text = std::fs::read_to_string(&self.path)
            .map_err(|err| KpiError::persistence(&self.path, err))?;
        serde_json::from_str(&text).map_err(|source| KpiError::CorruptStore {
            path: self.path.clone(),
            source,
        })
    }

    /// Appends a record under a fresh uuid v4 and returns that id.
    pub fn create(&self, action: NewAction) -> Result<String> {
        self.mutate(|records| {
            let id = Uuid::new_v4().to_string();
            records.push(ActionRecord {
                id: id.clone(),
                created_at: Utc::now().trunc_subsecs(0),
                updated_at: None,
                agent: action.agent,
                kpi: action.kpi,
                mois_ref: action.mois_ref,
                ecart_pct: action.ecart_pct,
                action_type: action.action_type,
                description: action.description,
                owner: action.owner,
                due_date: action.due_date,
                priority: action.priority,
                status: action.status,
                preuve: action.preuve,
                expected_impact: action.expected_impact,
                tags: action.tags,
            });
            debug!(%id, "action created");
            Ok((id, true))
        })
    }

    /// Merges `patch` into the record with `id`. Returns false if no such record.
    pub fn update(&self, id: &str, patch: ActionPatch) -> Result<bool> {
        self.mutate(|records| {
            let Some(record) = records.iter_mut().find(|record| record.id == id) else {
                warn!(id, "update skipped, unknown action id");
                return Ok((false, false));
            };
            patch.apply(record);
            record.updated_at = Some(Utc::now().trunc_subsecs(0));
            debug!(id, "action updated");
            Ok((true, true))
        })
    }

    /// Removes the record with `id`. Returns false if no such record.
    pub fn delete(&self, id: &str) -> Result<bool> {
        self.mutate(|records| {
            let before = records.len();
            records.retain(|record| record.id != id);
            let removed = records.len() != before;
            if removed {
                debug!(id, "action deleted");
            } else {
                warn!(id, "delete skipped, unknown action id");
            }
            Ok((removed, removed))
        })
    }

    /// Read-modify-write under the file lock. The closure returns the
    /// caller's value and whether the collection must be written back.
    fn mutate<T>(
        &self,
        change: impl FnOnce(&mut Vec<ActionRecord>) -> Result<(T, bool)>,
    ) -> Result<T> {
        let mut lock = self.lock_file()?;
        let _guard = lock
            .write()
            .map_err(|err| KpiError::persistence(self.lock_path(), err))?;
        let mut records = self.list()?;
        let (value, dirty) = change(&mut records)?;
        if dirty {
            self.save(&records)?;
        }
        Ok(value)
    }

    fn parent_dir(&self) -> PathBuf {
        match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        }
    }

    fn lock_path(&self) -> PathBuf {
        let file_name = self
            .path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("actions");
        self.parent_dir().join(format!(".{file_name}.lock"))
    }

    fn lock_file(&self) -> Result<RwLock<File>> {
        let parent = self.parent_dir();
        std::fs::create_dir_all(&parent).map_err(|err| KpiError::persistence(&parent, err))?;

        let lock_path = self.lock_path();
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)
            .map_err(|err| KpiError::persistence(&lock_path, err))?;
        Ok(RwLock::new(file))
    }

    /// Serializes the whole collection to a fresh temp file, then renames it
    /// over the store. Callers hold the file lock.
    fn save(&self, records: &[ActionRecord]) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(records).map_err(|source| KpiError::CorruptStore {
            path: self.path.clone(),
            source,
        })?;
        write_and_replace(&self.parent_dir(), &self.path, &bytes)
            .map_err(|err| KpiError::persistence(&self.path, err))
    }
}

/// The temp file is removed when it is dropped without being persisted.
fn write_and_replace(dir: &Path, path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = NamedTempFile::new_in(dir)?;
    file.write_all(bytes)?;
    file.as_file().sync_all()?;
    file.persist(path).map_err(|err| err.error)?;
    Ok(())
}

/// Optional criteria applied to a `list()` snapshot.
#[derive(Debug, Clone, Default)]
pub struct ActionFilter {
    pub agent: Option<String>,
    pub status: Option<Status>,
    pub kpi: Option<String>,
    pub priority: Option<Priority>,
}

impl ActionFilter {
    pub fn matches(&self, record: &ActionRecord) -> bool {
        self.agent.as_ref().map_or(true, |agent| *agent == record.agent)
            && self.status.map_or(true, |status| status == record.status)
            && self.kpi.as_ref().map_or(true, |kpi| *kpi == record.kpi)
            && self.priority.map_or(true, |priority| priority == record.priority)
    }
}

/// Display order: priority first, then due date.
pub fn sort_for_display(records: &mut [ActionRecord]) {
    records.sort_by(|a, b| {
        a.priority
            .cmp(&b.priority)
            .then_with(|| a.due_date.cmp(&b.due_date))
    });
}
