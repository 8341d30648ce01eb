//! Local persistence for papers, interactions, preferences and summaries.
use crate::common::{Paper, PaperSummary, TermGlossaryItem, UserAction, UserPreference};
use crate::errors::StoreError;
use chrono::Utc;
use fxhash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

/// A consistent view of everything the ranker needs for one batch.
#[derive(Clone, Debug, Default)]
pub struct RankingSnapshot {
    pub papers: FxHashMap<String, Paper>,
    pub actions: FxHashMap<String, UserAction>,
    pub preference: Option<UserPreference>,
}

/// Narrow interface to the local data store.
///
/// Every method is one transaction: a read-modify-write on a single entity is
/// atomic with respect to other callers of the same store.
pub trait PaperStore: Send + Sync {
    fn paper(&self, arxiv_id: &str) -> Result<Option<Paper>, StoreError>;
    fn all_papers(&self) -> Result<Vec<Paper>, StoreError>;
    /// Inserts the papers whose ids are not stored yet and returns how many were new.
    fn insert_new_papers(&self, papers: &[Paper]) -> Result<usize, StoreError>;

    fn user_action(&self, arxiv_id: &str) -> Result<Option<UserAction>, StoreError>;
    /// Creates the row on first use, applies `update` and stamps `updated_at`.
    fn update_user_action(
        &self,
        arxiv_id: &str,
        update: &mut dyn FnMut(&mut UserAction),
    ) -> Result<UserAction, StoreError>;

    fn preference(&self) -> Result<Option<UserPreference>, StoreError>;
    fn save_preference(&self, preference: UserPreference) -> Result<(), StoreError>;
    fn delete_preference(&self) -> Result<(), StoreError>;

    fn summary(&self, arxiv_id: &str) -> Result<Option<PaperSummary>, StoreError>;
    /// Upserts the summary. `Some(terms)` replaces the paper's glossary in the same transaction.
    fn save_summary(
        &self,
        summary: PaperSummary,
        terms: Option<Vec<TermGlossaryItem>>,
    ) -> Result<(), StoreError>;
    /// Removes the summary and all of its terms.
    fn delete_summary(&self, arxiv_id: &str) -> Result<(), StoreError>;
    /// Terms ordered by weight, highest first.
    fn terms(&self, arxiv_id: &str) -> Result<Vec<TermGlossaryItem>, StoreError>;

    fn ranking_snapshot(&self, arxiv_ids: &[String]) -> Result<RankingSnapshot, StoreError>;
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct StoreData {
    #[serde(default)]
    papers: FxHashMap<String, Paper>,
    #[serde(default)]
    actions: FxHashMap<String, UserAction>,
    #[serde(default)]
    preference: Option<UserPreference>,
    #[serde(default)]
    summaries: FxHashMap<String, PaperSummary>,
    #[serde(default)]
    terms: FxHashMap<String, Vec<TermGlossaryItem>>,
}

/// `PaperStore` kept in memory and optionally mirrored to a JSON file.
pub struct LocalStore {
    path: Option<PathBuf>,
    data: Mutex<StoreData>,
}

impl LocalStore {
    pub fn in_memory() -> LocalStore {
        LocalStore {
            path: None,
            data: Mutex::new(StoreData::default()),
        }
    }

    /// Opens the store file, starting empty if it does not exist yet.
    pub fn open(path: impl AsRef<Path>) -> Result<LocalStore, StoreError> {
        let path = path.as_ref().to_path_buf();
        let data = if path.exists() {
            serde_json::from_str::<StoreData>(&std::fs::read_to_string(&path)?)?
        } else {
            StoreData::default()
        };
        debug!(path = %path.display(), papers = data.papers.len(), "Opened paper store");
        Ok(LocalStore {
            path: Some(path),
            data: Mutex::new(data),
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn lock(&self) -> Result<MutexGuard<'_, StoreData>, StoreError> {
        self.data.lock().map_err(|_| StoreError::Poisoned)
    }

    fn read<T>(&self, f: impl FnOnce(&StoreData) -> T) -> Result<T, StoreError> {
        let data = self.lock()?;
        Ok(f(&data))
    }

    /// In-memory stores apply `f` in place. File-backed stores apply it to a
    /// staged copy, persist it, then commit it in memory, so a failed write
    /// leaves both the file and the in-memory state untouched.
    fn write<T>(&self, f: impl FnOnce(&mut StoreData) -> T) -> Result<T, StoreError> {
        let mut data = self.lock()?;
        let Some(path) = &self.path else {
            return Ok(f(&mut data));
        };
        let mut staged = data.clone();
        let value = f(&mut staged);
        persist(path, &staged)?;
        *data = staged;
        Ok(value)
    }
}

fn persist(path: &Path, data: &StoreData) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent)?;
        }
    }

    // backup
    if path.exists() {
        std::fs::copy(path, path.with_extension("org.json"))?;
    }

    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, serde_json::to_string(data)?)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

impl PaperStore for LocalStore {
    fn paper(&self, arxiv_id: &str) -> Result<Option<Paper>, StoreError> {
        self.read(|data| data.papers.get(arxiv_id).cloned())
    }

    fn all_papers(&self) -> Result<Vec<Paper>, StoreError> {
        self.read(|data| {
            let mut papers: Vec<Paper> = data.papers.values().cloned().collect();
            papers.sort_by(|a, b| b.published_date.cmp(&a.published_date));
            papers
        })
    }

    fn insert_new_papers(&self, papers: &[Paper]) -> Result<usize, StoreError> {
        {
            let data = self.lock()?;
            if papers.iter().all(|p| data.papers.contains_key(&p.arxiv_id)) {
                return Ok(0);
            }
        }
        self.write(|data| {
            let mut inserted = 0;
            for paper in papers {
                if !data.papers.contains_key(&paper.arxiv_id) {
                    data.papers.insert(paper.arxiv_id.clone(), paper.clone());
                    inserted += 1;
                }
            }
            inserted
        })
    }

    fn user_action(&self, arxiv_id: &str) -> Result<Option<UserAction>, StoreError> {
        self.read(|data| data.actions.get(arxiv_id).cloned())
    }

    fn update_user_action(
        &self,
        arxiv_id: &str,
        update: &mut dyn FnMut(&mut UserAction),
    ) -> Result<UserAction, StoreError> {
        self.write(|data| {
            let action = data
                .actions
                .entry(arxiv_id.to_string())
                .or_insert_with(|| UserAction::new(arxiv_id));
            update(action);
            action.updated_at = Utc::now();
            action.clone()
        })
    }

    fn preference(&self) -> Result<Option<UserPreference>, StoreError> {
        self.read(|data| data.preference.clone())
    }

    fn save_preference(&self, preference: UserPreference) -> Result<(), StoreError> {
        self.write(|data| data.preference = Some(preference))
    }

    fn delete_preference(&self) -> Result<(), StoreError> {
        self.write(|data| data.preference = None)
    }

    fn summary(&self, arxiv_id: &str) -> Result<Option<PaperSummary>, StoreError> {
        self.read(|data| data.summaries.get(arxiv_id).cloned())
    }

    fn save_summary(
        &self,
        summary: PaperSummary,
        terms: Option<Vec<TermGlossaryItem>>,
    ) -> Result<(), StoreError> {
        self.write(|data| {
            let arxiv_id = summary.arxiv_id.clone();
            data.summaries.insert(arxiv_id.clone(), summary);
            if let Some(terms) = terms {
                data.terms.insert(arxiv_id, terms);
            }
        })
    }

    fn delete_summary(&self, arxiv_id: &str) -> Result<(), StoreError> {
        self.write(|data| {
            data.summaries.remove(arxiv_id);
            data.terms.remove(arxiv_id);
        })
    }

    fn terms(&self, arxiv_id: &str) -> Result<Vec<TermGlossaryItem>, StoreError> {
        self.read(|data| {
            let mut terms = data.terms.get(arxiv_id).cloned().unwrap_or_default();
            terms.sort_by(|a, b| b.weight.total_cmp(&a.weight));
            terms
        })
    }

    fn ranking_snapshot(&self, arxiv_ids: &[String]) -> Result<RankingSnapshot, StoreError> {
        self.read(|data| {
            let mut snapshot = RankingSnapshot {
                preference: data.preference.clone(),
                ..Default::default()
            };
            for id in arxiv_ids {
                if let Some(paper) = data.papers.get(id) {
                    snapshot.papers.insert(id.clone(), paper.clone());
                }
                if let Some(action) = data.actions.get(id) {
                    snapshot.actions.insert(id.clone(), action.clone());
                }
            }
            snapshot
        })
    }
}
