//! User interactions that feed the behavior score.
use crate::common::{UserAction, UserPreference};
use crate::errors::StoreError;
use crate::store::PaperStore;
use std::sync::Arc;
use tracing::debug;

#[derive(Clone)]
pub struct Interactions {
    store: Arc<dyn PaperStore>,
}

impl Interactions {
    pub fn new(store: Arc<dyn PaperStore>) -> Self {
        Interactions { store }
    }

    /// Flips the favorite flag and returns the new value.
    pub fn toggle_favorite(&self, arxiv_id: &str) -> Result<bool, StoreError> {
        let action = self.store.update_user_action(arxiv_id, &mut |a: &mut UserAction| {
            a.is_favorited = !a.is_favorited
        })?;
        debug!(arxiv_id, favorited = action.is_favorited, "Toggled favorite");
        Ok(action.is_favorited)
    }

    pub fn mark_read(&self, arxiv_id: &str) -> Result<UserAction, StoreError> {
        self.store
            .update_user_action(arxiv_id, &mut |a: &mut UserAction| a.is_read = true)
    }

    pub fn mark_skipped(&self, arxiv_id: &str) -> Result<UserAction, StoreError> {
        self.store
            .update_user_action(arxiv_id, &mut |a: &mut UserAction| a.is_skipped = true)
    }

    /// Adds to the accumulated dwell time. Negative or non-finite input is ignored.
    pub fn add_dwell_time(
        &self,
        arxiv_id: &str,
        seconds: f64,
    ) -> Result<Option<UserAction>, StoreError> {
        if !seconds.is_finite() || seconds < 0.0 {
            debug!(arxiv_id, seconds, "Ignored invalid dwell time");
            return Ok(None);
        }
        let action = self
            .store
            .update_user_action(arxiv_id, &mut |a: &mut UserAction| {
                a.dwell_time_seconds += seconds
            })?;
        Ok(Some(action))
    }

    pub fn preference(&self) -> Result<Option<UserPreference>, StoreError> {
        self.store.preference()
    }

    pub fn set_preference(&self, preference: UserPreference) -> Result<(), StoreError> {
        debug!(
            categories = preference.selected_categories.len(),
            "Saved feed preference"
        );
        self.store.save_preference(preference)
    }

    pub fn clear_preference(&self) -> Result<(), StoreError> {
        self.store.delete_preference()
    }
}
