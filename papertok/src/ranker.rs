//! Composite relevance scoring for feed candidates.
use crate::common::{Paper, RankedPaper, ScoreBreakdown, UserAction, UserPreference};
use crate::errors::StoreError;
use crate::store::PaperStore;
use crate::utils::days_elapsed;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::debug;

pub const FRESHNESS_WEIGHT: f64 = 0.35;
pub const USER_BEHAVIOR_WEIGHT: f64 = 0.40;
pub const CATEGORY_WEIGHT: f64 = 0.25;

pub const FRESHNESS_HALF_LIFE_DAYS: f64 = 7.0;
/// Dwell time at which the dwell bonus stops growing.
pub const DWELL_CAP_SECONDS: f64 = 300.0;
const DWELL_MAX_BONUS: f64 = 0.3;
const NEUTRAL: f64 = 0.5;

/// `exp(-ln2 / 7 * days)`: 1.0 when just published, 0.5 after a week.
pub fn freshness_score(published: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    let days = days_elapsed(published, now).max(0.0);
    let decay = std::f64::consts::LN_2 / FRESHNESS_HALF_LIFE_DAYS;
    (-decay * days).exp().clamp(0.0, 1.0)
}

/// Neutral 0.5 without history; rewards favorites, reads and dwell time, penalizes skips.
pub fn user_behavior_score(action: Option<&UserAction>) -> f64 {
    let Some(action) = action else {
        return NEUTRAL;
    };
    let mut score = NEUTRAL;
    if action.is_favorited {
        score += 0.5;
    }
    if action.is_skipped {
        score -= 0.3;
    }
    if action.is_read {
        score += 0.2;
    }
    let dwell = action.dwell_time_seconds.max(0.0);
    score += (dwell / DWELL_CAP_SECONDS * DWELL_MAX_BONUS).min(DWELL_MAX_BONUS);
    score.clamp(0.0, 1.0)
}

/// Share of the user's selected categories that the paper covers.
///
/// The denominator is the selection, not the paper's own category list, so a
/// paper with extra unrelated categories is not diluted.
pub fn category_relevance(preference: Option<&UserPreference>, paper: &Paper) -> f64 {
    let selected = match preference {
        Some(preference) if !preference.selected_categories.is_empty() => {
            &preference.selected_categories
        }
        _ => return NEUTRAL,
    };
    let matched = selected
        .iter()
        .filter(|c| paper.categories.contains(*c))
        .count();
    (matched as f64 / selected.len() as f64).clamp(0.0, 1.0)
}

pub fn score_paper(
    paper: &Paper,
    action: Option<&UserAction>,
    preference: Option<&UserPreference>,
    now: DateTime<Utc>,
) -> ScoreBreakdown {
    let freshness = freshness_score(paper.published_date, now);
    let user_behavior = user_behavior_score(action);
    let category_relevance = category_relevance(preference, paper);
    ScoreBreakdown {
        freshness,
        user_behavior,
        category_relevance,
        composite: FRESHNESS_WEIGHT * freshness
            + USER_BEHAVIOR_WEIGHT * user_behavior
            + CATEGORY_WEIGHT * category_relevance,
    }
}

#[derive(Clone)]
pub struct RelevanceRanker {
    store: Arc<dyn PaperStore>,
}

impl RelevanceRanker {
    pub fn new(store: Arc<dyn PaperStore>) -> Self {
        RelevanceRanker { store }
    }

    pub fn rank(&self, candidate_ids: &[String]) -> Result<Vec<String>, StoreError> {
        self.rank_at(candidate_ids, Utc::now())
    }

    pub fn rank_at(
        &self,
        candidate_ids: &[String],
        now: DateTime<Utc>,
    ) -> Result<Vec<String>, StoreError> {
        Ok(self
            .score_at(candidate_ids, now)?
            .into_iter()
            .map(|ranked| ranked.arxiv_id)
            .collect())
    }

    /// Scores and orders the candidates by descending composite score.
    ///
    /// The sort is stable: equal scores keep their input order. Ids the store
    /// does not know are left out.
    pub fn score_at(
        &self,
        candidate_ids: &[String],
        now: DateTime<Utc>,
    ) -> Result<Vec<RankedPaper>, StoreError> {
        let snapshot = self.store.ranking_snapshot(candidate_ids)?;
        let preference = snapshot.preference.as_ref();

        let mut ranked: Vec<RankedPaper> = candidate_ids
            .iter()
            .filter_map(|id| {
                let paper = snapshot.papers.get(id)?;
                Some(RankedPaper {
                    arxiv_id: id.clone(),
                    score: score_paper(paper, snapshot.actions.get(id), preference, now),
                })
            })
            .collect();
        if ranked.len() < candidate_ids.len() {
            debug!(
                missing = candidate_ids.len() - ranked.len(),
                "Dropped ranking candidates unknown to the store"
            );
        }

        ranked.sort_by(|a, b| b.score.composite.total_cmp(&a.score.composite));
        Ok(ranked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::LocalStore;
    use crate::test_support::paper_published_days_ago;
    use chrono::Duration;

    fn action(favorited: bool, skipped: bool, read: bool, dwell: f64) -> UserAction {
        let mut action = UserAction::new("2401.00001");
        action.is_favorited = favorited;
        action.is_skipped = skipped;
        action.is_read = read;
        action.dwell_time_seconds = dwell;
        action
    }

    #[test]
    fn test_freshness_half_life() {
        let now = Utc::now();
        assert_eq!(freshness_score(now, now), 1.0);
        assert!((freshness_score(now - Duration::days(7), now) - 0.5).abs() < 1e-9);
        assert!((freshness_score(now - Duration::days(14), now) - 0.25).abs() < 1e-9);
        assert_eq!(freshness_score(now + Duration::days(3), now), 1.0);
    }

    #[test]
    fn test_freshness_is_monotonic() {
        let now = Utc::now();
        let mut previous = f64::INFINITY;
        for hours in (0..24 * 60).step_by(7) {
            let score = freshness_score(now - Duration::hours(hours), now);
            assert!(score <= previous);
            assert!((0.0..=1.0).contains(&score));
            previous = score;
        }
    }

    #[test]
    fn test_user_behavior_score() {
        assert_eq!(user_behavior_score(None), 0.5);
        assert_eq!(user_behavior_score(Some(&action(false, false, false, 0.0))), 0.5);
        assert_eq!(user_behavior_score(Some(&action(true, false, false, 0.0))), 1.0);
        assert!((user_behavior_score(Some(&action(false, true, false, 0.0))) - 0.2).abs() < 1e-9);
        assert!((user_behavior_score(Some(&action(false, false, true, 0.0))) - 0.7).abs() < 1e-9);
        assert!((user_behavior_score(Some(&action(false, false, false, 150.0))) - 0.65).abs() < 1e-9);
        assert!((user_behavior_score(Some(&action(false, false, false, 3000.0))) - 0.8).abs() < 1e-9);
        assert!((user_behavior_score(Some(&action(false, true, true, 300.0))) - 0.7).abs() < 1e-9);
    }

    #[test]
    fn test_user_behavior_score_stays_in_range() {
        for favorited in [false, true] {
            for skipped in [false, true] {
                for read in [false, true] {
                    for dwell in [-50.0, 0.0, 30.0, 299.0, 301.0, 1e9] {
                        let score =
                            user_behavior_score(Some(&action(favorited, skipped, read, dwell)));
                        assert!((0.0..=1.0).contains(&score), "{}", score);
                    }
                }
            }
        }
    }

    #[test]
    fn test_category_relevance() {
        let mut paper = paper_published_days_ago("2401.00001", 0.0);
        paper.categories = ["cs.AI", "cs.LG", "cs.CL", "stat.ML", "cs.RO", "eess.SY", "q-bio.NC"]
            .iter()
            .map(|c| c.to_string())
            .collect();

        assert_eq!(category_relevance(None, &paper), 0.5);
        assert_eq!(category_relevance(Some(&UserPreference::default()), &paper), 0.5);

        let both = UserPreference::with_categories(["cs.AI", "cs.LG"]);
        assert_eq!(category_relevance(Some(&both), &paper), 1.0);

        let half = UserPreference::with_categories(["cs.AI", "cs.CV"]);
        assert_eq!(category_relevance(Some(&half), &paper), 0.5);

        let none = UserPreference::with_categories(["math.AG"]);
        assert_eq!(category_relevance(Some(&none), &paper), 0.0);
    }

    #[test]
    fn test_rank_orders_by_composite_score() {
        let store = Arc::new(LocalStore::in_memory());
        let now = Utc::now();
        let mut old = paper_published_days_ago("old", 7.0);
        old.published_date = now - Duration::days(7);
        let mut fresh = paper_published_days_ago("fresh", 0.0);
        fresh.published_date = now;
        store.insert_new_papers(&[old, fresh]).unwrap();
        // a favorite outweighs a week of age
        store
            .update_user_action("old", &mut |a: &mut UserAction| a.is_favorited = true)
            .unwrap();

        let ranker = RelevanceRanker::new(store);
        let scored = ranker
            .score_at(&["fresh".to_string(), "old".to_string()], now)
            .unwrap();
        assert_eq!(scored[0].arxiv_id, "old");
        assert!((scored[0].score.composite - (0.35 * 0.5 + 0.40 + 0.125)).abs() < 1e-9);
        assert!((scored[1].score.composite - 0.675).abs() < 1e-9);
    }

    #[test]
    fn test_rank_is_stable_for_equal_scores_and_drops_unknown_ids() {
        let store = Arc::new(LocalStore::in_memory());
        let now = Utc::now();
        let papers: Vec<Paper> = ["c", "a", "b"]
            .iter()
            .map(|id| {
                let mut paper = paper_published_days_ago(id, 0.0);
                paper.published_date = now - Duration::days(2);
                paper
            })
            .collect();
        store.insert_new_papers(&papers).unwrap();

        let ranker = RelevanceRanker::new(store);
        let ids: Vec<String> = ["c", "unknown", "a", "b"].iter().map(|s| s.to_string()).collect();
        assert_eq!(ranker.rank_at(&ids, now).unwrap(), vec!["c", "a", "b"]);
    }
}
