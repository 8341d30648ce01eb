//! Paginated, ranked feed with summary prefetch ahead of the reading position.
use crate::errors::FeedError;
use crate::feed_source::{FeedQuery, FeedSource};
use crate::ranker::RelevanceRanker;
use crate::store::PaperStore;
use crate::summary::SummaryPipeline;
use fxhash::FxHashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FeedConfig {
    pub page_size: usize,
    /// Papers ahead of the position whose summaries are prefetched.
    pub preload_count: usize,
    /// Load the next page once fewer than this many papers remain ahead.
    pub prefetch_threshold: usize,
}

impl Default for FeedConfig {
    fn default() -> Self {
        FeedConfig {
            page_size: 10,
            preload_count: 3,
            prefetch_threshold: 3,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoadOutcome {
    Loaded { added: usize },
    /// Nothing to load: no preference, or upstream ran out of results.
    Empty,
    /// Another load was already running.
    Skipped,
}

#[derive(Debug, Default)]
struct FeedState {
    ranked_ids: Vec<String>,
    offset: usize,
    position: usize,
    /// Bumped by every first-page load so stale load-more results are discarded.
    generation: u64,
}

/// Holds an `AtomicBool` set until dropped, on every exit path.
struct FlagGuard<'a>(&'a AtomicBool);

impl<'a> FlagGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| FlagGuard(flag))
    }
}

impl Drop for FlagGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Background work started by a position change.
pub struct PositionUpdate {
    pub prefetches: Vec<JoinHandle<()>>,
    pub load_more: Option<JoinHandle<Result<LoadOutcome, FeedError>>>,
}

pub struct FeedController {
    source: FeedSource,
    ranker: RelevanceRanker,
    summaries: SummaryPipeline,
    store: Arc<dyn PaperStore>,
    config: FeedConfig,
    state: Mutex<FeedState>,
    loading_first_page: AtomicBool,
    loading_more: AtomicBool,
}

impl FeedController {
    pub fn new(
        source: FeedSource,
        ranker: RelevanceRanker,
        summaries: SummaryPipeline,
        store: Arc<dyn PaperStore>,
        config: FeedConfig,
    ) -> Self {
        FeedController {
            source,
            ranker,
            summaries,
            store,
            config,
            state: Mutex::new(FeedState::default()),
            loading_first_page: AtomicBool::new(false),
            loading_more: AtomicBool::new(false),
        }
    }

    fn state(&self) -> MutexGuard<'_, FeedState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn config(&self) -> FeedConfig {
        self.config
    }

    pub fn ranked_ids(&self) -> Vec<String> {
        self.state().ranked_ids.clone()
    }

    pub fn offset(&self) -> usize {
        self.state().offset
    }

    pub fn position(&self) -> usize {
        self.state().position
    }

    pub fn is_loading_more(&self) -> bool {
        self.loading_more.load(Ordering::Acquire)
    }

    /// Query for the saved preference, `None` when nothing is selected.
    fn query_at(&self, offset: usize) -> Result<Option<FeedQuery>, FeedError> {
        let Some(preference) = self.store.preference()? else {
            return Ok(None);
        };
        if preference.selected_categories.is_empty() {
            return Ok(None);
        }
        Ok(Some(
            FeedQuery::new(preference.selected_categories, self.config.page_size, offset)
                .sorted(preference.sort_by, preference.sort_order),
        ))
    }

    /// Starts the feed over from offset 0.
    pub async fn load_first_page(&self) -> Result<LoadOutcome, FeedError> {
        let Some(_guard) = FlagGuard::acquire(&self.loading_first_page) else {
            return Ok(LoadOutcome::Skipped);
        };
        let generation = {
            let mut state = self.state();
            state.ranked_ids.clear();
            state.offset = 0;
            state.position = 0;
            state.generation += 1;
            state.generation
        };

        let Some(query) = self.query_at(0)? else {
            debug!("No categories selected, feed stays empty");
            return Ok(LoadOutcome::Empty);
        };
        let papers = self.source.fetch(&query).await?;
        if papers.is_empty() {
            return Ok(LoadOutcome::Empty);
        }
        let ids: Vec<String> = papers.into_iter().map(|p| p.arxiv_id).collect();
        let ranked = self.ranker.rank(&ids)?;

        let mut state = self.state();
        if state.generation != generation {
            return Ok(LoadOutcome::Skipped);
        }
        let added = ranked.len();
        state.ranked_ids = ranked;
        state.offset = self.config.page_size;
        info!(added, "Loaded first feed page");
        Ok(LoadOutcome::Loaded { added })
    }

    /// Appends the next page, ranked on its own. Ids already in the feed are dropped.
    pub async fn load_next_page(&self) -> Result<LoadOutcome, FeedError> {
        let Some(_guard) = FlagGuard::acquire(&self.loading_more) else {
            debug!("Load-more already in flight");
            return Ok(LoadOutcome::Skipped);
        };
        if self.loading_first_page.load(Ordering::Acquire) {
            debug!("First page is loading, skipping load-more");
            return Ok(LoadOutcome::Skipped);
        }

        let (offset, generation) = {
            let state = self.state();
            (state.offset, state.generation)
        };
        let Some(query) = self.query_at(offset)? else {
            return Ok(LoadOutcome::Empty);
        };
        let papers = self.source.fetch(&query).await?;
        if papers.is_empty() {
            debug!(offset, "No more papers upstream");
            return Ok(LoadOutcome::Empty);
        }
        let ids: Vec<String> = papers.into_iter().map(|p| p.arxiv_id).collect();
        let ranked = self.ranker.rank(&ids)?;

        let mut state = self.state();
        if state.generation != generation {
            debug!("Feed was reset while loading, dropping page");
            return Ok(LoadOutcome::Skipped);
        }
        let displayed: FxHashSet<&str> = state.ranked_ids.iter().map(String::as_str).collect();
        let fresh: Vec<String> = ranked
            .into_iter()
            .filter(|id| !displayed.contains(id.as_str()))
            .collect();
        let added = fresh.len();
        state.ranked_ids.extend(fresh);
        state.offset += self.config.page_size;
        info!(added, offset = state.offset, "Appended feed page");
        Ok(LoadOutcome::Loaded { added })
    }

    /// Records the reading position, prefetches summaries for the next papers
    /// and loads another page when the feed is about to run out.
    ///
    /// Prefetch failures are logged and dropped.
    pub fn on_position_changed(self: &Arc<Self>, position: usize) -> PositionUpdate {
        let (upcoming, remaining, empty) = {
            let mut state = self.state();
            state.position = position;
            let start = (position + 1).min(state.ranked_ids.len());
            let end = (start + self.config.preload_count).min(state.ranked_ids.len());
            (
                state.ranked_ids[start..end].to_vec(),
                state.ranked_ids.len() - start,
                state.ranked_ids.is_empty(),
            )
        };

        let mut prefetches = Vec::with_capacity(upcoming.len());
        for arxiv_id in upcoming {
            let paper = match self.store.paper(&arxiv_id) {
                Ok(Some(paper)) => paper,
                Ok(None) => continue,
                Err(e) => {
                    warn!(%arxiv_id, error = %e, "Could not read paper for prefetch");
                    continue;
                }
            };
            let summaries = self.summaries.clone();
            prefetches.push(tokio::spawn(async move {
                if let Err(e) = summaries.prefetch(&paper).await {
                    warn!(arxiv_id = %paper.arxiv_id, error = %e, "Summary prefetch failed");
                }
            }));
        }

        // nothing to extend before the first page has loaded
        let load_more = if !empty && remaining < self.config.prefetch_threshold {
            let controller = Arc::clone(self);
            Some(tokio::spawn(async move { controller.load_next_page().await }))
        } else {
            None
        };

        PositionUpdate {
            prefetches,
            load_more,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::UserPreference;
    use crate::store::LocalStore;
    use crate::test_support::{atom_feed, FakeLlm, ScriptedTransport};

    const AI: &[&str] = &["cs.AI"];

    struct Fixture {
        controller: Arc<FeedController>,
        transport: Arc<ScriptedTransport>,
        store: Arc<LocalStore>,
        llm: Arc<FakeLlm>,
    }

    fn fixture(config: FeedConfig, llm: FakeLlm) -> Fixture {
        let transport = Arc::new(ScriptedTransport::new());
        let store = Arc::new(LocalStore::in_memory());
        let llm = Arc::new(llm);
        let controller = FeedController::new(
            FeedSource::new(transport.clone(), store.clone()),
            RelevanceRanker::new(store.clone()),
            SummaryPipeline::new(llm.clone(), store.clone()),
            store.clone(),
            config,
        );
        Fixture {
            controller: Arc::new(controller),
            transport,
            store,
            llm,
        }
    }

    fn with_preference(fixture: &Fixture) {
        fixture
            .store
            .save_preference(UserPreference::with_categories(["cs.AI"]))
            .unwrap();
    }

    fn page(ids: &[(&str, f64)]) -> String {
        let entries: Vec<(&str, f64, &[&str])> = ids.iter().map(|(id, d)| (*id, *d, AI)).collect();
        atom_feed(&entries)
    }

    #[tokio::test]
    async fn test_first_page_without_preference_is_empty() {
        let f = fixture(FeedConfig::default(), FakeLlm::new());
        let outcome = f.controller.load_first_page().await.unwrap();
        assert_eq!(outcome, LoadOutcome::Empty);
        assert!(f.controller.ranked_ids().is_empty());
        assert_eq!(f.controller.offset(), 0);
        assert!(f.transport.requests().is_empty());

        f.store.save_preference(UserPreference::default()).unwrap();
        let outcome = f.controller.load_first_page().await.unwrap();
        assert_eq!(outcome, LoadOutcome::Empty);
        assert!(f.transport.requests().is_empty());
    }

    #[tokio::test]
    async fn test_first_page_is_ranked() {
        let f = fixture(FeedConfig::default(), FakeLlm::new());
        with_preference(&f);
        f.transport
            .push_response(200, &page(&[("old", 14.0), ("new", 0.0), ("week", 7.0)]));

        let outcome = f.controller.load_first_page().await.unwrap();
        assert_eq!(outcome, LoadOutcome::Loaded { added: 3 });
        assert_eq!(f.controller.ranked_ids(), vec!["new", "week", "old"]);
        assert_eq!(f.controller.offset(), 10);

        let request = &f.transport.requests()[0];
        assert_eq!(request.query_value("start"), Some("0"));
        assert_eq!(request.query_value("max_results"), Some("10"));
        assert_eq!(request.query_value("search_query"), Some("cat:cs.AI"));
    }

    #[tokio::test]
    async fn test_next_page_on_empty_upstream_keeps_state() {
        let f = fixture(FeedConfig::default(), FakeLlm::new());
        with_preference(&f);
        f.transport.push_response(200, &page(&[("a", 1.0), ("b", 2.0)]));
        f.transport.push_response(200, &page(&[]));

        f.controller.load_first_page().await.unwrap();
        let before = f.controller.ranked_ids();
        let outcome = f.controller.load_next_page().await.unwrap();
        assert_eq!(outcome, LoadOutcome::Empty);
        assert_eq!(f.controller.ranked_ids(), before);
        assert_eq!(f.controller.offset(), 10);
    }

    #[tokio::test]
    async fn test_next_page_appends_page_local_ranking_without_duplicates() {
        let f = fixture(FeedConfig::default(), FakeLlm::new());
        with_preference(&f);
        f.transport.push_response(200, &page(&[("a", 5.0), ("b", 6.0)]));
        // "a" shows up again and the new page is fresher than the first one
        f.transport
            .push_response(200, &page(&[("c", 4.0), ("a", 5.0), ("d", 0.0)]));

        f.controller.load_first_page().await.unwrap();
        let outcome = f.controller.load_next_page().await.unwrap();
        assert_eq!(outcome, LoadOutcome::Loaded { added: 2 });
        assert_eq!(f.controller.ranked_ids(), vec!["a", "b", "d", "c"]);
        assert_eq!(f.controller.offset(), 20);
        assert_eq!(f.transport.requests()[1].query_value("start"), Some("10"));
    }

    #[tokio::test]
    async fn test_load_more_is_skipped_while_one_is_in_flight() {
        let f = fixture(FeedConfig::default(), FakeLlm::new());
        with_preference(&f);
        f.transport.push_hang();

        {
            let hanging = f.controller.load_next_page();
            tokio::pin!(hanging);
            tokio::select! {
                biased;
                _ = &mut hanging => panic!("hanging load-more completed"),
                outcome = async {
                    tokio::task::yield_now().await;
                    f.controller.load_next_page().await
                } => assert_eq!(outcome.unwrap(), LoadOutcome::Skipped),
            }
            assert!(f.controller.is_loading_more());
        }

        // dropping the in-flight load released the guard
        assert!(!f.controller.is_loading_more());
        f.transport.push_response(200, &page(&[("a", 1.0)]));
        let outcome = f.controller.load_next_page().await.unwrap();
        assert_eq!(outcome, LoadOutcome::Loaded { added: 1 });
    }

    #[tokio::test]
    async fn test_guard_released_after_error() {
        let f = fixture(FeedConfig::default(), FakeLlm::new());
        with_preference(&f);
        f.transport.push_response(500, "");
        assert!(matches!(
            f.controller.load_next_page().await,
            Err(FeedError::Http(500))
        ));
        assert!(!f.controller.is_loading_more());
        assert_eq!(f.controller.offset(), 0);
    }

    #[tokio::test]
    async fn test_position_change_prefetches_and_loads_more() {
        let config = FeedConfig {
            page_size: 5,
            preload_count: 2,
            prefetch_threshold: 3,
        };
        let f = fixture(config, FakeLlm::always("2) 问题: p\n3) 方法: m\n"));
        with_preference(&f);
        f.transport.push_response(
            200,
            &page(&[("p0", 0.0), ("p1", 1.0), ("p2", 2.0), ("p3", 3.0), ("p4", 4.0)]),
        );
        f.transport.push_response(200, &page(&[("p5", 5.0)]));
        f.controller.load_first_page().await.unwrap();

        // two papers remain ahead of position 2, below the threshold of 3
        let update = f.controller.on_position_changed(2);
        assert_eq!(f.controller.position(), 2);
        assert_eq!(update.prefetches.len(), 2);
        for handle in update.prefetches {
            handle.await.unwrap();
        }
        let outcome = update.load_more.unwrap().await.unwrap().unwrap();
        assert_eq!(outcome, LoadOutcome::Loaded { added: 1 });

        for id in ["p3", "p4"] {
            assert!(f.store.summary(id).unwrap().unwrap().is_complete(), "{}", id);
        }
        assert!(f.store.summary("p0").unwrap().is_none());
        assert_eq!(f.llm.calls(), 4);
    }

    #[tokio::test]
    async fn test_position_change_on_empty_feed_does_nothing() {
        let f = fixture(FeedConfig::default(), FakeLlm::new());
        with_preference(&f);

        let update = f.controller.on_position_changed(0);
        assert!(update.prefetches.is_empty());
        assert!(update.load_more.is_none());
        assert!(f.transport.requests().is_empty());
        assert_eq!(f.controller.offset(), 0);
    }

    #[tokio::test]
    async fn test_position_far_from_end_does_not_load_more() {
        let f = fixture(FeedConfig::default(), FakeLlm::new());
        with_preference(&f);
        let ids: Vec<String> = (0..10).map(|i| format!("p{}", i)).collect();
        let entries: Vec<(&str, f64)> = ids.iter().map(|id| (id.as_str(), 1.0)).collect();
        f.transport.push_response(200, &page(&entries));
        f.controller.load_first_page().await.unwrap();

        let update = f.controller.on_position_changed(0);
        assert!(update.load_more.is_none());
        assert_eq!(update.prefetches.len(), 3);
        // prefetch failures never surface
        for handle in update.prefetches {
            handle.await.unwrap();
        }
    }
}
