// Turns filter edits into catalog queries and decides which responses get to
// replace the visible room list.
//
// Every issued query carries a `QueryToken`. Responses can come back in any
// order; only the response for the most recently issued token is applied,
// everything else is dropped on arrival. In-flight queries are never aborted.

use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Weak,
    },
    time::Duration,
};

use parking_lot::Mutex;
use serde::Deserialize;
use tokio::{sync::watch, task::JoinHandle};
use tracing::{debug, info, warn};

use crate::cache::{CatalogCache, CatalogError};
use crate::debounce::DebounceScheduler;
use crate::filter::{FilterCriteria, FilterState, PriceBand};
use crate::models::RoomListing;
use crate::services::{CatalogService, ServiceError};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    // Quiet period before a typed price band is queried
    pub price_debounce_ms: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            price_debounce_ms: 500,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct QueryToken(u64);

impl QueryToken {
    pub fn value(&self) -> u64 {
        self.0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum QueryOutcome {
    Applied(QueryToken),
    Failed(QueryToken, ServiceError),
    // Stale: a newer query was issued or already resolved
    Discarded {
        token: QueryToken,
        latest: QueryToken,
    },
}

/// Token bookkeeping. A response is current only if its token is the last
/// one minted and nothing at or above it has resolved yet.
#[derive(Debug, Default)]
pub struct TokenLedger {
    issued: u64,
    applied: Option<QueryToken>,
    resolved: Option<QueryToken>,
}

impl TokenLedger {
    pub fn mint(&mut self) -> QueryToken {
        self.issued += 1;
        QueryToken(self.issued)
    }

    pub fn latest_issued(&self) -> Option<QueryToken> {
        (self.issued > 0).then_some(QueryToken(self.issued))
    }

    // Token of the result currently on screen
    pub fn applied(&self) -> Option<QueryToken> {
        self.applied
    }

    pub fn is_current(&self, token: QueryToken) -> bool {
        self.latest_issued() == Some(token) && self.resolved.map_or(true, |r| token > r)
    }

    pub fn has_pending(&self) -> bool {
        match (self.latest_issued(), self.resolved) {
            (Some(latest), Some(resolved)) => latest > resolved,
            (Some(_), None) => true,
            _ => false,
        }
    }

    pub fn resolve<T>(
        &mut self,
        token: QueryToken,
        result: &Result<T, ServiceError>,
    ) -> QueryOutcome {
        if !self.is_current(token) {
            return QueryOutcome::Discarded {
                token,
                latest: QueryToken(self.issued),
            };
        }

        self.resolved = Some(token);
        match result {
            Ok(_) => {
                self.applied = Some(token);
                QueryOutcome::Applied(token)
            }
            Err(e) => QueryOutcome::Failed(token, e.clone()),
        }
    }
}

// What the presentation layer renders
#[derive(Debug, Clone, Default)]
pub struct RoomListView {
    pub rooms: Arc<Vec<RoomListing>>,
    pub applied: Option<QueryToken>,
    // Failure of the latest query; the previous rooms stay visible
    pub error: Option<(QueryToken, ServiceError)>,
    pub loading: bool,
}

#[derive(Debug, Default)]
pub struct OrchestratorStats {
    pub queries_issued: AtomicUsize,
    pub results_applied: AtomicUsize,
    pub results_discarded: AtomicUsize,
    pub queries_failed: AtomicUsize,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub queries_issued: usize,
    pub results_applied: usize,
    pub results_discarded: usize,
    pub queries_failed: usize,
}

impl OrchestratorStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            queries_issued: self.queries_issued.load(Ordering::SeqCst),
            results_applied: self.results_applied.load(Ordering::SeqCst),
            results_discarded: self.results_discarded.load(Ordering::SeqCst),
            queries_failed: self.queries_failed.load(Ordering::SeqCst),
        }
    }
}

#[derive(Default)]
struct OrchestratorState {
    filters: FilterState,
    ledger: TokenLedger,
    // Room queries wait for categories and amenities
    ready: bool,
}

struct Inner<C: CatalogService> {
    catalog: Arc<C>,
    cache: Arc<CatalogCache>,
    state: Mutex<OrchestratorState>,
    view: watch::Sender<RoomListView>,
    stats: OrchestratorStats,
}

impl<C: CatalogService> Inner<C> {
    fn issue(self: &Arc<Self>) -> Option<QueryToken> {
        let (token, criteria) = {
            let mut state = self.state.lock();
            if !state.ready {
                return None;
            }
            let token = state.ledger.mint();
            // Published under the lock so a completion can't be overtaken
            self.view.send_modify(|view| view.loading = true);
            (token, state.filters.effective())
        };

        self.stats.queries_issued.fetch_add(1, Ordering::SeqCst);
        debug!(token = token.value(), params = ?criteria.query_params(), "room query issued");

        let catalog = self.catalog.clone();
        let weak: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let result = catalog.list_rooms(&criteria).await;
            // Session gone: nobody left to show the result to
            if let Some(inner) = weak.upgrade() {
                inner.complete(token, result);
            }
        });

        Some(token)
    }

    fn complete(
        &self,
        token: QueryToken,
        result: Result<Vec<RoomListing>, ServiceError>,
    ) -> QueryOutcome {
        let mut state = self.state.lock();
        let outcome = state.ledger.resolve(token, &result);
        let pending = state.ledger.has_pending();

        match &outcome {
            QueryOutcome::Applied(_) => {
                // The ledger only applies successful results
                if let Ok(rooms) = result {
                    self.stats.results_applied.fetch_add(1, Ordering::SeqCst);
                    debug!(token = token.value(), rooms = rooms.len(), "room query applied");
                    self.view.send_modify(|view| {
                        view.rooms = Arc::new(rooms);
                        view.applied = Some(token);
                        view.error = None;
                        view.loading = pending;
                    });
                }
            }
            QueryOutcome::Failed(_, e) => {
                self.stats.queries_failed.fetch_add(1, Ordering::SeqCst);
                warn!(token = token.value(), error = %e, "room query failed");
                let error = e.clone();
                self.view.send_modify(|view| {
                    view.error = Some((token, error));
                    view.loading = pending;
                });
            }
            QueryOutcome::Discarded { latest, .. } => {
                self.stats.results_discarded.fetch_add(1, Ordering::SeqCst);
                debug!(
                    token = token.value(),
                    latest = latest.value(),
                    "stale room query discarded"
                );
            }
        }

        outcome
    }

    fn settle_price(self: &Arc<Self>, band: PriceBand) -> Option<QueryToken> {
        let changed = self.state.lock().filters.settle_price(band);
        if changed {
            self.issue()
        } else {
            None
        }
    }
}

/// Session-owned driver for the room list. Dropping it cancels any pending
/// price band and detaches in-flight queries, whose results are then ignored.
pub struct QueryOrchestrator<C: CatalogService> {
    inner: Arc<Inner<C>>,
    price_debounce: DebounceScheduler<PriceBand>,
    settle_task: JoinHandle<()>,
}

impl<C: CatalogService> QueryOrchestrator<C> {
    // Must be called from within a tokio runtime
    pub fn new(catalog: Arc<C>, cache: Arc<CatalogCache>, config: &OrchestratorConfig) -> Self {
        let (view, _) = watch::channel(RoomListView::default());
        let inner = Arc::new(Inner {
            catalog,
            cache,
            state: Mutex::new(OrchestratorState::default()),
            view,
            stats: OrchestratorStats::default(),
        });

        let (price_debounce, mut settled) =
            DebounceScheduler::new(Duration::from_millis(config.price_debounce_ms));

        let weak = Arc::downgrade(&inner);
        let settle_task = tokio::spawn(async move {
            while let Some(band) = settled.recv().await {
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                inner.settle_price(band);
            }
        });

        Self {
            inner,
            price_debounce,
            settle_task,
        }
    }

    /// Load categories and amenities, then issue the first room query with
    /// whatever filters were set in the meantime.
    pub async fn start(&self) -> Result<Option<QueryToken>, CatalogError> {
        self.inner
            .cache
            .ensure_loaded(self.inner.catalog.as_ref())
            .await?;

        self.inner.state.lock().ready = true;
        info!("room discovery ready");

        Ok(self.inner.issue())
    }

    /// Apply a new set of criteria. Category, capacity and amenity changes
    /// query immediately and the issued token is returned; a changed price
    /// band only restarts the debounce timer.
    pub fn update_filters(&self, criteria: FilterCriteria) -> Option<QueryToken> {
        let price = criteria.price.clone();
        let change = self.inner.state.lock().filters.update(criteria);

        if change.price_band {
            self.price_debounce.schedule(price);
        }

        if change.immediate {
            self.inner.issue()
        } else {
            None
        }
    }

    // Re-run the current criteria, e.g. after a failure
    pub fn refresh(&self) -> Option<QueryToken> {
        self.inner.issue()
    }

    pub fn subscribe(&self) -> watch::Receiver<RoomListView> {
        self.inner.view.subscribe()
    }

    pub fn view(&self) -> RoomListView {
        self.inner.view.borrow().clone()
    }

    // Criteria the next query will use
    pub fn effective_criteria(&self) -> FilterCriteria {
        self.inner.state.lock().filters.effective()
    }

    pub fn requested_criteria(&self) -> FilterCriteria {
        self.inner.state.lock().filters.requested().clone()
    }

    pub fn cache(&self) -> &Arc<CatalogCache> {
        &self.inner.cache
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.inner.stats.snapshot()
    }
}

impl<C: CatalogService> Drop for QueryOrchestrator<C> {
    fn drop(&mut self) {
        self.price_debounce.cancel();
        self.settle_task.abort();
    }
}
