//! Infinite queries: page cursors, prepending, full refetch and resume.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use query_store::state::{InfiniteFetchKind, InfiniteFetchKindKey, InfiniteQueryPaging};
use query_store::{
    query_path, CollectingIssueReporter, EventCollector, InfiniteQuery, InfiniteQueryPage,
    InfiniteQueryState, InfiniteQueryValue, Misuse, QueryContext, QueryContinuation, QueryControls,
    QueryError, QueryPath, QueryStore, QueryStoreEventKind, QuerySubscription, ResultUpdateReason,
};

/// Pages of consecutive numbers, `page_size` per page, `total` overall.
struct Numbers {
    page_size: u32,
    total: u32,
    start: u32,
    calls: Arc<AtomicUsize>,
    fail_once: Mutex<Option<u32>>,
    /// Yield a placeholder with its own context before every page after the first.
    partial: AtomicBool,
}

#[async_trait]
impl InfiniteQuery for Numbers {
    type PageId = u32;
    type PageValue = Vec<u32>;

    fn path(&self) -> QueryPath {
        query_path!["numbers", self.page_size]
    }

    fn initial_page_id(&self) -> u32 {
        self.start
    }

    fn page_id_after(&self, page: &InfiniteQueryPage<u32, Vec<u32>>, _context: &QueryContext) -> Option<u32> {
        let next = page.id + 1;
        (next * self.page_size < self.total).then_some(next)
    }

    fn page_id_before(&self, page: &InfiniteQueryPage<u32, Vec<u32>>, _context: &QueryContext) -> Option<u32> {
        page.id.checked_sub(1)
    }

    async fn fetch_page(
        &self,
        paging: &InfiniteQueryPaging<u32, Vec<u32>>,
        _context: &QueryContext,
        continuation: &QueryContinuation<Vec<u32>>,
    ) -> Result<Vec<u32>, QueryError> {
        if self.partial.load(Ordering::SeqCst) && paging.page_id > 0 {
            continuation.yield_result_with_context(Ok(vec![100]), QueryContext::new());
        }
        tokio::task::yield_now().await;
        self.calls.fetch_add(1, Ordering::SeqCst);
        let failing = {
            let mut fail_once = self.fail_once.lock();
            if *fail_once == Some(paging.page_id) {
                fail_once.take()
            } else {
                None
            }
        };
        if let Some(page) = failing {
            return Err(anyhow::anyhow!("page {} unavailable", page).into());
        }
        let first = paging.page_id * self.page_size;
        Ok((first..(first + self.page_size).min(self.total)).collect())
    }
}

type Store = QueryStore<InfiniteQueryState<u32, Vec<u32>>>;

fn numbers(total: u32, start: u32) -> (Store, Arc<AtomicUsize>, Arc<Numbers>) {
    numbers_with(total, start, QueryContext::new())
}

fn numbers_with(total: u32, start: u32, context: QueryContext) -> (Store, Arc<AtomicUsize>, Arc<Numbers>) {
    let calls = Arc::new(AtomicUsize::new(0));
    let query = Arc::new(Numbers {
        page_size: 10,
        total,
        start,
        calls: calls.clone(),
        fail_once: Mutex::new(None),
        partial: AtomicBool::new(false),
    });
    let store = QueryStore::detached_infinite(Shared(query.clone()), context);
    (store, calls, query)
}

/// Lets a test keep a handle to the query after handing it to the store.
struct Shared(Arc<Numbers>);

#[async_trait]
impl InfiniteQuery for Shared {
    type PageId = u32;
    type PageValue = Vec<u32>;

    fn path(&self) -> QueryPath {
        self.0.path()
    }

    fn initial_page_id(&self) -> u32 {
        self.0.initial_page_id()
    }

    fn page_id_after(&self, page: &InfiniteQueryPage<u32, Vec<u32>>, context: &QueryContext) -> Option<u32> {
        self.0.page_id_after(page, context)
    }

    fn page_id_before(&self, page: &InfiniteQueryPage<u32, Vec<u32>>, context: &QueryContext) -> Option<u32> {
        self.0.page_id_before(page, context)
    }

    async fn fetch_page(
        &self,
        paging: &InfiniteQueryPaging<u32, Vec<u32>>,
        context: &QueryContext,
        continuation: &QueryContinuation<Vec<u32>>,
    ) -> Result<Vec<u32>, QueryError> {
        self.0.fetch_page(paging, context, continuation).await
    }
}

fn ids(store: &Store) -> Vec<u32> {
    store.pages().iter().map(|page| page.id).collect()
}

// =============================================================================
// Single pages
// =============================================================================

#[tokio::test]
async fn test_initial_page_then_next_pages() {
    let (store, calls, _query) = numbers(30, 0);
    assert!(store.pages().is_empty());

    let first = store.fetch_next_page().await.unwrap().unwrap();
    assert!(matches!(first, InfiniteQueryValue::InitialPage(_)));
    assert_eq!(first.page().map(|page| page.value.len()), Some(10));
    assert_eq!(store.next_page_id(), Some(1));
    assert!(!store.has_previous_page());

    store.fetch_next_page().await.unwrap();
    store.fetch_next_page().await.unwrap();
    assert_eq!(ids(&store), vec![0, 1, 2]);
    assert!(!store.has_next_page());

    assert!(store.fetch_next_page().await.unwrap().is_none());
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(store.value_update_count(), 3);
}

#[tokio::test]
async fn test_previous_pages_are_prepended() {
    let (store, _calls, _query) = numbers(50, 2);

    store.fetch_previous_page().await.unwrap();
    assert_eq!(ids(&store), vec![2]);
    assert_eq!(store.previous_page_id(), Some(1));

    store.fetch_previous_page().await.unwrap();
    store.fetch_previous_page().await.unwrap();
    assert_eq!(ids(&store), vec![0, 1, 2]);
    assert!(!store.has_previous_page());
    assert_eq!(store.next_page_id(), Some(3));
    assert!(store.fetch_previous_page_task().is_none());
}

#[tokio::test]
async fn test_concurrent_initial_fetches_share_one_call() {
    let (store, calls, _query) = numbers(30, 0);

    let (a, b) = tokio::join!(store.fetch_next_page(), store.fetch_next_page());

    assert!(a.unwrap().is_some() && b.unwrap().is_some());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(ids(&store), vec![0]);
}

#[tokio::test]
async fn test_forced_fetch_past_the_end_is_misuse() {
    let reporter = Arc::new(CollectingIssueReporter::new());
    let (store, calls, _query) =
        numbers_with(20, 0, QueryContext::new().with_issue_reporter(reporter.clone()));
    store.fetch_next_page().await.unwrap();
    store.fetch_next_page().await.unwrap();
    assert!(!store.has_next_page());

    let error = store
        .fetch_with(QueryContext::new().with::<InfiniteFetchKindKey>(Some(InfiniteFetchKind::NextPage)))
        .await
        .unwrap_err();

    assert!(matches!(
        error.misuse(),
        Some(Misuse::NoPageInDirection { direction: "next", .. })
    ));
    assert_eq!(reporter.len(), 1);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

// =============================================================================
// All pages
// =============================================================================

#[tokio::test]
async fn test_fetch_all_pages_keeps_page_count() {
    let (store, calls, _query) = numbers(100, 0);
    for _ in 0..3 {
        store.fetch_next_page().await.unwrap();
    }

    let value = store.fetch_all_pages().await.unwrap();

    assert!(matches!(value, InfiniteQueryValue::AllPages { .. }));
    assert_eq!(ids(&store), vec![0, 1, 2]);
    assert_eq!(store.next_page_id(), Some(3));
    assert_eq!(calls.load(Ordering::SeqCst), 6);
    assert!(!store.is_loading_all_pages());
}

#[tokio::test]
async fn test_plain_fetch_refetches_all_pages() {
    let (store, calls, _query) = numbers(100, 0);
    store.fetch_next_page().await.unwrap();
    store.fetch_next_page().await.unwrap();

    store.fetch().await.unwrap();

    assert_eq!(ids(&store), vec![0, 1]);
    assert_eq!(calls.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn test_fetch_all_pages_resumes_after_failure() {
    let (store, calls, query) = numbers(100, 0);
    for _ in 0..3 {
        store.fetch_next_page().await.unwrap();
    }
    *query.fail_once.lock() = Some(1);

    let error = store.fetch_all_pages().await.unwrap_err();
    assert!(error.to_string().contains("page 1 unavailable"));
    assert_eq!(ids(&store), vec![0, 1, 2]);
    assert_eq!(store.error_update_count(), 1);
    assert_eq!(calls.load(Ordering::SeqCst), 5);

    store.fetch_all_pages().await.unwrap();
    assert_eq!(ids(&store), vec![0, 1, 2]);
    assert_eq!(calls.load(Ordering::SeqCst), 7);
    assert!(store.error().is_none());
}

#[tokio::test]
async fn test_page_yield_with_context_is_merged() {
    let (store, _calls, query) = numbers(30, 0);
    store.fetch_next_page().await.unwrap();
    query.partial.store(true, Ordering::SeqCst);
    let collector = EventCollector::new();
    let _subscription = store.subscribe_temporary(collector.clone());

    store.fetch_next_page().await.unwrap();

    assert!(collector
        .kinds()
        .contains(&QueryStoreEventKind::ResultReceived(ResultUpdateReason::YieldedResult)));
    assert!(collector
        .states()
        .iter()
        .any(|state| state.pages().get(1).is_some_and(|page| page.value == vec![100])));
    assert_eq!(ids(&store), vec![0, 1]);
    assert_eq!(store.pages()[1].value, (10..20).collect::<Vec<_>>());
}

// =============================================================================
// Controllers
// =============================================================================

#[tokio::test]
async fn test_pushed_pages_keep_paging() {
    let (store, calls, _query) = numbers(30, 0);
    let slot = Arc::new(Mutex::new(None));
    {
        let slot = slot.clone();
        store.add_controller(move |controls: QueryControls<InfiniteQueryState<u32, Vec<u32>>>| {
            *slot.lock() = Some(controls);
            QuerySubscription::empty()
        });
    }
    let controls = slot.lock().clone().unwrap();

    controls.yield_value(vec![InfiniteQueryPage::new(0, (0..10).collect())]);

    assert_eq!(ids(&store), vec![0]);
    assert_eq!(store.next_page_id(), Some(1));
    assert!(!store.has_previous_page());

    assert!(store.fetch_next_page().await.unwrap().is_some());
    assert_eq!(ids(&store), vec![0, 1]);
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    controls.yield_value(Vec::new());
    assert!(!store.has_next_page());
}

#[tokio::test]
async fn test_reset_clears_pages() {
    let (store, _calls, _query) = numbers(30, 0);
    store.fetch_next_page().await.unwrap();

    store.reset_state();

    assert!(store.pages().is_empty());
    assert!(!store.has_next_page());
    assert_eq!(store.value_update_count(), 0);
}
