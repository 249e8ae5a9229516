//! Controllers driving stores from outside the fetch pipeline.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use query_store::{
    query_path, EventCollector, OperationState, Query, QueryClient, QueryContext, QueryContinuation,
    QueryControls, QueryError, QueryPath, QueryState, QueryStore, QueryStoreEventKind,
    QuerySubscription, ResultUpdateReason, TestStoreCreator,
};

struct Counting {
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl Query for Counting {
    type Value = usize;

    fn path(&self) -> QueryPath {
        query_path!["counting"]
    }

    async fn fetch(
        &self,
        _context: &QueryContext,
        _continuation: &QueryContinuation<usize>,
    ) -> Result<usize, QueryError> {
        Ok(self.calls.fetch_add(1, Ordering::SeqCst) + 1)
    }
}

struct Label;

#[async_trait]
impl Query for Label {
    type Value = String;

    async fn fetch(
        &self,
        _context: &QueryContext,
        _continuation: &QueryContinuation<String>,
    ) -> Result<String, QueryError> {
        Ok("label".to_string())
    }
}

type Slot = Arc<Mutex<Vec<QueryControls<QueryState<usize>>>>>;

/// A context whose controller hands out the controls of every `usize` store.
fn capturing_context() -> (QueryContext, Slot) {
    let slot: Slot = Arc::new(Mutex::new(Vec::new()));
    let context = {
        let slot = slot.clone();
        QueryContext::new().with_controller(move |controls: QueryControls<QueryState<usize>>| {
            slot.lock().push(controls);
            QuerySubscription::empty()
        })
    };
    (context, slot)
}

fn counting(context: QueryContext) -> (QueryStore<QueryState<usize>>, Arc<AtomicUsize>) {
    let calls = Arc::new(AtomicUsize::new(0));
    let store = QueryStore::detached_with(
        Counting {
            calls: calls.clone(),
        },
        context,
    );
    (store, calls)
}

async fn settle() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}

#[tokio::test]
async fn test_yielded_value_is_reported_as_state_change() {
    let (context, slot) = capturing_context();
    let (store, calls) = counting(context);
    let controls = slot.lock()[0].clone();
    let collector = EventCollector::new();
    let _subscription = store.subscribe_temporary(collector.clone());

    controls.yield_value(7);

    assert_eq!(store.current_value(), Some(7));
    assert_eq!(collector.kinds(), vec![QueryStoreEventKind::StateChanged]);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(controls.state().and_then(|state| state.current_value().copied()), Some(7));
}

#[tokio::test]
async fn test_yield_refetch_runs_in_background() {
    let (context, slot) = capturing_context();
    let (store, calls) = counting(context);
    let controls = slot.lock()[0].clone();
    let collector = EventCollector::new();
    let _subscription = store.subscribe_temporary(collector.clone());

    controls.yield_refetch();
    settle().await;

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(store.current_value(), Some(1));
    assert!(collector
        .kinds()
        .contains(&QueryStoreEventKind::ResultReceived(ResultUpdateReason::ReturnedFinalResult)));
}

#[tokio::test]
async fn test_yield_reset_state() {
    let (context, slot) = capturing_context();
    let (store, _calls) = counting(context);
    store.fetch().await.unwrap();

    slot.lock()[0].yield_reset_state();

    assert_eq!(store.current_value(), None);
    assert_eq!(store.value_update_count(), 0);
}

#[tokio::test]
async fn test_yielded_error_keeps_value() {
    let (context, slot) = capturing_context();
    let (store, _calls) = counting(context);
    store.fetch().await.unwrap();

    slot.lock()[0].yield_error(anyhow::anyhow!("stream closed"));

    assert_eq!(store.current_value(), Some(1));
    assert_eq!(store.error_update_count(), 1);
    assert!(store.error().is_some());
}

#[tokio::test]
async fn test_client_controllers_attach_by_state_type() {
    let (context, slot) = capturing_context();
    let client = QueryClient::builder()
        .store_creator(TestStoreCreator)
        .context(context)
        .build();

    let counting = client.store(Counting {
        calls: Arc::new(AtomicUsize::new(0)),
    });
    client.store(Label);
    client.store(Counting {
        calls: Arc::new(AtomicUsize::new(0)),
    });

    assert_eq!(slot.lock().len(), 1);
    slot.lock()[0].yield_value(3);
    assert_eq!(counting.current_value(), Some(3));
}
