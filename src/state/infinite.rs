use std::marker::PhantomData;
use std::sync::Arc;
use std::time::SystemTime;

use parking_lot::Mutex;

use super::{OperationKind, OperationState, QueryState, ResetEffect};
use crate::context::{ContextKey, QueryContext};
use crate::error::Misuse;
use crate::path::QueryPath;
use crate::task::{QueryTask, QueryTaskId};
use crate::QueryError;

/// One fetched page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InfiniteQueryPage<P, V> {
    pub id: P,
    pub value: V,
}

impl<P, V> InfiniteQueryPage<P, V> {
    pub fn new(id: P, value: V) -> Self {
        Self { id, value }
    }
}

/// What a store call asked an infinite query to fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InfiniteFetchKind {
    NextPage,
    PreviousPage,
    AllPages,
}

/// A resolved page request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InfiniteQueryRequest<P> {
    /// No page has been fetched yet.
    InitialPage,
    /// Fetch the page after the last one.
    NextPage(P),
    /// Fetch the page before the first one.
    PreviousPage(P),
    /// Refetch every page, starting from the first.
    AllPages,
}

impl<P> InfiniteQueryRequest<P> {
    fn deduplication_key(&self) -> &'static str {
        match self {
            InfiniteQueryRequest::InitialPage => "initialPage",
            InfiniteQueryRequest::NextPage(_) => "nextPage",
            InfiniteQueryRequest::PreviousPage(_) => "previousPage",
            InfiniteQueryRequest::AllPages => "allPages",
        }
    }
}

/// Input to a single page fetch.
#[derive(Debug, Clone)]
pub struct InfiniteQueryPaging<P, V> {
    /// The page to fetch.
    pub page_id: P,
    /// The page list as it was when the fetch was requested.
    pub pages: Vec<InfiniteQueryPage<P, V>>,
    /// The request this page fetch belongs to.
    pub request: InfiniteQueryRequest<P>,
}

/// A fetched page together with the cursors derived from it.
#[derive(Debug, Clone)]
pub struct InfiniteQueryPageResult<P, V> {
    pub page: InfiniteQueryPage<P, V>,
    pub next_page_id: Option<P>,
    pub previous_page_id: Option<P>,
}

/// The value a single infinite-query task produces.
#[derive(Debug, Clone)]
pub enum InfiniteQueryValue<P, V> {
    InitialPage(InfiniteQueryPageResult<P, V>),
    NextPage(InfiniteQueryPageResult<P, V>),
    PreviousPage(InfiniteQueryPageResult<P, V>),
    AllPages {
        pages: Vec<InfiniteQueryPage<P, V>>,
        next_page_id: Option<P>,
        previous_page_id: Option<P>,
    },
}

impl<P, V> InfiniteQueryValue<P, V> {
    /// The single page fetched, for every variant but `AllPages`.
    pub fn page(&self) -> Option<&InfiniteQueryPage<P, V>> {
        match self {
            InfiniteQueryValue::InitialPage(result)
            | InfiniteQueryValue::NextPage(result)
            | InfiniteQueryValue::PreviousPage(result) => Some(&result.page),
            InfiniteQueryValue::AllPages { .. } => None,
        }
    }

    /// Consume into the fetched pages.
    pub fn into_pages(self) -> Vec<InfiniteQueryPage<P, V>> {
        match self {
            InfiniteQueryValue::InitialPage(result)
            | InfiniteQueryValue::NextPage(result)
            | InfiniteQueryValue::PreviousPage(result) => vec![result.page],
            InfiniteQueryValue::AllPages { pages, .. } => pages,
        }
    }
}

/// Pages fetched so far by an interrupted all-pages refetch.
///
/// Shared across calls so that a refetch that failed midway resumes where
/// it stopped instead of starting over.
pub struct InfinitePageTracker<P, V> {
    pages: Arc<Mutex<Vec<InfiniteQueryPage<P, V>>>>,
}

impl<P: Clone, V: Clone> InfinitePageTracker<P, V> {
    pub fn new() -> Self {
        Self {
            pages: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn pages(&self) -> Vec<InfiniteQueryPage<P, V>> {
        self.pages.lock().clone()
    }

    pub fn record(&self, pages: Vec<InfiniteQueryPage<P, V>>) {
        *self.pages.lock() = pages;
    }

    pub fn clear(&self) {
        self.pages.lock().clear();
    }
}

impl<P: Clone, V: Clone> Default for InfinitePageTracker<P, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P, V> Clone for InfinitePageTracker<P, V> {
    fn clone(&self) -> Self {
        Self {
            pages: self.pages.clone(),
        }
    }
}

type CursorFn<P, V> = dyn Fn(&[InfiniteQueryPage<P, V>], &QueryContext) -> (Option<P>, Option<P>) + Send + Sync;

/// Derives the next and previous page ids of a page list.
///
/// Installed by the store's query so that pages pushed in from outside a
/// fetch still get cursors.
pub struct InfinitePageCursors<P, V> {
    compute: Arc<CursorFn<P, V>>,
}

impl<P, V> InfinitePageCursors<P, V> {
    pub fn new<F>(compute: F) -> Self
    where
        F: Fn(&[InfiniteQueryPage<P, V>], &QueryContext) -> (Option<P>, Option<P>) + Send + Sync + 'static,
    {
        Self {
            compute: Arc::new(compute),
        }
    }

    /// `(next_page_id, previous_page_id)` for `pages`.
    pub fn cursors(&self, pages: &[InfiniteQueryPage<P, V>], context: &QueryContext) -> (Option<P>, Option<P>) {
        (self.compute)(pages, context)
    }
}

impl<P, V> Clone for InfinitePageCursors<P, V> {
    fn clone(&self) -> Self {
        Self {
            compute: self.compute.clone(),
        }
    }
}

/// The kind of fetch requested from an infinite-query store. Unset means
/// "initial page if empty, otherwise all pages".
pub struct InfiniteFetchKindKey;

impl ContextKey for InfiniteFetchKindKey {
    type Value = Option<InfiniteFetchKind>;

    fn default_value() -> Self::Value {
        None
    }
}

/// The resolved paging for a fetch, set while preparing it.
pub struct InfiniteQueryPagingKey<P, V>(PhantomData<fn() -> (P, V)>);

impl<P, V> ContextKey for InfiniteQueryPagingKey<P, V>
where
    P: Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    type Value = Option<InfiniteQueryPaging<P, V>>;

    fn default_value() -> Self::Value {
        None
    }
}

/// The store's cursor function, installed when the store is created.
pub struct InfinitePageCursorsKey<P, V>(PhantomData<fn() -> (P, V)>);

impl<P, V> ContextKey for InfinitePageCursorsKey<P, V>
where
    P: Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    type Value = Option<InfinitePageCursors<P, V>>;

    fn default_value() -> Self::Value {
        None
    }
}

/// The store's page tracker, installed when the store is created.
pub struct InfinitePageTrackerKey<P, V>(PhantomData<fn() -> (P, V)>);

impl<P, V> ContextKey for InfinitePageTrackerKey<P, V>
where
    P: Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    type Value = Option<InfinitePageTracker<P, V>>;

    fn default_value() -> Self::Value {
        None
    }
}

/// State of an infinite query: pages unique by id, plus the ids of the pages
/// on either side of the list (`None` when there is no such page).
///
/// A next-page result is appended only if the list still ends with the page
/// it was requested after, and a previous-page result is prepended only if
/// the list still starts with the page it was requested before. A result for
/// a page already in the list replaces that page in place.
#[derive(Debug, Clone)]
pub struct InfiniteQueryState<P, V> {
    base: QueryState<Vec<InfiniteQueryPage<P, V>>>,
    initial_page_id: P,
    next_page_id: Option<P>,
    previous_page_id: Option<P>,
    active_requests: Vec<(QueryTaskId, InfiniteQueryRequest<P>)>,
}

impl<P, V> InfiniteQueryState<P, V>
where
    P: Clone + PartialEq + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new(initial_page_id: P) -> Self {
        Self {
            base: QueryState::new(Some(Vec::new())),
            initial_page_id,
            next_page_id: None,
            previous_page_id: None,
            active_requests: Vec::new(),
        }
    }

    pub fn pages(&self) -> &[InfiniteQueryPage<P, V>] {
        self.base.current_value().map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn initial_page_id(&self) -> &P {
        &self.initial_page_id
    }

    pub fn next_page_id(&self) -> Option<&P> {
        self.next_page_id.as_ref()
    }

    pub fn previous_page_id(&self) -> Option<&P> {
        self.previous_page_id.as_ref()
    }

    pub fn has_next_page(&self) -> bool {
        self.next_page_id.is_some()
    }

    pub fn has_previous_page(&self) -> bool {
        self.previous_page_id.is_some()
    }

    /// Loading the initial page or a next page.
    pub fn is_loading_next_page(&self) -> bool {
        self.active_requests.iter().any(|(_, request)| {
            matches!(
                request,
                InfiniteQueryRequest::InitialPage | InfiniteQueryRequest::NextPage(_)
            )
        })
    }

    pub fn is_loading_previous_page(&self) -> bool {
        self.active_requests
            .iter()
            .any(|(_, request)| matches!(request, InfiniteQueryRequest::PreviousPage(_)))
    }

    pub fn is_loading_all_pages(&self) -> bool {
        self.active_requests
            .iter()
            .any(|(_, request)| matches!(request, InfiniteQueryRequest::AllPages))
    }

    fn resolve_request(&self, path: &QueryPath, context: &QueryContext) -> Result<InfiniteQueryRequest<P>, Misuse> {
        if self.pages().is_empty() {
            return Ok(InfiniteQueryRequest::InitialPage);
        }
        match context.get::<InfiniteFetchKindKey>() {
            None | Some(InfiniteFetchKind::AllPages) => Ok(InfiniteQueryRequest::AllPages),
            Some(InfiniteFetchKind::NextPage) => match &self.next_page_id {
                Some(id) => Ok(InfiniteQueryRequest::NextPage(id.clone())),
                None => Err(Misuse::NoPageInDirection {
                    path: path.debug_repr(),
                    direction: "next",
                }),
            },
            Some(InfiniteFetchKind::PreviousPage) => match &self.previous_page_id {
                Some(id) => Ok(InfiniteQueryRequest::PreviousPage(id.clone())),
                None => Err(Misuse::NoPageInDirection {
                    path: path.debug_repr(),
                    direction: "previous",
                }),
            },
        }
    }

    fn finish_request(&mut self, task_id: QueryTaskId) -> bool {
        match self.active_requests.iter().position(|(id, _)| *id == task_id) {
            Some(index) => {
                self.active_requests.remove(index);
                true
            }
            None => false,
        }
    }

    fn is_active(&self, task_id: QueryTaskId) -> bool {
        self.active_requests.iter().any(|(id, _)| *id == task_id)
    }

    /// Merge one task result into a copy of the page list. Returns `None` for stale results.
    fn merge(
        &mut self,
        value: &InfiniteQueryValue<P, V>,
        paging: Option<&InfiniteQueryPaging<P, V>>,
        is_final: bool,
    ) -> Option<Vec<InfiniteQueryPage<P, V>>> {
        let mut pages = self.pages().to_vec();
        let snapshot = paging.map(|paging| paging.pages.as_slice()).unwrap_or(&[]);
        let first_unchanged = pages.first().map(|p| &p.id) == snapshot.first().map(|p| &p.id);
        let last_unchanged = pages.last().map(|p| &p.id) == snapshot.last().map(|p| &p.id);

        match value {
            InfiniteQueryValue::InitialPage(result) => {
                if replace_in_place(&mut pages, &result.page) {
                    self.update_edges_after_replace(&pages, result);
                } else if pages.is_empty() {
                    pages.push(result.page.clone());
                    self.next_page_id = result.next_page_id.clone();
                    self.previous_page_id = result.previous_page_id.clone();
                } else {
                    return None;
                }
            }
            InfiniteQueryValue::NextPage(result) => {
                if replace_in_place(&mut pages, &result.page) {
                    self.update_edges_after_replace(&pages, result);
                } else if last_unchanged && !pages.is_empty() {
                    pages.push(result.page.clone());
                    self.next_page_id = result.next_page_id.clone();
                    if first_unchanged {
                        self.previous_page_id = result.previous_page_id.clone();
                    }
                } else {
                    return None;
                }
            }
            InfiniteQueryValue::PreviousPage(result) => {
                if replace_in_place(&mut pages, &result.page) {
                    self.update_edges_after_replace(&pages, result);
                } else if first_unchanged && !pages.is_empty() {
                    pages.insert(0, result.page.clone());
                    self.previous_page_id = result.previous_page_id.clone();
                    if last_unchanged {
                        self.next_page_id = result.next_page_id.clone();
                    }
                } else {
                    return None;
                }
            }
            InfiniteQueryValue::AllPages {
                pages: fetched,
                next_page_id,
                previous_page_id,
            } => {
                if is_final {
                    pages = fetched.clone();
                    self.next_page_id = next_page_id.clone();
                } else {
                    let tail: Vec<_> = pages
                        .into_iter()
                        .filter(|old| !fetched.iter().any(|new| new.id == old.id))
                        .collect();
                    if tail.is_empty() {
                        self.next_page_id = next_page_id.clone();
                    }
                    pages = fetched.iter().cloned().chain(tail).collect();
                }
                self.previous_page_id = previous_page_id.clone();
            }
        }
        Some(pages)
    }

    fn update_edges_after_replace(
        &mut self,
        pages: &[InfiniteQueryPage<P, V>],
        result: &InfiniteQueryPageResult<P, V>,
    ) {
        if pages.last().map(|p| &p.id) == Some(&result.page.id) {
            self.next_page_id = result.next_page_id.clone();
        }
        if pages.first().map(|p| &p.id) == Some(&result.page.id) {
            self.previous_page_id = result.previous_page_id.clone();
        }
    }

    fn apply(
        &mut self,
        result: &Result<InfiniteQueryValue<P, V>, QueryError>,
        context: &QueryContext,
        is_final: bool,
    ) -> bool {
        let now = context.clock().now();
        match result {
            Err(error) if error.is_cancellation() => false,
            Err(error) => {
                self.base.apply_at(Err(error.clone()), now);
                true
            }
            Ok(value) => {
                let paging = context.get::<InfiniteQueryPagingKey<P, V>>();
                match self.merge(value, paging.as_ref(), is_final) {
                    Some(pages) => {
                        self.base.apply_at(Ok(pages), now);
                        true
                    }
                    None => {
                        tracing::trace!("dropping page that no longer fits the page list");
                        false
                    }
                }
            }
        }
    }
}

fn replace_in_place<P: PartialEq + Clone, V: Clone>(
    pages: &mut [InfiniteQueryPage<P, V>],
    page: &InfiniteQueryPage<P, V>,
) -> bool {
    match pages.iter_mut().find(|existing| existing.id == page.id) {
        Some(existing) => {
            existing.value = page.value.clone();
            true
        }
        None => false,
    }
}

impl<P, V> OperationState for InfiniteQueryState<P, V>
where
    P: Clone + PartialEq + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    type Value = Vec<InfiniteQueryPage<P, V>>;
    type TaskValue = InfiniteQueryValue<P, V>;

    fn kind() -> OperationKind {
        OperationKind::InfiniteQuery
    }

    fn current_value(&self) -> Option<&Self::Value> {
        self.base.current_value()
    }

    fn initial_value(&self) -> Option<&Self::Value> {
        self.base.initial_value()
    }

    fn error(&self) -> Option<&QueryError> {
        self.base.error()
    }

    fn value_update_count(&self) -> u64 {
        self.base.value_update_count()
    }

    fn value_last_updated_at(&self) -> Option<SystemTime> {
        self.base.value_last_updated_at()
    }

    fn error_update_count(&self) -> u64 {
        self.base.error_update_count()
    }

    fn error_last_updated_at(&self) -> Option<SystemTime> {
        self.base.error_last_updated_at()
    }

    fn is_loading(&self) -> bool {
        !self.active_requests.is_empty()
    }

    fn prepare_fetch(&self, path: &QueryPath, context: &mut QueryContext) -> Result<(), QueryError> {
        let request = match self.resolve_request(path, context) {
            Ok(request) => request,
            Err(misuse) => {
                context.issue_reporter().report(&misuse);
                return Err(QueryError::Misuse(misuse));
            }
        };
        let page_id = match &request {
            InfiniteQueryRequest::InitialPage => self.initial_page_id.clone(),
            InfiniteQueryRequest::NextPage(id) | InfiniteQueryRequest::PreviousPage(id) => id.clone(),
            InfiniteQueryRequest::AllPages => self
                .pages()
                .first()
                .map(|page| page.id.clone())
                .unwrap_or_else(|| self.initial_page_id.clone()),
        };
        context.set::<InfiniteQueryPagingKey<P, V>>(Some(InfiniteQueryPaging {
            page_id,
            pages: self.pages().to_vec(),
            request,
        }));
        Ok(())
    }

    fn deduplication_key(&self, context: &QueryContext) -> Option<&'static str> {
        context
            .get::<InfiniteQueryPagingKey<P, V>>()
            .map(|paging| paging.request.deduplication_key())
    }

    fn schedule_fetch_task(&mut self, task: &QueryTask<Self::TaskValue>, context: &QueryContext) {
        let request = context
            .get::<InfiniteQueryPagingKey<P, V>>()
            .map(|paging| paging.request)
            .unwrap_or(InfiniteQueryRequest::InitialPage);
        self.active_requests.push((task.id(), request));
    }

    fn update_with_task_result(
        &mut self,
        result: &Result<Self::TaskValue, QueryError>,
        task_id: QueryTaskId,
        context: &QueryContext,
    ) -> bool {
        if !self.finish_request(task_id) {
            return false;
        }
        self.apply(result, context, true)
    }

    fn update_with_yield(
        &mut self,
        result: &Result<Self::TaskValue, QueryError>,
        task_id: QueryTaskId,
        context: &QueryContext,
    ) -> bool {
        if !self.is_active(task_id) {
            return false;
        }
        self.apply(result, context, false)
    }

    fn update_with_context(&mut self, result: Result<Self::Value, QueryError>, context: &QueryContext) {
        if let Ok(pages) = &result {
            let (next, previous) = match context.get::<InfinitePageCursorsKey<P, V>>() {
                Some(cursors) => cursors.cursors(pages, context),
                None if pages.is_empty() => (None, None),
                None => (self.next_page_id.clone(), self.previous_page_id.clone()),
            };
            self.next_page_id = next;
            self.previous_page_id = previous;
        }
        self.base.apply_at(result, context.clock().now());
    }

    fn reset(&mut self, context: &QueryContext) -> ResetEffect {
        if let Some(tracker) = context.get::<InfinitePageTrackerKey<P, V>>() {
            tracker.clear();
        }
        *self = Self::new(self.initial_page_id.clone());
        ResetEffect::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::QueryTaskConfiguration;

    type State = InfiniteQueryState<u32, String>;
    type Value = InfiniteQueryValue<u32, String>;

    fn page(id: u32) -> InfiniteQueryPage<u32, String> {
        InfiniteQueryPage::new(id, format!("page {}", id))
    }

    fn single(id: u32, next: Option<u32>, previous: Option<u32>) -> InfiniteQueryPageResult<u32, String> {
        InfiniteQueryPageResult {
            page: page(id),
            next_page_id: next,
            previous_page_id: previous,
        }
    }

    /// Prepare and schedule a fetch, returning its task and context.
    fn begin(state: &mut State, kind: Option<InfiniteFetchKind>) -> (QueryTask<Value>, QueryContext) {
        let mut context = QueryContext::new().with::<InfiniteFetchKindKey>(kind);
        state
            .prepare_fetch(&QueryPath::from("feed"), &mut context)
            .unwrap();
        let task = QueryTask::new(QueryTaskConfiguration::default(), async {
            Err(QueryError::Cancelled)
        });
        state.schedule_fetch_task(&task, &context);
        (task, context)
    }

    fn ids(state: &State) -> Vec<u32> {
        state.pages().iter().map(|p| p.id).collect()
    }

    #[test]
    fn test_initial_then_next() {
        let mut state = State::new(1);
        let (task, context) = begin(&mut state, Some(InfiniteFetchKind::NextPage));
        assert_eq!(state.deduplication_key(&context), Some("initialPage"));
        assert!(state.is_loading_next_page());
        assert!(state.update_with_task_result(
            &Ok(Value::InitialPage(single(1, Some(2), None))),
            task.id(),
            &context
        ));
        assert_eq!(ids(&state), vec![1]);
        assert_eq!(state.next_page_id(), Some(&2));
        assert!(!state.has_previous_page());

        let (task, context) = begin(&mut state, Some(InfiniteFetchKind::NextPage));
        assert_eq!(state.deduplication_key(&context), Some("nextPage"));
        state.update_with_task_result(&Ok(Value::NextPage(single(2, None, None))), task.id(), &context);
        assert_eq!(ids(&state), vec![1, 2]);
        assert!(!state.has_next_page());
        assert_eq!(state.value_update_count(), 2);
    }

    #[test]
    fn test_previous_prepends() {
        let mut state = State::new(5);
        let (task, context) = begin(&mut state, None);
        state.update_with_task_result(&Ok(Value::InitialPage(single(5, None, Some(4)))), task.id(), &context);

        let (task, context) = begin(&mut state, Some(InfiniteFetchKind::PreviousPage));
        assert!(state.is_loading_previous_page());
        state.update_with_task_result(&Ok(Value::PreviousPage(single(4, None, Some(3)))), task.id(), &context);
        assert_eq!(ids(&state), vec![4, 5]);
        assert_eq!(state.previous_page_id(), Some(&3));
    }

    #[test]
    fn test_missing_direction_is_misuse() {
        let mut state = State::new(1);
        let (task, context) = begin(&mut state, None);
        state.update_with_task_result(&Ok(Value::InitialPage(single(1, None, None))), task.id(), &context);

        let mut context = QueryContext::new()
            .with::<InfiniteFetchKindKey>(Some(InfiniteFetchKind::NextPage))
            .with_issue_reporter(std::sync::Arc::new(crate::error::CollectingIssueReporter::new()));
        let error = state
            .prepare_fetch(&QueryPath::from("feed"), &mut context)
            .unwrap_err();
        assert!(matches!(
            error.misuse(),
            Some(Misuse::NoPageInDirection { direction: "next", .. })
        ));
    }

    #[test]
    fn test_stale_next_page_is_dropped() {
        let mut state = State::new(1);
        let (task, context) = begin(&mut state, None);
        state.update_with_task_result(&Ok(Value::InitialPage(single(1, Some(2), None))), task.id(), &context);

        // Two next-page fetches prepared against the same list.
        let (first, first_context) = begin(&mut state, Some(InfiniteFetchKind::NextPage));
        let (second, second_context) = begin(&mut state, Some(InfiniteFetchKind::NextPage));
        state.update_with_task_result(
            &Ok(Value::NextPage(single(2, Some(3), None))),
            first.id(),
            &first_context,
        );
        assert!(!state.update_with_task_result(
            &Ok(Value::NextPage(single(7, None, None))),
            second.id(),
            &second_context,
        ));
        assert_eq!(ids(&state), vec![1, 2]);
        assert_eq!(state.next_page_id(), Some(&3));
    }

    #[test]
    fn test_all_pages_partial_keeps_old_tail() {
        let mut state = State::new(1);
        let (task, context) = begin(&mut state, None);
        state.update_with_task_result(&Ok(Value::InitialPage(single(1, Some(2), None))), task.id(), &context);
        let (task, context) = begin(&mut state, Some(InfiniteFetchKind::NextPage));
        state.update_with_task_result(&Ok(Value::NextPage(single(2, Some(3), None))), task.id(), &context);

        let (task, context) = begin(&mut state, None);
        assert!(state.is_loading_all_pages());
        let partial = Value::AllPages {
            pages: vec![InfiniteQueryPage::new(1, "fresh".to_string())],
            next_page_id: Some(2),
            previous_page_id: None,
        };
        assert!(state.update_with_yield(&Ok(partial), task.id(), &context));
        assert_eq!(ids(&state), vec![1, 2]);
        assert_eq!(state.pages()[0].value, "fresh");
        assert_eq!(state.next_page_id(), Some(&3));

        let all = Value::AllPages {
            pages: vec![page(1), page(2)],
            next_page_id: None,
            previous_page_id: None,
        };
        state.update_with_task_result(&Ok(all), task.id(), &context);
        assert_eq!(ids(&state), vec![1, 2]);
        assert!(!state.has_next_page());
        assert!(!state.is_loading());
    }

    #[test]
    fn test_pushed_pages_get_cursors() {
        let cursors = InfinitePageCursors::new(|pages: &[InfiniteQueryPage<u32, String>], _: &QueryContext| {
            (
                pages.last().map(|page| page.id + 1),
                pages.first().and_then(|page| page.id.checked_sub(1)),
            )
        });
        let context = QueryContext::new().with::<InfinitePageCursorsKey<u32, String>>(Some(cursors));
        let mut state = State::new(0);

        state.update_with_context(Ok(vec![page(0), page(1)]), &context);
        assert_eq!(state.next_page_id(), Some(&2));
        assert!(!state.has_previous_page());

        state.update_with_context(Ok(vec![page(4)]), &context);
        assert_eq!(state.next_page_id(), Some(&5));
        assert_eq!(state.previous_page_id(), Some(&3));

        state.update_with_context(Ok(Vec::new()), &QueryContext::new());
        assert!(!state.has_next_page());
        assert!(!state.has_previous_page());
    }

    #[test]
    fn test_error_keeps_pages_and_reset_clears_tracker() {
        let tracker = InfinitePageTracker::new();
        tracker.record(vec![page(1)]);
        let mut state = State::new(1);
        let (task, context) = begin(&mut state, None);
        state.update_with_task_result(&Ok(Value::InitialPage(single(1, Some(2), None))), task.id(), &context);
        state.update_with_context(Err(anyhow::anyhow!("down").into()), &context);
        assert_eq!(ids(&state), vec![1]);
        assert!(state.error().is_some());

        let context = QueryContext::new().with::<InfinitePageTrackerKey<u32, String>>(Some(tracker.clone()));
        state.reset(&context);
        assert!(state.pages().is_empty());
        assert!(tracker.pages().is_empty());
        assert!(!state.has_next_page());
    }
}
