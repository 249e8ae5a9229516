//! Query, mutation and infinite-query definitions.
//!
//! These are the traits applications implement. A store never calls them
//! directly; each is adapted to the crate-internal [`StoreRequest`] contract
//! paired with the state it updates.

use std::sync::Arc;

use async_trait::async_trait;

use crate::context::QueryContext;
use crate::continuation::QueryContinuation;
use crate::error::Misuse;
use crate::path::{PathSegment, QueryPath};
use crate::state::{
    InfinitePageCursors, InfinitePageCursorsKey, InfinitePageTracker, InfinitePageTrackerKey,
    InfiniteQueryPage, InfiniteQueryPageResult, InfiniteQueryPaging, InfiniteQueryPagingKey,
    InfiniteQueryRequest, InfiniteQueryState, InfiniteQueryValue, MutationArgumentsKey,
    MutationState, OperationState, QueryState,
};
use crate::QueryError;

/// A read-style operation producing a cacheable value.
///
/// # Example
///
/// ```ignore
/// struct UserProfile {
///     id: u32,
/// }
///
/// #[async_trait]
/// impl Query for UserProfile {
///     type Value = Profile;
///
///     fn path(&self) -> QueryPath {
///         query_path!["user", self.id]
///     }
///
///     async fn fetch(
///         &self,
///         _context: &QueryContext,
///         _continuation: &QueryContinuation<Profile>,
///     ) -> Result<Profile, QueryError> {
///         Ok(api::load_profile(self.id).await?)
///     }
/// }
/// ```
#[async_trait]
pub trait Query: Send + Sync + 'static {
    /// The value produced by a fetch.
    type Value: Clone + Send + Sync + 'static;

    /// The path identifying this query. Defaults to the type name.
    fn path(&self) -> QueryPath {
        QueryPath::new([PathSegment::from(std::any::type_name::<Self>())])
    }

    /// The value a store starts with.
    fn initial_value(&self) -> Option<Self::Value> {
        None
    }

    /// Adjust the store's context when the store is created.
    fn setup(&self, _context: &mut QueryContext) {}

    /// Produce the value.
    ///
    /// May yield intermediate results through `continuation` before returning.
    async fn fetch(
        &self,
        context: &QueryContext,
        continuation: &QueryContinuation<Self::Value>,
    ) -> Result<Self::Value, QueryError>;
}

/// A write-style operation taking arguments.
#[async_trait]
pub trait Mutation: Send + Sync + 'static {
    type Arguments: Clone + Send + Sync + 'static;

    type Value: Clone + Send + Sync + 'static;

    /// The path identifying this mutation. Defaults to the type name.
    fn path(&self) -> QueryPath {
        QueryPath::new([PathSegment::from(std::any::type_name::<Self>())])
    }

    /// Adjust the store's context when the store is created.
    fn setup(&self, _context: &mut QueryContext) {}

    /// Perform the mutation.
    async fn mutate(
        &self,
        arguments: Self::Arguments,
        context: &QueryContext,
        continuation: &QueryContinuation<Self::Value>,
    ) -> Result<Self::Value, QueryError>;
}

/// A paginated query fetched one page at a time.
///
/// Page ids are computed from fetched pages with [`InfiniteQuery::page_id_after`]
/// and [`InfiniteQuery::page_id_before`]; `None` means there is no page in
/// that direction.
#[async_trait]
pub trait InfiniteQuery: Send + Sync + 'static {
    type PageId: Clone + PartialEq + Send + Sync + 'static;

    type PageValue: Clone + Send + Sync + 'static;

    /// The path identifying this query. Defaults to the type name.
    fn path(&self) -> QueryPath {
        QueryPath::new([PathSegment::from(std::any::type_name::<Self>())])
    }

    /// Adjust the store's context when the store is created.
    fn setup(&self, _context: &mut QueryContext) {}

    /// The id of the first page fetched.
    fn initial_page_id(&self) -> Self::PageId;

    /// The id of the page following `page`.
    fn page_id_after(
        &self,
        page: &InfiniteQueryPage<Self::PageId, Self::PageValue>,
        context: &QueryContext,
    ) -> Option<Self::PageId>;

    /// The id of the page preceding `page`. Defaults to `None`.
    fn page_id_before(
        &self,
        _page: &InfiniteQueryPage<Self::PageId, Self::PageValue>,
        _context: &QueryContext,
    ) -> Option<Self::PageId> {
        None
    }

    /// Fetch the page identified by `paging.page_id`.
    async fn fetch_page(
        &self,
        paging: &InfiniteQueryPaging<Self::PageId, Self::PageValue>,
        context: &QueryContext,
        continuation: &QueryContinuation<Self::PageValue>,
    ) -> Result<Self::PageValue, QueryError>;
}

/// The fetch contract a store runs, paired with the state it feeds.
#[async_trait]
pub(crate) trait StoreRequest: Send + Sync + 'static {
    type State: OperationState;

    fn path(&self) -> QueryPath;

    fn initial_state(&self) -> Self::State;

    fn setup(&self, _context: &mut QueryContext) {}

    async fn fetch(
        &self,
        context: &QueryContext,
        continuation: &QueryContinuation<<Self::State as OperationState>::TaskValue>,
    ) -> Result<<Self::State as OperationState>::TaskValue, QueryError>;
}

pub(crate) struct QueryAdapter<Q>(pub(crate) Q);

#[async_trait]
impl<Q: Query> StoreRequest for QueryAdapter<Q> {
    type State = QueryState<Q::Value>;

    fn path(&self) -> QueryPath {
        self.0.path()
    }

    fn initial_state(&self) -> Self::State {
        QueryState::new(self.0.initial_value())
    }

    fn setup(&self, context: &mut QueryContext) {
        self.0.setup(context);
    }

    async fn fetch(
        &self,
        context: &QueryContext,
        continuation: &QueryContinuation<Q::Value>,
    ) -> Result<Q::Value, QueryError> {
        self.0.fetch(context, continuation).await
    }
}

pub(crate) struct MutationAdapter<M>(pub(crate) M);

#[async_trait]
impl<M: Mutation> StoreRequest for MutationAdapter<M> {
    type State = MutationState<M::Arguments, M::Value>;

    fn path(&self) -> QueryPath {
        self.0.path()
    }

    fn initial_state(&self) -> Self::State {
        MutationState::new()
    }

    fn setup(&self, context: &mut QueryContext) {
        self.0.setup(context);
    }

    async fn fetch(
        &self,
        context: &QueryContext,
        continuation: &QueryContinuation<M::Value>,
    ) -> Result<M::Value, QueryError> {
        let Some(arguments) = context.get::<MutationArgumentsKey<M::Arguments>>() else {
            return Err(QueryError::Misuse(Misuse::MutationWithoutArguments {
                path: self.0.path().debug_repr(),
            }));
        };
        self.0.mutate(arguments, context, continuation).await
    }
}

pub(crate) struct InfiniteQueryAdapter<Q>(pub(crate) Arc<Q>);

type Page<Q> = InfiniteQueryPage<<Q as InfiniteQuery>::PageId, <Q as InfiniteQuery>::PageValue>;
type Paging<Q> = InfiniteQueryPaging<<Q as InfiniteQuery>::PageId, <Q as InfiniteQuery>::PageValue>;
type Value<Q> = InfiniteQueryValue<<Q as InfiniteQuery>::PageId, <Q as InfiniteQuery>::PageValue>;

#[async_trait]
impl<Q: InfiniteQuery> StoreRequest for InfiniteQueryAdapter<Q> {
    type State = InfiniteQueryState<Q::PageId, Q::PageValue>;

    fn path(&self) -> QueryPath {
        self.0.path()
    }

    fn initial_state(&self) -> Self::State {
        InfiniteQueryState::new(self.0.initial_page_id())
    }

    fn setup(&self, context: &mut QueryContext) {
        if context
            .get::<InfinitePageTrackerKey<Q::PageId, Q::PageValue>>()
            .is_none()
        {
            context.set::<InfinitePageTrackerKey<Q::PageId, Q::PageValue>>(Some(
                InfinitePageTracker::new(),
            ));
        }
        let query = self.0.clone();
        context.set::<InfinitePageCursorsKey<Q::PageId, Q::PageValue>>(Some(
            InfinitePageCursors::new(move |pages: &[Page<Q>], context: &QueryContext| {
                page_cursors(query.as_ref(), pages, context)
            }),
        ));
        self.0.setup(context);
    }

    async fn fetch(
        &self,
        context: &QueryContext,
        continuation: &QueryContinuation<Value<Q>>,
    ) -> Result<Value<Q>, QueryError> {
        let paging = context
            .get::<InfiniteQueryPagingKey<Q::PageId, Q::PageValue>>()
            .unwrap_or_else(|| InfiniteQueryPaging {
                page_id: self.0.initial_page_id(),
                pages: Vec::new(),
                request: InfiniteQueryRequest::InitialPage,
            });
        match paging.request {
            InfiniteQueryRequest::AllPages => self.fetch_all(&paging, context, continuation).await,
            _ => self.fetch_single(&paging, context, continuation).await,
        }
    }
}

impl<Q: InfiniteQuery> InfiniteQueryAdapter<Q> {
    async fn fetch_single(
        &self,
        paging: &Paging<Q>,
        context: &QueryContext,
        continuation: &QueryContinuation<Value<Q>>,
    ) -> Result<Value<Q>, QueryError> {
        let page_continuation = {
            let query = self.0.clone();
            let paging = paging.clone();
            let context = context.clone();
            continuation.map(move |value: Q::PageValue| {
                let page = InfiniteQueryPage::new(paging.page_id.clone(), value);
                single_page_value(query.as_ref(), &paging, page, &context)
            })
        };
        let value = self.0.fetch_page(paging, context, &page_continuation).await?;
        let page = InfiniteQueryPage::new(paging.page_id.clone(), value);
        Ok(single_page_value(self.0.as_ref(), paging, page, context))
    }

    /// Refetch pages front to back until the previous page count is reached
    /// or no next page exists, yielding the merged list after every page.
    async fn fetch_all(
        &self,
        paging: &Paging<Q>,
        context: &QueryContext,
        continuation: &QueryContinuation<Value<Q>>,
    ) -> Result<Value<Q>, QueryError> {
        let tracker = context
            .get::<InfinitePageTrackerKey<Q::PageId, Q::PageValue>>()
            .unwrap_or_default();
        let target = paging.pages.len().max(1);
        let mut fetched: Vec<Page<Q>> = tracker.pages();
        if !fetched.is_empty() {
            tracing::debug!(resumed = fetched.len(), target, "resuming all-pages refetch");
        }

        while fetched.len() < target {
            let page_id = match fetched.last() {
                None => paging.page_id.clone(),
                Some(last) => match self.0.page_id_after(last, context) {
                    Some(id) => id,
                    None => break,
                },
            };
            let page_paging = InfiniteQueryPaging {
                page_id: page_id.clone(),
                pages: fetched.clone(),
                request: InfiniteQueryRequest::AllPages,
            };
            let page_continuation = {
                let query = self.0.clone();
                let fetched = fetched.clone();
                let page_id = page_id.clone();
                let context = context.clone();
                continuation.map(move |value: Q::PageValue| {
                    let mut pages = fetched.clone();
                    pages.push(InfiniteQueryPage::new(page_id.clone(), value));
                    all_pages_value(query.as_ref(), pages, &context)
                })
            };

            let value = self.0.fetch_page(&page_paging, context, &page_continuation).await?;
            fetched.push(InfiniteQueryPage::new(page_id, value));
            tracker.record(fetched.clone());
            continuation.yield_value(all_pages_value(self.0.as_ref(), fetched.clone(), context));
        }

        tracker.clear();
        Ok(all_pages_value(self.0.as_ref(), fetched, context))
    }
}

fn single_page_value<Q: InfiniteQuery>(
    query: &Q,
    paging: &Paging<Q>,
    page: Page<Q>,
    context: &QueryContext,
) -> Value<Q> {
    let after = |page: &Page<Q>| query.page_id_after(page, context);
    let before = |page: &Page<Q>| query.page_id_before(page, context);
    match paging.request {
        InfiniteQueryRequest::NextPage(_) => InfiniteQueryValue::NextPage(InfiniteQueryPageResult {
            next_page_id: after(&page),
            previous_page_id: paging.pages.first().and_then(before),
            page,
        }),
        InfiniteQueryRequest::PreviousPage(_) => {
            InfiniteQueryValue::PreviousPage(InfiniteQueryPageResult {
                next_page_id: paging.pages.last().and_then(after),
                previous_page_id: before(&page),
                page,
            })
        }
        InfiniteQueryRequest::InitialPage | InfiniteQueryRequest::AllPages => {
            InfiniteQueryValue::InitialPage(InfiniteQueryPageResult {
                next_page_id: after(&page),
                previous_page_id: before(&page),
                page,
            })
        }
    }
}

fn all_pages_value<Q: InfiniteQuery>(
    query: &Q,
    pages: Vec<Page<Q>>,
    context: &QueryContext,
) -> Value<Q> {
    let (next_page_id, previous_page_id) = page_cursors(query, &pages, context);
    InfiniteQueryValue::AllPages {
        pages,
        next_page_id,
        previous_page_id,
    }
}

fn page_cursors<Q: InfiniteQuery>(
    query: &Q,
    pages: &[Page<Q>],
    context: &QueryContext,
) -> (Option<Q::PageId>, Option<Q::PageId>) {
    (
        pages.last().and_then(|page| query.page_id_after(page, context)),
        pages.first().and_then(|page| query.page_id_before(page, context)),
    )
}
