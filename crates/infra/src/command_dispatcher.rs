//! Command execution pipeline (application-level orchestration).
//!
//! ```text
//! Command
//!   ↓
//! 1. Load events from store
//!   ↓
//! 2. Rehydrate aggregate (apply historical events to rebuild state)
//!   ↓
//! 3. Handle command (pure decision logic, produces events)
//!   ↓
//! 4. Stage events in a unit of work (several aggregates may take part)
//!   ↓
//! 5. Commit: one atomic batch append, optimistic per stream
//!   ↓
//! 6. Apply committed envelopes to the read side, then publish to the bus
//! ```
//!
//! Workflows that touch several aggregates (an order and the products it
//! reserves, a POS sale with its invoice) stage every decision in one
//! [`UnitOfWork`] so that either all streams move or none does.

use std::sync::{Arc, Mutex};

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value as JsonValue;
use thiserror::Error;
use uuid::Uuid;

use shopdesk_core::{Aggregate, AggregateId, DomainError, ExpectedVersion};
use shopdesk_events::{EventBus, EventEnvelope};

use crate::event_store::{EventStore, EventStoreError, StoredEvent, StreamAppend, UncommittedEvent};

/// Attempts made by [`retry_on_conflict`] before a concurrency error is surfaced.
pub const CONFLICT_ATTEMPTS: usize = 3;

#[derive(Debug, Error)]
pub enum DispatchError {
    /// Optimistic concurrency failure (e.g. stale aggregate version).
    #[error("concurrency conflict: {0}")]
    Concurrency(String),
    /// Domain validation failure (deterministic).
    #[error("{0}")]
    Validation(String),
    /// Domain invariant failure (deterministic).
    #[error("{0}")]
    InvariantViolation(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    NotFound(String),
    /// Failed to deserialize historical event payloads into the aggregate event type.
    #[error("failed to deserialize event history: {0}")]
    Deserialize(String),
    /// Encoding or decoding a file exchanged with the outside (CSV sheets).
    #[error("i/o failure: {0}")]
    Io(String),
    #[error(transparent)]
    Store(EventStoreError),
}

impl From<EventStoreError> for DispatchError {
    fn from(value: EventStoreError) -> Self {
        match value {
            EventStoreError::Concurrency(msg) => DispatchError::Concurrency(msg),
            other => DispatchError::Store(other),
        }
    }
}

impl From<DomainError> for DispatchError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::Validation(msg) => DispatchError::Validation(msg),
            DomainError::InvariantViolation(msg) => DispatchError::InvariantViolation(msg),
            DomainError::Conflict(msg) => DispatchError::Concurrency(msg),
            DomainError::Forbidden(msg) => DispatchError::Forbidden(msg),
            DomainError::NotFound(msg) => DispatchError::NotFound(msg),
            DomainError::InvalidId(msg) => DispatchError::Validation(msg),
        }
    }
}

impl DispatchError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::Forbidden(msg.into())
    }

    pub fn is_concurrency(&self) -> bool {
        matches!(self, DispatchError::Concurrency(_))
    }
}

/// Receives every committed batch before it is published.
///
/// The dispatcher calls it while still holding its commit lock, so observers
/// see batches in commit order. Projections hang off this hook so that a
/// request can read its own writes.
pub trait CommitObserver: Send + Sync {
    fn on_commit(&self, committed: &[EventEnvelope<JsonValue>]);
}

/// Reusable command execution engine for event-sourced aggregates.
///
/// - `S`: event store (`InMemoryEventStore` in tests, `PostgresEventStore` in production)
/// - `B`: event bus receiving committed envelopes after the observer ran
///
/// Publication is best effort: events are durable before the bus sees them,
/// and a failed publish is logged rather than failing the command.
pub struct CommandDispatcher<S, B> {
    store: S,
    bus: B,
    observer: Option<Arc<dyn CommitObserver>>,
    commit_lock: Mutex<()>,
}

impl<S, B> std::fmt::Debug for CommandDispatcher<S, B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandDispatcher")
            .field("observer", &self.observer.is_some())
            .finish_non_exhaustive()
    }
}

impl<S, B> CommandDispatcher<S, B> {
    pub fn new(store: S, bus: B) -> Self {
        Self {
            store,
            bus,
            observer: None,
            commit_lock: Mutex::new(()),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn CommitObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }
}

impl<S, B> CommandDispatcher<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    /// Load and rehydrate an aggregate. A missing stream yields the empty
    /// aggregate produced by `make_aggregate`.
    pub fn load<A>(
        &self,
        aggregate_id: AggregateId,
        make_aggregate: impl FnOnce(AggregateId) -> A,
    ) -> Result<A, DispatchError>
    where
        A: Aggregate<Error = DomainError>,
        A::Event: DeserializeOwned,
    {
        let history = self.store.load_stream(aggregate_id)?;
        validate_loaded_stream(aggregate_id, &history)?;

        let mut aggregate = make_aggregate(aggregate_id);
        apply_history::<A>(&mut aggregate, &history)?;
        Ok(aggregate)
    }

    /// Start collecting decisions for an atomic multi-stream commit.
    pub fn begin(&self) -> UnitOfWork<'_, S, B> {
        UnitOfWork {
            dispatcher: self,
            staged: Vec::new(),
        }
    }

    /// Load one aggregate, handle one command, commit.
    pub fn dispatch<A>(
        &self,
        aggregate_id: AggregateId,
        aggregate_type: &str,
        command: A::Command,
        make_aggregate: impl FnOnce(AggregateId) -> A,
    ) -> Result<Vec<StoredEvent>, DispatchError>
    where
        A: Aggregate<Error = DomainError>,
        A::Event: shopdesk_events::Event + Serialize + DeserializeOwned,
    {
        let mut aggregate = self.load(aggregate_id, make_aggregate)?;
        let mut uow = self.begin();
        uow.execute(aggregate_id, aggregate_type, &mut aggregate, &command)?;
        uow.commit()
    }

    fn commit_batch(&self, batch: Vec<StreamAppend>) -> Result<Vec<StoredEvent>, DispatchError> {
        let envelopes;
        let committed;
        {
            let _guard = self
                .commit_lock
                .lock()
                .map_err(|_| DispatchError::Store(EventStoreError::Backend("commit lock poisoned".to_string())))?;

            committed = self.store.append_batch(batch)?;
            envelopes = committed.iter().map(StoredEvent::to_envelope).collect::<Vec<_>>();
            if let Some(observer) = &self.observer {
                observer.on_commit(&envelopes);
            }
        }

        for envelope in envelopes {
            let event_type = envelope.event_type().to_string();
            if let Err(err) = self.bus.publish(envelope) {
                tracing::warn!(%event_type, error = ?err, "event publication failed");
            }
        }

        Ok(committed)
    }
}

/// Decisions staged for one atomic commit.
///
/// Each stream's expected version is the aggregate version at the moment it
/// was first staged; later commands on the same aggregate extend the same
/// append. Dropping a unit of work without committing discards it.
pub struct UnitOfWork<'d, S, B> {
    dispatcher: &'d CommandDispatcher<S, B>,
    staged: Vec<StreamAppend>,
}

impl<S, B> UnitOfWork<'_, S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    pub fn load<A>(
        &self,
        aggregate_id: AggregateId,
        make_aggregate: impl FnOnce(AggregateId) -> A,
    ) -> Result<A, DispatchError>
    where
        A: Aggregate<Error = DomainError>,
        A::Event: DeserializeOwned,
    {
        self.dispatcher.load(aggregate_id, make_aggregate)
    }

    /// Handle `command` against an already loaded aggregate, apply the
    /// resulting events to it and stage them.
    pub fn execute<A>(
        &mut self,
        aggregate_id: AggregateId,
        aggregate_type: &str,
        aggregate: &mut A,
        command: &A::Command,
    ) -> Result<Vec<A::Event>, DispatchError>
    where
        A: Aggregate<Error = DomainError>,
        A::Event: shopdesk_events::Event + Serialize,
    {
        let decided = aggregate.handle(command)?;
        if decided.is_empty() {
            return Ok(decided);
        }

        let uncommitted = decided
            .iter()
            .map(|ev| UncommittedEvent::from_typed(aggregate_id, aggregate_type, Uuid::now_v7(), ev))
            .collect::<Result<Vec<_>, _>>()?;

        let version_before = aggregate.version();
        for ev in &decided {
            aggregate.apply(ev);
        }

        match self.staged.iter_mut().find(|a| a.aggregate_id == aggregate_id) {
            Some(append) => append.events.extend(uncommitted),
            None => self.staged.push(StreamAppend::new(
                aggregate_id,
                ExpectedVersion::Exact(version_before),
                uncommitted,
            )),
        }

        Ok(decided)
    }

    pub fn is_empty(&self) -> bool {
        self.staged.iter().all(|a| a.events.is_empty())
    }

    pub fn staged_streams(&self) -> usize {
        self.staged.len()
    }

    /// Append every staged stream in one batch. Nothing staged, nothing written.
    pub fn commit(self) -> Result<Vec<StoredEvent>, DispatchError> {
        if self.is_empty() {
            return Ok(vec![]);
        }
        self.dispatcher.commit_batch(self.staged)
    }
}

/// Re-run `attempt` while it fails with a concurrency error, up to
/// [`CONFLICT_ATTEMPTS`] times. `attempt` must reload everything it reads.
pub fn retry_on_conflict<T>(
    mut attempt: impl FnMut() -> Result<T, DispatchError>,
) -> Result<T, DispatchError> {
    let mut tries = 1;
    loop {
        match attempt() {
            Err(err) if err.is_concurrency() && tries < CONFLICT_ATTEMPTS => {
                tracing::debug!(tries, "retrying after concurrency conflict");
                tries += 1;
            }
            other => return other,
        }
    }
}

fn validate_loaded_stream(aggregate_id: AggregateId, stream: &[StoredEvent]) -> Result<(), DispatchError> {
    let mut last = 0u64;
    for (idx, e) in stream.iter().enumerate() {
        if e.aggregate_id != aggregate_id {
            return Err(DispatchError::Store(EventStoreError::InvalidAppend(format!(
                "loaded stream contains wrong aggregate_id at index {idx}"
            ))));
        }
        if e.sequence_number != last + 1 {
            return Err(DispatchError::Store(EventStoreError::InvalidAppend(format!(
                "gap or reorder in loaded stream (last={last}, found={})",
                e.sequence_number
            ))));
        }
        last = e.sequence_number;
    }
    Ok(())
}

fn apply_history<A>(aggregate: &mut A, history: &[StoredEvent]) -> Result<(), DispatchError>
where
    A: Aggregate,
    A::Event: DeserializeOwned,
{
    for stored in history {
        let ev: A::Event = serde_json::from_value(stored.payload.clone())
            .map_err(|e| DispatchError::Deserialize(format!("{} #{}: {e}", stored.event_type, stored.sequence_number)))?;
        aggregate.apply(&ev);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use chrono::Utc;
    use shopdesk_catalog::product::AGGREGATE_TYPE as PRODUCT;
    use shopdesk_catalog::{CountStock, CreateProduct, Product, ProductCommand, ProductId, ReserveStock};
    use shopdesk_core::Money;
    use shopdesk_events::InMemoryEventBus;

    use super::*;
    use crate::event_store::InMemoryEventStore;

    type Dispatcher = CommandDispatcher<Arc<InMemoryEventStore>, Arc<InMemoryEventBus<EventEnvelope<JsonValue>>>>;

    fn dispatcher() -> Dispatcher {
        CommandDispatcher::new(Arc::new(InMemoryEventStore::new()), Arc::new(InMemoryEventBus::new()))
    }

    fn create(d: &Dispatcher, stock: u32) -> ProductId {
        let id = ProductId::new(AggregateId::new());
        d.dispatch(
            id.0,
            PRODUCT,
            ProductCommand::Create(CreateProduct {
                product_id: id,
                name: "Rice 1kg".to_string(),
                category_id: None,
                price: Money::from_rupees(60),
                stock,
                image_url: None,
                occurred_at: Utc::now(),
            }),
            |a| Product::empty(ProductId::new(a)),
        )
        .unwrap();
        id
    }

    fn reserve(order: AggregateId, quantity: u32) -> ProductCommand {
        ProductCommand::ReserveStock(ReserveStock {
            order_id: order,
            quantity,
            occurred_at: Utc::now(),
        })
    }

    #[test]
    fn dispatch_rehydrates_before_deciding() {
        let d = dispatcher();
        let id = create(&d, 5);

        d.dispatch(id.0, PRODUCT, reserve(AggregateId::new(), 3), |a| Product::empty(ProductId::new(a)))
            .unwrap();
        let err = d
            .dispatch(id.0, PRODUCT, reserve(AggregateId::new(), 3), |a| Product::empty(ProductId::new(a)))
            .unwrap_err();

        assert!(matches!(err, DispatchError::Validation(msg) if msg == "Insufficient stock for Rice 1kg."));
    }

    #[test]
    fn unit_of_work_commits_all_streams_or_none() {
        let d = dispatcher();
        let a = create(&d, 5);
        let b = create(&d, 1);
        let order = AggregateId::new();

        let mut uow = d.begin();
        let mut pa: Product = uow.load(a.0, |x| Product::empty(ProductId::new(x))).unwrap();
        let mut pb: Product = uow.load(b.0, |x| Product::empty(ProductId::new(x))).unwrap();
        uow.execute(a.0, PRODUCT, &mut pa, &reserve(order, 2)).unwrap();
        uow.execute(b.0, PRODUCT, &mut pb, &reserve(order, 1)).unwrap();

        // A concurrent writer moves `b` before the commit.
        d.dispatch(
            b.0,
            PRODUCT,
            ProductCommand::CountStock(CountStock { stock: 9, occurred_at: Utc::now() }),
            |x| Product::empty(ProductId::new(x)),
        )
        .unwrap();

        let err = uow.commit().unwrap_err();
        assert!(err.is_concurrency());

        let pa: Product = d.load(a.0, |x| Product::empty(ProductId::new(x))).unwrap();
        assert_eq!(pa.stock(), 5);
    }

    #[test]
    fn repeated_commands_on_one_aggregate_share_an_append() {
        let d = dispatcher();
        let a = create(&d, 5);
        let order = AggregateId::new();

        let mut uow = d.begin();
        let mut pa: Product = uow.load(a.0, |x| Product::empty(ProductId::new(x))).unwrap();
        uow.execute(a.0, PRODUCT, &mut pa, &reserve(order, 1)).unwrap();
        uow.execute(a.0, PRODUCT, &mut pa, &reserve(order, 1)).unwrap();
        assert_eq!(uow.staged_streams(), 1);

        let committed = uow.commit().unwrap();
        assert_eq!(committed.iter().map(|e| e.sequence_number).collect::<Vec<_>>(), vec![2, 3]);
    }

    #[test]
    fn observer_sees_commits_before_subscribers() {
        struct Counter(AtomicUsize);
        impl CommitObserver for Counter {
            fn on_commit(&self, committed: &[EventEnvelope<JsonValue>]) {
                self.0.fetch_add(committed.len(), Ordering::SeqCst);
            }
        }

        let counter = Arc::new(Counter(AtomicUsize::new(0)));
        let d = dispatcher().with_observer(counter.clone());
        let sub = d.bus().subscribe();

        create(&d, 1);

        assert_eq!(counter.0.load(Ordering::SeqCst), 1);
        assert_eq!(sub.try_recv().unwrap().event_type(), "catalog.product.created");
    }

    #[test]
    fn retry_gives_up_after_the_configured_attempts() {
        let mut calls = 0;
        let result: Result<(), _> = retry_on_conflict(|| {
            calls += 1;
            Err(DispatchError::Concurrency("stale".to_string()))
        });

        assert!(result.unwrap_err().is_concurrency());
        assert_eq!(calls, CONFLICT_ATTEMPTS);
    }

    #[test]
    fn empty_unit_of_work_writes_nothing() {
        let d = dispatcher();
        assert!(d.begin().commit().unwrap().is_empty());
        assert!(d.store().load_all().unwrap().is_empty());
    }
}
