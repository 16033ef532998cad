//! Running a batch: inline with [`Handler::now`], or handed to a
//! [`JobQueue`] with [`Handler::dispatch`].

use std::sync::Arc;

use crate::config::BatchConfig;
use crate::db::{Connection, ConnectionResolver, SingleConnection};
use crate::event::EventDispatcher;
use crate::queue::{Job, JobQueue};
use crate::result::{BatchError, Result};
use crate::value::Value;

pub mod delete;
pub(crate) mod events;
pub mod save;

pub use delete::{DeleteAction, DeleteReport};
pub use save::{SaveAction, SaveReport};

pub type SaveHandler = Handler<SaveAction>;
pub type DeleteHandler = Handler<DeleteAction>;

/// The collaborators and configuration a batch runs against.
#[derive(Clone)]
pub struct BatchContext {
    connections: Arc<dyn ConnectionResolver>,
    events: Arc<dyn EventDispatcher>,
    config: Arc<BatchConfig>,
    queue: Option<Arc<dyn JobQueue>>,
}

impl BatchContext {
    pub fn new(connections: Arc<dyn ConnectionResolver>, events: Arc<dyn EventDispatcher>) -> Self {
        Self {
            connections,
            events,
            config: Arc::new(BatchConfig::default()),
            queue: None,
        }
    }

    /// Every entity on one connection.
    pub fn single(connection: Connection, events: Arc<dyn EventDispatcher>) -> Self {
        Self::new(Arc::new(SingleConnection(connection)), events)
    }

    pub fn with_config(mut self, config: Arc<BatchConfig>) -> Self {
        self.config = config;
        self
    }

    pub fn with_queue(mut self, queue: Arc<dyn JobQueue>) -> Self {
        self.queue = Some(queue);
        self
    }

    pub fn connections(&self) -> &dyn ConnectionResolver {
        self.connections.as_ref()
    }

    pub fn events(&self) -> &Arc<dyn EventDispatcher> {
        &self.events
    }

    pub fn config(&self) -> &Arc<BatchConfig> {
        &self.config
    }

    pub fn queue(&self) -> Option<&Arc<dyn JobQueue>> {
        self.queue.as_ref()
    }
}

impl std::fmt::Debug for BatchContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchContext")
            .field("config", &self.config)
            .field("queue", &self.queue.is_some())
            .finish()
    }
}

pub trait Report: Send + 'static {
    /// Primary keys the operation affected.
    fn keys(&self) -> &[Value];

    fn into_keys(self) -> Vec<Value>;
}

/// A whole save or delete over one batch.
pub trait BatchAction: Send + 'static {
    type Report: Report;

    async fn perform(self, ctx: &BatchContext) -> Result<Self::Report>;
}

/// Runs a batch action exactly once, inline or deferred.
#[must_use = "a batch handler does nothing until `now`, `execute` or `dispatch` is called"]
#[derive(Debug)]
pub struct Handler<A> {
    action: A,
    ctx: BatchContext,
    queue: Option<String>,
}

impl<A> Handler<A>
where
    A: BatchAction,
{
    pub(crate) fn new(action: A, ctx: BatchContext) -> Self {
        Self {
            action,
            ctx,
            queue: None,
        }
    }

    /// Routes a later [`dispatch`](Self::dispatch) to `queue`.
    pub fn on_queue(mut self, queue: impl Into<String>) -> Self {
        self.queue = Some(queue.into());
        self
    }

    pub async fn execute(self) -> Result<A::Report> {
        self.action.perform(&self.ctx).await
    }

    /// Runs inline and returns the affected primary keys.
    pub async fn now(self) -> Result<Vec<Value>> {
        Ok(self.execute().await?.into_keys())
    }

    /// Hands the whole operation to the configured queue.
    pub fn dispatch(self) -> Result<()> {
        let Some(jobs) = self.ctx.queue().cloned() else {
            return Err(BatchError::QueueUnavailable);
        };
        let queue = self.queue.or_else(|| self.ctx.config().default_queue());

        tracing::debug!(queue = queue.as_deref(), "batch dispatched");
        jobs.push(
            queue.as_deref(),
            Box::new(DeferredBatch {
                action: Some(self.action),
                ctx: self.ctx,
            }),
        )?;

        Ok(())
    }

    pub fn dispatch_on(self, queue: impl Into<String>) -> Result<()> {
        self.on_queue(queue).dispatch()
    }
}

/// A batch action waiting on a queue.
pub struct DeferredBatch<A> {
    action: Option<A>,
    ctx: BatchContext,
}

impl<A> Job for DeferredBatch<A>
where
    A: BatchAction,
{
    async fn run(&mut self) {
        let Some(action) = self.action.take() else {
            return;
        };

        match action.perform(&self.ctx).await {
            Ok(report) => {
                tracing::debug!(affected = report.keys().len(), "deferred batch finished")
            }
            Err(err) => tracing::error!(error = %err, "deferred batch failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::batch::Batch;
    use crate::db::memory::MemoryStore;
    use crate::entity::EntityType;
    use crate::event::EventBus;
    use crate::queue::JobBoxed;
    use crate::attributes;

    #[derive(Default)]
    struct RecordingQueue {
        pushed: Mutex<Vec<Option<String>>>,
    }

    impl JobQueue for RecordingQueue {
        fn push(&self, queue: Option<&str>, _job: Box<dyn JobBoxed>) -> anyhow::Result<()> {
            self.pushed.lock().unwrap().push(queue.map(str::to_string));
            Ok(())
        }
    }

    fn context() -> BatchContext {
        let store = MemoryStore::new("sqlite").with_table("cars", &[("id", "integer"), ("name", "text")]);
        BatchContext::single(Connection::from_backend(Arc::new(store)), Arc::new(EventBus::new()))
    }

    fn batch() -> Batch {
        Batch::of(EntityType::new("car", "cars"), [attributes! { "id" => 1, "name" => "a" }]).unwrap()
    }

    #[test]
    fn dispatch_without_queue_fails() {
        let err = batch().save(&context()).dispatch().unwrap_err();
        assert!(matches!(err, BatchError::QueueUnavailable));
    }

    #[test]
    fn dispatch_routes_to_named_or_default_queue() {
        let queue = Arc::new(RecordingQueue::default());
        let config = Arc::new(BatchConfig::default());
        config.set_default_queue(Some("batches".to_string()));
        let ctx = context().with_queue(queue.clone()).with_config(config);

        batch().save(&ctx).dispatch().unwrap();
        batch().delete(&ctx).dispatch_on("cleanup").unwrap();

        assert_eq!(
            *queue.pushed.lock().unwrap(),
            vec![Some("batches".to_string()), Some("cleanup".to_string())]
        );
    }

    #[cfg(feature = "tokio")]
    #[tokio::test]
    async fn deferred_batches_run_on_the_worker() -> anyhow::Result<()> {
        let store = Arc::new(
            MemoryStore::new("sqlite").with_table("cars", &[("id", "integer"), ("name", "text")]),
        );
        let events = EventBus::new();
        let (tx, rx) = tokio::sync::oneshot::channel();
        let tx = Mutex::new(Some(tx));
        events.listen(crate::event::Channel::model("car", crate::event::EventKind::Saved), move |record| {
            if let Some(tx) = tx.lock().unwrap().take() {
                let _ = tx.send(record.exists());
            }
            None
        });

        let ctx = BatchContext::single(Connection::from_backend(store.clone()), Arc::new(events))
            .with_queue(Arc::new(crate::queue::TokioJobQueue::new()));
        batch().save(&ctx).on_queue("tests").dispatch()?;

        assert!(rx.await?);
        assert_eq!(store.rows("cars"), vec![attributes! { "id" => 1, "name" => "a" }]);
        Ok(())
    }
}
