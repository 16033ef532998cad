//! Deferred execution boundary: a batch operation handed off whole, run later
//! on a named queue, its outcome only visible in the logs.

use futures::future::LocalBoxFuture;
use futures::FutureExt;

pub trait Job: Send + 'static {
    async fn run(&mut self);

    fn pre_run(&mut self) {
        let ty_name = std::any::type_name::<Self>();
        tracing::debug!(ty_name, "deferred job started")
    }

    fn post_run(&mut self) {
        let ty_name = std::any::type_name::<Self>();
        tracing::debug!(ty_name, "deferred job ended")
    }
}

/// Object-safe form of [`Job`].
pub trait JobBoxed: Send + 'static {
    fn run(&mut self) -> LocalBoxFuture<'_, ()>;

    fn pre_run(&mut self);

    fn post_run(&mut self);
}

impl<T> JobBoxed for T
where
    T: Job,
{
    fn run(&mut self) -> LocalBoxFuture<'_, ()> {
        async { Job::run(self).await }.boxed_local()
    }

    fn pre_run(&mut self) {
        Job::pre_run(self);
    }

    fn post_run(&mut self) {
        Job::post_run(self);
    }
}

pub trait JobQueue: Send + Sync + 'static {
    /// Accepts the job for later execution on `queue` (the default queue when
    /// `None`).
    fn push(&self, queue: Option<&str>, job: Box<dyn JobBoxed>) -> anyhow::Result<()>;
}

#[cfg(feature = "tokio")]
pub use tokio_impl::TokioJobQueue;

#[cfg(feature = "tokio")]
mod tokio_impl {
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    use anyhow::Context;
    use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};

    use super::{JobBoxed, JobQueue};

    const DEFAULT_QUEUE: &str = "default";

    /// One worker thread per queue name, each driving a current-thread
    /// runtime and a `LocalSet`. Jobs on the same queue start in push order.
    #[derive(Clone, Default)]
    pub struct TokioJobQueue {
        workers: Arc<Mutex<HashMap<String, UnboundedSender<Box<dyn JobBoxed>>>>>,
    }

    impl TokioJobQueue {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn queues(&self) -> Vec<String> {
            let lock = self.workers.lock().unwrap_or_else(|e| e.into_inner());
            let mut names: Vec<String> = lock.keys().cloned().collect();
            names.sort();
            names
        }

        fn sender(&self, queue: &str) -> anyhow::Result<UnboundedSender<Box<dyn JobBoxed>>> {
            let mut lock = self.workers.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(sender) = lock.get(queue).filter(|s| !s.is_closed()) {
                return Ok(sender.clone());
            }

            let (sender, receiver) = tokio::sync::mpsc::unbounded_channel();
            start_worker(queue, receiver)
                .with_context(|| format!("failed to start worker for queue '{queue}'"))?;
            lock.insert(queue.to_string(), sender.clone());

            Ok(sender)
        }
    }

    impl JobQueue for TokioJobQueue {
        fn push(&self, queue: Option<&str>, job: Box<dyn JobBoxed>) -> anyhow::Result<()> {
            let queue = queue.unwrap_or(DEFAULT_QUEUE);
            self.sender(queue)?
                .send(job)
                .map_err(|_| anyhow::anyhow!("worker for queue '{queue}' has stopped"))
        }
    }

    fn start_worker(
        queue: &str,
        mut receiver: UnboundedReceiver<Box<dyn JobBoxed>>,
    ) -> std::io::Result<()> {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;

        std::thread::Builder::new()
            .name(format!("batch-queue-{queue}"))
            .spawn(move || {
                let local = tokio::task::LocalSet::new();

                local.spawn_local(async move {
                    while let Some(mut job) = receiver.recv().await {
                        tokio::task::spawn_local(async move {
                            job.pre_run();
                            job.run().await;
                            job.post_run();
                        });
                    }
                });

                rt.block_on(local);
            })?;

        Ok(())
    }

    #[cfg(test)]
    mod tests {
        use tokio::sync::oneshot;

        use super::*;
        use crate::queue::Job;

        struct IncreaseOne {
            count: u32,
            reporter: Option<oneshot::Sender<(u32, String)>>,
        }

        impl Job for IncreaseOne {
            async fn run(&mut self) {
                let thread = std::thread::current().name().unwrap_or_default().to_string();
                self.reporter
                    .take()
                    .unwrap()
                    .send((self.count + 1, thread))
                    .unwrap();
            }
        }

        #[tokio::test]
        async fn jobs_run_on_their_queue() -> anyhow::Result<()> {
            let queue = TokioJobQueue::new();

            let (tx, rx) = oneshot::channel();
            queue.push(Some("imports"), Box::new(IncreaseOne { count: 1, reporter: Some(tx) }))?;
            assert_eq!(rx.await?, (2, "batch-queue-imports".to_string()));

            let (tx, rx) = oneshot::channel();
            queue.push(None, Box::new(IncreaseOne { count: 5, reporter: Some(tx) }))?;
            assert_eq!(rx.await?.0, 6);

            assert_eq!(queue.queues(), vec!["default", "imports"]);
            Ok(())
        }
    }
}
