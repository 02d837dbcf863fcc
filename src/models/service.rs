use std::{
    future::Future,
    panic::{self, AssertUnwindSafe},
    pin::Pin,
    sync::Arc,
    task::{Context as TaskContext, Poll},
    thread,
};

use anyhow::{Context, Result};
use crossbeam_channel::{unbounded, Receiver, Sender};
use tokio::sync::oneshot;

use crate::core::error::HubResult;

use super::{AcquisitionPolicy, AssetItem, EnsureResult, ModelManager};

type Job = Box<dyn FnOnce(&ModelManager) + Send + 'static>;

/// The job behind a [`Ticket`] never reported back, either because the
/// service shut down first or because the job panicked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("install job abandoned before completion")]
pub struct Abandoned;

/// Handle to the result of a submitted job. Hosts on plain threads call
/// [`Ticket::wait`]; async hosts `.await` it.
#[derive(Debug)]
pub struct Ticket<T> {
    receiver: oneshot::Receiver<T>,
}

impl<T> Ticket<T> {
    /// Blocks the calling thread until the job finishes. Must not be called
    /// from inside an async runtime.
    pub fn wait(self) -> Result<T, Abandoned> {
        self.receiver.blocking_recv().map_err(|_| Abandoned)
    }
}

impl<T> Future for Ticket<T> {
    type Output = Result<T, Abandoned>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.receiver)
            .poll(cx)
            .map(|outcome| outcome.map_err(|_| Abandoned))
    }
}

/// Fixed pool of blocking workers that run ensure pipelines off the
/// caller's thread.
pub struct InstallService {
    manager: Arc<ModelManager>,
    sender: Sender<Job>,
}

impl InstallService {
    pub fn new(manager: Arc<ModelManager>, workers: usize) -> Result<Self> {
        let (sender, receiver) = unbounded::<Job>();
        for index in 0..workers.max(1) {
            let receiver = receiver.clone();
            let manager = manager.clone();
            thread::Builder::new()
                .name(format!("modelhub-worker-{index}"))
                .spawn(move || worker_loop(receiver, manager))
                .context("spawn install worker")?;
        }
        tracing::debug!("Install service started with {} workers", workers.max(1));
        Ok(Self { manager, sender })
    }

    pub fn manager(&self) -> &Arc<ModelManager> {
        &self.manager
    }

    /// Queues `job` on the pool. If the pool is gone the ticket resolves to
    /// [`Abandoned`].
    pub fn submit<T, F>(&self, job: F) -> Ticket<T>
    where
        T: Send + 'static,
        F: FnOnce(&ModelManager) -> T + Send + 'static,
    {
        let (reply, receiver) = oneshot::channel();
        let job: Job = Box::new(move |manager| {
            // the caller may have dropped its ticket; nothing to report then
            let _ = reply.send(job(manager));
        });
        if self.sender.send(job).is_err() {
            tracing::warn!("Install workers are gone; job dropped");
        }
        Ticket { receiver }
    }

    pub fn ensure_installed(
        &self,
        item: AssetItem,
        policy: AcquisitionPolicy,
    ) -> Ticket<HubResult<EnsureResult>> {
        self.submit(move |manager| manager.ensure_one(&item, policy))
    }

    /// Runs the whole batch as one job; items are processed in order.
    pub fn ensure_installed_many(
        &self,
        items: Vec<AssetItem>,
        policy: AcquisitionPolicy,
    ) -> Ticket<Vec<EnsureResult>> {
        self.submit(move |manager| ensure_batch(manager, &items, policy))
    }
}

/// Ensures every item in order, turning failures into failure entries
/// instead of stopping.
pub fn ensure_batch(
    manager: &ModelManager,
    items: &[AssetItem],
    policy: AcquisitionPolicy,
) -> Vec<EnsureResult> {
    items
        .iter()
        .map(|item| match manager.ensure_one(item, policy) {
            Ok(result) => result,
            Err(error) => manager.failure_result(item, &error),
        })
        .collect()
}

fn worker_loop(receiver: Receiver<Job>, manager: Arc<ModelManager>) {
    for job in receiver.iter() {
        // a panicking job drops its reply sender, which surfaces as Abandoned
        if panic::catch_unwind(AssertUnwindSafe(|| job(&manager))).is_err() {
            tracing::error!("Install job panicked");
        }
    }
    tracing::debug!("Install worker exiting");
}
