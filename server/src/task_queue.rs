//! Fixed pool of background workers for fire-and-forget jobs.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use log::{debug, error};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

pub type Task = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Workers pull boxed futures from a shared channel. Shutting down closes the
/// channel, lets the workers finish what is already queued and joins them, so
/// no job outlives the queue.
///
/// Must be created inside a tokio runtime.
pub struct TaskQueue {
    sender: Option<mpsc::UnboundedSender<Task>>,
    workers: Vec<JoinHandle<()>>,
}

impl TaskQueue {
    pub fn new(worker_count: usize) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel::<Task>();
        let receiver = Arc::new(Mutex::new(receiver));

        let workers = (0..worker_count.max(1))
            .map(|worker| {
                let receiver = Arc::clone(&receiver);
                tokio::spawn(async move {
                    loop {
                        let task = {
                            let mut receiver = receiver.lock().await;
                            receiver.recv().await
                        };
                        match task {
                            Some(task) => task.await,
                            None => break,
                        }
                    }
                    debug!("Task worker {} stopped", worker);
                })
            })
            .collect();

        Self {
            sender: Some(sender),
            workers,
        }
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Queues a job. Returns false once the queue is shutting down.
    pub fn submit<F>(&self, task: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        match &self.sender {
            Some(sender) => sender.send(Box::pin(task)).is_ok(),
            None => false,
        }
    }

    /// Runs every queued job to completion and joins the workers.
    pub async fn shutdown(mut self) {
        self.sender.take();
        for worker in self.workers.drain(..) {
            if let Err(e) = worker.await {
                error!("Task worker panicked: {}", e);
            }
        }
    }
}
