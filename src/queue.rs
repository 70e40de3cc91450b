// ABOUTME: In-process event queue and worker pool for asynchronous processing
// ABOUTME: Provides enqueue handles for the receiver and shared-consumer workers
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! Queue between the synchronous webhook receiver and the event
//! processor workers. Workers share a single receiver; distinct
//! external activities process fully in parallel while per-activity
//! ordering is enforced by the sync lock, not the queue.

use crate::processor::EventProcessor;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// A unit of work: one persisted event to process
#[derive(Debug, Clone)]
pub struct ProcessTask {
    /// Event log key
    pub event_uid: String,
}

/// Cloneable enqueue handle held by the receiver and the retry scheduler
#[derive(Clone)]
pub struct EventQueue {
    sender: mpsc::UnboundedSender<ProcessTask>,
}

impl EventQueue {
    /// Enqueue an event for asynchronous processing. A send failure
    /// means the worker pool is gone; the event stays `queued` and is
    /// picked up by a duplicate delivery or restart.
    pub fn enqueue(&self, event_uid: &str) {
        let task = ProcessTask {
            event_uid: event_uid.to_owned(),
        };
        if self.sender.send(task).is_err() {
            error!(event_uid = %event_uid, "Event queue closed; event remains queued");
        }
    }
}

/// Create the queue and its single shared receiver
#[must_use]
pub fn event_queue() -> (EventQueue, mpsc::UnboundedReceiver<ProcessTask>) {
    let (sender, receiver) = mpsc::unbounded_channel();
    (EventQueue { sender }, receiver)
}

/// Spawn `count` workers draining the shared receiver
pub fn spawn_workers(
    count: usize,
    receiver: mpsc::UnboundedReceiver<ProcessTask>,
    processor: Arc<EventProcessor>,
) -> Vec<JoinHandle<()>> {
    let receiver = Arc::new(Mutex::new(receiver));

    (0..count)
        .map(|worker_id| {
            let receiver = Arc::clone(&receiver);
            let processor = Arc::clone(&processor);
            tokio::spawn(async move {
                info!(worker_id, "Event processor worker started");
                loop {
                    let task = { receiver.lock().await.recv().await };
                    match task {
                        Some(task) => {
                            if let Err(e) = processor.process_event(&task.event_uid).await {
                                warn!(
                                    worker_id,
                                    event_uid = %task.event_uid,
                                    error = %e,
                                    "Event processing returned an error"
                                );
                            }
                        }
                        None => {
                            info!(worker_id, "Event queue closed; worker exiting");
                            break;
                        }
                    }
                }
            })
        })
        .collect()
}
