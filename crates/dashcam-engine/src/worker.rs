//! Worker pool: busiest-category selection, lazy resource load/switch, task
//! execution, heartbeats (§4.4).
//!
//! Ported from `original_source/pipeline/workers/cpu_worker_mp.py` (the
//! direct processor→dispatch→unconditional-release_refs loop spec.md §4.4
//! describes) and `gpu_worker.py` (busiest-category selection and
//! heartbeat updates). Workers here are `tokio` tasks rather than OS
//! processes (§5); processor and dispatch work runs inside
//! `tokio::task::spawn_blocking` so it never stalls the async scheduler.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use dashcam_core::{Lane, TaskCategory};
use tokio::sync::broadcast;

use crate::api::PipelineEvent;
use crate::dispatch::{self, DispatchContext};
use crate::frame_store::FrameStore;
use crate::processor::ProcessorRegistry;
use crate::queue::CentralQueue;
use crate::shutdown::ShutdownCoordinator;

/// Shared mapping from worker_id → {category, last_heartbeat} (§3). Each
/// worker writes only its own entry; readers (the monitor) accept eventual
/// consistency, per spec.md §5's shared-resource policy.
#[derive(Default)]
pub(crate) struct WorkerStatusTable {
    statuses: Mutex<HashMap<usize, WorkerStatusEntry>>,
    active: AtomicUsize,
}

#[derive(Debug, Clone)]
pub(crate) struct WorkerStatusEntry {
    pub lane: Lane,
    pub category: Option<TaskCategory>,
    pub last_heartbeat: Instant,
}

impl WorkerStatusTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn update(&self, worker_id: usize, lane: Lane, category: Option<TaskCategory>) {
        let mut statuses = self.statuses.lock().unwrap();
        statuses.insert(
            worker_id,
            WorkerStatusEntry {
                lane,
                category,
                last_heartbeat: Instant::now(),
            },
        );
    }

    fn heartbeat(&self, worker_id: usize) {
        if let Some(entry) = self.statuses.lock().unwrap().get_mut(&worker_id) {
            entry.last_heartbeat = Instant::now();
        }
    }

    pub fn snapshot(&self) -> Vec<(usize, WorkerStatusEntry)> {
        let mut entries: Vec<_> = self
            .statuses
            .lock()
            .unwrap()
            .iter()
            .map(|(id, entry)| (*id, entry.clone()))
            .collect();
        entries.sort_by_key(|(id, _)| *id);
        entries
    }

    /// Marks one worker as mid-task (popped, not yet released). The engine's
    /// drain wait (§4.8) treats a nonzero count here the same as a nonempty
    /// backlog: a worker between pop and dispatch can still enqueue
    /// descendant tasks the queue alone wouldn't show.
    fn begin_task(&self) {
        self.active.fetch_add(1, Ordering::SeqCst);
    }

    fn end_task(&self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn active_count(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }
}

pub(crate) struct WorkerConfig {
    pub idle_poll: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        WorkerConfig {
            idle_poll: Duration::from_millis(20),
        }
    }
}

/// One worker's lifetime loop. Runs until `terminate` is requested (§4.8
/// phase 2): any in-flight task still runs to completion, but no new one is
/// started afterward.
#[allow(clippy::too_many_arguments)]
pub(crate) async fn run_worker(
    worker_id: usize,
    lane: Lane,
    lane_categories: &'static [TaskCategory],
    queue: Arc<CentralQueue>,
    frame_store: Arc<FrameStore>,
    registry: Arc<ProcessorRegistry>,
    status_table: Arc<WorkerStatusTable>,
    shutdown: Arc<ShutdownCoordinator>,
    events: broadcast::Sender<PipelineEvent>,
    config: WorkerConfig,
) {
    let mut loaded_category: Option<TaskCategory> = None;
    let mut loaded_resource: Option<Box<dyn std::any::Any + Send>> = None;

    loop {
        if shutdown.is_terminate_requested() {
            break;
        }

        let busiest = queue.busiest_category(lane_categories, loaded_category);
        status_table.update(worker_id, lane, busiest);

        let Some(category) = busiest else {
            tokio::time::sleep(config.idle_poll).await;
            continue;
        };

        if loaded_category != Some(category) {
            let processor = match registry.get(category) {
                Some(p) => p,
                None => {
                    let _ = events.send(PipelineEvent::Warning {
                        message: format!("no processor registered for category {category}"),
                    });
                    tokio::time::sleep(config.idle_poll).await;
                    continue;
                }
            };
            // Drop the previous category's resource before loading the
            // next one: a worker holds at most one loaded resource at a
            // time (§4.4).
            loaded_resource = None;
            let load_result =
                tokio::task::spawn_blocking(move || processor.load_resource()).await;
            match load_result {
                Ok(Ok(resource)) => {
                    loaded_resource = Some(resource);
                    loaded_category = Some(category);
                    let _ = events.send(PipelineEvent::WorkerCategoryChanged {
                        worker_id,
                        lane,
                        category: Some(category),
                    });
                }
                Ok(Err(err)) => {
                    let _ = events.send(PipelineEvent::Error {
                        message: format!("failed to load resource for {category}: {err}"),
                    });
                    tokio::time::sleep(config.idle_poll).await;
                    continue;
                }
                Err(join_err) => {
                    let _ = events.send(PipelineEvent::Error {
                        message: format!("resource load task panicked: {join_err}"),
                    });
                    continue;
                }
            }
        }

        let Some(task) = queue.pop(category) else {
            // Lost the race to another worker on the same lane; re-select.
            continue;
        };

        let processor = registry
            .get(category)
            .expect("processor registered for every category");
        let resource = loaded_resource
            .take()
            .expect("resource loaded before dequeuing a task for this category");

        status_table.begin_task();

        let task_for_processor = task.clone();
        let frame_store_for_processor = frame_store.clone();
        let (process_result, resource) = tokio::task::spawn_blocking(move || {
            let mut resource = resource;
            let result = processor.process(
                &task_for_processor,
                &frame_store_for_processor,
                resource.as_mut(),
            );
            (result, resource)
        })
        .await
        .expect("processor task panicked");
        loaded_resource = Some(resource);

        match process_result {
            Ok(task_result) => {
                let ctx = DispatchContext {
                    queue: &queue,
                    frame_store: &frame_store,
                };
                dispatch::dispatch(&task, task_result, &ctx).await;
                let _ = events.send(PipelineEvent::TaskFinished { category });
            }
            Err(err) => {
                let _ = events.send(PipelineEvent::Warning {
                    message: format!("task in category {category} failed: {err}"),
                });
            }
        }

        // §4.4 invariant: every successful push is paired with exactly one
        // matching release_refs, regardless of processor/dispatch outcome.
        frame_store.release_refs(&task.meta.dependencies);
        status_table.heartbeat(worker_id);
        status_table.end_task();
    }
}
