//! Background task queue for embedding ingestion.
//!
//! One dispatcher thread receives tasks over an mpsc channel and spawns a
//! worker thread per task, throttled by `task_queue_max_threads`. Queue
//! state is dumped to `task-queue.json` so interrupted tasks can be
//! re-queued on the next daemon start. Extraction is single-shot: a media
//! row that yields no embedding is left as-is, there is no automatic retry.

use std::{
    sync::{
        atomic::{AtomicU16, Ordering},
        mpsc, Arc, RwLock,
    },
    thread::sleep,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use serde::{Deserialize, Serialize};

use crate::{
    config::Config,
    eid::Eid,
    records::RecordStore,
    recognition::{self, EmbeddingProvider, IngestOutcome},
    storage::{self, StorageManager},
};

const QUEUE_DUMP_FILE: &str = "task-queue.json";

pub fn now() -> u128 {
    let start = SystemTime::now();
    let since_the_epoch = start
        .duration_since(UNIX_EPOCH)
        .expect("Time went backwards");
    since_the_epoch.as_millis()
}

pub fn throttle(counter: Arc<AtomicU16>, config: Arc<RwLock<Config>>) {
    while counter.load(Ordering::Relaxed) >= config.read().unwrap().task_queue_max_threads {
        sleep(Duration::from_millis(100));
    }
}

pub fn start_queue(
    task_rx: mpsc::Receiver<Task>,
    store: Arc<dyn RecordStore>,
    provider: Arc<dyn EmbeddingProvider>,
    config: Arc<RwLock<Config>>,
    base_path: String,
) {
    let thread_ctr = Arc::new(AtomicU16::new(0));

    log::debug!("waiting for job");
    while let Ok(task) = task_rx.recv() {
        log::debug!("got the job");
        let store = store.clone();
        let provider = provider.clone();
        let thread_counter = thread_ctr.clone();
        let config = config.clone();
        let base_path = base_path.clone();

        // graceful shutdown
        if let Task::Shutdown = &task {
            while thread_counter.load(Ordering::Relaxed) > 0 {
                sleep(Duration::from_millis(100));
            }
            return;
        };

        let id = save_task(&base_path, task.clone(), Status::Pending);
        let task_handle = std::thread::spawn({
            let thread_counter = thread_counter.clone();
            let id = id.clone();
            let base_path = base_path.clone();
            move || {
                throttle(thread_counter.clone(), config.clone());

                thread_counter.fetch_add(1, Ordering::Relaxed);
                set_status(&base_path, id.clone(), Status::InProgress);

                let dimensions = config.read().unwrap().recognition.dimensions;
                let status = task.run(store, provider, dimensions);
                set_status(&base_path, id.clone(), status);

                // remove task a bit later to give clients an opportunity to react
                std::thread::spawn(move || {
                    sleep(Duration::from_secs(10));
                    remove_task(&base_path, id);
                });
            }
        });

        // handle thread panics
        std::thread::spawn({
            let base_path = base_path.clone();
            move || {
                if let Err(err) = task_handle.join() {
                    log::error!("task_handle panicked: {err:?}");
                    remove_task(&base_path, id);
                }

                thread_counter.fetch_sub(1, Ordering::Relaxed);
            }
        });
    }
}

pub fn read_queue_dump(base_path: &str) -> QueueDump {
    let store = match storage::BackendLocal::new(base_path) {
        Ok(s) => s,
        Err(e) => {
            log::error!("failed to initialize queue storage: {e}");
            return QueueDump {
                queue: vec![],
                now: now(),
            };
        }
    };

    if store.exists(QUEUE_DUMP_FILE) {
        match store.read(QUEUE_DUMP_FILE) {
            Ok(data) => serde_json::from_slice(&data).unwrap_or_else(|e| {
                log::error!("queue dump is malformed, starting fresh: {e}");
                QueueDump {
                    queue: vec![],
                    now: now(),
                }
            }),
            Err(e) => {
                log::error!("failed to read queue dump: {e}");
                QueueDump {
                    queue: vec![],
                    now: now(),
                }
            }
        }
    } else {
        QueueDump {
            queue: vec![],
            now: now(),
        }
    }
}

pub fn write_queue_dump(base_path: &str, queue_dump: &QueueDump) {
    let store = match storage::BackendLocal::new(base_path) {
        Ok(s) => s,
        Err(e) => {
            log::error!("failed to initialize queue storage: {e}");
            return;
        }
    };

    let queue_dump_str = serde_json::to_string_pretty(&queue_dump).unwrap();
    if let Err(e) = store.write(QUEUE_DUMP_FILE, queue_dump_str.as_bytes()) {
        log::error!("failed to write queue dump: {e}");
    }
}

pub fn remove_task(base_path: &str, id: Eid) {
    let mut queue_dump = read_queue_dump(base_path);
    queue_dump.queue.retain(|td| td.id != id);
    queue_dump.now = now();
    write_queue_dump(base_path, &queue_dump);
}

pub fn set_status(base_path: &str, id: Eid, status: Status) {
    let mut queue_dump = read_queue_dump(base_path);
    if let Some(task_dump) = queue_dump.queue.iter_mut().find(|td| td.id == id) {
        task_dump.status = status;
    }

    queue_dump.now = now();
    write_queue_dump(base_path, &queue_dump);
}

pub fn save_task(base_path: &str, task: Task, status: Status) -> Eid {
    let eid = Eid::new();

    let task_dump = TaskDump {
        id: eid.clone(),
        task,
        status,
    };

    let mut queue_dump = read_queue_dump(base_path);

    queue_dump.queue.push(task_dump);
    queue_dump.now = now();
    write_queue_dump(base_path, &queue_dump);

    eid
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum Status {
    Interrupted,
    Pending,
    InProgress,
    Done,
    Error(String),
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QueueDump {
    pub queue: Vec<TaskDump>,
    pub now: u128,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TaskDump {
    pub id: Eid,
    pub task: Task,
    pub status: Status,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum Task {
    /// request to extract and attach an embedding for a FACE media row
    ExtractEmbedding { media_id: u64 },

    /// request to gracefully shutdown task queue
    Shutdown,
}

impl Task {
    pub fn run(
        &self,
        store: Arc<dyn RecordStore>,
        provider: Arc<dyn EmbeddingProvider>,
        dimensions: usize,
    ) -> Status {
        match self {
            Task::ExtractEmbedding { media_id } => {
                let outcome =
                    recognition::ingest_media_embedding(*media_id, &store, &provider, dimensions);

                match outcome {
                    // a media row without an embedding is a valid end state;
                    // only store failures count as task errors
                    IngestOutcome::Attached
                    | IngestOutcome::NoEmbedding
                    | IngestOutcome::WrongDimensions { .. }
                    | IngestOutcome::NotFace
                    | IngestOutcome::AlreadyEmbedded => Status::Done,
                    IngestOutcome::StoreFailed(msg) => Status::Error(msg),
                }
            }
            Task::Shutdown => unreachable!(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_dump_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().to_str().unwrap();

        let id = save_task(base, Task::ExtractEmbedding { media_id: 7 }, Status::Pending);
        let dump = read_queue_dump(base);
        assert_eq!(dump.queue.len(), 1);
        assert_eq!(dump.queue[0].id, id);
        assert!(matches!(dump.queue[0].status, Status::Pending));

        set_status(base, id.clone(), Status::Done);
        let dump = read_queue_dump(base);
        assert!(matches!(dump.queue[0].status, Status::Done));

        remove_task(base, id);
        assert!(read_queue_dump(base).queue.is_empty());
    }

    #[test]
    fn test_missing_dump_reads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let dump = read_queue_dump(dir.path().to_str().unwrap());
        assert!(dump.queue.is_empty());
    }
}
