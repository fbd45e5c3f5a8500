//! # Background Photo Hashing
//!
//! Content hashing (SHA-256, used for deduplication) and optional resizing
//! run on a dedicated thread that shares no memory with the caller. The only
//! way in is a [`HashTask`]; the only way out is a stream of
//! [`WorkerMessage`]s.
//!
//! ## Protocol
//!
//! For every submitted task id the worker emits zero or more
//! [`WorkerMessage::Progress`] messages followed by exactly one terminal
//! message, [`WorkerMessage::Success`] or [`WorkerMessage::Error`]. A failed
//! task never takes the worker down.
//!
//! Tasks cannot be cancelled once submitted. If the owner no longer cares
//! about an id, it simply ignores that id's messages.

use crate::error::{FichaError, Result};
use sha2::{Digest, Sha256};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Hex-encoded SHA-256 of `data`.
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResizeOptions {
    pub max_dimension: u32,
    pub quality: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HashOptions {
    pub resize: Option<ResizeOptions>,
    /// Bytes hashed between progress messages.
    pub chunk_size: usize,
}

impl Default for HashOptions {
    fn default() -> Self {
        Self {
            resize: None,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashTask {
    pub id: String,
    pub payload: Vec<u8>,
    pub options: HashOptions,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashResult {
    pub content_hash: String,
    pub size: u64,
    /// Present only when a resize was requested.
    pub processed: Option<Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerMessage {
    Progress { id: String, percent: u8 },
    Success { id: String, result: HashResult },
    Error { id: String, message: String },
}

impl WorkerMessage {
    pub fn task_id(&self) -> &str {
        match self {
            Self::Progress { id, .. } | Self::Success { id, .. } | Self::Error { id, .. } => id.as_str(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Progress { .. })
    }
}

/// Image decode/resize primitive used by the worker.
pub trait ImageProcessor: Send + 'static {
    fn resize(&self, payload: &[u8], options: &ResizeOptions) -> std::result::Result<Vec<u8>, String>;
}

/// Returns the payload unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughProcessor;

impl ImageProcessor for PassthroughProcessor {
    fn resize(&self, payload: &[u8], _options: &ResizeOptions) -> std::result::Result<Vec<u8>, String> {
        Ok(payload.to_vec())
    }
}

fn run_task<P: ImageProcessor>(processor: &P, task: HashTask, events: &Sender<WorkerMessage>) -> bool {
    let HashTask { id, payload, options } = task;

    let terminal = match process(processor, &id, &payload, &options, events) {
        Ok(result) => WorkerMessage::Success { id, result },
        Err(message) => WorkerMessage::Error { id, message },
    };
    events.send(terminal).is_ok()
}

fn process<P: ImageProcessor>(
    processor: &P,
    id: &str,
    payload: &[u8],
    options: &HashOptions,
    events: &Sender<WorkerMessage>,
) -> std::result::Result<HashResult, String> {
    if payload.is_empty() {
        return Err("empty payload".to_string());
    }

    let processed = match &options.resize {
        Some(resize) => Some(processor.resize(payload, resize)?),
        None => None,
    };
    let data = processed.as_deref().unwrap_or(payload);

    let chunk_size = options.chunk_size.max(1);
    let mut hasher = Sha256::new();
    let mut done = 0usize;
    for chunk in data.chunks(chunk_size) {
        hasher.update(chunk);
        done += chunk.len();
        let percent = ((done * 100) / data.len()) as u8;
        // A closed channel only means nobody is listening any more.
        let _ = events.send(WorkerMessage::Progress {
            id: id.to_string(),
            percent,
        });
    }

    Ok(HashResult {
        content_hash: hex::encode(hasher.finalize()),
        size: data.len() as u64,
        processed,
    })
}

pub struct HashWorker {
    tasks: Option<Sender<HashTask>>,
    events: Receiver<WorkerMessage>,
    join: Option<JoinHandle<()>>,
}

impl HashWorker {
    pub fn spawn() -> Self {
        Self::with_processor(PassthroughProcessor)
    }

    pub fn with_processor<P: ImageProcessor>(processor: P) -> Self {
        let (task_tx, task_rx) = mpsc::channel::<HashTask>();
        let (event_tx, event_rx) = mpsc::channel::<WorkerMessage>();

        let join = thread::spawn(move || {
            for task in task_rx {
                debug!(task_id = %task.id, size = task.payload.len(), "hash task started");
                if !run_task(&processor, task, &event_tx) {
                    break;
                }
            }
        });

        Self {
            tasks: Some(task_tx),
            events: event_rx,
            join: Some(join),
        }
    }

    /// Queue a task. Fails only if the worker thread has gone away.
    pub fn submit(&self, task: HashTask) -> Result<()> {
        let tasks = self
            .tasks
            .as_ref()
            .ok_or_else(|| FichaError::Worker("worker is shut down".to_string()))?;
        tasks
            .send(task)
            .map_err(|_| FichaError::Worker("worker thread stopped".to_string()))
    }

    pub fn try_recv(&self) -> Option<WorkerMessage> {
        match self.events.try_recv() {
            Ok(message) => Some(message),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Option<WorkerMessage> {
        match self.events.recv_timeout(timeout) {
            Ok(message) => Some(message),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Everything received so far, without blocking.
    pub fn drain(&self) -> Vec<WorkerMessage> {
        std::iter::from_fn(|| self.try_recv()).collect()
    }

    /// Stop accepting tasks, finish the queued ones and join the thread.
    /// Returns messages that were still unread.
    pub fn shutdown(mut self) -> Vec<WorkerMessage> {
        self.close();
        self.events.try_iter().collect()
    }

    fn close(&mut self) {
        self.tasks.take();
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

impl Drop for HashWorker {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FailingProcessor;

    impl ImageProcessor for FailingProcessor {
        fn resize(&self, _payload: &[u8], _options: &ResizeOptions) -> std::result::Result<Vec<u8>, String> {
            Err("unsupported image format".to_string())
        }
    }

    struct HalvingProcessor;

    impl ImageProcessor for HalvingProcessor {
        fn resize(&self, payload: &[u8], _options: &ResizeOptions) -> std::result::Result<Vec<u8>, String> {
            Ok(payload[..payload.len() / 2].to_vec())
        }
    }

    fn task(id: &str, payload: &[u8], options: HashOptions) -> HashTask {
        HashTask {
            id: id.to_string(),
            payload: payload.to_vec(),
            options,
        }
    }

    fn messages_for(messages: &[WorkerMessage], id: &str) -> Vec<WorkerMessage> {
        messages.iter().filter(|m| m.task_id() == id).cloned().collect()
    }

    #[test]
    fn sha256_known_vector() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn progress_then_exactly_one_success() {
        let worker = HashWorker::spawn();
        let options = HashOptions {
            chunk_size: 4,
            ..Default::default()
        };
        worker.submit(task("t1", b"0123456789abcdef", options)).unwrap();
        let messages = worker.shutdown();

        let for_task = messages_for(&messages, "t1");
        assert_eq!(for_task.iter().filter(|m| m.is_terminal()).count(), 1);
        assert!(for_task.last().unwrap().is_terminal());

        let progress: Vec<u8> = for_task
            .iter()
            .filter_map(|m| match m {
                WorkerMessage::Progress { percent, .. } => Some(*percent),
                _ => None,
            })
            .collect();
        assert_eq!(progress, vec![25, 50, 75, 100]);

        match for_task.last().unwrap() {
            WorkerMessage::Success { result, .. } => {
                assert_eq!(result.content_hash, sha256_hex(b"0123456789abcdef"));
                assert_eq!(result.size, 16);
                assert_eq!(result.processed, None);
            }
            other => panic!("unexpected terminal message: {:?}", other),
        }
    }

    #[test]
    fn empty_payload_is_a_task_error() {
        let worker = HashWorker::spawn();
        worker.submit(task("empty", b"", HashOptions::default())).unwrap();
        worker.submit(task("ok", b"data", HashOptions::default())).unwrap();
        let messages = worker.shutdown();

        let empty = messages_for(&messages, "empty");
        assert_eq!(empty.len(), 1);
        assert!(matches!(&empty[0], WorkerMessage::Error { message, .. } if message == "empty payload"));

        let ok = messages_for(&messages, "ok");
        assert!(matches!(ok.last(), Some(WorkerMessage::Success { .. })));
    }

    #[test]
    fn processor_failure_does_not_stop_worker() {
        let worker = HashWorker::with_processor(FailingProcessor);
        let resize = HashOptions {
            resize: Some(ResizeOptions {
                max_dimension: 800,
                quality: 80,
            }),
            ..Default::default()
        };
        worker.submit(task("a", b"img", resize)).unwrap();
        worker.submit(task("b", b"img", HashOptions::default())).unwrap();
        let messages = worker.shutdown();

        assert!(matches!(
            messages_for(&messages, "a").last(),
            Some(WorkerMessage::Error { .. })
        ));
        assert!(matches!(
            messages_for(&messages, "b").last(),
            Some(WorkerMessage::Success { .. })
        ));
    }

    #[test]
    fn resize_hashes_processed_payload() {
        let worker = HashWorker::with_processor(HalvingProcessor);
        let options = HashOptions {
            resize: Some(ResizeOptions {
                max_dimension: 100,
                quality: 70,
            }),
            ..Default::default()
        };
        worker.submit(task("r", b"abcdefgh", options)).unwrap();
        let messages = worker.shutdown();

        match messages_for(&messages, "r").last() {
            Some(WorkerMessage::Success { result, .. }) => {
                assert_eq!(result.processed.as_deref(), Some(&b"abcd"[..]));
                assert_eq!(result.content_hash, sha256_hex(b"abcd"));
                assert_eq!(result.size, 4);
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn recv_timeout_returns_messages() {
        let worker = HashWorker::spawn();
        worker.submit(task("x", b"payload", HashOptions::default())).unwrap();
        let mut terminal = None;
        while terminal.is_none() {
            match worker.recv_timeout(Duration::from_secs(5)) {
                Some(message) if message.is_terminal() => terminal = Some(message),
                Some(_) => {}
                None => break,
            }
        }
        assert!(matches!(terminal, Some(WorkerMessage::Success { .. })));
    }
}
