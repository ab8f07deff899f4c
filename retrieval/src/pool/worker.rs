//! Worker thread: one backend, one inbox, shared results channel.

use tokio::sync::mpsc::UnboundedSender;

use super::backend::EncodeReply;
use super::backend::EncodeRequest;
use super::backend::EncoderBackend;
use crate::error::Result;

/// Request envelope sent to a worker.
pub(crate) struct WorkerMessage {
    pub id: u64,
    pub request: EncodeRequest,
}

/// Event produced by workers for the pool's demultiplexer.
pub(crate) enum PoolEvent {
    Reply {
        id: u64,
        slot: usize,
        result: std::result::Result<EncodeReply, String>,
        rss_bytes: u64,
    },
    Exited {
        slot: usize,
        error: Option<String>,
    },
}

/// Spawn a worker thread draining `inbox` until it closes.
pub(crate) fn spawn_worker(
    slot: usize,
    backend: Box<dyn EncoderBackend>,
    inbox: std::sync::mpsc::Receiver<WorkerMessage>,
    events: UnboundedSender<PoolEvent>,
) -> std::io::Result<std::thread::JoinHandle<()>> {
    std::thread::Builder::new()
        .name(format!("osgrep-encoder-{slot}"))
        .spawn(move || run_worker(slot, backend, inbox, events))
}

fn run_worker(
    slot: usize,
    mut backend: Box<dyn EncoderBackend>,
    inbox: std::sync::mpsc::Receiver<WorkerMessage>,
    events: UnboundedSender<PoolEvent>,
) {
    tracing::debug!(slot, backend = backend.name(), "Encoder worker started");

    let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        while let Ok(message) = inbox.recv() {
            let result = handle(backend.as_mut(), message.request).map_err(|e| e.to_string());
            let rss_bytes = backend.rss_bytes();
            let reply = PoolEvent::Reply {
                id: message.id,
                slot,
                result,
                rss_bytes,
            };
            if events.send(reply).is_err() {
                break;
            }
        }
    }));

    match outcome {
        // Inbox closed: the pool dropped this slot on purpose.
        Ok(()) => tracing::debug!(slot, "Encoder worker stopped"),
        Err(panic) => {
            let _ = events.send(PoolEvent::Exited {
                slot,
                error: Some(panic_message(panic.as_ref())),
            });
        }
    }
}

fn handle(backend: &mut dyn EncoderBackend, request: EncodeRequest) -> Result<EncodeReply> {
    match request {
        EncodeRequest::EmbedSingle(text) => backend.embed(&text).map(EncodeReply::Vector),
        EncodeRequest::EmbedBatch(texts) => {
            backend.encode_batch(&texts).map(EncodeReply::Encodings)
        }
        EncodeRequest::EncodeQuery(text) => backend.encode_query(&text).map(EncodeReply::Query),
        EncodeRequest::Rerank { query, docs } => {
            backend.rerank(&query, &docs).map(EncodeReply::Scores)
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "worker panicked".to_string()
    }
}
