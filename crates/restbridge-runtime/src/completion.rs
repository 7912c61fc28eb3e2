use std::sync::{Arc, Mutex, PoisonError};

use restbridge_common::TransportStatus;

use crate::node::Node;
use crate::request::RequestId;

/// Monotonic id assigned to each issued operation.
pub type OperationId = u64;

/// Shape of the payload a callback receives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PayloadKind {
    /// `(request, status, body, body_len)`
    Text,
    /// `(request, status, node)`
    Structured,
}

impl PayloadKind {
    /// Number of parameters the receiving public must declare.
    pub fn arity(self) -> usize {
        match self {
            PayloadKind::Text => 4,
            PayloadKind::Structured => 3,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            PayloadKind::Text => "text",
            PayloadKind::Structured => "structured",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Text(String),
    Structured(Node),
}

/// The outcome of one finished operation, waiting for delivery.
///
/// Built once on a worker thread and never mutated afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRecord {
    pub operation: OperationId,
    pub request: RequestId,
    pub callback: String,
    pub status: TransportStatus,
    pub payload: Payload,
}

impl CompletionRecord {
    pub fn kind(&self) -> PayloadKind {
        match self.payload {
            Payload::Text(_) => PayloadKind::Text,
            Payload::Structured(_) => PayloadKind::Structured,
        }
    }
}

/// Multi-producer hand-off between completion threads and the VM thread.
///
/// Any number of [`CompletionSender`]s push concurrently; the tick driver
/// takes the whole buffer at once with [`drain_all`](Self::drain_all).
#[derive(Debug, Default)]
pub struct CompletionQueue {
    records: Arc<Mutex<Vec<CompletionRecord>>>,
}

/// Producer side of a [`CompletionQueue`].
#[derive(Debug, Clone)]
pub struct CompletionSender {
    records: Arc<Mutex<Vec<CompletionRecord>>>,
}

impl CompletionQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sender(&self) -> CompletionSender {
        CompletionSender {
            records: Arc::clone(&self.records),
        }
    }

    /// Remove and return everything queued so far, oldest first.
    pub fn drain_all(&self) -> Vec<CompletionRecord> {
        // A panicking producer cannot leave the Vec half-written, so a
        // poisoned lock still guards valid data.
        let mut records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        std::mem::take(&mut *records)
    }

    pub fn len(&self) -> usize {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl CompletionSender {
    pub fn push(&self, record: CompletionRecord) {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(record);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn record(operation: OperationId, request: RequestId) -> CompletionRecord {
        CompletionRecord {
            operation,
            request,
            callback: "OnDone".to_string(),
            status: TransportStatus::Http(200),
            payload: Payload::Text(format!("op {}", operation)),
        }
    }

    #[test]
    fn drain_empty_is_empty() {
        let queue = CompletionQueue::new();
        assert!(queue.drain_all().is_empty());
        assert!(queue.drain_all().is_empty());
    }

    #[test]
    fn drain_returns_fifo_and_empties() {
        let queue = CompletionQueue::new();
        let sender = queue.sender();
        for op in 0..5 {
            sender.push(record(op, 0));
        }
        assert_eq!(queue.len(), 5);
        let drained: Vec<_> = queue.drain_all().into_iter().map(|r| r.operation).collect();
        assert_eq!(drained, vec![0, 1, 2, 3, 4]);
        assert!(queue.is_empty());
    }

    #[test]
    fn concurrent_producers_lose_nothing_and_keep_order() {
        const PRODUCERS: i32 = 8;
        const PER_PRODUCER: u64 = 500;

        let queue = CompletionQueue::new();
        let handles: Vec<_> = (0..PRODUCERS)
            .map(|producer| {
                let sender = queue.sender();
                thread::spawn(move || {
                    for op in 0..PER_PRODUCER {
                        sender.push(record(op, producer));
                    }
                })
            })
            .collect();

        // Drain while producers are still running, then once more at the end.
        let mut seen = queue.drain_all();
        for handle in handles {
            handle.join().unwrap();
        }
        seen.extend(queue.drain_all());

        assert_eq!(seen.len(), (PRODUCERS as usize) * (PER_PRODUCER as usize));
        for producer in 0..PRODUCERS {
            let ops: Vec<_> = seen
                .iter()
                .filter(|r| r.request == producer)
                .map(|r| r.operation)
                .collect();
            assert_eq!(ops, (0..PER_PRODUCER).collect::<Vec<_>>());
        }
        assert!(queue.drain_all().is_empty());
    }

    #[test]
    fn kind_and_arity() {
        let text = record(1, 1);
        assert_eq!(text.kind(), PayloadKind::Text);
        assert_eq!(text.kind().arity(), 4);

        let structured = CompletionRecord {
            payload: Payload::Structured(Node::Null),
            ..record(2, 1)
        };
        assert_eq!(structured.kind(), PayloadKind::Structured);
        assert_eq!(structured.kind().arity(), 3);
    }
}
