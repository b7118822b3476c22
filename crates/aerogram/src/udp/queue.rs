//! Operation queues for datagram sockets.
//!
//! Sends and receives wait in separate FIFO queues. Each queue has at most
//! one in-flight ("current") operation; the head of the queue is promoted
//! when the previous current operation completes. An operation's timeout
//! clock starts at promotion, never at enqueue, so time spent waiting behind
//! other operations does not count against it.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::time::Duration;

use bytes::Bytes;
use tokio::time::Instant;

use crate::udp::config::Tag;

/// An operation that can wait in an [`OperationQueue`].
pub(crate) trait QueuedOperation {
    /// Timeout measured from the moment the operation becomes current.
    /// `None` waits forever.
    fn timeout(&self) -> Option<Duration>;
}

/// A queued send operation.
#[derive(Clone, Debug)]
pub(crate) struct SendRequest {
    /// Payload handed over by the caller.
    pub payload: Bytes,
    /// Explicit destination; `None` sends to the connected peer.
    pub target: Option<SocketAddr>,
    pub timeout: Option<Duration>,
    pub tag: Tag,
    /// Instant the operation entered the queue. The timeout clock does not
    /// start here; it starts at promotion.
    pub queued_at: Instant,
}

impl QueuedOperation for SendRequest {
    fn timeout(&self) -> Option<Duration> {
        self.timeout
    }
}

/// A queued receive operation.
#[derive(Clone, Debug)]
pub(crate) struct ReceiveRequest {
    pub timeout: Option<Duration>,
    pub tag: Tag,
}

impl QueuedOperation for ReceiveRequest {
    fn timeout(&self) -> Option<Duration> {
        self.timeout
    }
}

/// FIFO queue with a single in-flight operation.
#[derive(Debug)]
pub(crate) struct OperationQueue<T> {
    pending: VecDeque<T>,
    current: Option<T>,
    /// Absolute deadline of the current operation, armed at promotion.
    /// `Some` only while an operation is current.
    deadline: Option<Instant>,
}

impl<T: QueuedOperation> OperationQueue<T> {
    pub fn new() -> Self {
        Self {
            pending: VecDeque::new(),
            current: None,
            deadline: None,
        }
    }

    /// Append an operation to the back of the queue.
    pub fn enqueue(&mut self, op: T) {
        self.pending.push_back(op);
    }

    /// Promote the head of the queue to current, arming its deadline.
    ///
    /// Does nothing if an operation is already current. Returns `true` if an
    /// operation is current afterwards.
    pub fn promote(&mut self) -> bool {
        if self.current.is_none() {
            if let Some(op) = self.pending.pop_front() {
                self.deadline = op.timeout().map(|t| Instant::now() + t);
                self.current = Some(op);
            }
        }
        self.current.is_some()
    }

    /// The in-flight operation, if any.
    pub fn current(&self) -> Option<&T> {
        self.current.as_ref()
    }

    /// Remove and return the in-flight operation, disarming its deadline.
    ///
    /// The next call to [`promote`](Self::promote) arms the successor.
    pub fn take_current(&mut self) -> Option<T> {
        self.deadline = None;
        self.current.take()
    }

    /// Deadline of the in-flight operation, if one is armed.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// `true` when nothing is in flight and nothing is waiting.
    pub fn is_idle(&self) -> bool {
        self.current.is_none() && self.pending.is_empty()
    }

    /// Discard the current operation and everything waiting.
    ///
    /// Returns the number of operations discarded.
    pub fn clear(&mut self) -> usize {
        let discarded = self.pending.len() + usize::from(self.current.is_some());
        self.pending.clear();
        self.current = None;
        self.deadline = None;
        discarded
    }
}
