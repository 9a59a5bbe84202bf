//! Testing support
//!
//! This crate provides `MockTransport`, which implements `memcached::Transport`
//! and replays a scripted sequence of server replies, together with recording
//! implementations of the callback and metric collector traits. They make it
//! possible to exercise routing and the operation lifecycle without a server.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use memcached::{
//!     MemcachedNode, NodeAddr, NodeDriver, NoopMetricCollector, OperationFactory, OperationState,
//! };
//! use memcached_test::{MockReply, MockTransport, RecordingCallback};
//!
//! let factory = OperationFactory::new(Arc::new(NoopMetricCollector));
//! let node = MemcachedNode::handle(NodeAddr::new("10.0.0.1", 11211));
//! let callback = Arc::new(RecordingCallback::default());
//!
//! let op = factory.get("foo", callback.clone());
//! memcached::enqueue(&node, op.clone()).unwrap();
//!
//! let transport = MockTransport::new(vec![MockReply::ok("get").with_data("foo", "bar")]);
//! NodeDriver::new(node, transport.clone()).drive().unwrap();
//!
//! assert_eq!(op.state(), OperationState::Complete);
//! let values = callback.values();
//! assert_eq!(values[0].0, "foo");
//! assert_eq!(values[0].1, "bar");
//! assert!(transport.is_empty());
//! ```

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use memcached::{
    ErrorKind, MemcachedError, MemcachedResult, MetricCollector, Operation, OperationCallback,
    OperationStatus, Reply, Transport,
};

/// One scripted exchange: the command the client is expected to send and
/// what the server answers.
pub struct MockReply {
    command: &'static str,
    write_error: Option<MemcachedError>,
    values: Vec<(String, Bytes)>,
    reply: MemcachedResult<Reply>,
}

impl MockReply {
    /// Create a new `MockReply` answering the command named `command` with
    /// `reply`.
    pub fn new(command: &'static str, reply: MemcachedResult<Reply>) -> Self {
        MockReply {
            command,
            write_error: None,
            values: Vec::new(),
            reply,
        }
    }

    /// A successful status for `command`.
    pub fn ok(command: &'static str) -> Self {
        Self::new(command, Ok(Reply::Status(OperationStatus::ok())))
    }

    /// A not-my-vbucket answer for `command`.
    pub fn not_my_vbucket(command: &'static str) -> Self {
        Self::new(command, Ok(Reply::NotMyVbucket))
    }

    /// Fails while writing `command`; nothing is read back.
    pub fn write_error(command: &'static str, err: MemcachedError) -> Self {
        let unused = MemcachedError::from((ErrorKind::IoError, "write failed"));
        let mut reply = Self::new(command, Err(unused));
        reply.write_error = Some(err);
        reply
    }

    /// Delivers a value for `key` to the callback before the final reply.
    pub fn with_data(mut self, key: &str, data: impl Into<Bytes>) -> Self {
        self.values.push((key.to_string(), data.into()));
        self
    }
}

/// A mock transport that checks the client sends a specific sequence of
/// commands and answers them from a script.
#[derive(Clone)]
pub struct MockTransport {
    replies: Arc<Mutex<VecDeque<MockReply>>>,
    written: Arc<Mutex<Vec<u64>>>,
    assert_is_empty_on_drop: bool,
}

impl MockTransport {
    /// Construct a new transport from the given sequence of replies.
    pub fn new<I>(replies: I) -> Self
    where
        I: IntoIterator<Item = MockReply>,
    {
        MockTransport {
            replies: Arc::new(Mutex::new(VecDeque::from_iter(replies))),
            written: Arc::new(Mutex::new(Vec::new())),
            assert_is_empty_on_drop: false,
        }
    }

    /// Enable assertion to ensure all replies have been consumed
    pub fn assert_all_replies_consumed(mut self) -> Self {
        self.assert_is_empty_on_drop = true;
        self
    }

    /// Returns true once every scripted reply was consumed.
    pub fn is_empty(&self) -> bool {
        self.replies.lock().unwrap().is_empty()
    }

    /// Ids of the operations written so far, in order.
    pub fn written(&self) -> Vec<u64> {
        self.written.lock().unwrap().clone()
    }
}

impl Drop for MockTransport {
    fn drop(&mut self) {
        if self.assert_is_empty_on_drop {
            let replies = self.replies.lock().unwrap();
            if Arc::strong_count(&self.replies) == 1 {
                assert!(replies.back().is_none());
            }
        }
    }
}

fn unexpected(detail: String) -> MemcachedError {
    MemcachedError::from((ErrorKind::ClientError, "unexpected command", detail))
}

impl Transport for MockTransport {
    fn transmit(&mut self, op: &Operation) -> MemcachedResult<()> {
        let mut replies = self.replies.lock().unwrap();
        let expected = match replies.front() {
            Some(reply) => reply.command,
            None => return Err(unexpected(format!("nothing scripted for {op:?}"))),
        };
        if expected != op.command().name() {
            replies.pop_front();
            return Err(unexpected(format!("expected {expected}, got {op:?}")));
        }
        self.written.lock().unwrap().push(op.id());

        if replies.front().is_some_and(|reply| reply.write_error.is_some()) {
            let err = replies.pop_front().and_then(|reply| reply.write_error);
            return Err(err.unwrap_or_else(|| unexpected(String::new())));
        }
        Ok(())
    }

    fn receive(&mut self, op: &Operation) -> MemcachedResult<Reply> {
        let reply = self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| unexpected(format!("nothing to read for {op:?}")))?;
        for (key, data) in &reply.values {
            op.callback().got_data(key, 0, None, data);
        }
        reply.reply
    }
}

/// Callback remembering everything it was told.
#[derive(Default)]
pub struct RecordingCallback {
    statuses: Mutex<Vec<OperationStatus>>,
    values: Mutex<Vec<(String, Bytes)>>,
    completions: AtomicUsize,
}

impl RecordingCallback {
    /// Statuses received, in order.
    pub fn statuses(&self) -> Vec<OperationStatus> {
        self.statuses.lock().unwrap().clone()
    }

    /// Values received through `got_data`, in order.
    pub fn values(&self) -> Vec<(String, Bytes)> {
        self.values.lock().unwrap().clone()
    }

    /// How many times `complete` was called.
    pub fn completions(&self) -> usize {
        self.completions.load(Ordering::SeqCst)
    }
}

impl OperationCallback for RecordingCallback {
    fn received_status(&self, status: &OperationStatus) {
        self.statuses.lock().unwrap().push(status.clone());
    }

    fn complete(&self) {
        self.completions.fetch_add(1, Ordering::SeqCst);
    }

    fn got_data(&self, key: &str, _flags: u32, _cas: Option<u64>, data: &[u8]) {
        self.values
            .lock()
            .unwrap()
            .push((key.to_string(), Bytes::copy_from_slice(data)));
    }
}

/// Metric collector keeping every registration and sample in memory.
#[derive(Default)]
pub struct RecordingCollector {
    registered: Mutex<Vec<String>>,
    samples: Mutex<HashMap<String, Vec<u64>>>,
}

impl RecordingCollector {
    /// Histogram names in registration order.
    pub fn registered(&self) -> Vec<String> {
        self.registered.lock().unwrap().clone()
    }

    /// Samples recorded under `name`.
    pub fn samples(&self, name: &str) -> Vec<u64> {
        self.samples
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .unwrap_or_default()
    }

    /// Total number of samples across all histograms.
    pub fn sample_count(&self) -> usize {
        self.samples.lock().unwrap().values().map(Vec::len).sum()
    }
}

impl MetricCollector for RecordingCollector {
    fn add_histogram(&self, name: &str) {
        self.registered.lock().unwrap().push(name.to_string());
    }

    fn update_histogram(&self, name: &str, value: u64) {
        self.samples
            .lock()
            .unwrap()
            .entry(name.to_string())
            .or_default()
            .push(value);
    }
}
