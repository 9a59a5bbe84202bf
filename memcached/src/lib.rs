//! Client-side core of a memcached cluster client.
//!
//! The crate decides which node serves a request, drives every request
//! through its lifecycle, and measures how long each step of that lifecycle
//! takes. Sockets and the wire protocol live behind the [`Transport`] trait.
//!
//! # Basic Operation
//!
//! Operations are built by an [`OperationFactory`], routed onto node queues
//! by a [`Dispatcher`] using a [`NodeLocator`], and drained by a
//! [`NodeDriver`]:
//!
//! ```rust
//! use std::sync::Arc;
//! use memcached::{
//!     BucketedMetricCollector, DispatchConfig, Dispatcher, MemcachedNode, NodeAddr,
//!     OperationCallback, OperationFactory, OperationState, OperationStatus, RoundRobinLocator,
//! };
//!
//! struct Print;
//!
//! impl OperationCallback for Print {
//!     fn received_status(&self, status: &OperationStatus) {
//!         println!("{status}");
//!     }
//!
//!     fn complete(&self) {}
//! }
//!
//! # fn main() -> memcached::MemcachedResult<()> {
//! let nodes = vec![
//!     MemcachedNode::handle(NodeAddr::new("10.0.0.1", 11211)),
//!     MemcachedNode::handle(NodeAddr::new("10.0.0.2", 11211)),
//! ];
//! let locator = Arc::new(RoundRobinLocator::new(nodes)?);
//! let collector = Arc::new(BucketedMetricCollector::new());
//! let factory = Arc::new(OperationFactory::new(collector));
//! let dispatcher = Dispatcher::new(locator, factory.clone(), DispatchConfig::default());
//!
//! let op = factory.get("user:42", Arc::new(Print));
//! dispatcher.dispatch(op.clone())?;
//! assert_eq!(op.state(), OperationState::WriteQueued);
//! # Ok(()) }
//! ```
//!
//! # Metrics
//!
//! Every state transition is recorded as a latency sample in microseconds,
//! into a histogram named `overall-time-from-{from}-to-{to}` and, once the
//! operation has a node, into `node-{address}-time-from-{from}-to-{to}`.
//! Whether samples are kept is controlled by [`MetricType`], which can be read
//! from the `MEMCACHED_METRIC_TYPE` environment variable. With the `metrics`
//! feature (on by default) the [`MetricsRsCollector`] forwards samples to the
//! `metrics` crate facade.

#![deny(non_camel_case_types)]
#![warn(missing_docs)]
#![cfg_attr(docsrs, warn(rustdoc::broken_intra_doc_links))]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub use crate::config::{DispatchConfig, FailureMode, MetricType, METRIC_TYPE_ENV};
pub use crate::dispatch::Dispatcher;
pub use crate::driver::{NodeDriver, Reply, Transport};
pub use crate::errors::{ErrorKind, MemcachedError, MemcachedResult};
pub use crate::factory::OperationFactory;
pub use crate::locator::{NodeLocator, NodeSequence, RoundRobinLocator};
#[cfg(feature = "metrics")]
pub use crate::metrics::MetricsRsCollector;
pub use crate::metrics::{
    BucketedMetricCollector, HistogramSnapshot, MetricCollector, NoopMetricCollector,
};
pub use crate::node::{enqueue, MemcachedNode, Node, NodeAddr, NodeHandle, ReadonlyNode};
pub use crate::observer::{MetricNameCache, MonitoringObserver, StateChangeObserver};
pub use crate::ops::{
    CallbackRef, CloneRule, Command, ConcatenationType, Mutator, Operation, OperationCallback,
    OperationRef, OperationState, OperationStatus, SaslParams, StoreType, TapOpcode, TapRequest,
};

pub mod locator;
pub mod ops;

mod config;
mod dispatch;
mod driver;
mod errors;
mod factory;
mod metrics;
mod node;
mod observer;
