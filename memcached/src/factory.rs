//! Construction and cloning of operations.

use std::sync::Arc;

use bytes::Bytes;
use log::{debug, error};

use crate::config::MetricType;
use crate::errors::{ErrorKind, MemcachedError, MemcachedResult};
use crate::metrics::{MetricCollector, NoopMetricCollector};
use crate::observer::{MetricNameCache, MonitoringObserver, StateChangeObserver};
use crate::ops::{
    CallbackRef, CloneRule, Command, ConcatenationType, Mutator, Operation, OperationRef,
    SaslParams, StoreType, TapOpcode, TapRequest,
};

/// Builds every operation the client issues.
///
/// All constructors go through one entry point which attaches a
/// [`MonitoringObserver`], so no operation escapes instrumentation. The metric
/// name cache is owned by the factory and shared by all of its observers.
pub struct OperationFactory {
    collector: Arc<dyn MetricCollector>,
    names: Arc<MetricNameCache>,
    observers: Vec<Arc<dyn StateChangeObserver>>,
}

impl OperationFactory {
    /// Creates a factory recording into `collector`.
    pub fn new(collector: Arc<dyn MetricCollector>) -> Self {
        let names = Arc::new(MetricNameCache::new(collector.clone()));
        Self {
            collector,
            names,
            observers: Vec::new(),
        }
    }

    /// Creates a factory recording into `collector` unless `metric_type` is
    /// [`MetricType::Off`], in which case samples are discarded.
    pub fn with_metric_type(metric_type: MetricType, collector: Arc<dyn MetricCollector>) -> Self {
        if metric_type.is_enabled() {
            Self::new(collector)
        } else {
            Self::new(Arc::new(NoopMetricCollector))
        }
    }

    /// Adds an observer attached to every operation built afterwards, next to
    /// the monitoring observer.
    pub fn add_observer(mut self, observer: Arc<dyn StateChangeObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    /// The metric name cache shared by this factory's observers.
    pub fn metric_names(&self) -> &Arc<MetricNameCache> {
        &self.names
    }

    /// Builds an instrumented operation for an arbitrary command.
    pub fn build(&self, command: Command, callback: CallbackRef) -> OperationRef {
        let mut observers: Vec<Arc<dyn StateChangeObserver>> =
            Vec::with_capacity(self.observers.len() + 1);
        observers.push(Arc::new(MonitoringObserver::new(
            self.names.clone(),
            self.collector.clone(),
        )));
        observers.extend(self.observers.iter().cloned());
        Arc::new(Operation::new(command, callback, observers))
    }

    /// No-op.
    pub fn noop(&self, callback: CallbackRef) -> OperationRef {
        self.build(Command::Noop, callback)
    }

    /// Get a single key.
    pub fn get(&self, key: &str, callback: CallbackRef) -> OperationRef {
        self.get_multi([key], callback)
    }

    /// Get many keys in one operation.
    pub fn get_multi<I, K>(&self, keys: I, callback: CallbackRef) -> OperationRef
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
    {
        let keys = keys.into_iter().map(Into::into).collect();
        self.build(Command::Get { keys }, callback)
    }

    /// Get a key with its CAS token.
    pub fn gets(&self, key: &str, callback: CallbackRef) -> OperationRef {
        self.build(Command::Gets { key: key.into() }, callback)
    }

    /// Get a key and reset its expiration.
    pub fn get_and_touch(&self, key: &str, expiration: u32, callback: CallbackRef) -> OperationRef {
        self.build(
            Command::GetAndTouch {
                key: key.into(),
                expiration,
            },
            callback,
        )
    }

    /// Get a key and lock it for `expiration` seconds.
    pub fn get_and_lock(&self, key: &str, expiration: u32, callback: CallbackRef) -> OperationRef {
        self.build(
            Command::GetAndLock {
                key: key.into(),
                expiration,
            },
            callback,
        )
    }

    /// Get a key from the replica at `replica_index`.
    pub fn replica_get(&self, key: &str, replica_index: u16, callback: CallbackRef) -> OperationRef {
        self.build(
            Command::ReplicaGet {
                key: key.into(),
                replica_index,
            },
            callback,
        )
    }

    /// Get a key and its CAS token from the replica at `replica_index`.
    pub fn replica_gets(
        &self,
        key: &str,
        replica_index: u16,
        callback: CallbackRef,
    ) -> OperationRef {
        self.build(
            Command::ReplicaGets {
                key: key.into(),
                replica_index,
            },
            callback,
        )
    }

    /// Delete a key.
    pub fn delete(&self, key: &str, callback: CallbackRef) -> OperationRef {
        self.build(
            Command::Delete {
                key: key.into(),
                cas: None,
            },
            callback,
        )
    }

    /// Delete a key if its CAS token still matches.
    pub fn delete_cas(&self, key: &str, cas: u64, callback: CallbackRef) -> OperationRef {
        self.build(
            Command::Delete {
                key: key.into(),
                cas: Some(cas),
            },
            callback,
        )
    }

    /// Store a value.
    pub fn store(
        &self,
        store_type: StoreType,
        key: &str,
        flags: u32,
        expiration: u32,
        data: impl Into<Bytes>,
        callback: CallbackRef,
    ) -> OperationRef {
        self.build(
            Command::Store {
                store_type,
                key: key.into(),
                flags,
                expiration,
                data: data.into(),
            },
            callback,
        )
    }

    /// Store a value if its CAS token still matches.
    #[allow(clippy::too_many_arguments)]
    pub fn cas(
        &self,
        store_type: StoreType,
        key: &str,
        cas: u64,
        flags: u32,
        expiration: u32,
        data: impl Into<Bytes>,
        callback: CallbackRef,
    ) -> OperationRef {
        self.build(
            Command::Cas {
                store_type,
                key: key.into(),
                cas,
                flags,
                expiration,
                data: data.into(),
            },
            callback,
        )
    }

    /// Append or prepend to a value.
    pub fn cat(
        &self,
        cat_type: ConcatenationType,
        cas: u64,
        key: &str,
        data: impl Into<Bytes>,
        callback: CallbackRef,
    ) -> OperationRef {
        self.build(
            Command::Concatenate {
                cat_type,
                cas,
                key: key.into(),
                data: data.into(),
            },
            callback,
        )
    }

    /// Reset the expiration of a key.
    pub fn touch(&self, key: &str, expiration: u32, callback: CallbackRef) -> OperationRef {
        self.build(
            Command::Touch {
                key: key.into(),
                expiration,
            },
            callback,
        )
    }

    /// Release a lock obtained with [`get_and_lock`](Self::get_and_lock).
    pub fn unlock(&self, key: &str, cas: u64, callback: CallbackRef) -> OperationRef {
        self.build(
            Command::Unlock {
                key: key.into(),
                cas,
            },
            callback,
        )
    }

    /// Observe persistence of a key on the node at `index`.
    pub fn observe(&self, key: &str, cas: u64, index: u16, callback: CallbackRef) -> OperationRef {
        self.build(
            Command::Observe {
                key: key.into(),
                cas,
                index,
            },
            callback,
        )
    }

    /// Invalidate all items after `delay` seconds.
    pub fn flush(&self, delay: u32, callback: CallbackRef) -> OperationRef {
        self.build(Command::Flush { delay }, callback)
    }

    /// Server statistics, optionally for a named group.
    pub fn stats(&self, arg: Option<&str>, callback: CallbackRef) -> OperationRef {
        self.build(
            Command::Stats {
                arg: arg.map(Into::into),
            },
            callback,
        )
    }

    /// Statistics for a single key.
    pub fn key_stats(&self, key: &str, callback: CallbackRef) -> OperationRef {
        self.build(Command::KeyStats { key: key.into() }, callback)
    }

    /// Increment or decrement a counter, creating it with `default` if missing.
    pub fn mutate(
        &self,
        mutator: Mutator,
        key: &str,
        by: u64,
        default: i64,
        expiration: u32,
        callback: CallbackRef,
    ) -> OperationRef {
        self.build(
            Command::Mutate {
                mutator,
                key: key.into(),
                by,
                default,
                expiration,
            },
            callback,
        )
    }

    /// Server version.
    pub fn version(&self, callback: CallbackRef) -> OperationRef {
        self.build(Command::Version, callback)
    }

    /// List SASL mechanisms supported by the server.
    pub fn sasl_mechs(&self, callback: CallbackRef) -> OperationRef {
        self.build(Command::SaslMechs, callback)
    }

    /// Start SASL authentication.
    pub fn sasl_auth(&self, params: SaslParams, callback: CallbackRef) -> OperationRef {
        self.build(Command::SaslAuth { params }, callback)
    }

    /// Answer a SASL challenge.
    pub fn sasl_step(
        &self,
        params: SaslParams,
        challenge: impl Into<Bytes>,
        callback: CallbackRef,
    ) -> OperationRef {
        self.build(
            Command::SaslStep {
                params,
                challenge: challenge.into(),
            },
            callback,
        )
    }

    /// Open a tap stream starting at `date`.
    pub fn tap_backfill(&self, id: Option<&str>, date: i64, callback: CallbackRef) -> OperationRef {
        self.build(
            Command::TapBackfill {
                id: id.map(Into::into),
                date,
            },
            callback,
        )
    }

    /// Open a tap stream from a custom request.
    pub fn tap_custom(
        &self,
        id: Option<&str>,
        message: TapRequest,
        callback: CallbackRef,
    ) -> OperationRef {
        self.build(
            Command::TapCustom {
                id: id.map(Into::into),
                message,
            },
            callback,
        )
    }

    /// Acknowledge a tap message.
    pub fn tap_ack(&self, opcode: TapOpcode, opaque: u32, callback: CallbackRef) -> OperationRef {
        self.build(Command::TapAck { opcode, opaque }, callback)
    }

    /// Dump the whole cache over a tap stream.
    pub fn tap_dump(&self, id: Option<&str>, callback: CallbackRef) -> OperationRef {
        self.build(
            Command::TapDump {
                id: id.map(Into::into),
            },
            callback,
        )
    }

    /// Rebuilds `op` for re-dispatch.
    ///
    /// Key-splitting commands yield one operation per key; every other
    /// cloneable command yields exactly one replacement. Clones share the
    /// original callback, inherit its not-my-vbucket history and count one more
    /// retry. The caller routes the clones; the locator is not consulted here.
    ///
    /// Cloning an operation that is cancelled, errored, not in `WriteQueued` or
    /// `Retry`, or whose command has no clone rule is a contract violation.
    pub fn clone_operation(&self, op: &Operation) -> MemcachedResult<Vec<OperationRef>> {
        let state = op.state();
        if op.is_cancelled() {
            return Err(contract_violation(
                "Attempted to clone a cancelled operation",
                op,
            ));
        }
        if op.has_errored() {
            return Err(contract_violation(
                "Attempted to clone an errored operation",
                op,
            ));
        }
        if !state.is_cloneable() {
            return Err(contract_violation(
                "Operations can only be cloned while write-queued or retrying",
                op,
            ));
        }

        let command = op.command();
        let commands = match command.clone_rule() {
            CloneRule::SplitKeys => command
                .keys()
                .iter()
                .map(|key| {
                    command
                        .for_key(key)
                        .ok_or_else(|| contract_violation("Command cannot be split by key", op))
                })
                .collect::<MemcachedResult<Vec<_>>>()?,
            CloneRule::Replace => vec![command.clone()],
            CloneRule::NotCloneable => {
                return Err(contract_violation("Unhandled operation type", op));
            }
        };

        let history = op.not_my_vbucket_nodes();
        let clones: Vec<OperationRef> = commands
            .into_iter()
            .map(|command| {
                let clone = self.build(command, op.callback().clone());
                if !history.is_empty() {
                    clone.set_not_my_vbucket_nodes(history.clone());
                }
                clone.set_retries(op.retries().saturating_add(1));
                clone
            })
            .collect();
        debug!(
            "Cloned operation {} ({}) in state {state} into {} operation(s)",
            op.id(),
            command.name(),
            clones.len()
        );
        Ok(clones)
    }
}

fn contract_violation(desc: &'static str, op: &Operation) -> MemcachedError {
    error!("{desc}: {op:?}");
    MemcachedError::from((ErrorKind::ContractViolation, desc, format!("{op:?}")))
}
