use std::collections::HashMap;
use std::slice;

use bytes::Bytes;

/// The storage semantics of a store or CAS command.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum StoreType {
    /// Unconditionally store the value.
    Set,
    /// Store the value only if the key does not exist.
    Add,
    /// Store the value only if the key already exists.
    Replace,
}

/// Where a concatenation places the new bytes.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum ConcatenationType {
    /// Add the data after the existing value.
    Append,
    /// Add the data before the existing value.
    Prepend,
}

/// Direction of a counter mutation.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum Mutator {
    /// Increment the counter.
    Incr,
    /// Decrement the counter.
    Decr,
}

/// Opcodes of the tap replication stream.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum TapOpcode {
    /// Open a tap stream.
    Request,
    /// Keep-alive.
    Noop,
    /// A value changed.
    Mutation,
    /// A key was deleted.
    Delete,
    /// The cache was flushed.
    Flush,
    /// Stream control message.
    Opaque,
    /// A vbucket changed state.
    VbucketSet,
    /// A checkpoint begins.
    StartCheckpoint,
    /// A checkpoint ends.
    EndCheckpoint,
}

/// A custom tap stream request.
#[derive(Clone, PartialEq, Eq, Debug, Default)]
pub struct TapRequest {
    /// Name of the tap stream.
    pub name: Option<String>,
    /// Raw tap request flags.
    pub flags: u32,
    /// Start the stream from this date, if set.
    pub backfill_date: Option<i64>,
    /// Restrict the stream to these vbuckets.
    pub vbuckets: Vec<u16>,
}

/// Parameters shared by the SASL authentication commands.
#[derive(Clone, PartialEq, Eq, Debug, Default)]
pub struct SaslParams {
    /// Mechanisms offered by the server.
    pub mechanisms: Vec<String>,
    /// Name the server is known under.
    pub server_name: String,
    /// Mechanism properties.
    pub properties: HashMap<String, String>,
}

/// How an operation is rebuilt when it has to be re-dispatched.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum CloneRule {
    /// One new single-key operation per key of the original.
    SplitKeys,
    /// Exactly one replacement carrying the same parameters.
    Replace,
    /// The command cannot be re-dispatched by cloning.
    NotCloneable,
}

/// Every command the operation factory can build, with its parameters.
///
/// Payloads are already encoded by the transcoding layer; the wire codec turns
/// a command into protocol bytes.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum Command {
    /// No-op, used to flush quiet operations.
    Noop,
    /// Fetch one or many values.
    Get {
        /// Keys to fetch, in request order.
        keys: Vec<String>,
    },
    /// Fetch a value with its CAS token.
    Gets {
        /// The key addressed.
        key: String,
    },
    /// Fetch a value and reset its expiration.
    GetAndTouch {
        /// The key addressed.
        key: String,
        /// Expiration in seconds, or an absolute Unix time.
        expiration: u32,
    },
    /// Fetch a value and lock it.
    GetAndLock {
        /// The key addressed.
        key: String,
        /// Expiration in seconds, or an absolute Unix time.
        expiration: u32,
    },
    /// Fetch a value from a replica.
    ReplicaGet {
        /// The key addressed.
        key: String,
        /// Which replica to read from.
        replica_index: u16,
    },
    /// Fetch a value and its CAS token from a replica.
    ReplicaGets {
        /// The key addressed.
        key: String,
        /// Which replica to read from.
        replica_index: u16,
    },
    /// Delete a key, optionally guarded by a CAS token.
    Delete {
        /// The key addressed.
        key: String,
        /// Only delete while the item still has this CAS token.
        cas: Option<u64>,
    },
    /// Store a value.
    Store {
        /// Set, add or replace.
        store_type: StoreType,
        /// The key addressed.
        key: String,
        /// Opaque flags stored with the value.
        flags: u32,
        /// Expiration in seconds, or an absolute Unix time.
        expiration: u32,
        /// Encoded payload.
        data: Bytes,
    },
    /// Store a value if its CAS token still matches.
    Cas {
        /// Set, add or replace.
        store_type: StoreType,
        /// The key addressed.
        key: String,
        /// CAS token the item must still carry.
        cas: u64,
        /// Opaque flags stored with the value.
        flags: u32,
        /// Expiration in seconds, or an absolute Unix time.
        expiration: u32,
        /// Encoded payload.
        data: Bytes,
    },
    /// Append or prepend to a value.
    Concatenate {
        /// Append or prepend.
        cat_type: ConcatenationType,
        /// CAS token the item must still carry.
        cas: u64,
        /// The key addressed.
        key: String,
        /// Encoded payload.
        data: Bytes,
    },
    /// Reset the expiration of a key.
    Touch {
        /// The key addressed.
        key: String,
        /// Expiration in seconds, or an absolute Unix time.
        expiration: u32,
    },
    /// Release a lock taken by get-and-lock.
    Unlock {
        /// The key addressed.
        key: String,
        /// CAS token the item must still carry.
        cas: u64,
    },
    /// Query persistence and replication of a key.
    Observe {
        /// The key addressed.
        key: String,
        /// CAS token the item must still carry.
        cas: u64,
        /// Replica index to observe, 0 for the master.
        index: u16,
    },
    /// Invalidate every item after a delay.
    Flush {
        /// Seconds to wait before invalidating.
        delay: u32,
    },
    /// Fetch server statistics.
    Stats {
        /// Statistics group, or the general group when absent.
        arg: Option<String>,
    },
    /// Fetch statistics for a single key.
    KeyStats {
        /// The key addressed.
        key: String,
    },
    /// Increment or decrement a counter.
    Mutate {
        /// Increment or decrement.
        mutator: Mutator,
        /// The key addressed.
        key: String,
        /// Amount to add or subtract.
        by: u64,
        /// Initial value when the key does not exist.
        default: i64,
        /// Expiration in seconds, or an absolute Unix time.
        expiration: u32,
    },
    /// Fetch the server version.
    Version,
    /// List supported SASL mechanisms.
    SaslMechs,
    /// Start SASL authentication.
    SaslAuth {
        /// Mechanism and credentials.
        params: SaslParams,
    },
    /// Continue SASL authentication with a server challenge.
    SaslStep {
        /// Mechanism and credentials.
        params: SaslParams,
        /// Challenge sent by the server.
        challenge: Bytes,
    },
    /// Open a tap stream starting at a date.
    TapBackfill {
        /// Name of the tap stream.
        id: Option<String>,
        /// Backfill from this Unix time.
        date: i64,
    },
    /// Open a tap stream from a custom request.
    TapCustom {
        /// Name of the tap stream.
        id: Option<String>,
        /// Request flags and vbuckets.
        message: TapRequest,
    },
    /// Acknowledge a tap message.
    TapAck {
        /// Opcode of the acknowledged message.
        opcode: TapOpcode,
        /// Opaque value of the acknowledged message.
        opaque: u32,
    },
    /// Dump the whole cache over tap.
    TapDump {
        /// Name of the tap stream.
        id: Option<String>,
    },
}

impl Command {
    /// Short name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Command::Noop => "noop",
            Command::Get { .. } => "get",
            Command::Gets { .. } => "gets",
            Command::GetAndTouch { .. } => "gat",
            Command::GetAndLock { .. } => "getl",
            Command::ReplicaGet { .. } => "replica-get",
            Command::ReplicaGets { .. } => "replica-gets",
            Command::Delete { .. } => "delete",
            Command::Store { .. } => "store",
            Command::Cas { .. } => "cas",
            Command::Concatenate { .. } => "cat",
            Command::Touch { .. } => "touch",
            Command::Unlock { .. } => "unlock",
            Command::Observe { .. } => "observe",
            Command::Flush { .. } => "flush",
            Command::Stats { .. } => "stats",
            Command::KeyStats { .. } => "key-stats",
            Command::Mutate { .. } => "mutate",
            Command::Version => "version",
            Command::SaslMechs => "sasl-mechs",
            Command::SaslAuth { .. } => "sasl-auth",
            Command::SaslStep { .. } => "sasl-step",
            Command::TapBackfill { .. } => "tap-backfill",
            Command::TapCustom { .. } => "tap-custom",
            Command::TapAck { .. } => "tap-ack",
            Command::TapDump { .. } => "tap-dump",
        }
    }

    /// The keys this command addresses; empty for node-wide commands.
    pub fn keys(&self) -> &[String] {
        match self {
            Command::Get { keys } => keys,
            Command::Gets { key }
            | Command::GetAndTouch { key, .. }
            | Command::GetAndLock { key, .. }
            | Command::ReplicaGet { key, .. }
            | Command::ReplicaGets { key, .. }
            | Command::Delete { key, .. }
            | Command::Store { key, .. }
            | Command::Cas { key, .. }
            | Command::Concatenate { key, .. }
            | Command::Touch { key, .. }
            | Command::Unlock { key, .. }
            | Command::Observe { key, .. }
            | Command::KeyStats { key }
            | Command::Mutate { key, .. } => slice::from_ref(key),
            Command::Noop
            | Command::Flush { .. }
            | Command::Stats { .. }
            | Command::Version
            | Command::SaslMechs
            | Command::SaslAuth { .. }
            | Command::SaslStep { .. }
            | Command::TapBackfill { .. }
            | Command::TapCustom { .. }
            | Command::TapAck { .. }
            | Command::TapDump { .. } => &[],
        }
    }

    /// How this command is rebuilt for re-dispatch.
    pub fn clone_rule(&self) -> CloneRule {
        match self {
            Command::Get { .. }
            | Command::Gets { .. }
            | Command::ReplicaGet { .. }
            | Command::ReplicaGets { .. } => CloneRule::SplitKeys,
            Command::GetAndTouch { .. }
            | Command::GetAndLock { .. }
            | Command::Delete { .. }
            | Command::Store { .. }
            | Command::Cas { .. }
            | Command::Concatenate { .. }
            | Command::Touch { .. }
            | Command::Unlock { .. }
            | Command::Observe { .. }
            | Command::Mutate { .. } => CloneRule::Replace,
            Command::Noop
            | Command::Flush { .. }
            | Command::Stats { .. }
            | Command::KeyStats { .. }
            | Command::Version
            | Command::SaslMechs
            | Command::SaslAuth { .. }
            | Command::SaslStep { .. }
            | Command::TapBackfill { .. }
            | Command::TapCustom { .. }
            | Command::TapAck { .. }
            | Command::TapDump { .. } => CloneRule::NotCloneable,
        }
    }

    /// Returns true if the command tracks nodes that answered not-my-vbucket.
    pub fn is_vbucket_aware(&self) -> bool {
        !self.keys().is_empty()
    }

    /// Returns the single-key form of a key-splitting command, or `None` if
    /// the command does not split.
    pub(crate) fn for_key(&self, key: &str) -> Option<Command> {
        let key = key.to_string();
        match self {
            Command::Get { .. } => Some(Command::Get { keys: vec![key] }),
            Command::Gets { .. } => Some(Command::Gets { key }),
            Command::ReplicaGet { replica_index, .. } => Some(Command::ReplicaGet {
                key,
                replica_index: *replica_index,
            }),
            Command::ReplicaGets { replica_index, .. } => Some(Command::ReplicaGets {
                key,
                replica_index: *replica_index,
            }),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn multi_get_exposes_all_keys() {
        let cmd = Command::Get {
            keys: vec!["a".into(), "b".into()],
        };
        assert_eq!(cmd.keys(), ["a", "b"]);
        assert_eq!(cmd.clone_rule(), CloneRule::SplitKeys);
        assert!(cmd.is_vbucket_aware());
    }

    #[test]
    fn node_wide_commands_are_not_cloneable() {
        for cmd in [
            Command::Noop,
            Command::Flush { delay: 0 },
            Command::Stats { arg: None },
            Command::Version,
            Command::SaslMechs,
            Command::TapDump { id: None },
        ] {
            assert!(cmd.keys().is_empty());
            assert!(!cmd.is_vbucket_aware());
            assert_eq!(cmd.clone_rule(), CloneRule::NotCloneable, "{}", cmd.name());
        }
    }

    #[test]
    fn for_key_keeps_replica_index() {
        let cmd = Command::ReplicaGets {
            key: "k".into(),
            replica_index: 2,
        };
        assert_eq!(
            cmd.for_key("other"),
            Some(Command::ReplicaGets {
                key: "other".into(),
                replica_index: 2
            })
        );
        assert_eq!(Command::Version.for_key("x"), None);
    }
}
