//! Cluster replication of administrative actions.
//!
//! - [`ClusterBroadcaster`]: aggregates per-peer outcomes, defers sends until commit
//! - [`PeerFanOutTransport`]: concurrent dispatch to peers under one deadline
//! - [`InProcessPeer`]: delivers tasks to a node in the same process

pub mod broadcaster;
pub mod local;

pub use broadcaster::{ClusterBroadcaster, DEFAULT_BROADCAST_TIMEOUT};
pub use local::{InProcessPeer, PeerFanOutTransport};
