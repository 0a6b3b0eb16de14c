//! Forwarding and mobility-resolution core for a name-based network stack.
//!
//! Nodes are addressed by hierarchical [`Name`]s that may change over their
//! lifetime. The crate provides the tables a forwarder needs to cope with
//! that: a longest-prefix-match [`Fib`], the [`Nnpt`] lease table mapping old
//! names to new ones, and a per-destination [`PduBuffer`] for units that cannot
//! be forwarded yet. A [`Forwarder`] ties them to a [`ForwardingStrategy`].
//!
//! Everything runs to completion on the caller's thread. Time is a
//! [`Duration`](std::time::Duration) since simulation start, passed in by the
//! scheduler driving the forwarder.

pub mod buffer;
pub mod config;
pub mod face;
pub mod fib;
pub mod name;
pub mod nnpt;
pub mod pdu;
pub mod strategy;
pub mod tlv;
pub mod trie;

pub use buffer::{BufferError, PduBuffer, PduQueue};
pub use config::{ConfigError, ForwarderConfig};
pub use face::FaceId;
pub use fib::{Fib, FibEntry, FibError, FibObserver, NextHop, NextHopStatus};
pub use name::{Name, NameParseError, SharedName};
pub use nnpt::{LeaseEntry, LeaseError, LeaseObserver, Nnpt};
pub use pdu::{Pdu, PduError, PduKind};
pub use strategy::{BestRoute, Context, Forwarder, ForwardingStrategy, TracePoint, Tracer};
pub use tlv::TlvError;
pub use trie::{
    CountingPolicy, Inserted, LruPolicy, NodeId, PolicyKind, Trie, TrieError, TriePolicy,
};
