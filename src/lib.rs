//! Distributed lock acquisition coordinator.
//!
//! Maps caller-supplied keys onto the cluster nodes that currently own their
//! primary replica, fans lock requests out to those nodes (or the local DHT
//! shortcut when this node owns a key), reconciles the authoritative values
//! they return into the local near-cache, and resolves a single atomic
//! outcome once every key is held or a fatal error occurs. See
//! [`lock_future::acquire`] for the entry point.

pub mod attempt;
pub mod config;
pub mod entry_enlister;
pub mod error;
pub mod external;
pub mod key_mapper;
pub mod lock_future;
pub mod messages;
pub mod metrics;
pub mod mini_future;
pub mod registry;
pub mod response_applier;
pub mod timeout;
pub mod types;

#[cfg(any(test, feature = "testing"))]
pub mod testkit;

pub use attempt::{Filter, LockAttempt};
pub use config::Config;
pub use error::{Error, ErrorInner, Result};
pub use lock_future::{acquire, LockAcquisition};
pub use registry::InMemoryRegistry;
pub use timeout::TokioTimeoutWheel;
pub use types::{CandidateOutcome, CandidateRequest, Isolation, Key, LockVersion, LockVersionAllocator, NodeId, ThreadId};
