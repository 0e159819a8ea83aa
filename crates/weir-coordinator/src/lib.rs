//! # Weir Coordinator
//!
//! Leader election among dynamic participants, built on a hierarchical
//! coordination service with ephemeral sequential nodes.
//!
//! Each participant registers one ephemeral sequential node under a shared
//! processors path. The node with the lowest sequence leads; every other
//! participant watches only its immediate predecessor, so a departure wakes
//! a single peer instead of the whole group. The race in which a predecessor
//! vanishes between lookup and subscription is handled with a jittered
//! re-election pass.
//!
//! The coordination-service client stays behind the [`service`] seam;
//! [`testing`] provides an in-memory implementation with watch delivery.

pub mod elector;
pub mod error;
pub mod registry;
pub mod service;
pub mod testing;

pub use elector::LeaderElector;
pub use error::{CoordinatorError, Result};
pub use registry::ParticipantRegistry;
pub use service::{sequence_of, sort_participants, CoordinationService, DataListener};
pub use testing::InMemoryCoordinationService;
