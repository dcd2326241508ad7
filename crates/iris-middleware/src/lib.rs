//! `iris-middleware` – result publication.
//!
//! Carries pipeline output to observers without caring what produced it.
//!
//! # Modules
//!
//! - [`publisher`] – [`ResultPublisher`]: latest-value slots for the current
//!   classification, performance metrics and the last captured photo, built
//!   on Tokio watch channels.  Observers read or await changes through a
//!   [`ResultSubscriber`].

pub mod publisher;

pub use publisher::{Observation, ResultPublisher, ResultSubscriber};
