//! Portfolio allocation and forward risk assessment.
//!
//! Price histories come from a [`data::PriceSource`]. They feed the allocation
//! optimizers in [`optimizer`] and the simulation-based [`risk::RiskAggregator`].
//! Every number leaving the crate has passed through [`sanitize`].

pub mod config;
pub mod data;
pub mod error;
pub mod optimizer;
pub mod risk;
pub mod sanitize;
pub mod simulation;
pub mod stats;
pub mod suggest;
pub mod trend;

pub use error::{Result, RiskError};
