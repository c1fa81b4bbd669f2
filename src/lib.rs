//! Feature flag evaluation engine.
//!
//! Flags are described by a [FlagConfiguration] and evaluated for an [EvaluationContext] by a
//! [Pipeline] of [Evaluator]s. [FlagEvaluator] ties evaluation to a [FlagRepository] through a
//! two-tier configuration cache.

mod access;
mod attribute_value;
mod bucket;
mod cache;
mod client;
mod clock;
mod config;
mod context;
mod error;
mod eval;
mod flag;
mod flag_value;
mod mode;
mod provider;
mod rule;
mod schedule;
mod store;
mod util;
mod window;

pub use access::*;
pub use attribute_value::*;
pub use bucket::*;
pub use cache::*;
pub use client::*;
pub use clock::*;
pub use config::*;
pub use context::*;
pub use error::*;
pub use eval::*;
pub use flag::*;
pub use flag_value::*;
pub use mode::*;
pub use provider::*;
pub use rule::*;
pub use schedule::*;
pub use store::*;
pub use window::*;
