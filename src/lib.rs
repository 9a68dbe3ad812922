//! issue-dedup library crate
//!
//! Flags likely-duplicate issues and pull requests by TF-IDF similarity and
//! labels, comments on, or closes them through a remote item gateway.

pub mod comment;
pub mod config;
pub mod detector;
pub mod gateway;
pub mod github;
pub mod item;
pub mod normalize;
pub mod policy;
pub mod similarity;
pub mod util;

pub use config::DetectorConfig;
pub use detector::{Detector, Query, RunReport};
pub use gateway::{GatewayError, ItemGateway};
pub use item::{Item, ItemKind, ItemState, SimilarityResult};
pub use policy::Action;
