//! Shared types for the convoy orchestrator: typed resource descriptors,
//! object metadata and storage quantities.

pub mod kind;
pub mod meta;
pub mod quantity;
pub mod resources;

pub use kind::{Phase, ResourceKind};
pub use meta::{LabelSelector, ObjectMeta};
pub use quantity::{Quantity, QuantityError};
pub use resources::{Resource, ResourceKey, TypedResource};
