pub mod builder;
pub mod candidates;
pub mod types;

pub use builder::{BridgeLink, GraphSnapshot, PoolRate, RoutingGraph};
pub use types::{EdgeData, NodeKey};
