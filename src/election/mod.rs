//! Host failover: presence-based election and the node that acts on it

pub mod machine;
pub mod node;
pub mod role;

pub use machine::{Election, ElectionAction};
pub use node::{ElectionNode, NodeHandle, NodeStatus};
pub use role::Role;
