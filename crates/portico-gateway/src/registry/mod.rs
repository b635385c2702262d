//! Addressing fabric: connected sockets, registered nodes, broadcast groups,
//! and session subscriptions.

mod connections;
mod groups;
mod nodes;
mod subscriptions;

pub use connections::ConnectionRegistry;
pub use groups::GroupRegistry;
pub use nodes::{NodeInfo, NodeRegistry, RATE_LIMIT_MAX, RATE_LIMIT_WINDOW};
pub use subscriptions::SubscriptionIndex;
