//! Agent request path: routing, per-session scheduling, event fan-out, and
//! the seams to the external agent runtime and session store.

pub mod fanout;
pub mod invoker;
pub mod router;
pub mod scheduler;
pub mod store;

pub use fanout::{AgentErrorOpts, ClientFilter, EventFanout};
pub use invoker::{AgentEventStream, AgentInvoker, DevEchoInvoker, Invocation};
pub use router::AgentRouter;
pub use scheduler::{SchedulerStats, SessionScheduler};
pub use store::{MemorySessionStore, SessionPatch, SessionRecord, SessionStore};
