//! Cache & pub/sub fabric: a TTL key/value store and a topic-based
//! publish/subscribe multiplexer layered over one backing transport.
//!
//! The fabric owns the transport connection lifecycle (including pub/sub
//! reconnect with backoff) and the degradation policy: every operation is
//! best-effort, and a transport failure surfaces to callers as a cache miss
//! or a dropped publish, never as an error. Cold cache is the normal case.
//!
//! ## Architecture
//!
//! ```text
//! Fabric (get/set/del, publish, subscribe)
//!   ├── Arc<dyn Transport>     kv commands + wire-level pub/sub
//!   ├── TopicTable             topic → ordered handler list (in-process)
//!   └── dispatch task          serializes inbound delivery per topic and
//!                              releases transport topics that emptied
//! ```
//!
//! A topic holds a transport-level subscription iff it has at least one
//! in-process handler; dropping the last [`Subscription`] tears it down.

mod error;
mod fabric;
mod memory;
mod pattern;
mod redis_transport;
mod topic;
mod transport;

pub use error::{FabricError, Result};
pub use fabric::{Fabric, Subscription};
pub use memory::MemoryTransport;
pub use pattern::glob_match;
pub use redis_transport::RedisTransport;
pub use topic::{Handler, TopicTable};
pub use transport::{Inbound, Transport};
