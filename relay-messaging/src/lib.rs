pub mod broker;
pub mod provider;
pub mod pubsub;
pub mod result_store;
pub mod router;

pub use broker::Broker;
pub use provider::{InMemoryProvider, MessagingProvider, PgmqProvider, Provider, QueuedMessage, ReceiptHandle};
pub use pubsub::{Bus, InMemoryBus, RedisBus};
pub use result_store::{InMemoryResultStore, RedisResultStore, ResultStore};
pub use router::{validate_queue_name, DefaultMessageRouter, MessageRouter};
