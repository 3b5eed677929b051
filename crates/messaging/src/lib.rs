//! Broker mechanics: messages, publish/subscribe contract, in-memory transport.
//!
//! Concrete broker transports (Redis Streams) live in `audsync-infra`.

pub mod bus;
pub mod in_memory_bus;
pub mod message;

pub use bus::{MessageBus, Subscription};
pub use in_memory_bus::{InMemoryBusError, InMemoryMessageBus};
pub use message::BrokerMessage;
