//! Message-broker consumer backends for the stream source adapter.
//!
//! The stream adapter is generic over [`BrokerConsumer`]; redelivery of
//! unacknowledged messages is the broker's contract, not engine logic.

pub mod consumer;
pub mod error;
pub mod memory;
pub mod sqs;

pub use consumer::{BrokerConsumer, BrokerHealth, BrokerMessage};
pub use error::BrokerError;
pub use memory::InMemoryBroker;
pub use sqs::{SqsBroker, SqsBrokerConfig};
