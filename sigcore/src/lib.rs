pub mod dmm;
pub mod error;
pub mod feed;
pub mod protocol;
pub mod trigger;

pub use error::{Error, Result};
pub use feed::Sink;
pub use protocol::{Channel, ChannelGroup, ChannelKind, MqFlags, Packet, Quantity, Unit};
