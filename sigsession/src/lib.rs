pub mod capture;
pub mod error;
pub mod session;
pub mod source;

pub use capture::{Capture, StopHandle};
pub use error::CaptureError;
pub use session::Session;
pub use source::{ByteSource, FileSource, MemorySource};

// Packet definitions needed by every consumer callback
pub use sigcore::protocol::{Analog, Channel, Logic, Meta, Packet};
