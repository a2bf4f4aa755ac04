use crate::error::{Error, Result};
use crate::protocol::{Analog, Logic, MqFlags, Packet, Quantity, Unit};

/// Destination for decoded packets.
///
/// Implemented by the session coordinator. Decoders and feeds borrow the
/// sink per call rather than holding a reference to the session, so there
/// is never a decoder-to-session cycle.
pub trait Sink {
    fn send(&mut self, packet: Packet) -> Result<()>;
}

/// Buffered packets are emitted once they reach roughly this many bytes.
pub const CHUNK_SIZE: usize = 4 * 1024 * 1024;

/// Accumulates packed logic sample units and emits them as `Logic` packets.
///
/// Submissions are order-preserving and a repeat count is semantically
/// identical to that many individual submissions. Nothing is lost on
/// `flush`.
pub struct LogicFeed {
    unit_size: usize,
    limit_units: usize,
    buf: Vec<u8>,
}

impl LogicFeed {
    pub fn new(unit_size: usize) -> Result<Self> {
        Self::with_limit(unit_size, CHUNK_SIZE / unit_size.max(1))
    }

    /// A feed that emits after `limit_units` samples instead of the default
    /// chunk threshold.
    pub fn with_limit(unit_size: usize, limit_units: usize) -> Result<Self> {
        if unit_size == 0 {
            return Err(Error::Arg("logic feed unit size must be non-zero"));
        }
        Ok(LogicFeed {
            unit_size,
            limit_units: limit_units.max(1),
            buf: Vec::new(),
        })
    }

    pub fn unit_size(&self) -> usize {
        self.unit_size
    }

    /// Number of units buffered but not yet emitted.
    pub fn pending_units(&self) -> usize {
        self.buf.len() / self.unit_size
    }

    /// Append `repeat` copies of one sample unit.
    pub fn submit(&mut self, sink: &mut dyn Sink, unit: &[u8], repeat: u64) -> Result<()> {
        if unit.len() != self.unit_size {
            return Err(Error::Arg("submitted unit does not match feed unit size"));
        }
        for _ in 0..repeat {
            self.buf.extend_from_slice(unit);
            if self.pending_units() >= self.limit_units {
                self.flush(sink)?;
            }
        }
        Ok(())
    }

    /// Append a pre-packed run of consecutive units.
    pub fn submit_slice(&mut self, sink: &mut dyn Sink, data: &[u8]) -> Result<()> {
        if data.len() % self.unit_size != 0 {
            return Err(Error::Arg("submitted slice is not a whole number of units"));
        }
        let mut rest = data;
        while !rest.is_empty() {
            let space = (self.limit_units - self.pending_units()) * self.unit_size;
            let take = space.min(rest.len());
            self.buf.extend_from_slice(&rest[..take]);
            rest = &rest[take..];
            if self.pending_units() >= self.limit_units {
                self.flush(sink)?;
            }
        }
        Ok(())
    }

    /// Emit whatever is buffered, if anything.
    pub fn flush(&mut self, sink: &mut dyn Sink) -> Result<()> {
        if self.buf.is_empty() {
            return Ok(());
        }
        let data = std::mem::take(&mut self.buf);
        sink.send(Packet::Logic(Logic {
            unit_size: self.unit_size,
            data,
        }))
    }

    /// Emit a `Trigger` packet between two data packets. The preceding
    /// `Logic` packet ends at the most recently submitted unit.
    pub fn send_trigger(&mut self, sink: &mut dyn Sink) -> Result<()> {
        self.flush(sink)?;
        sink.send(Packet::Trigger)
    }
}

/// Accumulates values for a single analog channel and emits them as
/// `Analog` packets annotated with the channel's quantity, unit and flags.
pub struct AnalogFeed {
    channel: usize,
    quantity: Quantity,
    unit: Unit,
    flags: MqFlags,
    digits: i8,
    limit: usize,
    values: Vec<f32>,
}

impl AnalogFeed {
    pub fn new(channel: usize, quantity: Quantity, unit: Unit, flags: MqFlags, digits: i8) -> Self {
        AnalogFeed {
            channel,
            quantity,
            unit,
            flags,
            digits,
            limit: CHUNK_SIZE / std::mem::size_of::<f32>(),
            values: Vec::new(),
        }
    }

    pub fn channel(&self) -> usize {
        self.channel
    }

    pub fn submit(&mut self, sink: &mut dyn Sink, value: f32, repeat: u64) -> Result<()> {
        for _ in 0..repeat {
            self.values.push(value);
            if self.values.len() >= self.limit {
                self.flush(sink)?;
            }
        }
        Ok(())
    }

    pub fn flush(&mut self, sink: &mut dyn Sink) -> Result<()> {
        if self.values.is_empty() {
            return Ok(());
        }
        let values = std::mem::take(&mut self.values);
        let num_samples = values.len();
        sink.send(Packet::Analog(Analog {
            channels: vec![self.channel],
            values,
            quantity: self.quantity,
            unit: self.unit,
            flags: self.flags,
            num_samples,
            digits: self.digits,
        }))
    }
}
