use bitflags::bitflags;
use std::time::SystemTime;

/// Version tag carried by the `Header` packet for consumers that care about
/// feed compatibility.
pub const FEED_VERSION: i32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelKind {
    Logic,
    Analog,
}

/// A named signal, created during decoder header parse and owned by the
/// session for its duration. Decoders, feeds and the trigger engine refer
/// to channels by their dense 0-based `index`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Channel {
    pub index: usize,
    pub kind: ChannelKind,
    pub enabled: bool,
    pub name: String,
}

impl Channel {
    pub fn logic(index: usize, name: impl Into<String>) -> Self {
        Channel {
            index,
            kind: ChannelKind::Logic,
            enabled: true,
            name: name.into(),
        }
    }

    pub fn analog(index: usize, name: impl Into<String>) -> Self {
        Channel {
            index,
            kind: ChannelKind::Analog,
            enabled: true,
            name: name.into(),
        }
    }
}

/// An ordered set of channels sharing a semantic unit, e.g. the bits of a
/// bus. Display-only; has no effect on the packet feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelGroup {
    pub name: String,
    pub channels: Vec<usize>,
}

/// One packet of the session feed delivered to the consumer callback.
#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    Header(Header),
    Meta(Meta),
    Logic(Logic),
    Analog(Analog),
    Trigger,
    FrameBegin,
    FrameEnd,
    End,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub feed_version: i32,
    pub start_time: SystemTime,
}

impl Header {
    pub fn new() -> Self {
        Header {
            feed_version: FEED_VERSION,
            start_time: SystemTime::now(),
        }
    }
}

impl Default for Header {
    fn default() -> Self {
        Self::new()
    }
}

/// Session metadata, sent after the header and before any data packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Meta {
    /// Sample rate of the logic feed in Hz.
    Samplerate(u64),
    /// Number of channels the decoder exposes.
    NumChannels(u32),
}

/// A run of packed logic samples.
///
/// `data` is a concatenation of sample units of `unit_size` bytes each; bit
/// `i` of a unit is the state of the logic channel with index `i`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Logic {
    pub unit_size: usize,
    pub data: Vec<u8>,
}

impl Logic {
    pub fn num_units(&self) -> usize {
        self.data.len() / self.unit_size
    }
}

/// A run of analog samples for one or more channels, interleaved by sample
/// then by channel: `values.len() == num_samples * channels.len()`.
#[derive(Debug, Clone, PartialEq)]
pub struct Analog {
    pub channels: Vec<usize>,
    pub values: Vec<f32>,
    pub quantity: Quantity,
    pub unit: Unit,
    pub flags: MqFlags,
    pub num_samples: usize,
    /// Significant decimal digits of the source reading, negative when the
    /// trailing digits before the point are not significant.
    pub digits: i8,
}

/// The measured quantity of an analog value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quantity {
    /// The source format does not convey what was measured.
    Unknown,
    Voltage,
    Current,
    Resistance,
    Conductance,
    Capacitance,
    Frequency,
    DutyCycle,
    Continuity,
    Temperature,
    Gain,
    Power,
    SoundPressureLevel,
}

/// The unit an analog value is expressed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unit {
    Volt,
    Ampere,
    Ohm,
    Siemens,
    Farad,
    Hertz,
    Percentage,
    Celsius,
    Fahrenheit,
    DecibelMw,
    DecibelVolt,
    DecibelSpl,
    /// 0.0 or 1.0, e.g. a continuity verdict.
    Boolean,
    Unitless,
}

bitflags! {
    /// Qualifier flags attached to an analog reading.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct MqFlags: u32 {
        const AC = 1 << 0;
        const DC = 1 << 1;
        const RMS = 1 << 2;
        const DIODE = 1 << 3;
        const HOLD = 1 << 4;
        const MAX = 1 << 5;
        const MIN = 1 << 6;
        const AUTORANGE = 1 << 7;
        const RELATIVE = 1 << 8;
        const AVG = 1 << 9;
        const SPL_FREQ_WEIGHT_A = 1 << 10;
        const SPL_FREQ_WEIGHT_C = 1 << 11;
        const SPL_FREQ_WEIGHT_Z = 1 << 12;
        const SPL_FREQ_WEIGHT_FLAT = 1 << 13;
        const SPL_TIME_WEIGHT_S = 1 << 14;
        const SPL_TIME_WEIGHT_F = 1 << 15;
    }
}
