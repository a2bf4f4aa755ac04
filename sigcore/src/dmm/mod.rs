//! Decoders for the fixed-length packets spoken by common multimeter
//! chipsets. Each protocol module exposes `packet_valid` for cheap framing
//! checks and `parse` for the full conversion to a [`Reading`].

pub mod es51922;
pub mod fs9721;
pub mod fs9922;
pub mod metex14;

use crate::error::Result;
use crate::protocol::{MqFlags, Quantity, Unit};

/// One decoded multimeter display value.
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    pub value: f32,
    pub quantity: Quantity,
    pub unit: Unit,
    pub flags: MqFlags,
    /// Significant decimal digits shown by the meter, after prefix scaling.
    pub digits: i8,
}

/// A fixed-length packet protocol. `parse` may assume nothing beyond the
/// buffer length; it re-validates structure and reports `Data` errors so it
/// can be used without a prior `packet_valid` call.
pub trait DmmProtocol {
    const PACKET_SIZE: usize;

    fn packet_valid(buf: &[u8]) -> bool;
    fn parse(buf: &[u8]) -> Result<Reading>;
}

/// Runtime selection of a supported chipset, the only place where protocol
/// dispatch is dynamic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DmmKind {
    Fs9721,
    Fs9922,
    Metex14,
    Es51922,
}

impl DmmKind {
    pub const ALL: [DmmKind; 4] = [
        DmmKind::Fs9721,
        DmmKind::Fs9922,
        DmmKind::Metex14,
        DmmKind::Es51922,
    ];

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|k| k.name() == name)
    }

    pub fn name(&self) -> &'static str {
        match self {
            DmmKind::Fs9721 => "fs9721",
            DmmKind::Fs9922 => "fs9922",
            DmmKind::Metex14 => "metex14",
            DmmKind::Es51922 => "es51922",
        }
    }

    pub fn packet_size(&self) -> usize {
        match self {
            DmmKind::Fs9721 => fs9721::Fs9721::PACKET_SIZE,
            DmmKind::Fs9922 => fs9922::Fs9922::PACKET_SIZE,
            DmmKind::Metex14 => metex14::Metex14::PACKET_SIZE,
            DmmKind::Es51922 => es51922::Es51922::PACKET_SIZE,
        }
    }

    pub fn packet_valid(&self, buf: &[u8]) -> bool {
        match self {
            DmmKind::Fs9721 => fs9721::Fs9721::packet_valid(buf),
            DmmKind::Fs9922 => fs9922::Fs9922::packet_valid(buf),
            DmmKind::Metex14 => metex14::Metex14::packet_valid(buf),
            DmmKind::Es51922 => es51922::Es51922::packet_valid(buf),
        }
    }

    pub fn parse(&self, buf: &[u8]) -> Result<Reading> {
        match self {
            DmmKind::Fs9721 => fs9721::Fs9721::parse(buf),
            DmmKind::Fs9922 => fs9922::Fs9922::parse(buf),
            DmmKind::Metex14 => metex14::Metex14::parse(buf),
            DmmKind::Es51922 => es51922::Es51922::parse(buf),
        }
    }
}

/// SI prefix reported by a meter. Kept as an enum so conflicting prefix
/// bits are rejected structurally instead of by counting multiplications.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Prefix {
    Nano,
    Micro,
    Milli,
    None,
    Kilo,
    Mega,
}

impl Prefix {
    pub(crate) fn multiplier(self) -> f32 {
        match self {
            Prefix::Nano => 1e-9,
            Prefix::Micro => 1e-6,
            Prefix::Milli => 1e-3,
            Prefix::None => 1.0,
            Prefix::Kilo => 1e3,
            Prefix::Mega => 1e6,
        }
    }

    pub(crate) fn exponent(self) -> i8 {
        match self {
            Prefix::Nano => -9,
            Prefix::Micro => -6,
            Prefix::Milli => -3,
            Prefix::None => 0,
            Prefix::Kilo => 3,
            Prefix::Mega => 6,
        }
    }
}

/// Resolve at most one asserted prefix flag; `None` if several are set.
pub(crate) fn single_prefix(candidates: &[(bool, Prefix)]) -> Option<Prefix> {
    let mut found = Prefix::None;
    let mut count = 0;
    for &(set, prefix) in candidates {
        if set {
            found = prefix;
            count += 1;
        }
    }
    match count {
        0 => Some(Prefix::None),
        1 => Some(found),
        _ => None,
    }
}
