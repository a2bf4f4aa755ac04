//! Cyrustek ES51922 protocol (UNI-T UT61E and friends).
//!
//! 14-byte packet:
//!
//! - byte 0: range, `0x30 | r` with `r` in 0..=7
//! - bytes 1-5: five display digits `0`..`9`; the magnitude 22580 is the
//!   over-limit display
//! - byte 6: function: `0x3B` voltage, `0x3D` µA, `0x3F` mA, `0x30` 22 A,
//!   `0x33` resistance, `0x35` continuity, `0x31` diode, `0x32`
//!   frequency/duty cycle, `0x36` capacitance, `0x34` temperature
//! - byte 7: status: bit 3 judge (duty cycle in frequency mode, °C in
//!   temperature mode), bit 2 negative sign, bit 1 battery low, bit 0
//!   over limit
//! - byte 8: bit 3 max, bit 2 min, bit 0 VAHZ
//! - byte 9: bit 3 under limit, bit 2 peak max, bit 1 peak min
//! - byte 10: bit 3 DC, bit 2 AC, bit 1 auto-range, bit 0 VBAR
//! - byte 11: bit 1 hold, bit 0 relative
//! - bytes 12-13: `\r\n`
//!
//! Unlike the other chipsets the scale factor is not flagged with prefix
//! bits: the range byte indexes a per-function exponent row. This meter
//! also genuinely asserts AC and DC together in its AC+DC coupling mode,
//! so that combination is preserved rather than rejected.

use super::{DmmProtocol, Reading};
use crate::error::{Error, Result};
use crate::protocol::{MqFlags, Quantity, Unit};

pub struct Es51922;

const OVER_LIMIT: u32 = 22580;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Function {
    Voltage,
    MicroAmp,
    MilliAmp,
    Amp,
    Resistance,
    Continuity,
    Diode,
    Frequency,
    Capacitance,
    Temperature,
}

impl Function {
    fn from_byte(b: u8) -> Option<Function> {
        Some(match b {
            0x3b => Function::Voltage,
            0x3d => Function::MicroAmp,
            0x3f => Function::MilliAmp,
            0x30 => Function::Amp,
            0x33 => Function::Resistance,
            0x35 => Function::Continuity,
            0x31 => Function::Diode,
            0x32 => Function::Frequency,
            0x36 => Function::Capacitance,
            0x34 => Function::Temperature,
            _ => return None,
        })
    }

    /// Row in the exponent table shared by related functions.
    fn row(self) -> usize {
        match self {
            Function::Voltage | Function::Diode => 0,
            Function::MicroAmp => 1,
            Function::MilliAmp => 2,
            Function::Amp => 3,
            Function::Resistance | Function::Continuity => 4,
            Function::Frequency => 5,
            Function::Capacitance => 6,
            Function::Temperature => 7,
        }
    }
}

/// Power-of-ten applied to the five-digit magnitude, per function row and
/// range. `None` marks range codes the meter never produces.
const EXPONENTS: [[Option<i8>; 8]; 8] = [
    // 2.2000 V .. 2200.0 V, then the 220.00 mV range
    [
        Some(-4),
        Some(-3),
        Some(-2),
        Some(-1),
        Some(-7),
        None,
        None,
        None,
    ],
    // 220.00 uA, 2200.0 uA
    [Some(-8), Some(-7), None, None, None, None, None, None],
    // 22.000 mA, 220.00 mA
    [Some(-6), Some(-5), None, None, None, None, None, None],
    // 22.000 A
    [Some(-3), None, None, None, None, None, None, None],
    // 220.00 Ohm .. 220.00 MOhm
    [
        Some(-2),
        Some(-1),
        Some(0),
        Some(1),
        Some(2),
        Some(3),
        Some(4),
        None,
    ],
    // 22.000 Hz .. 220.00 MHz
    [
        Some(-3),
        Some(-2),
        Some(-1),
        Some(0),
        Some(1),
        Some(2),
        Some(3),
        Some(4),
    ],
    // 22.000 nF .. 220.00 mF
    [
        Some(-12),
        Some(-11),
        Some(-10),
        Some(-9),
        Some(-8),
        Some(-7),
        Some(-6),
        Some(-5),
    ],
    // 2200.0 degrees
    [Some(-1), None, None, None, None, None, None, None],
];

const DUTY_CYCLE_EXPONENT: i8 = -1;

fn frame_valid(buf: &[u8]) -> bool {
    buf.len() == Es51922::PACKET_SIZE
        && (0x30..=0x37).contains(&buf[0])
        && buf[1..6].iter().all(u8::is_ascii_digit)
        && buf[7..12].iter().all(|b| b >> 4 == 0x3)
        && buf[12] == b'\r'
        && buf[13] == b'\n'
}

fn lookup_exponent(function: Function, range: usize) -> Option<i8> {
    EXPONENTS[function.row()][range]
}

impl DmmProtocol for Es51922 {
    const PACKET_SIZE: usize = 14;

    fn packet_valid(buf: &[u8]) -> bool {
        frame_valid(buf)
            && Function::from_byte(buf[6])
                .is_some_and(|f| lookup_exponent(f, (buf[0] & 0x07) as usize).is_some())
    }

    fn parse(buf: &[u8]) -> Result<Reading> {
        if !frame_valid(buf) {
            return Err(Error::data("es51922 framing bytes invalid"));
        }
        let function = Function::from_byte(buf[6])
            .ok_or_else(|| Error::data(format!("es51922 unknown function {:#04x}", buf[6])))?;
        let range = (buf[0] & 0x07) as usize;

        let bit = |byte: usize, n: u8| buf[byte] & (1 << n) != 0;
        let judge = bit(7, 3);
        let negative = bit(7, 2);
        let over_limit = bit(7, 0);

        let duty_cycle = function == Function::Frequency && judge;
        let exponent = if duty_cycle {
            DUTY_CYCLE_EXPONENT
        } else {
            lookup_exponent(function, range).ok_or_else(|| {
                Error::data(format!("es51922 range {range} invalid for {function:?}"))
            })?
        };

        let mut intval: u32 = 0;
        for b in &buf[1..6] {
            intval = intval * 10 + (b - b'0') as u32;
        }
        let mut value = if intval == OVER_LIMIT || over_limit {
            f32::INFINITY
        } else {
            let v = intval as f32 * 10f32.powi(exponent as i32);
            if negative {
                -v
            } else {
                v
            }
        };

        let (quantity, unit) = match function {
            Function::Voltage => (Quantity::Voltage, Unit::Volt),
            Function::MicroAmp | Function::MilliAmp | Function::Amp => {
                (Quantity::Current, Unit::Ampere)
            }
            Function::Resistance => (Quantity::Resistance, Unit::Ohm),
            Function::Continuity => (Quantity::Continuity, Unit::Boolean),
            Function::Diode => (Quantity::Voltage, Unit::Volt),
            Function::Frequency if duty_cycle => (Quantity::DutyCycle, Unit::Percentage),
            Function::Frequency => (Quantity::Frequency, Unit::Hertz),
            Function::Capacitance => (Quantity::Capacitance, Unit::Farad),
            Function::Temperature if judge => (Quantity::Temperature, Unit::Celsius),
            Function::Temperature => (Quantity::Temperature, Unit::Fahrenheit),
        };
        if quantity == Quantity::Continuity {
            value = if value < 0.0 { 0.0 } else { 1.0 };
        }

        let mut mqflags = MqFlags::empty();
        // AC and DC may legitimately both be set on this chipset.
        mqflags.set(MqFlags::DC, bit(10, 3));
        mqflags.set(MqFlags::AC, bit(10, 2));
        mqflags.set(MqFlags::AUTORANGE, bit(10, 1));
        mqflags.set(MqFlags::MAX, bit(8, 3));
        mqflags.set(MqFlags::MIN, bit(8, 2));
        mqflags.set(MqFlags::HOLD, bit(11, 1));
        mqflags.set(MqFlags::RELATIVE, bit(11, 0));
        if function == Function::Diode {
            mqflags |= MqFlags::DIODE | MqFlags::DC;
        }

        Ok(Reading {
            value,
            quantity,
            unit,
            flags: mqflags,
            digits: (-exponent).max(0),
        })
    }
}
