//! Metex 14-byte ASCII protocol, also spoken by many Voltcraft and Peaktech
//! bench meters.
//!
//! Fixed columns:
//!
//! - bytes 0-1: measurement mode, one of `DC`, `AC`, `OH`, `CA`, `TE`,
//!   `DI`, `FR`, `CO` (continuity buzzer), or two spaces
//! - bytes 2-8: display value: spaces, an optional sign, digits and at
//!   most one decimal point. The overload display reads `OL`, optionally
//!   with an embedded point (`O.L`, `OL.`, ...).
//! - bytes 9-12: unit field, space padded: an optional SI prefix character
//!   (`n`, `u`, `m`, `K`, `M`) followed by `V`, `A`, `Ohm`, `F`, `Hz`,
//!   `%` or `C`
//! - byte 13: `\r`

use super::{DmmProtocol, Prefix, Reading};
use crate::error::{Error, Result};
use crate::protocol::{MqFlags, Quantity, Unit};

pub struct Metex14;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Dc,
    Ac,
    Resistance,
    Capacitance,
    Temperature,
    Diode,
    Frequency,
    Continuity,
    Blank,
}

fn parse_mode(buf: &[u8]) -> Option<Mode> {
    Some(match std::str::from_utf8(&buf[0..2]).ok()? {
        "DC" => Mode::Dc,
        "AC" => Mode::Ac,
        "OH" => Mode::Resistance,
        "CA" => Mode::Capacitance,
        "TE" => Mode::Temperature,
        "DI" => Mode::Diode,
        "FR" => Mode::Frequency,
        "CO" => Mode::Continuity,
        "  " => Mode::Blank,
        _ => return None,
    })
}

/// Returns the numeric value plus its decimal places, or `+inf` for the
/// overload display.
fn parse_value(field: &[u8]) -> Option<(f32, i8)> {
    let stripped: Vec<u8> = field
        .iter()
        .copied()
        .filter(|b| *b != b' ' && *b != b'.')
        .collect();
    if stripped == b"OL" || stripped == b"-OL" || stripped == b"0L" {
        return Some((f32::INFINITY, 0));
    }

    let mut negative = false;
    let mut intval: i64 = 0;
    let mut decimals: i8 = 0;
    let mut seen_point = false;
    let mut seen_digit = false;
    for &b in field {
        match b {
            b' ' => continue,
            b'-' if !seen_digit && !negative => negative = true,
            b'.' if !seen_point => seen_point = true,
            b'0'..=b'9' => {
                intval = intval * 10 + (b - b'0') as i64;
                if seen_point {
                    decimals += 1;
                }
                seen_digit = true;
            }
            _ => return None,
        }
    }
    if !seen_digit {
        return None;
    }
    let mut value = intval as f32 / 10f32.powi(decimals as i32);
    if negative {
        value = -value;
    }
    Some((value, decimals))
}

fn parse_unit(field: &[u8]) -> Option<(Prefix, Quantity, Unit)> {
    let trimmed: Vec<u8> = field.iter().copied().filter(|b| *b != b' ').collect();
    let trimmed = std::str::from_utf8(&trimmed).ok()?;
    let (prefix, word) = match trimmed.chars().next()? {
        'n' => (Prefix::Nano, &trimmed[1..]),
        'u' => (Prefix::Micro, &trimmed[1..]),
        'm' => (Prefix::Milli, &trimmed[1..]),
        'K' => (Prefix::Kilo, &trimmed[1..]),
        'M' => (Prefix::Mega, &trimmed[1..]),
        _ => (Prefix::None, trimmed),
    };
    let (quantity, unit) = match word {
        "V" => (Quantity::Voltage, Unit::Volt),
        "A" => (Quantity::Current, Unit::Ampere),
        "Ohm" => (Quantity::Resistance, Unit::Ohm),
        "F" => (Quantity::Capacitance, Unit::Farad),
        "Hz" => (Quantity::Frequency, Unit::Hertz),
        "%" => (Quantity::DutyCycle, Unit::Percentage),
        "C" => (Quantity::Temperature, Unit::Celsius),
        _ => return None,
    };
    Some((prefix, quantity, unit))
}

fn mode_fits(mode: Mode, quantity: Quantity) -> bool {
    match mode {
        Mode::Dc | Mode::Ac => matches!(quantity, Quantity::Voltage | Quantity::Current),
        Mode::Diode => quantity == Quantity::Voltage,
        Mode::Resistance => quantity == Quantity::Resistance,
        Mode::Capacitance => quantity == Quantity::Capacitance,
        Mode::Temperature => quantity == Quantity::Temperature,
        Mode::Frequency => matches!(quantity, Quantity::Frequency | Quantity::DutyCycle),
        // the buzzer shows the loop resistance
        Mode::Continuity => quantity == Quantity::Resistance,
        Mode::Blank => true,
    }
}

impl DmmProtocol for Metex14 {
    const PACKET_SIZE: usize = 14;

    fn packet_valid(buf: &[u8]) -> bool {
        buf.len() == Self::PACKET_SIZE
            && buf[13] == b'\r'
            && parse_mode(buf).is_some_and(|mode| {
                parse_value(&buf[2..9]).is_some()
                    && parse_unit(&buf[9..13]).is_some_and(|(_, q, _)| mode_fits(mode, q))
            })
    }

    fn parse(buf: &[u8]) -> Result<Reading> {
        if buf.len() != Self::PACKET_SIZE || buf[13] != b'\r' {
            return Err(Error::data("metex14 framing invalid"));
        }
        let mode = parse_mode(buf).ok_or_else(|| {
            Error::data(format!(
                "metex14 unknown mode {:?}",
                String::from_utf8_lossy(&buf[0..2])
            ))
        })?;
        let (raw, decimals) =
            parse_value(&buf[2..9]).ok_or_else(|| Error::data("metex14 value field invalid"))?;
        let (prefix, quantity, unit) =
            parse_unit(&buf[9..13]).ok_or_else(|| Error::data("metex14 unit field invalid"))?;
        if !mode_fits(mode, quantity) {
            return Err(Error::data("metex14 mode does not match unit"));
        }

        let mut value = if raw.is_infinite() {
            raw
        } else {
            raw * prefix.multiplier()
        };
        let (quantity, unit) = if mode == Mode::Continuity {
            value = if value < 0.0 { 0.0 } else { 1.0 };
            (Quantity::Continuity, Unit::Boolean)
        } else {
            (quantity, unit)
        };

        let mut mqflags = MqFlags::empty();
        match mode {
            Mode::Dc => mqflags |= MqFlags::DC,
            Mode::Ac => mqflags |= MqFlags::AC,
            Mode::Diode => mqflags |= MqFlags::DIODE | MqFlags::DC,
            _ => {}
        }

        Ok(Reading {
            value,
            quantity,
            unit,
            flags: mqflags,
            digits: decimals - prefix.exponent(),
        })
    }
}
