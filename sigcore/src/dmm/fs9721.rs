//! Fortune Semiconductor FS9721_LP3/FS9721B protocol.
//!
//! 14-byte packet. Byte `k` carries the sequence number `k + 1` in its high
//! nibble and payload in the low nibble:
//!
//! - byte 0: bit 3 AC, bit 2 DC, bit 1 auto-range, bit 0 RS232 enabled
//! - bytes 1-8: four display digits as 7-segment codes, two bytes per
//!   digit. The first byte of a pair holds segments 6-4 in bits 2-0; its
//!   bit 3 is the sign for the first pair and "decimal point left of this
//!   digit" for the remaining pairs. The second byte holds segments 3-0.
//! - byte 9: bit 3 micro, bit 2 nano, bit 1 kilo, bit 0 diode test
//! - byte 10: bit 3 milli, bit 2 percent, bit 1 mega, bit 0 buzzer
//! - byte 11: bit 3 farad, bit 2 ohm, bit 1 relative, bit 0 hold
//! - byte 12: bit 3 ampere, bit 2 volt, bit 1 hertz, bit 0 battery low
//! - byte 13: vendor-specific user modes, not interpreted here
//!
//! The display "0L" (blank, 0, L, blank = segment codes 00 7d 68 00) is the
//! over-limit sentinel and decodes to `+inf`.

use super::{single_prefix, DmmProtocol, Prefix, Reading};
use crate::error::{Error, Result};
use crate::protocol::{MqFlags, Quantity, Unit};

pub struct Fs9721;

const OVER_LIMIT: [u8; 4] = [0x00, 0x7d, 0x68, 0x00];

struct Flags {
    ac: bool,
    dc: bool,
    auto: bool,
    diode: bool,
    beep: bool,
    percent: bool,
    farad: bool,
    ohm: bool,
    rel: bool,
    hold: bool,
    ampere: bool,
    volt: bool,
    hz: bool,
    prefix: Option<Prefix>,
}

impl Flags {
    fn read(buf: &[u8]) -> Flags {
        let bit = |byte: usize, n: u8| buf[byte] & (1 << n) != 0;
        Flags {
            ac: bit(0, 3),
            dc: bit(0, 2),
            auto: bit(0, 1),
            diode: bit(9, 0),
            beep: bit(10, 0),
            percent: bit(10, 2),
            farad: bit(11, 3),
            ohm: bit(11, 2),
            rel: bit(11, 1),
            hold: bit(11, 0),
            ampere: bit(12, 3),
            volt: bit(12, 2),
            hz: bit(12, 1),
            prefix: single_prefix(&[
                (bit(9, 2), Prefix::Nano),
                (bit(9, 3), Prefix::Micro),
                (bit(10, 3), Prefix::Milli),
                (bit(9, 1), Prefix::Kilo),
                (bit(10, 1), Prefix::Mega),
            ]),
        }
    }

    fn mode_count(&self) -> usize {
        [
            self.volt,
            self.ampere,
            self.ohm,
            self.farad,
            self.hz,
            self.percent,
            self.beep,
        ]
        .iter()
        .filter(|&&m| m)
        .count()
    }

    fn consistent(&self) -> bool {
        if self.prefix.is_none() {
            return false;
        }
        if self.ac && self.dc {
            return false;
        }
        // Diode test rides on the volt range; any other pairing is bogus.
        if self.diode && !self.volt {
            return false;
        }
        self.mode_count() == 1
    }
}

fn digit_from_segments(code: u8) -> Option<u32> {
    Some(match code {
        0x00 => 0, // blank leading digit
        0x7d => 0,
        0x05 => 1,
        0x5b => 2,
        0x1f => 3,
        0x27 => 4,
        0x3e => 5,
        0x7e => 6,
        0x15 => 7,
        0x7f => 8,
        0x3f => 9,
        _ => return None,
    })
}

fn sequence_valid(buf: &[u8]) -> bool {
    buf.len() == Fs9721::PACKET_SIZE
        && buf
            .iter()
            .enumerate()
            .all(|(i, b)| (b >> 4) == (i as u8) + 1)
}

fn parse_value(buf: &[u8]) -> Result<(f32, i8)> {
    let codes: Vec<u8> = (0..4)
        .map(|d| ((buf[1 + 2 * d] & 0x07) << 4) | (buf[2 + 2 * d] & 0x0f))
        .collect();
    if codes == OVER_LIMIT {
        return Ok((f32::INFINITY, 0));
    }
    let mut intval: u32 = 0;
    for &code in &codes {
        let digit = digit_from_segments(code)
            .ok_or_else(|| Error::data(format!("unknown 7-segment code {code:#04x}")))?;
        intval = intval * 10 + digit;
    }
    // bit 3 of the leading byte of digit pairs 2..4 places the point
    let decimals = if buf[3] & 0x08 != 0 {
        3
    } else if buf[5] & 0x08 != 0 {
        2
    } else if buf[7] & 0x08 != 0 {
        1
    } else {
        0
    };
    let mut value = intval as f32 / 10f32.powi(decimals as i32);
    if buf[1] & 0x08 != 0 {
        value = -value;
    }
    Ok((value, decimals))
}

impl DmmProtocol for Fs9721 {
    const PACKET_SIZE: usize = 14;

    fn packet_valid(buf: &[u8]) -> bool {
        sequence_valid(buf) && Flags::read(buf).consistent() && parse_value(buf).is_ok()
    }

    fn parse(buf: &[u8]) -> Result<Reading> {
        if !sequence_valid(buf) {
            return Err(Error::data("fs9721 sequence nibbles out of order"));
        }
        let flags = Flags::read(buf);
        if !flags.consistent() {
            return Err(Error::data("fs9721 packet sets conflicting flags"));
        }
        let prefix = flags.prefix.unwrap();
        let (raw, decimals) = parse_value(buf)?;

        let (quantity, unit) = if flags.volt {
            (Quantity::Voltage, Unit::Volt)
        } else if flags.ampere {
            (Quantity::Current, Unit::Ampere)
        } else if flags.ohm {
            (Quantity::Resistance, Unit::Ohm)
        } else if flags.farad {
            (Quantity::Capacitance, Unit::Farad)
        } else if flags.hz {
            (Quantity::Frequency, Unit::Hertz)
        } else if flags.percent {
            (Quantity::DutyCycle, Unit::Percentage)
        } else {
            (Quantity::Continuity, Unit::Boolean)
        };

        let mut value = if raw.is_infinite() {
            raw
        } else {
            raw * prefix.multiplier()
        };
        if quantity == Quantity::Continuity {
            value = if value < 0.0 { 0.0 } else { 1.0 };
        }

        let mut mqflags = MqFlags::empty();
        mqflags.set(MqFlags::AC, flags.ac);
        mqflags.set(MqFlags::DC, flags.dc);
        mqflags.set(MqFlags::AUTORANGE, flags.auto);
        mqflags.set(MqFlags::RELATIVE, flags.rel);
        mqflags.set(MqFlags::HOLD, flags.hold);
        mqflags.set(MqFlags::DIODE, flags.diode);

        Ok(Reading {
            value,
            quantity,
            unit,
            flags: mqflags,
            digits: decimals - prefix.exponent(),
        })
    }
}
