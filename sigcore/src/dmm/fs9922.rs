//! Fortune Semiconductor FS9922-DMM3/DMM4 protocol.
//!
//! 14-byte ASCII-oriented packet:
//!
//! - byte 0: sign, `+` or `-`
//! - bytes 1-4: four value digits `0`..`9`, or the over-limit sentinel
//!   `?0:?`
//! - byte 5: space
//! - byte 6: decimal point position: `0` none, `1` /1000, `2` /100, `4` /10
//! - byte 7: bit 7 auto, bit 6 DC, bit 5 AC, bit 4 relative, bit 3 hold,
//!   bit 2 bargraph shown
//! - byte 8: bit 7 max, bit 6 min, bit 5 auto-poweroff, bit 4 battery low,
//!   bit 3 nano, bit 1 micro, bit 0 milli
//! - byte 9: bit 7 kilo, bit 6 mega, bit 5 buzzer, bit 4 diode test,
//!   bit 3 percent, bit 1 volt, bit 0 ampere
//! - byte 10: bit 7 ohm, bit 6 hertz, bit 5 farad, bit 4 celsius,
//!   bit 3 fahrenheit
//! - byte 11: bargraph value, not interpreted here
//! - bytes 12-13: `\r\n`

use super::{single_prefix, DmmProtocol, Prefix, Reading};
use crate::error::{Error, Result};
use crate::protocol::{MqFlags, Quantity, Unit};

pub struct Fs9922;

const OVER_LIMIT: &[u8; 4] = b"?0:?";

struct Flags {
    auto: bool,
    dc: bool,
    ac: bool,
    rel: bool,
    hold: bool,
    max: bool,
    min: bool,
    beep: bool,
    diode: bool,
    percent: bool,
    volt: bool,
    ampere: bool,
    ohm: bool,
    hz: bool,
    farad: bool,
    celsius: bool,
    fahrenheit: bool,
    prefix: Option<Prefix>,
}

impl Flags {
    fn read(buf: &[u8]) -> Flags {
        let bit = |byte: usize, n: u8| buf[byte] & (1 << n) != 0;
        Flags {
            auto: bit(7, 7),
            dc: bit(7, 6),
            ac: bit(7, 5),
            rel: bit(7, 4),
            hold: bit(7, 3),
            max: bit(8, 7),
            min: bit(8, 6),
            beep: bit(9, 5),
            diode: bit(9, 4),
            percent: bit(9, 3),
            volt: bit(9, 1),
            ampere: bit(9, 0),
            ohm: bit(10, 7),
            hz: bit(10, 6),
            farad: bit(10, 5),
            celsius: bit(10, 4),
            fahrenheit: bit(10, 3),
            prefix: single_prefix(&[
                (bit(8, 3), Prefix::Nano),
                (bit(8, 1), Prefix::Micro),
                (bit(8, 0), Prefix::Milli),
                (bit(9, 7), Prefix::Kilo),
                (bit(9, 6), Prefix::Mega),
            ]),
        }
    }

    fn mode_count(&self) -> usize {
        [
            self.volt,
            self.ampere,
            self.ohm,
            self.hz,
            self.farad,
            self.celsius,
            self.fahrenheit,
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
        if self.diode && !self.volt {
            return false;
        }
        self.mode_count() == 1
    }
}

fn frame_valid(buf: &[u8]) -> bool {
    buf.len() == Fs9922::PACKET_SIZE
        && (buf[0] == b'+' || buf[0] == b'-')
        && (buf[1..5] == *OVER_LIMIT || buf[1..5].iter().all(u8::is_ascii_digit))
        && matches!(buf[6], b'0' | b'1' | b'2' | b'4')
        && buf[12] == b'\r'
        && buf[13] == b'\n'
}

fn parse_value(buf: &[u8]) -> (f32, i8) {
    if buf[1..5] == *OVER_LIMIT {
        return (f32::INFINITY, 0);
    }
    let mut intval: i32 = 0;
    for b in &buf[1..5] {
        intval = intval * 10 + (b - b'0') as i32;
    }
    if buf[0] == b'-' {
        intval = -intval;
    }
    let decimals = match buf[6] {
        b'1' => 3,
        b'2' => 2,
        b'4' => 1,
        _ => 0,
    };
    (intval as f32 / 10f32.powi(decimals as i32), decimals)
}

impl DmmProtocol for Fs9922 {
    const PACKET_SIZE: usize = 14;

    fn packet_valid(buf: &[u8]) -> bool {
        frame_valid(buf) && Flags::read(buf).consistent()
    }

    fn parse(buf: &[u8]) -> Result<Reading> {
        if !frame_valid(buf) {
            return Err(Error::data("fs9922 framing bytes invalid"));
        }
        let flags = Flags::read(buf);
        if !flags.consistent() {
            return Err(Error::data("fs9922 packet sets conflicting flags"));
        }
        let prefix = flags.prefix.unwrap();
        let (raw, decimals) = parse_value(buf);

        let (quantity, unit) = if flags.volt {
            (Quantity::Voltage, Unit::Volt)
        } else if flags.ampere {
            (Quantity::Current, Unit::Ampere)
        } else if flags.ohm {
            (Quantity::Resistance, Unit::Ohm)
        } else if flags.hz {
            (Quantity::Frequency, Unit::Hertz)
        } else if flags.farad {
            (Quantity::Capacitance, Unit::Farad)
        } else if flags.celsius {
            (Quantity::Temperature, Unit::Celsius)
        } else if flags.fahrenheit {
            (Quantity::Temperature, Unit::Fahrenheit)
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
            // This chipset reports the open loop as an over-limit reading.
            value = if value.is_infinite() { 0.0 } else { 1.0 };
        }

        let mut mqflags = MqFlags::empty();
        mqflags.set(MqFlags::AC, flags.ac);
        mqflags.set(MqFlags::DC, flags.dc);
        mqflags.set(MqFlags::AUTORANGE, flags.auto);
        mqflags.set(MqFlags::RELATIVE, flags.rel);
        mqflags.set(MqFlags::HOLD, flags.hold);
        mqflags.set(MqFlags::MAX, flags.max);
        mqflags.set(MqFlags::MIN, flags.min);
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

#[cfg(test)]
mod tests {
    use super::*;

    fn packet(value: &[u8; 5], dp: u8, b7: u8, b8: u8, b9: u8, b10: u8) -> [u8; 14] {
        let mut buf = [0u8; 14];
        buf[0..5].copy_from_slice(value);
        buf[5] = b' ';
        buf[6] = dp;
        buf[7] = b7;
        buf[8] = b8;
        buf[9] = b9;
        buf[10] = b10;
        buf[11] = 0;
        buf[12] = b'\r';
        buf[13] = b'\n';
        buf
    }

    #[test]
    fn dc_volts() {
        let buf = packet(b"+1234", b'2', 0x40, 0, 0x02, 0);
        assert!(Fs9922::packet_valid(&buf));
        let r = Fs9922::parse(&buf).unwrap();
        assert_eq!(r.value, 12.34);
        assert_eq!(r.quantity, Quantity::Voltage);
        assert_eq!(r.unit, Unit::Volt);
        assert_eq!(r.flags, MqFlags::DC);
    }

    #[test]
    fn over_limit_volts() {
        let buf = packet(b"+?0:?", b'0', 0x40, 0, 0x02, 0);
        assert!(Fs9922::packet_valid(&buf));
        let r = Fs9922::parse(&buf).unwrap();
        assert!(r.value.is_infinite() && r.value > 0.0);
        assert_eq!(r.quantity, Quantity::Voltage);
        assert_eq!(r.unit, Unit::Volt);
        assert_eq!(r.flags, MqFlags::DC);
    }

    #[test]
    fn negative_kilo_ohms() {
        let buf = packet(b"-5678", b'1', 0x80, 0, 0x80, 0x80);
        let r = Fs9922::parse(&buf).unwrap();
        assert!((r.value - (-5678.0)).abs() < 0.5);
        assert_eq!(r.quantity, Quantity::Resistance);
        assert!(r.flags.contains(MqFlags::AUTORANGE));
        assert_eq!(r.digits, 0);
    }

    #[test]
    fn continuity_open_is_over_limit() {
        // The divergence from fs9721: open loop arrives as the over-limit
        // sentinel, not as a negative reading.
        let buf = packet(b"+?0:?", b'0', 0, 0, 0x20, 0);
        let r = Fs9922::parse(&buf).unwrap();
        assert_eq!(r.quantity, Quantity::Continuity);
        assert_eq!(r.value, 0.0);

        let buf = packet(b"+0012", b'0', 0, 0, 0x20, 0);
        let r = Fs9922::parse(&buf).unwrap();
        assert_eq!(r.value, 1.0);
    }

    #[test]
    fn missing_crlf_rejected() {
        let mut buf = packet(b"+1234", b'2', 0x40, 0, 0x02, 0);
        buf[13] = b' ';
        assert!(!Fs9922::packet_valid(&buf));
    }

    #[test]
    fn bad_sign_rejected() {
        let buf = packet(b"01234", b'2', 0x40, 0, 0x02, 0);
        assert!(!Fs9922::packet_valid(&buf));
    }

    #[test]
    fn every_multi_prefix_subset_invalid() {
        // (byte, bit) of nano, micro, milli, kilo, mega
        let prefixes = [(8usize, 3u8), (8, 1), (8, 0), (9, 7), (9, 6)];
        for i in 0..prefixes.len() {
            for j in (i + 1)..prefixes.len() {
                let mut buf = packet(b"+1234", b'2', 0x40, 0, 0x02, 0);
                buf[prefixes[i].0] |= 1 << prefixes[i].1;
                buf[prefixes[j].0] |= 1 << prefixes[j].1;
                assert!(!Fs9922::packet_valid(&buf), "prefix pair {i}/{j}");
            }
        }
        // a three-element subset
        let buf = packet(b"+1234", b'2', 0x40, 0x0b, 0x02, 0);
        assert!(!Fs9922::packet_valid(&buf));
    }

    #[test]
    fn ac_dc_conflict_rejected() {
        let buf = packet(b"+1234", b'2', 0x60, 0, 0x02, 0);
        assert!(!Fs9922::packet_valid(&buf));
    }

    #[test]
    fn diode_requires_volt() {
        let buf = packet(b"+0655", b'1', 0x40, 0, 0x12, 0);
        let r = Fs9922::parse(&buf).unwrap();
        assert!(r.flags.contains(MqFlags::DIODE));
        assert_eq!(r.quantity, Quantity::Voltage);

        let buf = packet(b"+0655", b'1', 0x40, 0, 0x10, 0);
        assert!(!Fs9922::packet_valid(&buf));
    }
}
