//! Change-only VCD writer, the mirror of [`crate::vcd`].
//!
//! The writer exists so captures can round-trip: parsing a file, writing it
//! back out and parsing the result again yields the same channel list and
//! sample sequence. Output opens a single `siglab` module scope, which the
//! reader recognises and skips.

use log::debug;
use sigcore::error::{Error, Result};
use sigcore::protocol::{Channel, ChannelKind, Logic, Packet};
use std::fmt::Write as _;

pub struct VcdWriter {
    names: Vec<String>,
    ids: Vec<String>,
    samplerate: Option<u64>,
    unit_size: usize,
    out: String,
    header_written: bool,
    last_unit: Option<Vec<u8>>,
    units_seen: u64,
    last_ts_written: Option<u64>,
}

impl VcdWriter {
    /// The writer covers the logic channels of `channels`; analog packets
    /// are not representable and get dropped with a note.
    pub fn new(channels: &[Channel], samplerate: Option<u64>) -> Self {
        let names: Vec<String> = channels
            .iter()
            .filter(|c| c.kind == ChannelKind::Logic)
            .map(|c| c.name.clone())
            .collect();
        let ids = (0..names.len()).map(identifier).collect();
        let unit_size = (names.len() + 7) / 8;
        VcdWriter {
            names,
            ids,
            samplerate,
            unit_size,
            out: String::new(),
            header_written: false,
            last_unit: None,
            units_seen: 0,
            last_ts_written: None,
        }
    }

    pub fn packet(&mut self, packet: &Packet) -> Result<()> {
        match packet {
            Packet::Logic(logic) => self.write_logic(logic),
            Packet::Analog(_) => {
                debug!("vcd writer drops analog packets");
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn write_header(&mut self) {
        if let Some((magnitude, unit)) = timescale_for(self.samplerate) {
            let _ = writeln!(self.out, "$timescale {magnitude} {unit} $end");
        }
        let _ = writeln!(self.out, "$scope module siglab $end");
        for (name, id) in self.names.iter().zip(&self.ids) {
            let _ = writeln!(self.out, "$var wire 1 {id} {name} $end");
        }
        let _ = writeln!(self.out, "$upscope $end");
        let _ = writeln!(self.out, "$enddefinitions $end");
        self.header_written = true;
    }

    fn write_logic(&mut self, logic: &Logic) -> Result<()> {
        if logic.unit_size != self.unit_size.max(1) {
            return Err(Error::Arg("logic packet does not match writer unit size"));
        }
        if !self.header_written {
            self.write_header();
        }
        for unit in logic.data.chunks(logic.unit_size) {
            let ts = self.units_seen;
            self.units_seen += 1;
            match &self.last_unit {
                // initial state of every channel, wrapped in $dumpvars
                None => {
                    if self.names.is_empty() {
                        continue;
                    }
                    let _ = writeln!(self.out, "#{ts}");
                    let _ = write!(self.out, "$dumpvars");
                    for bit in 0..self.names.len() {
                        let _ = write!(self.out, " {}{}", bit_of(unit, bit), self.ids[bit]);
                    }
                    let _ = writeln!(self.out, " $end");
                }
                Some(last) => {
                    let changed: Vec<usize> = (0..self.names.len())
                        .filter(|&bit| bit_of(unit, bit) != bit_of(last, bit))
                        .collect();
                    if changed.is_empty() {
                        continue;
                    }
                    let _ = write!(self.out, "#{ts}");
                    for bit in changed {
                        let _ = write!(self.out, " {}{}", bit_of(unit, bit), self.ids[bit]);
                    }
                    self.out.push('\n');
                }
            }
            self.last_unit = Some(unit.to_vec());
            self.last_ts_written = Some(ts);
        }
        Ok(())
    }

    /// Close the stream. A trailing bare timestamp pins the length of the
    /// final idle stretch so a re-read reproduces every sample.
    pub fn finish(mut self) -> String {
        if !self.header_written {
            self.write_header();
        }
        if self.units_seen > 0 {
            let last = self.units_seen - 1;
            if self.last_ts_written != Some(last) {
                let _ = writeln!(self.out, "#{last}");
            }
        }
        self.out
    }
}

fn bit_of(unit: &[u8], bit: usize) -> u8 {
    (unit[bit / 8] >> (bit % 8)) & 1
}

/// Short printable identifiers, `!` onwards, multi-character past 94.
fn identifier(mut n: usize) -> String {
    let mut id = String::new();
    loop {
        id.push((b'!' + (n % 94) as u8) as char);
        if n < 94 {
            break;
        }
        n = n / 94 - 1;
    }
    id
}

/// Find a `$timescale` magnitude and unit whose inverse is the sample rate.
fn timescale_for(samplerate: Option<u64>) -> Option<(u64, &'static str)> {
    let rate = samplerate?;
    for (unit_hz, unit) in [
        (1u64, "s"),
        (1_000, "ms"),
        (1_000_000, "us"),
        (1_000_000_000, "ns"),
        (1_000_000_000_000, "ps"),
        (1_000_000_000_000_000, "fs"),
    ] {
        if unit_hz % rate == 0 {
            let magnitude = unit_hz / rate;
            if matches!(magnitude, 1 | 10 | 100) {
                return Some((magnitude, unit));
            }
        }
    }
    debug!("sample rate {rate} not expressible as a vcd timescale, omitting");
    None
}
