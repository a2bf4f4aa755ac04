//! Value Change Dump (IEEE 1364-2001) capture files.
//!
//! The decoder is fed arbitrary chunks of bytes and keeps partial tokens
//! between calls, so it can run off a pipe as well as a file. Declarations
//! build the channel list; the body is a token stream of timestamps and
//! value changes. `wire`/`reg` variables become one logic channel per bit,
//! `real` and `integer` variables become analog channels, `string`
//! variables are tracked but dropped.

use crate::FormatDecoder;
use log::{debug, info, warn};
use sigcore::error::{Error, Result};
use sigcore::feed::{AnalogFeed, LogicFeed, Sink};
use sigcore::protocol::{
    Channel, ChannelGroup, Header, Meta, MqFlags, Packet, Quantity, Unit,
};
use std::collections::HashMap;

/// Scope name our own VCD writer emits; seeing it means the file is
/// re-imported output, so the name adds nothing and is dropped.
const OWN_SCOPE: &str = "siglab";

const UTF8_BOM: [u8; 3] = [0xef, 0xbb, 0xbf];

#[derive(Debug, Clone)]
pub struct VcdOptions {
    /// Refuse to create more channels than this; 0 means unlimited.
    pub numchannels: u32,
    /// Divide all timestamps by this factor.
    pub downsample: u64,
    /// Negative: start at the first timestamp in the file. Zero: start at
    /// time zero. Positive: discard samples before this timestamp.
    pub skip: i64,
    /// When non-zero, idle periods longer than this many ticks are
    /// shortened to exactly this many.
    pub compress: u64,
}

impl Default for VcdOptions {
    fn default() -> Self {
        VcdOptions {
            numchannels: 0,
            downsample: 1,
            skip: -1,
            compress: 0,
        }
    }
}

enum SignalKind {
    /// Logic bit positions, least significant first.
    Logic { bits: Vec<usize> },
    Real { analog: usize },
    /// Bit-string values are accumulated into a 64-bit integer and emitted
    /// as a single float. Widths above 24 bits silently lose precision in
    /// the f32 conversion.
    Integer { analog: usize },
    /// Declared and remembered so its values do not read as unknown ids.
    StringVar,
    /// Rejected by the channel cap; later value changes are dropped.
    Rejected,
}

struct AnalogState {
    feed: AnalogFeed,
    value: f32,
}

enum PendingValue {
    Bit(u8),
    /// Bit values, index 0 = least significant (rightmost character).
    Vector(Vec<u8>),
    Real(f32),
    Str,
}

struct Section {
    keyword: String,
    tokens: Vec<String>,
    /// Sections we interpret keep their tokens; `$comment` and friends are
    /// skipped without buffering.
    keep: bool,
}

#[derive(Debug, Clone, Copy)]
enum SkipMode {
    FirstTimestamp,
    From(u64),
}

const MILESTONES: [(u64, u64); 4] = [
    (2_500, 1_000_000),
    (10_000, 10_000),
    (100_000, 1_000),
    (1_000_000, 100),
];

pub struct VcdDecoder {
    options: VcdOptions,
    buf: Vec<u8>,
    bom_checked: bool,

    section: Option<Section>,
    dump_depth: u32,
    in_body: bool,
    /// One entry per open `$scope`; `None` for our own writer's wrapper
    /// scope, which contributes nothing to channel names.
    scopes: Vec<Option<String>>,
    ids: HashMap<String, SignalKind>,
    channels: Vec<Channel>,
    groups: Vec<ChannelGroup>,
    logic_count: usize,
    samplerate: Option<u64>,
    cap_warned: bool,
    prev_channels: Option<Vec<Channel>>,

    image: Vec<u8>,
    feed: Option<LogicFeed>,
    analogs: Vec<AnalogState>,
    pending: Option<PendingValue>,
    skip: SkipMode,
    prev_ts: Option<u64>,

    ts_count: u64,
    min_delta: Option<u64>,
    milestone_logged: [bool; 4],
}

impl VcdDecoder {
    pub fn new(options: VcdOptions) -> Result<Self> {
        if options.downsample == 0 {
            return Err(Error::Arg("vcd downsample factor must be at least 1"));
        }
        let skip = if options.skip < 0 {
            SkipMode::FirstTimestamp
        } else {
            SkipMode::From(options.skip as u64 / options.downsample)
        };
        Ok(VcdDecoder {
            options,
            buf: Vec::new(),
            bom_checked: false,
            section: None,
            dump_depth: 0,
            in_body: false,
            scopes: Vec::new(),
            ids: HashMap::new(),
            channels: Vec::new(),
            groups: Vec::new(),
            logic_count: 0,
            samplerate: None,
            cap_warned: false,
            prev_channels: None,
            image: Vec::new(),
            feed: None,
            analogs: Vec::new(),
            pending: None,
            skip,
            prev_ts: None,
            ts_count: 0,
            min_delta: None,
            milestone_logged: [false; 4],
        })
    }

    fn process(&mut self, sink: &mut dyn Sink, final_chunk: bool) -> Result<()> {
        let bytes = std::mem::take(&mut self.buf);
        let mut pos = 0;
        loop {
            while pos < bytes.len() && bytes[pos].is_ascii_whitespace() {
                pos += 1;
            }
            if pos >= bytes.len() {
                break;
            }
            let start = pos;
            while pos < bytes.len() && !bytes[pos].is_ascii_whitespace() {
                pos += 1;
            }
            if pos == bytes.len() && !final_chunk {
                // token may continue in the next chunk
                pos = start;
                break;
            }
            let token = std::str::from_utf8(&bytes[start..pos])
                .map_err(|_| Error::data("vcd input is not valid text"))?;
            self.handle_token(sink, token)?;
        }
        self.buf = bytes[pos..].to_vec();
        Ok(())
    }

    fn handle_token(&mut self, sink: &mut dyn Sink, token: &str) -> Result<()> {
        if let Some(mut section) = self.section.take() {
            if token == "$end" {
                return self.handle_section(sink, section);
            }
            if section.keep {
                section.tokens.push(token.to_owned());
            }
            self.section = Some(section);
            return Ok(());
        }
        if let Some(keyword) = token.strip_prefix('$') {
            match keyword {
                "end" => {
                    if self.dump_depth > 0 {
                        self.dump_depth -= 1;
                    } else {
                        debug!("stray $end token");
                    }
                }
                // The contents of dump sections are ordinary value changes.
                "dumpvars" | "dumpon" | "dumpoff" if self.in_body => self.dump_depth += 1,
                "timescale" | "scope" | "upscope" | "var" | "enddefinitions"
                    if !self.in_body =>
                {
                    self.section = Some(Section {
                        keyword: keyword.to_owned(),
                        tokens: Vec::new(),
                        keep: true,
                    });
                }
                _ => {
                    self.section = Some(Section {
                        keyword: keyword.to_owned(),
                        tokens: Vec::new(),
                        keep: false,
                    });
                }
            }
            return Ok(());
        }
        if self.in_body {
            self.handle_value_token(sink, token)
        } else {
            debug!("ignoring token {token:?} before $enddefinitions");
            Ok(())
        }
    }

    fn handle_section(&mut self, sink: &mut dyn Sink, section: Section) -> Result<()> {
        match section.keyword.as_str() {
            "timescale" => self.parse_timescale(&section.tokens.concat()),
            "scope" => {
                // tokens are <type> <name>
                if let Some(name) = section.tokens.get(1).or_else(|| section.tokens.first()) {
                    // still push a placeholder for a skipped scope so the
                    // matching $upscope pops it and not an enclosing one
                    self.scopes.push(if name == OWN_SCOPE {
                        None
                    } else {
                        Some(name.clone())
                    });
                }
                Ok(())
            }
            "upscope" => {
                self.scopes.pop();
                Ok(())
            }
            "var" => self.parse_var(&section.tokens),
            "enddefinitions" => self.finish_declarations(sink),
            _ => Ok(()),
        }
    }

    fn parse_timescale(&mut self, text: &str) -> Result<()> {
        let digits: String = text.chars().take_while(char::is_ascii_digit).collect();
        let magnitude: u64 = digits
            .parse()
            .map_err(|_| Error::data(format!("vcd timescale {text:?} has no magnitude")))?;
        if !matches!(magnitude, 1 | 10 | 100) {
            return Err(Error::data(format!(
                "vcd timescale magnitude {magnitude} is not 1, 10 or 100"
            )));
        }
        let unit_hz: u64 = match text[digits.len()..].trim() {
            "s" => 1,
            "ms" => 1_000,
            "us" => 1_000_000,
            "ns" => 1_000_000_000,
            "ps" => 1_000_000_000_000,
            "fs" => 1_000_000_000_000_000,
            other => {
                return Err(Error::data(format!("vcd timescale unit {other:?} unknown")));
            }
        };
        if unit_hz % magnitude != 0 {
            warn!("vcd sample rate {unit_hz}/{magnitude} Hz is not integral, rounding");
        }
        self.samplerate = Some((unit_hz / magnitude).max(1));
        Ok(())
    }

    fn qualified(&self, name: &str) -> String {
        let prefix: Vec<&str> = self.scopes.iter().flatten().map(String::as_str).collect();
        if prefix.is_empty() {
            name.to_owned()
        } else {
            format!("{}.{}", prefix.join("."), name)
        }
    }

    fn parse_var(&mut self, tokens: &[String]) -> Result<()> {
        if tokens.len() < 4 {
            return Err(Error::data("vcd $var with missing fields"));
        }
        let var_type = tokens[0].as_str();
        let size: usize = tokens[1]
            .parse()
            .map_err(|_| Error::data(format!("vcd $var size {:?} invalid", tokens[1])))?;
        let id = tokens[2].clone();
        let mut name = tokens[3].clone();
        if let Some(index) = tokens.get(4) {
            if index.starts_with('[') {
                name.push_str(index);
            }
        }
        if self.ids.contains_key(&id) {
            debug!("vcd id {id:?} declared twice, keeping the first definition");
            return Ok(());
        }

        let width = size.max(1);
        let needed = match var_type {
            "wire" | "reg" => width,
            "real" | "integer" => 1,
            _ => 0,
        };
        let cap = self.options.numchannels as usize;
        if cap > 0 && needed > 0 && self.channels.len() + needed > cap {
            if !self.cap_warned {
                warn!("vcd channel limit of {cap} reached, ignoring further variables");
                self.cap_warned = true;
            }
            self.ids.insert(id, SignalKind::Rejected);
            return Ok(());
        }

        match var_type {
            "wire" | "reg" => {
                let (base, lower) = parse_bit_range(&name);
                let mut bits = Vec::with_capacity(width);
                let mut members = Vec::with_capacity(width);
                for i in 0..width {
                    let ch_name = if width == 1 {
                        self.qualified(&name)
                    } else if let Some(lower) = lower {
                        self.qualified(&format!("{base}[{}]", lower + i))
                    } else {
                        self.qualified(&format!("{name}.{i}"))
                    };
                    let index = self.channels.len();
                    self.channels.push(Channel::logic(index, ch_name));
                    members.push(index);
                    bits.push(self.logic_count);
                    self.logic_count += 1;
                }
                if width > 1 {
                    self.groups.push(ChannelGroup {
                        name: self.qualified(&base),
                        channels: members,
                    });
                }
                self.ids.insert(id, SignalKind::Logic { bits });
            }
            "real" | "integer" => {
                let index = self.channels.len();
                self.channels
                    .push(Channel::analog(index, self.qualified(&name)));
                let analog = self.analogs.len();
                self.analogs.push(AnalogState {
                    feed: AnalogFeed::new(
                        index,
                        Quantity::Unknown,
                        Unit::Unitless,
                        MqFlags::empty(),
                        6,
                    ),
                    value: 0.0,
                });
                let kind = if var_type == "real" {
                    SignalKind::Real { analog }
                } else {
                    SignalKind::Integer { analog }
                };
                self.ids.insert(id, kind);
            }
            "string" => {
                self.ids.insert(id, SignalKind::StringVar);
            }
            other => {
                warn!("vcd variable type {other:?} not supported, ignoring");
                self.ids.insert(id, SignalKind::Rejected);
            }
        }
        Ok(())
    }

    fn finish_declarations(&mut self, sink: &mut dyn Sink) -> Result<()> {
        if let Some(prev) = &self.prev_channels {
            if *prev != self.channels {
                return Err(Error::data(
                    "vcd channel list changed between reads of the same input",
                ));
            }
        }
        let unit_size = (self.logic_count + 7) / 8;
        self.image = vec![0u8; unit_size];
        if self.logic_count > 0 {
            self.feed = Some(LogicFeed::new(unit_size)?);
        }
        sink.send(Packet::Header(Header::new()))?;
        if let Some(rate) = self.samplerate {
            let effective = (rate / self.options.downsample).max(1);
            sink.send(Packet::Meta(Meta::Samplerate(effective)))?;
        }
        sink.send(Packet::Meta(Meta::NumChannels(self.channels.len() as u32)))?;
        self.in_body = true;
        Ok(())
    }

    fn handle_value_token(&mut self, sink: &mut dyn Sink, token: &str) -> Result<()> {
        if let Some(pending) = self.pending.take() {
            return self.apply_value(pending, token);
        }
        let mut chars = token.chars();
        let Some(first) = chars.next() else {
            return Ok(());
        };
        let rest = chars.as_str();
        match first {
            '#' => {
                let raw: u64 = rest
                    .parse()
                    .map_err(|_| Error::data(format!("vcd timestamp {token:?} invalid")))?;
                self.handle_timestamp(sink, raw)
            }
            'b' | 'B' => {
                let bits = parse_bit_chars(rest)?;
                self.pending = Some(PendingValue::Vector(bits));
                Ok(())
            }
            'r' | 'R' => {
                let value: f32 = rest
                    .parse()
                    .map_err(|_| Error::data(format!("vcd real value {token:?} invalid")))?;
                self.pending = Some(PendingValue::Real(value));
                Ok(())
            }
            's' | 'S' => {
                if !string_value_valid(rest) {
                    warn!("vcd string value {rest:?} contains invalid characters");
                }
                self.pending = Some(PendingValue::Str);
                Ok(())
            }
            '0' | '1' | 'x' | 'X' | 'z' | 'Z' | 'l' | 'L' | 'h' | 'H' | 'u' | 'U' | '-' => {
                let bit = bit_char_value(first);
                if rest.is_empty() {
                    self.pending = Some(PendingValue::Bit(bit));
                    Ok(())
                } else {
                    self.apply_value(PendingValue::Bit(bit), rest)
                }
            }
            _ => {
                warn!("vcd token {token:?} not understood, skipping");
                Ok(())
            }
        }
    }

    fn apply_value(&mut self, value: PendingValue, id: &str) -> Result<()> {
        let Some(kind) = self.ids.get(id) else {
            if matches!(value, PendingValue::Str) {
                return Err(Error::data(format!("vcd string value for unknown id {id:?}")));
            }
            warn!("vcd value change for unknown id {id:?}");
            return Ok(());
        };
        match kind {
            SignalKind::Rejected => Ok(()),
            SignalKind::StringVar => {
                if !matches!(value, PendingValue::Str) {
                    debug!("vcd non-string value for string variable {id:?}");
                }
                Ok(())
            }
            SignalKind::Logic { bits } => match value {
                PendingValue::Bit(v) => {
                    for &bit in bits {
                        set_image_bit(&mut self.image, bit, v);
                    }
                    Ok(())
                }
                PendingValue::Vector(values) => {
                    if values.len() > bits.len() {
                        return Err(Error::data(format!(
                            "vcd vector of {} bits for {}-bit variable {id:?}",
                            values.len(),
                            bits.len()
                        )));
                    }
                    // leading zeroes are trimmed by writers
                    for (k, &bit) in bits.iter().enumerate() {
                        let v = values.get(k).copied().unwrap_or(0);
                        set_image_bit(&mut self.image, bit, v);
                    }
                    Ok(())
                }
                _ => {
                    debug!("vcd value type mismatch for logic variable {id:?}");
                    Ok(())
                }
            },
            SignalKind::Real { analog } => {
                let analog = *analog;
                match value {
                    PendingValue::Real(v) => self.analogs[analog].value = v,
                    _ => debug!("vcd value type mismatch for real variable {id:?}"),
                }
                Ok(())
            }
            SignalKind::Integer { analog } => {
                let analog = *analog;
                match value {
                    PendingValue::Vector(values) => {
                        let mut acc: u64 = 0;
                        for (k, &v) in values.iter().enumerate().take(64) {
                            acc |= (v as u64) << k;
                        }
                        self.analogs[analog].value = acc as f32;
                    }
                    PendingValue::Bit(v) => self.analogs[analog].value = v as f32,
                    PendingValue::Real(v) => self.analogs[analog].value = v,
                    _ => debug!("vcd value type mismatch for integer variable {id:?}"),
                }
                Ok(())
            }
        }
    }

    fn handle_timestamp(&mut self, sink: &mut dyn Sink, raw: u64) -> Result<()> {
        let ts = raw / self.options.downsample;
        match self.prev_ts {
            None => {
                let start = match self.skip {
                    SkipMode::FirstTimestamp => ts,
                    SkipMode::From(s) => {
                        if ts < s {
                            return Ok(());
                        }
                        s
                    }
                };
                self.note_timestamp(raw);
                self.emit_span(sink, start, ts)
            }
            Some(prev) => {
                if ts < prev {
                    return Err(Error::data(format!(
                        "vcd timestamp {raw} goes backwards"
                    )));
                }
                if ts == prev {
                    return Ok(());
                }
                self.note_timestamp(raw);
                self.emit_span(sink, prev, ts)
            }
        }
    }

    /// Emit copies of the current sample image to cover `prev..ts`.
    fn emit_span(&mut self, sink: &mut dyn Sink, prev: u64, ts: u64) -> Result<()> {
        let mut delta = ts - prev;
        if delta > 0 {
            self.min_delta = Some(self.min_delta.map_or(delta, |m| m.min(delta)));
        }
        if self.options.compress > 0 && delta > self.options.compress {
            delta = self.options.compress;
        }
        if delta > 0 {
            if let Some(feed) = self.feed.as_mut() {
                feed.submit(sink, &self.image, delta)?;
            }
            for a in &mut self.analogs {
                a.feed.submit(sink, a.value, delta)?;
            }
        }
        self.prev_ts = Some(ts);
        Ok(())
    }

    fn note_timestamp(&mut self, raw_ts: u64) {
        self.ts_count += 1;
        for (i, (count, factor)) in MILESTONES.iter().enumerate() {
            if !self.milestone_logged[i]
                && self.ts_count == *count
                && raw_ts >= factor * self.options.downsample
            {
                self.milestone_logged[i] = true;
                info!(
                    "{count} timestamps in, the time counter is already at {raw_ts}; \
                     a larger downsample factor would reduce memory use"
                );
            }
        }
    }

    fn log_timestamp_stats(&self) {
        let Some(min) = self.min_delta else { return };
        if min >= 20 {
            let suggest = self.options.downsample * (min / 10 + 1);
            warn!(
                "smallest timestamp delta after downsampling is {min}; \
                 downsample {suggest} would shrink the stream considerably"
            );
        } else if min >= 10 {
            info!("smallest timestamp delta after downsampling is {min}; the input could be downsampled further");
        }
    }
}

fn set_image_bit(image: &mut [u8], bit: usize, value: u8) {
    if value == 0 {
        image[bit / 8] &= !(1 << (bit % 8));
    } else {
        image[bit / 8] |= 1 << (bit % 8);
    }
}

fn bit_char_value(c: char) -> u8 {
    match c {
        '1' | 'h' | 'H' => 1,
        '0' | 'l' | 'L' => 0,
        other => {
            debug!("vcd undefined bit state {other:?} mapped to 0");
            0
        }
    }
}

/// Bit characters of a vector value, returned least-significant first.
fn parse_bit_chars(text: &str) -> Result<Vec<u8>> {
    let mut bits = Vec::with_capacity(text.len());
    for c in text.chars().rev() {
        match c {
            '0' | '1' | 'x' | 'X' | 'z' | 'Z' | 'l' | 'L' | 'h' | 'H' | 'u' | 'U' | '-' => {
                bits.push(bit_char_value(c))
            }
            other => {
                return Err(Error::data(format!(
                    "vcd vector contains invalid bit character {other:?}"
                )));
            }
        }
    }
    Ok(bits)
}

/// Extract `name[upper:lower]`-style ranges; either bound may come first.
fn parse_bit_range(name: &str) -> (String, Option<usize>) {
    let Some(open) = name.find('[') else {
        return (name.to_owned(), None);
    };
    let base = name[..open].to_owned();
    let inner = name[open + 1..].trim_end_matches(']');
    let Some((a, b)) = inner.split_once(':') else {
        return (base, None);
    };
    match (a.trim().parse::<usize>(), b.trim().parse::<usize>()) {
        (Ok(a), Ok(b)) => (base, Some(a.min(b))),
        _ => (base, None),
    }
}

fn string_value_valid(value: &str) -> bool {
    let bytes = value.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => {
                let Some(&next) = bytes.get(i + 1) else {
                    return false;
                };
                match next {
                    b'n' | b't' | b'r' | b'\\' | b'"' | b'\'' => i += 2,
                    b'x' => {
                        if bytes.len() < i + 4
                            || !bytes[i + 2].is_ascii_hexdigit()
                            || !bytes[i + 3].is_ascii_hexdigit()
                        {
                            return false;
                        }
                        i += 4;
                    }
                    b'0'..=b'7' => {
                        let mut n = 1;
                        while n < 3 && matches!(bytes.get(i + 1 + n), Some(b'0'..=b'7')) {
                            n += 1;
                        }
                        i += 1 + n;
                    }
                    _ => return false,
                }
            }
            0x20..=0x7e => i += 1,
            _ => return false,
        }
    }
    true
}

impl FormatDecoder for VcdDecoder {
    fn receive(&mut self, sink: &mut dyn Sink, data: &[u8]) -> Result<()> {
        self.buf.extend_from_slice(data);
        if !self.bom_checked {
            if self.buf.len() < UTF8_BOM.len() {
                return Ok(());
            }
            if self.buf.starts_with(&UTF8_BOM) {
                self.buf.drain(..UTF8_BOM.len());
            }
            self.bom_checked = true;
        }
        self.process(sink, false)
    }

    fn end(&mut self, sink: &mut dyn Sink) -> Result<()> {
        self.bom_checked = true;
        self.process(sink, true)?;
        if self.section.is_some() {
            warn!("vcd input ends inside an unterminated section");
        }
        if !self.in_body {
            return Err(Error::data("vcd input ends before $enddefinitions"));
        }
        // the state at the final timestamp is one sample of its own
        if self.prev_ts.is_some() {
            if let Some(feed) = self.feed.as_mut() {
                feed.submit(sink, &self.image, 1)?;
            }
            for a in &mut self.analogs {
                a.feed.submit(sink, a.value, 1)?;
            }
        }
        if let Some(feed) = self.feed.as_mut() {
            feed.flush(sink)?;
        }
        for a in &mut self.analogs {
            a.feed.flush(sink)?;
        }
        self.log_timestamp_stats();
        sink.send(Packet::End)
    }

    fn reset(&mut self) -> Result<()> {
        let options = self.options.clone();
        let channels = std::mem::take(&mut self.channels);
        let prev = if channels.is_empty() {
            self.prev_channels.take()
        } else {
            Some(channels)
        };
        *self = VcdDecoder::new(options)?;
        self.prev_channels = prev;
        Ok(())
    }

    fn channels(&self) -> &[Channel] {
        if self.channels.is_empty() {
            self.prev_channels.as_deref().unwrap_or(&[])
        } else {
            &self.channels
        }
    }

    fn channel_groups(&self) -> &[ChannelGroup] {
        &self.groups
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sigcore::protocol::{Analog, ChannelKind};

    #[derive(Default)]
    struct RecordingSink {
        packets: Vec<Packet>,
    }

    impl Sink for RecordingSink {
        fn send(&mut self, packet: Packet) -> Result<()> {
            self.packets.push(packet);
            Ok(())
        }
    }

    impl RecordingSink {
        fn logic_bytes(&self) -> Vec<u8> {
            let mut out = Vec::new();
            for p in &self.packets {
                if let Packet::Logic(l) = p {
                    out.extend_from_slice(&l.data);
                }
            }
            out
        }

        fn analog_values(&self) -> Vec<f32> {
            let mut out = Vec::new();
            for p in &self.packets {
                if let Packet::Analog(Analog { values, .. }) = p {
                    out.extend_from_slice(values);
                }
            }
            out
        }

        fn samplerate(&self) -> Option<u64> {
            self.packets.iter().find_map(|p| match p {
                Packet::Meta(Meta::Samplerate(r)) => Some(*r),
                _ => None,
            })
        }
    }

    fn decode_with(options: VcdOptions, text: &str) -> (VcdDecoder, RecordingSink) {
        let mut dec = VcdDecoder::new(options).unwrap();
        let mut sink = RecordingSink::default();
        dec.receive(&mut sink, text.as_bytes()).unwrap();
        dec.end(&mut sink).unwrap();
        (dec, sink)
    }

    fn decode(text: &str) -> (VcdDecoder, RecordingSink) {
        decode_with(VcdOptions::default(), text)
    }

    const TWO_SIGNALS: &str = "$timescale 10 ns $end\n\
         $var wire 1 ! a $end\n\
         $var wire 1 \" b $end\n\
         $enddefinitions $end\n\
         #0 0! 0\" #5 1! #10 1\"\n";

    #[test]
    fn two_single_bit_signals() {
        let (dec, sink) = decode(TWO_SIGNALS);
        assert_eq!(sink.samplerate(), Some(100_000_000));
        assert_eq!(dec.channels().len(), 2);
        assert_eq!(dec.channels()[0].name, "a");
        assert_eq!(dec.channels()[1].name, "b");

        let mut expected = vec![0b00u8; 5];
        expected.extend(vec![0b01u8; 5]);
        expected.push(0b11);
        assert_eq!(sink.logic_bytes(), expected);
        assert_eq!(*sink.packets.last().unwrap(), Packet::End);
    }

    #[test]
    fn vector_variable_expands_per_bit() {
        let (dec, sink) = decode(
            "$timescale 1 us $end\n\
             $var wire 4 # bus [3:0] $end\n\
             $enddefinitions $end\n\
             #0 b0000 # #1 b1010 # #2 b1111 #\n",
        );
        let names: Vec<_> = dec.channels().iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, ["bus[0]", "bus[1]", "bus[2]", "bus[3]"]);
        assert_eq!(sink.logic_bytes(), vec![0b0000, 0b1010, 0b1111]);
        assert_eq!(dec.channel_groups().len(), 1);
        assert_eq!(dec.channel_groups()[0].channels, vec![0, 1, 2, 3]);
    }

    #[test]
    fn vector_with_reversed_range_and_offset() {
        let (dec, _) = decode(
            "$timescale 1 ns $end\n\
             $var wire 3 ! data [2:4] $end\n\
             $enddefinitions $end\n\
             #0\n",
        );
        let names: Vec<_> = dec.channels().iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, ["data[2]", "data[3]", "data[4]"]);
    }

    #[test]
    fn scope_prefixes_channel_names() {
        let (dec, _) = decode(
            "$timescale 1 ns $end\n\
             $scope module top $end\n\
             $scope module core $end\n\
             $var wire 1 ! clk $end\n\
             $upscope $end\n\
             $var wire 1 \" rst $end\n\
             $upscope $end\n\
             $enddefinitions $end\n\
             #0\n",
        );
        let names: Vec<_> = dec.channels().iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, ["top.core.clk", "top.rst"]);
    }

    #[test]
    fn own_writer_scope_is_skipped() {
        let (dec, _) = decode(
            "$timescale 1 ns $end\n\
             $scope module siglab $end\n\
             $var wire 1 ! clk $end\n\
             $upscope $end\n\
             $enddefinitions $end\n\
             #0\n",
        );
        assert_eq!(dec.channels()[0].name, "clk");
    }

    #[test]
    fn own_writer_scope_nested_in_real_scope() {
        // the $upscope closing the skipped scope must not pop "top"
        let (dec, _) = decode(
            "$timescale 1 ns $end\n\
             $scope module top $end\n\
             $scope module siglab $end\n\
             $var wire 1 ! a $end\n\
             $upscope $end\n\
             $var wire 1 \" b $end\n\
             $upscope $end\n\
             $enddefinitions $end\n\
             #0\n",
        );
        let names: Vec<_> = dec.channels().iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, ["top.a", "top.b"]);
    }

    #[test]
    fn downsample_scales_rate_and_time() {
        let mut options = VcdOptions::default();
        options.downsample = 10;
        let (_, sink) = decode_with(
            options,
            "$timescale 1 us $end\n\
             $var wire 1 ! a $end\n\
             $enddefinitions $end\n\
             #0 0! #100 1! #200 0!\n",
        );
        assert_eq!(sink.samplerate(), Some(100_000));
        // 10 zeroes, 10 ones, final zero
        let bytes = sink.logic_bytes();
        assert_eq!(bytes.len(), 21);
        assert_eq!(&bytes[0..10], &[0u8; 10]);
        assert_eq!(&bytes[10..20], &[1u8; 10]);
        assert_eq!(bytes[20], 0);
    }

    #[test]
    fn skip_negative_starts_at_first_timestamp() {
        let (_, sink) = decode(
            "$timescale 1 ns $end\n\
             $var wire 1 ! a $end\n\
             $enddefinitions $end\n\
             #100 1! #103 0!\n",
        );
        // emission starts at ts 100: three ones then the final zero
        assert_eq!(sink.logic_bytes(), vec![1, 1, 1, 0]);
    }

    #[test]
    fn skip_zero_pads_from_time_zero() {
        let mut options = VcdOptions::default();
        options.skip = 0;
        let (_, sink) = decode_with(
            options,
            "$timescale 1 ns $end\n\
             $var wire 1 ! a $end\n\
             $enddefinitions $end\n\
             #3 1! #5 0!\n",
        );
        // zeroes for 0..3, ones for 3..5, final zero
        assert_eq!(sink.logic_bytes(), vec![0, 0, 0, 1, 1, 0]);
    }

    #[test]
    fn skip_positive_discards_early_samples() {
        let mut options = VcdOptions::default();
        options.skip = 4;
        let (_, sink) = decode_with(
            options,
            "$timescale 1 ns $end\n\
             $var wire 1 ! a $end\n\
             $enddefinitions $end\n\
             #0 1! #2 0! #4 1! #6 0!\n",
        );
        // nothing before ts 4; ones for 4..6, final zero
        assert_eq!(sink.logic_bytes(), vec![1, 1, 0]);
    }

    #[test]
    fn compress_shortens_idle_periods() {
        let mut options = VcdOptions::default();
        options.compress = 3;
        let (_, sink) = decode_with(
            options,
            "$timescale 1 ns $end\n\
             $var wire 1 ! a $end\n\
             $enddefinitions $end\n\
             #0 0! #1000 1! #1002 0!\n",
        );
        // the 1000-tick idle gap collapses to 3 samples
        assert_eq!(sink.logic_bytes(), vec![0, 0, 0, 1, 1, 0]);
    }

    #[test]
    fn backwards_timestamp_is_fatal() {
        let mut dec = VcdDecoder::new(VcdOptions::default()).unwrap();
        let mut sink = RecordingSink::default();
        let text = "$timescale 1 ns $end\n\
                    $var wire 1 ! a $end\n\
                    $enddefinitions $end\n\
                    #10 1! #5 0!\n";
        let err = dec
            .receive(&mut sink, text.as_bytes())
            .and_then(|_| dec.end(&mut sink));
        assert!(matches!(err, Err(Error::Data(_))));
    }

    #[test]
    fn duplicate_timestamp_tolerated() {
        let (_, sink) = decode(
            "$timescale 1 ns $end\n\
             $var wire 1 ! a $end\n\
             $enddefinitions $end\n\
             #0 0! #3 #3 1! #4\n",
        );
        assert_eq!(sink.logic_bytes(), vec![0, 0, 0, 1, 1]);
    }

    #[test]
    fn undefined_states_map_to_zero() {
        let (_, sink) = decode(
            "$timescale 1 ns $end\n\
             $var wire 1 ! a $end\n\
             $enddefinitions $end\n\
             #0 x! #1 z! #2 1! #3\n",
        );
        assert_eq!(sink.logic_bytes(), vec![0, 0, 1, 1]);
    }

    #[test]
    fn real_values_become_analog_packets() {
        let (dec, sink) = decode(
            "$timescale 1 ms $end\n\
             $var real 64 ! temp $end\n\
             $enddefinitions $end\n\
             #0 r1.5 ! #2 r-0.25 ! #3\n",
        );
        assert_eq!(dec.channels()[0].kind, ChannelKind::Analog);
        assert_eq!(sink.analog_values(), vec![1.5, 1.5, -0.25, -0.25]);
        let Some(Packet::Analog(a)) = sink
            .packets
            .iter()
            .find(|p| matches!(p, Packet::Analog(_)))
        else {
            panic!()
        };
        assert_eq!(a.quantity, Quantity::Unknown);
        assert_eq!(a.values.len(), a.num_samples * a.channels.len());
    }

    #[test]
    fn integer_bit_strings_convert_to_floats() {
        let (_, sink) = decode(
            "$timescale 1 ms $end\n\
             $var integer 8 ! count $end\n\
             $enddefinitions $end\n\
             #0 b101 ! #1 b11111111 ! #2\n",
        );
        assert_eq!(sink.analog_values(), vec![5.0, 255.0, 255.0]);
    }

    #[test]
    fn string_values_are_dropped() {
        let (dec, sink) = decode(
            "$timescale 1 ns $end\n\
             $var wire 1 ! a $end\n\
             $var string 1 \" note $end\n\
             $enddefinitions $end\n\
             #0 0! sstarted \" #2 1! #3\n",
        );
        assert_eq!(dec.channels().len(), 1);
        assert_eq!(sink.logic_bytes(), vec![0, 0, 1, 1]);
    }

    #[test]
    fn string_for_unknown_id_is_an_error() {
        let mut dec = VcdDecoder::new(VcdOptions::default()).unwrap();
        let mut sink = RecordingSink::default();
        let text = "$timescale 1 ns $end\n\
                    $var wire 1 ! a $end\n\
                    $enddefinitions $end\n\
                    #0 shello ?\n";
        let res = dec.receive(&mut sink, text.as_bytes());
        assert!(matches!(res, Err(Error::Data(_))));
    }

    #[test]
    fn over_wide_vector_is_an_error() {
        let mut dec = VcdDecoder::new(VcdOptions::default()).unwrap();
        let mut sink = RecordingSink::default();
        let text = "$timescale 1 ns $end\n\
                    $var wire 2 ! bus $end\n\
                    $enddefinitions $end\n\
                    #0 b10101 !\n";
        let res = dec.receive(&mut sink, text.as_bytes());
        assert!(matches!(res, Err(Error::Data(_))));
    }

    #[test]
    fn channel_cap_rejects_and_silences() {
        let mut options = VcdOptions::default();
        options.numchannels = 1;
        let (dec, sink) = decode_with(
            options,
            "$timescale 1 ns $end\n\
             $var wire 1 ! a $end\n\
             $var wire 1 \" b $end\n\
             $enddefinitions $end\n\
             #0 0! 0\" #2 1\" #4 1! #5\n",
        );
        assert_eq!(dec.channels().len(), 1);
        // changes on the rejected id are ignored without complaint
        assert_eq!(sink.logic_bytes(), vec![0, 0, 0, 0, 1, 1]);
    }

    #[test]
    fn dump_sections_are_transparent() {
        let (_, sink) = decode(
            "$timescale 1 ns $end\n\
             $var wire 1 ! a $end\n\
             $enddefinitions $end\n\
             #0 $dumpvars 1! $end #2 0! #3\n",
        );
        assert_eq!(sink.logic_bytes(), vec![1, 1, 0, 0]);
    }

    #[test]
    fn unknown_sections_are_skipped() {
        let (_, sink) = decode(
            "$comment anything at all 0! $end\n\
             $timescale 1 ns $end\n\
             $var wire 1 ! a $end\n\
             $enddefinitions $end\n\
             #0 1! $comment 0! mid-body $end #2\n",
        );
        assert_eq!(sink.logic_bytes(), vec![1, 1, 1]);
    }

    #[test]
    fn bom_is_ignored() {
        let mut text = UTF8_BOM.to_vec();
        text.extend_from_slice(
            b"$timescale 1 ns $end\n\
              $var wire 1 ! a $end\n\
              $enddefinitions $end\n\
              #0 1! #1\n",
        );
        let mut dec = VcdDecoder::new(VcdOptions::default()).unwrap();
        let mut sink = RecordingSink::default();
        dec.receive(&mut sink, &text).unwrap();
        dec.end(&mut sink).unwrap();
        assert_eq!(sink.logic_bytes(), vec![1, 1]);
    }

    #[test]
    fn chunked_delivery_is_equivalent() {
        let (_, whole) = decode(TWO_SIGNALS);
        for chunk_size in [1, 2, 3, 7] {
            let mut dec = VcdDecoder::new(VcdOptions::default()).unwrap();
            let mut sink = RecordingSink::default();
            for chunk in TWO_SIGNALS.as_bytes().chunks(chunk_size) {
                dec.receive(&mut sink, chunk).unwrap();
            }
            dec.end(&mut sink).unwrap();
            assert_eq!(
                sink.logic_bytes(),
                whole.logic_bytes(),
                "chunk size {chunk_size}"
            );
        }
    }

    #[test]
    fn reread_preserves_channel_list() {
        let mut dec = VcdDecoder::new(VcdOptions::default()).unwrap();
        let mut sink = RecordingSink::default();
        dec.receive(&mut sink, TWO_SIGNALS.as_bytes()).unwrap();
        dec.end(&mut sink).unwrap();
        let channels = dec.channels().to_vec();

        dec.reset().unwrap();
        assert_eq!(dec.channels(), channels.as_slice());
        let mut sink2 = RecordingSink::default();
        dec.receive(&mut sink2, TWO_SIGNALS.as_bytes()).unwrap();
        dec.end(&mut sink2).unwrap();
        assert_eq!(dec.channels(), channels.as_slice());
        assert_eq!(sink.logic_bytes(), sink2.logic_bytes());
    }

    #[test]
    fn reread_with_different_channels_fails() {
        let mut dec = VcdDecoder::new(VcdOptions::default()).unwrap();
        let mut sink = RecordingSink::default();
        dec.receive(&mut sink, TWO_SIGNALS.as_bytes()).unwrap();
        dec.end(&mut sink).unwrap();

        dec.reset().unwrap();
        let mut sink2 = RecordingSink::default();
        let different = "$timescale 10 ns $end\n\
                         $var wire 1 ! other $end\n\
                         $enddefinitions $end\n\
                         #0 0!\n";
        let res = dec.receive(&mut sink2, different.as_bytes());
        assert!(matches!(res, Err(Error::Data(_))));
    }

    #[test]
    fn missing_enddefinitions_is_an_error() {
        let mut dec = VcdDecoder::new(VcdOptions::default()).unwrap();
        let mut sink = RecordingSink::default();
        dec.receive(&mut sink, b"$timescale 1 ns $end\n").unwrap();
        assert!(matches!(dec.end(&mut sink), Err(Error::Data(_))));
    }

    #[test]
    fn timescale_magnitude_validated() {
        let mut dec = VcdDecoder::new(VcdOptions::default()).unwrap();
        let mut sink = RecordingSink::default();
        let res = dec.receive(&mut sink, b"$timescale 25 ns $end ");
        assert!(matches!(res, Err(Error::Data(_))));
    }

    #[test]
    fn single_header_and_end() {
        let (_, sink) = decode(TWO_SIGNALS);
        let headers = sink
            .packets
            .iter()
            .filter(|p| matches!(p, Packet::Header(_)))
            .count();
        let ends = sink
            .packets
            .iter()
            .filter(|p| matches!(p, Packet::End))
            .count();
        assert_eq!((headers, ends), (1, 1));
        assert!(matches!(sink.packets[0], Packet::Header(_)));
    }

    #[test]
    fn string_validation() {
        assert!(string_value_valid("hello world"));
        assert!(string_value_valid("esc\\n and \\x41 and \\101"));
        assert!(!string_value_valid("bad\\q"));
        assert!(!string_value_valid("control\u{7f}"));
    }
}
