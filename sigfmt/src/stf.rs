//! Asix Sigma test files ("STF").
//!
//! Layout: a 16-byte magic, a CRLF-separated `key=value` header section
//! terminated by a NUL, then LZO1X-compressed records of
//! `[len:u32 LE][crc:u32 LE][payload]`, ending with a terminator record of
//! `len = 0xFFFFFFFF, crc = 0`. Each record decompresses to whole 1440-byte
//! chunks of 64 clusters; a cluster is a 64-bit word timestamp followed by
//! seven 16-bit sample words. Gaps between cluster timestamps repeat the
//! last seen word.
//!
//! Depending on the recorded clock scheme a 16-bit word carries one, two or
//! four samples; in the oversampled schemes bit `k` of the word belongs to
//! sample `k % n` at bit position `k / n`.

use crate::FormatDecoder;
use crc::Crc;
use log::{debug, warn};
use minilzo_rs::LZO;
use sigcore::error::{Error, Result};
use sigcore::feed::{LogicFeed, Sink};
use sigcore::protocol::{Channel, Header, Meta, Packet};

pub const MAGIC_SIGMA: &[u8; 16] = b"Sigma Test File\0";
pub const MAGIC_OMEGA: &[u8; 16] = b"Omega Test File\0";

const CRC32: Crc<u32> = Crc::<u32>::new(&crc::CRC_32_ISO_HDLC);
const MAX_RECORD_LEN: usize = 1024 * 1024;
const MAX_DECOMPRESSED_LEN: usize = 1024 * 1024;
const MAX_HEADER_LEN: usize = 1024 * 1024;
const CHUNK_LEN: usize = 1440;
const CLUSTERS_PER_CHUNK: usize = 64;
const WORDS_PER_CLUSTER: usize = 7;
const TERMINATOR_LEN: u32 = 0xffff_ffff;
/// `TestCLKTime` value meaning the capture was externally clocked.
const CLK_TIME_UNKNOWN: u64 = 15016;

#[derive(Debug, Clone, Default)]
pub struct StfOptions {
    /// Overrides the sample rate derived from the header.
    pub samplerate: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Magic,
    Header,
    Data,
    Done,
}

#[derive(Debug, Clone, Copy)]
struct ClockSource {
    scheme: u64,
    period: u64,
}

#[derive(Debug, Clone)]
struct Trace {
    caption: Option<String>,
    input: usize,
}

pub struct StfDecoder {
    options: StfOptions,
    stage: Stage,
    buf: Vec<u8>,
    lzo: LZO,

    first_ts: u64,
    length_ts: u64,
    trigger_ts: Option<u64>,
    clk_time: Option<u64>,
    clock: Option<ClockSource>,
    input_names: Vec<String>,
    traces: Vec<Trace>,

    channels: Vec<Channel>,
    samples_per_word: u64,
    unit_size: usize,
    feed: Option<LogicFeed>,

    words_emitted: u64,
    words_limit: u64,
    samples_emitted: u64,
    trigger_sample: Option<u64>,
    trigger_sent: bool,
    seen_cluster: bool,
    next_ts: u64,
    last_word: u16,
}

impl StfDecoder {
    pub fn new(options: StfOptions) -> Result<Self> {
        let lzo = LZO::init().map_err(|_| Error::Malloc)?;
        Ok(StfDecoder {
            options,
            stage: Stage::Magic,
            buf: Vec::new(),
            lzo,
            first_ts: 0,
            length_ts: 0,
            trigger_ts: None,
            clk_time: None,
            clock: None,
            input_names: Vec::new(),
            traces: Vec::new(),
            channels: Vec::new(),
            samples_per_word: 1,
            unit_size: 2,
            feed: None,
            words_emitted: 0,
            words_limit: 0,
            samples_emitted: 0,
            trigger_sample: None,
            trigger_sent: false,
            seen_cluster: false,
            next_ts: 0,
            last_word: 0,
        })
    }

    fn parse_header_section(&mut self, text: &[u8]) -> Result<()> {
        let text = std::str::from_utf8(text)
            .map_err(|_| Error::data("stf header is not valid ASCII"))?;
        for line in text.split("\r\n") {
            let line = line.trim_end_matches('\n');
            if line.is_empty() {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                debug!("stf header line without '=': {line:?}");
                continue;
            };
            match key {
                "TestFirstTS" => self.first_ts = parse_decimal(value)?,
                "TestLengthTS" => self.length_ts = parse_decimal(value)?,
                "TestTriggerTS" => self.trigger_ts = Some(parse_decimal(value)?),
                "TestCLKTime" => self.clk_time = Some(parse_decimal(value)?),
                "Sigma.ClockSource" => self.clock = Some(parse_clock_source(value)?),
                "Sigma.SigmaInputs" => {
                    self.input_names = value.split(';').map(str::to_owned).collect()
                }
                "Traces.Traces" => self.traces = parse_traces(value),
                _ => debug!("ignoring stf header key {key:?}"),
            }
        }
        Ok(())
    }

    /// Resolve clock scheme, word demux factor and sample rate, then build
    /// the channel list and announce the stream.
    fn begin_data(&mut self, sink: &mut dyn Sink) -> Result<()> {
        let (samples_per_word, unit_size, samplerate) = match self.clock {
            Some(ClockSource { scheme: 0, period }) => {
                (1, 2, Some(50_000_000 / period.max(1)))
            }
            Some(ClockSource { scheme: 1, .. }) => (2, 1, Some(100_000_000)),
            Some(ClockSource { scheme: 2, .. }) => (4, 1, Some(200_000_000)),
            Some(_) => return Err(Error::NotAvailable("unsupported stf clock scheme")),
            None => match self.clk_time {
                Some(CLK_TIME_UNKNOWN) => (1, 2, None),
                Some(0) | None => (1, 2, None),
                // TestCLKTime is the period in 1/15015 ns units
                Some(clk) => (1, 2, Some(15_015_000_000_000 / clk)),
            },
        };
        self.samples_per_word = samples_per_word;
        self.unit_size = unit_size;
        let samplerate = self.options.samplerate.or(samplerate);

        let wires = 16 / samples_per_word as usize;
        let mut channels = Vec::with_capacity(wires);
        for i in 0..wires {
            let trace = self.traces.iter().find(|t| t.input == i);
            let name = trace
                .and_then(|t| t.caption.clone())
                .or_else(|| self.input_names.get(i).cloned())
                .unwrap_or_else(|| format!("D{i}"));
            let mut ch = Channel::logic(i, name);
            if !self.traces.is_empty() {
                ch.enabled = trace.is_some();
            }
            channels.push(ch);
        }
        self.channels = channels;

        if self.length_ts < self.first_ts {
            return Err(Error::data("stf length timestamp precedes first timestamp"));
        }
        self.words_limit = self.length_ts - self.first_ts + 1;
        self.next_ts = self.first_ts;
        self.trigger_sample = self.trigger_ts.and_then(|t| {
            if (self.first_ts..=self.length_ts).contains(&t) {
                Some((t - self.first_ts) * self.samples_per_word)
            } else {
                debug!("stf trigger timestamp {t} out of range, ignored");
                None
            }
        });

        sink.send(Packet::Header(Header::new()))?;
        if let Some(rate) = samplerate {
            sink.send(Packet::Meta(Meta::Samplerate(rate)))?;
        }
        sink.send(Packet::Meta(Meta::NumChannels(wires as u32)))?;
        self.feed = Some(LogicFeed::new(unit_size)?);
        Ok(())
    }

    /// Split one word into its per-sample units. In the oversampled
    /// schemes source bit `sample + bit * n` becomes bit `bit` of sample
    /// `sample`.
    fn demux(&self, word: u16) -> ([[u8; 2]; 4], usize) {
        let mut units = [[0u8; 2]; 4];
        match self.samples_per_word {
            1 => {
                units[0] = word.to_le_bytes();
                (units, 1)
            }
            n @ (2 | 4) => {
                let n = n as usize;
                let bits = 16 / n;
                for (s, unit) in units.iter_mut().enumerate().take(n) {
                    let mut v = 0u8;
                    for b in 0..bits {
                        if word & (1 << (s + b * n)) != 0 {
                            v |= 1 << b;
                        }
                    }
                    unit[0] = v;
                }
                (units, n)
            }
            _ => unreachable!(),
        }
    }

    /// Submit `count` samples of one unit, inserting the trigger marker at
    /// the recorded sample position.
    fn submit_run(&mut self, sink: &mut dyn Sink, unit: &[u8], mut count: u64) -> Result<()> {
        if let Some(trig) = self.trigger_sample {
            if !self.trigger_sent
                && self.samples_emitted <= trig
                && trig < self.samples_emitted + count
            {
                let before = trig - self.samples_emitted;
                let feed = self.feed.as_mut().unwrap();
                feed.submit(sink, unit, before)?;
                feed.send_trigger(sink)?;
                self.samples_emitted += before;
                count -= before;
                self.trigger_sent = true;
            }
        }
        self.feed.as_mut().unwrap().submit(sink, unit, count)?;
        self.samples_emitted += count;
        Ok(())
    }

    /// Emit `count` repetitions of `word`, bounded by the declared capture
    /// length.
    fn emit_words(&mut self, sink: &mut dyn Sink, word: u16, count: u64) -> Result<()> {
        if self.words_emitted >= self.words_limit {
            return Ok(());
        }
        let count = count.min(self.words_limit - self.words_emitted);
        self.words_emitted += count;
        let (units, n) = self.demux(word);
        let unit_size = self.unit_size;
        if units[..n].iter().all(|u| u == &units[0]) {
            let unit = units[0];
            self.submit_run(sink, &unit[..unit_size], count * n as u64)
        } else {
            for _ in 0..count {
                for unit in &units[..n] {
                    let unit = *unit;
                    self.submit_run(sink, &unit[..unit_size], 1)?;
                }
            }
            Ok(())
        }
    }

    fn process_cluster(&mut self, sink: &mut dyn Sink, ts: u64, words: &[u8]) -> Result<bool> {
        // Chunks are padded with zeroed clusters after the last real one.
        if self.seen_cluster && ts == 0 {
            return Ok(false);
        }
        if ts < self.next_ts {
            return Err(Error::data(format!(
                "stf cluster timestamp {ts} goes backwards (expected >= {})",
                self.next_ts
            )));
        }
        if ts > self.next_ts && self.seen_cluster {
            let gap = ts - self.next_ts;
            self.emit_words(sink, self.last_word, gap)?;
        } else if ts > self.next_ts {
            // nothing recorded before the first cluster
            self.emit_words(sink, 0, ts - self.next_ts)?;
        }
        for w in 0..WORDS_PER_CLUSTER {
            let word = u16::from_le_bytes([words[2 * w], words[2 * w + 1]]);
            self.emit_words(sink, word, 1)?;
            self.last_word = word;
        }
        self.next_ts = ts + WORDS_PER_CLUSTER as u64;
        self.seen_cluster = true;
        Ok(true)
    }

    fn process_payload(&mut self, sink: &mut dyn Sink, payload: &[u8]) -> Result<()> {
        for chunk in payload.chunks(CHUNK_LEN) {
            let ts_base = 32;
            let words_base = 32 + 8 * CLUSTERS_PER_CHUNK;
            for c in 0..CLUSTERS_PER_CHUNK {
                let ts = u64::from_le_bytes(
                    chunk[ts_base + 8 * c..ts_base + 8 * (c + 1)]
                        .try_into()
                        .unwrap(),
                );
                let words = &chunk[words_base + 2 * WORDS_PER_CLUSTER * c
                    ..words_base + 2 * WORDS_PER_CLUSTER * (c + 1)];
                if !self.process_cluster(sink, ts, words)? {
                    break;
                }
            }
        }
        Ok(())
    }

    /// Repeat the final word out to the declared capture length and stop
    /// accepting records.
    fn finish_data(&mut self, sink: &mut dyn Sink) -> Result<()> {
        if self.words_emitted < self.words_limit {
            let missing = self.words_limit - self.words_emitted;
            self.emit_words(sink, self.last_word, missing)?;
        }
        self.stage = Stage::Done;
        Ok(())
    }
}

fn parse_decimal(value: &str) -> Result<u64> {
    value
        .trim()
        .parse::<u64>()
        .map_err(|_| Error::data(format!("stf header value {value:?} is not a number")))
}

fn parse_clock_source(value: &str) -> Result<ClockSource> {
    let mut scheme = None;
    let mut period = 1;
    for field in value.split(';') {
        match field.split_once('=') {
            Some(("ClockScheme", v)) => scheme = Some(parse_decimal(v)?),
            Some(("Period", v)) => period = parse_decimal(v)?.max(1),
            _ => {}
        }
    }
    Ok(ClockSource {
        scheme: scheme.ok_or_else(|| Error::data("stf clock source without ClockScheme"))?,
        period,
    })
}

fn parse_traces(value: &str) -> Vec<Trace> {
    let mut traces = Vec::new();
    for record in value.split(';') {
        let mut ty = None;
        let mut caption = None;
        let mut input = None;
        for field in record.split(':') {
            match field.split_once('=') {
                Some(("Type", v)) => ty = Some(v.to_owned()),
                Some(("Caption", v)) => caption = Some(unescape_caption(v)),
                Some(("Input0", v)) => input = v.trim().parse::<usize>().ok(),
                _ => {}
            }
        }
        match (ty.as_deref(), input) {
            (Some("Input") | Some("Digital"), Some(input)) => traces.push(Trace { caption, input }),
            (Some("Bus"), _) => {} // bus groupings are display-only upstream
            _ => debug!("ignoring stf trace record {record:?}"),
        }
    }
    traces
}

/// Captions escape arbitrary bytes as `%XX`.
fn unescape_caption(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).ok();
            if let Some(v) = hex.and_then(|h| u8::from_str_radix(h, 16).ok()) {
                out.push(v);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

impl FormatDecoder for StfDecoder {
    fn receive(&mut self, sink: &mut dyn Sink, data: &[u8]) -> Result<()> {
        self.buf.extend_from_slice(data);
        loop {
            match self.stage {
                Stage::Magic => {
                    if self.buf.len() < MAGIC_SIGMA.len() {
                        return Ok(());
                    }
                    let magic = &self.buf[..MAGIC_SIGMA.len()];
                    if magic == MAGIC_OMEGA {
                        return Err(Error::NotAvailable("Omega test files are not supported"));
                    }
                    if magic != MAGIC_SIGMA {
                        return Err(Error::data("not a Sigma test file"));
                    }
                    self.buf.drain(..MAGIC_SIGMA.len());
                    self.stage = Stage::Header;
                }
                Stage::Header => {
                    let Some(nul) = self.buf.iter().position(|&b| b == 0) else {
                        if self.buf.len() > MAX_HEADER_LEN {
                            return Err(Error::data("stf header section unterminated"));
                        }
                        return Ok(());
                    };
                    let section: Vec<u8> = self.buf.drain(..=nul).collect();
                    self.parse_header_section(&section[..nul])?;
                    self.begin_data(sink)?;
                    self.stage = Stage::Data;
                }
                Stage::Data => {
                    if self.buf.len() < 8 {
                        return Ok(());
                    }
                    let len = u32::from_le_bytes(self.buf[0..4].try_into().unwrap());
                    let crc = u32::from_le_bytes(self.buf[4..8].try_into().unwrap());
                    if len == TERMINATOR_LEN && crc == 0 {
                        self.buf.drain(..8);
                        self.finish_data(sink)?;
                        continue;
                    }
                    if len as usize > MAX_RECORD_LEN {
                        return Err(Error::data(format!("stf record of {len} bytes too large")));
                    }
                    if self.buf.len() < 8 + len as usize {
                        return Ok(());
                    }
                    let payload = &self.buf[8..8 + len as usize];
                    if CRC32.checksum(payload) != crc {
                        return Err(Error::data("stf record checksum mismatch"));
                    }
                    let decompressed = self
                        .lzo
                        .decompress_safe(payload, MAX_DECOMPRESSED_LEN)
                        .map_err(|_| Error::data("stf record failed to decompress"))?;
                    if decompressed.len() > MAX_DECOMPRESSED_LEN {
                        return Err(Error::data("stf record decompresses too large"));
                    }
                    if decompressed.is_empty() || decompressed.len() % CHUNK_LEN != 0 {
                        return Err(Error::data(format!(
                            "stf record of {} bytes is not whole chunks",
                            decompressed.len()
                        )));
                    }
                    self.buf.drain(..8 + len as usize);
                    self.process_payload(sink, &decompressed)?;
                }
                Stage::Done => {
                    if !self.buf.is_empty() {
                        debug!("{} bytes after stf terminator record", self.buf.len());
                        self.buf.clear();
                    }
                    return Ok(());
                }
            }
        }
    }

    fn end(&mut self, sink: &mut dyn Sink) -> Result<()> {
        match self.stage {
            Stage::Magic | Stage::Header => {
                return Err(Error::data("stf file truncated before any data"));
            }
            Stage::Data => {
                warn!("stf file ends without a terminator record");
                self.finish_data(sink)?;
            }
            Stage::Done => {}
        }
        if let Some(feed) = self.feed.as_mut() {
            feed.flush(sink)?;
        }
        sink.send(Packet::End)
    }

    fn reset(&mut self) -> Result<()> {
        let options = self.options.clone();
        let channels = std::mem::take(&mut self.channels);
        *self = StfDecoder::new(options)?;
        self.channels = channels;
        Ok(())
    }

    fn channels(&self) -> &[Channel] {
        &self.channels
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sigcore::protocol::Packet;

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

    fn compress(payload: &[u8]) -> Vec<u8> {
        let mut lzo = LZO::init().unwrap();
        lzo.compress(payload).unwrap()
    }

    fn record(payload: &[u8]) -> Vec<u8> {
        let compressed = compress(payload);
        let mut rec = Vec::new();
        rec.extend_from_slice(&(compressed.len() as u32).to_le_bytes());
        rec.extend_from_slice(&CRC32.checksum(&compressed).to_le_bytes());
        rec.extend_from_slice(&compressed);
        rec
    }

    fn terminator() -> Vec<u8> {
        let mut rec = Vec::new();
        rec.extend_from_slice(&TERMINATOR_LEN.to_le_bytes());
        rec.extend_from_slice(&0u32.to_le_bytes());
        rec
    }

    /// One chunk holding `clusters` starting at slot 0, zero-padded.
    fn chunk(clusters: &[(u64, [u16; 7])]) -> Vec<u8> {
        assert!(clusters.len() <= CLUSTERS_PER_CHUNK);
        let mut out = vec![0u8; CHUNK_LEN];
        for (i, (ts, words)) in clusters.iter().enumerate() {
            out[32 + 8 * i..32 + 8 * (i + 1)].copy_from_slice(&ts.to_le_bytes());
            for (w, word) in words.iter().enumerate() {
                let off = 32 + 8 * CLUSTERS_PER_CHUNK + 14 * i + 2 * w;
                out[off..off + 2].copy_from_slice(&word.to_le_bytes());
            }
        }
        out
    }

    fn header(extra: &str) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(MAGIC_SIGMA);
        out.extend_from_slice(b"TestFirstTS=0\r\nTestLengthTS=127\r\n");
        out.extend_from_slice(b"Sigma.ClockSource=ClockScheme=0;Period=1\r\n");
        out.extend_from_slice(b"Sigma.SigmaInputs=A;B;C;D;E;F;G;H;I;J;K;L;M;N;O;P\r\n");
        out.extend_from_slice(b"Traces.Traces=Type=Input:Caption=X:Input0=0\r\n");
        out.extend_from_slice(extra.as_bytes());
        out.push(0);
        out
    }

    fn decode(input: &[u8]) -> Result<RecordingSink> {
        let mut dec = StfDecoder::new(StfOptions::default())?;
        let mut sink = RecordingSink::default();
        dec.receive(&mut sink, input)?;
        dec.end(&mut sink)?;
        Ok(sink)
    }

    fn logic_units(sink: &RecordingSink) -> Vec<Vec<u8>> {
        let mut units = Vec::new();
        for p in &sink.packets {
            if let Packet::Logic(l) = p {
                for u in l.data.chunks(l.unit_size) {
                    units.push(u.to_vec());
                }
            }
        }
        units
    }

    #[test]
    fn minimal_file_scheme0() {
        let mut input = header("");
        input.extend_from_slice(&record(&chunk(&[(0, [0x0001; 7])])));
        input.extend_from_slice(&terminator());
        let sink = decode(&input).unwrap();

        assert!(matches!(sink.packets[0], Packet::Header(_)));
        assert_eq!(sink.packets[1], Packet::Meta(Meta::Samplerate(50_000_000)));
        let units = logic_units(&sink);
        // TestLengthTS=127 and one cluster: 7 real words then 121 repeats
        assert_eq!(units.len(), 128);
        assert!(units.iter().all(|u| u == &[0x01, 0x00]));
        assert_eq!(*sink.packets.last().unwrap(), Packet::End);
    }

    #[test]
    fn trace_caption_names_channel() {
        let mut input = header("");
        input.extend_from_slice(&terminator());
        let mut dec = StfDecoder::new(StfOptions::default()).unwrap();
        let mut sink = RecordingSink::default();
        dec.receive(&mut sink, &input).unwrap();
        dec.end(&mut sink).unwrap();
        assert_eq!(dec.channels().len(), 16);
        assert_eq!(dec.channels()[0].name, "X");
        assert!(dec.channels()[0].enabled);
        assert_eq!(dec.channels()[1].name, "B");
        assert!(!dec.channels()[1].enabled);
    }

    #[test]
    fn omega_files_rejected() {
        let mut input = MAGIC_OMEGA.to_vec();
        input.push(0);
        let mut dec = StfDecoder::new(StfOptions::default()).unwrap();
        let mut sink = RecordingSink::default();
        assert!(matches!(
            dec.receive(&mut sink, &input),
            Err(Error::NotAvailable(_))
        ));
    }

    #[test]
    fn bad_magic_rejected() {
        let mut dec = StfDecoder::new(StfOptions::default()).unwrap();
        let mut sink = RecordingSink::default();
        assert!(matches!(
            dec.receive(&mut sink, b"Gamma Test File\0"),
            Err(Error::Data(_))
        ));
    }

    #[test]
    fn crc_mismatch_is_fatal() {
        let mut input = header("");
        let mut rec = record(&chunk(&[(0, [0x0001; 7])]));
        let last = rec.len() - 1;
        rec[last] ^= 0x01; // flip one payload bit
        input.extend_from_slice(&rec);
        input.extend_from_slice(&terminator());
        assert!(matches!(decode(&input), Err(Error::Data(_))));
    }

    #[test]
    fn any_payload_mutation_breaks_crc() {
        let rec = record(&chunk(&[(0, [0xbeef; 7])]));
        for i in (8..rec.len()).step_by(7) {
            let mut input = header("");
            let mut rec = rec.clone();
            rec[i] = rec[i].wrapping_add(1);
            input.extend_from_slice(&rec);
            input.extend_from_slice(&terminator());
            assert!(decode(&input).is_err(), "mutation at {i} went unnoticed");
        }
    }

    #[test]
    fn backwards_cluster_timestamp_is_fatal() {
        let mut input = header("");
        input.extend_from_slice(&record(&chunk(&[
            (20, [0x0001; 7]),
            (5, [0x0002; 7]),
        ])));
        input.extend_from_slice(&terminator());
        assert!(matches!(decode(&input), Err(Error::Data(_))));
    }

    #[test]
    fn gap_repeats_last_word() {
        let mut input = header("");
        input.extend_from_slice(&record(&chunk(&[
            (0, [0x0003; 7]),
            (20, [0x0004; 7]),
        ])));
        input.extend_from_slice(&terminator());
        let sink = decode(&input).unwrap();
        let units = logic_units(&sink);
        assert_eq!(units.len(), 128);
        // words 0-6 real, 7-19 repeat 0x0003, 20-26 real, rest repeat 0x0004
        assert_eq!(units[6], vec![0x03, 0x00]);
        assert_eq!(units[19], vec![0x03, 0x00]);
        assert_eq!(units[20], vec![0x04, 0x00]);
        assert_eq!(units[127], vec![0x04, 0x00]);
    }

    #[test]
    fn trigger_marker_at_recorded_sample() {
        let mut input = Vec::new();
        input.extend_from_slice(MAGIC_SIGMA);
        input.extend_from_slice(
            b"TestFirstTS=0\r\nTestLengthTS=63\r\nTestTriggerTS=10\r\n\
              Sigma.ClockSource=ClockScheme=0;Period=1\r\n",
        );
        input.push(0);
        input.extend_from_slice(&record(&chunk(&[(0, [0x0001; 7])])));
        input.extend_from_slice(&terminator());
        let sink = decode(&input).unwrap();

        let mut before = 0usize;
        let mut saw = false;
        for p in &sink.packets {
            match p {
                Packet::Logic(l) if !saw => before += l.num_units(),
                Packet::Trigger => saw = true,
                _ => {}
            }
        }
        assert!(saw);
        assert_eq!(before, 10);
    }

    #[test]
    fn scheme1_demuxes_two_samples_per_word() {
        let mut input = Vec::new();
        input.extend_from_slice(MAGIC_SIGMA);
        input.extend_from_slice(
            b"TestFirstTS=0\r\nTestLengthTS=6\r\nSigma.ClockSource=ClockScheme=1;Period=1\r\n",
        );
        input.push(0);
        // source bit k belongs to sample k%2, bit k/2.
        // 0x0003 = bits 0,1 set -> sample0 bit0, sample1 bit0
        // 0x0005 = bits 0,2 set -> sample0 bits 0 and 1
        input.extend_from_slice(&record(&chunk(&[(
            0,
            [0x0003, 0x0005, 0, 0, 0, 0, 0],
        )])));
        input.extend_from_slice(&terminator());
        let sink = decode(&input).unwrap();
        assert_eq!(sink.packets[1], Packet::Meta(Meta::Samplerate(100_000_000)));
        let units = logic_units(&sink);
        // 7 words * 2 samples each
        assert_eq!(units.len(), 14);
        assert_eq!(units[0], vec![0x01]);
        assert_eq!(units[1], vec![0x01]);
        assert_eq!(units[2], vec![0x03]);
        assert_eq!(units[3], vec![0x00]);
    }

    #[test]
    fn record_not_whole_chunks_is_fatal() {
        let mut input = header("");
        input.extend_from_slice(&record(&vec![0u8; CHUNK_LEN + 100]));
        input.extend_from_slice(&terminator());
        assert!(matches!(decode(&input), Err(Error::Data(_))));
    }

    #[test]
    fn oversized_record_is_fatal() {
        let mut input = header("");
        input.extend_from_slice(&((MAX_RECORD_LEN as u32) + 1).to_le_bytes());
        input.extend_from_slice(&0u32.to_le_bytes());
        let mut dec = StfDecoder::new(StfOptions::default()).unwrap();
        let mut sink = RecordingSink::default();
        assert!(dec.receive(&mut sink, &input).is_err());
    }

    #[test]
    fn unsupported_clock_scheme() {
        let mut input = Vec::new();
        input.extend_from_slice(MAGIC_SIGMA);
        input.extend_from_slice(b"Sigma.ClockSource=ClockScheme=3;Period=1\r\n");
        input.push(0);
        let mut dec = StfDecoder::new(StfOptions::default()).unwrap();
        let mut sink = RecordingSink::default();
        assert!(matches!(
            dec.receive(&mut sink, &input),
            Err(Error::NotAvailable(_))
        ));
    }

    #[test]
    fn clk_time_fallback_rate() {
        let mut input = Vec::new();
        input.extend_from_slice(MAGIC_SIGMA);
        // 300300 / 15015 = 20 ns period = 50 MHz
        input.extend_from_slice(b"TestFirstTS=0\r\nTestLengthTS=0\r\nTestCLKTime=300300\r\n");
        input.push(0);
        input.extend_from_slice(&terminator());
        let sink = decode(&input).unwrap();
        assert_eq!(sink.packets[1], Packet::Meta(Meta::Samplerate(50_000_000)));

        // the external-clock sentinel suppresses the rate
        let mut input = Vec::new();
        input.extend_from_slice(MAGIC_SIGMA);
        input.extend_from_slice(b"TestFirstTS=0\r\nTestLengthTS=0\r\nTestCLKTime=15016\r\n");
        input.push(0);
        input.extend_from_slice(&terminator());
        let sink = decode(&input).unwrap();
        assert!(!sink
            .packets
            .iter()
            .any(|p| matches!(p, Packet::Meta(Meta::Samplerate(_)))));
    }

    #[test]
    fn chunked_delivery_equivalent() {
        let mut input = header("");
        input.extend_from_slice(&record(&chunk(&[(0, [0x00ff; 7])])));
        input.extend_from_slice(&terminator());

        let whole = decode(&input).unwrap();
        let mut dec = StfDecoder::new(StfOptions::default()).unwrap();
        let mut sink = RecordingSink::default();
        for b in input.chunks(3) {
            dec.receive(&mut sink, b).unwrap();
        }
        dec.end(&mut sink).unwrap();
        assert_eq!(logic_units(&whole), logic_units(&sink));
    }

    #[test]
    fn caption_unescaping() {
        assert_eq!(unescape_caption("CLK%2FEN"), "CLK/EN");
        assert_eq!(unescape_caption("plain"), "plain");
        assert_eq!(unescape_caption("bad%zz"), "bad%zz");
    }
}
