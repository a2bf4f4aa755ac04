//! ChronoVu LA8 raw capture files.
//!
//! The file is exactly 8 MiB of sample data plus a 5-byte trailer. Each
//! body byte is one sample across the 8 logic channels. The trailer is a
//! clock divider byte followed by a little-endian trigger sample index;
//! the divider `d` sets the sample period to `(d + 1) * 10 ns`, with
//! `0xff` meaning the rate was never recorded.

use crate::FormatDecoder;
use log::debug;
use sigcore::error::{Error, Result};
use sigcore::feed::{LogicFeed, Sink};
use sigcore::protocol::{Channel, Header, Meta, Packet};

pub const BODY_SIZE: usize = 8 * 1024 * 1024;
pub const FILE_SIZE: usize = BODY_SIZE + 5;

const DIVCOUNT_UNKNOWN: u8 = 0xff;
const MAX_CHANNELS: u32 = 8;
/// Logic packets are kept small so consumers see data early.
const CHUNK_UNITS: usize = 4096;

#[derive(Debug, Clone)]
pub struct La8Options {
    pub numchannels: u32,
    /// Base clock the divider divides down from.
    pub samplerate: u64,
}

impl Default for La8Options {
    fn default() -> Self {
        La8Options {
            numchannels: MAX_CHANNELS,
            samplerate: 100_000_000,
        }
    }
}

pub struct La8Decoder {
    options: La8Options,
    buf: Vec<u8>,
    channels: Vec<Channel>,
}

impl La8Decoder {
    pub fn new(options: La8Options) -> Result<Self> {
        if options.numchannels == 0 || options.numchannels > MAX_CHANNELS {
            return Err(Error::Arg("la8 channel count must be 1..=8"));
        }
        if options.samplerate == 0 {
            return Err(Error::Arg("la8 base sample rate must be non-zero"));
        }
        let channels = (0..options.numchannels)
            .map(|i| Channel::logic(i as usize, format!("{i}")))
            .collect();
        Ok(La8Decoder {
            options,
            buf: Vec::new(),
            channels,
        })
    }
}

impl FormatDecoder for La8Decoder {
    fn receive(&mut self, _sink: &mut dyn Sink, data: &[u8]) -> Result<()> {
        // The divider and trigger index live at the very end, so nothing
        // can be emitted until the whole file has arrived.
        if self.buf.len() + data.len() > FILE_SIZE {
            return Err(Error::data(format!(
                "la8 file larger than the expected {FILE_SIZE} bytes"
            )));
        }
        self.buf.extend_from_slice(data);
        Ok(())
    }

    fn end(&mut self, sink: &mut dyn Sink) -> Result<()> {
        if self.buf.len() != FILE_SIZE {
            return Err(Error::data(format!(
                "la8 file is {} bytes, expected {FILE_SIZE}",
                self.buf.len()
            )));
        }
        let divcount = self.buf[BODY_SIZE];
        let trigger_index = u32::from_le_bytes(
            self.buf[BODY_SIZE + 1..BODY_SIZE + 5].try_into().unwrap(),
        ) as usize;

        sink.send(Packet::Header(Header::new()))?;
        if divcount == DIVCOUNT_UNKNOWN {
            debug!("divcount 0xff, sample rate not recorded");
        } else {
            let samplerate = self.options.samplerate / (divcount as u64 + 1);
            sink.send(Packet::Meta(Meta::Samplerate(samplerate)))?;
        }
        sink.send(Packet::Meta(Meta::NumChannels(self.options.numchannels)))?;

        let mut feed = LogicFeed::with_limit(1, CHUNK_UNITS)?;
        let body = &self.buf[..BODY_SIZE];
        if trigger_index < BODY_SIZE {
            feed.submit_slice(sink, &body[..trigger_index])?;
            feed.send_trigger(sink)?;
            feed.submit_slice(sink, &body[trigger_index..])?;
        } else {
            debug!("trigger index {trigger_index} beyond capture, ignored");
            feed.submit_slice(sink, body)?;
        }
        feed.flush(sink)?;
        sink.send(Packet::End)
    }

    fn reset(&mut self) -> Result<()> {
        self.buf.clear();
        Ok(())
    }

    fn channels(&self) -> &[Channel] {
        &self.channels
    }
}
