pub mod la8;
pub mod stf;
pub mod vcd;
pub mod vcd_out;

use sigcore::error::Result;
use sigcore::feed::Sink;
use sigcore::protocol::{Channel, ChannelGroup};

/// A capture-file decoder.
///
/// Input arrives in arbitrarily sized chunks via `receive`; the decoder
/// emits session packets through the borrowed sink, beginning with a
/// `Header` once it has parsed enough to describe the capture. `end`
/// flushes whatever is pending and emits `End`.
pub trait FormatDecoder {
    fn receive(&mut self, sink: &mut dyn Sink, data: &[u8]) -> Result<()>;
    fn end(&mut self, sink: &mut dyn Sink) -> Result<()>;

    /// Forget all parse state so the same input can be fed again. The
    /// channel list discovered by the previous run is preserved and
    /// verified against the re-read.
    fn reset(&mut self) -> Result<()>;

    /// Channels discovered during header parse, dense and 0-indexed.
    fn channels(&self) -> &[Channel];

    fn channel_groups(&self) -> &[ChannelGroup] {
        &[]
    }
}

/// The capture formats this crate can decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatKind {
    Vcd,
    Stf,
    La8,
}

/// Pick a decoder for a file from its first bytes and, when known, its
/// total size. LA8 captures have no magic and are recognised by their
/// fixed size alone; everything that is neither LA8 nor STF is tried as
/// VCD, the only text format here.
pub fn detect(head: &[u8], file_size: Option<u64>) -> FormatKind {
    if file_size == Some(la8::FILE_SIZE as u64) {
        FormatKind::La8
    } else if head.starts_with(stf::MAGIC_SIGMA) || head.starts_with(stf::MAGIC_OMEGA) {
        FormatKind::Stf
    } else {
        FormatKind::Vcd
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detection_order() {
        assert_eq!(
            detect(b"$timescale 1 ns $end", None),
            FormatKind::Vcd
        );
        assert_eq!(detect(stf::MAGIC_SIGMA, None), FormatKind::Stf);
        assert_eq!(detect(stf::MAGIC_OMEGA, None), FormatKind::Stf);
        assert_eq!(
            detect(&[0u8; 16], Some(la8::FILE_SIZE as u64)),
            FormatKind::La8
        );
    }
}
