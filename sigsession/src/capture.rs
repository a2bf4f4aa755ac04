use crate::error::CaptureError;
use crate::session::Session;
use crate::source::ByteSource;
use log::debug;
use sigcore::protocol::Packet;
use sigcore::trigger::TriggerSpec;
use sigfmt::FormatDecoder;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

const READ_CHUNK: usize = 64 * 1024;

/// Lets a consumer request a stop from inside its packet callback (or from
/// anywhere else); the runner honours it at the next chunk boundary.
#[derive(Clone)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

/// Owns one acquisition: a format decoder, the byte source feeding it and
/// the session the decoder emits into. Everything runs on the caller's
/// thread; the only suspension points are between source chunks.
pub struct Capture {
    session: Session,
    decoder: Box<dyn FormatDecoder>,
    source: Box<dyn ByteSource>,
    stop: Arc<AtomicBool>,
}

impl Capture {
    pub fn new(
        decoder: Box<dyn FormatDecoder>,
        source: Box<dyn ByteSource>,
        callback: impl FnMut(&Packet) + 'static,
    ) -> Self {
        Capture {
            session: Session::new(callback),
            decoder,
            source,
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Arm a soft trigger before `run`.
    pub fn arm_trigger(
        &mut self,
        spec: TriggerSpec,
        pre_trigger_samples: usize,
    ) -> Result<(), CaptureError> {
        self.session.arm_trigger(spec, pre_trigger_samples)?;
        Ok(())
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle(self.stop.clone())
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Pump the source through the decoder until it is exhausted, the
    /// consumer asks to stop, or the decoder fails. On failure after the
    /// header went out the session is still closed with `End`.
    pub fn run(&mut self) -> Result<(), CaptureError> {
        self.source.open()?;
        let result = self.pump();
        self.source.close();
        if let Err(e) = result {
            let _ = self.session.finish();
            return Err(e);
        }
        Ok(())
    }

    fn pump(&mut self) -> Result<(), CaptureError> {
        let mut buf = vec![0u8; READ_CHUNK];
        loop {
            if self.stop.load(Ordering::SeqCst) {
                debug!("stop requested; discarding partial decoder state");
                self.session.finish()?;
                return Ok(());
            }
            let n = self.source.read_chunk(&mut buf)?;
            if n == 0 {
                break;
            }
            let Capture {
                session, decoder, ..
            } = self;
            decoder.receive(session, &buf[..n])?;
            if session.channels().is_empty() && !decoder.channels().is_empty() {
                session.set_channels(decoder.channels().to_vec());
                session.set_channel_groups(decoder.channel_groups().to_vec());
            }
        }
        let Capture {
            session, decoder, ..
        } = self;
        decoder.end(session)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MemorySource;
    use sigcore::error::Result;
    use sigcore::feed::Sink;
    use sigcore::protocol::{Channel, Header, Logic, Meta};
    use sigcore::trigger::{TriggerMatch, TriggerStage};
    use sigfmt::vcd::{VcdDecoder, VcdOptions};
    use std::cell::RefCell;
    use std::io;
    use std::rc::Rc;

    fn vcd_capture(text: &str) -> (Capture, Rc<RefCell<Vec<Packet>>>) {
        let packets = Rc::new(RefCell::new(Vec::new()));
        let sink = packets.clone();
        let capture = Capture::new(
            Box::new(VcdDecoder::new(VcdOptions::default()).unwrap()),
            Box::new(MemorySource::new(text.as_bytes().to_vec())),
            move |p| sink.borrow_mut().push(p.clone()),
        );
        (capture, packets)
    }

    const SIMPLE: &str = "$timescale 1 ns $end\n\
                          $var wire 1 ! a $end\n\
                          $var wire 1 \" b $end\n\
                          $enddefinitions $end\n\
                          #0 0! 1\" #4 1! #6\n";

    #[test]
    fn end_to_end_vcd_run() {
        let (mut capture, packets) = vcd_capture(SIMPLE);
        capture.run().unwrap();

        let seen = packets.borrow();
        assert!(matches!(seen[0], Packet::Header(_)));
        assert!(seen
            .iter()
            .any(|p| matches!(p, Packet::Meta(Meta::Samplerate(1_000_000_000)))));
        let logic: Vec<u8> = seen
            .iter()
            .filter_map(|p| match p {
                Packet::Logic(l) => Some(l.data.clone()),
                _ => None,
            })
            .flatten()
            .collect();
        assert_eq!(logic, vec![0b10, 0b10, 0b10, 0b10, 0b11, 0b11, 0b11]);
        assert_eq!(*seen.last().unwrap(), Packet::End);
        assert_eq!(capture.session().channels().len(), 2);
    }

    #[test]
    fn armed_trigger_fires_in_capture() {
        let (mut capture, packets) = vcd_capture(SIMPLE);
        let spec = TriggerSpec::new(vec![TriggerStage::new(vec![(0, TriggerMatch::Rising)])]);
        capture.arm_trigger(spec, 2).unwrap();
        capture.run().unwrap();

        let seen = packets.borrow();
        let trigger_at = seen
            .iter()
            .position(|p| matches!(p, Packet::Trigger))
            .expect("trigger fired");
        // the packet right before the marker ends on the trigger sample
        let Packet::Logic(before) = &seen[trigger_at - 1] else {
            panic!()
        };
        assert_eq!(*before.data.last().unwrap(), 0b11);
        // pre-trigger window is bounded by the configured depth
        let retained: usize = seen[..trigger_at]
            .iter()
            .filter_map(|p| match p {
                Packet::Logic(l) => Some(l.num_units()),
                _ => None,
            })
            .sum();
        assert_eq!(retained, 2);
    }

    #[test]
    fn decoder_error_still_closes_session() {
        let text = "$timescale 1 ns $end\n\
                    $var wire 1 ! a $end\n\
                    $enddefinitions $end\n\
                    #5 0! #2\n";
        let (mut capture, packets) = vcd_capture(text);
        let err = capture.run();
        assert!(matches!(err, Err(CaptureError::Decode(_))));
        let seen = packets.borrow();
        assert!(matches!(seen[0], Packet::Header(_)));
        assert_eq!(*seen.last().unwrap(), Packet::End);
    }

    /// Emits one logic unit per chunk, forever.
    struct EndlessDecoder {
        channels: Vec<Channel>,
        started: bool,
    }

    impl EndlessDecoder {
        fn new() -> Self {
            EndlessDecoder {
                channels: vec![Channel::logic(0, "d0")],
                started: false,
            }
        }
    }

    impl FormatDecoder for EndlessDecoder {
        fn receive(&mut self, sink: &mut dyn Sink, _data: &[u8]) -> Result<()> {
            if !self.started {
                self.started = true;
                sink.send(Packet::Header(Header::new()))?;
            }
            sink.send(Packet::Logic(Logic {
                unit_size: 1,
                data: vec![0xff],
            }))
        }

        fn end(&mut self, sink: &mut dyn Sink) -> Result<()> {
            sink.send(Packet::End)
        }

        fn reset(&mut self) -> Result<()> {
            self.started = false;
            Ok(())
        }

        fn channels(&self) -> &[Channel] {
            &self.channels
        }
    }

    /// Yields zero-filled chunks until told to stop.
    struct EndlessSource;

    impl ByteSource for EndlessSource {
        fn read_chunk(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            Ok(buf.len())
        }
    }

    #[test]
    fn consumer_stop_flushes_and_ends() {
        let packets = Rc::new(RefCell::new(Vec::new()));
        let handle: Rc<RefCell<Option<StopHandle>>> = Rc::new(RefCell::new(None));
        let sink = packets.clone();
        let stopper = handle.clone();
        let mut capture = Capture::new(
            Box::new(EndlessDecoder::new()),
            Box::new(EndlessSource),
            move |p| {
                sink.borrow_mut().push(p.clone());
                if matches!(p, Packet::Logic(_)) {
                    if let Some(h) = stopper.borrow().as_ref() {
                        h.stop();
                    }
                }
            },
        );
        *handle.borrow_mut() = Some(capture.stop_handle());
        capture.run().unwrap();
        assert!(capture.session().ended());

        let seen = packets.borrow();
        assert!(matches!(seen[0], Packet::Header(_)));
        assert!(seen.iter().any(|p| matches!(p, Packet::Logic(_))));
        assert_eq!(*seen.last().unwrap(), Packet::End);
    }
}
