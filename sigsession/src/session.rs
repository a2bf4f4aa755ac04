use log::debug;
use sigcore::error::{Error, Result};
use sigcore::feed::Sink;
use sigcore::protocol::{Channel, ChannelGroup, Header, Logic, Meta, Packet};
use sigcore::trigger::{SoftTrigger, TriggerSpec};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Setup,
    Running,
    Ended,
}

/// One acquisition's feed to a single consumer callback.
///
/// The session owns the channel list and enforces the packet invariants:
/// exactly one `Header` first, metadata and data only while running,
/// exactly one `End`, at most one `Trigger`. Decoders write into it through
/// the [`Sink`] impl. While a soft trigger is armed, incoming `Logic`
/// packets are diverted through the trigger engine and only replayed once
/// it fires.
pub struct Session {
    callback: Box<dyn FnMut(&Packet)>,
    channels: Vec<Channel>,
    groups: Vec<ChannelGroup>,
    lifecycle: Lifecycle,
    armed: Option<ArmedTrigger>,
    trigger_seen: bool,
}

struct ArmedTrigger {
    spec: TriggerSpec,
    pre_trigger_samples: usize,
    /// Compiled lazily on the first logic packet, once the unit size is
    /// known.
    engine: Option<SoftTrigger>,
}

impl Session {
    pub fn new(callback: impl FnMut(&Packet) + 'static) -> Self {
        Session {
            callback: Box::new(callback),
            channels: Vec::new(),
            groups: Vec::new(),
            lifecycle: Lifecycle::Setup,
            armed: None,
            trigger_seen: false,
        }
    }

    /// Adopt the channel list a decoder discovered. The channels are owned
    /// here for the rest of the session.
    pub fn set_channels(&mut self, channels: Vec<Channel>) {
        self.channels = channels;
    }

    pub fn set_channel_groups(&mut self, groups: Vec<ChannelGroup>) {
        self.groups = groups;
    }

    pub fn channels(&self) -> &[Channel] {
        &self.channels
    }

    pub fn channel_groups(&self) -> &[ChannelGroup] {
        &self.groups
    }

    /// Arm a soft trigger; logic data will be withheld until it matches.
    pub fn arm_trigger(&mut self, spec: TriggerSpec, pre_trigger_samples: usize) -> Result<()> {
        if self.lifecycle != Lifecycle::Setup {
            return Err(Error::DeviceClosed);
        }
        if spec.stages.is_empty() {
            return Err(Error::Arg("trigger spec has no stages"));
        }
        self.armed = Some(ArmedTrigger {
            spec,
            pre_trigger_samples,
            engine: None,
        });
        Ok(())
    }

    pub fn send_header(&mut self) -> Result<()> {
        self.send(Packet::Header(Header::new()))
    }

    pub fn send_meta(&mut self, meta: Meta) -> Result<()> {
        self.send(Packet::Meta(meta))
    }

    pub fn send_end(&mut self) -> Result<()> {
        self.send(Packet::End)
    }

    /// Close the feed if it is open; used on cancellation and on decoder
    /// errors after the header already went out.
    pub fn finish(&mut self) -> Result<()> {
        if self.lifecycle == Lifecycle::Running {
            self.send(Packet::End)
        } else {
            Ok(())
        }
    }

    pub fn ended(&self) -> bool {
        self.lifecycle == Lifecycle::Ended
    }

    fn deliver(&mut self, packet: &Packet) {
        if matches!(packet, Packet::Trigger) {
            self.trigger_seen = true;
        }
        (self.callback)(packet);
    }

    fn intercept_logic(&mut self, logic: Logic) -> Result<()> {
        let Some(mut armed) = self.armed.take() else {
            self.deliver(&Packet::Logic(logic));
            return Ok(());
        };
        let mut engine = match armed.engine.take() {
            Some(engine) => engine,
            None => SoftTrigger::new(
                &armed.spec,
                &self.channels,
                logic.unit_size,
                armed.pre_trigger_samples,
            )?,
        };
        match engine.check(&mut Deliver(self), &logic.data)? {
            Some(offset) => {
                // the engine replayed history up to and including the
                // trigger sample; pass the rest of this buffer through
                let rest = &logic.data[(offset + 1) * logic.unit_size..];
                if !rest.is_empty() {
                    self.deliver(&Packet::Logic(Logic {
                        unit_size: logic.unit_size,
                        data: rest.to_vec(),
                    }));
                }
            }
            None => {
                armed.engine = Some(engine);
                self.armed = Some(armed);
            }
        }
        Ok(())
    }
}

/// Emission path for the trigger engine, bypassing interception.
struct Deliver<'a>(&'a mut Session);

impl Sink for Deliver<'_> {
    fn send(&mut self, packet: Packet) -> Result<()> {
        if matches!(packet, Packet::Trigger) && self.0.trigger_seen {
            return Err(Error::data("second trigger in one session"));
        }
        self.0.deliver(&packet);
        Ok(())
    }
}

impl Sink for Session {
    fn send(&mut self, packet: Packet) -> Result<()> {
        match packet {
            Packet::Header(_) => {
                if self.lifecycle != Lifecycle::Setup {
                    return Err(Error::DeviceClosed);
                }
                self.lifecycle = Lifecycle::Running;
                self.deliver(&packet);
                Ok(())
            }
            Packet::End => {
                if self.lifecycle != Lifecycle::Running {
                    return Err(Error::DeviceClosed);
                }
                if self.armed.take().is_some() {
                    debug!("session ended with armed trigger; retained samples dropped");
                }
                self.lifecycle = Lifecycle::Ended;
                self.deliver(&packet);
                Ok(())
            }
            Packet::Logic(logic) => {
                if self.lifecycle != Lifecycle::Running {
                    return Err(Error::DeviceClosed);
                }
                if logic.unit_size == 0 || logic.data.len() % logic.unit_size != 0 {
                    return Err(Error::Arg("logic packet length not a whole unit count"));
                }
                if self.armed.is_some() {
                    self.intercept_logic(logic)
                } else {
                    self.deliver(&Packet::Logic(logic));
                    Ok(())
                }
            }
            Packet::Analog(ref analog) => {
                if self.lifecycle != Lifecycle::Running {
                    return Err(Error::DeviceClosed);
                }
                if analog.values.len() != analog.num_samples * analog.channels.len() {
                    return Err(Error::Arg("analog packet sample count mismatch"));
                }
                self.deliver(&packet);
                Ok(())
            }
            Packet::Trigger => {
                if self.lifecycle != Lifecycle::Running {
                    return Err(Error::DeviceClosed);
                }
                if self.trigger_seen {
                    return Err(Error::data("second trigger in one session"));
                }
                self.deliver(&packet);
                Ok(())
            }
            Packet::Meta(_) | Packet::FrameBegin | Packet::FrameEnd => {
                if self.lifecycle != Lifecycle::Running {
                    return Err(Error::DeviceClosed);
                }
                self.deliver(&packet);
                Ok(())
            }
        }
    }
}
