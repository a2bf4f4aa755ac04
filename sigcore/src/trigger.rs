use crate::error::{Error, Result};
use crate::feed::Sink;
use crate::protocol::{Channel, ChannelKind, Logic, Packet};

/// Condition a single logic channel must satisfy for a stage to match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerMatch {
    Zero,
    One,
    Rising,
    Falling,
    Edge,
}

/// All matches of one stage must hold on the same sample.
#[derive(Debug, Clone, Default)]
pub struct TriggerStage {
    pub matches: Vec<(usize, TriggerMatch)>,
}

impl TriggerStage {
    pub fn new(matches: Vec<(usize, TriggerMatch)>) -> Self {
        TriggerStage { matches }
    }
}

/// An ordered sequence of stages. The trigger fires on the sample that
/// satisfies the final stage after every earlier stage matched in order.
#[derive(Debug, Clone, Default)]
pub struct TriggerSpec {
    pub stages: Vec<TriggerStage>,
}

impl TriggerSpec {
    pub fn new(stages: Vec<TriggerStage>) -> Self {
        TriggerSpec { stages }
    }
}

struct CompiledMatch {
    byte: usize,
    mask: u8,
    cond: TriggerMatch,
}

impl CompiledMatch {
    fn eval(&self, prev: Option<&[u8]>, cur: &[u8]) -> bool {
        let c = cur[self.byte] & self.mask != 0;
        match self.cond {
            TriggerMatch::Zero => !c,
            TriggerMatch::One => c,
            // An edge needs a prior sample; the first sample ever seen
            // cannot match one.
            TriggerMatch::Rising | TriggerMatch::Falling | TriggerMatch::Edge => {
                let Some(prev) = prev else {
                    return false;
                };
                let p = prev[self.byte] & self.mask != 0;
                match self.cond {
                    TriggerMatch::Rising => !p && c,
                    TriggerMatch::Falling => p && !c,
                    _ => p != c,
                }
            }
        }
    }
}

/// Scans logic units for a multi-stage match, holding a pre-trigger ring of
/// recent samples so history can be replayed when the trigger fires.
pub struct SoftTrigger {
    stages: Vec<Vec<CompiledMatch>>,
    unit_size: usize,
    cur_stage: usize,
    prev: Option<Vec<u8>>,
    ring: PreTriggerRing,
}

impl SoftTrigger {
    /// Compile a spec against the session's channel list.
    ///
    /// Match elements referencing a disabled channel are ignored. A stage
    /// left with no usable matches is a caller error. An empty channel list
    /// means channel states are unknown and every element is kept.
    pub fn new(
        spec: &TriggerSpec,
        channels: &[Channel],
        unit_size: usize,
        pre_trigger_samples: usize,
    ) -> Result<Self> {
        if unit_size == 0 {
            return Err(Error::Arg("trigger unit size must be non-zero"));
        }
        if spec.stages.is_empty() {
            return Err(Error::Arg("trigger spec has no stages"));
        }
        let mut stages = Vec::with_capacity(spec.stages.len());
        for stage in &spec.stages {
            let mut compiled = Vec::new();
            for &(ch, cond) in &stage.matches {
                if let Some(c) = channels.iter().find(|c| c.index == ch) {
                    if !c.enabled || c.kind != ChannelKind::Logic {
                        continue;
                    }
                }
                if ch >= unit_size * 8 {
                    return Err(Error::Arg("trigger channel beyond sample unit width"));
                }
                compiled.push(CompiledMatch {
                    byte: ch / 8,
                    mask: 1 << (ch % 8),
                    cond,
                });
            }
            if compiled.is_empty() {
                return Err(Error::Arg("trigger stage has no matches"));
            }
            stages.push(compiled);
        }
        Ok(SoftTrigger {
            stages,
            unit_size,
            cur_stage: 0,
            prev: None,
            // The trigger sample itself is always retained so the packet
            // preceding `Trigger` ends on it.
            ring: PreTriggerRing::new(unit_size, pre_trigger_samples.max(1)),
        })
    }

    /// Scan a buffer of logic units.
    ///
    /// Until the trigger fires, samples are retained in the pre-trigger
    /// ring and nothing is emitted. When the final stage matches, the ring
    /// is drained through `sink` as `Logic` packets ending on the trigger
    /// sample, followed by a `Trigger` packet, and the unit offset of the
    /// trigger within `data` is returned. The caller forwards everything
    /// after that offset itself.
    pub fn check(&mut self, sink: &mut dyn Sink, data: &[u8]) -> Result<Option<usize>> {
        if data.len() % self.unit_size != 0 {
            return Err(Error::Arg("trigger buffer is not a whole number of units"));
        }
        let units = data.len() / self.unit_size;
        let mut pushed = 0usize;
        let mut i = 0usize;
        while i < units {
            let unit = &data[i * self.unit_size..(i + 1) * self.unit_size];
            if i >= pushed {
                self.ring.push(unit);
                pushed = i + 1;
            }
            let prev = if i == 0 {
                self.prev.as_deref()
            } else {
                Some(&data[(i - 1) * self.unit_size..i * self.unit_size])
            };
            let matched = self.stages[self.cur_stage].iter().all(|m| m.eval(prev, unit));
            if matched {
                self.cur_stage += 1;
                if self.cur_stage == self.stages.len() {
                    self.ring.drain(sink)?;
                    sink.send(Packet::Trigger)?;
                    self.prev = Some(unit.to_vec());
                    self.cur_stage = 0;
                    return Ok(Some(i));
                }
            } else if self.cur_stage > 0 {
                // A run that began cur_stage units back may conceal a later
                // start, e.g. input 00001 against the pattern 0001. Rewind
                // and rescan from the unit after that run's first sample,
                // bounded by the start of this buffer.
                let restart = (i as isize - self.cur_stage as isize).max(-1);
                i = (restart + 1) as usize;
                self.cur_stage = 0;
                continue;
            }
            i += 1;
        }
        if units > 0 {
            self.prev = Some(data[(units - 1) * self.unit_size..].to_vec());
        }
        Ok(None)
    }
}

/// Fixed-capacity circular buffer of sample units, oldest overwritten first.
struct PreTriggerRing {
    unit_size: usize,
    capacity_units: usize,
    buf: Vec<u8>,
    head: usize,
    len: usize,
}

impl PreTriggerRing {
    fn new(unit_size: usize, capacity_units: usize) -> Self {
        PreTriggerRing {
            unit_size,
            capacity_units,
            buf: vec![0u8; unit_size * capacity_units],
            head: 0,
            len: 0,
        }
    }

    fn push(&mut self, unit: &[u8]) {
        let at = (self.head + self.len) % self.capacity_units;
        self.buf[at * self.unit_size..(at + 1) * self.unit_size].copy_from_slice(unit);
        if self.len < self.capacity_units {
            self.len += 1;
        } else {
            self.head = (self.head + 1) % self.capacity_units;
        }
    }

    /// Emit the retained units oldest-first as one or two `Logic` packets,
    /// then reset.
    fn drain(&mut self, sink: &mut dyn Sink) -> Result<()> {
        let first_units = self.len.min(self.capacity_units - self.head);
        let start = self.head * self.unit_size;
        if first_units > 0 {
            sink.send(Packet::Logic(Logic {
                unit_size: self.unit_size,
                data: self.buf[start..start + first_units * self.unit_size].to_vec(),
            }))?;
        }
        let wrapped_units = self.len - first_units;
        if wrapped_units > 0 {
            sink.send(Packet::Logic(Logic {
                unit_size: self.unit_size,
                data: self.buf[..wrapped_units * self.unit_size].to_vec(),
            }))?;
        }
        self.head = 0;
        self.len = 0;
        Ok(())
    }
}
