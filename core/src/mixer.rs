use std::collections::HashMap;

use log::{debug, warn};

use crate::audio::{saturate, Law};
use crate::channel::{Channel, ChannelId};
use crate::conference::{ConferenceRegistry, Solution};
use crate::dtmf::DtmfFormat;
use crate::error::{CmxError, Result};
use crate::hardware::{HwOffload, NullOffload};
use crate::ring::RingGeometry;
use crate::DEFAULT_BUFF_SIZE;

/// An outbound encoded frame with its opaque pass-through tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxFrame {
    pub tag: u32,
    pub data: Vec<u8>,
}

/// One mixing domain: the channels, the conference registry, the shared ring
/// geometry and the hardware offload seam.
///
/// All entry points run on one soft-realtime execution context; nothing here
/// suspends or blocks. Receive, send and transmit never allocate mixer state;
/// overload shows up as dropped audio, never as a stall. The state dump and
/// per-pointer traces go through the `log` facade at debug level.
pub struct MixerContext {
    geometry: RingGeometry,
    channels: HashMap<ChannelId, Channel>,
    registry: ConferenceRegistry,
    hw: Box<dyn HwOffload>,
    next_id: u32,
}

impl MixerContext {
    pub fn new() -> Self {
        Self::with_buff_size(DEFAULT_BUFF_SIZE)
    }

    /// Build a context with a custom ring size (power of two; at least four
    /// times the largest expected frame).
    pub fn with_buff_size(buff_size: usize) -> Self {
        let geometry = RingGeometry::new(buff_size);
        MixerContext {
            geometry,
            channels: HashMap::new(),
            registry: ConferenceRegistry::new(buff_size),
            hw: Box::new(NullOffload),
            next_id: 1,
        }
    }

    /// Install the chip offload collaborator (no-op by default).
    pub fn set_offload(&mut self, hw: Box<dyn HwOffload>) {
        self.hw = hw;
    }

    pub fn buff_size(&self) -> usize {
        self.geometry.size()
    }

    /// Create a channel with the given encoding. It starts inactive and
    /// outside any conference.
    pub fn add_channel(&mut self, law: Law) -> ChannelId {
        let id = ChannelId(self.next_id);
        self.next_id += 1;
        self.channels.insert(id, Channel::new(law, self.geometry));
        debug!("{id}: created ({law:?})");
        id
    }

    /// Tear down a channel, detaching it from its conference first.
    pub fn remove_channel(&mut self, id: ChannelId) -> Result<()> {
        let ch = self
            .channels
            .get_mut(&id)
            .ok_or(CmxError::InvalidArgument("unknown channel"))?;
        if ch.conference().is_some() {
            ch.set_conf_id(0);
            self.reconfigure(id)?;
        }
        self.channels.remove(&id);
        debug!("{id}: removed");
        Ok(())
    }

    pub fn channel(&self, id: ChannelId) -> Option<&Channel> {
        self.channels.get(&id)
    }

    pub fn channel_mut(&mut self, id: ChannelId) -> Option<&mut Channel> {
        self.channels.get_mut(&id)
    }

    pub fn conferences(&self) -> &ConferenceRegistry {
        &self.registry
    }

    /// Reconcile a channel's conference membership after any of its target
    /// conference id, active flag, hardware id or mixing flags changed.
    ///
    /// Idempotent when nothing changed. Every membership change re-runs the
    /// hardware classifier and issues the offload directives for the
    /// transition.
    pub fn reconfigure(&mut self, id: ChannelId) -> Result<()> {
        let ch = self
            .channels
            .get(&id)
            .ok_or(CmxError::InvalidArgument("unknown channel"))?;
        let conf_id = ch.conf_id();
        let active = ch.active();

        match ch.conference() {
            None => {
                if conf_id == 0 || !active {
                    return Ok(());
                }
                self.join_conference(id, conf_id)
            }
            Some(current) => {
                if conf_id != 0 && active {
                    if conf_id == current {
                        return Ok(());
                    }
                    self.leave_conference(id)?;
                    self.join_conference(id, conf_id)
                } else {
                    self.leave_conference(id)
                }
            }
        }
    }

    fn join_conference(&mut self, id: ChannelId, conf_id: u32) -> Result<()> {
        if self.channels[&id].conference().is_some() {
            return Err(CmxError::InvalidArgument("channel already in a conference"));
        }
        debug!("{id}: joining conference {conf_id}");

        let conf = self.registry.create(conf_id)?;
        let w_max = conf.w_max;
        let old = conf.solution;
        let prior_pair = match conf.members[..] {
            [a, b] => Some((a, b)),
            _ => None,
        };

        // new members align with the leading edge and read silence until a
        // real sample lands
        let ch = self.channels.get_mut(&id).unwrap();
        let silence = ch.law().silence();
        ch.rx_buff.fill(silence);
        ch.w_rx = w_max;
        ch.r_rx = w_max;
        ch.conference = Some(conf_id);

        let conf = self.registry.find_mut(conf_id).unwrap();
        conf.members.push(id);
        if conf.members.len() == 3 {
            // the mix buffer goes live now and needs a known baseline
            conf.conf_buff.fill(0);
        }
        if conf.members.len() == 1 {
            return Ok(());
        }

        let new = self.classify(conf_id);
        self.apply_solution(conf_id, old, new, prior_pair, None)
    }

    fn leave_conference(&mut self, id: ChannelId) -> Result<()> {
        let ch = self
            .channels
            .get(&id)
            .ok_or(CmxError::InvalidArgument("unknown channel"))?;
        let conf_id = ch
            .conference()
            .ok_or(CmxError::NotFound("channel is not in a conference"))?;
        debug!("{id}: leaving conference {conf_id}");

        let conf = self
            .registry
            .find_mut(conf_id)
            .ok_or(CmxError::Internal("conference back-reference is stale"))?;
        let old = conf.solution;
        let prior_pair = match conf.members[..] {
            [a, b] => Some((a, b)),
            _ => None,
        };
        let pos = conf
            .member_position(id)
            .ok_or(CmxError::Internal("channel missing from its member list"))?;
        conf.members.remove(pos);
        let now_empty = conf.members.is_empty();

        self.channels.get_mut(&id).unwrap().conference = None;

        let new = self.classify(conf_id);
        self.apply_solution(conf_id, old, new, prior_pair, Some(id))?;

        if now_empty {
            self.registry.destroy(conf_id)?;
        }
        Ok(())
    }

    /// Decide how a conference can be realized on the chip, if at all.
    fn classify(&self, conf_id: u32) -> Solution {
        let conf = match self.registry.find(conf_id) {
            Some(c) => c,
            None => return Solution::Software,
        };

        let mut chip = 0u32;
        for &mid in &conf.members {
            let m = match self.channels.get(&mid) {
                Some(m) => m,
                None => {
                    warn!("conference {conf_id}: member {mid} has no channel");
                    return Solution::Software;
                }
            };
            // forced tx mixing and off-chip members keep us in software, and
            // the chip cannot tie across card boundaries
            if m.tx_mix() || m.hw_id() == 0 {
                return Solution::Software;
            }
            if chip == 0 {
                chip = m.hw_id();
            } else if m.hw_id() != chip {
                return Solution::Software;
            }
        }

        if conf.members.len() < 2 {
            return Solution::Software;
        }
        if conf.members.len() == 2 {
            return Solution::HwCrossconnect;
        }

        // three or more members need one of the chip's eight conference units
        let mut claimed = [0u32; 8];
        for other in self.registry.iter() {
            if other.id() == conf_id || other.hw_id != chip {
                continue;
            }
            if let Solution::HwConference(unit) = other.solution() {
                if unit == 0 || unit > 8 {
                    warn!("conference {}: unit {unit} out of range", other.id());
                    return Solution::Software;
                }
                if claimed[(unit - 1) as usize] != 0 {
                    warn!(
                        "conference {}: unit {unit} already claimed by conference {}",
                        other.id(),
                        claimed[(unit - 1) as usize]
                    );
                    return Solution::Software;
                }
                claimed[(unit - 1) as usize] = other.id();
            }
        }

        if let Solution::HwConference(unit) = conf.solution() {
            if (1..=8).contains(&unit) && claimed[(unit - 1) as usize] == 0 {
                return Solution::HwConference(unit);
            }
        }
        for (i, &owner) in claimed.iter().enumerate() {
            if owner == 0 {
                return Solution::HwConference((i + 1) as u8);
            }
        }
        warn!("conference {conf_id}: no free hardware unit, mixing in software");
        Solution::Software
    }

    /// Issue offload directives for a solution change and record it.
    fn apply_solution(
        &mut self,
        conf_id: u32,
        old: Solution,
        new: Solution,
        prior_pair: Option<(ChannelId, ChannelId)>,
        removed: Option<ChannelId>,
    ) -> Result<()> {
        let members: Vec<ChannelId> = self
            .registry
            .find(conf_id)
            .map(|c| c.members().to_vec())
            .unwrap_or_default();

        match (old, new) {
            (Solution::HwConference(_), Solution::HwConference(unit)) => match removed {
                // the leaver detaches, everyone else stays tied in hardware
                Some(gone) => self.hw.conference(gone, 0),
                // re-announce so a newly added member joins the unit
                None => {
                    for &m in &members {
                        self.hw.conference(m, unit);
                    }
                }
            },
            (Solution::HwConference(_), _) => {
                debug!("conference {conf_id}: hardware conference torn down");
                if let Some(gone) = removed {
                    self.hw.conference(gone, 0);
                }
                for &m in &members {
                    self.hw.conference(m, 0);
                }
            }
            _ => {}
        }

        if old == Solution::HwCrossconnect && new != Solution::HwCrossconnect {
            let (a, b) =
                prior_pair.ok_or(CmxError::Internal("crossconnect without exactly two members"))?;
            debug!("conference {conf_id}: hardware crossconnect torn down");
            self.hw.crossconnect(a, b, false);
        }

        match new {
            Solution::HwConference(unit) if !matches!(old, Solution::HwConference(_)) => {
                debug!("conference {conf_id}: hardware conference on unit {unit}");
                for &m in &members {
                    self.hw.conference(m, unit);
                }
            }
            Solution::HwCrossconnect if old != Solution::HwCrossconnect => {
                if members.len() != 2 {
                    return Err(CmxError::Internal("crossconnect requires exactly two members"));
                }
                debug!("conference {conf_id}: hardware crossconnect");
                self.hw.crossconnect(members[0], members[1], true);
            }
            _ => {}
        }

        let chip = if new == Solution::Software {
            0
        } else {
            members
                .first()
                .and_then(|m| self.channels.get(m))
                .map(|m| m.hw_id())
                .unwrap_or(0)
        };
        if let Some(conf) = self.registry.find_mut(conf_id) {
            conf.solution = new;
            conf.hw_id = chip;
        }
        Ok(())
    }

    /// Absorb an encoded frame received from the card.
    ///
    /// The frame lands in the channel's receive ring; with three or more
    /// conference members it is also decoded into the shared mix buffer,
    /// additively inside the live window and overwriting beyond the old
    /// leading edge. A frame that would let the fastest writer outrun the
    /// slowest by more than one frame budget is dropped whole; the `Busy`
    /// result is informational and the caller is expected to carry on.
    pub fn receive(&mut self, id: ChannelId, data: &[u8]) -> Result<()> {
        let len = data.len();
        if len == 0 {
            return Ok(());
        }
        let g = self.geometry;
        let ch = self
            .channels
            .get(&id)
            .ok_or(CmxError::InvalidArgument("unknown channel"))?;

        // half the ring must stay at least four frames deep
        if len >= g.half() / 4 {
            warn!("{id}: inbound frame of {len} bytes exceeds ring budget, dropping");
            return Err(CmxError::Busy("inbound frame too large"));
        }

        let law = ch.law();
        let w_start = ch.w_rx;
        let w_end = g.advance(w_start, len);
        let mut largest = ch.largest.max(len * 2);
        let conf_id = ch.conference();

        // envelope: w_min trails every member, w_max is the leading edge
        let mut w_min = w_end;
        let mut w_max = w_end;
        let mut old_w_max = w_end;
        if let Some(cid) = conf_id {
            let conf = self
                .registry
                .find(cid)
                .ok_or(CmxError::Internal("conference back-reference is stale"))?;
            largest = largest.max(conf.largest);
            for &mid in conf.members() {
                if mid == id {
                    continue;
                }
                let member_w_rx = self
                    .channels
                    .get(&mid)
                    .map(|m| m.w_rx)
                    .ok_or(CmxError::Internal("member has no channel"))?;
                if g.is_behind(member_w_rx, w_min) {
                    w_min = member_w_rx;
                }
            }
            old_w_max = conf.w_max;
            if g.is_behind(w_max, conf.w_max) {
                w_max = conf.w_max;
            }
        }

        // the frame budget grows even when the frame itself gets dropped
        self.channels.get_mut(&id).unwrap().largest = largest;
        if let Some(cid) = conf_id {
            self.registry.find_mut(cid).unwrap().largest = largest;
        }

        if g.distance(w_max, w_min) > largest {
            debug!("{id}: receiving too fast, dropping {len} bytes");
            return Err(CmxError::Busy("receive ring backpressure"));
        }

        let ch = self.channels.get_mut(&id).unwrap();
        let mut w = w_start;
        for &b in data {
            ch.rx_buff[w] = b;
            w = g.advance(w, 1);
        }
        ch.w_rx = w_end;

        if let Some(cid) = conf_id {
            let conf = self.registry.find_mut(cid).unwrap();
            conf.w_min = w_min;
            if conf.members().len() >= 3 {
                let mut w = w_start;
                let mut i = 0;
                // add into the live window, plain-write past the old edge
                while i < len && w != old_w_max {
                    conf.conf_buff[w] += law.decode(data[i]);
                    w = g.advance(w, 1);
                    i += 1;
                }
                while i < len {
                    conf.conf_buff[w] = law.decode(data[i]);
                    w = g.advance(w, 1);
                    i += 1;
                }
            }
            conf.w_max = w_max;
        }
        Ok(())
    }

    /// Run the channel's DTMF decoder over an inbound byte stream, before
    /// audio frames are given to [`receive`](Self::receive).
    ///
    /// The caller names what the bytes are: encoded audio for the software
    /// Goertzel bank ([`DtmfFormat::ALaw`]/[`DtmfFormat::ULaw`], also
    /// available via `channel.law().into()`), or
    /// [`DtmfFormat::HfcCoefficients`] chunks when a hardware tone decoder
    /// supplies the squared magnitudes directly. Returns the digits newly
    /// emitted; empty when no decoder is attached.
    pub fn decode_dtmf(&mut self, id: ChannelId, data: &[u8], fmt: DtmfFormat) -> Result<&[u8]> {
        let ch = self
            .channels
            .get_mut(&id)
            .ok_or(CmxError::InvalidArgument("unknown channel"))?;
        match ch.dtmf.as_mut() {
            Some(decoder) => Ok(decoder.decode(data, fmt)),
            None => Ok(&[]),
        }
    }

    /// Queue playout data from the upper layer for later sending.
    pub fn transmit(&mut self, id: ChannelId, data: &[u8]) -> Result<()> {
        let g = self.geometry;
        let ch = self
            .channels
            .get_mut(&id)
            .ok_or(CmxError::InvalidArgument("unknown channel"))?;
        let queued = ch.queue_tx(g, data);
        if queued < data.len() {
            debug!("{id}: transmit ring full, dropped {} bytes", data.len() - queued);
        }
        Ok(())
    }

    /// Produce exactly `len` outbound encoded bytes for a channel.
    ///
    /// Queued transmit data goes out first (verbatim unless the channel
    /// mixes it); the remainder comes from the branch matching the
    /// conference shape: silence or own echo when alone, the peer's audio
    /// for a pair, the mix buffer minus the own contribution for a group.
    pub fn send(&mut self, id: ChannelId, len: usize, tag: u32) -> Result<TxFrame> {
        let g = self.geometry;
        let ch = self
            .channels
            .get(&id)
            .ok_or(CmxError::InvalidArgument("unknown channel"))?;
        if len >= g.half() {
            warn!("{id}: outbound frame of {len} bytes exceeds ring budget");
            return Err(CmxError::Busy("outbound frame too large"));
        }

        let law = ch.law();
        let zero = law.silence();
        let echo = ch.echo();
        let tx_mix = ch.tx_mix();
        let has_tone = ch.tone.is_some();
        let conf_id = ch.conference();

        let (member_count, conf_w_min) = match conf_id.and_then(|cid| self.registry.find(cid)) {
            Some(conf) => (conf.members().len(), Some(conf.w_min)),
            None => (0, None),
        };

        let t0 = ch.r_tx;
        let tt = ch.w_tx;
        let mut r = ch.r_rx;
        // the slowest conference writer limits the read, else our own
        let mut rr = conf_w_min.unwrap_or(ch.w_rx);
        if g.is_behind(rr, g.advance(r, len)) {
            // not enough new audio: read the most recent len bytes instead
            r = g.retreat(rr, len);
        } else {
            rr = g.advance(r, len);
        }
        let new_r_rx = rr;

        // an active tone replaces all queued playout data
        if has_tone {
            let ch = self.channels.get_mut(&id).unwrap();
            ch.r_rx = new_r_rx;
            ch.r_tx = 0;
            ch.w_tx = 0;
            let mut data = vec![0u8; len];
            if let Some(tone) = ch.tone.as_mut() {
                tone.fill(&mut data);
            }
            return Ok(TxFrame { tag, data });
        }

        let mut out = Vec::with_capacity(len);
        let mut t = t0;
        {
            let ch = &self.channels[&id];
            let tx = &ch.tx_buff;
            let rx = &ch.rx_buff;

            // queued playout data goes out verbatim unless the channel mixes it
            if !tx_mix && t != tt {
                while r != rr && t != tt {
                    out.push(tx[t]);
                    t = g.advance(t, 1);
                    r = g.advance(r, 1);
                }
            }

            if r != rr {
                if member_count <= 1 {
                    // alone (or alone in a conference)
                    if !echo {
                        while r != rr && t != tt {
                            out.push(tx[t]);
                            t = g.advance(t, 1);
                            r = g.advance(r, 1);
                        }
                        for _ in 0..g.distance(rr, r) {
                            out.push(zero);
                        }
                    } else {
                        while r != rr && t != tt {
                            let sample = law.decode(tx[t]) + law.decode(rx[r]);
                            out.push(law.encode(saturate(sample)));
                            t = g.advance(t, 1);
                            r = g.advance(r, 1);
                        }
                        while r != rr {
                            out.push(rx[r]);
                            r = g.advance(r, 1);
                        }
                    }
                } else if member_count == 2 {
                    let conf = self.registry.find(conf_id.unwrap()).unwrap();
                    let other_id = if conf.members()[0] == id {
                        conf.members()[1]
                    } else {
                        conf.members()[0]
                    };
                    let other = &self.channels[&other_id];
                    let other_law = other.law();
                    let orx = &other.rx_buff;

                    if !echo {
                        while r != rr && t != tt {
                            let sample = law.decode(tx[t]) + other_law.decode(orx[r]);
                            out.push(law.encode(saturate(sample)));
                            t = g.advance(t, 1);
                            r = g.advance(r, 1);
                        }
                        while r != rr {
                            // normalize to our law even when the peer's differs
                            let sample = other_law.decode(orx[r]);
                            out.push(law.encode(saturate(sample)));
                            r = g.advance(r, 1);
                        }
                    } else {
                        while r != rr && t != tt {
                            let sample =
                                law.decode(tx[t]) + other_law.decode(orx[r]) + law.decode(rx[r]);
                            out.push(law.encode(saturate(sample)));
                            t = g.advance(t, 1);
                            r = g.advance(r, 1);
                        }
                        while r != rr {
                            let sample = other_law.decode(orx[r]) + law.decode(rx[r]);
                            out.push(law.encode(saturate(sample)));
                            r = g.advance(r, 1);
                        }
                    }
                } else {
                    let conf = self.registry.find(conf_id.unwrap()).unwrap();
                    let c = &conf.conf_buff;

                    if !echo {
                        // the mix holds everyone, so subtract our own audio
                        while r != rr && t != tt {
                            let sample = law.decode(tx[t]) + c[r] - law.decode(rx[r]);
                            out.push(law.encode(saturate(sample)));
                            t = g.advance(t, 1);
                            r = g.advance(r, 1);
                        }
                        while r != rr {
                            let sample = c[r] - law.decode(rx[r]);
                            out.push(law.encode(saturate(sample)));
                            r = g.advance(r, 1);
                        }
                    } else {
                        while r != rr && t != tt {
                            let sample = law.decode(tx[t]) + c[r];
                            out.push(law.encode(saturate(sample)));
                            t = g.advance(t, 1);
                            r = g.advance(r, 1);
                        }
                        while r != rr {
                            out.push(law.encode(saturate(c[r])));
                            r = g.advance(r, 1);
                        }
                    }
                }
            }
        }

        let ch = self.channels.get_mut(&id).unwrap();
        ch.r_rx = new_r_rx;
        ch.r_tx = t;
        Ok(TxFrame { tag, data: out })
    }

    /// Log the whole mixing state at debug level.
    pub fn dump_state(&self) {
        debug!("----- channels");
        for (id, ch) in &self.channels {
            debug!(
                "* {id} law={:?} echo={} tx_mix={} active={} hw_id={} conf={:?}",
                ch.law(),
                ch.echo(),
                ch.tx_mix(),
                ch.active(),
                ch.hw_id(),
                ch.conference()
            );
        }
        debug!("----- conferences");
        for conf in self.registry.iter() {
            debug!(
                "* conf {} solution={:?} hw_id={} members={:?}",
                conf.id(),
                conf.solution(),
                conf.hw_id,
                conf.members()
            );
        }
        debug!("----- end");
    }
}

impl Default for MixerContext {
    fn default() -> Self {
        Self::new()
    }
}
