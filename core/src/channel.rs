use crate::audio::Law;
use crate::dtmf::DtmfDecoder;
use crate::ring::RingGeometry;
use crate::tone::ToneSource;

/// Handle to a channel owned by a [`MixerContext`](crate::MixerContext).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChannelId(pub(crate) u32);

impl std::fmt::Display for ChannelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ch{}", self.0)
    }
}

/// One telephony endpoint: its encoding, its receive and transmit rings, and
/// the mixing flags the reconfiguration path acts on.
///
/// The receive ring absorbs frames from the card; the transmit ring queues
/// playout data from the upper layer until the send path drains it. Both are
/// byte rings in the encoded domain; all four indices wrap with the context's
/// ring geometry.
pub struct Channel {
    law: Law,
    pub(crate) rx_buff: Vec<u8>,
    pub(crate) tx_buff: Vec<u8>,
    pub(crate) w_rx: usize,
    pub(crate) r_rx: usize,
    pub(crate) w_tx: usize,
    pub(crate) r_tx: usize,
    /// Twice the largest frame seen on this channel; backpressure budget.
    pub(crate) largest: usize,
    echo: bool,
    tx_mix: bool,
    conf_id: u32,
    active: bool,
    /// Conference currently joined, kept as a weak id back-reference.
    pub(crate) conference: Option<u32>,
    hw_id: u32,
    pub(crate) dtmf: Option<DtmfDecoder>,
    pub(crate) tone: Option<Box<dyn ToneSource>>,
}

impl Channel {
    pub(crate) fn new(law: Law, geometry: RingGeometry) -> Self {
        Channel {
            law,
            rx_buff: vec![law.silence(); geometry.size()],
            tx_buff: vec![0; geometry.size()],
            w_rx: 0,
            r_rx: 0,
            w_tx: 0,
            r_tx: 0,
            largest: 0,
            echo: false,
            tx_mix: false,
            conf_id: 0,
            active: false,
            conference: None,
            hw_id: 0,
            dtmf: None,
            tone: None,
        }
    }

    #[inline]
    pub fn law(&self) -> Law {
        self.law
    }

    pub fn echo(&self) -> bool {
        self.echo
    }

    /// Include this channel's own received audio in its outbound stream.
    pub fn set_echo(&mut self, echo: bool) {
        self.echo = echo;
    }

    pub fn tx_mix(&self) -> bool {
        self.tx_mix
    }

    /// Mix queued transmit data additively instead of replacing the
    /// conference audio. Affects hardware eligibility; call
    /// [`MixerContext::reconfigure`](crate::MixerContext::reconfigure) after
    /// changing it.
    pub fn set_tx_mix(&mut self, tx_mix: bool) {
        self.tx_mix = tx_mix;
    }

    pub fn conf_id(&self) -> u32 {
        self.conf_id
    }

    /// Target conference id, 0 for none. Takes effect on the next
    /// reconfigure.
    pub fn set_conf_id(&mut self, conf_id: u32) {
        self.conf_id = conf_id;
    }

    pub fn active(&self) -> bool {
        self.active
    }

    /// Media-channel-up flag. Takes effect on the next reconfigure.
    pub fn set_active(&mut self, active: bool) {
        self.active = active;
    }

    pub fn hw_id(&self) -> u32 {
        self.hw_id
    }

    /// Hardware instance hosting this channel, 0 for pure software.
    pub fn set_hw_id(&mut self, hw_id: u32) {
        self.hw_id = hw_id;
    }

    /// Conference this channel currently participates in.
    pub fn conference(&self) -> Option<u32> {
        self.conference
    }

    pub fn set_tone(&mut self, tone: Option<Box<dyn ToneSource>>) {
        self.tone = tone;
    }

    /// Attach an in-band DTMF decoder to the receive path.
    pub fn enable_dtmf(&mut self) {
        if self.dtmf.is_none() {
            self.dtmf = Some(DtmfDecoder::new());
        }
    }

    pub fn disable_dtmf(&mut self) {
        self.dtmf = None;
    }

    pub fn w_rx(&self) -> usize {
        self.w_rx
    }

    pub fn r_rx(&self) -> usize {
        self.r_rx
    }

    pub fn w_tx(&self) -> usize {
        self.w_tx
    }

    pub fn r_tx(&self) -> usize {
        self.r_tx
    }

    /// Queue playout data into the transmit ring.
    ///
    /// One slot stays reserved so a full ring is distinguishable from an
    /// empty one. A frame longer than the free space loses its tail; the
    /// transmit side is producer-paced and tolerates the loss. Returns the
    /// number of bytes actually queued.
    pub(crate) fn queue_tx(&mut self, geometry: RingGeometry, data: &[u8]) -> usize {
        if data.is_empty() {
            return 0;
        }

        let mut w = self.w_tx;
        let r = self.r_tx;
        let space = match geometry.distance(r, w) {
            0 => geometry.size(),
            d => d,
        };

        let ww = if space - 1 < data.len() {
            // fill what is left, up to one slot before the read pointer
            geometry.advance(r, geometry.size() - 1)
        } else {
            geometry.advance(w, data.len())
        };

        let mut queued = 0;
        while w != ww {
            self.tx_buff[w] = data[queued];
            queued += 1;
            w = geometry.advance(w, 1);
        }
        self.w_tx = ww;
        queued
    }
}
