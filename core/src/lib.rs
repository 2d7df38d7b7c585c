//! Conference mixer (CMX) and DTMF decoder for 8 kHz telephony audio
//!
//! Channels deliver A-law or μ-law frames into per-channel ring buffers; the
//! mixer crossconnects pairs, sums larger conferences in a shared mix buffer
//! with per-member echo compensation, and produces outbound frames on
//! demand. An optional in-band DTMF decoder runs on the receive path. Frame
//! I/O, tone generation and the chip offload itself belong to the embedding
//! link layer; this crate only issues the offload directives.

pub mod audio;
pub mod channel;
pub mod conference;
pub mod dtmf;
pub mod error;
pub mod hardware;
pub mod mixer;
pub mod ring;
pub mod tone;

pub use audio::{saturate, Law, ALAW_SILENCE, ULAW_SILENCE};
pub use channel::{Channel, ChannelId};
pub use conference::{Conference, ConferenceRegistry, Solution};
pub use dtmf::{DtmfDecoder, DtmfFormat, DTMF_NPOINTS, DTMF_THRESH};
pub use error::{CmxError, Result};
pub use hardware::{HwOffload, NullOffload};
pub use mixer::{MixerContext, TxFrame};
pub use ring::RingGeometry;
pub use tone::ToneSource;

// Configuration constants
pub const SAMPLE_RATE: usize = 8000;

/// Default ring size in bytes; half of it must stay at least four times the
/// largest frame a card delivers.
pub const DEFAULT_BUFF_SIZE: usize = 0x8000;
