use crate::channel::ChannelId;

/// Offload directives toward a conferencing-capable chip.
///
/// The reconfiguration path calls these whenever a conference's realization
/// changes; a pure software build installs [`NullOffload`] and mixes
/// everything on the CPU.
pub trait HwOffload {
    /// Tie or untie a two-party crossconnect between channels on one chip.
    fn crossconnect(&mut self, a: ChannelId, b: ChannelId, enable: bool);

    /// Join a channel to a hardware conference unit (`1..=8`), or detach it
    /// with `unit` 0.
    fn conference(&mut self, channel: ChannelId, unit: u8);
}

/// No-op offload for software-only operation.
#[derive(Debug, Default)]
pub struct NullOffload;

impl HwOffload for NullOffload {
    fn crossconnect(&mut self, _a: ChannelId, _b: ChannelId, _enable: bool) {}

    fn conference(&mut self, _channel: ChannelId, _unit: u8) {}
}
