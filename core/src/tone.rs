/// Source of generated tone audio for a channel.
///
/// While a tone is attached, the send path replaces all queued transmit data
/// with tone samples and flushes the transmit ring. Generation itself (dial
/// tone patterns, loops) lives outside the engine.
pub trait ToneSource {
    /// Fill `out` with encoded tone bytes.
    fn fill(&mut self, out: &mut [u8]);
}
