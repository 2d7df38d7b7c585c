/// Modular index arithmetic over a power-of-two ring.
///
/// Every rx/tx/mix buffer in the engine shares one geometry so the wrap mask
/// and the half-range ordering predicate stay consistent across all of them.
/// Half the ring doubles as the discriminator for "is A before B": two live
/// pointers are never more than half a ring apart, so a modular distance of
/// at least `half` means the first operand trails the second.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RingGeometry {
    size: usize,
    mask: usize,
    half: usize,
}

impl RingGeometry {
    /// Build a geometry for `size` slots. `size` must be a power of two and
    /// at least 16 so the quarter-ring frame limit is nonzero.
    pub fn new(size: usize) -> Self {
        assert!(size.is_power_of_two(), "ring size must be a power of two");
        assert!(size >= 16, "ring size too small");
        RingGeometry {
            size,
            mask: size - 1,
            half: size / 2,
        }
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    #[inline]
    pub fn half(&self) -> usize {
        self.half
    }

    /// Advance an index by `n` slots, wrapping.
    #[inline]
    pub fn advance(&self, idx: usize, n: usize) -> usize {
        (idx.wrapping_add(n)) & self.mask
    }

    /// Step an index back by `n` slots, wrapping.
    #[inline]
    pub fn retreat(&self, idx: usize, n: usize) -> usize {
        (idx.wrapping_sub(n)) & self.mask
    }

    /// Modular distance from `b` forward to `a`.
    #[inline]
    pub fn distance(&self, a: usize, b: usize) -> usize {
        a.wrapping_sub(b) & self.mask
    }

    /// True when `a` trails `b` in modular order.
    #[inline]
    pub fn is_behind(&self, a: usize, b: usize) -> bool {
        self.distance(a, b) >= self.half
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_advance_wraps() {
        let g = RingGeometry::new(1024);
        assert_eq!(g.advance(0, 160), 160);
        assert_eq!(g.advance(1000, 100), 76);
        assert_eq!(g.advance(1023, 1), 0);
    }

    #[test]
    fn test_retreat_wraps() {
        let g = RingGeometry::new(1024);
        assert_eq!(g.retreat(160, 160), 0);
        assert_eq!(g.retreat(0, 160), 864);
    }

    #[test]
    fn test_distance_is_modular() {
        let g = RingGeometry::new(1024);
        assert_eq!(g.distance(160, 0), 160);
        assert_eq!(g.distance(0, 160), 1024 - 160);
        assert_eq!(g.distance(76, 1000), 100);
    }

    #[test]
    fn test_behind_predicate() {
        let g = RingGeometry::new(1024);
        assert!(g.is_behind(0, 160));
        assert!(!g.is_behind(160, 0));
        // equality is not "behind"
        assert!(!g.is_behind(300, 300));
        // holds across the wrap point
        assert!(g.is_behind(1000, 76));
        assert!(!g.is_behind(76, 1000));
    }

    #[test]
    #[should_panic(expected = "power of two")]
    fn test_rejects_non_power_of_two() {
        let _ = RingGeometry::new(1000);
    }
}
