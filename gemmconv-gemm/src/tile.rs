//! Register-tile menu for the packed backend.
//!
//! A tile is `MR` rows of `A` by `NR` columns of `B`, where `NR` is a whole
//! number of vector registers. Two shapes are offered:
//!
//! | tile | MR | NR          |
//! |------|----|-------------|
//! | F2   | 6  | 2 x lanes   |
//! | F3   | 4  | 3 x lanes   |
//!
//! The packed layout of `B` only depends on `NR`, so every size derived here
//! is a pure function of `(n, k, tile)`.

use gemmconv_kernel::SimdLevel;

/// Tile family requested by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum KernelRequest {
    F2,
    F3,
    /// Let the backend pick from the CPU capability.
    #[default]
    Any,
}

/// Concrete tile family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KernelTile {
    F2,
    F3,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TileShape {
    pub mr: usize,
    pub nr: usize,
}

impl KernelRequest {
    /// Resolve to a concrete tile. `Any` picks F3 on 256-bit and wider
    /// registers and F2 otherwise; it never depends on the matrix size, so
    /// buffer sizes stay monotonic in `m`.
    pub fn resolve(self, level: SimdLevel) -> KernelTile {
        match self {
            KernelRequest::F2 => KernelTile::F2,
            KernelRequest::F3 => KernelTile::F3,
            KernelRequest::Any if level.is_wide() => KernelTile::F3,
            KernelRequest::Any => KernelTile::F2,
        }
    }
}

impl KernelTile {
    pub fn shape(self, level: SimdLevel) -> TileShape {
        let lanes = level.f32_lanes();
        match self {
            KernelTile::F2 => TileShape { mr: 6, nr: 2 * lanes },
            KernelTile::F3 => TileShape { mr: 4, nr: 3 * lanes },
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            KernelTile::F2 => "f2",
            KernelTile::F3 => "f3",
        }
    }
}

/// Elements needed to hold a `k x n` right-hand operand packed into panels of
/// `tile.nr` columns; the last panel is zero-padded.
#[inline]
pub fn packed_b_len(n: usize, k: usize, tile: TileShape) -> usize {
    k * n.div_ceil(tile.nr) * tile.nr
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_any() {
        assert_eq!(KernelRequest::Any.resolve(SimdLevel::Avx2), KernelTile::F3);
        assert_eq!(KernelRequest::Any.resolve(SimdLevel::Avx512), KernelTile::F3);
        assert_eq!(KernelRequest::Any.resolve(SimdLevel::Sse), KernelTile::F2);
        assert_eq!(KernelRequest::Any.resolve(SimdLevel::Neon), KernelTile::F2);
        assert_eq!(KernelRequest::F2.resolve(SimdLevel::Avx2), KernelTile::F2);
    }

    #[test]
    fn test_shapes() {
        assert_eq!(
            KernelTile::F2.shape(SimdLevel::Avx2),
            TileShape { mr: 6, nr: 16 }
        );
        assert_eq!(
            KernelTile::F3.shape(SimdLevel::Avx512),
            TileShape { mr: 4, nr: 48 }
        );
        assert_eq!(KernelTile::F3.shape(SimdLevel::Neon), TileShape { mr: 4, nr: 12 });
    }

    #[test]
    fn test_packed_len_monotonic_and_padded() {
        let tile = TileShape { mr: 6, nr: 8 };
        assert_eq!(packed_b_len(0, 5, tile), 0);
        assert_eq!(packed_b_len(1, 5, tile), 40);
        assert_eq!(packed_b_len(8, 5, tile), 40);
        assert_eq!(packed_b_len(9, 5, tile), 80);
        let mut prev = 0;
        for n in 0..50 {
            let len = packed_b_len(n, 3, tile);
            assert!(len >= prev);
            assert!(len >= 3 * n);
            prev = len;
        }
    }
}
