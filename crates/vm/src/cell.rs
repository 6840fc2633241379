//! The 32-bit cell, universal slot of stacks, locals, and object payloads.
//!
//! Two-word values occupy two adjacent cells with the low word at the lower
//! index. That ordering is fixed for the whole VM; stacks, locals, constant
//! pools, and instance payloads all agree on it.

/// One machine word.
pub type Cell = u32;

/// Number of cells occupied by a `long` or `double`.
pub const TWO_WORD_CELLS: usize = 2;

/// Reinterprets an `i32` as a cell.
#[inline]
pub fn cell_from_i32(value: i32) -> Cell {
    value as u32
}

/// Reinterprets a cell as an `i32`.
#[inline]
pub fn cell_to_i32(cell: Cell) -> i32 {
    cell as i32
}

/// Reinterprets an `f32` as a cell.
#[inline]
pub fn cell_from_f32(value: f32) -> Cell {
    value.to_bits()
}

/// Reinterprets a cell as an `f32`.
#[inline]
pub fn cell_to_f32(cell: Cell) -> f32 {
    f32::from_bits(cell)
}

/// Splits an `i64` into `(low, high)` cells.
#[inline]
pub fn cells_from_i64(value: i64) -> (Cell, Cell) {
    let bits = value as u64;
    (bits as u32, (bits >> 32) as u32)
}

/// Joins `(low, high)` cells into an `i64`.
#[inline]
pub fn cells_to_i64(low: Cell, high: Cell) -> i64 {
    (((high as u64) << 32) | low as u64) as i64
}

/// Splits an `f64` into `(low, high)` cells.
#[inline]
pub fn cells_from_f64(value: f64) -> (Cell, Cell) {
    let bits = value.to_bits();
    (bits as u32, (bits >> 32) as u32)
}

/// Joins `(low, high)` cells into an `f64`.
#[inline]
pub fn cells_to_f64(low: Cell, high: Cell) -> f64 {
    f64::from_bits(((high as u64) << 32) | low as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn i64_split_join_round_trip() {
        for v in [0i64, -1, i64::MIN, i64::MAX, 0x1234_5678_9ABC_DEF0] {
            let (low, high) = cells_from_i64(v);
            assert_eq!(cells_to_i64(low, high), v);
        }
    }

    #[test]
    fn low_word_is_at_the_lower_index() {
        let (low, high) = cells_from_i64(0x0000_0001_0000_0002);
        assert_eq!(low, 2);
        assert_eq!(high, 1);
    }

    #[test]
    fn f64_bits_survive() {
        for v in [0.0f64, -0.0, f64::INFINITY, 1.5e300] {
            let (low, high) = cells_from_f64(v);
            assert_eq!(cells_to_f64(low, high).to_bits(), v.to_bits());
        }
        let (low, high) = cells_from_f64(f64::NAN);
        assert!(cells_to_f64(low, high).is_nan());
    }

    #[test]
    fn f32_bits_survive() {
        for v in [0.0f32, -0.0, f32::INFINITY, f32::MIN_POSITIVE] {
            assert_eq!(cell_to_f32(cell_from_f32(v)).to_bits(), v.to_bits());
        }
        assert!(cell_to_f32(cell_from_f32(f32::NAN)).is_nan());
    }

    #[test]
    fn negative_int_reinterprets_losslessly() {
        assert_eq!(cell_to_i32(cell_from_i32(-7)), -7);
        assert_eq!(cell_to_i32(cell_from_i32(i32::MIN)), i32::MIN);
        assert_eq!(cell_from_i32(-1), u32::MAX);
    }

    #[test]
    fn two_word_width_matches_the_split() {
        let (low, high) = cells_from_i64(1);
        assert_eq!([low, high].len(), TWO_WORD_CELLS);
    }
}
