//! Shared helpers for operand validation.

use crate::{GemmError, Result};

/// Number of elements a row-major `rows x cols` matrix with leading
/// dimension `ld` spans.
#[inline]
pub fn required_len(rows: usize, cols: usize, ld: usize) -> usize {
    if rows == 0 || cols == 0 {
        0
    } else {
        (rows - 1) * ld + cols
    }
}

/// Check that `len` elements can hold a row-major `rows x cols` matrix with
/// leading dimension `ld`.
pub fn check_matrix(
    operand: &'static str,
    len: usize,
    rows: usize,
    cols: usize,
    ld: usize,
) -> Result<()> {
    if rows > 0 && cols > ld {
        return Err(GemmError::LeadingDimension { operand, ld, cols });
    }
    let needed = required_len(rows, cols, ld);
    if len < needed {
        return Err(GemmError::OperandTooShort {
            operand,
            needed,
            len,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_required_len() {
        assert_eq!(required_len(0, 5, 5), 0);
        assert_eq!(required_len(3, 0, 5), 0);
        assert_eq!(required_len(1, 4, 10), 4);
        assert_eq!(required_len(3, 4, 10), 24);
    }

    #[test]
    fn test_check_matrix() {
        assert!(check_matrix("a", 12, 3, 4, 4).is_ok());
        assert_eq!(
            check_matrix("a", 11, 3, 4, 4),
            Err(GemmError::OperandTooShort {
                operand: "a",
                needed: 12,
                len: 11
            })
        );
        assert_eq!(
            check_matrix("b", 100, 3, 4, 2),
            Err(GemmError::LeadingDimension {
                operand: "b",
                ld: 2,
                cols: 4
            })
        );
        assert!(check_matrix("c", 0, 0, 4, 0).is_ok());
    }
}
