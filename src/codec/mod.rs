//! The erasure-code kernel: parity generation and recovery over the matrix
//! defined in [`matrix`], dispatched through whichever SIMD backend
//! [`simd::backend`] picked for this process.
//!
//! Every public function here works over same-length byte buffers ("blocks").
//! Callers own the padding: a short final block must already be zero-extended
//! to `size` before it reaches `gen`, and a reconstructed block comes back
//! zero-extended the same way.

pub mod gf;
pub mod matrix;
pub mod simd;

use std::collections::HashSet;

/// Computes parity rows `0..level` over `data` and writes them into `parity`.
///
/// `parity[r]` is fully overwritten; callers don't need to zero it first.
/// Row 0 is plain XOR, row 1 is the doubling recurrence (`simd::double_inplace`),
/// and rows 2 and up apply the Cauchy coefficients from [`matrix::coeff`].
///
/// # Panics
/// Panics if `level` exceeds [`matrix::PARITY_MAX`], if `data.len()` exceeds
/// [`matrix::DATA_MAX`], if `parity.len() != level`, or if any buffer is
/// shorter than `size`.
pub fn gen(level: usize, size: usize, data: &[&[u8]], parity: &mut [&mut [u8]]) {
    assert!(level <= matrix::PARITY_MAX, "level {level} exceeds PARITY_MAX");
    assert!(
        data.len() <= matrix::DATA_MAX,
        "data column count {} exceeds DATA_MAX",
        data.len()
    );
    assert_eq!(parity.len(), level, "one parity buffer per level");
    for buf in data.iter() {
        assert!(buf.len() >= size);
    }
    for buf in parity.iter() {
        assert!(buf.len() >= size);
    }

    if level >= 1 {
        for b in parity[0][..size].iter_mut() {
            *b = 0;
        }
        for d in data.iter() {
            simd::xor_into(&mut parity[0][..size], &d[..size]);
        }
    }

    if level >= 2 {
        for b in parity[1][..size].iter_mut() {
            *b = 0;
        }
        // Horner's method in GF(2^8): folds in the highest-indexed column
        // first so each step is one double plus one XOR, rather than a
        // fresh coefficient multiply per column.
        for d in data.iter().rev() {
            simd::double_inplace(&mut parity[1][..size]);
            simd::xor_into(&mut parity[1][..size], &d[..size]);
        }
    }

    for row in 2..level {
        for b in parity[row][..size].iter_mut() {
            *b = 0;
        }
        for (col, d) in data.iter().enumerate() {
            let coeff = matrix::coeff(row, col);
            simd::mul_acc(coeff, &d[..size], &mut parity[row][..size]);
        }
    }
}

/// Reconstructs the data columns named by `d_idx` using the parity rows named
/// by `c_idx`, given every other (surviving) data column and the stored
/// parity for the rows in `c_idx`.
///
/// `d_idx` and `c_idx` must have equal length `r` (the number of simultaneous
/// failures being repaired); `r` must not exceed `level`. Surviving data
/// columns (any index not in `d_idx`) must hold valid content; columns named
/// in `d_idx` are overwritten with their recovered content and may start out
/// in any state.
///
/// Implements the standard Reed-Solomon recovery: build the `r x r` submatrix
/// of coefficients relating the chosen parity rows to the missing columns,
/// invert it, subtract (XOR) the surviving columns' contribution out of the
/// stored parity to get the "effective" parity for an all-zero-elsewhere
/// system, then multiply through by the inverse to solve for the missing
/// columns.
///
/// # Panics
/// Panics if `d_idx.len() != c_idx.len()`, if that length exceeds `level`, if
/// `c_idx` or `d_idx` contain an out-of-range or duplicate index, or if any
/// buffer is shorter than `size`.
pub fn recov(
    level: usize,
    size: usize,
    d_idx: &[usize],
    c_idx: &[usize],
    data: &mut [&mut [u8]],
    parity: &[&[u8]],
) {
    let r = d_idx.len();
    assert_eq!(c_idx.len(), r, "one parity row per missing data column");
    assert!(r <= level, "more missing columns than available parity rows");
    assert_eq!(parity.len(), level);
    assert!(c_idx.iter().all(|&c| c < level));
    assert!(d_idx.iter().all(|&d| d < data.len()));
    assert_eq!(
        d_idx.iter().collect::<HashSet<_>>().len(),
        r,
        "d_idx must not repeat an index"
    );
    assert_eq!(
        c_idx.iter().collect::<HashSet<_>>().len(),
        r,
        "c_idx must not repeat a parity row"
    );
    for buf in parity.iter() {
        assert!(buf.len() >= size);
    }
    for buf in data.iter() {
        assert!(buf.len() >= size);
    }

    if r == 0 {
        return;
    }

    let missing: HashSet<usize> = d_idx.iter().copied().collect();

    let sub: Vec<Vec<u8>> = c_idx
        .iter()
        .map(|&row| d_idx.iter().map(|&col| matrix::coeff(row, col)).collect())
        .collect();
    let inv = matrix::invert(sub);

    // Effective parity: the stored parity row with every surviving data
    // column's contribution XORed back out, leaving only the missing
    // columns' unknown contribution.
    let mut eff: Vec<Vec<u8>> = c_idx.iter().map(|&row| parity[row][..size].to_vec()).collect();
    for (i, &row) in c_idx.iter().enumerate() {
        for (col, d) in data.iter().enumerate() {
            if missing.contains(&col) {
                continue;
            }
            let coeff = matrix::coeff(row, col);
            simd::mul_acc(coeff, &d[..size], &mut eff[i]);
        }
    }

    for (j, &col) in d_idx.iter().enumerate() {
        let buf = &mut data[col][..size];
        for b in buf.iter_mut() {
            *b = 0;
        }
        for (i, e) in eff.iter().enumerate() {
            let coeff = inv[j][i];
            if coeff == 0 {
                continue;
            }
            simd::mul_acc(coeff, e, buf);
        }
    }
}
