//! Backend selection for the codec's inner loops.
//!
//! The active backend is probed once from CPU features and cached; every
//! backend must produce bit-identical output to `scalar`, since the content
//! file's checksums are computed over parity written by whichever backend
//! happened to run.

pub mod scalar;

#[cfg(target_arch = "x86_64")]
mod sse2;
#[cfg(target_arch = "x86_64")]
mod ssse3;

use std::sync::OnceLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Scalar,
    #[cfg(target_arch = "x86_64")]
    Sse2,
    #[cfg(target_arch = "x86_64")]
    Ssse3,
}

static BACKEND: OnceLock<Backend> = OnceLock::new();

fn probe() -> Backend {
    #[cfg(target_arch = "x86_64")]
    {
        if is_x86_feature_detected!("ssse3") {
            return Backend::Ssse3;
        }
        if is_x86_feature_detected!("sse2") {
            return Backend::Sse2;
        }
    }
    Backend::Scalar
}

/// The backend this process will use for the remainder of its lifetime.
pub fn backend() -> Backend {
    *BACKEND.get_or_init(probe)
}

/// XORs `src` into `dst`, used for the all-ones parity row and as the final
/// step of every row's accumulation.
pub fn xor_into(dst: &mut [u8], src: &[u8]) {
    match backend() {
        #[cfg(target_arch = "x86_64")]
        Backend::Ssse3 | Backend::Sse2 => unsafe { sse2::xor_into(dst, src) },
        Backend::Scalar => scalar::xor_into(dst, src),
    }
}

/// Doubles `acc` in place in GF(2^8): the RAID6-style row-1 recurrence.
pub fn double_inplace(acc: &mut [u8]) {
    match backend() {
        #[cfg(target_arch = "x86_64")]
        Backend::Ssse3 | Backend::Sse2 => unsafe { sse2::double_inplace(acc) },
        Backend::Scalar => scalar::double_inplace(acc),
    }
}

/// Multiplies `coeff` into every byte of `data` and XOR-accumulates into `acc`.
/// Used for Cauchy parity rows (levels 2 and up) and for recovery's coefficient
/// application.
pub fn mul_acc(coeff: u8, data: &[u8], acc: &mut [u8]) {
    match backend() {
        #[cfg(target_arch = "x86_64")]
        Backend::Ssse3 => unsafe { ssse3::mul_acc(coeff, data, acc) },
        #[cfg(target_arch = "x86_64")]
        Backend::Sse2 => scalar::mul_acc(coeff, data, acc),
        Backend::Scalar => scalar::mul_acc(coeff, data, acc),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn xor_into_matches_scalar_for_unaligned_lengths() {
        for len in [0usize, 1, 15, 16, 17, 31, 32, 33, 200] {
            let src: Vec<u8> = (0..len).map(|i| (i * 7 + 3) as u8).collect();
            let mut a = vec![0xAAu8; len];
            let mut b = a.clone();
            xor_into(&mut a, &src);
            scalar::xor_into(&mut b, &src);
            assert_eq!(a, b, "len={len}");
        }
    }

    #[test]
    fn double_inplace_matches_scalar_for_unaligned_lengths() {
        for len in [0usize, 1, 15, 16, 17, 31, 32, 33, 200] {
            let mut a: Vec<u8> = (0..len).map(|i| (i * 11 + 5) as u8).collect();
            let mut b = a.clone();
            double_inplace(&mut a);
            scalar::double_inplace(&mut b);
            assert_eq!(a, b, "len={len}");
        }
    }

    #[test]
    fn mul_acc_matches_scalar_for_unaligned_lengths() {
        for coeff in [1u8, 2, 9, 200] {
            for len in [0usize, 1, 15, 16, 17, 31, 32, 33, 200] {
                let data: Vec<u8> = (0..len).map(|i| (i * 13 + 1) as u8).collect();
                let mut a = vec![0x55u8; len];
                let mut b = a.clone();
                mul_acc(coeff, &data, &mut a);
                scalar::mul_acc(coeff, &data, &mut b);
                assert_eq!(a, b, "coeff={coeff} len={len}");
            }
        }
    }
}
