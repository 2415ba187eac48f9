//! SSSE3 kernel for parity levels 2 and up: a `pshufb` nibble-split multiply,
//! the same table layout `gf::split_tables` produces for the scalar path.

use core::arch::x86_64::*;

use crate::codec::gf;

#[target_feature(enable = "ssse3")]
pub unsafe fn mul_acc(coeff: u8, data: &[u8], acc: &mut [u8]) {
    let (lo_tab, hi_tab) = gf::split_tables(coeff);
    let len = data.len().min(acc.len());
    let chunks = len / 16;
    unsafe {
        let lo_shuf = _mm_loadu_si128(lo_tab.as_ptr() as *const __m128i);
        let hi_shuf = _mm_loadu_si128(hi_tab.as_ptr() as *const __m128i);
        let mask0f = _mm_set1_epi8(0x0F);
        for i in 0..chunks {
            let off = i * 16;
            let d = _mm_loadu_si128(data.as_ptr().add(off) as *const __m128i);
            let lo_idx = _mm_and_si128(d, mask0f);
            // Arithmetic-shift the 16-bit lanes right by 4, then mask to 0x0F:
            // the shift mixes adjacent bytes, but ANDing away the contaminated
            // top nibble leaves exactly this byte's own high nibble behind.
            let hi_idx = _mm_and_si128(_mm_srai_epi16(d, 4), mask0f);
            let lo_val = _mm_shuffle_epi8(lo_shuf, lo_idx);
            let hi_val = _mm_shuffle_epi8(hi_shuf, hi_idx);
            let contrib = _mm_xor_si128(lo_val, hi_val);
            let a = _mm_loadu_si128(acc.as_ptr().add(off) as *const __m128i);
            let r = _mm_xor_si128(a, contrib);
            _mm_storeu_si128(acc.as_mut_ptr().add(off) as *mut __m128i, r);
        }
    }
    let rem = chunks * 16;
    super::scalar::mul_acc(coeff, &data[rem..len], &mut acc[rem..len]);
}
