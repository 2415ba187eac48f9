//! SSE2 kernels for parity levels 0 and 1 (XOR parity and the RAID6-style Q
//! double-and-fix).

use core::arch::x86_64::*;

#[target_feature(enable = "sse2")]
pub unsafe fn xor_into(dst: &mut [u8], src: &[u8]) {
    let len = dst.len().min(src.len());
    let chunks = len / 16;
    unsafe {
        for i in 0..chunks {
            let off = i * 16;
            let d = _mm_loadu_si128(dst.as_ptr().add(off) as *const __m128i);
            let s = _mm_loadu_si128(src.as_ptr().add(off) as *const __m128i);
            let r = _mm_xor_si128(d, s);
            _mm_storeu_si128(dst.as_mut_ptr().add(off) as *mut __m128i, r);
        }
    }
    let rem = chunks * 16;
    super::scalar::xor_into(&mut dst[rem..len], &src[rem..len]);
}

#[target_feature(enable = "sse2")]
pub unsafe fn double_inplace(acc: &mut [u8]) {
    let len = acc.len();
    let chunks = len / 16;
    unsafe {
        let zero = _mm_setzero_si128();
        let poly = _mm_set1_epi8(0x1Du8 as i8);
        for i in 0..chunks {
            let off = i * 16;
            let v = _mm_loadu_si128(acc.as_ptr().add(off) as *const __m128i);
            // 0xFF lanes where the input byte's high bit is set (signed < 0).
            let carry = _mm_cmpgt_epi8(zero, v);
            let shifted = _mm_add_epi8(v, v);
            let fix = _mm_and_si128(carry, poly);
            let r = _mm_xor_si128(shifted, fix);
            _mm_storeu_si128(acc.as_mut_ptr().add(off) as *mut __m128i, r);
        }
    }
    let rem = chunks * 16;
    super::scalar::double_inplace(&mut acc[rem..]);
}
