//! Soft demapping (LLR computation) for QAM constellations
//!
//! Max-log LLRs in i16 according to the recursive magnitude structure of
//! Gray-coded QAM: the amplitude bits of each axis are
//! `mag - |previous level|` with saturating arithmetic.
//!
//! The hot loops are written over fixed-size chunks of 8 and 4 resource
//! elements so the compiler can vectorize them; the chunk bodies perform
//! exactly the same i16 operations as the scalar tail, so the output is
//! bit-identical regardless of which path processed an element.
//!
//! Absolute values use `wrapping_abs`, matching the saturated SIMD
//! convention where |i16::MIN| stays i16::MIN.

use num_complex::Complex;

/// One amplitude-bit LLR: mag - |v|, saturated
#[inline]
fn mag_llr(mag: i16, v: i16) -> i16 {
    mag.saturating_sub(v.wrapping_abs())
}

/// QPSK: the received I/Q samples are the LLRs
pub fn qpsk_llr(rx: &[Complex<i16>]) -> Vec<i16> {
    let mut llr = Vec::with_capacity(rx.len() * 2);
    for re in rx {
        llr.push(re.re);
        llr.push(re.im);
    }
    llr
}

#[inline]
fn llr_16qam_re(rx: Complex<i16>, mag: Complex<i16>, out: &mut [i16]) {
    out[0] = rx.re;
    out[1] = rx.im;
    out[2] = mag_llr(mag.re, rx.re);
    out[3] = mag_llr(mag.im, rx.im);
}

#[inline]
fn llr_64qam_re(rx: Complex<i16>, mag: Complex<i16>, mag2: Complex<i16>, out: &mut [i16]) {
    let b2_re = mag_llr(mag.re, rx.re);
    let b2_im = mag_llr(mag.im, rx.im);
    out[0] = rx.re;
    out[1] = rx.im;
    out[2] = b2_re;
    out[3] = b2_im;
    out[4] = mag_llr(mag2.re, b2_re);
    out[5] = mag_llr(mag2.im, b2_im);
}

#[inline]
fn llr_256qam_re(
    rx: Complex<i16>,
    mag: Complex<i16>,
    mag2: Complex<i16>,
    mag3: Complex<i16>,
    out: &mut [i16],
) {
    let b2_re = mag_llr(mag.re, rx.re);
    let b2_im = mag_llr(mag.im, rx.im);
    let b4_re = mag_llr(mag2.re, b2_re);
    let b4_im = mag_llr(mag2.im, b2_im);
    out[0] = rx.re;
    out[1] = rx.im;
    out[2] = b2_re;
    out[3] = b2_im;
    out[4] = b4_re;
    out[5] = b4_im;
    out[6] = mag_llr(mag3.re, b4_re);
    out[7] = mag_llr(mag3.im, b4_im);
}

#[inline]
fn llr_16qam_chunk<const N: usize>(rx: &[Complex<i16>], mag: &[Complex<i16>], out: &mut [i16]) {
    for i in 0..N {
        llr_16qam_re(rx[i], mag[i], &mut out[4 * i..4 * i + 4]);
    }
}

#[inline]
fn llr_64qam_chunk<const N: usize>(
    rx: &[Complex<i16>],
    mag: &[Complex<i16>],
    mag2: &[Complex<i16>],
    out: &mut [i16],
) {
    for i in 0..N {
        llr_64qam_re(rx[i], mag[i], mag2[i], &mut out[6 * i..6 * i + 6]);
    }
}

#[inline]
fn llr_256qam_chunk<const N: usize>(
    rx: &[Complex<i16>],
    mag: &[Complex<i16>],
    mag2: &[Complex<i16>],
    mag3: &[Complex<i16>],
    out: &mut [i16],
) {
    for i in 0..N {
        llr_256qam_re(rx[i], mag[i], mag2[i], mag3[i], &mut out[8 * i..8 * i + 8]);
    }
}

/// 16QAM soft demapper: 4 LLRs per resource element.
///
/// `ch_mag` carries the per-element channel magnitude scaled to the
/// outer-bit decision boundary (2/sqrt(10) times the channel gain).
pub fn llr_16qam(rx: &[Complex<i16>], ch_mag: &[Complex<i16>]) -> Vec<i16> {
    let n = rx.len().min(ch_mag.len());
    let mut llr = vec![0i16; n * 4];

    let mut i = 0;
    while i + 8 <= n {
        llr_16qam_chunk::<8>(&rx[i..i + 8], &ch_mag[i..i + 8], &mut llr[4 * i..4 * (i + 8)]);
        i += 8;
    }
    while i + 4 <= n {
        llr_16qam_chunk::<4>(&rx[i..i + 4], &ch_mag[i..i + 4], &mut llr[4 * i..4 * (i + 4)]);
        i += 4;
    }
    while i < n {
        llr_16qam_re(rx[i], ch_mag[i], &mut llr[4 * i..4 * i + 4]);
        i += 1;
    }
    llr
}

/// 64QAM soft demapper: 6 LLRs per resource element.
pub fn llr_64qam(
    rx: &[Complex<i16>],
    ch_mag: &[Complex<i16>],
    ch_mag2: &[Complex<i16>],
) -> Vec<i16> {
    let n = rx.len().min(ch_mag.len()).min(ch_mag2.len());
    let mut llr = vec![0i16; n * 6];

    let mut i = 0;
    while i + 8 <= n {
        llr_64qam_chunk::<8>(
            &rx[i..i + 8],
            &ch_mag[i..i + 8],
            &ch_mag2[i..i + 8],
            &mut llr[6 * i..6 * (i + 8)],
        );
        i += 8;
    }
    while i + 4 <= n {
        llr_64qam_chunk::<4>(
            &rx[i..i + 4],
            &ch_mag[i..i + 4],
            &ch_mag2[i..i + 4],
            &mut llr[6 * i..6 * (i + 4)],
        );
        i += 4;
    }
    while i < n {
        llr_64qam_re(rx[i], ch_mag[i], ch_mag2[i], &mut llr[6 * i..6 * i + 6]);
        i += 1;
    }
    llr
}

/// 256QAM soft demapper: 8 LLRs per resource element.
pub fn llr_256qam(
    rx: &[Complex<i16>],
    ch_mag: &[Complex<i16>],
    ch_mag2: &[Complex<i16>],
    ch_mag3: &[Complex<i16>],
) -> Vec<i16> {
    let n = rx
        .len()
        .min(ch_mag.len())
        .min(ch_mag2.len())
        .min(ch_mag3.len());
    let mut llr = vec![0i16; n * 8];

    let mut i = 0;
    while i + 8 <= n {
        llr_256qam_chunk::<8>(
            &rx[i..i + 8],
            &ch_mag[i..i + 8],
            &ch_mag2[i..i + 8],
            &ch_mag3[i..i + 8],
            &mut llr[8 * i..8 * (i + 8)],
        );
        i += 8;
    }
    while i + 4 <= n {
        llr_256qam_chunk::<4>(
            &rx[i..i + 4],
            &ch_mag[i..i + 4],
            &ch_mag2[i..i + 4],
            &ch_mag3[i..i + 4],
            &mut llr[8 * i..8 * (i + 4)],
        );
        i += 4;
    }
    while i < n {
        llr_256qam_re(
            rx[i],
            ch_mag[i],
            ch_mag2[i],
            ch_mag3[i],
            &mut llr[8 * i..8 * i + 8],
        );
        i += 1;
    }
    llr
}
