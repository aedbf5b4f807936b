//! PUSCH codebook precoding
//!
//! Precoding matrices from 3GPP TS 38.211 Section 6.3.1.5. Entries are
//! restricted to {0, ±1, ±j}, so each weight is a tagged variant applied
//! by sign flip or I/Q swap instead of a full complex multiply. The
//! common normalization factor is left to the transmit amplitude.

use ndarray::Array2;
use num_complex::Complex;

use crate::LayerError;

/// Codebook entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrecWeight {
    Zero,
    One,
    NegOne,
    PosJ,
    NegJ,
}

impl PrecWeight {
    /// Apply the weight to one resource element
    #[inline]
    pub fn apply(self, x: Complex<i16>) -> Complex<i16> {
        match self {
            PrecWeight::Zero => Complex::new(0, 0),
            PrecWeight::One => x,
            PrecWeight::NegOne => Complex::new(-x.re, -x.im),
            PrecWeight::PosJ => Complex::new(-x.im, x.re),
            PrecWeight::NegJ => Complex::new(x.im, -x.re),
        }
    }
}

use PrecWeight::{NegJ, NegOne, One, PosJ, Zero};

/// Precoding matrix as rows per antenna port, columns per layer
pub type PrecMatrix = Vec<Vec<PrecWeight>>;

/// Look up W for the given port count, layer count and TPMI.
///
/// The 2-port codebooks are complete; for 4 ports the non-coherent
/// subset is supported and coherent TPMIs are rejected.
pub fn precoding_matrix(
    num_ports: u8,
    num_layers: u8,
    tpmi: u8,
) -> Result<PrecMatrix, LayerError> {
    let w: PrecMatrix = match (num_ports, num_layers, tpmi) {
        // Table 6.3.1.5-1, one layer two ports
        (2, 1, 0) => vec![vec![One], vec![Zero]],
        (2, 1, 1) => vec![vec![Zero], vec![One]],
        (2, 1, 2) => vec![vec![One], vec![One]],
        (2, 1, 3) => vec![vec![One], vec![NegOne]],
        (2, 1, 4) => vec![vec![One], vec![PosJ]],
        (2, 1, 5) => vec![vec![One], vec![NegJ]],

        // Table 6.3.1.5-4, two layers two ports
        (2, 2, 0) => vec![vec![One, Zero], vec![Zero, One]],
        (2, 2, 1) => vec![vec![One, One], vec![One, NegOne]],
        (2, 2, 2) => vec![vec![One, One], vec![PosJ, NegJ]],

        // Table 6.3.1.5-2, one layer four ports, non-coherent TPMIs
        (4, 1, t @ 0..=3) => {
            let mut m = vec![vec![Zero]; 4];
            m[t as usize] = vec![One];
            m
        }

        // Table 6.3.1.5-5, two layers four ports, non-coherent TPMIs
        (4, 2, t @ 0..=5) => {
            let (p0, p1) = match t {
                0 => (0, 1),
                1 => (0, 2),
                2 => (0, 3),
                3 => (1, 2),
                4 => (1, 3),
                _ => (2, 3),
            };
            let mut m = vec![vec![Zero, Zero]; 4];
            m[p0][0] = One;
            m[p1][1] = One;
            m
        }

        // Table 6.3.1.5-6, three layers four ports, non-coherent TPMI
        (4, 3, 0) => {
            let mut m = vec![vec![Zero, Zero, Zero]; 4];
            m[0][0] = One;
            m[1][1] = One;
            m[2][2] = One;
            m
        }

        // Table 6.3.1.5-7, four layers four ports, non-coherent TPMI
        (4, 4, 0) => {
            let mut m = vec![vec![Zero, Zero, Zero, Zero]; 4];
            for (p, row) in m.iter_mut().enumerate() {
                row[p] = One;
            }
            m
        }

        _ => {
            return Err(LayerError::InvalidConfiguration(format!(
                "unsupported precoder: {} ports, {} layers, TPMI {}",
                num_ports, num_layers, tpmi
            )))
        }
    };
    Ok(w)
}

/// Precode the per-layer grids onto `num_ports` antenna-port grids.
///
/// TPMI 0 with as many layers as ports is the identity mapping and the
/// layer grids pass through unchanged.
pub fn precode(
    layer_grids: &[Array2<Complex<i16>>],
    num_ports: u8,
    tpmi: u8,
) -> Result<Vec<Array2<Complex<i16>>>, LayerError> {
    let num_layers = layer_grids.len() as u8;
    if num_layers == 0 {
        return Err(LayerError::InvalidState("no layer grids".into()));
    }

    if num_layers == num_ports && tpmi == 0 {
        return Ok(layer_grids.to_vec());
    }

    let w = precoding_matrix(num_ports, num_layers, tpmi)?;
    let shape = layer_grids[0].dim();
    let mut ports = Vec::with_capacity(num_ports as usize);
    for row in &w {
        let mut grid = Array2::<Complex<i16>>::zeros(shape);
        for (layer, weight) in layer_grids.iter().zip(row.iter()) {
            if *weight == Zero {
                continue;
            }
            for (dst, &src) in grid.iter_mut().zip(layer.iter()) {
                let v = weight.apply(src);
                *dst = Complex::new(dst.re.wrapping_add(v.re), dst.im.wrapping_add(v.im));
            }
        }
        ports.push(grid);
    }
    Ok(ports)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_weight_application() {
        let x = Complex::new(3i16, -4i16);
        assert_eq!(One.apply(x), x);
        assert_eq!(NegOne.apply(x), Complex::new(-3, 4));
        assert_eq!(PosJ.apply(x), Complex::new(4, 3));
        assert_eq!(NegJ.apply(x), Complex::new(-4, -3));
        assert_eq!(Zero.apply(x), Complex::new(0, 0));
    }

    #[test]
    fn test_identity_pass_through() {
        let grid = Array2::from_elem((2, 4), Complex::new(7i16, -2i16));
        let out = precode(&[grid.clone()], 1, 0).unwrap();
        assert_eq!(out[0], grid);
    }

    #[test]
    fn test_one_layer_two_ports_selection() {
        let grid = Array2::from_elem((1, 3), Complex::new(5i16, 1i16));
        // TPMI 1 puts the layer on port 1 only
        let out = precode(&[grid.clone()], 2, 1).unwrap();
        assert_eq!(out[0], Array2::zeros((1, 3)));
        assert_eq!(out[1], grid);
        // TPMI 4 rotates port 1 by j
        let out = precode(&[grid], 2, 4).unwrap();
        assert_eq!(out[1][(0, 0)], Complex::new(-1, 5));
    }

    #[test]
    fn test_two_layer_combining() {
        let l0 = Array2::from_elem((1, 1), Complex::new(10i16, 0i16));
        let l1 = Array2::from_elem((1, 1), Complex::new(3i16, 0i16));
        // TPMI 1: port0 = l0 + l1, port1 = l0 - l1
        let out = precode(&[l0, l1], 2, 1).unwrap();
        assert_eq!(out[0][(0, 0)], Complex::new(13, 0));
        assert_eq!(out[1][(0, 0)], Complex::new(7, 0));
    }

    #[test]
    fn test_coherent_four_port_rejected() {
        let grid = Array2::from_elem((1, 1), Complex::new(1i16, 0i16));
        assert!(precode(&[grid], 4, 12).is_err());
    }
}
