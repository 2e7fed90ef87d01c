//! Closed-form Green's kernels for every unbounded/spectral combination.
//!
//! Sign convention: the kernels solve `lap(G) = delta`, so the free-space 3-D
//! kernel is `-1/(4 pi r)` and the fully spectral one is `-1/k^2`. The
//! regularized family replaces the point source by a Gaussian of width `eps`
//! (order 2) plus polynomial corrections (orders 4 and 6); their closed forms
//! follow from solving the radial Poisson problem for the mollified source.

use std::f64::consts::PI;

use statrs::function::erf::{erf, erfc};

use crate::special::{bessel_k0, expint_e1, EULER_GAMMA};
use crate::types::GreenKind;

const ONE_O_4PI: f64 = 1.0 / (4.0 * PI);
const ONE_O_2PI: f64 = 1.0 / (2.0 * PI);

/// Fully unbounded 3-D kernel at separation `r`.
///
/// `h` regularizes the singular kernel at `r = 0` (the Gaussian limit with
/// `sigma = h/sqrt(2)`); `eps` is the regularization length of the smoothed
/// family.
pub fn unbounded_3d(kind: GreenKind, r: f64, h: f64, eps: f64) -> f64 {
    let sqrt_2opi = (2.0 / PI).sqrt();
    match kind {
        GreenKind::Chat2 => {
            if r == 0.0 {
                -ONE_O_4PI * 2.0 / (PI.sqrt() * h)
            } else {
                -ONE_O_4PI / r
            }
        }
        GreenKind::Hej2 => {
            let rho = r / eps;
            if r == 0.0 {
                -ONE_O_4PI * sqrt_2opi / eps
            } else {
                -ONE_O_4PI / r * erf(rho * std::f64::consts::FRAC_1_SQRT_2)
            }
        }
        GreenKind::Hej4 => {
            let rho = r / eps;
            let gauss = (-0.5 * rho * rho).exp();
            if r == 0.0 {
                -ONE_O_4PI * 3.0 / ((2.0 * PI).sqrt() * eps)
            } else {
                -ONE_O_4PI / r
                    * (erf(rho * std::f64::consts::FRAC_1_SQRT_2)
                        + rho / (2.0 * PI).sqrt() * gauss)
            }
        }
        GreenKind::Hej6 => {
            let rho = r / eps;
            let gauss = (-0.5 * rho * rho).exp();
            if r == 0.0 {
                -ONE_O_4PI * 15.0 / (4.0 * (2.0 * PI).sqrt() * eps)
            } else {
                -ONE_O_4PI / r
                    * (erf(rho * std::f64::consts::FRAC_1_SQRT_2)
                        + (1.75 * rho - 0.25 * rho * rho * rho) / (2.0 * PI).sqrt() * gauss)
            }
        }
        GreenKind::Lgf2 => unreachable!("the lattice kernel is tabulated, not closed form"),
    }
}

/// Two unbounded directions at in-plane separation `r`, zero wavenumber along
/// the spectral direction: the 2-D logarithmic kernel.
pub fn unbounded_2d_k0(kind: GreenKind, r: f64, h: f64, eps: f64) -> f64 {
    match kind {
        GreenKind::Chat2 => {
            if r == 0.0 {
                // average of ln over the area-equivalent disk of one cell
                ONE_O_2PI * ((h / PI.sqrt()).ln() - 0.5)
            } else {
                ONE_O_2PI * r.ln()
            }
        }
        GreenKind::Hej2 | GreenKind::Hej4 | GreenKind::Hej6 => {
            let rho = r / eps;
            let rho2 = rho * rho;
            let gauss = (-0.5 * rho2).exp();
            let base = if r == 0.0 {
                ONE_O_2PI * ((std::f64::consts::SQRT_2 * eps).ln() - 0.5 * EULER_GAMMA)
            } else {
                ONE_O_2PI * (r.ln() + 0.5 * expint_e1(0.5 * rho2))
            };
            match kind {
                GreenKind::Hej2 => base,
                GreenKind::Hej4 => base - ONE_O_4PI * gauss,
                GreenKind::Hej6 => base - (6.0 - rho2) / (16.0 * PI) * gauss,
                _ => unreachable!(),
            }
        }
        GreenKind::Lgf2 => {
            unreachable!("one spectral direction with the lattice kernel is rejected at validation")
        }
    }
}

/// Two unbounded directions at in-plane separation `r` and wavenumber `k`
/// along the spectral direction: the screened 2-D kernel.
///
/// The regularized family is only required on the `k = 0` plane (the rest of
/// the spectrum is rewritten from the fully spectral formula), so all kinds
/// share the modified-Bessel form here.
pub fn unbounded_2d(r: f64, k: f64, h: f64) -> f64 {
    let r_eq = h / PI.sqrt();
    -ONE_O_2PI * bessel_k0(k * r.max(r_eq))
}

/// One unbounded direction at distance `x`, zero total wavenumber in the
/// spectral plane.
pub fn unbounded_1d_k0(kind: GreenKind, x: f64, eps: f64) -> f64 {
    match kind {
        GreenKind::Chat2 => 0.5 * x.abs(),
        GreenKind::Hej2 | GreenKind::Hej4 | GreenKind::Hej6 => {
            let rho = x / eps;
            let rho2 = rho * rho;
            let gauss = (-0.5 * rho2).exp();
            let base = 0.5 * x * erf(rho * std::f64::consts::FRAC_1_SQRT_2)
                + eps / (2.0 * PI).sqrt() * gauss;
            match kind {
                GreenKind::Hej2 => base,
                GreenKind::Hej4 => base - eps / (2.0 * (2.0 * PI).sqrt()) * gauss,
                GreenKind::Hej6 => base - eps * (5.0 - rho2) / (8.0 * (2.0 * PI).sqrt()) * gauss,
                _ => unreachable!(),
            }
        }
        GreenKind::Lgf2 => unreachable!("the lattice kernel path is dispatched separately"),
    }
}

/// One unbounded direction at distance `x` and total spectral wavenumber `k`.
pub fn unbounded_1d(kind: GreenKind, x: f64, k: f64, eps: f64) -> f64 {
    match kind {
        GreenKind::Chat2 => -(-k * x.abs()).exp() / (2.0 * k),
        GreenKind::Hej2 | GreenKind::Hej4 | GreenKind::Hej6 => {
            // Gaussian-smoothed screened kernel; the higher-order corrections
            // vanish off the zero plane at the accuracy of the smoothing
            let s = eps * std::f64::consts::FRAC_1_SQRT_2;
            let a = k * s;
            -0.25 / k * (exp_erfc(k * x, a + x / (2.0 * s)) + exp_erfc(-k * x, a - x / (2.0 * s)))
        }
        GreenKind::Lgf2 => unreachable!("the lattice kernel path is dispatched separately"),
    }
}

/// Symbol of the second-order finite-difference Laplacian at wavenumbers `k`.
pub fn discrete_symbol(k: &[f64; 3], h: &[f64; 3]) -> f64 {
    let mut sym = 0.0;
    for d in 0..3 {
        let s = 2.0 / h[d] * (0.5 * k[d] * h[d]).sin();
        sym += s * s;
    }
    sym
}

/// One unbounded direction of the lattice kernel at `n` grid spacings and
/// screening `k2` (the discrete symbol of the spectral plane): the exact
/// solution of the screened second difference.
pub fn lgf_1d(n: f64, k2: f64, h: f64) -> f64 {
    if k2 == 0.0 {
        // the free 1-D lattice kernel coincides with the continuum one
        0.5 * n * h
    } else {
        let mu = (1.0 + 0.5 * k2 * h * h).acosh();
        -h * (-mu * n).exp() / (2.0 * mu.sinh())
    }
}

/// Fully spectral lattice kernel: inverse symbol of the finite-difference
/// Laplacian; the zero mode is left at zero.
pub fn spectral_lgf(k: &[f64; 3], h: &[f64; 3]) -> f64 {
    let sym = discrete_symbol(k, h);
    if sym == 0.0 {
        0.0
    } else {
        -1.0 / sym
    }
}

/// `exp(e) * erfc(z)` without overflow: for large `z` the product collapses
/// to a bounded exponent.
fn exp_erfc(e: f64, z: f64) -> f64 {
    if z > 6.0 {
        (e - z * z).exp() / (z * PI.sqrt())
    } else {
        e.exp() * erfc(z)
    }
}

/// Fully spectral kernel `-1/k^2`; the zero mode is left at zero.
pub fn spectral(k2: f64) -> f64 {
    if k2 == 0.0 {
        0.0
    } else {
        -1.0 / k2
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_unbounded_3d_matches_free_space_far_away() {
        let h = 0.01;
        let eps = 0.02;
        for kind in [GreenKind::Chat2, GreenKind::Hej2, GreenKind::Hej4, GreenKind::Hej6] {
            let g = unbounded_3d(kind, 1.0, h, eps);
            assert!(
                (g + ONE_O_4PI).abs() < 1e-12,
                "{:?}: {} vs {}",
                kind,
                g,
                -ONE_O_4PI
            );
        }
    }

    #[test]
    fn test_unbounded_3d_finite_at_origin() {
        let h = 0.01;
        let eps = 0.02;
        for kind in [GreenKind::Chat2, GreenKind::Hej2, GreenKind::Hej4, GreenKind::Hej6] {
            let g0 = unbounded_3d(kind, 0.0, h, eps);
            assert!(g0.is_finite() && g0 < 0.0, "{:?}: {}", kind, g0);
            // the regularized kernels approach their origin limit smoothly
            if kind != GreenKind::Chat2 {
                let g_small = unbounded_3d(kind, 1e-8, h, eps);
                assert!((g_small - g0).abs() < 1e-6 * g0.abs());
            }
        }
    }

    #[test]
    fn test_spectral_kernel() {
        assert_eq!(spectral(0.0), 0.0);
        assert_eq!(spectral(4.0), -0.25);
    }

    #[test]
    fn test_unbounded_1d_limits() {
        // chat kernel: |x|/2 at k = 0, exponential decay otherwise
        assert_eq!(unbounded_1d_k0(GreenKind::Chat2, 2.0, 0.1), 1.0);
        let g = unbounded_1d(GreenKind::Chat2, 1.0, 2.0, 0.1);
        assert!((g + (-2.0f64).exp() / 4.0).abs() < 1e-14);
        // the regularized kernel approaches the singular one for eps -> 0
        let gr = unbounded_1d(GreenKind::Hej2, 1.0, 2.0, 1e-4);
        assert!((gr - g).abs() < 1e-8);
    }

    #[test]
    fn test_lgf_1d_limits() {
        // no screening: the 1-D lattice kernel coincides with the continuum
        assert_eq!(lgf_1d(4.0, 0.0, 0.25), 0.5);
        // fine grids approach the continuum screened kernel
        let h = 1e-3;
        let k = 2.0;
        let x = 1.0;
        let g = lgf_1d(x / h, k * k, h);
        assert!((g + (-k * x).exp() / (2.0 * k)).abs() < 1e-5, "{}", g);
    }

    #[test]
    fn test_spectral_lgf_limits() {
        // zero mode stays zero
        assert_eq!(spectral_lgf(&[0.0; 3], &[0.1; 3]), 0.0);
        // small kh: the discrete symbol approaches k^2
        let g = spectral_lgf(&[0.5, 0.0, 0.0], &[1e-4; 3]);
        assert!((g + 4.0).abs() < 1e-4, "{}", g);
    }

    #[test]
    fn test_unbounded_2d_k0_regularized_far_field() {
        let h = 0.01;
        let eps = 0.02;
        let log_kernel = unbounded_2d_k0(GreenKind::Chat2, 0.5, h, eps);
        for kind in [GreenKind::Hej2, GreenKind::Hej4, GreenKind::Hej6] {
            let g = unbounded_2d_k0(kind, 0.5, h, eps);
            assert!((g - log_kernel).abs() < 1e-12, "{:?}", kind);
        }
    }
}
