//! Assembly of the Green's function.
//!
//! During setup the Green's function is filled in the least-transformed Green
//! topology from a closed-form kernel, carried through the Green transposes
//! and transforms to the final spectral layout, scaled by the accumulated
//! volume factor, and (for the regularized two-unbounded case) patched off
//! the zero-plane with the fully spectral formula.

pub mod kernels;
pub mod lgf;

use rayon::prelude::*;

use crate::indexing::{collapsed_index, fold_index};
use crate::topology::Topology;
use crate::transform::TransformPlan;
use crate::types::{GreenKind, SendPtrMut};

/// Per-direction spectral data gathered from the Green plans.
#[derive(Debug, Clone, Copy)]
pub struct SpectralInfo {
    /// Whether the direction's transform is absorbed into the kernel.
    pub is_spectral: [bool; 3],
    /// Index-to-position factor (zero for spectral or trivial directions).
    pub hfact: [f64; 3],
    /// Index-to-wavenumber factor (zero for spatial directions).
    pub kfact: [f64; 3],
    /// Wavenumber offset.
    pub koffset: [f64; 3],
    /// Symmetry fold point.
    pub symstart: [f64; 3],
}

impl SpectralInfo {
    /// Collect the kernel-facing data of the (sorted) Green plans.
    pub fn of_plans(plans: &[TransformPlan; 3], h: [f64; 3], ndim: usize) -> Self {
        let mut info = Self {
            is_spectral: [false; 3],
            hfact: [0.0; 3],
            kfact: [0.0; 3],
            koffset: [0.0; 3],
            symstart: [0.0; 3],
        };
        for plan in plans.iter().take(ndim) {
            let dim = plan.dim();
            info.is_spectral[dim] = plan.is_spectral();
            info.symstart[dim] = plan.symstart();
            info.hfact[dim] = h[dim];
            if plan.is_spectral() {
                info.hfact[dim] = 0.0;
                info.kfact[dim] = plan.kfact();
                info.koffset[dim] = plan.koffset();
            }
            if plan.kind() == crate::transform::PlanKind::Empty {
                info.hfact[dim] = 0.0;
            }
        }
        info
    }

    /// Number of spectral directions among the first `ndim`.
    pub fn count_spectral(&self, plans: &[TransformPlan; 3], ndim: usize) -> usize {
        plans
            .iter()
            .take(ndim)
            .filter(|p| self.is_spectral[p.dim()])
            .count()
    }
}

/// Fill the Green buffer in `topo` from the closed-form kernel.
///
/// `n_unbounded` selects the kernel dimensionality; `eps` is the
/// regularization length of the smoothed family and `h` the grid spacing
/// (used to regularize singular kernels at the origin).
pub fn fill_green(
    topo: &Topology,
    info: &SpectralInfo,
    n_unbounded: usize,
    kind: GreenKind,
    eps: f64,
    h: [f64; 3],
    data: &mut [f64],
) -> Result<(), std::io::Error> {
    // only the fully unbounded lattice kernel is pretabulated; the mixed and
    // fully spectral cases have closed forms
    let lgf = if kind == GreenKind::Lgf2 && n_unbounded == 3 {
        Some(lgf::LgfTable::load(3)?)
    } else {
        None
    };

    let ax0 = topo.axis();
    let ax1 = (ax0 + 1) % 3;
    let ax2 = (ax0 + 2) % 3;
    let nf = topo.nf();
    let nmem = topo.nmem_all();
    let nloc0 = topo.nloc(ax0);
    let nloc1 = topo.nloc(ax1);
    let istart = topo.start_global_all();
    let onmax = topo.nloc(ax1) * topo.nloc(ax2);
    let h_reg = h[0];

    let ptr = SendPtrMut::new(data);
    let info = *info;
    let lgf_ref = lgf.as_ref();

    (0..onmax).into_par_iter().for_each(|io| {
        let mut ids = [0f64; 3];
        let i1 = io % nloc1;
        let i2 = io / nloc1;
        for i0 in 0..nloc0 {
            ids[ax0] = (istart[ax0] + i0) as f64;
            ids[ax1] = (istart[ax1] + i1) as f64;
            ids[ax2] = (istart[ax2] + i2) as f64;

            // fold the reflective extension back onto the principal domain
            let mut r2 = 0.0;
            let mut k2 = 0.0;
            let mut x_single = 0.0;
            let mut n_single = 0.0;
            let mut kvec = [0f64; 3];
            let mut folded = [0f64; 3];
            for d in 0..3 {
                folded[d] = fold_index(ids[d], info.symstart[d]);
                let x = folded[d].abs() * info.hfact[d];
                r2 += x * x;
                if info.hfact[d] != 0.0 {
                    x_single = x;
                    n_single = folded[d].abs();
                }
                kvec[d] = (folded[d] + info.koffset[d]) * info.kfact[d];
                k2 += kvec[d] * kvec[d];
            }
            let r = r2.sqrt();
            let kk = k2.sqrt();

            let value = match n_unbounded {
                3 => {
                    if let Some(table) = lgf_ref {
                        let disp = [
                            folded[0].abs() as usize,
                            folded[1].abs() as usize,
                            folded[2].abs() as usize,
                        ];
                        -table.value(disp) / h_reg
                    } else {
                        kernels::unbounded_3d(kind, r, h_reg, eps)
                    }
                }
                2 => {
                    if kk == 0.0 {
                        kernels::unbounded_2d_k0(kind, r, h_reg, eps)
                    } else {
                        kernels::unbounded_2d(r, kk, h_reg)
                    }
                }
                1 => {
                    if kind == GreenKind::Lgf2 {
                        kernels::lgf_1d(n_single, kernels::discrete_symbol(&kvec, &h), h_reg)
                    } else if kk == 0.0 {
                        kernels::unbounded_1d_k0(kind, x_single, eps)
                    } else {
                        kernels::unbounded_1d(kind, x_single, kk, eps)
                    }
                }
                0 => {
                    if kind == GreenKind::Lgf2 {
                        kernels::spectral_lgf(&kvec, &h)
                    } else {
                        kernels::spectral(k2)
                    }
                }
                _ => unreachable!("at most three unbounded directions"),
            };

            let id = collapsed_index(ax0, i0, io, &nmem, nf);
            unsafe {
                *ptr.raw.add(id) = value;
                if nf == 2 {
                    *ptr.raw.add(id + 1) = 0.0;
                }
            }
        }
    });
    Ok(())
}

/// Rewrite the buffer with the fully spectral kernel, skipping the zero
/// plane of every direction flagged in `skip_zero`.
///
/// Used after the forward transform of the regularized two-unbounded case,
/// where the smoothed kernel is only accurate on the spectral direction's
/// zero plane.
pub fn fill_spectral_patch(
    topo: &Topology,
    kfact: [f64; 3],
    koffset: [f64; 3],
    symstart: [f64; 3],
    skip_zero: [bool; 3],
    data: &mut [f64],
) {
    let ax0 = topo.axis();
    let ax1 = (ax0 + 1) % 3;
    let ax2 = (ax0 + 2) % 3;
    let nf = topo.nf();
    let nmem = topo.nmem_all();
    let nloc0 = topo.nloc(ax0);
    let nloc1 = topo.nloc(ax1);
    let istart = topo.start_global_all();
    let onmax = topo.nloc(ax1) * topo.nloc(ax2);

    let ptr = SendPtrMut::new(data);
    (0..onmax).into_par_iter().for_each(|io| {
        let mut ids = [0usize; 3];
        let i1 = io % nloc1;
        let i2 = io / nloc1;
        for i0 in 0..nloc0 {
            ids[ax0] = istart[ax0] + i0;
            ids[ax1] = istart[ax1] + i1;
            ids[ax2] = istart[ax2] + i2;

            // the zero plane of a skipped direction was computed exactly
            if (0..3).any(|d| skip_zero[d] && ids[d] == 0) {
                continue;
            }

            let mut k2 = 0.0;
            for d in 0..3 {
                let t = fold_index(ids[d] as f64, symstart[d]);
                let k = (t + koffset[d]) * kfact[d];
                k2 += k * k;
            }
            let id = collapsed_index(ax0, i0, io, &nmem, nf);
            unsafe {
                *ptr.raw.add(id) = kernels::spectral(k2);
                if nf == 2 {
                    *ptr.raw.add(id + 1) = 0.0;
                }
            }
        }
    });
}

/// Multiply the whole buffer by the accumulated volume factor.
pub fn scale_green(topo: &Topology, volfact: f64, data: &mut [f64]) {
    let ax0 = topo.axis();
    let ax1 = (ax0 + 1) % 3;
    let ax2 = (ax0 + 2) % 3;
    let nf = topo.nf();
    let nmem = topo.nmem_all();
    let onmax = topo.nloc(ax1) * topo.nloc(ax2);
    let inmax = topo.nloc(ax0) * nf;

    let ptr = SendPtrMut::new(data);
    (0..onmax).into_par_iter().for_each(|io| {
        let base = collapsed_index(ax0, 0, io, &nmem, nf);
        for ii in 0..inmax {
            unsafe {
                *ptr.raw.add(base + ii) *= volfact;
            }
        }
    });
}

/// Zero the mode at global index (0,0,0) on the owning rank.
pub fn kill_mode_zero(topo: &Topology, data: &mut [f64]) {
    let istart = topo.start_global_all();
    if istart == [0, 0, 0] {
        for x in data.iter_mut().take(topo.nf()) {
            *x = 0.0;
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::solver::test_universe;

    #[test]
    fn test_fill_green_fully_spectral() {
        let world = test_universe();
        // a complex pencil holding an 8-mode periodic spectrum in every dir
        let topo = Topology::new(0, 1, [8, 8, 8], [1, 1, 1], true, None, 16, &world).unwrap();
        let info = SpectralInfo {
            is_spectral: [true; 3],
            hfact: [0.0; 3],
            kfact: [1.0; 3],
            koffset: [0.0; 3],
            symstart: [4.0; 3],
        };
        let mut data = vec![0.0f64; topo.memsize()];
        fill_green(
            &topo,
            &info,
            0,
            GreenKind::Chat2,
            0.0,
            [1.0; 3],
            &mut data,
        )
        .unwrap();

        // mode zero stays zero, mode (1,0,0) is -1, mode (5,0,0) folds to -3
        let nmem = topo.nmem_all();
        assert_eq!(data[0], 0.0);
        assert_eq!(data[collapsed_index(0, 1, 0, &nmem, 2)], -1.0);
        let folded = collapsed_index(0, 5, 0, &nmem, 2);
        assert!((data[folded] + 1.0 / 9.0).abs() < 1e-15);
        // imaginary parts are zero
        assert_eq!(data[collapsed_index(0, 1, 0, &nmem, 2) + 1], 0.0);
    }

    #[test]
    fn test_scale_and_kill_mode_zero() {
        let world = test_universe();
        let topo = Topology::new(0, 1, [4, 4, 4], [1, 1, 1], false, None, 16, &world).unwrap();
        let mut data = vec![1.0f64; topo.memsize()];
        scale_green(&topo, 2.5, &mut data);
        assert_eq!(data[0], 2.5);
        kill_mode_zero(&topo, &mut data);
        assert_eq!(data[0], 0.0);
        assert_eq!(data[1], 2.5);
    }
}
