//! Pointwise spectral multiply with the Green's function.
//!
//! The standard family multiplies the transformed field by the transformed
//! Green's function; the rotational family additionally folds a derivative
//! factor per direction and component into the multiply, producing the curl
//! of the vector potential in one pass. The multiply is data parallel over
//! the outer two axes; the fast-axis loop is branch free, all phase
//! bookkeeping being precomputed into the derivative-factor table.

use num_complex::Complex64;
use rayon::prelude::*;

use crate::indexing::{collapsed_index, fold_index};
use crate::topology::Topology;
use crate::transform::TransformPlan;
use crate::types::{DiffOrder, SendPtr, SendPtrMut};

/// Geometry and scaling of the convolution stage.
#[derive(Debug, Clone, Copy)]
pub struct ConvolutionSpec {
    axis: usize,
    nmem: [usize; 3],
    nloc: [usize; 3],
    nf: usize,
    lda: usize,
    memdim: usize,
    istart: [usize; 3],
    normfact: f64,
}

impl ConvolutionSpec {
    /// Capture the final spectral topology.
    pub fn of(topo: &Topology, normfact: f64) -> Self {
        Self {
            axis: topo.axis(),
            nmem: topo.nmem_all(),
            nloc: [topo.nloc(0), topo.nloc(1), topo.nloc(2)],
            nf: topo.nf(),
            lda: topo.lda(),
            memdim: topo.memdim(),
            istart: topo.start_global_all(),
            normfact,
        }
    }
}

/// Derivative factors of the rotational convolution.
///
/// `kfact[d][c]` is the complex factor multiplying the wavenumber magnitude
/// of direction `d` for component `c`; it absorbs the ±i factors picked up by
/// the sine transforms so the inner loop issues plain multiplies.
#[derive(Debug, Clone, Copy)]
pub struct RotSpec {
    kfact: [[[f64; 2]; 3]; 3],
    kabs: [f64; 3],
    koffset: [f64; 3],
    symstart: [f64; 3],
    h: [f64; 3],
    order: DiffOrder,
}

impl RotSpec {
    /// Accumulate the phase of every `(direction, component)` pair from the
    /// forward and backward-derivative plans.
    pub fn of_plans(
        forward: &[TransformPlan; 3],
        backward_diff: &[TransformPlan; 3],
        lda: usize,
        h: [f64; 3],
        order: DiffOrder,
    ) -> Self {
        assert_eq!(lda, 3, "the rotational solve needs a three-component field");
        let mut kfact = [[[0.0f64; 2]; 3]; 3];
        let mut kabs = [0.0f64; 3];
        let mut koffset = [0.0f64; 3];
        let mut symstart = [0.0f64; 3];

        for ip in 0..3 {
            let dim = forward[ip].dim();
            kabs[dim] = forward[ip].kfact();
            koffset[dim] = forward[ip].koffset();
            symstart[dim] = forward[ip].symstart();
            for lia in 0..lda {
                let mut corrphase = 0i32;
                if forward[ip].imult(lia) {
                    // a forward sine transform multiplied by (-i)
                    corrphase -= 1;
                }
                if backward_diff[ip].imult(lia) {
                    // a backward sine transform rephases by (+i)
                    corrphase += 1;
                }
                kfact[dim][lia] = match corrphase {
                    0 => [0.0, kabs[dim]],   // * (ik)
                    1 => [-kabs[dim], 0.0],  // * (ik) * (i)  = -k
                    -1 => [kabs[dim], 0.0],  // * (ik) * (-i) =  k
                    _ => unreachable!("at most one i per pass"),
                };
            }
        }
        Self {
            kfact,
            kabs,
            koffset,
            symstart,
            h,
            order,
        }
    }

    /// Wavenumber weight of global index `t` along direction `d`, shared by
    /// every component (the per-component phase lives in `kfact`).
    #[inline(always)]
    fn weight(&self, d: usize, idx: f64) -> f64 {
        let t = fold_index(idx, self.symstart[d]) + self.koffset[d];
        match self.order {
            DiffOrder::Spectral => t,
            DiffOrder::FiniteDiff2 => {
                if self.kabs[d] == 0.0 {
                    0.0
                } else {
                    (t * self.kabs[d] * self.h[d]).sin() / (self.h[d] * self.kabs[d])
                }
            }
            DiffOrder::None => unreachable!("rotational solves require a derivative order"),
        }
    }
}

/// Standard convolution: `f := normfact * G * f`, per component.
pub fn multiply_std(spec: &ConvolutionSpec, green: &[f64], data: &mut [f64]) {
    let ax0 = spec.axis;
    let ax1 = (ax0 + 1) % 3;
    let ax2 = (ax0 + 2) % 3;
    let onmax = spec.nloc[ax1] * spec.nloc[ax2] * spec.lda;
    let ondim = spec.nloc[ax1] * spec.nloc[ax2];
    let normfact = spec.normfact;
    let spec = *spec;

    let g = SendPtr::new(green);
    let ptr = SendPtrMut::new(data);
    (0..onmax).into_par_iter().for_each(|id| {
        let lia = id / ondim;
        let io = id % ondim;
        let base = lia * spec.memdim + collapsed_index(ax0, 0, io, &spec.nmem, spec.nf);
        let gbase = collapsed_index(ax0, 0, io, &spec.nmem, spec.nf);
        if spec.nf == 1 {
            for i0 in 0..spec.nloc[ax0] {
                unsafe {
                    *ptr.raw.add(base + i0) *= normfact * *g.raw.add(gbase + i0);
                }
            }
        } else {
            for i0 in 0..spec.nloc[ax0] {
                unsafe {
                    let a = *ptr.raw.add(base + 2 * i0);
                    let b = *ptr.raw.add(base + 2 * i0 + 1);
                    let c = *g.raw.add(gbase + 2 * i0);
                    let d = *g.raw.add(gbase + 2 * i0 + 1);
                    *ptr.raw.add(base + 2 * i0) = normfact * (a * c - b * d);
                    *ptr.raw.add(base + 2 * i0 + 1) = normfact * (a * d + b * c);
                }
            }
        }
    });
}

/// Rotational convolution: `out = normfact * G * (k x f)` with the
/// derivative factors of `rot`.
pub fn multiply_rot(spec: &ConvolutionSpec, rot: &RotSpec, green: &[f64], data: &mut [f64]) {
    assert_eq!(spec.lda, 3, "the rotational solve needs a three-component field");
    let ax0 = spec.axis;
    let ax1 = (ax0 + 1) % 3;
    let ax2 = (ax0 + 2) % 3;
    let onmax = spec.nloc[ax1] * spec.nloc[ax2];
    let spec = *spec;
    let rot = *rot;

    let g = SendPtr::new(green);
    let ptr = SendPtrMut::new(data);
    (0..onmax).into_par_iter().for_each(|io| {
        let i1 = io % spec.nloc[ax1];
        let i2 = io / spec.nloc[ax1];
        let w1 = rot.weight(ax1, (spec.istart[ax1] + i1) as f64);
        let w2 = rot.weight(ax2, (spec.istart[ax2] + i2) as f64);
        let base = collapsed_index(ax0, 0, io, &spec.nmem, spec.nf);

        // per-point weights in 012 ordering
        let mut w = [0.0f64; 3];
        w[ax1] = w1;
        w[ax2] = w2;

        for i0 in 0..spec.nloc[ax0] {
            w[ax0] = rot.weight(ax0, (spec.istart[ax0] + i0) as f64);

            // derivative factor of component c along direction d
            let dfact = |d: usize, c: usize| -> (f64, f64) {
                (rot.kfact[d][c][0] * w[d], rot.kfact[d][c][1] * w[d])
            };

            if spec.nf == 1 {
                unsafe {
                    let f0 = *ptr.raw.add(base + i0);
                    let f1 = *ptr.raw.add(spec.memdim + base + i0);
                    let f2 = *ptr.raw.add(2 * spec.memdim + base + i0);
                    let gg = spec.normfact * *g.raw.add(base + i0);
                    // in the all-real case every factor collapses to its real
                    // part
                    let rot0 = dfact(1, 2).0 * f2 - dfact(2, 1).0 * f1;
                    let rot1 = dfact(2, 0).0 * f0 - dfact(0, 2).0 * f2;
                    let rot2 = dfact(0, 1).0 * f1 - dfact(1, 0).0 * f0;
                    *ptr.raw.add(base + i0) = gg * rot0;
                    *ptr.raw.add(spec.memdim + base + i0) = gg * rot1;
                    *ptr.raw.add(2 * spec.memdim + base + i0) = gg * rot2;
                }
            } else {
                unsafe {
                    let idx = base + 2 * i0;
                    let load = |off: usize| -> Complex64 {
                        Complex64::new(*ptr.raw.add(off + idx), *ptr.raw.add(off + idx + 1))
                    };
                    let f = [load(0), load(spec.memdim), load(2 * spec.memdim)];
                    let cfact = |d: usize, c: usize| -> Complex64 {
                        let (re, im) = dfact(d, c);
                        Complex64::new(re, im)
                    };
                    let rot0 = f[2] * cfact(1, 2) - f[1] * cfact(2, 1);
                    let rot1 = f[0] * cfact(2, 0) - f[2] * cfact(0, 2);
                    let rot2 = f[1] * cfact(0, 1) - f[0] * cfact(1, 0);
                    let gg = spec.normfact
                        * Complex64::new(*g.raw.add(idx), *g.raw.add(idx + 1));
                    let out = [rot0 * gg, rot1 * gg, rot2 * gg];
                    for (c, value) in out.iter().enumerate() {
                        *ptr.raw.add(c * spec.memdim + idx) = value.re;
                        *ptr.raw.add(c * spec.memdim + idx + 1) = value.im;
                    }
                }
            }
        }
    });
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::solver::test_universe;
    use crate::types::{BoundaryKind, ExecDirection};

    #[test]
    fn test_multiply_std_real() {
        let world = test_universe();
        let topo = Topology::new(0, 1, [4, 4, 4], [1, 1, 1], false, None, 16, &world).unwrap();
        let spec = ConvolutionSpec::of(&topo, 0.25);
        let green = vec![2.0f64; topo.memsize()];
        let mut data = vec![3.0f64; topo.memsize()];
        multiply_std(&spec, &green, &mut data);
        assert!(data.iter().all(|&x| (x - 1.5).abs() < 1e-15));
    }

    #[test]
    fn test_multiply_std_complex() {
        let world = test_universe();
        let topo = Topology::new(0, 1, [4, 4, 4], [1, 1, 1], true, None, 16, &world).unwrap();
        let spec = ConvolutionSpec::of(&topo, 1.0);
        let mut green = vec![0.0f64; topo.memsize()];
        let mut data = vec![0.0f64; topo.memsize()];
        // G = i at every point, f = 1 + 0i: product must be i
        for i in 0..topo.memsize() / 2 {
            green[2 * i + 1] = 1.0;
            data[2 * i] = 1.0;
        }
        multiply_std(&spec, &green, &mut data);
        assert!((data[0] - 0.0).abs() < 1e-15);
        assert!((data[1] - 1.0).abs() < 1e-15);
    }

    #[test]
    fn test_rot_table_phase_classes() {
        let mk = |bc: [BoundaryKind; 2], sign, green| {
            TransformPlan::new(3, 0, [0.1; 3], [1.0; 3], &[bc, bc, bc], sign, green).unwrap()
        };
        let mut size = [8usize; 3];
        let mut cplx = false;
        // forward DST (imult), derivative bc becomes even -> backward DCT
        let mut fwd = [
            mk([BoundaryKind::Odd, BoundaryKind::Odd], ExecDirection::Forward, false),
            TransformPlan::new(
                3,
                1,
                [0.1; 3],
                [1.0; 3],
                &[[BoundaryKind::Periodic, BoundaryKind::Periodic]; 3],
                ExecDirection::Forward,
                false,
            )
            .unwrap(),
            TransformPlan::new(
                3,
                2,
                [0.1; 3],
                [1.0; 3],
                &[[BoundaryKind::Periodic, BoundaryKind::Periodic]; 3],
                ExecDirection::Forward,
                false,
            )
            .unwrap(),
        ];
        let mut bwd = [
            mk([BoundaryKind::Even, BoundaryKind::Even], ExecDirection::Backward, false),
            TransformPlan::new(
                3,
                1,
                [0.1; 3],
                [1.0; 3],
                &[[BoundaryKind::Periodic, BoundaryKind::Periodic]; 3],
                ExecDirection::Backward,
                false,
            )
            .unwrap(),
            TransformPlan::new(
                3,
                2,
                [0.1; 3],
                [1.0; 3],
                &[[BoundaryKind::Periodic, BoundaryKind::Periodic]; 3],
                ExecDirection::Backward,
                false,
            )
            .unwrap(),
        ];
        for p in fwd.iter_mut().chain(bwd.iter_mut()) {
            let mut s = size;
            let mut c = cplx;
            p.init(&mut s, &mut c);
            size = [8; 3];
            cplx = false;
        }

        let rot = RotSpec::of_plans(&fwd, &bwd, 3, [0.1; 3], DiffOrder::Spectral);
        // DST forward, no i backward: phase -1 => real +k
        assert!(rot.kfact[0][0][0] > 0.0);
        assert_eq!(rot.kfact[0][0][1], 0.0);
        // periodic: no i anywhere: pure imaginary ik
        assert_eq!(rot.kfact[1][0][0], 0.0);
        assert!(rot.kfact[1][0][1] > 0.0);
    }

    #[test]
    fn test_rot_weight_folding() {
        let rot = RotSpec {
            kfact: [[[0.0; 2]; 3]; 3],
            kabs: [1.0; 3],
            koffset: [0.0; 3],
            symstart: [4.0, 0.0, 0.0],
            h: [0.1; 3],
            order: DiffOrder::Spectral,
        };
        assert_eq!(rot.weight(0, 3.0), 3.0);
        assert_eq!(rot.weight(0, 5.0), -3.0);
        assert_eq!(rot.weight(1, 5.0), 5.0);
    }
}
