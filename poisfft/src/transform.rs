//! Per-direction 1-D transform plans.
//!
//! A [`TransformPlan`] carries everything the solver needs to know about the
//! transform of one direction for one kind of data (forward field, backward
//! field, backward derivative, forward Green): the transform category, the
//! sizes before and after, the scaling factors, the wavenumber map and the
//! FFTW plans themselves. Categories are ordered so that ascending priority
//! gives a valid execution order: real-to-real symmetric transforms run while
//! the data is still real, the single real-to-complex transform follows, and
//! the remaining full complex transforms come last.

use crate::fftw::{
    execute_c2c, execute_c2r, execute_r2c, execute_r2r, plan::R2RKind, plan_many_c2c,
    plan_many_c2r, plan_many_r2c, plan_many_r2r, FftError, PencilShape, Plan64, Sign,
};
use crate::topology::Topology;
use crate::types::{BoundaryKind, ExecDirection};

/// Transform category; the numeric value is the execution priority
/// (lower runs earlier).
#[repr(i32)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum PlanKind {
    /// Symmetric-even or symmetric-odd on both sides: a DCT or DST.
    SymSym = 2,

    /// One side unbounded, one side symmetric: r2r on the doubled domain.
    MixUnbounded = 4,

    /// Periodic: full DFT, real-to-complex when the data is still real.
    Periodic = 6,

    /// Both sides unbounded: DFT on the doubled domain.
    Unbounded = 8,

    /// The direction is trivial (2-D problems).
    Empty = 9,
}

/// How the FFTW plan is executed.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum ExecKind {
    R2R,
    C2C,
    R2C,
    C2R,
    NoOp,
}

/// Spectral index shift applied by `correct_plan` on derivative plans.
///
/// A DST-II stores frequency `k + 1` at index `k` while a DCT-III reads
/// frequency `k` at index `k`; differentiating swaps the two bases, so the
/// modes must move one slot before the backward transform (the top mode has
/// no slot in the target basis and is dropped).
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum SpectralShift {
    None,
    /// Towards higher indices, zero into slot 0 (cosine target basis).
    Right,
    /// Towards lower indices, zero into the last slot (sine target basis).
    Left,
}

/// The 1-D transform of one direction for one kind of data.
pub struct TransformPlan {
    dim: usize,
    kind: PlanKind,
    sign: ExecDirection,
    is_green: bool,
    lda: usize,
    h: f64,
    l: f64,
    bc: Vec<[BoundaryKind; 2]>,

    // set by init()
    n_in: usize,
    n_out: usize,
    is_r2c: bool,
    is_spectral: bool,
    fieldstart: usize,
    symstart: f64,
    normfact: f64,
    volfact: f64,
    kfact: f64,
    koffset: f64,
    imult: Vec<bool>,
    r2r_kinds: Vec<R2RKind>,

    // set by allocate_plan()
    exec_kind: ExecKind,
    plans: Vec<Plan64>,
    memdim: usize,

    is_derivative: bool,
}

impl TransformPlan {
    /// Create the plan skeleton for one direction.
    ///
    /// # Arguments
    /// * `lda` - number of field components
    /// * `dim` - the direction this plan transforms
    /// * `h`, `l` - grid spacing and domain length per direction
    /// * `bc` - boundary pair for every component of this direction
    /// * `sign` - forward or backward execution
    /// * `is_green` - plans for the Green's function treat symmetric and
    ///   periodic directions as already spectral
    pub fn new(
        lda: usize,
        dim: usize,
        h: [f64; 3],
        l: [f64; 3],
        bc: &[[BoundaryKind; 2]],
        sign: ExecDirection,
        is_green: bool,
    ) -> Result<Self, std::io::Error> {
        assert!(dim < 3, "the direction must be 0, 1 or 2");
        if bc.len() != lda {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!(
                    "expected one boundary pair per component: lda = {} vs {}",
                    lda,
                    bc.len()
                ),
            ));
        }

        let kind = Self::kind_of(bc[0])?;
        for pair in bc.iter().skip(1) {
            if Self::kind_of(*pair)? != kind {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    "all components of one direction must share the same transform category",
                ));
            }
        }

        Ok(Self {
            dim,
            kind,
            sign,
            is_green,
            lda: if is_green { 1 } else { lda },
            h: h[dim],
            l: l[dim],
            bc: bc.to_vec(),
            n_in: 0,
            n_out: 0,
            is_r2c: false,
            is_spectral: false,
            fieldstart: 0,
            symstart: 0.0,
            normfact: 1.0,
            volfact: 1.0,
            kfact: 0.0,
            koffset: 0.0,
            imult: vec![false; bc.len()],
            r2r_kinds: Vec::new(),
            exec_kind: ExecKind::NoOp,
            plans: Vec::new(),
            memdim: 0,
            is_derivative: false,
        })
    }

    /// Flag this plan as acting on differentiated data, enabling the
    /// spectral shift in [`TransformPlan::correct_plan`].
    pub(crate) fn mark_derivative(&mut self) {
        self.is_derivative = true;
    }

    /// Shift required for one (differentiated) boundary pair.
    fn shift_for(bc: [BoundaryKind; 2]) -> SpectralShift {
        use BoundaryKind::*;
        match bc {
            // the original field was odd: a sine forward, a cosine backward
            [Even, Even] | [Unbounded, Even] | [Even, Unbounded] => SpectralShift::Right,
            // the original field was even: a cosine forward, a sine backward
            [Odd, Odd] | [Unbounded, Odd] | [Odd, Unbounded] => SpectralShift::Left,
            // the quarter-wave bases keep frequency k + 1/2 at index k
            _ => SpectralShift::None,
        }
    }

    fn kind_of(bc: [BoundaryKind; 2]) -> Result<PlanKind, std::io::Error> {
        use BoundaryKind::*;
        let sym = |b: BoundaryKind| matches!(b, Even | Odd);
        match bc {
            [Periodic, Periodic] => Ok(PlanKind::Periodic),
            [Unbounded, Unbounded] => Ok(PlanKind::Unbounded),
            [None, None] => Ok(PlanKind::Empty),
            [a, b] if sym(a) && sym(b) => Ok(PlanKind::SymSym),
            [Unbounded, b] if sym(b) => Ok(PlanKind::MixUnbounded),
            [a, Unbounded] if sym(a) => Ok(PlanKind::MixUnbounded),
            _ => Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("unsupported boundary combination {:?} / {:?}", bc[0], bc[1]),
            )),
        }
    }

    /// Initialize the plan from the current dry-run state and advance it:
    /// `size[dim]` becomes the output size and `is_complex` accounts for a
    /// possible real-to-complex step.
    pub fn init(&mut self, size: &mut [usize; 3], is_complex: &mut bool) {
        let n = size[self.dim];
        match self.kind {
            PlanKind::SymSym => self.init_real2real(n, *is_complex),
            PlanKind::MixUnbounded => self.init_mixunbounded(n, *is_complex),
            PlanKind::Periodic => self.init_periodic(n, *is_complex),
            PlanKind::Unbounded => self.init_unbounded(n, *is_complex),
            PlanKind::Empty => self.init_empty(n),
        }
        size[self.dim] = self.n_out;
        *is_complex |= self.is_r2c;
    }

    fn r2r_kind_for(&self, bc: [BoundaryKind; 2], lia: usize) -> (R2RKind, f64, bool) {
        use BoundaryKind::*;
        // the boundary pair fixes the r2r kind, the wavenumber offset and the
        // imaginary factor carried by sine transforms
        let forward = self.sign == ExecDirection::Forward;
        let _ = lia;
        match bc {
            [Even, Even] => (
                if forward {
                    R2RKind::FFTW_REDFT10
                } else {
                    R2RKind::FFTW_REDFT01
                },
                0.0,
                false,
            ),
            [Odd, Odd] => (
                if forward {
                    R2RKind::FFTW_RODFT10
                } else {
                    R2RKind::FFTW_RODFT01
                },
                1.0,
                true,
            ),
            [Even, Odd] => (R2RKind::FFTW_REDFT11, 0.5, false),
            [Odd, Even] => (R2RKind::FFTW_RODFT11, 0.5, true),
            // mixed-unbounded: the symmetry side drives the kind
            [Unbounded, Even] | [Even, Unbounded] => (
                if forward {
                    R2RKind::FFTW_REDFT10
                } else {
                    R2RKind::FFTW_REDFT01
                },
                0.0,
                false,
            ),
            [Unbounded, Odd] | [Odd, Unbounded] => (
                if forward {
                    R2RKind::FFTW_RODFT10
                } else {
                    R2RKind::FFTW_RODFT01
                },
                1.0,
                true,
            ),
            _ => unreachable!("not an r2r boundary pair"),
        }
    }

    fn init_real2real(&mut self, n: usize, is_complex: bool) {
        assert!(!is_complex, "symmetric transforms require real input");
        self.n_in = n;
        self.n_out = n;
        self.is_r2c = false;
        self.fieldstart = 0;
        self.symstart = 0.0;
        self.normfact = 1.0 / (2.0 * n as f64);
        self.volfact = 1.0;
        self.kfact = std::f64::consts::PI / self.l;
        self.is_spectral = self.is_green;

        self.r2r_kinds.clear();
        self.imult.clear();
        for lia in 0..self.bc.len() {
            let (kind, koffset, imult) = self.r2r_kind_for(self.bc[lia], lia);
            if lia == 0 {
                self.koffset = koffset;
            }
            self.r2r_kinds.push(kind);
            self.imult.push(imult);
        }
    }

    fn init_mixunbounded(&mut self, n: usize, is_complex: bool) {
        assert!(!is_complex, "semi-unbounded transforms require real input");
        self.n_in = 2 * n;
        self.n_out = 2 * n;
        self.is_r2c = false;
        // an unbounded left side leaves the data in the right half
        self.fieldstart = if self.bc[0][0] == BoundaryKind::Unbounded {
            n
        } else {
            0
        };
        self.symstart = 0.0;
        self.normfact = 1.0 / (4.0 * n as f64);
        self.volfact = self.h;
        self.kfact = std::f64::consts::PI / (2.0 * self.l);
        self.is_spectral = false;

        self.r2r_kinds.clear();
        self.imult.clear();
        if self.is_green {
            // the Green's function on the doubled domain is even about the
            // origin whatever the field symmetry is
            self.koffset = 0.0;
            self.r2r_kinds.push(R2RKind::FFTW_REDFT10);
            self.imult.push(false);
        } else {
            for lia in 0..self.bc.len() {
                let (kind, koffset, imult) = self.r2r_kind_for(self.bc[lia], lia);
                if lia == 0 {
                    self.koffset = koffset;
                }
                self.r2r_kinds.push(kind);
                self.imult.push(imult);
            }
        }
    }

    fn init_periodic(&mut self, n: usize, is_complex: bool) {
        self.n_in = n;
        self.n_out = if is_complex { n } else { n / 2 + 1 };
        self.is_r2c = !is_complex;
        self.fieldstart = 0;
        self.symstart = 0.5 * n as f64;
        self.normfact = 1.0 / n as f64;
        self.volfact = 1.0;
        self.kfact = 2.0 * std::f64::consts::PI / self.l;
        self.koffset = 0.0;
        self.is_spectral = self.is_green;
        self.imult = vec![false; self.bc.len()];
        self.r2r_kinds.clear();
    }

    fn init_unbounded(&mut self, n: usize, is_complex: bool) {
        self.n_in = 2 * n;
        self.n_out = if is_complex { 2 * n } else { n + 1 };
        self.is_r2c = !is_complex;
        self.fieldstart = 0;
        self.symstart = n as f64;
        self.normfact = 1.0 / (2.0 * n as f64);
        self.volfact = self.h;
        self.kfact = std::f64::consts::PI / self.l;
        self.koffset = 0.0;
        self.is_spectral = false;
        self.imult = vec![false; self.bc.len()];
        self.r2r_kinds.clear();
    }

    fn init_empty(&mut self, n: usize) {
        self.n_in = n;
        self.n_out = n;
        self.is_r2c = false;
        self.fieldstart = 0;
        self.symstart = 0.0;
        self.normfact = 1.0;
        self.volfact = 1.0;
        self.kfact = 0.0;
        self.koffset = 0.0;
        self.is_spectral = true;
        self.imult = vec![false; self.bc.len()];
        self.r2r_kinds.clear();
    }

    /// Transform category.
    pub fn kind(&self) -> PlanKind {
        self.kind
    }

    /// Execution priority (lower runs earlier).
    pub fn priority(&self) -> i32 {
        self.kind as i32
    }

    /// The direction this plan transforms; also the fast axis after the plan.
    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Input size, in elements of the input domain.
    pub fn n_in(&self) -> usize {
        self.n_in
    }

    /// Output size, in elements of the output domain.
    pub fn n_out(&self) -> usize {
        self.n_out
    }

    /// Whether the plan turns real data into complex data.
    pub fn is_r2c(&self) -> bool {
        self.is_r2c
    }

    /// Whether this plan actually executes the real-to-complex FFT itself.
    ///
    /// A Green plan for a spectral direction reports `is_r2c` for the sizing
    /// but never runs; the distinction drives the backward Green sizing.
    pub fn r2c_done_by_plan(&self) -> bool {
        self.is_r2c && !self.is_spectral
    }

    /// Whether the direction's transform is absorbed into the Green's
    /// function (only ever true for Green plans).
    pub fn is_spectral(&self) -> bool {
        self.is_spectral
    }

    /// Memory offset of the transformed data inside the next topology.
    pub fn fieldstart(&self) -> usize {
        self.fieldstart
    }

    /// Symmetry-start index for wavenumber folding (0 = no symmetry).
    pub fn symstart(&self) -> f64 {
        self.symstart
    }

    /// Normalization factor of the forward-backward pair.
    pub fn normfact(&self) -> f64 {
        self.normfact
    }

    /// Volume factor accumulated into the Green's function.
    pub fn volfact(&self) -> f64 {
        self.volfact
    }

    /// Wavenumber scale.
    pub fn kfact(&self) -> f64 {
        self.kfact
    }

    /// Wavenumber offset.
    pub fn koffset(&self) -> f64 {
        self.koffset
    }

    /// Whether component `lia` picks up a factor of ±i in this transform.
    pub fn imult(&self, lia: usize) -> bool {
        self.imult[lia]
    }

    /// Create the FFTW plans for this direction on the given topology and
    /// buffer.
    ///
    /// The topology must be in the state the data has right before the plan
    /// runs (real for an r2c forward plan).
    pub fn allocate_plan(&mut self, topo: &Topology, data: &mut [f64]) -> Result<(), FftError> {
        assert_eq!(topo.axis(), self.dim, "plan and topology axes must agree");
        self.plans.clear();
        self.memdim = topo.memdim();

        let ax0 = topo.axis();
        let ax1 = (ax0 + 1) % 3;
        let ax2 = (ax0 + 2) % 3;
        let howmany = topo.nloc(ax1) * topo.nloc(ax2);

        self.exec_kind = match self.kind {
            PlanKind::Empty => ExecKind::NoOp,
            PlanKind::SymSym | PlanKind::MixUnbounded => ExecKind::R2R,
            PlanKind::Periodic | PlanKind::Unbounded => {
                if self.is_r2c {
                    if self.sign == ExecDirection::Forward {
                        ExecKind::R2C
                    } else {
                        ExecKind::C2R
                    }
                } else {
                    ExecKind::C2C
                }
            }
        };

        match self.exec_kind {
            ExecKind::NoOp => {}
            ExecKind::R2R => {
                let shape = PencilShape {
                    n: self.n_in,
                    howmany,
                    idist: topo.nmem(ax0),
                    odist: topo.nmem(ax0),
                };
                for lia in 0..self.lda {
                    let kind = self.r2r_kinds[lia.min(self.r2r_kinds.len() - 1)];
                    let sub = &mut data[lia * self.memdim..];
                    self.plans.push(plan_many_r2r(sub, &shape, kind)?);
                }
            }
            ExecKind::C2C => {
                let shape = PencilShape {
                    n: self.n_in,
                    howmany,
                    idist: topo.nmem(ax0),
                    odist: topo.nmem(ax0),
                };
                let sign = if self.sign == ExecDirection::Forward {
                    Sign::Forward
                } else {
                    Sign::Backward
                };
                for lia in 0..self.lda {
                    let sub = &mut data[lia * self.memdim..];
                    self.plans.push(plan_many_c2c(sub, &shape, sign)?);
                }
            }
            ExecKind::R2C => {
                // the pencil distance in real and complex elements, whatever
                // state the topology is stored in
                let rdist = if topo.is_complex() {
                    2 * topo.nmem(ax0)
                } else {
                    topo.nmem(ax0)
                };
                let shape = PencilShape {
                    n: self.n_in,
                    howmany,
                    idist: rdist,
                    odist: rdist / 2,
                };
                for lia in 0..self.lda {
                    let sub = &mut data[lia * self.memdim..];
                    self.plans.push(plan_many_r2c(sub, &shape)?);
                }
            }
            ExecKind::C2R => {
                let rdist = if topo.is_complex() {
                    2 * topo.nmem(ax0)
                } else {
                    topo.nmem(ax0)
                };
                let shape = PencilShape {
                    n: self.n_in,
                    howmany,
                    idist: rdist / 2,
                    odist: rdist,
                };
                for lia in 0..self.lda {
                    let sub = &mut data[lia * self.memdim..];
                    self.plans.push(plan_many_c2r(sub, &shape)?);
                }
            }
        }
        Ok(())
    }

    /// Execute the transform in place, one FFTW call per component.
    pub fn execute_plan(&self, topo: &Topology, data: &mut [f64]) {
        assert!(!data.is_empty(), "data is NULL");
        assert_eq!(topo.axis(), self.dim, "plan and topology axes must agree");
        if self.exec_kind == ExecKind::NoOp {
            return;
        }
        assert_eq!(self.plans.len(), self.lda, "plans have not been allocated");

        for lia in 0..self.lda {
            let ptr = unsafe { data.as_mut_ptr().add(lia * self.memdim) };
            match self.exec_kind {
                ExecKind::R2R => execute_r2r(&self.plans[lia], ptr),
                ExecKind::C2C => execute_c2c(&self.plans[lia], ptr),
                ExecKind::R2C => execute_r2c(&self.plans[lia], ptr),
                ExecKind::C2R => execute_c2r(&self.plans[lia], ptr),
                ExecKind::NoOp => {}
            }
        }
    }

    /// Destroy the FFTW plans, keeping the metadata.
    pub(crate) fn release_plans(&mut self) {
        self.plans.clear();
        self.exec_kind = ExecKind::NoOp;
    }

    /// Post-transform fix-up.
    ///
    /// Derivative plans over a symmetric direction receive data in the basis
    /// of the differentiated field: the modes are moved one slot towards the
    /// target basis and the mode without a slot is dropped (the Nyquist-type
    /// top mode of the derivative). Every other plan leaves the data alone.
    pub fn correct_plan(&self, topo: &Topology, data: &mut [f64]) {
        use rayon::prelude::*;

        if !self.is_derivative
            || !matches!(self.kind, PlanKind::SymSym | PlanKind::MixUnbounded)
        {
            return;
        }
        assert_eq!(topo.axis(), self.dim, "plan and topology axes must agree");
        let ax0 = topo.axis();
        let ax1 = (ax0 + 1) % 3;
        let ax2 = (ax0 + 2) % 3;
        let nmem = topo.nmem_all();
        let memdim = topo.memdim();
        let howmany = topo.nloc(ax1) * topo.nloc(ax2);
        let n = self.n_in;

        let ptr = crate::types::SendPtrMut::new(data);
        for lia in 0..self.lda {
            let shift = Self::shift_for(self.bc[lia]);
            if shift == SpectralShift::None {
                continue;
            }
            (0..howmany).into_par_iter().for_each(|io| {
                let base =
                    lia * memdim + crate::indexing::collapsed_index(ax0, 0, io, &nmem, 1);
                unsafe {
                    match shift {
                        SpectralShift::Right => {
                            for k in (1..n).rev() {
                                *ptr.raw.add(base + k) = *ptr.raw.add(base + k - 1);
                            }
                            *ptr.raw.add(base) = 0.0;
                        }
                        SpectralShift::Left => {
                            for k in 1..n {
                                *ptr.raw.add(base + k - 1) = *ptr.raw.add(base + k);
                            }
                            *ptr.raw.add(base + n - 1) = 0.0;
                        }
                        SpectralShift::None => {}
                    }
                }
            });
        }
    }
}

impl std::fmt::Display for TransformPlan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "plan dim {}: {:?} ({:?}), n {} -> {}, r2c = {}, spectral = {}, norm = {:.3e}, vol = {:.3e}",
            self.dim,
            self.kind,
            self.sign,
            self.n_in,
            self.n_out,
            self.is_r2c,
            self.is_spectral,
            self.normfact,
            self.volfact,
        )
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn mk(bc: [BoundaryKind; 2], green: bool) -> TransformPlan {
        TransformPlan::new(
            1,
            0,
            [0.1, 0.1, 0.1],
            [1.0, 1.0, 1.0],
            &[bc],
            ExecDirection::Forward,
            green,
        )
        .unwrap()
    }

    #[test]
    fn test_kind_of_combinations() {
        use BoundaryKind::*;
        assert_eq!(mk([Periodic, Periodic], false).kind(), PlanKind::Periodic);
        assert_eq!(mk([Unbounded, Unbounded], false).kind(), PlanKind::Unbounded);
        assert_eq!(mk([Even, Odd], false).kind(), PlanKind::SymSym);
        assert_eq!(mk([Unbounded, Even], false).kind(), PlanKind::MixUnbounded);
        assert_eq!(mk([None, None], false).kind(), PlanKind::Empty);
        assert!(TransformPlan::new(
            1,
            0,
            [0.1; 3],
            [1.0; 3],
            &[[Periodic, Even]],
            ExecDirection::Forward,
            false,
        )
        .is_err());
    }

    #[test]
    fn test_periodic_metadata() {
        let mut plan = mk([BoundaryKind::Periodic, BoundaryKind::Periodic], false);
        let mut size = [32usize, 8, 8];
        let mut cplx = false;
        plan.init(&mut size, &mut cplx);
        assert!(cplx);
        assert!(plan.is_r2c());
        assert!(plan.r2c_done_by_plan());
        assert_eq!(size[0], 17);
        assert_eq!(plan.normfact(), 1.0 / 32.0);
        assert_eq!(plan.volfact(), 1.0);
        assert_eq!(plan.kfact(), 2.0 * std::f64::consts::PI);
        assert_eq!(plan.symstart(), 16.0);

        // once complex, a periodic plan is a plain c2c
        let mut plan2 = mk([BoundaryKind::Periodic, BoundaryKind::Periodic], false);
        let mut size2 = [32usize, 8, 8];
        let mut cplx2 = true;
        plan2.init(&mut size2, &mut cplx2);
        assert!(!plan2.is_r2c());
        assert_eq!(size2[0], 32);
    }

    #[test]
    fn test_unbounded_metadata() {
        let mut plan = mk([BoundaryKind::Unbounded, BoundaryKind::Unbounded], false);
        let mut size = [64usize, 8, 8];
        let mut cplx = false;
        plan.init(&mut size, &mut cplx);
        assert!(plan.is_r2c());
        assert_eq!(plan.n_in(), 128);
        assert_eq!(size[0], 65);
        assert_eq!(plan.symstart(), 64.0);
        assert_eq!(plan.volfact(), 0.1);
        assert_eq!(plan.normfact(), 1.0 / 128.0);
    }

    #[test]
    fn test_symsym_metadata() {
        let mut plan = mk([BoundaryKind::Odd, BoundaryKind::Odd], false);
        let mut size = [16usize, 8, 8];
        let mut cplx = false;
        plan.init(&mut size, &mut cplx);
        assert!(!cplx);
        assert_eq!(size[0], 16);
        assert!(plan.imult(0));
        assert_eq!(plan.koffset(), 1.0);
        assert_eq!(plan.normfact(), 1.0 / 32.0);

        let mut even = mk([BoundaryKind::Even, BoundaryKind::Even], false);
        let mut size = [16usize, 8, 8];
        let mut cplx = false;
        even.init(&mut size, &mut cplx);
        assert!(!even.imult(0));
        assert_eq!(even.koffset(), 0.0);
    }

    #[test]
    fn test_mixunbounded_fieldstart() {
        let mut left_unb = mk([BoundaryKind::Unbounded, BoundaryKind::Even], false);
        let mut size = [16usize, 8, 8];
        let mut cplx = false;
        left_unb.init(&mut size, &mut cplx);
        assert_eq!(size[0], 32);
        assert_eq!(left_unb.fieldstart(), 16);

        let mut right_unb = mk([BoundaryKind::Odd, BoundaryKind::Unbounded], false);
        let mut size = [16usize, 8, 8];
        let mut cplx = false;
        right_unb.init(&mut size, &mut cplx);
        assert_eq!(right_unb.fieldstart(), 0);
        assert!(right_unb.imult(0));
    }

    #[test]
    fn test_green_spectral_flags() {
        let mut green_per = mk([BoundaryKind::Periodic, BoundaryKind::Periodic], true);
        let mut size = [32usize, 8, 8];
        let mut cplx = false;
        green_per.init(&mut size, &mut cplx);
        assert!(green_per.is_spectral());
        assert!(green_per.is_r2c());
        assert!(!green_per.r2c_done_by_plan());

        let mut green_unb = mk([BoundaryKind::Unbounded, BoundaryKind::Unbounded], true);
        let mut size = [64usize, 8, 8];
        let mut cplx = false;
        green_unb.init(&mut size, &mut cplx);
        assert!(!green_unb.is_spectral());
        assert!(green_unb.r2c_done_by_plan());
    }
}
