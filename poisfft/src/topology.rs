//! Description of a distributed pencil-decomposed grid.

use std::fmt;

use mpi::topology::SimpleCommunicator;
use mpi::traits::Communicator;

/// Balanced number of points owned by process `r` out of `p` along one
/// direction of global size `n`: the first `n % p` processes get one extra.
#[inline]
pub fn points_by_proc(n: usize, p: usize, r: usize) -> usize {
    n / p + usize::from(n % p > r)
}

/// Global index of the first point owned by process `r`.
#[inline]
pub fn start_by_proc(n: usize, p: usize, r: usize) -> usize {
    (n / p) * r + r.min(n % p)
}

/// Which process position owns global index `g` (clamped to the last one for
/// out-of-range lookups).
#[inline]
pub fn proc_of_point(n: usize, p: usize, g: usize) -> usize {
    let q = n / p;
    let rem = n % p;
    let r = if q == 0 {
        g
    } else if g < (q + 1) * rem {
        g / (q + 1)
    } else {
        rem + (g - (q + 1) * rem) / q
    };
    r.min(p - 1)
}

/// One distributed pencil decomposition of a 3-D grid.
///
/// The fast axis is not cut across processes: each process owns the full
/// global extent of the fast direction over a rectangular subrange of the
/// other two. Sizes along the fast axis are padded in memory so that one
/// pencil is a whole number of alignment blocks.
///
/// A topology is immutable except for two scoped mutations: the real/complex
/// toggle (which doubles or halves the fast-axis sizes) and the communicator
/// rebind used once by rank reordering.
pub struct Topology {
    axis: usize,
    nglob: [usize; 3],
    nloc: [usize; 3],
    nmem: [usize; 3],
    nproc: [usize; 3],
    axproc: [usize; 3],
    rankd: [usize; 3],
    nf: usize,
    lda: usize,
    alignment: usize,
    comm: SimpleCommunicator,
}

impl Topology {
    /// Create a new topology bound to (a duplicate of) `comm`.
    ///
    /// # Arguments
    /// * `axis` - the fast-rotating direction (0, 1 or 2)
    /// * `lda` - number of components per grid point (scalar = 1, vector = 3)
    /// * `nglob` - global grid size, in complex elements if `is_complex`
    /// * `nproc` - process grid; its product must equal the communicator size
    /// * `is_complex` - two doubles per element instead of one
    /// * `axproc` - order in which the flat rank splits into a triplet
    /// * `alignment` - fast-axis memory alignment in bytes
    pub fn new(
        axis: usize,
        lda: usize,
        nglob: [usize; 3],
        nproc: [usize; 3],
        is_complex: bool,
        axproc: Option<[usize; 3]>,
        alignment: usize,
        comm: &SimpleCommunicator,
    ) -> Result<Self, std::io::Error> {
        let comm_size = comm.size() as usize;
        if nproc[0] * nproc[1] * nproc[2] != comm_size {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!(
                    "the process grid {}x{}x{} does not match the communicator size {}",
                    nproc[0], nproc[1], nproc[2], comm_size
                ),
            ));
        }
        assert!(axis < 3, "the axis must be 0, 1 or 2");
        assert!(alignment.is_power_of_two() && alignment >= std::mem::size_of::<f64>());

        let mut topo = Self {
            axis,
            nglob,
            nloc: [0; 3],
            nmem: [0; 3],
            nproc,
            axproc: axproc.unwrap_or([0, 1, 2]),
            rankd: [0; 3],
            nf: if is_complex { 2 } else { 1 },
            lda,
            alignment,
            comm: comm.duplicate(),
        };
        topo.rankd = topo.split_rank(topo.comm.rank() as usize);
        topo.compute_sizes();
        Ok(topo)
    }

    /// Split a flat rank into its grid triplet following the decomposition
    /// order.
    pub fn split_rank(&self, rank: usize) -> [usize; 3] {
        let [a0, a1, a2] = self.axproc;
        let mut rankd = [0; 3];
        rankd[a0] = rank % self.nproc[a0];
        rankd[a1] = (rank % (self.nproc[a0] * self.nproc[a1])) / self.nproc[a0];
        rankd[a2] = rank / (self.nproc[a0] * self.nproc[a1]);
        rankd
    }

    /// Flat rank of a grid triplet (inverse of [`Topology::split_rank`]).
    pub fn rank_index(&self, rankd: [usize; 3]) -> usize {
        let [a0, a1, a2] = self.axproc;
        rankd[a0] + self.nproc[a0] * (rankd[a1] + self.nproc[a1] * rankd[a2])
    }

    /// Recompute `nloc` and `nmem`, padding the fast axis so that a pencil is
    /// a whole number of alignment blocks.
    fn compute_sizes(&mut self) {
        for id in 0..3 {
            self.nloc[id] = points_by_proc(self.nglob[id], self.nproc[id], self.rankd[id]);
            self.nmem[id] = self.nloc[id];
            if id == self.axis {
                let bytes = self.nloc[id] * self.nf * std::mem::size_of::<f64>();
                let modulo = bytes % self.alignment;
                if modulo != 0 {
                    let delta = (self.alignment - modulo) / std::mem::size_of::<f64>();
                    self.nmem[id] += delta / self.nf;
                }
            }
        }
    }

    /// Rebind the topology to another communicator of the same size,
    /// recomputing the rank triplet. Used once by rank reordering.
    pub fn change_comm(&mut self, comm: &SimpleCommunicator) {
        assert_eq!(
            comm.size(),
            self.comm.size(),
            "the new communicator must have the same size"
        );
        self.comm = comm.duplicate();
        self.rankd = self.split_rank(self.comm.rank() as usize);
        self.compute_sizes();
    }

    /// Interpret the data as complex: halves the fast-axis sizes.
    pub fn switch_to_complex(&mut self) {
        if self.nf == 1 {
            self.nf = 2;
            self.nglob[self.axis] /= 2;
            self.nloc[self.axis] /= 2;
            self.nmem[self.axis] /= 2;
        }
    }

    /// Interpret the data as real: doubles the fast-axis sizes.
    pub fn switch_to_real(&mut self) {
        if self.nf == 2 {
            self.nf = 1;
            self.nglob[self.axis] *= 2;
            self.nloc[self.axis] *= 2;
            self.nmem[self.axis] *= 2;
        }
    }

    /// The fast-rotating axis.
    pub fn axis(&self) -> usize {
        self.axis
    }

    /// Number of doubles per element (1 = real, 2 = complex).
    pub fn nf(&self) -> usize {
        self.nf
    }

    /// Whether elements are complex.
    pub fn is_complex(&self) -> bool {
        self.nf == 2
    }

    /// Number of components per grid point.
    pub fn lda(&self) -> usize {
        self.lda
    }

    /// Fast-axis alignment in bytes.
    pub fn alignment(&self) -> usize {
        self.alignment
    }

    /// Global size along `id`.
    pub fn nglob(&self, id: usize) -> usize {
        self.nglob[id]
    }

    /// Local (owned) size along `id`.
    pub fn nloc(&self, id: usize) -> usize {
        self.nloc[id]
    }

    /// Local memory size along `id` (padded along the fast axis).
    pub fn nmem(&self, id: usize) -> usize {
        self.nmem[id]
    }

    /// The padded memory sizes.
    pub fn nmem_all(&self) -> [usize; 3] {
        self.nmem
    }

    /// Process count along `id`.
    pub fn nproc(&self, id: usize) -> usize {
        self.nproc[id]
    }

    /// This process's grid position along `id`.
    pub fn rankd(&self, id: usize) -> usize {
        self.rankd[id]
    }

    /// The decomposition order.
    pub fn axproc(&self) -> [usize; 3] {
        self.axproc
    }

    /// The bound communicator.
    pub fn comm(&self) -> &SimpleCommunicator {
        &self.comm
    }

    /// Memory footprint of one component, in doubles.
    pub fn memdim(&self) -> usize {
        self.nmem[0] * self.nmem[1] * self.nmem[2] * self.nf
    }

    /// Memory footprint of the whole local field, in doubles.
    pub fn memsize(&self) -> usize {
        self.memdim() * self.lda
    }

    /// Global index of this process's first point along `id`.
    pub fn start_global(&self, id: usize) -> usize {
        start_by_proc(self.nglob[id], self.nproc[id], self.rankd[id])
    }

    /// Global index triplet of this process's first point.
    pub fn start_global_all(&self) -> [usize; 3] {
        [
            self.start_global(0),
            self.start_global(1),
            self.start_global(2),
        ]
    }

    /// Local size along `id` of the process at position `r`.
    pub fn nloc_of(&self, id: usize, r: usize) -> usize {
        points_by_proc(self.nglob[id], self.nproc[id], r)
    }

    /// Global start along `id` of the process at position `r`.
    pub fn start_of(&self, id: usize, r: usize) -> usize {
        start_by_proc(self.nglob[id], self.nproc[id], r)
    }

    /// Grid position along `id` owning global index `g`.
    pub fn proc_of(&self, id: usize, g: usize) -> usize {
        proc_of_point(self.nglob[id], self.nproc[id], g)
    }

    /// Local index range `[start, end)` of this process's points that fall
    /// inside `other` when the origin of `self` sits at `shift` in `other`'s
    /// global indexing.
    pub fn intersect_ids(&self, shift: [i64; 3], other: &Topology) -> ([usize; 3], [usize; 3]) {
        assert_eq!(
            self.is_complex(),
            other.is_complex(),
            "the two topologies have to be both complex or real"
        );
        let mut start = [0usize; 3];
        let mut end = [0usize; 3];
        for id in 0..3 {
            let onglob = other.nglob(id) as i64;
            let my_start = self.start_global(id) as i64;
            for i in 0..self.nloc[id] {
                let oid_global = my_start + i as i64 + shift[id];
                if oid_global <= 0 {
                    start[id] = i;
                }
                if oid_global < onglob {
                    end[id] = i + 1;
                }
            }
            if end[id] < start[id] {
                end[id] = start[id];
            }
        }
        (start, end)
    }
}

impl fmt::Display for Topology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "topology on {} ranks", self.comm.size())?;
        writeln!(f, " - axis = {}", self.axis)?;
        writeln!(f, " - lda = {} / nf = {}", self.lda, self.nf)?;
        writeln!(
            f,
            " - nglob = {} {} {}",
            self.nglob[0], self.nglob[1], self.nglob[2]
        )?;
        writeln!(
            f,
            " - nloc = {} {} {} / nmem = {} {} {}",
            self.nloc[0], self.nloc[1], self.nloc[2], self.nmem[0], self.nmem[1], self.nmem[2]
        )?;
        writeln!(
            f,
            " - nproc = {} {} {} / rankd = {} {} {}",
            self.nproc[0], self.nproc[1], self.nproc[2], self.rankd[0], self.rankd[1], self.rankd[2]
        )
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::solver::test_universe;

    #[test]
    fn test_points_by_proc_balance() {
        // 10 points over 4 procs: 3 3 2 2
        assert_eq!(points_by_proc(10, 4, 0), 3);
        assert_eq!(points_by_proc(10, 4, 1), 3);
        assert_eq!(points_by_proc(10, 4, 2), 2);
        assert_eq!(points_by_proc(10, 4, 3), 2);
        assert_eq!(start_by_proc(10, 4, 2), 6);
        let total: usize = (0..4).map(|r| points_by_proc(10, 4, r)).sum();
        assert_eq!(total, 10);
    }

    #[test]
    fn test_proc_of_point_inverse() {
        for &(n, p) in &[(10usize, 4usize), (16, 4), (7, 3), (5, 5)] {
            for g in 0..n {
                let r = proc_of_point(n, p, g);
                let s = start_by_proc(n, p, r);
                assert!(g >= s && g < s + points_by_proc(n, p, r), "n={} p={} g={}", n, p, g);
            }
        }
    }

    #[test]
    fn test_topology_sizes_and_alignment() {
        let world = test_universe();
        let topo = Topology::new(0, 1, [17, 8, 8], [1, 1, 1], false, None, 64, &world).unwrap();
        assert_eq!(topo.nloc(0), 17);
        // 17 doubles padded to 64 bytes -> 24 doubles
        assert_eq!(topo.nmem(0), 24);
        assert_eq!(topo.nmem(0) * topo.nf() * 8 % topo.alignment(), 0);
        assert_eq!(topo.memsize(), 24 * 8 * 8);
    }

    #[test]
    fn test_switch_complex_round_trip() {
        let world = test_universe();
        let mut topo = Topology::new(2, 1, [8, 8, 16], [1, 1, 1], true, None, 16, &world).unwrap();
        assert!(topo.is_complex());
        let nglob_c = topo.nglob(2);
        let nmem_c = topo.nmem(2);
        topo.switch_to_real();
        assert_eq!(topo.nglob(2), 2 * nglob_c);
        assert_eq!(topo.nmem(2), 2 * nmem_c);
        topo.switch_to_complex();
        assert_eq!(topo.nglob(2), nglob_c);
        assert_eq!(topo.nmem(2), nmem_c);
    }

    #[test]
    fn test_intersect_single_rank() {
        let world = test_universe();
        let small = Topology::new(0, 1, [8, 8, 8], [1, 1, 1], false, None, 16, &world).unwrap();
        let big = Topology::new(0, 1, [16, 8, 8], [1, 1, 1], false, None, 16, &world).unwrap();
        // small sits at an offset of 4 along direction 0 inside big
        let (istart, iend) = small.intersect_ids([4, 0, 0], &big);
        assert_eq!(istart, [0, 0, 0]);
        assert_eq!(iend, [8, 8, 8]);
        let (ostart, oend) = big.intersect_ids([-4, 0, 0], &small);
        assert_eq!(ostart, [4, 0, 0]);
        assert_eq!(oend, [12, 8, 8]);
    }
}
