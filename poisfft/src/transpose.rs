//! Repartitioning of a distributed field between two pencil topologies.
//!
//! The exchange works on blocks: rectangular sub-tiles whose per-direction
//! extent is the greatest common divisor of the send and receive extents
//! across every process, so that block boundaries line up globally on both
//! sides (only the global tail may form one smaller partial block). Every
//! block has exactly one destination rank and corresponds bit-for-bit to one
//! block on the other side.
//!
//! Only the ranks that actually exchange data participate: a sub-communicator
//! is carved out of the parent communicator by iterative min-color
//! propagation. The exchange itself is either one collective all-to-all
//! ([`all_to_all`]) or overlapped per-block non-blocking messages
//! ([`non_blocking`]), selected at construction.

pub mod all_to_all;
pub mod non_blocking;

use std::fmt;

use mpi::raw::AsRaw;
use mpi::topology::{Color, SimpleCommunicator};
use mpi::traits::*;
use mpi::Count;

use crate::topology::Topology;
use crate::types::{CommStrategy, ExecDirection};

/// Euclid's greatest common divisor.
pub(crate) fn gcd(a: usize, b: usize) -> usize {
    if a == 0 {
        b
    } else {
        gcd(b % a, a)
    }
}

/// Translate `ranks` from the numbering of `from` to the numbering of `to`.
///
/// The two communicators must contain the same processes; after rank
/// reordering they number them differently.
pub(crate) fn translate_ranks(
    ranks: &[i32],
    from: &SimpleCommunicator,
    to: &SimpleCommunicator,
) -> Vec<i32> {
    let mut result = vec![0i32; ranks.len()];
    unsafe {
        let mut group_from: mpi::ffi::MPI_Group = std::mem::zeroed();
        let mut group_to: mpi::ffi::MPI_Group = std::mem::zeroed();
        mpi::ffi::MPI_Comm_group(from.as_raw(), &mut group_from);
        mpi::ffi::MPI_Comm_group(to.as_raw(), &mut group_to);
        mpi::ffi::MPI_Group_translate_ranks(
            group_from,
            ranks.len() as Count,
            ranks.as_ptr(),
            group_to,
            result.as_mut_ptr(),
        );
        mpi::ffi::MPI_Group_free(&mut group_from);
        mpi::ffi::MPI_Group_free(&mut group_to);
    }
    result
}

/// Frozen layout of one side of the exchange.
///
/// The transpose operates on the state the topologies had when it was built
/// (real layout for a real-to-complex stage); snapshotting decouples it from
/// the scoped real/complex switches the solver performs afterwards.
#[derive(Debug, Clone, Copy)]
pub(crate) struct TopoLayout {
    pub axis: usize,
    pub nf: usize,
    pub nmem: [usize; 3],
    pub memdim: usize,
    pub memsize: usize,
}

impl TopoLayout {
    fn of(topo: &Topology) -> Self {
        Self {
            axis: topo.axis(),
            nf: topo.nf(),
            nmem: topo.nmem_all(),
            memdim: topo.memdim(),
            memsize: topo.memsize(),
        }
    }
}

/// Per-direction overlap of one process's range with the exchange window.
fn overlap(start: usize, len: usize, lo: usize, hi: usize) -> (usize, usize) {
    let s = start.max(lo);
    let e = (start + len).min(hi);
    if e > s {
        (s, e - s)
    } else {
        (s.min(hi), 0)
    }
}

/// One side (send or receive) of the block decomposition.
pub(crate) struct BlockSide {
    /// Local block grid.
    pub n_block: [usize; 3],
    /// Local index where the exchange region starts, per direction.
    pub start: [usize; 3],
    /// Block extents per direction, indexed by the per-direction block index.
    pub sizes: [Vec<usize>; 3],
    /// Destination rank per block, in sub-communicator numbering.
    pub dest_rank: Vec<i32>,
    /// Destination-local linear block index per block (the message tag).
    pub dest_tag: Vec<usize>,
    /// Global lexicographic key per block, shared by the two sides.
    pub gkey: Vec<u64>,
    /// Offset of each block inside the staging buffer, in doubles.
    pub offset: Vec<usize>,
    /// Own topology axis, fixing the linear enumeration of the grid.
    pub axis: usize,
    /// Total number of local blocks.
    pub nblocks: usize,
}

impl BlockSide {
    /// Extent triple of block `ib`.
    pub fn block_size(&self, ib: &[usize; 3]) -> [usize; 3] {
        [
            self.sizes[0][ib[0]],
            self.sizes[1][ib[1]],
            self.sizes[2][ib[2]],
        ]
    }
}

/// Exchange geometry shared by the two sides, in the coordinates of one side.
struct ExchangeWindow {
    /// First own global index inside the window.
    lo: [usize; 3],
    /// One past the last own global index inside the window.
    hi: [usize; 3],
}

impl ExchangeWindow {
    /// Window of `own` when `own`'s origin sits at `shift` inside `other`.
    fn of(own: &Topology, other: &Topology, shift: [i64; 3]) -> Self {
        let mut lo = [0usize; 3];
        let mut hi = [0usize; 3];
        for id in 0..3 {
            lo[id] = (-shift[id]).max(0) as usize;
            hi[id] = (own.nglob(id) as i64).min(other.nglob(id) as i64 - shift[id]).max(0) as usize;
            hi[id] = hi[id].max(lo[id]);
        }
        Self { lo, hi }
    }

    fn extent(&self, id: usize) -> usize {
        self.hi[id] - self.lo[id]
    }
}

fn ceil_div(a: usize, b: usize) -> usize {
    (a + b - 1) / b
}

/// Build one side of the block decomposition.
///
/// `shift` maps `own` global indices into `other` global indices.
fn build_side(
    own: &Topology,
    other: &Topology,
    shift: [i64; 3],
    n_by_block: [usize; 3],
) -> BlockSide {
    let window = ExchangeWindow::of(own, other, shift);
    let other_window = ExchangeWindow::of(other, own, [-shift[0], -shift[1], -shift[2]]);

    let mut n_block = [0usize; 3];
    let mut start = [0usize; 3];
    let mut sizes: [Vec<usize>; 3] = [Vec::new(), Vec::new(), Vec::new()];

    for id in 0..3 {
        let (s, len) = overlap(
            own.start_global(id),
            own.nloc(id),
            window.lo[id],
            window.hi[id],
        );
        // local coordinates of the window start
        start[id] = s.saturating_sub(own.start_global(id));
        n_block[id] = if len == 0 {
            0
        } else {
            ceil_div(len, n_by_block[id])
        };
        for ib in 0..n_block[id] {
            sizes[id].push((len - ib * n_by_block[id]).min(n_by_block[id]));
        }
    }

    let nblocks = n_block[0] * n_block[1] * n_block[2];
    let axis = own.axis();

    // global block counts fix the shared lexicographic key
    let gnb = [
        ceil_div(window.extent(0).max(1), n_by_block[0]),
        ceil_div(window.extent(1).max(1), n_by_block[1]),
        ceil_div(window.extent(2).max(1), n_by_block[2]),
    ];

    let mut dest_rank = Vec::with_capacity(nblocks);
    let mut dest_tag = Vec::with_capacity(nblocks);
    let mut gkey = Vec::with_capacity(nblocks);

    for bid in 0..nblocks {
        let ib = crate::indexing::local_split(bid, &n_block, axis);
        let mut pos = [0usize; 3];
        let mut gblock = [0usize; 3];
        let mut loc = [0usize; 3];
        let mut dest_grid = [0usize; 3];
        for id in 0..3 {
            let g_own = own.start_global(id) + start[id] + ib[id] * n_by_block[id];
            let g_oth = (g_own as i64 + shift[id]) as usize;
            pos[id] = other.proc_of(id, g_oth);
            gblock[id] = (g_own - window.lo[id]) / n_by_block[id];
            // the destination's first block and grid along this direction
            let (d_start, d_len) = overlap(
                other.start_of(id, pos[id]),
                other.nloc_of(id, pos[id]),
                other_window.lo[id],
                other_window.hi[id],
            );
            let d_first = (d_start - other_window.lo[id]) / n_by_block[id];
            dest_grid[id] = ceil_div(d_len, n_by_block[id]);
            loc[id] = gblock[id] - d_first;
        }
        dest_rank.push(other.rank_index(pos) as i32);
        dest_tag.push(crate::indexing::local_linear(&loc, &dest_grid, other.axis()));
        gkey.push(gblock[0] as u64 + (gnb[0] as u64) * (gblock[1] as u64 + (gnb[1] as u64) * gblock[2] as u64));
    }

    BlockSide {
        n_block,
        start,
        sizes,
        dest_rank,
        dest_tag,
        gkey,
        offset: vec![0; nblocks],
        axis,
        nblocks,
    }
}

/// The repartitioning between two pencil topologies.
///
/// The same descriptor serves the forward (`in -> out`) and backward
/// (`out -> in`) directions: backward execution swaps every role array.
pub struct Transpose {
    in_layout: TopoLayout,
    out_layout: TopoLayout,
    lda: usize,
    nf: usize,
    align_doubles: usize,
    n_by_block: [usize; 3],
    iside: BlockSide,
    oside: BlockSide,
    subcomm: SimpleCommunicator,
    sub_rank: i32,
    i2o_count: Vec<Count>,
    i2o_displ: Vec<Count>,
    o2i_count: Vec<Count>,
    o2i_displ: Vec<Count>,
    is_all_to_all: bool,
    strategy: CommStrategy,
    /// Uniform per-block slot for the non-blocking variant, in doubles.
    block_slot: usize,
    send_need: usize,
    recv_need: usize,
}

impl Transpose {
    /// Build the exchange between `topo_in` and `topo_out`.
    ///
    /// `shift` is the position of `topo_in`'s origin inside `topo_out`'s
    /// global indexing; it offsets the whole intersection rigidly.
    pub fn new(
        topo_in: &Topology,
        topo_out: &Topology,
        shift: [i64; 3],
        strategy: CommStrategy,
    ) -> Self {
        assert_eq!(
            topo_in.is_complex(),
            topo_out.is_complex(),
            "both topologies have to be the same kind"
        );
        assert!(topo_in.nf() <= 2, "the value of nf is not supported");
        assert_eq!(topo_in.lda(), topo_out.lda(), "lda must match across the exchange");

        let parent = topo_out.comm();
        let parent_size = parent.size() as usize;
        let nf = topo_in.nf();
        let lda = topo_in.lda();
        let align_doubles = topo_in.alignment() / std::mem::size_of::<f64>();

        //---------------------------------------------------------------------
        // block extents: per-direction GCD of send and receive extents over
        // every process, the last process first shaving the odd tail
        //---------------------------------------------------------------------
        let window = ExchangeWindow::of(topo_in, topo_out, shift);
        let oshift = [-shift[0], -shift[1], -shift[2]];
        let (istart, iend) = topo_in.intersect_ids(shift, topo_out);
        let (ostart, oend) = topo_out.intersect_ids(oshift, topo_in);

        let mut n_by_block = [1usize; 3];
        for id in 0..3 {
            let ex = window.extent(id);
            let mut isend = iend[id] - istart[id];
            let mut osend = oend[id] - ostart[id];
            if topo_in.rankd(id) == topo_in.nproc(id) - 1 {
                isend = isend.saturating_sub(ex % 2);
            }
            if topo_out.rankd(id) == topo_out.nproc(id) - 1 {
                osend = osend.saturating_sub(ex % 2);
            }
            let local = gcd(isend, osend);
            let mut every = vec![0i32; parent_size];
            parent.all_gather_into(&(local as i32), &mut every[..]);
            let mut g = 0usize;
            for &e in every.iter() {
                g = gcd(g, e as usize);
            }
            n_by_block[id] = g.max(1);
        }

        //---------------------------------------------------------------------
        // per-side block grids, destination ranks and tags
        //---------------------------------------------------------------------
        let mut iside = build_side(topo_in, topo_out, shift, n_by_block);
        let mut oside = build_side(topo_out, topo_in, oshift, n_by_block);

        // express every destination in the numbering of the parent (output)
        // communicator; the input side may live on a differently numbered
        // communicator after rank reordering
        oside.dest_rank = translate_ranks(&oside.dest_rank, topo_in.comm(), parent);

        //---------------------------------------------------------------------
        // sub-communicator: lower my color to the minimum color among my
        // partners until every group is closed
        //---------------------------------------------------------------------
        let my_rank = parent.rank();
        let mut color = my_rank;
        let mut in_group = vec![false; parent_size];
        for &r in iside.dest_rank.iter().chain(oside.dest_rank.iter()) {
            color = color.min(r);
            in_group[r as usize] = true;
        }
        loop {
            let mut colors = vec![0i32; parent_size];
            parent.all_gather_into(&color, &mut colors[..]);
            let mut missing = 0i32;
            for r in 0..parent_size {
                if in_group[r] && colors[r] != color {
                    missing += 1;
                    if colors[r] < color {
                        missing -= 1;
                        color = colors[r];
                    }
                }
            }
            let mut left = 0i32;
            parent.all_reduce_into(
                &missing,
                &mut left,
                mpi::collective::SystemOperation::sum(),
            );
            if left == 0 {
                break;
            }
        }
        let subcomm = parent
            .split_by_color(Color::with_value(color))
            .expect("every rank carries a valid color");
        let sub_rank = subcomm.rank();
        let sub_size = subcomm.size() as usize;

        // translate destinations from parent numbering into the subcomm
        let mut new_ranks = vec![0i32; parent_size];
        parent.all_gather_into(&sub_rank, &mut new_ranks[..]);
        for r in iside.dest_rank.iter_mut() {
            *r = new_ranks[*r as usize];
        }
        for r in oside.dest_rank.iter_mut() {
            *r = new_ranks[*r as usize];
        }

        //---------------------------------------------------------------------
        // per-rank counts and per-block staging offsets
        //---------------------------------------------------------------------
        let pad = |x: usize| -> usize { ceil_div(x, align_doubles) * align_doubles };
        let block_slot = pad(n_by_block[0] * n_by_block[1] * n_by_block[2] * nf) * lda;

        let fill = |side: &mut BlockSide| -> (Vec<Count>, Vec<Count>) {
            let mut count = vec![0 as Count; sub_size];
            let mut order: Vec<usize> = (0..side.nblocks).collect();
            order.sort_by_key(|&b| (side.dest_rank[b], side.gkey[b]));
            let elems: Vec<usize> = (0..side.nblocks)
                .map(|b| {
                    let ib = crate::indexing::local_split(b, &side.n_block, side.axis);
                    let bs = side.block_size(&ib);
                    pad(bs[0] * bs[1] * bs[2] * nf) * lda
                })
                .collect();
            for &b in order.iter() {
                count[side.dest_rank[b] as usize] += elems[b] as Count;
            }
            let mut displ = vec![0 as Count; sub_size];
            for r in 1..sub_size {
                displ[r] = displ[r - 1] + count[r - 1];
            }
            let mut next: Vec<usize> = displ.iter().map(|&d| d as usize).collect();
            for &b in order.iter() {
                side.offset[b] = next[side.dest_rank[b] as usize];
                next[side.dest_rank[b] as usize] += elems[b];
            }
            (count, displ)
        };

        let (i2o_count, i2o_displ) = fill(&mut iside);
        let (o2i_count, o2i_displ) = fill(&mut oside);

        if strategy == CommStrategy::NonBlocking {
            // independent per-block messages use uniform slots instead
            for b in 0..iside.nblocks {
                iside.offset[b] = b * block_slot;
            }
            for b in 0..oside.nblocks {
                oside.offset[b] = b * block_slot;
            }
        }

        let mut is_all_to_all = i2o_count.first().map(|&c| c != 0).unwrap_or(false);
        if let Some(&c0) = i2o_count.first() {
            for r in 0..sub_size {
                is_all_to_all = is_all_to_all && i2o_count[r] == c0 && o2i_count[r] == c0;
            }
        }

        let (send_need, recv_need) = match strategy {
            CommStrategy::AllToAll => (
                i2o_count.iter().map(|&c| c as usize).sum::<usize>().max(1),
                o2i_count.iter().map(|&c| c as usize).sum::<usize>().max(1),
            ),
            CommStrategy::NonBlocking => (
                (iside.nblocks * block_slot).max(1),
                (oside.nblocks * block_slot).max(1),
            ),
        };

        Self {
            in_layout: TopoLayout::of(topo_in),
            out_layout: TopoLayout::of(topo_out),
            lda,
            nf,
            align_doubles,
            n_by_block,
            iside,
            oside,
            subcomm,
            sub_rank,
            i2o_count,
            i2o_displ,
            o2i_count,
            o2i_displ,
            is_all_to_all,
            strategy,
            block_slot,
            send_need,
            recv_need,
        }
    }

    /// Doubles required in each staging buffer for this exchange.
    pub fn required_buffer_len(&self) -> usize {
        self.send_need.max(self.recv_need)
    }

    /// Execute the exchange in place on `v`, staging through `send` / `recv`.
    ///
    /// `v` must hold at least the larger of the two layouts; the buffers must
    /// hold [`Transpose::required_buffer_len`] doubles each.
    pub fn execute(
        &self,
        v: &mut [f64],
        sign: ExecDirection,
        send: &mut [f64],
        recv: &mut [f64],
    ) {
        assert!(
            v.len() >= self.in_layout.memsize.max(self.out_layout.memsize),
            "the field buffer is too small for the exchange"
        );
        assert!(send.len() >= self.required_buffer_len());
        assert!(recv.len() >= self.required_buffer_len());
        match self.strategy {
            CommStrategy::AllToAll => self.execute_a2a(v, sign, send, recv),
            CommStrategy::NonBlocking => self.execute_nb(v, sign, send, recv),
        }
    }
}

impl fmt::Display for Transpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "transpose axis {} -> axis {} ({})",
            self.in_layout.axis,
            self.out_layout.axis,
            match (self.strategy, self.is_all_to_all) {
                (CommStrategy::AllToAll, true) => "uniform all-to-all",
                (CommStrategy::AllToAll, false) => "variable all-to-all",
                (CommStrategy::NonBlocking, _) => "non-blocking",
            }
        )?;
        writeln!(
            f,
            " - nByBlock = {} {} {}",
            self.n_by_block[0], self.n_by_block[1], self.n_by_block[2]
        )?;
        writeln!(
            f,
            " - inBlock = {} {} {} / onBlock = {} {} {}",
            self.iside.n_block[0],
            self.iside.n_block[1],
            self.iside.n_block[2],
            self.oside.n_block[0],
            self.oside.n_block[1],
            self.oside.n_block[2]
        )?;
        writeln!(f, " - subcomm size = {}", self.subcomm.size())
    }
}

/// Per-destination exchange volume of the prospective transpose, in doubles.
///
/// Used to build the communication graph for rank reordering before any
/// transpose is constructed; destinations are numbered in `topo_out`'s
/// communicator.
pub fn comm_weights(
    topo_in: &Topology,
    topo_out: &Topology,
    shift: [i64; 3],
    weights: &mut [i64],
) {
    let (istart, iend) = topo_in.intersect_ids(shift, topo_out);
    let nf = topo_in.nf() as i64;
    let lda = topo_in.lda() as i64;

    // per direction, split my exchanged range by destination position
    let mut per_dim: [Vec<(usize, i64)>; 3] = [Vec::new(), Vec::new(), Vec::new()];
    for id in 0..3 {
        let mut i = istart[id];
        while i < iend[id] {
            let g = (topo_in.start_global(id) + i) as i64 + shift[id];
            let pos = topo_out.proc_of(id, g as usize);
            let owned_end = topo_out.start_of(id, pos) + topo_out.nloc_of(id, pos);
            let stop = iend[id].min(i + (owned_end as i64 - g) as usize);
            per_dim[id].push((pos, (stop - i) as i64));
            i = stop;
        }
    }

    for &(p0, n0) in per_dim[0].iter() {
        for &(p1, n1) in per_dim[1].iter() {
            for &(p2, n2) in per_dim[2].iter() {
                let dest = topo_out.rank_index([p0, p1, p2]);
                weights[dest] += n0 * n1 * n2 * nf * lda;
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::solver::test_universe;

    #[test]
    fn test_gcd() {
        assert_eq!(gcd(12, 8), 4);
        assert_eq!(gcd(0, 5), 5);
        assert_eq!(gcd(5, 0), 5);
        assert_eq!(gcd(7, 13), 1);
        assert_eq!(gcd(32, 16), 16);
    }

    #[test]
    fn test_block_setup_single_rank() {
        let world = test_universe();
        let tin = Topology::new(0, 1, [16, 16, 16], [1, 1, 1], false, None, 16, &world).unwrap();
        let tout = Topology::new(2, 1, [16, 16, 16], [1, 1, 1], false, None, 16, &world).unwrap();
        let tp = Transpose::new(&tin, &tout, [0, 0, 0], CommStrategy::AllToAll);
        // one rank: one giant block, sent to itself
        assert_eq!(tp.iside.nblocks, 1);
        assert_eq!(tp.oside.nblocks, 1);
        assert_eq!(tp.iside.dest_rank[0], 0);
        assert_eq!(tp.n_by_block, [16, 16, 16]);
        assert!(tp.is_all_to_all);
        // bytes sent = bytes received
        let s: i64 = tp.i2o_count.iter().map(|&c| c as i64).sum();
        let r: i64 = tp.o2i_count.iter().map(|&c| c as i64).sum();
        assert_eq!(s, r);
    }

    /// Scenario: fill a 16^3 array with `i + 100 j + 10000 k`, transpose
    /// axis 0 -> axis 2 and back; the buffer must be bitwise identical.
    #[test]
    fn test_round_trip_bitwise() {
        let world = test_universe();
        let tin = Topology::new(0, 1, [16, 16, 16], [1, 1, 1], false, None, 16, &world).unwrap();
        let tout = Topology::new(2, 1, [16, 16, 16], [1, 1, 1], false, None, 16, &world).unwrap();

        for strategy in [CommStrategy::AllToAll, CommStrategy::NonBlocking] {
            let tp = Transpose::new(&tin, &tout, [0, 0, 0], strategy);
            let mut v = vec![0.0f64; tin.memsize().max(tout.memsize())];
            let nmem = tin.nmem_all();
            for k in 0..16 {
                for j in 0..16 {
                    for i in 0..16 {
                        v[crate::indexing::local_index(0, i, j, k, 0, &nmem, 1)] =
                            (i + 100 * j + 10000 * k) as f64;
                    }
                }
            }
            let reference = v.clone();
            let mut send = vec![0.0f64; tp.required_buffer_len()];
            let mut recv = vec![0.0f64; tp.required_buffer_len()];

            tp.execute(&mut v, ExecDirection::Forward, &mut send, &mut recv);
            // after the forward leg the fast axis is 2
            let onmem = tout.nmem_all();
            assert_eq!(
                v[crate::indexing::local_index(0, 3, 1, 2, 2, &onmem, 1)],
                (3 + 100 * 1 + 10000 * 2) as f64
            );
            tp.execute(&mut v, ExecDirection::Backward, &mut send, &mut recv);

            assert_eq!(v, reference, "{:?} round trip differs", strategy);
        }
    }

    /// Round trip through a padded, shifted, complex exchange.
    #[test]
    fn test_round_trip_complex_with_shift() {
        let world = test_universe();
        let tin = Topology::new(0, 1, [8, 8, 8], [1, 1, 1], true, None, 16, &world).unwrap();
        let tout = Topology::new(1, 1, [17, 8, 8], [1, 1, 1], true, None, 16, &world).unwrap();

        for strategy in [CommStrategy::AllToAll, CommStrategy::NonBlocking] {
            let tp = Transpose::new(&tin, &tout, [4, 0, 0], strategy);
            let mut v = vec![0.0f64; tin.memsize().max(tout.memsize())];
            let nmem = tin.nmem_all();
            for k in 0..8 {
                for j in 0..8 {
                    for i in 0..8 {
                        let id = crate::indexing::local_index(0, i, j, k, 0, &nmem, 2);
                        v[id] = (i + 10 * j + 100 * k) as f64;
                        v[id + 1] = -(i as f64);
                    }
                }
            }
            let reference = v.clone();
            let mut send = vec![0.0f64; tp.required_buffer_len()];
            let mut recv = vec![0.0f64; tp.required_buffer_len()];

            tp.execute(&mut v, ExecDirection::Forward, &mut send, &mut recv);
            // the origin of the input topology sits at 4 along direction 0
            let onmem = tout.nmem_all();
            let id = crate::indexing::local_index(0, 4 + 2, 3, 5, 1, &onmem, 2);
            assert_eq!(v[id], (2 + 10 * 3 + 100 * 5) as f64);
            assert_eq!(v[id + 1], -2.0);
            tp.execute(&mut v, ExecDirection::Backward, &mut send, &mut recv);

            assert_eq!(v, reference, "{:?} round trip differs", strategy);
        }
    }

    #[test]
    fn test_lda_round_trip() {
        let world = test_universe();
        let tin = Topology::new(0, 3, [8, 8, 8], [1, 1, 1], false, None, 16, &world).unwrap();
        let tout = Topology::new(1, 3, [8, 8, 8], [1, 1, 1], false, None, 16, &world).unwrap();
        let tp = Transpose::new(&tin, &tout, [0, 0, 0], CommStrategy::AllToAll);
        let memdim = tin.memdim();

        let mut v = vec![0.0f64; tin.memsize().max(tout.memsize())];
        for lia in 0..3 {
            for (i, x) in v[lia * memdim..(lia + 1) * memdim].iter_mut().enumerate() {
                *x = (1000 * lia + i) as f64;
            }
        }
        let reference = v.clone();
        let mut send = vec![0.0f64; tp.required_buffer_len()];
        let mut recv = vec![0.0f64; tp.required_buffer_len()];
        tp.execute(&mut v, ExecDirection::Forward, &mut send, &mut recv);
        tp.execute(&mut v, ExecDirection::Backward, &mut send, &mut recv);
        assert_eq!(v, reference);
    }

    #[test]
    fn test_comm_weights_conserves_volume() {
        let world = test_universe();
        let tin = Topology::new(0, 1, [8, 8, 8], [1, 1, 1], false, None, 16, &world).unwrap();
        let tout = Topology::new(1, 1, [8, 8, 8], [1, 1, 1], false, None, 16, &world).unwrap();
        let mut w = vec![0i64; 1];
        comm_weights(&tin, &tout, [0, 0, 0], &mut w);
        assert_eq!(w[0], 512);
    }
}
