//! Overlapped non-blocking execution of a transpose.
//!
//! Every block is an independent message, tagged with its local block index
//! on the receiving side. Receives are posted first; each block is packed and
//! its send started immediately, so early blocks travel while later ones are
//! still being packed. Blocks whose destination is the sending rank itself
//! skip MPI entirely: they are packed straight into their receive slot.
//! Unpacking overlaps the remaining receptions through wait-any.

use mpi::traits::*;
use rayon::prelude::*;

use super::{BlockSide, Transpose};
use crate::indexing::{local_index, local_split};
use crate::types::{ExecDirection, SendPtr, SendPtrMut};

impl Transpose {
    pub(crate) fn execute_nb(
        &self,
        v: &mut [f64],
        sign: ExecDirection,
        send: &mut [f64],
        recv: &mut [f64],
    ) {
        let (send_side, recv_side, lin, lout) = match sign {
            ExecDirection::Forward => (&self.iside, &self.oside, &self.in_layout, &self.out_layout),
            ExecDirection::Backward => (&self.oside, &self.iside, &self.out_layout, &self.in_layout),
        };

        let slot = self.block_slot;
        let sub_rank = self.sub_rank;
        let recv_base = SendPtr::new(recv);
        let v_read = SendPtr::new(v);

        // hand every slot out as an owned slice so requests can borrow them
        let mut send_slots: Vec<Option<&mut [f64]>> = Vec::with_capacity(send_side.nblocks);
        {
            let mut rest: &mut [f64] = send;
            for _ in 0..send_side.nblocks {
                let (head, tail) = rest.split_at_mut(slot);
                send_slots.push(Some(head));
                rest = tail;
            }
        }
        let mut recv_slots: Vec<Option<&mut [f64]>> = Vec::with_capacity(recv_side.nblocks);
        {
            let mut rest: &mut [f64] = recv;
            for _ in 0..recv_side.nblocks {
                let (head, tail) = rest.split_at_mut(slot);
                recv_slots.push(Some(head));
                rest = tail;
            }
        }

        let n_requests = send_side.nblocks + recv_side.nblocks;
        mpi::request::multiple_scope(n_requests.max(1), |scope, coll| {
            // request index -> receive block id, or -1 for a send
            let mut kinds: Vec<i64> = Vec::new();

            //-----------------------------------------------------------------
            // start the reception requests so we are ready to receive
            //-----------------------------------------------------------------
            let mut pending_recv = 0usize;
            for bid in 0..recv_side.nblocks {
                if recv_side.dest_rank[bid] != sub_rank {
                    let buf = recv_slots[bid].take().expect("slot is free before posting");
                    let req = self
                        .subcomm
                        .process_at_rank(recv_side.dest_rank[bid])
                        .immediate_receive_into_with_tag(scope, buf, bid as i32);
                    coll.add(req);
                    kinds.push(bid as i64);
                    pending_recv += 1;
                }
            }

            //-----------------------------------------------------------------
            // pack each block; self blocks land in their receive slot, the
            // others start their send as soon as they are full
            //-----------------------------------------------------------------
            for bid in 0..send_side.nblocks {
                if send_side.dest_rank[bid] == sub_rank {
                    let target = recv_slots[send_side.dest_tag[bid]]
                        .as_deref_mut()
                        .expect("self slots are never posted");
                    self.pack_block(send_side, bid, lin, v_read, target);
                } else {
                    let buf = send_slots[bid].take().expect("each block is sent once");
                    self.pack_block(send_side, bid, lin, v_read, &mut *buf);
                    let buf: &[f64] = buf;
                    let req = self
                        .subcomm
                        .process_at_rank(send_side.dest_rank[bid])
                        .immediate_send_with_tag(scope, buf, send_side.dest_tag[bid] as i32);
                    coll.add(req);
                    kinds.push(-1);
                }
            }

            //-----------------------------------------------------------------
            // the target region may alias the source: start from zero
            //-----------------------------------------------------------------
            v[..lout.memsize].iter_mut().for_each(|x| *x = 0.0);
            let v_write = SendPtrMut::new(v);

            // self blocks are already complete
            for bid in 0..recv_side.nblocks {
                if recv_side.dest_rank[bid] == sub_rank {
                    self.unpack_block(recv_side, bid, lin, lout, recv_base, v_write);
                }
            }

            //-----------------------------------------------------------------
            // wait for a block and copy it as soon as it arrives
            //-----------------------------------------------------------------
            while pending_recv > 0 {
                let (idx, _status) = coll
                    .wait_any()
                    .expect("receptions are pending, so requests remain");
                let k = kinds[idx as usize];
                if k >= 0 {
                    self.unpack_block(recv_side, k as usize, lin, lout, recv_base, v_write);
                    pending_recv -= 1;
                }
            }
            // close the remaining send requests
            while coll.incomplete() > 0 {
                let _ = coll.wait_any();
            }
        });
    }

    /// Copy one block from the field into its staging slot, contiguous runs
    /// along the sending topology's fast axis.
    fn pack_block(
        &self,
        side: &BlockSide,
        bid: usize,
        lin: &super::TopoLayout,
        v: SendPtr<f64>,
        dst: &mut [f64],
    ) {
        let nf = self.nf;
        let nbb = self.n_by_block;
        let ax0 = lin.axis;
        let ax1 = (ax0 + 1) % 3;
        let ax2 = (ax0 + 2) % 3;

        let ib = local_split(bid, &side.n_block, side.axis);
        let bs = side.block_size(&ib);
        let loc0 = side.start[ax0] + ib[ax0] * nbb[ax0];
        let loc1 = side.start[ax1] + ib[ax1] * nbb[ax1];
        let loc2 = side.start[ax2] + ib[ax2] * nbb[ax2];
        let chunk = self.pad_doubles(bs[0] * bs[1] * bs[2] * nf);
        let nmax = bs[ax0] * nf;
        let dst_ptr = SendPtrMut::new(dst);

        (0..self.lda).into_par_iter().for_each(|lia| {
            let v_base = lia * lin.memdim + local_index(ax0, loc0, loc1, loc2, ax0, &lin.nmem, nf);
            let b_base = lia * chunk;
            for id in 0..bs[ax1] * bs[ax2] {
                let i1 = id % bs[ax1];
                let i2 = id / bs[ax1];
                let my_idx = v_base + local_index(ax0, 0, i1, i2, ax0, &lin.nmem, nf);
                unsafe {
                    std::ptr::copy_nonoverlapping(
                        v.raw.add(my_idx),
                        dst_ptr.raw.add(b_base + id * nmax),
                        nmax,
                    );
                }
            }
        });
    }

    /// Scatter one received block into the field, strided along the receiving
    /// topology's fast axis.
    fn unpack_block(
        &self,
        side: &BlockSide,
        bid: usize,
        lin: &super::TopoLayout,
        lout: &super::TopoLayout,
        recv: SendPtr<f64>,
        v: SendPtrMut<f64>,
    ) {
        let nf = self.nf;
        let nbb = self.n_by_block;
        let ax0 = lin.axis;
        let ax1 = (ax0 + 1) % 3;
        let ax2 = (ax0 + 2) % 3;
        let out_axis = lout.axis;

        let ib = local_split(bid, &side.n_block, side.axis);
        let bs = side.block_size(&ib);
        let loc0 = side.start[ax0] + ib[ax0] * nbb[ax0];
        let loc1 = side.start[ax1] + ib[ax1] * nbb[ax1];
        let loc2 = side.start[ax2] + ib[ax2] * nbb[ax2];
        let chunk = self.pad_doubles(bs[0] * bs[1] * bs[2] * nf);
        let stride = local_index(ax0, 1, 0, 0, out_axis, &lout.nmem, nf);
        let src_base = bid * self.block_slot;

        (0..self.lda).into_par_iter().for_each(|lia| {
            let v_base =
                lia * lout.memdim + local_index(ax0, loc0, loc1, loc2, out_axis, &lout.nmem, nf);
            let b_base = src_base + lia * chunk;
            for id in 0..bs[ax1] * bs[ax2] {
                let i1 = id % bs[ax1];
                let i2 = id / bs[ax1];
                let my_idx = v_base + local_index(ax0, 0, i1, i2, out_axis, &lout.nmem, nf);
                let buf_idx = b_base + id * bs[ax0] * nf;
                unsafe {
                    if nf == 1 {
                        for i0 in 0..bs[ax0] {
                            *v.raw.add(my_idx + i0 * stride) = *recv.raw.add(buf_idx + i0);
                        }
                    } else {
                        for i0 in 0..bs[ax0] {
                            *v.raw.add(my_idx + i0 * stride) = *recv.raw.add(buf_idx + i0 * 2);
                            *v.raw.add(my_idx + i0 * stride + 1) =
                                *recv.raw.add(buf_idx + i0 * 2 + 1);
                        }
                    }
                }
            }
        });
    }
}
