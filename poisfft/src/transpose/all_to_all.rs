//! Blocking collective execution of a transpose.

use mpi::datatype::{Partition, PartitionMut};
use mpi::traits::*;
use rayon::prelude::*;

use super::Transpose;
use crate::indexing::{local_index, local_split};
use crate::types::{ExecDirection, SendPtr, SendPtrMut};

impl Transpose {
    /// Pack, exchange with one collective, zero the target region and unpack.
    pub(crate) fn execute_a2a(
        &self,
        v: &mut [f64],
        sign: ExecDirection,
        send: &mut [f64],
        recv: &mut [f64],
    ) {
        let (send_side, recv_side, send_count, send_displ, recv_count, recv_displ, lin, lout) =
            match sign {
                ExecDirection::Forward => (
                    &self.iside,
                    &self.oside,
                    &self.i2o_count,
                    &self.i2o_displ,
                    &self.o2i_count,
                    &self.o2i_displ,
                    &self.in_layout,
                    &self.out_layout,
                ),
                ExecDirection::Backward => (
                    &self.oside,
                    &self.iside,
                    &self.o2i_count,
                    &self.o2i_displ,
                    &self.i2o_count,
                    &self.i2o_displ,
                    &self.out_layout,
                    &self.in_layout,
                ),
            };

        let nf = self.nf;
        let lda = self.lda;
        let nbb = self.n_by_block;
        let align = self.align_doubles;
        let pad = move |x: usize| -> usize { (x + align - 1) / align * align };
        let ax0 = lin.axis;
        let ax1 = (ax0 + 1) % 3;
        let ax2 = (ax0 + 2) % 3;

        //---------------------------------------------------------------------
        // fill the buffers, one whole block per task
        //---------------------------------------------------------------------
        let v_ptr = SendPtr::new(v);
        let buf_ptr = SendPtrMut::new(send);
        (0..send_side.nblocks).into_par_iter().for_each(|bid| {
            let ib = local_split(bid, &send_side.n_block, send_side.axis);
            let bs = send_side.block_size(&ib);
            let loc0 = send_side.start[ax0] + ib[ax0] * nbb[ax0];
            let loc1 = send_side.start[ax1] + ib[ax1] * nbb[ax1];
            let loc2 = send_side.start[ax2] + ib[ax2] * nbb[ax2];
            let chunk = pad(bs[0] * bs[1] * bs[2] * nf);
            let nmax = bs[ax0] * nf;

            for lia in 0..lda {
                let v_base =
                    lia * lin.memdim + local_index(ax0, loc0, loc1, loc2, ax0, &lin.nmem, nf);
                let b_base = send_side.offset[bid] + lia * chunk;
                for id in 0..bs[ax1] * bs[ax2] {
                    let i1 = id % bs[ax1];
                    let i2 = id / bs[ax1];
                    let my_idx = v_base + local_index(ax0, 0, i1, i2, ax0, &lin.nmem, nf);
                    let buf_idx = b_base + id * nmax;
                    unsafe {
                        std::ptr::copy_nonoverlapping(
                            v_ptr.raw.add(my_idx),
                            buf_ptr.raw.add(buf_idx),
                            nmax,
                        );
                    }
                }
            }
        });

        //---------------------------------------------------------------------
        // do the communication
        //---------------------------------------------------------------------
        let sub_size = self.subcomm.size() as usize;
        if self.is_all_to_all {
            let c = send_count[0] as usize;
            self.subcomm
                .all_to_all_into(&send[..c * sub_size], &mut recv[..c * sub_size]);
        } else {
            let send_total: usize = send_count.iter().map(|&c| c as usize).sum();
            let recv_total: usize = recv_count.iter().map(|&c| c as usize).sum();
            let partition_snd = Partition::new(&send[..send_total], &send_count[..], &send_displ[..]);
            let mut partition_rcv =
                PartitionMut::new(&mut recv[..recv_total], &recv_count[..], &recv_displ[..]);
            self.subcomm
                .all_to_all_varcount_into(&partition_snd, &mut partition_rcv);
        }

        //---------------------------------------------------------------------
        // the target region may alias the source: start from zero
        //---------------------------------------------------------------------
        v[..lout.memsize].iter_mut().for_each(|x| *x = 0.0);

        //---------------------------------------------------------------------
        // unpack; reading the buffer is contiguous, writing is strided
        //---------------------------------------------------------------------
        let out_axis = lout.axis;
        let v_ptr = SendPtrMut::new(v);
        let buf_ptr = SendPtr::new(recv);
        let stride = local_index(ax0, 1, 0, 0, out_axis, &lout.nmem, nf);
        (0..recv_side.nblocks).into_par_iter().for_each(|bid| {
            let ib = local_split(bid, &recv_side.n_block, recv_side.axis);
            let bs = recv_side.block_size(&ib);
            let loc0 = recv_side.start[ax0] + ib[ax0] * nbb[ax0];
            let loc1 = recv_side.start[ax1] + ib[ax1] * nbb[ax1];
            let loc2 = recv_side.start[ax2] + ib[ax2] * nbb[ax2];
            let chunk = pad(bs[0] * bs[1] * bs[2] * nf);

            for lia in 0..lda {
                let v_base =
                    lia * lout.memdim + local_index(ax0, loc0, loc1, loc2, out_axis, &lout.nmem, nf);
                let b_base = recv_side.offset[bid] + lia * chunk;
                for id in 0..bs[ax1] * bs[ax2] {
                    let i1 = id % bs[ax1];
                    let i2 = id / bs[ax1];
                    let my_idx = v_base + local_index(ax0, 0, i1, i2, out_axis, &lout.nmem, nf);
                    let buf_idx = b_base + id * bs[ax0] * nf;
                    unsafe {
                        if nf == 1 {
                            for i0 in 0..bs[ax0] {
                                *v_ptr.raw.add(my_idx + i0 * stride) = *buf_ptr.raw.add(buf_idx + i0);
                            }
                        } else {
                            for i0 in 0..bs[ax0] {
                                *v_ptr.raw.add(my_idx + i0 * stride) =
                                    *buf_ptr.raw.add(buf_idx + i0 * 2);
                                *v_ptr.raw.add(my_idx + i0 * stride + 1) =
                                    *buf_ptr.raw.add(buf_idx + i0 * 2 + 1);
                            }
                        }
                    }
                }
            }
        });
    }

    #[inline]
    pub(crate) fn pad_doubles(&self, x: usize) -> usize {
        (x + self.align_doubles - 1) / self.align_doubles * self.align_doubles
    }
}
