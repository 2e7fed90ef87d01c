//! Multi-rank transpose round trip: forward then backward must reproduce the
//! input bitwise, for both communication backends.
//!
//! ```text
//! mpirun -n 4 mpi_transpose_round_trip
//! ```

use mpi::traits::*;

use poisfft::indexing::local_index;
use poisfft::transpose::Transpose;
use poisfft::types::{CommStrategy, ExecDirection};
use poisfft::Topology;

fn main() {
    let universe = mpi::initialize().expect("MPI initializes once");
    let world = universe.world();
    let size = world.size() as usize;
    let rank = world.rank();

    // a pencil along axis 0 split over the other two directions, exchanged
    // with a pencil along axis 2
    let nglob = [16usize, 16, 16];
    let nproc_in = [1usize, size, 1];
    let nproc_out = [size, 1, 1];

    let tin = Topology::new(0, 1, nglob, nproc_in, false, None, 16, &world)
        .expect("valid input topology");
    let tout = Topology::new(2, 1, nglob, nproc_out, false, None, 16, &world)
        .expect("valid output topology");

    let mut failures = 0;
    for strategy in [CommStrategy::AllToAll, CommStrategy::NonBlocking] {
        let tp = Transpose::new(&tin, &tout, [0, 0, 0], strategy);

        let nmem = tin.nmem_all();
        let istart = tin.start_global_all();
        let mut v = vec![0.0f64; tin.memsize().max(tout.memsize())];
        for k in 0..tin.nloc(2) {
            for j in 0..tin.nloc(1) {
                for i in 0..tin.nloc(0) {
                    let g = [istart[0] + i, istart[1] + j, istart[2] + k];
                    v[local_index(0, i, j, k, 0, &nmem, 1)] =
                        (g[0] + 100 * g[1] + 10000 * g[2]) as f64;
                }
            }
        }
        let reference = v.clone();

        let mut send = vec![0.0f64; tp.required_buffer_len()];
        let mut recv = vec![0.0f64; tp.required_buffer_len()];
        tp.execute(&mut v, ExecDirection::Forward, &mut send, &mut recv);

        // check the forward leg against the global indexing
        let onmem = tout.nmem_all();
        let ostart = tout.start_global_all();
        let mut fwd_ok = true;
        for k in 0..tout.nloc(2) {
            for j in 0..tout.nloc(1) {
                for i in 0..tout.nloc(0) {
                    let g = [ostart[0] + i, ostart[1] + j, ostart[2] + k];
                    let expect = (g[0] + 100 * g[1] + 10000 * g[2]) as f64;
                    if v[local_index(0, i, j, k, 2, &onmem, 1)] != expect {
                        fwd_ok = false;
                    }
                }
            }
        }

        tp.execute(&mut v, ExecDirection::Backward, &mut send, &mut recv);
        let bwd_ok = v == reference;

        let local = i32::from(!(fwd_ok && bwd_ok));
        let mut global = 0i32;
        world.all_reduce_into(&local, &mut global, mpi::collective::SystemOperation::sum());
        if rank == 0 {
            println!(
                "{:?}: forward {}, round trip {} ({} rank failures)",
                strategy,
                if fwd_ok { "ok" } else { "FAILED" },
                if bwd_ok { "bitwise" } else { "FAILED" },
                global
            );
        }
        failures += global;
    }

    if rank == 0 && failures > 0 {
        std::process::exit(1);
    }
}
