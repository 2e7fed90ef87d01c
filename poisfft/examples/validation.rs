//! Validation of the solver against the analytical solution of a Gaussian
//! blob, with image contributions for every symmetric or periodic direction.
//!
//! ```text
//! mpirun -n 8 validation -- --nglob 64,64,64 --nproc 2,2,2 \
//!        --bc UU,UU,UU --kernel hej6 --sigma 0.1
//! ```

use mpi::traits::*;
use statrs::function::erf::erf;

use poisfft::indexing::local_index;
use poisfft::{BoundaryKind, DiffOrder, GreenKind, SolveMode, Solver, Topology};

struct Case {
    nglob: [usize; 3],
    nproc: [usize; 3],
    l: [f64; 3],
    bc: [[BoundaryKind; 2]; 3],
    kernel: GreenKind,
    sigma: f64,
    center: [f64; 3],
    reorder: bool,
}

fn parse_triplet(s: &str) -> [usize; 3] {
    let v: Vec<usize> = s
        .split(',')
        .map(|x| x.parse().expect("expected an integer triplet"))
        .collect();
    assert_eq!(v.len(), 3, "expected three comma-separated values");
    [v[0], v[1], v[2]]
}

fn parse_bc(s: &str) -> [[BoundaryKind; 2]; 3] {
    let parse_side = |c: char| match c {
        'P' => BoundaryKind::Periodic,
        'E' => BoundaryKind::Even,
        'O' => BoundaryKind::Odd,
        'U' => BoundaryKind::Unbounded,
        _ => panic!("unknown boundary letter {} (use P, E, O or U)", c),
    };
    let dims: Vec<&str> = s.split(',').collect();
    assert_eq!(dims.len(), 3, "expected three boundary pairs, e.g. UU,UU,PP");
    let mut bc = [[BoundaryKind::Unbounded; 2]; 3];
    for (d, pair) in dims.iter().enumerate() {
        let chars: Vec<char> = pair.chars().collect();
        assert_eq!(chars.len(), 2, "each boundary pair has two letters");
        bc[d] = [parse_side(chars[0]), parse_side(chars[1])];
    }
    bc
}

fn parse_args() -> Case {
    let mut case = Case {
        nglob: [64, 64, 64],
        nproc: [1, 1, 1],
        l: [1.0, 1.0, 1.0],
        bc: [[BoundaryKind::Unbounded; 2]; 3],
        kernel: GreenKind::Hej6,
        sigma: 0.1,
        center: [0.5, 0.5, 0.5],
        reorder: false,
    };
    let args: Vec<String> = std::env::args().collect();
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--nglob" => {
                case.nglob = parse_triplet(&args[i + 1]);
                i += 2;
            }
            "--nproc" => {
                case.nproc = parse_triplet(&args[i + 1]);
                i += 2;
            }
            "--bc" => {
                case.bc = parse_bc(&args[i + 1]);
                i += 2;
            }
            "--kernel" => {
                case.kernel = match args[i + 1].as_str() {
                    "chat2" => GreenKind::Chat2,
                    "lgf2" => GreenKind::Lgf2,
                    "hej2" => GreenKind::Hej2,
                    "hej4" => GreenKind::Hej4,
                    "hej6" => GreenKind::Hej6,
                    other => panic!("unknown kernel {}", other),
                };
                i += 2;
            }
            "--sigma" => {
                case.sigma = args[i + 1].parse().expect("sigma is a float");
                i += 2;
            }
            "--reorder" => {
                case.reorder = true;
                i += 1;
            }
            "--" => {
                i += 1;
            }
            other => panic!("unknown argument {}", other),
        }
    }
    case
}

fn main() {
    let universe = mpi::initialize().expect("MPI initializes once");
    let world = universe.world();
    let rank = world.rank();
    let case = parse_args();

    let h = [
        case.l[0] / case.nglob[0] as f64,
        case.l[1] / case.nglob[1] as f64,
        case.l[2] / case.nglob[2] as f64,
    ];

    let topo = Topology::new(0, 1, case.nglob, case.nproc, false, None, 16, &world)
        .expect("valid physical topology");
    let mut solver = Solver::new(
        topo,
        &[case.bc],
        h,
        case.l,
        DiffOrder::None,
        Some(poisfft::profiler::Profiler::new("validation")),
    )
    .expect("valid solver configuration");
    solver.set_green_kind(case.kernel);
    if case.reorder {
        solver.enable_rank_reorder(true);
    }
    solver.setup(false).expect("setup succeeds");

    //-------------------------------------------------------------------------
    // fill the rhs and the reference solution, accounting for the symmetry
    // images. CAUTION: the Gaussian does not decay fast enough for the
    // reference to be exact when a symmetric or periodic direction is present;
    // one layer of images keeps the error representative.
    //-------------------------------------------------------------------------
    let topo = solver.topo_physical();
    let nmem = topo.nmem_all();
    let istart = topo.start_global_all();
    let nloc = [topo.nloc(0), topo.nloc(1), topo.nloc(2)];
    let memsize = topo.memsize();
    let mut rhs = vec![0.0f64; memsize];
    let mut reference = vec![0.0f64; memsize];

    let oosigma = 1.0 / case.sigma;
    let oosigma2 = oosigma * oosigma;
    let oosigma3 = oosigma2 * oosigma;
    let c_1o4pi = 1.0 / (4.0 * std::f64::consts::PI);
    let c_1osqrt2 = std::f64::consts::FRAC_1_SQRT_2;

    for j2 in -1i64..2 {
        if j2 != 0 && case.bc[2][((j2 + 1) / 2) as usize] == BoundaryKind::Unbounded {
            continue;
        }
        for j1 in -1i64..2 {
            if j1 != 0 && case.bc[1][((j1 + 1) / 2) as usize] == BoundaryKind::Unbounded {
                continue;
            }
            for j0 in -1i64..2 {
                if j0 != 0 && case.bc[0][((j0 + 1) / 2) as usize] == BoundaryKind::Unbounded {
                    continue;
                }

                let js = [j0, j1, j2];
                let mut sign = 1.0;
                let mut center_pos = [0.0f64; 3];
                for d in 0..3 {
                    let side = ((js[d] + 1) / 2) as usize;
                    if js[d] != 0 && case.bc[d][side] == BoundaryKind::Odd {
                        sign = -sign;
                    }
                    let orig = js[d] as f64 * case.l[d];
                    center_pos[d] = orig
                        + if js[d] != 0 && case.bc[d][side] != BoundaryKind::Periodic {
                            (1.0 - case.center[d]) * case.l[d]
                        } else {
                            case.center[d] * case.l[d]
                        };
                }

                for i2 in 0..nloc[2] {
                    for i1 in 0..nloc[1] {
                        for i0 in 0..nloc[0] {
                            let x = (istart[0] + i0) as f64 * h[0] + 0.5 * h[0] - center_pos[0];
                            let y = (istart[1] + i1) as f64 * h[1] + 0.5 * h[1] - center_pos[1];
                            let z = (istart[2] + i2) as f64 * h[2] + 0.5 * h[2] - center_pos[2];
                            let rho2 = (x * x + y * y + z * z) * oosigma2;
                            let rho = rho2.sqrt();
                            let id = local_index(0, i0, i1, i2, 0, &nmem, 1);

                            rhs[id] -= sign
                                * c_1o4pi
                                * oosigma3
                                * (2.0 / std::f64::consts::PI).sqrt()
                                * (-0.5 * rho2).exp();
                            reference[id] += if rho > 1e-13 {
                                sign * c_1o4pi * oosigma / rho * erf(rho * c_1osqrt2)
                            } else {
                                sign * c_1o4pi * oosigma * (2.0 / std::f64::consts::PI).sqrt()
                            };
                        }
                    }
                }
            }
        }
    }

    //-------------------------------------------------------------------------
    // solve and compute the error norms
    //-------------------------------------------------------------------------
    let mut sol = vec![0.0f64; memsize];
    solver.solve(&mut sol, &rhs, SolveMode::Std);

    let mut lerr2 = 0.0f64;
    let mut lerri = 0.0f64;
    for i2 in 0..nloc[2] {
        for i1 in 0..nloc[1] {
            for i0 in 0..nloc[0] {
                let id = local_index(0, i0, i1, i2, 0, &nmem, 1);
                let err = (sol[id] - reference[id]).abs();
                lerri = lerri.max(err);
                lerr2 += err * err * h[0] * h[1] * h[2];
            }
        }
    }
    let mut err2 = 0.0f64;
    let mut erri = 0.0f64;
    world.all_reduce_into(&lerr2, &mut err2, mpi::collective::SystemOperation::sum());
    world.all_reduce_into(&lerri, &mut erri, mpi::collective::SystemOperation::max());
    err2 = err2.sqrt();

    if rank == 0 {
        println!(
            "{} {:.12e} {:.12e}",
            case.nglob[0], err2, erri
        );
    }
    solver.report_profile();
}
