//! Direction ordering and the dry run that sizes intermediate topologies.

use crate::topology::Topology;
use crate::transform::TransformPlan;

/// Sort the three plans in ascending category priority.
///
/// The least-priority plan is swapped into position 0 first, then positions 1
/// and 2 are ordered between themselves. Real-to-real symmetric transforms
/// thereby execute while the data is real, and the full complex FFT acts on
/// the smallest working set.
pub fn sort_plans(plans: &mut [TransformPlan; 3]) {
    let mut id_min = 0usize;
    let mut val_min = i32::MAX;
    for (id, plan) in plans.iter().enumerate() {
        if plan.priority() < val_min {
            id_min = id;
            val_min = plan.priority();
        }
    }
    if id_min != 0 {
        plans.swap(0, id_min);
    }
    if plans[1].priority() > plans[2].priority() {
        plans.swap(1, 2);
    }
    assert!(
        plans[0].priority() <= plans[1].priority() && plans[1].priority() <= plans[2].priority(),
        "wrong order in the plans: {} {} {}",
        plans[0].priority(),
        plans[1].priority(),
        plans[2].priority()
    );
}

/// Choose the process grid of an intermediate topology.
///
/// The new fast axis `dim` is not cut; the process count along `keep` is
/// taken from the hint; the remaining processes land on the third axis.
pub fn pencil_nproc_hint(
    dim: usize,
    comm_size: usize,
    keep: usize,
    hint: [usize; 3],
) -> Result<[usize; 3], std::io::Error> {
    assert_ne!(dim, keep, "the kept axis cannot be the new fast axis");
    let third = 3 - dim - keep;
    let mut nproc = [1usize; 3];
    nproc[dim] = 1;
    nproc[keep] = hint[keep];
    nproc[third] = comm_size / hint[keep];
    if nproc[0] * nproc[1] * nproc[2] != comm_size {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!(
                "cannot distribute {} processes as a pencil along axis {} keeping {} processes on axis {}",
                comm_size, dim, hint[keep], keep
            ),
        ));
    }
    Ok(nproc)
}

/// Initialize the plans without building topologies (backward and
/// backward-derivative plans follow the same size evolution as the forward
/// ones).
pub fn init_plans_only(plans: &mut [TransformPlan; 3], topo_phys: &Topology, ndim: usize) {
    let mut size = [topo_phys.nglob(0), topo_phys.nglob(1), topo_phys.nglob(2)];
    let mut is_complex = false;
    for plan in plans.iter_mut().take(ndim) {
        plan.init(&mut size, &mut is_complex);
    }
}

/// Dry run for the field: initialize the plans and build one intermediate
/// topology per transform stage, plus the memory shift of each transpose.
///
/// Topologies of real-to-complex stages are returned in their real state,
/// ready for the transpose that precedes the transform.
pub fn init_field_topos(
    topo_phys: &Topology,
    plans: &mut [TransformPlan; 3],
    ndim: usize,
    alignment: usize,
) -> Result<(Vec<Topology>, Vec<[i64; 3]>), std::io::Error> {
    let comm_size = topo_phys.nproc(0) * topo_phys.nproc(1) * topo_phys.nproc(2);
    let mut size = [topo_phys.nglob(0), topo_phys.nglob(1), topo_phys.nglob(2)];
    let mut is_complex = false;

    let mut topos = Vec::with_capacity(ndim);
    let mut shifts = Vec::with_capacity(ndim);
    let mut prev_nproc = [
        topo_phys.nproc(0),
        topo_phys.nproc(1),
        topo_phys.nproc(2),
    ];
    let mut prev_dim: Option<usize> = None;

    for ip in 0..ndim {
        plans[ip].init(&mut size, &mut is_complex);
        let dim = plans[ip].dim();

        // keep constant the axis that is neither the old nor the new fast
        // axis; the very first transpose preserves the physical grid shape
        let keep = match prev_dim {
            Option::None => plans[1].dim(),
            Some(p) => 3 - p - dim,
        };
        let nproc = pencil_nproc_hint(dim, comm_size, keep, prev_nproc)?;

        let mut topo = Topology::new(
            dim,
            topo_phys.lda(),
            size,
            nproc,
            is_complex,
            Some(topo_phys.axproc()),
            alignment,
            topo_phys.comm(),
        )?;
        if plans[ip].is_r2c() {
            topo.switch_to_real();
        }

        let mut shift = [0i64; 3];
        shift[dim] = plans[ip].fieldstart() as i64;
        shifts.push(shift);

        prev_nproc = nproc;
        prev_dim = Some(dim);
        topos.push(topo);
    }
    Ok((topos, shifts))
}

/// Dry run for the Green's function.
///
/// The plans run through the same forward size evolution as the field, then
/// the topologies are built backward from the field's final spectral layout:
/// the topology after plan `ndim - 1` matches the field's, and every stage
/// whose transform is a true real-to-complex FFT re-doubles the direction so
/// that the Green's function can be filled in real space in topology 0.
pub fn init_green_topos(
    topo_phys: &Topology,
    plans: &mut [TransformPlan; 3],
    field_final: &Topology,
    ndim: usize,
    alignment: usize,
) -> Result<(Vec<Topology>, Vec<[i64; 3]>), std::io::Error> {
    let comm_size = topo_phys.nproc(0) * topo_phys.nproc(1) * topo_phys.nproc(2);
    let mut size = [topo_phys.nglob(0), topo_phys.nglob(1), topo_phys.nglob(2)];
    let mut is_complex = false;
    for plan in plans.iter_mut().take(ndim) {
        plan.init(&mut size, &mut is_complex);
    }

    let mut topos: Vec<Option<Topology>> = (0..ndim).map(|_| Option::None).collect();
    let mut shifts = vec![[0i64; 3]; ndim];
    let mut next_nproc = [0usize; 3];

    for ip in (0..ndim).rev() {
        let dim = plans[ip].dim();
        let nproc = if ip == ndim - 1 {
            [
                field_final.nproc(0),
                field_final.nproc(1),
                field_final.nproc(2),
            ]
        } else {
            pencil_nproc_hint(dim, comm_size, plans[ip + 1].dim(), next_nproc)?
        };

        let mut topo = Topology::new(
            dim,
            1,
            size,
            nproc,
            is_complex,
            Some(topo_phys.axproc()),
            alignment,
            topo_phys.comm(),
        )?;

        if ip < ndim - 1 {
            let mut shift = [0i64; 3];
            shift[plans[ip + 1].dim()] = plans[ip + 1].fieldstart() as i64;
            shifts[ip + 1] = shift;
        }

        // revert what the FFT will do so topology 0 holds the real samples
        if plans[ip].r2c_done_by_plan() {
            topo.switch_to_real();
            size[dim] *= 2;
            is_complex = false;
        }

        next_nproc = nproc;
        topos[ip] = Some(topo);
    }

    Ok((
        topos.into_iter().map(|t| t.expect("every stage is built")).collect(),
        shifts,
    ))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::solver::test_universe;
    use crate::transform::PlanKind;
    use crate::types::{BoundaryKind, ExecDirection};

    fn plan_for(dim: usize, bc: [BoundaryKind; 2]) -> TransformPlan {
        TransformPlan::new(
            1,
            dim,
            [0.1; 3],
            [1.0; 3],
            &[bc],
            ExecDirection::Forward,
            false,
        )
        .unwrap()
    }

    #[test]
    fn test_sort_plans_orders_categories() {
        use BoundaryKind::*;
        // periodic / symmetric / unbounded out of order
        let mut plans = [
            plan_for(0, [Unbounded, Unbounded]),
            plan_for(1, [Periodic, Periodic]),
            plan_for(2, [Even, Even]),
        ];
        sort_plans(&mut plans);
        assert_eq!(plans[0].kind(), PlanKind::SymSym);
        assert_eq!(plans[1].kind(), PlanKind::Periodic);
        assert_eq!(plans[2].kind(), PlanKind::Unbounded);
        assert_eq!(plans[0].dim(), 2);
        assert_eq!(plans[1].dim(), 1);
        assert_eq!(plans[2].dim(), 0);
    }

    #[test]
    fn test_sort_plans_stable_when_equal() {
        use BoundaryKind::*;
        let mut plans = [
            plan_for(0, [Periodic, Periodic]),
            plan_for(1, [Periodic, Periodic]),
            plan_for(2, [Periodic, Periodic]),
        ];
        sort_plans(&mut plans);
        assert_eq!(plans[0].dim(), 0);
        assert_eq!(plans[1].dim(), 1);
        assert_eq!(plans[2].dim(), 2);
    }

    #[test]
    fn test_pencil_nproc_hint() {
        let nproc = pencil_nproc_hint(1, 8, 2, [4, 1, 2]).unwrap();
        assert_eq!(nproc, [4, 1, 2]);
        assert!(pencil_nproc_hint(1, 7, 2, [4, 1, 2]).is_err());
    }

    #[test]
    fn test_field_dry_run_periodic() {
        let world = test_universe();
        let topo =
            Topology::new(0, 1, [32, 32, 32], [1, 1, 1], false, None, 16, &world).unwrap();
        let mut plans = [
            plan_for(0, [BoundaryKind::Periodic, BoundaryKind::Periodic]),
            plan_for(1, [BoundaryKind::Periodic, BoundaryKind::Periodic]),
            plan_for(2, [BoundaryKind::Periodic, BoundaryKind::Periodic]),
        ];
        sort_plans(&mut plans);
        let (topos, shifts) = init_field_topos(&topo, &mut plans, 3, 16).unwrap();
        assert_eq!(topos.len(), 3);
        // the first stage is the real-to-complex one, kept in real layout
        assert!(!topos[0].is_complex());
        assert_eq!(topos[0].nglob(0), 34);
        // later stages are complex with the r2c direction shrunk to 17
        assert!(topos[1].is_complex());
        assert_eq!(topos[1].nglob(0), 17);
        assert_eq!(topos[1].nglob(1), 32);
        assert_eq!(topos[2].axis(), 2);
        assert!(shifts.iter().all(|s| *s == [0, 0, 0]));
    }

    #[test]
    fn test_green_dry_run_matches_field_final() {
        let world = test_universe();
        let topo =
            Topology::new(0, 1, [16, 16, 16], [1, 1, 1], false, None, 16, &world).unwrap();
        let mut fplans = [
            plan_for(0, [BoundaryKind::Unbounded, BoundaryKind::Unbounded]),
            plan_for(1, [BoundaryKind::Unbounded, BoundaryKind::Unbounded]),
            plan_for(2, [BoundaryKind::Unbounded, BoundaryKind::Unbounded]),
        ];
        sort_plans(&mut fplans);
        let (ftopos, _) = init_field_topos(&topo, &mut fplans, 3, 16).unwrap();

        let mut gplans = [
            TransformPlan::new(
                1,
                0,
                [0.1; 3],
                [1.0; 3],
                &[[BoundaryKind::Unbounded, BoundaryKind::Unbounded]],
                ExecDirection::Forward,
                true,
            )
            .unwrap(),
            TransformPlan::new(
                1,
                1,
                [0.1; 3],
                [1.0; 3],
                &[[BoundaryKind::Unbounded, BoundaryKind::Unbounded]],
                ExecDirection::Forward,
                true,
            )
            .unwrap(),
            TransformPlan::new(
                1,
                2,
                [0.1; 3],
                [1.0; 3],
                &[[BoundaryKind::Unbounded, BoundaryKind::Unbounded]],
                ExecDirection::Forward,
                true,
            )
            .unwrap(),
        ];
        sort_plans(&mut gplans);
        let (gtopos, _) =
            init_green_topos(&topo, &mut gplans, &ftopos[2], 3, 16).unwrap();

        // the last Green topology matches the field's final spectral layout
        for id in 0..3 {
            assert_eq!(gtopos[2].nglob(id), ftopos[2].nglob(id));
            assert_eq!(gtopos[2].nproc(id), ftopos[2].nproc(id));
        }
        // topology 0 is real over the full doubled domain
        assert!(!gtopos[0].is_complex());
        assert_eq!(gtopos[0].nglob(0), 34); // in-place padded 2*16 + 2
        assert_eq!(gtopos[0].nglob(1), 32);
        assert_eq!(gtopos[0].nglob(2), 32);
    }
}
