//! Pathfinding tests: one-shot A*, sliced searches and straight-path
//! extraction over hand-authored corridor meshes.

#[cfg(test)]
mod tests {
    use tilenav_common::Vec3;

    use crate::filter::{QueryFilter, StandardFilter};
    use crate::nav_mesh::{NavMesh, NavMeshParams, PolyRef};
    use crate::query::{NavMeshQuery, StraightPathFlag, H_SCALE};
    use crate::sliced::{PathOptions, SlicedPathState};
    use crate::status::Status;
    use crate::test_mesh::{corridor_tile, l_tile, square_tile};

    fn corridor_mesh() -> (NavMesh, Vec<PolyRef>) {
        let mut mesh = NavMesh::new(NavMeshParams::default()).unwrap();
        mesh.add_tile(corridor_tile(0, 0)).unwrap();
        let tile = mesh.tile_at(0, 0).unwrap();
        let refs = (0..5).map(|i| mesh.poly_ref(tile, i)).collect();
        (mesh, refs)
    }

    /// Corridor plus a second, unconnected corridor further along x.
    fn split_mesh() -> (NavMesh, Vec<PolyRef>, Vec<PolyRef>) {
        let mut mesh = NavMesh::new(NavMeshParams::default()).unwrap();
        mesh.add_tile(corridor_tile(0, 0)).unwrap();
        mesh.add_tile(corridor_tile(2, 0)).unwrap();
        let near = {
            let tile = mesh.tile_at(0, 0).unwrap();
            (0..5).map(|i| mesh.poly_ref(tile, i)).collect()
        };
        let far = {
            let tile = mesh.tile_at(2, 0).unwrap();
            (0..5).map(|i| mesh.poly_ref(tile, i)).collect()
        };
        (mesh, near, far)
    }

    #[test]
    fn test_same_ref_returns_single_element_path() {
        let (mesh, refs) = corridor_mesh();
        let mut query = NavMeshQuery::new();
        let filter = StandardFilter::new();

        let result = query
            .find_path(
                &mesh,
                refs[2],
                refs[2],
                Vec3::new(5.0, 0.0, 1.0),
                Vec3::new(5.5, 0.0, 1.0),
                &filter,
            )
            .unwrap();
        assert_eq!(result.path, vec![refs[2]]);
        assert!(!result.partial);
    }

    #[test]
    fn test_corridor_path_visits_every_polygon() {
        let (mesh, refs) = corridor_mesh();
        let mut query = NavMeshQuery::new();
        let filter = StandardFilter::new();

        let result = query
            .find_path(
                &mesh,
                refs[0],
                refs[4],
                Vec3::new(1.0, 0.0, 1.0),
                Vec3::new(9.0, 0.0, 1.0),
                &filter,
            )
            .unwrap();
        assert_eq!(result.path, refs);
        assert!(!result.partial);
    }

    #[test]
    fn test_path_cost_is_monotone_and_admissible() {
        let (mesh, refs) = corridor_mesh();
        let mut query = NavMeshQuery::new();
        let filter = StandardFilter::new();

        let start = Vec3::new(1.0, 0.0, 1.0);
        let end = Vec3::new(9.0, 0.0, 1.0);
        let result = query
            .find_path(&mesh, refs[0], refs[4], start, end, &filter)
            .unwrap();

        // Re-accumulate the traversal cost along the portal midpoints the
        // search used as node positions.
        let mut pos = start;
        let mut running = 0.0;
        let mut prev_running = 0.0;
        for win in result.path.windows(2) {
            let mid = query.get_edge_mid_point(&mesh, win[0], win[1]).unwrap();
            running += pos.distance(mid);
            assert!(running >= prev_running);
            prev_running = running;
            pos = mid;
        }
        running += pos.distance(end);

        assert!(running >= start.distance(end) * H_SCALE);
    }

    #[test]
    fn test_unreachable_goal_yields_partial_path() {
        let (mesh, near, far) = split_mesh();
        let mut query = NavMeshQuery::new();
        let filter = StandardFilter::new();

        let result = query
            .find_path(
                &mesh,
                near[0],
                far[0],
                Vec3::new(1.0, 0.0, 1.0),
                Vec3::new(21.0, 0.0, 1.0),
                &filter,
            )
            .unwrap();
        assert!(result.partial);
        // Best effort runs to the end of the reachable corridor.
        assert_eq!(result.path, near);
    }

    #[test]
    fn test_invalid_params_fail_fast() {
        let (mesh, refs) = corridor_mesh();
        let mut query = NavMeshQuery::new();
        let filter = StandardFilter::new();

        let bad = PolyRef::NONE;
        assert_eq!(
            query
                .find_path(&mesh, bad, refs[4], Vec3::ZERO, Vec3::ZERO, &filter)
                .unwrap_err(),
            Status::InvalidParam
        );
        assert_eq!(
            query
                .find_path(
                    &mesh,
                    refs[0],
                    refs[4],
                    Vec3::new(f32::NAN, 0.0, 0.0),
                    Vec3::ZERO,
                    &filter,
                )
                .unwrap_err(),
            Status::InvalidParam
        );
    }

    #[test]
    fn test_sliced_single_iteration_steps_match_direct_path() {
        let (mesh, refs) = corridor_mesh();
        let filter = StandardFilter::new();
        let start = Vec3::new(1.0, 0.0, 1.0);
        let end = Vec3::new(9.0, 0.0, 1.0);

        let mut query = NavMeshQuery::new();
        let direct = query
            .find_path(&mesh, refs[0], refs[4], start, end, &filter)
            .unwrap();

        let state = query
            .init_sliced_find_path(&mesh, refs[0], refs[4], start, end, PathOptions::default())
            .unwrap();
        assert_eq!(state, SlicedPathState::InProgress);

        loop {
            let (iters, state) = query.update_sliced_find_path(&mesh, 1, &filter).unwrap();
            assert!(iters <= 1);
            if !state.is_in_progress() {
                assert_eq!(state, SlicedPathState::Success);
                break;
            }
        }

        let sliced = query.finalize_sliced_find_path(&mesh, &filter).unwrap();
        assert_eq!(sliced.path, direct.path);
        assert_eq!(sliced.partial, direct.partial);
        assert_eq!(query.sliced_path_state(), SlicedPathState::Idle);
    }

    #[test]
    fn test_sliced_same_poly_short_circuits() {
        let (mesh, refs) = corridor_mesh();
        let mut query = NavMeshQuery::new();
        let filter = StandardFilter::new();

        let state = query
            .init_sliced_find_path(
                &mesh,
                refs[1],
                refs[1],
                Vec3::new(3.0, 0.0, 1.0),
                Vec3::new(3.5, 0.0, 1.0),
                PathOptions::default(),
            )
            .unwrap();
        assert_eq!(state, SlicedPathState::Success);

        let result = query.finalize_sliced_find_path(&mesh, &filter).unwrap();
        assert_eq!(result.path, vec![refs[1]]);
        assert!(!result.partial);
    }

    #[test]
    fn test_sliced_drained_open_list_is_partial() {
        let (mesh, near, far) = split_mesh();
        let mut query = NavMeshQuery::new();
        let filter = StandardFilter::new();

        query
            .init_sliced_find_path(
                &mesh,
                near[0],
                far[4],
                Vec3::new(1.0, 0.0, 1.0),
                Vec3::new(29.0, 0.0, 1.0),
                PathOptions::default(),
            )
            .unwrap();

        let mut state = SlicedPathState::InProgress;
        while state.is_in_progress() {
            state = query.update_sliced_find_path(&mesh, 4, &filter).unwrap().1;
        }
        assert_eq!(state, SlicedPathState::Partial);

        let result = query.finalize_sliced_find_path(&mesh, &filter).unwrap();
        assert!(result.partial);
        assert_eq!(result.path, near);
    }

    #[test]
    fn test_finalize_partial_returns_visited_prefix() {
        let (mesh, near, far) = split_mesh();
        let mut query = NavMeshQuery::new();
        let filter = StandardFilter::new();

        query
            .init_sliced_find_path(
                &mesh,
                near[0],
                far[4],
                Vec3::new(1.0, 0.0, 1.0),
                Vec3::new(29.0, 0.0, 1.0),
                PathOptions::default(),
            )
            .unwrap();
        while query
            .update_sliced_find_path(&mesh, 8, &filter)
            .unwrap()
            .1
            .is_in_progress()
        {}

        let existing = vec![near[0], near[1], near[2]];
        let result = query
            .finalize_sliced_find_path_partial(&mesh, &existing, &filter)
            .unwrap();
        assert!(result.partial);
        assert_eq!(result.path, existing);
    }

    #[test]
    fn test_sliced_fails_when_mesh_changes_underneath() {
        let mut mesh = NavMesh::new(NavMeshParams::default()).unwrap();
        mesh.add_tile(square_tile(0, 0)).unwrap();
        mesh.add_tile(square_tile(1, 0)).unwrap();
        mesh.add_tile(square_tile(2, 0)).unwrap();
        let start_ref = {
            let tile = mesh.tile_at(0, 0).unwrap();
            mesh.poly_ref(tile, 0)
        };
        let end_ref = {
            let tile = mesh.tile_at(2, 0).unwrap();
            mesh.poly_ref(tile, 0)
        };

        let mut query = NavMeshQuery::new();
        let filter = StandardFilter::new();
        query
            .init_sliced_find_path(
                &mesh,
                start_ref,
                end_ref,
                Vec3::new(5.0, 0.0, 5.0),
                Vec3::new(25.0, 0.0, 5.0),
                PathOptions::default(),
            )
            .unwrap();
        let (_, state) = query.update_sliced_find_path(&mesh, 1, &filter).unwrap();
        assert!(state.is_in_progress());

        // The goal tile is streamed out while the search is suspended.
        mesh.remove_tile(2, 0).unwrap();

        let (_, state) = query.update_sliced_find_path(&mesh, 10, &filter).unwrap();
        assert_eq!(state, SlicedPathState::Failed);
        assert_eq!(
            query.finalize_sliced_find_path(&mesh, &filter).unwrap_err(),
            Status::Failure
        );
        // Finalize resets the machine even after a failure.
        assert_eq!(query.sliced_path_state(), SlicedPathState::Idle);
    }

    #[test]
    fn test_any_angle_corridor_path_matches_corridor() {
        let (mesh, refs) = corridor_mesh();
        let mut query = NavMeshQuery::new();
        let filter = StandardFilter::new();

        query
            .init_sliced_find_path(
                &mesh,
                refs[0],
                refs[4],
                Vec3::new(1.0, 0.0, 1.0),
                Vec3::new(9.0, 0.0, 1.0),
                PathOptions {
                    any_angle: true,
                    raycast_limit: 0.0,
                },
            )
            .unwrap();
        while query
            .update_sliced_find_path(&mesh, 4, &filter)
            .unwrap()
            .1
            .is_in_progress()
        {}
        assert_eq!(query.sliced_path_state(), SlicedPathState::Success);

        // Finalize replays the shortcut raycasts; the spliced sub-paths must
        // reproduce the corridor without duplicated boundary references.
        let result = query.finalize_sliced_find_path(&mesh, &filter).unwrap();
        assert_eq!(result.path, refs);
        assert!(!result.partial);
    }

    #[test]
    fn test_straight_path_across_straight_corridor() {
        let (mesh, refs) = corridor_mesh();
        let mut query = NavMeshQuery::new();
        let filter = StandardFilter::new();

        let start = Vec3::new(1.0, 0.0, 1.0);
        let end = Vec3::new(9.0, 0.0, 1.0);
        let path = query
            .find_path(&mesh, refs[0], refs[4], start, end, &filter)
            .unwrap();

        let straight = query
            .find_straight_path(&mesh, start, end, &path.path)
            .unwrap();
        assert!(!straight.partial);
        assert_eq!(straight.points.len(), 2);
        assert_eq!(straight.points[0].flag, StraightPathFlag::Start);
        assert!(straight.points[0].pos.abs_diff_eq(start, 1e-5));
        assert_eq!(straight.points[1].flag, StraightPathFlag::End);
        assert!(straight.points[1].pos.abs_diff_eq(end, 1e-5));
    }

    #[test]
    fn test_straight_path_bends_at_inner_corner() {
        let mut mesh = NavMesh::new(NavMeshParams::default()).unwrap();
        mesh.add_tile(l_tile()).unwrap();
        let tile = mesh.tile_at(0, 0).unwrap();
        let refs: Vec<PolyRef> = (0..3).map(|i| mesh.poly_ref(tile, i)).collect();

        let mut query = NavMeshQuery::new();
        let filter = StandardFilter::new();

        let start = Vec3::new(1.0, 0.0, 0.5);
        let end = Vec3::new(3.5, 0.0, 3.5);
        let path = query
            .find_path(&mesh, refs[0], refs[2], start, end, &filter)
            .unwrap();
        assert_eq!(path.path, refs);

        let straight = query
            .find_straight_path(&mesh, start, end, &path.path)
            .unwrap();
        assert_eq!(straight.points.len(), 3);
        assert_eq!(straight.points[1].flag, StraightPathFlag::Corner);
        assert!(straight.points[1]
            .pos
            .abs_diff_eq(Vec3::new(2.0, 0.0, 2.0), 1e-5));
        // The corner waypoint names the polygon entered there.
        assert_eq!(straight.points[1].poly_ref, refs[2]);
    }

    #[test]
    fn test_straight_path_clamps_broken_corridor() {
        let (mesh, refs) = corridor_mesh();
        let query = NavMeshQuery::new();

        let start = Vec3::new(1.0, 0.0, 1.0);
        let end = Vec3::new(9.0, 0.0, 1.0);
        // No portal links the first and last quad directly.
        let broken = vec![refs[0], refs[4]];
        let straight = query.find_straight_path(&mesh, start, end, &broken).unwrap();
        assert!(straight.partial);
        let last = straight.points.last().unwrap();
        assert_eq!(last.flag, StraightPathFlag::End);
        // The end point is clamped onto the first quad's boundary.
        assert!(last.pos.abs_diff_eq(Vec3::new(2.0, 0.0, 1.0), 1e-5));
    }

    #[test]
    fn test_cross_tile_path_uses_border_links() {
        let mut mesh = NavMesh::new(NavMeshParams::default()).unwrap();
        let a = mesh.add_tile(square_tile(0, 0)).unwrap();
        let b = mesh.add_tile(square_tile(1, 0)).unwrap();

        let mut query = NavMeshQuery::new();
        let filter = StandardFilter::new();
        let result = query
            .find_path(
                &mesh,
                a,
                b,
                Vec3::new(5.0, 0.0, 5.0),
                Vec3::new(15.0, 0.0, 5.0),
                &filter,
            )
            .unwrap();
        assert_eq!(result.path, vec![a, b]);
        assert!(!result.partial);
    }

    #[test]
    fn test_filter_blocks_corridor() {
        // Excluding the corridor flags makes every neighbour impassable; the
        // search is left with a partial single-polygon path.
        let (mesh, refs) = corridor_mesh();
        let mut query = NavMeshQuery::new();
        let mut filter = StandardFilter::new();
        filter.exclude_flags = 0x01;

        let result = query
            .find_path(
                &mesh,
                refs[0],
                refs[4],
                Vec3::new(1.0, 0.0, 1.0),
                Vec3::new(9.0, 0.0, 1.0),
                &filter,
            )
            .unwrap();
        assert!(result.partial);
        assert_eq!(result.path, vec![refs[0]]);
    }

    #[test]
    fn test_area_cost_steers_path() {
        // Sanity-check that the cost callback is consulted: a filter that
        // charges area 0 heavily still finds the only available corridor.
        let (mesh, refs) = corridor_mesh();
        let mut query = NavMeshQuery::new();
        let mut filter = StandardFilter::new();
        filter.set_area_cost(0, 7.5);

        let result = query
            .find_path(
                &mesh,
                refs[0],
                refs[4],
                Vec3::new(1.0, 0.0, 1.0),
                Vec3::new(9.0, 0.0, 1.0),
                &filter,
            )
            .unwrap();
        assert_eq!(result.path, refs);

        // And the reported traversal cost scales with the area multiplier.
        let ray = query
            .raycast(
                &mesh,
                refs[0],
                Vec3::new(1.0, 0.0, 1.0),
                Vec3::new(9.0, 0.0, 1.0),
                &filter,
                crate::raycast::RaycastOptions { use_costs: true },
                PolyRef::NONE,
            )
            .unwrap();
        assert!((ray.path_cost - 8.0 * 7.5).abs() < 1e-3);

        // The plain predicate half of the seam still passes these polygons.
        let tile = mesh.tile_at(0, 0).unwrap();
        assert!(filter.pass_filter(refs[0], tile, &tile.polys[0]));
    }
}
