//! Hand-authored tile fixtures for the query tests
//!
//! The corridor is five 2x2 quads in a row along the x-axis, 2 units wide in
//! z, so the centerline sits exactly 1 unit from either wall. Quads are
//! wound positively on the xz-plane.

use tilenav_common::Vec3;

use crate::nav_mesh::{PolyData, TileData, EXT_LINK};

/// Five linearly linked quads: x in [0, 10), z in [0, 2), at a tile-grid
/// offset of 10 units per x step.
pub fn corridor_tile(x: i32, y: i32) -> TileData {
    let ox = x as f32 * 10.0;
    let oz = y as f32 * 2.0;

    let mut verts = Vec::new();
    for col in 0..=5 {
        let px = ox + col as f32 * 2.0;
        verts.push(Vec3::new(px, 0.0, oz));
        verts.push(Vec3::new(px, 0.0, oz + 2.0));
    }

    let mut polys = Vec::new();
    for i in 0..5u16 {
        let v0 = i * 2;
        polys.push(PolyData {
            // (x0,z0) -> (x0,z1) -> (x1,z1) -> (x1,z0)
            verts: vec![v0, v0 + 1, v0 + 3, v0 + 2],
            // west, north wall, east, south wall
            neis: vec![i, 0, if i < 4 { i + 2 } else { 0 }, 0],
            flags: 0x01,
            area: 0,
        });
    }

    TileData {
        x,
        y,
        bmin: Vec3::new(ox, -0.5, oz),
        bmax: Vec3::new(ox + 10.0, 0.5, oz + 2.0),
        verts,
        polys,
    }
}

/// An L-shaped room of three quads: two stacked along z, the third hanging
/// east off the top one. The inner corner sits at (2, 0, 2).
pub fn l_tile() -> TileData {
    let verts = vec![
        Vec3::new(0.0, 0.0, 0.0),
        Vec3::new(0.0, 0.0, 2.0),
        Vec3::new(2.0, 0.0, 2.0),
        Vec3::new(2.0, 0.0, 0.0),
        Vec3::new(0.0, 0.0, 4.0),
        Vec3::new(2.0, 0.0, 4.0),
        Vec3::new(4.0, 0.0, 4.0),
        Vec3::new(4.0, 0.0, 2.0),
    ];
    let polys = vec![
        PolyData {
            verts: vec![0, 1, 2, 3],
            neis: vec![0, 2, 0, 0],
            flags: 0x01,
            area: 0,
        },
        PolyData {
            verts: vec![1, 4, 5, 2],
            neis: vec![0, 0, 3, 1],
            flags: 0x01,
            area: 0,
        },
        PolyData {
            verts: vec![2, 5, 6, 7],
            neis: vec![2, 0, 0, 0],
            flags: 0x01,
            area: 0,
        },
    ];

    TileData {
        x: 0,
        y: 0,
        bmin: Vec3::new(0.0, -0.5, 0.0),
        bmax: Vec3::new(4.0, 0.5, 4.0),
        verts,
        polys,
    }
}

/// A single 10x10 quad tile open to all four cardinal neighbours.
pub fn square_tile(x: i32, y: i32) -> TileData {
    let ox = x as f32 * 10.0;
    let oz = y as f32 * 10.0;

    TileData {
        x,
        y,
        bmin: Vec3::new(ox, -0.5, oz),
        bmax: Vec3::new(ox + 10.0, 0.5, oz + 10.0),
        verts: vec![
            Vec3::new(ox, 0.0, oz),
            Vec3::new(ox, 0.0, oz + 10.0),
            Vec3::new(ox + 10.0, 0.0, oz + 10.0),
            Vec3::new(ox + 10.0, 0.0, oz),
        ],
        polys: vec![PolyData {
            verts: vec![0, 1, 2, 3],
            // west, north, east, south
            neis: vec![EXT_LINK | 4, EXT_LINK | 2, EXT_LINK | 0, EXT_LINK | 6],
            flags: 0x01,
            area: 0,
        }],
    }
}
