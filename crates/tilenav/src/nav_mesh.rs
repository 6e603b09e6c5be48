//! Tiled polygon mesh store
//!
//! Tiles live in an arena indexed by the tile bits of [`PolyRef`]; each slot
//! carries a salt that is bumped whenever its tile is removed, so references
//! into rebuilt tiles fail validation instead of aliasing fresh data. The
//! store is immutable between tile edits: queries only ever read it.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tilenav_common::{overlap_bounds, Vec3};

use crate::filter::QueryFilter;
use crate::status::{Result, Status};

/// Maximum number of vertices per navigation polygon.
pub const VERTS_PER_POLY: usize = 6;

/// Neighbour code bit marking a tile-border edge; the low bits carry the side.
pub const EXT_LINK: u16 = 0x8000;

/// Terminator for per-polygon link chains.
pub const NULL_LINK: u32 = u32::MAX;

const SALT_BITS: u32 = 16;
const TILE_BITS: u32 = 28;
const POLY_BITS: u32 = 20;

/// Opaque handle identifying one polygon within the tiled mesh.
///
/// Encodes a per-slot salt (generation), the tile slot index and the polygon
/// index as bit fields. Stable only until the owning tile is removed or
/// rebuilt; never interpret the raw value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct PolyRef(u64);

impl PolyRef {
    /// The null reference.
    pub const NONE: PolyRef = PolyRef(0);

    pub(crate) fn encode(salt: u32, tile: u32, poly: u32) -> Self {
        PolyRef(
            ((salt as u64) << (TILE_BITS + POLY_BITS))
                | ((tile as u64) << POLY_BITS)
                | poly as u64,
        )
    }

    pub(crate) fn decode(self) -> (u32, u32, u32) {
        let salt = (self.0 >> (TILE_BITS + POLY_BITS)) & ((1 << SALT_BITS) - 1);
        let tile = (self.0 >> POLY_BITS) & ((1 << TILE_BITS) - 1);
        let poly = self.0 & ((1 << POLY_BITS) - 1);
        (salt as u32, tile as u32, poly as u32)
    }

    pub(crate) fn tile_index(self) -> usize {
        ((self.0 >> POLY_BITS) & ((1 << TILE_BITS) - 1)) as usize
    }

    pub fn is_none(self) -> bool {
        self.0 == 0
    }

    pub fn is_some(self) -> bool {
        self.0 != 0
    }
}

/// A navigation polygon within a tile.
#[derive(Debug, Clone)]
pub struct Poly {
    /// Indices into the owning tile's vertex array.
    pub verts: [u16; VERTS_PER_POLY],
    /// Per-edge neighbour codes: 0 = wall, `EXT_LINK | side` = tile border,
    /// otherwise internal neighbour polygon index + 1.
    pub neis: [u16; VERTS_PER_POLY],
    /// User flags consulted by query filters.
    pub flags: u16,
    /// Number of vertices actually used.
    pub vert_count: u8,
    /// User area id consulted by query filters for traversal cost.
    pub area: u8,
    /// Head of this polygon's link chain in the owning tile, or `NULL_LINK`.
    pub first_link: u32,
}

impl Poly {
    pub fn new(area: u8, flags: u16) -> Self {
        Self {
            verts: [0; VERTS_PER_POLY],
            neis: [0; VERTS_PER_POLY],
            flags,
            vert_count: 0,
            area,
            first_link: NULL_LINK,
        }
    }
}

/// Directed adjacency edge between two polygons.
#[derive(Debug, Clone, Copy)]
pub struct Link {
    /// Reference of the polygon this link leads to.
    pub target: PolyRef,
    /// Next link in the owning polygon's chain, `NULL_LINK` terminated.
    pub next: u32,
    /// Edge of the owning polygon the link crosses.
    pub edge: u8,
    /// Crossing side for tile-border links (0, 2, 4 or 6); 0xff for internal
    /// links.
    pub side: u8,
    /// Quantized sub-range of the edge covered by the link (border links
    /// only; 0..=255 over the edge parameter).
    pub bmin: u8,
    pub bmax: u8,
}

/// One resident tile of the navigation mesh.
#[derive(Debug, Clone, Default)]
pub struct MeshTile {
    /// Arena slot of this tile.
    pub index: usize,
    /// Generation of the slot at the time this tile was added.
    pub salt: u32,
    /// Tile grid location.
    pub x: i32,
    pub y: i32,
    /// Tile bounding box.
    pub bmin: Vec3,
    pub bmax: Vec3,
    pub verts: Vec<Vec3>,
    pub polys: Vec<Poly>,
    pub links: Vec<Link>,
}

impl MeshTile {
    /// Positions of one polygon's vertices, in winding order.
    pub fn poly_verts(&self, poly: &Poly) -> Vec<Vec3> {
        poly.verts[..poly.vert_count as usize]
            .iter()
            .map(|&v| self.verts[v as usize])
            .collect()
    }

    /// Endpoints of one polygon edge.
    pub fn edge_verts(&self, poly: &Poly, edge: usize) -> (Vec3, Vec3) {
        let nv = poly.vert_count as usize;
        let va = self.verts[poly.verts[edge] as usize];
        let vb = self.verts[poly.verts[(edge + 1) % nv] as usize];
        (va, vb)
    }

    /// Iterates the link chain of one polygon.
    pub fn poly_links(&self, poly: &Poly) -> impl Iterator<Item = &Link> {
        let mut idx = poly.first_link;
        std::iter::from_fn(move || {
            if idx == NULL_LINK {
                return None;
            }
            let link = &self.links[idx as usize];
            idx = link.next;
            Some(link)
        })
    }
}

/// Configuration of the mesh store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NavMeshParams {
    /// World-space origin of the tile grid.
    pub origin: Vec3,
    /// Width of each tile along the x-axis.
    pub tile_width: f32,
    /// Width of each tile along the z-axis.
    pub tile_height: f32,
    /// Maximum number of concurrently resident tiles.
    pub max_tiles: u32,
}

impl Default for NavMeshParams {
    fn default() -> Self {
        Self {
            origin: Vec3::ZERO,
            tile_width: 32.0,
            tile_height: 32.0,
            max_tiles: 128,
        }
    }
}

/// Polygon description consumed from the external mesh builder.
#[derive(Debug, Clone)]
pub struct PolyData {
    /// Vertex indices, in winding order (positive xz-plane area).
    pub verts: Vec<u16>,
    /// Per-edge neighbour codes, parallel to `verts`.
    pub neis: Vec<u16>,
    pub flags: u16,
    pub area: u8,
}

/// Tile description consumed from the external mesh builder.
#[derive(Debug, Clone)]
pub struct TileData {
    pub x: i32,
    pub y: i32,
    pub bmin: Vec3,
    pub bmax: Vec3,
    pub verts: Vec<Vec3>,
    pub polys: Vec<PolyData>,
}

/// The tiled navigation mesh.
pub struct NavMesh {
    params: NavMeshParams,
    /// Tile arena; slot index is the tile id inside [`PolyRef`].
    tiles: Vec<Option<MeshTile>>,
    /// Per-slot generation counters, preserved across slot reuse.
    salts: Vec<u32>,
    /// Grid location to arena slot.
    lookup: HashMap<(i32, i32), usize>,
    /// Reusable empty slots.
    free: Vec<usize>,
}

impl NavMesh {
    pub fn new(params: NavMeshParams) -> Result<Self> {
        if params.max_tiles == 0 || params.max_tiles as u64 > (1 << TILE_BITS) {
            return Err(Status::InvalidParam);
        }
        if params.tile_width <= 0.0 || params.tile_height <= 0.0 {
            return Err(Status::InvalidParam);
        }
        Ok(Self {
            params,
            tiles: Vec::new(),
            salts: Vec::new(),
            lookup: HashMap::new(),
            free: Vec::new(),
        })
    }

    pub fn params(&self) -> &NavMeshParams {
        &self.params
    }

    /// Adds a tile built by the external pipeline and links it to any
    /// resident neighbours. Returns the reference of the tile's first
    /// polygon.
    pub fn add_tile(&mut self, data: TileData) -> Result<PolyRef> {
        validate_tile_data(&data)?;
        if self.lookup.contains_key(&(data.x, data.y)) {
            return Err(Status::TileRejected("location already occupied"));
        }

        let slot = match self.free.pop() {
            Some(slot) => slot,
            None => {
                if self.tiles.len() >= self.params.max_tiles as usize {
                    return Err(Status::TileRejected("tile arena full"));
                }
                self.tiles.push(None);
                // Salt 1 keeps the first reference of slot 0 distinct from
                // PolyRef::NONE.
                self.salts.push(1);
                self.tiles.len() - 1
            }
        };

        let salt = self.salts[slot];
        let mut tile = MeshTile {
            index: slot,
            salt,
            x: data.x,
            y: data.y,
            bmin: data.bmin,
            bmax: data.bmax,
            verts: data.verts,
            polys: Vec::with_capacity(data.polys.len()),
            links: Vec::new(),
        };

        for pd in &data.polys {
            let mut poly = Poly::new(pd.area, pd.flags);
            poly.vert_count = pd.verts.len() as u8;
            poly.verts[..pd.verts.len()].copy_from_slice(&pd.verts);
            poly.neis[..pd.neis.len()].copy_from_slice(&pd.neis);
            tile.polys.push(poly);
        }

        build_internal_links(&mut tile);
        self.tiles[slot] = Some(tile);
        self.lookup.insert((data.x, data.y), slot);

        // Stitch portals to the four resident cardinal neighbours.
        for side in [0u8, 2, 4, 6] {
            let (dx, dy) = side_offset(side);
            if let Some(&nb) = self.lookup.get(&(data.x + dx, data.y + dy)) {
                self.connect_ext_links(slot, nb, side);
                self.connect_ext_links(nb, slot, opposite_side(side));
            }
        }

        log::debug!(
            "added tile ({}, {}) at slot {} (salt {})",
            data.x,
            data.y,
            slot,
            salt
        );
        Ok(PolyRef::encode(salt, slot as u32, 0))
    }

    /// Removes the tile at the given grid location, unlinking it from its
    /// neighbours and invalidating every reference into it.
    pub fn remove_tile(&mut self, x: i32, y: i32) -> Result<()> {
        let slot = *self.lookup.get(&(x, y)).ok_or(Status::NotFound)?;

        self.lookup.remove(&(x, y));
        self.tiles[slot] = None;
        // Bumping the salt invalidates outstanding references; skip 0 so
        // encoded refs never collide with PolyRef::NONE.
        self.salts[slot] = self.salts[slot].wrapping_add(1) & ((1 << SALT_BITS) - 1);
        if self.salts[slot] == 0 {
            self.salts[slot] = 1;
        }
        self.free.push(slot);

        for side in [0u8, 2, 4, 6] {
            let (dx, dy) = side_offset(side);
            if let Some(&nb) = self.lookup.get(&(x + dx, y + dy)) {
                if let Some(tile) = self.tiles[nb].as_mut() {
                    remove_links_to(tile, slot);
                }
            }
        }

        log::debug!("removed tile ({x}, {y}) from slot {slot}");
        Ok(())
    }

    /// Resolves a reference into its tile and polygon.
    pub fn get_tile_and_poly(&self, poly_ref: PolyRef) -> Result<(&MeshTile, &Poly)> {
        let (salt, tile_idx, poly_idx) = poly_ref.decode();
        let tile = self
            .tiles
            .get(tile_idx as usize)
            .and_then(|t| t.as_ref())
            .ok_or(Status::InvalidParam)?;
        if tile.salt != salt {
            return Err(Status::InvalidParam);
        }
        let poly = tile.polys.get(poly_idx as usize).ok_or(Status::InvalidParam)?;
        Ok((tile, poly))
    }

    /// Checks that a reference points at a currently resident polygon.
    pub fn is_valid_poly_ref(&self, poly_ref: PolyRef) -> bool {
        poly_ref.is_some() && self.get_tile_and_poly(poly_ref).is_ok()
    }

    /// Reference of the polygon at `poly_idx` within a tile.
    pub fn poly_ref(&self, tile: &MeshTile, poly_idx: usize) -> PolyRef {
        PolyRef::encode(tile.salt, tile.index as u32, poly_idx as u32)
    }

    /// The tile at a grid location, if resident.
    pub fn tile_at(&self, x: i32, y: i32) -> Option<&MeshTile> {
        self.lookup
            .get(&(x, y))
            .and_then(|&slot| self.tiles[slot].as_ref())
    }

    /// Iterates all resident tiles.
    pub fn tiles(&self) -> impl Iterator<Item = &MeshTile> {
        self.tiles.iter().filter_map(|t| t.as_ref())
    }

    /// Collects references of all passable polygons whose bounds overlap the
    /// axis-aligned box.
    pub fn query_polygons<F: QueryFilter>(
        &self,
        bmin: Vec3,
        bmax: Vec3,
        filter: &F,
    ) -> Vec<PolyRef> {
        let mut out = Vec::new();
        for tile in self.tiles() {
            if !overlap_bounds(bmin, bmax, tile.bmin, tile.bmax) {
                continue;
            }
            for (i, poly) in tile.polys.iter().enumerate() {
                let (pmin, pmax) = poly_bounds(tile, poly);
                if !overlap_bounds(bmin, bmax, pmin, pmax) {
                    continue;
                }
                let poly_ref = self.poly_ref(tile, i);
                if filter.pass_filter(poly_ref, tile, poly) {
                    out.push(poly_ref);
                }
            }
        }
        out
    }

    fn connect_ext_links(&mut self, from: usize, to: usize, side: u8) {
        // Collect the new links first; both tiles are resident and disjoint,
        // but borrowing them simultaneously as &mut/& needs a split.
        let (from_tile, to_tile) = match (self.tiles[from].as_ref(), self.tiles[to].as_ref()) {
            (Some(a), Some(b)) => (a, b),
            _ => return,
        };
        let to_salt = to_tile.salt;

        let mut new_links: Vec<(usize, Link)> = Vec::new();
        for (pi, poly) in from_tile.polys.iter().enumerate() {
            let nv = poly.vert_count as usize;
            for j in 0..nv {
                if poly.neis[j] != (EXT_LINK | side as u16) {
                    continue;
                }
                let (va, vb) = from_tile.edge_verts(poly, j);
                for (qi, qpoly) in to_tile.polys.iter().enumerate() {
                    let qnv = qpoly.vert_count as usize;
                    for k in 0..qnv {
                        if qpoly.neis[k] != (EXT_LINK | opposite_side(side) as u16) {
                            continue;
                        }
                        let (wa, wb) = to_tile.edge_verts(qpoly, k);
                        if let Some((bmin, bmax)) = portal_overlap(va, vb, wa, wb, side) {
                            new_links.push((
                                pi,
                                Link {
                                    target: PolyRef::encode(to_salt, to as u32, qi as u32),
                                    next: NULL_LINK,
                                    edge: j as u8,
                                    side,
                                    bmin,
                                    bmax,
                                },
                            ));
                        }
                    }
                }
            }
        }

        if let Some(tile) = self.tiles[from].as_mut() {
            for (pi, link) in new_links {
                push_link(tile, pi, link);
            }
        }
    }
}

/// Grid offset of a cardinal side.
fn side_offset(side: u8) -> (i32, i32) {
    match side {
        0 => (1, 0),
        2 => (0, 1),
        4 => (-1, 0),
        6 => (0, -1),
        _ => (0, 0),
    }
}

/// The side seen from the neighbouring tile.
fn opposite_side(side: u8) -> u8 {
    (side + 4) & 7
}

fn validate_tile_data(data: &TileData) -> Result<()> {
    if data.verts.is_empty() || data.polys.is_empty() {
        return Err(Status::InvalidMesh("empty vertex or polygon array"));
    }
    if data.polys.len() as u64 > (1 << POLY_BITS) {
        return Err(Status::InvalidMesh("too many polygons for one tile"));
    }
    if !(data.bmin.is_finite() && data.bmax.is_finite()) {
        return Err(Status::InvalidMesh("non-finite tile bounds"));
    }
    for v in &data.verts {
        if !v.is_finite() {
            return Err(Status::InvalidMesh("non-finite vertex"));
        }
    }
    for poly in &data.polys {
        if poly.verts.len() < 3 || poly.verts.len() > VERTS_PER_POLY {
            return Err(Status::InvalidMesh("polygon vertex count out of range"));
        }
        if poly.neis.len() != poly.verts.len() {
            return Err(Status::InvalidMesh("neighbour array length mismatch"));
        }
        for &v in &poly.verts {
            if v as usize >= data.verts.len() {
                return Err(Status::InvalidMesh("vertex index out of range"));
            }
        }
        for &n in &poly.neis {
            if n != 0 && (n & EXT_LINK) == 0 && (n - 1) as usize >= data.polys.len() {
                return Err(Status::InvalidMesh("neighbour index out of range"));
            }
        }
    }
    Ok(())
}

/// Builds the intra-tile link chains from the polygon neighbour codes.
fn build_internal_links(tile: &mut MeshTile) {
    let salt = tile.salt;
    let index = tile.index as u32;
    for pi in 0..tile.polys.len() {
        let nv = tile.polys[pi].vert_count as usize;
        for j in 0..nv {
            let nei = tile.polys[pi].neis[j];
            if nei == 0 || (nei & EXT_LINK) != 0 {
                continue;
            }
            let link = Link {
                target: PolyRef::encode(salt, index, (nei - 1) as u32),
                next: NULL_LINK,
                edge: j as u8,
                side: 0xff,
                bmin: 0,
                bmax: 255,
            };
            push_link(tile, pi, link);
        }
    }
}

/// Appends a link to a polygon's chain.
fn push_link(tile: &mut MeshTile, poly_idx: usize, mut link: Link) {
    link.next = tile.polys[poly_idx].first_link;
    tile.polys[poly_idx].first_link = tile.links.len() as u32;
    tile.links.push(link);
}

/// Drops every link of `tile` that targets `removed_slot`, rebuilding the
/// per-polygon chains.
fn remove_links_to(tile: &mut MeshTile, removed_slot: usize) {
    let old_links = std::mem::take(&mut tile.links);
    let old_heads: Vec<u32> = tile.polys.iter().map(|p| p.first_link).collect();
    for poly in &mut tile.polys {
        poly.first_link = NULL_LINK;
    }
    for (pi, &head) in old_heads.iter().enumerate() {
        let mut idx = head;
        while idx != NULL_LINK {
            let link = old_links[idx as usize];
            idx = link.next;
            if link.target.tile_index() != removed_slot {
                push_link(tile, pi, link);
            }
        }
    }
}

/// Overlap of two border edges along the shared tile boundary, quantized to
/// the first edge's parameter range. Returns `None` when the edges do not
/// overlap.
fn portal_overlap(va: Vec3, vb: Vec3, wa: Vec3, wb: Vec3, side: u8) -> Option<(u8, u8)> {
    const MIN_OVERLAP: f32 = 0.01;

    // Sides 0/4 run along z, sides 2/6 along x.
    let axis = |v: Vec3| if side == 0 || side == 4 { v.z } else { v.x };

    let (a0, a1) = (axis(va), axis(vb));
    let (amin, amax) = (a0.min(a1), a0.max(a1));
    let (bmin, bmax) = (axis(wa).min(axis(wb)), axis(wa).max(axis(wb)));

    let lo = amin.max(bmin);
    let hi = amax.min(bmax);
    if hi - lo < MIN_OVERLAP {
        return None;
    }

    // Parameterize the overlap over the va->vb edge direction.
    let span = a1 - a0;
    let (t0, t1) = if span.abs() < f32::EPSILON {
        (0.0, 1.0)
    } else {
        let t0 = ((lo - a0) / span).clamp(0.0, 1.0);
        let t1 = ((hi - a0) / span).clamp(0.0, 1.0);
        (t0.min(t1), t0.max(t1))
    };
    Some(((t0 * 255.0) as u8, (t1 * 255.0).ceil().min(255.0) as u8))
}

fn poly_bounds(tile: &MeshTile, poly: &Poly) -> (Vec3, Vec3) {
    let mut bmin = tile.verts[poly.verts[0] as usize];
    let mut bmax = bmin;
    for &v in &poly.verts[1..poly.vert_count as usize] {
        let p = tile.verts[v as usize];
        bmin = bmin.min(p);
        bmax = bmax.max(p);
    }
    (bmin, bmax)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::StandardFilter;
    use crate::test_mesh::{corridor_tile, square_tile};

    #[test]
    fn test_add_tile_and_resolve() {
        let mut mesh = NavMesh::new(NavMeshParams::default()).unwrap();
        let base = mesh.add_tile(corridor_tile(0, 0)).unwrap();
        assert!(base.is_some());

        let (tile, poly) = mesh.get_tile_and_poly(base).unwrap();
        assert_eq!(tile.polys.len(), 5);
        assert_eq!(poly.vert_count, 4);
        assert!(mesh.is_valid_poly_ref(base));
    }

    #[test]
    fn test_internal_links() {
        let mut mesh = NavMesh::new(NavMeshParams::default()).unwrap();
        let base = mesh.add_tile(corridor_tile(0, 0)).unwrap();
        let (tile, poly) = mesh.get_tile_and_poly(base).unwrap();

        // The first corridor polygon links only to the second.
        let links: Vec<_> = tile.poly_links(poly).collect();
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].target, mesh.poly_ref(tile, 1));
        assert_eq!(links[0].side, 0xff);

        // A middle polygon links to both sides.
        let mid = &tile.polys[2];
        assert_eq!(tile.poly_links(mid).count(), 2);
    }

    #[test]
    fn test_remove_tile_bumps_salt() {
        let mut mesh = NavMesh::new(NavMeshParams::default()).unwrap();
        let base = mesh.add_tile(corridor_tile(0, 0)).unwrap();
        assert!(mesh.is_valid_poly_ref(base));

        mesh.remove_tile(0, 0).unwrap();
        assert!(!mesh.is_valid_poly_ref(base));

        // The slot is reused with a fresh salt; the stale ref stays invalid.
        let base2 = mesh.add_tile(corridor_tile(0, 0)).unwrap();
        assert!(base2 != base);
        assert!(mesh.is_valid_poly_ref(base2));
        assert!(!mesh.is_valid_poly_ref(base));
    }

    #[test]
    fn test_cross_tile_links() {
        let mut mesh = NavMesh::new(NavMeshParams::default()).unwrap();
        let a = mesh.add_tile(square_tile(0, 0)).unwrap();
        let b = mesh.add_tile(square_tile(1, 0)).unwrap();

        let (tile_a, poly_a) = mesh.get_tile_and_poly(a).unwrap();
        let border: Vec<_> = tile_a
            .poly_links(poly_a)
            .filter(|l| l.side != 0xff)
            .collect();
        assert_eq!(border.len(), 1);
        assert_eq!(border[0].target, b);
        assert_eq!(border[0].side, 0);

        // Removing the neighbour strips the border link again.
        mesh.remove_tile(1, 0).unwrap();
        let (tile_a, poly_a) = mesh.get_tile_and_poly(a).unwrap();
        assert_eq!(tile_a.poly_links(poly_a).filter(|l| l.side != 0xff).count(), 0);
    }

    #[test]
    fn test_query_polygons() {
        let mut mesh = NavMesh::new(NavMeshParams::default()).unwrap();
        mesh.add_tile(corridor_tile(0, 0)).unwrap();
        let filter = StandardFilter::new();

        let hits = mesh.query_polygons(
            Vec3::new(3.5, -1.0, 0.5),
            Vec3::new(4.5, 1.0, 1.5),
            &filter,
        );
        // The box straddles the boundary between the third and fourth quad.
        assert_eq!(hits.len(), 2);

        let none = mesh.query_polygons(
            Vec3::new(50.0, -1.0, 0.0),
            Vec3::new(60.0, 1.0, 2.0),
            &filter,
        );
        assert!(none.is_empty());
    }

    #[test]
    fn test_tile_data_validation() {
        let mut mesh = NavMesh::new(NavMeshParams::default()).unwrap();
        let mut bad = corridor_tile(0, 0);
        bad.polys[0].verts = vec![0, 99, 1, 2];
        assert_eq!(
            mesh.add_tile(bad),
            Err(Status::InvalidMesh("vertex index out of range"))
        );

        mesh.add_tile(corridor_tile(0, 0)).unwrap();
        assert_eq!(
            mesh.add_tile(corridor_tile(0, 0)),
            Err(Status::TileRejected("location already occupied"))
        );
    }
}
