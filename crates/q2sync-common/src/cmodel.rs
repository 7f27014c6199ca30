// cmodel.rs — collision model: swept box traces and point contents
//
// The model is immutable once built and can be shared between threads.
// Everything a query mutates (visited brushes, the temporary box hull)
// lives on the query's own stack.

use std::collections::HashMap;

use crate::error::CollisionError;
use crate::q_shared::*;

const DIST_EPSILON: f32 = 0.03125; // 1/32 epsilon to keep floating point happy

/// Upper bound on leafs gathered by a position test.
const MAX_TOUCH_LEAFS: usize = 1024;

// ============================================================
// Model structures
// ============================================================

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CNode {
    pub plane: usize,
    pub children: [i32; 2], // negative numbers are leafs
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CLeaf {
    pub contents: i32, // OR of all brushes
    pub firstleafbrush: usize,
    pub numleafbrushes: usize,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CBrush {
    pub contents: i32,
    pub firstbrushside: usize,
    pub numsides: usize,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CBrushSide {
    pub plane: usize,
    pub surface: Option<usize>, // None is the null surface
}

/// Already parsed collision arrays, as they come out of a map loader.
#[derive(Debug, Clone, Default)]
pub struct CollisionParts {
    pub planes: Vec<CPlane>,
    pub nodes: Vec<CNode>,
    pub leafs: Vec<CLeaf>,
    pub leafbrushes: Vec<usize>,
    pub brushes: Vec<CBrush>,
    pub brushsides: Vec<CBrushSide>,
    pub surfaces: Vec<CSurface>,
    /// Model 0 is the world, the rest are inline brush models.
    pub models: Vec<CModel>,
}

/// Which tree a query runs against.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ClipHull {
    /// A node (or `-1 - leaf`) of the collision model.
    Model(i32),
    /// An axis aligned box standing in for a bounding box entity.
    Box { mins: Vec3, maxs: Vec3 },
}

/// Read-only collision world.
#[derive(Debug, Clone)]
pub struct CollisionModel {
    planes: Vec<CPlane>,
    nodes: Vec<CNode>,
    leafs: Vec<CLeaf>,
    leafbrushes: Vec<usize>,
    brushes: Vec<CBrush>,
    brushsides: Vec<CBrushSide>,
    surfaces: Vec<CSurface>,
    models: Vec<CModel>,
}

fn bad_ref(kind: &'static str, index: usize, target: &'static str, value: i64) -> CollisionError {
    CollisionError::BadReference { kind, index, target, value }
}

impl CollisionModel {
    /// Validates the arrays and takes ownership of them.
    pub fn from_parts(parts: CollisionParts) -> Result<Self, CollisionError> {
        if parts.models.is_empty() {
            return Err(CollisionError::NoModels);
        }
        if parts.leafs.is_empty() {
            return Err(CollisionError::NoLeafs);
        }

        let numnodes = parts.nodes.len() as i64;
        let numleafs = parts.leafs.len() as i64;
        let child_ok = |c: i32| -> bool {
            let c = c as i64;
            if c >= 0 {
                c < numnodes
            } else {
                -1 - c < numleafs
            }
        };

        for (i, node) in parts.nodes.iter().enumerate() {
            if node.plane >= parts.planes.len() {
                return Err(bad_ref("node", i, "plane", node.plane as i64));
            }
            for &c in &node.children {
                // children always follow their parent, which also rules out cycles
                if !child_ok(c) || (c >= 0 && c as usize <= i) {
                    return Err(bad_ref("node", i, "child", c as i64));
                }
            }
        }
        for (i, leaf) in parts.leafs.iter().enumerate() {
            if leaf.firstleafbrush + leaf.numleafbrushes > parts.leafbrushes.len() {
                return Err(bad_ref("leaf", i, "leafbrush", leaf.firstleafbrush as i64));
            }
        }
        for (i, &b) in parts.leafbrushes.iter().enumerate() {
            if b >= parts.brushes.len() {
                return Err(bad_ref("leafbrush", i, "brush", b as i64));
            }
        }
        for (i, brush) in parts.brushes.iter().enumerate() {
            if brush.firstbrushside + brush.numsides > parts.brushsides.len() {
                return Err(bad_ref("brush", i, "brushside", brush.firstbrushside as i64));
            }
        }
        for (i, side) in parts.brushsides.iter().enumerate() {
            if side.plane >= parts.planes.len() {
                return Err(bad_ref("brushside", i, "plane", side.plane as i64));
            }
            if let Some(s) = side.surface {
                if s >= parts.surfaces.len() {
                    return Err(bad_ref("brushside", i, "surface", s as i64));
                }
            }
        }
        for (i, model) in parts.models.iter().enumerate() {
            if !child_ok(model.headnode) {
                return Err(bad_ref("model", i, "headnode", model.headnode as i64));
            }
        }

        Ok(Self {
            planes: parts.planes,
            nodes: parts.nodes,
            leafs: parts.leafs,
            leafbrushes: parts.leafbrushes,
            brushes: parts.brushes,
            brushsides: parts.brushsides,
            surfaces: parts.surfaces,
            models: parts.models,
        })
    }

    /// A world with no geometry at all.
    pub fn empty() -> Self {
        Self {
            planes: Vec::new(),
            nodes: Vec::new(),
            leafs: vec![CLeaf::default()],
            leafbrushes: Vec::new(),
            brushes: Vec::new(),
            brushsides: Vec::new(),
            surfaces: Vec::new(),
            models: vec![CModel { headnode: -1, ..Default::default() }],
        }
    }

    fn view(&self) -> HullView<'_> {
        HullView {
            planes: &self.planes,
            nodes: &self.nodes,
            leafs: &self.leafs,
            leafbrushes: &self.leafbrushes,
            brushes: &self.brushes,
            brushsides: &self.brushsides,
            surfaces: &self.surfaces,
        }
    }

    pub fn num_inline_models(&self) -> usize {
        self.models.len()
    }

    /// Head node of the world tree.
    pub fn world_headnode(&self) -> i32 {
        self.models[0].headnode
    }

    pub fn inline_model(&self, index: usize) -> Result<&CModel, CollisionError> {
        self.models.get(index).ok_or(CollisionError::BadInlineModel(index))
    }

    /// Resolves a `*N` model configstring to its inline model.
    pub fn inline_model_by_name(&self, name: &str) -> Result<&CModel, CollisionError> {
        let num = name
            .strip_prefix('*')
            .and_then(|n| n.parse::<usize>().ok())
            .ok_or(CollisionError::BadInlineModel(0))?;
        if num < 1 {
            return Err(CollisionError::BadInlineModel(num));
        }
        self.inline_model(num)
    }

    pub fn num_leafs(&self) -> usize {
        self.leafs.len()
    }

    pub fn leaf_contents(&self, leafnum: usize) -> i32 {
        self.leafs.get(leafnum).map_or(0, |l| l.contents)
    }

    pub fn point_leafnum(&self, p: &Vec3) -> usize {
        self.view().point_leafnum_r(p, self.world_headnode())
    }

    /// Leafs touched by a box below `headnode`, plus the first node that
    /// splits the box (-1 if none does).
    pub fn box_leafnums(&self, mins: &Vec3, maxs: &Vec3, headnode: i32) -> (Vec<usize>, i32) {
        self.view().box_leafnums(mins, maxs, headnode, MAX_TOUCH_LEAFS)
    }

    // ============================================================
    // Point contents
    // ============================================================

    pub fn point_contents(&self, p: &Vec3, hull: ClipHull) -> i32 {
        match hull {
            ClipHull::Model(headnode) => self.view().point_contents(p, headnode),
            ClipHull::Box { mins, maxs } => BoxHull::new(&mins, &maxs).view().point_contents(p, 0),
        }
    }

    /// Handles offsetting and rotation of the end points for moving and
    /// rotating entities.
    pub fn transformed_point_contents(
        &self,
        p: &Vec3,
        hull: ClipHull,
        origin: &Vec3,
        angles: &Vec3,
    ) -> i32 {
        let mut p_l = vector_subtract(p, origin);
        if matches!(hull, ClipHull::Model(_)) && *angles != VEC3_ORIGIN {
            p_l = rotate_into(&p_l, angles);
        }
        self.point_contents(&p_l, hull)
    }

    // ============================================================
    // Box tracing
    // ============================================================

    pub fn box_trace(
        &self,
        start: &Vec3,
        end: &Vec3,
        mins: &Vec3,
        maxs: &Vec3,
        hull: ClipHull,
        brushmask: i32,
    ) -> Trace {
        match hull {
            ClipHull::Model(headnode) => {
                self.view().box_trace(start, end, mins, maxs, headnode, brushmask)
            }
            ClipHull::Box { mins: bmins, maxs: bmaxs } => BoxHull::new(&bmins, &bmaxs)
                .view()
                .box_trace(start, end, mins, maxs, 0, brushmask),
        }
    }

    /// Traces against a hull placed at `origin` and, for inline models,
    /// rotated by `angles`. The hit normal is rotated back into world space.
    #[allow(clippy::too_many_arguments)]
    pub fn transformed_box_trace(
        &self,
        start: &Vec3,
        end: &Vec3,
        mins: &Vec3,
        maxs: &Vec3,
        hull: ClipHull,
        brushmask: i32,
        origin: &Vec3,
        angles: &Vec3,
    ) -> Trace {
        let mut start_l = vector_subtract(start, origin);
        let mut end_l = vector_subtract(end, origin);

        // rotate start and end into the model's frame of reference
        let rotated = matches!(hull, ClipHull::Model(_)) && *angles != VEC3_ORIGIN;
        if rotated {
            start_l = rotate_into(&start_l, angles);
            end_l = rotate_into(&end_l, angles);
        }

        let mut trace = self.box_trace(&start_l, &end_l, mins, maxs, hull, brushmask);

        if rotated && trace.fraction != 1.0 {
            let a = [-angles[0], -angles[1], -angles[2]];
            trace.plane.normal = rotate_into(&trace.plane.normal, &a);
        }

        for i in 0..3 {
            trace.endpos[i] = start[i] + trace.fraction * (end[i] - start[i]);
        }
        trace
    }
}

fn rotate_into(v: &Vec3, angles: &Vec3) -> Vec3 {
    let (forward, right, up) = angle_vectors(angles);
    [dot_product(v, &forward), -dot_product(v, &right), dot_product(v, &up)]
}

// ============================================================
// Box hull
// ============================================================

/// Six node tree around a single box brush, so bounding box entities can be
/// traced with the same code as brush models.
struct BoxHull {
    planes: [CPlane; 12],
    nodes: [CNode; 6],
    leafs: [CLeaf; 2],
    leafbrushes: [usize; 1],
    brushes: [CBrush; 1],
    brushsides: [CBrushSide; 6],
}

const BOX_EMPTY_LEAF: i32 = 0;
const BOX_SOLID_LEAF: i32 = 1;

impl BoxHull {
    fn new(mins: &Vec3, maxs: &Vec3) -> Self {
        let mut planes = [CPlane::default(); 12];
        let mut nodes: [CNode; 6] = Default::default();
        let mut brushsides: [CBrushSide; 6] = Default::default();

        for i in 0..6 {
            let side = i & 1;
            let axis = i >> 1;
            let dist = if side == 0 { maxs[axis] } else { mins[axis] };

            brushsides[i] = CBrushSide { plane: i * 2 + side, surface: None };

            nodes[i].plane = i * 2;
            nodes[i].children[side] = -1 - BOX_EMPTY_LEAF;
            nodes[i].children[side ^ 1] = if i != 5 {
                i as i32 + 1
            } else {
                -1 - BOX_SOLID_LEAF
            };

            let mut normal = [0.0; 3];
            normal[axis] = 1.0;
            planes[i * 2] = CPlane { normal, dist, plane_type: axis as u8, signbits: 0 };
            normal[axis] = -1.0;
            planes[i * 2 + 1] =
                CPlane { normal, dist: -dist, plane_type: 3 + axis as u8, signbits: 0 };
        }

        Self {
            planes,
            nodes,
            leafs: [
                CLeaf::default(),
                CLeaf { contents: CONTENTS_MONSTER, firstleafbrush: 0, numleafbrushes: 1 },
            ],
            leafbrushes: [0],
            brushes: [CBrush { contents: CONTENTS_MONSTER, firstbrushside: 0, numsides: 6 }],
            brushsides,
        }
    }

    fn view(&self) -> HullView<'_> {
        HullView {
            planes: &self.planes,
            nodes: &self.nodes,
            leafs: &self.leafs,
            leafbrushes: &self.leafbrushes,
            brushes: &self.brushes,
            brushsides: &self.brushsides,
            surfaces: &[],
        }
    }
}

// ============================================================
// Tree queries, shared by the world and the box hull
// ============================================================

#[derive(Clone, Copy)]
struct HullView<'a> {
    planes: &'a [CPlane],
    nodes: &'a [CNode],
    leafs: &'a [CLeaf],
    leafbrushes: &'a [usize],
    brushes: &'a [CBrush],
    brushsides: &'a [CBrushSide],
    surfaces: &'a [CSurface],
}

impl<'a> HullView<'a> {
    fn point_leafnum_r(&self, p: &Vec3, mut num: i32) -> usize {
        while num >= 0 {
            let node = &self.nodes[num as usize];
            let plane = &self.planes[node.plane];
            let d = if plane.plane_type < 3 {
                p[plane.plane_type as usize] - plane.dist
            } else {
                dot_product(&plane.normal, p) - plane.dist
            };
            num = if d < 0.0 { node.children[1] } else { node.children[0] };
        }
        (-1 - num) as usize
    }

    fn point_contents(&self, p: &Vec3, headnode: i32) -> i32 {
        if self.leafs.is_empty() {
            return 0;
        }
        self.leafs[self.point_leafnum_r(p, headnode)].contents
    }

    fn box_leafnums(&self, mins: &Vec3, maxs: &Vec3, headnode: i32, max: usize) -> (Vec<usize>, i32) {
        let mut list = Vec::new();
        let mut topnode = -1;
        self.box_leafnums_r(headnode, mins, maxs, max, &mut list, &mut topnode);
        (list, topnode)
    }

    fn box_leafnums_r(
        &self,
        mut nodenum: i32,
        mins: &Vec3,
        maxs: &Vec3,
        max: usize,
        list: &mut Vec<usize>,
        topnode: &mut i32,
    ) {
        loop {
            if nodenum < 0 {
                if list.len() < max {
                    list.push((-1 - nodenum) as usize);
                }
                return;
            }

            let node = &self.nodes[nodenum as usize];
            match box_on_plane_side(mins, maxs, &self.planes[node.plane]) {
                1 => nodenum = node.children[0],
                2 => nodenum = node.children[1],
                _ => {
                    // go down both
                    if *topnode == -1 {
                        *topnode = nodenum;
                    }
                    self.box_leafnums_r(node.children[0], mins, maxs, max, list, topnode);
                    nodenum = node.children[1];
                }
            }
        }
    }

    fn box_trace(
        &self,
        start: &Vec3,
        end: &Vec3,
        mins: &Vec3,
        maxs: &Vec3,
        headnode: i32,
        brushmask: i32,
    ) -> Trace {
        let mut work = TraceWork {
            hull: *self,
            contents: brushmask,
            start: *start,
            end: *end,
            mins: *mins,
            maxs: *maxs,
            extents: [0.0; 3],
            ispoint: false,
            visited: vec![false; self.brushes.len()],
            trace: Trace::default(),
        };

        if self.leafs.is_empty() {
            // map not loaded
            work.trace.endpos = *end;
            return work.trace;
        }

        // position test special case
        if start == end {
            let c1 = [start[0] + mins[0] - 1.0, start[1] + mins[1] - 1.0, start[2] + mins[2] - 1.0];
            let c2 = [start[0] + maxs[0] + 1.0, start[1] + maxs[1] + 1.0, start[2] + maxs[2] + 1.0];

            let (leafs, _) = self.box_leafnums(&c1, &c2, headnode, MAX_TOUCH_LEAFS);
            for leafnum in leafs {
                work.test_in_leaf(leafnum);
                if work.trace.allsolid {
                    break;
                }
            }
            work.trace.endpos = *start;
            return work.trace;
        }

        // check for point special case
        if *mins == VEC3_ORIGIN && *maxs == VEC3_ORIGIN {
            work.ispoint = true;
        } else {
            for i in 0..3 {
                work.extents[i] = (-mins[i]).max(maxs[i]);
            }
        }

        // general sweeping through world
        work.recursive_hull_check(headnode, 0.0, 1.0, start, end);

        if work.trace.fraction == 1.0 {
            work.trace.endpos = *end;
        } else {
            for i in 0..3 {
                work.trace.endpos[i] = start[i] + work.trace.fraction * (end[i] - start[i]);
            }
        }
        work.trace
    }
}

/// Per-query state of one box trace.
struct TraceWork<'a> {
    hull: HullView<'a>,
    contents: i32,
    start: Vec3,
    end: Vec3,
    mins: Vec3,
    maxs: Vec3,
    extents: Vec3,
    ispoint: bool,
    visited: Vec<bool>,
    trace: Trace,
}

impl<'a> TraceWork<'a> {
    /// Offset of the box corner that reaches furthest behind `normal`.
    fn corner_offset(&self, normal: &Vec3) -> Vec3 {
        let mut ofs = [0.0f32; 3];
        for j in 0..3 {
            ofs[j] = if normal[j] < 0.0 { self.maxs[j] } else { self.mins[j] };
        }
        ofs
    }

    fn clip_box_to_brush(&mut self, p1: &Vec3, p2: &Vec3, brush: &CBrush) {
        if brush.numsides == 0 {
            return;
        }

        let mut enterfrac: f32 = -1.0;
        let mut leavefrac: f32 = 1.0;
        let mut clip: Option<(usize, usize)> = None; // (plane, side)

        let mut getout = false;
        let mut startout = false;

        for side_idx in brush.firstbrushside..brush.firstbrushside + brush.numsides {
            let side = &self.hull.brushsides[side_idx];
            let plane = &self.hull.planes[side.plane];

            // push the plane out appropriately for mins/maxs
            let dist = if self.ispoint {
                plane.dist
            } else {
                plane.dist - dot_product(&self.corner_offset(&plane.normal), &plane.normal)
            };

            let d1 = dot_product(p1, &plane.normal) - dist;
            let d2 = dot_product(p2, &plane.normal) - dist;

            if d2 > 0.0 {
                getout = true; // endpoint is not in solid
            }
            if d1 > 0.0 {
                startout = true;
            }

            // if completely in front of face, no intersection
            if d1 > 0.0 && d2 >= d1 {
                return;
            }
            if d1 <= 0.0 && d2 <= 0.0 {
                continue;
            }

            // crosses face
            if d1 > d2 {
                // enter
                let f = (d1 - DIST_EPSILON) / (d1 - d2);
                if f > enterfrac {
                    enterfrac = f;
                    clip = Some((side.plane, side_idx));
                }
            } else {
                // leave
                let f = (d1 + DIST_EPSILON) / (d1 - d2);
                if f < leavefrac {
                    leavefrac = f;
                }
            }
        }

        if !startout {
            // original point was inside brush
            self.trace.startsolid = true;
            if !getout {
                self.trace.allsolid = true;
            }
            return;
        }

        if enterfrac < leavefrac && enterfrac > -1.0 && enterfrac < self.trace.fraction {
            self.trace.fraction = enterfrac.max(0.0);
            if let Some((plane, side_idx)) = clip {
                self.trace.plane = self.hull.planes[plane];
                self.trace.surface = self.hull.brushsides[side_idx]
                    .surface
                    .map(|s| self.hull.surfaces[s].clone());
            }
            self.trace.contents = brush.contents;
        }
    }

    fn test_box_in_brush(&mut self, p1: &Vec3, brush: &CBrush) {
        if brush.numsides == 0 {
            return;
        }

        for side in &self.hull.brushsides[brush.firstbrushside..brush.firstbrushside + brush.numsides] {
            let plane = &self.hull.planes[side.plane];
            let dist = plane.dist - dot_product(&self.corner_offset(&plane.normal), &plane.normal);
            let d1 = dot_product(p1, &plane.normal) - dist;

            // if completely in front of face, no intersection
            if d1 > 0.0 {
                return;
            }
        }

        // inside this brush
        self.trace.startsolid = true;
        self.trace.allsolid = true;
        self.trace.fraction = 0.0;
        self.trace.contents = brush.contents;
    }

    /// Yields the unvisited brushes of a leaf that match the content mask,
    /// marking them visited.
    fn leaf_brushes(&mut self, leafnum: usize) -> Vec<usize> {
        let hull = self.hull;
        let leaf = &hull.leafs[leafnum];
        if leaf.contents & self.contents == 0 {
            return Vec::new();
        }

        let mut out = Vec::new();
        for &brushnum in &hull.leafbrushes[leaf.firstleafbrush..leaf.firstleafbrush + leaf.numleafbrushes] {
            if self.visited[brushnum] {
                continue; // already checked this brush in another leaf
            }
            self.visited[brushnum] = true;
            if hull.brushes[brushnum].contents & self.contents != 0 {
                out.push(brushnum);
            }
        }
        out
    }

    fn trace_to_leaf(&mut self, leafnum: usize) {
        let hull = self.hull;
        let (start, end) = (self.start, self.end);
        for brushnum in self.leaf_brushes(leafnum) {
            self.clip_box_to_brush(&start, &end, &hull.brushes[brushnum]);
            if self.trace.fraction == 0.0 {
                return;
            }
        }
    }

    fn test_in_leaf(&mut self, leafnum: usize) {
        let hull = self.hull;
        let start = self.start;
        for brushnum in self.leaf_brushes(leafnum) {
            self.test_box_in_brush(&start, &hull.brushes[brushnum]);
            if self.trace.fraction == 0.0 {
                return;
            }
        }
    }

    fn recursive_hull_check(&mut self, num: i32, p1f: f32, p2f: f32, p1: &Vec3, p2: &Vec3) {
        if self.trace.fraction <= p1f {
            return; // already hit something nearer
        }

        // if < 0, we are in a leaf node
        if num < 0 {
            self.trace_to_leaf((-1 - num) as usize);
            return;
        }

        // find the point distances to the separating plane
        // and the offset for the size of the box
        let hull = self.hull;
        let node = &hull.nodes[num as usize];
        let plane = &hull.planes[node.plane];

        let (t1, t2, offset) = if plane.plane_type < 3 {
            let pt = plane.plane_type as usize;
            (p1[pt] - plane.dist, p2[pt] - plane.dist, self.extents[pt])
        } else {
            let offset = if self.ispoint {
                0.0
            } else {
                (self.extents[0] * plane.normal[0]).abs()
                    + (self.extents[1] * plane.normal[1]).abs()
                    + (self.extents[2] * plane.normal[2]).abs()
            };
            (
                dot_product(&plane.normal, p1) - plane.dist,
                dot_product(&plane.normal, p2) - plane.dist,
                offset,
            )
        };

        // see which sides we need to consider
        if t1 >= offset && t2 >= offset {
            self.recursive_hull_check(node.children[0], p1f, p2f, p1, p2);
            return;
        }
        if t1 < -offset && t2 < -offset {
            self.recursive_hull_check(node.children[1], p1f, p2f, p1, p2);
            return;
        }

        // put the crosspoint DIST_EPSILON pixels on the near side
        let (side, frac, frac2) = if t1 < t2 {
            let idist = 1.0 / (t1 - t2);
            (
                1usize,
                (t1 - offset + DIST_EPSILON) * idist,
                (t1 + offset + DIST_EPSILON) * idist,
            )
        } else if t1 > t2 {
            let idist = 1.0 / (t1 - t2);
            (
                0usize,
                (t1 + offset + DIST_EPSILON) * idist,
                (t1 - offset - DIST_EPSILON) * idist,
            )
        } else {
            (0usize, 1.0, 0.0)
        };
        let frac = frac.clamp(0.0, 1.0);
        let frac2 = frac2.clamp(0.0, 1.0);

        // move up to the node
        let midf = p1f + (p2f - p1f) * frac;
        let mid = lerp(p1, p2, frac);
        self.recursive_hull_check(node.children[side], p1f, midf, p1, &mid);

        // go past the node
        let midf2 = p1f + (p2f - p1f) * frac2;
        let mid2 = lerp(p1, p2, frac2);
        self.recursive_hull_check(node.children[side ^ 1], midf2, p2f, &mid2, p2);
    }
}

fn lerp(p1: &Vec3, p2: &Vec3, frac: f32) -> Vec3 {
    [
        p1[0] + frac * (p2[0] - p1[0]),
        p1[1] + frac * (p2[1] - p1[1]),
        p1[2] + frac * (p2[2] - p1[2]),
    ]
}

// ============================================================
// Clipping against entities
// ============================================================

/// Folds the traces of candidate entities into `tr`, which starts as the
/// world result. `trace_entity` returns the entity number and its trace,
/// or `None` to skip a candidate. An all solid, start solid or closer hit
/// replaces the accumulated result, keeping an earlier start solid.
pub fn clip_to_entities<T>(
    tr: &mut Trace,
    candidates: impl IntoIterator<Item = T>,
    mut trace_entity: impl FnMut(T) -> Option<(i32, Trace)>,
) {
    for candidate in candidates {
        if tr.allsolid {
            return;
        }
        let Some((number, mut trace)) = trace_entity(candidate) else {
            continue;
        };

        if trace.allsolid || trace.startsolid || trace.fraction < tr.fraction {
            trace.ent_index = number;
            let was_startsolid = tr.startsolid;
            *tr = trace;
            tr.startsolid |= was_startsolid;
        }
    }
}

// ============================================================
// Builder for axis aligned brush worlds
// ============================================================

const BUILD_EXTENT: f32 = 65536.0;

#[derive(Debug, Clone)]
struct BoxBrush {
    mins: Vec3,
    maxs: Vec3,
    contents: i32,
    surface: Option<usize>,
}

/// Assembles a collision model out of axis aligned box brushes. Each model
/// gets a tree split on brush faces, so every leaf is either fully inside
/// or fully outside each brush and leaf contents stay exact.
#[derive(Debug, Default)]
pub struct CollisionModelBuilder {
    surfaces: Vec<CSurface>,
    world: Vec<BoxBrush>,
    submodels: Vec<Vec<BoxBrush>>,
}

impl CollisionModelBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_surface(&mut self, name: &str, flags: i32, value: i32) -> usize {
        self.surfaces.push(CSurface { name: name.to_string(), flags, value });
        self.surfaces.len() - 1
    }

    pub fn add_box(&mut self, mins: Vec3, maxs: Vec3, contents: i32) -> &mut Self {
        self.world.push(BoxBrush { mins, maxs, contents, surface: None });
        self
    }

    pub fn add_box_with_surface(
        &mut self,
        mins: Vec3,
        maxs: Vec3,
        contents: i32,
        surface: usize,
    ) -> &mut Self {
        self.world.push(BoxBrush { mins, maxs, contents, surface: Some(surface) });
        self
    }

    /// Adds an inline brush model built from boxes in its local frame and
    /// returns its model index (the `N` of `*N`).
    pub fn add_submodel(&mut self, boxes: &[(Vec3, Vec3, i32)]) -> usize {
        self.submodels.push(
            boxes
                .iter()
                .map(|&(mins, maxs, contents)| BoxBrush { mins, maxs, contents, surface: None })
                .collect(),
        );
        self.submodels.len()
    }

    pub fn build(&self) -> Result<CollisionModel, CollisionError> {
        let mut state = BuildState {
            parts: CollisionParts { surfaces: self.surfaces.clone(), ..Default::default() },
            plane_index: HashMap::new(),
            bounds: Vec::new(),
        };

        let groups = std::iter::once(&self.world).chain(self.submodels.iter());
        for group in groups {
            let first = state.bounds.len();
            for b in group {
                state.add_brush(b);
            }
            let brushes: Vec<usize> = (first..state.bounds.len()).collect();

            let (mins, maxs) = group_bounds(group);
            let headnode =
                state.build_tree([-BUILD_EXTENT; 3], [BUILD_EXTENT; 3], &brushes);
            state.parts.models.push(CModel { mins, maxs, origin: VEC3_ORIGIN, headnode });
        }

        CollisionModel::from_parts(state.parts)
    }
}

fn group_bounds(group: &[BoxBrush]) -> (Vec3, Vec3) {
    let Some(first) = group.first() else {
        return (VEC3_ORIGIN, VEC3_ORIGIN);
    };
    let (mut mins, mut maxs) = (first.mins, first.maxs);
    for b in group {
        for i in 0..3 {
            mins[i] = mins[i].min(b.mins[i]);
            maxs[i] = maxs[i].max(b.maxs[i]);
        }
    }
    (mins, maxs)
}

struct BuildState {
    parts: CollisionParts,
    plane_index: HashMap<(usize, bool, u32), usize>,
    bounds: Vec<(Vec3, Vec3, i32)>,
}

impl BuildState {
    fn axial_plane(&mut self, axis: usize, negative: bool, dist: f32) -> usize {
        let key = (axis, negative, dist.to_bits());
        if let Some(&idx) = self.plane_index.get(&key) {
            return idx;
        }
        let mut normal = [0.0; 3];
        normal[axis] = if negative { -1.0 } else { 1.0 };
        let d = if negative { -dist } else { dist };
        self.parts.planes.push(CPlane::new(normal, d));
        let idx = self.parts.planes.len() - 1;
        self.plane_index.insert(key, idx);
        idx
    }

    fn add_brush(&mut self, b: &BoxBrush) {
        let firstbrushside = self.parts.brushsides.len();
        for axis in 0..3 {
            let back = self.axial_plane(axis, true, b.mins[axis]);
            let front = self.axial_plane(axis, false, b.maxs[axis]);
            self.parts.brushsides.push(CBrushSide { plane: back, surface: b.surface });
            self.parts.brushsides.push(CBrushSide { plane: front, surface: b.surface });
        }
        self.parts.brushes.push(CBrush { contents: b.contents, firstbrushside, numsides: 6 });
        self.bounds.push((b.mins, b.maxs, b.contents));
    }

    fn build_tree(&mut self, rmins: Vec3, rmaxs: Vec3, candidates: &[usize]) -> i32 {
        let inside: Vec<usize> = candidates
            .iter()
            .copied()
            .filter(|&b| {
                let (bmins, bmaxs, _) = self.bounds[b];
                (0..3).all(|i| bmins[i] < rmaxs[i] && bmaxs[i] > rmins[i])
            })
            .collect();

        // first brush face strictly inside the region
        let split = inside.iter().find_map(|&b| {
            let (bmins, bmaxs, _) = self.bounds[b];
            (0..3).find_map(|axis| {
                [bmins[axis], bmaxs[axis]]
                    .into_iter()
                    .find(|&f| f > rmins[axis] && f < rmaxs[axis])
                    .map(|f| (axis, f))
            })
        });

        let Some((axis, dist)) = split else {
            // every remaining brush covers the whole region
            let firstleafbrush = self.parts.leafbrushes.len();
            let contents = inside.iter().fold(0, |c, &b| c | self.bounds[b].2);
            self.parts.leafbrushes.extend_from_slice(&inside);
            self.parts.leafs.push(CLeaf { contents, firstleafbrush, numleafbrushes: inside.len() });
            return -1 - (self.parts.leafs.len() as i32 - 1);
        };

        let plane = self.axial_plane(axis, false, dist);
        let nodenum = self.parts.nodes.len();
        self.parts.nodes.push(CNode { plane, children: [0, 0] });

        let mut front_mins = rmins;
        front_mins[axis] = dist;
        let mut back_maxs = rmaxs;
        back_maxs[axis] = dist;

        let front = self.build_tree(front_mins, rmaxs, &inside);
        let back = self.build_tree(rmins, back_maxs, &inside);
        self.parts.nodes[nodenum].children = [front, back];
        nodenum as i32
    }
}
