// q_shared.rs — types and math shared by the client and server movement code

// ============================================================
// Basic types
// ============================================================

pub type Vec3 = [f32; 3];

pub const VEC3_ORIGIN: Vec3 = [0.0, 0.0, 0.0];

pub const PITCH: usize = 0; // up / down
pub const YAW: usize = 1; // left / right
pub const ROLL: usize = 2; // fall over

// ============================================================
// Limits
// ============================================================

pub const MAX_QPATH: usize = 64;
pub const MAX_INFO_STRING: usize = 512;
pub const MAX_INFO_KEY: usize = 64;
pub const MAX_INFO_VALUE: usize = 64;

pub const MAX_CLIENTS: usize = 256;
pub const MAX_EDICTS: usize = 1024;
pub const MAX_LIGHTSTYLES: usize = 256;
pub const MAX_MODELS: usize = 256;
pub const MAX_SOUNDS: usize = 256;
pub const MAX_IMAGES: usize = 256;
pub const MAX_ITEMS: usize = 256;
pub const MAX_GENERAL: usize = MAX_CLIENTS * 2;
pub const MAX_CLIP_PLANES: usize = 5;

// ============================================================
// Print levels
// ============================================================

pub const PRINT_LOW: i32 = 0;
pub const PRINT_MEDIUM: i32 = 1;
pub const PRINT_HIGH: i32 = 2;
pub const PRINT_CHAT: i32 = 3;

// ============================================================
// Cvar flags
// ============================================================

pub const CVAR_ARCHIVE: i32 = 1; // set to cause it to be saved to vars.rc
pub const CVAR_USERINFO: i32 = 2; // added to userinfo when changed
pub const CVAR_SERVERINFO: i32 = 4; // added to serverinfo when changed
pub const CVAR_NOSET: i32 = 8; // don't allow change from console at all
pub const CVAR_LATCH: i32 = 16; // save changes until server restart

// ============================================================
// Content flags
// ============================================================

pub const CONTENTS_SOLID: i32 = 1;
pub const CONTENTS_WINDOW: i32 = 2;
pub const CONTENTS_AUX: i32 = 4;
pub const CONTENTS_LAVA: i32 = 8;
pub const CONTENTS_SLIME: i32 = 16;
pub const CONTENTS_WATER: i32 = 32;
pub const CONTENTS_MIST: i32 = 64;

pub const CONTENTS_AREAPORTAL: i32 = 0x8000;
pub const CONTENTS_PLAYERCLIP: i32 = 0x10000;
pub const CONTENTS_MONSTERCLIP: i32 = 0x20000;

// currents can be added to any other contents, and may be mixed
pub const CONTENTS_CURRENT_0: i32 = 0x40000;
pub const CONTENTS_CURRENT_90: i32 = 0x80000;
pub const CONTENTS_CURRENT_180: i32 = 0x100000;
pub const CONTENTS_CURRENT_270: i32 = 0x200000;
pub const CONTENTS_CURRENT_UP: i32 = 0x400000;
pub const CONTENTS_CURRENT_DOWN: i32 = 0x800000;

pub const CONTENTS_ORIGIN: i32 = 0x1000000;
pub const CONTENTS_MONSTER: i32 = 0x2000000;
pub const CONTENTS_DEADMONSTER: i32 = 0x4000000;
pub const CONTENTS_DETAIL: i32 = 0x8000000;
pub const CONTENTS_TRANSLUCENT: i32 = 0x10000000;
pub const CONTENTS_LADDER: i32 = 0x20000000;

pub const SURF_LIGHT: i32 = 0x1;
pub const SURF_SLICK: i32 = 0x2;
pub const SURF_SKY: i32 = 0x4;
pub const SURF_WARP: i32 = 0x8;

// ============================================================
// Content masks
// ============================================================

pub const MASK_ALL: i32 = -1;
pub const MASK_SOLID: i32 = CONTENTS_SOLID | CONTENTS_WINDOW;
pub const MASK_PLAYERSOLID: i32 =
    CONTENTS_SOLID | CONTENTS_PLAYERCLIP | CONTENTS_WINDOW | CONTENTS_MONSTER;
pub const MASK_DEADSOLID: i32 = CONTENTS_SOLID | CONTENTS_PLAYERCLIP | CONTENTS_WINDOW;
pub const MASK_WATER: i32 = CONTENTS_WATER | CONTENTS_LAVA | CONTENTS_SLIME;
pub const MASK_OPAQUE: i32 = CONTENTS_SOLID | CONTENTS_SLIME | CONTENTS_LAVA;
pub const MASK_SHOT: i32 =
    CONTENTS_SOLID | CONTENTS_MONSTER | CONTENTS_WINDOW | CONTENTS_DEADMONSTER;
pub const MASK_CURRENT: i32 = CONTENTS_CURRENT_0
    | CONTENTS_CURRENT_90
    | CONTENTS_CURRENT_180
    | CONTENTS_CURRENT_270
    | CONTENTS_CURRENT_UP
    | CONTENTS_CURRENT_DOWN;

/// `EntityState::solid` value meaning "clip against the inline brush model".
pub const SOLID_BMODEL: i32 = 31;

// ============================================================
// Fixed point coordinates
// ============================================================

/// Network and movement state store positions in 1/8 world units.
pub const COORD_SCALE: f32 = 0.125;

/// Fixed point units per world unit.
pub const COORD_UNITS: f32 = 8.0;

#[inline]
pub fn coord_to_world(c: i16) -> f32 {
    c as f32 * COORD_SCALE
}

/// Truncates toward zero, like the snapping done by movement.
#[inline]
pub fn world_to_coord(f: f32) -> i16 {
    (f * COORD_UNITS) as i16
}

pub fn origin_to_world(origin: &[i16; 3]) -> Vec3 {
    [
        coord_to_world(origin[0]),
        coord_to_world(origin[1]),
        coord_to_world(origin[2]),
    ]
}

// ============================================================
// Angle/short conversion
// ============================================================

#[inline]
pub fn angle2short(x: f32) -> i32 {
    ((x * 65536.0 / 360.0) as i32) & 65535
}

#[inline]
pub fn short2angle(x: i16) -> f32 {
    (x as f32) * (360.0 / 65536.0)
}

// ============================================================
// Config strings
// ============================================================

pub const CS_NAME: usize = 0;
pub const CS_CDTRACK: usize = 1;
pub const CS_SKY: usize = 2;
pub const CS_AIRACCEL: usize = 29; // air acceleration control
pub const CS_MAXCLIENTS: usize = 30;
pub const CS_MAPCHECKSUM: usize = 31;
pub const CS_MODELS: usize = 32;
pub const CS_SOUNDS: usize = CS_MODELS + MAX_MODELS;
pub const CS_IMAGES: usize = CS_SOUNDS + MAX_SOUNDS;
pub const CS_LIGHTS: usize = CS_IMAGES + MAX_IMAGES;
pub const CS_ITEMS: usize = CS_LIGHTS + MAX_LIGHTSTYLES;
pub const CS_PLAYERSKINS: usize = CS_ITEMS + MAX_ITEMS;
pub const CS_GENERAL: usize = CS_PLAYERSKINS + MAX_CLIENTS;
pub const MAX_CONFIGSTRINGS: usize = CS_GENERAL + MAX_GENERAL;

// ============================================================
// Plane
// ============================================================

// plane_type values: 0-2 are axial planes
pub const PLANE_X: u8 = 0;
pub const PLANE_Y: u8 = 1;
pub const PLANE_Z: u8 = 2;
pub const PLANE_ANYX: u8 = 3;
pub const PLANE_ANYY: u8 = 4;
pub const PLANE_ANYZ: u8 = 5;

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CPlane {
    pub normal: Vec3,
    pub dist: f32,
    pub plane_type: u8, // for fast side tests
    pub signbits: u8,   // signx + (signy<<1) + (signz<<2)
}

impl CPlane {
    /// Builds a plane and fills in the derived type and sign bits.
    pub fn new(normal: Vec3, dist: f32) -> Self {
        Self {
            normal,
            dist,
            plane_type: plane_type_for_normal(&normal),
            signbits: signbits_for_plane(&normal),
        }
    }
}

pub fn plane_type_for_normal(normal: &Vec3) -> u8 {
    if normal[0] == 1.0 || normal[0] == -1.0 {
        return PLANE_X;
    }
    if normal[1] == 1.0 || normal[1] == -1.0 {
        return PLANE_Y;
    }
    if normal[2] == 1.0 || normal[2] == -1.0 {
        return PLANE_Z;
    }

    let ax = normal[0].abs();
    let ay = normal[1].abs();
    let az = normal[2].abs();

    if ax >= ay && ax >= az {
        PLANE_ANYX
    } else if ay >= ax && ay >= az {
        PLANE_ANYY
    } else {
        PLANE_ANYZ
    }
}

pub fn signbits_for_plane(normal: &Vec3) -> u8 {
    let mut bits = 0u8;
    for (j, n) in normal.iter().enumerate() {
        if *n < 0.0 {
            bits |= 1 << j;
        }
    }
    bits
}

/// Returns 1 (front), 2 (back), or 3 (crossing) for a box vs. plane test.
pub fn box_on_plane_side(emins: &Vec3, emaxs: &Vec3, p: &CPlane) -> i32 {
    // fast axial cases
    if (p.plane_type as usize) < 3 {
        let t = p.plane_type as usize;
        if p.dist <= emins[t] {
            return 1;
        }
        if p.dist >= emaxs[t] {
            return 2;
        }
        return 3;
    }

    // general case: pick the nearest and farthest corners from the sign bits
    let mut near = [0.0f32; 3];
    let mut far = [0.0f32; 3];
    for i in 0..3 {
        if p.signbits & (1 << i) != 0 {
            far[i] = emins[i];
            near[i] = emaxs[i];
        } else {
            far[i] = emaxs[i];
            near[i] = emins[i];
        }
    }
    let dist1 = dot_product(&p.normal, &far);
    let dist2 = dot_product(&p.normal, &near);

    let mut sides = 0;
    if dist1 >= p.dist {
        sides = 1;
    }
    if dist2 < p.dist {
        sides |= 2;
    }
    sides
}

// ============================================================
// Collision model / surface
// ============================================================

/// An inline model: the world is model 0, doors and platforms follow.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CModel {
    pub mins: Vec3,
    pub maxs: Vec3,
    pub origin: Vec3, // for sounds or lights
    pub headnode: i32,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CSurface {
    pub name: String,
    pub flags: i32,
    pub value: i32,
}

// ============================================================
// Trace
// ============================================================

/// Result of a swept box query. `ent_index` is -1 when nothing was hit,
/// 0 for the world, otherwise the entity number that blocked the move.
#[derive(Debug, Clone, PartialEq)]
pub struct Trace {
    pub allsolid: bool,   // if true, plane is not valid
    pub startsolid: bool, // if true, the initial point was in a solid area
    pub fraction: f32,    // time completed, 1.0 = didn't hit anything
    pub endpos: Vec3,     // final position
    pub plane: CPlane,    // surface normal at impact
    pub surface: Option<CSurface>,
    pub contents: i32, // contents on other side of surface hit
    pub ent_index: i32,
}

impl Default for Trace {
    fn default() -> Self {
        Self {
            allsolid: false,
            startsolid: false,
            fraction: 1.0,
            endpos: [0.0; 3],
            plane: CPlane::default(),
            surface: None,
            contents: 0,
            ent_index: -1,
        }
    }
}

// ============================================================
// Player movement types
// ============================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
#[repr(u8)]
pub enum PmType {
    #[default]
    Normal = 0,
    Spectator = 1,
    // no acceleration or turning
    Dead = 2,
    Gib = 3, // different bounding box
    Freeze = 4,
}

impl PmType {
    pub fn from_byte(b: u8) -> Self {
        match b {
            1 => PmType::Spectator,
            2 => PmType::Dead,
            3 => PmType::Gib,
            4 => PmType::Freeze,
            _ => PmType::Normal,
        }
    }
}

bitflags::bitflags! {
    /// Movement flags carried bit-accurate in `PmoveState`.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct PmFlags: u8 {
        const DUCKED         = 1;
        const JUMP_HELD      = 2;
        const ON_GROUND      = 4;
        const TIME_WATERJUMP = 8;  // pm_time is waterjump
        const TIME_LAND      = 16; // pm_time is time before rejump
        const TIME_TELEPORT  = 32; // pm_time is non-moving time
        const NO_PREDICTION  = 64; // temporarily disables prediction (used for grappling hook)
        const ANY_TIME = Self::TIME_WATERJUMP.bits() | Self::TIME_LAND.bits() | Self::TIME_TELEPORT.bits();
    }
}

/// Communicated bit-accurate between server and client for prediction sync.
/// No floats: positions and velocities are in 1/8 unit fixed point.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PmoveState {
    pub pm_type: PmType,
    pub origin: [i16; 3],
    pub velocity: [i16; 3],
    pub pm_flags: PmFlags,
    pub pm_time: u8, // each unit = 8 ms
    pub gravity: i16,
    pub delta_angles: [i16; 3], // add to command angles to get view direction
}

// ============================================================
// Usercmd
// ============================================================

pub const BUTTON_ATTACK: u8 = 1;
pub const BUTTON_USE: u8 = 2;
pub const BUTTON_ANY: u8 = 128; // any key whatsoever

/// One discrete step of player intent, sent from the client each frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct UserCmd {
    pub msec: u8,
    pub buttons: u8,
    pub angles: [i16; 3],
    pub forwardmove: i16,
    pub sidemove: i16,
    pub upmove: i16,
    pub impulse: u8,
    pub lightlevel: u8, // light level the player is standing on
}

// ============================================================
// Pmove
// ============================================================

pub const MAXTOUCH: usize = 32;

/// Input and output of one movement step. The trace and point contents
/// callbacks are supplied separately at call time.
#[derive(Debug, Clone)]
pub struct PmoveData {
    // state (in / out)
    pub s: PmoveState,

    // command (in)
    pub cmd: UserCmd,
    pub snapinitial: bool, // if s has been changed outside pmove

    // results (out)
    pub numtouch: usize,
    pub touchents: [i32; MAXTOUCH],

    pub viewangles: Vec3,
    pub viewheight: f32,

    pub mins: Vec3,
    pub maxs: Vec3,

    pub groundentity: i32, // -1 = none
    pub watertype: i32,
    pub waterlevel: i32,
}

impl Default for PmoveData {
    fn default() -> Self {
        Self {
            s: PmoveState::default(),
            cmd: UserCmd::default(),
            snapinitial: false,
            numtouch: 0,
            touchents: [-1; MAXTOUCH],
            viewangles: [0.0; 3],
            viewheight: 0.0,
            mins: [0.0; 3],
            maxs: [0.0; 3],
            groundentity: -1,
            watertype: 0,
            waterlevel: 0,
        }
    }
}

// ============================================================
// Entity state
// ============================================================

/// Network-visible state of one entity, as carried by snapshots and
/// baselines.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EntityState {
    pub number: i32, // edict index
    pub origin: Vec3,
    pub angles: Vec3,
    pub old_origin: Vec3, // for lerping
    pub modelindex: i32,
    pub modelindex2: i32,
    pub modelindex3: i32,
    pub modelindex4: i32,
    pub frame: i32,
    pub skinnum: i32,
    pub effects: u32,
    pub renderfx: i32,
    pub solid: i32, // encoded bbox, or SOLID_BMODEL for inline models
    pub sound: i32,
    pub event: i32,
}

impl EntityState {
    /// Decodes the packed `solid` value into a bounding box. Returns `None`
    /// for non-solid and brush-model entities.
    pub fn solid_bbox(&self) -> Option<(Vec3, Vec3)> {
        if self.solid == 0 || self.solid == SOLID_BMODEL {
            return None;
        }
        let x = 8 * (self.solid & 31);
        let zd = 8 * ((self.solid >> 5) & 31);
        let zu = 8 * ((self.solid >> 10) & 63) - 32;

        let mins = [-x as f32, -x as f32, -zd as f32];
        let maxs = [x as f32, x as f32, zu as f32];
        Some((mins, maxs))
    }
}

/// Packs a bounding box into the `solid` field the way the server sends it.
pub fn encode_solid_bbox(mins: &Vec3, maxs: &Vec3) -> i32 {
    // assume that x/y are equal and symmetric
    let i = ((maxs[0] / 8.0) as i32).clamp(1, 31);

    // z is not symmetric
    let j = ((-mins[2] / 8.0) as i32).clamp(1, 31);

    // and z maxs can be negative...
    let k = (((maxs[2] + 32.0) / 8.0) as i32).clamp(1, 63);

    (k << 10) | (j << 5) | i
}

// ============================================================
// Vector math
// ============================================================

#[inline]
pub fn dot_product(a: &Vec3, b: &Vec3) -> f32 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

#[inline]
pub fn vector_subtract(a: &Vec3, b: &Vec3) -> Vec3 {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}

#[inline]
pub fn vector_add(a: &Vec3, b: &Vec3) -> Vec3 {
    [a[0] + b[0], a[1] + b[1], a[2] + b[2]]
}

/// `start + scale * dir`
#[inline]
pub fn vector_ma(start: &Vec3, scale: f32, dir: &Vec3) -> Vec3 {
    [
        start[0] + scale * dir[0],
        start[1] + scale * dir[1],
        start[2] + scale * dir[2],
    ]
}

pub fn vector_length(v: &Vec3) -> f32 {
    (v[0] * v[0] + v[1] * v[1] + v[2] * v[2]).sqrt()
}

pub fn vector_scale(v: &Vec3, scale: f32) -> Vec3 {
    [v[0] * scale, v[1] * scale, v[2] * scale]
}

/// Normalize in place, returns original length.
pub fn vector_normalize(v: &mut Vec3) -> f32 {
    let length = vector_length(v);
    if length != 0.0 {
        let ilength = 1.0 / length;
        v[0] *= ilength;
        v[1] *= ilength;
        v[2] *= ilength;
    }
    length
}

pub fn cross_product(v1: &Vec3, v2: &Vec3) -> Vec3 {
    [
        v1[1] * v2[2] - v1[2] * v2[1],
        v1[2] * v2[0] - v1[0] * v2[2],
        v1[0] * v2[1] - v1[1] * v2[0],
    ]
}

/// Returns (forward, right, up) for a set of Euler angles in degrees.
pub fn angle_vectors(angles: &Vec3) -> (Vec3, Vec3, Vec3) {
    let (sy, cy) = angles[YAW].to_radians().sin_cos();
    let (sp, cp) = angles[PITCH].to_radians().sin_cos();
    let (sr, cr) = angles[ROLL].to_radians().sin_cos();

    let forward = [cp * cy, cp * sy, -sp];
    let right = [
        -sr * sp * cy + -cr * -sy,
        -sr * sp * sy + -cr * cy,
        -sr * cp,
    ];
    let up = [
        cr * sp * cy + -sr * -sy,
        cr * sp * sy + -sr * cy,
        cr * cp,
    ];
    (forward, right, up)
}

// ============================================================
// Info strings
// ============================================================

/// Clears the high bit of every char, folding colored console text to
/// plain ASCII.
pub fn mask_high_bits(s: &str) -> String {
    s.chars().map(|c| char::from((c as u32 & 127) as u8)).collect()
}

/// Searches a `\key\value\key\value` string for the given key.
/// Returns an empty string if the key is not present.
pub fn info_value_for_key(s: &str, key: &str) -> String {
    let mut parts = s.strip_prefix('\\').unwrap_or(s).split('\\');
    loop {
        let Some(k) = parts.next() else {
            return String::new();
        };
        let v = parts.next().unwrap_or("");
        if k == key {
            return v.to_string();
        }
    }
}

/// Info keys and values may not carry separators or quotes.
pub fn info_validate(s: &str) -> bool {
    !s.contains('\\') && !s.contains('"') && !s.contains(';')
}

/// Replaces (or appends) a key in an info string. Empty values remove the key.
pub fn info_set_value_for_key(s: &mut String, key: &str, value: &str) {
    if !info_validate(key) || !info_validate(value) {
        return;
    }

    let mut pairs: Vec<(String, String)> = Vec::new();
    let mut parts = s.strip_prefix('\\').unwrap_or(s).split('\\');
    while let Some(k) = parts.next() {
        if k.is_empty() {
            continue;
        }
        let v = parts.next().unwrap_or("");
        if k != key {
            pairs.push((k.to_string(), v.to_string()));
        }
    }
    if !value.is_empty() {
        pairs.push((key.to_string(), value.to_string()));
    }

    let mut out = String::new();
    for (k, v) in pairs {
        let piece = format!("\\{}\\{}", k, v);
        if out.len() + piece.len() >= MAX_INFO_STRING {
            break;
        }
        out.push_str(&piece);
    }
    *s = out;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coord_conversions() {
        assert_eq!(coord_to_world(8), 1.0);
        assert_eq!(coord_to_world(-4), -0.5);
        assert_eq!(world_to_coord(1.0), 8);
        assert_eq!(world_to_coord(-0.5), -4);
        // truncation toward zero
        assert_eq!(world_to_coord(0.2), 1);
        assert_eq!(world_to_coord(-0.2), -1);
        assert_eq!(origin_to_world(&[8, 16, -24]), [1.0, 2.0, -3.0]);
    }

    #[test]
    fn test_short_angle_roundtrip() {
        assert_eq!(short2angle(angle2short(90.0) as i16), 90.0);
        assert_eq!(angle2short(0.0), 0);
        assert_eq!(angle2short(360.0), 0);
    }

    #[test]
    fn test_solid_bbox_decode() {
        let ent = EntityState {
            solid: 2 | (3 << 5) | (5 << 10),
            ..Default::default()
        };
        let (mins, maxs) = ent.solid_bbox().unwrap();
        assert_eq!(mins, [-16.0, -16.0, -24.0]);
        assert_eq!(maxs, [16.0, 16.0, 8.0]);
    }

    #[test]
    fn test_solid_bbox_player_hull_roundtrip() {
        let solid = encode_solid_bbox(&[-16.0, -16.0, -24.0], &[16.0, 16.0, 32.0]);
        let ent = EntityState { solid, ..Default::default() };
        let (mins, maxs) = ent.solid_bbox().unwrap();
        assert_eq!(mins, [-16.0, -16.0, -24.0]);
        assert_eq!(maxs, [16.0, 16.0, 32.0]);
    }

    #[test]
    fn test_solid_bbox_non_solid_and_bmodel() {
        let mut ent = EntityState::default();
        assert!(ent.solid_bbox().is_none());
        ent.solid = SOLID_BMODEL;
        assert!(ent.solid_bbox().is_none());
    }

    #[test]
    fn test_plane_type_and_signbits() {
        assert_eq!(plane_type_for_normal(&[0.0, 0.0, -1.0]), PLANE_Z);
        assert_eq!(plane_type_for_normal(&[0.6, 0.8, 0.0]), PLANE_ANYY);
        assert_eq!(signbits_for_plane(&[-1.0, 0.0, -1.0]), 0b101);
    }

    #[test]
    fn test_box_on_plane_side() {
        let p = CPlane::new([0.0, 0.0, 1.0], 10.0);
        assert_eq!(box_on_plane_side(&[0.0, 0.0, 20.0], &[1.0, 1.0, 30.0], &p), 1);
        assert_eq!(box_on_plane_side(&[0.0, 0.0, 0.0], &[1.0, 1.0, 5.0], &p), 2);
        assert_eq!(box_on_plane_side(&[0.0, 0.0, 0.0], &[1.0, 1.0, 15.0], &p), 3);

        let diag = CPlane::new([0.70710677, 0.70710677, 0.0], 0.0);
        assert_eq!(box_on_plane_side(&[1.0, 1.0, 0.0], &[2.0, 2.0, 1.0], &diag), 1);
        assert_eq!(box_on_plane_side(&[-2.0, -2.0, 0.0], &[-1.0, -1.0, 1.0], &diag), 2);
        assert_eq!(box_on_plane_side(&[-1.0, -1.0, 0.0], &[1.0, 1.0, 1.0], &diag), 3);
    }

    #[test]
    fn test_angle_vectors_yaw_90() {
        let (f, r, u) = angle_vectors(&[0.0, 90.0, 0.0]);
        assert!(f[0].abs() < 1e-6 && (f[1] - 1.0).abs() < 1e-6);
        assert!((r[0] - 1.0).abs() < 1e-6 && r[1].abs() < 1e-6);
        assert!((u[2] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_info_strings() {
        let mut s = String::from("\\name\\player\\rate\\25000");
        assert_eq!(info_value_for_key(&s, "name"), "player");
        assert_eq!(info_value_for_key(&s, "rate"), "25000");
        assert_eq!(info_value_for_key(&s, "skin"), "");

        info_set_value_for_key(&mut s, "name", "other");
        assert_eq!(info_value_for_key(&s, "name"), "other");
        assert_eq!(info_value_for_key(&s, "rate"), "25000");

        info_set_value_for_key(&mut s, "rate", "");
        assert_eq!(info_value_for_key(&s, "rate"), "");

        // separators are refused
        info_set_value_for_key(&mut s, "name", "a\\b");
        assert_eq!(info_value_for_key(&s, "name"), "other");
    }
}
