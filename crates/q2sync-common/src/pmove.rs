// pmove.rs — deterministic player movement shared by client prediction and the server
//
// Everything here is a pure function of the incoming state, the command and
// the two collision callbacks. Client and server must produce identical
// results for identical inputs, so all timing comes from `cmd.msec`.

use crate::q_shared::{
    angle_vectors, coord_to_world, cross_product, dot_product, short2angle, vector_length,
    vector_normalize, vector_scale, world_to_coord, CPlane, CSurface, PmFlags, PmType,
    PmoveData, Trace, Vec3, CONTENTS_CURRENT_0, CONTENTS_CURRENT_180, CONTENTS_CURRENT_270,
    CONTENTS_CURRENT_90, CONTENTS_CURRENT_DOWN, CONTENTS_CURRENT_UP, CONTENTS_LADDER,
    CONTENTS_SLIME, CONTENTS_SOLID, CONTENTS_WATER, COORD_SCALE, MASK_CURRENT, MASK_WATER,
    MAXTOUCH, MAX_CLIP_PLANES, PITCH, SURF_SLICK, VEC3_ORIGIN, YAW,
};

// ============================================================
// Movement constants
// ============================================================

pub const STEPSIZE: f32 = 18.0;
const STOP_EPSILON: f32 = 0.1; // velocity components below this snap to zero
const MIN_STEP_NORMAL: f32 = 0.7; // can't step up onto very steep slopes

pub const PM_STOPSPEED: f32 = 100.0;
pub const PM_MAXSPEED: f32 = 300.0;
pub const PM_DUCKSPEED: f32 = 100.0;
pub const PM_ACCELERATE: f32 = 10.0;
pub const PM_WATERACCELERATE: f32 = 10.0;
pub const PM_FRICTION: f32 = 6.0;
pub const PM_WATERFRICTION: f32 = 1.0;
pub const PM_WATERSPEED: f32 = 400.0;

const LADDER_SPEED: f32 = 200.0;
const JUMP_SPEED: f32 = 270.0;

/// Tunables that the server may change per level. Clients receive them
/// through configstrings, so both sides move identically.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PmoveParams {
    /// Air control; 0 gives the classic "almost none" behaviour.
    pub airaccelerate: f32,
}

/// Collision queries supplied by whoever runs the move.
pub trait PmoveCallbacks {
    fn trace(&self, start: &Vec3, mins: &Vec3, maxs: &Vec3, end: &Vec3) -> Trace;
    fn pointcontents(&self, point: &Vec3) -> i32;
}

/// Scratch values for one move, discarded afterwards.
#[derive(Debug, Clone, Default)]
struct MoveLocal {
    origin: Vec3,   // full float precision
    velocity: Vec3, // full float precision

    forward: Vec3,
    right: Vec3,
    up: Vec3,
    frametime: f32,

    groundsurface: Option<CSurface>,
    groundplane: CPlane,
    groundcontents: i32,

    previous_origin: [i16; 3],
    ladder: bool,
}

struct PlayerMove<'a, C: PmoveCallbacks> {
    pm: &'a mut PmoveData,
    params: &'a PmoveParams,
    cb: &'a C,
    l: MoveLocal,
}

/// Slides `inv` along a plane. Components that end up within
/// STOP_EPSILON of zero are zeroed.
pub fn pm_clip_velocity(inv: &Vec3, normal: &Vec3, overbounce: f32) -> Vec3 {
    let backoff = dot_product(inv, normal) * overbounce;
    let mut out = [0.0; 3];
    for i in 0..3 {
        out[i] = inv[i] - normal[i] * backoff;
        if out[i] > -STOP_EPSILON && out[i] < STOP_EPSILON {
            out[i] = 0.0;
        }
    }
    out
}

/// Unit push for each current bit present in `contents`.
fn current_direction(contents: i32) -> Vec3 {
    const CURRENTS: [(i32, usize, f32); 6] = [
        (CONTENTS_CURRENT_0, 0, 1.0),
        (CONTENTS_CURRENT_90, 1, 1.0),
        (CONTENTS_CURRENT_180, 0, -1.0),
        (CONTENTS_CURRENT_270, 1, -1.0),
        (CONTENTS_CURRENT_UP, 2, 1.0),
        (CONTENTS_CURRENT_DOWN, 2, -1.0),
    ];
    let mut v = [0.0; 3];
    for (bit, axis, dir) in CURRENTS {
        if contents & bit != 0 {
            v[axis] += dir;
        }
    }
    v
}

impl<'a, C: PmoveCallbacks> PlayerMove<'a, C> {
    fn trace(&self, start: &Vec3, end: &Vec3) -> Trace {
        self.cb.trace(start, &self.pm.mins, &self.pm.maxs, end)
    }

    fn touch(&mut self, ent: i32) {
        if self.pm.numtouch < MAXTOUCH && ent >= 0 {
            self.pm.touchents[self.pm.numtouch] = ent;
            self.pm.numtouch += 1;
        }
    }

    fn on_ground(&self) -> bool {
        self.pm.groundentity >= 0
    }

    fn clear_timers(&mut self) {
        self.pm.s.pm_flags.remove(PmFlags::ANY_TIME);
        self.pm.s.pm_time = 0;
    }

    // ============================================================
    // Sliding
    // ============================================================

    /// Moves along the velocity, clipping against up to MAX_CLIP_PLANES
    /// surfaces.
    fn slide_move(&mut self) {
        let primal_velocity = self.l.velocity;
        let mut planes: [Vec3; MAX_CLIP_PLANES] = [[0.0; 3]; MAX_CLIP_PLANES];
        let mut numplanes = 0;
        let mut time_left = self.l.frametime;

        for _ in 0..4 {
            let mut end = [0.0; 3];
            for i in 0..3 {
                end[i] = self.l.origin[i] + time_left * self.l.velocity[i];
            }

            let trace = self.trace(&self.l.origin, &end);

            if trace.allsolid {
                // entity is trapped in another solid
                self.l.velocity[2] = 0.0; // don't build up falling damage
                return;
            }

            if trace.fraction > 0.0 {
                // actually covered some distance
                self.l.origin = trace.endpos;
                numplanes = 0;
            }

            if trace.fraction == 1.0 {
                break; // moved the entire distance
            }

            self.touch(trace.ent_index);

            time_left -= time_left * trace.fraction;

            // slide along this plane
            if numplanes >= MAX_CLIP_PLANES {
                // this shouldn't really happen
                self.l.velocity = VEC3_ORIGIN;
                break;
            }
            planes[numplanes] = trace.plane.normal;
            numplanes += 1;

            // modify velocity so it parallels all of the clip planes
            let mut clipped = None;
            for i in 0..numplanes {
                let v = pm_clip_velocity(&self.l.velocity, &planes[i], 1.01);
                self.l.velocity = v;
                let ok = (0..numplanes).all(|j| j == i || dot_product(&v, &planes[j]) >= 0.0);
                if ok {
                    clipped = Some(i);
                    break;
                }
            }

            if clipped.is_none() {
                // go along the crease
                if numplanes != 2 {
                    self.l.velocity = VEC3_ORIGIN;
                    break;
                }
                let dir = cross_product(&planes[0], &planes[1]);
                let d = dot_product(&dir, &self.l.velocity);
                self.l.velocity = vector_scale(&dir, d);
            }

            // if velocity is against the original velocity, stop dead
            // to avoid tiny oscillations in sloping corners
            if dot_product(&self.l.velocity, &primal_velocity) <= 0.0 {
                self.l.velocity = VEC3_ORIGIN;
                break;
            }
        }

        if self.pm.s.pm_time != 0 {
            self.l.velocity = primal_velocity;
        }
    }

    /// Slides, then tries the same move from STEPSIZE higher and keeps
    /// whichever went further horizontally.
    fn step_slide_move(&mut self) {
        let start_o = self.l.origin;
        let start_v = self.l.velocity;

        self.slide_move();

        let down_o = self.l.origin;
        let down_v = self.l.velocity;

        let mut up = start_o;
        up[2] += STEPSIZE;

        if self.trace(&up, &up).allsolid {
            return; // can't step up
        }

        // try sliding above
        self.l.origin = up;
        self.l.velocity = start_v;
        self.slide_move();

        // push down the final amount
        let mut down = self.l.origin;
        down[2] -= STEPSIZE;
        let trace = self.trace(&self.l.origin, &down);
        if !trace.allsolid {
            self.l.origin = trace.endpos;
        }

        let horizontal = |p: &Vec3| {
            (p[0] - start_o[0]) * (p[0] - start_o[0]) + (p[1] - start_o[1]) * (p[1] - start_o[1])
        };
        let down_dist = horizontal(&down_o);
        let up_dist = horizontal(&self.l.origin);

        if down_dist > up_dist || trace.plane.normal[2] < MIN_STEP_NORMAL {
            self.l.origin = down_o;
            self.l.velocity = down_v;
            return;
        }

        // if we were walking along a plane, then we need to copy the Z over
        self.l.velocity[2] = down_v[2];
    }

    // ============================================================
    // Acceleration
    // ============================================================

    fn friction(&mut self) {
        let speed = vector_length(&self.l.velocity);
        if speed < 1.0 {
            self.l.velocity[0] = 0.0;
            self.l.velocity[1] = 0.0;
            return;
        }

        let mut drop = 0.0;

        // ground friction, unless the floor is slick
        let slick = self.l.groundsurface.as_ref().is_some_and(|s| s.flags & SURF_SLICK != 0);
        if (self.on_ground() && !slick) || self.l.ladder {
            let control = speed.max(PM_STOPSPEED);
            drop += control * PM_FRICTION * self.l.frametime;
        }

        if self.pm.waterlevel != 0 && !self.l.ladder {
            drop += speed * PM_WATERFRICTION * self.pm.waterlevel as f32 * self.l.frametime;
        }

        let newspeed = (speed - drop).max(0.0) / speed;
        self.l.velocity = vector_scale(&self.l.velocity, newspeed);
    }

    fn accelerate(&mut self, wishdir: &Vec3, wishspeed: f32, accel: f32) {
        let addspeed = wishspeed - dot_product(&self.l.velocity, wishdir);
        if addspeed <= 0.0 {
            return;
        }
        let accelspeed = (accel * self.l.frametime * wishspeed).min(addspeed);
        for i in 0..3 {
            self.l.velocity[i] += accelspeed * wishdir[i];
        }
    }

    fn air_accelerate(&mut self, wishdir: &Vec3, wishspeed: f32, accel: f32) {
        let wishspd = wishspeed.min(30.0);
        let addspeed = wishspd - dot_product(&self.l.velocity, wishdir);
        if addspeed <= 0.0 {
            return;
        }
        let accelspeed = (accel * wishspeed * self.l.frametime).min(addspeed);
        for i in 0..3 {
            self.l.velocity[i] += accelspeed * wishdir[i];
        }
    }

    /// Ladders, water currents and conveyor belts.
    fn add_currents(&mut self, wishvel: &mut Vec3) {
        if self.l.ladder && self.l.velocity[2].abs() <= LADDER_SPEED {
            let pitch = self.pm.viewangles[PITCH];
            let cmd = &self.pm.cmd;
            wishvel[2] = if pitch <= -15.0 && cmd.forwardmove > 0 {
                LADDER_SPEED
            } else if pitch >= 15.0 && cmd.forwardmove > 0 {
                -LADDER_SPEED
            } else if cmd.upmove > 0 {
                LADDER_SPEED
            } else if cmd.upmove < 0 {
                -LADDER_SPEED
            } else {
                0.0
            };

            // limit horizontal speed when on a ladder
            wishvel[0] = wishvel[0].clamp(-25.0, 25.0);
            wishvel[1] = wishvel[1].clamp(-25.0, 25.0);
        }

        if self.pm.watertype & MASK_CURRENT != 0 {
            let v = current_direction(self.pm.watertype);
            let mut s = PM_WATERSPEED;
            if self.pm.waterlevel == 1 && self.on_ground() {
                s /= 2.0;
            }
            for i in 0..3 {
                wishvel[i] += s * v[i];
            }
        }

        if self.on_ground() {
            let v = current_direction(self.l.groundcontents);
            for i in 0..3 {
                wishvel[i] += PM_STOPSPEED * v[i];
            }
        }
    }

    // ============================================================
    // Movement modes
    // ============================================================

    fn water_move(&mut self) {
        let cmd = self.pm.cmd;
        let mut wishvel = [0.0; 3];
        for i in 0..3 {
            wishvel[i] = self.l.forward[i] * cmd.forwardmove as f32
                + self.l.right[i] * cmd.sidemove as f32;
        }

        if cmd.forwardmove == 0 && cmd.sidemove == 0 && cmd.upmove == 0 {
            wishvel[2] -= 60.0; // drift towards bottom
        } else {
            wishvel[2] += cmd.upmove as f32;
        }

        self.add_currents(&mut wishvel);

        let mut wishdir = wishvel;
        let wishspeed = vector_normalize(&mut wishdir).min(PM_MAXSPEED) * 0.5;

        self.accelerate(&wishdir, wishspeed, PM_WATERACCELERATE);
        self.step_slide_move();
    }

    fn air_move(&mut self) {
        let cmd = self.pm.cmd;
        let mut wishvel = [0.0; 3];
        for i in 0..2 {
            wishvel[i] = self.l.forward[i] * cmd.forwardmove as f32
                + self.l.right[i] * cmd.sidemove as f32;
        }

        self.add_currents(&mut wishvel);

        let mut wishdir = wishvel;
        let mut wishspeed = vector_normalize(&mut wishdir);

        // clamp to server defined max speed
        let maxspeed = if self.pm.s.pm_flags.contains(PmFlags::DUCKED) {
            PM_DUCKSPEED
        } else {
            PM_MAXSPEED
        };
        if wishspeed > maxspeed {
            wishvel = vector_scale(&wishvel, maxspeed / wishspeed);
            wishspeed = maxspeed;
        }

        let gravity = self.pm.s.gravity as f32;

        if self.l.ladder {
            self.accelerate(&wishdir, wishspeed, PM_ACCELERATE);
            if wishvel[2] == 0.0 {
                // drift toward zero vertical speed
                if self.l.velocity[2] > 0.0 {
                    self.l.velocity[2] = (self.l.velocity[2] - gravity * self.l.frametime).max(0.0);
                } else {
                    self.l.velocity[2] = (self.l.velocity[2] + gravity * self.l.frametime).min(0.0);
                }
            }
            self.step_slide_move();
        } else if self.on_ground() {
            self.l.velocity[2] = 0.0; // walking on ground
            self.accelerate(&wishdir, wishspeed, PM_ACCELERATE);

            // negative gravity keeps pulling even when grounded
            if gravity > 0.0 {
                self.l.velocity[2] = 0.0;
            } else {
                self.l.velocity[2] -= gravity * self.l.frametime;
            }

            if self.l.velocity[0] == 0.0 && self.l.velocity[1] == 0.0 {
                return;
            }
            self.step_slide_move();
        } else {
            // not on ground, so little effect on velocity
            if self.params.airaccelerate != 0.0 {
                self.air_accelerate(&wishdir, wishspeed, PM_ACCELERATE);
            } else {
                self.accelerate(&wishdir, wishspeed, 1.0);
            }
            self.l.velocity[2] -= gravity * self.l.frametime;
            self.step_slide_move();
        }
    }

    fn fly_move(&mut self, doclip: bool) {
        self.pm.viewheight = 22.0;

        // friction
        let speed = vector_length(&self.l.velocity);
        if speed < 1.0 {
            self.l.velocity = VEC3_ORIGIN;
        } else {
            let control = speed.max(PM_STOPSPEED);
            let drop = control * PM_FRICTION * 1.5 * self.l.frametime;
            let newspeed = (speed - drop).max(0.0) / speed;
            self.l.velocity = vector_scale(&self.l.velocity, newspeed);
        }

        // accelerate
        vector_normalize(&mut self.l.forward);
        vector_normalize(&mut self.l.right);

        let cmd = self.pm.cmd;
        let mut wishvel = [0.0; 3];
        for i in 0..3 {
            wishvel[i] = self.l.forward[i] * cmd.forwardmove as f32
                + self.l.right[i] * cmd.sidemove as f32;
        }
        wishvel[2] += cmd.upmove as f32;

        let mut wishdir = wishvel;
        let wishspeed = vector_normalize(&mut wishdir).min(PM_MAXSPEED);

        let addspeed = wishspeed - dot_product(&self.l.velocity, &wishdir);
        if addspeed <= 0.0 {
            return;
        }
        let accelspeed = (PM_ACCELERATE * self.l.frametime * wishspeed).min(addspeed);
        for i in 0..3 {
            self.l.velocity[i] += accelspeed * wishdir[i];
        }

        let mut end = [0.0; 3];
        for i in 0..3 {
            end[i] = self.l.origin[i] + self.l.frametime * self.l.velocity[i];
        }
        self.l.origin = if doclip { self.trace(&self.l.origin, &end).endpos } else { end };
    }

    fn dead_move(&mut self) {
        if !self.on_ground() {
            return;
        }

        // extra friction
        let forward = vector_length(&self.l.velocity) - 20.0;
        if forward <= 0.0 {
            self.l.velocity = VEC3_ORIGIN;
        } else {
            vector_normalize(&mut self.l.velocity);
            self.l.velocity = vector_scale(&self.l.velocity, forward);
        }
    }

    // ============================================================
    // Position bookkeeping
    // ============================================================

    /// Sets groundentity, watertype and waterlevel for the current origin.
    fn categorize_position(&mut self) {
        // see if standing on something solid
        let mut point = self.l.origin;
        point[2] -= 0.25;

        if self.l.velocity[2] > 180.0 {
            self.pm.s.pm_flags.remove(PmFlags::ON_GROUND);
            self.pm.groundentity = -1;
        } else {
            let trace = self.trace(&self.l.origin, &point);
            self.l.groundplane = trace.plane;
            self.l.groundsurface = trace.surface.clone();
            self.l.groundcontents = trace.contents;

            if trace.ent_index < 0 || (trace.plane.normal[2] < MIN_STEP_NORMAL && !trace.startsolid) {
                self.pm.groundentity = -1;
                self.pm.s.pm_flags.remove(PmFlags::ON_GROUND);
            } else {
                self.pm.groundentity = trace.ent_index;

                // hitting solid ground will end a waterjump
                if self.pm.s.pm_flags.contains(PmFlags::TIME_WATERJUMP) {
                    self.clear_timers();
                }

                if !self.pm.s.pm_flags.contains(PmFlags::ON_GROUND) {
                    // just hit the ground
                    self.pm.s.pm_flags.insert(PmFlags::ON_GROUND);
                    // don't do landing time if we were just going down a slope
                    if self.l.velocity[2] < -200.0 {
                        self.pm.s.pm_flags.insert(PmFlags::TIME_LAND);
                        self.pm.s.pm_time = if self.l.velocity[2] < -400.0 { 25 } else { 18 };
                    }
                }
            }

            self.touch(trace.ent_index);
        }

        // get waterlevel, accounting for ducking
        self.pm.waterlevel = 0;
        self.pm.watertype = 0;

        let sample2 = (self.pm.viewheight - self.pm.mins[2]) as i32;
        let sample1 = sample2 / 2;
        let base = self.l.origin[2] + self.pm.mins[2];

        let mut point = [self.l.origin[0], self.l.origin[1], base + 1.0];
        let cont = self.cb.pointcontents(&point);
        if cont & MASK_WATER == 0 {
            return;
        }
        self.pm.watertype = cont;
        self.pm.waterlevel = 1;

        point[2] = base + sample1 as f32;
        if self.cb.pointcontents(&point) & MASK_WATER == 0 {
            return;
        }
        self.pm.waterlevel = 2;

        point[2] = base + sample2 as f32;
        if self.cb.pointcontents(&point) & MASK_WATER != 0 {
            self.pm.waterlevel = 3;
        }
    }

    fn check_jump(&mut self) {
        if self.pm.s.pm_flags.contains(PmFlags::TIME_LAND) {
            // hasn't been long enough since landing to jump again
            return;
        }

        if self.pm.cmd.upmove < 10 {
            // not holding jump
            self.pm.s.pm_flags.remove(PmFlags::JUMP_HELD);
            return;
        }

        // must wait for jump to be released
        if self.pm.s.pm_flags.contains(PmFlags::JUMP_HELD) {
            return;
        }

        if self.pm.s.pm_type == PmType::Dead {
            return;
        }

        if self.pm.waterlevel >= 2 {
            // swimming, not jumping
            self.pm.groundentity = -1;

            if self.l.velocity[2] <= -300.0 {
                return;
            }

            self.l.velocity[2] = match self.pm.watertype {
                CONTENTS_WATER => 100.0,
                CONTENTS_SLIME => 80.0,
                _ => 50.0,
            };
            return;
        }

        if !self.on_ground() {
            return; // in air, so no effect
        }

        self.pm.s.pm_flags.insert(PmFlags::JUMP_HELD);
        self.pm.groundentity = -1;
        self.l.velocity[2] = (self.l.velocity[2] + JUMP_SPEED).max(JUMP_SPEED);
    }

    /// Ladder contact and water jumps.
    fn check_special_movement(&mut self) {
        if self.pm.s.pm_time != 0 {
            return;
        }

        self.l.ladder = false;

        // check for ladder
        let mut flatforward = [self.l.forward[0], self.l.forward[1], 0.0];
        vector_normalize(&mut flatforward);

        let mut spot = [0.0; 3];
        for i in 0..3 {
            spot[i] = self.l.origin[i] + flatforward[i];
        }
        let trace = self.trace(&self.l.origin, &spot);
        if trace.fraction < 1.0 && trace.contents & CONTENTS_LADDER != 0 {
            self.l.ladder = true;
        }

        // check for water jump
        if self.pm.waterlevel != 2 {
            return;
        }

        let mut spot = [0.0; 3];
        for i in 0..3 {
            spot[i] = self.l.origin[i] + 30.0 * flatforward[i];
        }
        spot[2] += 4.0;
        if self.cb.pointcontents(&spot) & CONTENTS_SOLID == 0 {
            return;
        }

        spot[2] += 16.0;
        if self.cb.pointcontents(&spot) != 0 {
            return;
        }

        // jump out of water
        self.l.velocity = vector_scale(&flatforward, 50.0);
        self.l.velocity[2] = 350.0;

        self.pm.s.pm_flags.insert(PmFlags::TIME_WATERJUMP);
        self.pm.s.pm_time = 255;
    }

    /// Sets mins, maxs and viewheight.
    fn check_duck(&mut self) {
        self.pm.mins = [-16.0, -16.0, -24.0];
        self.pm.maxs[0] = 16.0;
        self.pm.maxs[1] = 16.0;

        if self.pm.s.pm_type == PmType::Gib {
            self.pm.mins[2] = 0.0;
            self.pm.maxs[2] = 16.0;
            self.pm.viewheight = 8.0;
            return;
        }

        if self.pm.s.pm_type == PmType::Dead {
            self.pm.s.pm_flags.insert(PmFlags::DUCKED);
        } else if self.pm.cmd.upmove < 0 && self.pm.s.pm_flags.contains(PmFlags::ON_GROUND) {
            self.pm.s.pm_flags.insert(PmFlags::DUCKED);
        } else if self.pm.s.pm_flags.contains(PmFlags::DUCKED) {
            // try to stand up
            self.pm.maxs[2] = 32.0;
            let trace = self.trace(&self.l.origin, &self.l.origin);
            if !trace.allsolid {
                self.pm.s.pm_flags.remove(PmFlags::DUCKED);
            }
        }

        if self.pm.s.pm_flags.contains(PmFlags::DUCKED) {
            self.pm.maxs[2] = 4.0;
            self.pm.viewheight = -2.0;
        } else {
            self.pm.maxs[2] = 32.0;
            self.pm.viewheight = 22.0;
        }
    }

    fn good_position(&self) -> bool {
        if self.pm.s.pm_type == PmType::Spectator {
            return true;
        }
        let origin = [
            coord_to_world(self.pm.s.origin[0]),
            coord_to_world(self.pm.s.origin[1]),
            coord_to_world(self.pm.s.origin[2]),
        ];
        !self.trace(&origin, &origin).allsolid
    }

    /// Quantizes origin and velocity onto the 1/8 unit grid. If the
    /// truncated origin is solid, nudges toward the float position one
    /// axis combination at a time before giving up and restoring the
    /// previous origin.
    fn snap_position(&mut self) {
        const JITTERBITS: [usize; 8] = [0, 4, 1, 2, 3, 5, 6, 7];

        for i in 0..3 {
            self.pm.s.velocity[i] = world_to_coord(self.l.velocity[i]);
        }

        let mut sign = [0i16; 3];
        for i in 0..3 {
            sign[i] = if self.l.origin[i] >= 0.0 { 1 } else { -1 };
            self.pm.s.origin[i] = world_to_coord(self.l.origin[i]);
            if coord_to_world(self.pm.s.origin[i]) == self.l.origin[i] {
                sign[i] = 0;
            }
        }
        let base = self.pm.s.origin;

        // try all combinations
        for bits in JITTERBITS {
            self.pm.s.origin = base;
            for i in 0..3 {
                if bits & (1 << i) != 0 {
                    self.pm.s.origin[i] = self.pm.s.origin[i].wrapping_add(sign[i]);
                }
            }
            if self.good_position() {
                return;
            }
        }

        // go back to the last position
        self.pm.s.origin = self.l.previous_origin;
    }

    /// Searches the 27 neighbouring grid points for a valid start.
    fn initial_snap_position(&mut self) {
        const OFFSET: [i16; 3] = [0, -1, 1];
        let base = self.pm.s.origin;

        for z in OFFSET {
            self.pm.s.origin[2] = base[2].wrapping_add(z);
            for y in OFFSET {
                self.pm.s.origin[1] = base[1].wrapping_add(y);
                for x in OFFSET {
                    self.pm.s.origin[0] = base[0].wrapping_add(x);
                    if self.good_position() {
                        for i in 0..3 {
                            self.l.origin[i] = self.pm.s.origin[i] as f32 * COORD_SCALE;
                        }
                        self.l.previous_origin = self.pm.s.origin;
                        return;
                    }
                }
            }
        }

        tracing::debug!(origin = ?base, "bad initial snap position");
    }

    fn clamp_angles(&mut self) {
        let cmd = self.pm.cmd;
        let s = self.pm.s;
        if s.pm_flags.contains(PmFlags::TIME_TELEPORT) {
            self.pm.viewangles = [
                0.0,
                short2angle(cmd.angles[YAW].wrapping_add(s.delta_angles[YAW])),
                0.0,
            ];
        } else {
            // circularly clamp the angles with deltas
            for i in 0..3 {
                self.pm.viewangles[i] = short2angle(cmd.angles[i].wrapping_add(s.delta_angles[i]));
            }

            // don't let the player look up or down more than 90 degrees
            let pitch = &mut self.pm.viewangles[PITCH];
            if *pitch > 89.0 && *pitch < 180.0 {
                *pitch = 89.0;
            } else if *pitch < 271.0 && *pitch >= 180.0 {
                *pitch = 271.0;
            }
        }
        (self.l.forward, self.l.right, self.l.up) = angle_vectors(&self.pm.viewangles);
    }

    fn run(&mut self) {
        // clear results
        self.pm.numtouch = 0;
        self.pm.viewangles = VEC3_ORIGIN;
        self.pm.viewheight = 0.0;
        self.pm.groundentity = -1;
        self.pm.watertype = 0;
        self.pm.waterlevel = 0;

        self.l = MoveLocal::default();
        for i in 0..3 {
            self.l.origin[i] = coord_to_world(self.pm.s.origin[i]);
            self.l.velocity[i] = coord_to_world(self.pm.s.velocity[i]);
        }

        // save old org in case we get stuck
        self.l.previous_origin = self.pm.s.origin;
        self.l.frametime = self.pm.cmd.msec as f32 * 0.001;

        self.clamp_angles();

        if self.pm.s.pm_type == PmType::Spectator {
            self.fly_move(false);
            self.snap_position();
            return;
        }

        if self.pm.s.pm_type >= PmType::Dead {
            self.pm.cmd.forwardmove = 0;
            self.pm.cmd.sidemove = 0;
            self.pm.cmd.upmove = 0;
        }

        if self.pm.s.pm_type == PmType::Freeze {
            return; // no movement at all
        }

        self.check_duck();

        if self.pm.snapinitial {
            self.initial_snap_position();
        }

        self.categorize_position();

        if self.pm.s.pm_type == PmType::Dead {
            self.dead_move();
        }

        self.check_special_movement();

        // drop timing counter
        if self.pm.s.pm_time != 0 {
            let msec = (self.pm.cmd.msec >> 3).max(1);
            if msec >= self.pm.s.pm_time {
                self.clear_timers();
            } else {
                self.pm.s.pm_time -= msec;
            }
        }

        if self.pm.s.pm_flags.contains(PmFlags::TIME_TELEPORT) {
            // teleport pause stays exactly in place
        } else if self.pm.s.pm_flags.contains(PmFlags::TIME_WATERJUMP) {
            // waterjump has no control, but falls
            self.l.velocity[2] -= self.pm.s.gravity as f32 * self.l.frametime;
            if self.l.velocity[2] < 0.0 {
                // cancel as soon as we are falling down again
                self.clear_timers();
            }
            self.step_slide_move();
        } else {
            self.check_jump();
            self.friction();

            if self.pm.waterlevel >= 2 {
                self.water_move();
            } else {
                // walking direction ignores most of the pitch
                let mut angles = self.pm.viewangles;
                if angles[PITCH] > 180.0 {
                    angles[PITCH] -= 360.0;
                }
                angles[PITCH] /= 3.0;
                (self.l.forward, self.l.right, self.l.up) = angle_vectors(&angles);

                self.air_move();
            }
        }

        // set groundentity, watertype, and waterlevel for final spot
        self.categorize_position();
        self.snap_position();
    }
}

/// Runs one movement command. Can be called by either the server or the
/// client.
pub fn pmove(pm: &mut PmoveData, params: &PmoveParams, callbacks: &impl PmoveCallbacks) {
    let mut mover = PlayerMove { pm, params, cb: callbacks, l: MoveLocal::default() };
    mover.run();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cmodel::{ClipHull, CollisionModel, CollisionModelBuilder};
    use crate::q_shared::{UserCmd, MASK_PLAYERSOLID};
    use proptest::prelude::*;

    /// Traces against a collision model as the world (entity 0).
    struct WorldCallbacks {
        cm: CollisionModel,
    }

    impl PmoveCallbacks for WorldCallbacks {
        fn trace(&self, start: &Vec3, mins: &Vec3, maxs: &Vec3, end: &Vec3) -> Trace {
            let mut tr = self.cm.box_trace(
                start,
                end,
                mins,
                maxs,
                ClipHull::Model(self.cm.world_headnode()),
                MASK_PLAYERSOLID,
            );
            if tr.fraction < 1.0 {
                tr.ent_index = 0;
            }
            tr
        }

        fn pointcontents(&self, point: &Vec3) -> i32 {
            self.cm.point_contents(point, ClipHull::Model(self.cm.world_headnode()))
        }
    }

    fn floor_world() -> WorldCallbacks {
        let cm = CollisionModelBuilder::new()
            .add_box([-1024.0, -1024.0, -64.0], [1024.0, 1024.0, 0.0], CONTENTS_SOLID)
            .build()
            .unwrap();
        WorldCallbacks { cm }
    }

    fn open_air() -> WorldCallbacks {
        WorldCallbacks { cm: CollisionModel::empty() }
    }

    /// Resting on the floor: box bottom an eighth above z = 0.
    fn standing() -> PmoveData {
        let mut pm = PmoveData::default();
        pm.s.origin = [0, 0, 193];
        pm.s.gravity = 800;
        pm.s.pm_flags = PmFlags::ON_GROUND;
        pm
    }

    fn cmd(msec: u8, forwardmove: i16, upmove: i16) -> UserCmd {
        UserCmd { msec, forwardmove, upmove, ..Default::default() }
    }

    fn run(pm: &mut PmoveData, world: &WorldCallbacks) {
        pmove(pm, &PmoveParams::default(), world);
    }

    #[test]
    fn test_clip_velocity_floor_slide() {
        let out = pm_clip_velocity(&[100.0, 0.0, -50.0], &[0.0, 0.0, 1.0], 1.0);
        assert_eq!(out, [100.0, 0.0, 0.0]);
    }

    #[test]
    fn test_clip_velocity_overbounce_and_epsilon() {
        let out = pm_clip_velocity(&[0.05, 0.0, -100.0], &[0.0, 0.0, 1.0], 1.01);
        assert_eq!(out[0], 0.0);
        assert!((out[2] - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_current_direction() {
        assert_eq!(current_direction(CONTENTS_CURRENT_0 | CONTENTS_CURRENT_UP), [1.0, 0.0, 1.0]);
        assert_eq!(current_direction(CONTENTS_CURRENT_0 | CONTENTS_CURRENT_180), [0.0; 3]);
    }

    #[test]
    fn test_standing_still_stays_put() {
        let world = floor_world();
        let mut pm = standing();
        for _ in 0..10 {
            pm.cmd = cmd(50, 0, 0);
            run(&mut pm, &world);
        }
        assert_eq!(pm.s.origin, [0, 0, 193]);
        assert_eq!(pm.s.velocity, [0, 0, 0]);
        assert!(pm.s.pm_flags.contains(PmFlags::ON_GROUND));
        assert_eq!(pm.groundentity, 0);
        assert_eq!(pm.viewheight, 22.0);
    }

    #[test]
    fn test_walking_forward_accelerates() {
        let world = floor_world();
        let mut pm = standing();
        pm.cmd = cmd(50, 200, 0);
        run(&mut pm, &world);
        // 10 * 0.05 * 200 = 100 units/s after one frame
        assert!((799..=800).contains(&pm.s.velocity[0]));
        assert!(pm.s.origin[0] > 0);
        assert_eq!(pm.s.origin[2], 193);
        assert!(pm.s.pm_flags.contains(PmFlags::ON_GROUND));
    }

    #[test]
    fn test_wall_blocks_movement() {
        let cm = CollisionModelBuilder::new()
            .add_box([-1024.0, -1024.0, -64.0], [1024.0, 1024.0, 0.0], CONTENTS_SOLID)
            .add_box([64.0, -1024.0, 0.0], [128.0, 1024.0, 256.0], CONTENTS_SOLID)
            .build()
            .unwrap();
        let world = WorldCallbacks { cm };
        let mut pm = standing();
        for _ in 0..40 {
            pm.cmd = cmd(50, 400, 0);
            run(&mut pm, &world);
        }
        assert!(coord_to_world(pm.s.origin[0]) <= 48.0);
        assert!(coord_to_world(pm.s.origin[0]) > 47.0);
        assert_eq!(pm.touchents[0], 0);
    }

    #[test]
    fn test_steps_up_onto_stair() {
        let cm = CollisionModelBuilder::new()
            .add_box([-1024.0, -1024.0, -64.0], [1024.0, 1024.0, 0.0], CONTENTS_SOLID)
            .add_box([20.0, -1024.0, 0.0], [1024.0, 1024.0, 16.0], CONTENTS_SOLID)
            .build()
            .unwrap();
        let world = WorldCallbacks { cm };
        let mut pm = standing();
        pm.cmd = cmd(100, 400, 0);
        run(&mut pm, &world);

        let z = coord_to_world(pm.s.origin[2]);
        assert!(z > 40.0 && z < 41.0, "z = {}", z);
        assert!(coord_to_world(pm.s.origin[0]) > 20.0);
        assert!(pm.s.pm_flags.contains(PmFlags::ON_GROUND));
    }

    #[test]
    fn test_jump() {
        let world = floor_world();
        let mut pm = standing();
        pm.cmd = cmd(50, 0, 200);
        run(&mut pm, &world);

        assert!(pm.s.pm_flags.contains(PmFlags::JUMP_HELD));
        assert!(!pm.s.pm_flags.contains(PmFlags::ON_GROUND));
        // 270 minus one frame of gravity
        assert!((1830..=1850).contains(&pm.s.velocity[2]));
        assert!(pm.s.origin[2] > 193);

        // holding jump doesn't jump again
        let vz = pm.s.velocity[2];
        pm.cmd = cmd(50, 0, 200);
        run(&mut pm, &world);
        assert!(pm.s.velocity[2] < vz);
    }

    #[test]
    fn test_duck_shrinks_box() {
        let world = floor_world();
        let mut pm = standing();
        pm.cmd = cmd(50, 0, -100);
        run(&mut pm, &world);
        assert!(pm.s.pm_flags.contains(PmFlags::DUCKED));
        assert_eq!(pm.maxs[2], 4.0);
        assert_eq!(pm.viewheight, -2.0);

        pm.cmd = cmd(50, 0, 0);
        run(&mut pm, &world);
        assert!(!pm.s.pm_flags.contains(PmFlags::DUCKED));
        assert_eq!(pm.maxs[2], 32.0);
    }

    #[test]
    fn test_waterlevel() {
        let cm = CollisionModelBuilder::new()
            .add_box([-1024.0, -1024.0, -64.0], [1024.0, 1024.0, 0.0], CONTENTS_SOLID)
            .add_box([-512.0, -512.0, 0.0], [512.0, 512.0, 128.0], CONTENTS_WATER)
            .build()
            .unwrap();
        let world = WorldCallbacks { cm };
        let mut pm = standing();
        pm.cmd = cmd(50, 0, 0);
        run(&mut pm, &world);
        assert_eq!(pm.waterlevel, 3);
        assert_eq!(pm.watertype & CONTENTS_WATER, CONTENTS_WATER);
    }

    #[test]
    fn test_falls_in_open_air() {
        let world = open_air();
        let mut pm = PmoveData::default();
        pm.s.gravity = 800;
        pm.cmd = cmd(100, 0, 0);
        run(&mut pm, &world);
        // 800 * 0.1 = 80 units/s downward
        assert_eq!(pm.s.velocity[2], -640);
        assert!(pm.s.origin[2] < 0);
        assert_eq!(pm.groundentity, -1);
    }

    #[test]
    fn test_airaccelerate_changes_air_control() {
        let world = open_air();
        let start = {
            let mut pm = PmoveData::default();
            pm.s.gravity = 800;
            pm.s.velocity = [160, 0, 0];
            pm.cmd = cmd(100, 300, 0);
            pm
        };

        let mut classic = start.clone();
        pmove(&mut classic, &PmoveParams { airaccelerate: 0.0 }, &world);
        let mut quake = start.clone();
        pmove(&mut quake, &PmoveParams { airaccelerate: 10.0 }, &world);

        assert!((399..=400).contains(&classic.s.velocity[0]));
        assert!((239..=240).contains(&quake.s.velocity[0]));
    }

    #[test]
    fn test_spectator_flies_through_walls() {
        let world = floor_world();
        let mut pm = PmoveData::default();
        pm.s.pm_type = PmType::Spectator;
        pm.s.origin = [0, 0, 80];
        pm.cmd = UserCmd { msec: 100, upmove: -400, ..Default::default() };
        for _ in 0..5 {
            run(&mut pm, &world);
        }
        assert!(pm.s.origin[2] < 0);
    }

    #[test]
    fn test_freeze_does_not_move() {
        let world = floor_world();
        let mut pm = standing();
        pm.s.pm_type = PmType::Freeze;
        pm.s.velocity = [800, 0, 0];
        let before = pm.s;
        pm.cmd = cmd(100, 400, 0);
        run(&mut pm, &world);
        assert_eq!(pm.s, before);
    }

    #[test]
    fn test_teleport_time_keeps_position() {
        let world = floor_world();
        let mut pm = standing();
        pm.s.pm_flags = PmFlags::ON_GROUND | PmFlags::TIME_TELEPORT;
        pm.s.pm_time = 20;
        pm.cmd = cmd(50, 400, 0);
        run(&mut pm, &world);
        assert_eq!(pm.s.origin, [0, 0, 193]);
        assert_eq!(pm.s.pm_time, 14);
    }

    #[test]
    fn test_snap_recovers_from_solid_start() {
        let world = floor_world();
        let mut pm = standing();
        // box bottom exactly on the floor counts as solid
        pm.s.origin = [0, 0, 192];
        pm.snapinitial = true;
        pm.cmd = cmd(50, 0, 0);
        run(&mut pm, &world);
        assert_eq!(pm.s.origin[2], 193);
    }

    proptest! {
        #[test]
        fn test_pmove_is_deterministic(
            forwardmove in -400i16..400,
            sidemove in -400i16..400,
            upmove in -400i16..400,
            yaw in any::<i16>(),
            msecs in proptest::collection::vec(1u8..100, 1..12),
        ) {
            let world = floor_world();
            let mut a = standing();
            let mut b = standing();
            for msec in msecs {
                let c = UserCmd {
                    msec,
                    forwardmove,
                    sidemove,
                    upmove,
                    angles: [0, yaw, 0],
                    ..Default::default()
                };
                a.cmd = c;
                b.cmd = c;
                run(&mut a, &world);
                run(&mut b, &world);
            }
            prop_assert_eq!(a.s, b.s);
            prop_assert_eq!(a.groundentity, b.groundentity);
        }
    }
}
