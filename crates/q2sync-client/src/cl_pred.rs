// cl_pred.rs — client-side movement prediction and error reconciliation

use q2sync_common::cmodel::{clip_to_entities, ClipHull, CollisionModel};
use q2sync_common::common::com_printf;
use q2sync_common::pmove::{pmove, PmoveCallbacks};
use q2sync_common::q_shared::*;

use crate::client::{ClientContext, ConnState, MAX_PARSE_ENTITIES};
use crate::cmd_ring::CMD_BACKUP;

/// Server and prediction disagree by more than this many eighth units
/// (80 world units): treat it as a teleport.
const MAX_PREDICTION_MISS: i32 = 640;

// ============================================================
// Prediction error
// ============================================================

/// Compares the origin the server reports for the last acknowledged
/// command with what we predicted for it, and keeps the difference for
/// smoothing.
pub fn cl_check_prediction_error(ctx: &mut ClientContext) {
    let pmove = ctx.cl.frame.playerstate.pmove;
    if ctx.cvars.variable_value("cl_predict") == 0.0
        || pmove.pm_flags.contains(PmFlags::NO_PREDICTION)
    {
        return;
    }

    // the last usercmd we sent that the server has processed
    let ack = ctx.cls.netchan.incoming_acknowledged;
    let predicted = ctx.cl.cmds.read_prediction(ack);

    let mut delta = [0i32; 3];
    for i in 0..3 {
        delta[i] = pmove.origin[i] as i32 - predicted[i] as i32;
    }

    let len = delta[0].abs() + delta[1].abs() + delta[2].abs();
    if len > MAX_PREDICTION_MISS {
        ctx.cl.prediction_error = VEC3_ORIGIN;
        return;
    }

    if ctx.cvars.variable_value("cl_showmiss") != 0.0 && delta != [0; 3] {
        com_printf(&format!(
            "prediction miss on {}: {}\n",
            ctx.cl.frame.serverframe,
            delta[0] + delta[1] + delta[2]
        ));
    }

    ctx.cl.cmds.record_prediction(ack, pmove.origin);

    for i in 0..3 {
        ctx.cl.prediction_error[i] = delta[i] as f32 * COORD_SCALE;
    }
}

// ============================================================
// Collision against the received frame
// ============================================================

/// Read-only view of the world plus the solid entities of the current
/// frame, as seen by the local player.
pub struct FrameCollision<'a> {
    pub world: &'a CollisionModel,
    pub entities: &'a [EntityState],
    pub first: i32,
    pub count: i32,
    pub playernum: i32,
    pub model_clip: &'a [Option<usize>],
}

impl<'a> FrameCollision<'a> {
    pub fn new(ctx: &'a ClientContext, world: &'a CollisionModel) -> Self {
        Self {
            world,
            entities: &ctx.parse_entities,
            first: ctx.cl.frame.parse_entities,
            count: ctx.cl.frame.num_entities,
            playernum: ctx.cl.playernum,
            model_clip: &ctx.cl.model_clip,
        }
    }

    fn frame_entities(&self) -> impl Iterator<Item = &'a EntityState> + '_ {
        (0..self.count.max(0)).map(move |i| {
            let num = (self.first.wrapping_add(i) as usize) & (MAX_PARSE_ENTITIES - 1);
            &self.entities[num]
        })
    }

    /// Collision hull of an entity, with the angles to apply. `None` for
    /// non-solid entities and unresolvable brush models.
    fn entity_hull(&self, ent: &EntityState) -> Option<(ClipHull, Vec3)> {
        if ent.solid == 0 {
            return None;
        }
        if ent.solid == SOLID_BMODEL {
            let num = (*self.model_clip.get(ent.modelindex as usize)?)?;
            let model = self.world.inline_model(num).ok()?;
            return Some((ClipHull::Model(model.headnode), ent.angles));
        }
        // boxes don't rotate
        let (mins, maxs) = ent.solid_bbox()?;
        Some((ClipHull::Box { mins, maxs }, VEC3_ORIGIN))
    }

    #[allow(clippy::too_many_arguments)]
    fn clip_move_to_entities(
        &self,
        start: &Vec3,
        mins: &Vec3,
        maxs: &Vec3,
        end: &Vec3,
        mask: i32,
        tr: &mut Trace,
        accept: impl Fn(&EntityState) -> bool,
    ) {
        clip_to_entities(tr, self.frame_entities().filter(|ent| accept(ent)), |ent| {
            let (hull, angles) = self.entity_hull(ent)?;
            let trace = self
                .world
                .transformed_box_trace(start, end, mins, maxs, hull, mask, &ent.origin, &angles);
            Some((ent.number, trace))
        });
    }

    fn world_trace(&self, start: &Vec3, mins: &Vec3, maxs: &Vec3, end: &Vec3, mask: i32) -> Trace {
        let mut t = self.world.box_trace(
            start,
            end,
            mins,
            maxs,
            ClipHull::Model(self.world.world_headnode()),
            mask,
        );
        if t.fraction < 1.0 {
            t.ent_index = 0;
        }
        t
    }

    /// Player movement trace: world, then every solid entity but ourselves.
    pub fn pm_trace(&self, start: &Vec3, mins: &Vec3, maxs: &Vec3, end: &Vec3) -> Trace {
        let mut t = self.world_trace(start, mins, maxs, end, MASK_PLAYERSOLID);
        let own = self.playernum + 1;
        self.clip_move_to_entities(start, mins, maxs, end, MASK_PLAYERSOLID, &mut t, |ent| {
            ent.number != own
        });
        t
    }

    /// Trace with an arbitrary content mask, ignoring entity `skip`.
    pub fn trace_mask(
        &self,
        start: &Vec3,
        mins: &Vec3,
        maxs: &Vec3,
        end: &Vec3,
        mask: i32,
        skip: i32,
    ) -> Trace {
        let mut t = self.world_trace(start, mins, maxs, end, mask);
        self.clip_move_to_entities(start, mins, maxs, end, mask, &mut t, |ent| ent.number != skip);
        t
    }

    /// Trace against the world and brush model entities only.
    pub fn trace_brush_only(
        &self,
        start: &Vec3,
        mins: &Vec3,
        maxs: &Vec3,
        end: &Vec3,
        mask: i32,
    ) -> Trace {
        let mut t = self.world_trace(start, mins, maxs, end, mask);
        self.clip_move_to_entities(start, mins, maxs, end, mask, &mut t, |ent| {
            ent.solid == SOLID_BMODEL
        });
        t
    }

    /// World contents ORed with every brush entity covering the point.
    pub fn point_contents(&self, point: &Vec3) -> i32 {
        let mut contents =
            self.world.point_contents(point, ClipHull::Model(self.world.world_headnode()));

        for ent in self.frame_entities() {
            if ent.solid != SOLID_BMODEL {
                continue;
            }
            if let Some((hull, angles)) = self.entity_hull(ent) {
                contents |= self.world.transformed_point_contents(point, hull, &ent.origin, &angles);
            }
        }
        contents
    }
}

impl PmoveCallbacks for FrameCollision<'_> {
    fn trace(&self, start: &Vec3, mins: &Vec3, maxs: &Vec3, end: &Vec3) -> Trace {
        self.pm_trace(start, mins, maxs, end)
    }

    fn pointcontents(&self, point: &Vec3) -> i32 {
        self.point_contents(point)
    }
}

// ============================================================
// Prediction
// ============================================================

fn set_unpredicted_angles(ctx: &mut ClientContext) {
    let delta = ctx.cl.frame.playerstate.pmove.delta_angles;
    for i in 0..3 {
        ctx.cl.predicted_angles[i] = ctx.cl.viewangles[i] + short2angle(delta[i]);
    }
}

/// Replays every command the server has not yet acknowledged on top of the
/// last authoritative state, producing `predicted_origin` and
/// `predicted_angles`.
pub fn cl_predict_movement(ctx: &mut ClientContext) {
    if ctx.cls.state != ConnState::Active {
        return;
    }

    if ctx.cvars.variable_value("cl_paused") != 0.0 {
        return;
    }

    if ctx.cvars.variable_value("cl_predict") == 0.0
        || ctx.cl.frame.playerstate.pmove.pm_flags.contains(PmFlags::NO_PREDICTION)
    {
        set_unpredicted_angles(ctx);
        return;
    }

    let mut ack = ctx.cls.netchan.incoming_acknowledged;
    let current = ctx.cls.netchan.outgoing_sequence;

    // if we are too far out of date, just freeze
    if current - ack >= CMD_BACKUP as i32 {
        if ctx.cvars.variable_value("cl_showmiss") != 0.0 {
            com_printf("exceeded CMD_BACKUP\n");
        }
        set_unpredicted_angles(ctx);
        return;
    }

    let params = ctx.pm_params();
    let empty;
    let world: &CollisionModel = match &ctx.world {
        Some(w) => w.as_ref(),
        None => {
            empty = CollisionModel::empty();
            &empty
        }
    };

    let collision = FrameCollision {
        world,
        entities: &ctx.parse_entities,
        first: ctx.cl.frame.parse_entities,
        count: ctx.cl.frame.num_entities,
        playernum: ctx.cl.playernum,
        model_clip: &ctx.cl.model_clip,
    };

    let mut pm = PmoveData { s: ctx.cl.frame.playerstate.pmove, ..Default::default() };

    // run frames
    loop {
        ack += 1;
        if ack >= current {
            break;
        }
        pm.cmd = *ctx.cl.cmds.command(ack);
        pmove(&mut pm, &params, &collision);

        // save for error checking
        ctx.cl.cmds.record_prediction(ack, pm.s.origin);
    }

    // smooth out stair climbing
    let oldz = ctx.cl.cmds.read_prediction(ack - 2)[2];
    let step = pm.s.origin[2] as i32 - oldz as i32;
    if step > 63 && step < 160 && pm.s.pm_flags.contains(PmFlags::ON_GROUND) {
        ctx.cl.predicted_step = step as f32 * COORD_SCALE;
        ctx.cl.predicted_step_time = (ctx.cls.realtime as f32 - ctx.cls.frametime * 500.0) as u32;
    }

    // copy results out for rendering
    ctx.cl.predicted_origin = origin_to_world(&pm.s.origin);
    ctx.cl.predicted_angles = pm.viewangles;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::PlayerState;
    use q2sync_common::cmodel::CollisionModelBuilder;
    use std::io;
    use std::sync::{Arc, Mutex};

    const PLAYER_MINS: Vec3 = [-16.0, -16.0, -24.0];
    const PLAYER_MAXS: Vec3 = [16.0, 16.0, 32.0];

    fn active_ctx() -> ClientContext {
        let mut ctx = ClientContext::new();
        ctx.cls.state = ConnState::Active;
        ctx
    }

    fn with_server_origin(ctx: &mut ClientContext, origin: [i16; 3]) {
        ctx.cl.frame.playerstate.pmove.origin = origin;
    }

    #[test]
    fn test_small_drift_becomes_error() {
        let mut ctx = active_ctx();
        ctx.cls.netchan.incoming_acknowledged = 70;
        ctx.cl.cmds.record_prediction(70, [100, 0, 0]);
        with_server_origin(&mut ctx, [108, 0, 0]);

        cl_check_prediction_error(&mut ctx);
        assert_eq!(ctx.cl.prediction_error, [1.0, 0.0, 0.0]);
        // the slot now holds the corrected origin
        assert_eq!(ctx.cl.cmds.read_prediction(70), [108, 0, 0]);
    }

    #[derive(Clone, Default)]
    struct LogSink(Arc<Mutex<Vec<u8>>>);

    impl io::Write for LogSink {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    /// Runs `f` under a subscriber writing into a buffer and returns the text.
    fn logged(f: impl FnOnce()) -> String {
        let sink = LogSink::default();
        let writer = sink.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .without_time()
            .finish();
        tracing::subscriber::with_default(subscriber, f);
        let bytes = sink.0.lock().unwrap().clone();
        String::from_utf8(bytes).unwrap()
    }

    fn drift_ctx(server: [i16; 3]) -> ClientContext {
        let mut ctx = active_ctx();
        ctx.cvars.set("cl_showmiss", "1");
        ctx.cl.frame.serverframe = 42;
        ctx.cls.netchan.incoming_acknowledged = 70;
        ctx.cl.cmds.record_prediction(70, [100, 0, 0]);
        with_server_origin(&mut ctx, server);
        ctx
    }

    #[test]
    fn test_showmiss_reports_drift() {
        let mut ctx = drift_ctx([108, -3, 0]);
        let out = logged(|| cl_check_prediction_error(&mut ctx));
        assert!(out.contains("prediction miss on 42: 5"), "{:?}", out);

        ctx.cvars.set("cl_showmiss", "0");
        ctx.cl.cmds.record_prediction(70, [100, 0, 0]);
        assert!(logged(|| cl_check_prediction_error(&mut ctx)).is_empty());
    }

    #[test]
    fn test_showmiss_quiet_without_miss() {
        let mut ctx = drift_ctx([100, 0, 0]);
        assert!(logged(|| cl_check_prediction_error(&mut ctx)).is_empty());
        assert_eq!(ctx.cl.prediction_error, [0.0; 3]);

        let mut ctx = drift_ctx([900, 0, 0]);
        assert!(logged(|| cl_check_prediction_error(&mut ctx)).is_empty());
        assert_eq!(ctx.cl.cmds.read_prediction(70), [100, 0, 0]);
    }

    #[test]
    fn test_large_miss_resets_error() {
        let mut ctx = active_ctx();
        ctx.cl.prediction_error = [3.0, 3.0, 3.0];
        ctx.cls.netchan.incoming_acknowledged = 5;
        ctx.cl.cmds.record_prediction(5, [0, 0, 0]);
        with_server_origin(&mut ctx, [500, 300, 200]);

        cl_check_prediction_error(&mut ctx);
        assert_eq!(ctx.cl.prediction_error, [0.0; 3]);
        assert_eq!(ctx.cl.cmds.read_prediction(5), [0, 0, 0]);
    }

    #[test]
    fn test_error_check_disabled() {
        let mut ctx = active_ctx();
        ctx.cl.prediction_error = [2.0, 0.0, 0.0];
        with_server_origin(&mut ctx, [8, 0, 0]);

        ctx.cvars.set("cl_predict", "0");
        cl_check_prediction_error(&mut ctx);
        assert_eq!(ctx.cl.prediction_error, [2.0, 0.0, 0.0]);

        ctx.cvars.set("cl_predict", "1");
        ctx.cl.frame.playerstate.pmove.pm_flags = PmFlags::NO_PREDICTION;
        cl_check_prediction_error(&mut ctx);
        assert_eq!(ctx.cl.prediction_error, [2.0, 0.0, 0.0]);
    }

    fn floor_world() -> Arc<CollisionModel> {
        Arc::new(
            CollisionModelBuilder::new()
                .add_box([-1024.0, -1024.0, -64.0], [1024.0, 1024.0, 0.0], CONTENTS_SOLID)
                .add_box([20.0, -1024.0, 0.0], [1024.0, 1024.0, 16.0], CONTENTS_SOLID)
                .build()
                .unwrap(),
        )
    }

    fn standing_frame(ctx: &mut ClientContext) {
        let mut ps = PlayerState::default();
        ps.pmove.origin = [0, 0, 193];
        ps.pmove.gravity = 800;
        ps.pmove.pm_flags = PmFlags::ON_GROUND;
        ctx.set_frame(1, ps, &[]);
    }

    #[test]
    fn test_predict_replays_unacknowledged_commands() {
        let mut ctx = active_ctx();
        ctx.set_world(floor_world());
        standing_frame(&mut ctx);

        ctx.cls.netchan.incoming_acknowledged = 10;
        ctx.cls.netchan.outgoing_sequence = 14;
        // walking away from the stair
        let back = UserCmd { msec: 50, forwardmove: -200, ..Default::default() };
        for seq in 11..14 {
            ctx.cl.cmds.push(seq, back, 0);
        }

        cl_predict_movement(&mut ctx);

        let p11 = ctx.cl.cmds.read_prediction(11);
        let p13 = ctx.cl.cmds.read_prediction(13);
        assert!(p11[0] < 0);
        assert!(p13[0] < p11[0]);
        assert_eq!(p13[2], 193);
        assert_eq!(ctx.cl.predicted_origin, origin_to_world(&p13));
        // the command being built was not replayed
        assert_eq!(ctx.cl.cmds.read_prediction(14), [0, 0, 0]);
    }

    #[test]
    fn test_predict_is_repeatable() {
        let mut ctx = active_ctx();
        ctx.set_world(floor_world());
        standing_frame(&mut ctx);
        ctx.cls.netchan.incoming_acknowledged = 0;
        ctx.cls.netchan.outgoing_sequence = 6;
        for seq in 1..6 {
            let c = UserCmd { msec: 25 + seq as u8, sidemove: 300, upmove: 50, ..Default::default() };
            ctx.cl.cmds.push(seq, c, 0);
        }

        cl_predict_movement(&mut ctx);
        let first = ctx.cl.predicted_origin;
        cl_predict_movement(&mut ctx);
        assert_eq!(ctx.cl.predicted_origin, first);
    }

    #[test]
    fn test_backlog_freezes_position() {
        let mut ctx = active_ctx();
        ctx.set_world(floor_world());
        standing_frame(&mut ctx);
        ctx.cl.predicted_origin = [1.0, 2.0, 3.0];
        ctx.cl.viewangles = [0.0, 45.0, 0.0];
        ctx.cl.frame.playerstate.pmove.delta_angles = [0, angle2short(90.0) as i16, 0];

        ctx.cls.netchan.incoming_acknowledged = 0;
        ctx.cls.netchan.outgoing_sequence = CMD_BACKUP as i32;
        assert!(logged(|| cl_predict_movement(&mut ctx)).is_empty());

        assert_eq!(ctx.cl.predicted_origin, [1.0, 2.0, 3.0]);
        assert_eq!(ctx.cl.predicted_angles, [0.0, 135.0, 0.0]);

        ctx.cvars.set("cl_showmiss", "1");
        let out = logged(|| cl_predict_movement(&mut ctx));
        assert!(out.contains("exceeded CMD_BACKUP"), "{:?}", out);
        assert_eq!(ctx.cl.predicted_origin, [1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_paused_or_inactive_does_nothing() {
        let mut ctx = ClientContext::new();
        ctx.cl.predicted_angles = [5.0, 5.0, 5.0];
        cl_predict_movement(&mut ctx);
        assert_eq!(ctx.cl.predicted_angles, [5.0, 5.0, 5.0]);

        let mut ctx = active_ctx();
        ctx.cvars.set("cl_paused", "1");
        ctx.cl.predicted_angles = [5.0, 5.0, 5.0];
        cl_predict_movement(&mut ctx);
        assert_eq!(ctx.cl.predicted_angles, [5.0, 5.0, 5.0]);
    }

    #[test]
    fn test_prediction_disabled_sets_angles_only() {
        let mut ctx = active_ctx();
        ctx.cvars.set("cl_predict", "0");
        ctx.cl.viewangles = [10.0, 20.0, 0.0];
        cl_predict_movement(&mut ctx);
        assert_eq!(ctx.cl.predicted_angles, [10.0, 20.0, 0.0]);
        assert_eq!(ctx.cl.predicted_origin, [0.0; 3]);
    }

    #[test]
    fn test_stair_step_hint() {
        let mut ctx = active_ctx();
        ctx.set_world(floor_world());
        standing_frame(&mut ctx);
        ctx.cls.realtime = 1000;
        ctx.cls.frametime = 0.25;

        ctx.cls.netchan.incoming_acknowledged = 10;
        ctx.cls.netchan.outgoing_sequence = 13;
        ctx.cl.cmds.push(11, UserCmd { msec: 1, ..Default::default() }, 0);
        ctx.cl.cmds.push(12, UserCmd { msec: 100, forwardmove: 400, ..Default::default() }, 0);

        cl_predict_movement(&mut ctx);

        assert_eq!(ctx.cl.cmds.read_prediction(11)[2], 193);
        // one stair of 16 units, give or take the ground snap
        assert!(ctx.cl.predicted_step > 15.0 && ctx.cl.predicted_step < 17.0);
        assert_eq!(ctx.cl.predicted_step_time, 875);
    }

    fn entity(number: i32, origin: Vec3, solid: i32) -> EntityState {
        EntityState { number, origin, solid, ..Default::default() }
    }

    #[test]
    fn test_trace_clips_bbox_entities_but_not_self() {
        let mut ctx = active_ctx();
        let bbox = encode_solid_bbox(&PLAYER_MINS, &PLAYER_MAXS);
        ctx.cl.playernum = 0;
        ctx.set_frame(
            1,
            PlayerState::default(),
            &[entity(1, [32.0, 0.0, 0.0], bbox), entity(2, [96.0, 0.0, 0.0], bbox)],
        );
        let world = CollisionModel::empty();
        let col = FrameCollision::new(&ctx, &world);

        let tr = col.pm_trace(&[0.0; 3], &PLAYER_MINS, &PLAYER_MAXS, &[200.0, 0.0, 0.0]);
        assert!(tr.fraction < 1.0);
        assert_eq!(tr.ent_index, 2);
        assert!((tr.endpos[0] - 64.0).abs() < 0.1);

        // the mask variant only skips the number it is told to
        let tr = col.trace_mask(&[0.0; 3], &PLAYER_MINS, &PLAYER_MAXS, &[200.0, 0.0, 0.0], MASK_PLAYERSOLID, 2);
        assert_eq!(tr.ent_index, 1);

        // a mask without monster bits sees neither box
        let tr = col.trace_mask(&[0.0; 3], &PLAYER_MINS, &PLAYER_MAXS, &[200.0, 0.0, 0.0], MASK_SOLID, -1);
        assert_eq!(tr.fraction, 1.0);
    }

    #[test]
    fn test_brush_entities() {
        let mut b = CollisionModelBuilder::new();
        let n = b.add_submodel(&[([-32.0, -32.0, -32.0], [32.0, 32.0, 32.0], CONTENTS_SOLID)]);
        let world = b.build().unwrap();

        let mut ctx = active_ctx();
        ctx.set_configstring(CS_MODELS + 2, &format!("*{}", n));
        let mut door = entity(3, [0.0, 200.0, 0.0], SOLID_BMODEL);
        door.modelindex = 2;
        let bbox = encode_solid_bbox(&PLAYER_MINS, &PLAYER_MAXS);
        ctx.set_frame(1, PlayerState::default(), &[entity(4, [0.0, 100.0, 0.0], bbox), door]);
        let col = FrameCollision::new(&ctx, &world);

        assert_eq!(col.point_contents(&[0.0, 200.0, 0.0]), CONTENTS_SOLID);
        assert_eq!(col.point_contents(&[0.0, 100.0, 0.0]), 0);

        let start = [0.0, 0.0, 0.0];
        let end = [0.0, 300.0, 0.0];
        let tr = col.trace_brush_only(&start, &VEC3_ORIGIN, &VEC3_ORIGIN, &end, MASK_ALL);
        assert_eq!(tr.ent_index, 3);
        assert!((tr.endpos[1] - 168.0).abs() < 0.1);

        let tr = col.trace_mask(&start, &VEC3_ORIGIN, &VEC3_ORIGIN, &end, MASK_ALL, -1);
        assert_eq!(tr.ent_index, 4);
    }

    #[test]
    fn test_startsolid_preserved_across_entities() {
        let mut ctx = active_ctx();
        let bbox = encode_solid_bbox(&PLAYER_MINS, &PLAYER_MAXS);
        ctx.cl.playernum = 7;
        ctx.set_frame(
            1,
            PlayerState::default(),
            &[entity(1, [0.0, 0.0, 0.0], bbox), entity(2, [20.0, 0.0, 0.0], bbox)],
        );
        let world = CollisionModel::empty();
        let col = FrameCollision::new(&ctx, &world);

        let tr = col.pm_trace(&[0.0; 3], &VEC3_ORIGIN, &VEC3_ORIGIN, &[-100.0, 0.0, 0.0]);
        assert!(tr.startsolid);
        assert!(!tr.allsolid);
    }
}
