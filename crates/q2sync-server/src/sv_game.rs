// sv_game.rs — interface to the game, plus a movement-only game

use std::collections::BTreeMap;
use std::sync::Arc;

use q2sync_common::cmd::CmdArgs;
use q2sync_common::cmodel::{clip_to_entities, ClipHull, CollisionModel};
use q2sync_common::pmove::{pmove, PmoveCallbacks, PmoveParams};
use q2sync_common::q_shared::*;

/// What the server calls into for everything that happens to a client's
/// entity. `ent` is the entity number (client slot + 1).
pub trait GameRules {
    fn client_begin(&mut self, ent: i32);
    fn client_think(&mut self, ent: i32, cmd: &UserCmd);
    fn client_command(&mut self, ent: i32, args: &CmdArgs);
    fn client_userinfo_changed(&mut self, ent: i32, userinfo: &str);
    fn client_disconnect(&mut self, ent: i32);
}

// ============================================================
// MovementGame
// ============================================================

pub const PLAYER_MINS: Vec3 = [-16.0, -16.0, -24.0];
pub const PLAYER_MAXS: Vec3 = [16.0, 16.0, 32.0];

#[derive(Debug, Clone, Default)]
pub struct PlayerBody {
    pub pmove: PmoveState,
    pub viewangles: Vec3,
    pub mins: Vec3,
    pub maxs: Vec3,
    pub groundentity: i32,
    pub waterlevel: i32,
}

/// Runs authoritative player movement with the same `pmove` and collision
/// model the clients predict with.
pub struct MovementGame {
    world: Arc<CollisionModel>,
    pub params: PmoveParams,
    pub spawn_origin: [i16; 3],
    players: BTreeMap<i32, PlayerBody>,
}

struct GameCollision<'a> {
    world: &'a CollisionModel,
    players: &'a BTreeMap<i32, PlayerBody>,
    passent: i32,
}

impl PmoveCallbacks for GameCollision<'_> {
    fn trace(&self, start: &Vec3, mins: &Vec3, maxs: &Vec3, end: &Vec3) -> Trace {
        let headnode = self.world.world_headnode();
        let mut tr =
            self.world.box_trace(start, end, mins, maxs, ClipHull::Model(headnode), MASK_PLAYERSOLID);
        if tr.fraction < 1.0 {
            tr.ent_index = 0;
        }

        let others = self.players.iter().filter(|entry| *entry.0 != self.passent);
        clip_to_entities(&mut tr, others, |(&num, body)| {
            let hull = ClipHull::Box { mins: body.mins, maxs: body.maxs };
            let origin = origin_to_world(&body.pmove.origin);
            let t = self.world.transformed_box_trace(
                start,
                end,
                mins,
                maxs,
                hull,
                MASK_PLAYERSOLID,
                &origin,
                &VEC3_ORIGIN,
            );
            Some((num, t))
        });
        tr
    }

    fn pointcontents(&self, point: &Vec3) -> i32 {
        self.world.point_contents(point, ClipHull::Model(self.world.world_headnode()))
    }
}

impl MovementGame {
    pub fn new(world: Arc<CollisionModel>, spawn_origin: [i16; 3]) -> Self {
        Self { world, params: PmoveParams::default(), spawn_origin, players: BTreeMap::new() }
    }

    pub fn player(&self, ent: i32) -> Option<&PlayerBody> {
        self.players.get(&ent)
    }

    pub fn player_mut(&mut self, ent: i32) -> Option<&mut PlayerBody> {
        self.players.get_mut(&ent)
    }
}

impl GameRules for MovementGame {
    fn client_begin(&mut self, ent: i32) {
        let mut body = PlayerBody { mins: PLAYER_MINS, maxs: PLAYER_MAXS, groundentity: -1, ..Default::default() };
        body.pmove.origin = self.spawn_origin;
        body.pmove.gravity = 800;
        self.players.insert(ent, body);
        tracing::debug!(ent, "player spawned");
    }

    fn client_think(&mut self, ent: i32, cmd: &UserCmd) {
        let Some(mut body) = self.players.remove(&ent) else {
            return;
        };

        let mut pm = PmoveData { s: body.pmove, cmd: *cmd, ..Default::default() };
        let collision = GameCollision { world: &self.world, players: &self.players, passent: ent };
        pmove(&mut pm, &self.params, &collision);

        body.pmove = pm.s;
        body.viewangles = pm.viewangles;
        body.mins = pm.mins;
        body.maxs = pm.maxs;
        body.groundentity = pm.groundentity;
        body.waterlevel = pm.waterlevel;
        self.players.insert(ent, body);
    }

    fn client_command(&mut self, ent: i32, args: &CmdArgs) {
        tracing::debug!(ent, cmd = args.argv(0), "unhandled client command");
    }

    fn client_userinfo_changed(&mut self, _ent: i32, _userinfo: &str) {}

    fn client_disconnect(&mut self, ent: i32) {
        self.players.remove(&ent);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use q2sync_common::cmodel::CollisionModelBuilder;

    fn game() -> MovementGame {
        let world = CollisionModelBuilder::new()
            .add_box([-1024.0, -1024.0, -64.0], [1024.0, 1024.0, 0.0], CONTENTS_SOLID)
            .build()
            .unwrap();
        MovementGame::new(Arc::new(world), [0, 0, 193])
    }

    fn forward(msec: u8) -> UserCmd {
        UserCmd { msec, forwardmove: 400, ..Default::default() }
    }

    #[test]
    fn test_begin_think_disconnect() {
        let mut g = game();
        g.client_think(1, &forward(50));
        assert!(g.player(1).is_none());

        g.client_begin(1);
        for _ in 0..4 {
            g.client_think(1, &forward(50));
        }
        let body = g.player(1).unwrap();
        assert!(body.pmove.origin[0] > 0);
        assert_eq!(body.pmove.origin[2], 193);
        assert_eq!(body.groundentity, 0);

        g.client_disconnect(1);
        assert!(g.player(1).is_none());
    }

    #[test]
    fn test_players_block_each_other() {
        let mut g = game();
        g.client_begin(1);
        g.client_begin(2);
        g.player_mut(2).unwrap().pmove.origin = [64 * 8, 0, 193];

        for _ in 0..20 {
            g.client_think(1, &forward(50));
        }
        // boxes are 32 wide, so the mover stops 32 units short
        let x = coord_to_world(g.player(1).unwrap().pmove.origin[0]);
        assert!(x <= 32.0 && x > 31.0, "x = {}", x);
    }
}
