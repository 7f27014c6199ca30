// client.rs — client session state: connection, received frame, prediction results

use std::sync::Arc;

use q2sync_common::cmodel::CollisionModel;
use q2sync_common::cvar::CvarContext;
use q2sync_common::net_chan::{NetChan, NetSrc};
use q2sync_common::pmove::PmoveParams;
use q2sync_common::q_shared::{
    EntityState, PmoveState, Vec3, CS_AIRACCEL, CS_MODELS, CVAR_ARCHIVE, CVAR_USERINFO,
    MAX_CONFIGSTRINGS, MAX_MODELS,
};

use crate::cmd_ring::CmdRing;

pub const MAX_PARSE_ENTITIES: usize = 1024;

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PlayerState {
    pub pmove: PmoveState, // for prediction
    pub viewangles: Vec3,
}

/// The most recent snapshot received from the server.
#[derive(Debug, Clone, Default)]
pub struct Frame {
    pub valid: bool, // cleared if delta parsing was invalid
    pub serverframe: i32,
    pub deltaframe: i32,
    pub playerstate: PlayerState,
    pub num_entities: i32,
    pub parse_entities: i32, // non-masked index into the parse entity ring
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum ConnState {
    #[default]
    Disconnected, // not talking to a server
    Connecting,   // sending request packets to the server
    Connected,    // netchan established, waiting for the first frame
    Active,       // game views should be displayed
}

/// Wiped at every map change.
#[derive(Debug)]
pub struct ClientState {
    pub cmds: CmdRing,

    pub predicted_step: f32, // for stair up smoothing
    pub predicted_step_time: u32,

    pub predicted_origin: Vec3, // generated by cl_predict_movement
    pub predicted_angles: Vec3,
    pub prediction_error: Vec3,

    pub frame: Frame,
    pub parse_entities: i32, // next free slot, not masked

    /// Maintained by the client and sent to the server each frame.
    pub viewangles: Vec3,

    pub playernum: i32,
    pub configstrings: Vec<String>,
    /// Inline model number for each model index that names a `*N` brush model.
    pub model_clip: Vec<Option<usize>>,
}

impl Default for ClientState {
    fn default() -> Self {
        Self {
            cmds: CmdRing::new(),
            predicted_step: 0.0,
            predicted_step_time: 0,
            predicted_origin: [0.0; 3],
            predicted_angles: [0.0; 3],
            prediction_error: [0.0; 3],
            frame: Frame::default(),
            parse_entities: 0,
            viewangles: [0.0; 3],
            playernum: 0,
            configstrings: vec![String::new(); MAX_CONFIGSTRINGS],
            model_clip: vec![None; MAX_MODELS],
        }
    }
}

/// Persists across server connections.
#[derive(Debug)]
pub struct ClientStatic {
    pub state: ConnState,
    pub realtime: i32,  // always increasing, no clamping
    pub frametime: f32, // seconds since last packet frame
    pub netchan: NetChan,
}

impl Default for ClientStatic {
    fn default() -> Self {
        Self {
            state: ConnState::Disconnected,
            realtime: 0,
            frametime: 0.0,
            netchan: NetChan::new(NetSrc::Client, 0, 0),
        }
    }
}

/// Everything one client session owns.
pub struct ClientContext {
    pub cl: ClientState,
    pub cls: ClientStatic,
    pub cvars: CvarContext,
    pub parse_entities: Vec<EntityState>,
    pub world: Option<Arc<CollisionModel>>,
}

impl Default for ClientContext {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientContext {
    pub fn new() -> Self {
        let mut cvars = CvarContext::new();
        cvars.get("cl_predict", "1", 0);
        cvars.get("cl_showmiss", "0", 0);
        cvars.get("cl_paused", "0", 0);
        cvars.get("cl_nodelta", "0", 0);

        // userinfo
        cvars.get("name", "unnamed", CVAR_USERINFO | CVAR_ARCHIVE);
        cvars.get("rate", "25000", CVAR_USERINFO | CVAR_ARCHIVE);
        cvars.get("msg", "1", CVAR_USERINFO | CVAR_ARCHIVE);

        Self {
            cl: ClientState::default(),
            cls: ClientStatic::default(),
            cvars,
            parse_entities: vec![EntityState::default(); MAX_PARSE_ENTITIES],
            world: None,
        }
    }

    /// Brings up the channel to a server and clears per-level state.
    pub fn connect(&mut self, qport: i32) {
        self.cl = ClientState::default();
        self.cls.netchan.setup(NetSrc::Client, qport, self.cls.realtime);
        self.cls.state = ConnState::Connected;
    }

    pub fn set_world(&mut self, world: Arc<CollisionModel>) {
        self.world = Some(world);
    }

    /// Stores a configstring and refreshes anything derived from it.
    pub fn set_configstring(&mut self, index: usize, value: &str) {
        let Some(slot) = self.cl.configstrings.get_mut(index) else {
            tracing::warn!(index, "configstring index out of range");
            return;
        };
        *slot = value.to_string();

        if (CS_MODELS + 1..CS_MODELS + MAX_MODELS).contains(&index) {
            let num = value.strip_prefix('*').and_then(|n| n.parse::<usize>().ok());
            self.cl.model_clip[index - CS_MODELS] = num;
        }
    }

    /// Movement tunables replicated through configstrings.
    pub fn pm_params(&self) -> PmoveParams {
        PmoveParams {
            airaccelerate: self.cl.configstrings[CS_AIRACCEL].trim().parse().unwrap_or(0.0),
        }
    }

    /// Installs a received snapshot: player state plus its solid entities,
    /// which are copied into the parse ring.
    pub fn set_frame(&mut self, serverframe: i32, playerstate: PlayerState, entities: &[EntityState]) {
        let frame = &mut self.cl.frame;
        frame.valid = true;
        frame.serverframe = serverframe;
        frame.playerstate = playerstate;
        frame.parse_entities = self.cl.parse_entities;
        frame.num_entities = entities.len() as i32;

        for ent in entities {
            let slot = (self.cl.parse_entities as usize) & (MAX_PARSE_ENTITIES - 1);
            self.parse_entities[slot] = ent.clone();
            self.cl.parse_entities = self.cl.parse_entities.wrapping_add(1);
        }
        self.cls.state = ConnState::Active;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_registered() {
        let ctx = ClientContext::new();
        assert_eq!(ctx.cvars.variable_integer("cl_predict"), 1);
        assert_eq!(ctx.cvars.variable_integer("cl_showmiss"), 0);
        assert_eq!(ctx.cvars.variable_integer("cl_nodelta"), 0);
        assert_eq!(ctx.cls.state, ConnState::Disconnected);
    }

    #[test]
    fn test_model_configstrings_map_inline_models() {
        let mut ctx = ClientContext::new();
        ctx.set_configstring(CS_MODELS + 1, "maps/q2dm1.bsp");
        ctx.set_configstring(CS_MODELS + 2, "*3");
        assert_eq!(ctx.cl.model_clip[1], None);
        assert_eq!(ctx.cl.model_clip[2], Some(3));

        ctx.set_configstring(CS_AIRACCEL, "4");
        assert_eq!(ctx.pm_params().airaccelerate, 4.0);

        ctx.set_configstring(MAX_CONFIGSTRINGS, "ignored");
    }

    #[test]
    fn test_set_frame_wraps_parse_ring() {
        let mut ctx = ClientContext::new();
        ctx.cl.parse_entities = MAX_PARSE_ENTITIES as i32 - 1;
        let ents: Vec<EntityState> = (1..=3)
            .map(|number| EntityState { number, ..Default::default() })
            .collect();
        ctx.set_frame(10, PlayerState::default(), &ents);

        assert_eq!(ctx.cl.frame.num_entities, 3);
        assert_eq!(ctx.cl.frame.parse_entities, MAX_PARSE_ENTITIES as i32 - 1);
        assert_eq!(ctx.parse_entities[MAX_PARSE_ENTITIES - 1].number, 1);
        assert_eq!(ctx.parse_entities[0].number, 2);
        assert_eq!(ctx.parse_entities[1].number, 3);
        assert_eq!(ctx.cls.state, ConnState::Active);
    }
}
