// server.rs — server state, client slots and the connection lifecycle

use q2sync_common::cmd::CmdBuffer;
use q2sync_common::common::{com_dprintf, msg_write_byte, msg_write_string};
use q2sync_common::cvar::CvarContext;
use q2sync_common::files::FileSource;
use q2sync_common::net_chan::{NetChan, NetSrc};
use q2sync_common::q_shared::*;
use q2sync_common::qcommon::*;
use thiserror::Error;

use crate::sv_game::GameRules;

/// Movement time each client may use per budget period, in msec.
pub const COMMAND_MSEC_BUDGET: i32 = 1800;

/// Frames between budget resets (16 frames of 100 msec).
pub const COMMAND_MSEC_FRAMES: i32 = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ServerState {
    #[default]
    Dead, // no map loaded
    Loading, // spawning level edicts
    Game,    // actively running
    Cinematic,
    Demo,
    Pic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum ClientState {
    #[default]
    Free, // can be reused for a new connection
    Zombie,    // client has been disconnected, but don't reuse for a couple seconds
    Connected, // has been assigned to a client slot, but not in game yet
    Spawned,   // client is fully in game
}

/// Why a client was thrown off the server.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DropReason {
    #[error("read past the end of the message")]
    BadRead,
    #[error("unknown command char {0}")]
    UnknownCommand(i32),
    #[error("illegal download path {0}")]
    IllegalDownloadPath(String),
    #[error("illegal download offset {offset} for {name}")]
    IllegalDownloadOffset { name: String, offset: i32 },
    #[error("illegal {what} request (negative index {start})")]
    NegativeIndex { what: &'static str, start: i32 },
    #[error("illegal 'begin' (already spawned)")]
    BeginExploit,
    #[error("disconnected")]
    Disconnect,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ClientFrame {
    pub senttime: i32, // for ping calculations
}

#[derive(Debug)]
pub struct Client {
    pub state: ClientState,

    pub userinfo: String, // name, etc

    pub lastframe: i32,   // for delta compression
    pub lastcmd: UserCmd, // for filling in big drops

    /// Reset every COMMAND_MSEC_FRAMES; if user commands exhaust it,
    /// assume time cheating.
    pub command_msec: i32,

    pub frame_latency: [i32; LATENCY_COUNTS],

    pub rate: i32,
    pub edict_index: i32,
    pub name: String,      // extracted from userinfo, high bits masked
    pub messagelevel: i32, // for filtering printed messages

    pub frames: Vec<ClientFrame>, // updates can be delta'd from here

    pub download: Option<Vec<u8>>, // file being downloaded
    pub downloadsize: i32,         // total bytes (can't use EOF because of paks)
    pub downloadcount: i32,        // bytes sent

    pub loopback: bool,
    pub netchan: NetChan,
}

impl Default for Client {
    fn default() -> Self {
        Self {
            state: ClientState::Free,
            userinfo: String::new(),
            lastframe: -1,
            lastcmd: UserCmd::default(),
            command_msec: 0,
            frame_latency: [0; LATENCY_COUNTS],
            rate: 0,
            edict_index: 0,
            name: String::new(),
            messagelevel: 0,
            frames: vec![ClientFrame::default(); UPDATE_BACKUP as usize],
            download: None,
            downloadsize: 0,
            downloadcount: 0,
            loopback: false,
            netchan: NetChan::new(NetSrc::Server, 0, 0),
        }
    }
}

/// Per-level state, wiped at every map change.
#[derive(Debug)]
pub struct Server {
    pub state: ServerState,
    pub attractloop: bool, // running cinematics and demos for the local system only
    pub framenum: i32,
    pub name: String, // map name, or cinematic name
    pub configstrings: Vec<String>,
    pub baselines: Vec<EntityState>,
}

impl Default for Server {
    fn default() -> Self {
        Self {
            state: ServerState::Dead,
            attractloop: false,
            framenum: 0,
            name: String::new(),
            configstrings: vec![String::new(); MAX_CONFIGSTRINGS],
            baselines: vec![EntityState::default(); MAX_EDICTS],
        }
    }
}

/// Persists across level changes.
#[derive(Debug, Default)]
pub struct ServerStatic {
    pub realtime: i32,   // always increasing, no clamping
    pub spawncount: i32, // incremented each server start, used to check late spawns
    pub clients: Vec<Client>,
}

pub struct ServerContext {
    pub sv: Server,
    pub svs: ServerStatic,
    pub cvars: CvarContext,
    pub ge: Option<Box<dyn GameRules>>,
    pub fs: Box<dyn FileSource>,
    pub cbuf: CmdBuffer,
}

impl ServerContext {
    pub fn new(maxclients: usize, fs: Box<dyn FileSource>) -> Self {
        let mut cvars = CvarContext::new();
        cvars.get("maxclients", &maxclients.to_string(), CVAR_SERVERINFO | CVAR_LATCH);
        cvars.get("paused", "0", 0);
        cvars.get("sv_enforcetime", "0", 0);
        cvars.get("sv_baselines_maxlen", "1200", 0);
        cvars.get("coop", "0", CVAR_LATCH);
        cvars.get("nextserver", "", 0);
        cvars.get("gamedir", "baseq2", CVAR_SERVERINFO | CVAR_NOSET);
        cvars.get("developer", "0", 0);

        cvars.get("allow_download", "1", CVAR_ARCHIVE);
        cvars.get("allow_download_players", "0", CVAR_ARCHIVE);
        cvars.get("allow_download_models", "1", CVAR_ARCHIVE);
        cvars.get("allow_download_sounds", "1", CVAR_ARCHIVE);
        cvars.get("allow_download_maps", "1", CVAR_ARCHIVE);
        cvars.get("allow_download_pics", "1", CVAR_ARCHIVE);
        cvars.get("allow_download_textures", "1", CVAR_ARCHIVE);

        let mut svs = ServerStatic::default();
        svs.clients.resize_with(maxclients, Client::default);

        Self { sv: Server::default(), svs, cvars, ge: None, fs, cbuf: CmdBuffer::new() }
    }

    pub fn maxclients(&self) -> i32 {
        self.cvars.variable_integer("maxclients")
    }
}

// ============================================================
// Connection lifecycle
// ============================================================

/// Puts a client into slot `client_idx` after a successful connect
/// handshake.
pub fn sv_connect_client(ctx: &mut ServerContext, client_idx: usize, qport: i32, userinfo: &str) {
    let realtime = ctx.svs.realtime;
    let cl = &mut ctx.svs.clients[client_idx];
    *cl = Client::default();
    cl.netchan.setup(NetSrc::Server, qport, realtime);
    cl.state = ClientState::Connected;
    cl.edict_index = client_idx as i32 + 1;
    cl.command_msec = COMMAND_MSEC_BUDGET;
    cl.userinfo = userinfo.to_string();
    sv_userinfo_changed(ctx, client_idx);
}

/// Called when the player is totally leaving the server, either willingly
/// or unwillingly.
pub fn sv_drop_client(ctx: &mut ServerContext, client_idx: usize, reason: &DropReason) {
    let cl = &mut ctx.svs.clients[client_idx];
    tracing::warn!(client = %cl.name, %reason, "dropping client");

    // add the disconnect
    msg_write_byte(&mut cl.netchan.message, SvcOps::Disconnect.byte());

    if cl.state == ClientState::Spawned {
        // call the game function for removing a client
        if let Some(ge) = ctx.ge.as_mut() {
            ge.client_disconnect(cl.edict_index);
        }
    }

    cl.download = None;
    cl.state = ClientState::Zombie; // become free in a few seconds
    cl.name.clear();
}

/// Sends text to one client, honoring its message level.
pub fn sv_client_printf(cl: &mut Client, level: i32, text: &str) {
    if level < cl.messagelevel {
        return;
    }
    msg_write_byte(&mut cl.netchan.message, SvcOps::Print.byte());
    msg_write_byte(&mut cl.netchan.message, level);
    msg_write_string(&mut cl.netchan.message, text);
}

/// Pulls the engine-relevant fields out of a changed userinfo string.
pub fn sv_userinfo_changed(ctx: &mut ServerContext, client_idx: usize) {
    let cl = &mut ctx.svs.clients[client_idx];

    // call game code to allow overrides
    if let Some(ge) = ctx.ge.as_mut() {
        ge.client_userinfo_changed(cl.edict_index, &cl.userinfo);
    }

    // name for engine code, high bits masked
    cl.name = mask_high_bits(&info_value_for_key(&cl.userinfo, "name"))
        .chars()
        .take(31)
        .collect();

    // rate command
    let rate = info_value_for_key(&cl.userinfo, "rate");
    cl.rate = if rate.is_empty() {
        5000
    } else {
        rate.trim().parse::<i32>().unwrap_or(0).clamp(100, 15000)
    };

    // msg command
    let msg = info_value_for_key(&cl.userinfo, "msg");
    if !msg.is_empty() {
        cl.messagelevel = msg.trim().parse().unwrap_or(0);
    }
}

/// Advances one server frame, refilling every command time budget at the
/// start of each budget period.
pub fn sv_frame_tick(ctx: &mut ServerContext, msec: i32) {
    ctx.svs.realtime += msec;
    ctx.sv.framenum += 1;
    if ctx.sv.framenum % COMMAND_MSEC_FRAMES == 0 {
        for cl in ctx.svs.clients.iter_mut() {
            cl.command_msec = COMMAND_MSEC_BUDGET;
        }
        com_dprintf("command time budgets reset\n");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use q2sync_common::common::{msg_read_byte, msg_read_string};
    use q2sync_common::files::MemoryFileSystem;

    fn ctx() -> ServerContext {
        ServerContext::new(4, Box::new(MemoryFileSystem::new()))
    }

    #[test]
    fn test_defaults() {
        let ctx = ctx();
        assert_eq!(ctx.svs.clients.len(), 4);
        assert_eq!(ctx.maxclients(), 4);
        assert_eq!(ctx.cvars.variable_integer("sv_baselines_maxlen"), 1200);
        assert_eq!(ctx.cvars.variable_integer("allow_download_players"), 0);
    }

    #[test]
    fn test_userinfo_extraction() {
        let mut ctx = ctx();
        let long = "x".repeat(40);
        sv_connect_client(&mut ctx, 1, 5, &format!("\\name\\{}\\rate\\50\\msg\\2", long));
        let cl = &ctx.svs.clients[1];
        assert_eq!(cl.state, ClientState::Connected);
        assert_eq!(cl.name.len(), 31);
        assert_eq!(cl.rate, 100);
        assert_eq!(cl.messagelevel, 2);
        assert_eq!(cl.edict_index, 2);

        ctx.svs.clients[1].userinfo = "\\name\\pl\u{e1}yer\\rate\\99999".to_string();
        sv_userinfo_changed(&mut ctx, 1);
        assert_eq!(ctx.svs.clients[1].rate, 15000);
        assert_eq!(ctx.svs.clients[1].name, "player");

        ctx.svs.clients[1].userinfo = "\\name\\p".to_string();
        sv_userinfo_changed(&mut ctx, 1);
        assert_eq!(ctx.svs.clients[1].rate, 5000);
        assert_eq!(ctx.svs.clients[1].name, "p");
    }

    #[test]
    fn test_drop_client_becomes_zombie() {
        let mut ctx = ctx();
        sv_connect_client(&mut ctx, 0, 5, "\\name\\bob");
        ctx.svs.clients[0].download = Some(vec![1, 2, 3]);
        sv_drop_client(&mut ctx, 0, &DropReason::Disconnect);

        let cl = &ctx.svs.clients[0];
        assert_eq!(cl.state, ClientState::Zombie);
        assert!(cl.download.is_none());
        assert!(cl.name.is_empty());
        assert_eq!(cl.netchan.message.as_slice(), &[SvcOps::Disconnect.byte() as u8]);
    }

    #[test]
    fn test_client_printf_filters_by_level() {
        let mut cl = Client { messagelevel: PRINT_HIGH, ..Default::default() };
        sv_client_printf(&mut cl, PRINT_LOW, "quiet");
        assert_eq!(cl.netchan.message.cursize, 0);

        sv_client_printf(&mut cl, PRINT_HIGH, "loud");
        let mut msg = SizeBuf::from_bytes(cl.netchan.message.as_slice());
        assert_eq!(msg_read_byte(&mut msg), SvcOps::Print.byte());
        assert_eq!(msg_read_byte(&mut msg), PRINT_HIGH);
        assert_eq!(msg_read_string(&mut msg), "loud");
    }

    #[test]
    fn test_frame_tick_resets_budgets() {
        let mut ctx = ctx();
        ctx.svs.clients[2].command_msec = -50;
        for _ in 0..COMMAND_MSEC_FRAMES - 1 {
            sv_frame_tick(&mut ctx, 100);
        }
        assert_eq!(ctx.svs.clients[2].command_msec, -50);
        sv_frame_tick(&mut ctx, 100);
        assert_eq!(ctx.svs.clients[2].command_msec, COMMAND_MSEC_BUDGET);
        assert_eq!(ctx.svs.realtime, 1600);
    }
}
