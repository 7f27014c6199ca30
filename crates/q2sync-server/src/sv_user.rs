// sv_user.rs — server code for moving users

use q2sync_common::cmd::{cmd_tokenize_string, CmdArgs};
use q2sync_common::common::*;
use q2sync_common::movecmd::msg_read_move;
use q2sync_common::q_shared::*;
use q2sync_common::qcommon::*;

use crate::server::*;

// ============================================================
// USER STRINGCMD EXECUTION
// ============================================================

const MAX_STRINGCMDS: i32 = 8;

/// Largest chunk handed out per `nextdl`.
const DOWNLOAD_CHUNK: i32 = 1024;

const DEFAULT_BASELINES_MAXLEN: &str = "1200";

type UserCommandFn = fn(&mut ServerContext, usize, &CmdArgs) -> Result<(), DropReason>;

struct UserCommand {
    name: &'static str,
    /// Accepted before the client has spawned.
    pre_spawn: bool,
    func: UserCommandFn,
}

static UCMDS: &[UserCommand] = &[
    // auto issued
    UserCommand { name: "new", pre_spawn: true, func: sv_new_f },
    UserCommand { name: "configstrings", pre_spawn: true, func: sv_configstrings_f },
    UserCommand { name: "baselines", pre_spawn: true, func: sv_baselines_f },
    UserCommand { name: "begin", pre_spawn: true, func: sv_begin_f },
    UserCommand { name: "nextserver", pre_spawn: true, func: sv_nextserver_f },
    UserCommand { name: "disconnect", pre_spawn: true, func: sv_disconnect_f },
    // issued by hand at client consoles
    UserCommand { name: "info", pre_spawn: true, func: sv_showserverinfo_f },
    UserCommand { name: "download", pre_spawn: true, func: sv_begin_download_f },
    UserCommand { name: "nextdl", pre_spawn: true, func: sv_next_download_f },
];

fn atoi(s: &str) -> i32 {
    s.trim().parse().unwrap_or(0)
}

/// Sends the first message from the server to a connected client.
/// This will be sent on the initial connection and upon each server load.
pub fn sv_new_f(ctx: &mut ServerContext, client_idx: usize, _args: &CmdArgs) -> Result<(), DropReason> {
    let cl = &mut ctx.svs.clients[client_idx];
    com_dprintf(&format!("New() from {}\n", cl.name));

    if cl.state != ClientState::Connected {
        com_printf("New not valid -- already spawned\n");
        return Ok(());
    }

    // serverdata needs to go over for all types of servers to make sure
    // the protocol is right, and to set the gamedir
    let gamedir = ctx.cvars.variable_string("gamedir");
    let msg = &mut cl.netchan.message;
    msg_write_byte(msg, SvcOps::ServerData.byte());
    msg_write_long(msg, PROTOCOL_VERSION);
    msg_write_long(msg, ctx.svs.spawncount);
    msg_write_byte(msg, ctx.sv.attractloop as i32);
    msg_write_string(msg, gamedir);

    let playernum = match ctx.sv.state {
        ServerState::Cinematic | ServerState::Pic => -1,
        _ => client_idx as i32,
    };
    msg_write_short(msg, playernum);

    // send full levelname
    msg_write_string(msg, &ctx.sv.configstrings[CS_NAME]);

    // game server
    if ctx.sv.state == ServerState::Game {
        // set up the entity for the client
        cl.edict_index = playernum + 1;
        cl.lastcmd = UserCmd::default();

        // begin fetching configstrings
        msg_write_byte(msg, SvcOps::StuffText.byte());
        msg_write_string(msg, &format!("cmd configstrings {} 0\n", ctx.svs.spawncount));
    }
    Ok(())
}

/// Bounds-checks `sv_baselines_maxlen` and returns how full the reliable
/// message may get before a handshake page is cut.
pub fn sv_set_max_baselines_size(ctx: &mut ServerContext, client_idx: usize) -> usize {
    if ctx.cvars.variable_value("sv_baselines_maxlen") < 400.0 {
        tracing::warn!("sv_baselines_maxlen is less than 400, setting to default value of 1200");
        ctx.cvars.set("sv_baselines_maxlen", DEFAULT_BASELINES_MAXLEN);
    }

    let max_msglen = MAX_MSGLEN.min(1400);
    if ctx.cvars.variable_value("sv_baselines_maxlen") > max_msglen as f32 {
        tracing::warn!(max_msglen, "sv_baselines_maxlen is too large, setting to default value of 1200");
        ctx.cvars.set("sv_baselines_maxlen", DEFAULT_BASELINES_MAXLEN);
    }

    // use MAX_MSGLEN/2 for single player and local clients
    if ctx.svs.clients[client_idx].loopback || ctx.maxclients() == 1 {
        return MAX_MSGLEN / 2;
    }
    ctx.cvars.variable_integer("sv_baselines_maxlen") as usize
}

/// Checks the level a handshake request was made for, and the page start.
/// `Ok(None)` means the request was answered with a fresh `new`.
fn handshake_start(
    ctx: &mut ServerContext,
    client_idx: usize,
    args: &CmdArgs,
    what: &'static str,
) -> Result<Option<(usize, usize)>, DropReason> {
    if ctx.svs.clients[client_idx].state != ClientState::Connected {
        com_printf(&format!("{} not valid -- already spawned\n", what));
        return Ok(None);
    }

    // handle the case of a level changing while a client was connecting
    if atoi(args.argv(1)) != ctx.svs.spawncount {
        com_printf(&format!("SV_{}_f from different level\n", what));
        sv_new_f(ctx, client_idx, args)?;
        return Ok(None);
    }

    let max_len = sv_set_max_baselines_size(ctx, client_idx);

    let start = atoi(args.argv(2));
    if start < 0 {
        return Err(DropReason::NegativeIndex { what, start });
    }
    Ok(Some((start as usize, max_len)))
}

pub fn sv_configstrings_f(ctx: &mut ServerContext, client_idx: usize, args: &CmdArgs) -> Result<(), DropReason> {
    com_dprintf(&format!("Configstrings() from {}\n", ctx.svs.clients[client_idx].name));

    let Some((mut start, max_len)) = handshake_start(ctx, client_idx, args, "configstrings")? else {
        return Ok(());
    };

    // write a packet full of data
    let msg = &mut ctx.svs.clients[client_idx].netchan.message;
    while msg.cursize < max_len && start < MAX_CONFIGSTRINGS {
        let cs = &ctx.sv.configstrings[start];
        if !cs.is_empty() {
            msg_write_byte(msg, SvcOps::ConfigString.byte());
            msg_write_short(msg, start as i32);
            msg_write_string(msg, cs);
        }
        start += 1;
    }

    // send next command
    msg_write_byte(msg, SvcOps::StuffText.byte());
    if start == MAX_CONFIGSTRINGS {
        msg_write_string(msg, &format!("cmd baselines {} 0\n", ctx.svs.spawncount));
    } else {
        msg_write_string(msg, &format!("cmd configstrings {} {}\n", ctx.svs.spawncount, start));
    }
    Ok(())
}

pub fn sv_baselines_f(ctx: &mut ServerContext, client_idx: usize, args: &CmdArgs) -> Result<(), DropReason> {
    com_dprintf(&format!("Baselines() from {}\n", ctx.svs.clients[client_idx].name));

    let Some((mut start, max_len)) = handshake_start(ctx, client_idx, args, "baselines")? else {
        return Ok(());
    };

    let nullstate = EntityState::default();

    // write a packet full of data
    let msg = &mut ctx.svs.clients[client_idx].netchan.message;
    while msg.cursize < max_len && start < MAX_EDICTS {
        let base = &ctx.sv.baselines[start];
        if base.modelindex != 0 || base.sound != 0 || base.effects != 0 {
            msg_write_byte(msg, SvcOps::SpawnBaseline.byte());
            msg_write_delta_entity(&nullstate, base, msg, true, true);
        }
        start += 1;
    }

    // send next command
    msg_write_byte(msg, SvcOps::StuffText.byte());
    if start == MAX_EDICTS {
        msg_write_string(msg, &format!("precache {}\n", ctx.svs.spawncount));
    } else {
        msg_write_string(msg, &format!("cmd baselines {} {}\n", ctx.svs.spawncount, start));
    }
    Ok(())
}

pub fn sv_begin_f(ctx: &mut ServerContext, client_idx: usize, args: &CmdArgs) -> Result<(), DropReason> {
    let cl = &ctx.svs.clients[client_idx];
    com_dprintf(&format!("Begin() from {}\n", cl.name));

    // a second begin could be abused to respawn
    if cl.state != ClientState::Connected {
        tracing::warn!(client = %cl.name, "EXPLOIT: illegal 'begin' (already spawned)");
        return Err(DropReason::BeginExploit);
    }

    // handle the case of a level changing while a client was connecting
    if atoi(args.argv(1)) != ctx.svs.spawncount {
        com_printf("SV_Begin_f from different level\n");
        return sv_new_f(ctx, client_idx, args);
    }

    let cl = &mut ctx.svs.clients[client_idx];
    cl.state = ClientState::Spawned;

    // call the game begin function
    if let Some(ge) = ctx.ge.as_mut() {
        ge.client_begin(cl.edict_index);
    }
    Ok(())
}

// =============================================================================

pub fn sv_next_download_f(ctx: &mut ServerContext, client_idx: usize, _args: &CmdArgs) -> Result<(), DropReason> {
    let cl = &mut ctx.svs.clients[client_idx];
    let Some(download) = cl.download.as_ref() else {
        return Ok(());
    };

    let r = (cl.downloadsize - cl.downloadcount).min(DOWNLOAD_CHUNK);
    let msg = &mut cl.netchan.message;
    msg_write_byte(msg, SvcOps::Download.byte());
    msg_write_short(msg, r);

    cl.downloadcount += r;
    let size = if cl.downloadsize == 0 { 1 } else { cl.downloadsize as i64 };
    let percent = (cl.downloadcount as i64 * 100 / size) as i32;
    msg_write_byte(msg, percent);

    let start = (cl.downloadcount - r) as usize;
    msg.write(&download[start..start + r as usize]);

    if cl.downloadcount == cl.downloadsize {
        cl.download = None;
    }
    Ok(())
}

fn write_download_refusal(cl: &mut Client) {
    msg_write_byte(&mut cl.netchan.message, SvcOps::Download.byte());
    msg_write_short(&mut cl.netchan.message, -1);
    msg_write_byte(&mut cl.netchan.message, 0);
}

fn is_valid_char(c: u8) -> bool {
    c.is_ascii_alphanumeric() || c == b'_' || c == b'-'
}

/// Masks high bits and removes every `./` so paths like
/// `./textures/map/file` resolve.
fn normalize_download_name(raw: &str) -> String {
    let mut name = mask_high_bits(raw);
    while let Some(p) = name.find("./") {
        name.replace_range(p..p + 2, "");
    }
    name
}

fn download_allowed(ctx: &ServerContext, name: &str) -> bool {
    let on = |var: &str| ctx.cvars.variable_value(var) != 0.0;
    let categories = [
        ("players/", "allow_download_players"),
        ("models/", "allow_download_models"),
        ("sound/", "allow_download_sounds"),
        ("maps/", "allow_download_maps"),
        ("pics/", "allow_download_pics"),
        ("env/", "allow_download_textures"),
        ("textures/", "allow_download_textures"),
    ];
    on("allow_download")
        && categories
            .iter()
            .all(|(prefix, var)| !name.starts_with(prefix) || on(var))
}

pub fn sv_begin_download_f(ctx: &mut ServerContext, client_idx: usize, args: &CmdArgs) -> Result<(), DropReason> {
    let raw = args.argv(1);
    let offset = if args.argc() > 2 { atoi(args.argv(2)) } else { 0 };
    let name = normalize_download_name(raw);
    let cl = &mut ctx.svs.clients[client_idx];

    // leading \ would download from the mod root, .. is obvious
    if name.starts_with('\\') || name.contains("..") || raw.contains("..") {
        write_download_refusal(cl);
        tracing::warn!(client = %cl.name, name = %name, "refusing illegal download path");
        return Err(DropReason::IllegalDownloadPath(name));
    }

    if offset < 0 {
        write_download_refusal(cl);
        tracing::warn!(client = %cl.name, name = %name, offset, "refusing illegal download offset");
        return Err(DropReason::IllegalDownloadOffset { name, offset });
    }

    let bytes = name.as_bytes();
    if bytes.is_empty()
        || !is_valid_char(bytes[0])
        || name.contains('\\')
        // must be in a subdirectory, unless a pk3
        || (!name.contains('/') && !name.ends_with(".pk3"))
        // maps/. would open the directory
        || !is_valid_char(bytes[bytes.len() - 1])
    {
        write_download_refusal(cl);
        return Ok(());
    }

    if !download_allowed(ctx, &name) {
        write_download_refusal(&mut ctx.svs.clients[client_idx]);
        return Ok(());
    }

    let loaded = ctx.fs.load_file(&name);
    let cl = &mut ctx.svs.clients[client_idx];
    cl.download = None;

    // maps that came from a pack are never offered
    let file = match loaded {
        Some(f) if !(name.starts_with("maps/") && f.from_pak) => f,
        _ => {
            com_dprintf(&format!("Couldn't download {} to {}\n", name, cl.name));
            write_download_refusal(cl);
            return Ok(());
        }
    };

    // sizes travel as a signed long
    let Ok(size) = i32::try_from(file.data.len()) else {
        tracing::warn!(client = %cl.name, name = %name, len = file.data.len(), "download too large");
        write_download_refusal(cl);
        return Ok(());
    };

    cl.downloadsize = size;
    cl.downloadcount = offset.min(cl.downloadsize);
    cl.download = Some(file.data);

    sv_next_download_f(ctx, client_idx, args)?;
    com_dprintf(&format!("Downloading {} to {}\n", name, ctx.svs.clients[client_idx].name));
    Ok(())
}

// ============================================================================

/// The client is going to disconnect, so remove the connection immediately.
pub fn sv_disconnect_f(_ctx: &mut ServerContext, _client_idx: usize, _args: &CmdArgs) -> Result<(), DropReason> {
    Err(DropReason::Disconnect)
}

/// `\key\value` pairs as `key=value` lines.
fn serverinfo_text(info: &str) -> String {
    let mut out = String::with_capacity(info.len() + 1);
    let mut flip = false;
    for c in info.strip_prefix('\\').unwrap_or(info).chars() {
        if c == '\\' {
            out.push(if flip { '\n' } else { '=' });
            flip = !flip;
        } else {
            out.push(c);
        }
    }
    out.push('\n');
    out
}

/// Dumps the serverinfo info string to the asking client.
pub fn sv_showserverinfo_f(ctx: &mut ServerContext, client_idx: usize, _args: &CmdArgs) -> Result<(), DropReason> {
    let text = serverinfo_text(&ctx.cvars.serverinfo());
    sv_client_printf(&mut ctx.svs.clients[client_idx], PRINT_HIGH, &text);
    Ok(())
}

pub fn sv_nextserver(ctx: &mut ServerContext) {
    // a pic can be nextserver'd in coop mode
    if ctx.sv.state == ServerState::Game
        || (ctx.sv.state == ServerState::Pic && ctx.cvars.variable_value("coop") == 0.0)
    {
        return; // can't nextserver while playing a normal game
    }

    ctx.svs.spawncount += 1; // make sure another doesn't sneak in
    let next = ctx.cvars.variable_string("nextserver").to_string();
    if next.is_empty() {
        ctx.cbuf.cbuf_add_text("killserver\n");
    } else {
        ctx.cbuf.cbuf_add_text(&next);
        ctx.cbuf.cbuf_add_text("\n");
    }
    ctx.cvars.set("nextserver", "");
}

/// A cinematic has completed or been aborted by a client, so move to the
/// next server.
pub fn sv_nextserver_f(ctx: &mut ServerContext, client_idx: usize, args: &CmdArgs) -> Result<(), DropReason> {
    let name = &ctx.svs.clients[client_idx].name;
    if atoi(args.argv(1)) != ctx.svs.spawncount {
        com_dprintf(&format!("Nextserver() from wrong level, from {}\n", name));
        return Ok(()); // leftover from last server
    }

    com_dprintf(&format!("Nextserver() from {}\n", name));
    sv_nextserver(ctx);
    Ok(())
}

pub fn sv_execute_user_command(ctx: &mut ServerContext, client_idx: usize, s: &str) -> Result<(), DropReason> {
    let args = cmd_tokenize_string(s);
    let spawned = ctx.svs.clients[client_idx].state >= ClientState::Spawned;

    if let Some(u) = UCMDS.iter().find(|u| u.name == args.argv(0)) {
        if !u.pre_spawn && !spawned {
            return Ok(());
        }
        return (u.func)(ctx, client_idx, &args);
    }

    // commands from clients still connecting never reach the game
    if !spawned {
        return Ok(());
    }

    if ctx.sv.state == ServerState::Game {
        let ent = ctx.svs.clients[client_idx].edict_index;
        if let Some(ge) = ctx.ge.as_mut() {
            ge.client_command(ent, &args);
        }
    }
    Ok(())
}

// ===========================================================================
// USER CMD EXECUTION
// ===========================================================================

pub fn sv_client_think(ctx: &mut ServerContext, client_idx: usize, cmd: &UserCmd) {
    let cl = &mut ctx.svs.clients[client_idx];
    cl.command_msec -= cmd.msec as i32;

    if cl.command_msec < 0 && ctx.cvars.variable_value("sv_enforcetime") != 0.0 {
        tracing::debug!(client = %cl.name, command_msec = cl.command_msec, "commandMsec underflow");
        return;
    }

    if let Some(ge) = ctx.ge.as_mut() {
        ge.client_think(cl.edict_index, cmd);
    }
}

/// Parses one client message. Protocol violations drop the client.
pub fn sv_execute_client_message(ctx: &mut ServerContext, client_idx: usize, msg: &mut SizeBuf) {
    // only allow one move command
    let mut move_issued = false;
    let mut string_cmd_count = 0;

    loop {
        if msg.is_bad_read() {
            sv_drop_client(ctx, client_idx, &DropReason::BadRead);
            return;
        }

        let c = msg_read_byte(msg);
        if c == -1 {
            break;
        }

        match c {
            CLC_NOP => {}

            CLC_USERINFO => {
                let info = msg_read_string(msg);
                ctx.svs.clients[client_idx].userinfo = info.chars().take(MAX_INFO_STRING - 1).collect();
                sv_userinfo_changed(ctx, client_idx);
            }

            CLC_MOVE => {
                if move_issued {
                    return; // someone is trying to cheat...
                }
                move_issued = true;

                let unit = match msg_read_move(msg) {
                    Ok(unit) => unit,
                    Err(_) => {
                        sv_drop_client(ctx, client_idx, &DropReason::BadRead);
                        return;
                    }
                };

                let realtime = ctx.svs.realtime;
                let cl = &mut ctx.svs.clients[client_idx];
                if unit.lastframe != cl.lastframe {
                    cl.lastframe = unit.lastframe;
                    if cl.lastframe > 0 {
                        let sent = cl.frames[(cl.lastframe & UPDATE_MASK) as usize].senttime;
                        cl.frame_latency[cl.lastframe as usize & (LATENCY_COUNTS - 1)] = realtime - sent;
                    }
                }

                if cl.state != ClientState::Spawned {
                    cl.lastframe = -1;
                    continue;
                }

                // if the checksum fails, ignore the rest of the packet
                if let Err(err) = unit.verify(msg, cl.netchan.incoming_sequence) {
                    tracing::debug!(client = %cl.name, %err, "dropping move");
                    return;
                }

                if ctx.cvars.variable_value("paused") == 0.0 {
                    let mut net_drop = ctx.svs.clients[client_idx].netchan.dropped;
                    if net_drop < 20 {
                        while net_drop > 2 {
                            let lastcmd = ctx.svs.clients[client_idx].lastcmd;
                            sv_client_think(ctx, client_idx, &lastcmd);
                            net_drop -= 1;
                        }
                        if net_drop > 1 {
                            sv_client_think(ctx, client_idx, &unit.oldest);
                        }
                        if net_drop > 0 {
                            sv_client_think(ctx, client_idx, &unit.oldcmd);
                        }
                    }
                    sv_client_think(ctx, client_idx, &unit.newcmd);
                }

                ctx.svs.clients[client_idx].lastcmd = unit.newcmd;
            }

            CLC_STRINGCMD => {
                let s = msg_read_string(msg);

                // malicious users may try using too many string commands
                string_cmd_count += 1;
                if string_cmd_count < MAX_STRINGCMDS {
                    if let Err(reason) = sv_execute_user_command(ctx, client_idx, &s) {
                        sv_drop_client(ctx, client_idx, &reason);
                    }
                }

                if ctx.svs.clients[client_idx].state == ClientState::Zombie {
                    return; // disconnect command
                }
            }

            _ => {
                com_printf("SV_ReadClientMessage: unknown command char\n");
                sv_drop_client(ctx, client_idx, &DropReason::UnknownCommand(c));
                return;
            }
        }
    }
}

/// Runs a packet from a client through its channel and executes it.
pub fn sv_read_packet(ctx: &mut ServerContext, client_idx: usize, packet: &[u8]) {
    let realtime = ctx.svs.realtime;
    let cl = &mut ctx.svs.clients[client_idx];
    if cl.state == ClientState::Free || cl.state == ClientState::Zombie {
        return;
    }

    let mut msg = SizeBuf::from_bytes(packet);
    if let Err(err) = cl.netchan.process(&mut msg, realtime) {
        tracing::debug!(client = %cl.name, %err, "discarding packet");
        return;
    }
    sv_execute_client_message(ctx, client_idx, &mut msg);
}
