// cl_input.rs — packs movement commands and sends them to the server

use q2sync_common::common::{msg_write_byte, msg_write_string};
use q2sync_common::error::NetchanError;
use q2sync_common::movecmd::msg_write_move;
use q2sync_common::q_shared::UserCmd;
use q2sync_common::qcommon::{SizeBuf, CLC_STRINGCMD, CLC_USERINFO};

use crate::client::{ClientContext, ConnState};

/// Resend interval for the reliable stream while waiting for the first frame.
const CONNECTED_RESEND_MSEC: i32 = 1000;

/// Writes the `clc_move` for packet `sequence`. The server acknowledges
/// frames by delta, so the last valid frame goes along unless delta
/// compression is disabled.
pub fn cl_write_move(ctx: &ClientContext, sequence: i32, buf: &mut SizeBuf) {
    let lastframe = if ctx.cvars.variable_value("cl_nodelta") != 0.0 || !ctx.cl.frame.valid {
        -1
    } else {
        ctx.cl.frame.serverframe
    };

    let cmds = &ctx.cl.cmds;
    msg_write_move(
        buf,
        sequence,
        lastframe,
        [cmds.command(sequence - 2), cmds.command(sequence - 1), cmds.command(sequence)],
    );
}

/// Queues a console command for the server on the reliable stream.
pub fn cl_add_string_cmd(ctx: &mut ClientContext, text: &str) {
    let message = &mut ctx.cls.netchan.message;
    msg_write_byte(message, CLC_STRINGCMD);
    msg_write_string(message, text);
}

// ============================================================
// CL_SendCmd
// ============================================================

/// Records `cmd` for prediction and builds the packet to send this frame,
/// if any.
pub fn cl_send_cmd(ctx: &mut ClientContext, cmd: UserCmd) -> Option<Vec<u8>> {
    // save this command off for prediction
    let sequence = ctx.cls.netchan.outgoing_sequence;
    ctx.cl.cmds.push(sequence, cmd, ctx.cls.realtime);

    match ctx.cls.state {
        ConnState::Disconnected | ConnState::Connecting => return None,
        ConnState::Connected => {
            let netchan = &mut ctx.cls.netchan;
            if netchan.message.cursize > 0
                || ctx.cls.realtime - netchan.last_sent > CONNECTED_RESEND_MSEC
            {
                return Some(netchan.transmit(&[], ctx.cls.realtime));
            }
            return None;
        }
        ConnState::Active => {}
    }

    // send a userinfo update if needed
    if ctx.cvars.userinfo_modified {
        ctx.cvars.userinfo_modified = false;
        let userinfo = ctx.cvars.userinfo();
        let message = &mut ctx.cls.netchan.message;
        msg_write_byte(message, CLC_USERINFO);
        msg_write_string(message, &userinfo);
    }

    let mut buf = SizeBuf::new(128);
    cl_write_move(ctx, sequence, &mut buf);

    // deliver the message
    Some(ctx.cls.netchan.transmit(buf.as_slice(), ctx.cls.realtime))
}

/// Runs a received packet through the channel. On success the returned
/// buffer is positioned at the payload.
pub fn cl_read_packet(ctx: &mut ClientContext, packet: &[u8]) -> Result<SizeBuf, NetchanError> {
    let mut msg = SizeBuf::from_bytes(packet);
    ctx.cls.netchan.process(&mut msg, ctx.cls.realtime)?;
    Ok(msg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::PlayerState;
    use q2sync_common::common::{msg_read_byte, msg_read_string};
    use q2sync_common::movecmd::msg_read_move;
    use q2sync_common::net_chan::{NetChan, NetSrc};
    use q2sync_common::q_shared::info_value_for_key;
    use q2sync_common::qcommon::{CLC_MOVE, PACKET_HEADER};

    fn walk(msec: u8) -> UserCmd {
        UserCmd { msec, forwardmove: 200, ..Default::default() }
    }

    fn server_side(packet: &[u8]) -> (NetChan, SizeBuf) {
        let mut chan = NetChan::new(NetSrc::Server, 77, 0);
        let mut msg = SizeBuf::from_bytes(packet);
        chan.process(&mut msg, 0).unwrap();
        (chan, msg)
    }

    #[test]
    fn test_disconnected_only_records() {
        let mut ctx = ClientContext::new();
        ctx.cls.realtime = 500;
        assert!(cl_send_cmd(&mut ctx, walk(16)).is_none());
        let seq = ctx.cls.netchan.outgoing_sequence;
        assert_eq!(ctx.cl.cmds.command(seq).msec, 16);
        assert_eq!(ctx.cl.cmds.time(seq), 500);
    }

    #[test]
    fn test_connected_sends_reliable_only() {
        let mut ctx = ClientContext::new();
        ctx.connect(77);
        assert!(cl_send_cmd(&mut ctx, walk(16)).is_none());

        cl_add_string_cmd(&mut ctx, "new");
        let packet = cl_send_cmd(&mut ctx, walk(16)).unwrap();
        let (_, mut msg) = server_side(&packet);
        assert_eq!(msg_read_byte(&mut msg), CLC_STRINGCMD);
        assert_eq!(msg_read_string(&mut msg), "new");
        assert_eq!(msg.readcount, msg.cursize);
    }

    #[test]
    fn test_connected_keepalive_after_a_second() {
        let mut ctx = ClientContext::new();
        ctx.connect(77);
        ctx.cls.realtime = 1001;
        let packet = cl_send_cmd(&mut ctx, walk(16)).unwrap();
        assert_eq!(packet.len(), PACKET_HEADER + 2);
    }

    #[test]
    fn test_active_sends_userinfo_then_move() {
        let mut ctx = ClientContext::new();
        ctx.connect(77);
        ctx.cvars.set("name", "quaker");
        ctx.set_frame(12, PlayerState::default(), &[]);

        let seq = ctx.cls.netchan.outgoing_sequence;
        ctx.cl.cmds.push(seq - 2, walk(10), 0);
        ctx.cl.cmds.push(seq - 1, walk(11), 0);
        let packet = cl_send_cmd(&mut ctx, walk(12)).unwrap();

        let (chan, mut msg) = server_side(&packet);
        assert_eq!(chan.incoming_sequence, seq);
        assert_eq!(msg_read_byte(&mut msg), CLC_USERINFO);
        let userinfo = msg_read_string(&mut msg);
        assert_eq!(info_value_for_key(&userinfo, "name"), "quaker");

        assert_eq!(msg_read_byte(&mut msg), CLC_MOVE);
        let unit = msg_read_move(&mut msg).unwrap();
        assert_eq!(unit.lastframe, 12);
        assert_eq!([unit.oldest.msec, unit.oldcmd.msec, unit.newcmd.msec], [10, 11, 12]);
        unit.verify(&msg, chan.incoming_sequence).unwrap();
        assert!(!ctx.cvars.userinfo_modified);

        // userinfo goes out once
        let packet = cl_send_cmd(&mut ctx, walk(13)).unwrap();
        let mut msg = SizeBuf::from_bytes(&packet);
        msg.readcount = PACKET_HEADER + 2;
        assert_eq!(msg_read_byte(&mut msg), CLC_MOVE);
    }

    #[test]
    fn test_nodelta_and_invalid_frame_request_full_update() {
        let mut ctx = ClientContext::new();
        ctx.connect(77);
        ctx.set_frame(30, PlayerState::default(), &[]);
        ctx.cvars.set("cl_nodelta", "1");

        let mut buf = SizeBuf::new(128);
        cl_write_move(&ctx, 5, &mut buf);
        let mut msg = SizeBuf::from_bytes(buf.as_slice());
        msg_read_byte(&mut msg);
        assert_eq!(msg_read_move(&mut msg).unwrap().lastframe, -1);

        ctx.cvars.set("cl_nodelta", "0");
        ctx.cl.frame.valid = false;
        let mut buf = SizeBuf::new(128);
        cl_write_move(&ctx, 5, &mut buf);
        let mut msg = SizeBuf::from_bytes(buf.as_slice());
        msg_read_byte(&mut msg);
        assert_eq!(msg_read_move(&mut msg).unwrap().lastframe, -1);
    }

    #[test]
    fn test_read_packet_updates_acknowledge() {
        let mut ctx = ClientContext::new();
        ctx.connect(77);
        let mut server = NetChan::new(NetSrc::Server, 77, 0);

        // pretend the server has seen our first three packets
        server.incoming_sequence = 3;
        let packet = server.transmit(&[1, 2], 0);
        let mut msg = cl_read_packet(&mut ctx, &packet).unwrap();
        assert_eq!(ctx.cls.netchan.incoming_acknowledged, 3);
        assert_eq!(msg_read_byte(&mut msg), 1);

        assert!(cl_read_packet(&mut ctx, &packet).is_err());
    }
}
