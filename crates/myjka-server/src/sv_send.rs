// sv_send.rs — reliable server commands and per-frame client sends
// Converted from: myjka-original/server/sv_main.cpp (SV_SendServerCommand)
// and sv_snapshot.cpp (send side)
//
// Copyright (C) 1999-2005, Id Software, Inc.
// Copyright (C) 2013-2015, OpenJK contributors
// Licensed under the GNU General Public License v2.

use crate::server::*;
use crate::sv_client::{sv_drop_client, sv_write_download_to_client};
use myjka_common::common::{
    com_printf, msg_write_byte, msg_write_delta_player_state, msg_write_long, msg_write_short,
    msg_write_string, sys_milliseconds,
};
use myjka_common::net_chan::{netchan_transmit, netchan_transmit_next_fragment};
use myjka_common::q_shared::{PlayerState, MAX_STRING_CHARS};
use myjka_common::qcommon::*;

// ============================================================
// SV_AddServerCommand
//
// The given command will be transmitted to the client, and is guaranteed
// to not have future snapshot_t executed before it is executed
// ============================================================

pub fn sv_add_server_command(ctx: &mut ServerContext, client_idx: usize, cmd: &str) {
    let overflowed;
    {
        let cl = &mut ctx.svs.clients[client_idx];
        cl.reliable_sequence += 1;

        // if we would be losing an old command that hasn't been acknowledged,
        // we must drop the connection
        overflowed = cl.reliable_sequence - cl.reliable_acknowledge
            == MAX_RELIABLE_COMMANDS as i32 + 1;
        if !overflowed {
            let index = (cl.reliable_sequence as usize) & (MAX_RELIABLE_COMMANDS - 1);
            cl.reliable_commands[index] = cmd.to_string();
        }
    }

    if overflowed {
        {
            let cl = &ctx.svs.clients[client_idx];
            com_printf("===== pending server commands =====\n");
            for i in (cl.reliable_acknowledge + 1)..=cl.reliable_sequence {
                com_printf(&format!(
                    "cmd {:5}: {}\n",
                    i,
                    cl.reliable_commands[(i as usize) & (MAX_RELIABLE_COMMANDS - 1)]
                ));
            }
            com_printf(&format!("cmd {:5}: {}\n", cl.reliable_sequence, cmd));
        }
        sv_drop_client(ctx, client_idx, "Server command overflow");
    }
}

// ============================================================
// SV_SendServerCommand
//
// Sends a reliable command string to be interpreted by the client game
// module. A target of None broadcasts to all connected clients.
// ============================================================

pub fn sv_send_server_command(ctx: &mut ServerContext, target: Option<usize>, cmd: &str) {
    if cmd.len() + 1 >= MAX_STRING_CHARS {
        com_printf("sv_send_server_command: command too long, dropped\n");
        return;
    }

    if let Some(idx) = target {
        if ctx.svs.clients[idx].state < ClientState::Connected {
            return;
        }
        sv_add_server_command(ctx, idx, cmd);
        return;
    }

    // echo broadcast prints to the console
    if let Some(text) = cmd.strip_prefix("print ") {
        com_printf(&format!(
            "broadcast: {}\n",
            myjka_common::q_shared::q_strip_color(text)
        ));
    }

    for i in 0..ctx.svs.clients.len() {
        if ctx.svs.clients[i].state < ClientState::Connected {
            continue;
        }
        sv_add_server_command(ctx, i, cmd);
    }
}

// ============================================================
// SV_UpdateServerCommandsToClient
//
// (re)send all server commands the client hasn't acknowledged yet
// ============================================================

pub fn sv_update_server_commands_to_client(cl: &mut Client, msg: &mut SizeBuf) {
    for i in (cl.reliable_acknowledge + 1)..=cl.reliable_sequence {
        msg_write_byte(msg, SvcOps::ServerCommand as i32);
        msg_write_long(msg, i);
        msg_write_string(
            msg,
            &cl.reliable_commands[(i as usize) & (MAX_RELIABLE_COMMANDS - 1)],
        );
    }
}

// ============================================================
// SV_SendMessageToClient
//
// Called by SV_SendClientSnapshot and SV_SendClientGameState
// ============================================================

pub fn sv_send_message_to_client(ctx: &mut ServerContext, msg: &SizeBuf, client_idx: usize) {
    // record information about the message so the round trip can be timed
    // when the client acknowledges it
    let svs_time = ctx.svs.time;
    {
        let cl = &mut ctx.svs.clients[client_idx];
        let seq_index = (cl.netchan.outgoing_sequence as usize) & PACKET_MASK;
        cl.frames[seq_index].message_sent = svs_time;
        cl.frames[seq_index].message_acked = -1;
    }

    let data = msg.data[..msg.cursize as usize].to_vec();
    let curtime = sys_milliseconds();
    netchan_transmit(&mut ctx.svs.clients[client_idx].netchan, &data, curtime);
}

// ============================================================
// SV_WriteSnapshotToClient
//
// The entity delta set is built by the snapshot module; the connection
// core writes the frame header and player state, which is all a client
// needs while priming or failing the purity check.
// ============================================================

fn sv_write_snapshot_to_client(ctx: &mut ServerContext, client_idx: usize, msg: &mut SizeBuf) {
    let sv_time = ctx.sv.time;
    let (delta_num, state) = {
        let cl = &ctx.svs.clients[client_idx];
        let delta = if cl.delta_message <= 0 || cl.state != ClientState::Active {
            0 // no compression
        } else {
            cl.netchan.outgoing_sequence - cl.delta_message
        };
        (delta, cl.state)
    };

    msg_write_byte(msg, SvcOps::Snapshot as i32);
    msg_write_long(msg, sv_time);
    msg_write_byte(msg, delta_num);
    msg_write_byte(msg, 0); // snapFlags

    let null_ps = PlayerState::default();
    let ps = ctx
        .game
        .as_ref()
        .and_then(|ge| ge.player_state(client_idx))
        .copied()
        .unwrap_or_default();
    msg_write_delta_player_state(msg, &null_ps, &ps);

    // end of entities
    msg_write_short(msg, (MAX_GENTITIES - 1) as i32);
}

// ============================================================
// SV_SendClientSnapshot
// ============================================================

pub fn sv_send_client_snapshot(ctx: &mut ServerContext, client_idx: usize) {
    let mut msg = SizeBuf::new(MAX_MSGLEN as i32);
    msg.allow_overflow = true;

    // NOTE, MRE: all server->client messages now acknowledge
    // let the client know which reliable clientCommands we have received
    msg_write_long(&mut msg, ctx.svs.clients[client_idx].last_client_command);

    // (re)send any reliable server commands
    sv_update_server_commands_to_client(&mut ctx.svs.clients[client_idx], &mut msg);

    // send over all the relevant entityState_t and the playerState_t
    sv_write_snapshot_to_client(ctx, client_idx, &mut msg);

    // data about a file the client is downloading rides along
    sv_write_download_to_client(ctx, client_idx, &mut msg);

    if msg.overflowed {
        com_printf(&format!(
            "WARNING: msg overflowed for {}\n",
            ctx.svs.clients[client_idx].name
        ));
        return;
    }

    sv_send_message_to_client(ctx, &msg, client_idx);
}

// ============================================================
// SV_SendClientMessages
// ============================================================

pub fn sv_send_client_messages(ctx: &mut ServerContext) {
    let svs_time = ctx.svs.time;

    for i in 0..ctx.svs.clients.len() {
        let (state, unsent, next_snapshot_time, snapshot_msec) = {
            let cl = &ctx.svs.clients[i];
            (
                cl.state,
                cl.netchan.unsent_fragments,
                cl.next_snapshot_time,
                cl.snapshot_msec,
            )
        };

        if state == ClientState::Free || state == ClientState::Zombie {
            continue;
        }

        if unsent {
            // send additional message fragments if the last message was
            // too large to send at once
            let curtime = sys_milliseconds();
            netchan_transmit_next_fragment(&mut ctx.svs.clients[i].netchan, curtime);
            continue;
        }

        if svs_time < next_snapshot_time {
            continue;
        }

        sv_send_client_snapshot(ctx, i);
        ctx.svs.clients[i].next_snapshot_time = svs_time + snapshot_msec;
    }
}

// ============================================================
// Tests
// ============================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sv_init::sv_init;

    fn make_test_server_context() -> ServerContext {
        let mut ctx = ServerContext::default();
        ctx.cvars.set("sv_maxclients", "4");
        sv_init(&mut ctx);
        ctx.sv.state = ServerState::Game;
        for i in 0..4 {
            ctx.svs.clients[i].name = format!("player{}", i);
        }
        ctx
    }

    #[test]
    fn test_add_server_command_ring() {
        let mut ctx = make_test_server_context();
        ctx.svs.clients[0].state = ClientState::Active;

        sv_add_server_command(&mut ctx, 0, "print \"one\"");
        sv_add_server_command(&mut ctx, 0, "print \"two\"");

        let cl = &ctx.svs.clients[0];
        assert_eq!(cl.reliable_sequence, 2);
        assert_eq!(cl.reliable_commands[1], "print \"one\"");
        assert_eq!(cl.reliable_commands[2], "print \"two\"");
    }

    #[test]
    fn test_command_overflow_drops_client() {
        let mut ctx = make_test_server_context();
        ctx.svs.clients[0].state = ClientState::Active;

        // never acknowledge anything; the ring fills and the client drops
        for i in 0..=MAX_RELIABLE_COMMANDS {
            sv_add_server_command(&mut ctx, 0, &format!("cs 1 \"{}\"", i));
        }
        assert_eq!(ctx.svs.clients[0].state, ClientState::Zombie);
    }

    #[test]
    fn test_send_server_command_broadcast() {
        let mut ctx = make_test_server_context();
        ctx.svs.clients[0].state = ClientState::Active;
        ctx.svs.clients[2].state = ClientState::Connected;

        sv_send_server_command(&mut ctx, None, "chat \"hello\"");
        assert_eq!(ctx.svs.clients[0].reliable_sequence, 1);
        assert_eq!(ctx.svs.clients[1].reliable_sequence, 0); // free slot skipped
        assert_eq!(ctx.svs.clients[2].reliable_sequence, 1);
    }

    #[test]
    fn test_send_server_command_too_long_dropped() {
        let mut ctx = make_test_server_context();
        ctx.svs.clients[0].state = ClientState::Active;
        let long = format!("print \"{}\"", "x".repeat(MAX_STRING_CHARS));
        sv_send_server_command(&mut ctx, Some(0), &long);
        assert_eq!(ctx.svs.clients[0].reliable_sequence, 0);
    }

    #[test]
    fn test_update_server_commands_writes_unacknowledged() {
        let mut ctx = make_test_server_context();
        ctx.svs.clients[0].state = ClientState::Active;
        sv_add_server_command(&mut ctx, 0, "cs 3 \"a\"");
        sv_add_server_command(&mut ctx, 0, "cs 4 \"b\"");
        ctx.svs.clients[0].reliable_acknowledge = 1; // first one acked

        let mut msg = SizeBuf::new(2048);
        sv_update_server_commands_to_client(&mut ctx.svs.clients[0], &mut msg);

        use myjka_common::common::{msg_read_byte, msg_read_long, msg_read_string};
        assert_eq!(msg_read_byte(&mut msg), SvcOps::ServerCommand as i32);
        assert_eq!(msg_read_long(&mut msg), 2);
        assert_eq!(msg_read_string(&mut msg), "cs 4 \"b\"");
        // nothing further
        assert_eq!(msg.readcount, msg.cursize);
    }

    #[test]
    fn test_send_message_records_frame_time() {
        let mut ctx = make_test_server_context();
        ctx.svs.clients[0].state = ClientState::Active;
        ctx.svs.time = 4242;

        let seq = ctx.svs.clients[0].netchan.outgoing_sequence as usize;
        let msg = SizeBuf::new(64);
        sv_send_message_to_client(&mut ctx, &msg, 0);

        let frame = &ctx.svs.clients[0].frames[seq & PACKET_MASK];
        assert_eq!(frame.message_sent, 4242);
        assert_eq!(frame.message_acked, -1);
        assert_eq!(ctx.svs.clients[0].netchan.outgoing_sequence as usize, seq + 1);
    }

    #[test]
    fn test_snapshot_loop_respects_next_snapshot_time() {
        let mut ctx = make_test_server_context();
        ctx.svs.clients[0].state = ClientState::Active;
        ctx.svs.time = 1000;
        ctx.svs.clients[0].next_snapshot_time = 5000;

        let seq_before = ctx.svs.clients[0].netchan.outgoing_sequence;
        sv_send_client_messages(&mut ctx);
        assert_eq!(ctx.svs.clients[0].netchan.outgoing_sequence, seq_before);

        ctx.svs.clients[0].next_snapshot_time = 0;
        sv_send_client_messages(&mut ctx);
        assert_eq!(ctx.svs.clients[0].netchan.outgoing_sequence, seq_before + 1);
        assert_eq!(ctx.svs.clients[0].next_snapshot_time, 1000 + ctx.svs.clients[0].snapshot_msec);
    }
}
