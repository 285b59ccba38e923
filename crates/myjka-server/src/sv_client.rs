// sv_client.rs — server code for dealing with clients
// Converted from: myjka-original/server/sv_client.cpp
//
// Copyright (C) 1999-2005, Id Software, Inc.
// Copyright (C) 2013-2015, OpenJK contributors
// Licensed under the GNU General Public License v2.

use crate::server::*;
use crate::sv_init::{sv_get_configstring, sv_update_configstrings};
use crate::sv_main::sv_heartbeat_f;
use crate::sv_send::{
    sv_add_server_command, sv_send_client_snapshot, sv_send_message_to_client,
    sv_send_server_command, sv_update_server_commands_to_client,
};
use crate::sv_smod;

use md4::{Digest, Md4};
use myjka_common::cmd::CmdArgs;
use myjka_common::common::{
    com_dprintf, com_error, com_printf, msg_read_byte, msg_read_long,
    msg_read_delta_usercmd_key, msg_read_string, msg_write_big_string, msg_write_byte,
    msg_write_data, msg_write_delta_entity, msg_write_long, msg_write_short, msg_write_string,
    sys_milliseconds,
};
use myjka_common::net::{net_adr_to_string, net_compare_adr, net_compare_base_adr,
    net_compare_base_adr_mask, net_is_local_address, sys_is_lan_address};
use myjka_common::net_chan::{netchan_out_of_band_print, netchan_setup, netchan_transmit_next_fragment};
use myjka_common::q_shared::*;
use myjka_common::qcommon::*;

use std::io::Read;

/// Byte-safe truncation that never splits a UTF-8 sequence.
fn truncate_bytes(s: &str, max: usize) -> String {
    if s.len() < max {
        return s.to_string();
    }
    let mut end = max;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    s[..end].to_string()
}

/// Case-insensitive prefix compare, the Q_stricmpn(cmd, prefix, n) idiom.
fn stricmp_prefix(s: &str, prefix: &str) -> bool {
    s.len() >= prefix.len()
        && s.as_bytes()[..prefix.len()].eq_ignore_ascii_case(prefix.as_bytes())
}

// ============================================================
// SV_CreateChallenge / SV_VerifyChallenge
//
// The challenge is a keyed digest of the connecting address, so the
// same server can verify it later without keeping a table of
// outstanding challenges. Clients can't forge one for a spoofed source
// address without the secret.
// ============================================================

pub fn sv_create_challenge(key: &[u8; 16], from: &NetAdr) -> i32 {
    let mut hasher = Md4::new();
    hasher.update(key);
    // qport and source port change across reconnects; only the base
    // address feeds the digest
    hasher.update(from.ip);
    let digest = hasher.finalize();
    let challenge =
        i32::from_le_bytes([digest[0], digest[1], digest[2], digest[3]]) & 0x7fff_ffff;
    if challenge == 0 {
        1
    } else {
        challenge
    }
}

pub fn sv_verify_challenge(key: &[u8; 16], challenge: i32, from: &NetAdr) -> bool {
    challenge == sv_create_challenge(key, from)
}

// ============================================================
// SV_GetChallenge
//
// A "getchallenge" OOB command has been received. Returns a challenge
// number that can be used in a subsequent connect command. This
// prevents denial of service attacks that flood the server with
// invalid connection IPs: with a challenge, they must give a valid IP
// address. The client's own challenge is echoed back so malicious
// servers can't hi-jack client connections.
// ============================================================

pub fn sv_get_challenge(ctx: &mut ServerContext, args: &CmdArgs) {
    // ignore if we are in single player
    if ctx.cvars.variable_integer("ui_singlePlayerActive") != 0 {
        return;
    }

    let challenge = sv_create_challenge(&ctx.svs.challenge_key, &ctx.net_from);
    let client_challenge: i32 = args.argv(1).parse().unwrap_or(0);

    netchan_out_of_band_print(
        NetSrc::Server,
        &ctx.net_from,
        &format!("challengeResponse {} {}", challenge, client_challenge),
    );
}

// ============================================================
// SV_IsBanned
//
// Check whether a certain address is banned
// ============================================================

fn sv_is_banned(ctx: &ServerContext, from: &NetAdr, is_exception: bool) -> bool {
    if ctx.server_bans.is_empty() {
        return false;
    }

    if !is_exception {
        // If this is a query for a ban, first check whether the client is excepted
        if sv_is_banned(ctx, from, true) {
            return false;
        }
    }

    for ban in &ctx.server_bans {
        if ban.is_exception == is_exception
            && net_compare_base_adr_mask(&ban.ip, from, ban.subnet)
        {
            return true;
        }
    }

    false
}

// ============================================================
// SV_DirectConnect
//
// A "connect" OOB command has been received
// ============================================================

pub fn sv_direct_connect(ctx: &mut ServerContext, args: &CmdArgs) {
    let from = ctx.net_from;

    com_dprintf("SVC_DirectConnect ()\n");

    // Check whether this client is banned.
    if sv_is_banned(ctx, &from, false) {
        netchan_out_of_band_print(
            NetSrc::Server,
            &from,
            "print\nYou are banned from this server.\n",
        );
        com_dprintf(&format!(
            "    rejected connect from {} (banned)\n",
            net_adr_to_string(&from)
        ));
        return;
    }

    let mut userinfo = truncate_bytes(args.argv(1), MAX_INFO_STRING - 1);

    let version: i32 = info_value_for_key(&userinfo, "protocol").parse().unwrap_or(0);
    if version != PROTOCOL_VERSION {
        netchan_out_of_band_print(
            NetSrc::Server,
            &from,
            &format!(
                "print\nServer uses protocol version {} (yours is {}).\n",
                PROTOCOL_VERSION, version
            ),
        );
        com_dprintf(&format!("    rejected connect from version {}\n", version));
        return;
    }

    let challenge: i32 = info_value_for_key(&userinfo, "challenge").parse().unwrap_or(0);
    let qport: i32 = info_value_for_key(&userinfo, "qport").parse().unwrap_or(0);

    // quick reject — a slot for this address that connected too recently
    let reconnect_limit = ctx.cvars.variable_integer("sv_reconnectlimit");
    for cl in &ctx.svs.clients {
        if net_compare_base_adr(&from, &cl.netchan.remote_address)
            && (cl.netchan.qport == qport || from.port == cl.netchan.remote_address.port)
        {
            if (ctx.svs.time - cl.last_connect_time) < reconnect_limit * 1000 {
                netchan_out_of_band_print(
                    NetSrc::Server,
                    &from,
                    "print\nReconnect rejected : too soon\n",
                );
                com_dprintf(&format!(
                    "{}:reconnect rejected : too soon\n",
                    net_adr_to_string(&from)
                ));
                return;
            }
            break;
        }
    }

    // don't let "ip" overflow the userinfo string
    let ip = if net_is_local_address(&from) {
        "localhost".to_string()
    } else {
        net_adr_to_string(&from)
    };
    if ip.len() + userinfo.len() + 4 >= MAX_INFO_STRING {
        netchan_out_of_band_print(
            NetSrc::Server,
            &from,
            "print\nUserinfo string length exceeded.  Try removing setu cvars from your config.\n",
        );
        return;
    }
    info_set_value_for_key(&mut userinfo, "ip", &ip);

    // see if the challenge is valid (localhost clients don't need to challenge)
    if !net_is_local_address(&from) {
        if !sv_verify_challenge(&ctx.svs.challenge_key, challenge, &from) {
            netchan_out_of_band_print(
                NetSrc::Server,
                &from,
                "print\nIncorrect challenge for your address.\n",
            );
            return;
        }
    }

    // if there is already a slot for this ip, reuse it
    let mut newcl_index: Option<usize> = None;
    for i in 0..ctx.svs.clients.len() {
        if ctx.svs.clients[i].state == ClientState::Free {
            continue;
        }
        let cl = &ctx.svs.clients[i];
        if net_compare_base_adr(&from, &cl.netchan.remote_address)
            && (cl.netchan.qport == qport || from.port == cl.netchan.remote_address.port)
        {
            com_printf(&format!("{}:reconnect\n", net_adr_to_string(&from)));
            // disconnect the client from the game first so any flags the
            // player might have are dropped
            if let Some(ref mut ge) = ctx.game {
                ge.gvm_client_disconnect(i);
            }
            newcl_index = Some(i);
            break;
        }
    }

    if newcl_index.is_none() {
        // if "sv_privateClients" is set > 0, then that number of client
        // slots will be reserved for connections that have "password" set
        // to the value of "sv_privatePassword"
        let password = info_value_for_key(&userinfo, "password");
        let start_index = if password == ctx.cvars.variable_string("sv_privatePassword") {
            0
        } else {
            // skip past the reserved slots
            ctx.cvars.variable_integer("sv_privateClients").max(0) as usize
        };

        for i in start_index..ctx.svs.clients.len() {
            if ctx.svs.clients[i].state == ClientState::Free {
                newcl_index = Some(i);
                break;
            }
        }

        if newcl_index.is_none() {
            if net_is_local_address(&from) {
                let bots = ctx.svs.clients[start_index..]
                    .iter()
                    .filter(|cl| cl.is_bot())
                    .count();
                // if they're all bots
                if bots >= ctx.svs.clients.len() - start_index {
                    let last = ctx.svs.clients.len() - 1;
                    sv_drop_client(ctx, last, "only bots on server");
                    newcl_index = Some(last);
                } else {
                    com_error(ERR_FATAL, "server is full on local connect");
                }
            } else {
                netchan_out_of_band_print(NetSrc::Server, &from, "print\nServer is full.\n");
                com_dprintf("Rejected a connection.\n");
                return;
            }
        }
    }

    let idx = newcl_index.unwrap();

    // build a new connection
    // accept the new client
    // this is the only place a client slot is ever initialized
    ctx.svs.clients[idx] = Client::default();
    {
        let cl = &mut ctx.svs.clients[idx];
        cl.gentity_num = idx as i32;
        cl.challenge = challenge;
        netchan_setup(NetSrc::Server, &mut cl.netchan, from, qport);
        cl.userinfo = userinfo.clone();
    }

    // get the game a chance to reject this connection or modify the userinfo
    let denied = match ctx.game {
        Some(ref mut ge) => ge.gvm_client_connect(idx, &userinfo, true, false),
        None => None,
    };
    if let Some(denied) = denied {
        netchan_out_of_band_print(NetSrc::Server, &from, &format!("print\n{}\n", denied));
        com_dprintf(&format!("Game rejected a connection: {}.\n", denied));
        ctx.svs.clients[idx] = Client::default();
        return;
    }

    if ctx.svs.hibernation.enabled {
        ctx.svs.hibernation.enabled = false;
        com_printf("Server restored from hibernation\n");
    }

    sv_userinfo_changed(ctx, idx);

    // send the connect packet to the client
    netchan_out_of_band_print(NetSrc::Server, &from, "connectResponse");

    com_dprintf(&format!(
        "Going from CS_FREE to CS_CONNECTED for {}\n",
        ctx.svs.clients[idx].name
    ));

    let svs_time = ctx.svs.time;
    {
        let cl = &mut ctx.svs.clients[idx];
        cl.state = ClientState::Connected;
        cl.next_snapshot_time = svs_time;
        cl.last_packet_time = svs_time;
        cl.last_connect_time = svs_time;

        // when we receive the first packet from the client, we will notice
        // that it is from a different serverid and that the gamestate
        // message was not just sent, forcing a retransmit
        cl.gamestate_message_num = -1;

        cl.last_user_info_change = 0; // reset the delay
        cl.last_user_info_count = 0; // reset the count
    }

    // if this was the first client on the server, or the last client the
    // server can hold, send a heartbeat to the master
    let count = ctx.connected_count();
    if count == 1 || count == ctx.svs.clients.len() {
        sv_heartbeat_f(ctx);
    }
}

// ============================================================
// SV_DropClient
//
// Called when the player is totally leaving the server, either
// willingly or unwillingly. This is NOT called if the entire server is
// quiting or crashing.
// ============================================================

pub fn sv_drop_client(ctx: &mut ServerContext, client_idx: usize, reason: &str) {
    if ctx.svs.clients[client_idx].state == ClientState::Zombie {
        return; // already dropped
    }

    let is_bot = ctx.svs.clients[client_idx].is_bot();

    // Kill any download
    sv_close_download(&mut ctx.svs.clients[client_idx]);

    // tell everyone why they got dropped
    let name = ctx.svs.clients[client_idx].name.clone();
    sv_send_server_command(
        ctx,
        None,
        &format!("print \"{}{} {}\n\"", name, S_COLOR_WHITE, reason),
    );

    // call the game function for removing a client; this will remove the
    // body, among other things
    if let Some(ref mut ge) = ctx.game {
        ge.gvm_client_disconnect(client_idx);
    }

    // add the disconnect command
    sv_add_server_command(ctx, client_idx, &format!("disconnect \"{}\"", reason));

    // nuke user info
    ctx.svs.clients[client_idx].userinfo.clear();

    if is_bot {
        // bots shouldn't go zombie, as there's no real net connection
        ctx.svs.clients[client_idx].state = ClientState::Free;
        ctx.svs.clients[client_idx].name.clear();
    } else {
        com_dprintf(&format!(
            "Going to CS_ZOMBIE for {}\n",
            ctx.svs.clients[client_idx].name
        ));
        ctx.svs.clients[client_idx].state = ClientState::Zombie; // become free in a few seconds
    }

    if ctx.svs.clients[client_idx].demo_recording {
        ctx.svs.clients[client_idx].demo_recording = false;
    }

    // if this was the last client on the server, send a heartbeat to the
    // master so it is known the server is empty
    if ctx.connected_count() == 0 {
        sv_heartbeat_f(ctx);
    }

    let humans = ctx
        .svs
        .clients
        .iter()
        .any(|cl| cl.state >= ClientState::Connected && !cl.is_bot());
    if !humans {
        ctx.svs.hibernation.last_time_disconnected = sys_milliseconds();
    }
}

// ============================================================
// SV_SendClientGameState
//
// Sends the first message from the server to a connected client. This
// will be sent on the initial connection and upon each new map load.
// It will be resent if the client acknowledges a later message but has
// the wrong gamestate.
// ============================================================

fn sv_create_client_game_state_message(ctx: &mut ServerContext, client_idx: usize, msg: &mut SizeBuf) {
    // NOTE, MRE: all server->client messages now acknowledge
    // let the client know which reliable clientCommands we have received
    msg_write_long(msg, ctx.svs.clients[client_idx].last_client_command);

    // send any server commands waiting to be sent first; we have to do
    // this because we send the client->reliableSequence with the
    // gamestate and it sets the clc.serverCommandSequence on the client
    sv_update_server_commands_to_client(&mut ctx.svs.clients[client_idx], msg);

    // send the gamestate
    msg_write_byte(msg, SvcOps::Gamestate as i32);
    msg_write_long(msg, ctx.svs.clients[client_idx].reliable_sequence);

    // write the configstrings
    for start in 0..MAX_CONFIGSTRINGS {
        if !ctx.sv.configstrings[start].is_empty() {
            msg_write_byte(msg, SvcOps::ConfigString as i32);
            msg_write_short(msg, start as i32);
            msg_write_big_string(msg, &ctx.sv.configstrings[start]);
        }
    }

    // write the baselines
    let nullstate = EntityState::default();
    for start in 0..MAX_GENTITIES {
        if ctx.sv.baselines[start].number == 0 {
            continue;
        }
        let base = ctx.sv.baselines[start];
        msg_write_byte(msg, SvcOps::Baseline as i32);
        msg_write_delta_entity(msg, &nullstate, &base, true);
    }

    msg_write_byte(msg, SvcOps::EOF as i32);

    msg_write_long(msg, client_idx as i32);

    // write the checksum feed
    msg_write_long(msg, ctx.sv.checksum_feed);

    // for the old RMG system
    msg_write_short(msg, 0);
}

pub fn sv_send_client_game_state(ctx: &mut ServerContext, client_idx: usize) {
    // write out pending fragments first, so the (large) gamestate can't
    // interleave with a previous fragmented message
    while ctx.svs.clients[client_idx].state != ClientState::Free
        && ctx.svs.clients[client_idx].netchan.unsent_fragments
    {
        com_printf(&format!(
            "[ISM]sv_send_client_game_state() for {}, writing out old fragments\n",
            ctx.svs.clients[client_idx].name
        ));
        let curtime = sys_milliseconds();
        netchan_transmit_next_fragment(&mut ctx.svs.clients[client_idx].netchan, curtime);
    }

    com_dprintf(&format!(
        "sv_send_client_game_state() for {}\n",
        ctx.svs.clients[client_idx].name
    ));
    com_dprintf(&format!(
        "Going from CS_CONNECTED to CS_PRIMED for {}\n",
        ctx.svs.clients[client_idx].name
    ));

    {
        let cl = &mut ctx.svs.clients[client_idx];
        if cl.state == ClientState::Connected {
            cl.state = ClientState::Primed;
        }
        cl.pure_authentic = 0;
        cl.got_cp = false;

        // when we receive the first packet from the client, we will notice
        // that it is from a different serverid and that the gamestate
        // message was not just sent, forcing a retransmit
        cl.gamestate_message_num = cl.netchan.outgoing_sequence;
    }

    let mut msg = SizeBuf::new(MAX_MSGLEN as i32);
    msg.allow_overflow = true;
    sv_create_client_game_state_message(ctx, client_idx, &mut msg);

    // deliver this to the client
    sv_send_message_to_client(ctx, &msg, client_idx);
}

// ============================================================
// SV_SendClientMapChange
// ============================================================

pub fn sv_send_client_map_change(ctx: &mut ServerContext, client_idx: usize) {
    let mut msg = SizeBuf::new(MAX_MSGLEN as i32);
    msg.allow_overflow = true;

    // let the client know which reliable clientCommands we have received
    msg_write_long(&mut msg, ctx.svs.clients[client_idx].last_client_command);

    // send any server commands waiting to be sent first
    sv_update_server_commands_to_client(&mut ctx.svs.clients[client_idx], &mut msg);

    msg_write_byte(&mut msg, SvcOps::MapChange as i32);

    sv_send_message_to_client(ctx, &msg, client_idx);
}

// ============================================================
// SV_ClientEnterWorld
// ============================================================

pub fn sv_client_enter_world(ctx: &mut ServerContext, client_idx: usize, cmd: Option<&UserCmd>) {
    com_dprintf(&format!(
        "Going from CS_PRIMED to CS_ACTIVE for {}\n",
        ctx.svs.clients[client_idx].name
    ));
    ctx.svs.clients[client_idx].state = ClientState::Active;

    if ctx.cvars.variable_integer("sv_autoWhitelist") != 0 {
        let adr = ctx.svs.clients[client_idx].netchan.remote_address;
        if !ctx.svs.whitelist.iter().any(|a| net_compare_base_adr(a, &adr)) {
            ctx.svs.whitelist.push(adr);
        }
    }

    // resend all configstrings that changed since these are no longer
    // sent when the client is CS_PRIMED
    sv_update_configstrings(ctx, client_idx);

    let svs_time = ctx.svs.time;
    {
        let cl = &mut ctx.svs.clients[client_idx];

        // set up the entity for the client
        cl.gentity_num = client_idx as i32;

        cl.last_user_info_change = 0; // reset the delay
        cl.last_user_info_count = 0; // reset the count

        cl.delta_message = -1;
        cl.next_snapshot_time = svs_time; // generate a snapshot immediately

        cl.last_usercmd = match cmd {
            Some(cmd) => *cmd,
            None => UserCmd::default(),
        };
    }

    // call the game begin function
    if let Some(ref mut ge) = ctx.game {
        ge.gvm_client_begin(client_idx);
    }

    if ctx.cvars.variable_integer("sv_autoDemo") != 0 {
        ctx.svs.clients[client_idx].demo_recording = true;
    }
}

/*
============================================================

CLIENT COMMAND EXECUTION

============================================================
*/

// ============================================================
// SV_CloseDownload
//
// clear/free any download vars
// ============================================================

pub fn sv_close_download(cl: &mut Client) {
    cl.download = None;
    cl.download_name.clear();

    // free the temporary buffer space
    for block in cl.download_blocks.iter_mut() {
        *block = None;
    }
}

// ============================================================
// SV_StopDownload_f
//
// Abort a download if in progress
// ============================================================

fn sv_stop_download_f(ctx: &mut ServerContext, client_idx: usize, _args: &CmdArgs) {
    if ctx.svs.clients[client_idx].state == ClientState::Active {
        return;
    }

    if !ctx.svs.clients[client_idx].download_name.is_empty() {
        com_dprintf(&format!(
            "clientDownload: {} : file \"{}\" aborted\n",
            client_idx, ctx.svs.clients[client_idx].download_name
        ));
    }

    sv_close_download(&mut ctx.svs.clients[client_idx]);
}

// ============================================================
// SV_DoneDownload_f
//
// Downloads are finished
// ============================================================

fn sv_done_download_f(ctx: &mut ServerContext, client_idx: usize, _args: &CmdArgs) {
    if ctx.svs.clients[client_idx].state == ClientState::Active {
        return;
    }

    com_dprintf(&format!(
        "clientDownload: {} Done\n",
        ctx.svs.clients[client_idx].name
    ));

    // resend the game state to update any clients that entered during the download
    sv_send_client_game_state(ctx, client_idx);
}

// ============================================================
// SV_NextDownload_f
//
// The argument will be the last acknowledged block from the client, it
// should be the same as cl->downloadClientBlock
// ============================================================

fn sv_next_download_f(ctx: &mut ServerContext, client_idx: usize, args: &CmdArgs) {
    let block: i32 = args.argv(1).parse().unwrap_or(0);

    if ctx.svs.clients[client_idx].state == ClientState::Active {
        return;
    }

    let svs_time = ctx.svs.time;
    {
        let cl = &mut ctx.svs.clients[client_idx];
        if block == cl.download_client_block {
            com_dprintf(&format!(
                "clientDownload: {} : client acknowledge of block {}\n",
                client_idx, block
            ));

            // find out if we are done. A zero-length block indicates EOF
            if cl.download_block_size[(cl.download_client_block as usize) % MAX_DOWNLOAD_WINDOW]
                == 0
            {
                com_printf(&format!(
                    "clientDownload: {} : file \"{}\" completed\n",
                    client_idx, cl.download_name
                ));
                sv_close_download(cl);
                return;
            }

            cl.download_send_time = svs_time;
            cl.download_client_block += 1;
            return;
        }
    }

    // we aren't getting an acknowledge for the correct block, drop the client
    sv_drop_client(ctx, client_idx, "broken download");
}

// ============================================================
// SV_BeginDownload_f
// ============================================================

fn sv_begin_download_f(ctx: &mut ServerContext, client_idx: usize, args: &CmdArgs) {
    if ctx.svs.clients[client_idx].state == ClientState::Active {
        return;
    }

    // kill any existing download
    sv_close_download(&mut ctx.svs.clients[client_idx]);

    // the download name being set is what causes the per-snapshot writer
    // to open the file and start pumping the client
    ctx.svs.clients[client_idx].download_name = truncate_bytes(args.argv(1), MAX_QPATH - 1);
}

// ============================================================
// SV_WriteDownloadToClient
//
// Check to see if the client wants a file, open it if needed and start
// pumping the client. Fill up msg with data.
// ============================================================

pub fn sv_write_download_to_client(ctx: &mut ServerContext, client_idx: usize, msg: &mut SizeBuf) {
    if ctx.svs.clients[client_idx].download_name.is_empty() {
        return; // nothing being downloaded
    }

    if ctx.svs.clients[client_idx].download.is_none() {
        let name = ctx.svs.clients[client_idx].download_name.clone();

        // chop off the filename extension
        let mut unreferenced = true;
        let mut id_pack = false;
        let mut mission_pack = false;
        if let Some((base, ext)) = name.rsplit_once('.') {
            if ext.eq_ignore_ascii_case("pk3") {
                // check whether the file appears in the list of referenced
                // paks to prevent downloading of arbitrary files
                if ctx.fs.is_referenced(base) {
                    unreferenced = false;

                    // now that we know the file is referenced, check
                    // whether it's legal to download it
                    mission_pack = base.to_ascii_lowercase().starts_with("missionpack");
                    id_pack = mission_pack || ctx.fs.is_id_pak(base);
                }
            }
        }

        let allow_download = ctx.cvars.variable_integer("sv_allowDownload") != 0;

        let mut error_message: Option<String> = None;
        if unreferenced {
            com_printf(&format!(
                "clientDownload: {} : \"{}\" is not referenced and cannot be downloaded.\n",
                client_idx, name
            ));
            error_message = Some(format!(
                "File \"{}\" is not referenced and cannot be downloaded.",
                name
            ));
        } else if id_pack {
            com_printf(&format!(
                "clientDownload: {} : \"{}\" cannot download id pk3 files\n",
                client_idx, name
            ));
            if mission_pack {
                error_message = Some(format!(
                    "Cannot autodownload Team Arena file \"{}\"\nThe Team Arena mission pack can be found in your local game store.",
                    name
                ));
            } else {
                error_message = Some(format!("Cannot autodownload id pk3 file \"{}\"", name));
            }
        } else if !allow_download {
            com_printf(&format!(
                "clientDownload: {} : \"{}\" download disabled\n",
                client_idx, name
            ));
            if ctx.cvars.variable_integer("sv_pure") != 0 {
                error_message = Some(format!(
                    "Could not download \"{}\" because autodownloading is disabled on the server.\n\nYou will need to get this file elsewhere before you can connect to this pure server.\n",
                    name
                ));
            } else {
                error_message = Some(format!(
                    "Could not download \"{}\" because autodownloading is disabled on the server.\n\nThe server you are connecting to is not a pure server, set autodownload to No in your settings and you might be able to join the game anyway.\n",
                    name
                ));
            }
        } else {
            match ctx.fs.open_download(&name) {
                Ok((file, size)) => {
                    let cl = &mut ctx.svs.clients[client_idx];
                    cl.download = Some(file);
                    cl.download_size = size;
                }
                Err(_) => {
                    // this is NOT supposed to happen unless there is a bug
                    // in our filesystem scheme: if the pk3 is referenced,
                    // it must have been found somewhere in the filesystem
                    com_printf(&format!(
                        "clientDownload: {} : \"{}\" file not found on server\n",
                        client_idx, name
                    ));
                    error_message = Some(format!(
                        "File \"{}\" not found on server for autodownloading.\n",
                        name
                    ));
                }
            }
        }

        if let Some(error_message) = error_message {
            // cannot auto-download file
            msg_write_byte(msg, SvcOps::Download as i32);
            msg_write_short(msg, 0); // client is expecting block zero
            msg_write_long(msg, -1); // illegal file size
            msg_write_string(msg, &error_message);

            let cl = &mut ctx.svs.clients[client_idx];
            cl.download_name.clear();
            cl.download = None;
            return;
        }

        com_printf(&format!(
            "clientDownload: {} : beginning \"{}\"\n",
            client_idx, name
        ));

        // init
        let cl = &mut ctx.svs.clients[client_idx];
        cl.download_current_block = 0;
        cl.download_client_block = 0;
        cl.download_xmit_block = 0;
        cl.download_count = 0;
        cl.download_eof = false;
    }

    let svs_time = ctx.svs.time;

    {
        let cl = &mut ctx.svs.clients[client_idx];

        // perform any reads that we need to
        while cl.download_current_block - cl.download_client_block < MAX_DOWNLOAD_WINDOW as i32
            && cl.download_size != cl.download_count
        {
            let curindex = (cl.download_current_block as usize) % MAX_DOWNLOAD_WINDOW;

            if cl.download_blocks[curindex].is_none() {
                cl.download_blocks[curindex] = Some(vec![0u8; MAX_DOWNLOAD_BLKSIZE]);
            }

            let block = cl.download_blocks[curindex].as_mut().unwrap();
            let mut read = 0usize;
            if let Some(ref mut file) = cl.download {
                while read < MAX_DOWNLOAD_BLKSIZE {
                    match file.read(&mut block[read..]) {
                        Ok(0) => break,
                        Ok(n) => read += n,
                        Err(_) => break,
                    }
                }
            }
            cl.download_block_size[curindex] = read as i32;

            if read == 0 {
                // EOF right now
                cl.download_count = cl.download_size;
                break;
            }

            cl.download_count += read as i32;

            // load in next block
            cl.download_current_block += 1;
        }

        // check to see if we have an eof condition and add the EOF block
        if cl.download_count == cl.download_size
            && !cl.download_eof
            && cl.download_current_block - cl.download_client_block < MAX_DOWNLOAD_WINDOW as i32
        {
            cl.download_block_size[(cl.download_current_block as usize) % MAX_DOWNLOAD_WINDOW] = 0;
            cl.download_current_block += 1;
            cl.download_eof = true; // we have added the EOF block
        }
    }

    // based on the rate, how many bytes can we fit in the snapMsec time of the client
    let mut rate = ctx.svs.clients[client_idx].rate;
    let max_rate = ctx.cvars.variable_integer("sv_maxRate");
    if max_rate != 0 {
        if max_rate < 1000 {
            ctx.cvars.set("sv_maxRate", "1000");
        }
        if max_rate < rate {
            rate = max_rate;
        }
    }

    let snapshot_msec = ctx.svs.clients[client_idx].snapshot_msec;
    let mut blockspersnap = if rate == 0 {
        1
    } else {
        (rate * snapshot_msec / 1000 + MAX_DOWNLOAD_BLKSIZE as i32) / MAX_DOWNLOAD_BLKSIZE as i32
    };
    if blockspersnap < 0 {
        blockspersnap = 1;
    }

    let cl = &mut ctx.svs.clients[client_idx];
    while blockspersnap > 0 {
        blockspersnap -= 1;

        // write out the next section of the file, if we have already
        // reached our window, automatically start retransmitting
        if cl.download_client_block == cl.download_current_block {
            return; // nothing to transmit
        }

        if cl.download_xmit_block == cl.download_current_block {
            // we have transmitted the complete window, should we start resending?
            if svs_time - cl.download_send_time > 1000 {
                cl.download_xmit_block = cl.download_client_block;
            } else {
                return;
            }
        }

        // send current block
        let curindex = (cl.download_xmit_block as usize) % MAX_DOWNLOAD_WINDOW;

        msg_write_byte(msg, SvcOps::Download as i32);
        msg_write_short(msg, cl.download_xmit_block);

        // block zero is special, contains file size
        if cl.download_xmit_block == 0 {
            msg_write_long(msg, cl.download_size);
        }

        msg_write_short(msg, cl.download_block_size[curindex]);

        // write the block
        if cl.download_block_size[curindex] > 0 {
            let size = cl.download_block_size[curindex] as usize;
            let block = cl.download_blocks[curindex].as_ref().unwrap();
            msg_write_data(msg, &block[..size]);
        }

        com_dprintf(&format!(
            "clientDownload: {} : writing block {}\n",
            client_idx, cl.download_xmit_block
        ));

        // move on to the next block; it will get sent with next snapshot.
        // The rate will keep us in line.
        cl.download_xmit_block += 1;
        cl.download_send_time = svs_time;
    }
}

// ============================================================
// SV_Disconnect_f
//
// The client is going to disconnect, so remove the connection immediately
// ============================================================

fn sv_disconnect_f(ctx: &mut ServerContext, client_idx: usize, _args: &CmdArgs) {
    sv_drop_client(ctx, client_idx, "disconnected");
}

// ============================================================
// SV_VerifyPaks_f
//
// If we are pure, disconnect the client if they do not meet the
// following conditions:
//
// 1. the first two checksums match our view of cgame and ui
// 2. there are no additional checksums that we do not have
//
// This routine would be a bit simpler with a goto but i abstained
// ============================================================

fn sv_verify_paks_f(ctx: &mut ServerContext, client_idx: usize, args: &CmdArgs) {
    // if we are pure, we "expect" the client to load certain things from
    // certain pk3 files, namely we want the client to have loaded the
    // ui and cgame that we think should be loaded based on the pure setting
    if ctx.cvars.variable_integer("sv_pure") == 0 {
        return;
    }

    // we run the game, so determine which cgame and ui the client
    // "should" be running
    let chk_sum1 = ctx.fs.cgame_checksum;
    let chk_sum2 = ctx.fs.ui_checksum;
    let mut good = chk_sum1 != 0 && chk_sum2 != 0;

    let n_client_args = args.argc();
    let mut client_chk_sums: Vec<i32> = Vec::new();

    // we basically use this loop to avoid using 'goto' :)
    loop {
        if !good {
            break;
        }

        // must be at least 6: "cl_paks cgame ui @ firstref ... numChecksums"
        if n_client_args < 6 {
            good = false;
            break;
        }

        let mut cur_arg = 1;

        // verify first to be the cgame checksum
        let arg = args.argv(cur_arg);
        cur_arg += 1;
        if arg.is_empty() || arg.starts_with('@') || arg.parse::<i32>().unwrap_or(0) != chk_sum1 {
            good = false;
            break;
        }
        // verify the second to be the ui checksum
        let arg = args.argv(cur_arg);
        cur_arg += 1;
        if arg.is_empty() || arg.starts_with('@') || arg.parse::<i32>().unwrap_or(0) != chk_sum2 {
            good = false;
            break;
        }
        // should be sitting at the delimiter now
        let arg = args.argv(cur_arg);
        cur_arg += 1;
        if !arg.starts_with('@') {
            good = false;
            break;
        }

        // store checksums since tokenization is not re-entrant
        while cur_arg < n_client_args {
            client_chk_sums.push(args.argv(cur_arg).parse::<i32>().unwrap_or(0));
            cur_arg += 1;
        }

        // the last one is the number of checksums
        if client_chk_sums.is_empty() {
            good = false;
            break;
        }
        let n_client_paks = client_chk_sums.len() - 1;

        // make sure none of the client checksums are the same, so the
        // client can't send 5 of the same checksums
        'dup: for i in 0..n_client_paks {
            for j in 0..n_client_paks {
                if i == j {
                    continue;
                }
                if client_chk_sums[i] == client_chk_sums[j] {
                    good = false;
                    break 'dup;
                }
            }
        }
        if !good {
            break;
        }

        // check if the client has provided any pure checksums of pk3
        // files not loaded by the server
        for i in 0..n_client_paks {
            if !ctx.fs.pure_checksums.contains(&client_chk_sums[i]) {
                good = false;
                break;
            }
        }
        if !good {
            break;
        }

        // check if the number of checksums was correct
        let mut chk_sum = ctx.sv.checksum_feed;
        for i in 0..n_client_paks {
            chk_sum ^= client_chk_sums[i];
        }
        chk_sum ^= n_client_paks as i32;
        if chk_sum != client_chk_sums[n_client_paks] {
            good = false;
            break;
        }

        // break out
        break;
    }

    ctx.svs.clients[client_idx].got_cp = true;

    if good {
        ctx.svs.clients[client_idx].pure_authentic = 1;
    } else {
        let cl = &mut ctx.svs.clients[client_idx];
        cl.pure_authentic = 0;
        cl.next_snapshot_time = -1;
        cl.state = ClientState::Active;
        sv_send_client_snapshot(ctx, client_idx);
        sv_drop_client(
            ctx,
            client_idx,
            "Unpure client detected. Invalid .PK3 files referenced!",
        );
    }
}

// ============================================================
// SV_ResetPureClient_f
// ============================================================

fn sv_reset_pure_client_f(ctx: &mut ServerContext, client_idx: usize, _args: &CmdArgs) {
    let cl = &mut ctx.svs.clients[client_idx];
    cl.pure_authentic = 0;
    cl.got_cp = false;
}

// ============================================================
// SV_ClientCleanName
// ============================================================

pub fn sv_client_clean_name(input: &str, servermod: ServerMod) -> String {
    let bytes = input.as_bytes();
    let mut i = 0;

    // discard leading spaces
    while i < bytes.len() && bytes[i] == b' ' {
        i += 1;
    }

    // discard leading asterisks (fail raven for using * as a skipnotify)
    if servermod == ServerMod::BaseJKA {
        while i < bytes.len() && bytes[i] == b'*' {
            i += 1;
        }
    }

    let mut out: Vec<u8> = Vec::new();
    let mut colorless_len: i32 = 0;

    while i < bytes.len() && out.len() < MAX_NAME_LENGTH - 1 {
        let c = bytes[i];

        if i + 2 < bytes.len() {
            // don't allow more than 2 consecutive spaces
            if c == b' ' && bytes[i + 1] == b' ' && bytes[i + 2] == b' ' {
                i += 1;
                continue;
            }
            // don't allow too many consecutive @ signs
            if c == b'@' && bytes[i + 1] == b'@' && bytes[i + 2] == b'@' {
                i += 1;
                continue;
            }
        }

        if c < 0x20 {
            i += 1;
            continue;
        }

        match c {
            0x81 | 0x8D | 0x8F | 0x90 | 0x9D | 0xA0 | 0xAD => {
                i += 1;
                continue;
            }
            _ => {}
        }

        if !out.is_empty() && out[out.len() - 1] == Q_COLOR_ESCAPE {
            if c.is_ascii_digit() {
                colorless_len -= 1;
            } else {
                colorless_len += 1;
            }
        } else {
            colorless_len += 1;
        }
        out.push(c);
        i += 1;
    }

    // don't allow empty names
    if out.is_empty() || colorless_len == 0 {
        return DEFAULT_NAME.to_string();
    }

    String::from_utf8_lossy(&out).to_string()
}

// ============================================================
// SV_UserinfoChanged
//
// Pull specific info from a newly changed userinfo string into a more
// convenient form.
// ============================================================

pub fn sv_userinfo_changed(ctx: &mut ServerContext, client_idx: usize) {
    let legacy_fixes = ctx.cvars.variable_integer("sv_legacyFixes");
    let servermod = ctx.svs.servermod;

    let mut userinfo = ctx.svs.clients[client_idx].userinfo.clone();

    // name
    if legacy_fixes != 0
        && legacy_fixes & SVFIXES_ALLOW_INVALID_PLAYER_NAMES == 0
        && servermod != ServerMod::JAPlus
        && servermod != ServerMod::MBII
        && servermod != ServerMod::JAPro
    {
        let val = info_value_for_key(&userinfo, "name");
        let clean_name = sv_client_clean_name(&val, servermod);
        info_set_value_for_key(&mut userinfo, "name", &clean_name);
        ctx.svs.clients[client_idx].name = clean_name;
    } else {
        ctx.svs.clients[client_idx].name =
            truncate_bytes(&info_value_for_key(&userinfo, "name"), MAX_NAME_LENGTH - 1);
    }

    // rate command

    // if the client is on the same subnet as the server and we aren't
    // running an internet public server, assume they don't need a rate choke
    let remote = ctx.svs.clients[client_idx].netchan.remote_address;
    if sys_is_lan_address(&remote)
        && ctx.cvars.variable_integer("dedicated") != 2
        && ctx.cvars.variable_integer("sv_lanForceRate") == 1
    {
        ctx.svs.clients[client_idx].rate = 100000; // lans should not rate limit
    } else {
        let rate_policy = ctx.cvars.variable_integer("sv_ratePolicy");
        if rate_policy == 1 {
            ctx.svs.clients[client_idx].rate = ctx.cvars.variable_integer("sv_clientRate");
        } else if rate_policy == 2 {
            let mut i: i32 = info_value_for_key(&userinfo, "rate").parse().unwrap_or(0);
            if i == 0 {
                i = ctx.cvars.variable_integer("sv_maxRate");
            }
            i = com_clampi(1000, 100000, i);
            i = com_clampi(
                ctx.cvars.variable_integer("sv_minRate"),
                ctx.cvars.variable_integer("sv_maxRate"),
                i,
            );
            if i != ctx.svs.clients[client_idx].rate {
                ctx.svs.clients[client_idx].rate = i;
            }
        }
    }

    // snaps command
    let sv_fps = ctx.cvars.variable_integer("sv_fps");
    let snaps_max_cvar = ctx.cvars.variable_integer("sv_snapsMax");
    let snaps_min_cvar = ctx.cvars.variable_integer("sv_snapsMin");
    let min_snaps = if snaps_min_cvar > 0 {
        com_clampi(1, snaps_max_cvar, snaps_min_cvar)
    } else {
        1
    };
    let max_snaps = if snaps_max_cvar > 0 {
        sv_fps.min(snaps_max_cvar)
    } else {
        sv_fps
    };

    let mut wish_snaps: i32 = info_value_for_key(&userinfo, "snaps").parse().unwrap_or(0);
    if wish_snaps == 0 {
        wish_snaps = max_snaps;
    }
    let snaps_policy = ctx.cvars.variable_integer("sv_snapsPolicy");
    if sv_fps != 0 && snaps_policy == 1 {
        wish_snaps = sv_fps;
        let i = 1000 / sv_fps;
        let cl = &mut ctx.svs.clients[client_idx];
        cl.wish_snaps = wish_snaps;
        if i != cl.snapshot_msec {
            // reset next snapshot so we avoid desync between server frame
            // time and snapshot send time
            cl.next_snapshot_time = -1;
            cl.snapshot_msec = i;
        }
    } else if snaps_policy == 2 {
        let i = 1000 / com_clampi(min_snaps, max_snaps, wish_snaps);
        let cl = &mut ctx.svs.clients[client_idx];
        cl.wish_snaps = wish_snaps;
        if i != cl.snapshot_msec {
            cl.next_snapshot_time = -1;
            cl.snapshot_msec = i;
        }
    } else {
        ctx.svs.clients[client_idx].wish_snaps = wish_snaps;
    }

    // maintain the IP information; the banning code relies on this being
    // consistently present
    let ip = if net_is_local_address(&remote) {
        "localhost".to_string()
    } else {
        net_adr_to_string(&remote)
    };
    let val = info_value_for_key(&userinfo, "ip");
    let len = if !val.is_empty() {
        ip.len() + userinfo.len() - val.len()
    } else {
        ip.len() + 4 + userinfo.len()
    };
    if len >= MAX_INFO_STRING {
        ctx.svs.clients[client_idx].userinfo = userinfo;
        sv_drop_client(ctx, client_idx, "userinfo string length exceeded");
        return;
    }
    info_set_value_for_key(&mut userinfo, "ip", &ip);

    // fix: don't allow bugged models
    if legacy_fixes != 0
        && legacy_fixes & SVFIXES_ALLOW_BROKEN_MODELS == 0
        && servermod != ServerMod::MBII
    {
        let val = info_value_for_key(&userinfo, "model");
        let bad_model = stricmp_prefix(&val, "jedi_/red")
            || stricmp_prefix(&val, "jedi_/blue")
            || stricmp_prefix(&val, "rancor")
            || stricmp_prefix(&val, "wampa");
        if bad_model {
            info_set_value_for_key(&mut userinfo, "model", "kyle");
        }
    }

    // fix: reject malformed forcepowers strings
    if legacy_fixes != 0 && legacy_fixes & SVFIXES_ALLOW_INVALID_FORCEPOWERS == 0 {
        let force_powers = info_value_for_key(&userinfo, "forcepowers");
        if !sv_force_powers_valid(&force_powers) {
            info_set_value_for_key(&mut userinfo, "forcepowers", DEFAULT_FORCE_POWERS);
        }
    }

    ctx.svs.clients[client_idx].userinfo = userinfo;
}

/// A forcepowers string is `rank-side-DDDDDDDDDDDDDDDDDD` — only digits
/// and exactly two dashes within the first six characters.
fn sv_force_powers_valid(force_powers: &str) -> bool {
    let bytes = force_powers.as_bytes();
    let len = bytes.len();

    if len < 22 || len > 24 {
        return false;
    }

    let mut seps = 0;
    for i in 0..len {
        let c = bytes[i];
        if c != b'-' && !(c >= b'0' && c <= b'9') {
            return false;
        }
        if c == b'-' && (i < 1 || i > 5) {
            return false;
        }
        if i > 0 && bytes[i - 1] == b'-' && c == b'-' {
            return false;
        }
        if c == b'-' {
            seps += 1;
        }
    }

    seps == 2
}

// ============================================================
// SV_UpdateUserinfo_f
// ============================================================

fn sv_update_userinfo_f(ctx: &mut ServerContext, client_idx: usize, args: &CmdArgs) {
    let arg = args.argv(1);

    // stop random empty /userinfo calls without hurting anything
    if arg.is_empty() {
        return;
    }

    let svs_time = ctx.svs.time;
    let mut postponed = false;
    {
        let cl = &mut ctx.svs.clients[client_idx];
        if cl.last_user_info_change > svs_time {
            cl.last_user_info_count += 1;

            if cl.last_user_info_count >= INFO_CHANGE_MAX_COUNT {
                cl.userinfo_postponed = truncate_bytes(arg, MAX_INFO_STRING - 1);
                postponed = true;
            }
        } else {
            cl.userinfo_postponed.clear();
            cl.last_user_info_count = 0;
            cl.last_user_info_change = svs_time + INFO_CHANGE_MIN_INTERVAL;
        }

        if !postponed {
            cl.userinfo = truncate_bytes(arg, MAX_INFO_STRING - 1);
        }
    }

    if postponed {
        sv_send_server_command(
            ctx,
            Some(client_idx),
            "print \"Warning: Too many info changes, last info postponed\n\"\n",
        );
        return;
    }

    sv_userinfo_changed(ctx, client_idx);

    // call game code to allow overrides
    let userinfo = ctx.svs.clients[client_idx].userinfo.clone();
    if let Some(ref mut ge) = ctx.game {
        ge.gvm_client_userinfo_changed(client_idx, &userinfo);
    }
}

// ============================================================
// Client command dispatch table (ucmds[])
// ============================================================

type UcmdFn = fn(&mut ServerContext, usize, &CmdArgs);

static UCMDS: &[(&str, UcmdFn)] = &[
    ("userinfo", sv_update_userinfo_f),
    ("disconnect", sv_disconnect_f),
    ("cp", sv_verify_paks_f),
    ("vdr", sv_reset_pure_client_f),
    ("download", sv_begin_download_f),
    ("nextdl", sv_next_download_f),
    ("stopdl", sv_stop_download_f),
    ("donedl", sv_done_download_f),
];

// ============================================================
// SV_ExecuteClientCommand
//
// Also called by bot code
// ============================================================

pub fn sv_execute_client_command(ctx: &mut ServerContext, client_idx: usize, s: &str, client_ok: bool) {
    let mut client_ok = client_ok;
    let args = CmdArgs::tokenize(s);

    let cmd = args.argv(0).to_string();
    let arg1 = args.argv(1).to_string();
    let arg2 = args.argv(2).to_string();

    // see if it is a server level command
    let mut processed = false;
    for &(name, func) in UCMDS {
        if cmd == name {
            func(ctx, client_idx, &args);
            processed = true;
            break;
        }
    }

    // SMOD administrative commands ride the normal command channel
    if !processed && cmd == "smod" {
        processed = sv_smod::sv_smod_command(ctx, client_idx, &args);
    }

    let say_cmd = stricmp_prefix(&cmd, "say")
        || stricmp_prefix(&cmd, "say_team")
        || stricmp_prefix(&cmd, "tell");
    if say_cmd {
        // 256 because we don't need more, the chat can handle 150 max
        // chars, and allowing 256 prevents a message from not being sent
        // instead of being truncated if it's a bit more than 150
        if ctx.svs.gvm_is_legacy
            && ctx.cvars.variable_integer("sv_legacyFixes") != 0
            && args.args().len() > 256
        {
            client_ok = false;
        }
    }

    let legacy_fixes = ctx.cvars.variable_integer("sv_legacyFixes");
    if legacy_fixes != 0 && ctx.svs.servermod != ServerMod::MBII {
        let maxclients = ctx.svs.clients.len() as i32;

        if legacy_fixes & SVFIXES_DISABLE_GC_CRASHFIX == 0
            && stricmp_prefix(&cmd, "gc")
            && arg1.parse::<i32>().unwrap_or(0) >= maxclients
        {
            client_ok = false;
        }

        if legacy_fixes & SVFIXES_DISABLE_NPC_CRASHFIX == 0
            && ctx.svs.servermod != ServerMod::JAPro
            && stricmp_prefix(&cmd, "npc")
            && stricmp_prefix(&arg1, "spawn")
            && (stricmp_prefix(&arg2, "ragnos") || stricmp_prefix(&arg2, "saber_"))
        {
            client_ok = false;
        }

        // fix: team crash
        if legacy_fixes & SVFIXES_DISABLE_TEAM_CRASHFIX == 0
            && stricmp_prefix(&cmd, "team")
            && (stricmp_prefix(&arg1, "follow1") || stricmp_prefix(&arg1, "follow2"))
        {
            client_ok = false;
        }

        // disable: callteamvote, useless in basejka and can lead to a
        // bugged UI on custom clients
        if legacy_fixes & SVFIXES_ALLOW_CALLTEAMVOTE == 0
            && ctx.svs.servermod == ServerMod::BaseJKA
            && stricmp_prefix(&cmd, "callteamvote")
        {
            client_ok = false;
        }

        // fix: callvote fraglimit/timelimit with negative value
        if legacy_fixes & SVFIXES_ALLOW_NEGATIVE_CALLVOTES == 0
            && ctx.svs.servermod == ServerMod::BaseJKA
            && stricmp_prefix(&cmd, "callvote")
            && (stricmp_prefix(&arg1, "fraglimit") || stricmp_prefix(&arg1, "timelimit"))
            && arg2.parse::<i32>().unwrap_or(0) < 0
        {
            client_ok = false;
        }
    }

    if client_ok {
        // pass unknown strings to the game
        let state = ctx.svs.clients[client_idx].state;
        if !processed
            && ctx.sv.state == ServerState::Game
            && (state == ClientState::Active || state == ClientState::Primed)
        {
            let mut forwarded = s.to_string();
            let filter = ctx.cvars.variable_integer("sv_filterCommands");
            if filter != 0 {
                // strip \r and \n
                forwarded = forwarded.replace(['\r', '\n'], " ");
                if filter == 2 && !say_cmd {
                    // also strip ';' for callvote
                    forwarded = forwarded.replace(';', " ");
                }
            }
            if let Some(ref mut ge) = ctx.game {
                ge.gvm_client_command(client_idx, &forwarded);
            }
        }
    } else if !processed {
        com_dprintf(&format!(
            "client text ignored for {}: {}\n",
            ctx.svs.clients[client_idx].name, cmd
        ));
    }
}

// ============================================================
// SV_ClientCommand
// ============================================================

fn sv_client_command(ctx: &mut ServerContext, client_idx: usize, msg: &mut SizeBuf) -> bool {
    let seq = msg_read_long(msg);
    let s = msg_read_string(msg);

    // see if we have already executed it
    if ctx.svs.clients[client_idx].last_client_command >= seq {
        return true;
    }

    com_dprintf(&format!(
        "clientCommand: {} : {} : {}\n",
        ctx.svs.clients[client_idx].name, seq, s
    ));

    // drop the connection if we have somehow lost commands
    if seq > ctx.svs.clients[client_idx].last_client_command + 1 {
        com_printf(&format!(
            "Client {} lost {} clientCommands\n",
            ctx.svs.clients[client_idx].name,
            seq - ctx.svs.clients[client_idx].last_client_command + 1
        ));
        sv_drop_client(ctx, client_idx, "Lost reliable commands");
        return false;
    }

    // malicious users may try using too many string commands to lag other
    // players. If we decide that we want to stall the command, the rest of
    // the packet is ignored, including the usercmd. This causes flooders
    // to lag themselves but not other people.
    // We don't do this when the client hasn't been active yet, since it's
    // normal to spam a lot of commands when downloading.
    let mut client_ok = true;
    let svs_time = ctx.svs.time;
    let flood_protect = ctx.cvars.variable_integer("sv_floodProtect");
    {
        let cl = &mut ctx.svs.clients[client_idx];
        if cl.state >= ClientState::Active && flood_protect != 0 {
            let flood_time = if flood_protect == 1 { 1000 } else { flood_protect };
            if svs_time < cl.last_reliable_time + flood_time {
                // ignore any other text messages from this client but let
                // them keep playing
                client_ok = false;
            } else {
                cl.last_reliable_time = svs_time;
            }
            if ctx.cvars.variable_integer("sv_floodProtectSlow") != 0 {
                cl.last_reliable_time = svs_time;
            }
        }
    }

    sv_execute_client_command(ctx, client_idx, &s, client_ok);

    let cl = &mut ctx.svs.clients[client_idx];
    cl.last_client_command = seq;
    cl.last_client_command_string = s;

    true // continue processing
}

/*
===========================================================================

USER CMD EXECUTION

===========================================================================
*/

// ============================================================
// SV_ClientThink
//
// Also called by bot code
// ============================================================

pub fn sv_client_think(ctx: &mut ServerContext, client_idx: usize, cmd: &UserCmd) {
    ctx.svs.clients[client_idx].last_usercmd = *cmd;

    if ctx.svs.clients[client_idx].state != ClientState::Active {
        return; // may have been kicked during the last usercmd
    }

    // update postponed userinfo changes now
    let svs_time = ctx.svs.time;
    let apply_postponed = {
        let cl = &ctx.svs.clients[client_idx];
        cl.last_user_info_count >= INFO_CHANGE_MAX_COUNT
            && cl.last_user_info_change < svs_time
            && !cl.userinfo_postponed.is_empty()
    };
    if apply_postponed {
        let postponed = std::mem::take(&mut ctx.svs.clients[client_idx].userinfo_postponed);
        ctx.svs.clients[client_idx].userinfo = postponed;
        sv_userinfo_changed(ctx, client_idx);

        // call game code to allow overrides
        let userinfo = ctx.svs.clients[client_idx].userinfo.clone();
        if let Some(ref mut ge) = ctx.game {
            ge.gvm_client_userinfo_changed(client_idx, &userinfo);
        }

        // get the name out of the game and set it in the engine
        let info = sv_get_configstring(ctx, CS_PLAYERS + client_idx).to_string();
        if !info.is_empty() {
            let game_name = info_value_for_key(&info, "n");
            if !game_name.is_empty() {
                let mut userinfo = ctx.svs.clients[client_idx].userinfo.clone();
                info_set_value_for_key(&mut userinfo, "name", &game_name);
                ctx.svs.clients[client_idx].userinfo = userinfo;
                ctx.svs.clients[client_idx].name = game_name;
            }
        }

        // clear it
        let cl = &mut ctx.svs.clients[client_idx];
        cl.userinfo_postponed.clear();
        cl.last_user_info_count = 0;
        cl.last_user_info_change = svs_time + INFO_CHANGE_MIN_INTERVAL;
    }

    if let Some(ref mut ge) = ctx.game {
        ge.gvm_client_think(client_idx, cmd);
    }
}

// ============================================================
// SV_UserMove
//
// The message usually contains all the movement commands that were in
// the last three packets, so that the information in dropped packets
// can be recovered.
//
// On very fast clients, there may be multiple usercmds packed into each
// of the backup packets.
// ============================================================

fn sv_user_move(ctx: &mut ServerContext, client_idx: usize, msg: &mut SizeBuf, delta: bool) {
    let ping_fix_cvar = ctx.cvars.variable_integer("sv_pingFix");
    let mut fix_ping = ping_fix_cvar != 0;

    {
        let cl = &mut ctx.svs.clients[client_idx];
        if delta {
            cl.delta_message = cl.message_acknowledge;
        } else {
            cl.delta_message = -1;
        }
    }

    let cmd_count = msg_read_byte(msg);

    if cmd_count < 1 {
        com_printf("cmdCount < 1\n");
        return;
    }

    if cmd_count > MAX_PACKET_USERCMDS as i32 {
        com_printf("cmdCount > MAX_PACKET_USERCMDS\n");
        return;
    }

    let old_server_time = ctx.svs.clients[client_idx].last_usercmd.server_time;

    {
        let cl = &mut ctx.svs.clients[client_idx];
        if cl.unfix_ping {
            if ping_fix_cvar != 2 {
                cl.unfix_ping = false;
            } else if fix_ping {
                fix_ping = false;
            }
        }
    }

    // use the checksum feed in the key, also the message acknowledge and
    // the last acknowledged server command
    let key = {
        let cl = &ctx.svs.clients[client_idx];
        let ack_index = (cl.reliable_acknowledge & (MAX_RELIABLE_COMMANDS as i32 - 1)) as usize;
        ctx.sv.checksum_feed
            ^ cl.message_acknowledge
            ^ com_hash_key(&cl.reliable_commands[ack_index], 32)
    };

    let legacy_fixes = ctx.cvars.variable_integer("sv_legacyFixes");
    let strict_timestamp = ctx.cvars.variable_integer("sv_strictPacketTimestamp");
    let sv_time = ctx.sv.time;
    let state = ctx.svs.clients[client_idx].state;

    let mut cmds: Vec<UserCmd> = Vec::with_capacity(cmd_count as usize);
    let mut oldcmd = UserCmd::default();
    for _ in 0..cmd_count {
        let mut cmd = msg_read_delta_usercmd_key(msg, key, &oldcmd);

        if legacy_fixes != 0 {
            if legacy_fixes & SVFIXES_ALLOW_INVALID_FORCESEL == 0
                && (cmd.forcesel == FP_LEVITATION || cmd.forcesel >= NUM_FORCE_POWERS)
            {
                // block "charge jump" and other nonsense
                cmd.forcesel = 0xFF;
            }

            if legacy_fixes & SVFIXES_ALLOW_INVALID_VIEWANGLES == 0 {
                // affects speed calculation
                cmd.angles[ROLL] = 0;
            }
        }

        if strict_timestamp != 0 && state == ClientState::Active {
            if cmd.server_time < sv_time - 1000 {
                if ctx.svs.last_timestamp_warn < sv_time - 5000 {
                    ctx.svs.last_timestamp_warn = sv_time;
                    com_dprintf(&format!(
                        "client {}({:?}) serverTime too low ({} < {})\n",
                        client_idx,
                        state,
                        cmd.server_time,
                        sv_time - 1000
                    ));
                }
                cmd.server_time = sv_time - 1000;
            } else if cmd.server_time > sv_time + 200 {
                if ctx.svs.last_timestamp_warn < sv_time - 5000 {
                    ctx.svs.last_timestamp_warn = sv_time;
                    com_dprintf(&format!(
                        "client {}({:?}) serverTime in future ({} > {})\n",
                        client_idx,
                        state,
                        cmd.server_time,
                        sv_time + 200
                    ));
                }
                cmd.server_time = sv_time + 200;
            }
        }

        oldcmd = cmd;
        cmds.push(cmd);
    }

    // save time for ping calculation. With sv_pingFix we store the time
    // of the first acknowledge instead of the last, and use a clock that
    // is not limited by sv_fps.
    let svs_time = ctx.svs.time;
    {
        let cl = &mut ctx.svs.clients[client_idx];
        let frame_index = (cl.message_acknowledge as usize) & PACKET_MASK;
        if !fix_ping || cl.frames[frame_index].message_acked == -1 {
            cl.frames[frame_index].message_acked = if fix_ping {
                sys_milliseconds()
            } else {
                svs_time
            };
        }
    }

    // catch the no-cp-yet situation before SV_ClientEnterWorld: if
    // CS_ACTIVE, then it's time to trigger a new gamestate emission; if
    // not, then we are getting remaining parasite usermove commands,
    // which we should ignore
    let sv_pure = ctx.cvars.variable_integer("sv_pure");
    let (pure_authentic, got_cp, cur_state) = {
        let cl = &ctx.svs.clients[client_idx];
        (cl.pure_authentic, cl.got_cp, cl.state)
    };
    if sv_pure != 0 && pure_authentic == 0 && !got_cp {
        if cur_state == ClientState::Active {
            // we didn't get a cp yet, don't assume anything and just send
            // the gamestate all over again
            com_dprintf(&format!(
                "{}: didn't get cp command, resending gamestate\n",
                ctx.svs.clients[client_idx].name
            ));
            sv_send_client_game_state(ctx, client_idx);
        }
        return;
    }

    // if this is the first usercmd we have received this gamestate, put
    // the client into the world
    if ctx.svs.clients[client_idx].state == ClientState::Primed {
        sv_client_enter_world(ctx, client_idx, Some(&cmds[0]));
        // the moves can be processed normally
    }

    // a bad cp command was sent, drop the client
    if sv_pure != 0 && ctx.svs.clients[client_idx].pure_authentic == 0 {
        sv_drop_client(ctx, client_idx, "Cannot validate pure client!");
        return;
    }

    if ctx.svs.clients[client_idx].state != ClientState::Active {
        ctx.svs.clients[client_idx].delta_message = -1;
        return;
    }

    // usually, the first couple commands will be duplicates of ones we
    // have previously received, but the servertimes in the commands will
    // cause them to be immediately discarded
    let final_time = cmds[cmds.len() - 1].server_time;
    let mut first_server_time = 0;
    let mut last_server_time = 0;
    for i in 0..cmds.len() {
        // if this is a cmd from before a map_restart ignore it
        if cmds[i].server_time > final_time {
            continue;
        }
        // don't execute if this is an old cmd which is already executed;
        // these old cmds are included when cl_packetdup > 0
        if cmds[i].server_time <= ctx.svs.clients[client_idx].last_usercmd.server_time {
            continue;
        }
        if first_server_time == 0 {
            first_server_time = cmds[i].server_time;
        } else if cmds[i].server_time > last_server_time {
            last_server_time = cmds[i].server_time;
        }
        sv_client_think(ctx, client_idx, &cmds[i]);
    }

    // lastServerTime stays 0 when the client sends one cmd per packet
    if last_server_time <= 0 {
        last_server_time = first_server_time;
    }

    // smooth the packet deltas over the backup window; clients packing
    // several frames per packet get the old ping calculation back
    if ping_fix_cvar == 2 && old_server_time > 0 && first_server_time > 0 && last_server_time > 0 {
        let packet_delta = last_server_time - old_server_time;
        if packet_delta > 0 {
            let cl = &mut ctx.svs.clients[client_idx];
            cl.packet_deltas[cl.packet_deltas_index % PACKET_BACKUP] = packet_delta;
            cl.packet_deltas_index = cl.packet_deltas_index.wrapping_add(1);

            let mut total: i32 = cl.packet_deltas.iter().sum();
            if total == 0 {
                total = packet_delta;
            }
            let average = total / PACKET_BACKUP as i32;

            cl.unfix_ping = average > 20;
        }
    }
}

// ============================================================
// SV_ExecuteClientMessage
//
// Parse a client packet
// ============================================================

pub fn sv_execute_client_message(ctx: &mut ServerContext, client_idx: usize, msg: &mut SizeBuf) {
    let server_id = msg_read_long(msg);

    let message_acknowledge = msg_read_long(msg);
    ctx.svs.clients[client_idx].message_acknowledge = message_acknowledge;
    if message_acknowledge < 0 {
        // usually only hackers create messages like this; it is more
        // annoying for them to let them hanging
        return;
    }

    let reliable_acknowledge = msg_read_long(msg);

    // NOTE: when the client message is fux0red the acknowledgement
    // numbers can be out of range, this could cause the server to send
    // thousands of server commands which the server thinks are not yet
    // acknowledged in SV_UpdateServerCommandsToClient
    {
        let cl = &mut ctx.svs.clients[client_idx];
        if reliable_acknowledge < cl.reliable_sequence - MAX_RELIABLE_COMMANDS as i32 {
            cl.reliable_acknowledge = cl.reliable_sequence;
            return;
        }
        cl.reliable_acknowledge = reliable_acknowledge;
    }

    // if this is a usercmd from a previous gamestate, ignore it or
    // retransmit the current gamestate.
    //
    // if the client was downloading, let it stay at whatever serverId and
    // gamestate it was at. This allows it to keep downloading even when
    // the gamestate changes. After the download is finished, we'll notice
    // and send it a new gamestate.
    //
    // don't drop as long as the previous command was a nextdl: after a dl
    // is done, downloadName is set back to "" but we still need to read
    // the next message to move to the next download or send the gamestate
    let downloading = {
        let cl = &ctx.svs.clients[client_idx];
        !cl.download_name.is_empty() || cl.last_client_command_string.contains("nextdl")
    };
    if server_id != ctx.sv.server_id && !downloading {
        if server_id >= ctx.sv.restarted_server_id && server_id < ctx.sv.server_id {
            // they just haven't caught the map_restart yet
            com_dprintf(&format!(
                "{} : ignoring pre map_restart / outdated client message\n",
                ctx.svs.clients[client_idx].name
            ));
            return;
        }
        // if we can tell that the client has dropped the last gamestate we
        // sent them, resend it
        if ctx.svs.clients[client_idx].state != ClientState::Active
            && message_acknowledge > ctx.svs.clients[client_idx].gamestate_message_num
        {
            com_dprintf(&format!(
                "{} : dropped gamestate, resending\n",
                ctx.svs.clients[client_idx].name
            ));
            sv_send_client_game_state(ctx, client_idx);
        }
        return;
    }

    // this client has acknowledged the new gamestate so it's safe to
    // start sending it the real time again
    if ctx.svs.clients[client_idx].old_server_time != 0 && server_id == ctx.sv.server_id {
        com_dprintf(&format!(
            "{} acknowledged gamestate\n",
            ctx.svs.clients[client_idx].name
        ));
        ctx.svs.clients[client_idx].old_server_time = 0;
    }

    // read optional clientCommand strings
    let mut c;
    loop {
        c = msg_read_byte(msg);
        if c == ClcOps::EOF as i32 {
            break;
        }
        if c != ClcOps::ClientCommand as i32 {
            break;
        }
        if !sv_client_command(ctx, client_idx, msg) {
            return; // we couldn't execute it because of the flood protection
        }
        if ctx.svs.clients[client_idx].state == ClientState::Zombie {
            return; // disconnect command
        }
    }

    // read the usercmd_t
    if c == ClcOps::Move as i32 {
        sv_user_move(ctx, client_idx, msg, true);
    } else if c == ClcOps::MoveNoDelta as i32 {
        sv_user_move(ctx, client_idx, msg, false);
    } else if c != ClcOps::EOF as i32 {
        com_printf(&format!(
            "WARNING: bad command byte for client {}\n",
            client_idx
        ));
    }
}

// ============================================================
// Tests
// ============================================================
