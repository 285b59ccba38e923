// sv_main.rs — main server loop
// Converted from: myjka-original/server/sv_main.cpp
//
// Copyright (C) 1999-2005, Id Software, Inc.
// Copyright (C) 2013-2015, OpenJK contributors
// Licensed under the GNU General Public License v2.

use crate::server::*;
use crate::sv_client::{sv_direct_connect, sv_drop_client, sv_execute_client_message, sv_get_challenge};
use myjka_common::cmd::CmdArgs;
use myjka_common::common::{com_dprintf, com_printf, msg_read_long, msg_read_short, msg_read_string_line, sys_milliseconds};
use myjka_common::net::{net_adr_to_string, net_compare_base_adr, net_get_packet};
use myjka_common::net_chan::{netchan_out_of_band_print, netchan_process};
use myjka_common::qcommon::*;

use rayon::prelude::*;

/// Heartbeat interval in seconds.
const HEARTBEAT_SECONDS: i32 = 300;

// ============================================================
// SV_StatusString
//
// Builds the string that is sent as heartbeats and status replies
// ============================================================

pub fn sv_status_string(ctx: &ServerContext) -> String {
    let serverinfo = ctx.cvars.serverinfo();
    let mut status = format!("{}\n", serverinfo);

    for cl in &ctx.svs.clients {
        if cl.state >= ClientState::Connected {
            let player = format!("{} {} \"{}\"\n", 0, cl.ping, cl.name);
            if status.len() + player.len() >= MAX_MSGLEN - 16 {
                break; // can't hold any more
            }
            status.push_str(&player);
        }
    }

    status
}

// ============================================================
// SVC_Status
//
// Responds with all the info that qplug or qspy can see
// ============================================================

pub fn svc_status(ctx: &ServerContext) {
    let status = sv_status_string(ctx);
    netchan_out_of_band_print(NetSrc::Server, &ctx.net_from, &format!("statusResponse\n{}", status));
}

// ============================================================
// SVC_Info
//
// Responds with short info for broadcast scans
// ============================================================

pub fn svc_info(ctx: &ServerContext, args: &CmdArgs) {
    let mut count = 0;
    let mut bots = 0;
    for cl in &ctx.svs.clients {
        if cl.state >= ClientState::Connected {
            if cl.is_bot() {
                bots += 1;
            } else {
                count += 1;
            }
        }
    }

    let mut info = String::new();
    myjka_common::q_shared::info_set_value_for_key(&mut info, "protocol", &format!("{}", PROTOCOL_VERSION));
    myjka_common::q_shared::info_set_value_for_key(&mut info, "hostname", ctx.cvars.variable_string("sv_hostname"));
    myjka_common::q_shared::info_set_value_for_key(&mut info, "mapname", &ctx.sv.name);
    myjka_common::q_shared::info_set_value_for_key(&mut info, "clients", &format!("{}", count));
    myjka_common::q_shared::info_set_value_for_key(&mut info, "bots", &format!("{}", bots));
    myjka_common::q_shared::info_set_value_for_key(
        &mut info,
        "sv_maxclients",
        &format!("{}", ctx.cvars.variable_integer("sv_maxclients") - ctx.cvars.variable_integer("sv_privateClients")),
    );

    // echo back the parameter to status. so servers can use it as a
    // challenge to prevent timed spoofed reply packets
    let challenge = args.argv(1);
    if !challenge.is_empty() {
        myjka_common::q_shared::info_set_value_for_key(&mut info, "challenge", challenge);
    }

    netchan_out_of_band_print(NetSrc::Server, &ctx.net_from, &format!("infoResponse\n{}", info));
}

// ============================================================
// SVC_Ping
//
// Just responds with an acknowledgement
// ============================================================

pub fn svc_ping(ctx: &ServerContext) {
    netchan_out_of_band_print(NetSrc::Server, &ctx.net_from, "ack");
}

// ============================================================
// SV_ConnectionlessPacket
//
// A connectionless packet has four leading 0xff characters to
// distinguish it from a game channel
// ============================================================

pub fn sv_connectionless_packet(ctx: &mut ServerContext) {
    ctx.net_message.readcount = 0;
    msg_read_long(&mut ctx.net_message); // skip the -1 marker

    let s = msg_read_string_line(&mut ctx.net_message);
    let args = CmdArgs::tokenize(&s);
    let c = args.argv(0).to_string();

    com_dprintf(&format!(
        "SV packet {} : {}\n",
        net_adr_to_string(&ctx.net_from),
        c
    ));

    match c.as_str() {
        "ping" => svc_ping(ctx),
        "status" => svc_status(ctx),
        "info" => svc_info(ctx, &args),
        "getchallenge" => sv_get_challenge(ctx, &args),
        "connect" => sv_direct_connect(ctx, &args),
        _ => {
            com_dprintf(&format!(
                "bad connectionless packet from {}:\n{}\n",
                net_adr_to_string(&ctx.net_from),
                s
            ));
        }
    }
}

// ============================================================
// SV_ReadPackets
// ============================================================

pub fn sv_read_packets(ctx: &mut ServerContext) {
    while net_get_packet(NetSrc::Server, &mut ctx.net_from, &mut ctx.net_message) {
        // check for connectionless packet (0xffffffff) first
        if ctx.net_message.cursize >= 4 {
            let marker = i32::from_le_bytes([
                ctx.net_message.data[0],
                ctx.net_message.data[1],
                ctx.net_message.data[2],
                ctx.net_message.data[3],
            ]);
            if marker == -1 {
                sv_connectionless_packet(ctx);
                continue;
            }
        }

        // read the qport out of the message so we can fix up
        // stupid address translating routers
        ctx.net_message.readcount = 0;
        let _sequence = msg_read_long(&mut ctx.net_message);
        let qport = msg_read_short(&mut ctx.net_message) & 0xffff;

        // find which client the message is from
        for i in 0..ctx.svs.clients.len() {
            if ctx.svs.clients[i].state == ClientState::Free {
                continue;
            }
            if !net_compare_base_adr(&ctx.net_from, &ctx.svs.clients[i].netchan.remote_address) {
                continue;
            }
            // it is possible to have multiple clients from a single IP
            // address, so they are differentiated by the qport variable
            if ctx.svs.clients[i].netchan.qport != qport {
                continue;
            }

            // the IP port can't be used to differentiate them, because
            // some address translating routers periodically change UDP
            // port assignments
            if ctx.svs.clients[i].netchan.remote_address.port != ctx.net_from.port {
                com_printf("SV_ReadPackets: fixing up a translated port\n");
                ctx.svs.clients[i].netchan.remote_address.port = ctx.net_from.port;
            }

            let curtime = sys_milliseconds();
            if netchan_process(&mut ctx.svs.clients[i].netchan, &mut ctx.net_message, curtime) {
                // zombie clients still need to do the Netchan_Process to
                // make sure they don't need to retransmit the final
                // reliable message, but they don't do any other processing
                if ctx.svs.clients[i].state != ClientState::Zombie {
                    ctx.svs.clients[i].last_packet_time = ctx.svs.time; // don't timeout
                    let mut msg = ctx.net_message.clone();
                    sv_execute_client_message(ctx, i, &mut msg);
                }
            }
            break;
        }
    }
}

// ============================================================
// SV_CheckTimeouts
//
// If a packet has not been received from a client for sv_timeout
// seconds, drop the connection. Zombie slots return to FREE after
// sv_zombietime seconds.
//
// Phase 1 (parallel): check timeout conditions
// Phase 2 (sequential): apply drops and state changes
// ============================================================

enum TimeoutAction {
    None,
    Drop(usize, String),
    FreeZombie(usize),
    FixTime(usize),
}

pub fn sv_check_timeouts(ctx: &mut ServerContext) {
    let droppoint = ctx.svs.time - (1000.0 * ctx.cvars.variable_value("sv_timeout")) as i32;
    let zombiepoint = ctx.svs.time - (1000.0 * ctx.cvars.variable_value("sv_zombietime")) as i32;
    let svs_time = ctx.svs.time;

    let client_data: Vec<_> = (0..ctx.svs.clients.len())
        .map(|i| {
            let cl = &ctx.svs.clients[i];
            (i, cl.state, cl.last_packet_time, cl.is_bot(), cl.name.clone())
        })
        .collect();

    let actions: Vec<TimeoutAction> = client_data
        .par_iter()
        .map(|(i, state, last_packet_time, is_bot, name)| {
            let i = *i;
            let last_packet_time = *last_packet_time;

            // message times may be wrong across a changelevel
            if last_packet_time > svs_time {
                return TimeoutAction::FixTime(i);
            }

            match *state {
                ClientState::Zombie if last_packet_time < zombiepoint => {
                    TimeoutAction::FreeZombie(i)
                }
                s if s >= ClientState::Connected && last_packet_time < droppoint && !*is_bot => {
                    TimeoutAction::Drop(i, name.clone())
                }
                _ => TimeoutAction::None,
            }
        })
        .collect();

    for action in actions {
        match action {
            TimeoutAction::None => {}
            TimeoutAction::FixTime(i) => {
                ctx.svs.clients[i].last_packet_time = svs_time;
            }
            TimeoutAction::FreeZombie(i) => {
                com_dprintf(&format!(
                    "Going from CS_ZOMBIE to CS_FREE for {}\n",
                    ctx.svs.clients[i].name
                ));
                ctx.svs.clients[i].state = ClientState::Free; // can now be reused
            }
            TimeoutAction::Drop(i, name) => {
                sv_drop_client(ctx, i, "timed out");
                com_printf(&format!("{} timed out\n", name));
            }
        }
    }
}

// ============================================================
// SV_CalcPings
//
// Updates the cl->ping variables
// Phase 1 (parallel): average the message round trips
// Phase 2 (sequential): apply results
// ============================================================

struct PingCalcResult {
    index: usize,
    ping: i32,
}

pub fn sv_calc_pings(ctx: &mut ServerContext) {
    let client_data: Vec<_> = (0..ctx.svs.clients.len())
        .filter_map(|i| {
            let cl = &ctx.svs.clients[i];
            if cl.state != ClientState::Active || cl.is_bot() {
                return None;
            }
            let frames: Vec<(i32, i32)> = cl
                .frames
                .iter()
                .map(|f| (f.message_sent, f.message_acked))
                .collect();
            Some((i, frames))
        })
        .collect();

    let results: Vec<PingCalcResult> = client_data
        .par_iter()
        .map(|(index, frames)| {
            let mut total = 0;
            let mut count = 0;
            for &(sent, acked) in frames {
                if sent == -1 || acked == -1 {
                    continue;
                }
                total += acked - sent;
                count += 1;
            }
            let ping = if count == 0 {
                999 // never received a valid message
            } else {
                (total / count).max(1)
            };
            PingCalcResult { index: *index, ping }
        })
        .collect();

    for result in results {
        ctx.svs.clients[result.index].ping = result.ping;
    }
}

// ============================================================
// Master_Heartbeat
//
// Send a message to the master every few minutes to let it know we are
// alive, and log information
// ============================================================

/// SV_Heartbeat_f — forces a heartbeat on the next frame.
pub fn sv_heartbeat_f(ctx: &mut ServerContext) {
    ctx.svs.last_heartbeat = -9999999;
}

pub fn master_heartbeat(ctx: &mut ServerContext) {
    // only public dedicated servers send heartbeats
    if ctx.cvars.variable_integer("dedicated") == 0 || ctx.cvars.variable_integer("public") == 0 {
        return;
    }

    // check for time wraparound
    if ctx.svs.last_heartbeat > ctx.svs.time {
        ctx.svs.last_heartbeat = ctx.svs.time;
    }

    if ctx.svs.time - ctx.svs.last_heartbeat < HEARTBEAT_SECONDS * 1000 {
        return; // not time to send yet
    }

    ctx.svs.last_heartbeat = ctx.svs.time;

    for i in 0..MAX_MASTERS {
        if ctx.svs.master_adr[i].port != 0 {
            com_printf(&format!(
                "Sending heartbeat to {}\n",
                net_adr_to_string(&ctx.svs.master_adr[i])
            ));
            netchan_out_of_band_print(NetSrc::Server, &ctx.svs.master_adr[i], "heartbeat");
        }
    }
}

// ============================================================
// SV_Frame
//
// Player movement occurs as a result of packet events, which happen
// before SV_Frame is called
// ============================================================

pub fn sv_frame(ctx: &mut ServerContext, msec: i32) {
    // if the server is not active, do nothing
    if !ctx.svs.initialized {
        return;
    }

    ctx.svs.time += msec;
    if ctx.sv.state == ServerState::Game {
        ctx.sv.time += msec;
    }

    // check timeouts
    sv_check_timeouts(ctx);

    // get packets from clients; movement and client commands execute here
    sv_read_packets(ctx);

    // update ping based on the all received frames
    sv_calc_pings(ctx);

    // let everything in the world think and move
    if ctx.sv.state == ServerState::Game {
        let sv_time = ctx.sv.time;
        if let Some(ref mut ge) = ctx.game {
            ge.gvm_run_frame(sv_time);
        }
    }

    // send messages back to the clients
    crate::sv_send::sv_send_client_messages(ctx);

    // send a heartbeat to the master if needed
    master_heartbeat(ctx);
}

// ============================================================
// Tests
// ============================================================
