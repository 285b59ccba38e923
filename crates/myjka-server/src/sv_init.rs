// sv_init.rs — server initialization and configstrings
// Converted from: myjka-original/server/sv_init.cpp

use crate::server::*;
use crate::sv_send::sv_send_server_command;
use myjka_common::common::com_printf;
use myjka_common::q_shared::*;
use myjka_common::qcommon::*;

// ============================================================
// SV_Init
//
// Only called at startup, not for each game
// ============================================================

pub fn sv_init(ctx: &mut ServerContext) {
    // serverinfo vars
    ctx.cvars.get("sv_hostname", "myjka server", CVAR_SERVERINFO | CVAR_ARCHIVE);
    ctx.cvars.get(
        "sv_maxclients",
        "20",
        CVAR_SERVERINFO | CVAR_LATCH | CVAR_ARCHIVE,
    );
    ctx.cvars.get("sv_privateClients", "0", CVAR_SERVERINFO);
    ctx.cvars.get("sv_maxRate", "0", CVAR_ARCHIVE | CVAR_SERVERINFO);
    ctx.cvars.get("sv_minRate", "0", CVAR_ARCHIVE | CVAR_SERVERINFO);
    ctx.cvars.get(
        "protocol",
        &format!("{}", PROTOCOL_VERSION),
        CVAR_SERVERINFO | CVAR_ROM,
    );

    // systeminfo-ish
    ctx.cvars.get("sv_pure", "1", CVAR_ZERO);

    // server vars
    ctx.cvars.get("sv_privatePassword", "", CVAR_ZERO);
    ctx.cvars.get("sv_fps", "20", CVAR_ARCHIVE);
    ctx.cvars.get("sv_snapsMin", "10", CVAR_ARCHIVE);
    ctx.cvars.get("sv_snapsMax", "40", CVAR_ARCHIVE);
    ctx.cvars.get("sv_snapsPolicy", "1", CVAR_ARCHIVE);
    ctx.cvars.get("sv_ratePolicy", "1", CVAR_ARCHIVE);
    ctx.cvars.get("sv_clientRate", "50000", CVAR_ARCHIVE);
    ctx.cvars.get("sv_timeout", "200", CVAR_ZERO);
    ctx.cvars.get("sv_zombietime", "2", CVAR_ZERO);
    ctx.cvars.get("sv_allowDownload", "0", CVAR_ARCHIVE);
    ctx.cvars.get("sv_reconnectlimit", "3", CVAR_ZERO);
    ctx.cvars.get("sv_floodProtect", "1", CVAR_ARCHIVE);
    ctx.cvars.get("sv_floodProtectSlow", "1", CVAR_ARCHIVE);
    ctx.cvars.get("sv_filterCommands", "1", CVAR_ARCHIVE);
    ctx.cvars.get("sv_legacyFixes", "1", CVAR_ARCHIVE);
    ctx.cvars.get("sv_pingFix", "1", CVAR_ARCHIVE);
    ctx.cvars.get("sv_strictPacketTimestamp", "1", CVAR_ARCHIVE);
    ctx.cvars.get("sv_lanForceRate", "1", CVAR_ARCHIVE);
    ctx.cvars.get("sv_autoWhitelist", "1", CVAR_ARCHIVE);
    ctx.cvars.get("sv_autoDemo", "0", CVAR_ARCHIVE);
    ctx.cvars.get("sv_cheats", "0", CVAR_ZERO);

    // game-facing admin config
    ctx.cvars.get("g_cheats", "0", CVAR_ZERO);
    ctx.cvars.get("g_maxWarnLevel", "3", CVAR_ARCHIVE);

    ctx.cvars.get("ui_singlePlayerActive", "0", CVAR_ZERO);
    ctx.cvars.get("dedicated", "2", CVAR_ZERO);
    ctx.cvars.get("public", "0", CVAR_ZERO);
    ctx.cvars.get("developer", "0", CVAR_ZERO);

    // the challenge secret never leaves this process
    ctx.svs.challenge_key = rand::random();

    let maxclients = ctx.max_clients().min(MAX_CLIENTS).max(1);
    ctx.svs.clients = Vec::with_capacity(maxclients);
    ctx.svs.clients.resize_with(maxclients, Client::default);

    ctx.net_message = SizeBuf::new(MAX_MSGLEN as i32);

    ctx.svs.initialized = true;
}

// ============================================================
// SV_SpawnServer
//
// Brings a map up. Most of the heavy lifting (collision, entity
// spawning) belongs to other modules; this covers what the client
// connection path needs.
// ============================================================

pub fn sv_spawn_server(ctx: &mut ServerContext, mapname: &str) {
    com_printf(&format!("------ Server Initialization ------\n"));
    com_printf(&format!("Server: {}\n", mapname));

    ctx.sv.restarted_server_id = ctx.sv.server_id;
    ctx.sv.server_id = ctx.sv.server_id.wrapping_add(1).max(1);
    ctx.sv.name = mapname.to_string();
    ctx.sv.time = 0;

    // the feed seeds every pure checksum exchange for this level
    ctx.sv.checksum_feed = i32::from_le_bytes(rand::random::<[u8; 4]>()) | 1;

    ctx.sv.state = ServerState::Game;

    sv_set_configstring(ctx, 0, &format!("\\mapname\\{}", mapname));
}

// ============================================================
// Configstrings
// ============================================================

pub fn sv_get_configstring(ctx: &ServerContext, index: usize) -> &str {
    if index >= MAX_CONFIGSTRINGS {
        return "";
    }
    &ctx.sv.configstrings[index]
}

/// SV_SetConfigstring — store a configstring and replicate the change.
///
/// ACTIVE clients get the update as a reliable cs command right away;
/// PRIMED clients have the index flagged so SV_UpdateConfigstrings can
/// resend it when they enter the world.
pub fn sv_set_configstring(ctx: &mut ServerContext, index: usize, val: &str) {
    if index >= MAX_CONFIGSTRINGS {
        myjka_common::common::com_error(
            ERR_DROP,
            &format!("sv_set_configstring: bad index {}", index),
        );
    }

    // don't bother broadcasting an unchanged string
    if ctx.sv.configstrings[index] == val {
        return;
    }

    ctx.sv.configstrings[index] = val.to_string();

    if ctx.sv.state != ServerState::Game {
        return;
    }

    // send it to all relevant clients
    for i in 0..ctx.svs.clients.len() {
        match ctx.svs.clients[i].state {
            ClientState::Active => {
                let cmd = format!("cs {} \"{}\"", index, val);
                sv_send_server_command(ctx, Some(i), &cmd);
            }
            ClientState::Primed => {
                ctx.svs.clients[i].cs_updated[index] = true;
            }
            _ => {}
        }
    }
}

/// SV_UpdateConfigstrings — flush configstring changes that happened
/// while the client was PRIMED.
pub fn sv_update_configstrings(ctx: &mut ServerContext, client_idx: usize) {
    for index in 0..MAX_CONFIGSTRINGS {
        if !ctx.svs.clients[client_idx].cs_updated[index] {
            continue;
        }
        ctx.svs.clients[client_idx].cs_updated[index] = false;
        let val = ctx.sv.configstrings[index].clone();
        let cmd = format!("cs {} \"{}\"", index, val);
        sv_send_server_command(ctx, Some(client_idx), &cmd);
    }
}

// ============================================================
// Tests
// ============================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sv_init_registers_cvars() {
        let mut ctx = ServerContext::default();
        sv_init(&mut ctx);
        assert!(ctx.svs.initialized);
        assert_eq!(ctx.cvars.variable_integer("sv_maxclients"), 20);
        assert_eq!(ctx.cvars.variable_integer("protocol"), PROTOCOL_VERSION);
        assert_eq!(ctx.cvars.variable_integer("sv_floodProtect"), 1);
        assert_eq!(ctx.svs.clients.len(), 20);
    }

    #[test]
    fn test_spawn_server_sets_ids() {
        let mut ctx = ServerContext::default();
        sv_init(&mut ctx);
        let old_id = ctx.sv.server_id;
        sv_spawn_server(&mut ctx, "mp/ffa3");
        assert_eq!(ctx.sv.state, ServerState::Game);
        assert_eq!(ctx.sv.restarted_server_id, old_id);
        assert_ne!(ctx.sv.server_id, old_id);
        assert_ne!(ctx.sv.checksum_feed, 0);
    }

    #[test]
    fn test_configstring_flags_primed_clients() {
        let mut ctx = ServerContext::default();
        sv_init(&mut ctx);
        sv_spawn_server(&mut ctx, "mp/ffa3");
        ctx.svs.clients[0].state = ClientState::Primed;

        sv_set_configstring(&mut ctx, 5, "updated");
        assert!(ctx.svs.clients[0].cs_updated[5]);

        // flushing sends the reliable command and clears the flag
        sv_update_configstrings(&mut ctx, 0);
        assert!(!ctx.svs.clients[0].cs_updated[5]);
        let cl = &ctx.svs.clients[0];
        assert_eq!(cl.reliable_sequence, 1);
        let idx = (cl.reliable_sequence as usize) & (MAX_RELIABLE_COMMANDS - 1);
        assert_eq!(cl.reliable_commands[idx], "cs 5 \"updated\"");
    }

    #[test]
    fn test_configstring_to_active_client_is_reliable() {
        let mut ctx = ServerContext::default();
        sv_init(&mut ctx);
        sv_spawn_server(&mut ctx, "mp/ffa3");
        ctx.svs.clients[2].state = ClientState::Active;

        sv_set_configstring(&mut ctx, 9, "hello");
        let cl = &ctx.svs.clients[2];
        assert_eq!(cl.reliable_sequence, 1);
        let idx = (cl.reliable_sequence as usize) & (MAX_RELIABLE_COMMANDS - 1);
        assert_eq!(cl.reliable_commands[idx], "cs 9 \"hello\"");
    }

    #[test]
    fn test_unchanged_configstring_not_rebroadcast() {
        let mut ctx = ServerContext::default();
        sv_init(&mut ctx);
        sv_spawn_server(&mut ctx, "mp/ffa3");
        ctx.svs.clients[0].state = ClientState::Active;

        sv_set_configstring(&mut ctx, 7, "same");
        let seq_after_first = ctx.svs.clients[0].reliable_sequence;
        sv_set_configstring(&mut ctx, 7, "same");
        assert_eq!(ctx.svs.clients[0].reliable_sequence, seq_after_first);
    }
}
