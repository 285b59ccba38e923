// sv_smod.rs — SMOD administrative command dispatch
// Converted from: myjka-original/server/smod.cpp
//
// Admins authenticate with a numeric account id and password; each
// account carries a capability bitmask. Commands the engine does not
// handle (or refuses) fall through to the game module's native SMOD.

use crate::server::*;
use crate::sv_send::sv_send_server_command;
use myjka_common::cmd::CmdArgs;
use myjka_common::common::com_dprintf;
use myjka_common::q_shared::*;

// capability bits, one per command
pub const SMOD_CAP_FREEZE: i32 = 0x40000;
pub const SMOD_CAP_WARN: i32 = 0x80000;
pub const SMOD_CAP_WARNLVL: i32 = 0x100000;
pub const SMOD_CAP_TELEPORT: i32 = 0x1000000;
pub const SMOD_CAP_CHEATS: i32 = 0x2000000;
pub const SMOD_CAP_JAGUID: i32 = 0x4000000;
pub const SMOD_CAP_TELL: i32 = 0x8000000;
pub const SMOD_CAP_SLAY: i32 = 0x10000000;

type SmodFn = fn(&mut ServerContext, usize, &CmdArgs);

struct SmodCmd {
    name: &'static str,
    lvl: i32,
    func: SmodFn,
}

static SMODCMDS: &[SmodCmd] = &[
    SmodCmd { name: "freeze", lvl: SMOD_CAP_FREEZE, func: smod_freeze },
    SmodCmd { name: "warn", lvl: SMOD_CAP_WARN, func: smod_warn },
    SmodCmd { name: "warnlvl", lvl: SMOD_CAP_WARNLVL, func: smod_warn_level },
    SmodCmd { name: "bring", lvl: SMOD_CAP_TELEPORT, func: smod_bring },
    SmodCmd { name: "tp", lvl: SMOD_CAP_TELEPORT, func: smod_teleport },
    SmodCmd { name: "cheats", lvl: SMOD_CAP_CHEATS, func: smod_cheats },
    SmodCmd { name: "jaguid", lvl: SMOD_CAP_JAGUID, func: smod_jaguid },
    SmodCmd { name: "tell", lvl: SMOD_CAP_TELL, func: smod_tell },
    SmodCmd { name: "slay", lvl: SMOD_CAP_SLAY, func: smod_slay },
];

// ============================================================
// Util
// ============================================================

pub fn smod_is_enabled(ctx: &ServerContext) -> bool {
    ctx.cvars.variable_integer("g_smodconfig_1") != 0
}

pub fn smod_max_warn_level(ctx: &ServerContext) -> i32 {
    ctx.cvars.variable_integer("g_maxWarnLevel")
}

pub fn smod_authenticate_client(ctx: &mut ServerContext, client_idx: usize, id: i32, password: &str) {
    if ctx.svs.clients[client_idx].state != ClientState::Active || !smod_is_enabled(ctx) {
        return;
    }

    if id < SMOD_ADMIN_START || id > SMOD_ADMIN_END {
        return;
    }

    let admin_pass = ctx
        .cvars
        .variable_string(&format!("g_smodAdminPassword_{}", id))
        .to_string();
    if admin_pass.is_empty() {
        return;
    }

    if password == admin_pass {
        let mask = ctx.cvars.variable_integer(&format!("g_smodconfig_{}", id));
        let cl = &mut ctx.svs.clients[client_idx];
        cl.smod_id = id;
        cl.smod = mask;
    }
}

pub fn smod_logout_client(ctx: &mut ServerContext, client_idx: usize) {
    let cl = &mut ctx.svs.clients[client_idx];
    cl.smod_id = SMOD_LOGGED_OUT;
    cl.smod = SMOD_LOGGED_OUT;
    cl.is_frozen = false;
    cl.warn_level = 0;
}

pub fn smod_is_logged_in(cl: &Client) -> bool {
    cl.smod > SMOD_LOGGED_OUT && cl.smod_id > SMOD_LOGGED_OUT
}

fn smod_is_authorized(cl: &Client, cmd: &SmodCmd) -> bool {
    (cl.smod & cmd.lvl) == cmd.lvl
}

fn smod_print(ctx: &mut ServerContext, client_idx: usize, msg: &str) {
    sv_send_server_command(
        ctx,
        Some(client_idx),
        &format!("print \"{}{}\n\"\n", S_COLOR_YELLOW, msg),
    );
}

fn smod_command_check(ctx: &mut ServerContext, src: usize, cmd: Option<&SmodCmd>) -> bool {
    if ctx.svs.clients[src].state != ClientState::Active || !smod_is_enabled(ctx) {
        return false; // fall back to native SMOD
    }

    let cmd = match cmd {
        Some(cmd) => cmd,
        None => return false, // fall back to native SMOD
    };

    if !smod_is_logged_in(&ctx.svs.clients[src]) {
        smod_print(ctx, src, "You have to be logged in in order to use this command.");
        return false;
    }

    if !smod_is_authorized(&ctx.svs.clients[src], cmd) {
        smod_print(ctx, src, "This command is not enabled for your SMOD admin account.");
        return false;
    }

    true
}

/// Entry point from the client command dispatcher. Returns true when the
/// command was consumed here; false lets it fall through to the game.
pub fn sv_smod_command(ctx: &mut ServerContext, src: usize, args: &CmdArgs) -> bool {
    let verb = args.argv(1).to_string();

    if verb == "login" {
        if !smod_is_enabled(ctx) {
            return false;
        }
        let id: i32 = args.argv(2).parse().unwrap_or(0);
        let password = args.argv(3).to_string();
        smod_authenticate_client(ctx, src, id, &password);
        return true;
    }

    if verb == "logout" {
        if !smod_is_enabled(ctx) {
            return false;
        }
        smod_logout_client(ctx, src);
        return true;
    }

    let cmd = SMODCMDS.iter().find(|c| c.name == verb);
    if !smod_command_check(ctx, src, cmd) {
        return false;
    }

    (cmd.unwrap().func)(ctx, src, args);
    true
}

// ============================================================
// Target resolution
// ============================================================

fn smod_get_client(ctx: &mut ServerContext, src: usize, handle: &str) -> Option<usize> {
    if handle.is_empty() {
        return None;
    }

    if handle.as_bytes()[0].is_ascii_digit() {
        return smod_get_client_by_id(ctx, handle.parse().unwrap_or(-1));
    }

    smod_get_client_by_handle(ctx, src, handle)
}

fn smod_get_client_by_id(ctx: &ServerContext, id: i32) -> Option<usize> {
    if id >= 0 && (id as usize) < ctx.svs.clients.len() {
        if ctx.svs.clients[id as usize].state == ClientState::Active {
            return Some(id as usize);
        }
    }
    None
}

fn smod_get_client_by_handle(ctx: &mut ServerContext, src: usize, handle: &str) -> Option<usize> {
    let needle = handle.to_ascii_lowercase();
    let mut found: Vec<usize> = Vec::new();

    for i in 0..ctx.svs.clients.len() {
        if ctx.svs.clients[i].state != ClientState::Active {
            continue;
        }
        let name = q_strip_color(&ctx.svs.clients[i].name).to_ascii_lowercase();
        if name.contains(&needle) {
            found.push(i);
        }
    }

    if found.len() > 1 {
        let mut response = "Multiple candidates found:\n".to_string();
        for &f in &found {
            response.push_str(&format!(
                "{}[{}] {}\n",
                S_COLOR_YELLOW, f, ctx.svs.clients[f].name
            ));
        }
        smod_print(ctx, src, &response);
        return None;
    }

    found.first().copied()
}

/*
==================
Custom commands
==================
*/

fn smod_freeze(ctx: &mut ServerContext, src: usize, args: &CmdArgs) {
    let target = args.argv(2).to_string();
    let reason = args.args_from(3);
    if target.is_empty() {
        smod_print(ctx, src, "Usage: smod freeze <clientid or name> <optional: reason>");
        return;
    }

    let tar = match smod_get_client(ctx, src, &target) {
        Some(tar) => tar,
        None => {
            smod_print(ctx, src, "Couldn't find target with given parameter");
            return;
        }
    };

    let tar_name = ctx.svs.clients[tar].name.clone();
    let admin_id = ctx.svs.clients[src].smod_id;

    if ctx.svs.clients[tar].is_frozen {
        ctx.svs.clients[tar].is_frozen = false;
        sv_send_server_command(
            ctx,
            None,
            &format!(
                "chat \"{}{} {}was {}unfrozen {}by Admin {}#{}\n\"\n",
                S_COLOR_WHITE, tar_name, S_COLOR_WHITE, S_COLOR_RED, S_COLOR_WHITE,
                S_COLOR_YELLOW, admin_id
            ),
        );
    } else {
        ctx.svs.clients[tar].is_frozen = true;
        if !reason.is_empty() {
            sv_send_server_command(
                ctx,
                None,
                &format!(
                    "chat \"{}{} {}was {}frozen {}by Admin {}#{}{} for {}{}\n\"\n",
                    S_COLOR_WHITE, tar_name, S_COLOR_WHITE, S_COLOR_RED, S_COLOR_WHITE,
                    S_COLOR_YELLOW, admin_id, S_COLOR_WHITE, S_COLOR_RED, reason
                ),
            );
        } else {
            sv_send_server_command(
                ctx,
                None,
                &format!(
                    "chat \"{}{} {}was {}frozen {}by Admin {}#{}\n\"\n",
                    S_COLOR_WHITE, tar_name, S_COLOR_WHITE, S_COLOR_RED, S_COLOR_WHITE,
                    S_COLOR_YELLOW, admin_id
                ),
            );
        }
    }
}

fn smod_warn(ctx: &mut ServerContext, src: usize, args: &CmdArgs) {
    let target = args.argv(2).to_string();
    let level = args.argv(3).to_string();
    if target.is_empty() {
        smod_print(ctx, src, "Usage: smod warn <clientid or name> <optional: level>");
        return;
    }

    let tar = match smod_get_client(ctx, src, &target) {
        Some(tar) => tar,
        None => {
            smod_print(ctx, src, "Couldn't find target with given parameter");
            return;
        }
    };

    let mut set_level = 0;
    if !level.is_empty() && level.as_bytes()[0].is_ascii_digit() {
        set_level = level.parse().unwrap_or(0);
    }

    if set_level > 0 {
        ctx.svs.clients[tar].warn_level = set_level;
    } else {
        ctx.svs.clients[tar].warn_level += 1;
    }

    let tar_name = ctx.svs.clients[tar].name.clone();
    let warn_level = ctx.svs.clients[tar].warn_level;
    let max_level = smod_max_warn_level(ctx);
    let admin_id = ctx.svs.clients[src].smod_id;

    sv_send_server_command(
        ctx,
        Some(src),
        &format!(
            "print \"{}Warning {} {}{}/{}\n\"\n",
            S_COLOR_YELLOW, tar_name, S_COLOR_YELLOW, warn_level, max_level
        ),
    );
    sv_send_server_command(
        ctx,
        None,
        &format!(
            "chat \"{}{} {}warning {}{}/{} {}by Admin {}#{}\n\"\n",
            S_COLOR_WHITE, tar_name, S_COLOR_RED, S_COLOR_WHITE, warn_level, max_level,
            S_COLOR_WHITE, S_COLOR_YELLOW, admin_id
        ),
    );
}

fn smod_warn_level(ctx: &mut ServerContext, src: usize, args: &CmdArgs) {
    let target = args.argv(2).to_string();
    if target.is_empty() {
        smod_print(ctx, src, "Usage: smod warnlvl <clientid or name>");
        return;
    }

    let tar = match smod_get_client(ctx, src, &target) {
        Some(tar) => tar,
        None => {
            smod_print(ctx, src, "Couldn't find target with given parameter");
            return;
        }
    };

    let tar_name = ctx.svs.clients[tar].name.clone();
    let warn_level = ctx.svs.clients[tar].warn_level;
    let max_level = smod_max_warn_level(ctx);
    sv_send_server_command(
        ctx,
        Some(src),
        &format!(
            "print \"{}'s warn level is {}{}/{}\n\"\n",
            tar_name, S_COLOR_YELLOW, warn_level, max_level
        ),
    );
}

fn smod_jaguid(ctx: &mut ServerContext, src: usize, args: &CmdArgs) {
    let target = args.argv(2).to_string();
    if target.is_empty() {
        smod_print(ctx, src, "Usage: smod jaguid <clientid or name>");
        return;
    }

    let tar = match smod_get_client(ctx, src, &target) {
        Some(tar) => tar,
        None => {
            smod_print(ctx, src, "Couldn't find target with given parameter");
            return;
        }
    };

    let tar_name = ctx.svs.clients[tar].name.clone();
    let guid = info_value_for_key(&ctx.svs.clients[tar].userinfo, "ja_guid");
    sv_send_server_command(
        ctx,
        Some(src),
        &format!(
            "print \"{}'s JA GUID is {}{}\n\"\n",
            tar_name, S_COLOR_YELLOW, guid
        ),
    );
}

fn smod_tell(ctx: &mut ServerContext, src: usize, args: &CmdArgs) {
    let target = args.argv(2).to_string();
    let message = args.args_from(3);
    if target.is_empty() || message.is_empty() {
        smod_print(ctx, src, "Usage: smod tell <clientid or name> <message>");
        return;
    }

    let tar = match smod_get_client(ctx, src, &target) {
        Some(tar) => tar,
        None => {
            smod_print(ctx, src, "Couldn't find target with given parameter");
            return;
        }
    };

    if tar == src {
        smod_print(ctx, src, "Attempting to smod tell self, stopping");
        return;
    }

    let tar_name = ctx.svs.clients[tar].name.clone();
    let admin_id = ctx.svs.clients[src].smod_id;
    let chat = format!(
        "chat \"{}[Admin {}#{}{}->{}{}]{}{}\n\"\n",
        S_COLOR_WHITE, S_COLOR_YELLOW, admin_id, S_COLOR_WHITE, tar_name, S_COLOR_WHITE,
        S_COLOR_MAGENTA, message
    );
    sv_send_server_command(ctx, Some(src), &chat);
    sv_send_server_command(ctx, Some(tar), &chat);
}

fn smod_slay(ctx: &mut ServerContext, src: usize, args: &CmdArgs) {
    let target = args.argv(2).to_string();
    if target.is_empty() {
        smod_print(ctx, src, "Usage: smod slay <clientid or name>");
        return;
    }

    let tar = match smod_get_client(ctx, src, &target) {
        Some(tar) => tar,
        None => {
            smod_print(ctx, src, "Couldn't slay target with given parameter");
            return;
        }
    };

    let tar_name = ctx.svs.clients[tar].name.clone();
    let admin_id = ctx.svs.clients[src].smod_id;
    sv_send_server_command(
        ctx,
        Some(src),
        &format!("print \"{}Slaying {}\n\"\n", S_COLOR_YELLOW, tar_name),
    );
    sv_send_server_command(
        ctx,
        None,
        &format!(
            "chat \"{}{} {}was {}slain {}by Admin {}#{}\n\"\n",
            S_COLOR_WHITE, tar_name, S_COLOR_WHITE, S_COLOR_RED, S_COLOR_WHITE,
            S_COLOR_YELLOW, admin_id
        ),
    );

    if let Some(ref mut ge) = ctx.game {
        if let Some(ps) = ge.player_state_mut(tar) {
            ps.falling_to_death = 1;
        }
    }
}

fn smod_cheats(ctx: &mut ServerContext, src: usize, args: &CmdArgs) {
    let enabled = args.argv(2).to_string();
    if enabled != "1" && enabled != "0" {
        smod_print(ctx, src, "Usage: smod cheats <0: disabled or 1: enabled>");
        return;
    }

    ctx.cvars.set("g_cheats", &enabled);
    ctx.cvars.set("sv_cheats", &enabled);

    sv_send_server_command(
        ctx,
        Some(src),
        &format!("print \"{}Set sv_cheats = {}\n\"\n", S_COLOR_YELLOW, enabled),
    );
}

fn smod_bring(ctx: &mut ServerContext, src: usize, args: &CmdArgs) {
    let target = args.argv(2).to_string();
    if target.is_empty() {
        smod_print(ctx, src, "Usage: smod bring <clientid or name>");
        return;
    }

    let tar = match smod_get_client(ctx, src, &target) {
        Some(tar) => tar,
        None => {
            smod_print(ctx, src, "Couldn't bring target with given parameter");
            return;
        }
    };

    smod_execute_teleport(ctx, src, tar, src);
}

fn smod_teleport(ctx: &mut ServerContext, src: usize, args: &CmdArgs) {
    let from = args.argv(2).to_string();
    let to = args.argv(3).to_string();
    if from.is_empty() {
        smod_print(
            ctx,
            src,
            "Usage: smod tp <clientid or name> <optional: target clientid or name>",
        );
        return;
    }

    let mut from_client = match smod_get_client(ctx, src, &from) {
        Some(c) => c,
        None => {
            smod_print(ctx, src, "Couldn't tp to target with given parameter");
            return;
        }
    };

    let mut to_client: Option<usize> = None;
    if !to.is_empty() {
        to_client = smod_get_client(ctx, src, &to);
        if to_client.is_none() {
            smod_print(ctx, src, "Couldn't tp target1 to target2 with given parameter");
            return;
        }
    }

    // a single argument teleports the admin to the named client
    let to_client = match to_client {
        Some(c) => c,
        None => {
            let c = from_client;
            from_client = src;
            c
        }
    };

    smod_execute_teleport(ctx, src, from_client, to_client);
}

fn smod_execute_teleport(ctx: &mut ServerContext, src: usize, from_client: usize, to_client: usize) {
    if from_client == to_client {
        smod_print(ctx, src, "Can't tp targets because they are the same person!");
        return;
    }

    let from_name = ctx.svs.clients[from_client].name.clone();
    let to_name = ctx.svs.clients[to_client].name.clone();
    let admin_id = ctx.svs.clients[src].smod_id;

    sv_send_server_command(
        ctx,
        Some(src),
        &format!(
            "print \"{}Teleporting {}{} to {}\n\"\n",
            S_COLOR_YELLOW, from_name, S_COLOR_YELLOW, to_name
        ),
    );
    sv_send_server_command(
        ctx,
        None,
        &format!(
            "chat \"{}{} {}was {}teleported {}to {} {}by Admin {}#{}\n\"\n",
            S_COLOR_WHITE, from_name, S_COLOR_WHITE, S_COLOR_RED, S_COLOR_WHITE, to_name,
            S_COLOR_WHITE, S_COLOR_YELLOW, admin_id
        ),
    );

    if let Some(ref mut ge) = ctx.game {
        let origin = ge.player_state(to_client).map(|ps| ps.origin);
        if let Some(origin) = origin {
            if let Some(ps) = ge.player_state_mut(from_client) {
                ps.origin = origin;
            }
        }
    } else {
        com_dprintf("smod teleport with no game module loaded\n");
    }
}

// ============================================================
// Tests
// ============================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sv_game::GameExport;
    use crate::sv_init::{sv_init, sv_spawn_server};
    use myjka_common::qcommon::MAX_RELIABLE_COMMANDS;

    fn make_test_server_context() -> ServerContext {
        let mut ctx = ServerContext::default();
        ctx.cvars.set("sv_maxclients", "4");
        sv_init(&mut ctx);
        sv_spawn_server(&mut ctx, "mp/ffa3");
        ctx.game = Some(GameExport::new(4));

        // SMOD on, with account 2 holding the full command set
        ctx.cvars.set("g_smodconfig_1", "1");
        ctx.cvars.set("g_smodAdminPassword_2", "hunter2");
        ctx.cvars.set("g_smodconfig_2", &format!("{}", 0x7fffffff));

        for i in 0..4 {
            ctx.svs.clients[i].state = ClientState::Active;
            ctx.svs.clients[i].name = format!("player{}", i);
        }
        ctx
    }

    fn login(ctx: &mut ServerContext, idx: usize) {
        smod_authenticate_client(ctx, idx, 2, "hunter2");
        assert!(smod_is_logged_in(&ctx.svs.clients[idx]));
    }

    fn last_command(ctx: &ServerContext, idx: usize) -> String {
        let cl = &ctx.svs.clients[idx];
        let index = (cl.reliable_sequence as usize) & (MAX_RELIABLE_COMMANDS - 1);
        cl.reliable_commands[index].clone()
    }

    // =========================================================================
    // Authentication
    // =========================================================================

    #[test]
    fn test_authenticate_success() {
        let mut ctx = make_test_server_context();
        smod_authenticate_client(&mut ctx, 0, 2, "hunter2");
        assert_eq!(ctx.svs.clients[0].smod_id, 2);
        assert_eq!(ctx.svs.clients[0].smod, 0x7fffffff);
    }

    #[test]
    fn test_authenticate_wrong_password() {
        let mut ctx = make_test_server_context();
        smod_authenticate_client(&mut ctx, 0, 2, "wrong");
        assert_eq!(ctx.svs.clients[0].smod_id, SMOD_LOGGED_OUT);
    }

    #[test]
    fn test_authenticate_unconfigured_account() {
        let mut ctx = make_test_server_context();
        // account 5 has no password cvar set
        smod_authenticate_client(&mut ctx, 0, 5, "");
        assert_eq!(ctx.svs.clients[0].smod_id, SMOD_LOGGED_OUT);
    }

    #[test]
    fn test_authenticate_id_out_of_range() {
        let mut ctx = make_test_server_context();
        smod_authenticate_client(&mut ctx, 0, 0, "hunter2");
        smod_authenticate_client(&mut ctx, 0, 17, "hunter2");
        assert_eq!(ctx.svs.clients[0].smod_id, SMOD_LOGGED_OUT);
    }

    #[test]
    fn test_authenticate_requires_active_state() {
        let mut ctx = make_test_server_context();
        ctx.svs.clients[0].state = ClientState::Connected;
        smod_authenticate_client(&mut ctx, 0, 2, "hunter2");
        assert_eq!(ctx.svs.clients[0].smod_id, SMOD_LOGGED_OUT);
    }

    #[test]
    fn test_authenticate_requires_smod_enabled() {
        let mut ctx = make_test_server_context();
        ctx.cvars.set("g_smodconfig_1", "0");
        smod_authenticate_client(&mut ctx, 0, 2, "hunter2");
        assert_eq!(ctx.svs.clients[0].smod_id, SMOD_LOGGED_OUT);
    }

    #[test]
    fn test_logout_clears_admin_state() {
        let mut ctx = make_test_server_context();
        login(&mut ctx, 0);
        ctx.svs.clients[0].is_frozen = true;
        ctx.svs.clients[0].warn_level = 2;

        smod_logout_client(&mut ctx, 0);
        let cl = &ctx.svs.clients[0];
        assert_eq!(cl.smod_id, SMOD_LOGGED_OUT);
        assert_eq!(cl.smod, SMOD_LOGGED_OUT);
        assert!(!cl.is_frozen);
        assert_eq!(cl.warn_level, 0);
    }

    #[test]
    fn test_login_via_command_channel() {
        let mut ctx = make_test_server_context();
        let args = CmdArgs::tokenize("smod login 2 hunter2");
        assert!(sv_smod_command(&mut ctx, 0, &args));
        assert_eq!(ctx.svs.clients[0].smod_id, 2);

        let args = CmdArgs::tokenize("smod logout");
        assert!(sv_smod_command(&mut ctx, 0, &args));
        assert_eq!(ctx.svs.clients[0].smod_id, SMOD_LOGGED_OUT);
    }

    // =========================================================================
    // Authorization
    // =========================================================================

    #[test]
    fn test_command_requires_exact_capability_mask() {
        let mut ctx = make_test_server_context();
        ctx.cvars.set("g_smodconfig_2", &format!("{}", SMOD_CAP_WARN));
        login(&mut ctx, 0);

        // warn requires 0x80000, which the account has
        let args = CmdArgs::tokenize("smod warn 1");
        assert!(sv_smod_command(&mut ctx, 0, &args));
        assert_eq!(ctx.svs.clients[1].warn_level, 1);

        // freeze requires a bit the account lacks: refused, falls through
        let args = CmdArgs::tokenize("smod freeze 1");
        assert!(!sv_smod_command(&mut ctx, 0, &args));
        assert!(!ctx.svs.clients[1].is_frozen);
        assert!(last_command(&ctx, 0).contains("not enabled for your SMOD admin account"));
    }

    #[test]
    fn test_command_requires_login() {
        let mut ctx = make_test_server_context();
        let args = CmdArgs::tokenize("smod warn 1");
        assert!(!sv_smod_command(&mut ctx, 0, &args));
        assert_eq!(ctx.svs.clients[1].warn_level, 0);
        assert!(last_command(&ctx, 0).contains("You have to be logged in"));
    }

    #[test]
    fn test_unknown_verb_falls_through_to_game() {
        let mut ctx = make_test_server_context();
        login(&mut ctx, 0);
        let args = CmdArgs::tokenize("smod fancynewthing 1");
        assert!(!sv_smod_command(&mut ctx, 0, &args));
    }

    #[test]
    fn test_disabled_smod_falls_through() {
        let mut ctx = make_test_server_context();
        ctx.cvars.set("g_smodconfig_1", "0");
        let args = CmdArgs::tokenize("smod login 2 hunter2");
        assert!(!sv_smod_command(&mut ctx, 0, &args));
    }

    // =========================================================================
    // Commands
    // =========================================================================

    #[test]
    fn test_warn_increments_and_sets() {
        let mut ctx = make_test_server_context();
        login(&mut ctx, 0);

        sv_smod_command(&mut ctx, 0, &CmdArgs::tokenize("smod warn 2"));
        assert_eq!(ctx.svs.clients[2].warn_level, 1);
        sv_smod_command(&mut ctx, 0, &CmdArgs::tokenize("smod warn 2"));
        assert_eq!(ctx.svs.clients[2].warn_level, 2);

        // explicit level overrides
        sv_smod_command(&mut ctx, 0, &CmdArgs::tokenize("smod warn 2 7"));
        assert_eq!(ctx.svs.clients[2].warn_level, 7);

        // the announcement mentions the configured maximum
        assert!(last_command(&ctx, 1).contains("7/3"));
    }

    #[test]
    fn test_warnlvl_reports_to_admin_only() {
        let mut ctx = make_test_server_context();
        login(&mut ctx, 0);
        ctx.svs.clients[2].warn_level = 2;

        let seq_other = ctx.svs.clients[1].reliable_sequence;
        sv_smod_command(&mut ctx, 0, &CmdArgs::tokenize("smod warnlvl 2"));
        assert!(last_command(&ctx, 0).contains("warn level is"));
        assert_eq!(ctx.svs.clients[1].reliable_sequence, seq_other);
    }

    #[test]
    fn test_freeze_toggles() {
        let mut ctx = make_test_server_context();
        login(&mut ctx, 0);

        sv_smod_command(&mut ctx, 0, &CmdArgs::tokenize("smod freeze 3 spamming"));
        assert!(ctx.svs.clients[3].is_frozen);
        assert!(last_command(&ctx, 1).contains("frozen"));

        sv_smod_command(&mut ctx, 0, &CmdArgs::tokenize("smod freeze 3"));
        assert!(!ctx.svs.clients[3].is_frozen);
        assert!(last_command(&ctx, 1).contains("unfrozen"));
    }

    #[test]
    fn test_tell_self_refused() {
        let mut ctx = make_test_server_context();
        login(&mut ctx, 0);
        sv_smod_command(&mut ctx, 0, &CmdArgs::tokenize("smod tell 0 hello me"));
        assert!(last_command(&ctx, 0).contains("smod tell self"));
    }

    #[test]
    fn test_tell_private_delivery() {
        let mut ctx = make_test_server_context();
        login(&mut ctx, 0);

        let seq_bystander = ctx.svs.clients[2].reliable_sequence;
        sv_smod_command(&mut ctx, 0, &CmdArgs::tokenize("smod tell 1 get over here"));

        assert!(last_command(&ctx, 0).contains("get over here"));
        assert!(last_command(&ctx, 1).contains("get over here"));
        assert_eq!(ctx.svs.clients[2].reliable_sequence, seq_bystander);
    }

    #[test]
    fn test_slay_sets_falling_to_death() {
        let mut ctx = make_test_server_context();
        login(&mut ctx, 0);
        sv_smod_command(&mut ctx, 0, &CmdArgs::tokenize("smod slay 2"));
        let ps = ctx.game.as_ref().unwrap().player_state(2).unwrap();
        assert_eq!(ps.falling_to_death, 1);
        assert!(last_command(&ctx, 1).contains("slain"));
    }

    #[test]
    fn test_cheats_sets_both_cvars() {
        let mut ctx = make_test_server_context();
        login(&mut ctx, 0);

        sv_smod_command(&mut ctx, 0, &CmdArgs::tokenize("smod cheats 1"));
        assert_eq!(ctx.cvars.variable_integer("g_cheats"), 1);
        assert_eq!(ctx.cvars.variable_integer("sv_cheats"), 1);

        // anything but 0/1 prints usage and changes nothing
        sv_smod_command(&mut ctx, 0, &CmdArgs::tokenize("smod cheats maybe"));
        assert_eq!(ctx.cvars.variable_integer("g_cheats"), 1);
    }

    #[test]
    fn test_bring_teleports_target_to_admin() {
        let mut ctx = make_test_server_context();
        login(&mut ctx, 0);
        {
            let ge = ctx.game.as_mut().unwrap();
            ge.player_state_mut(0).unwrap().origin = [10.0, 20.0, 30.0];
            ge.player_state_mut(2).unwrap().origin = [-50.0, 0.0, 9.0];
        }

        sv_smod_command(&mut ctx, 0, &CmdArgs::tokenize("smod bring 2"));
        let ge = ctx.game.as_ref().unwrap();
        assert_eq!(ge.player_state(2).unwrap().origin, [10.0, 20.0, 30.0]);
    }

    #[test]
    fn test_tp_single_argument_moves_admin() {
        let mut ctx = make_test_server_context();
        login(&mut ctx, 0);
        {
            let ge = ctx.game.as_mut().unwrap();
            ge.player_state_mut(0).unwrap().origin = [0.0, 0.0, 0.0];
            ge.player_state_mut(3).unwrap().origin = [7.0, 8.0, 9.0];
        }

        sv_smod_command(&mut ctx, 0, &CmdArgs::tokenize("smod tp 3"));
        let ge = ctx.game.as_ref().unwrap();
        assert_eq!(ge.player_state(0).unwrap().origin, [7.0, 8.0, 9.0]);
    }

    #[test]
    fn test_tp_two_arguments() {
        let mut ctx = make_test_server_context();
        login(&mut ctx, 0);
        {
            let ge = ctx.game.as_mut().unwrap();
            ge.player_state_mut(1).unwrap().origin = [1.0, 1.0, 1.0];
            ge.player_state_mut(2).unwrap().origin = [2.0, 2.0, 2.0];
        }

        sv_smod_command(&mut ctx, 0, &CmdArgs::tokenize("smod tp 1 2"));
        let ge = ctx.game.as_ref().unwrap();
        assert_eq!(ge.player_state(1).unwrap().origin, [2.0, 2.0, 2.0]);
    }

    #[test]
    fn test_tp_same_person_refused() {
        let mut ctx = make_test_server_context();
        login(&mut ctx, 0);
        sv_smod_command(&mut ctx, 0, &CmdArgs::tokenize("smod tp 1 1"));
        assert!(last_command(&ctx, 0).contains("same person"));
    }

    // =========================================================================
    // Target resolution
    // =========================================================================

    #[test]
    fn test_get_client_by_id_bounds_checked() {
        let mut ctx = make_test_server_context();
        assert_eq!(smod_get_client_by_id(&ctx, 2), Some(2));
        assert_eq!(smod_get_client_by_id(&ctx, 99), None);
        ctx.svs.clients[2].state = ClientState::Connected;
        assert_eq!(smod_get_client_by_id(&ctx, 2), None);
    }

    #[test]
    fn test_get_client_by_name_substring_and_color() {
        let mut ctx = make_test_server_context();
        login(&mut ctx, 0);
        ctx.svs.clients[2].name = "^1Darth ^7Maul".to_string();

        let found = smod_get_client(&mut ctx, 0, "maul");
        assert_eq!(found, Some(2));
    }

    #[test]
    fn test_ambiguous_handle_lists_candidates() {
        let mut ctx = make_test_server_context();
        login(&mut ctx, 0);
        ctx.svs.clients[1].name = "Jedi One".to_string();
        ctx.svs.clients[2].name = "Jedi Two".to_string();

        let found = smod_get_client(&mut ctx, 0, "jedi");
        assert_eq!(found, None);
        assert!(last_command(&ctx, 0).contains("Multiple candidates"));
    }
}
