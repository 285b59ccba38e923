// server.rs — core server types and constants
// Converted from: myjka-original/server/server.h
//
// Copyright (C) 1999-2005, Id Software, Inc.
// Copyright (C) 2013-2015, OpenJK contributors
// Licensed under the GNU General Public License v2.

use myjka_common::cvar::CvarContext;
use myjka_common::q_shared::*;
use myjka_common::qcommon::*;

use crate::sv_game::GameExport;

use std::fs::File;
use std::path::PathBuf;

// ============================================================
// Constants
// ============================================================

pub const MAX_CLIENTS: usize = 32;

pub const MAX_MASTERS: usize = 8; // max recipients for heartbeat packets

// SMOD admin accounts
pub const SMOD_ADMIN_START: i32 = 1;
pub const SMOD_ADMIN_END: i32 = 16;
pub const SMOD_LOGGED_OUT: i32 = -1;

// userinfo change throttle
pub const INFO_CHANGE_MIN_INTERVAL: i32 = 6000; // 6 seconds is reasonable I suppose
pub const INFO_CHANGE_MAX_COUNT: i32 = 3; // only allow 3 changes within the 6 seconds

// ============================================================
// sv_legacyFixes bits — each bit OPTS OUT of one engine-side fix for
// game modules that want the stock behavior back
// ============================================================

pub const SVFIXES_DISABLE_GC_CRASHFIX: i32 = 1 << 0;
pub const SVFIXES_DISABLE_NPC_CRASHFIX: i32 = 1 << 1;
pub const SVFIXES_DISABLE_TEAM_CRASHFIX: i32 = 1 << 2;
pub const SVFIXES_ALLOW_CALLTEAMVOTE: i32 = 1 << 3;
pub const SVFIXES_ALLOW_NEGATIVE_CALLVOTES: i32 = 1 << 4;
pub const SVFIXES_ALLOW_INVALID_PLAYER_NAMES: i32 = 1 << 5;
pub const SVFIXES_ALLOW_INVALID_FORCEPOWERS: i32 = 1 << 6;
pub const SVFIXES_ALLOW_BROKEN_MODELS: i32 = 1 << 7;
pub const SVFIXES_ALLOW_INVALID_FORCESEL: i32 = 1 << 8;
pub const SVFIXES_ALLOW_INVALID_VIEWANGLES: i32 = 1 << 9;
pub const SVFIXES_DISABLE_SPEC_ALTFIRE_FOLLOWPREV: i32 = 1 << 10;

// ============================================================
// server_state_t
// ============================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(i32)]
pub enum ServerState {
    #[default]
    Dead = 0,    // no map loaded
    Loading = 1, // spawning level entities
    Game = 2,    // actively running
}

// ============================================================
// clientState_t (connection state of a client on the server)
// ============================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
#[repr(i32)]
pub enum ClientState {
    #[default]
    Free = 0,      // can be reused for a new connection
    Zombie = 1,    // client has been disconnected, but don't reuse connection for a couple seconds
    Connected = 2, // has been assigned to a client_t, but no gamestate yet
    Primed = 3,    // gamestate has been sent, but client hasn't sent a usercmd
    Active = 4,    // client is fully in game
}

// ============================================================
// Known game modules — some engine fixes only apply to some of them
// ============================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ServerMod {
    #[default]
    Unknown,
    BaseJKA,
    JAPlus,
    MBII,
    JAPro,
}

// ============================================================
// ClientFrame — per-message bookkeeping for ping calculation
// ============================================================

#[derive(Debug, Clone, Copy)]
pub struct ClientFrame {
    /// svs.time (or wall clock with sv_pingFix) when the client
    /// acknowledged this message. -1 until acknowledged.
    pub message_acked: i32,
    /// svs.time when the message was sent. -1 if never sent.
    pub message_sent: i32,
}

impl Default for ClientFrame {
    fn default() -> Self {
        Self {
            message_acked: -1,
            message_sent: -1,
        }
    }
}

// ============================================================
// Client — per-client server data (client_t)
// ============================================================

pub struct Client {
    pub state: ClientState,

    pub userinfo: String, // name, etc (MAX_INFO_STRING)
    /// An info change that arrived while throttled, applied on the next
    /// think once the window expires.
    pub userinfo_postponed: String,

    // reliable server -> client command ring
    pub reliable_commands: Vec<String>, // [MAX_RELIABLE_COMMANDS]
    pub reliable_sequence: i32,    // last added reliable message, not necessarily sent or acknowledged yet
    pub reliable_acknowledge: i32, // last acknowledged reliable message

    // reliable client -> server command dedupe
    pub last_client_command: i32,
    pub last_client_command_string: String,

    pub gamestate_message_num: i32, // netchan->outgoingSequence of gamestate
    pub message_acknowledge: i32,
    pub delta_message: i32,   // frame last client usercmd message
    pub old_server_time: i32,

    pub challenge: i32,
    pub netchan: NetChan,

    pub gentity_num: i32, // game entity bound to this slot

    pub name: String, // extracted from userinfo, high bits masked

    // throttling
    pub rate: i32,          // bytes / second
    pub snapshot_msec: i32, // requests a snapshot every snapshotMsec unless rate choked
    pub wish_snaps: i32,    // requested snaps/sec rate
    pub next_snapshot_time: i32, // send another snapshot when svs.time >= nextSnapshotTime

    // file download state
    pub download: Option<File>,
    pub download_name: String, // if not empty string, we are downloading
    pub download_size: i32,    // total bytes (can't use EOF because of paks)
    pub download_count: i32,   // bytes sent
    pub download_client_block: i32,  // last block we sent to the client, awaiting ack
    pub download_current_block: i32, // current block number
    pub download_xmit_block: i32,    // last block we xmited
    pub download_blocks: Vec<Option<Vec<u8>>>, // [MAX_DOWNLOAD_WINDOW] lazily allocated
    pub download_block_size: [i32; MAX_DOWNLOAD_WINDOW],
    pub download_eof: bool,      // EOF block was appended
    pub download_send_time: i32, // time we last sent a block

    // pure verification
    pub pure_authentic: i32,
    pub got_cp: bool,

    pub last_packet_time: i32,   // svs.time when packet was last received
    pub last_connect_time: i32,  // svs.time when connection started
    pub last_reliable_time: i32, // svs.time when reliable command was last received (flood protection)

    pub last_user_info_change: i32,
    pub last_user_info_count: i32,

    // SMOD administration
    pub smod: i32,    // capability bitmask, SMOD_LOGGED_OUT when logged out
    pub smod_id: i32, // admin account id, SMOD_LOGGED_OUT when logged out
    pub is_frozen: bool,
    pub warn_level: i32,

    pub last_usercmd: UserCmd,
    pub frames: Vec<ClientFrame>, // [PACKET_BACKUP] — ping bookkeeping
    pub ping: i32,

    /// Configstrings changed while the client was PRIMED; resent as cs
    /// commands when it enters the world.
    pub cs_updated: Vec<bool>, // [MAX_CONFIGSTRINGS]

    // sv_pingFix 2 — rolling packet delta window; when the average climbs
    // over 20ms the old ping calculation is used for this client
    pub packet_deltas: [i32; PACKET_BACKUP],
    pub packet_deltas_index: usize,
    pub unfix_ping: bool,

    pub demo_recording: bool,
}

impl Default for Client {
    fn default() -> Self {
        Self {
            state: ClientState::Free,
            userinfo: String::new(),
            userinfo_postponed: String::new(),
            reliable_commands: vec![String::new(); MAX_RELIABLE_COMMANDS],
            reliable_sequence: 0,
            reliable_acknowledge: 0,
            last_client_command: 0,
            last_client_command_string: String::new(),
            gamestate_message_num: -1,
            message_acknowledge: 0,
            delta_message: -1,
            old_server_time: 0,
            challenge: 0,
            netchan: NetChan::new(),
            gentity_num: -1,
            name: String::new(),
            rate: 0,
            snapshot_msec: 50,
            wish_snaps: 0,
            next_snapshot_time: 0,
            download: None,
            download_name: String::new(),
            download_size: 0,
            download_count: 0,
            download_client_block: 0,
            download_current_block: 0,
            download_xmit_block: 0,
            download_blocks: vec![None; MAX_DOWNLOAD_WINDOW],
            download_block_size: [0; MAX_DOWNLOAD_WINDOW],
            download_eof: false,
            download_send_time: 0,
            pure_authentic: 0,
            got_cp: false,
            last_packet_time: 0,
            last_connect_time: 0,
            last_reliable_time: 0,
            last_user_info_change: 0,
            last_user_info_count: 0,
            smod: SMOD_LOGGED_OUT,
            smod_id: SMOD_LOGGED_OUT,
            is_frozen: false,
            warn_level: 0,
            last_usercmd: UserCmd::default(),
            frames: vec![ClientFrame::default(); PACKET_BACKUP],
            ping: 0,
            cs_updated: vec![false; MAX_CONFIGSTRINGS],
            packet_deltas: [0; PACKET_BACKUP],
            packet_deltas_index: 0,
            unfix_ping: false,
            demo_recording: false,
        }
    }
}

impl Client {
    pub fn is_bot(&self) -> bool {
        self.netchan.remote_address.adr_type == NetAdrType::Bot
    }
}

// ============================================================
// Server bans (serverBan_t)
// ============================================================

#[derive(Debug, Clone, Copy)]
pub struct ServerBan {
    pub ip: NetAdr,
    /// Leading bits of the address that must match.
    pub subnet: u32,
    pub is_exception: bool,
}

// ============================================================
// Hibernation bookkeeping
// ============================================================

#[derive(Debug, Clone, Copy, Default)]
pub struct Hibernation {
    pub enabled: bool,
    pub last_time_disconnected: i32,
}

// ============================================================
// FsAssets — the server's view of the pak index
//
// Checksum computation and pak scanning belong to the filesystem layer;
// the server only consumes the indexed results.
// ============================================================

pub struct FsAssets {
    /// Directory pak downloads are served from.
    pub download_dir: PathBuf,
    /// Base names (no extension) of paks referenced by the current map.
    pub referenced_pak_names: Vec<String>,
    /// Pure checksums of every pak the server has loaded.
    pub pure_checksums: Vec<i32>,
    /// Checksum of the pak carrying the cgame module.
    pub cgame_checksum: i32,
    /// Checksum of the pak carrying the ui module.
    pub ui_checksum: i32,
}

impl Default for FsAssets {
    fn default() -> Self {
        Self {
            download_dir: PathBuf::from("."),
            referenced_pak_names: Vec::new(),
            pure_checksums: Vec::new(),
            cgame_checksum: 0,
            ui_checksum: 0,
        }
    }
}

impl FsAssets {
    /// Is this pak (base name, no extension) referenced by the server?
    pub fn is_referenced(&self, base: &str) -> bool {
        self.referenced_pak_names
            .iter()
            .any(|p| p.eq_ignore_ascii_case(base))
    }

    /// Paks shipped with the game may never be auto-downloaded.
    pub fn is_id_pak(&self, base: &str) -> bool {
        let lower = base.to_ascii_lowercase();
        lower.starts_with("base") || lower.starts_with("missionpack")
    }

    /// Open a pak for downloading. Returns the handle and total size.
    pub fn open_download(&self, name: &str) -> std::io::Result<(File, i32)> {
        let path = self.download_dir.join(name);
        let file = File::open(&path)?;
        let size = file.metadata()?.len() as i32;
        Ok((file, size))
    }
}

// ============================================================
// Server (per-level state) — corresponds to C `server_t`
// ============================================================

pub struct Server {
    pub state: ServerState,

    pub server_id: i32,           // changes each server start
    pub restarted_server_id: i32, // serverId before a map_restart

    pub checksum_feed: i32, // the feed key that we use to compute the pure checksum strings

    pub time: i32,

    pub name: String, // map name

    pub configstrings: Vec<String>,   // [MAX_CONFIGSTRINGS]
    pub baselines: Vec<EntityState>,  // [MAX_GENTITIES]
}

impl Default for Server {
    fn default() -> Self {
        Self {
            state: ServerState::Dead,
            server_id: 0,
            restarted_server_id: 0,
            checksum_feed: 0,
            time: 0,
            name: String::new(),
            configstrings: vec![String::new(); MAX_CONFIGSTRINGS],
            baselines: vec![EntityState::default(); MAX_GENTITIES],
        }
    }
}

// ============================================================
// ServerStatic — persistent across level changes (serverStatic_t)
// ============================================================

pub struct ServerStatic {
    pub initialized: bool, // sv_init has completed

    pub time: i32, // will be strictly increasing across level changes

    pub clients: Vec<Client>, // [sv_maxclients->integer]

    /// Secret for the stateless connection challenge. Regenerated at
    /// startup; challenges do not survive a server restart.
    pub challenge_key: [u8; 16],

    pub last_heartbeat: i32,

    pub hibernation: Hibernation,

    pub servermod: ServerMod,
    pub gvm_is_legacy: bool,

    pub whitelist: Vec<NetAdr>,

    pub master_adr: [NetAdr; MAX_MASTERS],

    /// Rate limiter for strict-timestamp corrections (shared, as the
    /// warnings exist to keep the log readable, not to count clients).
    pub last_timestamp_warn: i32,
}

impl Default for ServerStatic {
    fn default() -> Self {
        Self {
            initialized: false,
            time: 0,
            clients: Vec::new(),
            challenge_key: [0; 16],
            last_heartbeat: -9999999,
            hibernation: Hibernation::default(),
            servermod: ServerMod::default(),
            gvm_is_legacy: false,
            whitelist: Vec::new(),
            master_adr: [NetAdr::default(); MAX_MASTERS],
            last_timestamp_warn: 0,
        }
    }
}

// ============================================================
// ServerContext — replaces the C globals (sv, svs, ge, serverBans,
// net_from, net_message, cvar pointers)
// ============================================================

pub struct ServerContext {
    pub sv: Server,
    pub svs: ServerStatic,

    pub cvars: CvarContext,

    pub fs: FsAssets,

    pub game: Option<GameExport>,

    pub server_bans: Vec<ServerBan>,

    // network globals
    pub net_from: NetAdr,
    pub net_message: SizeBuf,
}

impl Default for ServerContext {
    fn default() -> Self {
        Self {
            sv: Server::default(),
            svs: ServerStatic::default(),
            cvars: CvarContext::new(),
            fs: FsAssets::default(),
            game: None,
            server_bans: Vec::new(),
            net_from: NetAdr::default(),
            net_message: SizeBuf::new(MAX_MSGLEN as i32),
        }
    }
}

impl ServerContext {
    /// Number of client slots in use (state >= CONNECTED). Recomputed by
    /// scanning so the count can never drift.
    pub fn connected_count(&self) -> usize {
        self.svs
            .clients
            .iter()
            .filter(|cl| cl.state >= ClientState::Connected)
            .count()
    }

    pub fn max_clients(&self) -> usize {
        self.cvars.variable_integer("sv_maxclients").max(0) as usize
    }
}

// ============================================================
// Tests
// ============================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_default_is_free() {
        let cl = Client::default();
        assert_eq!(cl.state, ClientState::Free);
        assert_eq!(cl.smod, SMOD_LOGGED_OUT);
        assert_eq!(cl.smod_id, SMOD_LOGGED_OUT);
        assert!(cl.download.is_none());
        assert!(cl.download_name.is_empty());
        assert_eq!(cl.frames.len(), PACKET_BACKUP);
        assert_eq!(cl.reliable_commands.len(), MAX_RELIABLE_COMMANDS);
    }

    #[test]
    fn test_client_state_ordering() {
        assert!(ClientState::Connected >= ClientState::Connected);
        assert!(ClientState::Active > ClientState::Primed);
        assert!(ClientState::Zombie < ClientState::Connected);
    }

    #[test]
    fn test_fs_assets_referenced() {
        let mut fs = FsAssets::default();
        fs.referenced_pak_names.push("mymap".to_string());
        assert!(fs.is_referenced("mymap"));
        assert!(fs.is_referenced("MyMap"));
        assert!(!fs.is_referenced("other"));
    }

    #[test]
    fn test_fs_assets_id_paks() {
        let fs = FsAssets::default();
        assert!(fs.is_id_pak("base"));
        assert!(fs.is_id_pak("baseassets1"));
        assert!(fs.is_id_pak("missionpack"));
        assert!(!fs.is_id_pak("communitymap"));
    }

    #[test]
    fn test_connected_count_scans() {
        let mut ctx = ServerContext::default();
        ctx.svs.clients.resize_with(4, Client::default);
        assert_eq!(ctx.connected_count(), 0);
        ctx.svs.clients[1].state = ClientState::Connected;
        ctx.svs.clients[3].state = ClientState::Active;
        assert_eq!(ctx.connected_count(), 2);
        ctx.svs.clients[1].state = ClientState::Zombie;
        assert_eq!(ctx.connected_count(), 1);
    }
}
