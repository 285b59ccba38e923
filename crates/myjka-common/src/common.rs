// common.rs — misc functions used by every part of the server
// Converted from: myjka-original/qcommon/common.cpp
//
// Copyright (C) 1999-2005, Id Software, Inc.
// Copyright (C) 2013-2015, OpenJK contributors
// Licensed under the GNU General Public License v2.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, OnceLock};
use std::time::Instant;

use crate::q_shared::{EntityState, PlayerState, UserCmd};
use crate::qcommon::{SizeBuf, ERR_FATAL};

pub const MAXPRINTMSG: usize = 4096;

// ============================================================
// Redirect buffer for Com_Printf
// ============================================================

static RD_BUFFER: Mutex<Option<String>> = Mutex::new(None);

/// Begin redirecting printf output into a buffer.
pub fn com_begin_redirect() {
    let mut buf = RD_BUFFER.lock().unwrap();
    *buf = Some(String::new());
}

/// End redirect and return the captured output.
pub fn com_end_redirect() -> Option<String> {
    let mut buf = RD_BUFFER.lock().unwrap();
    buf.take()
}

// ============================================================
// Com_Printf / Com_DPrintf / Com_Error
// ============================================================

static DEVELOPER: AtomicBool = AtomicBool::new(false);

/// Enable or disable developer (debug) printing.
pub fn com_set_developer(on: bool) {
    DEVELOPER.store(on, Ordering::Relaxed);
}

/// General-purpose print function. Prints to stdout and appends to the
/// redirect buffer if one is active.
pub fn com_printf(msg: &str) {
    {
        let mut buf = RD_BUFFER.lock().unwrap();
        if let Some(ref mut s) = *buf {
            s.push_str(msg);
            return;
        }
    }
    print!("{}", msg);
}

/// Debug print — only visible when developer mode is on.
pub fn com_dprintf(msg: &str) {
    if DEVELOPER.load(Ordering::Relaxed) {
        com_printf(msg);
    }
}

/// Com_Error — unrecoverable error. The server never calls this for a
/// remote-initiated fault.
pub fn com_error(code: i32, msg: &str) -> ! {
    if code == ERR_FATAL {
        panic!("ERR_FATAL: {}", msg);
    }
    panic!("ERR_DROP: {}", msg);
}

// ============================================================
// Sys_Milliseconds
// ============================================================

static EPOCH: OnceLock<Instant> = OnceLock::new();

/// Monotonically increasing time since process start, in milliseconds.
pub fn sys_milliseconds() -> i32 {
    let epoch = EPOCH.get_or_init(Instant::now);
    epoch.elapsed().as_millis() as i32
}

// ============================================================
// MSG read/write primitives
// ============================================================

pub fn msg_begin_reading(msg: &mut SizeBuf) {
    msg.readcount = 0;
}

pub fn msg_write_byte(msg: &mut SizeBuf, c: i32) {
    msg.write(&[(c & 0xff) as u8]);
}

pub fn msg_write_short(msg: &mut SizeBuf, c: i32) {
    msg.write(&(c as i16).to_le_bytes());
}

pub fn msg_write_long(msg: &mut SizeBuf, c: i32) {
    msg.write(&c.to_le_bytes());
}

pub fn msg_write_float(msg: &mut SizeBuf, f: f32) {
    msg.write(&f.to_le_bytes());
}

pub fn msg_write_string(msg: &mut SizeBuf, s: &str) {
    msg.write(s.as_bytes());
    msg.write(&[0]);
}

/// Like msg_write_string, but for strings that may approach the message
/// size (configstrings).
pub fn msg_write_big_string(msg: &mut SizeBuf, s: &str) {
    msg_write_string(msg, s);
}

pub fn msg_write_data(msg: &mut SizeBuf, data: &[u8]) {
    msg.write(data);
}

/// Returns -1 when reading past the end of the message.
pub fn msg_read_byte(msg: &mut SizeBuf) -> i32 {
    if msg.readcount + 1 > msg.cursize {
        msg.readcount += 1;
        return -1;
    }
    let c = msg.data[msg.readcount as usize] as i32;
    msg.readcount += 1;
    c
}

pub fn msg_read_short(msg: &mut SizeBuf) -> i32 {
    if msg.readcount + 2 > msg.cursize {
        msg.readcount += 2;
        return -1;
    }
    let i = msg.readcount as usize;
    let v = i16::from_le_bytes([msg.data[i], msg.data[i + 1]]) as i32;
    msg.readcount += 2;
    v
}

pub fn msg_read_long(msg: &mut SizeBuf) -> i32 {
    if msg.readcount + 4 > msg.cursize {
        msg.readcount += 4;
        return -1;
    }
    let i = msg.readcount as usize;
    let v = i32::from_le_bytes([
        msg.data[i],
        msg.data[i + 1],
        msg.data[i + 2],
        msg.data[i + 3],
    ]);
    msg.readcount += 4;
    v
}

pub fn msg_read_float(msg: &mut SizeBuf) -> f32 {
    if msg.readcount + 4 > msg.cursize {
        msg.readcount += 4;
        return -1.0;
    }
    let i = msg.readcount as usize;
    let v = f32::from_le_bytes([
        msg.data[i],
        msg.data[i + 1],
        msg.data[i + 2],
        msg.data[i + 3],
    ]);
    msg.readcount += 4;
    v
}

pub fn msg_read_string(msg: &mut SizeBuf) -> String {
    let mut out = Vec::new();
    loop {
        let c = msg_read_byte(msg);
        if c <= 0 {
            break;
        }
        out.push(c as u8);
    }
    String::from_utf8_lossy(&out).to_string()
}

/// Read a string terminated by newline, NUL or end of message.
pub fn msg_read_string_line(msg: &mut SizeBuf) -> String {
    let mut out = Vec::new();
    loop {
        let c = msg_read_byte(msg);
        if c <= 0 || c == b'\n' as i32 {
            break;
        }
        out.push(c as u8);
    }
    String::from_utf8_lossy(&out).to_string()
}

pub fn msg_read_data(msg: &mut SizeBuf, len: usize) -> Vec<u8> {
    let mut out = vec![0u8; len];
    for b in out.iter_mut() {
        let c = msg_read_byte(msg);
        *b = if c == -1 { 0xff } else { c as u8 };
    }
    out
}

// ============================================================
// Delta entity
//
// Writes only the fields that differ from the baseline. The entity
// number always leads so the reader can index the target state.
// ============================================================

const ES_ORIGIN: i32 = 1 << 0;
const ES_ANGLES: i32 = 1 << 1;
const ES_MODELINDEX: i32 = 1 << 2;
const ES_EVENT: i32 = 1 << 3;
const ES_SOLID: i32 = 1 << 4;

pub fn msg_write_delta_entity(msg: &mut SizeBuf, from: &EntityState, to: &EntityState, force: bool) {
    let mut bits = 0;
    if to.origin != from.origin {
        bits |= ES_ORIGIN;
    }
    if to.angles != from.angles {
        bits |= ES_ANGLES;
    }
    if to.model_index != from.model_index {
        bits |= ES_MODELINDEX;
    }
    if to.event != from.event {
        bits |= ES_EVENT;
    }
    if to.solid != from.solid {
        bits |= ES_SOLID;
    }

    if bits == 0 && !force {
        return;
    }

    msg_write_short(msg, to.number);
    msg_write_byte(msg, bits);

    if bits & ES_ORIGIN != 0 {
        for v in to.origin {
            msg_write_float(msg, v);
        }
    }
    if bits & ES_ANGLES != 0 {
        for v in to.angles {
            msg_write_float(msg, v);
        }
    }
    if bits & ES_MODELINDEX != 0 {
        msg_write_long(msg, to.model_index);
    }
    if bits & ES_EVENT != 0 {
        msg_write_long(msg, to.event);
    }
    if bits & ES_SOLID != 0 {
        msg_write_long(msg, to.solid);
    }
}

pub fn msg_read_delta_entity(msg: &mut SizeBuf, from: &EntityState) -> EntityState {
    let mut to = *from;
    to.number = msg_read_short(msg);
    let bits = msg_read_byte(msg);

    if bits & ES_ORIGIN != 0 {
        for v in to.origin.iter_mut() {
            *v = msg_read_float(msg);
        }
    }
    if bits & ES_ANGLES != 0 {
        for v in to.angles.iter_mut() {
            *v = msg_read_float(msg);
        }
    }
    if bits & ES_MODELINDEX != 0 {
        to.model_index = msg_read_long(msg);
    }
    if bits & ES_EVENT != 0 {
        to.event = msg_read_long(msg);
    }
    if bits & ES_SOLID != 0 {
        to.solid = msg_read_long(msg);
    }
    to
}

// ============================================================
// Delta player state (snapshot payload)
// ============================================================

const PS_ORIGIN: i32 = 1 << 0;
const PS_VELOCITY: i32 = 1 << 1;
const PS_FALLING: i32 = 1 << 2;

pub fn msg_write_delta_player_state(msg: &mut SizeBuf, from: &PlayerState, to: &PlayerState) {
    let mut bits = 0;
    if to.origin != from.origin {
        bits |= PS_ORIGIN;
    }
    if to.velocity != from.velocity {
        bits |= PS_VELOCITY;
    }
    if to.falling_to_death != from.falling_to_death {
        bits |= PS_FALLING;
    }

    msg_write_byte(msg, bits);

    if bits & PS_ORIGIN != 0 {
        for v in to.origin {
            msg_write_float(msg, v);
        }
    }
    if bits & PS_VELOCITY != 0 {
        for v in to.velocity {
            msg_write_float(msg, v);
        }
    }
    if bits & PS_FALLING != 0 {
        msg_write_long(msg, to.falling_to_death);
    }
}

pub fn msg_read_delta_player_state(msg: &mut SizeBuf, from: &PlayerState) -> PlayerState {
    let mut to = *from;
    let bits = msg_read_byte(msg);

    if bits & PS_ORIGIN != 0 {
        for v in to.origin.iter_mut() {
            *v = msg_read_float(msg);
        }
    }
    if bits & PS_VELOCITY != 0 {
        for v in to.velocity.iter_mut() {
            *v = msg_read_float(msg);
        }
    }
    if bits & PS_FALLING != 0 {
        to.falling_to_death = msg_read_long(msg);
    }
    to
}

// ============================================================
// Keyed delta usercmd
//
// Move commands are XOR-obfuscated with a session key derived from the
// checksum feed, the message acknowledge and the last acknowledged
// reliable command. Both sides must derive the same key or the decode
// produces garbage.
// ============================================================

const CM_ANGLES: i32 = 1 << 0;
const CM_BUTTONS: i32 = 1 << 1;
const CM_MOVES: i32 = 1 << 2;
const CM_WEAPON: i32 = 1 << 3;
const CM_FORCESEL: i32 = 1 << 4;
const CM_INVENSEL: i32 = 1 << 5;
const CM_GENERIC: i32 = 1 << 6;

pub fn msg_write_delta_usercmd_key(msg: &mut SizeBuf, key: i32, from: &UserCmd, to: &UserCmd) {
    msg_write_long(msg, to.server_time);

    let mut bits = 0;
    if to.angles != from.angles {
        bits |= CM_ANGLES;
    }
    if to.buttons != from.buttons {
        bits |= CM_BUTTONS;
    }
    if to.forwardmove != from.forwardmove
        || to.rightmove != from.rightmove
        || to.upmove != from.upmove
    {
        bits |= CM_MOVES;
    }
    if to.weapon != from.weapon {
        bits |= CM_WEAPON;
    }
    if to.forcesel != from.forcesel {
        bits |= CM_FORCESEL;
    }
    if to.invensel != from.invensel {
        bits |= CM_INVENSEL;
    }
    if to.generic_cmd != from.generic_cmd {
        bits |= CM_GENERIC;
    }

    msg_write_byte(msg, bits);

    // the time already sent mixes into the key so captured streams can't
    // be replayed against a different ack state
    let key = key ^ to.server_time;
    let kb = (key & 0xff) as u8;

    if bits & CM_ANGLES != 0 {
        for v in to.angles {
            msg_write_long(msg, v ^ key);
        }
    }
    if bits & CM_BUTTONS != 0 {
        msg_write_long(msg, to.buttons ^ key);
    }
    if bits & CM_MOVES != 0 {
        msg_write_byte(msg, ((to.forwardmove as u8) ^ kb) as i32);
        msg_write_byte(msg, ((to.rightmove as u8) ^ kb) as i32);
        msg_write_byte(msg, ((to.upmove as u8) ^ kb) as i32);
    }
    if bits & CM_WEAPON != 0 {
        msg_write_byte(msg, (to.weapon ^ kb) as i32);
    }
    if bits & CM_FORCESEL != 0 {
        msg_write_byte(msg, (to.forcesel ^ kb) as i32);
    }
    if bits & CM_INVENSEL != 0 {
        msg_write_byte(msg, (to.invensel ^ kb) as i32);
    }
    if bits & CM_GENERIC != 0 {
        msg_write_byte(msg, (to.generic_cmd ^ kb) as i32);
    }
}

pub fn msg_read_delta_usercmd_key(msg: &mut SizeBuf, key: i32, from: &UserCmd) -> UserCmd {
    let mut to = *from;
    to.server_time = msg_read_long(msg);

    let bits = msg_read_byte(msg);

    let key = key ^ to.server_time;
    let kb = (key & 0xff) as u8;

    if bits & CM_ANGLES != 0 {
        for v in to.angles.iter_mut() {
            *v = msg_read_long(msg) ^ key;
        }
    }
    if bits & CM_BUTTONS != 0 {
        to.buttons = msg_read_long(msg) ^ key;
    }
    if bits & CM_MOVES != 0 {
        to.forwardmove = ((msg_read_byte(msg) as u8) ^ kb) as i8;
        to.rightmove = ((msg_read_byte(msg) as u8) ^ kb) as i8;
        to.upmove = ((msg_read_byte(msg) as u8) ^ kb) as i8;
    }
    if bits & CM_WEAPON != 0 {
        to.weapon = (msg_read_byte(msg) as u8) ^ kb;
    }
    if bits & CM_FORCESEL != 0 {
        to.forcesel = (msg_read_byte(msg) as u8) ^ kb;
    }
    if bits & CM_INVENSEL != 0 {
        to.invensel = (msg_read_byte(msg) as u8) ^ kb;
    }
    if bits & CM_GENERIC != 0 {
        to.generic_cmd = (msg_read_byte(msg) as u8) ^ kb;
    }

    to
}

// ============================================================
// Tests
// ============================================================
