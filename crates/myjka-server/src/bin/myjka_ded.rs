// myjka_ded.rs — dedicated server entry point
//
// Usage: myjka-ded [+set <cvar> <value>]... [+map <mapname>]

use std::time::Duration;

use myjka_common::common::{com_printf, com_set_developer, sys_milliseconds};
use myjka_common::net;
use myjka_common::qcommon::{NetSrc, PORT_SERVER};
use myjka_server::server::ServerContext;
use myjka_server::sv_init::{sv_init, sv_spawn_server};
use myjka_server::sv_main::sv_frame;

fn main() {
    let mut ctx = ServerContext::default();
    let mut mapname = "mp/ffa3".to_string();

    // quake-style "+set key value" arguments, applied before sv_init so
    // registration keeps the overridden values
    let argv: Vec<String> = std::env::args().skip(1).collect();
    let mut i = 0;
    while i < argv.len() {
        match argv[i].as_str() {
            "+set" if i + 2 < argv.len() => {
                ctx.cvars.set(&argv[i + 1], &argv[i + 2]);
                i += 3;
            }
            "+map" if i + 1 < argv.len() => {
                mapname = argv[i + 1].clone();
                i += 2;
            }
            other => {
                com_printf(&format!("unknown argument: {}\n", other));
                i += 1;
            }
        }
    }

    sv_init(&mut ctx);
    com_set_developer(ctx.cvars.variable_integer("developer") != 0);
    sv_spawn_server(&mut ctx, &mapname);

    let port = {
        let p = ctx.cvars.variable_integer("net_port");
        if p > 0 && p <= u16::MAX as i32 {
            p as u16
        } else {
            PORT_SERVER
        }
    };

    let socket = match net::net_open_ip(port) {
        Ok(socket) => socket,
        Err(err) => {
            com_printf(&format!("couldn't open udp port {}: {}\n", port, err));
            std::process::exit(1);
        }
    };

    let send_socket = match socket.try_clone() {
        Ok(send_socket) => send_socket,
        Err(err) => {
            com_printf(&format!("couldn't clone server socket: {}\n", err));
            std::process::exit(1);
        }
    };
    net::net_set_send_handler(Box::new(move |_sock: NetSrc, data: &[u8], to| {
        let _ = send_socket.send_to(data, net::net_sockaddr_from_adr(to));
    }));

    com_printf(&format!("{} loaded, listening on udp {}\n", mapname, port));

    let frame_msec = (1000 / ctx.cvars.variable_integer("sv_fps").max(1)) as u64;
    let mut last = sys_milliseconds();
    loop {
        net::net_pump_socket(&socket);

        let now = sys_milliseconds();
        sv_frame(&mut ctx, now - last);
        last = now;

        std::thread::sleep(Duration::from_millis(frame_msec));
    }
}
