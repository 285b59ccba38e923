// sv_game.rs — interface to the game module
// Converted from: myjka-original/server/sv_gameapi.cpp
//
// The game module (entity simulation, rules) is a separate component;
// the server only drives it through these hooks. A statically linked
// game registers function pointers here.

use myjka_common::q_shared::{PlayerState, UserCmd};

/// Per-client game state visible to the server (gclient_s subset).
#[derive(Debug, Default, Clone)]
pub struct GClient {
    pub ps: PlayerState,
}

/// The game export table. Hooks left as `None` are no-ops, which lets
/// tests construct a server without a game module.
pub struct GameExport {
    pub clients: Vec<GClient>,

    /// Return Some(reason) to refuse the connection.
    pub client_connect:
        Option<fn(&mut GameExport, client_num: usize, userinfo: &str, first_time: bool, is_bot: bool) -> Option<String>>,
    pub client_begin: Option<fn(&mut GameExport, client_num: usize)>,
    pub client_userinfo_changed: Option<fn(&mut GameExport, client_num: usize, userinfo: &str)>,
    pub client_disconnect: Option<fn(&mut GameExport, client_num: usize)>,
    pub client_command: Option<fn(&mut GameExport, client_num: usize, command: &str)>,
    pub client_think: Option<fn(&mut GameExport, client_num: usize, cmd: &UserCmd)>,
    pub run_frame: Option<fn(&mut GameExport, time: i32)>,
}

impl GameExport {
    pub fn new(max_clients: usize) -> Self {
        Self {
            clients: vec![GClient::default(); max_clients],
            client_connect: None,
            client_begin: None,
            client_userinfo_changed: None,
            client_disconnect: None,
            client_command: None,
            client_think: None,
            run_frame: None,
        }
    }

    // GVM_* wrappers — the call sites read like the original

    pub fn gvm_client_connect(
        &mut self,
        client_num: usize,
        userinfo: &str,
        first_time: bool,
        is_bot: bool,
    ) -> Option<String> {
        match self.client_connect {
            Some(f) => f(self, client_num, userinfo, first_time, is_bot),
            None => None,
        }
    }

    pub fn gvm_client_begin(&mut self, client_num: usize) {
        if let Some(f) = self.client_begin {
            f(self, client_num);
        }
    }

    pub fn gvm_client_userinfo_changed(&mut self, client_num: usize, userinfo: &str) {
        if let Some(f) = self.client_userinfo_changed {
            f(self, client_num, userinfo);
        }
    }

    pub fn gvm_client_disconnect(&mut self, client_num: usize) {
        if let Some(f) = self.client_disconnect {
            f(self, client_num);
        }
    }

    pub fn gvm_client_command(&mut self, client_num: usize, command: &str) {
        if let Some(f) = self.client_command {
            f(self, client_num, command);
        }
    }

    pub fn gvm_client_think(&mut self, client_num: usize, cmd: &UserCmd) {
        if let Some(f) = self.client_think {
            f(self, client_num, cmd);
        }
    }

    pub fn gvm_run_frame(&mut self, time: i32) {
        if let Some(f) = self.run_frame {
            f(self, time);
        }
    }

    /// SV_GameClientNum — player state for a client slot.
    pub fn player_state_mut(&mut self, client_num: usize) -> Option<&mut PlayerState> {
        self.clients.get_mut(client_num).map(|c| &mut c.ps)
    }

    pub fn player_state(&self, client_num: usize) -> Option<&PlayerState> {
        self.clients.get(client_num).map(|c| &c.ps)
    }
}

// ============================================================
// Tests
// ============================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hooks_default_to_noop() {
        let mut ge = GameExport::new(4);
        assert!(ge.gvm_client_connect(0, "\\name\\x", true, false).is_none());
        ge.gvm_client_begin(0);
        ge.gvm_client_think(0, &UserCmd::default());
    }

    #[test]
    fn test_connect_hook_can_refuse() {
        fn deny(_ge: &mut GameExport, _num: usize, _ui: &str, _first: bool, _bot: bool) -> Option<String> {
            Some("Banned by game".to_string())
        }
        let mut ge = GameExport::new(4);
        ge.client_connect = Some(deny);
        assert_eq!(
            ge.gvm_client_connect(0, "", true, false).as_deref(),
            Some("Banned by game")
        );
    }

    #[test]
    fn test_player_state_access() {
        let mut ge = GameExport::new(2);
        ge.player_state_mut(1).unwrap().origin = [1.0, 2.0, 3.0];
        assert_eq!(ge.player_state(1).unwrap().origin, [1.0, 2.0, 3.0]);
        assert!(ge.player_state(5).is_none());
    }
}
