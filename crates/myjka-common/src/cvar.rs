// cvar.rs — dynamic variable tracking
// Converted from: myjka-original/qcommon/cvar.cpp

use crate::common::com_printf;
use crate::q_shared::{info_set_value_for_key, CVAR_ROM, CVAR_SERVERINFO};

use std::collections::HashMap;

/// A console variable.
#[derive(Clone)]
pub struct Cvar {
    pub name: String,
    pub string: String,
    pub flags: i32,
    pub modified: bool,
    pub value: f32,
    pub integer: i32,
}

/// The cvar system context. Replaces the C global cvar chain.
pub struct CvarContext {
    pub cvar_vars: Vec<Cvar>,
    /// O(1) cvar lookup by name -> index in cvar_vars
    cvar_index: HashMap<String, usize>,
}

impl CvarContext {
    pub fn new() -> Self {
        Self {
            cvar_vars: Vec::new(),
            cvar_index: HashMap::new(),
        }
    }

    /// Validate that a string doesn't contain characters invalid in info strings.
    pub fn info_validate(s: &str) -> bool {
        !s.contains('\\') && !s.contains('"') && !s.contains(';')
    }

    pub fn find_var(&self, name: &str) -> Option<&Cvar> {
        self.cvar_index.get(name).map(|&idx| &self.cvar_vars[idx])
    }

    pub fn find_var_mut(&mut self, name: &str) -> Option<&mut Cvar> {
        if let Some(&idx) = self.cvar_index.get(name) {
            Some(&mut self.cvar_vars[idx])
        } else {
            None
        }
    }

    /// Get the floating-point value of a cvar. Returns 0 if not found.
    pub fn variable_value(&self, name: &str) -> f32 {
        match self.find_var(name) {
            Some(var) => var.value,
            None => 0.0,
        }
    }

    /// Get the integer value of a cvar. Returns 0 if not found.
    pub fn variable_integer(&self, name: &str) -> i32 {
        match self.find_var(name) {
            Some(var) => var.integer,
            None => 0,
        }
    }

    /// Get the string value of a cvar. Returns "" if not found.
    pub fn variable_string(&self, name: &str) -> &str {
        match self.find_var(name) {
            Some(var) => &var.string,
            None => "",
        }
    }

    /// Get or create a cvar. If it already exists the value is not changed,
    /// but flags are OR'd in.
    pub fn get(&mut self, name: &str, value: &str, flags: i32) -> usize {
        if flags & CVAR_SERVERINFO != 0 && !Self::info_validate(name) {
            com_printf("invalid info cvar name\n");
        }

        if let Some(&idx) = self.cvar_index.get(name) {
            self.cvar_vars[idx].flags |= flags;
            return idx;
        }

        let var = Cvar {
            name: name.to_string(),
            string: value.to_string(),
            flags,
            modified: true,
            value: value.parse().unwrap_or(0.0),
            integer: parse_integer(value),
        };

        let idx = self.cvar_vars.len();
        self.cvar_vars.push(var);
        self.cvar_index.insert(name.to_string(), idx);
        idx
    }

    /// Set a cvar's value, creating it if necessary.
    pub fn set(&mut self, name: &str, value: &str) {
        if let Some(var) = self.find_var_mut(name) {
            if var.flags & CVAR_ROM != 0 {
                com_printf(&format!("{} is read only.\n", name));
                return;
            }
            if var.string == value {
                return;
            }
            var.string = value.to_string();
            var.value = value.parse().unwrap_or(0.0);
            var.integer = parse_integer(value);
            var.modified = true;
            return;
        }
        self.get(name, value, 0);
    }

    pub fn set_value(&mut self, name: &str, value: f32) {
        if value == value.trunc() {
            self.set(name, &format!("{}", value as i32));
        } else {
            self.set(name, &format!("{}", value));
        }
    }

    /// Build the serverinfo string from all CVAR_SERVERINFO variables.
    pub fn serverinfo(&self) -> String {
        let mut info = String::new();
        for var in &self.cvar_vars {
            if var.flags & CVAR_SERVERINFO != 0 && !var.string.is_empty() {
                info_set_value_for_key(&mut info, &var.name, &var.string);
            }
        }
        info
    }
}

impl Default for CvarContext {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_integer(value: &str) -> i32 {
    value
        .parse::<i32>()
        .unwrap_or_else(|_| value.parse::<f32>().unwrap_or(0.0) as i32)
}

// ============================================================
// Tests
// ============================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::q_shared::info_value_for_key;

    #[test]
    fn test_get_registers_default() {
        let mut cvars = CvarContext::new();
        cvars.get("sv_maxclients", "32", 0);
        assert_eq!(cvars.variable_integer("sv_maxclients"), 32);
        assert_eq!(cvars.variable_string("sv_maxclients"), "32");
    }

    #[test]
    fn test_get_does_not_override_existing() {
        let mut cvars = CvarContext::new();
        cvars.set("sv_pure", "0");
        cvars.get("sv_pure", "1", 0);
        assert_eq!(cvars.variable_integer("sv_pure"), 0);
    }

    #[test]
    fn test_set_updates() {
        let mut cvars = CvarContext::new();
        cvars.get("sv_fps", "20", 0);
        cvars.set("sv_fps", "40");
        assert_eq!(cvars.variable_integer("sv_fps"), 40);
        assert_eq!(cvars.variable_value("sv_fps"), 40.0);
    }

    #[test]
    fn test_rom_not_settable() {
        let mut cvars = CvarContext::new();
        cvars.get("protocol", "26", CVAR_ROM);
        cvars.set("protocol", "15");
        assert_eq!(cvars.variable_integer("protocol"), 26);
    }

    #[test]
    fn test_missing_cvar_defaults() {
        let cvars = CvarContext::new();
        assert_eq!(cvars.variable_integer("nope"), 0);
        assert_eq!(cvars.variable_string("nope"), "");
    }

    #[test]
    fn test_serverinfo_built_from_flags() {
        let mut cvars = CvarContext::new();
        cvars.get("hostname", "myjka", CVAR_SERVERINFO);
        cvars.get("rconpass", "secret", 0);
        let info = cvars.serverinfo();
        assert_eq!(info_value_for_key(&info, "hostname"), "myjka");
        assert_eq!(info_value_for_key(&info, "rconpass"), "");
    }

    #[test]
    fn test_float_string_integer_parse() {
        let mut cvars = CvarContext::new();
        cvars.get("timeout", "125.5", 0);
        assert_eq!(cvars.variable_integer("timeout"), 125);
        assert_eq!(cvars.variable_value("timeout"), 125.5);
    }
}
