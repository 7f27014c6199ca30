// cvar.rs — named runtime variables (client prediction switches, server policy)

use std::collections::HashMap;

use crate::common::com_printf;
use crate::q_shared::{
    info_set_value_for_key, info_validate, CVAR_LATCH, CVAR_NOSET, CVAR_SERVERINFO,
    CVAR_USERINFO,
};

/// A console variable.
#[derive(Debug, Clone)]
pub struct Cvar {
    pub name: String,
    pub string: String,
    pub latched_string: Option<String>, // for CVAR_LATCH vars
    pub flags: i32,
    pub modified: bool, // set each time the cvar is changed
    pub value: f32,
}

impl Cvar {
    pub fn integer(&self) -> i32 {
        self.value as i32
    }
}

/// Owns every variable of one client or server session.
#[derive(Debug, Default)]
pub struct CvarContext {
    vars: Vec<Cvar>,
    index: HashMap<String, usize>,
    pub userinfo_modified: bool,
    /// While set, changes to latched variables wait for the next map.
    pub game_running: bool,
}

impl CvarContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn find_var(&self, name: &str) -> Option<&Cvar> {
        self.index.get(name).map(|&idx| &self.vars[idx])
    }

    pub fn find_var_mut(&mut self, name: &str) -> Option<&mut Cvar> {
        let idx = *self.index.get(name)?;
        Some(&mut self.vars[idx])
    }

    /// Returns 0 if not defined or non numeric.
    pub fn variable_value(&self, name: &str) -> f32 {
        self.find_var(name).map_or(0.0, |v| v.value)
    }

    pub fn variable_integer(&self, name: &str) -> i32 {
        self.variable_value(name) as i32
    }

    /// Returns an empty string if not defined.
    pub fn variable_string(&self, name: &str) -> &str {
        self.find_var(name).map_or("", |v| v.string.as_str())
    }

    /// Creates the variable if it does not exist. An existing variable keeps
    /// its value and gains `flags`. Returns false when an info variable was
    /// refused because of its name or value.
    pub fn get(&mut self, name: &str, value: &str, flags: i32) -> bool {
        let info = flags & (CVAR_USERINFO | CVAR_SERVERINFO) != 0;
        if info && !info_validate(name) {
            com_printf("invalid info cvar name\n");
            return false;
        }

        if let Some(var) = self.find_var_mut(name) {
            var.flags |= flags;
            return true;
        }

        if info && !info_validate(value) {
            com_printf("invalid info cvar value\n");
            return false;
        }

        self.index.insert(name.to_string(), self.vars.len());
        self.vars.push(Cvar {
            name: name.to_string(),
            string: value.to_string(),
            latched_string: None,
            flags,
            modified: true,
            value: parse_value(value),
        });
        if flags & CVAR_USERINFO != 0 {
            self.userinfo_modified = true;
        }
        true
    }

    /// Changes a variable from the console, honoring write protection and
    /// latching.
    pub fn set(&mut self, name: &str, value: &str) {
        self.set2(name, value, false);
    }

    /// Changes a variable regardless of its protection flags.
    pub fn force_set(&mut self, name: &str, value: &str) {
        self.set2(name, value, true);
    }

    fn set2(&mut self, name: &str, value: &str, force: bool) {
        let game_running = self.game_running;
        let Some(var) = self.find_var_mut(name) else {
            // create it
            self.get(name, value, 0);
            return;
        };

        if var.flags & (CVAR_USERINFO | CVAR_SERVERINFO) != 0 && !info_validate(value) {
            com_printf("invalid info cvar value\n");
            return;
        }

        if !force {
            if var.flags & CVAR_NOSET != 0 {
                com_printf(&format!("{} is write protected.\n", name));
                return;
            }

            if var.flags & CVAR_LATCH != 0 {
                let current = var.latched_string.as_deref().unwrap_or(&var.string);
                if current == value {
                    return;
                }
                if game_running {
                    com_printf(&format!("{} will be changed for next game.\n", name));
                    var.latched_string = Some(value.to_string());
                    return;
                }
            }
        } else {
            var.latched_string = None;
        }

        if var.string == value {
            return; // not changed
        }

        var.modified = true;
        var.string = value.to_string();
        var.value = parse_value(value);
        let userinfo = var.flags & CVAR_USERINFO != 0;
        if userinfo {
            self.userinfo_modified = true;
        }
    }

    /// Applies latched values, called when a new map starts.
    pub fn get_latched_vars(&mut self) {
        for var in self.vars.iter_mut() {
            if let Some(latched) = var.latched_string.take() {
                var.value = parse_value(&latched);
                var.string = latched;
                var.modified = true;
            }
        }
    }

    fn bit_info(&self, bit: i32) -> String {
        let mut info = String::new();
        for var in self.vars.iter().filter(|v| v.flags & bit != 0) {
            info_set_value_for_key(&mut info, &var.name, &var.string);
        }
        info
    }

    /// Info string of every CVAR_USERINFO variable.
    pub fn userinfo(&self) -> String {
        self.bit_info(CVAR_USERINFO)
    }

    /// Info string of every CVAR_SERVERINFO variable.
    pub fn serverinfo(&self) -> String {
        self.bit_info(CVAR_SERVERINFO)
    }
}

fn parse_value(s: &str) -> f32 {
    s.trim().parse::<f32>().unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::q_shared::info_value_for_key;

    #[test]
    fn test_get_keeps_existing_value() {
        let mut cv = CvarContext::new();
        assert!(cv.get("cl_predict", "1", 0));
        cv.set("cl_predict", "0");
        assert!(cv.get("cl_predict", "1", 0));
        assert_eq!(cv.variable_integer("cl_predict"), 0);
    }

    #[test]
    fn test_missing_var_defaults() {
        let cv = CvarContext::new();
        assert_eq!(cv.variable_value("nope"), 0.0);
        assert_eq!(cv.variable_string("nope"), "");
    }

    #[test]
    fn test_noset_requires_force() {
        let mut cv = CvarContext::new();
        cv.get("maxclients", "1", CVAR_NOSET);
        cv.set("maxclients", "8");
        assert_eq!(cv.variable_integer("maxclients"), 1);
        cv.force_set("maxclients", "8");
        assert_eq!(cv.variable_integer("maxclients"), 8);
    }

    #[test]
    fn test_latch_waits_for_next_game() {
        let mut cv = CvarContext::new();
        cv.get("game", "base", CVAR_LATCH);
        cv.game_running = true;
        cv.set("game", "ctf");
        assert_eq!(cv.variable_string("game"), "base");
        cv.get_latched_vars();
        assert_eq!(cv.variable_string("game"), "ctf");
    }

    #[test]
    fn test_userinfo_tracks_changes() {
        let mut cv = CvarContext::new();
        cv.get("name", "player", CVAR_USERINFO);
        cv.get("rate", "5000", CVAR_USERINFO);
        cv.get("cl_showmiss", "0", 0);
        cv.userinfo_modified = false;

        cv.set("name", "other");
        assert!(cv.userinfo_modified);
        let info = cv.userinfo();
        assert_eq!(info_value_for_key(&info, "name"), "other");
        assert_eq!(info_value_for_key(&info, "rate"), "5000");
        assert_eq!(info_value_for_key(&info, "cl_showmiss"), "");
    }

    #[test]
    fn test_info_var_rejects_separators() {
        let mut cv = CvarContext::new();
        assert!(!cv.get("bad\\name", "x", CVAR_USERINFO));
        cv.get("name", "ok", CVAR_USERINFO);
        cv.set("name", "a;b");
        assert_eq!(cv.variable_string("name"), "ok");
    }
}
