use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::frame::ProcessorConfig;

/// A named shortcut that runs a command when pressed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserButton {
    pub label: String,
    pub command: String,
    #[serde(default)]
    pub parameters: String,
    /// Single key hotkey, if any.
    #[serde(default)]
    pub hotkey: Option<char>,
}

impl UserButton {
    pub fn new(label: impl Into<String>, command: impl Into<String>, parameters: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            command: command.into(),
            parameters: parameters.into(),
            hotkey: None,
        }
    }
}

/// Show-wide options persisted alongside the playlists.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleOptions {
    /// Keep sending zeroed frames while nothing plays.
    pub send_off_when_not_running: bool,
    pub buttons: Vec<UserButton>,
    pub processors: Vec<ProcessorConfig>,
    #[serde(skip)]
    dirty: bool,
}

impl Default for ScheduleOptions {
    fn default() -> Self {
        Self {
            send_off_when_not_running: true,
            buttons: Vec::new(),
            processors: Vec::new(),
            dirty: false,
        }
    }
}

impl ScheduleOptions {
    pub fn button(&self, label: &str) -> Option<&UserButton> {
        self.buttons
            .iter()
            .find(|b| b.label.eq_ignore_ascii_case(label))
    }

    pub fn add_button(&mut self, button: UserButton) {
        self.buttons.push(button);
        self.dirty = true;
    }

    pub fn remove_button(&mut self, label: &str) -> Option<UserButton> {
        let index = self
            .buttons
            .iter()
            .position(|b| b.label.eq_ignore_ascii_case(label))?;
        self.dirty = true;
        Some(self.buttons.remove(index))
    }

    pub fn set_send_off_when_not_running(&mut self, send_off: bool) {
        if self.send_off_when_not_running != send_off {
            self.send_off_when_not_running = send_off;
            self.dirty = true;
        }
    }

    pub fn buttons_json(&self, reference: &str) -> Value {
        let buttons: Vec<Value> = self
            .buttons
            .iter()
            .map(|b| {
                json!({
                    "label": b.label,
                    "command": b.command,
                    "parameters": b.parameters,
                    "hotkey": b.hotkey.map(String::from).unwrap_or_default(),
                })
            })
            .collect();
        json!({ "buttons": buttons, "reference": reference })
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn clear_dirty(&mut self) {
        self.dirty = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buttons() {
        let mut options = ScheduleOptions::default();
        options.add_button(UserButton::new("Go", "Play specified playlist", "Carols"));
        assert!(options.is_dirty());

        assert_eq!(options.button("go").unwrap().parameters, "Carols");
        let json = options.buttons_json("7");
        assert_eq!(json["buttons"][0]["label"], "Go");
        assert_eq!(json["reference"], "7");

        assert!(options.remove_button("GO").is_some());
        assert!(options.button("Go").is_none());
    }

    #[test]
    fn test_defaults_from_empty_json() {
        let options: ScheduleOptions = serde_json::from_str("{}").unwrap();
        assert!(options.send_off_when_not_running);
        assert!(options.buttons.is_empty());
    }
}
