//! Capture chord detection over a raw key-down/key-up stream.
//!
//! The trigger owns the "modifier held" flag and the cool-down clock. It is
//! fed one event at a time by the listener thread and answers with what, if
//! anything, the event should cause.

use std::fmt;
use std::time::{Duration, Instant};

use crate::config::{AppConfig, ConfigError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyEventKind {
    Down,
    Up,
}

/// A keyboard event, detached from whatever produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyEvent {
    /// Physical key name, e.g. `MetaLeft`, `KeyA`, `Escape`.
    pub key: String,
    /// Character the key produced, when the platform reports one.
    pub text: Option<String>,
    pub kind: KeyEventKind,
}

impl KeyEvent {
    pub fn down(key: &str) -> Self {
        Self {
            key: key.to_string(),
            text: None,
            kind: KeyEventKind::Down,
        }
    }

    pub fn up(key: &str) -> Self {
        Self {
            key: key.to_string(),
            text: None,
            kind: KeyEventKind::Up,
        }
    }

    pub fn with_text(mut self, text: &str) -> Self {
        self.text = Some(text.to_string());
        self
    }
}

/// One configured key: a set of physical key names or a produced character.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeySpec {
    Named(Vec<String>),
    Text(String),
}

impl KeySpec {
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        let raw = raw.trim();
        let names: &[&str] = match raw.to_ascii_lowercase().as_str() {
            "" => {
                return Err(ConfigError::InvalidKeyBinding(
                    raw.to_string(),
                    "empty key".to_string(),
                ))
            }
            "meta" | "cmd" | "command" | "super" | "win" => &["MetaLeft", "MetaRight"],
            "ctrl" | "control" => &["ControlLeft", "ControlRight"],
            "shift" => &["ShiftLeft", "ShiftRight"],
            "alt" | "option" => &["Alt", "AltGr"],
            "esc" | "escape" => &["Escape"],
            _ => &[],
        };
        if !names.is_empty() {
            return Ok(Self::Named(names.iter().map(|s| s.to_string()).collect()));
        }

        let mut chars = raw.chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) if c.is_ascii_alphabetic() => {
                Ok(Self::Named(vec![format!("Key{}", c.to_ascii_uppercase())]))
            }
            (Some(c), None) if c.is_ascii_digit() => Ok(Self::Named(vec![format!("Num{}", c)])),
            (Some(c), None) => Ok(Self::Text(c.to_string())),
            _ => Ok(Self::Named(vec![raw.to_string()])),
        }
    }

    pub fn matches(&self, event: &KeyEvent) -> bool {
        match self {
            Self::Named(names) => names.iter().any(|n| n.eq_ignore_ascii_case(&event.key)),
            Self::Text(text) => event.text.as_deref() == Some(text.as_str()),
        }
    }
}

/// `modifier+key`, e.g. `Meta+§` or `Ctrl+Shift`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chord {
    raw: String,
    pub modifier: KeySpec,
    pub key: KeySpec,
}

impl Chord {
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        let invalid = |why: &str| ConfigError::InvalidKeyBinding(raw.to_string(), why.to_string());

        let (modifier, key) = match raw.strip_suffix("++") {
            Some(modifier) => (modifier, "+"),
            None => raw
                .split_once('+')
                .ok_or_else(|| invalid("expected modifier+key"))?,
        };
        if modifier.trim().is_empty() || key.trim().is_empty() {
            return Err(invalid("expected modifier+key"));
        }

        Ok(Self {
            raw: raw.to_string(),
            modifier: KeySpec::parse(modifier)?,
            key: KeySpec::parse(key)?,
        })
    }
}

impl fmt::Display for Chord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerAction {
    Ignore,
    Capture,
    Cancel,
}

pub struct CaptureTrigger {
    chord: Chord,
    cancel: KeySpec,
    cooldown: Duration,
    modifier_held: bool,
    last_fired: Option<Instant>,
    cancelled: bool,
}

impl CaptureTrigger {
    pub fn new(chord: Chord, cancel: KeySpec, cooldown: Duration) -> Self {
        Self {
            chord,
            cancel,
            cooldown,
            modifier_held: false,
            last_fired: None,
            cancelled: false,
        }
    }

    pub fn from_config(config: &AppConfig) -> Result<Self, ConfigError> {
        Ok(Self::new(
            Chord::parse(&config.capture_chord)?,
            KeySpec::parse(&config.cancel_key)?,
            config.trigger_cooldown(),
        ))
    }

    pub fn chord(&self) -> &Chord {
        &self.chord
    }

    pub fn modifier_held(&self) -> bool {
        self.modifier_held
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    /// Feeds one event. `armed` is false while a capture cycle is running;
    /// chords seen then are dropped without touching the cool-down.
    pub fn handle(&mut self, event: &KeyEvent, now: Instant, armed: bool) -> TriggerAction {
        if self.cancelled {
            return TriggerAction::Ignore;
        }

        if event.kind == KeyEventKind::Down && self.cancel.matches(event) {
            self.cancelled = true;
            return TriggerAction::Cancel;
        }

        if self.chord.modifier.matches(event) {
            // Key-up always clears, even if the key-down was never seen.
            self.modifier_held = event.kind == KeyEventKind::Down;
            return TriggerAction::Ignore;
        }

        let is_chord = event.kind == KeyEventKind::Down && self.chord.key.matches(event);
        if !is_chord || !self.modifier_held {
            return TriggerAction::Ignore;
        }

        if !armed {
            log::debug!("Capture chord ignored: a capture cycle is already running");
            return TriggerAction::Ignore;
        }

        if let Some(last) = self.last_fired {
            if now.saturating_duration_since(last) < self.cooldown {
                log::debug!("Capture chord ignored: within cool-down");
                return TriggerAction::Ignore;
            }
        }

        self.last_fired = Some(now);
        TriggerAction::Capture
    }
}
