//! Bridges host input events into console joypad state.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use log::debug;

use crate::joypad::{Button, JoypadState};

/// A host-level control as decoded by the shell's input pass.
///
/// The eight console buttons update the joypad; `Power` and `Turbo` are
/// host controls and never reach the core.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HostButton {
    Up,
    Down,
    Left,
    Right,
    A,
    B,
    Start,
    Select,
    Power,
    Turbo,
}

/// Reaction the shell should take to a host-level control.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BridgeAction {
    /// Turbo was flipped; the new state is attached.
    TurboToggled(bool),
    /// The power control was pressed: the shell should unload the session.
    PowerOff,
}

/// Maps host button transitions into the session's joypad state and the
/// pacing turbo flag.
pub struct ControllerBridge {
    pad: Arc<JoypadState>,
    turbo: Arc<AtomicBool>,
}

impl ControllerBridge {
    pub(crate) fn new(pad: Arc<JoypadState>, turbo: Arc<AtomicBool>) -> Self {
        Self { pad, turbo }
    }

    /// Apply one host button transition. Console buttons return `None`;
    /// host-level controls report what the shell should do.
    pub fn apply(&self, button: HostButton, pressed: bool) -> Option<BridgeAction> {
        let console = match button {
            HostButton::Up => Button::Up,
            HostButton::Down => Button::Down,
            HostButton::Left => Button::Left,
            HostButton::Right => Button::Right,
            HostButton::A => Button::A,
            HostButton::B => Button::B,
            HostButton::Start => Button::Start,
            HostButton::Select => Button::Select,
            HostButton::Power => {
                return pressed.then_some(BridgeAction::PowerOff);
            }
            HostButton::Turbo => {
                if !pressed {
                    return None;
                }
                let enabled = !self.turbo.fetch_xor(true, Ordering::Relaxed);
                return Some(BridgeAction::TurboToggled(enabled));
            }
        };

        self.pad.set(console, pressed);
        None
    }

    /// Scripted event poke: codes `0..=7` press the console button whose mask
    /// is `1 << code`, codes `8..=15` release the same button. Anything else
    /// is ignored.
    pub fn receive_event_poke(&self, code: i32) {
        let (bit, pressed) = match code {
            0..=7 => (code as u8, true),
            8..=15 => (code as u8 - 8, false),
            _ => {
                debug!("controller: ignoring out-of-range event poke {code}");
                return;
            }
        };

        if let Some(button) = Button::from_bit(bit) {
            debug!(
                "controller: event poke {} {:?}",
                if pressed { "pressed" } else { "released" },
                button
            );
            self.pad.set(button, pressed);
        }
    }

    /// The joypad state this bridge writes into.
    pub fn joypad(&self) -> &Arc<JoypadState> {
        &self.pad
    }
}
