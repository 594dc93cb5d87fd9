//! Session lifecycle: wiring strategies into a core per content descriptor
//! and running it behind the host facade the shell talks to.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use std::{fmt, io};

use crossbeam_channel as cb;
use log::{debug, info};
use thiserror::Error;

use crate::battery::{BatteryStore, SaveScope, select_battery};
use crate::content::ContentDescriptor;
use crate::controller::ControllerBridge;
use crate::display::{ScreenRect, Viewport, screen_rect};
use crate::emulator::CoreFactory;
use crate::frame::FrameSlot;
use crate::joypad::JoypadState;
use crate::remote_link::{DEFAULT_LINK_PORT, LinkEvent, RemoteMode, spawn_remote_link};
use crate::runner::CoreRunner;
use crate::serial::{LinkHandle, LinkHub, LinkStyle, LocalLinkPort, NullLinkPort, ScreenId};

/// Why a load request produced no session. Never fatal: the host is left
/// exactly as it was.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("a session is already active")]
    SessionActive,
    #[error("content `{0}` does not allow event-driven sessions")]
    EventsDisabled(String),
    #[error("ROM not found at {}", .0.display())]
    RomNotFound(PathBuf),
    #[error("emulator core failed to start: {0}")]
    Core(#[from] io::Error),
}

/// Keys the host forwards to an embedded shell menu in auxiliary mode.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MenuKey {
    Up,
    Down,
    Confirm,
    Cancel,
}

/// Menu surface the shell exposes while a session runs embedded inside a
/// scripted sequence. The host only drives it in auxiliary mode; emulation
/// timing is never coupled to it.
pub trait ShellMenu {
    /// Whether a menu is currently open.
    fn is_active(&self) -> bool;

    /// Per-tick update, forwarded while a menu is active.
    fn update(&mut self, dt: Duration);

    /// Whether the open menu is a question dialog.
    fn is_question(&self) -> bool {
        false
    }

    /// Move the highlighted question choice by `delta` (the menu clamps).
    fn move_choice(&mut self, delta: i32) {
        let _ = delta;
    }

    /// Forward an unhandled key to the open menu.
    fn key_press(&mut self, key: MenuKey) {
        let _ = key;
    }
}

struct Session {
    name: String,
    aux: bool,
    enable_events: bool,
    frame: Arc<FrameSlot>,
    turbo: Arc<AtomicBool>,
    controller: ControllerBridge,
    runner: CoreRunner,
    link: Option<LinkHandle>,
    link_events: Option<cb::Receiver<LinkEvent>>,
}

/// The emulation host for one logical screen.
///
/// Owns at most one running session at a time; the shell constructs one host
/// per screen (split-screen players each get their own) and calls into it
/// from its update and render passes. Nothing here ever blocks on the
/// emulation thread.
pub struct ArcadeHost {
    screen: ScreenId,
    cores: Arc<dyn CoreFactory>,
    store: Arc<dyn BatteryStore>,
    scope: SaveScope,
    hub: Arc<LinkHub>,
    rect: ScreenRect,
    session: Option<Session>,
}

impl ArcadeHost {
    pub fn new(
        screen: ScreenId,
        cores: Arc<dyn CoreFactory>,
        store: Arc<dyn BatteryStore>,
        scope: SaveScope,
        hub: Arc<LinkHub>,
    ) -> Self {
        Self {
            screen,
            cores,
            store,
            scope,
            hub,
            rect: screen_rect(Viewport::default()),
            session: None,
        }
    }

    /// Start a session for `content`. `aux` requests auxiliary (event-driven)
    /// mode, where the session runs embedded inside a shell-scripted
    /// sequence.
    ///
    /// On failure the host is untouched: an existing session keeps running,
    /// and no partial session is left behind.
    pub fn load(&mut self, content: &ContentDescriptor, aux: bool) -> Result<(), LoadError> {
        if self.session.is_some() {
            return Err(LoadError::SessionActive);
        }
        if aux && !content.enable_events {
            return Err(LoadError::EventsDisabled(content.id.clone()));
        }

        let rom = content.rom_path();
        if !rom.is_file() {
            return Err(LoadError::RomNotFound(rom));
        }

        let mut core = self.cores.build(&rom)?;

        core.attach_battery(select_battery(
            content.save_style(),
            &content.id,
            &self.scope,
            &self.store,
        ));

        let (link, link_events) = match content.link_style() {
            LinkStyle::None => {
                core.connect_link(Box::new(NullLinkPort::default()));
                (LinkHandle::Idle, None)
            }
            LinkStyle::Local => {
                let (port, registration) = LocalLinkPort::register(&self.hub, self.screen);
                core.connect_link(Box::new(port));
                (LinkHandle::Local(registration), None)
            }
            LinkStyle::Remote => {
                let mode = match &content.link_peer {
                    Some(addr) => RemoteMode::Connect { addr: addr.clone() },
                    None => RemoteMode::Listen {
                        port: content.link_port.unwrap_or(DEFAULT_LINK_PORT),
                    },
                };
                let (port, handle, events) = spawn_remote_link(&content.id, mode);
                core.connect_link(Box::new(port));
                (LinkHandle::Remote(handle), Some(events))
            }
        };

        let pad = Arc::new(JoypadState::default());
        core.attach_joypad(Arc::clone(&pad));

        let turbo = Arc::new(AtomicBool::new(false));
        let frame = Arc::new(FrameSlot::new());
        let runner = CoreRunner::spawn(core, Arc::clone(&frame), Arc::clone(&turbo));

        info!("session: loaded `{}` ({})", content.name, content.id);
        self.session = Some(Session {
            name: content.name.clone(),
            aux,
            enable_events: content.enable_events,
            frame,
            controller: ControllerBridge::new(pad, Arc::clone(&turbo)),
            turbo,
            runner,
            link: Some(link),
            link_events,
        });
        Ok(())
    }

    /// Stop and dispose the active session: release the link transport's
    /// host-held resources, signal cancellation, and join the emulation
    /// thread. Idempotent, and always succeeds; this is also the forced-quit
    /// path.
    pub fn unload(&mut self) {
        let Some(mut session) = self.session.take() else {
            return;
        };

        if let Some(link) = session.link.take() {
            link.release();
        }
        session.runner.stop();
        info!("session: unloaded `{}`", session.name);
    }

    /// Forced-quit notification from the shell. Must succeed from any state.
    pub fn forced_quit(&mut self) {
        self.unload();
    }

    /// Per-logical-tick callback. Only relevant in auxiliary mode, where it
    /// forwards progression to the embedded shell menu; the emulator's own
    /// timing is independent of this call.
    pub fn tick(&mut self, dt: Duration, menu: &mut dyn ShellMenu) {
        let Some(session) = &self.session else {
            return;
        };
        if session.aux && menu.is_active() {
            menu.update(dt);
        }
    }

    /// Key forwarding for auxiliary mode: Up/Down navigate an open question
    /// dialog, anything else goes to the open menu.
    pub fn menu_key(&mut self, key: MenuKey, menu: &mut dyn ShellMenu) {
        let Some(session) = &self.session else {
            return;
        };
        if !session.aux {
            return;
        }

        if menu.is_question() {
            match key {
                MenuKey::Up => menu.move_choice(-1),
                MenuKey::Down => menu.move_choice(1),
                _ => {}
            }
        } else if menu.is_active() {
            menu.key_press(key);
        }
    }

    /// Recompute the on-screen target rectangle. Pure geometry, no effect on
    /// the emulator.
    pub fn resize(&mut self, viewport: Viewport) {
        self.rect = screen_rect(viewport);
    }

    pub fn screen_rect(&self) -> ScreenRect {
        self.rect
    }

    /// Flip turbo mode; while set, frame pacing sleeps are skipped. Returns
    /// the new state.
    pub fn toggle_turbo(&self) -> bool {
        match &self.session {
            Some(session) => !session.turbo.fetch_xor(true, Ordering::Relaxed),
            None => false,
        }
    }

    /// Scripted event poke, forwarded to the controller bridge when the
    /// loaded content enables events and ignored otherwise.
    pub fn receive_event_poke(&self, code: i32) {
        let Some(session) = &self.session else {
            return;
        };
        if session.enable_events {
            session.controller.receive_event_poke(code);
        } else {
            debug!("session: dropping event poke {code}, events disabled");
        }
    }

    /// The active session's controller bridge, for the shell's input pass.
    pub fn controller(&self) -> Option<&ControllerBridge> {
        self.session.as_ref().map(|s| &s.controller)
    }

    /// Latest completed frame, read on the shell's own render cadence.
    pub fn latest_frame(&self) -> Option<Arc<[u16]>> {
        self.session.as_ref().map(|s| s.frame.latest())
    }

    /// Frames published by the active session so far.
    pub fn frames_published(&self) -> u64 {
        self.session.as_ref().map_or(0, |s| s.frame.published())
    }

    /// Link status notifications, present while a remote-link session is
    /// active.
    pub fn link_events(&self) -> Option<&cb::Receiver<LinkEvent>> {
        self.session.as_ref().and_then(|s| s.link_events.as_ref())
    }

    /// Display name of the active session.
    pub fn session_id(&self) -> Option<&str> {
        self.session.as_ref().map(|s| s.name.as_str())
    }

    pub fn is_active(&self) -> bool {
        self.session.is_some()
    }
}

impl fmt::Debug for ArcadeHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArcadeHost")
            .field("screen", &self.screen)
            .field("active", &self.session.is_some())
            .finish()
    }
}

impl Drop for ArcadeHost {
    fn drop(&mut self) {
        self.unload();
    }
}
