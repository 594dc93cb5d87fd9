//! Link cable plumbing: the byte-transfer contract and the same-process
//! transport used when several sessions in one process share a cable.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use log::{debug, warn};

use crate::remote_link::RemoteLinkHandle;

/// Identity of a logical screen (one per concurrently visible session, e.g.
/// one per split-screen player).
pub type ScreenId = u32;

/// Byte seen on an idle line with no partner driving it: all bits set.
pub const LINE_IDLE: u8 = 0xFF;

/// A serial link endpoint.
///
/// `transfer` puts one byte on the cable and returns the byte received from
/// the partner. Implementations may perform the exchange immediately; a
/// missing or unreachable partner reads as an idle line.
pub trait LinkPort: Send {
    fn transfer(&mut self, byte: u8) -> u8;
}

/// A stub link port used when no cable is attached. By default it emulates a
/// dead line where incoming bits are all 1, so any transfer receives
/// [`LINE_IDLE`]. When `loopback` is true the sent byte is echoed back
/// instead.
#[derive(Default)]
pub struct NullLinkPort {
    loopback: bool,
}

impl NullLinkPort {
    pub fn new(loopback: bool) -> Self {
        Self { loopback }
    }
}

impl LinkPort for NullLinkPort {
    fn transfer(&mut self, byte: u8) -> u8 {
        if self.loopback { byte } else { LINE_IDLE }
    }
}

/// Pending-byte slot of one endpoint.
///
/// Overwritten, never queued: a peer that sends twice before the receiver
/// reads loses the first byte, which matches what the last clocked byte on a
/// physical cable would be. Reading takes the byte and resets the slot to 0.
#[derive(Default)]
pub struct Mailbox(AtomicU8);

impl Mailbox {
    pub(crate) fn put(&self, byte: u8) {
        self.0.store(byte, Ordering::Release);
    }

    pub(crate) fn take(&self) -> u8 {
        self.0.swap(0, Ordering::AcqRel)
    }
}

/// Registry of the local link endpoints currently on the shared cable, keyed
/// by screen identity.
///
/// The shell creates one hub and hands an `Arc` of it to every host whose
/// sessions should be able to link up; there is no ambient global. Only
/// registered endpoints are broadcast targets, and a hub never holds two
/// endpoints for the same screen.
#[derive(Default)]
pub struct LinkHub {
    peers: Mutex<HashMap<ScreenId, Arc<Mailbox>>>,
}

impl LinkHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Number of endpoints currently on the cable.
    pub fn active_peers(&self) -> usize {
        self.peers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn register(hub: &Arc<Self>, screen: ScreenId) -> (Arc<Mailbox>, HubRegistration) {
        let mailbox = Arc::new(Mailbox::default());
        let previous = hub
            .peers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(screen, Arc::clone(&mailbox));
        if previous.is_some() {
            warn!("link: screen {screen} re-registered while already on the cable");
        }

        let registration = HubRegistration {
            hub: Arc::clone(hub),
            screen,
            mailbox: Arc::clone(&mailbox),
        };
        (mailbox, registration)
    }

    fn broadcast_from(&self, from: ScreenId, byte: u8) {
        let peers = self.peers.lock().unwrap_or_else(PoisonError::into_inner);
        for (&screen, mailbox) in peers.iter() {
            if screen != from {
                mailbox.put(byte);
            }
        }
    }
}

/// Host-held guard for a local endpoint's place on the cable.
///
/// Dropping it removes the endpoint from the hub, so remaining peers stop
/// targeting it; the port itself may outlive the registration inside the
/// core, where its transfers then read only its own orphaned mailbox.
pub struct HubRegistration {
    hub: Arc<LinkHub>,
    screen: ScreenId,
    mailbox: Arc<Mailbox>,
}

impl Drop for HubRegistration {
    fn drop(&mut self) {
        let mut peers = self
            .hub
            .peers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        // Only deregister our own entry; a replacement endpoint for the same
        // screen must stay registered.
        let ours = peers
            .get(&self.screen)
            .is_some_and(|current| Arc::ptr_eq(current, &self.mailbox));
        if ours {
            peers.remove(&self.screen);
        }
    }
}

/// Same-process link transport.
///
/// `transfer` broadcasts the outgoing byte into every other registered
/// endpoint's mailbox (last writer wins), then takes its own pending byte,
/// defaulting to 0 when nothing arrived since the last read. With three or
/// more peers on one hub this behaves as a shared bus rather than a
/// point-to-point cable, which is what same-process multi-instance play
/// wants.
pub struct LocalLinkPort {
    hub: Arc<LinkHub>,
    screen: ScreenId,
    mailbox: Arc<Mailbox>,
}

impl LocalLinkPort {
    /// Register a new endpoint for `screen`, returning the port to hand to
    /// the core and the registration guard the host keeps for release at
    /// unload.
    pub fn register(hub: &Arc<LinkHub>, screen: ScreenId) -> (Self, HubRegistration) {
        let (mailbox, registration) = LinkHub::register(hub, screen);
        let port = Self {
            hub: Arc::clone(hub),
            screen,
            mailbox,
        };
        (port, registration)
    }
}

impl LinkPort for LocalLinkPort {
    fn transfer(&mut self, byte: u8) -> u8 {
        self.hub.broadcast_from(self.screen, byte);
        let incoming = self.mailbox.take();
        debug!(
            "link: screen {} outgoing {byte:02X} / incoming {incoming:02X}",
            self.screen
        );
        incoming
    }
}

/// Host-retained releasable resources of a session's link strategy.
///
/// Every strategy declares its resources as part of this type and the host
/// always calls [`LinkHandle::release`] at unload; variants without resources
/// release as a no-op.
pub enum LinkHandle {
    /// Null transport: nothing to release.
    Idle,
    /// Local transport: dropping the registration leaves the cable.
    Local(HubRegistration),
    /// Remote transport: stops the link thread.
    Remote(RemoteLinkHandle),
}

impl LinkHandle {
    pub fn release(self) {
        match self {
            LinkHandle::Idle => {}
            LinkHandle::Local(registration) => drop(registration),
            LinkHandle::Remote(mut handle) => handle.shutdown(),
        }
    }
}

/// Link cable strategy named by a content descriptor.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum LinkStyle {
    #[default]
    None,
    Local,
    Remote,
}

impl LinkStyle {
    /// Case-insensitive parse of a descriptor's link-style string. Unknown or
    /// absent styles mean no cable.
    pub fn parse(style: Option<&str>) -> Self {
        match style {
            Some(s) if s.eq_ignore_ascii_case("local") => LinkStyle::Local,
            Some(s) if s.eq_ignore_ascii_case("remote") => LinkStyle::Remote,
            _ => LinkStyle::None,
        }
    }
}
