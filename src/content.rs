//! Runtime description of a playable ROM entry.
//!
//! Content packs are discovered and enumerated by the shell; this crate only
//! consumes the descriptor of the entry being loaded.

use std::path::{Path, PathBuf};

use log::warn;
use serde::{Deserialize, Serialize};

use crate::battery::SaveStyle;
use crate::serial::LinkStyle;

/// Descriptor of one playable entry inside a content pack.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default, rename_all = "kebab-case")]
pub struct ContentDescriptor {
    /// Unique identity; also keys shared battery images and remote links.
    pub id: String,

    /// Display name shown by the shell.
    pub name: String,

    /// ROM path relative to the owning content pack.
    pub file_path: PathBuf,

    /// Directory of the owning content pack.
    pub pack_dir: PathBuf,

    /// Battery persistence style: `"LOCAL"`, `"GLOBAL"`, `"SHARED"`, or
    /// absent/unknown for no persistence.
    pub save_style: Option<String>,

    /// Link cable style: `"LOCAL"`, `"REMOTE"`, or absent/unknown for no
    /// cable.
    pub link_style: Option<String>,

    /// Permit event-driven sessions and scripted event pokes.
    pub enable_events: bool,

    /// Remote link: `host:port` to dial. When absent, a remote-link session
    /// listens instead.
    pub link_peer: Option<String>,

    /// Remote link: listen port when hosting; defaults to
    /// [`DEFAULT_LINK_PORT`](crate::remote_link::DEFAULT_LINK_PORT).
    pub link_port: Option<u16>,
}

impl ContentDescriptor {
    /// Absolute ROM path: the content-pack directory joined with the entry's
    /// file path.
    pub fn rom_path(&self) -> PathBuf {
        self.pack_dir.join(&self.file_path)
    }

    pub fn save_style(&self) -> SaveStyle {
        SaveStyle::parse(self.save_style.as_deref())
    }

    pub fn link_style(&self) -> LinkStyle {
        LinkStyle::parse(self.link_style.as_deref())
    }

    pub fn from_toml_str(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Read a descriptor from disk, logging and returning `None` on failure.
    /// An unreadable entry becomes a no-op load attempt, never a crash.
    pub fn load_from_file(path: &Path) -> Option<Self> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) => {
                warn!("content: failed to read {}: {e}", path.display());
                return None;
            }
        };

        match Self::from_toml_str(&text) {
            Ok(descriptor) => Some(descriptor),
            Err(e) => {
                warn!("content: failed to parse {}: {e}", path.display());
                None
            }
        }
    }
}
