//! Battery-backed cartridge RAM strategies.
//!
//! The emulator core drives the uniform [`Battery`] contract; which image the
//! bytes land in is policy chosen here from the content descriptor's
//! save-style. Storage mechanics belong to the shell behind [`BatteryStore`].

use std::io;
use std::sync::Arc;

use log::{debug, warn};

/// Uniform load/save contract the emulator core drives.
pub trait Battery: Send {
    /// Bytes to preload into cartridge RAM, if a persisted image exists.
    fn load(&mut self) -> Option<Vec<u8>>;

    /// Persist the current cartridge RAM image.
    fn save(&mut self, ram: &[u8]);
}

/// Byte storage the shell provides. Keys are opaque scope paths chosen by the
/// battery strategies.
pub trait BatteryStore: Send + Sync {
    fn read(&self, key: &str) -> io::Result<Option<Vec<u8>>>;
    fn write(&self, key: &str, bytes: &[u8]) -> io::Result<()>;
}

/// Identities the save-scope keys are built from.
#[derive(Clone, Debug)]
pub struct SaveScope {
    /// Identity of the loaded save file ("the farm").
    pub save_id: String,
    /// Identity of the local player inside that save.
    pub player_id: String,
}

/// Persistence policy named by a content descriptor.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum SaveStyle {
    /// Cartridge RAM is not persisted at all.
    #[default]
    None,
    /// One image per player per save file.
    Local,
    /// One image per save file, shared by its players.
    Global,
    /// One image across all save files.
    Shared,
}

impl SaveStyle {
    /// Case-insensitive parse of a descriptor's save-style string.
    ///
    /// Unknown or absent styles deliberately fail open to [`SaveStyle::None`]:
    /// the game runs, cartridge RAM just isn't persisted.
    pub fn parse(style: Option<&str>) -> Self {
        match style {
            Some(s) if s.eq_ignore_ascii_case("local") => SaveStyle::Local,
            Some(s) if s.eq_ignore_ascii_case("global") => SaveStyle::Global,
            Some(s) if s.eq_ignore_ascii_case("shared") => SaveStyle::Shared,
            _ => SaveStyle::None,
        }
    }
}

/// Battery that persists nothing.
pub struct NullBattery;

impl Battery for NullBattery {
    fn load(&mut self) -> Option<Vec<u8>> {
        None
    }

    fn save(&mut self, _ram: &[u8]) {}
}

/// Battery bound to one save-scope key of the shell's store. Store failures
/// are logged and swallowed; a broken store must never abort the session.
struct StoreBattery {
    store: Arc<dyn BatteryStore>,
    key: String,
}

impl Battery for StoreBattery {
    fn load(&mut self) -> Option<Vec<u8>> {
        match self.store.read(&self.key) {
            Ok(image) => {
                if let Some(bytes) = &image {
                    debug!("battery: loaded {} bytes from {}", bytes.len(), self.key);
                }
                image
            }
            Err(e) => {
                warn!("battery: failed to read {}: {e}", self.key);
                None
            }
        }
    }

    fn save(&mut self, ram: &[u8]) {
        if let Err(e) = self.store.write(&self.key, ram) {
            warn!("battery: failed to write {}: {e}", self.key);
        }
    }
}

/// Select the battery strategy for `style`, keyed into `store` by the
/// content identity and the current save scope.
pub fn select_battery(
    style: SaveStyle,
    content_id: &str,
    scope: &SaveScope,
    store: &Arc<dyn BatteryStore>,
) -> Box<dyn Battery> {
    let key = match style {
        SaveStyle::None => return Box::new(NullBattery),
        SaveStyle::Local => format!("{}/{}/{}", scope.save_id, scope.player_id, content_id),
        SaveStyle::Global => format!("{}/{}", scope.save_id, content_id),
        SaveStyle::Shared => content_id.to_string(),
    };

    Box::new(StoreBattery {
        store: Arc::clone(store),
        key,
    })
}
