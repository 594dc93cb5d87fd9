#![allow(dead_code)]

use once_cell::sync::OnceCell;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use gb_arcade::battery::{Battery, BatteryStore};
use gb_arcade::content::ContentDescriptor;
use gb_arcade::emulator::{CoreFactory, EmulatorCore};
use gb_arcade::frame::FRAME_PIXELS;
use gb_arcade::joypad::JoypadState;
use gb_arcade::serial::LinkPort;

static INIT: OnceCell<()> = OnceCell::new();

pub fn init_logging() {
    INIT.get_or_init(|| {
        let _ = env_logger::builder().is_test(true).try_init();
    });
}

/// Observations recorded by [`TestCore`] instances for assertions.
#[derive(Default)]
pub struct CoreProbe {
    pub steps: AtomicU64,
    pub last_pad: AtomicU8,
    pub saves: Mutex<Vec<Vec<u8>>>,
    pub loaded_image: Mutex<Option<Vec<u8>>>,
}

/// Scripted stand-in for the opaque emulator core: produces one uniformly
/// filled frame (with an incrementing pixel value) every `steps_per_frame`
/// steps and mirrors the battery contract.
pub struct TestCore {
    steps_per_frame: u32,
    steps_in_frame: u32,
    frame_value: u16,
    frame_ready: bool,
    framebuffer: Vec<u16>,
    pad: Option<Arc<JoypadState>>,
    link: Option<Box<dyn LinkPort>>,
    battery: Option<Box<dyn Battery>>,
    ram: Vec<u8>,
    probe: Arc<CoreProbe>,
}

impl EmulatorCore for TestCore {
    fn step(&mut self) {
        self.probe.steps.fetch_add(1, Ordering::Relaxed);
        if let Some(pad) = &self.pad {
            self.probe.last_pad.store(pad.snapshot(), Ordering::Relaxed);
        }

        self.steps_in_frame += 1;
        if self.steps_in_frame >= self.steps_per_frame {
            self.steps_in_frame = 0;
            self.frame_value = self.frame_value.wrapping_add(1);
            self.framebuffer.fill(self.frame_value);
            self.frame_ready = true;
        }
    }

    fn frame_ready(&self) -> bool {
        self.frame_ready
    }

    fn framebuffer(&self) -> &[u16] {
        &self.framebuffer
    }

    fn clear_frame_flag(&mut self) {
        self.frame_ready = false;
    }

    fn attach_joypad(&mut self, pad: Arc<JoypadState>) {
        self.pad = Some(pad);
    }

    fn connect_link(&mut self, port: Box<dyn LinkPort>) {
        self.link = Some(port);
    }

    fn attach_battery(&mut self, mut battery: Box<dyn Battery>) {
        if let Some(image) = battery.load() {
            *self.probe.loaded_image.lock().unwrap() = Some(image.clone());
            self.ram = image;
        }
        self.battery = Some(battery);
    }

    fn save_ram(&mut self) {
        if let Some(battery) = &mut self.battery {
            battery.save(&self.ram);
            self.probe.saves.lock().unwrap().push(self.ram.clone());
        }
    }
}

/// Factory producing [`TestCore`]s that all report into one [`CoreProbe`].
pub struct TestCoreFactory {
    pub probe: Arc<CoreProbe>,
    pub steps_per_frame: u32,
    pub default_ram: Vec<u8>,
    pub fail: bool,
}

impl TestCoreFactory {
    pub fn new(probe: Arc<CoreProbe>) -> Self {
        Self {
            probe,
            steps_per_frame: 1,
            default_ram: vec![1, 2, 3],
            fail: false,
        }
    }
}

impl CoreFactory for TestCoreFactory {
    fn build(&self, _rom_path: &Path) -> io::Result<Box<dyn EmulatorCore>> {
        if self.fail {
            return Err(io::Error::other("scripted core failure"));
        }

        Ok(Box::new(TestCore {
            steps_per_frame: self.steps_per_frame.max(1),
            steps_in_frame: 0,
            frame_value: 0,
            frame_ready: false,
            framebuffer: vec![0; FRAME_PIXELS],
            pad: None,
            link: None,
            battery: None,
            ram: self.default_ram.clone(),
            probe: Arc::clone(&self.probe),
        }))
    }
}

/// Battery store writing images under a directory, one file per scope key.
pub struct DirStore {
    root: PathBuf,
}

impl DirStore {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }
}

impl BatteryStore for DirStore {
    fn read(&self, key: &str) -> io::Result<Option<Vec<u8>>> {
        match fs::read(self.root.join(key)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn write(&self, key: &str, bytes: &[u8]) -> io::Result<()> {
        let path = self.root.join(key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, bytes)
    }
}

/// Write a dummy ROM into `pack_dir` and return a descriptor pointing at it.
pub fn content_with_rom(pack_dir: &Path, id: &str) -> ContentDescriptor {
    let file_path = PathBuf::from("game.gb");
    fs::write(pack_dir.join(&file_path), b"ROM").unwrap();

    ContentDescriptor {
        id: id.to_string(),
        name: format!("{id} (test)"),
        file_path,
        pack_dir: pack_dir.to_path_buf(),
        ..ContentDescriptor::default()
    }
}
