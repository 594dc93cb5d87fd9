//! Geometry of the emulator display inside the host viewport.

use crate::frame::{FRAME_HEIGHT, FRAME_WIDTH};

/// Default integer upscale of the LCD inside the host UI.
pub const UI_SCALE: u32 = 4;

/// Target rectangle for the LCD, in host screen coordinates.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct ScreenRect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

/// Host viewport parameters the target rectangle is derived from.
#[derive(Clone, Copy, Debug)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
    /// Host zoom level applied to the viewport.
    pub zoom: f32,
    /// Host UI scale; drawing happens in UI coordinates, so sizes divide by
    /// it.
    pub ui_scale: f32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: FRAME_WIDTH as u32 * UI_SCALE,
            height: FRAME_HEIGHT as u32 * UI_SCALE,
            zoom: 1.0,
            ui_scale: 1.0,
        }
    }
}

/// Compute the centered on-screen rectangle for the LCD. Pure math, no
/// emulator side effects.
pub fn screen_rect(viewport: Viewport) -> ScreenRect {
    let zoom = if viewport.zoom > 0.0 { viewport.zoom } else { 1.0 };
    let ui_scale = if viewport.ui_scale > 0.0 {
        viewport.ui_scale
    } else {
        1.0
    };

    let width = ((FRAME_WIDTH as u32 * UI_SCALE) as f32 / ui_scale).round() as u32;
    let height = ((FRAME_HEIGHT as u32 * UI_SCALE) as f32 / ui_scale).round() as u32;

    // Available area in UI coordinates: the viewport under zoom, divided by
    // the UI scale.
    let avail_w = (viewport.width as f32 * zoom / ui_scale) as i32;
    let avail_h = (viewport.height as f32 * zoom / ui_scale) as i32;

    ScreenRect {
        x: avail_w / 2 - width as i32 / 2,
        y: avail_h / 2 - height as i32 / 2,
        width,
        height,
    }
}
