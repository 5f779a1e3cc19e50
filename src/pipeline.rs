//! Sending laid out labels to the printer, one after the other.

use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use image::RgbImage;
use log::{error, info, warn};

use crate::error::Error;
use crate::layout::{LabelPage, LayoutMode};
use crate::printer::Transport;
use crate::raster::RasterEncoder;

pub struct Dispatcher<T> {
    encoder: RasterEncoder,
    transport: T,
    pause: Duration,
}

impl<T: Transport> Dispatcher<T> {
    pub fn new(encoder: RasterEncoder, transport: T, pause: Duration) -> Self {
        Dispatcher {
            encoder,
            transport,
            pause,
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Print `pages` in order, each as its own job.
    ///
    /// Waits `pause` between two labels. The first failure stops the
    /// sequence; labels already sent stay printed.
    pub fn dispatch(&self, pages: &[LabelPage]) -> Result<(), Error> {
        let total = pages.len();
        for (n, page) in pages.iter().enumerate() {
            if n > 0 && !self.pause.is_zero() {
                thread::sleep(self.pause);
            }
            info!("Printing label {}/{}", n + 1, total);
            if let Err(err) = self.print(&page.image) {
                error!("Label {}/{} failed: {}", n + 1, total, err);
                return Err(err);
            }
        }
        info!("Printed {} label(s)", total);
        Ok(())
    }

    /// Encode and send a single image.
    pub fn print(&self, image: &RgbImage) -> Result<(), Error> {
        let instructions = self.encoder.encode(image)?;
        self.transport.send(&instructions)
    }
}

/// Write one preview image, logging instead of failing.
pub fn save_preview(image: &RgbImage, dir: &Path, name: &str) -> Option<PathBuf> {
    let path = dir.join(name);
    match image.save(&path) {
        Ok(()) => {
            info!("Preview saved as {}", path.display());
            Some(path)
        }
        Err(err) => {
            warn!("Could not save preview {}: {}", path.display(), err);
            None
        }
    }
}

/// Write a preview for every page under the names used by `mode`.
pub fn save_previews(pages: &[LabelPage], dir: &Path, mode: LayoutMode) -> Vec<PathBuf> {
    let total = pages.len();
    pages
        .iter()
        .filter_map(|page| save_preview(&page.image, dir, &mode.preview_name(page.index, total)))
        .collect()
}
