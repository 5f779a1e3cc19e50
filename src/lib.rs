//! Label layout and printing for Brother QL series label printers.
//!
//! Images are fitted onto labels by a [`LayoutEngine`], converted to raster
//! instructions by a [`RasterEncoder`] and sent over USB by a [`Transport`].
//!
//! # Example
//!
//! ```rust,no_run
//! use ql_labeler::{
//!     Config, ContinuousType, Dispatcher, LabelGeometry, LayoutEngine, LayoutMode,
//!     LayoutParams, Media, Model, RasterEncoder, UsbTransport,
//! };
//! use std::time::Duration;
//!
//! let media = Media::Continuous(ContinuousType::Continuous62Red);
//! let config = Config::new(Model::QL800, media).two_colors(true);
//!
//! let image = image::open("photo.jpg").unwrap();
//! let engine = LayoutEngine::new(LabelGeometry::for_media(media), LayoutParams::default());
//! let pages = engine.layout(&image, LayoutMode::SplitSequence).unwrap();
//!
//! let encoder = RasterEncoder::new(config.clone()).unwrap();
//! let dispatcher = Dispatcher::new(encoder, UsbTransport::new(config), Duration::from_secs(1));
//! dispatcher.dispatch(&pages).unwrap();
//! ```

mod config;
mod error;
mod layout;
mod media;
mod model;
mod pipeline;
mod printer;
mod raster;
mod sign;
mod source;
mod text;

pub mod server;

pub use crate::{
    config::{AutoCut, Config, Settings},
    error::{Error, PrinterError},
    layout::{
        LabelGeometry, LabelPage, LayoutEngine, LayoutMode, LayoutParams, Orientation,
        DEFAULT_LABEL_HEIGHT,
    },
    media::{ContinuousType, DieCutType, Media},
    model::{Model, BROTHER_VENDOR_ID},
    pipeline::{save_preview, save_previews, Dispatcher},
    printer::{ConnectionStatus, Printer, Status, Transport, UsbTransport},
    raster::{pack_bits, Raster, RasterEncoder, TwoColorMatrix},
    sign::Sign,
    source::{decode_bytes, load_path, ImageRef, ImageSource},
    text::{render_text_label, split_lines, title_case, FontBook, FontRole},
};

/// Type alias for 1-bit bitmap data used by printers.
///
/// Each inner `Vec<u8>` represents a single row of pixels, with 8 pixels
/// packed into each byte. The outer Vec represents multiple rows.
///
/// For normal printers: each row should be 90 bytes (720 pixels / 8)
/// For wide printers: each row should be 162 bytes (1296 pixels / 8)
pub type Matrix = Vec<Vec<u8>>;

/// Width in pixels for normal QL printers (QL-720NW, QL-800, QL-820NWB).
///
/// Normal printers use 720 pixels across the tape width, requiring
/// 90 bytes per row when packed into bitmap format (720 / 8 = 90).
pub const NORMAL_PRINTER_WIDTH: u32 = 720;

/// Width in pixels for wide QL printers (QL-1100 series).
///
/// Wide printers use 1296 pixels across the tape width, requiring
/// 162 bytes per row when packed into bitmap format (1296 / 8 = 162).
pub const WIDE_PRINTER_WIDTH: u32 = 1296;
