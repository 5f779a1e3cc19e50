//! Error types for label layout and printer operations.
//!
//! This module defines all possible errors that can occur while resolving
//! an image, laying it out on labels, and talking to the printer.

use std::path::PathBuf;

use crate::Media;
use thiserror::Error;

/// Main error type for the crate.
///
/// This enum encompasses everything from input resolution problems to
/// USB communication issues and printer-reported errors.
#[derive(Error, Debug)]
pub enum Error {
    /// USB communication error.
    ///
    /// Wraps underlying rusb errors for device communication issues,
    /// timeouts, or permission problems.
    #[error(transparent)]
    UsbError(#[from] rusb::Error),

    /// Printer device is not connected or not responding.
    ///
    /// This error occurs when the printer cannot be found on USB or
    /// fails to respond to initialization commands.
    #[error("Device is offline")]
    DeviceOffline,

    #[error("Can't read device list, permission issue ?")]
    DeviceListNotReadable,

    #[error("Device is missing endpoint")]
    MissingEndpoint,

    #[error("Received invalid response from printer, {0} bytes transferred")]
    InvalidResponse(usize),

    /// Invalid configuration parameter provided.
    ///
    /// This error occurs when configuration values are out of range
    /// or incompatible with the selected printer model.
    #[error("Invalid configuration parameter: {0}")]
    InvalidConfig(String),

    /// Media type mismatch between configuration and installed tape.
    #[error("Installed media does not match {0:?}")]
    InvalidMedia(Media),

    #[error("Status request return no response")]
    ReadStatusTimeout,

    /// Hardware-level printer error.
    ///
    /// Wraps printer-specific errors reported by the device itself,
    /// such as cover open, media issues, or mechanical problems.
    #[error(transparent)]
    PrinterError(PrinterError),

    #[error("Image file not found: {0}")]
    ImageNotFound(PathBuf),

    /// The remote image could not be fetched.
    #[error("Failed to fetch image: {0}")]
    Fetch(#[from] reqwest::Error),

    #[error("Failed to fetch image from {url}: HTTP {status}")]
    FetchStatus { url: String, status: u16 },

    /// The image bytes could not be decoded.
    #[error("Failed to decode image: {0}")]
    Decode(#[source] image::ImageError),

    /// The image (or a size derived from it) has no area to lay out.
    #[error("Degenerate image size {width}x{height}")]
    DegenerateImage { width: u32, height: u32 },

    /// A size derived from the image is too big to allocate.
    #[error("Layout size {width}x{height} exceeds the pixel limit")]
    ImageTooLarge { width: u32, height: u32 },

    #[error("No usable font found for {0}")]
    FontNotFound(&'static str),

    #[error("Invalid font file {0}")]
    InvalidFont(PathBuf),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<PrinterError> for Error {
    fn from(err: PrinterError) -> Self {
        Error::PrinterError(err)
    }
}

/// Hardware-specific errors reported by the printer.
///
/// These errors are parsed from the printer's status response and indicate
/// physical problems with the device that need user intervention.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PrinterError {
    // Following errors are read from printer status
    #[error("No media is installed")]
    NoMedia,

    #[error("End of media")]
    EndOfMedia,

    #[error("Cutter jam")]
    CutterJam,

    #[error("Printer is in use")]
    PrinterInUse,

    #[error("Printer is offline")]
    PrinterOffline,

    #[error("Installed media is not match")]
    InvalidMedia,

    #[error("Expansion buffer is full")]
    BufferFull,

    #[error("Communication error")]
    CommunicationError,

    #[error("Cover is open")]
    CoverOpen,

    #[error("Media can not be fed")]
    FeedMediaFail,

    #[error("System error")]
    SystemError,

    #[error("Unknown error {0:?}")]
    UnknownError((u8, u8)),
}

impl PrinterError {
    /// Parse printer error from 32-byte status buffer.
    ///
    /// Analyzes bytes 8 and 9 of the printer status response to determine
    /// the specific error condition reported by the hardware.
    ///
    /// # Returns
    /// Parsed printer error or `UnknownError((0, 0))` if no error
    pub fn from_buf(buf: [u8; 32]) -> Self {
        let err_1 = buf[8];
        let err_2 = buf[9];

        match err_1 {
            0b0000_0001 => Self::NoMedia,
            0b0000_0010 => Self::EndOfMedia,
            0b0000_0100 => Self::CutterJam,
            0b0001_0000 => Self::PrinterInUse,
            0b0010_0000 => Self::PrinterOffline,
            _ => match err_2 {
                0b0000_0001 => Self::InvalidMedia,
                0b0000_0010 => Self::BufferFull,
                0b0000_0100 => Self::CommunicationError,
                0b0001_0000 => Self::CoverOpen,
                0b0100_0000 => Self::FeedMediaFail,
                0b1000_0000 => Self::SystemError,
                _ => Self::UnknownError((err_1, err_2)),
            },
        }
    }

    /// Check if this represents a "no error" state.
    pub fn is_no_error(&self) -> bool {
        matches!(self, Self::UnknownError((0, 0)))
    }
}
