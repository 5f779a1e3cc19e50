//! Printer configuration and process settings.
//!
//! [`Config`] describes one printer and how pages are encoded for it.
//! [`Settings`] adds everything else a run needs and can be read from the
//! environment (a `.env` file is honoured through `dotenvy`).

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use log::debug;

use crate::error::Error;
use crate::layout::{LabelGeometry, LayoutParams};
use crate::media::{ContinuousType, Media};
use crate::model::Model;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AutoCut {
    Enabled(u8),
    Disabled,
}

/// Config
///
#[derive(Debug, Clone)]
pub struct Config {
    pub(crate) model: Model,
    pub(crate) serial: Option<String>,
    pub(crate) media: Media,
    pub(crate) auto_cut: AutoCut,
    pub(crate) two_colors: bool,
    pub(crate) cut_at_end: bool,
    pub(crate) high_resolution: bool,
    pub(crate) feed: u16,
    pub(crate) compress: bool,
    pub(crate) threshold: f32,
    pub(crate) dither: bool,
    pub(crate) blocking: bool,
}

impl Config {
    /// Initialize configuration data with default values.
    ///
    /// This method receives model and media.  They are not modifiable after the initialization.
    ///
    /// # Example
    ///
    /// ```
    /// use ql_labeler::{Config, ContinuousType, Media, Model};
    ///
    /// let media = Media::Continuous(ContinuousType::Continuous62);
    /// let config = Config::new(Model::QL800, media).threshold(70.0);
    /// ```
    ///
    pub fn new(model: Model, media: Media) -> Config {
        Config {
            model,
            serial: None,
            media,
            auto_cut: AutoCut::Enabled(1),
            two_colors: false,
            cut_at_end: true,
            high_resolution: false,
            feed: media.get_default_feed_dots(),
            compress: true,
            threshold: 70.0,
            dither: false,
            blocking: false,
        }
    }

    /// Only open the printer with this serial number.
    pub fn serial(self, serial: impl Into<String>) -> Self {
        Config {
            serial: Some(serial.into()),
            ..self
        }
    }

    /// Enable auto cut per
    pub fn enable_auto_cut(self, size: u8) -> Self {
        Config {
            auto_cut: AutoCut::Enabled(size),
            ..self
        }
    }

    pub fn disable_auto_cut(self) -> Self {
        Config {
            auto_cut: AutoCut::Disabled,
            ..self
        }
    }

    pub fn cut_at_end(self, flag: bool) -> Self {
        Config {
            cut_at_end: flag,
            ..self
        }
    }

    pub fn high_resolution(self, high: bool) -> Self {
        Config {
            high_resolution: high,
            ..self
        }
    }

    pub fn set_feed_in_dots(self, feed: u16) -> Self {
        Config { feed, ..self }
    }

    pub fn two_colors(self, two_colors: bool) -> Self {
        Config { two_colors, ..self }
    }

    /// Switch to another tape, resetting the feed to its default.
    ///
    /// Two color printing stays on only for black/red tape.
    pub fn media(self, media: Media) -> Self {
        Config {
            media,
            feed: media.get_default_feed_dots(),
            two_colors: self.two_colors && is_red_tape(media),
            ..self
        }
    }

    pub fn compress(self, flag: bool) -> Self {
        Config {
            compress: flag,
            ..self
        }
    }

    /// Darkness cutoff in percent, higher prints more pixels black.
    pub fn threshold(self, threshold: f32) -> Self {
        Config {
            threshold: threshold.clamp(0.0, 100.0),
            ..self
        }
    }

    pub fn dither(self, flag: bool) -> Self {
        Config {
            dither: flag,
            ..self
        }
    }

    /// Wait for the printer to report completion after each job.
    pub fn blocking(self, flag: bool) -> Self {
        Config {
            blocking: flag,
            ..self
        }
    }

    pub fn model(&self) -> Model {
        self.model
    }

    pub fn media_type(&self) -> Media {
        self.media
    }

    pub fn is_two_colors(&self) -> bool {
        self.two_colors
    }

    pub fn is_blocking(&self) -> bool {
        self.blocking
    }

    pub fn validate(&self) -> Result<(), Error> {
        self.media
            .check_feed_value(self.feed)
            .map_err(Error::InvalidConfig)?;
        if self.two_colors && !self.model.supports_two_colors() {
            return Err(Error::InvalidConfig(format!(
                "{} can not print two colors",
                self.model
            )));
        }
        if self.two_colors && !is_red_tape(self.media) {
            return Err(Error::InvalidConfig(
                "two color printing needs DK-22251 black/red tape".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for Config {
    /// QL-800 with DK-22251 black/red 62mm tape.
    fn default() -> Self {
        Config::new(
            Model::QL800,
            Media::Continuous(ContinuousType::Continuous62Red),
        )
        .two_colors(true)
    }
}

/// Everything a print run or the server needs besides the image itself.
#[derive(Debug, Clone)]
pub struct Settings {
    pub printer: Config,
    pub geometry: LabelGeometry,
    pub layout: LayoutParams,
    /// Pause between consecutive labels of a sequence.
    pub page_pause: Duration,
    pub fetch_timeout: Duration,
    pub preview_dir: PathBuf,
    pub bind: String,
    pub font: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        let printer = Config::default();
        Settings {
            geometry: LabelGeometry::for_media(printer.media_type()),
            printer,
            layout: LayoutParams::default(),
            page_pause: Duration::from_secs(1),
            fetch_timeout: Duration::from_secs(30),
            preview_dir: PathBuf::from("."),
            bind: "0.0.0.0:5000".to_string(),
            font: None,
        }
    }
}

impl Settings {
    /// Load `.env` if present and read `QL_*` variables from the environment.
    pub fn from_env() -> Result<Self, Error> {
        match dotenvy::dotenv() {
            Ok(path) => debug!("loaded environment from {:?}", path),
            Err(err) => debug!("no .env file loaded: {}", err),
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build settings from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, Error>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Settings::default();

        let model = parse_or(&lookup, "QL_MODEL", defaults.printer.model())?;
        let media = parse_or(&lookup, "QL_TAPE", defaults.printer.media_type())?;
        let red = parse_flag(
            &lookup,
            "QL_RED",
            model.supports_two_colors() && is_red_tape(media),
        )?;

        let mut printer = Config::new(model, media)
            .two_colors(red)
            .threshold(parse_or(&lookup, "QL_THRESHOLD", defaults.printer.threshold)?)
            .compress(parse_flag(&lookup, "QL_COMPRESS", defaults.printer.compress)?)
            .dither(parse_flag(&lookup, "QL_DITHER", defaults.printer.dither)?)
            .high_resolution(parse_flag(&lookup, "QL_HIGH_RES", false)?)
            .blocking(parse_flag(&lookup, "QL_BLOCKING", false)?);
        if let Some(serial) = lookup("QL_SERIAL").filter(|s| !s.is_empty()) {
            printer = printer.serial(serial);
        }
        printer.validate()?;

        let mut geometry = LabelGeometry::for_media(media);
        geometry.height = parse_or(&lookup, "QL_LABEL_HEIGHT", geometry.height)?;

        Ok(Settings {
            printer,
            geometry,
            layout: defaults.layout,
            page_pause: Duration::from_millis(parse_or(&lookup, "QL_PAGE_PAUSE_MS", 1000u64)?),
            fetch_timeout: Duration::from_secs(parse_or(&lookup, "QL_FETCH_TIMEOUT_SECS", 30u64)?),
            preview_dir: lookup("QL_PREVIEW_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.preview_dir),
            bind: lookup("QL_BIND").unwrap_or(defaults.bind),
            font: lookup("QL_FONT").map(PathBuf::from),
        })
    }
}

fn is_red_tape(media: Media) -> bool {
    media == Media::Continuous(ContinuousType::Continuous62Red)
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T, Error>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        Some(value) if !value.trim().is_empty() => value
            .trim()
            .parse()
            .map_err(|_| Error::InvalidConfig(format!("{}={}", key, value))),
        _ => Ok(default),
    }
}

fn parse_flag<F>(lookup: &F, key: &str, default: bool) -> Result<bool, Error>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key).map(|v| v.trim().to_lowercase()) {
        None => Ok(default),
        Some(v) => match v.as_str() {
            "" => Ok(default),
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(Error::InvalidConfig(format!("{}={}", key, v))),
        },
    }
}
