use std::str::FromStr;

use bitflags::bitflags;

use crate::error::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContinuousType {
    Continuous12,
    Continuous29,
    Continuous38,
    Continuous50,
    Continuous54,
    Continuous62,
    /// DK-22251 black/red tape.
    Continuous62Red,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DieCutType {
    DieCut17x54,
    DieCut29x90,
    DieCut62x29,
    DieCut62x100,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Media {
    Continuous(ContinuousType),
    DieCut(DieCutType),
}

bitflags! {
    /// Valid-field flags of the `ESC i z` print information command.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PrintInfo: u8 {
        const KIND = 0b0000_0010;
        const WIDTH = 0b0000_0100;
        const LENGTH = 0b0000_1000;
        const QUALITY = 0b0100_0000;
        const RECOVER = 0b1000_0000;
    }
}

struct MediaSize {
    mm: u8,
    dots: u32,
}

struct MediaSpec {
    width: MediaSize,
    // printable length of die-cut labels
    length: Option<MediaSize>,
    margin: u32,
    pins_right: u32,
}

impl MediaSpec {
    fn pins_effective(&self) -> u32 {
        self.width.dots - self.margin * 2
    }
}

const CONTINUOUS_MEDIA_TYPE: u8 = 0x0A;
const DIE_CUT_MEDIA_TYPE: u8 = 0x0B;

/// Minimum feed for continuous tape in dots.
const MIN_CONTINUOUS_FEED: u16 = 35;
const MAX_CONTINUOUS_FEED: u16 = 1000;

impl Media {
    fn spec(&self) -> MediaSpec {
        match self {
            Self::Continuous(ContinuousType::Continuous12) => MediaSpec {
                width: MediaSize { mm: 12, dots: 142 },
                length: None,
                margin: 18,
                pins_right: 29,
            },
            Self::Continuous(ContinuousType::Continuous29) => MediaSpec {
                width: MediaSize { mm: 29, dots: 342 },
                length: None,
                margin: 18,
                pins_right: 6,
            },
            Self::Continuous(ContinuousType::Continuous38) => MediaSpec {
                width: MediaSize { mm: 38, dots: 449 },
                length: None,
                margin: 18,
                pins_right: 12,
            },
            Self::Continuous(ContinuousType::Continuous50) => MediaSpec {
                width: MediaSize { mm: 50, dots: 590 },
                length: None,
                margin: 18,
                pins_right: 12,
            },
            Self::Continuous(ContinuousType::Continuous54) => MediaSpec {
                width: MediaSize { mm: 54, dots: 636 },
                length: None,
                margin: 23,
                pins_right: 0,
            },
            Self::Continuous(ContinuousType::Continuous62)
            | Self::Continuous(ContinuousType::Continuous62Red) => MediaSpec {
                width: MediaSize { mm: 62, dots: 732 },
                length: None,
                margin: 18,
                pins_right: 12,
            },
            Self::DieCut(DieCutType::DieCut17x54) => MediaSpec {
                width: MediaSize { mm: 17, dots: 201 },
                length: Some(MediaSize { mm: 54, dots: 566 }),
                margin: 18,
                pins_right: 0,
            },
            Self::DieCut(DieCutType::DieCut29x90) => MediaSpec {
                width: MediaSize { mm: 29, dots: 342 },
                length: Some(MediaSize { mm: 90, dots: 991 }),
                margin: 18,
                pins_right: 6,
            },
            Self::DieCut(DieCutType::DieCut62x29) => MediaSpec {
                width: MediaSize { mm: 62, dots: 732 },
                length: Some(MediaSize { mm: 29, dots: 271 }),
                margin: 18,
                pins_right: 12,
            },
            Self::DieCut(DieCutType::DieCut62x100) => MediaSpec {
                width: MediaSize { mm: 62, dots: 732 },
                length: Some(MediaSize { mm: 100, dots: 1109 }),
                margin: 18,
                pins_right: 12,
            },
        }
    }

    /// Decode the installed media from a 32-byte status frame.
    pub fn from_buf(buf: [u8; 32]) -> Option<Self> {
        let w = buf[10];
        let t = buf[11];
        let l = buf[17];

        match t {
            // Document says it is 0x4A but actual value seems to be 0x0A
            0x0A | 0x4A => match w {
                12 => Some(Self::Continuous(ContinuousType::Continuous12)),
                29 => Some(Self::Continuous(ContinuousType::Continuous29)),
                38 => Some(Self::Continuous(ContinuousType::Continuous38)),
                50 => Some(Self::Continuous(ContinuousType::Continuous50)),
                54 => Some(Self::Continuous(ContinuousType::Continuous54)),
                62 => Some(Self::Continuous(ContinuousType::Continuous62)),
                _ => None,
            },
            // Same as above, 0x0B not 0x4B
            0x0B | 0x4B => match (w, l) {
                (17, 54) => Some(Self::DieCut(DieCutType::DieCut17x54)),
                (29, 90) => Some(Self::DieCut(DieCutType::DieCut29x90)),
                (62, 29) => Some(Self::DieCut(DieCutType::DieCut62x29)),
                (62, 100) => Some(Self::DieCut(DieCutType::DieCut62x100)),
                _ => None,
            },
            _ => None,
        }
    }

    /// Printable width in dots at 300 dpi.
    pub fn printable_width(&self) -> u32 {
        self.spec().pins_effective()
    }

    /// Printable length in dots for die-cut labels, `None` for continuous tape.
    pub fn printable_length(&self) -> Option<u32> {
        self.spec().length.map(|l| l.dots)
    }

    /// Print head pins left unused on the right hand side of the tape.
    pub fn pins_right(&self) -> u32 {
        self.spec().pins_right
    }

    /// Print head pins left unused on the left hand side of the tape.
    pub fn pins_left(&self, head_pins: u32) -> u32 {
        head_pins.saturating_sub(self.printable_width() + self.pins_right())
    }

    pub fn is_continuous(&self) -> bool {
        matches!(self, Self::Continuous(_))
    }

    /// Whether `installed` (as decoded from a status frame) is the same stock.
    ///
    /// The printer can not tell DK-22251 from plain 62mm tape, so both match.
    pub fn matches(&self, installed: &Media) -> bool {
        let (a, b) = (self.spec(), installed.spec());
        self.is_continuous() == installed.is_continuous()
            && a.width.mm == b.width.mm
            && a.length.map(|l| l.mm) == b.length.map(|l| l.mm)
    }

    pub fn get_default_feed_dots(&self) -> u16 {
        if self.is_continuous() {
            MIN_CONTINUOUS_FEED
        } else {
            0
        }
    }

    /// Validate a feed margin and encode it as the `ESC i d` parameter.
    pub fn check_feed_value(&self, feed: u16) -> Result<[u8; 2], String> {
        if self.is_continuous() {
            if (MIN_CONTINUOUS_FEED..=MAX_CONTINUOUS_FEED).contains(&feed) {
                Ok(feed.to_le_bytes())
            } else {
                Err(format!(
                    "feed for continuous tape must be between {} and {} dots, got {}",
                    MIN_CONTINUOUS_FEED, MAX_CONTINUOUS_FEED, feed
                ))
            }
        } else if feed == 0 {
            Ok([0x00, 0x00])
        } else {
            Err(format!("feed for die-cut labels must be 0, got {}", feed))
        }
    }

    /// Append the `ESC i z` print information command for one page.
    pub fn set_media(&self, buf: &mut Vec<u8>, raster_lines: u32, first_page: bool) {
        let spec = self.spec();
        let mut flags = PrintInfo::KIND | PrintInfo::WIDTH | PrintInfo::QUALITY | PrintInfo::RECOVER;
        let media_type = if self.is_continuous() {
            CONTINUOUS_MEDIA_TYPE
        } else {
            flags |= PrintInfo::LENGTH;
            DIE_CUT_MEDIA_TYPE
        };
        let length_mm = spec.length.map(|l| l.mm).unwrap_or(0);

        buf.extend_from_slice(&[0x1B, 0x69, 0x7A, flags.bits(), media_type, spec.width.mm, length_mm]);
        buf.extend_from_slice(&raster_lines.to_le_bytes());
        buf.push(if first_page { 0x00 } else { 0x01 });
        buf.push(0x00);
    }
}

impl FromStr for Media {
    type Err = Error;

    /// Parse tape names such as `62`, `62red` or `62x29`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let media = match s.trim().to_lowercase().as_str() {
            "12" => Self::Continuous(ContinuousType::Continuous12),
            "29" => Self::Continuous(ContinuousType::Continuous29),
            "38" => Self::Continuous(ContinuousType::Continuous38),
            "50" => Self::Continuous(ContinuousType::Continuous50),
            "54" => Self::Continuous(ContinuousType::Continuous54),
            "62" => Self::Continuous(ContinuousType::Continuous62),
            "62red" => Self::Continuous(ContinuousType::Continuous62Red),
            "17x54" => Self::DieCut(DieCutType::DieCut17x54),
            "29x90" => Self::DieCut(DieCutType::DieCut29x90),
            "62x29" => Self::DieCut(DieCutType::DieCut62x29),
            "62x100" => Self::DieCut(DieCutType::DieCut62x100),
            other => return Err(Error::InvalidConfig(format!("unknown tape size {}", other))),
        };
        Ok(media)
    }
}
