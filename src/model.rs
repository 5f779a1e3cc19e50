use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// USB vendor id shared by every Brother QL printer.
pub const BROTHER_VENDOR_ID: u16 = 0x04F9;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Model {
    QL500,
    QL550,
    QL560,
    QL570,
    QL580N,
    QL600,
    QL650TD,
    QL700,
    QL710W,
    QL720NW, // TESTED
    QL800,   // TESTED
    QL810W,
    QL820NWB, //TESTED
    QL1050,
    QL1060N,
    QL1100,
    QL1110NWB,
    QL1115NWB,
}

impl Model {
    /// Model reported in byte 4 of the status frame.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0x47 => Some(Self::QL600),
            0x37 => Some(Self::QL720NW),
            0x38 => Some(Self::QL800),
            0x39 => Some(Self::QL810W),
            0x41 => Some(Self::QL820NWB),
            0x43 => Some(Self::QL1100),
            0x44 => Some(Self::QL1110NWB),
            0x45 => Some(Self::QL1115NWB),
            _ => None,
        }
    }

    pub fn pid(&self) -> u16 {
        match self {
            Self::QL500 => 0x2015,
            Self::QL550 => 0x2016,
            Self::QL560 => 0x2027,
            Self::QL570 => 0x2028,
            Self::QL580N => 0x2029,
            Self::QL600 => 0x20C0,
            Self::QL650TD => 0x201B,
            Self::QL700 => 0x2042,
            Self::QL710W => 0x2043,
            Self::QL720NW => 0x2044,
            Self::QL800 => 0x209b,
            Self::QL810W => 0x209c,
            Self::QL820NWB => 0x209d,
            Self::QL1050 => 0x2020,
            Self::QL1060N => 0x202A,
            Self::QL1100 => 0x20A7,
            Self::QL1110NWB => 0x20A8,
            Self::QL1115NWB => 0x20AB,
        }
    }

    pub fn pins(&self) -> u32 {
        match self {
            Self::QL1050 => crate::WIDE_PRINTER_WIDTH,
            Self::QL1060N => crate::WIDE_PRINTER_WIDTH,
            Self::QL1100 => crate::WIDE_PRINTER_WIDTH,
            Self::QL1110NWB => crate::WIDE_PRINTER_WIDTH,
            Self::QL1115NWB => crate::WIDE_PRINTER_WIDTH,
            _ => crate::NORMAL_PRINTER_WIDTH,
        }
    }

    /// Only the QL-8xx family can print black/red on DK-22251 tape.
    pub fn supports_two_colors(&self) -> bool {
        matches!(self, Self::QL800 | Self::QL810W | Self::QL820NWB)
    }

    /// Device identifier in the `usb://vendor:product` form.
    pub fn usb_identifier(&self) -> String {
        format!("usb://0x{:04x}:0x{:04x}", BROTHER_VENDOR_ID, self.pid())
    }
}

impl fmt::Display for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = format!("{:?}", self);
        // QL800 -> QL-800
        write!(f, "{}-{}", &name[..2], &name[2..])
    }
}

impl FromStr for Model {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_uppercase();
        let model = match normalized.as_str() {
            "QL500" => Self::QL500,
            "QL550" => Self::QL550,
            "QL560" => Self::QL560,
            "QL570" => Self::QL570,
            "QL580N" => Self::QL580N,
            "QL600" => Self::QL600,
            "QL650TD" => Self::QL650TD,
            "QL700" => Self::QL700,
            "QL710W" => Self::QL710W,
            "QL720NW" => Self::QL720NW,
            "QL800" => Self::QL800,
            "QL810W" => Self::QL810W,
            "QL820NWB" => Self::QL820NWB,
            "QL1050" => Self::QL1050,
            "QL1060N" => Self::QL1060N,
            "QL1100" => Self::QL1100,
            "QL1110NWB" => Self::QL1110NWB,
            "QL1115NWB" => Self::QL1115NWB,
            _ => return Err(Error::InvalidConfig(format!("unknown model {}", s))),
        };
        Ok(model)
    }
}
