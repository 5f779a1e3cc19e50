//! Conversion of label bitmaps into QL raster instructions.
//!
//! A page is scaled to the printable width of the tape, reduced to one
//! (or two, on black/red tape) bit planes, mirrored onto the print head
//! and wrapped into the raster command stream the printer expects.

use bitflags::bitflags;
use image::imageops::{self, FilterType};
use image::{GrayImage, Luma, RgbImage};
use log::debug;

use crate::config::{AutoCut, Config};
use crate::error::Error;
use crate::Matrix;

bitflags! {
    /// `ESC i M` various mode settings.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct VariousMode: u8 {
        const AUTO_CUT = 0b0100_0000;
    }

    /// `ESC i K` expanded mode settings.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ExpandedMode: u8 {
        const TWO_COLORS = 0b0000_0001;
        const CUT_AT_END = 0b0000_1000;
        const HIGH_RESOLUTION = 0b0100_0000;
    }
}

const INVALIDATE_LEN: usize = 400;
const PRINT: u8 = 0x0C;
const PRINT_AND_EJECT: u8 = 0x1A;

/// Raster lines of a page in black and red planes.
#[derive(Debug, Clone)]
pub struct TwoColorMatrix {
    pub black: Matrix,
    pub red: Matrix,
}

impl TwoColorMatrix {
    pub fn new(black: Matrix, red: Matrix) -> Result<Self, Error> {
        if black.len() != red.len() {
            return Err(Error::InvalidConfig(
                "Black and red matrices must have the same height".to_string(),
            ));
        }

        for (i, (black_row, red_row)) in black.iter().zip(red.iter()).enumerate() {
            if black_row.len() != red_row.len() {
                return Err(Error::InvalidConfig(format!("Row {} has mismatched widths", i)));
            }
        }

        Ok(TwoColorMatrix { black, red })
    }
}

/// Bit planes of one page, ready to be framed into raster commands.
#[derive(Debug, Clone)]
pub enum Raster {
    Mono(Matrix),
    TwoColor(TwoColorMatrix),
}

impl Raster {
    pub fn lines(&self) -> usize {
        match self {
            Raster::Mono(rows) => rows.len(),
            Raster::TwoColor(matrix) => matrix.black.len(),
        }
    }
}

pub struct RasterEncoder {
    config: Config,
}

impl RasterEncoder {
    pub fn new(config: Config) -> Result<Self, Error> {
        config.validate()?;
        Ok(RasterEncoder { config })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Encode a single label as a complete print job.
    pub fn encode(&self, page: &RgbImage) -> Result<Vec<u8>, Error> {
        self.encode_job(std::iter::once(page))
    }

    /// Encode several labels into one job, cutting between them.
    pub fn encode_job<'a, I>(&self, pages: I) -> Result<Vec<u8>, Error>
    where
        I: IntoIterator<Item = &'a RgbImage>,
    {
        let mut buf = self.preamble()?;
        let mut first_page = true;
        let mut iter = pages.into_iter().peekable();

        if iter.peek().is_none() {
            return Err(Error::InvalidConfig("nothing to print".to_string()));
        }

        while let Some(page) = iter.next() {
            let raster = self.rasterize(page)?;
            debug!("page with {} raster lines", raster.lines());

            // ESC i z 印刷情報司令
            self.config
                .media
                .set_media(&mut buf, raster.lines() as u32, first_page);
            first_page = false;

            self.append_raster(&mut buf, raster);

            if iter.peek().is_some() {
                buf.push(PRINT);
            } else {
                buf.push(PRINT_AND_EJECT);
            }
        }
        Ok(buf)
    }

    fn preamble(&self) -> Result<Vec<u8>, Error> {
        let mut buf = invalidate();
        buf.extend_from_slice(&[0x1B, 0x69, 0x61, 0x01]); // Set raster command mode
        buf.extend_from_slice(&[0x1B, 0x69, 0x21, 0x00]); // Set auto status notificatoin mode
        buf.append(&mut self.config.build()?);
        if self.config.compress {
            buf.extend_from_slice(&[0x4D, 0x02]); // Set to pack bits compression mode
        } else {
            buf.extend_from_slice(&[0x4D, 0x00]); // Set to no compression mode
        }
        Ok(buf)
    }

    /// Scale a page to the tape and turn it into bit planes.
    pub fn rasterize(&self, page: &RgbImage) -> Result<Raster, Error> {
        let page = self.fit_to_tape(page)?;
        let (width, height) = page.dimensions();
        let head_pins = self.config.model.pins();
        let offset = self.config.media.pins_left(head_pins);
        let cutoff = darkness_cutoff(self.config.threshold);

        if self.config.two_colors {
            let mut black = Matrix::new();
            let mut red = Matrix::new();
            for y in 0..height {
                let mut black_row = vec![0u8; (head_pins / 8) as usize];
                let mut red_row = vec![0u8; (head_pins / 8) as usize];
                for x in 0..width {
                    let [r, g, b] = page.get_pixel(x, y).0;
                    if is_red_pixel(r, g, b) {
                        set_pin(&mut red_row, head_pins, offset + x);
                    } else if is_dark(luma(r, g, b), cutoff) {
                        set_pin(&mut black_row, head_pins, offset + x);
                    }
                }
                black.push(black_row);
                red.push(red_row);
            }
            Ok(Raster::TwoColor(TwoColorMatrix::new(black, red)?))
        } else {
            let gray = GrayImage::from_fn(width, height, |x, y| {
                let [r, g, b] = page.get_pixel(x, y).0;
                Luma([luma(r, g, b)])
            });
            let bw = if self.config.dither {
                floyd_steinberg(&gray)
            } else {
                GrayImage::from_fn(width, height, |x, y| {
                    if is_dark(gray.get_pixel(x, y).0[0], cutoff) {
                        Luma([0])
                    } else {
                        Luma([255])
                    }
                })
            };
            Ok(Raster::Mono(step_filter(head_pins, offset, width, height, |x, y| {
                bw.get_pixel(x, y).0[0] == 0
            })))
        }
    }

    /// Resize to the printable width keeping the aspect ratio.
    fn fit_to_tape(&self, page: &RgbImage) -> Result<RgbImage, Error> {
        let (width, height) = page.dimensions();
        if width == 0 || height == 0 {
            return Err(Error::DegenerateImage { width, height });
        }
        let printable = self.config.media.printable_width();

        if self.config.high_resolution {
            // 600 dpi along the tape, so scale for twice the width then halve it
            let target = printable * 2;
            let new_height = (u64::from(height) * u64::from(target) / u64::from(width)) as u32;
            let scaled = imageops::resize(page, target, new_height.max(1), FilterType::Lanczos3);
            return Ok(imageops::resize(&scaled, printable, new_height.max(1), FilterType::Lanczos3));
        }

        if width == printable {
            return Ok(page.clone());
        }
        let new_height = (u64::from(height) * u64::from(printable) / u64::from(width)) as u32;
        debug!(
            "resizing {}x{} page to printable width {}x{}",
            width, height, printable, new_height
        );
        Ok(imageops::resize(page, printable, new_height.max(1), FilterType::Lanczos3))
    }

    fn append_raster(&self, buf: &mut Vec<u8>, raster: Raster) {
        match raster {
            Raster::Mono(rows) => {
                for row in rows {
                    self.append_line(buf, &[0x67, 0x00], &row);
                }
            }
            Raster::TwoColor(matrix) => {
                for (black, red) in matrix.black.iter().zip(matrix.red.iter()) {
                    self.append_line(buf, &[0x77, 0x01], black);
                    self.append_line(buf, &[0x77, 0x02], red);
                }
            }
        }
    }

    fn append_line(&self, buf: &mut Vec<u8>, command: &[u8], row: &[u8]) {
        buf.extend_from_slice(command);
        if self.config.compress {
            let packed = pack_bits(row);
            buf.push(packed.len() as u8);
            buf.extend_from_slice(&packed);
        } else {
            buf.push(row.len() as u8);
            buf.extend_from_slice(row);
        }
    }
}

impl Config {
    /// Feed, cut and expanded mode commands of a job.
    fn build(&self) -> Result<Vec<u8>, Error> {
        let mut buf: Vec<u8> = Vec::new();

        // Set feeding values in dots
        {
            let feed = self
                .media
                .check_feed_value(self.feed)
                .map_err(Error::InvalidConfig)?;
            buf.extend_from_slice(&[0x1B, 0x69, 0x64]);
            buf.extend_from_slice(&feed);
        }
        // Set auto cut settings
        {
            let mut various_mode = VariousMode::empty();
            let mut auto_cut_num: u8 = 1;

            if let AutoCut::Enabled(n) = self.auto_cut {
                various_mode |= VariousMode::AUTO_CUT;
                auto_cut_num = n;
            }

            debug!("Various mode: {:?}", various_mode);
            debug!("Auto cut num: {:X}", auto_cut_num);

            buf.extend_from_slice(&[0x1B, 0x69, 0x4D, various_mode.bits()]); // ESC i M : Set various mode
            buf.extend_from_slice(&[0x1B, 0x69, 0x41, auto_cut_num]); // ESC i A : Set auto cut number
        }
        // Set expanded mode
        {
            let mut expanded_mode = ExpandedMode::empty();
            expanded_mode.set(ExpandedMode::TWO_COLORS, self.two_colors);
            expanded_mode.set(ExpandedMode::CUT_AT_END, self.cut_at_end);
            expanded_mode.set(ExpandedMode::HIGH_RESOLUTION, self.high_resolution);

            debug!("Expanded mode: {:?}", expanded_mode);

            buf.extend_from_slice(&[0x1B, 0x69, 0x4B, expanded_mode.bits()]); // ESC i K : Set expanded mode
        }
        Ok(buf)
    }
}

/// Leading zeros and `ESC @` that reset the printer.
pub(crate) fn invalidate() -> Vec<u8> {
    let mut buf = vec![0x00; INVALIDATE_LEN];
    buf.extend_from_slice(&[0x1B, 0x40]);
    buf
}

/// Pack rows of pixels into mirrored head lines, one bit per pin.
fn step_filter<F>(head_pins: u32, offset: u32, width: u32, height: u32, dark: F) -> Matrix
where
    F: Fn(u32, u32) -> bool,
{
    let mut bw: Matrix = Vec::new();

    for y in 0..height {
        let mut buf = vec![0u8; (head_pins / 8) as usize];
        for x in 0..width {
            if dark(x, y) {
                set_pin(&mut buf, head_pins, offset + x);
            }
        }
        bw.push(buf);
    }

    bw
}

/// The head prints the line mirrored, MSB of the first byte is the last pin.
fn set_pin(row: &mut [u8], head_pins: u32, column: u32) {
    if column >= head_pins {
        return;
    }
    let pin = (head_pins - 1 - column) as usize;
    row[pin / 8] |= 0x80 >> (pin % 8);
}

/// ITU-R 601 luma, the same weights used for "L" conversion by most tools.
fn luma(r: u8, g: u8, b: u8) -> u8 {
    ((u32::from(r) * 299 + u32::from(g) * 587 + u32::from(b) * 114) / 1000) as u8
}

/// Minimum darkness (inverted luma) printed black for a threshold in percent.
fn darkness_cutoff(threshold: f32) -> u8 {
    ((1.0 - threshold / 100.0) * 255.0).clamp(0.0, 255.0) as u8
}

fn is_dark(luma: u8, cutoff: u8) -> bool {
    255 - luma >= cutoff
}

fn is_red_pixel(r: u8, g: u8, b: u8) -> bool {
    r > 200 && g < 100 && b < 100
}

/// Floyd-Steinberg error diffusion to pure black (0) and white (255).
fn floyd_steinberg(img: &GrayImage) -> GrayImage {
    let (width, height) = img.dimensions();
    let (w, h) = (width as usize, height as usize);
    let mut buffer: Vec<i16> = img.pixels().map(|p| i16::from(p.0[0])).collect();

    for y in 0..h {
        for x in 0..w {
            let old_pixel = buffer[y * w + x];
            let new_pixel: i16 = if old_pixel >= 128 { 255 } else { 0 };
            let error = old_pixel - new_pixel;
            buffer[y * w + x] = new_pixel;

            if x + 1 < w {
                buffer[y * w + x + 1] += error * 7 / 16;
            }
            if y + 1 < h {
                if x > 0 {
                    buffer[(y + 1) * w + x - 1] += error * 3 / 16;
                }
                buffer[(y + 1) * w + x] += error * 5 / 16;
                if x + 1 < w {
                    buffer[(y + 1) * w + x + 1] += error / 16;
                }
            }
        }
    }

    GrayImage::from_fn(width, height, |x, y| {
        Luma([buffer[y as usize * w + x as usize].clamp(0, 255) as u8])
    })
}

/// TIFF PackBits compression of one raster line.
pub fn pack_bits(data: &[u8]) -> Vec<u8> {
    let mut packed = Vec::new();
    let mut i = 0;

    while i < data.len() {
        let mut run_length = 1;
        while i + run_length < data.len() && run_length < 128 && data[i + run_length] == data[i] {
            run_length += 1;
        }

        if run_length > 1 {
            packed.push((1 - run_length as i16) as i8 as u8);
            packed.push(data[i]);
            i += run_length;
        } else {
            let start = i;
            i += 1;
            while i < data.len() && i - start < 128 && !(i + 1 < data.len() && data[i] == data[i + 1]) {
                i += 1;
            }
            packed.push((i - start - 1) as u8);
            packed.extend_from_slice(&data[start..i]);
        }
    }

    packed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::{ContinuousType, Media};
    use crate::model::Model;
    use image::Rgb;

    fn mono_config() -> Config {
        Config::new(Model::QL800, Media::Continuous(ContinuousType::Continuous62)).compress(false)
    }

    fn unpack_bits(packed: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        let mut i = 0;
        while i < packed.len() {
            let n = packed[i] as i8;
            if n >= 0 {
                let len = n as usize + 1;
                out.extend_from_slice(&packed[i + 1..i + 1 + len]);
                i += 1 + len;
            } else {
                out.extend(std::iter::repeat(packed[i + 1]).take((1 - n as i16) as usize));
                i += 2;
            }
        }
        out
    }

    #[test]
    fn pack_bits_blank_line() {
        assert_eq!(pack_bits(&[0u8; 90]), vec![0xA7, 0x00]);
    }

    #[test]
    fn pack_bits_mixed_runs() {
        assert_eq!(pack_bits(&[1, 2, 3]), vec![2, 1, 2, 3]);
        assert_eq!(pack_bits(&[1, 2, 2]), vec![0, 1, 0xFF, 2]);

        let line: Vec<u8> = (0..162u32).map(|i| if i % 40 < 20 { 0xFF } else { (i % 7) as u8 }).collect();
        assert_eq!(unpack_bits(&pack_bits(&line)), line);
    }

    #[test]
    fn first_pixel_lands_after_left_margin() {
        let mut page = RgbImage::from_pixel(696, 1, Rgb([255, 255, 255]));
        page.put_pixel(0, 0, Rgb([0, 0, 0]));
        let encoder = RasterEncoder::new(mono_config()).unwrap();

        match encoder.rasterize(&page).unwrap() {
            Raster::Mono(rows) => {
                assert_eq!(rows.len(), 1);
                assert_eq!(rows[0].len(), 90);
                // column 12 of 720 pins, mirrored to pin 707
                let pin = 720 - 1 - 12;
                assert_eq!(rows[0][pin / 8], 0x80 >> (pin % 8));
                assert_eq!(rows[0].iter().filter(|b| **b != 0).count(), 1);
            }
            other => panic!("expected mono raster, got {:?}", other),
        }
    }

    #[test]
    fn threshold_splits_gray_levels() {
        let cutoff = darkness_cutoff(70.0);
        assert_eq!(cutoff, 76);
        assert!(is_dark(179, cutoff));
        assert!(!is_dark(180, cutoff));
    }

    #[test]
    fn resizes_to_printable_width() {
        let page = RgbImage::from_pixel(1392, 200, Rgb([0, 0, 0]));
        let encoder = RasterEncoder::new(mono_config()).unwrap();
        assert_eq!(encoder.rasterize(&page).unwrap().lines(), 100);
    }

    #[test]
    fn two_colors_split_planes() {
        let mut page = RgbImage::from_pixel(696, 2, Rgb([255, 255, 255]));
        page.put_pixel(0, 0, Rgb([0, 0, 0]));
        page.put_pixel(0, 1, Rgb([230, 20, 20]));
        let encoder = RasterEncoder::new(Config::default().compress(false)).unwrap();

        match encoder.rasterize(&page).unwrap() {
            Raster::TwoColor(matrix) => {
                let pin = 720 - 1 - 12;
                assert_eq!(matrix.black[0][pin / 8], 0x80 >> (pin % 8));
                assert!(matrix.red[0].iter().all(|b| *b == 0));
                assert_eq!(matrix.red[1][pin / 8], 0x80 >> (pin % 8));
                assert!(matrix.black[1].iter().all(|b| *b == 0));
            }
            other => panic!("expected two color raster, got {:?}", other),
        }
    }

    #[test]
    fn job_framing() {
        let page = RgbImage::from_pixel(696, 3, Rgb([255, 255, 255]));
        let encoder = RasterEncoder::new(mono_config()).unwrap();
        let job = encoder.encode_job([&page, &page]).unwrap();

        assert!(job[..INVALIDATE_LEN].iter().all(|b| *b == 0));
        assert_eq!(&job[INVALIDATE_LEN..INVALIDATE_LEN + 2], &[0x1B, 0x40]);
        assert_eq!(*job.last().unwrap(), PRINT_AND_EJECT);

        // preamble + 2 pages of (13 byte ESC i z + 3 lines of 93 bytes + 1 print byte)
        let preamble = encoder.preamble().unwrap().len();
        let page_len = 13 + 3 * 93 + 1;
        assert_eq!(job.len(), preamble + 2 * page_len);
        assert_eq!(job[preamble + page_len - 1], PRINT);
        // second ESC i z announces a follow-up page
        assert_eq!(job[preamble + page_len + 11], 0x01);
    }

    #[test]
    fn preamble_flags() {
        let encoder = RasterEncoder::new(Config::default()).unwrap();
        let preamble = encoder.preamble().unwrap();
        let tail = &preamble[INVALIDATE_LEN + 2..];
        assert_eq!(
            tail,
            &[
                0x1B, 0x69, 0x61, 0x01, // raster mode
                0x1B, 0x69, 0x21, 0x00, // status notification
                0x1B, 0x69, 0x64, 35, 0, // feed
                0x1B, 0x69, 0x4D, 0x40, // auto cut
                0x1B, 0x69, 0x41, 0x01, // cut every label
                0x1B, 0x69, 0x4B, 0x09, // two colors, cut at end
                0x4D, 0x02, // pack bits
            ]
        );
    }

    #[test]
    fn dithering_is_binary_and_keeps_extremes() {
        let white = GrayImage::from_pixel(4, 4, Luma([255]));
        assert!(floyd_steinberg(&white).pixels().all(|p| p.0[0] == 255));
        let gray = GrayImage::from_pixel(8, 8, Luma([128]));
        let result = floyd_steinberg(&gray);
        assert!(result.pixels().all(|p| p.0[0] == 0 || p.0[0] == 255));
        assert!(result.pixels().any(|p| p.0[0] == 0));
    }

    #[test]
    fn empty_job_is_rejected() {
        let encoder = RasterEncoder::new(mono_config()).unwrap();
        assert!(encoder.encode_job(std::iter::empty::<&RgbImage>()).is_err());
    }
}
