//! Text label rendering.
//!
//! Fonts are looked up by role through a [`FontBook`]; the label itself is a
//! date stamp in the top-left corner and the main text, shrunk until it fits
//! the space below.

use std::path::{Path, PathBuf};

use ab_glyph::{Font, FontVec, PxScale, ScaleFont};
use chrono::NaiveDateTime;
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_text_mut, text_size};
use log::{debug, info};

use crate::error::Error;
use crate::layout::LabelGeometry;

const BLACK: Rgb<u8> = Rgb([0, 0, 0]);
const WHITE: Rgb<u8> = Rgb([255, 255, 255]);

pub const DATE_FORMAT: &str = "%Y-%m-%d %H:%M";
const DATE_FONT_SIZE: f32 = 40.0;
const MARGIN: u32 = 4;
/// Gap between the date stamp and the main text area.
const DATE_GAP: u32 = 8;
const LINE_SPACING: u32 = 4;

/// Texts longer than this are broken into several lines.
pub const SINGLE_LINE_THRESHOLD: usize = 25;
const MAX_FONT_SIZE: u32 = 140;
const MIN_FONT_SIZE: u32 = 32;
const FONT_SIZE_STEP: usize = 2;
const FILL_RATIO: f32 = 0.95;

/// DejaVu Sans Bold, used when no candidate file can be read.
static BUNDLED_FONT: &[u8] = include_bytes!("../assets/fonts/DejaVuSans-Bold.ttf");

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FontRole {
    /// Large face for the main text.
    Display,
    /// Plain face for the date stamp and small print.
    Caption,
}

impl FontRole {
    fn as_str(&self) -> &'static str {
        match self {
            FontRole::Display => "display text",
            FontRole::Caption => "captions",
        }
    }
}

/// Candidate font files per role, first readable one wins.
///
/// When none of them loads, the bundled face is used.
#[derive(Debug, Clone)]
pub struct FontBook {
    display: Vec<PathBuf>,
    caption: Vec<PathBuf>,
    fallback: bool,
}

impl FontBook {
    pub fn new(display: Vec<PathBuf>, caption: Vec<PathBuf>) -> Self {
        FontBook {
            display,
            caption,
            fallback: true,
        }
    }

    /// Only the bundled face, whatever is installed.
    pub fn bundled() -> Self {
        Self::new(vec![], vec![])
    }

    /// Fail instead of using the bundled face.
    pub fn without_fallback(mut self) -> Self {
        self.fallback = false;
        self
    }

    /// Fonts commonly installed on macOS.
    #[cfg(target_os = "macos")]
    pub fn system() -> Self {
        Self::new(
            paths(&[
                "/System/Library/Fonts/Avenir.ttc",
                "/System/Library/Fonts/Futura.ttc",
                "/System/Library/Fonts/Optima.ttc",
                "/System/Library/Fonts/Palatino.ttc",
                "/System/Library/Fonts/Supplemental/Baskerville.ttc",
                "/System/Library/Fonts/Supplemental/Garamond.ttc",
                "/Library/Fonts/Georgia.ttf",
                "/System/Library/Fonts/Supplemental/Hoefler Text.ttc",
            ]),
            paths(&[
                "/System/Library/Fonts/Helvetica.ttf",
                "/System/Library/Fonts/Arial.ttf",
                "/System/Library/Fonts/Avenir.ttc",
            ]),
        )
    }

    /// Fonts commonly installed on Linux distributions.
    #[cfg(not(target_os = "macos"))]
    pub fn system() -> Self {
        Self::new(
            paths(&[
                "/usr/share/fonts/truetype/dejavu/DejaVuSans-Bold.ttf",
                "/usr/share/fonts/truetype/liberation/LiberationSans-Bold.ttf",
                "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
                "/usr/share/fonts/truetype/dejavu/DejaVuSerif.ttf",
                "/usr/share/fonts/truetype/liberation/LiberationSans-Regular.ttf",
                "/usr/share/fonts/truetype/liberation/LiberationSerif-Regular.ttf",
            ]),
            paths(&[
                "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
                "/usr/share/fonts/truetype/liberation/LiberationSans-Regular.ttf",
            ]),
        )
    }

    /// Try `path` before any other candidate, for every role.
    pub fn with_override(mut self, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        self.display.insert(0, path.clone());
        self.caption.insert(0, path);
        self
    }

    /// Load the first readable font for `role`.
    ///
    /// Display text falls back to the caption fonts, both fall back to the
    /// bundled face.
    pub fn load(&self, role: FontRole) -> Result<FontVec, Error> {
        let candidates: Vec<&PathBuf> = match role {
            FontRole::Display => self.display.iter().chain(self.caption.iter()).collect(),
            FontRole::Caption => self.caption.iter().collect(),
        };

        let mut last_err = None;
        for path in candidates {
            if !path.is_file() {
                continue;
            }
            match load_font(path) {
                Ok(font) => {
                    debug!("using {:?} for {}", path, role.as_str());
                    return Ok(font);
                }
                Err(err) => {
                    debug!("{}", err);
                    last_err = Some(err);
                }
            }
        }
        if self.fallback {
            debug!("using bundled font for {}", role.as_str());
            return FontVec::try_from_vec(BUNDLED_FONT.to_vec())
                .map_err(|_| Error::InvalidFont(PathBuf::from("bundled")));
        }
        Err(last_err.unwrap_or(Error::FontNotFound(role.as_str())))
    }
}

impl Default for FontBook {
    fn default() -> Self {
        Self::system()
    }
}

fn paths(list: &[&str]) -> Vec<PathBuf> {
    list.iter().map(PathBuf::from).collect()
}

fn load_font(path: &Path) -> Result<FontVec, Error> {
    let bytes = std::fs::read(path)?;
    // Collections (.ttc) use their first face.
    FontVec::try_from_vec_and_index(bytes, 0).map_err(|_| Error::InvalidFont(path.to_path_buf()))
}

/// Capitalize the first letter of every word, lowercase the rest.
///
/// A word starts after any character that is not a letter, so
/// `"o'neil's 2nd"` becomes `"O'Neil'S 2Nd"`.
pub fn title_case(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut prev_letter = false;
    for ch in text.chars() {
        if ch.is_alphabetic() {
            if prev_letter {
                out.extend(ch.to_lowercase());
            } else {
                out.extend(ch.to_uppercase());
            }
            prev_letter = true;
        } else {
            out.push(ch);
            prev_letter = false;
        }
    }
    out
}

/// Break `text` at word boundaries into lines of at most `limit` characters.
///
/// Text within the limit is returned untouched as a single line. A word
/// longer than the limit gets a line of its own.
pub fn split_lines(text: &str, limit: usize) -> Vec<String> {
    if text.chars().count() <= limit {
        return vec![text.to_string()];
    }

    let mut lines = Vec::new();
    let mut current = String::new();
    for word in text.split_whitespace() {
        let needed = if current.is_empty() {
            word.chars().count()
        } else {
            current.chars().count() + 1 + word.chars().count()
        };
        if needed <= limit {
            if !current.is_empty() {
                current.push(' ');
            }
            current.push_str(word);
        } else {
            if !current.is_empty() {
                lines.push(std::mem::take(&mut current));
            }
            current.push_str(word);
        }
    }
    if !current.is_empty() {
        lines.push(current);
    }
    lines
}

/// Measure the pixel width of a string at the given font and scale.
pub fn measure_text_width<F: Font>(font: &F, scale: PxScale, text: &str) -> u32 {
    let scaled = font.as_scaled(scale);
    let mut width = 0.0f32;
    let mut prev_glyph: Option<ab_glyph::GlyphId> = None;

    for ch in text.chars() {
        let glyph_id = scaled.glyph_id(ch);
        if let Some(prev) = prev_glyph {
            width += scaled.kern(prev, glyph_id);
        }
        width += scaled.h_advance(glyph_id);
        prev_glyph = Some(glyph_id);
    }

    width.ceil() as u32
}

pub fn line_height<F: Font>(font: &F, scale: PxScale) -> u32 {
    let scaled = font.as_scaled(scale);
    (scaled.ascent() - scaled.descent()).ceil() as u32
}

/// Width and height of a block of lines drawn with `LINE_SPACING`.
fn block_size<F: Font>(font: &F, scale: PxScale, lines: &[String]) -> (u32, u32) {
    let width = lines
        .iter()
        .map(|line| measure_text_width(font, scale, line))
        .max()
        .unwrap_or(0);
    let n = lines.len() as u32;
    let height = n * line_height(font, scale) + n.saturating_sub(1) * LINE_SPACING;
    (width, height)
}

/// Largest size from 140 down to 32 whose block fills at most 95% of the area.
///
/// Falls back to the minimum size when nothing fits.
pub fn fit_font_size<F: Font>(font: &F, lines: &[String], width: u32, height: u32) -> u32 {
    let max_w = width as f32 * FILL_RATIO;
    let max_h = height as f32 * FILL_RATIO;
    (MIN_FONT_SIZE..=MAX_FONT_SIZE)
        .rev()
        .step_by(FONT_SIZE_STEP)
        .find(|size| {
            let (w, h) = block_size(font, PxScale::from(*size as f32), lines);
            w as f32 <= max_w && h as f32 <= max_h
        })
        .unwrap_or(MIN_FONT_SIZE)
}

/// Render a text label with a date stamp.
///
/// Each line of the main text is centered horizontally; the block is
/// centered vertically in the area below the date.
pub fn render_text_label(
    text: &str,
    now: NaiveDateTime,
    fonts: &FontBook,
    geometry: LabelGeometry,
) -> Result<RgbImage, Error> {
    let date_font = fonts.load(FontRole::Caption)?;
    let main_font = fonts.load(FontRole::Display)?;

    let mut img = RgbImage::from_pixel(geometry.width, geometry.height, WHITE);

    let stamp = now.format(DATE_FORMAT).to_string();
    let date_scale = PxScale::from(DATE_FONT_SIZE);
    draw_text_mut(&mut img, BLACK, MARGIN as i32, MARGIN as i32, date_scale, &date_font, &stamp);
    let (_, date_height) = text_size(date_scale, &date_font, &stamp);

    let text_start = date_height + MARGIN + DATE_GAP;
    let available_height = geometry.height.saturating_sub(text_start + MARGIN);
    let available_width = geometry.width.saturating_sub(MARGIN * 2);

    let lines = split_lines(text, SINGLE_LINE_THRESHOLD);
    let size = fit_font_size(&main_font, &lines, available_width, available_height);
    let scale = PxScale::from(size as f32);
    let (_, block_height) = block_size(&main_font, scale, &lines);
    info!("Rendering {} line(s) at {}px", lines.len(), size);

    let mut y = text_start as i32 + (available_height as i32 - block_height as i32) / 2;
    let step = (line_height(&main_font, scale) + LINE_SPACING) as i32;
    for line in &lines {
        let w = measure_text_width(&main_font, scale, line) as i32;
        let x = (geometry.width as i32 - w) / 2;
        draw_text_mut(&mut img, BLACK, x, y, scale, &main_font, line);
        y += step;
    }

    Ok(img)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn title_cases_words() {
        assert_eq!(title_case("apple juice"), "Apple Juice");
        assert_eq!(title_case("OAT MILK"), "Oat Milk");
        assert_eq!(title_case("o'neil's 2nd"), "O'Neil'S 2Nd");
        assert_eq!(title_case(""), "");
    }

    #[test]
    fn short_text_stays_on_one_line() {
        assert_eq!(split_lines("Apple Juice", 25), vec!["Apple Juice"]);
    }

    #[test]
    fn long_text_breaks_at_words() {
        let lines = split_lines("Homemade Strawberry Jam From Grandma's Garden", 25);
        assert_eq!(lines, vec!["Homemade Strawberry Jam", "From Grandma's Garden"]);
        assert!(lines.iter().all(|l| l.chars().count() <= 25));
    }

    #[test]
    fn oversized_word_gets_own_line() {
        let lines = split_lines("a Pneumonoultramicroscopicsilicovolcanoconiosis b", 25);
        assert_eq!(
            lines,
            vec!["a", "Pneumonoultramicroscopicsilicovolcanoconiosis", "b"]
        );
    }

    #[test]
    fn empty_book_has_no_font() {
        let book = FontBook::new(vec![], vec![]).without_fallback();
        assert!(matches!(
            book.load(FontRole::Display),
            Err(Error::FontNotFound(_))
        ));
    }

    #[test]
    fn unreadable_override_is_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fake.ttf");
        std::fs::write(&path, b"not a font").unwrap();
        let book = FontBook::new(vec![], vec![])
            .without_fallback()
            .with_override(&path);
        assert!(matches!(book.load(FontRole::Caption), Err(Error::InvalidFont(_))));
    }

    #[test]
    fn missing_fonts_use_bundled_face() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fake.ttf");
        std::fs::write(&path, b"not a font").unwrap();
        let book = FontBook::new(vec![dir.path().join("gone.ttf")], vec![]).with_override(&path);
        for role in [FontRole::Display, FontRole::Caption] {
            let font = book.load(role).unwrap();
            assert!(measure_text_width(&font, PxScale::from(40.0), "Tea") > 0);
        }
    }

    #[test]
    fn fit_prefers_largest_size() {
        let font = FontBook::bundled().load(FontRole::Display).unwrap();

        // plenty of room: the search starts at the maximum
        let lines = vec!["Tea".to_string()];
        assert_eq!(fit_font_size(&font, &lines, 2000, 2000), MAX_FONT_SIZE);

        // nothing fits: the minimum is used anyway
        let lines = vec!["Homemade Strawberry Jam".to_string()];
        assert_eq!(fit_font_size(&font, &lines, 50, 20), MIN_FONT_SIZE);
    }

    #[test]
    fn fit_stays_within_fill_ratio() {
        let font = FontBook::bundled().load(FontRole::Display).unwrap();
        let lines = split_lines("Homemade Strawberry Jam From Grandma's Garden", SINGLE_LINE_THRESHOLD);
        let (width, height) = (688, 200);

        let size = fit_font_size(&font, &lines, width, height);
        assert!(size > MIN_FONT_SIZE && size < MAX_FONT_SIZE);
        assert_eq!(size % 2, 0);

        let (w, h) = block_size(&font, PxScale::from(size as f32), &lines);
        assert!(w as f32 <= width as f32 * 0.95 && h as f32 <= height as f32 * 0.95);
        // the next size up would no longer fit
        let (w, h) = block_size(&font, PxScale::from((size + 2) as f32), &lines);
        assert!(w as f32 > width as f32 * 0.95 || h as f32 > height as f32 * 0.95);
    }

    #[test]
    fn renders_dated_label() {
        let fonts = FontBook::bundled();
        let now = NaiveDate::from_ymd_opt(2024, 3, 1)
            .unwrap()
            .and_hms_opt(9, 30, 0)
            .unwrap();
        let img = render_text_label("Apple Juice", now, &fonts, LabelGeometry::default()).unwrap();
        assert_eq!(img.dimensions(), (696, 271));
        // date stamp in the top-left corner
        assert!((4..44).any(|y| (4..200).any(|x| img.get_pixel(x, y).0[0] < 128)));
        // main text below it
        assert!((80..271).any(|y| (0..696).any(|x| img.get_pixel(x, y).0[0] < 128)));
        // margins stay blank
        assert!((0..271).all(|y| *img.get_pixel(695, y) == WHITE));
    }
}
