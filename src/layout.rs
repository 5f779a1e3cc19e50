//! Fitting and pagination of images onto labels.
//!
//! The engine is pure: it takes a decoded image and a [`LayoutMode`] and
//! returns the ordered list of bitmaps to print. Every mode first converts
//! the image to RGB, which drops alpha and palette information for good.

use std::fmt;
use std::str::FromStr;

use image::imageops::{self, FilterType};
use image::{DynamicImage, Rgb, RgbImage};
use log::{debug, info};

use crate::error::Error;
use crate::media::Media;

const WHITE: Rgb<u8> = Rgb([255, 255, 255]);

/// Height of one label cut from continuous tape.
pub const DEFAULT_LABEL_HEIGHT: u32 = 271;

/// Largest bitmap any mode will resize to, about 120 MB as RGB.
pub const MAX_LAYOUT_PIXELS: u64 = 40_000_000;

/// Printable raster area of one physical label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LabelGeometry {
    pub width: u32,
    pub height: u32,
}

impl LabelGeometry {
    /// 62mm continuous tape cut at 271 dots.
    pub const CONTINUOUS_62: LabelGeometry = LabelGeometry::new(696, DEFAULT_LABEL_HEIGHT);
    /// Taller 62mm canvas proportional to a 2:3 picture.
    pub const PROPORTIONAL_62: LabelGeometry = LabelGeometry::new(696, 1044);

    pub const fn new(width: u32, height: u32) -> Self {
        LabelGeometry { width, height }
    }

    /// Printable width of `media`; die-cut labels keep their own length.
    pub fn for_media(media: Media) -> Self {
        LabelGeometry {
            width: media.printable_width(),
            height: media.printable_length().unwrap_or(DEFAULT_LABEL_HEIGHT),
        }
    }

    fn canvas(&self) -> RgbImage {
        RgbImage::from_pixel(self.width, self.height, WHITE)
    }
}

impl Default for LabelGeometry {
    fn default() -> Self {
        Self::CONTINUOUS_62
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Orientation {
    /// width >= height
    Horizontal,
    /// height >= width
    Vertical,
}

impl Orientation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Horizontal => "horizontal",
            Self::Vertical => "vertical",
        }
    }

    pub fn mode(&self) -> LayoutMode {
        match self {
            Self::Horizontal => LayoutMode::FitProportionalHeight,
            Self::Vertical => LayoutMode::FitProportionalWidth,
        }
    }
}

impl FromStr for Orientation {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "horizontal" => Ok(Self::Horizontal),
            "vertical" => Ok(Self::Vertical),
            other => Err(Error::InvalidConfig(format!(
                "invalid orientation {}, valid options: horizontal, vertical",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayoutMode {
    /// Landscape, height fixed to the label width, width follows.
    FitProportionalHeight,
    /// Portrait, width fixed to the label width, height follows.
    FitProportionalWidth,
    /// Rotate, letterbox and center on one label.
    RotateMaxCoverage,
    /// Stretch to `LayoutParams::stretch_to` without rotating.
    NoRotateFit,
    /// Cut into consecutive labels that read left to right.
    SplitSequence,
}

impl LayoutMode {
    pub const ALL: [LayoutMode; 5] = [
        Self::FitProportionalHeight,
        Self::FitProportionalWidth,
        Self::RotateMaxCoverage,
        Self::NoRotateFit,
        Self::SplitSequence,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FitProportionalHeight => "fit-proportional-height",
            Self::FitProportionalWidth => "fit-proportional-width",
            Self::RotateMaxCoverage => "rotate-max-coverage",
            Self::NoRotateFit => "no-rotate-fit",
            Self::SplitSequence => "split-sequence",
        }
    }

    /// File name for the preview of page `index` out of `total`.
    pub fn preview_name(&self, index: usize, total: usize) -> String {
        match self {
            Self::FitProportionalHeight => "horizontal_preview.png".to_string(),
            Self::FitProportionalWidth => "vertical_preview.png".to_string(),
            Self::RotateMaxCoverage => "max_coverage_preview.png".to_string(),
            Self::NoRotateFit => "proportional_fit_preview.png".to_string(),
            Self::SplitSequence => format!("label_part_{}_of_{}.png", index + 1, total),
        }
    }
}

impl fmt::Display for LayoutMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LayoutMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|mode| mode.as_str() == s)
            .ok_or_else(|| Error::InvalidConfig(format!("unknown layout mode {}", s)))
    }
}

/// Knobs of the individual modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayoutParams {
    /// Minimum number of labels a split image spans.
    pub min_labels: u32,
    /// Height the image is scaled to before splitting, label height if `None`.
    pub working_height: Option<u32>,
    /// Output size of `no-rotate-fit`.
    pub stretch_to: LabelGeometry,
}

impl Default for LayoutParams {
    fn default() -> Self {
        LayoutParams {
            min_labels: 5,
            working_height: None,
            stretch_to: LabelGeometry::PROPORTIONAL_62,
        }
    }
}

/// One physical label, in print order.
#[derive(Debug, Clone)]
pub struct LabelPage {
    pub index: usize,
    pub image: RgbImage,
}

impl LabelPage {
    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }
}

#[derive(Debug, Clone, Default)]
pub struct LayoutEngine {
    geometry: LabelGeometry,
    params: LayoutParams,
}

impl LayoutEngine {
    pub fn new(geometry: LabelGeometry, params: LayoutParams) -> Self {
        LayoutEngine { geometry, params }
    }

    pub fn geometry(&self) -> LabelGeometry {
        self.geometry
    }

    pub fn params(&self) -> LayoutParams {
        self.params
    }

    /// Lay `image` out on labels according to `mode`.
    pub fn layout(&self, image: &DynamicImage, mode: LayoutMode) -> Result<Vec<LabelPage>, Error> {
        let (width, height) = (image.width(), image.height());
        if width == 0 || height == 0 || self.geometry.width == 0 || self.geometry.height == 0 {
            return Err(Error::DegenerateImage { width, height });
        }
        info!("Laying out {}x{} image as {}", width, height, mode);

        let rgb = image.to_rgb8();
        let images = match mode {
            LayoutMode::FitProportionalHeight => vec![self.fit_proportional(rgb, Orientation::Horizontal)?],
            LayoutMode::FitProportionalWidth => vec![self.fit_proportional(rgb, Orientation::Vertical)?],
            LayoutMode::RotateMaxCoverage => vec![self.rotate_max_coverage(rgb)?],
            LayoutMode::NoRotateFit => vec![self.no_rotate_fit(&rgb)?],
            LayoutMode::SplitSequence => self.split_sequence(&rgb)?,
        };

        Ok(images
            .into_iter()
            .enumerate()
            .map(|(index, image)| LabelPage { index, image })
            .collect())
    }

    fn fit_proportional(&self, image: RgbImage, orientation: Orientation) -> Result<RgbImage, Error> {
        let (w, h) = image.dimensions();
        let needs_rotation = match orientation {
            Orientation::Horizontal => h > w,
            Orientation::Vertical => w > h,
        };
        let image = if needs_rotation {
            debug!("Rotating {}x{} image 90 degrees for {} mode", w, h, orientation.as_str());
            rotate_quarter(&image)
        } else {
            debug!("Keeping {}x{} image orientation for {} mode", w, h, orientation.as_str());
            image
        };

        let (w, h) = image.dimensions();
        let target = self.geometry.width;
        let (new_w, new_h) = match orientation {
            Orientation::Horizontal => (scale_floor(w, target, h), target),
            Orientation::Vertical => (target, scale_floor(h, target, w)),
        };
        check_size(new_w, new_h)?;

        debug!("Resizing to {}x{}", new_w, new_h);
        Ok(imageops::resize(&image, new_w, new_h, FilterType::Lanczos3))
    }

    fn rotate_max_coverage(&self, image: RgbImage) -> Result<RgbImage, Error> {
        let rotated = rotate_quarter(&image);
        let (w, h) = rotated.dimensions();
        let LabelGeometry { width: lw, height: lh } = self.geometry;

        // the smaller of lw / w and lh / h, compared without floats
        let (new_w, new_h) = if u64::from(lw) * u64::from(h) <= u64::from(lh) * u64::from(w) {
            (lw, scale_floor(h, lw, w))
        } else {
            (scale_floor(w, lh, h), lh)
        };
        check_size(new_w, new_h)?;

        let scaled = imageops::resize(&rotated, new_w, new_h, FilterType::Lanczos3);
        let x = (lw - new_w) / 2;
        let y = (lh - new_h) / 2;
        debug!("Centering {}x{} at ({}, {}) on {}x{} label", new_w, new_h, x, y, lw, lh);

        let mut canvas = self.geometry.canvas();
        imageops::replace(&mut canvas, &scaled, i64::from(x), i64::from(y));
        Ok(canvas)
    }

    fn no_rotate_fit(&self, image: &RgbImage) -> Result<RgbImage, Error> {
        let LabelGeometry { width, height } = self.params.stretch_to;
        check_size(width, height)?;
        debug!("Resizing to {}x{} without rotation", width, height);
        Ok(imageops::resize(image, width, height, FilterType::Lanczos3))
    }

    /// Size a `width` x `height` image is scaled to before splitting.
    ///
    /// The height is the working height; the width keeps the aspect ratio
    /// but never drops below `min_labels` labels.
    pub fn split_size(&self, width: u32, height: u32) -> (u32, u32) {
        let working_height = self.params.working_height.unwrap_or(self.geometry.height);
        let natural_width = scale_floor(width, working_height, height.max(1));
        let min_width = self.geometry.width.saturating_mul(self.params.min_labels);
        (natural_width.max(min_width), working_height)
    }

    fn split_sequence(&self, image: &RgbImage) -> Result<Vec<RgbImage>, Error> {
        let LabelGeometry { width: lw, height: lh } = self.geometry;
        let (working_width, working_height) = self.split_size(image.width(), image.height());
        check_size(working_width, working_height)?;

        let working = imageops::resize(image, working_width, working_height, FilterType::Lanczos3);
        let page_count = working_width.div_ceil(lw);
        info!(
            "Resized to {}x{}, splitting into {} labels",
            working_width, working_height, page_count
        );

        // May be negative when the working height exceeds the label, which clips.
        let y_offset = (i64::from(lh) - i64::from(working_height)).div_euclid(2);

        Ok((0..page_count)
            .map(|i| {
                let left = i * lw;
                let right = (left + lw).min(working_width);
                let band = imageops::crop_imm(&working, left, 0, right - left, working_height).to_image();
                let mut canvas = self.geometry.canvas();
                imageops::replace(&mut canvas, &band, 0, y_offset);
                canvas
            })
            .collect())
    }
}

/// Rotate a quarter turn counter-clockwise, swapping width and height.
fn rotate_quarter(image: &RgbImage) -> RgbImage {
    imageops::rotate270(image)
}

/// `floor(value * numerator / denominator)`
fn scale_floor(value: u32, numerator: u32, denominator: u32) -> u32 {
    let scaled = u64::from(value) * u64::from(numerator) / u64::from(denominator);
    u32::try_from(scaled).unwrap_or(u32::MAX)
}

/// Reject sizes with no area or beyond [`MAX_LAYOUT_PIXELS`].
fn check_size(width: u32, height: u32) -> Result<(), Error> {
    if width == 0 || height == 0 {
        Err(Error::DegenerateImage { width, height })
    } else if u64::from(width) * u64::from(height) > MAX_LAYOUT_PIXELS {
        Err(Error::ImageTooLarge { width, height })
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> LayoutEngine {
        LayoutEngine::default()
    }

    fn solid(width: u32, height: u32, color: [u8; 3]) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb(color)))
    }

    /// Left half black, right half red, to check where content lands.
    fn halves(width: u32, height: u32) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |x, _| {
            if x < width / 2 {
                Rgb([0, 0, 0])
            } else {
                Rgb([255, 0, 0])
            }
        }))
    }

    #[test]
    fn horizontal_keeps_landscape() {
        let pages = engine()
            .layout(&solid(1000, 500, [0, 0, 0]), LayoutMode::FitProportionalHeight)
            .unwrap();
        assert_eq!(pages.len(), 1);
        assert_eq!(pages[0].dimensions(), (1392, 696));
    }

    #[test]
    fn horizontal_rotates_portrait() {
        let pages = engine()
            .layout(&solid(300, 700, [0, 0, 0]), LayoutMode::FitProportionalHeight)
            .unwrap();
        // rotated to 700x300, then 700 * 696 / 300
        assert_eq!(pages[0].dimensions(), (1624, 696));
    }

    #[test]
    fn vertical_truncates_height() {
        let pages = engine()
            .layout(&solid(700, 1001, [0, 0, 0]), LayoutMode::FitProportionalWidth)
            .unwrap();
        // 1001 * 696 / 700 = 995.28
        assert_eq!(pages[0].dimensions(), (696, 995));
    }

    #[test]
    fn vertical_rotates_landscape() {
        let pages = engine()
            .layout(&solid(1536, 1024, [0, 0, 0]), LayoutMode::FitProportionalWidth)
            .unwrap();
        assert_eq!(pages[0].dimensions(), (696, 1044));
    }

    #[test]
    fn square_is_never_rotated() {
        for mode in [LayoutMode::FitProportionalHeight, LayoutMode::FitProportionalWidth] {
            let pages = engine().layout(&halves(400, 400), mode).unwrap();
            assert_eq!(pages[0].dimensions(), (696, 696));
            let left = pages[0].image.get_pixel(10, 348);
            let right = pages[0].image.get_pixel(685, 348);
            assert_eq!(left, &Rgb([0, 0, 0]));
            assert_eq!(right, &Rgb([255, 0, 0]));
        }
    }

    #[test]
    fn rotation_is_counter_clockwise() {
        // left half black ends up at the bottom after a counter-clockwise turn
        let pages = engine()
            .layout(&halves(800, 400), LayoutMode::FitProportionalWidth)
            .unwrap();
        let (w, h) = pages[0].dimensions();
        assert_eq!((w, h), (696, 1392));
        assert_eq!(pages[0].image.get_pixel(348, 10), &Rgb([255, 0, 0]));
        assert_eq!(pages[0].image.get_pixel(348, h - 10), &Rgb([0, 0, 0]));
    }

    #[test]
    fn max_coverage_letterboxes_and_centers() {
        // rotated to 400x1000, limited by height: 271 * 400 / 1000 = 108
        let pages = engine()
            .layout(&solid(1000, 400, [0, 0, 0]), LayoutMode::RotateMaxCoverage)
            .unwrap();
        assert_eq!(pages.len(), 1);
        let image = &pages[0].image;
        assert_eq!(image.dimensions(), (696, 271));

        let x0 = (696 - 108) / 2;
        assert_eq!(image.get_pixel(x0 - 1, 135), &WHITE);
        assert_eq!(image.get_pixel(x0 + 1, 135), &Rgb([0, 0, 0]));
        assert_eq!(image.get_pixel(x0 + 106, 135), &Rgb([0, 0, 0]));
        assert_eq!(image.get_pixel(x0 + 109, 135), &WHITE);
        assert_eq!(image.get_pixel(x0 + 50, 0), &Rgb([0, 0, 0]));
        assert_eq!(image.get_pixel(x0 + 50, 270), &Rgb([0, 0, 0]));
    }

    #[test]
    fn max_coverage_width_limited() {
        // rotated to 2000x100, limited by width: 100 * 696 / 2000 = 34
        let pages = engine()
            .layout(&solid(100, 2000, [0, 0, 0]), LayoutMode::RotateMaxCoverage)
            .unwrap();
        let image = &pages[0].image;
        let y0 = (271 - 34) / 2;
        assert_eq!(image.get_pixel(0, y0 - 1), &WHITE);
        assert_eq!(image.get_pixel(0, y0 + 1), &Rgb([0, 0, 0]));
        assert_eq!(image.get_pixel(695, y0 + 32), &Rgb([0, 0, 0]));
        assert_eq!(image.get_pixel(695, y0 + 35), &WHITE);
    }

    #[test]
    fn no_rotate_fit_stretches() {
        let pages = engine()
            .layout(&solid(3000, 200, [9, 9, 9]), LayoutMode::NoRotateFit)
            .unwrap();
        assert_eq!(pages.len(), 1);
        assert_eq!(pages[0].dimensions(), (696, 1044));
    }

    #[test]
    fn split_uses_natural_width_when_wider() {
        // natural width 271 * 8000 / 500 = 4336 > 5 * 696
        let pages = engine()
            .layout(&solid(8000, 500, [0, 0, 0]), LayoutMode::SplitSequence)
            .unwrap();
        assert_eq!(pages.len(), 7);
        for page in &pages {
            assert_eq!(page.dimensions(), (696, 271));
        }
        // 4336 - 6 * 696 = 160 columns on the last label
        let last = &pages[6].image;
        assert_eq!(last.get_pixel(159, 100), &Rgb([0, 0, 0]));
        assert_eq!(last.get_pixel(160, 100), &WHITE);
        assert_eq!(last.get_pixel(695, 100), &WHITE);
    }

    #[test]
    fn split_pages_are_indexed_in_order() {
        let pages = engine()
            .layout(&halves(2000, 500), LayoutMode::SplitSequence)
            .unwrap();
        let indexes: Vec<usize> = pages.iter().map(|p| p.index).collect();
        assert_eq!(indexes, vec![0, 1, 2, 3, 4]);
        assert_eq!(pages[0].image.get_pixel(10, 100), &Rgb([0, 0, 0]));
        assert_eq!(pages[4].image.get_pixel(600, 100), &Rgb([255, 0, 0]));
    }

    #[test]
    fn split_centers_shorter_working_height() {
        let params = LayoutParams {
            working_height: Some(100),
            min_labels: 1,
            ..LayoutParams::default()
        };
        let pages = LayoutEngine::new(LabelGeometry::default(), params)
            .layout(&solid(1000, 100, [0, 0, 0]), LayoutMode::SplitSequence)
            .unwrap();
        assert_eq!(pages.len(), 2);
        let page = &pages[0].image;
        assert_eq!(page.get_pixel(10, 84), &WHITE);
        assert_eq!(page.get_pixel(10, 85), &Rgb([0, 0, 0]));
        assert_eq!(page.get_pixel(10, 184), &Rgb([0, 0, 0]));
        assert_eq!(page.get_pixel(10, 185), &WHITE);
    }

    #[test]
    fn split_clips_taller_working_height() {
        // top and bottom rows marked so clipping is visible
        let source = RgbImage::from_fn(700, 301, |_, y| match y {
            0..=14 => Rgb([255, 0, 0]),
            286..=300 => Rgb([0, 0, 255]),
            _ => Rgb([0, 0, 0]),
        });
        let params = LayoutParams {
            working_height: Some(301),
            min_labels: 1,
            ..LayoutParams::default()
        };
        let pages = LayoutEngine::new(LabelGeometry::default(), params)
            .layout(&DynamicImage::ImageRgb8(source), LayoutMode::SplitSequence)
            .unwrap();
        // (271 - 301) / 2 floors to -15, the 15 marked rows on each side are cut
        let page = &pages[0].image;
        assert_eq!(page.dimensions(), (696, 271));
        assert_eq!(page.get_pixel(300, 0), &Rgb([0, 0, 0]));
        assert_eq!(page.get_pixel(300, 270), &Rgb([0, 0, 0]));
    }

    #[test]
    fn rejects_zero_area() {
        let image = DynamicImage::ImageRgb8(RgbImage::new(0, 10));
        for mode in LayoutMode::ALL {
            assert!(matches!(
                engine().layout(&image, mode),
                Err(Error::DegenerateImage { .. })
            ));
        }
    }

    #[test]
    fn rejects_collapsing_resize() {
        // rotated to 5000x1, then 1 * 696 / 5000 floors to zero
        let result = engine().layout(&solid(1, 5000, [0, 0, 0]), LayoutMode::RotateMaxCoverage);
        assert!(matches!(result, Err(Error::DegenerateImage { .. })));
    }

    #[test]
    fn rejects_oversized_resize() {
        // rotated to 5000x1, then 5000 * 696 = 3480000 columns
        let result = engine().layout(&solid(1, 5000, [0, 0, 0]), LayoutMode::FitProportionalHeight);
        assert!(matches!(
            result,
            Err(Error::ImageTooLarge {
                width: 3_480_000,
                height: 696
            })
        ));

        let params = LayoutParams {
            min_labels: 100_000,
            ..LayoutParams::default()
        };
        let result = LayoutEngine::new(LabelGeometry::default(), params)
            .layout(&solid(10, 10, [0, 0, 0]), LayoutMode::SplitSequence);
        assert!(matches!(result, Err(Error::ImageTooLarge { .. })));
    }

    #[test]
    fn drops_alpha() {
        let rgba = image::RgbaImage::from_pixel(100, 50, image::Rgba([10, 20, 30, 0]));
        let pages = engine()
            .layout(&DynamicImage::ImageRgba8(rgba), LayoutMode::NoRotateFit)
            .unwrap();
        assert_eq!(pages[0].image.get_pixel(5, 5), &Rgb([10, 20, 30]));
    }

    #[test]
    fn mode_names_round_trip() {
        for mode in LayoutMode::ALL {
            assert_eq!(mode.as_str().parse::<LayoutMode>().unwrap(), mode);
        }
        assert!("fit".parse::<LayoutMode>().is_err());
        assert_eq!("vertical".parse::<Orientation>().unwrap().mode(), LayoutMode::FitProportionalWidth);
    }

    #[test]
    fn preview_names() {
        assert_eq!(LayoutMode::SplitSequence.preview_name(0, 5), "label_part_1_of_5.png");
        assert_eq!(LayoutMode::FitProportionalHeight.preview_name(0, 1), "horizontal_preview.png");
    }
}
