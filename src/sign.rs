//! Two line entry sign with a drawn shoe and a red arrow.

use ab_glyph::PxScale;
use image::{Rgb, RgbImage};
use imageproc::drawing::{
    draw_filled_circle_mut, draw_filled_rect_mut, draw_hollow_rect_mut, draw_polygon_mut,
    draw_text_mut,
};
use imageproc::point::Point;
use imageproc::rect::Rect;
use log::info;

use crate::error::Error;
use crate::layout::LabelGeometry;
use crate::text::{measure_text_width, FontBook, FontRole};

const BLACK: Rgb<u8> = Rgb([0, 0, 0]);
const WHITE: Rgb<u8> = Rgb([255, 255, 255]);
const RED: Rgb<u8> = Rgb([255, 0, 0]);

const BORDER: u32 = 4;
const ICON_SIZE: i32 = 80;
const ICON_TOP: i32 = 20;
const ARROW_WIDTH: i32 = 8;

const HEADLINE_SIZE: f32 = 48.0;
const HEADLINE_TOP: i32 = 160;
const EMPHASIS_SIZE: f32 = 56.0;
const EMPHASIS_TOP: i32 = 210;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sign {
    /// Black first line.
    pub headline: String,
    /// Red second line.
    pub emphasis: String,
}

impl Default for Sign {
    fn default() -> Self {
        Sign {
            headline: "SHOES STAY".to_string(),
            emphasis: "OUTSIDE".to_string(),
        }
    }
}

impl Sign {
    pub fn new(headline: impl Into<String>, emphasis: impl Into<String>) -> Self {
        Sign {
            headline: headline.into(),
            emphasis: emphasis.into(),
        }
    }

    pub fn render(&self, fonts: &FontBook, geometry: LabelGeometry) -> Result<RgbImage, Error> {
        let font = fonts.load(FontRole::Display)?;
        info!("Creating '{} {}' sign", self.headline, self.emphasis);

        let mut img = RgbImage::from_pixel(geometry.width, geometry.height, WHITE);
        draw_emblem(&mut img);

        for (text, size, top, color) in [
            (&self.headline, HEADLINE_SIZE, HEADLINE_TOP, BLACK),
            (&self.emphasis, EMPHASIS_SIZE, EMPHASIS_TOP, RED),
        ] {
            let scale = PxScale::from(size);
            let w = measure_text_width(&font, scale, text) as i32;
            let x = (geometry.width as i32 - w) / 2;
            draw_text_mut(&mut img, color, x, top, scale, &font, text);
        }

        Ok(img)
    }
}

/// Border, shoe and arrow; everything on the sign except its text.
fn draw_emblem(img: &mut RgbImage) {
    let (width, height) = img.dimensions();
    for i in 0..BORDER.min(width / 2).min(height / 2) {
        let rect = Rect::at(i as i32, i as i32).of_size(width - 2 * i, height - 2 * i);
        draw_hollow_rect_mut(img, rect, BLACK);
    }

    let center = width as i32 / 2;
    draw_shoe(img, center - ICON_SIZE / 2, ICON_TOP, ICON_SIZE);
    draw_arrow(img, center, ICON_TOP + 90, ICON_TOP + 140, ARROW_WIDTH);
}

fn draw_shoe(img: &mut RgbImage, x: i32, y: i32, size: i32) {
    let body = [
        Point::new(x, y + size / 2),
        Point::new(x + size / 4, y + size / 3),
        Point::new(x + size * 3 / 4, y + size / 3),
        Point::new(x + size, y + size / 2),
        Point::new(x + size, y + size * 3 / 4),
        Point::new(x + size / 8, y + size * 3 / 4),
    ];
    draw_polygon_mut(img, &body, BLACK);

    let sole = [
        Point::new(x, y + size * 3 / 4),
        Point::new(x + size, y + size * 3 / 4),
        Point::new(x + size + size / 8, y + size),
        Point::new(x - size / 8, y + size),
    ];
    draw_polygon_mut(img, &sole, BLACK);

    // laces
    for (lx, ly) in [
        (x + size / 3, y + size / 2),
        (x + size / 2, y + size / 2 - 8),
        (x + size * 2 / 3, y + size / 2),
        (x + size * 3 / 4, y + size / 2 - 8),
    ] {
        draw_filled_circle_mut(img, (lx, ly), 3, WHITE);
    }

    let stripe = Rect::at(x + size / 4, y + size * 2 / 3 - 1).of_size((size / 2) as u32 + 1, 3);
    draw_filled_rect_mut(img, stripe, WHITE);
}

/// Red arrow pointing down from `top` to the tip at `tip`.
fn draw_arrow(img: &mut RgbImage, x: i32, top: i32, tip: i32, width: i32) {
    let shaft = Rect::at(x - width / 2, top).of_size(width as u32 + 1, (tip - 20 - top) as u32 + 1);
    draw_filled_rect_mut(img, shaft, RED);

    let head = [
        Point::new(x, tip),
        Point::new(x - width * 2, tip - 25),
        Point::new(x + width * 2, tip - 25),
    ];
    draw_polygon_mut(img, &head, RED);
}
