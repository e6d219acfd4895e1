use std::path::{Path, PathBuf};

use ab_glyph::{FontArc, PxScale};
use anyhow::{Context, Result};
use image::{GrayImage, Luma};
use imageproc::{
    drawing::{draw_filled_rect_mut, draw_text_mut},
    rect::Rect,
};

pub const DIVIDER_WIDTH: u32 = 8;
/// Caption strip above the panels, only present when a font is given.
pub const CAPTION_HEIGHT: u32 = 28;

const ORIGINAL_CAPTION: &str = "Original";
const RESTORED_CAPTION: &str = "Restored / Binarized";

pub fn load_caption_font(path: &Path) -> Result<FontArc> {
    let font_data =
        std::fs::read(path).with_context(|| format!("Failed to read font at {:?}", path))?;
    FontArc::try_from_vec(font_data).map_err(|_| anyhow::anyhow!("Failed to load font at {:?}", path))
}

/// Original on the left, restored on the right, separated by a grey bar.
/// With a font, each panel gets its caption in a strip along the top.
pub fn side_by_side(original: &GrayImage, restored: &GrayImage, font: Option<&FontArc>) -> GrayImage {
    let caption_height = if font.is_some() { CAPTION_HEIGHT } else { 0 };
    let restored_x = original.width() + DIVIDER_WIDTH;
    let width = restored_x + restored.width();
    let height = caption_height + original.height().max(restored.height());

    let mut canvas = GrayImage::from_pixel(width, height, Luma([255]));
    image::imageops::overlay(&mut canvas, original, 0, caption_height as i64);
    draw_filled_rect_mut(
        &mut canvas,
        Rect::at(original.width() as i32, 0).of_size(DIVIDER_WIDTH, height),
        Luma([128]),
    );
    image::imageops::overlay(&mut canvas, restored, restored_x as i64, caption_height as i64);

    if let Some(font) = font {
        let scale = PxScale::from(20.0);
        draw_text_mut(&mut canvas, Luma([0]), 4, 4, scale, font, ORIGINAL_CAPTION);
        draw_text_mut(
            &mut canvas,
            Luma([0]),
            restored_x as i32 + 4,
            4,
            scale,
            font,
            RESTORED_CAPTION,
        );
    }

    canvas
}

/// `<dir>/<stem>_comparison.png`
pub fn comparison_path(dir: &Path, file_name: &Path) -> PathBuf {
    let stem = file_name
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    dir.join(format!("{stem}_comparison.png"))
}

pub fn save_comparison(
    dir: &Path,
    file_name: &Path,
    original: &GrayImage,
    restored: &GrayImage,
    font: Option<&FontArc>,
) -> Result<PathBuf> {
    let path = comparison_path(dir, file_name);
    side_by_side(original, restored, font)
        .save(&path)
        .with_context(|| format!("Failed to save comparison at {:?}", path))?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEXT_FONTS: [&str; 3] = ["DejaVuSans.ttf", "LiberationSans-Regular.ttf", "NotoSans-Regular.ttf"];

    fn find_font(dir: &Path) -> Option<PathBuf> {
        for entry in std::fs::read_dir(dir).ok()?.flatten() {
            let path = entry.path();
            if path.is_dir() {
                if let Some(found) = find_font(&path) {
                    return Some(found);
                }
            } else if path
                .file_name()
                .is_some_and(|name| TEXT_FONTS.iter().any(|font| name == *font))
            {
                return Some(path);
            }
        }
        None
    }

    #[test]
    fn panels_keep_their_pixels() {
        let original = GrayImage::from_pixel(30, 20, Luma([10]));
        let restored = GrayImage::from_pixel(30, 20, Luma([240]));

        let canvas = side_by_side(&original, &restored, None);
        assert_eq!(canvas.dimensions(), (30 + DIVIDER_WIDTH + 30, 20));
        assert_eq!(canvas.get_pixel(0, 0)[0], 10);
        assert_eq!(canvas.get_pixel(29, 19)[0], 10);
        assert_eq!(canvas.get_pixel(30, 5)[0], 128);
        assert_eq!(canvas.get_pixel(30 + DIVIDER_WIDTH, 0)[0], 240);
    }

    #[test]
    fn captions_are_drawn_above_panels() {
        // needs a common sans-serif TrueType font on the machine
        let Some(font_path) = find_font(Path::new("/usr/share/fonts")) else {
            return;
        };
        let font = load_caption_font(&font_path).unwrap();

        let original = GrayImage::from_pixel(200, 40, Luma([255]));
        let restored = GrayImage::from_pixel(200, 40, Luma([255]));
        let canvas = side_by_side(&original, &restored, Some(&font));

        assert_eq!(canvas.dimensions(), (400 + DIVIDER_WIDTH, 40 + CAPTION_HEIGHT));
        let inked = |x0: u32, x1: u32| {
            (x0..x1).any(|x| (0..CAPTION_HEIGHT).any(|y| canvas.get_pixel(x, y)[0] < 128))
        };
        assert!(inked(0, 200));
        assert!(inked(200 + DIVIDER_WIDTH, 400 + DIVIDER_WIDTH));
    }

    #[test]
    fn unreadable_font_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.ttf");
        std::fs::write(&path, b"not a font").unwrap();
        assert!(load_caption_font(&path).is_err());
        assert!(load_caption_font(&dir.path().join("absent.ttf")).is_err());
    }

    #[test]
    fn comparison_name_uses_stem() {
        let path = comparison_path(Path::new("cmp"), Path::new("scan.01.jpg"));
        assert_eq!(path, Path::new("cmp").join("scan.01_comparison.png"));
    }
}
