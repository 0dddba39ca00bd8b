use std::fs;
use std::path::{Path, PathBuf};

use guide_contracts::geometry::{box_to_pixels, point_to_pixels};
use guide_contracts::{find_object_by_label, DetectedObject, PlanStep};
use image::{DynamicImage, Rgba, RgbaImage};
use tracing::debug;

use crate::error::{PlanError, PlanResult};

const RED: Rgba<u8> = Rgba([255, 0, 0, 255]);
const YELLOW: Rgba<u8> = Rgba([255, 255, 0, 255]);
const ORANGE: Rgba<u8> = Rgba([255, 165, 0, 255]);
const BLACK: Rgba<u8> = Rgba([0, 0, 0, 255]);

/// A saved close-up of one detected object.
#[derive(Debug, Clone)]
pub struct CroppedObject {
    pub image: DynamicImage,
    pub path: PathBuf,
}

/// Lowercased label with every non-alphanumeric run collapsed to `_`.
pub fn slugify_label(label: &str) -> String {
    let mut slug = String::with_capacity(label.len());
    let mut pending_sep = false;
    for ch in label.to_lowercase().chars() {
        if ch.is_ascii_lowercase() || ch.is_ascii_digit() {
            if pending_sep && !slug.is_empty() {
                slug.push('_');
            }
            pending_sep = false;
            slug.push(ch);
        } else {
            pending_sep = true;
        }
    }
    if slug.is_empty() {
        return "object".to_string();
    }
    slug
}

/// Crops every object that has a box and saves it as
/// `object_<n>_<slug>.png`, numbering only the objects actually cropped.
pub fn crop_objects(
    image: &DynamicImage,
    objects: &[DetectedObject],
    dest_dir: &Path,
) -> PlanResult<Vec<CroppedObject>> {
    fs::create_dir_all(dest_dir).map_err(|err| PlanError::io(dest_dir, err))?;
    let (width, height) = (image.width(), image.height());

    let mut crops = Vec::new();
    for object in objects {
        let Some(bbox) = object.bbox else {
            continue;
        };
        let pixels = box_to_pixels(bbox, width, height);
        let crop = image.crop_imm(pixels.x_min, pixels.y_min, pixels.width(), pixels.height());
        let path = dest_dir.join(format!(
            "object_{}_{}.png",
            crops.len() + 1,
            slugify_label(&object.label)
        ));
        crop.save(&path).map_err(|err| PlanError::image(&path, err))?;
        crops.push(CroppedObject {
            image: crop,
            path,
        });
    }
    debug!(count = crops.len(), dir = %dest_dir.display(), "saved object crops");
    Ok(crops)
}

/// Draws the first step's target box and trajectory onto a copy of `image`.
///
/// Returns `Ok(None)` when there is no step, the step's label matches no
/// object, or the matched object has no box.
pub fn highlight_first_step(
    image: &DynamicImage,
    objects: &[DetectedObject],
    steps: &[PlanStep],
    output_path: &Path,
) -> PlanResult<Option<PathBuf>> {
    let Some(first_step) = steps.first() else {
        return Ok(None);
    };
    let Some(bbox) = find_object_by_label(&first_step.object_label, objects).and_then(|o| o.bbox)
    else {
        return Ok(None);
    };

    let mut canvas: RgbaImage = image.to_rgba8();
    let (width, height) = canvas.dimensions();
    let pixels = box_to_pixels(bbox, width, height);
    let stroke = stroke_width(width, height);
    draw_rect_outline(
        &mut canvas,
        pixels.x_min,
        pixels.y_min,
        pixels.x_max,
        pixels.y_max,
        RED,
        stroke,
    );

    let points: Vec<(f64, f64)> = first_step
        .trajectory_points()
        .iter()
        .map(|waypoint| {
            let (x, y) = point_to_pixels(waypoint.point, width, height);
            (f64::from(x), f64::from(y))
        })
        .collect();
    for segment in points.windows(2) {
        let ((x1, y1), (x2, y2)) = (segment[0], segment[1]);
        draw_thick_line(&mut canvas, x1, y1, x2, y2, YELLOW, f64::from(stroke));
    }
    let marker_radius = f64::from(stroke.max(2));
    for (idx, &(x, y)) in points.iter().enumerate() {
        let fill = if idx + 1 == points.len() { YELLOW } else { ORANGE };
        draw_disc(&mut canvas, x, y, marker_radius, BLACK);
        draw_disc(&mut canvas, x, y, marker_radius - 1.0, fill);
    }

    if let Some(parent) = output_path.parent() {
        fs::create_dir_all(parent).map_err(|err| PlanError::io(parent, err))?;
    }
    DynamicImage::ImageRgba8(canvas)
        .to_rgb8()
        .save(output_path)
        .map_err(|err| PlanError::image(output_path, err))?;
    Ok(Some(output_path.to_path_buf()))
}

fn stroke_width(width: u32, height: u32) -> u32 {
    ((f64::from(width.min(height)) * 0.005) as u32).max(2)
}

/// Outline of the inclusive rectangle `(x0, y0)..=(x1, y1)`, `thickness`
/// pixels drawn inward and clipped to the canvas.
fn draw_rect_outline(
    img: &mut RgbaImage,
    x0: u32,
    y0: u32,
    x1: u32,
    y1: u32,
    color: Rgba<u8>,
    thickness: u32,
) {
    let (img_w, img_h) = img.dimensions();
    if img_w == 0 || img_h == 0 {
        return;
    }
    for t in 0..thickness.max(1) {
        let (left, top) = (x0 + t, y0 + t);
        let (Some(right), Some(bottom)) = (x1.checked_sub(t), y1.checked_sub(t)) else {
            break;
        };
        if left > right || top > bottom {
            break;
        }
        for x in left..=right.min(img_w - 1) {
            put_clipped(img, x, top, color);
            put_clipped(img, x, bottom, color);
        }
        for y in top..=bottom.min(img_h - 1) {
            put_clipped(img, left, y, color);
            put_clipped(img, right, y, color);
        }
    }
}

fn put_clipped(img: &mut RgbaImage, x: u32, y: u32, color: Rgba<u8>) {
    if x < img.width() && y < img.height() {
        img.put_pixel(x, y, color);
    }
}

fn draw_disc(img: &mut RgbaImage, cx: f64, cy: f64, radius: f64, color: Rgba<u8>) {
    let (img_w, img_h) = (i64::from(img.width()), i64::from(img.height()));
    if img_w == 0 || img_h == 0 {
        return;
    }
    let radius = radius.max(0.5);
    let min_x = ((cx - radius).floor() as i64).clamp(0, img_w - 1);
    let max_x = ((cx + radius).ceil() as i64).clamp(0, img_w - 1);
    let min_y = ((cy - radius).floor() as i64).clamp(0, img_h - 1);
    let max_y = ((cy + radius).ceil() as i64).clamp(0, img_h - 1);
    let r2 = radius * radius;
    for y in min_y..=max_y {
        for x in min_x..=max_x {
            let dx = x as f64 - cx;
            let dy = y as f64 - cy;
            if dx * dx + dy * dy <= r2 {
                img.put_pixel(x as u32, y as u32, color);
            }
        }
    }
}

fn draw_thick_line(
    img: &mut RgbaImage,
    x1: f64,
    y1: f64,
    x2: f64,
    y2: f64,
    color: Rgba<u8>,
    width: f64,
) {
    let dx = x2 - x1;
    let dy = y2 - y1;
    let distance = (dx * dx + dy * dy).sqrt();
    let steps = distance.max(1.0).ceil() as i32;
    let radius = (width.max(1.0) / 2.0).max(0.6);
    for step in 0..=steps {
        let t = f64::from(step) / f64::from(steps.max(1));
        draw_disc(img, x1 + dx * t, y1 + dy * t, radius, color);
    }
}

#[cfg(test)]
mod tests {
    use guide_contracts::{NormalizedBox, TrajectoryPoint};
    use image::{Rgb, RgbImage};

    use super::*;

    fn white(width: u32, height: u32) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb([255, 255, 255])))
    }

    fn mug() -> DetectedObject {
        DetectedObject::new("red mug", Some(NormalizedBox::new(100, 100, 300, 300)))
    }

    #[test]
    fn slugify_collapses_separators() {
        assert_eq!(slugify_label("Red Mug"), "red_mug");
        assert_eq!(slugify_label("  top-left / drawer #2 "), "top_left_drawer_2");
        assert_eq!(slugify_label("!!!"), "object");
        assert_eq!(slugify_label(""), "object");
    }

    #[test]
    fn crop_numbering_skips_boxless_objects() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let objects = vec![
            DetectedObject::new("lid", None),
            mug(),
            DetectedObject::new("Desk Lamp", Some(NormalizedBox::new(0, 0, 1000, 500))),
        ];
        let crops = crop_objects(&white(100, 100), &objects, &dir.path().join("crops"))?;
        let names: Vec<String> = crops
            .iter()
            .filter_map(|crop| crop.path.file_name())
            .map(|name| name.to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["object_1_red_mug.png", "object_2_desk_lamp.png"]);
        assert_eq!((crops[0].image.width(), crops[0].image.height()), (20, 20));
        assert_eq!((crops[1].image.width(), crops[1].image.height()), (50, 100));
        assert!(crops.iter().all(|crop| crop.path.is_file()));
        Ok(())
    }

    #[test]
    fn highlight_returns_none_without_a_target() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let out = dir.path().join("highlight.png");
        let image = white(100, 100);

        assert_eq!(highlight_first_step(&image, &[mug()], &[], &out)?, None);
        let unmatched = [PlanStep::new("Open the drawer", "drawer")];
        assert_eq!(highlight_first_step(&image, &[mug()], &unmatched, &out)?, None);
        let boxless = [DetectedObject::new("red mug", None)];
        let step = [PlanStep::new("Move the red mug", "Red Mug ")];
        assert_eq!(highlight_first_step(&image, &boxless, &step, &out)?, None);
        assert!(!out.exists());
        Ok(())
    }

    #[test]
    fn highlight_draws_box_and_trajectory() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let out = dir.path().join("nested").join("highlight.png");
        let step = PlanStep::new("Move the red mug", "red mug").with_trajectory(vec![
            TrajectoryPoint::new(500, 500),
            TrajectoryPoint::new(900, 900),
        ]);

        let saved = highlight_first_step(&white(100, 100), &[mug()], &[step], &out)?;
        assert_eq!(saved.as_deref(), Some(out.as_path()));

        let drawn = image::open(&out)?.to_rgb8();
        let red = Rgb([255, 0, 0]);
        assert_eq!(*drawn.get_pixel(10, 10), red);
        assert_eq!(*drawn.get_pixel(11, 20), red);
        assert_eq!(*drawn.get_pixel(30, 30), red);
        assert_ne!(*drawn.get_pixel(12, 20), red);
        assert_ne!(*drawn.get_pixel(20, 20), red);
        assert_eq!(*drawn.get_pixel(90, 90), Rgb([255, 255, 0]));
        assert_eq!(*drawn.get_pixel(50, 50), Rgb([255, 165, 0]));
        assert_eq!(*drawn.get_pixel(5, 95), Rgb([255, 255, 255]));
        Ok(())
    }
}
