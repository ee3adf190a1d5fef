use std::{fs, path::Path};

use image::{imageops::FilterType, GrayImage, Luma};

use crate::{
    error::Result,
    preprocess::{Image, IMAGE_SIZE, PIXEL_MAX},
};

// From blank to full ink.
const RAMP: &[u8] = b" .:-=+*#%@";
const BAR_WIDTH: usize = 40;

/// Renders a raw `[0, 255]` image as text, one character per pixel.
pub fn ascii_digit(image: &Image) -> String {
    let mut text = String::with_capacity(IMAGE_SIZE * (IMAGE_SIZE + 1));

    for row in image {
        for &pixel in row {
            let intensity = (pixel / PIXEL_MAX).clamp(0.0, 1.0);
            let index = (intensity * (RAMP.len() - 1) as f32).round() as usize;
            text.push(RAMP[index] as char);
        }
        text.push('\n');
    }

    text
}

/// One line per class with its probability and a proportional bar.
pub fn format_probabilities(probabilities: &[f32]) -> String {
    probabilities
        .iter()
        .enumerate()
        .map(|(class, &p)| {
            let filled = (p.clamp(0.0, 1.0) * BAR_WIDTH as f32).round() as usize;
            format!("{class}: {p:.4} {}", "#".repeat(filled))
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Save a raw `[0, 255]` image as a grayscale PNG, upscaled `scale` times.
pub fn save_as_img(image: &Image, scale: u32, path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();

    // Ensure the output directory exists
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let side = IMAGE_SIZE as u32;
    let img = GrayImage::from_fn(side, side, |x, y| {
        let pixel = image[y as usize][x as usize].clamp(0.0, PIXEL_MAX);
        Luma([pixel as u8])
    });

    let scale = scale.max(1);
    let img = image::imageops::resize(&img, side * scale, side * scale, FilterType::Nearest);

    img.save(path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ascii_digit_is_a_28_by_28_grid() {
        let mut image = [[0.0; IMAGE_SIZE]; IMAGE_SIZE];
        image[0][0] = 255.0;

        let text = ascii_digit(&image);
        let lines: Vec<&str> = text.lines().collect();

        assert_eq!(lines.len(), IMAGE_SIZE);
        assert!(lines.iter().all(|line| line.len() == IMAGE_SIZE));
        assert!(lines[0].starts_with('@'));
        assert_eq!(lines[1].trim(), "");
    }

    #[test]
    fn probabilities_are_listed_per_class() {
        let text = format_probabilities(&[0.0, 1.0]);

        assert_eq!(text, format!("0: 0.0000 \n1: 1.0000 {}", "#".repeat(BAR_WIDTH)));
    }

    #[test]
    fn image_is_written_upscaled() {
        let path = std::env::temp_dir()
            .join(format!("mnist-lessons-show-{}", std::process::id()))
            .join("digit.png");
        let image = [[200.0; IMAGE_SIZE]; IMAGE_SIZE];

        save_as_img(&image, 2, &path).unwrap();

        let saved = image::open(&path).unwrap().to_luma8();
        assert_eq!(saved.dimensions(), (56, 56));
        assert_eq!(saved.get_pixel(10, 10), &Luma([200]));

        std::fs::remove_dir_all(path.parent().unwrap()).ok();
    }
}
