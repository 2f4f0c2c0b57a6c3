use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use fast_image_resize as fir;
use image::{RgbaImage, imageops};
use tokio::select;
use tokio::sync::mpsc::{Receiver, Sender};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::events::{ImageLoaded, LoadImage, PreparedImageCpu};

/// Decodes to RGBA8, applies EXIF orientation, and fits within `max_dimension`.
pub fn decode_image(path: &Path, max_dimension: u32) -> Result<RgbaImage> {
    let img = image::ImageReader::open(path)
        .with_context(|| format!("failed to open {}", path.display()))?
        .with_guessed_format()?
        .decode()
        .with_context(|| format!("failed to decode {}", path.display()))?
        .to_rgba8();
    let img = apply_orientation(img, read_orientation(path).unwrap_or(1));
    downscale_to_fit(img, max_dimension)
}

fn apply_orientation(img: RgbaImage, orientation: u16) -> RgbaImage {
    match orientation {
        2 => imageops::flip_horizontal(&img),
        3 => imageops::rotate180(&img),
        4 => imageops::flip_vertical(&img),
        5 => imageops::flip_horizontal(&imageops::rotate90(&img)),
        6 => imageops::rotate90(&img),
        7 => imageops::flip_horizontal(&imageops::rotate270(&img)),
        8 => imageops::rotate270(&img),
        _ => img,
    }
}

fn read_orientation(path: &Path) -> Option<u16> {
    let file = File::open(path).ok()?;
    let exif = exif::Reader::new()
        .read_from_container(&mut BufReader::new(file))
        .ok()?;
    let field = exif.get_field(exif::Tag::Orientation, exif::In::PRIMARY)?;
    let value = field.value.get_uint(0)?;
    debug!(orientation = value, path = %path.display(), "exif orientation");
    u16::try_from(value).ok()
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn downscale_to_fit(img: RgbaImage, max_dimension: u32) -> Result<RgbaImage> {
    let (w, h) = img.dimensions();
    let longest = w.max(h);
    if longest <= max_dimension || longest == 0 {
        return Ok(img);
    }
    let scale = f64::from(max_dimension) / f64::from(longest);
    let target_w = ((f64::from(w) * scale).round() as u32).max(1);
    let target_h = ((f64::from(h) * scale).round() as u32).max(1);

    let src_view = fir::images::ImageRef::new(w, h, img.as_raw(), fir::PixelType::U8x4)
        .context("failed to create source view for resize")?;
    let mut dst_image = fir::images::Image::new(target_w, target_h, fir::PixelType::U8x4);
    let options = fir::ResizeOptions::new()
        .resize_alg(fir::ResizeAlg::Convolution(fir::FilterType::CatmullRom));
    fir::Resizer::new()
        .resize(&src_view, &mut dst_image, Some(&options))
        .context("image resize failed")?;
    RgbaImage::from_raw(target_w, target_h, dst_image.into_vec())
        .ok_or_else(|| anyhow::anyhow!("failed to construct resized RGBA image"))
}

/// Decodes requested images in the background with bounded concurrency.
///
/// Failed decodes are logged and dropped; the viewer keeps the placeholder for
/// that slot. Returns once the request channel closes and nothing is in flight,
/// or on cancellation.
pub async fn run(
    mut load_rx: Receiver<LoadImage>,
    to_viewer: Sender<ImageLoaded>,
    cancel: CancellationToken,
    max_in_flight: usize,
) -> Result<()> {
    let mut tasks: JoinSet<(usize, PathBuf, Result<RgbaImage>)> = JoinSet::new();
    let mut rx_open = true;

    loop {
        if !rx_open && tasks.is_empty() {
            debug!("request channel closed and no decodes in flight; loader done");
            break;
        }
        select! {
            _ = cancel.cancelled() => break,

            request = load_rx.recv(), if rx_open && tasks.len() < max_in_flight => {
                let Some(LoadImage { slot, path, max_dimension }) = request else {
                    rx_open = false;
                    continue;
                };
                debug!(slot, path = %path.display(), "decode requested");
                tasks.spawn(async move {
                    let p = path.clone();
                    let res = tokio::task::spawn_blocking(move || decode_image(&p, max_dimension))
                        .await
                        .unwrap_or_else(|err| Err(anyhow::anyhow!("decode task panicked: {err}")));
                    (slot, path, res)
                });
            }

            Some(join_res) = tasks.join_next() => {
                let Ok((slot, path, res)) = join_res else { continue };
                match res {
                    Ok(rgba8) => {
                        let (width, height) = rgba8.dimensions();
                        debug!(slot, width, height, path = %path.display(), "decoded");
                        let loaded = ImageLoaded {
                            slot,
                            prepared: PreparedImageCpu { path, width, height, pixels: rgba8.into_raw() },
                        };
                        if to_viewer.send(loaded).await.is_err() {
                            debug!("viewer channel closed; stopping loader");
                            break;
                        }
                    }
                    Err(err) => {
                        warn!(slot, path = %path.display(), error = ?err, "image failed to load; slot stays empty");
                    }
                }
            }
        }
    }
    tasks.abort_all();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine;

    // JPEG 2x1 with EXIF orientation 6 (rotate 90 CW), base64 encoded
    const ORIENT6_JPEG: &str = concat!(
        "/9j/4AAQSkZJRgABAQAAAQABAAD/4QAiRXhpZgAATU0AKgAAAAgAAQESAAMAAAABAAYAAAAAAAD/2wBDAAgGBgcGBQgHBwcJCQgKDBQNDAsLDBkSEw8UHRofHh0aHBwgJC4nICIsIxwcKDcpLDAxNDQ0Hyc5PTgyPC4zNDL/",
        "2wBDAQkJCQwLDBgNDRgyIRwhMjIyMjIyMjIyMjIyMjIyMjIyMjIyMjIyMjIyMjIyMjIyMjIyMjIyMjIyMjIyMjIyMjL/wAARCAABAAIDASIAAhEBAxEB/8QAHwAAAQUBAQEBAQEAAAAAAAAAAAECAwQFBgcICQoL/8QAtRAAAgEDAwIEAwUFBAQAAAF9AQIDAAQRBRIhMUEGE1FhByJxFDKBkaEII0KxwRVS0fAkM2JyggkKFhcYGRolJicoKSo0NTY3ODk6Q0RFRkdISUpTVFVWV1hZWmNkZWZnaGlqc3R1dnd4eXqDhIWGh4iJipKTlJWWl5iZmqKjpKWmp6ipqrKztLW2t7i5usLDxMXGx8jJytLT1NXW19jZ2uHi4+Tl5ufo6erx8vP09fb3+Pn6/8QAHwEAAwEBAQEBAQEBAQAAAAAAAAECAwQFBgcICQoL/8QAtREAAgECBAQDBAcFBAQAAQJ3AAECAxEEBSExBhJBUQdhcRMiMoEIFEKRobHBCSMzUvAVYnLRChYkNOEl8RcYGRomJygpKjU2Nzg5OkNERUZHSElKU1RVVldYWVpjZGVmZ2hpanN0dXZ3eHl6goOEhYaHiImKkpOUlZaXmJmaoqOkpaanqKmqsrO0tba3uLm6wsPExcbHyMnK0tPU1dbX2Nna4uPk5ebn6Onq8vP09fb3+Pn6/9oADAMBAAIRAxEAPwDi6KKK+ZP3E//Z"
    );

    #[test]
    fn applies_orientation_six() {
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(ORIENT6_JPEG)
            .unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("orient6.jpg");
        std::fs::write(&path, &bytes).unwrap();
        let img = decode_image(&path, 4096).unwrap();
        assert_eq!(img.dimensions(), (1, 2));
    }

    #[test]
    fn large_images_are_downscaled() {
        let img = RgbaImage::from_pixel(400, 100, image::Rgba([10, 20, 30, 255]));
        let out = downscale_to_fit(img, 200).unwrap();
        assert_eq!(out.dimensions(), (200, 50));
    }

    #[test]
    fn small_images_pass_through() {
        let img = RgbaImage::from_pixel(64, 32, image::Rgba([0, 0, 0, 255]));
        let out = downscale_to_fit(img.clone(), 200).unwrap();
        assert_eq!(out, img);
    }
}
