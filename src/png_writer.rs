use crate::error::Result;
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

/// Convert premultiplied RGBA8 pixels to straight alpha in place.
pub fn unpremultiply(rgba: &mut [u8]) {
    for px in rgba.chunks_exact_mut(4) {
        let a = px[3] as u32;
        if a == 0 {
            continue;
        }
        for c in &mut px[..3] {
            *c = ((*c as u32 * 255 + a / 2) / a).min(255) as u8;
        }
    }
}

pub fn save_png_rgba8(path: &Path, w: u32, h: u32, rgba: &[u8]) -> Result<()> {
    let file = File::create(path)?;
    let wtr = BufWriter::new(file);

    let mut encoder = png::Encoder::new(wtr, w, h);
    encoder.set_color(png::ColorType::Rgba);
    encoder.set_depth(png::BitDepth::Eight);

    let mut writer = encoder.write_header().map_err(std::io::Error::other)?;
    writer.write_image_data(rgba).map_err(std::io::Error::other)?;
    writer.finish().map_err(std::io::Error::other)?;
    tracing::info!(path = %path.display(), width = w, height = h, "wrote png");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unpremultiply_restores_straight_color() {
        let mut px = [64, 32, 0, 128, 10, 20, 30, 0, 255, 255, 255, 255];
        unpremultiply(&mut px);
        assert_eq!(&px[..4], &[128, 64, 0, 128]);
        // Fully transparent pixels stay untouched.
        assert_eq!(&px[4..8], &[10, 20, 30, 0]);
        assert_eq!(&px[8..], &[255, 255, 255, 255]);
    }

    #[test]
    fn writes_decodable_png() {
        let path = std::env::temp_dir().join(format!("splat-png-{}.png", std::process::id()));
        let rgba: Vec<u8> = (0..2 * 3 * 4).map(|i| i as u8 * 10).collect();
        save_png_rgba8(&path, 2, 3, &rgba).unwrap();

        let decoder = png::Decoder::new(std::io::BufReader::new(File::open(&path).unwrap()));
        let mut reader = decoder.read_info().unwrap();
        let mut buf = vec![0; rgba.len()];
        let info = reader.next_frame(&mut buf).unwrap();
        assert_eq!((info.width, info.height), (2, 3));
        assert_eq!(&buf[..info.buffer_size()], &rgba[..]);
        std::fs::remove_file(&path).unwrap();
    }
}
