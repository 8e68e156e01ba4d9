use std::path::Path;

use anyhow::{anyhow, Context, Result};

/// Row pitch wgpu requires for texture-to-buffer copies.
pub(crate) fn padded_bytes_per_row(width: u32) -> u32 {
    let unpadded = width * 4;
    let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
    unpadded.div_ceil(align) * align
}

/// Strips the row padding off a mapped readback buffer.
pub(crate) fn unpad_rows(data: &[u8], width: u32, height: u32) -> Vec<u8> {
    let unpadded = (width * 4) as usize;
    let padded = padded_bytes_per_row(width) as usize;
    let mut out = Vec::with_capacity(unpadded * height as usize);
    for row in data.chunks(padded).take(height as usize) {
        out.extend_from_slice(&row[..unpadded.min(row.len())]);
    }
    out
}

/// Reads an RGBA8 texture back to the CPU, blocking until the copy lands.
pub(crate) fn read_rgba(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    texture: &wgpu::Texture,
    width: u32,
    height: u32,
) -> Result<Vec<u8>> {
    let bytes_per_row = padded_bytes_per_row(width);
    let buffer = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("capture readback"),
        size: u64::from(bytes_per_row) * u64::from(height),
        usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
        mapped_at_creation: false,
    });

    let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
        label: Some("capture encoder"),
    });
    encoder.copy_texture_to_buffer(
        wgpu::TexelCopyTextureInfo {
            texture,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        },
        wgpu::TexelCopyBufferInfo {
            buffer: &buffer,
            layout: wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(bytes_per_row),
                rows_per_image: Some(height),
            },
        },
        wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        },
    );
    queue.submit(std::iter::once(encoder.finish()));

    let slice = buffer.slice(..);
    let (tx, rx) = crossbeam_channel::bounded(1);
    slice.map_async(wgpu::MapMode::Read, move |result| {
        let _ = tx.send(result);
    });
    device
        .poll(wgpu::PollType::Wait)
        .map_err(|err| anyhow!("failed waiting for capture readback: {err}"))?;
    rx.recv()
        .context("capture readback callback never ran")?
        .context("failed to map capture buffer")?;

    let pixels = {
        let data = slice.get_mapped_range();
        unpad_rows(&data, width, height)
    };
    buffer.unmap();
    Ok(pixels)
}

pub(crate) fn save_png(path: &Path, width: u32, height: u32, rgba: Vec<u8>) -> Result<()> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let image = image::RgbaImage::from_raw(width, height, rgba)
        .ok_or_else(|| anyhow!("capture buffer does not match {width}x{height}"))?;
    image
        .save_with_format(path, image::ImageFormat::Png)
        .with_context(|| format!("failed to write capture to {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rows_are_padded_to_copy_alignment() {
        assert_eq!(padded_bytes_per_row(64), 256);
        assert_eq!(padded_bytes_per_row(65), 512);
        assert_eq!(padded_bytes_per_row(1), 256);
    }

    #[test]
    fn unpad_keeps_only_visible_pixels() {
        let width = 2;
        let padded = padded_bytes_per_row(width) as usize;
        let mut data = vec![0u8; padded * 2];
        data[..8].copy_from_slice(&[1; 8]);
        data[padded..padded + 8].copy_from_slice(&[2; 8]);
        let pixels = unpad_rows(&data, width, 2);
        assert_eq!(pixels.len(), 16);
        assert_eq!(&pixels[..8], &[1; 8]);
        assert_eq!(&pixels[8..], &[2; 8]);
    }

    #[test]
    fn save_png_creates_parent_directories() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("captures/out.png");
        save_png(&path, 1, 1, vec![10, 20, 30, 255]).expect("save png");
        let decoded = image::open(&path).expect("decode png").to_rgba8();
        assert_eq!(decoded.get_pixel(0, 0).0, [10, 20, 30, 255]);
    }

    #[test]
    fn save_png_rejects_short_buffers() {
        let dir = tempfile::tempdir().expect("tempdir");
        assert!(save_png(&dir.path().join("bad.png"), 2, 2, vec![0; 4]).is_err());
    }
}
