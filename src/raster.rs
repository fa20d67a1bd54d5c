use crate::types::{Matrix2D, Pt};
use base64::Engine;
use tiny_skia::{FilterQuality, IntSize, Pixmap, PixmapPaint};

/// Bitmap handed over by the view for one map layer.
#[derive(Debug, Clone)]
pub enum LayerBitmap {
    Pixmap(Pixmap),
    /// `data:image/png;base64,...` or `data:image/jpeg;base64,...`, as a canvas would export.
    DataUri(String),
}

impl LayerBitmap {
    pub(crate) fn into_pixmap(self) -> Option<Pixmap> {
        match self {
            LayerBitmap::Pixmap(pixmap) => Some(pixmap),
            LayerBitmap::DataUri(uri) => {
                let (mime, data) = parse_data_uri(&uri)?;
                decode_image_to_pixmap(&data, Some(&mime))
            }
        }
    }
}

/// Draws `layer` onto `dest` so that a layer of `css_width` x `css_height` CSS pixels lands
/// under `placement` (CSS pixels to destination pixels).
pub(crate) fn draw_layer(
    dest: &mut Pixmap,
    layer: &Pixmap,
    css_width: f32,
    css_height: f32,
    placement: Matrix2D,
) -> bool {
    if layer.width() == 0 || layer.height() == 0 || !placement.is_finite() {
        return false;
    }
    // Layer backing stores may be denser than their CSS box (device pixel ratio).
    let sx = if css_width > 0.0 {
        css_width / layer.width() as f32
    } else {
        1.0
    };
    let sy = if css_height > 0.0 {
        css_height / layer.height() as f32
    } else {
        1.0
    };
    let transform = placement.then(Matrix2D::scale(sx, sy)).to_skia();
    let paint = PixmapPaint {
        quality: FilterQuality::Bilinear,
        ..PixmapPaint::default()
    };
    dest.draw_pixmap(0, 0, layer.as_ref(), &paint, transform, None);
    true
}

/// Source row that corresponds to `offset` within a snapshot scaled to `scaled_height`.
///
/// Every cut goes through this one function, so the bottom row of one slice is always the
/// row right before the top of the next.
pub(crate) fn row_at(offset: Pt, pixel_height: u32, scaled_height: Pt) -> u32 {
    let scaled = scaled_height.to_milli_i64() as i128;
    if scaled <= 0 {
        return 0;
    }
    let offset = offset.to_milli_i64().clamp(0, scaled as i64) as i128;
    let num = offset * pixel_height as i128;
    let row = (num + scaled / 2) / scaled;
    row.clamp(0, pixel_height as i128) as u32
}

/// Copies rows `start..end` verbatim. Returns `None` for an empty range.
pub(crate) fn copy_rows(source: &Pixmap, start: u32, end: u32) -> Option<Pixmap> {
    let end = end.min(source.height());
    if start >= end {
        return None;
    }
    let stride = source.width() as usize * 4;
    let from = start as usize * stride;
    let to = end as usize * stride;
    let data = source.data()[from..to].to_vec();
    let size = IntSize::from_wh(source.width(), end - start)?;
    Pixmap::from_vec(data, size)
}

pub(crate) fn parse_data_uri(uri: &str) -> Option<(String, Vec<u8>)> {
    if !uri.starts_with("data:") {
        return None;
    }
    let (header, payload) = uri.split_once(',')?;
    let mime = header
        .trim_start_matches("data:")
        .split(';')
        .next()
        .filter(|v| !v.is_empty())
        .unwrap_or("application/octet-stream")
        .to_string();
    let data = if header.contains(";base64") {
        base64::engine::general_purpose::STANDARD
            .decode(payload)
            .ok()?
    } else {
        payload.as_bytes().to_vec()
    };
    Some((mime, data))
}

pub(crate) fn decode_image_to_pixmap(data: &[u8], mime: Option<&str>) -> Option<Pixmap> {
    let format = match mime {
        Some(mime) if mime.contains("png") => Some(image::ImageFormat::Png),
        Some(mime) if mime.contains("jpeg") || mime.contains("jpg") => {
            Some(image::ImageFormat::Jpeg)
        }
        _ => image::guess_format(data).ok(),
    };
    let decoded = match format {
        Some(format) => image::load_from_memory_with_format(data, format).ok()?,
        None => image::load_from_memory(data).ok()?,
    };
    let rgba = decoded.to_rgba8();
    let (width, height) = rgba.dimensions();
    let mut pixmap = Pixmap::new(width, height)?;
    for (src, dst) in rgba
        .as_raw()
        .chunks_exact(4)
        .zip(pixmap.data_mut().chunks_exact_mut(4))
    {
        let a = src[3];
        dst[0] = premul_u8(src[0], a);
        dst[1] = premul_u8(src[1], a);
        dst[2] = premul_u8(src[2], a);
        dst[3] = a;
    }
    Some(pixmap)
}

fn premul_u8(channel: u8, alpha: u8) -> u8 {
    let prod = (channel as u16) * (alpha as u16) + 127;
    ((prod + (prod >> 8)) >> 8) as u8
}

pub(crate) fn unpremul_u8(channel: u8, alpha: u8) -> u8 {
    match alpha {
        0 => 0,
        255 => channel,
        a => ((channel as u32 * 255 + a as u32 / 2) / a as u32).min(255) as u8,
    }
}
