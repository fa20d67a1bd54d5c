use crate::canvas::{Command, Document, Page};
use crate::error::{ReportError, Result};
use crate::raster::unpremul_u8;
use crate::types::{Color, Pt, Size};
use fixed::types::I32F32;
use rayon::prelude::*;
use std::collections::{BTreeMap, BTreeSet};
use std::io::Write;
use tiny_skia::Pixmap;

#[derive(Debug, Clone)]
pub struct PdfOptions {
    pub title: Option<String>,
    pub producer: String,
    /// `D:YYYYMMDD` style creation date written to the info dictionary.
    pub creation_date: Option<String>,
}

impl Default for PdfOptions {
    fn default() -> Self {
        Self {
            title: None,
            producer: "fieldpress".to_string(),
            creation_date: None,
        }
    }
}

const PDF_HEADER: &[u8] = b"%PDF-1.7\n";
const CATALOG_ID: usize = 1;
const PAGES_ID: usize = 2;
const INFO_ID: usize = 3;

/// Encoded image XObject, plus its soft mask when the bitmap has transparency.
struct EncodedImage {
    resource_id: String,
    image: String,
    smask: Option<String>,
}

/// Serializes `document` into PDF bytes. Image streams are compressed in parallel.
pub fn document_to_pdf(document: &Document, options: &PdfOptions) -> Result<Vec<u8>> {
    if document.pages.is_empty() {
        return Err(ReportError::Serialization("document has no pages".to_string()));
    }

    let fonts = build_font_map(&collect_font_names(document));
    let encoded = encode_images(&document.images)?;

    // Object layout: catalog, page tree, info, fonts, images (mask first), then page + content.
    let mut objects: Vec<String> = vec![String::new(), String::new(), String::new()];
    let mut font_resources: Vec<(String, usize)> = Vec::new();
    for (name, resource) in &fonts {
        objects.push(font_object(name));
        font_resources.push((resource.clone(), objects.len()));
    }

    let mut image_ids: BTreeMap<String, (String, usize)> = BTreeMap::new();
    for (index, image) in encoded.into_iter().enumerate() {
        let smask_id = image.smask.map(|smask| {
            objects.push(smask);
            objects.len()
        });
        objects.push(with_smask(image.image, smask_id));
        image_ids.insert(image.resource_id, (format!("Im{}", index + 1), objects.len()));
    }

    let page_height = document.page_size.height;
    let mut page_ids = Vec::with_capacity(document.pages.len());
    for page in &document.pages {
        let (content, used_images) = render_page(page, page_height, &fonts, &image_ids);
        objects.push(stream_object(&content));
        let content_id = objects.len();
        let xobjects: Vec<(String, usize)> = used_images
            .iter()
            .filter_map(|resource_id| image_ids.get(resource_id).cloned())
            .collect();
        objects.push(page_object(
            document.page_size,
            &font_resources,
            &xobjects,
            content_id,
        ));
        page_ids.push(objects.len());
    }

    objects[CATALOG_ID - 1] = format!("<< /Type /Catalog /Pages {PAGES_ID} 0 R >>");
    let kids: Vec<String> = page_ids.iter().map(|id| format!("{id} 0 R")).collect();
    objects[PAGES_ID - 1] = format!(
        "<< /Type /Pages /Kids [{}] /Count {} >>",
        kids.join(" "),
        page_ids.len()
    );
    objects[INFO_ID - 1] = info_object(options);

    Ok(build_pdf(&objects, CATALOG_ID, INFO_ID))
}

fn collect_font_names(document: &Document) -> BTreeSet<String> {
    let mut names = BTreeSet::new();
    names.insert("Helvetica".to_string());
    for page in &document.pages {
        for cmd in &page.commands {
            if let Command::SetFontName(name) = cmd {
                names.insert(name.clone());
            }
        }
    }
    names
}

fn build_font_map(names: &BTreeSet<String>) -> BTreeMap<String, String> {
    names
        .iter()
        .enumerate()
        .map(|(index, name)| (name.clone(), format!("F{}", index + 1)))
        .collect()
}

fn encode_images(images: &BTreeMap<String, Pixmap>) -> Result<Vec<EncodedImage>> {
    images
        .par_iter()
        .map(|(resource_id, pixmap)| encode_image(resource_id, pixmap))
        .collect()
}

fn encode_image(resource_id: &str, pixmap: &Pixmap) -> Result<EncodedImage> {
    let pixels = pixmap.data().len() / 4;
    let mut rgb = Vec::with_capacity(pixels * 3);
    let mut alpha = Vec::with_capacity(pixels);
    for px in pixmap.data().chunks_exact(4) {
        let a = px[3];
        rgb.push(unpremul_u8(px[0], a));
        rgb.push(unpremul_u8(px[1], a));
        rgb.push(unpremul_u8(px[2], a));
        alpha.push(a);
    }
    let opaque = alpha.iter().all(|a| *a == 255);

    let image = image_object(pixmap.width(), pixmap.height(), "/DeviceRGB", &flate_compress(&rgb)?);
    let smask = if opaque {
        None
    } else {
        Some(image_object(
            pixmap.width(),
            pixmap.height(),
            "/DeviceGray",
            &flate_compress(&alpha)?,
        ))
    };
    Ok(EncodedImage {
        resource_id: resource_id.to_string(),
        image,
        smask,
    })
}

fn flate_compress(data: &[u8]) -> Result<Vec<u8>> {
    use flate2::Compression;
    use flate2::write::ZlibEncoder;

    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(data)
        .map_err(|err| ReportError::Serialization(format!("image compression: {err}")))?;
    encoder
        .finish()
        .map_err(|err| ReportError::Serialization(format!("image compression: {err}")))
}

fn image_object(width: u32, height: u32, color_space: &str, compressed: &[u8]) -> String {
    let stream_data = encode_stream_data(compressed);
    format!(
        "<< /Type /XObject /Subtype /Image /Width {} /Height {} /ColorSpace {} /BitsPerComponent 8 /Length {} /Filter [/ASCIIHexDecode /FlateDecode] >>
stream
{}
endstream",
        width,
        height,
        color_space,
        stream_data.len(),
        stream_data
    )
}

fn with_smask(image: String, smask_id: Option<usize>) -> String {
    match smask_id {
        Some(id) => image.replacen(
            " /Filter ",
            &format!(" /SMask {id} 0 R /Filter "),
            1,
        ),
        None => image,
    }
}

fn encode_stream_data(data: &[u8]) -> String {
    let mut hex = ascii_hex_encode(data);
    hex.push('>');
    hex
}

fn ascii_hex_encode(data: &[u8]) -> String {
    let mut out = String::with_capacity(data.len() * 2 + data.len() / 32);
    for (index, byte) in data.iter().enumerate() {
        use std::fmt::Write;
        let _ = write!(&mut out, "{:02X}", byte);
        if index % 32 == 31 {
            out.push('\n');
        }
    }
    out
}

fn font_object(name: &str) -> String {
    format!(
        "<< /Type /Font /Subtype /Type1 /BaseFont /{} /Encoding /WinAnsiEncoding >>",
        sanitize_font_name(name)
    )
}

fn sanitize_font_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .filter(|ch| ch.is_ascii_alphanumeric() || *ch == '-')
        .collect();
    if cleaned.is_empty() {
        "Helvetica".to_string()
    } else {
        cleaned
    }
}

fn resource_dict(entries: &[(String, usize)]) -> String {
    let entries: Vec<String> = entries
        .iter()
        .map(|(resource, id)| format!("/{resource} {id} 0 R"))
        .collect();
    format!("<< {} >>", entries.join(" "))
}

fn page_object(
    size: Size,
    fonts: &[(String, usize)],
    xobjects: &[(String, usize)],
    content_id: usize,
) -> String {
    let mut resources = format!("/Font {}", resource_dict(fonts));
    if !xobjects.is_empty() {
        resources.push_str(&format!(" /XObject {}", resource_dict(xobjects)));
    }
    format!(
        "<< /Type /Page /Parent {PAGES_ID} 0 R /MediaBox [0 0 {} {}] /Resources << {} >> /Contents {} 0 R >>",
        fmt_pt(size.width),
        fmt_pt(size.height),
        resources,
        content_id
    )
}

fn info_object(options: &PdfOptions) -> String {
    let mut entries = vec![format!("/Producer ({})", escape_pdf_string(&options.producer))];
    if let Some(title) = &options.title {
        entries.push(format!("/Title ({})", escape_pdf_string(title)));
    }
    if let Some(date) = &options.creation_date {
        entries.push(format!("/CreationDate ({})", escape_pdf_string(date)));
    }
    format!("<< {} >>", entries.join(" "))
}

/// Content stream for one page. Returns the stream and the image resources it draws.
fn render_page(
    page: &Page,
    page_height: Pt,
    fonts: &BTreeMap<String, String>,
    images: &BTreeMap<String, (String, usize)>,
) -> (String, BTreeSet<String>) {
    let mut out = String::new();
    let mut used = BTreeSet::new();
    let mut current_font_size = Pt::from_f32(12.0);
    let mut current_font_name = "Helvetica".to_string();

    for cmd in &page.commands {
        match cmd {
            Command::SaveState => out.push_str("q\n"),
            Command::RestoreState => out.push_str("Q\n"),
            Command::Meta { .. } => {}
            Command::SetFillColor(color) => out.push_str(&color_to_pdf(*color, "rg")),
            Command::SetStrokeColor(color) => out.push_str(&color_to_pdf(*color, "RG")),
            Command::SetLineWidth(width) => {
                out.push_str(&format!("{} w\n", fmt_pt(*width)));
            }
            Command::SetFontName(name) => current_font_name = name.clone(),
            Command::SetFontSize(size) => current_font_size = *size,
            Command::MoveTo { x, y } => {
                out.push_str(&format!("{} {} m\n", fmt_pt(*x), fmt_pt(page_height - *y)));
            }
            Command::LineTo { x, y } => {
                out.push_str(&format!("{} {} l\n", fmt_pt(*x), fmt_pt(page_height - *y)));
            }
            Command::Fill => out.push_str("f\n"),
            Command::Stroke => out.push_str("S\n"),
            Command::DrawRect {
                x,
                y,
                width,
                height,
            } => {
                out.push_str(&format!(
                    "{} {} {} {} re\n",
                    fmt_pt(*x),
                    fmt_pt(page_height - *y - *height),
                    fmt_pt(*width),
                    fmt_pt(*height)
                ));
            }
            Command::DrawString { x, y, text } => {
                let resource = fonts
                    .get(&current_font_name)
                    .map(String::as_str)
                    .unwrap_or("F1");
                let encoded = encode_winansi_pdf_string(text);
                if encoded.replaced > 0 {
                    log::debug!(
                        "{} character(s) outside WinAnsi replaced in {:?}",
                        encoded.replaced,
                        text
                    );
                }
                out.push_str("BT\n");
                out.push_str(&format!("/{} {} Tf\n", resource, fmt_pt(current_font_size)));
                out.push_str(&format!(
                    "{} {} Td\n",
                    fmt_pt(*x),
                    fmt_pt(page_height - *y - current_font_size)
                ));
                out.push_str(&format!("({}) Tj\n", encoded.text));
                out.push_str("ET\n");
            }
            Command::DrawImage {
                x,
                y,
                width,
                height,
                resource_id,
            } => {
                if let Some((name, _)) = images.get(resource_id) {
                    let draw_y = page_height - *y - *height;
                    out.push_str("q\n");
                    out.push_str(&format!(
                        "{} 0 0 {} {} {} cm\n",
                        fmt_pt(*width),
                        fmt_pt(*height),
                        fmt_pt(*x),
                        fmt_pt(draw_y)
                    ));
                    out.push_str(&format!("/{} Do\n", name));
                    out.push_str("Q\n");
                    used.insert(resource_id.clone());
                }
            }
        }
    }

    (out, used)
}

fn stream_object(content: &str) -> String {
    format!(
        "<< /Length {} >>\nstream\n{}\nendstream",
        content.len(),
        content
    )
}

fn build_pdf(objects: &[String], catalog_id: usize, info_id: usize) -> Vec<u8> {
    let mut out: Vec<u8> = Vec::new();
    out.extend_from_slice(PDF_HEADER);
    out.extend_from_slice(b"%\xE2\xE3\xCF\xD3\n");

    let mut offsets = Vec::with_capacity(objects.len());
    for (index, obj) in objects.iter().enumerate() {
        offsets.push(out.len());
        out.extend_from_slice(format!("{} 0 obj\n", index + 1).as_bytes());
        out.extend_from_slice(obj.as_bytes());
        out.extend_from_slice(b"\nendobj\n");
    }

    let xref_start = out.len();
    out.extend_from_slice(format!("xref\n0 {}\n", objects.len() + 1).as_bytes());
    out.extend_from_slice(b"0000000000 65535 f \n");
    for offset in offsets {
        out.extend_from_slice(format!("{:010} 00000 n \n", offset).as_bytes());
    }
    out.extend_from_slice(
        format!(
            "trailer\n<< /Size {} /Root {} 0 R /Info {} 0 R >>\nstartxref\n{}\n%%EOF",
            objects.len() + 1,
            catalog_id,
            info_id,
            xref_start
        )
        .as_bytes(),
    );
    out
}

fn escape_pdf_string(input: &str) -> String {
    let mut out = String::new();
    for ch in input.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '(' => out.push_str("\\("),
            ')' => out.push_str("\\)"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            _ => out.push(ch),
        }
    }
    out
}

struct WinAnsiEncoded {
    text: String,
    replaced: usize,
}

fn encode_winansi_pdf_string(input: &str) -> WinAnsiEncoded {
    let mut out = String::new();
    let mut replaced = 0usize;
    for ch in input.chars() {
        let byte = match ch {
            '\u{0000}'..='\u{007F}' => ch as u8,
            '\u{00A0}'..='\u{00FF}' => ch as u8,
            '\u{20AC}' => 0x80,
            '\u{2026}' => 0x85,
            '\u{2018}' => 0x91,
            '\u{2019}' => 0x92,
            '\u{201C}' => 0x93,
            '\u{201D}' => 0x94,
            '\u{2022}' => 0x95,
            '\u{2013}' => 0x96,
            '\u{2014}' => 0x97,
            '\u{2122}' => 0x99,
            _ => {
                replaced += 1;
                b'?'
            }
        };

        match byte {
            b'\\' => out.push_str("\\\\"),
            b'(' => out.push_str("\\("),
            b')' => out.push_str("\\)"),
            b'\n' => out.push_str("\\n"),
            b'\r' => out.push_str("\\r"),
            b if !(0x20..0x7f).contains(&b) => out.push_str(&format!("\\{:03o}", b)),
            b => out.push(b as char),
        }
    }
    WinAnsiEncoded {
        text: out,
        replaced,
    }
}

fn color_to_pdf(color: Color, operator: &str) -> String {
    format!(
        "{} {} {} {}\n",
        fmt(color.r),
        fmt(color.g),
        fmt(color.b),
        operator
    )
}

fn fmt(value: f32) -> String {
    if !value.is_finite() {
        return "0".to_string();
    }
    let fixed = I32F32::from_num(value);
    let scaled = (fixed * I32F32::from_num(1000)).round();
    let milli: i64 = scaled.to_num();
    format_milli(milli)
}

fn format_milli(milli: i64) -> String {
    if milli == 0 {
        return "0".to_string();
    }
    let sign = if milli < 0 { "-" } else { "" };
    let abs = milli.abs();
    let int_part = abs / 1000;
    let frac_part = abs % 1000;
    if frac_part == 0 {
        format!("{}{}", sign, int_part)
    } else {
        let s = format!("{}{}.{:03}", sign, int_part, frac_part);
        s.trim_end_matches('0').to_string()
    }
}

fn fmt_pt(value: Pt) -> String {
    format_milli(value.to_milli_i64())
}
