use ab_glyph::{FontArc, PxScale};
use image::imageops::{self, FilterType};
use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};
use imageproc::drawing::draw_text_mut;
use std::io::Cursor;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReceiptError {
    #[error("failed to load image {path}: {source}")]
    Image {
        path: String,
        #[source]
        source: image::ImageError,
    },
    #[error("failed to read font {path}: {source}")]
    FontFile {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid font {0}")]
    Font(String),
    #[error("failed to encode receipt: {0}")]
    Encode(#[from] image::ImageError),
}

/// Text printed on the receipt.
#[derive(Debug, Clone, Default)]
pub struct ReceiptFields {
    pub payment_id: String,
    pub transaction_id: String,
    pub tenant_name: String,
    pub tenant_address: String,
    pub owner_name: String,
    pub property_address: String,
    pub amount: String,
    pub date: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rect {
    pub x: i64,
    pub y: i64,
    pub width: u32,
    pub height: u32,
}

const TEXT_COLOR: Rgba<u8> = Rgba([33, 37, 41, 255]);
const TEXT_SIZE: f32 = 26.0;

// Coordinates are in template pixels (1200x800 template).
const OWNER_SIGNATURE: Rect = Rect { x: 140, y: 620, width: 260, height: 90 };
const TENANT_SIGNATURE: Rect = Rect { x: 800, y: 620, width: 260, height: 90 };

fn text_positions(fields: &ReceiptFields) -> [(i32, i32, String); 8] {
    [
        (140, 170, format!("Receipt No: {}", fields.payment_id)),
        (140, 215, format!("Transaction: {}", fields.transaction_id)),
        (140, 290, format!("Received from: {}", fields.tenant_name)),
        (140, 335, format!("Address: {}", fields.tenant_address)),
        (140, 410, format!("Paid to: {}", fields.owner_name)),
        (140, 455, format!("Property: {}", fields.property_address)),
        (140, 530, format!("Amount: {} BDT", fields.amount)),
        (800, 170, format!("Date: {}", fields.date)),
    ]
}

/// Resizes `signature` to fill `rect` and draws it over `canvas`.
pub fn overlay_signature(canvas: &mut RgbaImage, signature: &DynamicImage, rect: Rect) {
    let scaled = imageops::resize(signature, rect.width, rect.height, FilterType::Triangle);
    imageops::overlay(canvas, &scaled, rect.x, rect.y);
}

/// Draws the fields and both signatures onto a copy of the template and
/// returns the PNG encoding.
pub fn compose(
    template: &DynamicImage,
    owner_signature: &DynamicImage,
    tenant_signature: &DynamicImage,
    font: &FontArc,
    fields: &ReceiptFields,
) -> Result<Vec<u8>, ReceiptError> {
    let mut canvas = template.to_rgba8();
    let scale = PxScale::from(TEXT_SIZE);

    for (x, y, text) in text_positions(fields) {
        draw_text_mut(&mut canvas, TEXT_COLOR, x, y, scale, font, &text);
    }

    overlay_signature(&mut canvas, owner_signature, OWNER_SIGNATURE);
    overlay_signature(&mut canvas, tenant_signature, TENANT_SIGNATURE);

    let mut out = Cursor::new(Vec::new());
    DynamicImage::ImageRgba8(canvas).write_to(&mut out, ImageFormat::Png)?;
    Ok(out.into_inner())
}

fn load_image(path: &str) -> Result<DynamicImage, ReceiptError> {
    image::open(Path::new(path)).map_err(|source| ReceiptError::Image {
        path: path.to_string(),
        source,
    })
}

fn load_font(path: &str) -> Result<FontArc, ReceiptError> {
    let bytes = std::fs::read(path).map_err(|source| ReceiptError::FontFile {
        path: path.to_string(),
        source,
    })?;
    FontArc::try_from_vec(bytes).map_err(|_| ReceiptError::Font(path.to_string()))
}

/// Loads the configured assets and renders a receipt.
pub fn render_from_files(
    template_path: &str,
    owner_signature_path: &str,
    tenant_signature_path: &str,
    font_path: &str,
    fields: &ReceiptFields,
) -> Result<Vec<u8>, ReceiptError> {
    let template = load_image(template_path)?;
    let owner_signature = load_image(owner_signature_path)?;
    let tenant_signature = load_image(tenant_signature_path)?;
    let font = load_font(font_path)?;

    compose(&template, &owner_signature, &tenant_signature, &font, fields)
}
