//! QR code rendering for pairing challenges.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use image::{ImageBuffer, Luma};
use qrcode::{Color, EcLevel, QrCode};
use wabridge_core::error::GatewayError;

/// Pixels per QR module in the PNG rendering.
const MODULE_PX: u32 = 8;
/// Light border around the code, in modules.
const QUIET_ZONE: u32 = 4;

fn encode(qr_data: &str) -> Result<QrCode, GatewayError> {
    QrCode::with_error_correction_level(qr_data.as_bytes(), EcLevel::L)
        .map_err(|e| GatewayError::Client(format!("QR generation failed: {e}")))
}

/// Render a pairing challenge as compact terminal text.
///
/// Two module rows share one line of half-block characters.
pub fn generate_qr_terminal(qr_data: &str) -> Result<String, GatewayError> {
    let code = encode(qr_data)?;
    let width = code.width();
    let colors = code.into_colors();
    let dark = |row: usize, col: usize| row < width && colors[row * width + col] == Color::Dark;

    let mut out = String::with_capacity((width + 1) * width.div_ceil(2));
    for row in (0..width).step_by(2) {
        for col in 0..width {
            out.push(match (dark(row, col), dark(row + 1, col)) {
                (true, true) => '█',
                (true, false) => '▀',
                (false, true) => '▄',
                (false, false) => ' ',
            });
        }
        out.push('\n');
    }
    Ok(out)
}

/// Render a pairing challenge as PNG bytes.
pub fn generate_qr_image(qr_data: &str) -> Result<Vec<u8>, GatewayError> {
    let code = encode(qr_data)?;
    let modules = code.width() as u32;
    let side = (modules + QUIET_ZONE * 2) * MODULE_PX;

    let img = ImageBuffer::from_fn(side, side, |x, y| {
        let (mx, my) = (x / MODULE_PX, y / MODULE_PX);
        let inside = (QUIET_ZONE..QUIET_ZONE + modules).contains(&mx)
            && (QUIET_ZONE..QUIET_ZONE + modules).contains(&my);
        if inside && code[((mx - QUIET_ZONE) as usize, (my - QUIET_ZONE) as usize)] == Color::Dark
        {
            Luma([0u8])
        } else {
            Luma([255u8])
        }
    });

    let mut buf = std::io::Cursor::new(Vec::new());
    img.write_to(&mut buf, image::ImageFormat::Png)
        .map_err(|e| GatewayError::Client(format!("PNG encoding failed: {e}")))?;
    Ok(buf.into_inner())
}

/// Render a pairing challenge as a `data:image/png;base64,...` URL.
pub fn qr_data_url(qr_data: &str) -> Result<String, GatewayError> {
    let png = generate_qr_image(qr_data)?;
    Ok(format!("data:image/png;base64,{}", BASE64.encode(png)))
}
