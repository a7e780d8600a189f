//! Pairing code rendering.
//!
//! The channel hands over an opaque pairing payload; the status endpoint
//! serves it as an inline SVG data URL and the CLI can draw it in a terminal.

use crate::error::ChannelError;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use qrcode::render::svg;
use qrcode::{Color, QrCode};

/// Minimum edge length of the rendered SVG, in pixels.
const SVG_MIN_SIZE: u32 = 256;

/// Quiet zone width in modules; scanners need it.
const QUIET_ZONE: usize = 4;

/// Encode `data` as a QR code and return it as a `data:image/svg+xml` URL.
pub fn render_data_url(data: &str) -> Result<String, ChannelError> {
    let code = QrCode::new(data.as_bytes())
        .map_err(|e| ChannelError::Start(format!("QR generation failed: {}", e)))?;
    let image = code
        .render::<svg::Color<'_>>()
        .min_dimensions(SVG_MIN_SIZE, SVG_MIN_SIZE)
        .quiet_zone(true)
        .build();
    Ok(format!(
        "data:image/svg+xml;base64,{}",
        STANDARD.encode(image.as_bytes())
    ))
}

/// Render a QR code as Unicode half blocks, two module rows per line,
/// with a quiet zone around it.
pub fn render_terminal(data: &str) -> Option<String> {
    let code = QrCode::new(data.as_bytes()).ok()?;
    let matrix = code.to_colors();
    let w = code.width();
    let total = w + QUIET_ZONE * 2;
    let mut out = String::new();

    let color_at = |x: usize, y: usize| -> Color {
        if x < QUIET_ZONE || x >= QUIET_ZONE + w || y < QUIET_ZONE || y >= QUIET_ZONE + w {
            Color::Light
        } else {
            matrix[(y - QUIET_ZONE) * w + (x - QUIET_ZONE)]
        }
    };

    for y in (0..total).step_by(2) {
        for x in 0..total {
            let top = color_at(x, y);
            let bot = if y + 1 < total {
                color_at(x, y + 1)
            } else {
                Color::Light
            };
            out.push(match (top, bot) {
                (Color::Light, Color::Light) => ' ',
                (Color::Dark, Color::Dark) => '\u{2588}',
                (Color::Dark, Color::Light) => '\u{2580}',
                (Color::Light, Color::Dark) => '\u{2584}',
            });
        }
        out.push('\n');
    }
    Some(out)
}
