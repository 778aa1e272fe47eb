//! QR artifact rendering for enrollment tokens.

use anyhow::{anyhow, Result};
use qrcode::{render::svg, QrCode};

/// Render the provider registration URI for `token` as an SVG QR code.
///
/// Pure function of the token: the same token always produces the same
/// bytes, so callers control single-use semantics via the flow store, not
/// here.
pub fn render_enrollment_artifact(token: &str) -> Result<String> {
    let uri = format!("authy://account?token={token}");
    let code = QrCode::new(uri.as_bytes())
        .map_err(|err| anyhow!("failed to encode enrollment QR code: {err:?}"))?;
    Ok(code
        .render::<svg::Color>()
        .min_dimensions(250, 250)
        .build())
}
