use anyhow::{anyhow, bail, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};

/// Build a png data url from base64 image data
pub fn png_data_url(base64_data: &str) -> String {
    format!("data:image/png;base64,{base64_data}")
}

/// Extract the base64 payload of a `data:image/png;base64,...` url, checking
/// that it decodes
pub fn png_base64_from_data_url(data_url: &str) -> Result<String> {
    let (header, data) = data_url
        .split_once(',')
        .ok_or_else(|| anyhow!("Invalid data URL"))?;
    if data.contains(',') {
        bail!("Invalid data URL");
    }

    let mime = header
        .strip_prefix("data:")
        .and_then(|rest| rest.split(';').next())
        .ok_or_else(|| anyhow!("Invalid data URL"))?;
    if mime != "image/png" {
        bail!("Unexpected MIME type: {}", mime);
    }

    STANDARD
        .decode(data)
        .map_err(|e| anyhow!("Invalid base64 image data: {}", e))?;
    Ok(data.to_string())
}
