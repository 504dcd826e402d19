use std::io::Cursor;

use base64::{engine::general_purpose::STANDARD, Engine};
use image::{codecs::jpeg::JpegEncoder, imageops::FilterType, RgbImage};

use crate::error::{PortalError, PortalResult};
use crate::services::profiles::MAX_PHOTO_DATA_URL_LEN;

pub const MAX_AVATAR_SIDE: u32 = 512;
const DATA_URL_PREFIX: &str = "data:image/jpeg;base64,";

/// Shrink an uploaded picture to fit the avatar box and encode it as a JPEG
/// data URL no longer than `max_len` characters.
pub fn encode_avatar(bytes: &[u8], max_len: usize) -> PortalResult<String> {
    let img = image::load_from_memory(bytes).map_err(|e| {
        tracing::debug!("avatar decode failed: {e}");
        PortalError::Validation("Por favor, selecione um arquivo de imagem válido.".into())
    })?;

    let img = if img.width() > MAX_AVATAR_SIDE || img.height() > MAX_AVATAR_SIDE {
        img.resize(MAX_AVATAR_SIDE, MAX_AVATAR_SIDE, FilterType::Lanczos3)
    } else {
        img
    };
    // JPEG has no alpha channel.
    let img = img.to_rgb8();

    let mut quality = 90u8;
    loop {
        let data_url = to_data_url(&img, quality)?;
        if data_url.len() <= max_len {
            return Ok(data_url);
        }
        if quality <= 10 {
            return Err(PortalError::Validation(
                "A imagem é muito grande, mesmo após a compressão. Tente uma imagem menor.".into(),
            ));
        }
        quality -= 10;
    }
}

fn to_data_url(img: &RgbImage, quality: u8) -> PortalResult<String> {
    let mut buf = Vec::new();
    JpegEncoder::new_with_quality(&mut Cursor::new(&mut buf), quality)
        .encode_image(img)
        .map_err(anyhow::Error::from)?;
    Ok(format!("{DATA_URL_PREFIX}{}", STANDARD.encode(&buf)))
}

/// [`encode_avatar`] off the async runtime, with the stored-photo limit.
pub async fn prepare_avatar(bytes: bytes::Bytes) -> PortalResult<String> {
    tokio::task::spawn_blocking(move || encode_avatar(&bytes, MAX_PHOTO_DATA_URL_LEN))
        .await
        .map_err(anyhow::Error::from)?
}
