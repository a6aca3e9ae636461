//! Input checks run before any credits or storage are touched.

use crate::assets::is_valid_owner_id;
use crate::jobs::model::TransformKind;

pub const MAX_PROMPT_CHARS: usize = 1000;

pub const ASPECT_RATIOS: &[&str] = &["1:1", "4:3", "3:4", "16:9", "9:16", "3:2", "2:3"];

const INPUT_CONTENT_TYPES: &[&str] = &["image/jpeg", "image/png", "image/webp"];

#[derive(Debug, Clone)]
pub struct MediaUpload {
    pub bytes: Vec<u8>,
    pub content_type: String,
}

#[derive(Debug, Clone)]
pub struct JobRequest {
    pub owner_id: String,
    pub kind: TransformKind,
    pub preset: String,
    pub prompt: Option<String>,
    pub aspect_ratio: Option<String>,
    pub media: MediaUpload,
    pub extra_media: Vec<MediaUpload>,
}

#[derive(Debug, Clone, Copy)]
pub struct Limits {
    pub max_media_bytes: usize,
    pub max_extra_media: usize,
}

pub fn validate_request(req: &JobRequest, limits: &Limits) -> Result<(), String> {
    if !is_valid_owner_id(&req.owner_id) {
        return Err("user id is not valid".to_string());
    }

    validate_preset(&req.preset)?;

    if let Some(prompt) = &req.prompt {
        if prompt.chars().count() > MAX_PROMPT_CHARS {
            return Err(format!("prompt exceeds {MAX_PROMPT_CHARS} characters"));
        }
    }

    if let Some(ratio) = &req.aspect_ratio {
        if !ASPECT_RATIOS.contains(&ratio.as_str()) {
            return Err(format!(
                "aspect_ratio must be one of {}",
                ASPECT_RATIOS.join(", ")
            ));
        }
    }

    validate_media(&req.media, limits, "media")?;

    match req.kind {
        TransformKind::Compose => {
            if req.extra_media.is_empty() {
                return Err("compose requires at least one extra image".to_string());
            }
            if req.extra_media.len() > limits.max_extra_media {
                return Err(format!(
                    "at most {} extra images are allowed",
                    limits.max_extra_media
                ));
            }
        }
        TransformKind::Restore | TransformKind::Animate => {
            if !req.extra_media.is_empty() {
                return Err(format!(
                    "{} does not accept extra images",
                    req.kind.as_str()
                ));
            }
        }
    }
    for (i, m) in req.extra_media.iter().enumerate() {
        validate_media(m, limits, &format!("extra_media[{i}]"))?;
    }

    Ok(())
}

fn validate_preset(preset: &str) -> Result<(), String> {
    let ok = !preset.is_empty()
        && preset.len() <= 64
        && preset
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-');
    if ok {
        Ok(())
    } else {
        Err("preset must be 1-64 characters of a-z, 0-9, '_' or '-'".to_string())
    }
}

fn validate_media(media: &MediaUpload, limits: &Limits, field: &str) -> Result<(), String> {
    let ct = media.content_type.trim().to_ascii_lowercase();
    if !INPUT_CONTENT_TYPES.contains(&ct.as_str()) {
        return Err(format!(
            "{field}: content type {:?} is not supported (jpeg, png, webp)",
            media.content_type
        ));
    }
    if media.bytes.is_empty() {
        return Err(format!("{field}: file is empty"));
    }
    if media.bytes.len() > limits.max_media_bytes {
        return Err(format!(
            "{field}: file exceeds {} bytes",
            limits.max_media_bytes
        ));
    }
    Ok(())
}
