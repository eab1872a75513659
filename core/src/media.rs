use url::Url;

use crate::model::AttachmentKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Crop {
    Fill,
    Fit,
    Thumb,
}

impl Crop {
    fn as_str(self) -> &'static str {
        match self {
            Crop::Fill => "fill",
            Crop::Fit => "fit",
            Crop::Thumb => "thumb",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransformOptions {
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub crop: Option<Crop>,
    /// `q_auto` when unset.
    pub quality: Option<u8>,
    /// Let the CDN pick the format (`f_auto`).
    pub auto_format: bool,
    pub face_gravity: bool,
}

impl TransformOptions {
    fn segment(&self) -> String {
        let mut parts = Vec::new();
        if let Some(w) = self.width {
            parts.push(format!("w_{w}"));
        }
        if let Some(h) = self.height {
            parts.push(format!("h_{h}"));
        }
        if let Some(c) = self.crop {
            parts.push(format!("c_{}", c.as_str()));
        }
        if self.face_gravity {
            parts.push("g_face".to_string());
        }
        match self.quality {
            Some(q) => parts.push(format!("q_{}", q.min(100))),
            None => parts.push("q_auto".to_string()),
        }
        if self.auto_format {
            parts.push("f_auto".to_string());
        }
        parts.join(",")
    }
}

/// Square, face-centred avatar.
pub fn avatar_options(size: u32) -> TransformOptions {
    TransformOptions {
        width: Some(size),
        height: Some(size),
        crop: Some(Crop::Thumb),
        quality: None,
        auto_format: true,
        face_gravity: true,
    }
}

/// Bounded preview for images and video posters in the message list.
pub fn thumbnail_options(max_width: u32) -> TransformOptions {
    TransformOptions {
        width: Some(max_width),
        height: None,
        crop: Some(Crop::Fit),
        quality: None,
        auto_format: true,
        face_gravity: false,
    }
}

/// Insert the transformation into a delivery URL. Non-CDN URLs and
/// unparseable input come back unchanged.
pub fn transform_url(raw: &str, opts: &TransformOptions) -> String {
    let Ok(mut url) = Url::parse(raw) else {
        return raw.to_string();
    };
    let path = url.path().to_string();
    let Some(idx) = path.find("/upload/") else {
        return raw.to_string();
    };
    let (head, tail) = path.split_at(idx + "/upload/".len());
    url.set_path(&format!("{head}{}/{tail}", opts.segment()));
    url.to_string()
}

/// Build a delivery URL from a cloud name and public id.
pub fn public_id_url(
    cloud_name: &str,
    resource: AttachmentKind,
    public_id: &str,
    opts: &TransformOptions,
) -> String {
    let resource = match resource {
        AttachmentKind::Image => "image",
        AttachmentKind::Video | AttachmentKind::Audio => "video",
        AttachmentKind::File => "raw",
    };
    format!(
        "https://res.cloudinary.com/{cloud_name}/{resource}/upload/{}/{}",
        opts.segment(),
        public_id.trim_start_matches('/')
    )
}

/// Classify an attachment from an explicit type hint, a MIME type, or its file name.
pub fn attachment_kind(hint: Option<&str>, mime: Option<&str>, name: &str) -> AttachmentKind {
    let from_essence = |essence: &str| match essence.split('/').next() {
        Some("image") => Some(AttachmentKind::Image),
        Some("video") => Some(AttachmentKind::Video),
        Some("audio") => Some(AttachmentKind::Audio),
        _ => None,
    };
    if let Some(hint) = hint {
        match hint.to_ascii_lowercase().as_str() {
            "image" => return AttachmentKind::Image,
            "video" => return AttachmentKind::Video,
            "audio" => return AttachmentKind::Audio,
            "file" | "document" | "raw" => return AttachmentKind::File,
            other => {
                if let Some(kind) = from_essence(other) {
                    return kind;
                }
            }
        }
    }
    if let Some(kind) = mime.and_then(from_essence) {
        return kind;
    }
    mime_guess::from_path(name)
        .first()
        .and_then(|m| from_essence(m.essence_str()))
        .unwrap_or(AttachmentKind::File)
}
