//! Pulls candidate links out of message content and classifies them by media
//! type. Scan order is fixed (attachments, then embeds, then text) so that
//! duplicate suppression is reproducible.

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serenity::model::channel::Message;

pub const SUPPORTED_IMAGE_EXTENSIONS: &[&str] = &[
    ".jpg", ".jpeg", ".JPG", ".JPEG", ".png", ".PNG", ".gif", ".gifv",
];
pub const SUPPORTED_VIDEO_EXTENSIONS: &[&str] = &[".webm", ".mp4", ".mov"];
pub const SUPPORTED_AUDIO_EXTENSIONS: &[&str] = &[".wav", ".mp3", ".ogg", ".flac"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Image,
    Video,
    Audio,
    /// Not a recognized media link.
    None,
}

/// The parts of a message that can carry links, decoupled from the Discord
/// model so the extractor can be driven without a live gateway payload.
#[derive(Debug, Clone, Default)]
pub struct MessageView {
    pub content: String,
    pub attachments: Vec<AttachmentView>,
    pub embeds: Vec<EmbedView>,
}

#[derive(Debug, Clone)]
pub struct AttachmentView {
    pub url: String,
    /// MIME type reported by the platform; authoritative over extension
    /// sniffing when present.
    pub content_type: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct EmbedView {
    pub title: Option<String>,
    pub description: Option<String>,
    pub url: Option<String>,
    pub footer_text: Option<String>,
    pub provider_name: Option<String>,
    pub provider_url: Option<String>,
    pub image_url: Option<String>,
    pub thumbnail_url: Option<String>,
    pub video_url: Option<String>,
    pub fields: Vec<(String, String)>,
}

impl From<&Message> for MessageView {
    fn from(message: &Message) -> Self {
        Self {
            content: message.content.clone(),
            attachments: message
                .attachments
                .iter()
                .map(|a| AttachmentView {
                    url: a.url.clone(),
                    content_type: a.content_type.clone(),
                })
                .collect(),
            embeds: message
                .embeds
                .iter()
                .map(|e| EmbedView {
                    title: e.title.clone(),
                    description: e.description.clone(),
                    url: e.url.clone(),
                    footer_text: e.footer.as_ref().map(|f| f.text.clone()),
                    provider_name: e.provider.as_ref().and_then(|p| p.name.clone()),
                    provider_url: e.provider.as_ref().and_then(|p| p.url.clone()),
                    image_url: e.image.as_ref().map(|i| i.url.clone()),
                    thumbnail_url: e.thumbnail.as_ref().map(|t| t.url.clone()),
                    video_url: e.video.as_ref().map(|v| v.url.clone()),
                    fields: e
                        .fields
                        .iter()
                        .map(|f| (f.name.clone(), f.value.clone()))
                        .collect(),
                })
                .collect(),
        }
    }
}

fn link_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"http[s]?://(?:[a-zA-Z]|[0-9]|[$-_@.&+]|[!*\(\),]|(?:%[0-9a-fA-F][0-9a-fA-F]))+",
        )
        .expect("link regex is valid")
    })
}

/// All absolute URLs in a free-text string, in order of appearance.
pub fn links_in_text(text: &str) -> Vec<String> {
    link_regex()
        .find_iter(text)
        .map(|m| m.as_str().to_string())
        .collect()
}

fn has_complex_extension(link: &str, extensions: &[&str]) -> bool {
    // Covers CDN links that carry a query string after the extension.
    extensions
        .iter()
        .any(|ext| link.contains(&format!("{}?", ext)))
}

fn matches_extension(link: &str, extensions: &[&str]) -> bool {
    extensions.iter().any(|ext| link.ends_with(ext)) || has_complex_extension(link, extensions)
}

/// Classify a URL by its extension alone.
pub fn classify(link: &str) -> MediaType {
    if matches_extension(link, SUPPORTED_IMAGE_EXTENSIONS) {
        MediaType::Image
    } else if matches_extension(link, SUPPORTED_VIDEO_EXTENSIONS) {
        MediaType::Video
    } else if matches_extension(link, SUPPORTED_AUDIO_EXTENSIONS) {
        MediaType::Audio
    } else {
        MediaType::None
    }
}

fn classify_mime(content_type: &str) -> Option<MediaType> {
    if content_type.starts_with("image/") {
        Some(MediaType::Image)
    } else if content_type.starts_with("video/") {
        Some(MediaType::Video)
    } else if content_type.starts_with("audio/") {
        Some(MediaType::Audio)
    } else {
        None
    }
}

/// The ordered, deduplicated media links in a message: attachments first
/// (MIME type authoritative), then every link-bearing embed part, then the
/// message text.
pub fn extract_media_links(message: &MessageView) -> Vec<(String, MediaType)> {
    let mut links: Vec<(String, MediaType)> = Vec::new();
    let push = |url: String, kind: MediaType, links: &mut Vec<(String, MediaType)>| {
        if !links.iter().any(|(u, _)| u == &url) {
            links.push((url, kind));
        }
    };

    for attachment in &message.attachments {
        let kind = attachment
            .content_type
            .as_deref()
            .and_then(classify_mime)
            .unwrap_or_else(|| classify(&attachment.url));
        push(attachment.url.clone(), kind, &mut links);
    }

    for embed in &message.embeds {
        for text in [&embed.title, &embed.description].into_iter().flatten() {
            for url in links_in_text(text) {
                let kind = classify(&url);
                push(url, kind, &mut links);
            }
        }
        if let Some(url) = &embed.url {
            push(url.clone(), classify(url), &mut links);
        }
        if let Some(text) = &embed.footer_text {
            for url in links_in_text(text) {
                let kind = classify(&url);
                push(url, kind, &mut links);
            }
        }
        for url in [&embed.image_url, &embed.thumbnail_url, &embed.video_url]
            .into_iter()
            .flatten()
        {
            push(url.clone(), classify(url), &mut links);
        }
        if let Some(text) = &embed.provider_name {
            for url in links_in_text(text) {
                let kind = classify(&url);
                push(url, kind, &mut links);
            }
        }
        if let Some(url) = &embed.provider_url {
            push(url.clone(), classify(url), &mut links);
        }
        for (name, value) in &embed.fields {
            for url in links_in_text(name).into_iter().chain(links_in_text(value)) {
                let kind = classify(&url);
                push(url, kind, &mut links);
            }
        }
    }

    for url in links_in_text(&message.content) {
        let kind = classify(&url);
        push(url, kind, &mut links);
    }

    links
}
