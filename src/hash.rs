//! Content fingerprints for remote media, backed by a per-guild URL cache
//! document so a link is fetched over the network at most once.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, warn};

use crate::config::Settings;
use crate::link::MediaType;
use crate::storage::{Store, GLOBAL_SCOPE};

/// Key of the per-guild cache document mapping url -> LinkHash.
pub const HASH_CACHE_KEY: &str = "url_to_link_hash_cache";

const MAX_IMAGE_DIMENSION: u32 = 8192;

/// The identifying signature of one piece of remote media. `md5` is the
/// exact content hash of the raw bytes; `image_hash` is the 8x8 average
/// perceptual hash, present only when the payload decoded as a raster
/// image. Both unset means the content could not be fetched or hashed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkHash {
    pub link: String,
    pub md5: Option<String>,
    pub image_hash: Option<String>,
    pub media_type: MediaType,
}

impl LinkHash {
    pub fn unknown(link: &str, media_type: MediaType) -> Self {
        Self {
            link: link.to_string(),
            md5: None,
            image_hash: None,
            media_type,
        }
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    /// Transient; the fetch loop retries these.
    #[error("request timed out")]
    Timeout,
    #[error("{0}")]
    Other(String),
}

/// The HTTP fetch collaborator. Production wraps a bounded `reqwest`
/// client; tests inject in-memory implementations.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Bytes, FetchError>;
}

pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self { client })
    }
}

fn map_reqwest(e: reqwest::Error) -> FetchError {
    if e.is_timeout() {
        FetchError::Timeout
    } else {
        FetchError::Other(e.to_string())
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<Bytes, FetchError> {
        let resp = self.client.get(url).send().await.map_err(map_reqwest)?;
        resp.bytes().await.map_err(map_reqwest)
    }
}

/// Fingerprint pipeline: cache lookup, concurrent fetch on miss, hash,
/// first-writer-wins merge back into the cache document.
pub struct HashService {
    store: Arc<Store>,
    fetcher: Arc<dyn Fetcher>,
    settings: Settings,
}

impl HashService {
    pub fn new(store: Arc<Store>, settings: Settings) -> Result<Self> {
        let fetcher = Arc::new(HttpFetcher::new(Duration::from_secs(
            settings.fetch_timeout_secs,
        ))?);
        Ok(Self::with_fetcher(store, settings, fetcher))
    }

    pub fn with_fetcher(
        store: Arc<Store>,
        settings: Settings,
        fetcher: Arc<dyn Fetcher>,
    ) -> Self {
        Self {
            store,
            fetcher,
            settings,
        }
    }

    /// Compute a LinkHash for every item, consulting the guild's cache
    /// document first and fetching only the misses. Never errors: anything
    /// that cannot be fetched or hashed comes back as unknown content.
    pub async fn fingerprint(
        &self,
        guild_id: u64,
        items: &[(String, MediaType)],
    ) -> HashMap<String, LinkHash> {
        let mut out: HashMap<String, LinkHash> = HashMap::new();
        let mut pending: Vec<(String, MediaType)> = Vec::new();

        let cache = if self.settings.hash_caching {
            self.store.read(GLOBAL_SCOPE, guild_id, HASH_CACHE_KEY).await
        } else {
            crate::storage::Document::new()
        };

        for (url, kind) in items {
            if out.contains_key(url) || pending.iter().any(|(u, _)| u == url) {
                continue;
            }
            // Non-media links are never fetched or cached.
            if *kind == MediaType::None {
                out.insert(url.clone(), LinkHash::unknown(url, *kind));
                continue;
            }
            if let Some(value) = cache.get(url) {
                match serde_json::from_value::<LinkHash>(value.clone()) {
                    Ok(hash) => {
                        debug!("Cache hit for [{}]", url);
                        out.insert(url.clone(), hash);
                        continue;
                    }
                    Err(e) => warn!("Discarding malformed cache entry for [{}]: {}", url, e),
                }
            }
            pending.push((url.clone(), *kind));
        }

        if pending.is_empty() {
            return out;
        }

        let fetched = if self.settings.threaded_hashing {
            self.fetch_all_spawned(pending).await
        } else {
            self.fetch_all_buffered(pending).await
        };

        if self.settings.hash_caching {
            self.store
                .edit(GLOBAL_SCOPE, guild_id, HASH_CACHE_KEY, |doc| {
                    for hash in &fetched {
                        // First writer wins: never clobber an entry another
                        // caller cached between our miss check and this merge.
                        if doc.contains_key(&hash.link) {
                            continue;
                        }
                        match serde_json::to_value(hash) {
                            Ok(value) => {
                                doc.insert(hash.link.clone(), value);
                            }
                            Err(e) => warn!("Failed to encode cache entry: {}", e),
                        }
                    }
                })
                .await;
        }

        for hash in fetched {
            out.insert(hash.link.clone(), hash);
        }

        out
    }

    /// Default path: bounded concurrent fetches over a single stream.
    async fn fetch_all_buffered(&self, pending: Vec<(String, MediaType)>) -> Vec<LinkHash> {
        futures::stream::iter(pending)
            .map(|(url, kind)| {
                let fetcher = self.fetcher.clone();
                async move { fetch_and_hash(fetcher, url, kind).await }
            })
            .buffer_unordered(self.settings.max_concurrent_fetches.max(1))
            .collect()
            .await
    }

    /// Fallback path: one spawned worker per URL.
    async fn fetch_all_spawned(&self, pending: Vec<(String, MediaType)>) -> Vec<LinkHash> {
        let handles: Vec<_> = pending
            .into_iter()
            .map(|(url, kind)| {
                let fetcher = self.fetcher.clone();
                tokio::spawn(async move { fetch_and_hash(fetcher, url, kind).await })
            })
            .collect();

        let mut results = Vec::with_capacity(handles.len());
        for handle in handles {
            match handle.await {
                Ok(hash) => results.push(hash),
                Err(e) => error!("Hash worker failed: {}", e),
            }
        }
        results
    }
}

async fn fetch_and_hash(fetcher: Arc<dyn Fetcher>, url: String, kind: MediaType) -> LinkHash {
    let bytes = loop {
        match fetcher.fetch(&url).await {
            Ok(bytes) => break bytes,
            Err(FetchError::Timeout) => {
                debug!("Timed out fetching [{}], retrying", url);
            }
            Err(e) => {
                debug!("Failed to fetch [{}]: {}", url, e);
                return LinkHash::unknown(&url, kind);
            }
        }
    };

    hash_bytes(&url, kind, bytes).await
}

async fn hash_bytes(url: &str, kind: MediaType, bytes: Bytes) -> LinkHash {
    let md5 = Some(md5_hex(&bytes));

    // Image decode and resize are CPU-bound; keep them off the runtime.
    let image_hash = match tokio::task::spawn_blocking(move || average_hash(&bytes)).await {
        Ok(hash) => hash,
        Err(e) => {
            warn!("Image hash task failed for [{}]: {}", url, e);
            None
        }
    };

    LinkHash {
        link: url.to_string(),
        md5,
        image_hash,
        media_type: kind,
    }
}

pub fn md5_hex(bytes: &[u8]) -> String {
    hex::encode(Md5::digest(bytes))
}

/// 8x8 average hash of an image payload: grayscale, downsample to 64
/// pixels, one bit per pixel above the mean. Stable across re-encoding and
/// mild recompression. `None` when the bytes are not a decodable raster
/// image.
pub fn average_hash(bytes: &[u8]) -> Option<String> {
    use image::{imageops::FilterType, ImageReader, Limits};
    use std::io::Cursor;

    let mut limits = Limits::default();
    limits.max_image_width = Some(MAX_IMAGE_DIMENSION);
    limits.max_image_height = Some(MAX_IMAGE_DIMENSION);

    let mut reader = ImageReader::new(Cursor::new(bytes)).with_guessed_format().ok()?;
    reader.limits(limits);
    let img = reader.decode().ok()?;

    let gray = img.resize_exact(8, 8, FilterType::Triangle).to_luma8();
    let mut px = [0u8; 64];
    let mut sum: u64 = 0;
    for (i, p) in gray.pixels().enumerate() {
        px[i] = p.0[0];
        sum += u64::from(p.0[0]);
    }
    let avg = (sum / 64) as u8;

    let mut bits: u64 = 0;
    for (i, &v) in px.iter().enumerate() {
        if v > avg {
            bits |= 1u64 << i;
        }
    }
    Some(format!("{:016x}", bits))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn md5_matches_known_digest() {
        assert_eq!(md5_hex(b"hello"), "5d41402abc4b2a76b9719d911017c592");
    }

    #[test]
    fn average_hash_rejects_non_images() {
        assert!(average_hash(b"not an image at all").is_none());
    }

    #[test]
    fn average_hash_is_stable_under_reencoding() {
        use image::{DynamicImage, ImageFormat, RgbImage};
        use std::io::Cursor;

        // A simple gradient so the hash has both set and unset bits.
        let img = RgbImage::from_fn(64, 64, |x, _| image::Rgb([(x * 4) as u8; 3]));
        let img = DynamicImage::ImageRgb8(img);

        let mut png = Vec::new();
        img.write_to(&mut Cursor::new(&mut png), ImageFormat::Png).unwrap();
        let mut bmp = Vec::new();
        img.write_to(&mut Cursor::new(&mut bmp), ImageFormat::Bmp).unwrap();

        let png_hash = average_hash(&png).unwrap();
        let bmp_hash = average_hash(&bmp).unwrap();
        assert_eq!(png_hash, bmp_hash);
        assert_ne!(png_hash, format!("{:016x}", 0u64));
    }
}
