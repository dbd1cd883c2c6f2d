//! Per-guild blacklist of content hashes. A LinkHash matches when either its
//! exact hash or its perceptual hash is a member; matching is exact string
//! equality, no similarity threshold.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::hash::LinkHash;
use crate::storage::{self, Store, GLOBAL_SCOPE};

/// Key of the per-guild blacklist document.
pub const BLACKLIST_KEY: &str = "hash_blacklist";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HashBlacklist {
    hash_blacklist: BTreeSet<String>,
}

impl HashBlacklist {
    pub fn contains(&self, hash: &str) -> bool {
        self.hash_blacklist.contains(hash)
    }

    /// True when either hash of the link is blacklisted.
    pub fn link_hash_blacklisted(&self, link_hash: &LinkHash) -> bool {
        link_hash
            .md5
            .as_deref()
            .map(|h| self.contains(h))
            .unwrap_or(false)
            || link_hash
                .image_hash
                .as_deref()
                .map(|h| self.contains(h))
                .unwrap_or(false)
    }

    /// False when the hash was already present (set semantics, no double
    /// insert).
    pub fn add(&mut self, hash: &str) -> bool {
        self.hash_blacklist.insert(hash.to_string())
    }

    /// False when the hash was not present.
    pub fn remove(&mut self, hash: &str) -> bool {
        self.hash_blacklist.remove(hash)
    }

    pub fn all(&self) -> impl Iterator<Item = &str> {
        self.hash_blacklist.iter().map(String::as_str)
    }
}

/// Whether a fingerprint matches the guild's blacklist. Read-only and
/// fail-open: a missing or malformed document means no match.
pub async fn is_blacklisted(store: &Store, guild_id: u64, link_hash: &LinkHash) -> bool {
    let doc = store.read(GLOBAL_SCOPE, guild_id, BLACKLIST_KEY).await;
    let blacklist: HashBlacklist = storage::decode(&doc);
    blacklist.link_hash_blacklisted(link_hash)
}

/// Add a raw hash string to the guild's blacklist. Returns false when it was
/// already present.
pub async fn add(store: &Store, guild_id: u64, hash: &str) -> bool {
    store
        .edit(GLOBAL_SCOPE, guild_id, BLACKLIST_KEY, |doc| {
            let mut blacklist: HashBlacklist = storage::decode(doc);
            let added = blacklist.add(hash);
            *doc = storage::encode(&blacklist);
            added
        })
        .await
}

/// Remove a raw hash string from the guild's blacklist. Returns false when
/// it was not present.
pub async fn remove(store: &Store, guild_id: u64, hash: &str) -> bool {
    store
        .edit(GLOBAL_SCOPE, guild_id, BLACKLIST_KEY, |doc| {
            let mut blacklist: HashBlacklist = storage::decode(doc);
            let removed = blacklist.remove(hash);
            *doc = storage::encode(&blacklist);
            removed
        })
        .await
}

/// All blacklisted hashes for a guild, in sorted order.
pub async fn all(store: &Store, guild_id: u64) -> Vec<String> {
    let doc = store.read(GLOBAL_SCOPE, guild_id, BLACKLIST_KEY).await;
    let blacklist: HashBlacklist = storage::decode(&doc);
    blacklist.all().map(str::to_string).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::MediaType;

    #[test]
    fn matches_on_either_hash() {
        let mut blacklist = HashBlacklist::default();
        assert!(blacklist.add("aaaa"));
        assert!(!blacklist.add("aaaa"));

        let by_md5 = LinkHash {
            link: "https://a.example/x.png".into(),
            md5: Some("aaaa".into()),
            image_hash: Some("bbbb".into()),
            media_type: MediaType::Image,
        };
        let by_image = LinkHash {
            link: "https://a.example/y.png".into(),
            md5: Some("cccc".into()),
            image_hash: Some("aaaa".into()),
            media_type: MediaType::Image,
        };
        let unknown = LinkHash::unknown("https://a.example/z", MediaType::None);

        assert!(blacklist.link_hash_blacklisted(&by_md5));
        assert!(blacklist.link_hash_blacklisted(&by_image));
        assert!(!blacklist.link_hash_blacklisted(&unknown));

        assert!(blacklist.remove("aaaa"));
        assert!(!blacklist.remove("aaaa"));
        assert!(!blacklist.link_hash_blacklisted(&by_md5));
    }
}
