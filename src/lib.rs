//! Core of the Mammoth moderation bot: a lock-guarded per-guild document
//! store, a media fingerprint pipeline with a URL cache, and the blacklist
//! matching built on both.

pub mod blacklist;
pub mod commands;
pub mod config;
pub mod hash;
pub mod link;
pub mod state;
pub mod storage;
