use std::sync::Arc;

use crate::config::Settings;
use crate::hash::HashService;
use crate::storage::Store;

pub struct AppState {
    pub settings: Settings,
    pub store: Arc<Store>,
    pub hasher: Arc<HashService>,
}

pub type Context<'a> = poise::Context<'a, AppState, anyhow::Error>;
