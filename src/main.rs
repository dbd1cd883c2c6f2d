use std::path::Path;
use std::sync::Arc;

use poise::serenity_prelude as serenity;
use poise::{Framework, FrameworkOptions};
use serenity::Mentionable;
use tracing::{debug, error, info, Level};

use mammoth::blacklist;
use mammoth::commands;
use mammoth::config::Settings;
use mammoth::hash::HashService;
use mammoth::link::{self, MediaType, MessageView};
use mammoth::state::AppState;
use mammoth::storage::Store;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = Settings::load(Path::new("./settings.json"))?;

    let level = if settings.spammy_debug_printing {
        Level::TRACE
    } else if settings.debug_printing {
        Level::DEBUG
    } else {
        Level::INFO
    };
    tracing_subscriber::fmt().with_max_level(level).init();

    let _ = dotenv::dotenv();
    let token = dotenv::var("DISCORD_TOKEN").expect("DISCORD_TOKEN required");

    // Opening the store runs any pending schema migration before the
    // gateway connects.
    let store = Arc::new(Store::open(&settings)?);
    info!("Document store initialized at {:?}", settings.data_path);

    let hasher = Arc::new(HashService::new(store.clone(), settings.clone())?);

    if !settings.owner_ids.is_empty() {
        info!(count = settings.owner_ids.len(), "Owner users configured");
    }

    let app_state = AppState {
        settings,
        store,
        hasher,
    };

    let intents = serenity::GatewayIntents::GUILDS
        | serenity::GatewayIntents::GUILD_MESSAGES
        | serenity::GatewayIntents::MESSAGE_CONTENT;

    let framework = Framework::builder()
        .options(FrameworkOptions {
            commands: vec![commands::blacklist()],
            event_handler: |ctx, event, _framework, data| {
                Box::pin(async move {
                    if let serenity::FullEvent::Message { new_message } = event {
                        handle_message(ctx, data, new_message).await;
                    }
                    Ok(())
                })
            },
            ..Default::default()
        })
        .setup(move |ctx, ready, framework| {
            Box::pin(async move {
                info!("Bot connected as: {} ({})", ready.user.name, ready.user.id);
                poise::builtins::register_globally(ctx, &framework.options().commands)
                    .await?;
                Ok(app_state)
            })
        })
        .build();

    info!("Starting Mammoth...");

    let mut client = serenity::ClientBuilder::new(&token, intents)
        .framework(framework)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create client: {}", e))?;

    if let Err(e) = client.start().await {
        error!("Client error: {}", e);
    }

    Ok(())
}

/// Fingerprint every media link in a message and remove the message when any
/// of them is blacklisted. All Discord API failures here are logged and
/// swallowed; moderation is best-effort.
async fn handle_message(
    ctx: &serenity::Context,
    data: &AppState,
    message: &serenity::Message,
) {
    if message.author.bot {
        return;
    }
    let Some(guild_id) = message.guild_id else {
        return;
    };

    let view = MessageView::from(message);
    let media: Vec<_> = link::extract_media_links(&view)
        .into_iter()
        .filter(|(_, kind)| *kind != MediaType::None)
        .collect();
    if media.is_empty() {
        return;
    }

    let hashes = data.hasher.fingerprint(guild_id.get(), &media).await;

    for link_hash in hashes.values() {
        if !blacklist::is_blacklisted(&data.store, guild_id.get(), link_hash).await {
            continue;
        }

        if let Err(e) = message.delete(&ctx.http).await {
            debug!("Failed to delete blacklisted message: {}", e);
            return;
        }

        match message
            .channel_id
            .say(
                &ctx.http,
                format!(
                    "{} Your message has been removed for containing blacklisted media.",
                    message.author.mention()
                ),
            )
            .await
        {
            Ok(notice) => {
                let http = ctx.http.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(std::time::Duration::from_secs(30)).await;
                    let _ = notice.delete(&http).await;
                });
            }
            Err(e) => debug!("Failed to post removal notice: {}", e),
        }
        return;
    }
}
