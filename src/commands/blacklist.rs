use anyhow::Context as _;

use crate::blacklist;
use crate::state::Context;

/// List blacklisted hashes
#[poise::command(slash_command, guild_only, required_permissions = "MANAGE_MESSAGES")]
pub async fn list(ctx: Context<'_>) -> Result<(), anyhow::Error> {
    let guild_id = ctx.guild_id().context("guild-only command")?.get();
    let hashes = blacklist::all(&ctx.data().store, guild_id).await;

    if hashes.is_empty() {
        ctx.say("No hashes are blacklisted.").await?;
        return Ok(());
    }

    let listing = hashes
        .iter()
        .map(|h| format!("``{}``", h))
        .collect::<Vec<_>>()
        .join(", ");
    ctx.say(format!("Hashes blacklisted: {}", listing)).await?;
    Ok(())
}

/// Add a hash to the blacklist
#[poise::command(slash_command, guild_only, required_permissions = "MANAGE_MESSAGES")]
pub async fn add(
    ctx: Context<'_>,
    #[description = "Hash to add to the blacklist"] hash: String,
) -> Result<(), anyhow::Error> {
    let guild_id = ctx.guild_id().context("guild-only command")?.get();

    if blacklist::add(&ctx.data().store, guild_id, &hash).await {
        ctx.say(format!("``{}`` blacklisted!", hash)).await?;
    } else {
        ctx.say(format!("``{}`` is already blacklisted!", hash))
            .await?;
    }
    Ok(())
}

/// Remove a hash from the blacklist
#[poise::command(slash_command, guild_only, required_permissions = "MANAGE_MESSAGES")]
pub async fn remove(
    ctx: Context<'_>,
    #[description = "Hash to remove from the blacklist"] hash: String,
) -> Result<(), anyhow::Error> {
    let guild_id = ctx.guild_id().context("guild-only command")?.get();

    if blacklist::remove(&ctx.data().store, guild_id, &hash).await {
        ctx.say(format!("``{}`` unblacklisted!", hash)).await?;
    } else {
        ctx.say(format!("``{}`` is not blacklisted!", hash)).await?;
    }
    Ok(())
}
