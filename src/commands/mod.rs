mod blacklist;

use crate::state::Context;

/// Manage the guild's blacklist of media content hashes
#[poise::command(
    slash_command,
    guild_only,
    required_permissions = "MANAGE_MESSAGES",
    subcommands("blacklist::list", "blacklist::add", "blacklist::remove")
)]
pub async fn blacklist(_ctx: Context<'_>) -> Result<(), anyhow::Error> {
    Ok(())
}
