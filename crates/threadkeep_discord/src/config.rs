//! Discord bot credentials and access control.
//!
//! Secrets come from the environment only. Non-secret settings (the admin
//! list among them) can also come from the TOML config; both sources are
//! merged.

use threadkeep_core::UserId;

/// Discord bot configuration.
#[derive(Clone)]
pub struct DiscordBotConfig {
    /// Discord bot token (required).
    pub bot_token: String,
    /// Discord application ID.
    pub app_id: Option<String>,
    /// List of allowed guild IDs.
    pub allowed_guilds: Option<Vec<String>>,
    /// List of admin user IDs.
    pub admin_users: Option<Vec<String>>,
}

impl DiscordBotConfig {
    /// Load Discord bot configuration from environment variables.
    ///
    /// Returns `None` if `DISCORD_TOKEN` is not set.
    ///
    /// # Environment Variables
    ///
    /// - `DISCORD_TOKEN` -> bot_token (required for Some result)
    /// - `APP_ID` or `DISCORD_CLIENT_ID` -> app_id
    /// - `DISCORD_GUILD_IDS` or `DISCORD_GUILD_ID` (comma-separated) -> allowed_guilds
    /// - `DISCORD_ADMIN_USERS` (comma-separated) -> admin_users
    pub fn from_env() -> Option<Self> {
        let bot_token = std::env::var("DISCORD_TOKEN").ok()?;

        let app_id = std::env::var("APP_ID")
            .ok()
            .or_else(|| std::env::var("DISCORD_CLIENT_ID").ok());

        let allowed_guilds = std::env::var("DISCORD_GUILD_IDS")
            .ok()
            .or_else(|| std::env::var("DISCORD_GUILD_ID").ok())
            .map(|s| parse_comma_separated(&s));

        let admin_users = std::env::var("DISCORD_ADMIN_USERS")
            .ok()
            .map(|s| parse_comma_separated(&s));

        Some(Self {
            bot_token,
            app_id,
            allowed_guilds,
            admin_users,
        })
    }

    /// Admins from the environment plus `configured`, deduplicated.
    /// Entries that are not numeric ids are skipped.
    pub fn admins(&self, configured: &[UserId]) -> Vec<UserId> {
        let mut admins: Vec<UserId> = configured.to_vec();
        for raw in self.admin_users.iter().flatten() {
            match raw.parse::<UserId>() {
                Ok(id) if !admins.contains(&id) => admins.push(id),
                Ok(_) => {}
                Err(_) => {
                    tracing::warn!(value = %raw, "ignoring admin entry that is not a user id")
                }
            }
        }
        admins
    }

    /// Whether events from `guild_id` should be handled
    pub fn allows_guild(&self, guild_id: Option<u64>) -> bool {
        match (&self.allowed_guilds, guild_id) {
            (None, _) => true,
            (Some(guilds), Some(id)) => guilds.iter().any(|g| g == &id.to_string()),
            (Some(_), None) => false,
        }
    }
}

impl std::fmt::Debug for DiscordBotConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiscordBotConfig")
            .field("bot_token", &"<redacted>")
            .field("app_id", &self.app_id)
            .field("allowed_guilds", &self.allowed_guilds)
            .field("admin_users", &self.admin_users)
            .finish()
    }
}

/// Parse a comma-separated string into a Vec of trimmed, non-empty strings.
fn parse_comma_separated(s: &str) -> Vec<String> {
    s.split(',')
        .map(|part| part.trim().to_string())
        .filter(|part| !part.is_empty())
        .collect()
}

pub fn is_authorized_user(user_id: u64, admin_users: &[UserId]) -> bool {
    admin_users.iter().any(|admin| admin.get() == user_id)
}
