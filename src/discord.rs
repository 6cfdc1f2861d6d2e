use async_trait::async_trait;
use thiserror::Error;

pub mod gateway;

pub use self::gateway::DiscordGateway;

#[derive(Debug, Error)]
pub enum DiscordApiError {
    #[error("missing discord permissions: {0}")]
    PermissionDenied(String),
    #[error("discord entity not found: {0}")]
    NotFound(String),
    #[error("discord api error: {0}")]
    Api(String),
}

impl DiscordApiError {
    /// Permission failures on secondary actions (pin, overwrite) degrade to a
    /// warning instead of aborting the surrounding operation.
    pub fn is_permission_denied(&self) -> bool {
        matches!(self, DiscordApiError::PermissionDenied(_))
    }
}

/// How much of the ticket-channel setup a creation attempt asks for. Channel
/// creation can fail on permission edge cases that a retry-with-less routes
/// around, so attempts degrade one explicit step at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelCreation {
    /// Category placement plus deny-everyone/allow-bot overwrites.
    FullPerms,
    /// Category placement, default permissions.
    NoPerms,
    /// Bare text channel; category and overwrites applied afterwards.
    Bare,
}

impl ChannelCreation {
    pub fn next_fallback(self) -> Option<ChannelCreation> {
        match self {
            ChannelCreation::FullPerms => Some(ChannelCreation::NoPerms),
            ChannelCreation::NoPerms => Some(ChannelCreation::Bare),
            ChannelCreation::Bare => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CreatedChannel {
    pub id: String,
    pub name: String,
}

/// The slice of the Discord HTTP surface the ticket subsystem consumes.
/// Implementations must classify permission denials so callers can degrade.
#[async_trait]
pub trait DiscordApi: Send + Sync {
    async fn category_exists(
        &self,
        guild_id: &str,
        category_id: &str,
    ) -> Result<bool, DiscordApiError>;

    async fn create_ticket_channel(
        &self,
        guild_id: &str,
        category_id: &str,
        name: &str,
        mode: ChannelCreation,
    ) -> Result<CreatedChannel, DiscordApiError>;

    async fn move_to_category(
        &self,
        channel_id: &str,
        category_id: &str,
    ) -> Result<(), DiscordApiError>;

    async fn apply_ticket_overwrites(
        &self,
        guild_id: &str,
        channel_id: &str,
    ) -> Result<(), DiscordApiError>;

    async fn delete_channel(&self, channel_id: &str) -> Result<(), DiscordApiError>;

    async fn send_message(
        &self,
        channel_id: &str,
        content: &str,
    ) -> Result<String, DiscordApiError>;

    async fn send_file(
        &self,
        channel_id: &str,
        data: &[u8],
        filename: &str,
    ) -> Result<String, DiscordApiError>;

    async fn pin_message(&self, channel_id: &str, message_id: &str)
        -> Result<(), DiscordApiError>;
}

/// Build a Discord-safe channel name for a ticket: lowercased username with
/// anything outside `[a-z0-9-]` collapsed, suffixed with the last digits of
/// the phone number so two contacts with the same name stay distinguishable.
pub fn ticket_channel_name(username: &str, phone: &str) -> String {
    let mut slug = String::with_capacity(username.len());
    let mut last_was_dash = true;
    for c in username.chars() {
        let c = c.to_ascii_lowercase();
        if c.is_ascii_alphanumeric() {
            slug.push(c);
            last_was_dash = false;
        } else if !last_was_dash {
            slug.push('-');
            last_was_dash = true;
        }
    }
    let slug = slug.trim_matches('-');
    let slug = if slug.is_empty() { "contact" } else { slug };

    let digits: String = phone.chars().filter(|c| c.is_ascii_digit()).collect();
    let suffix = if digits.len() > 4 {
        &digits[digits.len() - 4..]
    } else {
        &digits
    };

    if suffix.is_empty() {
        format!("ticket-{slug}")
    } else {
        format!("ticket-{slug}-{suffix}")
    }
}
