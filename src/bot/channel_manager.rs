use crate::ai::{ChannelSummarizer, Message, MessageRole};
use chrono::Utc;
use once_cell::sync::Lazy;
use rand::Rng;
use regex::Regex;
use serenity::all::{
    ChannelType, CreateChannel, EditChannel, GetMessages, GuildChannel, GuildId, Http,
    PermissionOverwrite, PermissionOverwriteType, Permissions, RoleId, User, UserId,
};

/// Fixed prefix that marks a channel as bot-managed.
pub const CHANNEL_PREFIX: &str = "ai-chat-";

/// Tail of the templated welcome greeting. Doubles as the marker the
/// summarizer uses to filter welcome boilerplate out of conversations.
pub const WELCOME_MESSAGE_SUFFIX: &str =
    "You can customize my personality with the /personality command.";

/// Random-suffix alphabet with the visually ambiguous e/E/O removed.
const RANDOM_ALPHABET: &[u8] =
    b"abcdfghijklmnopqrstuvwxyzABCDFGHIJKLMNPQRSTUVWXYZ0123456789";

const RANDOM_SUFFIX_LEN: usize = 4;
const MAX_SEED_LEN: usize = 10;
const RENAME_HISTORY_LIMIT: u8 = 10;

/// Message-count cadence between rename attempts.
const RENAME_CADENCE: usize = 4;

static UNSAFE_SEED_CHARS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^a-zA-Z0-9-_]").unwrap());

/// Deterministic naming, discovery, creation, renaming, and expiry of
/// private conversation channels.
#[derive(Clone)]
pub struct ChannelManager {
    inactivity_threshold_secs: i64,
}

impl ChannelManager {
    pub fn new(inactivity_threshold_hours: u64) -> Self {
        Self {
            inactivity_threshold_secs: (inactivity_threshold_hours * 3600) as i64,
        }
    }

    /// Create a brand-new private channel (never reuses an existing one).
    ///
    /// The default role is denied view access; every member gets
    /// view/send/read-history; the bot additionally gets channel management.
    /// Sends the welcome message before returning.
    pub async fn create_private_channel(
        &self,
        http: &Http,
        guild_id: GuildId,
        users: &[User],
        bot_id: Option<UserId>,
        seed_message: Option<&str>,
    ) -> Result<GuildChannel, String> {
        let username = users.first().map(|u| u.name.as_str()).unwrap_or("unknown");
        let channel_name = generate_channel_name(username);
        log::info!(
            "Creating private channel: {} for users: {}",
            channel_name,
            users.iter().map(|u| u.name.as_str()).collect::<Vec<_>>().join(", ")
        );

        let member_allow =
            Permissions::VIEW_CHANNEL | Permissions::SEND_MESSAGES | Permissions::READ_MESSAGE_HISTORY;

        // The @everyone role shares the guild's ID.
        let mut overwrites = vec![PermissionOverwrite {
            allow: Permissions::empty(),
            deny: Permissions::VIEW_CHANNEL,
            kind: PermissionOverwriteType::Role(RoleId::new(guild_id.get())),
        }];
        for user in users {
            overwrites.push(PermissionOverwrite {
                allow: member_allow,
                deny: Permissions::empty(),
                kind: PermissionOverwriteType::Member(user.id),
            });
        }
        if let Some(bot_id) = bot_id {
            overwrites.push(PermissionOverwrite {
                allow: member_allow | Permissions::MANAGE_CHANNELS,
                deny: Permissions::empty(),
                kind: PermissionOverwriteType::Member(bot_id),
            });
        }

        let channel = guild_id
            .create_channel(
                http,
                CreateChannel::new(&channel_name)
                    .kind(ChannelType::Text)
                    .permissions(overwrites),
            )
            .await
            .map_err(|e| format!("Failed to create channel {}: {}", channel_name, e))?;

        let user_ids: Vec<UserId> = users.iter().map(|u| u.id).collect();
        let welcome = welcome_message(&user_ids, seed_message);
        channel
            .id
            .say(http, welcome)
            .await
            .map_err(|e| format!("Failed to send welcome message: {}", e))?;

        log::info!("Private channel created: {} ({})", channel.name, channel.id);
        Ok(channel)
    }

    pub async fn delete_channel(&self, http: &Http, channel: &GuildChannel) -> Result<(), String> {
        channel
            .id
            .delete(http)
            .await
            .map(|_| ())
            .map_err(|e| format!("Failed to delete channel {}: {}", channel.name, e))
    }

    /// A channel is inactive when its last message (or, with no messages,
    /// its creation) is older than the threshold. Fetch failures count as
    /// active - never delete on error.
    pub async fn is_channel_inactive(&self, http: &Http, channel: &GuildChannel) -> bool {
        let messages = match channel.id.messages(http, GetMessages::new().limit(1)).await {
            Ok(messages) => messages,
            Err(e) => {
                log::error!("Failed to check inactivity for channel {}: {}", channel.name, e);
                return false;
            }
        };

        let reference_secs = messages
            .first()
            .map(|m| m.timestamp.unix_timestamp())
            .unwrap_or_else(|| channel.id.created_at().unix_timestamp());

        is_inactive_at(reference_secs, Utc::now().timestamp(), self.inactivity_threshold_secs)
    }

    /// Sweep every managed channel in the guild and delete the inactive
    /// ones. Per-channel failures must not abort the sweep.
    pub async fn cleanup_inactive_channels(&self, http: &Http, guild_id: GuildId) {
        let channels = match guild_id.channels(http).await {
            Ok(channels) => channels,
            Err(e) => {
                log::error!("Failed to list channels for guild {}: {}", guild_id, e);
                return;
            }
        };

        for channel in channels.values() {
            if channel.kind != ChannelType::Text || !is_private_chat_channel(&channel.name) {
                continue;
            }
            if self.is_channel_inactive(http, channel).await {
                log::info!("Deleting inactive channel: {}", channel.name);
                if let Err(e) = self.delete_channel(http, channel).await {
                    log::error!("{}", e);
                }
            }
        }
    }

    /// Rename a channel to embed a topic summary of its recent conversation.
    /// Unlike the other lifecycle operations this propagates failures -
    /// renaming is an enhancement the caller may choose to ignore.
    pub async fn rename_channel_with_summary(
        &self,
        http: &Http,
        channel: &GuildChannel,
        summarizer: &ChannelSummarizer,
        bot_id: UserId,
    ) -> Result<String, String> {
        let messages = channel
            .id
            .messages(http, GetMessages::new().limit(RENAME_HISTORY_LIMIT))
            .await
            .map_err(|e| format!("Failed to fetch messages for rename: {}", e))?;

        // Fetch order is newest-first; reverse to chronological.
        let mut turns: Vec<Message> = messages
            .iter()
            .map(|m| Message {
                role: if m.author.id == bot_id {
                    MessageRole::Assistant
                } else {
                    MessageRole::User
                },
                content: m.content.clone(),
            })
            .collect();
        turns.reverse();

        let summary = summarizer.summarize_conversation(&turns).await;
        let new_name = format!(
            "{}{}-{}-{}",
            CHANNEL_PREFIX,
            Utc::now().timestamp(),
            summary,
            random_suffix()
        );

        channel
            .id
            .edit(http, EditChannel::new().name(&new_name))
            .await
            .map_err(|e| format!("Failed to rename channel {}: {}", channel.name, e))?;

        log::info!("Renamed channel {} -> {}", channel.name, new_name);
        Ok(new_name)
    }

    /// First managed text channel owned by the given username, if any.
    /// Iteration order is caller-provided, so the tie-break between multiple
    /// matches is theirs.
    pub fn find_user_channel<'a>(
        &self,
        channels: impl IntoIterator<Item = &'a GuildChannel>,
        username: &str,
    ) -> Option<&'a GuildChannel> {
        channels
            .into_iter()
            .find(|c| c.kind == ChannelType::Text && matches_user_channel(&c.name, username))
    }
}

/// Sanitize a username for use in a channel name: keep ASCII
/// letters/digits/hyphen/underscore, replace all else with hyphens,
/// truncate to 10 characters.
pub fn sanitize_username(username: &str) -> String {
    let safe = UNSAFE_SEED_CHARS.replace_all(username, "-");
    safe.chars().take(MAX_SEED_LEN).collect()
}

/// `ai-chat-{sanitized-username}-{unix-seconds}-{random4}`.
///
/// Timestamp granularity plus the random suffix give best-effort uniqueness;
/// collisions are possible but not guarded against.
pub fn generate_channel_name(username: &str) -> String {
    format!(
        "{}{}-{}-{}",
        CHANNEL_PREFIX,
        sanitize_username(username),
        Utc::now().timestamp(),
        random_suffix()
    )
}

fn random_suffix() -> String {
    let mut rng = rand::thread_rng();
    (0..RANDOM_SUFFIX_LEN)
        .map(|_| RANDOM_ALPHABET[rng.gen_range(0..RANDOM_ALPHABET.len())] as char)
        .collect()
}

/// True iff the name carries the managed-channel prefix.
pub fn is_private_chat_channel(name: &str) -> bool {
    name.starts_with(CHANNEL_PREFIX)
}

/// Owned-channel match: prefix + sanitized username + separator.
fn matches_user_channel(name: &str, username: &str) -> bool {
    name.starts_with(&format!("{}{}-", CHANNEL_PREFIX, sanitize_username(username)))
}

/// Renamed channels put a 10-digit timestamp directly after the prefix;
/// fresh names put the sanitized username there. Usernames that sanitize to
/// exactly 10 digits are indistinguishable from renamed channels.
pub fn has_summary_name(name: &str) -> bool {
    name.strip_prefix(CHANNEL_PREFIX)
        .and_then(|rest| rest.split('-').next())
        .map(|segment| segment.len() == 10 && segment.bytes().all(|b| b.is_ascii_digit()))
        .unwrap_or(false)
}

/// Rename cadence gate: managed channel, not yet renamed, and the message
/// count sits on the 2, 6, 10, ... sequence.
pub fn should_rename(name: &str, message_count: usize) -> bool {
    is_private_chat_channel(name)
        && !has_summary_name(name)
        && message_count >= 2
        && (message_count - 2) % RENAME_CADENCE == 0
}

/// Inactivity test: strictly older than the threshold.
fn is_inactive_at(reference_secs: i64, now_secs: i64, threshold_secs: i64) -> bool {
    now_secs - reference_secs > threshold_secs
}

/// Welcome message for a fresh channel: the seeded question when the
/// conversation moved from a public channel, otherwise the templated
/// multi-mention greeting.
fn welcome_message(user_ids: &[UserId], seed_message: Option<&str>) -> String {
    match seed_message {
        Some(seed) => format!("Q: {}", seed),
        None => {
            let mentions = user_ids
                .iter()
                .map(|id| format!("<@{}>", id))
                .collect::<Vec<_>>()
                .join(", ");
            format!(
                "Hello {}! This is your private chat channel with the AI assistant. {}",
                mentions, WELCOME_MESSAGE_SUFFIX
            )
        }
    }
}
