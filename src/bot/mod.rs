pub mod channel_manager;


use std::sync::Arc;

use serenity::all::{GuildChannel, GuildId, Http, User, UserId};

use crate::ai::{AiClient, ChannelSummarizer, Message, ResponseGenerator};
use crate::bot::channel_manager::{is_private_chat_channel, ChannelManager};
use crate::db::Database;
use crate::history::ConversationHistory;

/// How many turns of prior conversation feed each generation call.
pub const HISTORY_LIMIT: usize = 10;

/// Sent into a fresh private channel when the detached first-message task
/// fails.
pub const FIRST_MESSAGE_FALLBACK: &str =
    "Hello! I've moved our conversation to this private channel. How can I help you today?";

const PUBLIC_RESPONSE_SYSTEM_PROMPT: &str = "You are a helpful AI assistant. Generate exactly one short, friendly one-line response indicating we're moving to a private channel. Keep it concise and varied. Only provide one response.";

const PUBLIC_PROMPT_MAX_CHARS: usize = 100;

/// Attachment metadata as the platform layer hands it over.
pub struct IncomingAttachment {
    pub url: String,
    pub content_type: Option<String>,
}

impl IncomingAttachment {
    fn is_image(&self) -> bool {
        self.content_type
            .as_deref()
            .map(|t| t.starts_with("image/"))
            .unwrap_or(false)
    }
}

/// Platform-facing orchestrator: wires personalities, history, generation
/// and channel lifecycle together. Every handler returns a ready-to-send
/// reply string; failures surface as apologetic strings, never as errors.
pub struct Bot {
    db: Arc<Database>,
    channel_manager: ChannelManager,
    generator: ResponseGenerator,
    summarizer: ChannelSummarizer,
}

impl Bot {
    pub fn new(db: Arc<Database>, client: AiClient, channel_manager: ChannelManager) -> Self {
        Self {
            db,
            channel_manager,
            generator: ResponseGenerator::new(client.clone()),
            summarizer: ChannelSummarizer::new(client),
        }
    }

    /// Stored personality for a user; lookup failures degrade to none.
    fn personality(&self, user_id: &str) -> Option<String> {
        match self.db.get_personality(user_id) {
            Ok(personality) => personality,
            Err(e) => {
                log::error!("Failed to load personality for user {}: {}", user_id, e);
                None
            }
        }
    }

    /// Produce the reply for a message in a private channel.
    ///
    /// `platform_history` is the chronological recent conversation as fetched
    /// from the platform; when the fetch failed the caller passes `None` and
    /// the current message alone seeds a fresh in-memory history. The first
    /// image attachment, if any, switches to image-grounded Q&A.
    pub async fn handle_message(
        &self,
        user_id: &str,
        content: &str,
        platform_history: Option<Vec<Message>>,
        attachments: &[IncomingAttachment],
    ) -> String {
        log::info!(
            "Handling message from user {}: {}",
            user_id,
            preview(content, 50)
        );

        let personality = self.personality(user_id);
        if let Some(p) = &personality {
            log::info!("Using personality for user {}: {}", user_id, preview(p, 50));
        }

        let turns = platform_history.unwrap_or_else(|| {
            log::info!("Using in-memory history as fallback");
            let mut history = ConversationHistory::new(HISTORY_LIMIT);
            history.append(Message::user(content));
            history.snapshot()
        });

        match attachments.iter().find(|a| a.is_image()) {
            Some(image) => {
                self.generator
                    .process_image(&image.url, &turns, personality.as_deref())
                    .await
            }
            None => {
                self.generator
                    .generate(&turns, personality.as_deref(), true)
                    .await
            }
        }
    }

    /// `/personality` with text sets, without text reports.
    pub fn handle_personality_command(&self, user_id: &str, text: Option<&str>) -> String {
        match text {
            Some(text) => match self.db.set_personality(user_id, text) {
                Ok(()) => "Personality updated!".to_string(),
                Err(e) => {
                    log::error!("Error setting personality for user {}: {}", user_id, e);
                    "Failed to update personality. Please try again.".to_string()
                }
            },
            None => match self.personality(user_id) {
                Some(personality) => format!("Your current personality: {}", personality),
                None => "You haven't set a personality yet.".to_string(),
            },
        }
    }

    /// `/start-ai-chat`: always creates a fresh channel.
    pub async fn handle_start_ai_chat(
        &self,
        http: &Http,
        guild_id: GuildId,
        user: &User,
        bot_id: Option<UserId>,
    ) -> String {
        match self
            .channel_manager
            .create_private_channel(http, guild_id, std::slice::from_ref(user), bot_id, None)
            .await
        {
            Ok(channel) => format!(
                "I've created a private AI chat channel for you: <#{}>",
                channel.id
            ),
            Err(e) => {
                log::error!("Failed to create private channel: {}", e);
                "Sorry, I couldn't create a private AI chat channel for you. Please try again later."
                    .to_string()
            }
        }
    }

    /// `/end-ai-chat`: the invoking channel wins when it is managed,
    /// otherwise the user's channel is looked up by name. Having no channel
    /// is a normal reply.
    pub async fn handle_end_ai_chat(
        &self,
        http: &Http,
        guild_id: GuildId,
        user: &User,
        invoking_channel: Option<&GuildChannel>,
    ) -> String {
        if let Some(channel) = invoking_channel {
            if is_private_chat_channel(&channel.name) {
                return match self.channel_manager.delete_channel(http, channel).await {
                    Ok(()) => "This private AI chat channel has been deleted.".to_string(),
                    Err(e) => {
                        log::error!("{}", e);
                        "Sorry, I couldn't delete this private AI chat channel. Please try again later."
                            .to_string()
                    }
                };
            }
        }

        let channels = match guild_id.channels(http).await {
            Ok(channels) => channels,
            Err(e) => {
                log::error!("Failed to list channels for guild {}: {}", guild_id, e);
                return "Sorry, I couldn't delete your private AI chat channel. Please try again later."
                    .to_string();
            }
        };

        let user_channel = self
            .channel_manager
            .find_user_channel(channels.values(), &user.name);
        match user_channel {
            None => "You don't have an active private AI chat channel.".to_string(),
            Some(channel) => match self.channel_manager.delete_channel(http, channel).await {
                Ok(()) => "Your private AI chat channel has been deleted.".to_string(),
                Err(e) => {
                    log::error!("{}", e);
                    "Sorry, I couldn't delete your private AI chat channel. Please try again later."
                        .to_string()
                }
            },
        }
    }

    /// One-line public acknowledgement before the conversation moves to a
    /// private channel. The user message is truncated so only enough survives
    /// for language detection.
    pub async fn generate_public_response(&self, user_message: &str) -> String {
        let prompt = if user_message.chars().count() > PUBLIC_PROMPT_MAX_CHARS {
            format!("{}...", truncate(user_message, PUBLIC_PROMPT_MAX_CHARS))
        } else {
            user_message.to_string()
        };

        self.generator
            .generate(
                &[Message::user(prompt)],
                Some(PUBLIC_RESPONSE_SYSTEM_PROMPT),
                false,
            )
            .await
    }

    /// Seed answer for a fresh private channel. No web search, same
    /// personality handling as a normal message.
    pub async fn generate_first_message_response(&self, user_id: &str, content: &str) -> String {
        let personality = self.personality(user_id);
        self.generator
            .generate(&[Message::user(content)], personality.as_deref(), false)
            .await
    }

    pub async fn create_private_channel(
        &self,
        http: &Http,
        guild_id: GuildId,
        users: &[User],
        bot_id: Option<UserId>,
        seed_message: Option<&str>,
    ) -> Result<GuildChannel, String> {
        self.channel_manager
            .create_private_channel(http, guild_id, users, bot_id, seed_message)
            .await
    }

    pub async fn rename_channel_with_summary(
        &self,
        http: &Http,
        channel: &GuildChannel,
        bot_id: UserId,
    ) -> Result<String, String> {
        self.channel_manager
            .rename_channel_with_summary(http, channel, &self.summarizer, bot_id)
            .await
    }

    pub async fn cleanup_inactive_channels(&self, http: &Http, guild_id: GuildId) {
        self.channel_manager
            .cleanup_inactive_channels(http, guild_id)
            .await;
    }

    /// Close the persistence handle. A no-op with a warning while other
    /// holders are still alive.
    pub fn shutdown(self: Arc<Self>) {
        let bot = match Arc::try_unwrap(self) {
            Ok(bot) => bot,
            Err(_) => {
                log::warn!("Bot still shared at shutdown, skipping database close");
                return;
            }
        };
        match Arc::try_unwrap(bot.db) {
            Ok(db) => db.close(),
            Err(_) => log::warn!("Database still shared at shutdown, skipping close"),
        }
        log::info!("Bot shut down");
    }
}

fn truncate(s: &str, max_chars: usize) -> String {
    s.chars().take(max_chars).collect()
}

fn preview(s: &str, max_chars: usize) -> String {
    if s.chars().count() > max_chars {
        format!("{}...", truncate(s, max_chars))
    } else {
        s.to_string()
    }
}
