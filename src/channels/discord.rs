use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use tokio::task::JoinHandle;

use serenity::all::{
    Channel, ChannelId, Client, Command, CommandDataOptionValue, CommandInteraction,
    CommandOptionType, Context, CreateCommand, CreateCommandOption, CreateInteractionResponse,
    CreateInteractionResponseMessage, EventHandler, GatewayIntents, GetMessages, GuildChannel,
    GuildId, Http, Interaction, Message, Ready, UserId,
};

use crate::ai::Message as Turn;
use crate::bot::channel_manager::{is_private_chat_channel, should_rename};
use crate::bot::{Bot, IncomingAttachment, FIRST_MESSAGE_FALLBACK, HISTORY_LIMIT};

const DISCORD_MESSAGE_LIMIT: usize = 2000;
const TYPING_INTERVAL_SECS: u64 = 8;

struct DiscordHandler {
    bot: Arc<Bot>,
    cleanup_interval: Duration,
    bot_id: OnceLock<UserId>,
    // Held so the listener can stop the sweep and release its bot handle
    // during shutdown.
    cleanup_task: Mutex<Option<JoinHandle<()>>>,
}

#[serenity::async_trait]
impl EventHandler for DiscordHandler {
    async fn ready(&self, ctx: Context, ready: Ready) {
        log::info!("Discord: Bot connected as {}", ready.user.name);
        let _ = self.bot_id.set(ready.user.id);

        let commands = vec![
            CreateCommand::new("personality")
                .description("Set your custom personality for the AI bot")
                .add_option(
                    CreateCommandOption::new(
                        CommandOptionType::String,
                        "text",
                        "The personality text (e.g., 'You are a sarcastic assistant who is secretly a cat.')",
                    )
                    .required(false),
                ),
            CreateCommand::new("start-ai-chat")
                .description("Create a private AI chat channel for you"),
            CreateCommand::new("end-ai-chat").description("Delete your private AI chat channel"),
        ];
        if let Err(e) = Command::set_global_commands(&ctx.http, commands).await {
            log::error!("Discord: Failed to register slash commands: {}", e);
        }

        // Ready may fire again on reconnect; the sweep task is spawned once.
        let mut slot = self.cleanup_task.lock().unwrap();
        if slot.is_none() {
            let bot = self.bot.clone();
            let http = ctx.http.clone();
            let guild_ids: Vec<GuildId> = ready.guilds.iter().map(|g| g.id).collect();
            let interval = self.cleanup_interval;
            *slot = Some(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                // The first tick fires immediately; skip it so a fresh start
                // doesn't sweep before anything could go stale.
                ticker.tick().await;
                loop {
                    ticker.tick().await;
                    log::info!("Running periodic channel cleanup task");
                    for guild_id in &guild_ids {
                        bot.cleanup_inactive_channels(&http, *guild_id).await;
                    }
                    log::info!("Channel cleanup task completed");
                }
            }));
        }
    }

    async fn message(&self, ctx: Context, msg: Message) {
        if msg.author.bot {
            return;
        }
        let Some(bot_id) = self.bot_id.get().copied() else {
            return;
        };
        let Some(guild_id) = msg.guild_id else {
            return;
        };

        let channel = match msg.channel_id.to_channel(&ctx.http).await {
            Ok(Channel::Guild(channel)) => channel,
            Ok(_) => return,
            Err(e) => {
                log::error!("Discord: Failed to resolve channel {}: {}", msg.channel_id, e);
                return;
            }
        };

        if is_private_chat_channel(&channel.name) {
            self.handle_private_channel_message(&ctx, &msg, &channel, bot_id)
                .await;
        } else if msg.mentions.iter().any(|u| u.id == bot_id) {
            self.handle_public_mention(&ctx, &msg, guild_id, bot_id).await;
        }
    }

    async fn interaction_create(&self, ctx: Context, interaction: Interaction) {
        if let Interaction::Command(command) = interaction {
            self.handle_command(&ctx, command).await;
        }
    }
}

impl DiscordHandler {
    /// Messages inside a managed channel: typing indicator while generating,
    /// platform history as context, reply split at the message limit, then
    /// the rename check.
    async fn handle_private_channel_message(
        &self,
        ctx: &Context,
        msg: &Message,
        channel: &GuildChannel,
        bot_id: UserId,
    ) {
        log::info!("Discord: Processing message in private channel: {}", channel.name);

        let typing = spawn_typing_task(ctx.http.clone(), msg.channel_id);

        let fetched = msg
            .channel_id
            .messages(&ctx.http, GetMessages::new().limit(HISTORY_LIMIT as u8))
            .await;

        let (history, fetched_count) = match &fetched {
            Ok(messages) => {
                // Newest-first from the API; drop other bots, keep our own
                // replies as assistant turns, reverse to chronological.
                let mut turns: Vec<Turn> = messages
                    .iter()
                    .filter(|m| !m.author.bot || m.author.id == bot_id)
                    .map(|m| {
                        if m.author.id == bot_id {
                            Turn::assistant(m.content.clone())
                        } else {
                            Turn::user(m.content.clone())
                        }
                    })
                    .collect();
                turns.reverse();
                (Some(turns), messages.len())
            }
            Err(e) => {
                log::error!("Discord: Failed to fetch message history: {}", e);
                (None, 0)
            }
        };

        let attachments: Vec<IncomingAttachment> = msg
            .attachments
            .iter()
            .map(|a| IncomingAttachment {
                url: a.url.clone(),
                content_type: a.content_type.clone(),
            })
            .collect();

        let response = self
            .bot
            .handle_message(&msg.author.id.to_string(), &msg.content, history, &attachments)
            .await;
        typing.abort();

        for chunk in split_message(&response, DISCORD_MESSAGE_LIMIT) {
            if let Err(e) = msg.channel_id.say(&ctx.http, &chunk).await {
                log::error!("Discord: Failed to send response: {}", e);
            }
        }

        if should_rename(&channel.name, fetched_count) {
            if let Err(e) = self
                .bot
                .rename_channel_with_summary(&ctx.http, channel, bot_id)
                .await
            {
                log::error!("Discord: Channel rename failed: {}", e);
            }
        }
    }

    /// A mention in a public channel moves the conversation to a fresh
    /// private channel seeded with the triggering message.
    async fn handle_public_mention(
        &self,
        ctx: &Context,
        msg: &Message,
        guild_id: GuildId,
        bot_id: UserId,
    ) {
        log::info!("Discord: Bot mentioned in public channel by {}", msg.author.name);

        // Everyone mentioned joins the channel; the author always does.
        let mut users: Vec<_> = msg
            .mentions
            .iter()
            .filter(|u| u.id != bot_id)
            .cloned()
            .collect();
        if !users.iter().any(|u| u.id == msg.author.id) {
            users.insert(0, msg.author.clone());
        }

        let channel = match self
            .bot
            .create_private_channel(&ctx.http, guild_id, &users, Some(bot_id), Some(&msg.content))
            .await
        {
            Ok(channel) => channel,
            Err(e) => {
                log::error!("Discord: Error creating private channel: {}", e);
                let reply = format!(
                    "<@{}> Sorry, I couldn't create a private channel for our conversation. Please try again later.",
                    msg.author.id
                );
                if let Err(e) = msg.reply(&ctx.http, reply).await {
                    log::error!("Discord: Failed to send failure reply: {}", e);
                }
                return;
            }
        };

        let public_response = self.bot.generate_public_response(&msg.content).await;
        let reply = format!("<@{}> {} <#{}>", msg.author.id, public_response, channel.id);
        if let Err(e) = msg.reply(&ctx.http, reply).await {
            log::error!("Discord: Failed to send public reply: {}", e);
        }

        // Answer the seeded question from a detached task so the public
        // reply is not delayed.
        let bot = self.bot.clone();
        let http = ctx.http.clone();
        let user_id = msg.author.id.to_string();
        let content = msg.content.clone();
        let channel_id = channel.id;
        tokio::spawn(async move {
            let response = bot.generate_first_message_response(&user_id, &content).await;
            if let Err(e) = channel_id.say(&http, response).await {
                log::error!("Discord: Error sending first message response: {}", e);
                if let Err(e) = channel_id.say(&http, FIRST_MESSAGE_FALLBACK).await {
                    log::error!("Discord: Failed to send fallback greeting: {}", e);
                }
            }
        });
    }

    async fn handle_command(&self, ctx: &Context, command: CommandInteraction) {
        log::info!(
            "Discord: Received command: {} from user: {}",
            command.data.name,
            command.user.name
        );

        let response = match command.data.name.as_str() {
            "personality" => {
                let text = command.data.options.iter().find_map(|o| {
                    if o.name == "text" {
                        match &o.value {
                            CommandDataOptionValue::String(s) => Some(s.as_str()),
                            _ => None,
                        }
                    } else {
                        None
                    }
                });
                self.bot
                    .handle_personality_command(&command.user.id.to_string(), text)
            }
            "start-ai-chat" => match command.guild_id {
                Some(guild_id) => {
                    self.bot
                        .handle_start_ai_chat(
                            &ctx.http,
                            guild_id,
                            &command.user,
                            self.bot_id.get().copied(),
                        )
                        .await
                }
                None => "This command can only be used in a server.".to_string(),
            },
            "end-ai-chat" => match command.guild_id {
                Some(guild_id) => {
                    let invoking = match command.channel_id.to_channel(&ctx.http).await {
                        Ok(Channel::Guild(channel)) => Some(channel),
                        _ => None,
                    };
                    self.bot
                        .handle_end_ai_chat(&ctx.http, guild_id, &command.user, invoking.as_ref())
                        .await
                }
                None => "This command can only be used in a server.".to_string(),
            },
            _ => return,
        };

        let message = CreateInteractionResponseMessage::new()
            .content(response)
            .ephemeral(true);
        if let Err(e) = command
            .create_response(&ctx.http, CreateInteractionResponse::Message(message))
            .await
        {
            // Expected when end-ai-chat deleted the invoking channel.
            log::info!(
                "Discord: Could not respond to {} command: {}",
                command.data.name,
                e
            );
        }
    }
}

/// Keep the typing indicator alive while a response is being generated.
/// Discord drops it after 10 seconds, so refresh every 8. The caller aborts
/// the task once the reply is ready.
fn spawn_typing_task(http: Arc<Http>, channel_id: ChannelId) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            if let Err(e) = channel_id.broadcast_typing(&http).await {
                log::error!("Discord: Failed to send typing indicator: {}", e);
                return;
            }
            tokio::time::sleep(Duration::from_secs(TYPING_INTERVAL_SECS)).await;
        }
    })
}

/// Split a message into chunks respecting Discord's character limit
fn split_message(text: &str, max_len: usize) -> Vec<String> {
    if text.len() <= max_len {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut current = String::new();

    for line in text.lines() {
        if current.len() + line.len() + 1 > max_len {
            if !current.is_empty() {
                chunks.push(current);
                current = String::new();
            }
            // If single line is too long, split it
            if line.len() > max_len {
                let mut remaining = line;
                while remaining.len() > max_len {
                    // max_len may land inside a multi-byte character; back
                    // off to the nearest boundary.
                    let mut split_at = max_len;
                    while !remaining.is_char_boundary(split_at) {
                        split_at -= 1;
                    }
                    chunks.push(remaining[..split_at].to_string());
                    remaining = &remaining[split_at..];
                }
                if !remaining.is_empty() {
                    current = remaining.to_string();
                }
            } else {
                current = line.to_string();
            }
        } else {
            if !current.is_empty() {
                current.push('\n');
            }
            current.push_str(line);
        }
    }

    if !current.is_empty() {
        chunks.push(current);
    }

    chunks
}

/// Run the Discord listener until ctrl-c or a client error.
pub async fn start_discord_listener(
    bot_token: &str,
    cleanup_interval_secs: u64,
    bot: Arc<Bot>,
) -> Result<(), String> {
    let intents = GatewayIntents::GUILDS
        | GatewayIntents::GUILD_MESSAGES
        | GatewayIntents::DIRECT_MESSAGES
        | GatewayIntents::MESSAGE_CONTENT;

    let handler = Arc::new(DiscordHandler {
        bot,
        cleanup_interval: Duration::from_secs(cleanup_interval_secs),
        bot_id: OnceLock::new(),
        cleanup_task: Mutex::new(None),
    });

    let mut client = Client::builder(bot_token, intents)
        .event_handler_arc(handler.clone())
        .await
        .map_err(|e| format!("Failed to create Discord client: {}", e))?;

    log::info!("Discord: Client created successfully");

    let shard_manager = client.shard_manager.clone();

    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            if let Err(e) = signal {
                log::error!("Failed to listen for shutdown signal: {}", e);
            }
            log::info!("Shutting down...");
            shard_manager.shutdown_all().await;
        }
        result = client.start() => {
            match result {
                Ok(()) => log::info!("Discord listener stopped"),
                Err(e) => {
                    stop_cleanup_task(&handler).await;
                    return Err(format!("Discord client error: {}", e));
                }
            }
        }
    }

    // Stop the sweep and wait for it to unwind so no bot handle outlives
    // this function; the caller can then close the database.
    stop_cleanup_task(&handler).await;

    Ok(())
}

async fn stop_cleanup_task(handler: &DiscordHandler) {
    let task = handler.cleanup_task.lock().unwrap().take();
    if let Some(task) = task {
        task.abort();
        let _ = task.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_messages_stay_whole() {
        assert_eq!(split_message("hello", 2000), vec!["hello".to_string()]);
    }

    #[test]
    fn long_messages_split_on_line_boundaries() {
        let text = format!("{}\n{}", "a".repeat(1500), "b".repeat(1500));
        let chunks = split_message(&text, 2000);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0], "a".repeat(1500));
        assert_eq!(chunks[1], "b".repeat(1500));
    }

    #[test]
    fn multibyte_text_splits_on_char_boundaries() {
        // 3000 bytes of 3-byte characters with no newlines.
        let text = "あ".repeat(1000);
        let chunks = split_message(&text, 2000);
        assert!(chunks.iter().all(|c| c.len() <= 2000));
        assert_eq!(chunks.concat(), text);
        // 2000 is not a boundary for 3-byte characters; the first chunk
        // backs off to 1998.
        assert_eq!(chunks[0].len(), 1998);
    }

    #[test]
    fn oversized_single_line_is_hard_split() {
        let text = "a".repeat(4500);
        let chunks = split_message(&text, 2000);
        assert_eq!(chunks.len(), 3);
        assert!(chunks.iter().all(|c| c.len() <= 2000));
        assert_eq!(chunks.concat(), text);
    }
}
