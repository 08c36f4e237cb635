use std::sync::Arc;

use dotenvy::dotenv;
use rand::thread_rng;
use serenity::client::Context;
use serenity::framework::standard::CommandError;
use serenity::model::channel::ReactionType::Unicode;
use serenity::model::guild::Guild;
use serenity::model::id::UserId;
use serenity::model::prelude::VoiceState;
use serenity::{
    async_trait,
    client::{Client, EventHandler},
    framework::{
        standard::{
            macros::{command, group},
            Args, CommandResult,
        },
        StandardFramework,
    },
    model::{channel::Message, gateway::Ready},
    prelude::GatewayIntents,
    Result as SerenityResult,
};
use songbird::{SerenityInit, Songbird};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::models::{Caller, Invocation};
use crate::music::authority::AuthorityResolver;
use crate::music::commands::{MusicCommand, PlaylistCommand, USAGE};
use crate::music::library::{LibraryStore, SharedLibrary};
use crate::music::paste::HastebinPaste;
use crate::music::resolver::{default_pool_size, SourceResolver};
use crate::music::service::MusicService;
use crate::playlists::YtDlpSource;
use crate::voice::SongbirdVoice;

mod config;
mod fun;
mod models;
mod music;
mod playlists;
mod voice;

struct Handler;

pub struct MusicServiceKey;

impl serenity::prelude::TypeMapKey for MusicServiceKey {
    type Value = Arc<MusicService>;
}

pub struct OwnerKey;

impl serenity::prelude::TypeMapKey for OwnerKey {
    type Value = Option<UserId>;
}

pub struct BotDataMap;

pub struct BotData {
    pub id: u64,
}

impl serenity::prelude::TypeMapKey for BotDataMap {
    type Value = BotData;
}

#[async_trait]
impl EventHandler for Handler {
    async fn ready(&self, ctx: Context, ready: Ready) {
        info!("{} is connected!", ready.user.name);
        let bot_data = BotData { id: ready.user.id.0 };
        let data = &mut ctx.data.write().await;
        data.insert::<BotDataMap>(bot_data);
    }

    async fn voice_state_update(&self, ctx: Context, _: Option<VoiceState>, new: VoiceState) {
        if new.channel_id.is_some() {
            return;
        }

        let (bot_id, service) = {
            let data = ctx.data.read().await;
            (
                data.get::<BotDataMap>().map(|data| data.id),
                data.get::<MusicServiceKey>().cloned(),
            )
        };

        if let (Some(bot_id), Some(guild_id), Some(service)) = (bot_id, new.guild_id, service) {
            if bot_id == new.user_id.0 {
                info!("Bot was disconnected from voice in guild {}", guild_id.0);
                service.disconnected(guild_id).await;
            }
        }
    }
}

#[group]
#[commands(music, roll, flip, about, help)]
struct General;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    if dotenv().is_err() {
        info!(".env file not found, using the process environment");
    }

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(why) => {
            error!("Invalid configuration: {why}");
            return;
        }
    };

    let store = LibraryStore::new(config.library_path.clone());
    let library = match store.load().await {
        Ok(library) => library,
        Err(why) => {
            error!("Could not load the music library: {why}");
            return;
        }
    };
    info!("Loaded {} library entries from {}", library.len(), config.library_path.display());

    let songbird = Songbird::serenity();
    let service = MusicService::new(
        config.default_volume,
        Arc::new(SharedLibrary::new(library, Some(store))),
        SourceResolver::new(
            Arc::new(YtDlpSource::new()),
            default_pool_size(),
            config.resolve_timeout,
        ),
        AuthorityResolver::new(config.dj_users.clone(), config.dj_roles.clone()),
        Arc::new(HastebinPaste::new(config.paste_url.clone())),
        Arc::new(SongbirdVoice::new(songbird.clone())),
    );

    let prefix = config.prefix.clone();
    let framework = StandardFramework::new()
        .configure(|c| c.prefix(prefix))
        .group(&GENERAL_GROUP);

    let intents = GatewayIntents::non_privileged()
        | GatewayIntents::MESSAGE_CONTENT;

    let mut client = match Client::builder(&config.token, intents)
        .event_handler(Handler)
        .framework(framework)
        .register_songbird_with(songbird)
        .await
    {
        Ok(client) => client,
        Err(why) => {
            error!("Err creating client: {why:?}");
            return;
        }
    };

    {
        let mut w = client.data.write().await;
        w.insert::<MusicServiceKey>(Arc::new(service));
        w.insert::<OwnerKey>(config.owner);
    }

    let shard_manager = client.shard_manager.clone();

    tokio::spawn(async move {
        let _ = client.start().await.map_err(|why| info!("Client ended: {why:?}"));
    });

    if let Err(why) = tokio::signal::ctrl_c().await {
        error!("Control-C interruption failed: {why}");
    }

    info!("Received Ctrl-C, shutting down.");
    shard_manager.lock().await.shutdown_all().await;
}

#[command]
#[only_in(guilds)]
async fn music(ctx: &Context, msg: &Message, args: Args) -> CommandResult {
    let command = match MusicCommand::parse(args.rest()) {
        Ok(command) => command,
        Err(why) => {
            check_msg(msg.channel_id.say(&ctx.http, why.to_string()).await);
            return Ok(());
        }
    };

    let (service, bot_id) = {
        let data = ctx.data.read().await;
        let service = data
            .get::<MusicServiceKey>()
            .cloned()
            .ok_or(CommandError::from("Music service not initialised"))?;

        (service, data.get::<BotDataMap>().map(|data| UserId(data.id)))
    };

    let invocation = invocation(&get_guild(ctx, msg)?, msg, bot_id);

    let resolving = matches!(
        command,
        MusicCommand::Play(Some(_))
            | MusicCommand::Add(_)
            | MusicCommand::Playlist(PlaylistCommand::Load(_))
    );

    let result = if resolving {
        with_reaction(ctx, msg, bot_id, service.execute(&invocation, command)).await
    } else {
        service.execute(&invocation, command).await
    };

    let reply = match result {
        Ok(reply) => reply,
        Err(why) => {
            info!("Music command failed in guild {}: {why}", invocation.guild.0);
            why.to_string()
        }
    };

    check_msg(msg.channel_id.say(&ctx.http, reply).await);

    Ok(())
}

#[command]
async fn roll(ctx: &Context, msg: &Message, args: Args) -> CommandResult {
    let reply = match fun::faces(args.current()) {
        Ok(faces) => {
            let value = fun::roll(&mut thread_rng(), faces);
            format!("🎲 <@{}> rolled **{value}** (d{faces})", msg.author.id.0)
        }
        Err(why) => why.to_string(),
    };

    check_msg(msg.channel_id.say(&ctx.http, reply).await);

    Ok(())
}

#[command]
#[aliases("coin")]
async fn flip(ctx: &Context, msg: &Message) -> CommandResult {
    let side = fun::flip(&mut thread_rng());

    check_msg(msg.channel_id.say(&ctx.http, format!("🪙 **{side}**")).await);

    Ok(())
}

#[command]
async fn about(ctx: &Context, msg: &Message) -> CommandResult {
    let owner = ctx.data.read().await.get::<OwnerKey>().copied().flatten();

    check_msg(msg.channel_id.say(&ctx.http, fun::about(owner)).await);

    Ok(())
}

#[command]
async fn help(ctx: &Context, msg: &Message) -> CommandResult {
    let message = format!(
        r#"
**Commands:**
    **music join** - Joins your voice channel.
    **music leave** - Leaves the voice channel and drops the queue.
    **music play [URL|Title|INDEX]** - Plays a track (or a library entry by index), or restarts the stopped queue.
    **music add [URL|Title]** - Adds a track or a youtube playlist to the queue.
    **music library** - Lists every track ever played here.
    **music dj** - Shows the current DJ, the one who queued the playing track.
    **music volume [0.0-1.0]** - Shows or sets the volume.
    **music now** - Shows the queue.
    **music skip** - Skips the track (DJ) or votes to skip it.
    **music clear** - Drops the queue (DJ).
    **music shuffle [on|off]** - Plays the queue in random order (DJ).
    **music repeat [on|off]** - Puts finished tracks back at the end of the queue.
    **music pause** / **music resume** / **music stop** - Controls playback (DJ).
    **music playlist load [URL]** / **music playlist library** - Queues a whole playlist or the library.
    **roll [FACES]** - Rolls a die.
    **flip** - Flips a coin.
    **about** - Who made this bot.

`{USAGE}`
    "#
    );

    check_msg(msg.channel_id.say(&ctx.http, message).await);

    Ok(())
}

/// Marks a slow command with ⏳ while it runs, then 👍 or 💀.
/// Reaction failures are only logged; the command runs and replies regardless.
async fn with_reaction<F, T, E>(
    ctx: &Context,
    msg: &Message,
    bot_id: Option<UserId>,
    work: F,
) -> Result<T, E>
where
    F: std::future::Future<Output = Result<T, E>>,
{
    let loading_emoji = Unicode("⏳".to_string());

    check_reaction(msg.react(&ctx.http, loading_emoji.clone()).await.map(|_| ()));

    let result = work.await;

    if let Some(bot_id) = bot_id {
        check_reaction(
            msg.channel_id
                .delete_reaction(&ctx.http, msg.id, Some(bot_id), loading_emoji)
                .await,
        );
    }

    let answer_emoji = match result {
        Ok(_) => "👍",
        Err(_) => "💀",
    };

    check_reaction(msg.react(&ctx.http, Unicode(answer_emoji.to_string())).await.map(|_| ()));

    result
}

/// Who is asking, from where, and how many people are listening with the bot.
fn invocation(guild: &Guild, msg: &Message, bot_id: Option<UserId>) -> Invocation {
    let voice_channel = guild
        .voice_states
        .get(&msg.author.id)
        .and_then(|voice_state| voice_state.channel_id);

    let bot_channel = bot_id
        .and_then(|id| guild.voice_states.get(&id))
        .and_then(|voice_state| voice_state.channel_id);

    let listeners = match bot_channel.or(voice_channel) {
        Some(channel) => guild
            .voice_states
            .values()
            .filter(|voice_state| voice_state.channel_id == Some(channel))
            .filter(|voice_state| Some(voice_state.user_id) != bot_id)
            .filter(|voice_state| {
                !voice_state.member.as_ref().map_or(false, |member| member.user.bot)
            })
            .count(),
        None => 0,
    };

    let roles = msg
        .member
        .as_ref()
        .map(|member| member.roles.clone())
        .or_else(|| guild.members.get(&msg.author.id).map(|member| member.roles.clone()))
        .unwrap_or_default();

    Invocation {
        guild: guild.id,
        caller: Caller {
            id: msg.author.id,
            roles,
        },
        voice_channel,
        listeners,
    }
}

/// Checks that a message successfully sent; if not, then logs why to stdout.
fn check_msg(result: SerenityResult<Message>) {
    if let Err(why) = result {
        info!("Error sending message: {why:?}");
    }
}

fn check_reaction(result: SerenityResult<()>) {
    if let Err(why) = result {
        info!("Error updating reaction: {why:?}");
    }
}

fn get_guild(ctx: &Context, msg: &Message) -> CommandResult<Guild> {
    msg.guild(&ctx.cache).ok_or(CommandError::from("Guild not found"))
}
