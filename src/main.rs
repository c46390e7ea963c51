#![cfg_attr(debug_assertions, allow(dead_code, unused_variables,))]
use std::sync::Arc;

use tokio::sync::mpsc::unbounded_channel;

mod auth_server;
mod bot;
mod command;
mod config;
mod credentials;
mod player;
mod policy;
mod queue;
mod spotify;
mod twitch;

use crate::{
    config::Config,
    credentials::{CredentialStore, JsonFile, SystemClock},
    player::PlayerClient,
    queue::RequestQueue,
    spotify::{SpotifyAuth, SpotifyPlayer},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env_dir = config::find_env_dir(&std::env::current_dir()?)?;
    simple_env_load::load_env_from(config::ENV_FILES.map(|file| env_dir.join(file)));
    alto_logger::init_term_logger().expect("init logger");
    log::info!("loaded env from {dir}", dir = env_dir.display());

    let config = Config::from_env()?;

    let credentials = Arc::new(CredentialStore::load(
        Arc::new(JsonFile::new(credentials::CREDENTIAL_FILE)),
        Arc::new(SpotifyAuth::new(&config.spotify)),
        Arc::new(SystemClock),
    ));

    if credentials.is_authorized().await {
        log::info!("spotify credentials found");
    } else {
        log::info!("no credentials found, performing new authorization");
        log::info!("open the following link and give this app permissions");
        log::info!("{url}", url = credentials.authorize_url()?);
        let code = auth_server::wait_for_code(config.auth_server_port).await?;
        credentials.authorize(&code).await?;
    }

    let player = Arc::new(PlayerClient::new(
        credentials,
        Arc::new(SpotifyPlayer::new(&config.spotify)),
        config.playlist_id.clone(),
    ));
    let queue = Arc::new(RequestQueue::default());

    let (fatal_tx, mut fatal) = unbounded_channel();
    let (events_tx, events) = unbounded_channel();
    let (writer, writer_rx) = unbounded_channel();

    let writer = twitch::Writer::new(writer);

    tokio::spawn({
        let config = config.twitch();
        async move { twitch::connect(config, events_tx, writer_rx).await }
    });

    tokio::spawn(queue::run_reconciler(
        queue.clone(),
        player.clone(),
        config.reconcile_interval,
        fatal_tx.clone(),
    ));

    let bot = bot::Bot::new(
        config.prefixes,
        config.policy,
        bot::Options {
            bot_name: config.bot_name,
            chat_feedback: config.chat_feedback,
            prefer_whisper: config.prefer_whisper,
            add_to_queue: config.add_to_queue,
            add_to_playlist: config.add_to_playlist,
        },
        player,
        queue,
        Arc::new(writer),
    );
    tokio::spawn(Arc::new(bot).process(events, fatal_tx));

    log::info!("listening to {channel}'s chat", channel = config.channel);

    match fatal.recv().await {
        Some(err) => {
            log::error!("spotify authorization failed: {err}");
            Err(err.into())
        }
        None => anyhow::bail!("chat connection closed"),
    }
}
