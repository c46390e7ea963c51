use std::sync::Arc;

use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};

use crate::{
    command::{Command, Parser, Prefixes, TrackRef},
    credentials::AuthError,
    player::{FoundTrack, PlayerClient, PlayerError},
    policy::AccessPolicy,
    queue::{EnqueueError, RequestQueue, SongRequest},
    twitch::{Chat, ChatMessage},
};

/// Twitch cuts messages off past this many characters.
const MAX_MESSAGE_LEN: usize = 500;

#[derive(Debug, Clone, Default)]
pub struct Options {
    pub bot_name: Option<String>,
    pub chat_feedback: bool,
    pub prefer_whisper: bool,
    pub add_to_queue: bool,
    pub add_to_playlist: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Reply {
    Public(String),
    /// Whispered to the requester when possible.
    Private(String),
}

fn public(data: impl Into<String>) -> Vec<Reply> {
    vec![Reply::Public(data.into())]
}

/// Joins lines with " | " into as few messages as fit under `max` bytes.
fn pack_lines(lines: Vec<String>, max: usize) -> Vec<String> {
    const SEP: &str = " | ";

    let mut messages: Vec<String> = vec![];
    for line in lines {
        match messages.last_mut() {
            Some(last) if last.len() + SEP.len() + line.len() <= max => {
                last.push_str(SEP);
                last.push_str(&line);
            }
            _ => messages.push(line),
        }
    }
    messages
}

/// Splits the fatal credential failure out of a player result.
fn recoverable<T>(res: Result<T, PlayerError>) -> Result<Result<T, PlayerError>, AuthError> {
    match res {
        Err(PlayerError::Auth(err)) => Err(err),
        res => Ok(res),
    }
}

pub struct Bot {
    parser: Parser,
    prefixes: Prefixes,
    policy: AccessPolicy,
    options: Options,
    player: Arc<PlayerClient>,
    queue: Arc<RequestQueue>,
    chat: Arc<dyn Chat>,
}

impl Bot {
    pub fn new(
        prefixes: Prefixes,
        policy: AccessPolicy,
        options: Options,
        player: Arc<PlayerClient>,
        queue: Arc<RequestQueue>,
        chat: Arc<dyn Chat>,
    ) -> Self {
        Self {
            parser: Parser::new(&prefixes),
            prefixes,
            policy,
            options,
            player,
            queue,
            chat,
        }
    }

    pub async fn process(
        self: Arc<Self>,
        mut events: UnboundedReceiver<ChatMessage>,
        fatal: UnboundedSender<AuthError>,
    ) {
        while let Some(msg) = events.recv().await {
            let bot = Arc::clone(&self);
            let fatal = fatal.clone();
            tokio::spawn(async move {
                if let Err(err) = bot.handle(&msg).await {
                    let _ = fatal.send(err);
                }
            });
        }
    }

    pub async fn handle(&self, msg: &ChatMessage) -> Result<(), AuthError> {
        if msg.is_self {
            return Ok(());
        }

        let command = self.parser.parse(&msg.text);
        if command == Command::NoOp {
            return Ok(());
        }

        let user = msg.sender.name.as_str();
        if !self.policy.admits(&command, msg.sender.is_subscriber) {
            log::info!("{user} is not a subscriber, ignoring {command:?}");
            self.respond(msg, public(AccessPolicy::SUBSCRIBERS_ONLY))
                .await;
            return Ok(());
        }

        let decision = self.policy.authorize(&command, user);
        if !decision.allowed {
            let allowed = decision
                .allow_list
                .map(|list| list.users().collect::<Vec<_>>().join(", "))
                .unwrap_or_default();
            log::warn!("{user} tried {command:?} but only [{allowed}] may");
            return Ok(());
        }

        log::debug!("{user}: {command:?}");
        let replies = self.execute(command, user).await?;
        self.respond(msg, replies).await;
        Ok(())
    }

    async fn execute(&self, command: Command, user: &str) -> Result<Vec<Reply>, AuthError> {
        match command {
            Command::NoOp => Ok(vec![]),
            Command::ShowHelp => Ok(self.help()),
            Command::AddToQueue(track) => self.add(track, user).await,
            Command::ShowCurrentSong => self.current_song().await,
            Command::ShowQueue => Ok(pack_lines(self.queue.render(), MAX_MESSAGE_LEN)
                .into_iter()
                .map(Reply::Private)
                .collect()),
            Command::SkipNext => self.skip().await,
            Command::SetVolume(volume) => self.volume(volume).await,
        }
    }

    fn help(&self) -> Vec<Reply> {
        let prefix = self.prefixes.add.as_deref().unwrap_or_default();
        let mut replies = public(format!(
            "Add a song by author title or with Spotify Track URL, \
             e.g. \"{prefix} Rick Astley - Never Gonna Give You Up\" \
             or \"{prefix} https://open.spotify.com/track/4cOdK2wGLETKBW3PvgPWqT\""
        ));

        let others = [
            &self.prefixes.current_song,
            &self.prefixes.show_queue,
            &self.prefixes.skip,
            &self.prefixes.set_volume,
        ]
        .into_iter()
        .flatten()
        .map(String::as_str)
        .collect::<Vec<_>>();

        if !others.is_empty() {
            replies.push(Reply::Public(format!(
                "Other commands: {}",
                others.join(", ")
            )));
        }
        replies
    }

    async fn add(&self, track: TrackRef, user: &str) -> Result<Vec<Reply>, AuthError> {
        let track = match track {
            TrackRef::InvalidLink(link) => {
                log::warn!("cannot parse a track id from '{link}'");
                return Ok(public(
                    "Fail (invalid message): Unable to parse track ID from message",
                ));
            }

            TrackRef::Id(id) => match recoverable(self.player.track(&id).await)? {
                Ok(track) => track,
                Err(PlayerError::InvalidId) => {
                    return Ok(public("Fail (invalid ID): Link contains an invalid ID"))
                }
                Err(PlayerError::NotFound) => {
                    return Ok(public("Fail: could not find the song."))
                }
                Err(err) => {
                    log::error!("cannot look up track {id}: {err}");
                    return Ok(public("Fail: Error occurred adding track"));
                }
            },

            TrackRef::Search(query) => match recoverable(self.player.search(&query, 1).await)? {
                Ok(tracks) => match tracks.into_iter().next() {
                    Some(track) => track,
                    None => {
                        log::info!("nothing found for query: '{query}'");
                        return Ok(public("Unable to find song :("));
                    }
                },
                Err(err) => {
                    log::error!("cannot search for '{query}': {err}");
                    return Ok(public("Fail: Error occurred adding track"));
                }
            },
        };

        self.enqueue(track, user).await
    }

    async fn enqueue(&self, track: FoundTrack, user: &str) -> Result<Vec<Reply>, AuthError> {
        let name = &track.name;
        let request = SongRequest {
            song_name: name.clone(),
            requested_by: user.to_string(),
        };

        match recoverable(self.queue.try_enqueue(&self.player, request).await)? {
            Ok(Ok(())) => log::info!("{user} requested {name}"),
            Ok(Err(EnqueueError::AlreadyQueued)) => {
                return Ok(public(format!("\"{name}\" is already in the queue")))
            }
            Err(err) => {
                log::error!("cannot check the player before queueing {name}: {err}");
                return Ok(public(format!("Fail: {name} not added to queue")));
            }
        }

        let mut replies = vec![];

        if self.options.add_to_queue {
            match recoverable(self.player.add_to_queue(&track.id).await) {
                Ok(Ok(())) => {
                    log::info!("added {name} to queue");
                    replies.push(Reply::Public(format!("Success: \"{name}\" added to queue")));
                }
                Ok(Err(err)) => {
                    if matches!(err, PlayerError::NotFound) {
                        log::error!(
                            "unable to add song to queue - song may not exist or \
                             the spotify client is not open and active"
                        );
                    } else {
                        log::error!("unable to add song to queue: {err}");
                    }
                    // it will never play, so it must not block the head
                    self.queue.remove(name);
                    replies.push(Reply::Public(format!("Fail: {name} not added to queue")));
                }
                Err(err) => {
                    self.queue.remove(name);
                    return Err(err);
                }
            }
        }

        if self.options.add_to_playlist {
            match recoverable(self.player.add_to_playlist(&track.id).await)? {
                Ok(()) => {
                    log::info!("added {name} to playlist");
                    replies.push(Reply::Public(format!(
                        "Success: \"{name}\" added to playlist"
                    )));
                }
                Err(PlayerError::DuplicateTrack) => {
                    log::info!("{name} is already in the playlist");
                    replies.push(Reply::Public(format!(
                        "Fail (duplicate): {name} already in the playlist"
                    )));
                }
                Err(err) => {
                    log::error!("unable to add {name} to playlist: {err}");
                    replies.push(Reply::Public(format!("Fail: {name} not added to playlist")));
                }
            }
        }

        Ok(replies)
    }

    async fn current_song(&self) -> Result<Vec<Reply>, AuthError> {
        Ok(match recoverable(self.player.current_track().await)? {
            Ok(Some(track)) => public(format!("Current song: {}", track.name)),
            Ok(None) => public("Nothing is playing right now"),
            Err(err) => {
                log::error!("cannot get the current track: {err}");
                public("Fail: unable to get the current song")
            }
        })
    }

    async fn skip(&self) -> Result<Vec<Reply>, AuthError> {
        Ok(match recoverable(self.player.skip_to_next().await)? {
            Ok(()) => public("Skipped to the next song"),
            Err(err) => {
                log::error!("cannot skip track: {err}");
                public("Fail: unable to skip song")
            }
        })
    }

    async fn volume(&self, volume: Option<i64>) -> Result<Vec<Reply>, AuthError> {
        let Some(volume) = volume else {
            return Ok(match recoverable(self.player.volume().await)? {
                Ok(volume) => public(format!("Current volume: {volume}")),
                Err(err) => {
                    log::error!("cannot read volume: {err}");
                    public("Fail: unable to read volume")
                }
            });
        };

        Ok(match recoverable(self.player.set_volume(volume).await)? {
            Ok(applied) => public(format!("Volume set to {applied}")),
            Err(err) => {
                log::error!("cannot set volume: {err}");
                public("Fail: unable to change volume")
            }
        })
    }

    fn is_bot(&self, user: &str) -> bool {
        self.options
            .bot_name
            .as_deref()
            .is_some_and(|bot| bot.eq_ignore_ascii_case(user))
    }

    async fn respond(&self, msg: &ChatMessage, replies: Vec<Reply>) {
        for reply in replies {
            let (data, private) = match reply {
                Reply::Public(data) => (data, false),
                Reply::Private(data) => (data, true),
            };

            if !self.options.chat_feedback {
                log::debug!("feedback is off, not sending: {data}");
                continue;
            }

            let user = &msg.sender.name;
            // twitch won't let us whisper ourselves
            if private && self.options.prefer_whisper && !self.is_bot(user) {
                match self.chat.whisper(user, &data).await {
                    Ok(()) => continue,
                    Err(err) => log::warn!("cannot whisper {user}: {err}"),
                }
            }

            if let Err(err) = self.chat.say(&msg.channel, &data) {
                log::warn!("cannot send to {channel}: {err}", channel = msg.channel);
            }
        }
    }
}
