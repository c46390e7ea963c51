use std::{collections::VecDeque, time::Duration};

use tokio::{
    io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader},
    sync::{
        mpsc::{UnboundedReceiver, UnboundedSender},
        oneshot,
    },
};
use twitch_message::{
    encode::{join, ping, pong, privmsg, register, ALL_CAPABILITIES},
    messages::{Privmsg, TwitchMessage},
    ParseResult,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sender {
    pub name: String,
    pub is_subscriber: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub channel: String,
    pub sender: Sender,
    pub text: String,
    pub is_self: bool,
}

impl ChatMessage {
    fn from_privmsg(msg: &Privmsg<'_>) -> Self {
        let is_subscriber = msg.tags.get("subscriber").is_some_and(|s| s == "1")
            || msg.tags.get("badges").is_some_and(|badges| {
                badges
                    .split(',')
                    .any(|b| b.starts_with("subscriber/") || b.starts_with("founder/"))
            });

        Self {
            channel: msg.channel.to_string(),
            sender: Sender {
                name: msg.sender.to_string(),
                is_subscriber,
            },
            text: msg.data.to_string(),
            // twitch never echoes our own PRIVMSGs back to this connection
            is_self: false,
        }
    }
}

/// How long a whisper waits for the server to reject it before it counts as sent.
const WHISPER_GRACE: Duration = Duration::from_secs(3);

/// The outbound half of the chat connection.
#[async_trait::async_trait]
pub trait Chat: Send + Sync {
    fn say(&self, channel: &str, data: &str) -> anyhow::Result<()>;
    /// Resolves to an error if the server refuses the whisper.
    async fn whisper(&self, user: &str, data: &str) -> anyhow::Result<()>;
}

pub struct Config {
    pub name: Option<String>,
    pub pass: Option<String>,
    pub channel: String,
}

#[derive(Clone)]
pub struct Writer {
    sender: UnboundedSender<WriteKind>,
}

impl Writer {
    pub const fn new(sender: UnboundedSender<WriteKind>) -> Self {
        Self { sender }
    }
}

#[async_trait::async_trait]
impl Chat for Writer {
    fn say(&self, channel: &str, data: &str) -> anyhow::Result<()> {
        self.sender
            .send(WriteKind::Say {
                channel: channel.to_string(),
                data: data.to_string(),
            })
            .map_err(|_| anyhow::anyhow!("chat connection is gone"))
    }

    async fn whisper(&self, user: &str, data: &str) -> anyhow::Result<()> {
        let (result, rx) = oneshot::channel();
        self.sender
            .send(WriteKind::Whisper {
                user: user.to_string(),
                data: data.to_string(),
                result,
            })
            .map_err(|_| anyhow::anyhow!("chat connection is gone"))?;

        match tokio::time::timeout(WHISPER_GRACE, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(..)) => anyhow::bail!("chat connection dropped the whisper"),
            Err(..) => Ok(()),
        }
    }
}

pub enum WriteKind {
    Say {
        channel: String,
        data: String,
    },
    Whisper {
        user: String,
        data: String,
        result: oneshot::Sender<anyhow::Result<()>>,
    },
}

/// NOTICE ids twitch answers a refused whisper with.
fn is_whisper_rejection(msg_id: &str) -> bool {
    msg_id.starts_with("whisper_") || matches!(msg_id, "unrecognized_cmd" | "no_permission")
}

/// Whispers written to the connection that are still waiting for a verdict, oldest first.
#[derive(Default)]
struct PendingWhispers {
    queue: VecDeque<oneshot::Sender<anyhow::Result<()>>>,
}

impl PendingWhispers {
    fn push(&mut self, result: oneshot::Sender<anyhow::Result<()>>) {
        self.queue.retain(|pending| !pending.is_closed());
        self.queue.push_back(result);
    }

    /// Fails the oldest whisper whose sender is still listening.
    fn reject(&mut self, reason: &str) -> bool {
        while let Some(pending) = self.queue.pop_front() {
            if pending
                .send(Err(anyhow::anyhow!("whisper refused: {reason}")))
                .is_ok()
            {
                return true;
            }
        }
        false
    }
}

fn anonymous_name() -> String {
    format!("justinfan{}", fastrand::u32(10_000..100_000))
}

pub async fn connect(
    config: Config,
    events: UnboundedSender<ChatMessage>,
    mut writer: UnboundedReceiver<WriteKind>,
) {
    let mut success = false;
    'outer: loop {
        if success {
            tokio::time::sleep(std::time::Duration::from_secs(10)).await;
        }
        success = true;

        log::info!("connecting to Twitch");
        let mut stream =
            match tokio::net::TcpStream::connect(twitch_message::TWITCH_IRC_ADDRESS).await {
                Ok(stream) => stream,
                Err(err) => {
                    log::warn!("cannot connect: {err}");
                    continue;
                }
            };

        let anonymous;
        let register = match (&config.name, &config.pass) {
            (Some(name), Some(pass)) => register(name, pass, ALL_CAPABILITIES),
            _ => {
                anonymous = anonymous_name();
                register(&anonymous, "anonymous", ALL_CAPABILITIES)
            }
        };

        if !write_all(&mut stream, register.to_string()).await {
            log::warn!("cannot register");
            continue;
        }

        let (read, mut write) = stream.split();

        let mut lines = BufReader::new(read).lines();

        #[derive(Default)]
        enum PingTimeout {
            Waiting {
                token: String,
            },
            #[default]
            Nothing,
        }

        let mut timeout = PingTimeout::default();
        let mut whispers = PendingWhispers::default();

        'inner: loop {
            let next = tokio::time::timeout(Duration::from_secs(60), async {
                tokio::select! {
                    line = lines.next_line() => Either::Line(line),
                    kind = writer.recv() => Either::Write(kind),
                }
            });

            let ready = match next.await {
                Ok(ready) => ready,
                Err(..) if matches!(timeout, PingTimeout::Waiting { .. }) => {
                    log::warn!("timed out, and no ping waiting");
                    continue 'outer;
                }
                Err(..) => {
                    let token = std::iter::repeat_with(fastrand::alphanumeric)
                        .take(10)
                        .collect::<String>();

                    timeout = PingTimeout::Waiting {
                        token: token.clone(),
                    };

                    let ping = ping(&token);
                    if write_all(&mut write, ping.to_string()).await {
                        continue 'inner;
                    } else {
                        continue 'outer;
                    }
                }
            };

            match ready {
                Either::Line(Ok(Some(line))) => {
                    let message = match twitch_message::parse(&line) {
                        Ok(ParseResult { message, .. }) => message,
                        Err(err) => {
                            log::warn!(
                                "cannot parse message: '{line}': {err}",
                                line = line.escape_debug()
                            );
                            continue 'outer;
                        }
                    };

                    match message.as_enum() {
                        TwitchMessage::Privmsg(msg) => {
                            let msg = ChatMessage::from_privmsg(&msg);
                            if events.send(msg).is_err() {
                                break 'outer;
                            }
                        }

                        TwitchMessage::Ping(msg) => {
                            let msg = pong(&msg.token);
                            if !write_all(&mut write, msg.to_string()).await {
                                continue 'outer;
                            }
                        }

                        TwitchMessage::Pong(pong) => match &timeout {
                            PingTimeout::Waiting { token } if token == &pong.token => {
                                let _ = std::mem::take(&mut timeout);
                            }
                            PingTimeout::Waiting { .. } => {
                                continue 'outer;
                            }
                            PingTimeout::Nothing => {}
                        },

                        TwitchMessage::Notice(notice) => {
                            let msg_id = notice.tags.get("msg-id").unwrap_or_default();
                            if is_whisper_rejection(msg_id) && whispers.reject(msg_id) {
                                log::warn!("whisper was refused: {msg_id}");
                            } else {
                                log::debug!("notice: {msg_id}");
                            }
                        }

                        TwitchMessage::Ready(ready) => {
                            log::info!("IRC is ready as {name}", name = ready.name);
                            // anonymous logins never get a GLOBALUSERSTATE
                            if config.name.is_none() {
                                if !write_all(&mut write, join(&config.channel).to_string()).await
                                {
                                    continue 'outer;
                                }
                                log::info!("joined {channel} (read-only)", channel = config.channel);
                            }
                        }

                        TwitchMessage::GlobalUserState(..) => {
                            log::info!("Twitch is ready");
                            log::debug!("joining: {channel}", channel = config.channel);
                            if !write_all(&mut write, join(&config.channel).to_string()).await {
                                continue 'outer;
                            }
                        }
                        _ => {}
                    }
                }

                Either::Write(Some(kind)) => {
                    let data = match kind {
                        WriteKind::Say { channel, data } => {
                            privmsg(&channel, &data).to_string() //
                        }
                        WriteKind::Whisper { user, data, result } => {
                            whispers.push(result);
                            privmsg(&config.channel, &format!("/w {user} {data}")).to_string()
                        }
                    };

                    if !write_all(&mut write, data).await {
                        log::warn!("cannot write");
                        continue 'outer;
                    }
                }

                Either::Line(..) => continue 'outer,
                Either::Write(..) => break 'outer,
            }
        }
    }
}

enum Either<L, W> {
    Line(L),
    Write(W),
}

async fn write_all(
    stream: &mut (impl AsyncWrite + Unpin + Send + Sync),
    data: impl AsRef<[u8]> + Send + Sync,
) -> bool {
    if stream.write_all(data.as_ref()).await.is_ok() {
        return stream.flush().await.is_ok();
    }
    false
}

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc::unbounded_channel;

    use super::*;

    fn chat_message(line: &str) -> ChatMessage {
        let ParseResult { message, .. } = twitch_message::parse(line).unwrap();
        match message.as_enum() {
            TwitchMessage::Privmsg(msg) => ChatMessage::from_privmsg(&msg),
            _ => panic!("not a privmsg: {line}"),
        }
    }

    #[test]
    fn subscribers_are_detected() {
        let msg = chat_message(
            "@badges=;subscriber=1 :alice!alice@alice.tmi.twitch.tv PRIVMSG #museun :!queue rick",
        );
        assert_eq!(msg.sender.name, "alice");
        assert_eq!(msg.text, "!queue rick");
        assert!(msg.sender.is_subscriber);
        assert!(!msg.is_self);

        let msg = chat_message(
            "@badges=founder/0,premium/1;subscriber=0 :bob!bob@bob.tmi.twitch.tv PRIVMSG #museun :hi",
        );
        assert!(msg.sender.is_subscriber);

        let msg = chat_message(
            "@badges=subscriber/12;subscriber=0 :bob!bob@bob.tmi.twitch.tv PRIVMSG #museun :hi",
        );
        assert!(msg.sender.is_subscriber);

        let msg = chat_message(
            "@badges=premium/1;subscriber=0 :carol!carol@carol.tmi.twitch.tv PRIVMSG #museun :hi",
        );
        assert!(!msg.sender.is_subscriber);
    }

    #[test]
    fn whisper_notices() {
        assert!(is_whisper_rejection("whisper_restricted"));
        assert!(is_whisper_rejection("whisper_invalid_login"));
        assert!(is_whisper_rejection("unrecognized_cmd"));
        assert!(!is_whisper_rejection("msg_ratelimit"));
        assert!(!is_whisper_rejection(""));
    }

    #[tokio::test]
    async fn rejection_skips_abandoned_whispers() {
        let mut whispers = PendingWhispers::default();
        let (gone, rx) = oneshot::channel();
        drop(rx);
        let (waiting, mut rx) = oneshot::channel();
        whispers.push(gone);
        whispers.push(waiting);

        assert!(whispers.reject("whisper_restricted"));
        assert!(rx.try_recv().unwrap().is_err());
        assert!(!whispers.reject("whisper_restricted"));
    }

    #[tokio::test]
    async fn refused_whisper_is_an_error() {
        let (tx, mut rx) = unbounded_channel();
        let writer = Writer::new(tx);

        tokio::spawn(async move {
            let mut whispers = PendingWhispers::default();
            while let Some(kind) = rx.recv().await {
                if let WriteKind::Whisper { result, .. } = kind {
                    whispers.push(result);
                    whispers.reject("whisper_restricted");
                }
            }
        });

        let err = writer.whisper("alice", "hello").await.unwrap_err();
        assert!(err.to_string().contains("whisper_restricted"));
    }

    #[tokio::test(start_paused = true)]
    async fn unanswered_whisper_counts_as_sent() {
        let (tx, mut rx) = unbounded_channel();
        let writer = Writer::new(tx);

        let connection = tokio::spawn(async move {
            let mut kept = vec![];
            while let Some(kind) = rx.recv().await {
                kept.push(kind);
            }
        });

        writer.whisper("alice", "hello").await.unwrap();
        drop(writer);
        connection.await.unwrap();
    }

    #[tokio::test]
    async fn closed_connection_fails_both_paths() {
        let (tx, rx) = unbounded_channel();
        drop(rx);
        let writer = Writer::new(tx);

        assert!(writer.say("#museun", "hi").is_err());
        assert!(writer.whisper("alice", "hi").await.is_err());
    }
}
