use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{
    command::Prefixes,
    policy::{AccessPolicy, AllowList},
    spotify::SpotifyConfig,
    twitch,
};

/// Env files read at startup, in order, from the directory holding `.env`.
pub const ENV_FILES: [&str; 3] = [".env", ".dev.env", ".secrets.env"];

/// Finds the directory holding `.env`: the working directory, then its parent.
pub fn find_env_dir(cwd: &Path) -> anyhow::Result<PathBuf> {
    let candidates = [cwd.to_path_buf(), cwd.join("..")];
    candidates
        .into_iter()
        .find(|dir| dir.join(ENV_FILES[0]).is_file())
        .ok_or_else(|| {
            anyhow::anyhow!(
                "no `.env` found in {cwd} or its parent",
                cwd = cwd.display()
            )
        })
}

pub struct Config {
    pub channel: String,
    pub bot_name: Option<String>,
    pub twitch_token: Option<String>,
    pub chat_feedback: bool,
    pub add_to_queue: bool,
    pub add_to_playlist: bool,
    pub playlist_id: Option<String>,
    pub prefer_whisper: bool,
    pub reconcile_interval: Duration,
    pub auth_server_port: u16,
    pub prefixes: Prefixes,
    pub policy: AccessPolicy,
    pub spotify: SpotifyConfig,
}

impl Config {
    pub const DEFAULT_AUTH_PORT: u16 = 8000;
    pub const DEFAULT_RECONCILE_MS: u64 = 60_000;

    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let get_opt = |key: &str| {
            lookup(key)
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
        };
        let get = |key: &str| get_opt(key).ok_or_else(|| anyhow::anyhow!("`{key}` must be set"));
        let flag = |key: &str| {
            get_opt(key).is_some_and(|s| {
                matches!(&*s.to_ascii_lowercase(), "true" | "1" | "yes" | "on")
            })
        };
        let allow_list = |key: &str| AllowList::parse(&get_opt(key).unwrap_or_default());

        let chat_feedback = flag("CHAT_FEEDBACK");
        let bot_name = get_opt("BOT_USERNAME");
        let twitch_token = get_opt("TWITCH_TOKEN");
        if chat_feedback && (bot_name.is_none() || twitch_token.is_none()) {
            anyhow::bail!(
                "chat feedback is enabled but `TWITCH_TOKEN` or `BOT_USERNAME` is not set"
            );
        }

        let add_to_queue = flag("ADD_TO_QUEUE");
        let add_to_playlist = flag("ADD_TO_PLAYLIST");
        let playlist_id = get_opt("SPOTIFY_PLAYLIST_ID");
        if add_to_playlist && playlist_id.is_none() {
            log::warn!("`ADD_TO_PLAYLIST` is enabled but `SPOTIFY_PLAYLIST_ID` is not set");
        }

        let auth_server_port = match get_opt("AUTH_SERVER_PORT") {
            Some(port) => port
                .parse()
                .map_err(|_| anyhow::anyhow!("`AUTH_SERVER_PORT` must be a port number"))?,
            None => Self::DEFAULT_AUTH_PORT,
        };

        let reconcile_ms = match get_opt("COMMAND_GET_QUEUE__REFRESH__COOLDOWN_MS") {
            Some(ms) => ms.parse().map_err(|_| {
                anyhow::anyhow!("`COMMAND_GET_QUEUE__REFRESH__COOLDOWN_MS` must be a number")
            })?,
            None => Self::DEFAULT_RECONCILE_MS,
        };

        let host = get_opt("HOST").unwrap_or_else(|| "http://localhost".to_string());
        let redirect_uri = if get_opt("PORT").is_some() {
            format!("{host}/spotifyAuth")
        } else {
            format!("{host}:{auth_server_port}/spotifyAuth")
        };

        let channel = get("TWITCH_CHANNEL")?;
        let channel = channel.strip_prefix('#').unwrap_or(&channel).to_string();

        Ok(Self {
            channel,
            bot_name,
            twitch_token,
            chat_feedback,
            add_to_queue,
            add_to_playlist,
            playlist_id,
            prefer_whisper: flag("COMMAND_GET_QUEUE__PREFER_WHISPER"),
            reconcile_interval: Duration::from_millis(reconcile_ms.max(1000)),
            auth_server_port,
            prefixes: Prefixes {
                help: get_opt("COMMAND_HELP__PREFIX"),
                current_song: get_opt("COMMAND_CURRENT_SONG__PREFIX"),
                show_queue: get_opt("COMMAND_GET_QUEUE__PREFIX"),
                add: Some(get("COMMAND_QUEUE__PREFIX")?),
                skip: get_opt("COMMAND_SKIP_TO_NEXT__PREFIX"),
                set_volume: get_opt("COMMAND_SET_VOLUME__PREFIX"),
            },
            policy: AccessPolicy {
                subscribers_only: flag("SUBSCRIBERS_ONLY"),
                skip: allow_list("COMMAND_SKIP_TO_NEXT__ALLOWED_USERS"),
                set_volume: allow_list("COMMAND_SET_VOLUME__ALLOWED_USERS"),
            },
            spotify: SpotifyConfig {
                client_id: get("SPOTIFY_CLIENT_ID")?,
                client_secret: get("SPOTIFY_CLIENT_SECRET")?,
                redirect_uri,
            },
        })
    }

    pub fn twitch(&self) -> twitch::Config {
        // without feedback the bot only reads, so it logs in anonymously
        let (name, pass) = if self.chat_feedback {
            (self.bot_name.clone(), self.twitch_token.clone())
        } else {
            (None, None)
        };

        twitch::Config {
            name,
            pass,
            channel: self.channel.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use hashbrown::HashMap;

    use super::*;

    fn lookup<'a>(pairs: &'a [(&'a str, &'a str)]) -> impl Fn(&str) -> Option<String> + 'a {
        let map: HashMap<_, _> = pairs.iter().copied().collect();
        move |key: &str| map.get(key).map(|s| s.to_string())
    }

    #[test]
    fn env_dir_is_the_working_dir_or_its_parent() {
        let root = std::env::temp_dir().join(format!("chat-dj-{}", fastrand::u64(..)));
        let child = root.join("child");
        std::fs::create_dir_all(&child).unwrap();

        assert!(find_env_dir(&child).is_err());

        std::fs::write(root.join(".env"), "TWITCH_CHANNEL=museun\n").unwrap();
        assert_eq!(find_env_dir(&child).unwrap(), child.join(".."));
        assert_eq!(find_env_dir(&root).unwrap(), root);

        std::fs::write(child.join(".env"), "").unwrap();
        assert_eq!(find_env_dir(&child).unwrap(), child);

        std::fs::remove_dir_all(&root).unwrap();
    }

    const BASE: &[(&str, &str)] = &[
        ("TWITCH_CHANNEL", "#museun"),
        ("SPOTIFY_CLIENT_ID", "id"),
        ("SPOTIFY_CLIENT_SECRET", "secret"),
        ("COMMAND_QUEUE__PREFIX", "!sr"),
    ];

    #[test]
    fn minimal_config() {
        let config = Config::from_lookup(lookup(BASE)).unwrap();
        assert_eq!(config.channel, "museun");
        assert!(!config.chat_feedback);
        assert_eq!(config.prefixes.add.as_deref(), Some("!sr"));
        assert_eq!(config.prefixes.skip, None);
        assert_eq!(config.reconcile_interval, Duration::from_millis(60_000));
        assert_eq!(
            config.spotify.redirect_uri,
            "http://localhost:8000/spotifyAuth"
        );
        assert!(config.twitch().name.is_none());
    }

    #[test]
    fn missing_required_key() {
        let err = Config::from_lookup(lookup(&BASE[1..])).err().unwrap();
        assert!(err.to_string().contains("TWITCH_CHANNEL"));
    }

    #[test]
    fn feedback_needs_an_identity() {
        let mut pairs = BASE.to_vec();
        pairs.push(("CHAT_FEEDBACK", "true"));
        assert!(Config::from_lookup(lookup(&pairs)).is_err());

        pairs.push(("BOT_USERNAME", "shaken_bot"));
        pairs.push(("TWITCH_TOKEN", "oauth:token"));
        let config = Config::from_lookup(lookup(&pairs)).unwrap();
        assert_eq!(config.twitch().name.as_deref(), Some("shaken_bot"));
    }

    #[test]
    fn hosted_redirect_and_allow_lists() {
        let mut pairs = BASE.to_vec();
        pairs.extend([
            ("PORT", "80"),
            ("HOST", "https://dj.example"),
            ("COMMAND_SKIP_TO_NEXT__ALLOWED_USERS", "Alice, Bob"),
            ("COMMAND_GET_QUEUE__REFRESH__COOLDOWN_MS", "5000"),
            ("SUBSCRIBERS_ONLY", "1"),
        ]);
        let config = Config::from_lookup(lookup(&pairs)).unwrap();
        assert_eq!(config.spotify.redirect_uri, "https://dj.example/spotifyAuth");
        assert!(config.policy.skip.allows("alice"));
        assert!(!config.policy.skip.allows("carol"));
        assert!(config.policy.set_volume.allows("carol"));
        assert!(config.policy.subscribers_only);
        assert_eq!(config.reconcile_interval, Duration::from_millis(5000));
    }
}
