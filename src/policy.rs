use hashbrown::HashSet;

use crate::command::Command;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AllowList {
    users: HashSet<String>,
}

impl AllowList {
    /// Parses `"Alice, Bob"`. An empty list allows everyone.
    pub fn parse(input: &str) -> Self {
        Self {
            users: input
                .split(',')
                .map(str::trim)
                .filter(|user| !user.is_empty())
                .map(str::to_lowercase)
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    pub fn allows(&self, user: &str) -> bool {
        self.is_empty() || self.users.contains(&user.to_lowercase())
    }

    pub fn users(&self) -> impl Iterator<Item = &str> {
        self.users.iter().map(String::as_str)
    }
}

#[derive(Debug, Clone)]
pub struct AccessDecision<'a> {
    pub allowed: bool,
    pub allow_list: Option<&'a AllowList>,
}

#[derive(Debug, Clone, Default)]
pub struct AccessPolicy {
    pub subscribers_only: bool,
    pub skip: AllowList,
    pub set_volume: AllowList,
}

impl AccessPolicy {
    pub const SUBSCRIBERS_ONLY: &'static str = "Sorry, song requests are only for subscribers.";

    /// The subscriber gate. Only recognized commands are gated.
    pub fn admits(&self, command: &Command, is_subscriber: bool) -> bool {
        !self.subscribers_only || is_subscriber || matches!(command, Command::NoOp)
    }

    /// The allow-list gate for privileged commands.
    pub fn authorize(&self, command: &Command, user: &str) -> AccessDecision<'_> {
        let allow_list = match command {
            Command::SkipNext => &self.skip,
            Command::SetVolume(..) => &self.set_volume,
            _ => {
                return AccessDecision {
                    allowed: true,
                    allow_list: None,
                }
            }
        };

        AccessDecision {
            allowed: allow_list.allows(user),
            allow_list: Some(allow_list),
        }
    }
}
