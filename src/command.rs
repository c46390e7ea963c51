#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackRef {
    Search(String),
    Id(String),
    /// Looked like a player link, but carried no usable track id.
    InvalidLink(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    AddToQueue(TrackRef),
    ShowHelp,
    ShowCurrentSong,
    ShowQueue,
    SkipNext,
    SetVolume(Option<i64>),
    NoOp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Family {
    Help,
    CurrentSong,
    ShowQueue,
    Add,
    Skip,
    SetVolume,
}

#[derive(Debug, Clone, Default)]
pub struct Prefixes {
    pub help: Option<String>,
    pub current_song: Option<String>,
    pub show_queue: Option<String>,
    pub add: Option<String>,
    pub skip: Option<String>,
    pub set_volume: Option<String>,
}

const LINK_MARKERS: [&str; 2] = ["https://open.spotify.com/", "spotify:track:"];

pub struct Parser {
    // longest prefix first
    table: Vec<(String, Family)>,
}

impl Parser {
    pub fn new(prefixes: &Prefixes) -> Self {
        let mut table: Vec<_> = [
            (&prefixes.help, Family::Help),
            (&prefixes.current_song, Family::CurrentSong),
            (&prefixes.show_queue, Family::ShowQueue),
            (&prefixes.add, Family::Add),
            (&prefixes.skip, Family::Skip),
            (&prefixes.set_volume, Family::SetVolume),
        ]
        .into_iter()
        .filter_map(|(prefix, family)| {
            let prefix = prefix.as_deref()?.trim();
            (!prefix.is_empty()).then(|| (prefix.to_string(), family))
        })
        .collect();

        table.sort_by(|(l, _), (r, _)| r.len().cmp(&l.len()));
        Self { table }
    }

    pub fn parse(&self, input: &str) -> Command {
        let input = input.trim();
        self.table
            .iter()
            .find_map(|(prefix, family)| {
                let rest = input.strip_prefix(prefix.as_str())?;
                if !rest.is_empty() && !rest.starts_with(char::is_whitespace) {
                    return None;
                }
                Some(Self::command(*family, rest.trim()))
            })
            .unwrap_or(Command::NoOp)
    }

    fn command(family: Family, arg: &str) -> Command {
        match family {
            Family::Help => Command::ShowHelp,
            Family::CurrentSong => Command::ShowCurrentSong,
            Family::ShowQueue => Command::ShowQueue,
            Family::Skip => Command::SkipNext,
            Family::SetVolume => Command::SetVolume(arg.parse().ok()),
            Family::Add if arg.is_empty() => Command::ShowHelp,
            Family::Add => Command::AddToQueue(Self::track_ref(arg)),
        }
    }

    fn track_ref(arg: &str) -> TrackRef {
        if !LINK_MARKERS.iter().any(|marker| arg.starts_with(marker)) {
            return TrackRef::Search(arg.to_string());
        }

        match track_id_from_link(arg) {
            Some(id) => TrackRef::Id(id),
            None => TrackRef::InvalidLink(arg.to_string()),
        }
    }
}

/// Pulls the track id out of `https://open.spotify.com/track/<id>?...`
/// or `spotify:track:<id>`.
pub fn track_id_from_link(input: &str) -> Option<String> {
    let link = input.split_whitespace().next()?;

    let id = if let Some(id) = link.strip_prefix("spotify:track:") {
        id.to_string()
    } else {
        let url = url::Url::parse(link).ok()?;
        match url.scheme() {
            "http" | "https" if matches!(url.domain(), Some("open.spotify.com")) => {}
            _ => return None,
        }

        // links may carry a locale segment, e.g. /intl-de/track/<id>
        let mut segments = url.path_segments()?;
        segments.find(|segment| *segment == "track")?;
        segments.next()?.to_string()
    };

    (id.len() == 22 && id.chars().all(|c| c.is_ascii_alphanumeric())).then_some(id)
}
