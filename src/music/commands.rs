use crate::music::error::{MusicError, Result};

#[derive(Debug, Clone, PartialEq)]
pub enum PlaylistCommand {
    /// Queue every entry of a remote playlist.
    Load(String),
    /// Queue the whole library.
    Library,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MusicCommand {
    Join,
    Leave,
    Play(Option<String>),
    PlayLibrary(usize),
    Add(String),
    Library,
    Dj,
    Volume(Option<f32>),
    Now,
    Skip,
    Clear,
    Shuffle(Option<bool>),
    Repeat(Option<bool>),
    Pause,
    Resume,
    Stop,
    Playlist(PlaylistCommand),
}

pub const USAGE: &str = "join | leave | play [url|search|index] | add <url|search> | library | dj | volume [0.0-1.0] \
| now | skip | clear | shuffle [on|off] | repeat [on|off] | pause | resume | stop | playlist <load <url>|library>";

impl MusicCommand {
    /// Parses `<verb> [argument...]` as typed after the `music` command.
    pub fn parse(input: &str) -> Result<MusicCommand> {
        let input = input.trim();
        let (verb, rest) = match input.split_once(char::is_whitespace) {
            Some((verb, rest)) => (verb, rest.trim()),
            None => (input, ""),
        };
        let argument = (!rest.is_empty()).then(|| rest.to_string());

        let command = match verb.to_lowercase().as_str() {
            "join" => MusicCommand::Join,
            "leave" => MusicCommand::Leave,
            "play" => match argument {
                Some(reference) => match reference.parse::<usize>() {
                    Ok(index) => MusicCommand::PlayLibrary(index),
                    Err(_) => MusicCommand::Play(Some(reference)),
                },
                None => MusicCommand::Play(None),
            },
            "add" => {
                MusicCommand::Add(argument.ok_or_else(|| missing("add", "a URL or search terms"))?)
            }
            "library" | "list" => MusicCommand::Library,
            "dj" => MusicCommand::Dj,
            "volume" => MusicCommand::Volume(argument.as_deref().map(parse_volume).transpose()?),
            "now" | "queue" | "status" | "current" => MusicCommand::Now,
            "skip" => MusicCommand::Skip,
            "clear" | "reset" => MusicCommand::Clear,
            "shuffle" => MusicCommand::Shuffle(argument.as_deref().map(parse_switch).transpose()?),
            "repeat" => MusicCommand::Repeat(argument.as_deref().map(parse_switch).transpose()?),
            "pause" => MusicCommand::Pause,
            "resume" | "unpause" => MusicCommand::Resume,
            "stop" => MusicCommand::Stop,
            "playlist" => MusicCommand::Playlist(parse_playlist(rest)?),
            "" => return Err(MusicError::InvalidArgument(format!("usage: {USAGE}"))),
            other => {
                return Err(MusicError::InvalidArgument(format!(
                    "unknown music command `{other}`"
                )))
            }
        };

        Ok(command)
    }
}

fn missing(verb: &str, what: &str) -> MusicError {
    MusicError::InvalidArgument(format!("`{verb}` needs {what}"))
}

fn parse_volume(raw: &str) -> Result<f32> {
    let volume: f32 = raw
        .parse()
        .map_err(|_| MusicError::InvalidArgument(format!("`{raw}` is not a volume")))?;

    if !(0.0..=1.0).contains(&volume) {
        return Err(MusicError::InvalidArgument(format!(
            "volume must be between 0.0 and 1.0, got {raw}"
        )));
    }

    Ok(volume)
}

fn parse_switch(raw: &str) -> Result<bool> {
    match raw.to_lowercase().as_str() {
        "on" | "true" | "yes" | "1" => Ok(true),
        "off" | "false" | "no" | "0" => Ok(false),
        _ => Err(MusicError::InvalidArgument(format!("expected on or off, got `{raw}`"))),
    }
}

fn parse_playlist(rest: &str) -> Result<PlaylistCommand> {
    let (sub, argument) = match rest.split_once(char::is_whitespace) {
        Some((sub, argument)) => (sub, argument.trim()),
        None => (rest, ""),
    };

    match sub.to_lowercase().as_str() {
        "load" if !argument.is_empty() => Ok(PlaylistCommand::Load(argument.to_string())),
        "load" => Err(missing("playlist load", "a playlist URL")),
        "library" => Ok(PlaylistCommand::Library),
        _ => Err(MusicError::InvalidArgument("usage: playlist <load <url>|library>".to_string())),
    }
}
