use thiserror::Error;

/// Every failure of the music core. The `Display` text is what the user reads.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum MusicError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    #[error("I'm not playing music right now.")]
    NotPlaying,
    #[error("You are not the DJ (ノдヽ)")]
    Unauthorized,
    #[error("You have already voted to skip the song!")]
    AlreadyVoted,
    #[error("I don't play livestreams.")]
    UnsupportedLiveSource,
    #[error("Could not load that track: {0}")]
    ResolutionFailure(String),
    #[error("The music library is empty.")]
    LibraryEmpty,
    #[error("Track request was cancelled.")]
    Cancelled,
    #[error("Not in a voice channel")]
    NotInVoiceChannel,
    #[error("Voice connection failed: {0}")]
    Voice(String),
    #[error("Could not upload the library listing: {0}")]
    Paste(String),
    #[error("Library storage failed: {0}")]
    Storage(String),
}

pub type Result<T> = std::result::Result<T, MusicError>;
