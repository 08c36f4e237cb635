use std::time::Duration;

use serde::Deserialize;
use serenity::async_trait;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::models::ResolvedSource;
use crate::music::error::{MusicError, Result};
use crate::music::resolver::TrackSource;

const UNKNOWN_TRACK_TITLE: &str = "UNKNOWN TRACK";

/// One line of `yt-dlp -j --flat-playlist`.
#[derive(Deserialize)]
pub struct PlaylistSong {
    pub url: String,
    pub title: Option<String>,
    pub duration: Option<f64>,
}

/// The subset of `yt-dlp -j` output for a single video we care about.
#[derive(Deserialize)]
pub struct VideoInfo {
    pub title: Option<String>,
    pub webpage_url: Option<String>,
    pub original_url: Option<String>,
    pub duration: Option<f64>,
    pub is_live: Option<bool>,
    pub live_status: Option<String>,
}

/// Resolves references by shelling out to yt-dlp.
pub struct YtDlpSource {
    binary: String,
}

impl YtDlpSource {
    pub fn new() -> Self {
        YtDlpSource {
            binary: "yt-dlp".to_string(),
        }
    }

    async fn run(&self, args: &[&str]) -> Result<String> {
        let output = Command::new(&self.binary)
            .args(args)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|why| {
                MusicError::ResolutionFailure(format!("{} failed to start: {why}", self.binary))
            })?;

        let error = String::from_utf8_lossy(&output.stderr).trim().to_string();
        let result = String::from_utf8(output.stdout)
            .map_err(|_| MusicError::ResolutionFailure("Error reading stdout".to_string()))?;

        if !output.status.success() || result.trim().is_empty() {
            let diagnostic = error.lines().last().unwrap_or("no output from yt-dlp").to_string();
            debug!("yt-dlp stderr: {error}");

            return Err(MusicError::ResolutionFailure(diagnostic));
        }

        Ok(result)
    }
}

impl Default for YtDlpSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TrackSource for YtDlpSource {
    async fn resolve(&self, reference: &str) -> Result<ResolvedSource> {
        let target = search_target(reference);
        info!("Resolving {target}");

        let output = self.run(&["-j", "--no-playlist", &target]).await?;
        let line = output
            .lines()
            .find(|line| !line.trim().is_empty())
            .ok_or_else(|| {
                MusicError::ResolutionFailure(format!("nothing found for {reference}"))
            })?;

        parse_video(line, reference)
    }

    async fn resolve_playlist(&self, url: &str) -> Result<Vec<ResolvedSource>> {
        info!("Getting songs from playlist {url}");

        let output = self.run(&["-j", "--flat-playlist", url]).await?;

        Ok(songs_list_from_playlist_output(&output))
    }
}

/// URLs go to yt-dlp as-is; anything else becomes a search for the first hit.
pub fn search_target(reference: &str) -> String {
    let reference = reference.trim();

    if reference.starts_with("http://") || reference.starts_with("https://") {
        reference.to_string()
    } else {
        format!("ytsearch1:{reference}")
    }
}

pub fn is_playlist_url(reference: &str) -> bool {
    reference.starts_with("http") && (reference.contains("&list=") || reference.contains("?list="))
}

fn seconds(duration: Option<f64>) -> Option<Duration> {
    duration.and_then(|secs| Duration::try_from_secs_f64(secs).ok())
}

pub fn parse_video(line: &str, reference: &str) -> Result<ResolvedSource> {
    let info: VideoInfo = serde_json::from_str(line)
        .map_err(|why| MusicError::ResolutionFailure(format!("unreadable yt-dlp output: {why}")))?;

    let url = info
        .webpage_url
        .or(info.original_url)
        .ok_or_else(|| {
            MusicError::ResolutionFailure(format!("Could not load song for input {reference}"))
        })?;

    let is_live = info.is_live.unwrap_or(false)
        || matches!(info.live_status.as_deref(), Some("is_live") | Some("is_upcoming"));

    Ok(ResolvedSource {
        title: info.title.unwrap_or_else(|| UNKNOWN_TRACK_TITLE.to_string()),
        url,
        duration: seconds(info.duration),
        is_live,
    })
}

pub fn songs_list_from_playlist_output(output: &str) -> Vec<ResolvedSource> {
    let lines: Vec<&str> = output.lines().filter(|line| !line.trim().is_empty()).collect();

    let playlist_songs = lines
        .iter()
        .filter_map(|line| {
            let playlist_song: PlaylistSong = serde_json::from_str(line).ok()?;

            Some(ResolvedSource {
                title: playlist_song.title.unwrap_or_else(|| UNKNOWN_TRACK_TITLE.to_string()),
                url: playlist_song.url,
                duration: seconds(playlist_song.duration),
                is_live: false,
            })
        })
        .collect::<Vec<ResolvedSource>>();

    if playlist_songs.len() < lines.len() {
        warn!(
            "{} playlist entries were skipped due to errors during parsing",
            lines.len() - playlist_songs.len()
        );
    }

    playlist_songs
}
