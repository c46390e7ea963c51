use std::{collections::VecDeque, sync::Arc, time::Duration};

use parking_lot::Mutex;
use tokio::sync::mpsc::UnboundedSender;

use crate::{
    credentials::AuthError,
    player::{PlayerClient, PlayerError},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SongRequest {
    pub song_name: String,
    pub requested_by: String,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum EnqueueError {
    #[error("already queued")]
    AlreadyQueued,
}

/// A best-effort shadow of the requests the player still has to play.
///
/// Every mutation happens inside a single lock scope with no await in it.
#[derive(Default)]
pub struct RequestQueue {
    entries: Mutex<VecDeque<SongRequest>>,
}

impl RequestQueue {
    pub const EMPTY: &'static str = "The queue is empty.";

    /// Appends unless the song is already queued or is what's playing right now.
    pub fn push_unique(
        &self,
        request: SongRequest,
        now_playing: Option<&str>,
    ) -> Result<(), EnqueueError> {
        let mut entries = self.entries.lock();
        if now_playing == Some(request.song_name.as_str())
            || entries.iter().any(|e| e.song_name == request.song_name)
        {
            return Err(EnqueueError::AlreadyQueued);
        }
        entries.push_back(request);
        Ok(())
    }

    /// Fetches the current track first, then checks and appends atomically.
    pub async fn try_enqueue(
        &self,
        player: &PlayerClient,
        request: SongRequest,
    ) -> Result<Result<(), EnqueueError>, PlayerError> {
        let current = player.current_track().await?;
        Ok(self.push_unique(request, current.as_ref().map(|track| track.name.as_str())))
    }

    pub fn pop_if_head(&self, song_name: &str) -> Option<SongRequest> {
        let mut entries = self.entries.lock();
        if entries.front()?.song_name != song_name {
            return None;
        }
        entries.pop_front()
    }

    pub fn remove(&self, song_name: &str) -> Option<SongRequest> {
        let mut entries = self.entries.lock();
        let index = entries.iter().position(|e| e.song_name == song_name)?;
        entries.remove(index)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn render(&self) -> Vec<String> {
        let entries = self.entries.lock();
        if entries.is_empty() {
            return vec![Self::EMPTY.to_string()];
        }

        entries
            .iter()
            .enumerate()
            .map(|(i, req)| format!("{}. {} [{}]", i + 1, req.song_name, req.requested_by))
            .collect()
    }

    /// Drops the head if the player has started playing it.
    pub async fn reconcile(
        &self,
        player: &PlayerClient,
    ) -> Result<Option<SongRequest>, PlayerError> {
        let Some(current) = player.current_track().await? else {
            return Ok(None);
        };

        let popped = self.pop_if_head(&current.name);
        if let Some(req) = &popped {
            log::debug!(
                "now playing {song} (requested by {user})",
                song = req.song_name,
                user = req.requested_by
            );
        }
        Ok(popped)
    }
}

/// Reconciles forever, sleeping `interval` after each completed run.
pub async fn run_reconciler(
    queue: Arc<RequestQueue>,
    player: Arc<PlayerClient>,
    interval: Duration,
    fatal: UnboundedSender<AuthError>,
) {
    loop {
        tokio::time::sleep(interval).await;
        match queue.reconcile(&player).await {
            Ok(..) => {}
            Err(PlayerError::Auth(err)) => {
                let _ = fatal.send(err);
                return;
            }
            Err(err) => log::warn!("cannot reconcile the request queue: {err}"),
        }
    }
}
