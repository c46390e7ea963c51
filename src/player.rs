use std::sync::Arc;

use crate::credentials::{AuthError, Credential, CredentialStore};

#[derive(Debug, thiserror::Error)]
pub enum PlayerError {
    #[error("not found")]
    NotFound,
    #[error("invalid id")]
    InvalidId,
    #[error("duplicate track")]
    DuplicateTrack,
    #[error("player request failed: {0}")]
    Transport(String),
    #[error(transparent)]
    Auth(#[from] AuthError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FoundTrack {
    pub id: String,
    pub title: String,
    pub artists: Vec<String>,
    /// "Artist1, Artist2 - Title"
    pub name: String,
}

impl FoundTrack {
    pub fn new(id: impl Into<String>, title: impl Into<String>, artists: Vec<String>) -> Self {
        let title = title.into();
        let name = format!("{artists} - {title}", artists = artists.join(", "));
        Self {
            id: id.into(),
            title,
            artists,
            name,
        }
    }
}

/// The wire calls against the remote player. Every call is handed a credential
/// that was checked for freshness just before.
#[async_trait::async_trait]
pub trait PlayerApi: Send + Sync {
    async fn search(
        &self,
        auth: &Credential,
        query: &str,
        limit: u32,
    ) -> Result<Vec<FoundTrack>, PlayerError>;
    async fn track(&self, auth: &Credential, id: &str) -> Result<FoundTrack, PlayerError>;
    async fn currently_playing(&self, auth: &Credential)
        -> Result<Option<FoundTrack>, PlayerError>;
    async fn add_to_queue(&self, auth: &Credential, id: &str) -> Result<(), PlayerError>;
    async fn playlist_track_ids(
        &self,
        auth: &Credential,
        playlist: &str,
    ) -> Result<Vec<String>, PlayerError>;
    async fn add_to_playlist(
        &self,
        auth: &Credential,
        playlist: &str,
        id: &str,
    ) -> Result<(), PlayerError>;
    async fn skip_to_next(&self, auth: &Credential) -> Result<(), PlayerError>;
    /// `None` when there is no active output device.
    async fn volume(&self, auth: &Credential) -> Result<Option<u8>, PlayerError>;
    async fn set_volume(&self, auth: &Credential, volume: u8) -> Result<(), PlayerError>;
}

pub fn clamp_volume(volume: i64) -> u8 {
    volume.clamp(0, 100) as u8
}

pub struct PlayerClient {
    credentials: Arc<CredentialStore>,
    api: Arc<dyn PlayerApi>,
    playlist: Option<String>,
}

impl PlayerClient {
    pub fn new(
        credentials: Arc<CredentialStore>,
        api: Arc<dyn PlayerApi>,
        playlist: Option<String>,
    ) -> Self {
        Self {
            credentials,
            api,
            playlist: playlist.filter(|id| !id.is_empty()),
        }
    }

    pub async fn search(&self, query: &str, limit: u32) -> Result<Vec<FoundTrack>, PlayerError> {
        let auth = self.credentials.ensure_fresh().await?;
        self.api.search(&auth, query, limit).await
    }

    pub async fn track(&self, id: &str) -> Result<FoundTrack, PlayerError> {
        let auth = self.credentials.ensure_fresh().await?;
        self.api.track(&auth, id).await
    }

    pub async fn current_track(&self) -> Result<Option<FoundTrack>, PlayerError> {
        let auth = self.credentials.ensure_fresh().await?;
        self.api.currently_playing(&auth).await
    }

    pub async fn add_to_queue(&self, id: &str) -> Result<(), PlayerError> {
        let auth = self.credentials.ensure_fresh().await?;
        self.api.add_to_queue(&auth, id).await
    }

    pub async fn add_to_playlist(&self, id: &str) -> Result<(), PlayerError> {
        let Some(playlist) = &self.playlist else {
            log::error!("cannot add to playlist: no playlist id is configured");
            return Ok(());
        };

        let auth = self.credentials.ensure_fresh().await?;
        let existing = self.api.playlist_track_ids(&auth, playlist).await?;
        if existing.iter().any(|existing| existing == id) {
            return Err(PlayerError::DuplicateTrack);
        }

        self.api.add_to_playlist(&auth, playlist, id).await
    }

    pub async fn skip_to_next(&self) -> Result<(), PlayerError> {
        let auth = self.credentials.ensure_fresh().await?;
        self.api.skip_to_next(&auth).await
    }

    pub async fn volume(&self) -> Result<u8, PlayerError> {
        let auth = self.credentials.ensure_fresh().await?;
        Ok(self.api.volume(&auth).await?.unwrap_or(0))
    }

    /// Clamps into `0..=100` and returns the volume that was sent.
    pub async fn set_volume(&self, volume: i64) -> Result<u8, PlayerError> {
        let volume = clamp_volume(volume);
        let auth = self.credentials.ensure_fresh().await?;
        self.api.set_volume(&auth, volume).await?;
        Ok(volume)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::atomic::Ordering;

    use parking_lot::Mutex;

    use super::*;
    use crate::credentials::tests::{store_with, FakeProvider};

    /// An in-memory player. Records every mutating call.
    #[derive(Default)]
    pub struct FakePlayer {
        pub catalog: Mutex<Vec<FoundTrack>>,
        pub current: Mutex<Option<FoundTrack>>,
        pub queued: Mutex<Vec<String>>,
        pub playlist: Mutex<Vec<String>>,
        pub volume: Mutex<Option<u8>>,
        pub skips: Mutex<usize>,
        pub calls: Mutex<usize>,
        pub fail_queue: bool,
        pub fail_current: Mutex<bool>,
        pub tokens: Mutex<Vec<String>>,
    }

    impl FakePlayer {
        pub fn with_catalog(tracks: impl IntoIterator<Item = FoundTrack>) -> Self {
            Self {
                catalog: Mutex::new(tracks.into_iter().collect()),
                ..Self::default()
            }
        }

        fn touch(&self, auth: &Credential) {
            *self.calls.lock() += 1;
            self.tokens.lock().push(auth.access_token.clone());
        }
    }

    #[async_trait::async_trait]
    impl PlayerApi for FakePlayer {
        async fn search(
            &self,
            auth: &Credential,
            query: &str,
            limit: u32,
        ) -> Result<Vec<FoundTrack>, PlayerError> {
            self.touch(auth);
            let query = query.to_lowercase();
            Ok(self
                .catalog
                .lock()
                .iter()
                .filter(|track| track.name.to_lowercase().contains(&query))
                .take(limit as usize)
                .cloned()
                .collect())
        }

        async fn track(&self, auth: &Credential, id: &str) -> Result<FoundTrack, PlayerError> {
            self.touch(auth);
            if id.len() != 22 {
                return Err(PlayerError::InvalidId);
            }
            self.catalog
                .lock()
                .iter()
                .find(|track| track.id == id)
                .cloned()
                .ok_or(PlayerError::NotFound)
        }

        async fn currently_playing(
            &self,
            auth: &Credential,
        ) -> Result<Option<FoundTrack>, PlayerError> {
            self.touch(auth);
            tokio::task::yield_now().await;
            if *self.fail_current.lock() {
                return Err(PlayerError::Transport("connection reset".into()));
            }
            Ok(self.current.lock().clone())
        }

        async fn add_to_queue(&self, auth: &Credential, id: &str) -> Result<(), PlayerError> {
            self.touch(auth);
            if self.fail_queue {
                return Err(PlayerError::NotFound);
            }
            self.queued.lock().push(id.to_string());
            Ok(())
        }

        async fn playlist_track_ids(
            &self,
            auth: &Credential,
            _playlist: &str,
        ) -> Result<Vec<String>, PlayerError> {
            self.touch(auth);
            Ok(self.playlist.lock().clone())
        }

        async fn add_to_playlist(
            &self,
            auth: &Credential,
            _playlist: &str,
            id: &str,
        ) -> Result<(), PlayerError> {
            self.touch(auth);
            self.playlist.lock().push(id.to_string());
            Ok(())
        }

        async fn skip_to_next(&self, auth: &Credential) -> Result<(), PlayerError> {
            self.touch(auth);
            *self.skips.lock() += 1;
            Ok(())
        }

        async fn volume(&self, auth: &Credential) -> Result<Option<u8>, PlayerError> {
            self.touch(auth);
            Ok(*self.volume.lock())
        }

        async fn set_volume(&self, auth: &Credential, volume: u8) -> Result<(), PlayerError> {
            self.touch(auth);
            *self.volume.lock() = Some(volume);
            Ok(())
        }
    }

    pub fn fresh_credential() -> Credential {
        Credential {
            access_token: "access".into(),
            refresh_token: "refresh".into(),
            expires_at: 10_000,
        }
    }

    pub fn client_with(api: Arc<FakePlayer>, playlist: Option<&str>) -> PlayerClient {
        let (store, _) = store_with(
            Some(fresh_credential()),
            Arc::new(FakeProvider::default()),
            1000,
        );
        PlayerClient::new(Arc::new(store), api, playlist.map(str::to_string))
    }

    pub fn rick() -> FoundTrack {
        FoundTrack::new(
            "4cOdK2wGLETKBW3PvgPWqT",
            "Never Gonna Give You Up",
            vec!["Rick Astley".into()],
        )
    }

    #[test]
    fn display_name_joins_artists() {
        let track = FoundTrack::new(
            "id",
            "Under Pressure",
            vec!["Queen".into(), "David Bowie".into()],
        );
        assert_eq!(track.name, "Queen, David Bowie - Under Pressure");
    }

    #[test]
    fn volume_is_clamped() {
        assert_eq!(clamp_volume(-5), 0);
        assert_eq!(clamp_volume(150), 100);
        assert_eq!(clamp_volume(42), 42);
    }

    #[tokio::test]
    async fn set_volume_sends_the_clamped_value() {
        let api = Arc::new(FakePlayer::default());
        let client = client_with(api.clone(), None);

        for (input, expected) in [(-5, 0), (150, 100), (42, 42)] {
            assert_eq!(client.set_volume(input).await.unwrap(), expected);
            assert_eq!(*api.volume.lock(), Some(expected));
        }
    }

    #[tokio::test]
    async fn volume_without_device_reads_zero() {
        let api = Arc::new(FakePlayer::default());
        let client = client_with(api, None);
        assert_eq!(client.volume().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn playlist_add_without_playlist_is_a_no_op() {
        let api = Arc::new(FakePlayer::default());
        let client = client_with(api.clone(), None);

        client.add_to_playlist(&rick().id).await.unwrap();
        assert!(api.playlist.lock().is_empty());
        assert_eq!(*api.calls.lock(), 0);
    }

    #[tokio::test]
    async fn playlist_add_rejects_duplicates() {
        let api = Arc::new(FakePlayer::default());
        let client = client_with(api.clone(), Some("playlist"));

        client.add_to_playlist(&rick().id).await.unwrap();
        assert!(matches!(
            client.add_to_playlist(&rick().id).await,
            Err(PlayerError::DuplicateTrack)
        ));
        assert_eq!(api.playlist.lock().len(), 1);
    }

    #[tokio::test]
    async fn expired_credential_refreshes_once_for_concurrent_calls() {
        let provider = Arc::new(FakeProvider::default());
        let (store, _) = store_with(
            Some(Credential {
                expires_at: 10,
                ..fresh_credential()
            }),
            provider.clone(),
            1000,
        );
        let api = Arc::new(FakePlayer::default());
        let client = PlayerClient::new(Arc::new(store), api.clone(), None);

        let (a, b, c) = tokio::join!(
            client.skip_to_next(),
            client.set_volume(10),
            client.current_track()
        );
        a.unwrap();
        b.unwrap();
        c.unwrap();

        assert_eq!(provider.refreshes.load(Ordering::SeqCst), 1);
        assert!(api
            .tokens
            .lock()
            .iter()
            .all(|token| token == "refresh-access-1"));
    }
}
