use rspotify::{
    http::HttpError,
    model::{
        enums::{AdditionalType, SearchType},
        idtypes::{PlayableId, PlaylistId, TrackId},
        search::SearchResult,
        track::FullTrack,
        Market, PlayableItem,
    },
    prelude::*,
    AuthCodeSpotify, ClientError, Config, Credentials, OAuth, Token,
};

use crate::{
    credentials::{AuthError, Credential, Grant, IdentityProvider},
    player::{FoundTrack, PlayerApi, PlayerError},
};

pub struct SpotifyConfig {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
}

fn client(config: &SpotifyConfig) -> AuthCodeSpotify {
    let oauth = OAuth {
        redirect_uri: config.redirect_uri.clone(),
        scopes: rspotify::scopes!(
            "user-read-currently-playing",
            "user-read-playback-state",
            "user-modify-playback-state",
            "playlist-read-private",
            "playlist-modify-public",
            "playlist-modify-private"
        ),
        ..OAuth::default()
    };

    AuthCodeSpotify::with_config(
        Credentials::new(&config.client_id, &config.client_secret),
        oauth,
        Config {
            token_refreshing: false,
            ..Config::default()
        },
    )
}

/// The accounts side of spotify: authorization url, code exchange and refresh.
pub struct SpotifyAuth {
    client: AuthCodeSpotify,
}

impl SpotifyAuth {
    pub fn new(config: &SpotifyConfig) -> Self {
        Self {
            client: client(config),
        }
    }

    async fn take_grant(&self) -> Result<Grant, AuthError> {
        let guard = self.client.token.lock().await.map_err(|_| {
            AuthError::Provider("token storage is poisoned".into())
        })?;
        let token = guard
            .as_ref()
            .filter(|token| !token.access_token.is_empty())
            .ok_or_else(|| AuthError::Provider("no token was issued".into()))?;
        Ok(Grant {
            access_token: token.access_token.clone(),
            refresh_token: token.refresh_token.clone(),
            expires_in: token.expires_in.num_seconds(),
        })
    }
}

#[async_trait::async_trait]
impl IdentityProvider for SpotifyAuth {
    fn authorize_url(&self) -> Result<String, AuthError> {
        self.client
            .get_authorize_url(false)
            .map_err(|err| AuthError::Provider(err.to_string()))
    }

    async fn exchange_code(&self, code: &str) -> Result<Grant, AuthError> {
        self.client
            .request_token(code)
            .await
            .map_err(|err| AuthError::Provider(err.to_string()))?;
        self.take_grant().await
    }

    async fn refresh(&self, refresh_token: &str) -> Result<Grant, AuthError> {
        {
            let mut token = self.client.token.lock().await.map_err(|_| {
                AuthError::Provider("token storage is poisoned".into())
            })?;
            *token = Some(Token {
                refresh_token: Some(refresh_token.to_string()),
                ..Token::default()
            });
        }

        self.client
            .refresh_token()
            .await
            .map_err(|err| AuthError::Provider(err.to_string()))?;
        self.take_grant().await
    }
}

/// The web api side of spotify. The client's own token slot is overwritten
/// with the caller's credential before every request.
pub struct SpotifyPlayer {
    client: AuthCodeSpotify,
}

impl SpotifyPlayer {
    pub fn new(config: &SpotifyConfig) -> Self {
        Self {
            client: client(config),
        }
    }

    async fn with_auth(&self, auth: &Credential) -> Result<&AuthCodeSpotify, PlayerError> {
        let mut token = self
            .client
            .token
            .lock()
            .await
            .map_err(|_| PlayerError::Transport("token storage is poisoned".into()))?;
        *token = Some(Token {
            access_token: auth.access_token.clone(),
            refresh_token: Some(auth.refresh_token.clone()),
            ..Token::default()
        });
        Ok(&self.client)
    }
}

fn track_id(id: &str) -> Result<TrackId<'static>, PlayerError> {
    TrackId::from_id(id.to_string()).map_err(|_| PlayerError::InvalidId)
}

fn found(track: FullTrack) -> Option<FoundTrack> {
    let id = track.id?;
    Some(FoundTrack::new(
        id.id(),
        track.name,
        track.artists.into_iter().map(|artist| artist.name).collect(),
    ))
}

impl From<ClientError> for PlayerError {
    fn from(err: ClientError) -> Self {
        if let ClientError::Http(http) = &err {
            if let HttpError::StatusCode(response) = &**http {
                match response.status().as_u16() {
                    404 => return Self::NotFound,
                    400 => return Self::InvalidId,
                    _ => {}
                }
            }
        }
        Self::Transport(err.to_string())
    }
}

#[async_trait::async_trait]
impl PlayerApi for SpotifyPlayer {
    async fn search(
        &self,
        auth: &Credential,
        query: &str,
        limit: u32,
    ) -> Result<Vec<FoundTrack>, PlayerError> {
        let result = self
            .with_auth(auth)
            .await?
            .search(query, SearchType::Track, None, None, Some(limit), None)
            .await?;

        let SearchResult::Tracks(page) = result else {
            return Ok(vec![]);
        };

        Ok(page.items.into_iter().filter_map(found).collect())
    }

    async fn track(&self, auth: &Credential, id: &str) -> Result<FoundTrack, PlayerError> {
        let id = track_id(id)?;
        let track = self.with_auth(auth).await?.track(id, None).await?;
        found(track).ok_or(PlayerError::NotFound)
    }

    async fn currently_playing(
        &self,
        auth: &Credential,
    ) -> Result<Option<FoundTrack>, PlayerError> {
        let playing = self
            .with_auth(auth)
            .await?
            .current_playing(None::<Market>, Some(&[AdditionalType::Track]))
            .await?;

        Ok(playing
            .and_then(|ctx| ctx.item)
            .and_then(|item| match item {
                PlayableItem::Track(track) => found(track),
                PlayableItem::Episode(_) => None,
            }))
    }

    async fn add_to_queue(&self, auth: &Credential, id: &str) -> Result<(), PlayerError> {
        let id = track_id(id)?;
        self.with_auth(auth)
            .await?
            .add_item_to_queue(PlayableId::Track(id), None)
            .await?;
        Ok(())
    }

    async fn playlist_track_ids(
        &self,
        auth: &Credential,
        playlist: &str,
    ) -> Result<Vec<String>, PlayerError> {
        const PAGE: u32 = 100;

        let playlist = PlaylistId::from_id(playlist.to_string())
            .map_err(|_| PlayerError::InvalidId)?;
        let client = self.with_auth(auth).await?;

        let mut ids = vec![];
        let mut offset = 0;
        loop {
            let page = client
                .playlist_items_manual(playlist.clone(), None, None, Some(PAGE), Some(offset))
                .await?;

            let count = page.items.len() as u32;
            ids.extend(page.items.into_iter().filter_map(|item| match item.track? {
                PlayableItem::Track(track) => track.id.map(|id| id.id().to_string()),
                PlayableItem::Episode(_) => None,
            }));

            if page.next.is_none() || count == 0 {
                break;
            }
            offset += count;
        }

        Ok(ids)
    }

    async fn add_to_playlist(
        &self,
        auth: &Credential,
        playlist: &str,
        id: &str,
    ) -> Result<(), PlayerError> {
        let playlist = PlaylistId::from_id(playlist.to_string())
            .map_err(|_| PlayerError::InvalidId)?;
        let id = track_id(id)?;
        self.with_auth(auth)
            .await?
            .playlist_add_items(playlist, [PlayableId::Track(id)], None)
            .await?;
        Ok(())
    }

    async fn skip_to_next(&self, auth: &Credential) -> Result<(), PlayerError> {
        self.with_auth(auth).await?.next_track(None).await?;
        Ok(())
    }

    async fn volume(&self, auth: &Credential) -> Result<Option<u8>, PlayerError> {
        let playback = self
            .with_auth(auth)
            .await?
            .current_playback(None::<Market>, Some(&[AdditionalType::Track]))
            .await?;

        Ok(playback
            .and_then(|ctx| ctx.device.volume_percent)
            .map(|volume| volume.min(100) as u8))
    }

    async fn set_volume(&self, auth: &Credential, volume: u8) -> Result<(), PlayerError> {
        self.with_auth(auth).await?.volume(volume, None).await?;
        Ok(())
    }
}
