use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use tokio::sync::Mutex;

pub const CREDENTIAL_FILE: &str = "./spotify-auth-store.json";

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("no refresh token available, authorization is required")]
    Unauthorized,
    #[error("identity provider rejected the request: {0}")]
    Provider(String),
}

/// The single persisted credential record.
#[derive(Debug, Clone, Default, PartialEq, Eq, ::serde::Serialize, ::serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credential {
    pub access_token: String,
    pub refresh_token: String,
    #[serde(rename = "expireTime", deserialize_with = "serde::epoch_seconds")]
    pub expires_at: i64,
}

mod serde {
    // older records stored a fractional timestamp
    pub fn epoch_seconds<'de, D>(deserializer: D) -> Result<i64, D::Error>
    where
        D: ::serde::Deserializer<'de>,
    {
        <f64 as ::serde::Deserialize>::deserialize(deserializer).map(|secs| secs as i64)
    }
}

impl Credential {
    pub fn empty(now: i64) -> Self {
        Self {
            expires_at: now,
            ..Self::default()
        }
    }

    pub fn is_expired(&self, now: i64) -> bool {
        now >= self.expires_at
    }

    fn from_grant(grant: Grant, previous_refresh: &str, now: i64) -> Self {
        Self {
            access_token: grant.access_token,
            refresh_token: grant
                .refresh_token
                .filter(|token| !token.is_empty())
                .unwrap_or_else(|| previous_refresh.to_string()),
            expires_at: now + grant.expires_in,
        }
    }
}

/// What the identity provider hands back for a code or refresh exchange.
#[derive(Debug, Clone)]
pub struct Grant {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_in: i64,
}

#[async_trait::async_trait]
pub trait IdentityProvider: Send + Sync {
    fn authorize_url(&self) -> Result<String, AuthError>;
    async fn exchange_code(&self, code: &str) -> Result<Grant, AuthError>;
    async fn refresh(&self, refresh_token: &str) -> Result<Grant, AuthError>;
}

pub trait Clock: Send + Sync {
    /// Seconds since the unix epoch.
    fn now(&self) -> i64;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> i64 {
        time::OffsetDateTime::now_utc().unix_timestamp()
    }
}

pub trait CredentialStorage: Send + Sync {
    fn load(&self) -> anyhow::Result<Option<Credential>>;
    fn save(&self, credential: &Credential) -> anyhow::Result<()>;
}

pub struct JsonFile {
    path: PathBuf,
}

impl JsonFile {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

impl CredentialStorage for JsonFile {
    fn load(&self) -> anyhow::Result<Option<Credential>> {
        let data = match std::fs::read_to_string(&self.path) {
            Ok(data) => data,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        Ok(Some(serde_json::from_str(&data)?))
    }

    fn save(&self, credential: &Credential) -> anyhow::Result<()> {
        let data = serde_json::to_string(credential)?;
        std::fs::write(&self.path, data)?;
        Ok(())
    }
}

pub struct CredentialStore {
    credential: Mutex<Credential>,
    provider: Arc<dyn IdentityProvider>,
    storage: Arc<dyn CredentialStorage>,
    clock: Arc<dyn Clock>,
}

impl CredentialStore {
    pub fn load(
        storage: Arc<dyn CredentialStorage>,
        provider: Arc<dyn IdentityProvider>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let credential = match storage.load() {
            Ok(Some(credential)) => credential,
            Ok(None) => {
                log::info!("no stored spotify credentials found");
                Credential::empty(clock.now())
            }
            Err(err) => {
                log::warn!("cannot read stored spotify credentials: {err}");
                Credential::empty(clock.now())
            }
        };

        Self {
            credential: Mutex::new(credential),
            provider,
            storage,
            clock,
        }
    }

    pub async fn is_authorized(&self) -> bool {
        !self.credential.lock().await.refresh_token.is_empty()
    }

    pub fn authorize_url(&self) -> Result<String, AuthError> {
        self.provider.authorize_url()
    }

    pub async fn authorize(&self, code: &str) -> Result<(), AuthError> {
        let mut credential = self.credential.lock().await;
        let grant = self.provider.exchange_code(code).await?;
        let fresh = Credential::from_grant(grant, "", self.clock.now());
        if fresh.refresh_token.is_empty() {
            return Err(AuthError::Provider("no refresh token was issued".into()));
        }
        *credential = fresh;
        self.persist(&credential);
        log::info!("authorized with spotify");
        Ok(())
    }

    /// Returns a credential that is valid right now, refreshing it first if it expired.
    ///
    /// The lock is held across the refresh, so callers arriving while a refresh
    /// is in flight wait for it and then see the new credential.
    pub async fn ensure_fresh(&self) -> Result<Credential, AuthError> {
        let mut credential = self.credential.lock().await;
        let now = self.clock.now();
        if !credential.is_expired(now) {
            return Ok(credential.clone());
        }

        if credential.refresh_token.is_empty() {
            return Err(AuthError::Unauthorized);
        }

        log::info!("spotify token expired, refreshing");
        let grant = self.provider.refresh(&credential.refresh_token).await?;
        let fresh = Credential::from_grant(grant, &credential.refresh_token, self.clock.now());
        *credential = fresh.clone();
        self.persist(&fresh);
        Ok(fresh)
    }

    // the new token stays usable in memory, it just won't survive a restart
    fn persist(&self, credential: &Credential) {
        if let Err(err) = self.storage.save(credential) {
            log::error!("cannot save spotify credentials: {err}");
        }
    }
}
