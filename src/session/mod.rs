//! Encrypted, cookie-backed sessions.
//!
//! A session is restored from its cookie, or created, the first time a
//! request asks for it. Every later call in the same request, concurrent or
//! not, gets the same [`Session`] handle:
//!
//! ```rust,no_run
//! use kite::{App, Event, HttpError, Json, SessionConfig, use_session};
//!
//! async fn whoami(event: Event) -> Result<Json<kite::Session>, HttpError> {
//!     let config = SessionConfig::new(std::env::var("SESSION_PASSWORD").unwrap_or_default());
//!     let session = use_session(&event, &config).await?;
//!     Ok(Json(session))
//! }
//!
//! let app = App::new().get("/me", whoami);
//! ```
//!
//! Updates re-seal the session and stage a `Set-Cookie` on the event; the
//! header is written once, when the response is finalized, with the last
//! staged value.

mod seal;

use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use tracing::debug;
use uuid::Uuid;

use crate::cookie::{CookieOptions, SetCookie};
use crate::error::Error;
use crate::event::{Event, SharedOverrides, lock};

/// Minimum password length, in characters.
pub const MIN_PASSWORD_LEN: usize = 32;

const DEFAULT_NAME: &str = "kite";

type IdGenerator = Arc<dyn Fn() -> String + Send + Sync>;

/// How a session is stored and identified.
///
/// Two configs address the same session when they share the cookie name,
/// the password and the *same* `generate_id` function instance.
#[derive(Clone)]
pub struct SessionConfig {
    name: String,
    password: String,
    generate_id: IdGenerator,
    max_age: Option<Duration>,
    cookie: CookieOptions,
    session_header: bool,
}

impl SessionConfig {
    pub fn new(password: impl Into<String>) -> Self {
        Self {
            name: DEFAULT_NAME.to_owned(),
            password: password.into(),
            generate_id: Arc::new(|| Uuid::new_v4().to_string()),
            max_age: None,
            cookie: CookieOptions::default(),
            session_header: false,
        }
    }

    /// Cookie name. Defaults to `kite`.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Id source for new sessions. Defaults to random UUIDs.
    pub fn generate_id(mut self, generate: impl Fn() -> String + Send + Sync + 'static) -> Self {
        self.generate_id = Arc::new(generate);
        self
    }

    /// Lifetime measured from session creation. Without one, the cookie
    /// lasts for the browser session and the payload never expires.
    pub fn max_age(mut self, max_age: Duration) -> Self {
        self.max_age = Some(max_age);
        self
    }

    pub fn cookie(mut self, options: CookieOptions) -> Self {
        self.cookie = options;
        self
    }

    /// Also accept the sealed session from the `x-kite-session-<name>`
    /// request header, for clients that cannot keep cookies. The header wins
    /// over the cookie.
    pub fn session_header(mut self, enabled: bool) -> Self {
        self.session_header = enabled;
        self
    }

    pub fn cookie_name(&self) -> &str {
        &self.name
    }

    fn validate(&self) -> Result<(), Error> {
        if self.name.is_empty() {
            return Err(Error::SessionConfig("cookie name must not be empty"));
        }
        if self.password.is_empty() {
            return Err(Error::SessionConfig("password is required"));
        }
        if self.password.chars().count() < MIN_PASSWORD_LEN {
            return Err(Error::SessionConfig("password must be at least 32 characters"));
        }
        Ok(())
    }

    /// Event slot key: name, password fingerprint and generator identity.
    fn slot_key(&self) -> String {
        let digest = Sha256::digest(self.password.as_bytes());
        let fingerprint: String = digest.iter().take(8).map(|b| format!("{b:02x}")).collect();
        let generator = Arc::as_ptr(&self.generate_id) as *const ();
        format!("kite.session:{}:{fingerprint}:{generator:p}", self.name)
    }

    fn incoming(&self, event: &Event) -> Option<String> {
        if self.session_header {
            let header = format!("x-kite-session-{}", self.name.to_ascii_lowercase());
            if let Some(token) = event.header(&header) {
                return Some(token.to_owned());
            }
        }
        event.cookie(&self.name)
    }

    fn open(&self, token: &str) -> Option<Stored> {
        let plaintext = match seal::unseal(&self.password, &self.name, token) {
            Ok(plaintext) => plaintext,
            Err(reason) => {
                debug!(session = %self.name, reason, "discarding session cookie");
                return None;
            }
        };
        let stored: Stored = match serde_json::from_slice(&plaintext) {
            Ok(stored) => stored,
            Err(err) => {
                debug!(session = %self.name, error = %err, "discarding undecodable session");
                return None;
            }
        };
        if let Some(max_age) = self.max_age {
            if stored.created_at.saturating_add(millis(max_age)) < now_millis() {
                debug!(session = %self.name, id = %stored.id, "discarding expired session");
                return None;
            }
        }
        Some(stored)
    }
}

impl fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionConfig")
            .field("name", &self.name)
            .field("max_age", &self.max_age)
            .field("cookie", &self.cookie)
            .field("session_header", &self.session_header)
            .finish_non_exhaustive()
    }
}

/// What the cookie carries.
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Stored {
    id: String,
    data: Map<String, Value>,
    created_at: u64,
}

// ── Session ───────────────────────────────────────────────────────────────────

/// A handle to the request's session. Clones share the same data.
///
/// Serializes as `{"id", "createdAt", "data"}`.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    id: String,
    created_at: u64,
    data: Mutex<Map<String, Value>>,
    config: SessionConfig,
    // The event's staged response state, not the event itself: the session
    // lives inside the event's slots.
    overrides: SharedOverrides,
}

impl Session {
    fn load(event: &Event, config: &SessionConfig) -> Result<Self, Error> {
        if let Some(stored) = config.incoming(event).and_then(|token| config.open(&token)) {
            return Ok(Self::from_stored(stored, config, event));
        }

        let stored = Stored {
            id: (config.generate_id)(),
            data: Map::new(),
            created_at: now_millis(),
        };
        debug!(session = %config.name, id = %stored.id, "starting new session");
        let session = Self::from_stored(stored, config, event);
        session.persist()?;
        Ok(session)
    }

    fn from_stored(stored: Stored, config: &SessionConfig, event: &Event) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                id: stored.id,
                created_at: stored.created_at,
                data: Mutex::new(stored.data),
                config: config.clone(),
                overrides: event.overrides(),
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// Creation time in milliseconds since the Unix epoch.
    pub fn created_at(&self) -> u64 {
        self.inner.created_at
    }

    /// A snapshot of the session data.
    pub fn data(&self) -> Map<String, Value> {
        lock(&self.inner.data).clone()
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        lock(&self.inner.data).get(key).cloned()
    }

    /// Shallow-merges `patch` into the data and stages the new cookie.
    ///
    /// Must run before the response is finalized: from `on_response` the
    /// data still changes but the cookie is never sent (a `warn` is logged).
    pub fn update(&self, patch: Map<String, Value>) -> Result<(), Error> {
        self.update_with(|data| data.extend(patch))
    }

    /// Edits the data in place and stages the new cookie.
    pub fn update_with(&self, edit: impl FnOnce(&mut Map<String, Value>)) -> Result<(), Error> {
        edit(&mut lock(&self.inner.data));
        self.persist()
    }

    fn persist(&self) -> Result<(), Error> {
        let config = &self.inner.config;
        let stored = Stored {
            id: self.inner.id.clone(),
            data: self.data(),
            created_at: self.inner.created_at,
        };
        let plaintext = serde_json::to_vec(&stored).map_err(|e| Error::Seal(e.to_string()))?;
        let token = seal::seal(&config.password, &config.name, &plaintext)?;

        let mut cookie = SetCookie::new(config.name.clone(), token).options(config.cookie.clone());
        if let Some(max_age) = config.max_age {
            let age = now_millis().saturating_sub(self.inner.created_at);
            let remaining = millis(max_age).saturating_sub(age);
            cookie = cookie.max_age(Duration::from_millis(remaining));
        }
        lock(&self.inner.overrides).stage_cookie(cookie);
        Ok(())
    }
}

impl Serialize for Session {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("Session", 3)?;
        state.serialize_field("id", self.id())?;
        state.serialize_field("createdAt", &self.created_at())?;
        state.serialize_field("data", &self.data())?;
        state.end()
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.inner.id)
            .field("created_at", &self.inner.created_at)
            .finish_non_exhaustive()
    }
}

// ── Access ────────────────────────────────────────────────────────────────────

/// Returns the request's session for `config`, restoring or creating it on
/// first use.
///
/// Initialization runs at most once per event and config: concurrent callers
/// await the same result. A missing, forged or expired cookie silently
/// yields a new session. Only an unusable config is an error.
pub async fn use_session(event: &Event, config: &SessionConfig) -> Result<Session, Error> {
    config.validate()?;
    event
        .get_or_init(&config.slot_key(), || async { Session::load(event, config) })
        .await
}

/// Alias of [`use_session`].
pub async fn get_session(event: &Event, config: &SessionConfig) -> Result<Session, Error> {
    use_session(event, config).await
}

/// Forgets the request's session and tells the client to drop its cookie.
/// The next [`use_session`] call on this event starts a new session.
pub fn clear_session(event: &Event, config: &SessionConfig) -> Result<(), Error> {
    config.validate()?;
    event.remove_context::<Session>(&config.slot_key());
    let expired = SetCookie::new(config.name.clone(), "")
        .max_age(Duration::ZERO)
        .options(config.cookie.clone());
    event.set_cookie(expired);
    Ok(())
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, millis)
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
