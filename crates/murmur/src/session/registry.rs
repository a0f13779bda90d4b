use crate::{Error, RandSource, Result, SessionToken, ThreadRandom};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
#[cfg(feature = "tracing")]
use tracing::instrument;

/// Registry state: one map keyed by token plus a reverse index keyed by
/// origin. Both live behind the same lock and are only mutated together.
#[derive(Default)]
struct State {
    sessions: HashMap<SessionToken, Entry>,
    origins: HashMap<Arc<str>, SessionToken>,
}

struct Entry {
    origin: Arc<str>,
    predicting: bool,
}

/// Tracks admitted session tokens under a fixed capacity with at most one
/// live token per origin.
///
/// Every mutation runs its checks and its writes inside a single write-lock
/// critical section, so concurrent registrations at the capacity boundary can
/// never overshoot `capacity` or admit the same origin twice. Read-only
/// lookups ([`Self::is_valid`]) share a read lock and never observe a token
/// without its origin (or the reverse).
///
/// ## Features
///
/// - ✅ Thread-safe
/// - ✅ Capacity bounded
/// - ✅ Per-origin exclusivity
///
/// # Example
/// ```
/// use murmur::{Error, SessionRegistry};
///
/// let registry = SessionRegistry::new(1);
/// let token = registry.register("10.0.0.1").unwrap();
/// assert!(registry.is_valid(&token));
/// assert_eq!(registry.register("10.0.0.2"), Err(Error::Full));
///
/// registry.release(&token).unwrap();
/// assert!(registry.register("10.0.0.2").is_ok());
/// ```
pub struct SessionRegistry<R = ThreadRandom>
where
    R: RandSource<u128>,
{
    state: RwLock<State>,
    capacity: usize,
    rng: R,
}

impl SessionRegistry<ThreadRandom> {
    /// Creates an empty registry admitting at most `capacity` sessions, using
    /// the thread-local CSPRNG for tokens.
    pub fn new(capacity: usize) -> Self {
        Self::with_rng(capacity, ThreadRandom)
    }
}

impl<R> SessionRegistry<R>
where
    R: RandSource<u128>,
{
    /// Creates an empty registry that draws tokens from `rng`.
    pub fn with_rng(capacity: usize, rng: R) -> Self {
        Self {
            state: RwLock::new(State::default()),
            capacity,
            rng,
        }
    }

    /// Admits `origin` and returns a fresh session token.
    ///
    /// # Errors
    ///
    /// - [`Error::Full`] if the registry already holds `capacity` tokens.
    /// - [`Error::Duplicate`] if `origin` already owns a live token.
    #[cfg_attr(feature = "tracing", instrument(level = "debug", skip(self)))]
    pub fn register(&self, origin: &str) -> Result<SessionToken> {
        let mut state = self.state.write();

        if state.sessions.len() >= self.capacity {
            return Err(Error::Full);
        }
        if state.origins.contains_key(origin) {
            return Err(Error::Duplicate);
        }

        let token = loop {
            let candidate = SessionToken::generate(&self.rng);
            if !state.sessions.contains_key(&candidate) {
                break candidate;
            }
        };

        let origin: Arc<str> = Arc::from(origin);
        state.origins.insert(Arc::clone(&origin), token);
        state.sessions.insert(
            token,
            Entry {
                origin,
                predicting: false,
            },
        );

        Ok(token)
    }

    /// Admits `origin` and ties the token's lifetime to the returned guard.
    ///
    /// # Errors
    ///
    /// Same as [`Self::register`].
    pub fn register_guarded(self: &Arc<Self>, origin: &str) -> Result<RegistrationGuard<R>> {
        let token = self.register(origin)?;
        Ok(RegistrationGuard {
            token,
            registry: Arc::clone(self),
        })
    }

    /// Removes `token` and its origin, returning the origin it belonged to.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] if the token is not registered; the registry is
    /// left untouched.
    #[cfg_attr(feature = "tracing", instrument(level = "debug", skip(self)))]
    pub fn release(&self, token: &SessionToken) -> Result<Arc<str>> {
        let mut state = self.state.write();
        let entry = state.sessions.remove(token).ok_or(Error::NotFound)?;
        state.origins.remove(&entry.origin);
        Ok(entry.origin)
    }

    /// Returns `true` if `token` is currently registered.
    pub fn is_valid(&self, token: &SessionToken) -> bool {
        self.state.read().sessions.contains_key(token)
    }

    /// Marks `token` as serving a prediction until the lease is dropped.
    ///
    /// # Errors
    ///
    /// - [`Error::NotFound`] if the token is not registered.
    /// - [`Error::Busy`] if another lease is outstanding for the token.
    #[cfg_attr(feature = "tracing", instrument(level = "debug", skip(self)))]
    pub fn begin_prediction(self: &Arc<Self>, token: &SessionToken) -> Result<PredictionLease<R>> {
        let mut state = self.state.write();
        let entry = state.sessions.get_mut(token).ok_or(Error::NotFound)?;
        if entry.predicting {
            return Err(Error::Busy);
        }
        entry.predicting = true;
        Ok(PredictionLease {
            token: *token,
            registry: Arc::clone(self),
        })
    }

    /// Number of live tokens.
    pub fn len(&self) -> usize {
        self.state.read().sessions.len()
    }

    /// Returns `true` if no token is live.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum number of simultaneously live tokens.
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    fn end_prediction(&self, token: &SessionToken) {
        if let Some(entry) = self.state.write().sessions.get_mut(token) {
            entry.predicting = false;
        }
    }

    #[cfg(test)]
    pub(crate) fn check_invariants(&self) {
        let state = self.state.read();
        assert!(state.sessions.len() <= self.capacity);
        assert_eq!(state.sessions.len(), state.origins.len());
        for (token, entry) in &state.sessions {
            assert_eq!(state.origins.get(&entry.origin), Some(token));
        }
    }
}

/// Owns a registered token and releases it when dropped.
///
/// The registration connection holds this guard for exactly as long as the
/// connection lives, so every way the connection can end (client close,
/// protocol error, server shutdown, panic unwind) releases the token.
pub struct RegistrationGuard<R = ThreadRandom>
where
    R: RandSource<u128>,
{
    token: SessionToken,
    registry: Arc<SessionRegistry<R>>,
}

impl<R> RegistrationGuard<R>
where
    R: RandSource<u128>,
{
    /// The guarded session token.
    pub const fn token(&self) -> SessionToken {
        self.token
    }
}

impl<R> Drop for RegistrationGuard<R>
where
    R: RandSource<u128>,
{
    fn drop(&mut self) {
        // An already released token reports NotFound; nothing to undo.
        let _ = self.registry.release(&self.token);
    }
}

/// Exclusive right to run one prediction flow on a token.
///
/// Dropping the lease frees the token for the next prediction. If the token
/// was released in the meantime, dropping is a no-op.
pub struct PredictionLease<R = ThreadRandom>
where
    R: RandSource<u128>,
{
    token: SessionToken,
    registry: Arc<SessionRegistry<R>>,
}

impl<R> PredictionLease<R>
where
    R: RandSource<u128>,
{
    /// The leased session token.
    pub const fn token(&self) -> SessionToken {
        self.token
    }
}

impl<R> Drop for PredictionLease<R>
where
    R: RandSource<u128>,
{
    fn drop(&mut self) {
        self.registry.end_prediction(&self.token);
    }
}
