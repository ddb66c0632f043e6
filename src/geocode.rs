//! Stay labeling and the reverse-geocoding request queue.
//!
//! [`GeocodeQueue::resolve_stays`] labels every stay that has no zone, trying in
//! order:
//! 1. majority overlap with the place-history sensor
//! 2. the persisted geocode cache
//! 3. "Unknown location" when no contact key is configured
//! 4. a queued reverse-geocoding lookup (the stay shows "Loading address..."
//!    until the lookup resolves)
//!
//! The queue:
//! - Deduplicates lookups by cache key; every caller waiting on a key is
//!   notified once when it resolves
//! - Runs a single drain task that spaces requests `request_interval_ms` apart,
//!   measured from the end of the previous request
//! - Retries failed requests at the back of the queue until the attempt budget
//!   is spent, then reports "Unknown location"
//! - Tags every lookup with a session number; [`GeocodeQueue::clear`] starts a
//!   new session and late responses from older sessions are dropped
//!
//! The queue never touches segments itself. Callers receive a [`GeocodeUpdate`]
//! and apply it with [`apply_update`].

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures::future::BoxFuture;
use log::{debug, info, warn};
use serde_json::{json, Value};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::cache::{CacheEntry, GeocodeCache};
use crate::config::GeocodeSettings;
use crate::places::{build_place_intervals, pick_place_name, PlaceState};
use crate::{GpsPoint, Segment};

/// Label for stays that could not be resolved.
pub const UNKNOWN_LOCATION: &str = "Unknown location";
/// Placeholder label while a lookup is queued or in flight.
pub const LOADING_LOCATION: &str = "Loading address...";

// ============================================================================
// Transport
// ============================================================================

/// Why a single reverse-geocoding request failed.
#[derive(Debug, Clone, PartialEq)]
pub enum GeocodeError {
    /// The service answered with a non-success HTTP status
    Status(u16),
    /// The request never got a response
    Transport(String),
    /// The response body was not usable JSON
    Decode(String),
    /// No response within the configured timeout
    Timeout,
}

impl std::fmt::Display for GeocodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GeocodeError::Status(code) => write!(f, "HTTP {}", code),
            GeocodeError::Transport(e) => write!(f, "request error: {}", e),
            GeocodeError::Decode(e) => write!(f, "JSON parse error: {}", e),
            GeocodeError::Timeout => write!(f, "request timed out"),
        }
    }
}

impl std::error::Error for GeocodeError {}

/// One outbound reverse-geocoding request.
#[derive(Debug, Clone, PartialEq)]
pub struct LookupRequest {
    pub endpoint: String,
    pub latitude: f64,
    pub longitude: f64,
    /// Contact identifier required by the service's usage policy
    pub contact: String,
}

/// A reverse-geocoding service.
///
/// Returns the provider's raw JSON payload; name extraction is done by the
/// queue with [`parse_place_name`].
pub trait ReverseGeocoder: Send + Sync {
    fn reverse<'a>(&'a self, request: &'a LookupRequest) -> BoxFuture<'a, Result<Value, GeocodeError>>;
}

/// Extract a display name from a Nominatim-style payload.
///
/// Tries, in order: street and house number with the city, locality with the
/// city, the provider's `display_name`, the provider's `name`.
///
/// # Example
/// ```
/// use serde_json::json;
/// use stay_timeline::parse_place_name;
///
/// let payload = json!({
///     "display_name": "10, Downing Street, Westminster, London, SW1A 2AA, United Kingdom",
///     "address": { "house_number": "10", "road": "Downing Street", "city": "London" }
/// });
/// assert_eq!(parse_place_name(&payload), "Downing Street 10, London");
/// ```
pub fn parse_place_name(payload: &Value) -> String {
    let address = payload.get("address");
    let field = |keys: &[&str]| -> Option<String> {
        let address = address?;
        keys.iter()
            .filter_map(|k| address.get(*k).and_then(Value::as_str))
            .map(str::trim)
            .find(|v| !v.is_empty())
            .map(str::to_string)
    };

    let city = field(&["city", "town", "village", "municipality"]);
    if let Some(city) = &city {
        if let Some(road) = field(&["road", "pedestrian", "footway"]) {
            return match field(&["house_number"]) {
                Some(number) => format!("{} {}, {}", road, number, city),
                None => format!("{}, {}", road, city),
            };
        }
        if let Some(locality) = field(&["suburb", "neighbourhood", "hamlet", "quarter"]) {
            return format!("{}, {}", locality, city);
        }
    }

    ["display_name", "name"]
        .iter()
        .filter_map(|k| payload.get(*k).and_then(Value::as_str))
        .map(str::trim)
        .find(|v| !v.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| UNKNOWN_LOCATION.to_string())
}

/// Quantize a center to the cache key format `"lat,lon"` at 5 decimals (~1 m).
pub fn cache_key(center: &GpsPoint) -> String {
    format!("{:.5},{:.5}", center.latitude, center.longitude)
}

// ============================================================================
// Updates
// ============================================================================

/// The outcome of a lookup, delivered to every waiting caller.
#[derive(Debug, Clone, PartialEq)]
pub struct GeocodeUpdate {
    pub cache_key: String,
    pub place_name: String,
    pub result: Option<Value>,
}

/// Notification hook invoked once per resolved lookup.
pub type UpdateCallback = Arc<dyn Fn(&GeocodeUpdate) + Send + Sync>;

/// Write `update` into every unzoned stay with the matching cache key.
///
/// Returns how many stays changed.
pub fn apply_update(segments: &mut [Segment], update: &GeocodeUpdate) -> usize {
    let mut applied = 0;
    for segment in segments.iter_mut() {
        let Segment::Stay(stay) = segment else {
            continue;
        };
        if stay.zone_name.is_some() || stay.cache_key() != update.cache_key {
            continue;
        }
        stay.place_name = Some(update.place_name.clone());
        stay.reverse_geocoding = update.result.clone();
        applied += 1;
    }
    applied
}

/// Label stays whose lookups were cancelled by [`GeocodeQueue::clear`].
///
/// Only stays still showing the loading placeholder are touched.
pub fn mark_cancelled(segments: &mut [Segment], cancelled_keys: &[String]) -> usize {
    let mut marked = 0;
    for segment in segments.iter_mut() {
        let Segment::Stay(stay) = segment else {
            continue;
        };
        if stay.place_name.as_deref() == Some(LOADING_LOCATION)
            && cancelled_keys.contains(&stay.cache_key())
        {
            stay.place_name = Some(UNKNOWN_LOCATION.to_string());
            stay.reverse_geocoding = None;
            marked += 1;
        }
    }
    marked
}

/// Inputs for [`GeocodeQueue::resolve_stays`].
#[derive(Clone)]
pub struct ResolveOptions<'a> {
    /// The day's place-sensor history (any order)
    pub place_states: &'a [PlaceState],
    /// End of the day being shown, clamps the last place interval
    pub day_end_ms: i64,
    /// Contact key for the geocoding service; lookups are skipped without it
    pub api_key: Option<&'a str>,
    pub on_update: UpdateCallback,
}

// ============================================================================
// Queue
// ============================================================================

#[derive(Debug, Clone)]
struct QueuedLookup {
    cache_key: String,
    center: GpsPoint,
    api_key: String,
    session: u64,
    attempts_left: u32,
}

#[derive(Default)]
struct QueueState {
    queued: VecDeque<QueuedLookup>,
    /// Callbacks waiting on each in-progress cache key
    pending: HashMap<String, Vec<UpdateCallback>>,
    session: u64,
    running: bool,
    /// Bumped by shutdown; a drain task from an older generation exits
    worker_generation: u64,
    last_request_at: Option<Instant>,
    requests_sent: u64,
    worker: Option<JoinHandle<()>>,
}

struct QueueInner {
    geocoder: Arc<dyn ReverseGeocoder>,
    settings: GeocodeSettings,
    cache: Mutex<GeocodeCache>,
    state: Mutex<QueueState>,
}

/// Rate-limited, deduplicating reverse-geocoding queue.
///
/// Cloning yields another handle to the same queue. Enqueuing spawns the drain
/// task on the current Tokio runtime, so it must happen inside one.
#[derive(Clone)]
pub struct GeocodeQueue {
    inner: Arc<QueueInner>,
}

impl GeocodeQueue {
    pub fn new(geocoder: Arc<dyn ReverseGeocoder>, settings: GeocodeSettings, cache: GeocodeCache) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                geocoder,
                settings,
                cache: Mutex::new(cache),
                state: Mutex::new(QueueState::default()),
            }),
        }
    }

    pub fn settings(&self) -> &GeocodeSettings {
        &self.inner.settings
    }

    /// Label every unzoned, unlabeled stay.
    ///
    /// Returns how many callback registrations were made. Each one is answered
    /// by exactly one update, so re-running on the same segments while their
    /// lookups are in flight returns 0.
    pub fn resolve_stays(&self, segments: &mut [Segment], options: &ResolveOptions<'_>) -> usize {
        let intervals = build_place_intervals(options.place_states, options.day_end_ms);
        let api_key = options.api_key.map(str::trim).filter(|k| !k.is_empty());
        let mut queued = 0;

        for segment in segments.iter_mut() {
            let Segment::Stay(stay) = segment else {
                continue;
            };
            if stay.zone_name.is_some() {
                continue;
            }
            match stay.place_name.as_deref() {
                Some(LOADING_LOCATION) if self.is_pending(&stay.cache_key()) => continue,
                Some(LOADING_LOCATION) | None => {}
                Some(_) => continue,
            }

            if let Some(name) = pick_place_name(&intervals, stay.start, stay.end) {
                stay.reverse_geocoding = Some(json!({ "source": "places", "name": name }));
                stay.place_name = Some(name);
                continue;
            }

            let key = stay.cache_key();
            if let Some(entry) = self.cached(&key) {
                stay.place_name = Some(entry.place_name);
                stay.reverse_geocoding = entry.result;
                continue;
            }

            let Some(api_key) = api_key else {
                stay.place_name = Some(UNKNOWN_LOCATION.to_string());
                stay.reverse_geocoding = None;
                continue;
            };

            stay.place_name = Some(LOADING_LOCATION.to_string());
            stay.reverse_geocoding = None;
            if self.enqueue(&key, stay.center, api_key, options.on_update.clone()) {
                queued += 1;
            }
        }

        debug!("[GeocodeQueue] resolve_stays queued {} lookups", queued);
        queued
    }

    /// Queue a lookup for `cache_key`, or join the one already in progress.
    ///
    /// Returns `false` when `on_update` was already waiting on this key.
    pub fn enqueue(&self, cache_key: &str, center: GpsPoint, api_key: &str, on_update: UpdateCallback) -> bool {
        let mut state = self.inner.lock_state();

        if let Some(waiting) = state.pending.get_mut(cache_key) {
            if waiting.iter().any(|cb| Arc::ptr_eq(cb, &on_update)) {
                return false;
            }
            waiting.push(on_update);
            debug!("[GeocodeQueue] {} already pending ({} waiters)", cache_key, waiting.len());
            return true;
        }

        state.pending.insert(cache_key.to_string(), vec![on_update]);
        let lookup = QueuedLookup {
            cache_key: cache_key.to_string(),
            center,
            api_key: api_key.to_string(),
            session: state.session,
            attempts_left: self.inner.settings.max_attempts.max(1),
        };
        state.queued.push_back(lookup);
        debug!("[GeocodeQueue] Queued {} (queue length {})", cache_key, state.queued.len());

        if !state.running {
            state.running = true;
            let inner = Arc::clone(&self.inner);
            state.worker = Some(tokio::spawn(drain(inner, state.worker_generation)));
        }
        true
    }

    /// Start a new session, dropping all queued lookups and waiting callbacks.
    ///
    /// A request already in flight still completes but its result is ignored.
    /// Returns the cache keys that will never be reported, in no particular order.
    pub fn clear(&self) -> Vec<String> {
        let mut state = self.inner.lock_state();
        state.session += 1;
        state.queued.clear();
        let cancelled: Vec<String> = state.pending.drain().map(|(key, _)| key).collect();
        if !cancelled.is_empty() {
            info!(
                "[GeocodeQueue] Session {} started, cancelled {} lookups",
                state.session,
                cancelled.len()
            );
        }
        cancelled
    }

    /// Clear the queue and stop the drain task.
    pub fn shutdown(&self) -> Vec<String> {
        let cancelled = self.clear();
        let mut state = self.inner.lock_state();
        state.worker_generation += 1;
        if let Some(worker) = state.worker.take() {
            worker.abort();
        }
        state.running = false;
        cancelled
    }

    /// Current session number.
    pub fn session(&self) -> u64 {
        self.inner.lock_state().session
    }

    /// Lookups queued but not yet sent.
    pub fn queued_len(&self) -> usize {
        self.inner.lock_state().queued.len()
    }

    /// Total requests sent to the geocoder, retries included.
    pub fn requests_sent(&self) -> u64 {
        self.inner.lock_state().requests_sent
    }

    /// Whether a lookup for `cache_key` is queued or in flight.
    pub fn is_pending(&self, cache_key: &str) -> bool {
        self.inner.lock_state().pending.contains_key(cache_key)
    }

    /// Whether the drain task is currently active.
    pub fn is_running(&self) -> bool {
        self.inner.lock_state().running
    }

    pub fn cached(&self, cache_key: &str) -> Option<CacheEntry> {
        self.inner.lock_cache().get(cache_key).cloned()
    }
}

impl QueueInner {
    fn lock_state(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_cache(&self) -> MutexGuard<'_, GeocodeCache> {
        self.cache.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn request_for(&self, lookup: &QueuedLookup) -> LookupRequest {
        LookupRequest {
            endpoint: self.settings.reverse_url.clone(),
            latitude: lookup.center.latitude,
            longitude: lookup.center.longitude,
            contact: lookup.api_key.clone(),
        }
    }

    fn complete(&self, lookup: QueuedLookup, outcome: Result<Value, GeocodeError>) {
        match outcome {
            Ok(payload) => {
                let name = parse_place_name(&payload);
                debug!("[GeocodeQueue] {} -> {}", lookup.cache_key, name);
                self.finish(&lookup, name, Some(payload));
            }
            Err(e) => {
                let attempts_left = lookup.attempts_left.saturating_sub(1);
                {
                    let mut state = self.lock_state();
                    if lookup.session != state.session {
                        debug!("[GeocodeQueue] Dropping stale failure for {}", lookup.cache_key);
                        return;
                    }
                    if attempts_left > 0 {
                        warn!(
                            "[GeocodeQueue] {} failed: {}, {} attempts left",
                            lookup.cache_key, e, attempts_left
                        );
                        state.queued.push_back(QueuedLookup { attempts_left, ..lookup });
                        return;
                    }
                }
                warn!("[GeocodeQueue] {} failed: {}, giving up", lookup.cache_key, e);
                self.finish(&lookup, UNKNOWN_LOCATION.to_string(), None);
            }
        }
    }

    fn finish(&self, lookup: &QueuedLookup, place_name: String, result: Option<Value>) {
        let callbacks = {
            let mut state = self.lock_state();
            if lookup.session != state.session {
                debug!("[GeocodeQueue] Dropping stale result for {}", lookup.cache_key);
                return;
            }
            state.pending.remove(&lookup.cache_key).unwrap_or_default()
        };

        // "Unknown" is never authoritative, the next day-load may retry it
        if result.is_some() && place_name != UNKNOWN_LOCATION {
            self.lock_cache().insert(
                &lookup.cache_key,
                CacheEntry {
                    place_name: place_name.clone(),
                    result: result.clone(),
                },
            );
        }

        let update = GeocodeUpdate {
            cache_key: lookup.cache_key.clone(),
            place_name,
            result,
        };
        for callback in callbacks {
            callback(&update);
        }
    }
}

/// Drain loop: one request at a time, spaced by the request interval.
async fn drain(inner: Arc<QueueInner>, generation: u64) {
    let interval = Duration::from_millis(inner.settings.request_interval_ms);
    let timeout = Duration::from_millis(inner.settings.request_timeout_ms.max(1));

    loop {
        let wait = {
            let mut state = inner.lock_state();
            if state.worker_generation != generation {
                return;
            }
            if state.queued.is_empty() {
                state.running = false;
                state.worker = None;
                return;
            }
            state
                .last_request_at
                .map_or(Duration::ZERO, |last| (last + interval).saturating_duration_since(Instant::now()))
        };

        if !wait.is_zero() {
            tokio::time::sleep(wait).await;
        }

        let lookup = {
            let mut state = inner.lock_state();
            if state.worker_generation != generation {
                return;
            }
            match state.queued.pop_front() {
                Some(lookup) if lookup.session == state.session => {
                    state.requests_sent += 1;
                    lookup
                }
                // Cleared while we were sleeping
                _ => continue,
            }
        };

        let request = inner.request_for(&lookup);
        debug!(
            "[GeocodeQueue] Requesting {} (session {}, {} attempts left)",
            lookup.cache_key, lookup.session, lookup.attempts_left
        );
        let outcome = match tokio::time::timeout(timeout, inner.geocoder.reverse(&request)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(GeocodeError::Timeout),
        };

        inner.lock_state().last_request_at = Some(Instant::now());
        inner.complete(lookup, outcome);
    }
}
