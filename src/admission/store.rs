//! Counter Store Adapter (C1).
//!
//! Exposes a single atomic primitive, `admit_and_charge`, over a shared
//! ordered-set store, plus a non-mutating `usage` query. Two backends
//! implement the same trait: `RedisCounterStore` for production, and
//! `InMemoryCounterStore` as a drop-in stand-in for single-node or test
//! operation (same semantics, no external dependency).

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// One key triple for a credential: `(input_tokens, output_tokens, requests)`.
#[derive(Debug, Clone, Copy)]
pub struct CounterKeys<'a> {
    pub input: &'a str,
    pub output: &'a str,
    pub requests: &'a str,
}

impl<'a> CounterKeys<'a> {
    pub fn for_credential(credential: &'a str, buf: &'a mut [String; 3]) -> CounterKeys<'a> {
        buf[0] = format!("rate_limit:{credential}:input_tokens");
        buf[1] = format!("rate_limit:{credential}:output_tokens");
        buf[2] = format!("rate_limit:{credential}:requests");
        CounterKeys {
            input: &buf[0],
            output: &buf[1],
            requests: &buf[2],
        }
    }
}

/// TTL refreshed on every successful charge (hygiene bound, not the window).
pub const KEY_TTL_SECS: u64 = 3600;
/// The sliding window width.
pub const WINDOW_SECS: u64 = 60;

/// Outcome of `admit_and_charge`. The `reason` is the human-readable message
/// surfaced verbatim to the client; its wording and ordering are part of the
/// contract (tests assert on it).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdmitOutcome {
    pub admitted: bool,
    pub reason: String,
}

impl AdmitOutcome {
    fn ok() -> Self {
        Self {
            admitted: true,
            reason: "OK".to_string(),
        }
    }

    fn rejected(reason: impl Into<String>) -> Self {
        Self {
            admitted: false,
            reason: reason.into(),
        }
    }
}

/// Current usage snapshot for `/v1/usage/{credential}`.
#[derive(Debug, Clone, Copy)]
pub struct Usage {
    pub input_used: u64,
    pub output_used: u64,
    pub requests_used: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{0}")]
    Backend(String),
}

/// Server-side-atomic check-and-charge against a shared ordered-set store.
/// Implementations MUST realize §4.1 steps 1-4 as one indivisible unit per
/// credential; the trait itself only describes the observable contract.
#[async_trait]
pub trait CounterStore: Send + Sync {
    async fn admit_and_charge(
        &self,
        credential: &str,
        input_units: u64,
        output_units: u64,
        request_units: u64,
        input_limit: u64,
        output_limit: u64,
        request_limit: u64,
    ) -> Result<AdmitOutcome, StoreError>;

    async fn usage(&self, credential: &str) -> Result<Usage, StoreError>;
}

pub fn unix_now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before epoch")
        .as_secs()
}

// ---------------------------------------------------------------------------
// Redis backend
// ---------------------------------------------------------------------------

/// Atomic admission script: a direct translation of the reference Lua
/// script (prune → read → compare in order → insert → refresh TTL). `KEYS`
/// are the three counter keys; `ARGV` carries `now, window_start,
/// input_units, output_units, request_units, input_limit, output_limit,
/// request_limit, nonce_seed`.
const ADMIT_SCRIPT: &str = r#"
local input_key = KEYS[1]
local output_key = KEYS[2]
local request_key = KEYS[3]

local now = tonumber(ARGV[1])
local window_start = tonumber(ARGV[2])
local input_units = tonumber(ARGV[3])
local output_units = tonumber(ARGV[4])
local request_units = tonumber(ARGV[5])
local input_limit = tonumber(ARGV[6])
local output_limit = tonumber(ARGV[7])
local request_limit = tonumber(ARGV[8])
local nonce_seed = ARGV[9]

redis.call('ZREMRANGEBYSCORE', input_key, '-inf', window_start)
redis.call('ZREMRANGEBYSCORE', output_key, '-inf', window_start)
redis.call('ZREMRANGEBYSCORE', request_key, '-inf', window_start)

local current_input = redis.call('ZCARD', input_key)
local current_output = redis.call('ZCARD', output_key)
local current_requests = redis.call('ZCARD', request_key)

if current_input + input_units > input_limit then
    return {0, "Input TPM limit exceeded"}
end

if current_output + output_units > output_limit then
    return {0, "Output TPM limit exceeded"}
end

if current_requests + request_units > request_limit then
    return {0, "RPM limit exceeded"}
end

for i = 1, input_units do
    redis.call('ZADD', input_key, now, now .. ":" .. nonce_seed .. ":" .. i .. ":i")
end

for i = 1, output_units do
    redis.call('ZADD', output_key, now, now .. ":" .. nonce_seed .. ":" .. i .. ":o")
end

for i = 1, request_units do
    redis.call('ZADD', request_key, now, now .. ":" .. nonce_seed .. ":" .. i .. ":r")
end

redis.call('EXPIRE', input_key, 3600)
redis.call('EXPIRE', output_key, 3600)
redis.call('EXPIRE', request_key, 3600)

return {1, "OK"}
"#;

pub struct RedisCounterStore {
    conn: redis::aio::ConnectionManager,
    script: redis::Script,
}

impl RedisCounterStore {
    pub async fn connect(redis_url: &str) -> Result<Self, StoreError> {
        let client =
            redis::Client::open(redis_url).map_err(|e| StoreError::Backend(e.to_string()))?;
        let conn = client
            .get_connection_manager()
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(Self {
            conn,
            script: redis::Script::new(ADMIT_SCRIPT),
        })
    }
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    async fn admit_and_charge(
        &self,
        credential: &str,
        input_units: u64,
        output_units: u64,
        request_units: u64,
        input_limit: u64,
        output_limit: u64,
        request_limit: u64,
    ) -> Result<AdmitOutcome, StoreError> {
        let mut buf: [String; 3] = Default::default();
        let keys = CounterKeys::for_credential(credential, &mut buf);
        let now = unix_now_secs();
        let window_start = now.saturating_sub(WINDOW_SECS);
        let nonce: u64 = rand::random();

        let mut conn = self.conn.clone();
        let result: (i64, String) = self
            .script
            .key(keys.input)
            .key(keys.output)
            .key(keys.requests)
            .arg(now)
            .arg(window_start)
            .arg(input_units)
            .arg(output_units)
            .arg(request_units)
            .arg(input_limit)
            .arg(output_limit)
            .arg(request_limit)
            .arg(nonce)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        Ok(if result.0 == 1 {
            AdmitOutcome::ok()
        } else {
            AdmitOutcome::rejected(result.1)
        })
    }

    async fn usage(&self, credential: &str) -> Result<Usage, StoreError> {
        let mut buf: [String; 3] = Default::default();
        let keys = CounterKeys::for_credential(credential, &mut buf);
        let now = unix_now_secs();
        let window_start = now.saturating_sub(WINDOW_SECS);

        let mut conn = self.conn.clone();
        let input_used: u64 = redis::cmd("ZCOUNT")
            .arg(keys.input)
            .arg(window_start)
            .arg(now)
            .query_async(&mut conn)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        let output_used: u64 = redis::cmd("ZCOUNT")
            .arg(keys.output)
            .arg(window_start)
            .arg(now)
            .query_async(&mut conn)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        let requests_used: u64 = redis::cmd("ZCOUNT")
            .arg(keys.requests)
            .arg(window_start)
            .arg(now)
            .query_async(&mut conn)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        Ok(Usage {
            input_used,
            output_used,
            requests_used,
        })
    }
}

// ---------------------------------------------------------------------------
// In-memory backend
// ---------------------------------------------------------------------------

/// One ordered-set entry: `(score, nonce)`. Stored already sorted by score
/// since every insertion carries `now`, which is monotonic non-decreasing
/// across calls for a fixed wall clock.
type Entries = Vec<(u64, u64)>;

/// In-process stand-in for the shared store with identical semantics
/// (prune-then-count, one entry per unit). Guarded per-credential by a
/// `tokio::sync::Mutex` so the prune-read-insert sequence is atomic,
/// following the teacher's bucket-per-key locking pattern in
/// `proxy/filter/rate_limit.rs`.
pub struct InMemoryCounterStore {
    keys: DashMap<String, Arc<tokio::sync::Mutex<Entries>>>,
    nonce: AtomicU64,
    /// Test-only clock override. `0` means "use the real wall clock" — a
    /// safe sentinel since `unix_now_secs()` is never 0 this side of 1970.
    clock_override: AtomicU64,
}

impl Default for InMemoryCounterStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryCounterStore {
    pub fn new() -> Self {
        Self {
            keys: DashMap::new(),
            nonce: AtomicU64::new(0),
            clock_override: AtomicU64::new(0),
        }
    }

    fn now(&self) -> u64 {
        match self.clock_override.load(Ordering::Relaxed) {
            0 => unix_now_secs(),
            t => t,
        }
    }

    /// Pin the clock this store uses for window pruning, so sliding-window
    /// decay (P3) can be tested without a real 60s sleep.
    #[cfg(test)]
    pub fn set_now_for_test(&self, now: u64) {
        self.clock_override.store(now, Ordering::Relaxed);
    }

    fn entry(&self, key: &str) -> Arc<tokio::sync::Mutex<Entries>> {
        self.keys
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(Vec::new())))
            .clone()
    }

    fn next_nonce(&self) -> u64 {
        self.nonce.fetch_add(1, Ordering::Relaxed)
    }
}

#[async_trait]
impl CounterStore for InMemoryCounterStore {
    async fn admit_and_charge(
        &self,
        credential: &str,
        input_units: u64,
        output_units: u64,
        request_units: u64,
        input_limit: u64,
        output_limit: u64,
        request_limit: u64,
    ) -> Result<AdmitOutcome, StoreError> {
        let mut buf: [String; 3] = Default::default();
        let keys = CounterKeys::for_credential(credential, &mut buf);
        let now = self.now();
        let window_start = now.saturating_sub(WINDOW_SECS);

        let input_entry = self.entry(keys.input);
        let output_entry = self.entry(keys.output);
        let request_entry = self.entry(keys.requests);

        // Lock all three for the credential's duration of this call. Locking
        // the same three mutexes in the same order for every call on this
        // credential avoids deadlock; different credentials never share keys.
        let mut input_set = input_entry.lock().await;
        let mut output_set = output_entry.lock().await;
        let mut request_set = request_entry.lock().await;

        input_set.retain(|(score, _)| *score > window_start);
        output_set.retain(|(score, _)| *score > window_start);
        request_set.retain(|(score, _)| *score > window_start);

        let current_input = input_set.len() as u64;
        let current_output = output_set.len() as u64;
        let current_requests = request_set.len() as u64;

        if current_input + input_units > input_limit {
            return Ok(AdmitOutcome::rejected("Input TPM limit exceeded"));
        }
        if current_output + output_units > output_limit {
            return Ok(AdmitOutcome::rejected("Output TPM limit exceeded"));
        }
        if current_requests + request_units > request_limit {
            return Ok(AdmitOutcome::rejected("RPM limit exceeded"));
        }

        for _ in 0..input_units {
            input_set.push((now, self.next_nonce()));
        }
        for _ in 0..output_units {
            output_set.push((now, self.next_nonce()));
        }
        for _ in 0..request_units {
            request_set.push((now, self.next_nonce()));
        }

        Ok(AdmitOutcome::ok())
    }

    async fn usage(&self, credential: &str) -> Result<Usage, StoreError> {
        let mut buf: [String; 3] = Default::default();
        let keys = CounterKeys::for_credential(credential, &mut buf);
        let now = self.now();
        let window_start = now.saturating_sub(WINDOW_SECS);

        async fn count(store: &InMemoryCounterStore, key: &str, window_start: u64, now: u64) -> u64 {
            let Some(entry) = store.keys.get(key).map(|e| e.clone()) else {
                return 0;
            };
            // Non-mutating: count without pruning, per §4.1.
            let guard = entry.lock().await;
            guard
                .iter()
                .filter(|(score, _)| *score >= window_start && *score <= now)
                .count() as u64
        }

        Ok(Usage {
            input_used: count(self, keys.input, window_start, now).await,
            output_used: count(self, keys.output, window_start, now).await,
            requests_used: count(self, keys.requests, window_start, now).await,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn basic_admit_charges_all_three_counters() {
        let store = InMemoryCounterStore::new();
        let o = store
            .admit_and_charge("k-basic", 10, 5, 1, 1000, 1000, 1000)
            .await
            .unwrap();
        assert!(o.admitted);
        let usage = store.usage("k-basic").await.unwrap();
        assert_eq!(usage.input_used, 10);
        assert_eq!(usage.output_used, 5);
        assert_eq!(usage.requests_used, 1);
    }

    /// P2: at most `floor(budget / k)` admissions succeed regardless of how
    /// many parallel callers request `k` units against it in one window.
    #[tokio::test]
    async fn concurrent_callers_never_exceed_the_budget() {
        let store = Arc::new(InMemoryCounterStore::new());
        let mut handles = Vec::new();
        for _ in 0..50 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .admit_and_charge("k-concurrent", 0, 0, 1, 1000, 1000, 10)
                    .await
                    .unwrap()
            }));
        }
        let mut admitted = 0;
        for h in handles {
            if h.await.unwrap().admitted {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 10);
    }

    /// P3 / scenario 4: rpm exhausted at t=0 stays rejected at t=30 (still
    /// inside the 60s window) and admits again at t=61 (window fully
    /// decayed), driven through the injectable clock rather than a real
    /// 61-second sleep.
    #[tokio::test]
    async fn sliding_window_decays_after_60_seconds() {
        let store = InMemoryCounterStore::new();
        const T0: u64 = 1_700_000_000;

        store.set_now_for_test(T0);
        let o = store
            .admit_and_charge("k-decay", 0, 0, 1, 1000, 1000, 1)
            .await
            .unwrap();
        assert!(o.admitted, "first call within the fresh window admits");

        let o = store
            .admit_and_charge("k-decay", 0, 0, 1, 1000, 1000, 1)
            .await
            .unwrap();
        assert!(!o.admitted, "rpm budget of 1 is already spent");

        store.set_now_for_test(T0 + 30);
        let o = store
            .admit_and_charge("k-decay", 0, 0, 1, 1000, 1000, 1)
            .await
            .unwrap();
        assert!(!o.admitted, "t=30 is still inside the 60s window");
        assert_eq!(o.reason, "RPM limit exceeded");

        store.set_now_for_test(T0 + 61);
        let o = store
            .admit_and_charge("k-decay", 0, 0, 1, 1000, 1000, 1)
            .await
            .unwrap();
        assert!(o.admitted, "t=61 has fully decayed the t=0 entry");
    }

    #[tokio::test]
    async fn usage_query_does_not_mutate_state() {
        let store = InMemoryCounterStore::new();
        store
            .admit_and_charge("k-readonly", 10, 10, 1, 1000, 1000, 1000)
            .await
            .unwrap();
        let before = store.usage("k-readonly").await.unwrap();
        let after = store.usage("k-readonly").await.unwrap();
        assert_eq!(before.input_used, after.input_used);
        assert_eq!(before.requests_used, after.requests_used);
    }
}
