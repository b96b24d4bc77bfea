//! Blocking HTTP for packuments and tarballs: one shared `ureq::Agent`, a cap on requests
//! in flight, and retry with doubling backoff. The resolver itself never retries.

use std::io::{Read, Write};
use std::path::Path;
use std::str::FromStr;
use std::sync::{Condvar, Mutex, OnceLock};
use std::time::Duration;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_BACKOFF: Duration = Duration::from_secs(5);
const MAX_IN_FLIGHT: usize = 64;

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

/// Retry settings, read once when the shared client is built.
#[derive(Clone, Copy, Debug)]
struct RetryPolicy {
    retries: usize,
    backoff: Duration,
}

impl RetryPolicy {
    fn from_env() -> Self {
        Self {
            retries: env_parse("TINYPM_HTTP_RETRIES").unwrap_or(2),
            backoff: Duration::from_millis(env_parse("TINYPM_HTTP_RETRY_BACKOFF_MS").unwrap_or(250)),
        }
    }

    /// Delay before retry number `attempt` (1-based).
    fn delay(&self, attempt: usize) -> Duration {
        let factor = 1u32 << attempt.saturating_sub(1).min(16);
        self.backoff.saturating_mul(factor).min(MAX_BACKOFF)
    }
}

/// Counting gate: `enter` blocks while `cap` requests are in flight.
struct Gate {
    in_flight: Mutex<usize>,
    freed: Condvar,
    cap: usize,
}

struct Pass<'a>(&'a Gate);

impl Gate {
    fn new(cap: usize) -> Self {
        Self {
            in_flight: Mutex::new(0),
            freed: Condvar::new(),
            cap: cap.max(1),
        }
    }

    fn enter(&self) -> Pass<'_> {
        let count = self.in_flight.lock().unwrap_or_else(|p| p.into_inner());
        let mut count = self
            .freed
            .wait_while(count, |n| *n >= self.cap)
            .unwrap_or_else(|p| p.into_inner());
        *count += 1;
        Pass(self)
    }
}

impl Drop for Pass<'_> {
    fn drop(&mut self) {
        let mut count = self.0.in_flight.lock().unwrap_or_else(|p| p.into_inner());
        *count = count.saturating_sub(1);
        self.0.freed.notify_one();
    }
}

/// 429 and 5xx are worth another attempt; other statuses are final.
fn is_transient(status: u16) -> bool {
    status == 429 || status >= 500
}

pub struct HttpClient {
    agent: ureq::Agent,
    gate: Gate,
    policy: RetryPolicy,
}

impl HttpClient {
    fn new(max_in_flight: usize, policy: RetryPolicy) -> Self {
        Self {
            agent: ureq::AgentBuilder::new().timeout(REQUEST_TIMEOUT).build(),
            gate: Gate::new(max_in_flight),
            policy,
        }
    }

    /// GET with retries; the body reader is handed to `consume` while the gate is held.
    fn get<T, F>(&self, url: &str, accept: Option<&str>, consume: F) -> Result<T, String>
    where
        F: FnOnce(Box<dyn Read + Send + Sync + 'static>) -> Result<T, String>,
    {
        let _pass = self.gate.enter();
        let mut attempt = 0;
        loop {
            let mut req = self.agent.get(url);
            if let Some(accept) = accept {
                req = req.set("Accept", accept);
            }
            let failure = match req.call() {
                Ok(resp) if resp.status() == 200 => return consume(resp.into_reader()),
                Ok(resp) => (resp.status(), format!("HTTP {}", resp.status())),
                Err(ureq::Error::Status(code, _)) => (code, format!("HTTP {}", code)),
                Err(e) => (0, e.to_string()),
            };
            let (status, message) = failure;
            attempt += 1;
            if (status != 0 && !is_transient(status)) || attempt > self.policy.retries {
                return Err(message);
            }
            std::thread::sleep(self.policy.delay(attempt));
        }
    }

    pub fn get_with_accept(&self, url: &str, accept: Option<&str>) -> Result<Vec<u8>, String> {
        self.get(url, accept, |mut body| {
            let mut buf = Vec::new();
            body.read_to_end(&mut buf).map_err(|e| e.to_string())?;
            Ok(buf)
        })
    }

    /// Stream the body to `dest` (tarball downloads).
    pub fn get_to_file(&self, url: &str, dest: &Path) -> Result<(), String> {
        self.get(url, None, |mut body| {
            let mut out = std::fs::File::create(dest).map_err(|e| e.to_string())?;
            std::io::copy(&mut body, &mut out).map_err(|e| e.to_string())?;
            out.flush().map_err(|e| e.to_string())
        })
    }
}

fn shared() -> &'static HttpClient {
    static CLIENT: OnceLock<HttpClient> = OnceLock::new();
    CLIENT.get_or_init(|| {
        let cap = env_parse::<usize>("TINYPM_NETWORK_CONCURRENCY")
            .unwrap_or_else(crate::collector::default_concurrency)
            .clamp(1, MAX_IN_FLIGHT);
        HttpClient::new(cap, RetryPolicy::from_env())
    })
}

pub fn get_with_accept(url: &str, accept: Option<&str>) -> Result<Vec<u8>, String> {
    shared().get_with_accept(url, accept)
}

pub fn get_to_file(url: &str, dest: &Path) -> Result<(), String> {
    shared().get_to_file(url, dest)
}
