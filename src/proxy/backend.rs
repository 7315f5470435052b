// src/proxy/backend.rs
use crate::config::{check_backend_url, ConfigError};
use chrono::{DateTime, Utc};
use hyper::Uri;
use std::sync::{PoisonError, RwLock};
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendState {
    Alive,
    Dead,
}

impl BackendState {
    fn from_alive(alive: bool) -> Self {
        if alive {
            BackendState::Alive
        } else {
            BackendState::Dead
        }
    }
}

#[derive(Debug)]
struct Status {
    state: BackendState,
    last_checked: Option<DateTime<Utc>>,
}

/// One upstream server. Identity is fixed at construction; only the status
/// changes afterwards, behind a lock private to this backend.
#[derive(Debug)]
pub struct Backend {
    base: String,
    status: RwLock<Status>,
}

impl Backend {
    pub fn new(url: Url) -> Result<Self, ConfigError> {
        check_backend_url(&url)?;
        let base = url.as_str().trim_end_matches('/').to_string();

        Ok(Self {
            base,
            status: RwLock::new(Status {
                state: BackendState::Alive,
                last_checked: None,
            }),
        })
    }

    /// Normalized base URL without a trailing slash; also the backend's id.
    pub fn base_url(&self) -> &str {
        &self.base
    }

    pub fn is_alive(&self) -> bool {
        self.state() == BackendState::Alive
    }

    pub fn state(&self) -> BackendState {
        self.status
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .state
    }

    /// Returns the state held before the write.
    pub fn set_alive(&self, alive: bool) -> BackendState {
        let mut status = self.status.write().unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut status.state, BackendState::from_alive(alive))
    }

    /// Like [`set_alive`](Self::set_alive), also stamping the probe time.
    pub fn record_probe(&self, alive: bool) -> BackendState {
        let mut status = self.status.write().unwrap_or_else(PoisonError::into_inner);
        status.last_checked = Some(Utc::now());
        std::mem::replace(&mut status.state, BackendState::from_alive(alive))
    }

    pub fn last_checked(&self) -> Option<DateTime<Utc>> {
        self.status
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .last_checked
    }

    pub fn endpoint(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{}", self.base, path)
        } else {
            format!("{}/{}", self.base, path)
        }
    }

    pub fn target_uri(&self, path_and_query: &str) -> Result<Uri, hyper::http::uri::InvalidUri> {
        self.endpoint(path_and_query).parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn backend(url: &str) -> Backend {
        Backend::new(Url::parse(url).unwrap()).unwrap()
    }

    #[test]
    fn starts_alive() {
        let b = backend("http://localhost:8080");
        assert!(b.is_alive());
        assert!(b.last_checked().is_none());
    }

    #[test]
    fn base_url_is_normalized() {
        assert_eq!(backend("http://LOCALHOST:8080/").base_url(), "http://localhost:8080");
        assert_eq!(backend("http://h:1/api/").base_url(), "http://h:1/api");
    }

    #[test]
    fn rejects_unusable_urls() {
        for raw in ["ftp://h/", "http://h/?a=1", "http://h/#frag"] {
            let url = Url::parse(raw).unwrap();
            assert!(Backend::new(url).is_err(), "{raw} should be rejected");
        }
    }

    #[test]
    fn target_uri_keeps_base_path_and_query() {
        let b = backend("http://h:1/api");
        let uri = b.target_uri("/users?id=7").unwrap();
        assert_eq!(uri.to_string(), "http://h:1/api/users?id=7");
        assert_eq!(b.endpoint("/health"), "http://h:1/api/health");
    }

    #[test]
    fn set_alive_is_idempotent_and_reports_previous() {
        let b = backend("http://h:1");
        assert_eq!(b.set_alive(false), BackendState::Alive);
        assert_eq!(b.set_alive(false), BackendState::Dead);
        assert!(!b.is_alive());
        assert_eq!(b.set_alive(true), BackendState::Dead);
        assert!(b.is_alive());
    }

    #[test]
    fn record_probe_stamps_time() {
        let b = backend("http://h:1");
        b.record_probe(false);
        assert!(!b.is_alive());
        assert!(b.last_checked().is_some());
    }

    #[test]
    fn concurrent_writes_last_one_wins() {
        let b = Arc::new(backend("http://h:1"));

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let b = b.clone();
                thread::spawn(move || {
                    for n in 0..1_000 {
                        b.set_alive((i + n) % 2 == 0);
                        let _ = b.is_alive();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        b.set_alive(false);
        assert!(!b.is_alive());
        b.set_alive(true);
        assert!(b.is_alive());
    }
}
