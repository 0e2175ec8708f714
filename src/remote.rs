//! The remote authoritative store that local records are pushed to.

use std::time::Duration;

use rand::Rng;
use thiserror::Error;

use crate::error::{KakeiboError, Result};
use crate::models::Record;

pub(crate) const USER_AGENT: &str = concat!("kakeibo/", env!("CARGO_PKG_VERSION"));
const REMOTE_TIMEOUT_SECS: u64 = 10;

/// Non-fatal: a record that fails to reach the remote simply stays Pending.
#[derive(Error, Debug)]
pub enum RemoteError {
    #[error("remote unreachable: {0}")]
    Transport(String),

    #[error("remote returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("simulated remote rejected the request")]
    Simulated,
}

pub trait RemoteStore {
    /// Upsert by id. The remote copy wins on conflict.
    fn upsert(&self, record: &Record) -> std::result::Result<(), RemoteError>;
    fn delete(&self, id: &str) -> std::result::Result<(), RemoteError>;
}

impl<R: RemoteStore + ?Sized> RemoteStore for &R {
    fn upsert(&self, record: &Record) -> std::result::Result<(), RemoteError> {
        (**self).upsert(record)
    }

    fn delete(&self, id: &str) -> std::result::Result<(), RemoteError> {
        (**self).delete(id)
    }
}

impl RemoteStore for Box<dyn RemoteStore> {
    fn upsert(&self, record: &Record) -> std::result::Result<(), RemoteError> {
        (**self).upsert(record)
    }

    fn delete(&self, id: &str) -> std::result::Result<(), RemoteError> {
        (**self).delete(id)
    }
}

/// `POST {base}/transactions` and `DELETE {base}/transactions/{id}`.
pub struct HttpRemote {
    http: reqwest::blocking::Client,
    base_url: String,
    token: Option<String>,
}

impl HttpRemote {
    pub fn new(base_url: &str, token: Option<String>) -> Result<Self> {
        let http = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(REMOTE_TIMEOUT_SECS))
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| KakeiboError::Settings(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        })
    }

    fn authorize(&self, req: reqwest::blocking::RequestBuilder) -> reqwest::blocking::RequestBuilder {
        match &self.token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    fn send(
        &self,
        req: reqwest::blocking::RequestBuilder,
        allow_not_found: bool,
    ) -> std::result::Result<(), RemoteError> {
        let resp = self
            .authorize(req)
            .send()
            .map_err(|e| RemoteError::Transport(e.to_string()))?;
        let status = resp.status();
        if status.is_success() || (allow_not_found && status.as_u16() == 404) {
            return Ok(());
        }
        let body = resp.text().unwrap_or_default();
        Err(RemoteError::Status {
            status: status.as_u16(),
            body: body.chars().take(200).collect(),
        })
    }
}

impl RemoteStore for HttpRemote {
    fn upsert(&self, record: &Record) -> std::result::Result<(), RemoteError> {
        let url = format!("{}/transactions", self.base_url);
        self.send(self.http.post(url).json(record), false)
    }

    fn delete(&self, id: &str) -> std::result::Result<(), RemoteError> {
        let url = format!("{}/transactions/{}", self.base_url, id);
        // Already gone on the remote counts as deleted.
        self.send(self.http.delete(url), true)
    }
}

/// Stand-in used when no remote URL is configured: each call succeeds with
/// probability `success_rate`.
pub struct SimulatedRemote {
    success_rate: f64,
}

impl SimulatedRemote {
    pub fn new(success_rate: f64) -> Self {
        Self {
            success_rate: if success_rate.is_nan() { 0.0 } else { success_rate.clamp(0.0, 1.0) },
        }
    }

    fn roll(&self) -> std::result::Result<(), RemoteError> {
        if rand::thread_rng().gen_bool(self.success_rate) {
            Ok(())
        } else {
            Err(RemoteError::Simulated)
        }
    }
}

impl RemoteStore for SimulatedRemote {
    fn upsert(&self, _record: &Record) -> std::result::Result<(), RemoteError> {
        self.roll()
    }

    fn delete(&self, _id: &str) -> std::result::Result<(), RemoteError> {
        self.roll()
    }
}
