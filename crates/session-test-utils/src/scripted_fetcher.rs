//! In-process key transport with scripted per-host outcomes
//!
//! Use [`ScriptedFetcher`] when a test needs exact control over what each host
//! returns and how long it takes, without HTTP.

use async_trait::async_trait;
use session_core::config::AuthorityHost;
use session_core::error::FetchError;
use session_core::jwks::{KeyFetcher, KeySet};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

/// What a host does when fetched.
#[derive(Debug, Clone)]
pub enum HostScript {
    Keys(KeySet),
    Fail(FetchError),
    /// Return the keys after a delay (tokio time, so paused clocks apply).
    Slow(KeySet, Duration),
    /// Never return.
    Hang,
}

/// Fake [`KeyFetcher`] with a call log.
///
/// Hosts without a script fail with a network error.
///
/// # Example
/// ```rust,ignore
/// let fetcher = Arc::new(
///     ScriptedFetcher::new()
///         .with_script("http://bad1", HostScript::Fail(network_error("http://bad1")))
///         .with_script("http://good", HostScript::Keys(keys)),
/// );
/// ```
#[derive(Debug, Default)]
pub struct ScriptedFetcher {
    scripts: Mutex<HashMap<String, HostScript>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_script(self, host: &str, script: HostScript) -> Self {
        self.set_script(host, script);
        self
    }

    /// Change a host's behaviour mid-test.
    pub fn set_script(&self, host: &str, script: HostScript) {
        let host = AuthorityHost::parse(host).expect("valid host");
        self.scripts
            .lock()
            .unwrap()
            .insert(host.as_str().to_string(), script);
    }

    /// Hosts fetched, in call order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn calls_to(&self, host: &str) -> usize {
        let host = AuthorityHost::parse(host).expect("valid host");
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|called| called.as_str() == host.as_str())
            .count()
    }
}

#[async_trait]
impl KeyFetcher for ScriptedFetcher {
    async fn fetch(&self, host: &AuthorityHost) -> Result<KeySet, FetchError> {
        self.calls.lock().unwrap().push(host.as_str().to_string());
        let script = self.scripts.lock().unwrap().get(host.as_str()).cloned();

        match script {
            Some(HostScript::Keys(keys)) => Ok(keys),
            Some(HostScript::Fail(error)) => Err(error),
            Some(HostScript::Slow(keys, delay)) => {
                tokio::time::sleep(delay).await;
                Ok(keys)
            }
            Some(HostScript::Hang) => std::future::pending().await,
            None => Err(network_error(host.as_str())),
        }
    }
}

/// Network failure for `host`.
pub fn network_error(host: &str) -> FetchError {
    FetchError::Network {
        host: host.to_string(),
        reason: "connection refused".to_string(),
    }
}
