//! Fake authority hosts for end-to-end JWKS tests
//!
//! [`TestAuthority`] is a wiremock server answering on the JWKS path. In ring
//! mode it publishes `SigningKeyRing::published_jwks_at(clock)` on every
//! request, so advancing a shared `ManualClock` rotates what it serves.

use session_core::clock::Clock;
use session_core::config::{AuthorityHost, AuthorityHosts, DEFAULT_JWKS_PATH};
use session_core::jwks::JwksDocument;
use session_core::keys::SigningKeyRing;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

enum Source {
    Ring {
        keys: Arc<SigningKeyRing>,
        clock: Arc<dyn Clock>,
    },
    Document(JwksDocument),
}

struct AuthorityState {
    source: Mutex<Source>,
    failing: AtomicBool,
    requests: AtomicUsize,
}

struct JwksResponder(Arc<AuthorityState>);

impl Respond for JwksResponder {
    fn respond(&self, _request: &Request) -> ResponseTemplate {
        let state = &self.0;
        state.requests.fetch_add(1, Ordering::SeqCst);

        if state.failing.load(Ordering::SeqCst) {
            return ResponseTemplate::new(500).set_body_string("authority unavailable");
        }

        let document = match &*state.source.lock().unwrap() {
            Source::Ring { keys, clock } => keys
                .published_jwks_at(clock.unix_millis())
                .expect("test key ring derives keys"),
            Source::Document(document) => document.clone(),
        };
        ResponseTemplate::new(200).set_body_json(document)
    }
}

/// A running fake authority host.
///
/// # Example
/// ```rust,ignore
/// let authority = TestAuthority::start(keys.clone(), clock.clone()).await;
/// let hosts = hosts_of(&[&authority]);
/// // ... verify tokens against `hosts` ...
/// assert_eq!(authority.request_count(), 1);
/// ```
pub struct TestAuthority {
    server: MockServer,
    state: Arc<AuthorityState>,
}

impl TestAuthority {
    /// Serve the keys `keys` publishes at `clock`'s current time.
    pub async fn start(keys: Arc<SigningKeyRing>, clock: Arc<dyn Clock>) -> Self {
        Self::with_source(Source::Ring { keys, clock }).await
    }

    /// Serve a fixed document.
    pub async fn serving(document: JwksDocument) -> Self {
        Self::with_source(Source::Document(document)).await
    }

    /// Answer every request with HTTP 500.
    pub async fn failing() -> Self {
        let authority = Self::serving(JwksDocument::default()).await;
        authority.set_failing(true);
        authority
    }

    async fn with_source(source: Source) -> Self {
        let server = MockServer::start().await;
        let state = Arc::new(AuthorityState {
            source: Mutex::new(source),
            failing: AtomicBool::new(false),
            requests: AtomicUsize::new(0),
        });

        Mock::given(method("GET"))
            .and(path(DEFAULT_JWKS_PATH))
            .respond_with(JwksResponder(Arc::clone(&state)))
            .mount(&server)
            .await;

        Self { server, state }
    }

    /// Toggle HTTP 500 responses.
    pub fn set_failing(&self, failing: bool) {
        self.state.failing.store(failing, Ordering::SeqCst);
    }

    /// Replace what the authority serves with a fixed document.
    pub fn set_document(&self, document: JwksDocument) {
        *self.state.source.lock().unwrap() = Source::Document(document);
    }

    /// Number of JWKS requests received, failed ones included.
    pub fn request_count(&self) -> usize {
        self.state.requests.load(Ordering::SeqCst)
    }

    pub fn uri(&self) -> String {
        self.server.uri()
    }

    pub fn host(&self) -> AuthorityHost {
        AuthorityHost::parse(&self.server.uri()).expect("mock server uri is a valid host")
    }
}

/// Host list in the given order.
pub fn hosts_of(authorities: &[&TestAuthority]) -> AuthorityHosts {
    AuthorityHosts::new(authorities.iter().map(|a| a.host()).collect())
        .expect("at least one authority")
}
