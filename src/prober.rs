//! Existence checks for resolved link targets. Web targets go through an
//! HTTP HEAD with a GET fallback; file targets go through the document
//! store first (open buffers win over disk) and the filesystem second.
//!
//! Transport failures come back as [`CheckOutcome::Failed`], never as
//! errors: a flaky network must not look like a dead link.

use std::path::Path;
use std::sync::Weak;

use futures::future::BoxFuture;
use futures::FutureExt;
use url::Url;

use crate::error::Error;
use crate::resolver::ResolvedTarget;
use crate::scanner;
use crate::slug;
use crate::store::DocumentStore;
use crate::types::{CheckOutcome, DocumentUri};

/// Seconds before an HTTP probe gives up.
pub const PROBE_TIMEOUT_SECS: u64 = 10;

/// Maximum redirects followed per probe.
pub const PROBE_REDIRECT_LIMIT: usize = 5;

/// Minimal view of an HTTP response: the probe only ever looks at status.
#[derive(Debug, Clone, Copy)]
pub struct ProbeResponse {
    /// Final status code after redirects.
    pub status: u16,
}

/// Transport abstraction for web probes, mockable in tests.
pub trait HttpProbe: Send + Sync {
    /// Issue a GET request, optionally with a bearer token.
    fn get(&self, url: &Url, auth: Option<&str>) -> BoxFuture<'static, Result<ProbeResponse, Error>>;

    /// Issue a HEAD request, optionally with a bearer token.
    fn head(&self, url: &Url, auth: Option<&str>)
        -> BoxFuture<'static, Result<ProbeResponse, Error>>;
}

/// Result of a credential lookup. `Declined` is distinct from `Absent`:
/// it records that the user said not to ask about this host again, so
/// the probe must not prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialLookup {
    /// Nothing on file; prompting is allowed.
    Absent,
    /// The user declined for this host; do not prompt.
    Declined,
    /// A bearer token to send.
    Token(String),
}

/// Source of bearer tokens for hosts that answer 401.
pub trait CredentialStore: Send + Sync {
    /// What is already on file for this host.
    fn try_get(&self, host: &str) -> CredentialLookup;

    /// Prompt for a fresh token for this host. Anything but a token means
    /// the probe proceeds unauthenticated.
    fn request_new(&self, host: &str) -> CredentialLookup;
}

/// Credential store that never has credentials. The CLI default.
pub struct NoCredentials;

impl CredentialStore for NoCredentials {
    fn try_get(&self, _host: &str) -> CredentialLookup {
        return CredentialLookup::Absent;
    }

    fn request_new(&self, _host: &str) -> CredentialLookup {
        return CredentialLookup::Absent;
    }
}

/// `reqwest`-backed transport used outside of tests.
pub struct ReqwestProbe {
    client: reqwest::Client,
}

impl ReqwestProbe {
    /// Build the shared HTTP client.
    ///
    /// # Errors
    ///
    /// Returns `Error::HttpClient` if the TLS backend cannot initialize.
    pub fn new() -> Result<Self, Error> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(PROBE_TIMEOUT_SECS))
            .redirect(reqwest::redirect::Policy::limited(PROBE_REDIRECT_LIMIT))
            .user_agent(concat!("linkref/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| {
                return Error::HttpClient {
                    reason: e.to_string(),
                };
            })?;
        return Ok(Self { client });
    }

    fn send(
        &self,
        mut request: reqwest::RequestBuilder,
        auth: Option<&str>,
        url: &Url,
    ) -> BoxFuture<'static, Result<ProbeResponse, Error>> {
        if let Some(token) = auth {
            request = request.bearer_auth(token);
        }
        let url_text = url.to_string();
        return async move {
            let response = request.send().await.map_err(|e| {
                return Error::Probe {
                    message: categorize_transport_error(&e),
                    url: url_text,
                };
            })?;
            return Ok(ProbeResponse {
                status: response.status().as_u16(),
            });
        }
        .boxed();
    }
}

impl HttpProbe for ReqwestProbe {
    fn get(
        &self,
        url: &Url,
        auth: Option<&str>,
    ) -> BoxFuture<'static, Result<ProbeResponse, Error>> {
        return self.send(self.client.get(url.clone()), auth, url);
    }

    fn head(
        &self,
        url: &Url,
        auth: Option<&str>,
    ) -> BoxFuture<'static, Result<ProbeResponse, Error>> {
        return self.send(self.client.head(url.clone()), auth, url);
    }
}

/// Human-readable transport failure text, by failure class.
fn categorize_transport_error(error: &reqwest::Error) -> String {
    if error.is_timeout() {
        return format!("timed out after {PROBE_TIMEOUT_SECS}s");
    }
    if error.is_connect() {
        return format!("connection failed: {error}");
    }
    let text = error.to_string();
    if text.contains("certificate") {
        return format!("certificate error: {text}");
    }
    return text;
}

/// Checks a single resolved target for existence.
pub struct LinkProber {
    credentials: Box<dyn CredentialStore>,
    http: Box<dyn HttpProbe>,
    store: Weak<DocumentStore>,
}

impl LinkProber {
    pub(crate) fn new(
        http: Box<dyn HttpProbe>,
        credentials: Box<dyn CredentialStore>,
        store: Weak<DocumentStore>,
    ) -> Self {
        return Self {
            credentials,
            http,
            store,
        };
    }

    /// Check one resolved target. `None` targets are skippable by
    /// definition (mailto, unknown scheme, unresolvable path).
    pub async fn check(&self, target: Option<&ResolvedTarget>) -> CheckOutcome {
        return match target {
            None => CheckOutcome::Skipped,
            Some(ResolvedTarget::External(url)) => {
                if url.scheme() == "http" || url.scheme() == "https" {
                    self.probe_web(url).await
                } else {
                    CheckOutcome::Skipped
                }
            },
            Some(ResolvedTarget::File { fragment, path }) => {
                self.check_file(path, fragment.as_deref()).await
            },
        };
    }

    /// HEAD the URL, falling back to GET when the server rejects HEAD and
    /// retrying once with credentials on 401.
    async fn probe_web(&self, url: &Url) -> CheckOutcome {
        let mut auth: Option<String> = None;

        let mut response = match self.http.head(url, None).await {
            Ok(r) => r,
            Err(e) => return failed_outcome(&e),
        };

        if response.status == 401 {
            if let Some(host) = url.host_str() {
                auth = match self.credentials.try_get(host) {
                    CredentialLookup::Token(token) => Some(token),
                    CredentialLookup::Declined => None,
                    CredentialLookup::Absent => match self.credentials.request_new(host) {
                        CredentialLookup::Token(token) => Some(token),
                        CredentialLookup::Absent | CredentialLookup::Declined => None,
                    },
                };
            }
            if let Some(token) = auth.as_deref() {
                response = match self.http.head(url, Some(token)).await {
                    Ok(r) => r,
                    Err(e) => return failed_outcome(&e),
                };
            }
        }

        // Plenty of servers reject HEAD outright; confirm with GET before
        // reporting a client error.
        if (400..500).contains(&response.status) {
            response = match self.http.get(url, auth.as_deref()).await {
                Ok(r) => r,
                Err(e) => return failed_outcome(&e),
            };
        }

        if (200..300).contains(&response.status) {
            return CheckOutcome::Alive;
        }
        return CheckOutcome::Dead {
            status: response.status,
            url: url.to_string(),
        };
    }

    /// Check a file target, consulting the open buffer before the disk so
    /// unsaved heading edits are honored.
    async fn check_file(&self, path: &Path, fragment: Option<&str>) -> CheckOutcome {
        let Some(fragment) = fragment else {
            return match tokio::fs::metadata(path).await {
                Ok(_) => CheckOutcome::Alive,
                Err(e) => CheckOutcome::PathNotFound {
                    detail: e.to_string(),
                    path: path.to_path_buf(),
                },
            };
        };

        let wanted = slug::slugify(fragment);
        let uri = DocumentUri::from_file_path(path);

        let open_slugs = self
            .store
            .upgrade()
            .and_then(|store| return store.open_heading_slugs(&uri));
        let slugs = match open_slugs {
            Some(slugs) => slugs,
            None => {
                let text = match tokio::fs::read_to_string(path).await {
                    Ok(t) => t,
                    Err(e) => {
                        return CheckOutcome::PathNotFound {
                            detail: e.to_string(),
                            path: path.to_path_buf(),
                        };
                    },
                };
                scanner::parse_snapshot(&text, 0).heading_slugs()
            },
        };

        if slugs.contains(&wanted) {
            return CheckOutcome::Alive;
        }
        return CheckOutcome::FragmentMissing {
            fragment: fragment.to_string(),
            target: path.display().to_string(),
        };
    }
}

/// Map a transport-level probe error onto a transient outcome.
fn failed_outcome(error: &Error) -> CheckOutcome {
    return CheckOutcome::Failed {
        message: error.to_string(),
    };
}
