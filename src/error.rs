/// Crate-level error types for linkref.
///
/// Expected negative check results (dead link, missing file, missing
/// fragment, unresolvable address) are not errors — they are
/// [`CheckOutcome`](crate::types::CheckOutcome) values. Only genuinely
/// exceptional conditions land here.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The config file exists but cannot be used.
    #[error("config not valid: {reason}")]
    ConfigInvalid {
        /// Description of the problem.
        reason: String,
    },

    /// A change handler was registered twice on the same registry.
    #[error("subscriber {subscriber} already registered for {uri}")]
    DuplicateSubscriber {
        /// The subscriber id that collided.
        subscriber: u64,
        /// The registry's target document.
        uri: String,
    },

    /// The HTTP client could not be constructed.
    #[error("http client: {reason}")]
    HttpClient {
        /// Description of the construction failure.
        reason: String,
    },

    /// Underlying I/O error from the filesystem.
    #[error("io: {0}")]
    Io(
        /// The wrapped I/O error.
        #[from]
        std::io::Error,
    ),

    /// A web probe failed in transport (timeout, DNS, TLS) — transient,
    /// distinct from a dead link.
    #[error("probe failed: {url}: {message}")]
    Probe {
        /// The transport error text, verbatim.
        message: String,
        /// The URL being probed.
        url: String,
    },

    /// TOML deserialization failed.
    #[error("toml deserialize: {0}")]
    TomlDe(
        /// The wrapped TOML deserialization error.
        #[from]
        toml::de::Error,
    ),

    /// The filesystem watcher could not be set up.
    #[error("watcher setup failed: {reason}")]
    Watch {
        /// Description of the setup failure.
        reason: String,
    },
}
