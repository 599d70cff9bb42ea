use thiserror::Error;

/// An error that can occur while talking to an upstream provider.
#[derive(Error, Debug)]
pub enum Error {
    /// The request could not be sent or timed out
    #[error("request to {url} failed: {reason}")]
    Request { url: String, reason: String },
    /// The provider answered with a non-success status
    #[error("{url} responded with status {status}")]
    Status { url: String, status: u16 },
    /// The response body could not be read
    #[error("could not read response from {url}: {reason}")]
    Payload { url: String, reason: String },
    /// The response body is not the JSON we expect
    #[error("invalid JSON from {url}")]
    Json {
        url: String,
        #[source]
        source: serde_json::Error,
    },
    /// The response body is not well-formed XML
    #[error(transparent)]
    Xml(#[from] roxmltree::Error),
    /// A mandatory element is absent from an XML document
    #[error("missing element <{0}>")]
    MissingElement(String),
    /// A value could not be parsed
    #[error("invalid value '{value}' for {field}")]
    InvalidValue { field: String, value: String },
    /// The session endpoint did not set the expected cookie
    #[error("no {0} session cookie in response")]
    MissingSession(String),
    /// The provider has no usable data for the request
    #[error("{0}")]
    NotFound(String),
    /// The provider's route starts at another stop than the fetched pattern
    #[error("stop mismatch for service {service}: expected {expected}, got {actual}")]
    AnchorMismatch {
        service: String,
        expected: String,
        actual: String,
    },
}
