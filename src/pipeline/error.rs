use thiserror::Error;

/// An error that can occur while running a pipeline stage.
#[derive(Error, Debug)]
pub enum Error {
    /// Generic Input/Output error
    #[error("impossible to read or write file")]
    IO(#[from] std::io::Error),
    /// Impossible to read or write a named file
    #[error("impossible to access '{file_name}'")]
    NamedFileIO {
        /// The file that could not be accessed
        file_name: String,
        /// The inital error that caused the failure
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    /// A document is not the JSON we expect
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    /// An upstream provider call failed
    #[error(transparent)]
    Source(#[from] crate::sources::error::Error),
    /// A generated collection does not have the GeoJSON structure
    #[error("invalid GeoJSON in '{file}': {reason}")]
    InvalidGeoJson { file: String, reason: String },
    /// The paginated export needs an account key
    #[error("the {} environment variable is not set", crate::config::ACCOUNT_KEY_ENV)]
    MissingAccountKey,
    /// Reading a previous revision from git failed
    #[error("git: {0}")]
    Git(String),
    /// The new revision is identical to the previous one
    #[error("no changes detected in any data file")]
    NoChanges,
}

impl Error {
    pub fn named<E>(file_name: impl ToString, source: E) -> Error
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Error::NamedFileIO {
            file_name: file_name.to_string(),
            source: Box::new(source),
        }
    }
}
