use thiserror::Error;

/// Local, pre-network input errors. The display string is what the user sees.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Enter your email and password.")]
    MissingCredentials,

    #[error("Invalid email address.")]
    InvalidEmail,

    #[error(
        "Password must have at least 8 characters, an uppercase letter, a lowercase letter, a number and a symbol."
    )]
    WeakPassword,

    #[error("Fill in the text field.")]
    EmptyText,

    #[error("Owner identifier must not be empty.")]
    EmptyOwner,
}

#[derive(Debug, Error)]
pub enum AuthError {
    /// The provider refused the request. `message` is shown to the user as is.
    #[error("{message}")]
    Rejected { code: String, message: String },

    #[error("no identity is signed in")]
    NotSignedIn,

    #[error("identity provider did not respond in time")]
    Timeout,

    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    TaskJoin(#[from] tokio::task::JoinError),
}

impl AuthError {
    pub fn rejected(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Rejected {
            code: code.into(),
            message: message.into(),
        }
    }
}

/// Document store failure, for reads and writes alike.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error("document store returned {status}: {message}")]
    Remote { status: u16, message: String },

    #[error("malformed document payload: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("invalid field name `{0}`")]
    InvalidField(String),

    #[error("document store did not respond in time")]
    Timeout,

    /// The refresh token was refused; the identity has been signed out.
    #[error("session expired, sign in again")]
    SessionExpired,
}

#[derive(Debug, Error)]
pub enum RecordsError {
    #[error("no identity is signed in")]
    NoIdentity,

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("could not load records: {0}")]
    Query(#[source] StoreError),

    #[error("could not save record: {0}")]
    Write(#[source] StoreError),

    #[error("record {id} has no valid `{field}` field")]
    Malformed { id: String, field: &'static str },
}

#[derive(Debug, Error)]
pub enum RegistrationError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Auth(#[from] AuthError),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Toml(#[from] toml::de::Error),

    #[error("invalid value for {key}: {value}")]
    InvalidValue { key: &'static str, value: String },

    #[error("firebase backend selected but {0} is not set")]
    MissingFirebase(&'static str),
}

#[derive(Debug, Error)]
pub enum ConnectError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}
