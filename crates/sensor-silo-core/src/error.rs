//! Error types for the calibration engine.

use thiserror::Error;

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while loading, preparing or running calibrations.
#[derive(Error, Debug)]
pub enum Error {
    /// Persisted equation carries a type tag no variant recognises.
    #[error("unknown equation type: {0}")]
    UnknownEquation(String),

    /// Persisted equation record has no type tag.
    #[error("equation record is missing its type tag")]
    MissingEquationType,

    /// Linear equations only support degree 1.
    #[error("unsupported equation degree: {0}")]
    UnsupportedDegree(i64),

    /// No procedure is registered under this kind.
    #[error("unknown procedure: {0}")]
    UnknownProcedure(String),

    /// Sensor refers to a kind no procedure handles.
    #[error("unknown sensor kind '{kind}' for sensor {id}")]
    UnknownSensorKind { id: String, kind: String },

    /// Sensor has never been assigned a kind.
    #[error("sensor {0} has no kind")]
    MissingKind(String),

    /// No stream constructor is registered under this type.
    #[error("unknown stream type: {0}")]
    UnknownStreamType(String),

    /// A sensor with this id already exists.
    #[error("sensor already exists: {0}")]
    DuplicateSensor(String),

    /// No sensor with this id.
    #[error("sensor not found: {0}")]
    UnknownSensor(String),

    /// Sensor has no bound stream or equation yet.
    #[error("sensor {0} is not prepared")]
    NotPrepared(String),

    /// Stream address failed validation.
    #[error("invalid address '{0}': board is a-g, channel is 1-4 as in \"b3\", or ND")]
    InvalidAddress(String),

    /// Operator entered a value that cannot be used.
    #[error("invalid value: {0}")]
    InvalidValue(String),

    /// Procedure has no parameter by this name.
    #[error("unknown parameter '{name}' in procedure {kind}")]
    UnknownParameter { kind: String, name: String },

    /// One entity in a persisted document failed to unpack.
    #[error("failed to unpack {entity} '{key}': {source}")]
    Unpack {
        entity: &'static str,
        key: String,
        #[source]
        source: Box<Error>,
    },

    /// TOML encoding error.
    #[error("TOML encode error: {0}")]
    Encode(#[from] toml::ser::Error),

    /// TOML decoding error.
    #[error("TOML decode error: {0}")]
    Decode(#[from] toml::de::Error),

    /// Stream hardware reported a failure.
    #[error("stream error: {0}")]
    Stream(String),

    /// Operator or stream I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Wraps an error raised while unpacking a single keyed entity.
    pub fn unpack(entity: &'static str, key: &str, source: Error) -> Self {
        Error::Unpack {
            entity,
            key: key.to_string(),
            source: Box::new(source),
        }
    }
}
