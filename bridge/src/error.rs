//! Startup error taxonomy.
//!
//! Only configuration problems abort the process; everything downstream is
//! recovered in place (transport errors back off and retry, codec rejects are
//! dropped, log write failures fall back to standard error). Transport errors
//! live in [`crate::transport`] beside their classification.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse config {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("missing required config field: {0}")]
    Missing(&'static str),

    #[error("invalid config value: {0}")]
    Invalid(String),
}
