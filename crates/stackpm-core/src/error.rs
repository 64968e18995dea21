use thiserror::Error;

/// Core error type for stackpm configuration and setup.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid value '{value}' for {var}: {reason}")]
    InvalidEnv {
        var: &'static str,
        value: String,
        reason: String,
    },

    #[error(transparent)]
    Pkg(#[from] crate::pkg::PkgError),
}
