use derive_more::{Display, Error};

/// A configuration error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// A configuration source could not be read or parsed.
    #[display("could not load configuration: {_0}")]
    Load(#[error(not(source))] String),
    /// Settings parsed but hold values that cannot be used.
    #[display("invalid configuration: {_0}")]
    Invalid(#[error(not(source))] String),
}
