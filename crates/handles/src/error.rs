use serde_json::Value;
use tether_store::RemoteError;

/// A convenient type alias for `Result` with `E` = [`enum@Error`].
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Possible errors.
///
/// `InvalidArgument` and `NotRegistered` come back synchronously from the misused call.
/// Mutation failures only come back through the future of the mutation that caused them.
/// `Subscription` is only ever delivered through a `"disconnect"` event.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
	/// Malformed call into the observer or registry API.
	#[error("invalid argument: {0}")]
	InvalidArgument(String),
	/// Lookup of a handle kind that was never registered.
	#[error("handle kind `{0}` must be registered before it can be looked up")]
	NotRegistered(&'static str),
	/// A mutation was rejected by the record's validator. Carries the validator's payload.
	#[error("validation failed: {0}")]
	Validation(Value),
	/// The remote acknowledged a write, patch, delete or transaction with a failure.
	#[error("remote write failed: {0}")]
	RemoteWrite(RemoteError),
	/// An optimistic transaction could not be committed.
	#[error("move could not be committed")]
	Conflict,
	/// A long-lived subscription failed.
	#[error("subscription failed: {0}")]
	Subscription(RemoteError),
	/// Configuration text could not be parsed.
	#[error("invalid configuration: {0}")]
	Config(String),
}

impl From<toml::de::Error> for Error {
	fn from(err: toml::de::Error) -> Self {
		Error::Config(err.to_string())
	}
}
