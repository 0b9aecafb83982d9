use axum::{
	http::StatusCode,
	response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::store::StoreError;

/// Type alias for results returned by this crate
pub type Result<T> = std::result::Result<T, Error>;

/// Failures surfaced by the key lifecycle engine. The adapters map these
/// onto wire responses; anything a client must not see stays in the logs.
#[derive(Error, Debug)]
pub enum Error {
	#[error("input is not an ascii-armored openpgp public key")]
	InvalidArmor,
	#[error("invalid certificate: {0}")]
	InvalidCertificate(String),
	#[error("primary key is below the minimum of {min} bits")]
	KeyTooShort { min: usize },
	#[error("certificate contains no user id with an email address")]
	NoUserIds,
	#[error("malformed query: {0}")]
	MalformedQuery(String),
	#[error("not found")]
	NotFound,
	#[error("key already exists with verified user ids")]
	AlreadyExists,
	#[error(transparent)]
	Store(#[from] StoreError),
	#[error("mail delivery failed: {0}")]
	Mailer(String),
	#[error(transparent)]
	Other(#[from] sequoia_openpgp::anyhow::Error),
}

impl Error {
	pub fn status(&self) -> StatusCode {
		match self {
			Self::InvalidArmor
			| Self::InvalidCertificate(_)
			| Self::KeyTooShort { .. }
			| Self::NoUserIds
			| Self::MalformedQuery(_) => StatusCode::BAD_REQUEST,
			Self::NotFound => StatusCode::NOT_FOUND,
			Self::AlreadyExists => StatusCode::CONFLICT,
			Self::Store(_) | Self::Mailer(_) | Self::Other(_) => {
				StatusCode::INTERNAL_SERVER_ERROR
			}
		}
	}
}

impl IntoResponse for Error {
	fn into_response(self) -> Response {
		let status = self.status();
		if status.is_server_error() {
			tracing::error!(error = %self, "request failed");
			// nothing internal crosses the wire
			return (status, "internal server error").into_response();
		}
		(status, self.to_string()).into_response()
	}
}
