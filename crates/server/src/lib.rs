#![warn(clippy::pedantic)]

//! A public OpenPGP key server. Keys are published only after the
//! submitter proves control of each listed email address through a mailed
//! challenge; removal takes the same proof. Speaks legacy HKP under
//! `/pks` and a REST dialect under `/api/v1`.

use axum::{
	Router,
	http::{HeaderMap, HeaderValue, header},
};
use tower_http::{set_header::SetResponseHeaderLayer, trace::TraceLayer};

pub mod api;
pub mod config;
pub mod error;
pub mod hkp;
pub mod i18n;
pub mod key;
pub mod mailer;
pub mod parser;
pub mod store;
pub mod userid;

use i18n::Locale;
use key::KeyService;

const CSP: &str = "default-src 'self'; object-src 'none'; frame-ancestors 'none'";

/// Shared state behind both adapters. The dependency graph is wired once
/// at startup: store and mailer feed the userid service, which feeds the
/// key service; the adapters only ever talk to the key service.
#[derive(Clone)]
pub struct AppState {
	pub keys: KeyService,
	pub locales: Vec<Locale>,
}

pub fn app(state: AppState, csp: bool) -> Router {
	let router = Router::new()
		.merge(hkp::router())
		.merge(api::router())
		.layer(TraceLayer::new_for_http())
		.with_state(state);
	if csp {
		router.layer(SetResponseHeaderLayer::overriding(
			header::CONTENT_SECURITY_POLICY,
			HeaderValue::from_static(CSP),
		))
	} else {
		router
	}
}

/// First enabled `Accept-Language` entry, fallback English.
pub(crate) fn locale_from(headers: &HeaderMap, enabled: &[Locale]) -> Locale {
	i18n::negotiate(
		headers
			.get(header::ACCEPT_LANGUAGE)
			.and_then(|value| value.to_str().ok()),
		enabled,
	)
}

/// Base URL for challenge links, reconstructed from the request.
pub(crate) fn origin_from(headers: &HeaderMap, host: &str) -> String {
	let proto = headers
		.get("x-forwarded-proto")
		.and_then(|value| value.to_str().ok())
		.unwrap_or("http");
	format!("{proto}://{host}")
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn origin_honors_the_forwarded_proto() {
		let mut headers = HeaderMap::new();
		assert_eq!(origin_from(&headers, "keys.test"), "http://keys.test");

		headers.insert("x-forwarded-proto", HeaderValue::from_static("https"));
		assert_eq!(origin_from(&headers, "keys.test"), "https://keys.test");
	}
}
