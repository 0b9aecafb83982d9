use axum::{
	Form, Router,
	extract::{Query, State},
	http::{HeaderMap, StatusCode, header},
	response::{IntoResponse, Response},
	routing::{get, post},
};
use axum_extra::extract::Host;
use serde::Deserialize;

use crate::{
	AppState,
	error::{Error, Result},
	key::{LookupQuery, PublishedKey},
};

/// The legacy HKP dialect under `/pks`.
pub fn router() -> Router<AppState> {
	Router::new()
		.route("/pks/lookup", get(lookup))
		.route("/pks/add", post(add))
}

#[derive(Debug, Deserialize)]
struct LookupParams {
	op: Option<String>,
	search: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AddForm {
	keytext: String,
}

async fn lookup(
	State(state): State<AppState>,
	Query(params): Query<LookupParams>,
) -> Response {
	let op = match params.op.as_deref() {
		Some(op @ ("get" | "index")) => op,
		Some(_) | None => {
			return (StatusCode::NOT_IMPLEMENTED, "unsupported operation\n").into_response();
		}
	};
	let query = match params.search.as_deref() {
		Some(search) => match parse_search(search) {
			Ok(query) => query,
			Err(err) => return err.into_response(),
		},
		None => {
			return Error::MalformedQuery("missing search parameter".to_string()).into_response();
		}
	};

	match state.keys.get(&query) {
		Ok(key) if op == "get" => plain(key.record.armored),
		Ok(key) => plain(index(&key)),
		Err(err) => err.into_response(),
	}
}

async fn add(
	State(state): State<AppState>,
	Host(host): Host,
	headers: HeaderMap,
	Form(form): Form<AddForm>,
) -> Response {
	let locale = crate::locale_from(&headers, &state.locales);
	let origin = crate::origin_from(&headers, &host);
	match state.keys.submit(&form.keytext, &origin, locale).await {
		Ok(()) => (
			StatusCode::CREATED,
			"Upload successful. Check your inbox to verify your email address.\n",
		)
			.into_response(),
		// resubmission of a published key
		Err(Error::AlreadyExists) => StatusCode::NOT_MODIFIED.into_response(),
		Err(err) => err.into_response(),
	}
}

fn plain(body: String) -> Response {
	([(header::CONTENT_TYPE, "text/plain; charset=utf-8")], body).into_response()
}

/// `0x`-prefixed fingerprints and key ids, or an email address.
fn parse_search(search: &str) -> Result<LookupQuery> {
	let search = search.trim();
	if let Some(hex) = search
		.strip_prefix("0x")
		.or_else(|| search.strip_prefix("0X"))
	{
		return match hex.len() {
			40 => Ok(LookupQuery {
				fingerprint: Some(hex.to_string()),
				..LookupQuery::default()
			}),
			16 | 8 => Ok(LookupQuery {
				key_id: Some(hex.to_string()),
				..LookupQuery::default()
			}),
			_ => Err(Error::MalformedQuery(format!(
				"not a fingerprint or key id: {search}"
			))),
		};
	}
	if search.contains('@') {
		return Ok(LookupQuery {
			email: Some(search.to_string()),
			..LookupQuery::default()
		});
	}
	Err(Error::MalformedQuery(format!(
		"unsupported search term: {search}"
	)))
}

/// Machine-readable index block per the HKP draft: an `info` line, a
/// `pub` line, and one `uid` line per verified user id.
fn index(key: &PublishedKey) -> String {
	let mut out = String::from("info:1:1\n");
	out.push_str(&format!(
		"pub:{}:{}:{}:{}::\n",
		key.record.fingerprint,
		algorithm_id(&key.record.algorithm),
		key.record
			.key_size
			.map(|bits| bits.to_string())
			.unwrap_or_default(),
		key.record.created.timestamp(),
	));
	for uid in &key.user_ids {
		let display = if uid.name.is_empty() {
			format!("<{}>", uid.email)
		} else {
			format!("{} <{}>", uid.name, uid.email)
		};
		out.push_str(&format!("uid:{}:::\n", escape(&display)));
	}
	out
}

/// RFC 4880 public key algorithm ids.
fn algorithm_id(name: &str) -> u8 {
	match name {
		"rsa" => 1,
		"dsa" => 17,
		"ecdh" => 18,
		"ecdsa" => 19,
		"eddsa" => 22,
		_ => 0,
	}
}

fn escape(uid: &str) -> String {
	uid.replace('%', "%25").replace(':', "%3A")
}
