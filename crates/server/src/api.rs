use axum::{
	Json, Router,
	extract::{Query, State},
	http::{HeaderMap, StatusCode},
	response::{Html, IntoResponse, Response},
	routing::get,
};
use axum_extra::extract::Host;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
	AppState,
	error::{Error, Result},
	i18n,
	key::{LookupQuery, PublishedKey, RemoveRequest},
};

/// The REST dialect under `/api/v1`.
pub fn router() -> Router<AppState> {
	Router::new().route(
		"/api/v1/key",
		get(get_key).post(submit_key).delete(remove_key),
	)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct KeyParams {
	op: Option<String>,
	key_id: Option<String>,
	fingerprint: Option<String>,
	email: Option<String>,
	nonce: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubmitBody {
	public_key_armored: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct KeyView {
	key_id: String,
	fingerprint: String,
	user_ids: Vec<UserIdView>,
	created: DateTime<Utc>,
	uploaded: DateTime<Utc>,
	algorithm: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	key_size: Option<usize>,
	#[serde(skip_serializing_if = "Option::is_none")]
	curve: Option<String>,
	public_key_armored: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct UserIdView {
	name: String,
	email: String,
	verified: bool,
}

impl From<PublishedKey> for KeyView {
	fn from(key: PublishedKey) -> Self {
		Self {
			key_id: key.record.key_id,
			fingerprint: key.record.fingerprint,
			user_ids: key
				.user_ids
				.into_iter()
				.map(|binding| UserIdView {
					name: binding.name,
					email: binding.email,
					verified: binding.verified,
				})
				.collect(),
			created: key.record.created,
			uploaded: key.record.uploaded,
			algorithm: key.record.algorithm,
			key_size: key.record.key_size,
			curve: key.record.curve,
			public_key_armored: key.record.armored,
		}
	}
}

/// Challenge resolution (`op=verify`, `op=verifyRemove`) and lookups live
/// on the same route, dispatched on `op`.
async fn get_key(
	State(state): State<AppState>,
	headers: HeaderMap,
	Query(params): Query<KeyParams>,
) -> Result<Response> {
	let locale = crate::locale_from(&headers, &state.locales);
	match params.op.as_deref() {
		Some("verify") => {
			let (key_id, nonce) = challenge_params(&params)?;
			let binding = state.keys.verify(key_id, nonce).await?;
			Ok(Html(i18n::verified_page(locale, &binding.email)).into_response())
		}
		Some("verifyRemove") => {
			let (key_id, nonce) = challenge_params(&params)?;
			state.keys.verify_remove(key_id, nonce).await?;
			Ok(Html(i18n::removed_page(locale)).into_response())
		}
		Some(op) => Err(Error::MalformedQuery(format!("unknown operation: {op}"))),
		None => {
			let query = LookupQuery {
				key_id: params.key_id,
				fingerprint: params.fingerprint,
				email: params.email,
			};
			let key = state.keys.get(&query)?;
			Ok(Json(KeyView::from(key)).into_response())
		}
	}
}

async fn submit_key(
	State(state): State<AppState>,
	Host(host): Host,
	headers: HeaderMap,
	Json(body): Json<SubmitBody>,
) -> Result<StatusCode> {
	let locale = crate::locale_from(&headers, &state.locales);
	let origin = crate::origin_from(&headers, &host);
	state
		.keys
		.submit(&body.public_key_armored, &origin, locale)
		.await?;
	Ok(StatusCode::ACCEPTED)
}

async fn remove_key(
	State(state): State<AppState>,
	Host(host): Host,
	headers: HeaderMap,
	Query(params): Query<KeyParams>,
) -> Result<StatusCode> {
	let locale = crate::locale_from(&headers, &state.locales);
	let origin = crate::origin_from(&headers, &host);
	let request = RemoveRequest {
		key_id: params.key_id,
		email: params.email,
	};
	state.keys.request_remove(&request, &origin, locale).await?;
	Ok(StatusCode::ACCEPTED)
}

fn challenge_params(params: &KeyParams) -> Result<(&str, &str)> {
	match (params.key_id.as_deref(), params.nonce.as_deref()) {
		(Some(key_id), Some(nonce)) => Ok((key_id, nonce)),
		_ => Err(Error::MalformedQuery(
			"keyId and nonce are required".to_string(),
		)),
	}
}
