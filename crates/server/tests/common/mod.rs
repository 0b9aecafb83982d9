//! Shared harness for the integration tests: an in-memory service stack
//! with a recording mail transport, plus helpers to mint certificates and
//! to fish challenge parameters out of the outbox.

#![allow(dead_code)]

use lettre::transport::stub::AsyncStubTransport;
use runekeys_server::{
	key::KeyService,
	mailer::Mailer,
	store::{MemoryStore, StoreType},
	userid::UserIdService,
};
use sequoia_openpgp::{cert::CertBuilder, serialize::MarshalInto};

pub struct Harness {
	pub keys: KeyService,
	pub store: StoreType,
	pub outbox: AsyncStubTransport,
}

pub fn harness() -> Harness {
	let store = StoreType::from(MemoryStore::new());
	let (mailer, outbox) = Mailer::stub();
	let user_ids = UserIdService::new(store.clone());
	let keys = KeyService::new(store.clone(), user_ids, mailer);
	Harness {
		keys,
		store,
		outbox,
	}
}

pub fn failing_harness() -> Harness {
	let store = StoreType::from(MemoryStore::new());
	let user_ids = UserIdService::new(store.clone());
	let keys = KeyService::new(store.clone(), user_ids, Mailer::failing_stub());
	Harness {
		keys,
		store,
		outbox: AsyncStubTransport::new_ok(),
	}
}

/// Generates an armored certificate carrying the given user ids.
pub fn armored_cert(user_ids: &[&str]) -> String {
	let mut builder = CertBuilder::new();
	for uid in user_ids {
		builder = builder.add_userid(*uid);
	}
	let (cert, _) = builder.generate().expect("cert generation");
	String::from_utf8(cert.armored().to_vec().expect("armor")).expect("utf8")
}

/// `(key_id, nonce)` of the most recent challenge mailed to `email`.
/// Tests submit with the English locale, so the bodies go over the wire
/// unencoded.
pub async fn challenge_for(outbox: &AsyncStubTransport, email: &str) -> (String, String) {
	let messages = outbox.messages().await;
	let (_, body) = messages
		.iter()
		.rev()
		.find(|(envelope, _)| {
			envelope
				.to()
				.iter()
				.any(|address| address.to_string() == email)
		})
		.unwrap_or_else(|| panic!("no challenge mail for {email}"));

	let key_id = param(body, "keyId=");
	let nonce = param(body, "nonce=");
	(key_id, nonce)
}

fn param(body: &str, marker: &str) -> String {
	let start = body.find(marker).expect("challenge link parameter") + marker.len();
	body[start..]
		.chars()
		.take_while(|c| c.is_ascii_alphanumeric() || *c == '-')
		.collect()
}
