use chrono::{Duration, Utc};

use crate::{
	error::{Error, Result},
	i18n::Locale,
	mailer::{Mailer, Template},
	parser,
	store::{BindingSelector, KeyQuery, KeyRecord, Store, StoreError, StoreType, UserIdBinding},
	userid::UserIdService,
};

/// A publicly visible key: the record plus its verified user ids in
/// certificate order.
#[derive(Debug, Clone)]
pub struct PublishedKey {
	pub record: KeyRecord,
	pub user_ids: Vec<UserIdBinding>,
}

/// Lookup parameters. Resolution order: fingerprint, key id, email.
#[derive(Debug, Clone, Default)]
pub struct LookupQuery {
	pub key_id: Option<String>,
	pub fingerprint: Option<String>,
	pub email: Option<String>,
}

/// Removal target: a whole key, or every binding of an email address.
#[derive(Debug, Clone, Default)]
pub struct RemoveRequest {
	pub key_id: Option<String>,
	pub email: Option<String>,
}

/// Orchestrates parser, store, userid service and mailer. Holds no state
/// of its own; everything lives in the store.
#[derive(Clone)]
pub struct KeyService {
	store: StoreType,
	user_ids: UserIdService,
	mailer: Mailer,
}

impl KeyService {
	pub fn new(store: StoreType, user_ids: UserIdService, mailer: Mailer) -> Self {
		Self {
			store,
			user_ids,
			mailer,
		}
	}

	/// Accepts an armored certificate and mails one challenge per user id.
	/// Succeeds as long as at least one challenge went out; with none
	/// dispatched, or on a partial store write, everything written here is
	/// rolled back.
	pub async fn submit(&self, armored: &str, origin: &str, locale: Locale) -> Result<()> {
		let (draft, uid_drafts) = parser::parse(armored)?;
		let key_id = draft.key_id.clone();
		for uid in &uid_drafts {
			if !uid.bound {
				tracing::debug!(%key_id, email = %uid.email, "user id lacks a valid binding signature");
			}
		}

		if self.store.get_key(&KeyQuery::by_key_id(&key_id)).is_some() {
			if self.user_ids.get_verified(Some(&key_id), None).is_some() {
				// a published key cannot be used to trigger new challenge
				// mail against its verified addresses
				return Err(Error::AlreadyExists);
			}
			tracing::info!(%key_id, "replacing pending key, previous nonces are void");
			self.discard(&key_id);
		}

		let record = KeyRecord {
			fingerprint: draft.fingerprint,
			key_id: key_id.clone(),
			algorithm: draft.algorithm,
			key_size: draft.key_size,
			curve: draft.curve,
			created: draft.created,
			uploaded: Utc::now(),
			armored: draft.armored,
			user_ids: uid_drafts.iter().map(|uid| uid.email.clone()).collect(),
		};
		self.store.insert_key(record).map_err(|err| match err {
			// lost a concurrent submission race
			StoreError::Duplicate => Error::AlreadyExists,
			err => err.into(),
		})?;

		let bindings = match self.user_ids.batch(&key_id, uid_drafts) {
			Ok(bindings) => bindings,
			Err(err) => {
				self.discard(&key_id);
				return Err(err);
			}
		};

		let mut dispatched = 0;
		for binding in &bindings {
			let nonce = binding.nonce.as_deref().unwrap_or_default();
			match self
				.mailer
				.send(Template::VerifyKey, locale, &binding.email, &key_id, nonce, origin)
				.await
			{
				Ok(()) => dispatched += 1,
				Err(err) => {
					tracing::warn!(email = %binding.email, %err, "challenge mail failed");
				}
			}
		}
		if dispatched == 0 {
			self.discard(&key_id);
			return Err(Error::Mailer(
				"no challenge mail could be dispatched".to_string(),
			));
		}

		tracing::info!(
			%key_id,
			user_ids = bindings.len(),
			dispatched,
			"key submitted, pending verification"
		);
		Ok(())
	}

	/// Resolves a submission challenge; afterwards the key is publicly
	/// visible through the verified address.
	pub async fn verify(&self, key_id: &str, nonce: &str) -> Result<UserIdBinding> {
		let binding = self.user_ids.verify(key_id, nonce).await?;
		tracing::info!(key_id, email = %binding.email, "user id verified");
		Ok(binding)
	}

	/// Looks up a key. Keys without a single verified user id do not
	/// exist to the public, whatever the query.
	pub fn get(&self, query: &LookupQuery) -> Result<PublishedKey> {
		let record = self.resolve(query)?;
		let verified = self
			.user_ids
			.list(&BindingSelector::by_key_id(&record.key_id).verified(true));
		if verified.is_empty() {
			return Err(Error::NotFound);
		}

		let user_ids = record
			.user_ids
			.iter()
			.filter_map(|email| verified.iter().find(|binding| &binding.email == email))
			.cloned()
			.collect();
		Ok(PublishedKey { record, user_ids })
	}

	/// Re-arms the targeted bindings and mails one removal challenge per
	/// binding. The affected addresses stop resolving immediately.
	pub async fn request_remove(
		&self,
		request: &RemoveRequest,
		origin: &str,
		locale: Locale,
	) -> Result<()> {
		let selector = if let Some(key_id) = &request.key_id {
			let key_id = normalize_hex(key_id)?;
			if key_id.len() != 16 {
				return Err(Error::MalformedQuery(
					"key id must be 16 hex characters".to_string(),
				));
			}
			BindingSelector::by_key_id(&key_id)
		} else if let Some(email) = &request.email {
			BindingSelector::by_email(&normalize_email(email)?)
		} else {
			return Err(Error::MalformedQuery(
				"a key id or email address is required".to_string(),
			));
		};

		let bindings = self.user_ids.reissue(&selector).await?;
		let mut dispatched = 0;
		for binding in &bindings {
			let nonce = binding.nonce.as_deref().unwrap_or_default();
			match self
				.mailer
				.send(
					Template::VerifyRemove,
					locale,
					&binding.email,
					&binding.key_id,
					nonce,
					origin,
				)
				.await
			{
				Ok(()) => dispatched += 1,
				Err(err) => {
					tracing::warn!(email = %binding.email, %err, "removal mail failed");
				}
			}
		}
		if dispatched == 0 {
			return Err(Error::Mailer(
				"no removal mail could be dispatched".to_string(),
			));
		}
		Ok(())
	}

	/// Resolves a removal challenge and deletes the key with all its
	/// bindings.
	pub async fn verify_remove(&self, key_id: &str, nonce: &str) -> Result<()> {
		let binding = self.user_ids.consume_removal(key_id, nonce).await?;
		self.discard(&binding.key_id);
		tracing::info!(key_id = %binding.key_id, "key removed after confirmed challenge");
		Ok(())
	}

	/// Deletes keys that never saw a verification and are older than
	/// `older_than_days`. Returns the number of purged keys.
	pub fn purge_unverified(&self, older_than_days: u32) -> usize {
		let cutoff = Utc::now() - Duration::days(older_than_days.into());
		let mut purged = 0;
		for record in self.store.list_keys(&KeyQuery::default()) {
			if record.uploaded >= cutoff
				|| self.user_ids.get_verified(Some(&record.key_id), None).is_some()
			{
				continue;
			}
			self.discard(&record.key_id);
			purged += 1;
		}
		if purged > 0 {
			tracing::info!(purged, "purged unverified keys");
		}
		purged
	}

	fn resolve(&self, query: &LookupQuery) -> Result<KeyRecord> {
		if let Some(fingerprint) = &query.fingerprint {
			let fingerprint = normalize_hex(fingerprint)?;
			if fingerprint.len() != 40 {
				return Err(Error::MalformedQuery(
					"fingerprint must be 40 hex characters".to_string(),
				));
			}
			return self
				.store
				.get_key(&KeyQuery::by_fingerprint(&fingerprint))
				.ok_or(Error::NotFound);
		}

		if let Some(key_id) = &query.key_id {
			let key_id = normalize_hex(key_id)?;
			return match key_id.len() {
				16 => self
					.store
					.get_key(&KeyQuery::by_key_id(&key_id))
					.ok_or(Error::NotFound),
				8 => {
					let hits = self.store.list_keys(&KeyQuery {
						key_id_suffix: Some(key_id.clone()),
						..KeyQuery::default()
					});
					if hits.len() > 1 {
						tracing::warn!(
							short_id = %key_id,
							candidates = hits.len(),
							"ambiguous short key id, returning the first hit"
						);
					}
					hits.into_iter().next().ok_or(Error::NotFound)
				}
				_ => Err(Error::MalformedQuery(
					"key id must be 16 or 8 hex characters".to_string(),
				)),
			};
		}

		if let Some(email) = &query.email {
			let emails = [normalize_email(email)?];
			let binding = self
				.user_ids
				.get_verified(None, Some(&emails[..]))
				.ok_or(Error::NotFound)?;
			return self
				.store
				.get_key(&KeyQuery::by_key_id(&binding.key_id))
				.ok_or(Error::NotFound);
		}

		Err(Error::MalformedQuery("no query parameter given".to_string()))
	}

	/// Deletes the key record and every binding; used for replacement,
	/// confirmed removal and submit compensation alike.
	fn discard(&self, key_id: &str) {
		self.user_ids.remove(key_id);
		self.store.remove_key(&KeyQuery::by_key_id(key_id));
	}
}

fn normalize_hex(input: &str) -> Result<String> {
	let input = input.trim();
	let input = input
		.strip_prefix("0x")
		.or_else(|| input.strip_prefix("0X"))
		.unwrap_or(input);
	if input.is_empty() || !input.bytes().all(|b| b.is_ascii_hexdigit()) {
		return Err(Error::MalformedQuery(format!(
			"not a hex identifier: {input}"
		)));
	}
	Ok(input.to_ascii_uppercase())
}

fn normalize_email(input: &str) -> Result<String> {
	let email = input.trim().to_lowercase();
	if !email.contains('@') {
		return Err(Error::MalformedQuery(format!("not an email address: {input}")));
	}
	Ok(email)
}
