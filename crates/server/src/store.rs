use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use enum_dispatch::enum_dispatch;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Type alias for results returned by store operations
pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Error, Debug)]
pub enum StoreError {
	#[error("document violates a uniqueness constraint")]
	Duplicate,
	#[error("no document matched the selector")]
	NotFound,
	#[error("store failure: {0}")]
	Failure(String),
}

/// A stored public key. Immutable after insertion; resubmission replaces
/// the whole record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyRecord {
	/// Uppercase hex V4 fingerprint; the full identity of the certificate.
	pub fingerprint: String,
	/// Low-order 16 hex characters of the fingerprint; unique per record.
	pub key_id: String,
	pub algorithm: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub key_size: Option<usize>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub curve: Option<String>,
	pub created: DateTime<Utc>,
	pub uploaded: DateTime<Utc>,
	/// The submitted armored block, byte-preserved.
	pub armored: String,
	/// Lowercased emails referencing the userid collection, in certificate
	/// order.
	pub user_ids: Vec<String>,
}

/// Server-side record of one user id and its verification state.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserIdBinding {
	pub key_id: String,
	pub email: String,
	pub name: String,
	/// Single-use challenge token; `None` once consumed or verified.
	pub nonce: Option<String>,
	pub verified: bool,
}

/// Equality predicates over the key collection. Empty query matches all.
#[derive(Debug, Clone, Default)]
pub struct KeyQuery {
	pub key_id: Option<String>,
	/// Trailing hex match for 8-character short ids.
	pub key_id_suffix: Option<String>,
	pub fingerprint: Option<String>,
}

impl KeyQuery {
	pub fn by_key_id(key_id: &str) -> Self {
		Self {
			key_id: Some(key_id.to_string()),
			..Self::default()
		}
	}

	pub fn by_fingerprint(fingerprint: &str) -> Self {
		Self {
			fingerprint: Some(fingerprint.to_string()),
			..Self::default()
		}
	}

	fn matches(&self, record: &KeyRecord) -> bool {
		self.key_id.as_ref().is_none_or(|id| *id == record.key_id)
			&& self
				.key_id_suffix
				.as_ref()
				.is_none_or(|suffix| record.key_id.ends_with(suffix))
			&& self
				.fingerprint
				.as_ref()
				.is_none_or(|fpr| *fpr == record.fingerprint)
	}
}

/// Equality predicates over the userid collection.
#[derive(Debug, Clone, Default)]
pub struct BindingSelector {
	pub key_id: Option<String>,
	pub email: Option<String>,
	pub nonce: Option<String>,
	pub verified: Option<bool>,
}

impl BindingSelector {
	pub fn by_key_id(key_id: &str) -> Self {
		Self {
			key_id: Some(key_id.to_string()),
			..Self::default()
		}
	}

	pub fn by_email(email: &str) -> Self {
		Self {
			email: Some(email.to_string()),
			..Self::default()
		}
	}

	pub fn by_nonce(key_id: &str, nonce: &str) -> Self {
		Self {
			key_id: Some(key_id.to_string()),
			nonce: Some(nonce.to_string()),
			..Self::default()
		}
	}

	pub fn verified(mut self, verified: bool) -> Self {
		self.verified = Some(verified);
		self
	}

	fn matches(&self, binding: &UserIdBinding) -> bool {
		self.key_id.as_ref().is_none_or(|id| *id == binding.key_id)
			&& self.email.as_ref().is_none_or(|email| *email == binding.email)
			&& self
				.nonce
				.as_ref()
				.is_none_or(|nonce| binding.nonce.as_ref() == Some(nonce))
			&& self.verified.is_none_or(|verified| verified == binding.verified)
	}
}

/// Field patch for conditional binding updates. `nonce` distinguishes
/// "leave untouched" (`None`) from "clear" (`Some(None)`).
#[derive(Debug, Clone, Default)]
pub struct BindingPatch {
	pub verified: Option<bool>,
	pub nonce: Option<Option<String>>,
}

impl BindingPatch {
	fn apply(&self, binding: &mut UserIdBinding) {
		if let Some(verified) = self.verified {
			binding.verified = verified;
		}
		if let Some(nonce) = &self.nonce {
			binding.nonce = nonce.clone();
		}
	}
}

/// Typed persistence over the `key` and `userid` collections.
#[enum_dispatch]
pub trait Store {
	/// Fails with [`StoreError::Duplicate`] when a record with the same
	/// key id already exists.
	fn insert_key(&self, record: KeyRecord) -> Result<()>;
	fn get_key(&self, query: &KeyQuery) -> Option<KeyRecord>;
	fn list_keys(&self, query: &KeyQuery) -> Vec<KeyRecord>;
	/// Idempotent bulk removal.
	fn remove_key(&self, query: &KeyQuery);

	/// All-or-nothing by count: when fewer documents than submitted end up
	/// persisted this reports [`StoreError::Failure`] and the caller must
	/// compensate.
	fn insert_bindings(&self, batch: Vec<UserIdBinding>) -> Result<()>;
	fn find_binding(&self, selector: &BindingSelector) -> Option<UserIdBinding>;
	fn list_bindings(&self, selector: &BindingSelector) -> Vec<UserIdBinding>;
	/// Applies `patch` to every match in one atomic step; concurrent
	/// readers observe either no change or all of it. Fails with
	/// [`StoreError::NotFound`] when nothing matches.
	fn update_bindings(&self, selector: &BindingSelector, patch: &BindingPatch) -> Result<usize>;
	/// Idempotent bulk removal.
	fn remove_bindings(&self, selector: &BindingSelector);
}

#[enum_dispatch(Store)]
#[derive(Clone)]
pub enum StoreType {
	MemoryStore(MemoryStore),
}

/// Documents are keyed by a synthetic id; natural-key uniqueness is
/// enforced on insert.
struct Document<T> {
	id: String,
	body: T,
}

impl<T> Document<T> {
	fn new(body: T) -> Self {
		Self {
			id: Uuid::new_v4().to_string(),
			body,
		}
	}
}

#[derive(Default)]
struct Inner {
	keys: Vec<Document<KeyRecord>>,
	bindings: Vec<Document<UserIdBinding>>,
}

/// In-process store. A single lock over both collections keeps every
/// operation atomic with respect to concurrent readers.
#[derive(Clone, Default)]
pub struct MemoryStore(Arc<RwLock<Inner>>);

impl MemoryStore {
	pub fn new() -> Self {
		Self::default()
	}

	fn read(&self) -> std::sync::RwLockReadGuard<'_, Inner> {
		self.0.read().unwrap_or_else(std::sync::PoisonError::into_inner)
	}

	fn write(&self) -> std::sync::RwLockWriteGuard<'_, Inner> {
		self.0.write().unwrap_or_else(std::sync::PoisonError::into_inner)
	}
}

impl Store for MemoryStore {
	fn insert_key(&self, record: KeyRecord) -> Result<()> {
		let mut inner = self.write();
		if inner.keys.iter().any(|doc| doc.body.key_id == record.key_id) {
			return Err(StoreError::Duplicate);
		}
		let doc = Document::new(record);
		tracing::trace!(id = %doc.id, key_id = %doc.body.key_id, "inserted key document");
		inner.keys.push(doc);
		Ok(())
	}

	fn get_key(&self, query: &KeyQuery) -> Option<KeyRecord> {
		self.read()
			.keys
			.iter()
			.find(|doc| query.matches(&doc.body))
			.map(|doc| doc.body.clone())
	}

	fn list_keys(&self, query: &KeyQuery) -> Vec<KeyRecord> {
		self.read()
			.keys
			.iter()
			.filter(|doc| query.matches(&doc.body))
			.map(|doc| doc.body.clone())
			.collect()
	}

	fn remove_key(&self, query: &KeyQuery) {
		self.write().keys.retain(|doc| !query.matches(&doc.body));
	}

	fn insert_bindings(&self, batch: Vec<UserIdBinding>) -> Result<()> {
		let submitted = batch.len();
		let mut persisted = 0;
		let mut inner = self.write();
		for binding in batch {
			let conflict = inner.bindings.iter().any(|doc| {
				doc.body.key_id == binding.key_id && doc.body.email == binding.email
			});
			if conflict {
				continue;
			}
			inner.bindings.push(Document::new(binding));
			persisted += 1;
		}
		if persisted != submitted {
			return Err(StoreError::Failure(format!(
				"persisted {persisted} of {submitted} user id documents"
			)));
		}
		Ok(())
	}

	fn find_binding(&self, selector: &BindingSelector) -> Option<UserIdBinding> {
		self.read()
			.bindings
			.iter()
			.find(|doc| selector.matches(&doc.body))
			.map(|doc| doc.body.clone())
	}

	fn list_bindings(&self, selector: &BindingSelector) -> Vec<UserIdBinding> {
		self.read()
			.bindings
			.iter()
			.filter(|doc| selector.matches(&doc.body))
			.map(|doc| doc.body.clone())
			.collect()
	}

	fn update_bindings(&self, selector: &BindingSelector, patch: &BindingPatch) -> Result<usize> {
		let mut inner = self.write();
		let mut updated = 0;
		for doc in inner.bindings.iter_mut().filter(|doc| selector.matches(&doc.body)) {
			patch.apply(&mut doc.body);
			tracing::trace!(id = %doc.id, email = %doc.body.email, "patched userid document");
			updated += 1;
		}
		if updated == 0 {
			return Err(StoreError::NotFound);
		}
		Ok(updated)
	}

	fn remove_bindings(&self, selector: &BindingSelector) {
		self.write().bindings.retain(|doc| !selector.matches(&doc.body));
	}
}

#[cfg(test)]
pub(crate) mod tests {
	use super::*;

	pub(crate) fn key_record(key_id: &str, fingerprint: &str) -> KeyRecord {
		KeyRecord {
			fingerprint: fingerprint.to_string(),
			key_id: key_id.to_string(),
			algorithm: "eddsa".to_string(),
			key_size: Some(256),
			curve: Some("Ed25519".to_string()),
			created: Utc::now(),
			uploaded: Utc::now(),
			armored: "-----BEGIN PGP PUBLIC KEY BLOCK-----\n...".to_string(),
			user_ids: vec!["a@x.test".to_string()],
		}
	}

	fn binding(key_id: &str, email: &str, nonce: &str) -> UserIdBinding {
		UserIdBinding {
			key_id: key_id.to_string(),
			email: email.to_string(),
			name: String::new(),
			nonce: Some(nonce.to_string()),
			verified: false,
		}
	}

	#[test]
	fn key_ids_are_unique() {
		let store = MemoryStore::new();
		store.insert_key(key_record("AA11", "F00D")).unwrap();
		assert!(matches!(
			store.insert_key(key_record("AA11", "BEEF")),
			Err(StoreError::Duplicate)
		));
	}

	#[test]
	fn suffix_queries_find_short_ids() {
		let store = MemoryStore::new();
		store
			.insert_key(key_record("0123456789ABCDEF", "X"))
			.unwrap();
		let query = KeyQuery {
			key_id_suffix: Some("89ABCDEF".to_string()),
			..KeyQuery::default()
		};
		assert_eq!(store.list_keys(&query).len(), 1);
		assert!(store.get_key(&KeyQuery::by_key_id("89ABCDEF")).is_none());
	}

	#[test]
	fn batch_insert_reports_partial_failure() {
		let store = MemoryStore::new();
		store
			.insert_bindings(vec![binding("K", "a@x.test", "n1")])
			.unwrap();
		let result = store.insert_bindings(vec![
			binding("K", "b@x.test", "n2"),
			binding("K", "a@x.test", "n3"),
		]);
		assert!(matches!(result, Err(StoreError::Failure(_))));
		// the non-conflicting document went in; the caller compensates
		assert_eq!(store.list_bindings(&BindingSelector::by_key_id("K")).len(), 2);
	}

	#[test]
	fn update_is_conditional_on_the_selector() {
		let store = MemoryStore::new();
		store
			.insert_bindings(vec![binding("K", "a@x.test", "n1")])
			.unwrap();

		let patch = BindingPatch {
			verified: Some(true),
			nonce: Some(None),
		};
		assert!(matches!(
			store.update_bindings(&BindingSelector::by_nonce("K", "wrong"), &patch),
			Err(StoreError::NotFound)
		));

		assert_eq!(
			store
				.update_bindings(&BindingSelector::by_nonce("K", "n1"), &patch)
				.unwrap(),
			1
		);
		let updated = store
			.find_binding(&BindingSelector::by_email("a@x.test"))
			.unwrap();
		assert!(updated.verified);
		assert_eq!(updated.nonce, None);

		// the nonce is gone, so the same selector no longer matches
		assert!(matches!(
			store.update_bindings(&BindingSelector::by_nonce("K", "n1"), &patch),
			Err(StoreError::NotFound)
		));
	}

	#[test]
	fn removals_are_idempotent() {
		let store = MemoryStore::new();
		store.insert_key(key_record("AA11", "F00D")).unwrap();
		store
			.insert_bindings(vec![binding("AA11", "a@x.test", "n1")])
			.unwrap();

		store.remove_key(&KeyQuery::by_key_id("AA11"));
		store.remove_key(&KeyQuery::by_key_id("AA11"));
		store.remove_bindings(&BindingSelector::by_key_id("AA11"));
		store.remove_bindings(&BindingSelector::by_key_id("AA11"));

		assert!(store.get_key(&KeyQuery::by_key_id("AA11")).is_none());
		assert!(store.find_binding(&BindingSelector::by_key_id("AA11")).is_none());
	}
}
