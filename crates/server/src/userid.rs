use std::sync::Arc;

use tokio::sync::Mutex;
use uuid::Uuid;

use crate::{
	error::{Error, Result},
	parser::UserIdDraft,
	store::{BindingPatch, BindingSelector, Store, StoreError, StoreType, UserIdBinding},
};

/// Owns the userid collection: nonce issuance, challenge verification and
/// the single-verified-address rule. All writes to the collection go
/// through this service.
#[derive(Clone)]
pub struct UserIdService {
	store: StoreType,
	/// Serializes verified-state transitions. Demoting the previous holder
	/// of an address and promoting the new one must be one step to every
	/// observer; with the store in-process, one lock is that step.
	transition: Arc<Mutex<()>>,
}

/// Challenge nonces are v4 uuids in textual form, 122 bits from the
/// process csprng.
fn new_nonce() -> String {
	Uuid::new_v4().to_string()
}

impl UserIdService {
	pub fn new(store: StoreType) -> Self {
		Self {
			store,
			transition: Arc::new(Mutex::new(())),
		}
	}

	/// Persists one pending binding per draft, each with a fresh nonce.
	/// Partial persistence surfaces as a store failure; the caller
	/// compensates.
	pub fn batch(&self, key_id: &str, drafts: Vec<UserIdDraft>) -> Result<Vec<UserIdBinding>> {
		let bindings: Vec<UserIdBinding> = drafts
			.into_iter()
			.map(|draft| UserIdBinding {
				key_id: key_id.to_string(),
				email: draft.email,
				name: draft.name,
				nonce: Some(new_nonce()),
				verified: false,
			})
			.collect();
		self.store.insert_bindings(bindings.clone())?;
		Ok(bindings)
	}

	/// Resolves a submission challenge. The nonce is cleared in the same
	/// store update that marks the binding verified, so a second attempt
	/// observes [`Error::NotFound`].
	pub async fn verify(&self, key_id: &str, nonce: &str) -> Result<UserIdBinding> {
		let _transition = self.transition.lock().await;

		let Some(mut binding) = self.store.find_binding(&BindingSelector::by_nonce(key_id, nonce))
		else {
			return Err(Error::NotFound);
		};

		// newest verification wins; the previous holder of this address
		// loses it, on whatever key it lives
		let demote = BindingSelector::by_email(&binding.email).verified(true);
		let patch = BindingPatch {
			verified: Some(false),
			..BindingPatch::default()
		};
		match self.store.update_bindings(&demote, &patch) {
			Ok(count) => {
				tracing::info!(email = %binding.email, count, "demoted previously verified user id");
			}
			Err(StoreError::NotFound) => {}
			Err(err) => return Err(err.into()),
		}

		let promote = BindingPatch {
			verified: Some(true),
			nonce: Some(None),
		};
		self.store
			.update_bindings(&BindingSelector::by_nonce(key_id, nonce), &promote)
			.map_err(|err| match err {
				StoreError::NotFound => Error::NotFound,
				err => err.into(),
			})?;

		binding.verified = true;
		binding.nonce = None;
		Ok(binding)
	}

	/// First verified binding for the key, or for any of the given emails
	/// in list order.
	pub fn get_verified(
		&self,
		key_id: Option<&str>,
		emails: Option<&[String]>,
	) -> Option<UserIdBinding> {
		if let Some(key_id) = key_id {
			return self
				.store
				.find_binding(&BindingSelector::by_key_id(key_id).verified(true));
		}
		for email in emails.unwrap_or_default() {
			let binding = self
				.store
				.find_binding(&BindingSelector::by_email(email).verified(true));
			if binding.is_some() {
				return binding;
			}
		}
		None
	}

	pub fn list(&self, selector: &BindingSelector) -> Vec<UserIdBinding> {
		self.store.list_bindings(selector)
	}

	/// Re-arms every matching binding for a removal challenge: fresh
	/// nonce, verified flag cleared. The affected keys go dark right away.
	pub async fn reissue(&self, selector: &BindingSelector) -> Result<Vec<UserIdBinding>> {
		let _transition = self.transition.lock().await;

		let bindings = self.store.list_bindings(selector);
		if bindings.is_empty() {
			return Err(Error::NotFound);
		}

		let mut reissued = Vec::with_capacity(bindings.len());
		for mut binding in bindings {
			let nonce = new_nonce();
			let exact = BindingSelector {
				key_id: Some(binding.key_id.clone()),
				email: Some(binding.email.clone()),
				..BindingSelector::default()
			};
			let patch = BindingPatch {
				verified: Some(false),
				nonce: Some(Some(nonce.clone())),
			};
			self.store.update_bindings(&exact, &patch)?;
			binding.verified = false;
			binding.nonce = Some(nonce);
			reissued.push(binding);
		}
		Ok(reissued)
	}

	/// Resolves a removal challenge, consuming the nonce. The caller
	/// deletes the key; a concurrent attempt with the same nonce observes
	/// [`Error::NotFound`].
	pub async fn consume_removal(&self, key_id: &str, nonce: &str) -> Result<UserIdBinding> {
		let _transition = self.transition.lock().await;

		let selector = BindingSelector::by_nonce(key_id, nonce);
		let Some(binding) = self.store.find_binding(&selector) else {
			return Err(Error::NotFound);
		};
		let patch = BindingPatch {
			nonce: Some(None),
			..BindingPatch::default()
		};
		self.store.update_bindings(&selector, &patch)?;
		Ok(binding)
	}

	/// Deletes every binding of the key.
	pub fn remove(&self, key_id: &str) {
		self.store.remove_bindings(&BindingSelector::by_key_id(key_id));
	}
}
