use std::{collections::HashSet, io::Read};

use chrono::{DateTime, Utc};
use sequoia_openpgp::{
	Cert,
	armor::{self, ReaderMode},
	cert::CertParser,
	crypto::mpi,
	parse::Parse,
	policy::StandardPolicy,
	types::PublicKeyAlgorithm,
};

use crate::error::{Error, Result};

/// Primary RSA/DSA keys below this are rejected; ECC is exempt.
const MIN_KEY_BITS: usize = 2048;

const ARMOR_HEADER: &str = "-----BEGIN PGP PUBLIC KEY BLOCK-----";

/// A parsed certificate, ready to become a stored key record.
#[derive(Debug, Clone)]
pub struct KeyDraft {
	pub fingerprint: String,
	pub key_id: String,
	pub algorithm: String,
	pub key_size: Option<usize>,
	pub curve: Option<String>,
	pub created: DateTime<Utc>,
	/// The submitted armored block, byte-preserved. Lookups return exactly
	/// these bytes; the certificate is never re-serialized.
	pub armored: String,
}

/// One user id extracted from the certificate.
#[derive(Debug, Clone)]
pub struct UserIdDraft {
	pub email: String,
	pub name: String,
	/// Whether the binding self-signature checked out under the standard
	/// policy. Unbound user ids are still accepted; control of the address
	/// is proven by email anyway.
	pub bound: bool,
}

/// Parses a single ascii-armored public certificate into a key draft and
/// its user-id drafts, deduplicated by lowercased email.
pub fn parse(armored: &str) -> Result<(KeyDraft, Vec<UserIdDraft>)> {
	if !armored.trim_start().starts_with(ARMOR_HEADER) {
		return Err(Error::InvalidArmor);
	}

	let mut plain = Vec::new();
	let mut reader = armor::Reader::from_bytes(
		armored.as_bytes(),
		ReaderMode::Tolerant(Some(armor::Kind::PublicKey)),
	);
	reader
		.read_to_end(&mut plain)
		.map_err(|_| Error::InvalidArmor)?;

	let mut certs =
		CertParser::from_bytes(&plain).map_err(|err| Error::InvalidCertificate(err.to_string()))?;
	let cert = match certs.next() {
		Some(Ok(cert)) => cert,
		Some(Err(err)) => return Err(Error::InvalidCertificate(err.to_string())),
		None => return Err(Error::InvalidCertificate("no certificate found".to_string())),
	};
	if certs.next().is_some() {
		return Err(Error::InvalidCertificate(
			"more than one certificate in input".to_string(),
		));
	}
	if cert.is_tsk() {
		return Err(Error::InvalidCertificate(
			"certificate contains secret key material".to_string(),
		));
	}

	let key = cert.primary_key().key();
	let algorithm = algorithm_name(key.pk_algo());
	let key_size = key.mpis().bits();
	check_key_strength(algorithm, key_size)?;

	let draft = KeyDraft {
		fingerprint: cert.fingerprint().to_hex(),
		key_id: cert.keyid().to_hex(),
		algorithm: algorithm.to_string(),
		key_size,
		curve: curve_name(key.mpis()),
		created: DateTime::<Utc>::from(key.creation_time()),
		armored: armored.to_string(),
	};

	let user_ids = extract_user_ids(&cert);
	if user_ids.is_empty() {
		return Err(Error::NoUserIds);
	}

	Ok((draft, user_ids))
}

/// Splits every user-id packet into display name and lowercased addr-spec.
/// Packets without an addr-spec are dropped; the first occurrence of an
/// email wins.
fn extract_user_ids(cert: &Cert) -> Vec<UserIdDraft> {
	let policy = StandardPolicy::new();
	let bound: HashSet<String> = cert
		.with_policy(&policy, None)
		.ok()
		.map(|valid| {
			valid
				.userids()
				.filter_map(|ua| ua.userid().email_normalized().ok().flatten())
				.collect()
		})
		.unwrap_or_default();

	let mut seen = HashSet::new();
	let mut drafts = Vec::new();
	for ua in cert.userids() {
		let uid = ua.userid();
		let Ok(Some(email)) = uid.email_normalized() else {
			continue;
		};
		if !seen.insert(email.clone()) {
			continue;
		}
		let name = uid
			.name()
			.ok()
			.flatten()
			.map(|name| name.to_string())
			.unwrap_or_default();
		drafts.push(UserIdDraft {
			bound: bound.contains(&email),
			email,
			name,
		});
	}
	drafts
}

fn check_key_strength(algorithm: &str, bits: Option<usize>) -> Result<()> {
	if matches!(algorithm, "rsa" | "dsa") && bits.unwrap_or(0) < MIN_KEY_BITS {
		return Err(Error::KeyTooShort { min: MIN_KEY_BITS });
	}
	Ok(())
}

fn algorithm_name(algo: PublicKeyAlgorithm) -> &'static str {
	match algo {
		PublicKeyAlgorithm::RSAEncryptSign => "rsa",
		PublicKeyAlgorithm::DSA => "dsa",
		PublicKeyAlgorithm::ECDSA => "ecdsa",
		PublicKeyAlgorithm::EdDSA
		| PublicKeyAlgorithm::Ed25519
		| PublicKeyAlgorithm::Ed448 => "eddsa",
		PublicKeyAlgorithm::ECDH | PublicKeyAlgorithm::X25519 | PublicKeyAlgorithm::X448 => {
			"ecdh"
		}
		_ => "unknown",
	}
}

fn curve_name(mpis: &mpi::PublicKey) -> Option<String> {
	match mpis {
		mpi::PublicKey::EdDSA { curve, .. }
		| mpi::PublicKey::ECDSA { curve, .. }
		| mpi::PublicKey::ECDH { curve, .. } => Some(curve.to_string()),
		mpi::PublicKey::Ed25519 { .. } => Some("Ed25519".to_string()),
		mpi::PublicKey::Ed448 { .. } => Some("Ed448".to_string()),
		mpi::PublicKey::X25519 { .. } => Some("Curve25519".to_string()),
		mpi::PublicKey::X448 { .. } => Some("X448".to_string()),
		_ => None,
	}
}

#[cfg(test)]
pub(crate) mod tests {
	use sequoia_openpgp::{cert::CertBuilder, serialize::MarshalInto};

	use super::*;

	/// Generates an armored certificate carrying the given user ids.
	pub(crate) fn armored_cert(user_ids: &[&str]) -> String {
		let mut builder = CertBuilder::new();
		for uid in user_ids {
			builder = builder.add_userid(*uid);
		}
		let (cert, _) = builder.generate().expect("cert generation");
		String::from_utf8(cert.armored().to_vec().expect("armor")).expect("utf8")
	}

	#[test]
	fn parses_a_fresh_certificate() {
		let armored = armored_cert(&["Alice <a@x.test>", "Alice Alt <a.alt@x.test>"]);
		let (draft, uids) = parse(&armored).unwrap();

		assert_eq!(draft.fingerprint.len(), 40);
		assert_eq!(draft.key_id, &draft.fingerprint[24..]);
		assert_eq!(draft.algorithm, "eddsa");
		assert_eq!(draft.armored, armored);

		assert_eq!(uids.len(), 2);
		assert_eq!(uids[0].email, "a@x.test");
		assert_eq!(uids[0].name, "Alice");
		assert_eq!(uids[1].email, "a.alt@x.test");
		assert!(uids.iter().all(|uid| uid.bound));
	}

	#[test]
	fn lowercases_and_deduplicates_emails() {
		let armored = armored_cert(&[
			"Alice <Alice@X.test>",
			"Other Alice <alice@x.test>",
			"Bob <bob@x.test>",
		]);
		let (_, uids) = parse(&armored).unwrap();
		let emails: Vec<&str> = uids.iter().map(|uid| uid.email.as_str()).collect();
		assert_eq!(emails, ["alice@x.test", "bob@x.test"]);
		// first occurrence wins
		assert_eq!(uids[0].name, "Alice");
	}

	#[test]
	fn rejects_garbage() {
		assert!(matches!(parse("not a key"), Err(Error::InvalidArmor)));
		assert!(matches!(
			parse("-----BEGIN PGP PUBLIC KEY BLOCK-----\n\nzm9v\n-----END PGP PUBLIC KEY BLOCK-----\n"),
			Err(Error::InvalidArmor | Error::InvalidCertificate(_))
		));
	}

	#[test]
	fn rejects_certificates_without_an_address() {
		let armored = armored_cert(&["Just A Name"]);
		assert!(matches!(parse(&armored), Err(Error::NoUserIds)));
	}

	#[test]
	fn rejects_concatenated_certificates() {
		use std::io::Write;

		use sequoia_openpgp::serialize::Marshal;

		// one armor block holding the packets of two certificates
		let mut body = Vec::new();
		for uid in ["One <one@x.test>", "Two <two@x.test>"] {
			let (cert, _) = CertBuilder::new().add_userid(uid).generate().unwrap();
			cert.serialize(&mut body).unwrap();
		}
		let mut sink = Vec::new();
		let mut writer =
			armor::Writer::new(&mut sink, armor::Kind::PublicKey).expect("armor writer");
		writer.write_all(&body).unwrap();
		writer.finalize().unwrap();
		let armored = String::from_utf8(sink).unwrap();

		assert!(matches!(
			parse(&armored),
			Err(Error::InvalidCertificate(_))
		));
	}

	#[test]
	fn weak_rsa_and_dsa_are_rejected() {
		assert!(matches!(
			check_key_strength("rsa", Some(1024)),
			Err(Error::KeyTooShort { min: 2048 })
		));
		assert!(matches!(
			check_key_strength("dsa", Some(1024)),
			Err(Error::KeyTooShort { .. })
		));
		assert!(check_key_strength("rsa", Some(2048)).is_ok());
		// ECC sizes are curve-bound, not policy-bound
		assert!(check_key_strength("eddsa", Some(256)).is_ok());
	}
}
