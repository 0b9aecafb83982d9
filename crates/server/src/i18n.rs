use std::{fmt, str::FromStr};

/// Locales the server can render emails and confirmation pages in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Locale {
	En,
	De,
}

impl Locale {
	pub fn as_str(self) -> &'static str {
		match self {
			Self::En => "en",
			Self::De => "de",
		}
	}
}

impl fmt::Display for Locale {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for Locale {
	type Err = ();

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		// `de-DE;q=0.8` and friends reduce to the primary subtag
		let primary = s
			.split(';')
			.next()
			.unwrap_or_default()
			.trim()
			.split('-')
			.next()
			.unwrap_or_default();
		match primary.to_ascii_lowercase().as_str() {
			"en" => Ok(Self::En),
			"de" => Ok(Self::De),
			_ => Err(()),
		}
	}
}

/// Picks the first `Accept-Language` entry that is enabled, falling back to
/// English.
pub fn negotiate(header: Option<&str>, enabled: &[Locale]) -> Locale {
	header
		.unwrap_or_default()
		.split(',')
		.filter_map(|tag| tag.parse().ok())
		.find(|locale| enabled.contains(locale))
		.unwrap_or(Locale::En)
}

/// Parses the configured locale list, dropping anything unknown.
pub fn enabled_locales(configured: &[String]) -> Vec<Locale> {
	let locales: Vec<Locale> = configured
		.iter()
		.filter_map(|tag| {
			let locale = tag.parse().ok();
			if locale.is_none() {
				tracing::warn!(%tag, "ignoring unsupported locale");
			}
			locale
		})
		.collect();
	if locales.is_empty() {
		vec![Locale::En]
	} else {
		locales
	}
}

pub fn verify_key_subject(locale: Locale, key_id: &str) -> String {
	match locale {
		Locale::En => format!("Verify your email address for key {key_id}"),
		Locale::De => format!("Bestätigen Sie Ihre E-Mail-Adresse für den Schlüssel {key_id}"),
	}
}

pub fn verify_key_body(locale: Locale, key_id: &str, url: &str) -> String {
	match locale {
		Locale::En => format!(
			"An OpenPGP key with the id {key_id} listing this email address was \
			 uploaded to this key server.\n\nTo publish the key for this address, \
			 open the following link:\n\n{url}\n\nIf you did not upload the key, \
			 you can safely ignore this message. Nothing is published without \
			 confirmation.\n"
		),
		Locale::De => format!(
			"Ein OpenPGP-Schlüssel mit der ID {key_id}, der diese E-Mail-Adresse \
			 enthält, wurde auf diesen Schlüsselserver hochgeladen.\n\nUm den \
			 Schlüssel für diese Adresse zu veröffentlichen, öffnen Sie den \
			 folgenden Link:\n\n{url}\n\nFalls Sie den Schlüssel nicht hochgeladen \
			 haben, können Sie diese Nachricht ignorieren. Ohne Bestätigung wird \
			 nichts veröffentlicht.\n"
		),
	}
}

pub fn verify_remove_subject(locale: Locale, key_id: &str) -> String {
	match locale {
		Locale::En => format!("Confirm the removal of key {key_id}"),
		Locale::De => format!("Bestätigen Sie die Löschung des Schlüssels {key_id}"),
	}
}

pub fn verify_remove_body(locale: Locale, key_id: &str, url: &str) -> String {
	match locale {
		Locale::En => format!(
			"The removal of the OpenPGP key {key_id} from this key server was \
			 requested for this email address.\n\nTo delete the key, open the \
			 following link:\n\n{url}\n\nIf you did not request the removal, you \
			 can safely ignore this message.\n"
		),
		Locale::De => format!(
			"Für diese E-Mail-Adresse wurde die Löschung des OpenPGP-Schlüssels \
			 {key_id} von diesem Schlüsselserver beantragt.\n\nUm den Schlüssel zu \
			 löschen, öffnen Sie den folgenden Link:\n\n{url}\n\nFalls Sie die \
			 Löschung nicht beantragt haben, können Sie diese Nachricht \
			 ignorieren.\n"
		),
	}
}

pub fn verified_page(locale: Locale, email: &str) -> String {
	let text = match locale {
		Locale::En => format!("The email address {email} has been verified. The key is now public."),
		Locale::De => {
			format!("Die E-Mail-Adresse {email} wurde bestätigt. Der Schlüssel ist jetzt öffentlich.")
		}
	};
	page(locale, &text)
}

pub fn removed_page(locale: Locale) -> String {
	let text = match locale {
		Locale::En => "The key has been removed from this key server.".to_string(),
		Locale::De => "Der Schlüssel wurde von diesem Schlüsselserver entfernt.".to_string(),
	};
	page(locale, &text)
}

fn page(locale: Locale, text: &str) -> String {
	format!(
		"<!DOCTYPE html>\n<html lang=\"{locale}\"><head><meta charset=\"utf-8\">\
		 <title>runekeys</title></head><body><p>{text}</p></body></html>\n"
	)
}
