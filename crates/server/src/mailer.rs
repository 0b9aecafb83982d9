use lettre::{
	AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
	message::{Mailbox, header::ContentType},
	transport::{smtp::authentication::Credentials, stub::AsyncStubTransport},
};

use crate::{
	config::EmailConfig,
	error::{Error, Result},
	i18n::{self, Locale},
};

/// The two challenge mails this server sends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Template {
	VerifyKey,
	VerifyRemove,
}

impl Template {
	fn op(self) -> &'static str {
		match self {
			Self::VerifyKey => "verify",
			Self::VerifyRemove => "verifyRemove",
		}
	}
}

#[derive(Clone)]
enum MailTransport {
	Smtp(AsyncSmtpTransport<Tokio1Executor>),
	/// Records mail instead of delivering it; selected by an empty relay
	/// host and used by the tests.
	Stub(AsyncStubTransport),
}

/// Renders localized challenge mails and delivers them over SMTP. Every
/// call sends; callers are responsible for not sending redundantly.
#[derive(Clone)]
pub struct Mailer {
	transport: MailTransport,
	sender: Mailbox,
}

impl Mailer {
	pub fn from_config(config: &EmailConfig) -> Result<Self> {
		let sender = parse_mailbox(&config.sender)?;
		if config.host.is_empty() {
			tracing::warn!("no smtp host configured, challenge mail will only be logged");
			return Ok(Self {
				transport: MailTransport::Stub(AsyncStubTransport::new_ok()),
				sender,
			});
		}

		let mut builder = if config.tls {
			AsyncSmtpTransport::<Tokio1Executor>::relay(&config.host)
				.map_err(|err| Error::Mailer(err.to_string()))?
		} else {
			AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.host)
		};
		builder = builder.port(config.port);
		if let (Some(user), Some(pass)) = (&config.user, &config.pass) {
			builder = builder.credentials(Credentials::new(user.clone(), pass.clone()));
		}
		Ok(Self {
			transport: MailTransport::Smtp(builder.build()),
			sender,
		})
	}

	/// A recording mailer. The returned stub shares state with the mailer,
	/// so dispatched messages stay observable.
	pub fn stub() -> (Self, AsyncStubTransport) {
		let stub = AsyncStubTransport::new_ok();
		let mailer = Self {
			transport: MailTransport::Stub(stub.clone()),
			sender: "Runekeys <noreply@localhost>"
				.parse()
				.expect("static sender mailbox"),
		};
		(mailer, stub)
	}

	/// A mailer whose transport rejects every message.
	pub fn failing_stub() -> Self {
		Self {
			transport: MailTransport::Stub(AsyncStubTransport::new_error()),
			sender: "Runekeys <noreply@localhost>"
				.parse()
				.expect("static sender mailbox"),
		}
	}

	/// Renders `template` in `locale` around the challenge link for
	/// `(key_id, nonce)` and delivers it to `to`.
	pub async fn send(
		&self,
		template: Template,
		locale: Locale,
		to: &str,
		key_id: &str,
		nonce: &str,
		base_url: &str,
	) -> Result<()> {
		let url = format!(
			"{base_url}/api/v1/key?op={op}&keyId={key_id}&nonce={nonce}",
			op = template.op()
		);
		let (subject, body) = match template {
			Template::VerifyKey => (
				i18n::verify_key_subject(locale, key_id),
				i18n::verify_key_body(locale, key_id, &url),
			),
			Template::VerifyRemove => (
				i18n::verify_remove_subject(locale, key_id),
				i18n::verify_remove_body(locale, key_id, &url),
			),
		};

		let message = Message::builder()
			.from(self.sender.clone())
			.to(parse_mailbox(to)?)
			.subject(subject)
			.header(ContentType::TEXT_PLAIN)
			.body(body)
			.map_err(|err| Error::Mailer(err.to_string()))?;

		match &self.transport {
			MailTransport::Smtp(transport) => {
				transport
					.send(message)
					.await
					.map_err(|err| Error::Mailer(err.to_string()))?;
			}
			MailTransport::Stub(transport) => {
				tracing::info!(to, %url, "stub transport, challenge link not delivered");
				transport
					.send(message)
					.await
					.map_err(|err| Error::Mailer(err.to_string()))?;
			}
		}
		tracing::debug!(to, ?template, "dispatched challenge mail");
		Ok(())
	}
}

fn parse_mailbox(address: &str) -> Result<Mailbox> {
	address
		.parse()
		.map_err(|err: lettre::address::AddressError| Error::Mailer(err.to_string()))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn renders_the_challenge_link() {
		let (mailer, stub) = Mailer::stub();
		mailer
			.send(
				Template::VerifyKey,
				Locale::En,
				"a@x.test",
				"0123456789ABCDEF",
				"some-nonce",
				"http://keys.test",
			)
			.await
			.unwrap();

		let messages = stub.messages().await;
		assert_eq!(messages.len(), 1);
		let (envelope, body) = &messages[0];
		assert_eq!(envelope.to().len(), 1);
		assert!(
			body.contains("http://keys.test/api/v1/key?op=verify&keyId=0123456789ABCDEF&nonce=some-nonce")
		);
	}

	#[tokio::test]
	async fn removal_mail_uses_the_remove_op() {
		let (mailer, stub) = Mailer::stub();
		mailer
			.send(
				Template::VerifyRemove,
				Locale::En,
				"a@x.test",
				"0123456789ABCDEF",
				"some-nonce",
				"http://keys.test",
			)
			.await
			.unwrap();

		let (_, body) = &stub.messages().await[0];
		assert!(body.contains("op=verifyRemove"));
		assert!(body.contains("removal"));
	}

	#[tokio::test]
	async fn transport_errors_surface_as_mailer_failures() {
		let mailer = Mailer::failing_stub();
		let result = mailer
			.send(
				Template::VerifyKey,
				Locale::En,
				"a@x.test",
				"ID",
				"nonce",
				"http://keys.test",
			)
			.await;
		assert!(matches!(result, Err(Error::Mailer(_))));
	}

	#[tokio::test]
	async fn bad_recipients_are_rejected_before_delivery() {
		let (mailer, stub) = Mailer::stub();
		let result = mailer
			.send(
				Template::VerifyKey,
				Locale::En,
				"not an address",
				"ID",
				"nonce",
				"http://keys.test",
			)
			.await;
		assert!(matches!(result, Err(Error::Mailer(_))));
		assert!(stub.messages().await.is_empty());
	}
}
