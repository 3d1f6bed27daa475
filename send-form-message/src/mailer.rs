use crate::{config::SmtpSettings, render::RenderedMessage};
use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, Mailbox, MultiPart},
    transport::smtp::{authentication::Credentials, Error as SmtpError},
    Address, AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use std::fmt::Display;
use tracing::{info, warn};
use uuid::Uuid;

/// Reply codes with which relays refuse the session rather than the message: service unavailable
/// at the greeting, and authentication failures.
const SESSION_REJECTION_CODES: &[&str] = &["421", "530", "534", "535"];

#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn send(&self, message: Message) -> Result<(), DispatchError>;
}

/// Sends over SMTP, opening a fresh connection for every message.
pub struct SmtpMailTransport {
    settings: SmtpSettings,
}

impl SmtpMailTransport {
    pub fn new(settings: SmtpSettings) -> Self {
        Self { settings }
    }

    fn build_transport(&self) -> Result<AsyncSmtpTransport<Tokio1Executor>, DispatchError> {
        let settings = &self.settings;
        // Credentials only ever travel over TLS. A relay which requires them rejects the
        // unauthenticated session instead.
        let builder = if settings.secure {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&settings.host)
        } else if settings.has_credentials() {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&settings.host)
        } else {
            Ok(AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(
                &settings.host,
            ))
        }
        .map_err(|error| {
            DispatchError::Transport(format!(
                "Unable to configure SMTP relay {}: {error}",
                settings.host
            ))
        })?;

        let mut builder = builder
            .port(settings.port)
            .timeout(Some(settings.timeout));
        if settings.has_credentials() {
            builder = builder.credentials(Credentials::new(
                settings.username.clone(),
                settings.password.clone(),
            ));
        }
        Ok(builder.build())
    }
}

#[async_trait]
impl MailTransport for SmtpMailTransport {
    async fn send(&self, message: Message) -> Result<(), DispatchError> {
        let transport = self.build_transport()?;
        transport
            .send(message)
            .await
            .map(|_| ())
            .map_err(classify_smtp_error)
    }
}

fn classify_smtp_error(error: SmtpError) -> DispatchError {
    let reply_code = error.status().map(|code| code.to_string());
    let is_relay_reply = error.is_permanent() || error.is_transient();
    if is_relay_reply && !reply_code.as_deref().is_some_and(is_session_rejection) {
        DispatchError::Delivery(format!("Relay rejected message: {error}"))
    } else {
        DispatchError::Transport(format!("Error talking to SMTP relay: {error}"))
    }
}

fn is_session_rejection(reply_code: &str) -> bool {
    SESSION_REJECTION_CODES.contains(&reply_code)
}

/// Record of a message the relay accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub message_id: String,
}

pub struct Mailer<TransportT: MailTransport> {
    transport: TransportT,
    from_address: String,
}

impl<TransportT: MailTransport> Mailer<TransportT> {
    pub fn new(transport: TransportT, from_address: impl Into<String>) -> Self {
        Self {
            transport,
            from_address: from_address.into(),
        }
    }

    #[cfg(test)]
    pub fn transport(&self) -> &TransportT {
        &self.transport
    }

    /// Sends one rendered message. There is no retry: the first failure is returned.
    pub async fn dispatch(
        &self,
        message: &RenderedMessage,
        recipient: &str,
        reply_to: Option<Mailbox>,
    ) -> Result<SentMessage, DispatchError> {
        let (email, message_id) = self.build_message(message, recipient, reply_to)?;
        self.transport.send(email).await?;
        info!("Sent \"{}\" as {message_id}", message.subject);
        Ok(SentMessage { message_id })
    }

    fn build_message(
        &self,
        message: &RenderedMessage,
        recipient: &str,
        reply_to: Option<Mailbox>,
    ) -> Result<(Message, String), DispatchError> {
        let from: Mailbox = parse_mailbox("sender", &self.from_address)?;
        let to: Mailbox = parse_mailbox("recipient", recipient)?;
        let message_id = format!("<{}@{}>", Uuid::new_v4(), from.email.domain());

        let mut builder = Message::builder()
            .from(from)
            .to(to)
            .subject(message.subject.as_str())
            .message_id(Some(message_id.clone()));
        if let Some(reply_to) = reply_to {
            builder = builder.reply_to(reply_to);
        }

        let email = match &message.text_body {
            Some(text_body) => builder.multipart(MultiPart::alternative_plain_html(
                text_body.clone(),
                message.html_body.clone(),
            )),
            None => builder
                .header(ContentType::TEXT_HTML)
                .body(message.html_body.clone()),
        }
        .map_err(|error| DispatchError::Build(format!("Error building message: {error}")))?;

        Ok((email, message_id))
    }
}

fn parse_mailbox(role: &'static str, address: &str) -> Result<Mailbox, DispatchError> {
    address.parse().map_err(|_| DispatchError::Address {
        role,
        address: address.into(),
    })
}

/// The mailbox replies should go to, with a display name when one is known. Lettre quotes or
/// encodes the name as the header needs, so any name is accepted.
///
/// Returns `None` with a warning when the address does not parse.
pub fn reply_mailbox(name: Option<&str>, email: &str) -> Option<Mailbox> {
    match email.trim().parse::<Address>() {
        Ok(address) => Some(Mailbox::new(name.map(str::to_owned), address)),
        Err(error) => {
            warn!("Omitting unparseable Reply-To address {email}: {error}");
            None
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    Transport(String),
    Delivery(String),
    Address { role: &'static str, address: String },
    Build(String),
}

impl Display for DispatchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DispatchError::Transport(description) => write!(f, "Transport error: {description}"),
            DispatchError::Delivery(description) => write!(f, "Delivery error: {description}"),
            DispatchError::Address { role, address } => {
                write!(f, "Invalid {role} address \"{address}\"")
            }
            DispatchError::Build(description) => write!(f, "Message error: {description}"),
        }
    }
}

impl std::error::Error for DispatchError {}


#[cfg(test)]
mod tests {
    use super::{
        is_session_rejection, reply_mailbox, test_support::FakeMailTransport, DispatchError,
        Mailer, SmtpMailTransport,
    };
    use crate::{config::SmtpSettings, render::RenderedMessage};
    use googletest::prelude::*;
    use serial_test::serial;
    use std::time::Duration;
    use test_support::fake_smtp::{start_poisoned_smtp_server, POISONED_SMTP_PORT};

    fn html_message() -> RenderedMessage {
        RenderedMessage {
            subject: "[Feedback] Improvement: Faster sync".into(),
            html_body: "<p>Sync faster please</p>".into(),
            text_body: None,
        }
    }

    fn mailer() -> Mailer<FakeMailTransport> {
        Mailer::new(
            FakeMailTransport::default(),
            "Website Forms <noreply@screentime.example>",
        )
    }

    #[googletest::test]
    #[tokio::test]
    async fn sends_html_message_with_headers() {
        let mailer = mailer();

        let sent = mailer
            .dispatch(
                &html_message(),
                "feedback@screentime.example",
                reply_mailbox(Some("Sam Example"), "sam@example.com"),
            )
            .await
            .unwrap();

        let messages = mailer.transport().sent_messages();
        expect_that!(messages, len(eq(1)));
        expect_that!(
            messages[0],
            all!(
                contains_substring("From: \"Website Forms\" <noreply@screentime.example>"),
                contains_substring("To: feedback@screentime.example"),
                contains_substring("Reply-To: \"Sam Example\" <sam@example.com>"),
                contains_substring("Subject: [Feedback] Improvement: Faster sync"),
                contains_substring("Content-Type: text/html"),
                contains_substring(sent.message_id.as_str())
            )
        );
        expect_that!(sent.message_id, ends_with("@screentime.example>"));
    }

    #[googletest::test]
    #[tokio::test]
    async fn sends_plain_text_alternative_when_rendered() {
        let mailer = mailer();
        let message = RenderedMessage {
            text_body: Some("Sync faster please".into()),
            ..html_message()
        };

        mailer
            .dispatch(&message, "feedback@screentime.example", None)
            .await
            .unwrap();

        expect_that!(
            mailer.transport().sent_messages()[0],
            all!(
                contains_substring("multipart/alternative"),
                contains_substring("text/plain"),
                contains_substring("text/html"),
                not(contains_substring("Reply-To"))
            )
        );
    }

    #[googletest::test]
    #[tokio::test]
    async fn keeps_reply_to_for_names_with_special_characters() {
        let mailer = mailer();

        for name in ["Doe, Jane", "Jane (QA)", "Jane Q. Doe", "José Álvarez", "O'Brien"] {
            mailer
                .dispatch(
                    &html_message(),
                    "feedback@screentime.example",
                    reply_mailbox(Some(name), "jane@x.com"),
                )
                .await
                .unwrap();
        }

        let messages = mailer.transport().sent_messages();
        expect_that!(messages, len(eq(5)));
        expect_that!(
            messages,
            each(matches_regex("(?s).*Reply-To: [^\\r\\n]*<jane@x\\.com>.*"))
        );
    }

    #[test]
    fn reply_mailbox_keeps_display_name_verbatim() -> Result<()> {
        let mailbox = reply_mailbox(Some("Doe, Jane"), " jane@x.com ").unwrap();

        verify_that!(mailbox.name.as_deref(), some(eq("Doe, Jane")))?;
        verify_that!(mailbox.email.to_string(), eq("jane@x.com"))
    }

    #[test]
    fn reply_mailbox_without_name_is_the_bare_address() -> Result<()> {
        let mailbox = reply_mailbox(None, "jane@x.com").unwrap();

        verify_that!(mailbox.name, none())?;
        verify_that!(mailbox.to_string(), eq("jane@x.com"))
    }

    #[test]
    fn reply_mailbox_rejects_unparseable_address() -> Result<()> {
        verify_that!(reply_mailbox(Some("Jane"), "not an address"), none())
    }

    #[googletest::test]
    #[tokio::test]
    async fn fails_without_sending_when_recipient_is_missing() {
        let mailer = mailer();

        let result = mailer.dispatch(&html_message(), "", None).await;

        expect_that!(
            result,
            err(eq(DispatchError::Address {
                role: "recipient",
                address: "".into(),
            }))
        );
        expect_that!(mailer.transport().attempts(), eq(0));
    }

    #[googletest::test]
    #[tokio::test]
    async fn surfaces_transport_failure_without_retry() {
        let mailer = mailer();
        mailer
            .transport()
            .fail_next(DispatchError::Delivery("554 rejected".into()));

        let result = mailer
            .dispatch(&html_message(), "feedback@screentime.example", None)
            .await;

        expect_that!(
            result,
            err(eq(DispatchError::Delivery("554 rejected".into())))
        );
        expect_that!(mailer.transport().attempts(), eq(1));
    }

    #[test]
    fn service_unavailable_and_authentication_failures_reject_the_session() -> Result<()> {
        verify_that!(is_session_rejection("421"), eq(true))?;
        verify_that!(is_session_rejection("535"), eq(true))?;
        verify_that!(is_session_rejection("451"), eq(false))?;
        verify_that!(is_session_rejection("550"), eq(false))
    }

    #[googletest::test]
    #[tokio::test]
    #[serial]
    async fn relay_refusing_the_session_is_a_transport_error() {
        start_poisoned_smtp_server();
        let mailer = Mailer::new(
            SmtpMailTransport::new(SmtpSettings {
                host: "127.0.0.1".into(),
                port: POISONED_SMTP_PORT,
                secure: false,
                username: String::new(),
                password: String::new(),
                timeout: Duration::from_secs(5),
            }),
            "Website Forms <noreply@screentime.example>",
        );

        let result = mailer
            .dispatch(&html_message(), "feedback@screentime.example", None)
            .await;

        expect_that!(
            matches!(result, Err(DispatchError::Transport(_))),
            eq(true),
            "{result:?}"
        );
    }
}
