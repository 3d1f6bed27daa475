mod config;
mod mailer;
mod render;
mod response;
mod submission;

use chrono::Utc;
use config::MailConfig;
use lambda_http::{
    http::Method, run, service_fn, Body, Error, Request, RequestPayloadExt, Response,
};
use mailer::{reply_mailbox, MailTransport, Mailer, SmtpMailTransport};
use render::{render, Renderings};
use response::{preflight_response, DispatchOutcome, FormError};
use submission::{validate, FormKind, Payload, Submission, ValidationError};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_target(false)
        .without_time()
        .init();

    let config = MailConfig::from_env()?;
    let handler = FormMessageHandler::new(config);
    run(service_fn(|event| handler.handle(event))).await
}

struct FormMessageHandler<TransportT: MailTransport> {
    config: MailConfig,
    mailer: Mailer<TransportT>,
}

impl FormMessageHandler<SmtpMailTransport> {
    fn new(config: MailConfig) -> Self {
        let transport = SmtpMailTransport::new(config.smtp.clone());
        Self::with_transport(config, transport)
    }
}

impl<TransportT: MailTransport> FormMessageHandler<TransportT> {
    fn with_transport(config: MailConfig, transport: TransportT) -> Self {
        let mailer = Mailer::new(transport, config.from_address.clone());
        Self { config, mailer }
    }

    async fn handle(&self, event: Request) -> Result<Response<Body>, Error> {
        let allowed_origin = self.config.allowed_origin.as_str();
        if event.method() == Method::OPTIONS {
            return Ok(preflight_response(allowed_origin));
        }
        match self.process_submission(&event).await {
            Ok(outcome) => Ok(outcome.into_response(allowed_origin)),
            Err(error) => {
                error.log();
                Ok(error.into_response(allowed_origin))
            }
        }
    }

    async fn process_submission(&self, event: &Request) -> Result<DispatchOutcome, FormError> {
        let path = event.uri().path();
        let Some(kind) = FormKind::from_path(path) else {
            return Err(FormError::UnknownForm(path.into()));
        };
        if event.method() != Method::POST {
            return Err(FormError::MethodNotAllowed(event.method().to_string()));
        }
        let payload = Self::payload(event)?;
        let submission = validate(kind, &payload)?;
        let renderings = render(&submission, Utc::now())
            .map_err(|error| FormError::Render(error.to_string()))?;
        Ok(self.dispatch(&submission, renderings).await)
    }

    fn payload(event: &Request) -> Result<Payload, ValidationError> {
        match event.payload::<Payload>() {
            Ok(Some(payload)) => Ok(payload),
            Ok(None) => Err(ValidationError::MalformedPayload(
                "Missing event payload".into(),
            )),
            Err(error) => Err(ValidationError::MalformedPayload(error.to_string())),
        }
    }

    /// Sends the internal notification and then, if the form has one, the auto-reply.
    ///
    /// The submission counts as delivered once the notification is sent. A failed notification
    /// skips the auto-reply; a failed auto-reply is only logged.
    async fn dispatch(&self, submission: &Submission, renderings: Renderings) -> DispatchOutcome {
        let kind = submission.kind();
        let destination = self.destination(kind);
        let reply_to = submission
            .submitter_email()
            .and_then(|email| reply_mailbox(submission.submitter_name(), email));

        let notification = match self
            .mailer
            .dispatch(&renderings.notification, destination, reply_to)
            .await
        {
            Ok(sent) => sent,
            Err(error) => return DispatchOutcome::failed(&error),
        };
        info!(
            "Delivered {kind} notification {}",
            notification.message_id
        );

        if let (Some(auto_reply), Some(submitter)) =
            (&renderings.auto_reply, submission.submitter_email())
        {
            if let Err(error) = self
                .mailer
                .dispatch(auto_reply, submitter, reply_mailbox(None, destination))
                .await
            {
                warn!("Auto-reply for {kind} submission was not sent: {error}");
            }
        }

        let provider_message_id = match kind {
            FormKind::Contact => None,
            FormKind::BugReport | FormKind::Feedback => Some(notification.message_id),
        };
        DispatchOutcome::delivered(Self::success_message(kind), provider_message_id)
    }

    fn destination(&self, kind: FormKind) -> &str {
        match kind {
            FormKind::Contact => &self.config.contact_to,
            FormKind::BugReport => &self.config.bug_report_to,
            FormKind::Feedback => &self.config.feedback_to,
        }
    }

    fn success_message(kind: FormKind) -> &'static str {
        match kind {
            FormKind::Contact => "Thank you for your message! We'll get back to you soon.",
            FormKind::BugReport => "Bug report submitted successfully",
            FormKind::Feedback => "Feedback submitted successfully",
        }
    }
}
