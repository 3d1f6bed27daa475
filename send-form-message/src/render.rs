use crate::submission::{BugReportSubmission, ContactSubmission, FeedbackSubmission, Submission};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::cell::OnceCell;
use tinytemplate::{error::Error, format, format_unescaped, TinyTemplate};

pub const PRODUCT_NAME: &str = "ScreenTime";

pub const SEVERITY_CRITICAL_COLOR: &str = "#dc2626";
pub const SEVERITY_HIGH_COLOR: &str = "#ea580c";
pub const SEVERITY_MEDIUM_COLOR: &str = "#d97706";
pub const SEVERITY_LOW_COLOR: &str = "#16a34a";
pub const SEVERITY_UNKNOWN_COLOR: &str = "#6b7280";

const TIMESTAMP_FORMAT: &str = "%B %-d, %Y at %H:%M UTC";

const CONTACT_NOTIFICATION_NAME: &str = "contact-notification";
const CONTACT_AUTO_REPLY_NAME: &str = "contact-auto-reply";
const BUG_REPORT_NOTIFICATION_NAME: &str = "bug-report-notification";
const BUG_REPORT_CONFIRMATION_NAME: &str = "bug-report-confirmation";
const FEEDBACK_NOTIFICATION_NAME: &str = "feedback-notification";

const CONTACT_NOTIFICATION_HTML: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/assets/contact-notification.html"
));
const CONTACT_NOTIFICATION_TEXT: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/assets/contact-notification.txt"
));
const CONTACT_AUTO_REPLY_HTML: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/assets/contact-auto-reply.html"
));
const CONTACT_AUTO_REPLY_TEXT: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/assets/contact-auto-reply.txt"
));
const BUG_REPORT_NOTIFICATION_HTML: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/assets/bug-report-notification.html"
));
const BUG_REPORT_NOTIFICATION_TEXT: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/assets/bug-report-notification.txt"
));
const BUG_REPORT_CONFIRMATION_HTML: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/assets/bug-report-confirmation.html"
));
const FEEDBACK_NOTIFICATION_HTML: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/assets/feedback-notification.html"
));

const CONTACT_CATEGORIES: &[(&str, &str)] = &[
    ("general", "General Inquiry"),
    ("support", "Technical Support"),
    ("bug", "Bug Report"),
    ("feature", "Feature Request"),
    ("billing", "Billing"),
    ("privacy", "Privacy"),
    ("partnership", "Partnership"),
    ("other", "Other"),
];

const BUG_TYPES: &[(&str, &str)] = &[
    ("bug", "Bug"),
    ("crash", "Crash"),
    ("performance", "Performance Issue"),
    ("ui", "UI Issue"),
    ("data", "Tracking Data Issue"),
    ("security", "Security Vulnerability"),
    ("other", "Other"),
];

const FEEDBACK_TYPES: &[(&str, &str)] = &[
    ("feature", "Feature Request"),
    ("improvement", "Improvement"),
    ("compliment", "Compliment"),
    ("complaint", "Complaint"),
    ("general", "General Feedback"),
    ("other", "Other"),
];

const SEVERITIES: &[(&str, &str)] = &[
    ("critical", "Critical"),
    ("high", "High"),
    ("medium", "Medium"),
    ("low", "Low"),
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedMessage {
    pub subject: String,
    pub html_body: String,
    pub text_body: Option<String>,
}

/// The internal notification for a submission and, for forms that send one, the reply to the
/// submitter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Renderings {
    pub notification: RenderedMessage,
    pub auto_reply: Option<RenderedMessage>,
}

thread_local! {
    // The registry holds boxed formatters which are not `Sync`, so each thread parses its own.
    static TEMPLATES: OnceCell<Templates> = const { OnceCell::new() };
}

/// Renders all outgoing messages for a submission.
///
/// Values interpolated into HTML are escaped; plain-text alternatives carry them verbatim.
pub fn render(submission: &Submission, submitted_at: DateTime<Utc>) -> Result<Renderings, Error> {
    let submitted_at = format_timestamp(submitted_at);
    TEMPLATES.with(|cell| {
        let templates = match cell.get() {
            Some(templates) => templates,
            None => {
                let parsed = Templates::new()?;
                cell.get_or_init(|| parsed)
            }
        };
        match submission {
            Submission::Contact(contact) => templates.render_contact(contact, submitted_at),
            Submission::BugReport(report) => templates.render_bug_report(report, submitted_at),
            Submission::Feedback(feedback) => templates.render_feedback(feedback, submitted_at),
        }
    })
}

pub fn format_timestamp(timestamp: DateTime<Utc>) -> String {
    timestamp.format(TIMESTAMP_FORMAT).to_string()
}

pub fn severity_color(severity: &str) -> &'static str {
    match severity.to_ascii_lowercase().as_str() {
        "critical" => SEVERITY_CRITICAL_COLOR,
        "high" => SEVERITY_HIGH_COLOR,
        "medium" => SEVERITY_MEDIUM_COLOR,
        "low" => SEVERITY_LOW_COLOR,
        _ => SEVERITY_UNKNOWN_COLOR,
    }
}

fn label<'a>(table: &[(&str, &'static str)], code: &'a str) -> &'a str {
    table
        .iter()
        .find(|(known, _)| known.eq_ignore_ascii_case(code))
        .map(|(_, label)| *label)
        .unwrap_or(code)
}

#[derive(Serialize)]
struct ContactContext<'a> {
    product_name: &'static str,
    submitted_at: &'a str,
    name: &'a str,
    email: &'a str,
    category_label: &'a str,
    subject: &'a str,
    message: &'a str,
    newsletter: bool,
}

#[derive(Serialize)]
struct BugReportContext<'a> {
    product_name: &'static str,
    submitted_at: &'a str,
    is_security: bool,
    type_label: &'a str,
    severity_label: &'a str,
    severity_color: &'static str,
    title: &'a str,
    description: &'a str,
    steps: &'a str,
    expected: &'a str,
    actual: &'a str,
    windows_version: &'a str,
    app_version: &'a str,
    email: &'a str,
    ram: Option<&'a str>,
    additional_info: Option<&'a str>,
}

#[derive(Serialize)]
struct FeedbackContext<'a> {
    submitted_at: &'a str,
    type_label: &'a str,
    title: &'a str,
    description: &'a str,
    name: Option<&'a str>,
    email: Option<&'a str>,
    is_anonymous: bool,
}

struct Templates {
    html: TinyTemplate<'static>,
    text: TinyTemplate<'static>,
}

impl Templates {
    fn new() -> Result<Self, Error> {
        let mut html = TinyTemplate::new();
        html.add_formatter("render_paragraphs", render_paragraphs);
        html.add_template(CONTACT_NOTIFICATION_NAME, CONTACT_NOTIFICATION_HTML)?;
        html.add_template(CONTACT_AUTO_REPLY_NAME, CONTACT_AUTO_REPLY_HTML)?;
        html.add_template(BUG_REPORT_NOTIFICATION_NAME, BUG_REPORT_NOTIFICATION_HTML)?;
        html.add_template(BUG_REPORT_CONFIRMATION_NAME, BUG_REPORT_CONFIRMATION_HTML)?;
        html.add_template(FEEDBACK_NOTIFICATION_NAME, FEEDBACK_NOTIFICATION_HTML)?;

        let mut text = TinyTemplate::new();
        text.set_default_formatter(&format_unescaped);
        text.add_template(CONTACT_NOTIFICATION_NAME, CONTACT_NOTIFICATION_TEXT)?;
        text.add_template(CONTACT_AUTO_REPLY_NAME, CONTACT_AUTO_REPLY_TEXT)?;
        text.add_template(BUG_REPORT_NOTIFICATION_NAME, BUG_REPORT_NOTIFICATION_TEXT)?;

        Ok(Self { html, text })
    }

    fn render_contact(
        &self,
        contact: &ContactSubmission,
        submitted_at: String,
    ) -> Result<Renderings, Error> {
        let category_label = label(CONTACT_CATEGORIES, &contact.category);
        let context = ContactContext {
            product_name: PRODUCT_NAME,
            submitted_at: &submitted_at,
            name: &contact.name,
            email: &contact.email,
            category_label,
            subject: &contact.subject,
            message: &contact.message,
            newsletter: contact.newsletter,
        };
        Ok(Renderings {
            notification: RenderedMessage {
                subject: format!("[Contact] {category_label}: {}", contact.subject),
                html_body: self.html.render(CONTACT_NOTIFICATION_NAME, &context)?,
                text_body: Some(self.text.render(CONTACT_NOTIFICATION_NAME, &context)?),
            },
            auto_reply: Some(RenderedMessage {
                subject: format!("We received your message: {}", contact.subject),
                html_body: self.html.render(CONTACT_AUTO_REPLY_NAME, &context)?,
                text_body: Some(self.text.render(CONTACT_AUTO_REPLY_NAME, &context)?),
            }),
        })
    }

    fn render_bug_report(
        &self,
        report: &BugReportSubmission,
        submitted_at: String,
    ) -> Result<Renderings, Error> {
        let severity_label = label(SEVERITIES, &report.severity);
        let context = BugReportContext {
            product_name: PRODUCT_NAME,
            submitted_at: &submitted_at,
            is_security: report.is_security_report(),
            type_label: label(BUG_TYPES, &report.bug_type),
            severity_label,
            severity_color: severity_color(&report.severity),
            title: &report.title,
            description: &report.description,
            steps: &report.steps,
            expected: &report.expected,
            actual: &report.actual,
            windows_version: &report.windows_version,
            app_version: &report.app_version,
            email: &report.email,
            ram: report.ram.as_deref(),
            additional_info: report.additional_info.as_deref(),
        };
        let prefix = if report.is_security_report() {
            "[SECURITY]"
        } else {
            "[Bug Report]"
        };
        Ok(Renderings {
            notification: RenderedMessage {
                subject: format!(
                    "{prefix} [{}] {}",
                    severity_label.to_uppercase(),
                    report.title
                ),
                html_body: self.html.render(BUG_REPORT_NOTIFICATION_NAME, &context)?,
                text_body: Some(self.text.render(BUG_REPORT_NOTIFICATION_NAME, &context)?),
            },
            auto_reply: Some(RenderedMessage {
                subject: format!("Bug report received: {}", report.title),
                html_body: self.html.render(BUG_REPORT_CONFIRMATION_NAME, &context)?,
                text_body: None,
            }),
        })
    }

    fn render_feedback(
        &self,
        feedback: &FeedbackSubmission,
        submitted_at: String,
    ) -> Result<Renderings, Error> {
        let type_label = label(FEEDBACK_TYPES, &feedback.feedback_type);
        let context = FeedbackContext {
            submitted_at: &submitted_at,
            type_label,
            title: &feedback.title,
            description: &feedback.description,
            name: feedback.name.as_deref(),
            email: feedback.email.as_deref(),
            is_anonymous: feedback.name.is_none() && feedback.email.is_none(),
        };
        Ok(Renderings {
            notification: RenderedMessage {
                subject: format!("[Feedback] {type_label}: {}", feedback.title),
                html_body: self.html.render(FEEDBACK_NOTIFICATION_NAME, &context)?,
                text_body: None,
            },
            auto_reply: None,
        })
    }
}

fn render_paragraphs(value: &Value, output: &mut String) -> Result<(), Error> {
    output.push_str("<p>");
    let mut formatted = String::new();
    format(value, &mut formatted)?;
    let normalised = formatted.replace("\r\n", "\n");
    output.push_str(
        &normalised
            .split("\n\n")
            .map(|paragraph| paragraph.trim_matches('\n').replace('\n', "<br>"))
            .collect::<Vec<_>>()
            .join("</p><p>"),
    );
    output.push_str("</p>");
    Ok(())
}
