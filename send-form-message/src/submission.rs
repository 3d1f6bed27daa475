use serde_json::{Map, Value};
use std::fmt::Display;

pub type Payload = Map<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormKind {
    Contact,
    BugReport,
    Feedback,
}

impl FormKind {
    /// Resolves the form from the last segment of the request path, so that API Gateway stage
    /// prefixes do not matter.
    pub fn from_path(path: &str) -> Option<Self> {
        match path.trim_end_matches('/').rsplit('/').next()? {
            "contact" => Some(FormKind::Contact),
            "bug-report" => Some(FormKind::BugReport),
            "feedback" => Some(FormKind::Feedback),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FormKind::Contact => "contact",
            FormKind::BugReport => "bug-report",
            FormKind::Feedback => "feedback",
        }
    }
}

impl Display for FormKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Submission {
    Contact(ContactSubmission),
    BugReport(BugReportSubmission),
    Feedback(FeedbackSubmission),
}

impl Submission {
    pub fn kind(&self) -> FormKind {
        match self {
            Submission::Contact(_) => FormKind::Contact,
            Submission::BugReport(_) => FormKind::BugReport,
            Submission::Feedback(_) => FormKind::Feedback,
        }
    }

    /// The submitter's address, if the form collected one.
    pub fn submitter_email(&self) -> Option<&str> {
        match self {
            Submission::Contact(contact) => Some(&contact.email),
            Submission::BugReport(report) => Some(&report.email),
            Submission::Feedback(feedback) => feedback.email.as_deref(),
        }
    }

    pub fn submitter_name(&self) -> Option<&str> {
        match self {
            Submission::Contact(contact) => Some(&contact.name),
            Submission::BugReport(_) => None,
            Submission::Feedback(feedback) => feedback.name.as_deref(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ContactSubmission {
    pub name: String,
    pub email: String,
    pub category: String,
    pub subject: String,
    pub message: String,
    pub newsletter: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BugReportSubmission {
    pub bug_type: String,
    pub title: String,
    pub description: String,
    pub steps: String,
    pub expected: String,
    pub actual: String,
    pub severity: String,
    pub windows_version: String,
    pub app_version: String,
    pub email: String,
    pub ram: Option<String>,
    pub additional_info: Option<String>,
}

impl BugReportSubmission {
    pub fn is_security_report(&self) -> bool {
        self.bug_type.eq_ignore_ascii_case("security")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FeedbackSubmission {
    pub feedback_type: String,
    pub title: String,
    pub description: String,
    pub name: Option<String>,
    pub email: Option<String>,
}

/// Checks that the payload carries every field the form requires.
///
/// Only presence is checked: required text must be a non-blank string and flags must be JSON
/// booleans. Email addresses are not checked for format and no length limits apply.
pub fn validate(kind: FormKind, payload: &Payload) -> Result<Submission, ValidationError> {
    let fields = Fields(payload);
    Ok(match kind {
        FormKind::Contact => Submission::Contact(ContactSubmission {
            name: fields.required_text("name")?,
            email: fields.required_text("email")?,
            category: fields.required_text("category")?,
            subject: fields.required_text("subject")?,
            message: fields.required_text("message")?,
            newsletter: fields.required_flag("newsletter")?,
        }),
        FormKind::BugReport => Submission::BugReport(BugReportSubmission {
            bug_type: fields.required_text("type")?,
            title: fields.required_text("title")?,
            description: fields.required_text("description")?,
            steps: fields.required_text("steps")?,
            expected: fields.required_text("expected")?,
            actual: fields.required_text("actual")?,
            severity: fields.required_text("severity")?,
            windows_version: fields.required_text("windowsVersion")?,
            app_version: fields.required_text("appVersion")?,
            email: fields.required_text("email")?,
            ram: fields.optional_text("ram"),
            additional_info: fields.optional_text("additionalInfo"),
        }),
        FormKind::Feedback => Submission::Feedback(FeedbackSubmission {
            feedback_type: fields.required_text("type")?,
            title: fields.required_text("title")?,
            description: fields.required_text("description")?,
            name: fields.optional_text("name"),
            email: fields.optional_text("email"),
        }),
    })
}

struct Fields<'a>(&'a Payload);

impl Fields<'_> {
    fn required_text(&self, field: &'static str) -> Result<String, ValidationError> {
        match self.0.get(field) {
            Some(Value::String(value)) if !value.trim().is_empty() => Ok(value.clone()),
            Some(Value::String(_)) | Some(Value::Null) | None => {
                Err(ValidationError::MissingField(field))
            }
            Some(_) => Err(ValidationError::InvalidField(field)),
        }
    }

    fn required_flag(&self, field: &'static str) -> Result<bool, ValidationError> {
        match self.0.get(field) {
            Some(Value::Bool(value)) => Ok(*value),
            Some(Value::Null) | None => Err(ValidationError::MissingField(field)),
            Some(_) => Err(ValidationError::InvalidField(field)),
        }
    }

    fn optional_text(&self, field: &'static str) -> Option<String> {
        match self.0.get(field) {
            Some(Value::String(value)) if !value.trim().is_empty() => Some(value.clone()),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    MissingField(&'static str),
    InvalidField(&'static str),
    MalformedPayload(String),
}

impl Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationError::MissingField(field) => write!(f, "Missing required field: {field}"),
            ValidationError::InvalidField(field) => write!(f, "Invalid value for field: {field}"),
            ValidationError::MalformedPayload(description) => {
                write!(f, "Malformed request payload: {description}")
            }
        }
    }
}

impl std::error::Error for ValidationError {}
