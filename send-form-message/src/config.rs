use anyhow::{Context, Result};
use std::{fmt::Debug, time::Duration};

const DEFAULT_SMTP_PORT: u16 = 587;
const DEFAULT_SEND_TIMEOUT_SECS: u64 = 10;
const DEFAULT_ALLOWED_ORIGIN: &str = "*";

/// Everything the handler needs from the environment, read once at start-up.
///
/// Missing hosts or addresses are deliberately not rejected here: they surface as a failed send
/// when a submission arrives.
#[derive(Debug, Clone)]
pub struct MailConfig {
    pub smtp: SmtpSettings,
    pub from_address: String,
    pub contact_to: String,
    pub bug_report_to: String,
    pub feedback_to: String,
    pub allowed_origin: String,
}

#[derive(Clone)]
pub struct SmtpSettings {
    pub host: String,
    pub port: u16,
    pub secure: bool,
    pub username: String,
    pub password: String,
    pub timeout: Duration,
}

impl SmtpSettings {
    pub fn has_credentials(&self) -> bool {
        !self.username.is_empty()
    }
}

impl Debug for SmtpSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmtpSettings")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("secure", &self.secure)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl MailConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str| lookup(key).unwrap_or_default();

        let port = match lookup("SMTP_PORT").filter(|v| !v.trim().is_empty()) {
            Some(value) => value
                .trim()
                .parse()
                .with_context(|| format!("SMTP_PORT is not a valid port: {value}"))?,
            None => DEFAULT_SMTP_PORT,
        };
        let timeout_secs = match lookup("SMTP_TIMEOUT_SECS").filter(|v| !v.trim().is_empty()) {
            Some(value) => value
                .trim()
                .parse()
                .with_context(|| format!("SMTP_TIMEOUT_SECS is not a number of seconds: {value}"))?,
            None => DEFAULT_SEND_TIMEOUT_SECS,
        };

        let username = var("SMTP_USER");
        let from_address = lookup("SMTP_FROM")
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| username.clone());

        Ok(Self {
            smtp: SmtpSettings {
                host: var("SMTP_HOST"),
                port,
                secure: var("SMTP_SECURE").trim().eq_ignore_ascii_case("true"),
                username,
                password: var("SMTP_PASSWORD"),
                timeout: Duration::from_secs(timeout_secs),
            },
            from_address,
            contact_to: var("CONTACT_EMAIL_TO"),
            bug_report_to: var("BUG_REPORT_EMAIL_TO"),
            feedback_to: var("FEEDBACK_EMAIL_TO"),
            allowed_origin: lookup("ALLOWED_ORIGIN")
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| DEFAULT_ALLOWED_ORIGIN.into()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::MailConfig;
    use googletest::prelude::*;
    use std::{collections::HashMap, time::Duration};

    fn config_from(vars: &[(&str, &str)]) -> anyhow::Result<MailConfig> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        MailConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn uses_defaults_when_environment_is_empty() -> Result<()> {
        let config = config_from(&[]).unwrap();

        verify_that!(config.smtp.port, eq(587))?;
        verify_that!(config.smtp.secure, eq(false))?;
        verify_that!(config.smtp.timeout, eq(Duration::from_secs(10)))?;
        verify_that!(config.smtp.host.as_str(), eq(""))?;
        verify_that!(config.allowed_origin.as_str(), eq("*"))
    }

    #[test]
    fn sender_falls_back_to_smtp_user() -> Result<()> {
        let config = config_from(&[("SMTP_USER", "relay@example.com")]).unwrap();

        verify_that!(config.from_address.as_str(), eq("relay@example.com"))
    }

    #[test]
    fn explicit_sender_wins_over_smtp_user() -> Result<()> {
        let config = config_from(&[
            ("SMTP_USER", "relay@example.com"),
            ("SMTP_FROM", "Support <support@example.com>"),
        ])
        .unwrap();

        verify_that!(
            config.from_address.as_str(),
            eq("Support <support@example.com>")
        )
    }

    #[test]
    fn reads_every_variable() -> Result<()> {
        let config = config_from(&[
            ("SMTP_HOST", "smtp.example.com"),
            ("SMTP_PORT", "465"),
            ("SMTP_SECURE", "true"),
            ("SMTP_USER", "user"),
            ("SMTP_PASSWORD", "secret"),
            ("SMTP_TIMEOUT_SECS", "3"),
            ("CONTACT_EMAIL_TO", "contact@example.com"),
            ("BUG_REPORT_EMAIL_TO", "bugs@example.com"),
            ("FEEDBACK_EMAIL_TO", "feedback@example.com"),
            ("ALLOWED_ORIGIN", "https://example.com"),
        ])
        .unwrap();

        verify_that!(config.smtp.host.as_str(), eq("smtp.example.com"))?;
        verify_that!(config.smtp.port, eq(465))?;
        verify_that!(config.smtp.secure, eq(true))?;
        verify_that!(config.smtp.password.as_str(), eq("secret"))?;
        verify_that!(config.smtp.timeout, eq(Duration::from_secs(3)))?;
        verify_that!(config.contact_to.as_str(), eq("contact@example.com"))?;
        verify_that!(config.bug_report_to.as_str(), eq("bugs@example.com"))?;
        verify_that!(config.feedback_to.as_str(), eq("feedback@example.com"))?;
        verify_that!(config.allowed_origin.as_str(), eq("https://example.com"))
    }

    #[test]
    fn debug_output_redacts_smtp_password() -> Result<()> {
        let config = config_from(&[
            ("SMTP_USER", "user"),
            ("SMTP_PASSWORD", "hunter2-secret"),
        ])
        .unwrap();

        verify_that!(
            format!("{config:?}"),
            all!(
                not(contains_substring("hunter2-secret")),
                contains_substring("password: \"<redacted>\""),
                contains_substring("username: \"user\"")
            )
        )
    }

    #[test]
    fn rejects_invalid_port() -> Result<()> {
        verify_that!(config_from(&[("SMTP_PORT", "not a port")]).is_err(), eq(true))
    }
}
