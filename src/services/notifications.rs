//! Notification collaborators
//!
//! Notifications are advisory: the engine commits its state transition first
//! and dispatches afterwards, so a slow or failing send can neither hold a
//! row lock nor roll back a binding.

use std::collections::HashMap;
use std::str::FromStr;

use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, Mailbox, Message},
    transport::smtp::authentication::Credentials,
    SmtpTransport, Transport,
};

use crate::{
    config::EmailConfig,
    error::{EngineError, EngineResult},
    repository::Repository,
};

/// Template keys understood by the notification collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationTemplate {
    /// A copy has been bound to the user's queued reservation.
    CopyAvailable,
    /// The assigned copy was lost and no replacement exists; the user stays
    /// in the queue.
    StillQueued,
    /// Loan due in the next few days.
    DueSoon,
    /// Loan past its due date.
    OverdueNotice,
    /// A wishlisted book has copies available.
    WishlistAvailable,
}

impl NotificationTemplate {
    pub fn key(&self) -> &'static str {
        match self {
            NotificationTemplate::CopyAvailable => "copy_available",
            NotificationTemplate::StillQueued => "still_queued",
            NotificationTemplate::DueSoon => "due_soon",
            NotificationTemplate::OverdueNotice => "overdue_notice",
            NotificationTemplate::WishlistAvailable => "wishlist_available",
        }
    }

    fn subject(&self) -> &'static str {
        match self {
            NotificationTemplate::CopyAvailable => "A copy is ready for you",
            NotificationTemplate::StillQueued => "Update on your reservation",
            NotificationTemplate::DueSoon => "Your loan is due soon",
            NotificationTemplate::OverdueNotice => "Your loan is overdue",
            NotificationTemplate::WishlistAvailable => "A wishlisted book is available",
        }
    }
}

/// Outbound user notification contract.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(
        &self,
        recipient: &str,
        template: NotificationTemplate,
        vars: &HashMap<String, String>,
    ) -> EngineResult<()>;
}

/// In-app notification contract for admin-facing alerts.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AdminNotifier: Send + Sync {
    async fn notify<'a>(
        &self,
        kind: &str,
        title: &str,
        message: &str,
        link: Option<&'a str>,
        entity_id: Option<i64>,
    ) -> EngineResult<()>;
}

/// SMTP notifier backed by lettre
#[derive(Clone)]
pub struct EmailNotifier {
    config: EmailConfig,
}

impl EmailNotifier {
    pub fn new(config: EmailConfig) -> Self {
        Self { config }
    }

    fn render(template: NotificationTemplate, vars: &HashMap<String, String>) -> String {
        let book = vars.get("book").map(String::as_str).unwrap_or("your book");
        match template {
            NotificationTemplate::CopyAvailable => format!(
                "Good news: a copy of {} has been set aside for your reservation.",
                book
            ),
            NotificationTemplate::StillQueued => format!(
                "The copy assigned to your reservation for {} is no longer available. \
                 You keep your place in the queue and we will notify you when a copy frees up.",
                book
            ),
            NotificationTemplate::DueSoon => {
                let due = vars.get("due_date").map(String::as_str).unwrap_or("soon");
                format!("Your loan of {} is due on {}.", book, due)
            }
            NotificationTemplate::OverdueNotice => {
                format!("Your loan of {} is overdue. Please return it.", book)
            }
            NotificationTemplate::WishlistAvailable => {
                format!("{} from your wishlist now has copies available.", book)
            }
        }
    }

    fn build_mailer(&self) -> EngineResult<SmtpTransport> {
        let builder = if self.config.smtp_use_tls {
            SmtpTransport::starttls_relay(&self.config.smtp_host).map_err(|e| {
                EngineError::Notification(format!("Failed to create SMTP transport: {}", e))
            })?
        } else {
            SmtpTransport::builder_dangerous(&self.config.smtp_host)
        }
        .port(self.config.smtp_port);

        let builder = if let (Some(username), Some(password)) =
            (&self.config.smtp_username, &self.config.smtp_password)
        {
            builder.credentials(Credentials::new(username.clone(), password.clone()))
        } else {
            builder
        };

        Ok(builder.build())
    }
}

#[async_trait]
impl Notifier for EmailNotifier {
    async fn send(
        &self,
        recipient: &str,
        template: NotificationTemplate,
        vars: &HashMap<String, String>,
    ) -> EngineResult<()> {
        let from_name = self.config.smtp_from_name.as_deref().unwrap_or("Biblio");
        let from_mailbox =
            Mailbox::from_str(&format!("{} <{}>", from_name, self.config.smtp_from))
                .map_err(|e| EngineError::Notification(format!("Invalid from address: {}", e)))?;
        let to_mailbox = Mailbox::from_str(recipient)
            .map_err(|e| EngineError::Notification(format!("Invalid to address: {}", e)))?;

        let email = Message::builder()
            .from(from_mailbox)
            .to(to_mailbox)
            .subject(template.subject())
            .header(ContentType::TEXT_PLAIN)
            .body(Self::render(template, vars))
            .map_err(|e| EngineError::Notification(format!("Failed to build email: {}", e)))?;

        self.build_mailer()?
            .send(&email)
            .map_err(|e| EngineError::Notification(format!("Failed to send email: {}", e)))?;

        Ok(())
    }
}

/// Admin notifier writing into the update log table
#[derive(Clone)]
pub struct UpdateLogAdminNotifier {
    repository: Repository,
}

impl UpdateLogAdminNotifier {
    pub fn new(repository: Repository) -> Self {
        Self { repository }
    }
}

#[async_trait]
impl AdminNotifier for UpdateLogAdminNotifier {
    async fn notify<'a>(
        &self,
        kind: &str,
        title: &str,
        message: &str,
        link: Option<&'a str>,
        entity_id: Option<i64>,
    ) -> EngineResult<()> {
        self.repository
            .system
            .record(kind, title, message, link, entity_id)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn template_keys_are_stable() {
        assert_eq!(NotificationTemplate::CopyAvailable.key(), "copy_available");
        assert_eq!(NotificationTemplate::StillQueued.key(), "still_queued");
    }

    #[test]
    fn render_interpolates_book_title() {
        let mut vars = HashMap::new();
        vars.insert("book".to_string(), "Dune".to_string());
        let body = EmailNotifier::render(NotificationTemplate::CopyAvailable, &vars);
        assert!(body.contains("Dune"));
    }
}
