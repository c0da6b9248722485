use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::{Attachment, Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

use crate::config::Config;
use crate::error::{Error, Result};

/// An email ready for delivery. The attachment, when present, is the
/// rendered invoice document.
#[derive(Debug, Clone)]
pub struct OutgoingEmail {
    pub to: Vec<String>,
    pub cc: Vec<String>,
    pub subject: String,
    pub text_body: String,
    pub html_body: Option<String>,
    pub attachment: Option<EmailAttachment>,
}

#[derive(Debug, Clone)]
pub struct EmailAttachment {
    pub filename: String,
    pub content: Vec<u8>,
}

/// Outbound email collaborator. The engine treats `Ok(false)` and
/// `Err(_)` uniformly as a failed delivery.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, email: &OutgoingEmail) -> Result<bool>;
}

/// SMTP delivery over lettre's tokio transport.
pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpMailer {
    pub fn from_config(config: &Config) -> Result<Self> {
        let creds = Credentials::new(
            config.smtp_username.clone(),
            config.smtp_password.clone(),
        );
        let transport = AsyncSmtpTransport::<Tokio1Executor>::relay(&config.smtp_host)
            .map_err(|e| Error::Email(e.to_string()))?
            .credentials(creds)
            .build();
        let from = config
            .smtp_from
            .parse()
            .map_err(|_| Error::precondition(format!("invalid sender address {}", config.smtp_from)))?;

        Ok(Self { transport, from })
    }

    fn build_message(&self, email: &OutgoingEmail) -> Result<Message> {
        let mut builder = Message::builder().from(self.from.clone());
        for to in &email.to {
            let mailbox: Mailbox = to
                .parse()
                .map_err(|_| Error::precondition(format!("invalid recipient address {to}")))?;
            builder = builder.to(mailbox);
        }
        for cc in &email.cc {
            let mailbox: Mailbox = cc
                .parse()
                .map_err(|_| Error::precondition(format!("invalid cc address {cc}")))?;
            builder = builder.cc(mailbox);
        }
        let builder = builder.subject(&email.subject);

        // Text and HTML travel as alternatives so text-only clients
        // still see the message body.
        let mut body = match &email.html_body {
            Some(html) => MultiPart::mixed().multipart(
                MultiPart::alternative()
                    .singlepart(SinglePart::plain(email.text_body.clone()))
                    .singlepart(SinglePart::html(html.clone())),
            ),
            None => MultiPart::mixed().singlepart(SinglePart::plain(email.text_body.clone())),
        };

        if let Some(attachment) = &email.attachment {
            // Pandoc may not be installed, in which case the "PDF" is
            // really the HTML fallback; sniff the magic number rather
            // than trusting the filename.
            let content_type = if attachment.content.starts_with(b"%PDF") {
                ContentType::parse("application/pdf")
            } else {
                ContentType::parse("text/html")
            }
            .map_err(|e| Error::Email(e.to_string()))?;

            body = body.singlepart(
                Attachment::new(attachment.filename.clone())
                    .body(attachment.content.clone(), content_type),
            );
        }

        builder
            .multipart(body)
            .map_err(|e| Error::Email(e.to_string()))
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, email: &OutgoingEmail) -> Result<bool> {
        let message = self.build_message(email)?;
        match self.transport.send(message).await {
            Ok(response) => Ok(response.is_positive()),
            Err(e) => Err(Error::Email(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn smtp_mailer() -> SmtpMailer {
        let config = Config {
            database_url: None,
            smtp_host: "localhost".to_string(),
            smtp_username: String::new(),
            smtp_password: String::new(),
            smtp_from: "billing@example.com".to_string(),
            invoice_prefix: "INV".to_string(),
            reminder_thresholds: vec![3, 15, 30],
            default_currency: "USD".to_string(),
            due_days: 30,
            output_dir: "invoices".to_string(),
        };
        SmtpMailer::from_config(&config).unwrap()
    }

    fn email() -> OutgoingEmail {
        OutgoingEmail {
            to: vec!["customer@example.test".to_string()],
            cc: Vec::new(),
            subject: "Invoice INV/2026/00001".to_string(),
            text_body: "plain body text".to_string(),
            html_body: Some("<p>html body text</p>".to_string()),
            attachment: None,
        }
    }

    #[tokio::test]
    async fn text_and_html_travel_as_alternatives() {
        let message = smtp_mailer().build_message(&email()).unwrap();
        let raw = String::from_utf8_lossy(&message.formatted()).to_string();

        assert!(raw.contains("multipart/alternative"));
        assert!(raw.contains("plain body text"));
        assert!(raw.contains("html body text"));
    }

    #[tokio::test]
    async fn plain_only_when_no_html_body() {
        let mut plain = email();
        plain.html_body = None;
        let message = smtp_mailer().build_message(&plain).unwrap();
        let raw = String::from_utf8_lossy(&message.formatted()).to_string();

        assert!(!raw.contains("multipart/alternative"));
        assert!(raw.contains("plain body text"));
    }

    #[tokio::test]
    async fn attachment_content_type_is_sniffed() {
        let mut with_pdf = email();
        with_pdf.attachment = Some(EmailAttachment {
            filename: "invoice.pdf".to_string(),
            content: b"%PDF-1.4 stub".to_vec(),
        });
        let message = smtp_mailer().build_message(&with_pdf).unwrap();
        let raw = String::from_utf8_lossy(&message.formatted()).to_string();
        assert!(raw.contains("application/pdf"));

        let mut with_html = email();
        with_html.html_body = None;
        with_html.attachment = Some(EmailAttachment {
            filename: "invoice.pdf".to_string(),
            content: b"<html></html>".to_vec(),
        });
        let message = smtp_mailer().build_message(&with_html).unwrap();
        let raw = String::from_utf8_lossy(&message.formatted()).to_string();
        assert!(raw.contains("text/html"));
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Mutex;

    use super::*;

    /// Records outgoing mail; can be switched to fail every send.
    #[derive(Default)]
    pub struct RecordingMailer {
        pub sent: Mutex<Vec<OutgoingEmail>>,
        pub fail: bool,
    }

    impl RecordingMailer {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn failing() -> Self {
            Self {
                sent: Mutex::new(Vec::new()),
                fail: true,
            }
        }

        pub fn sent_count(&self) -> usize {
            self.sent.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl Mailer for RecordingMailer {
        async fn send(&self, email: &OutgoingEmail) -> Result<bool> {
            if self.fail {
                return Err(Error::Email("smtp unavailable".to_string()));
            }
            self.sent.lock().unwrap().push(email.clone());
            Ok(true)
        }
    }
}
