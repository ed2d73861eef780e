use anyhow::Context;
use lettre::{
    message::{header::ContentType, Mailbox, MultiPart, SinglePart},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use uuid::Uuid;

use crate::config::Config;

pub struct EmailService {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl EmailService {
    /// Returns None if SMTP is not fully configured.
    pub fn new(config: &Config) -> Option<Self> {
        let host = config.smtp_host.as_deref()?;
        let username = config.smtp_username.clone()?;
        let password = config.smtp_password.clone()?;
        let from_addr = config.smtp_from.as_deref()?;

        let port = config.smtp_port.unwrap_or(587);
        let creds = Credentials::new(username, password);

        let transport = if port == 465 {
            AsyncSmtpTransport::<Tokio1Executor>::relay(host)
                .ok()?
                .credentials(creds)
                .build()
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)
                .ok()?
                .credentials(creds)
                .build()
        };

        let from: Mailbox = from_addr.parse().ok()?;

        Some(Self { transport, from })
    }

    fn new_message_id(&self) -> String {
        format!("<{}@{}>", Uuid::new_v4(), self.from.email.domain())
    }

    /// Envelope-from stays the configured address; only the display name
    /// changes with the sender policy, so SPF/DKIM keep matching.
    pub fn sender_mailbox(&self, display_name: &str) -> Mailbox {
        Mailbox::new(Some(display_name.to_string()), self.from.email.clone())
    }

    pub fn parse_mailbox(name: &str, email: &str) -> Option<Mailbox> {
        format!("{name} <{email}>")
            .parse()
            .or_else(|_| email.parse())
            .ok()
    }

    /// Send one notification. The caller only acts on success or failure;
    /// message construction problems count as failures too.
    pub async fn send_notification(
        &self,
        to: Mailbox,
        from: Mailbox,
        subject: &str,
        text: &str,
        html: &str,
        cc: &[Mailbox],
        bcc: &[Mailbox],
    ) -> anyhow::Result<()> {
        let mut builder = Message::builder()
            .message_id(Some(self.new_message_id()))
            .from(from)
            .to(to)
            .subject(subject);

        for mailbox in cc {
            builder = builder.cc(mailbox.clone());
        }
        for mailbox in bcc {
            builder = builder.bcc(mailbox.clone());
        }

        let email = builder
            .multipart(
                MultiPart::alternative()
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_PLAIN)
                            .body(text.to_string()),
                    )
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_HTML)
                            .body(html.to_string()),
                    ),
            )
            .context("Failed to build email message")?;

        self.transport
            .send(email)
            .await
            .context("Failed to send email")?;

        Ok(())
    }
}
