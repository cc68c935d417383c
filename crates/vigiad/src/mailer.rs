//! SMTP notifier: one HTML alert mail per qualifying ticket.
//!
//! The body template ships with the binary and keeps the placeholder
//! names the mail layout has always used. Inline screenshots are
//! attached as `cid:` parts; when none survive the download step the
//! template gets a "(nenhuma imagem)" marker instead.

use std::path::Path;

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::{Attachment, Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials as SmtpCredentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tracing::{info, warn};

use vigia_core::notify::{Notifier, NotifyError};
use vigia_core::ticket::Alert;

use crate::config::{Credentials, MailConfig};

const TEMPLATE: &str = include_str!("../assets/template_email.html");
const SUBJECT: &str = "🚨 Alerta GLPI";

pub struct SmtpNotifier {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    to: Mailbox,
}

impl SmtpNotifier {
    pub fn new(mail: &MailConfig, credentials: &Credentials) -> Result<Self, NotifyError> {
        let from = credentials
            .mail_user
            .parse::<Mailbox>()
            .map_err(|e| NotifyError::Message(format!("bad sender address: {e}")))?;
        let to = credentials
            .recipient
            .parse::<Mailbox>()
            .map_err(|e| NotifyError::Message(format!("bad recipient address: {e}")))?;

        // relay() speaks implicit TLS, the same wire setup as the old
        // SMTP_SSL sender.
        let transport = AsyncSmtpTransport::<Tokio1Executor>::relay(&mail.smtp_host)
            .map_err(|e| NotifyError::Delivery(e.to_string()))?
            .port(mail.smtp_port)
            .credentials(SmtpCredentials::new(
                credentials.mail_user.clone(),
                credentials.mail_password.clone(),
            ))
            .build();

        Ok(Self {
            transport,
            from,
            to,
        })
    }
}

#[async_trait]
impl Notifier for SmtpNotifier {
    async fn notify(&self, alert: &Alert) -> Result<(), NotifyError> {
        // Unreadable screenshots cost the mail an image, never the mail.
        let mut images = Vec::new();
        for path in &alert.image_paths {
            match std::fs::read(path) {
                Ok(bytes) => images.push((bytes, content_type_for(path))),
                Err(e) => warn!("Leaving image {} out of the mail: {e}", path.display()),
            }
        }

        let html = render_html(alert, images.len());
        let mut body = MultiPart::related().singlepart(
            SinglePart::builder()
                .header(ContentType::TEXT_HTML)
                .body(html),
        );
        for (index, (bytes, mime)) in images.into_iter().enumerate() {
            let content_type =
                ContentType::parse(mime).map_err(|e| NotifyError::Message(e.to_string()))?;
            body = body.singlepart(
                Attachment::new_inline(format!("img{}", index + 1)).body(bytes, content_type),
            );
        }

        let message = Message::builder()
            .from(self.from.clone())
            .to(self.to.clone())
            .subject(SUBJECT)
            .multipart(body)
            .map_err(|e| NotifyError::Message(e.to_string()))?;

        self.transport
            .send(message)
            .await
            .map_err(|e| NotifyError::Delivery(e.to_string()))?;
        info!("Alert mailed for ticket {}", alert.ticket_id);
        Ok(())
    }
}

/// Fill the template. `image_count` is the number of parts that will
/// actually be attached, so the `cid:` references always resolve.
fn render_html(alert: &Alert, image_count: usize) -> String {
    let paragraphs = escape_html(&alert.description).replace('\n', "<br>\n");
    let images = if image_count == 0 {
        "<p>(nenhuma imagem)</p>".to_string()
    } else {
        (1..=image_count)
            .map(|index| {
                format!(
                    "<p><img src=\"cid:img{index}\" alt=\"anexo {index}\" style=\"max-width:600px;\"></p>\n"
                )
            })
            .collect()
    };

    TEMPLATE
        .replace("{id_chamado}", &escape_html(&alert.ticket_id))
        .replace("{titulo_chamado}", &escape_html(&alert.entry_title))
        .replace("{link_chamado}", &alert.link)
        .replace("{paragrafos_html}", &paragraphs)
        .replace("{imagens_html}", &images)
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

fn content_type_for(path: &Path) -> &'static str {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase());
    match extension.as_deref() {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        _ => "image/png",
    }
}
