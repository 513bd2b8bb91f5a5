use lettre::{
    Message, SmtpTransport, Transport,
    message::{header::ContentType, Mailbox},
    transport::smtp::authentication::Credentials,
};
use log::{info, error, warn};

use crate::config::Config;

pub struct EmailService;

impl EmailService {
    /// Owner is told a tenant wants their listing.
    pub async fn send_booking_requested(owner_email: &str, owner_name: &str, tenant_name: &str, property_title: &str) -> bool {
        let body = Self::layout(
            &format!("Hi {},", owner_name),
            &format!(
                "<p><strong>{}</strong> has requested to rent <strong>{}</strong>.</p>\
                 <p>Open your dashboard to approve or reject the request.</p>",
                tenant_name, property_title
            ),
        );
        Self::dispatch(owner_email, "New booking request", body).await
    }

    /// Tenant is told the owner's decision.
    pub async fn send_booking_decided(tenant_email: &str, tenant_name: &str, property_title: &str, approved: bool) -> bool {
        let verdict = if approved {
            "approved. You can now pay the first month's rent from your dashboard"
        } else {
            "rejected by the owner"
        };
        let body = Self::layout(
            &format!("Hi {},", tenant_name),
            &format!("<p>Your booking request for <strong>{}</strong> was {}.</p>", property_title, verdict),
        );
        let subject = if approved { "Booking approved" } else { "Booking rejected" };
        Self::dispatch(tenant_email, subject, body).await
    }

    pub async fn send_payment_received(email: &str, name: &str, description: &str, amount: i64) -> bool {
        let body = Self::layout(
            &format!("Hi {},", name),
            &format!(
                "<p>We received your payment of <strong>{} BDT</strong> for {}.</p>\
                 <p>Your receipt is available from the payments page.</p>",
                amount, description
            ),
        );
        Self::dispatch(email, "Payment received", body).await
    }

    fn layout(greeting: &str, content: &str) -> String {
        format!(
            r#"
            <!DOCTYPE html>
            <html>
            <body style="font-family: Arial, sans-serif; line-height: 1.6; color: #333;">
                <div style="max-width: 600px; margin: 0 auto; padding: 20px;">
                    <h2>Basha</h2>
                    <p>{}</p>
                    {}
                    <p>Best regards,<br><strong>Basha Team</strong></p>
                </div>
            </body>
            </html>
            "#,
            greeting, content
        )
    }

    async fn dispatch(to: &str, subject: &str, body: String) -> bool {
        let to_owned = to.to_string();
        let subject = subject.to_string();

        let result = tokio::task::spawn_blocking(move || Self::try_send(&to_owned, &subject, body)).await;

        match result {
            Ok(Ok(())) => {
                info!("Email sent to {}", to);
                true
            }
            Ok(Err(e)) => {
                error!("Failed to send email to {}: {}", to, e);
                false
            }
            Err(e) => {
                error!("Email task panicked: {}", e);
                false
            }
        }
    }

    fn try_send(to: &str, subject: &str, body: String) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let mail_user = Config::mail_user();
        let mail_password = Config::mail_password();

        if mail_user.is_empty() || mail_password.is_empty() {
            warn!("Email credentials not configured. Skipping email send.");
            return Err("Email not configured".into());
        }

        let from_mailbox: Mailbox = Config::mail_from().parse()?;
        let to_mailbox: Mailbox = to.parse()?;

        let message = Message::builder()
            .from(from_mailbox)
            .to(to_mailbox)
            .subject(subject)
            .header(ContentType::TEXT_HTML)
            .body(body)?;

        let creds = Credentials::new(mail_user, mail_password);
        let mailer = SmtpTransport::starttls_relay(&Config::mail_host())?
            .port(Config::mail_port())
            .credentials(creds)
            .build();

        mailer.send(&message)?;
        Ok(())
    }
}
