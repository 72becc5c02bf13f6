use crate::{
    config::Config,
    error::{AppError, Result},
};
use lettre::{
    message::{header::ContentType, Mailbox},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use tracing::{debug, info};

/// 纯文本邮件发送；未启用时只记录日志
#[derive(Clone)]
pub struct EmailService {
    config: Config,
}

impl EmailService {
    pub async fn new(config: &Config) -> Result<Self> {
        Ok(Self {
            config: config.clone(),
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enable_email
    }

    pub async fn send_text(&self, to: &str, subject: &str, body: String) -> Result<()> {
        if !self.is_enabled() {
            info!("Email disabled, skipping '{}' to {}", subject, to);
            debug!("Email body: {}", body);
            return Ok(());
        }

        let from: Mailbox = self
            .config
            .smtp_from_email
            .parse()
            .map_err(|e| AppError::Email(format!("Invalid sender address: {}", e)))?;
        let to_mailbox: Mailbox = to
            .parse()
            .map_err(|e| AppError::Email(format!("Invalid recipient address: {}", e)))?;

        let email = Message::builder()
            .from(from)
            .to(to_mailbox)
            .subject(subject)
            .header(ContentType::TEXT_PLAIN)
            .body(body)
            .map_err(|e| AppError::Email(format!("Failed to build email: {}", e)))?;

        let mailer = AsyncSmtpTransport::<Tokio1Executor>::relay(&self.config.smtp_host)
            .map_err(|e| AppError::Email(format!("Failed to create SMTP transport: {}", e)))?
            .port(self.config.smtp_port)
            .credentials(Credentials::new(
                self.config.smtp_username.clone(),
                self.config.smtp_password.clone(),
            ))
            .build();

        mailer
            .send(email)
            .await
            .map_err(|e| AppError::Email(format!("Failed to send email: {}", e)))?;

        info!("Sent '{}' email to {}", subject, to);
        Ok(())
    }
}
