use crate::error::BatchmarkError;
use std::path::PathBuf;
use tracing::info;

pub const DEFAULT_SUBJECT: &str = "您的加水印文件已准备好";
pub const DEFAULT_BODY: &str =
    "尊敬的{company}，\n\n您的加水印文件已处理完成，请查收附件。\n\n如有任何问题，请及时联系我们。\n\n祝好！";

/// Subject and body with `{company}` and `{filename}` placeholders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailTemplate {
    pub subject: String,
    pub body: String,
}

impl Default for MailTemplate {
    fn default() -> Self {
        Self {
            subject: DEFAULT_SUBJECT.to_string(),
            body: DEFAULT_BODY.to_string(),
        }
    }
}

impl MailTemplate {
    pub fn new(subject: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            body: body.into(),
        }
    }

    fn fill(template: &str, company: &str, filename: &str) -> String {
        template
            .replace("{company}", company)
            .replace("{filename}", filename)
    }

    pub fn delivery(&self, recipient: &str, address: &str, path: PathBuf, display_filename: &str) -> Delivery {
        Delivery {
            recipient: recipient.to_string(),
            address: address.to_string(),
            path,
            display_filename: display_filename.to_string(),
            subject: Self::fill(&self.subject, recipient, display_filename),
            body: Self::fill(&self.body, recipient, display_filename),
        }
    }
}

/// One message to one address with the rendered PDF attached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub recipient: String,
    pub address: String,
    pub path: PathBuf,
    /// Output filename without the `.pdf` extension.
    pub display_filename: String,
    pub subject: String,
    pub body: String,
}

impl Delivery {
    pub fn attachment_name(&self) -> String {
        format!("{}.pdf", self.display_filename)
    }
}

pub trait MailTransport: Send + Sync {
    fn send(&self, delivery: &Delivery) -> Result<(), BatchmarkError>;
}

/// Dry-run transport: logs what would be sent and always succeeds.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogTransport;

impl MailTransport for LogTransport {
    fn send(&self, delivery: &Delivery) -> Result<(), BatchmarkError> {
        if !delivery.path.is_file() {
            return Err(BatchmarkError::Mail {
                address: delivery.address.clone(),
                reason: format!("attachment {} is missing", delivery.path.display()),
            });
        }
        info!(
            recipient = %delivery.recipient,
            email = %delivery.address,
            subject = %delivery.subject,
            attachment = %delivery.attachment_name(),
            "dry-run delivery"
        );
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::Mutex;

    /// Records deliveries; addresses listed in `fail_for` are refused.
    #[derive(Default)]
    pub struct RecordingTransport {
        pub sent: Mutex<Vec<Delivery>>,
        pub fail_for: Vec<String>,
    }

    impl RecordingTransport {
        pub fn failing_for(addresses: &[&str]) -> Self {
            Self {
                sent: Mutex::new(Vec::new()),
                fail_for: addresses.iter().map(|a| a.to_string()).collect(),
            }
        }

        pub fn addresses(&self) -> Vec<String> {
            self.sent.lock().unwrap().iter().map(|d| d.address.clone()).collect()
        }
    }

    impl MailTransport for RecordingTransport {
        fn send(&self, delivery: &Delivery) -> Result<(), BatchmarkError> {
            if self.fail_for.contains(&delivery.address) {
                return Err(BatchmarkError::Mail {
                    address: delivery.address.clone(),
                    reason: "mailbox unavailable".to_string(),
                });
            }
            self.sent.lock().unwrap().push(delivery.clone());
            Ok(())
        }
    }
}
