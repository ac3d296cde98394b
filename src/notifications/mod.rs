//! Outgoing order email.
//!
//! The lifecycle service hands a rendered [`OrderEmail`] to an [`OrderMailer`]. `HttpMailer` posts
//! it to a transactional-mail endpoint; `LocalOnlyMailer` is used when delivery mode is `local`.

use crate::config::AppConfig;
use crate::errors::ServiceError;
use crate::store::OrderWithDetails;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use metrics::counter;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info, instrument};

pub const ORDER_SUBJECT_PREFIX: &str = "Παραγγελία";
pub const COPY_SUBJECT_PREFIX: &str = "[Αντίγραφο]";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderEmail {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub html: String,
}

#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("mail transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("mail endpoint rejected the message with status {status}: {body}")]
    Rejected { status: u16, body: String },
    #[error("mailer is not configured: {0}")]
    NotConfigured(String),
}

impl From<NotificationError> for ServiceError {
    fn from(err: NotificationError) -> Self {
        ServiceError::ExternalServiceError(format!("Email delivery failed: {}", err))
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait OrderMailer: Send + Sync {
    async fn send(&self, email: OrderEmail) -> Result<(), NotificationError>;
}

/// Posts `{from, to, subject, html}` as JSON with a bearer key.
#[derive(Clone)]
pub struct HttpMailer {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
}

impl HttpMailer {
    pub fn new(
        endpoint: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, NotificationError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            api_key,
        })
    }

    pub fn from_config(config: &AppConfig) -> Result<Self, NotificationError> {
        let endpoint = config
            .mail_api_url
            .clone()
            .filter(|url| !url.trim().is_empty())
            .ok_or_else(|| NotificationError::NotConfigured("mail_api_url is empty".into()))?;
        Self::new(
            endpoint,
            config.mail_api_key.clone(),
            Duration::from_secs(config.mail_timeout_secs),
        )
    }
}

#[async_trait]
impl OrderMailer for HttpMailer {
    #[instrument(skip(self, email), fields(to = %email.to, subject = %email.subject))]
    async fn send(&self, email: OrderEmail) -> Result<(), NotificationError> {
        let mut request = self.client.post(&self.endpoint).json(&email);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| {
            error!(error = %e, "Mail endpoint unreachable");
            counter!("orderly_mail.failures", 1);
            NotificationError::Transport(e)
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!(status = status.as_u16(), "Mail endpoint rejected message");
            counter!("orderly_mail.failures", 1);
            return Err(NotificationError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        counter!("orderly_mail.sent", 1);
        info!("Order email delivered");
        Ok(())
    }
}

/// Accepts every message without sending anything.
#[derive(Clone, Copy, Debug, Default)]
pub struct LocalOnlyMailer;

#[async_trait]
impl OrderMailer for LocalOnlyMailer {
    async fn send(&self, email: OrderEmail) -> Result<(), NotificationError> {
        info!(to = %email.to, "Local delivery mode, email not sent");
        Ok(())
    }
}

pub fn order_subject(supplier_name: &str) -> String {
    format!("{} - {}", ORDER_SUBJECT_PREFIX, supplier_name)
}

pub fn copy_subject(subject: &str) -> String {
    format!("{} {}", COPY_SUBJECT_PREFIX, subject)
}

fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Renders the supplier-facing order table. Units come from each item, pluralised by quantity.
pub fn render_order_email_html(
    order: &OrderWithDetails,
    business_name: &str,
    introduction: Option<&str>,
    sent_on: DateTime<Utc>,
) -> String {
    let rows: String = order
        .items
        .iter()
        .map(|line| {
            format!(
                "<tr><td style=\"padding: 12px; border-bottom: 1px solid #e5e7eb;\">{}</td>\
                 <td style=\"padding: 12px; border-bottom: 1px solid #e5e7eb; text-align: right; font-weight: 600;\">{}</td>\
                 <td style=\"padding: 12px; border-bottom: 1px solid #e5e7eb;\">{}</td></tr>",
                escape_html(&line.product.name),
                line.item.quantity.normalize(),
                line.item.unit.full_name(line.item.quantity),
            )
        })
        .collect();

    let introduction = introduction
        .map(|text| format!("<p>{}</p>", escape_html(text)))
        .unwrap_or_else(|| {
            "<p>Θα θέλαμε να παραγγείλουμε τα παρακάτω προϊόντα:</p>".to_string()
        });

    format!(
        "<!DOCTYPE html><html lang=\"el\"><head><meta charset=\"UTF-8\"></head>\
         <body style=\"font-family: -apple-system, 'Segoe UI', Roboto, sans-serif; max-width: 600px; margin: 0 auto; padding: 20px;\">\
         <h1 style=\"font-size: 20px;\">Παραγγελία Αποθήκης</h1>\
         <p>Προς: {supplier}</p>\
         <p>Γεια σας,</p>{introduction}\
         <table style=\"width: 100%; border-collapse: collapse; margin: 20px 0;\">\
         <thead><tr><th style=\"text-align: left;\">Προϊόν</th><th style=\"text-align: right;\">Ποσότητα</th><th style=\"text-align: left;\">Μονάδα</th></tr></thead>\
         <tbody>{rows}</tbody></table>\
         <p>Παρακαλούμε επιβεβαιώστε την παραλαβή και ενημερώστε μας για τυχόν ελλείψεις.</p>\
         <p>Ευχαριστούμε,<br><strong>{business}</strong></p>\
         <p style=\"font-size: 12px; color: #6b7280;\">Ημερομηνία: {date}</p>\
         </body></html>",
        supplier = escape_html(&order.supplier.name),
        introduction = introduction,
        rows = rows,
        business = escape_html(business_name),
        date = sent_on.format("%d/%m/%Y %H:%M"),
    )
}
