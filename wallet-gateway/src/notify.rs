//! Notification adapters.
//!
//! Both implement the non-blocking `Notifier` port; delivery failures are
//! logged and never reach the payment path.

use std::time::Duration;

use backon::{ExponentialBuilder, Retryable};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, instrument, warn};

use wallet_types::{Notifier, PaymentEvent};

use crate::security::{SIGNATURE_HEADER, sign_payload};

/// Logs events only.
#[derive(Debug, Clone, Default)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, event: PaymentEvent) {
        info!(
            transaction_id = %event.transaction_id,
            user_id = %event.user_id,
            status = %event.status,
            total = %event.total_payment,
            "Payment event"
        );
    }
}

const QUEUE_CAPACITY: usize = 1024;

/// Posts HMAC-signed JSON events to a webhook URL from a background task.
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    sender: mpsc::Sender<PaymentEvent>,
}

impl WebhookNotifier {
    /// Starts the sender task. Must be called inside a Tokio runtime.
    pub fn spawn(target_url: String, secret: String) -> (Self, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(QUEUE_CAPACITY);
        let worker = WebhookSender {
            client: reqwest::Client::new(),
            target_url,
            secret,
        };
        let handle = tokio::spawn(worker.run(receiver));
        (Self { sender }, handle)
    }
}

impl Notifier for WebhookNotifier {
    fn notify(&self, event: PaymentEvent) {
        if let Err(e) = self.sender.try_send(event) {
            warn!("Dropping payment event: {}", e);
        }
    }
}

struct WebhookSender {
    client: reqwest::Client,
    target_url: String,
    secret: String,
}

impl WebhookSender {
    #[instrument(skip(self, receiver))]
    async fn run(self, mut receiver: mpsc::Receiver<PaymentEvent>) {
        info!("Starting webhook notifier sending to {}", self.target_url);
        while let Some(event) = receiver.recv().await {
            self.deliver(&event).await;
        }
        info!("Webhook notifier stopped");
    }

    #[instrument(skip(self, event), fields(transaction_id = %event.transaction_id))]
    async fn deliver(&self, event: &PaymentEvent) {
        let payload = match serde_json::to_vec(event) {
            Ok(p) => p,
            Err(e) => {
                error!("Failed to encode payment event: {}", e);
                return;
            }
        };
        let signature = match sign_payload(&payload, &self.secret) {
            Ok(s) => s,
            Err(e) => {
                error!("Failed to sign payment event: {}", e);
                return;
            }
        };

        let backoff = ExponentialBuilder::default()
            .with_min_delay(Duration::from_millis(500))
            .with_max_times(3);

        let result = (|| async {
            let resp = self
                .client
                .post(&self.target_url)
                .header(SIGNATURE_HEADER, &signature)
                .header(reqwest::header::CONTENT_TYPE, "application/json")
                .body(payload.clone())
                .send()
                .await
                .map_err(|e| e.to_string())?;
            if resp.status().is_server_error() {
                return Err(format!("HTTP {}", resp.status()));
            }
            Ok(resp.status())
        })
        .retry(backoff)
        .await;

        match result {
            Ok(status) if status.is_success() => info!("Delivered payment event"),
            Ok(status) => warn!("Webhook rejected payment event: HTTP {}", status),
            Err(e) => error!("Failed to deliver payment event: {}", e),
        }
    }
}
