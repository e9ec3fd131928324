//! # Notifier & CommandRouter (§4.9)
//!
//! Outbound: typed push messages to an operator chat. All sends are
//! best-effort — failure is logged, never raised — which is why
//! [`TelegramNotifier`] implements [`executor::AlertSink`] directly rather
//! than surfacing a `Result` up through the executor.
//!
//! Inbound: [`command_router::CommandRouter`] recognizes the four
//! operator commands by prefix and mutates a `ControlSurface` accordingly.
//! Signature verification happens at the webhook boundary, not here — by
//! the time text reaches the router it is already trusted.

use reqwest::Client;
use serde::Serialize;

use configuration::TelegramConfig;

pub mod command_router;
pub mod error;

pub use command_router::CommandRouter;
pub use error::AlerterError;

/// The JSON payload for the Telegram `sendMessage` endpoint.
#[derive(Debug, Serialize)]
struct SendMessagePayload<'a> {
    chat_id: &'a str,
    text: &'a str,
    parse_mode: &'a str,
}

/// The four outbound message kinds named in §4.9, plus a generic text
/// fallback used for command acknowledgements and `/status` replies.
#[derive(Debug, Clone)]
pub enum NotifierMessage<'a> {
    TradeSignal { symbol: &'a str, side: &'a str, amount: String, price: String },
    StopLoss { symbol: &'a str, entry: String, current: String },
    TakeProfit { symbol: &'a str, entry: String, current: String },
    Panic { reason: &'a str },
    Text(&'a str),
}

impl<'a> NotifierMessage<'a> {
    fn render(&self) -> String {
        match self {
            NotifierMessage::TradeSignal { symbol, side, amount, price } => {
                let icon = if side.eq_ignore_ascii_case("buy") { "📈" } else { "📉" };
                format!("{icon} *{side} {symbol}* `{amount}` @ `{price}`")
            }
            NotifierMessage::StopLoss { symbol, entry, current } => {
                format!("🛑 *STOP-LOSS* `{symbol}` entry `{entry}` → current `{current}`")
            }
            NotifierMessage::TakeProfit { symbol, entry, current } => {
                format!("✅ *TAKE-PROFIT* `{symbol}` entry `{entry}` → current `{current}`")
            }
            NotifierMessage::Panic { reason } => format!("🚨 *PANIC* {reason}"),
            NotifierMessage::Text(text) => text.to_string(),
        }
    }
}

/// A client for sending messages to the Telegram Bot API. Implements
/// [`executor::AlertSink`] so a `TradeExecutor` can push stop-loss,
/// take-profit, and fill notifications without knowing about Telegram.
pub struct TelegramNotifier {
    client: Client,
    token: String,
    chat_id: String,
}

impl TelegramNotifier {
    /// Returns `None` if the token or chat_id is missing, allowing the
    /// system to gracefully disable alerting rather than fail startup.
    pub fn new(config: &TelegramConfig) -> Option<Self> {
        if config.token.is_empty() || config.chat_id.is_empty() {
            tracing::warn!("telegram notifier is not configured (missing token or chat_id)");
            return None;
        }
        Some(Self {
            client: Client::new(),
            token: config.token.clone(),
            chat_id: config.chat_id.clone(),
        })
    }

    pub async fn send(&self, message: NotifierMessage<'_>) -> Result<(), AlerterError> {
        let text = message.render();
        let url = format!("https://api.telegram.org/bot{}/sendMessage", self.token);

        let payload = SendMessagePayload {
            chat_id: &self.chat_id,
            text: &text,
            parse_mode: "MarkdownV2",
        };

        let response = self.client.post(&url).json(&payload).send().await?;

        if !response.status().is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "failed to decode error response".to_string());
            return Err(AlerterError::ApiError(error_text));
        }

        Ok(())
    }
}

#[async_trait::async_trait]
impl executor::AlertSink for TelegramNotifier {
    /// Best-effort by contract (§4.9 — "all sends are best-effort"):
    /// delivery failures are logged here and never propagate to the
    /// executor that triggered the alert.
    async fn alert(&self, event: executor::ExecutorAlert) {
        let message = match &event {
            executor::ExecutorAlert::StopLoss { symbol, entry, current } => NotifierMessage::StopLoss {
                symbol,
                entry: entry.to_string(),
                current: current.to_string(),
            },
            executor::ExecutorAlert::TakeProfit { symbol, entry, current } => NotifierMessage::TakeProfit {
                symbol,
                entry: entry.to_string(),
                current: current.to_string(),
            },
            executor::ExecutorAlert::TradeFilled { symbol, side, amount, price } => NotifierMessage::TradeSignal {
                symbol,
                side: if *side == core_types::OrderSide::Buy { "BUY" } else { "SELL" },
                amount: amount.to_string(),
                price: price.to_string(),
            },
        };

        if let Err(e) = self.send(message).await {
            tracing::error!(error = ?e, "failed to deliver executor alert");
        }
    }
}
