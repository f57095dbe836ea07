use rust_decimal::Decimal;
use serde::Serialize;

/// Trade lifecycle events delivered to logs and the notification sink
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TradeEvent {
    Buy {
        thread_id: String,
        order_id: i64,
        price: Decimal,
        quantity: Decimal,
    },
    Sell {
        thread_id: String,
        order_id: i64,
        source_order_id: i64,
        price: Decimal,
        quantity: Decimal,
    },
    Canceled {
        thread_id: String,
        order_id: i64,
        source_order_id: Option<i64>,
    },
    CancelFailed {
        thread_id: String,
        order_id: i64,
        reason: String,
    },
    Shutdown {
        thread_id: String,
        reason: String,
    },
}

impl TradeEvent {
    pub fn name(&self) -> &'static str {
        match self {
            TradeEvent::Buy { .. } => "BUY",
            TradeEvent::Sell { .. } => "SELL",
            TradeEvent::Canceled { .. } => "CANCELED",
            TradeEvent::CancelFailed { .. } => "CANCEL_FAILED",
            TradeEvent::Shutdown { .. } => "SHUTDOWN",
        }
    }

    /// One-line human readable form used by chat-style sinks.
    pub fn summary(&self) -> String {
        match self {
            TradeEvent::Buy {
                thread_id,
                order_id,
                price,
                quantity,
            } => format!("🟢 BUY {quantity} @ {price} | order {order_id} | thread {thread_id}"),
            TradeEvent::Sell {
                thread_id,
                order_id,
                source_order_id,
                price,
                quantity,
            } => format!(
                "🔴 SELL {quantity} @ {price} | order {order_id} (buy {source_order_id}) | thread {thread_id}"
            ),
            TradeEvent::Canceled {
                thread_id,
                order_id,
                source_order_id,
            } => match source_order_id {
                Some(source) => {
                    format!("⚪ CANCELED order {order_id} (buy {source}) | thread {thread_id}")
                }
                None => format!("⚪ CANCELED order {order_id} | thread {thread_id}"),
            },
            TradeEvent::CancelFailed {
                thread_id,
                order_id,
                reason,
            } => format!("⚠️ CANCEL FAILED order {order_id}: {reason} | thread {thread_id}"),
            TradeEvent::Shutdown { thread_id, reason } => {
                format!("🛑 Shutdown: {reason} | thread {thread_id}")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn sell_summary_carries_source_order() {
        let event = TradeEvent::Sell {
            thread_id: "t1".to_string(),
            order_id: 20,
            source_order_id: 10,
            price: dec!(51000),
            quantity: dec!(0.01),
        };
        assert_eq!(event.name(), "SELL");
        assert!(event.summary().contains("order 20 (buy 10)"));

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "SELL");
        assert_eq!(json["source_order_id"], 10);
    }
}
