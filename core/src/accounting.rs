//! Turns the decoder's accumulated state into metrics and one exchange.

use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;
use tracing::warn;

use crate::config::CostRates;
use crate::config::Price;
use crate::decoder::DecodedTurn;
use crate::record::Exchange;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenCounts {
    pub input: u64,
    pub output: u64,
    pub cache_read: u64,
    pub cache_write: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CharCounts {
    pub input: usize,
    pub output: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CashCost {
    pub total: f64,
    pub input: f64,
    pub output: f64,
    pub cache_write: f64,
    pub cache_read: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CostBreakdown {
    pub time: Duration,
    pub cash: CashCost,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    pub tokens: TokenCounts,
    pub chars: CharCounts,
    pub cost: CostBreakdown,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FinalizedTurn {
    pub output: String,
    pub metrics: Metrics,
    pub exchange: Exchange,
}

pub fn finalize(decoded: &DecodedTurn, prompt: &str, rates: &CostRates) -> FinalizedTurn {
    let output = decoded
        .result_text
        .clone()
        .unwrap_or_else(|| decoded.text.clone());
    let tokens = decoded.tokens;

    let input = priced(rates.input.as_ref(), tokens.input, "input");
    let output_cost = priced(rates.output.as_ref(), tokens.output, "output");
    let cache_write = priced(rates.cache_write.as_ref(), tokens.cache_write, "cache_write");
    let cache_read = priced(rates.cache_read.as_ref(), tokens.cache_read, "cache_read");
    let total = decoded
        .reported_cost
        .unwrap_or(input + output_cost + cache_write + cache_read);

    let metrics = Metrics {
        tokens,
        chars: CharCounts {
            input: prompt.chars().count(),
            output: output.chars().count(),
        },
        cost: CostBreakdown {
            time: decoded
                .duration_ms
                .map(Duration::from_millis)
                .unwrap_or_default(),
            cash: CashCost {
                total,
                input,
                output: output_cost,
                cache_write,
                cache_read,
            },
        },
    };

    FinalizedTurn {
        exchange: Exchange::new(prompt, output.as_str()),
        output,
        metrics,
    }
}

fn priced(rate: Option<&Price>, count: u64, category: &str) -> f64 {
    let Some(rate) = rate else {
        return 0.0;
    };
    match rate.value() {
        Some(per_token) => per_token * count as f64,
        None => {
            warn!(category, ?rate, "ignoring unparseable price");
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn rates() -> CostRates {
        CostRates {
            input: Some(Price::from("$0.000003")),
            output: Some(Price::from(0.000015)),
            cache_write: Some(Price::from("$0.00000375")),
            cache_read: Some(Price::from("USD 0.0000003")),
        }
    }

    fn decoded() -> DecodedTurn {
        DecodedTurn {
            text: "partial text".to_string(),
            tokens: TokenCounts {
                input: 1_000,
                output: 200,
                cache_read: 5_000,
                cache_write: 400,
            },
            ..DecodedTurn::default()
        }
    }

    #[test]
    fn derived_cost_is_sum_of_categories() {
        let turn = finalize(&decoded(), "prompt", &rates());
        let cash = turn.metrics.cost.cash;
        assert!((cash.input - 0.003).abs() < 1e-12);
        assert!((cash.output - 0.003).abs() < 1e-12);
        assert!((cash.cache_write - 0.0015).abs() < 1e-12);
        assert!((cash.cache_read - 0.0015).abs() < 1e-12);
        let sum = cash.input + cash.output + cash.cache_write + cash.cache_read;
        assert!((cash.total - sum).abs() < 1e-12);
        assert_eq!(turn.metrics.cost.time, Duration::ZERO);
    }

    #[test]
    fn vendor_cost_wins() {
        let mut decoded = decoded();
        decoded.reported_cost = Some(0.042);
        let turn = finalize(&decoded, "prompt", &rates());
        assert_eq!(turn.metrics.cost.cash.total, 0.042);
        assert!(turn.metrics.cost.cash.input > 0.0);
    }

    #[test]
    fn result_text_takes_precedence_over_accumulated_text() {
        let mut decoded = decoded();
        decoded.result_text = Some("final answer".to_string());
        decoded.duration_ms = Some(1234);
        let turn = finalize(&decoded, "héllo", &CostRates::default());
        assert_eq!(turn.output, "final answer");
        assert_eq!(turn.exchange, Exchange::new("héllo", "final answer"));
        assert_eq!(
            turn.metrics.chars,
            CharCounts {
                input: 5,
                output: 12
            }
        );
        assert_eq!(turn.metrics.cost.time, Duration::from_millis(1234));
        assert_eq!(turn.metrics.cost.cash.total, 0.0);
    }

    #[test]
    fn falls_back_to_accumulated_text() {
        let turn = finalize(&decoded(), "q", &CostRates::default());
        assert_eq!(turn.output, "partial text");
        assert_eq!(turn.exchange.output, "partial text");
        assert_eq!(turn.exchange.id, None);
    }

    #[test]
    fn unparseable_rates_count_as_zero() {
        let rates = CostRates {
            input: Some(Price::from("n/a")),
            ..CostRates::default()
        };
        let turn = finalize(&decoded(), "q", &rates);
        assert_eq!(turn.metrics.cost.cash.input, 0.0);
        assert_eq!(turn.metrics.cost.cash.total, 0.0);
    }
}
