use crate::models::{Direction, Signal};
use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use governor::{Quota, RateLimiter};
use reqwest::Client;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::num::NonZeroU32;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

const MAX_RETRIES: u32 = 3;
const USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/110.0.0.0 Safari/537.36";
const TRADE_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

type FeedRateLimiter = RateLimiter<
    governor::state::direct::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// Downloads the prediction table and turns it into `Signal` rows
#[derive(Clone)]
pub struct PredictionFeedClient {
    client: Client,
    url: String,
    rate_limiter: Arc<FeedRateLimiter>,
    retry_base: Duration,
}

impl PredictionFeedClient {
    pub fn new(url: &str, requests_per_minute: u32) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(USER_AGENT)
            .build()
            .context("Failed to build HTTP client")?;

        let rpm = NonZeroU32::new(requests_per_minute.max(1)).context("rate limit must be positive")?;
        let rate_limiter = Arc::new(RateLimiter::direct(Quota::per_minute(rpm)));

        Ok(Self {
            client,
            url: url.to_string(),
            rate_limiter,
            retry_base: Duration::from_secs(1),
        })
    }

    /// Base of the `base * 2^attempt` retry wait
    pub fn with_retry_base(mut self, retry_base: Duration) -> Self {
        self.retry_base = retry_base;
        self
    }

    /// Fetch and parse every row of the feed
    pub async fn fetch(&self) -> Result<Vec<Signal>> {
        let body = self.download().await?;
        let signals = parse_predictions(&body, Utc::now())?;
        tracing::info!("Fetched {} predictions from feed", signals.len());
        Ok(signals)
    }

    async fn download(&self) -> Result<String> {
        for attempt in 1..=MAX_RETRIES {
            self.rate_limiter.until_ready().await;

            let backoff = self.retry_base * 2u32.pow(attempt);
            match self.client.get(&self.url).send().await {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        return response.text().await.context("Failed to read prediction feed");
                    }

                    if status.as_u16() == 429 || status.is_server_error() {
                        tracing::warn!(
                            "Prediction feed returned {}, retrying in {:.1}s (attempt {}/{})",
                            status,
                            backoff.as_secs_f64(),
                            attempt,
                            MAX_RETRIES
                        );
                        tokio::time::sleep(backoff).await;
                        continue;
                    }

                    let error_text = response
                        .text()
                        .await
                        .unwrap_or_else(|_| "Unknown error".to_string());
                    anyhow::bail!("Prediction feed error ({}): {}", status, error_text);
                }
                Err(e) if attempt < MAX_RETRIES => {
                    tracing::warn!(
                        "Network error: {}, retrying in {:.1}s (attempt {}/{})",
                        e,
                        backoff.as_secs_f64(),
                        attempt,
                        MAX_RETRIES
                    );
                    tokio::time::sleep(backoff).await;
                }
                Err(e) => anyhow::bail!("Network error after {} retries: {}", MAX_RETRIES, e),
            }
        }

        anyhow::bail!("Failed after {} retries", MAX_RETRIES)
    }
}

/// Values are lower-cased and trimmed; `-` and empty cells are absent
fn cell<'a>(row: &'a HashMap<String, String>, column: &str) -> Option<&'a str> {
    row.get(column)
        .map(|v| v.as_str())
        .filter(|v| !v.is_empty() && *v != "-")
}

fn decimal_cell(row: &HashMap<String, String>, column: &str) -> Option<Decimal> {
    let raw = cell(row, column)?;
    let cleaned: String = raw
        .chars()
        .filter(|c| !matches!(c, '$' | '%' | ','))
        .collect();
    match Decimal::from_str(&cleaned) {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::debug!("Ignoring non-numeric {} value '{}'", column, raw);
            None
        }
    }
}

/// Parse the prediction CSV
///
/// Columns: `crypto, position, trade_time(utc), elapsed_time(min), entry_price,
/// target_price, current_price, price_spread, amount, current_profit,
/// daily_profit, monthly_profit`. Rows without a symbol are skipped.
pub fn parse_predictions(body: &str, fetched_at: DateTime<Utc>) -> Result<Vec<Signal>> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(body.as_bytes());

    let headers: Vec<String> = reader
        .headers()
        .context("Prediction feed has no header row")?
        .iter()
        .map(|h| h.to_lowercase())
        .collect();

    let mut signals = Vec::new();
    for record in reader.records() {
        let record = record.context("Malformed prediction row")?;
        let row: HashMap<String, String> = headers
            .iter()
            .cloned()
            .zip(record.iter().map(|v| v.trim().to_lowercase()))
            .collect();

        let Some(symbol) = cell(&row, "crypto") else {
            continue;
        };

        let direction = match cell(&row, "position") {
            Some(raw) => Direction::from_str(raw).unwrap_or_else(|e| {
                tracing::debug!("{} for {}, treating as none", e, symbol);
                Direction::None
            }),
            None => Direction::None,
        };

        let trade_time = cell(&row, "trade_time(utc)").and_then(|raw| {
            NaiveDateTime::parse_from_str(raw, TRADE_TIME_FORMAT)
                .ok()
                .map(|naive| naive.and_utc())
        });

        let elapsed_minutes = decimal_cell(&row, "elapsed_time(min)").and_then(|d| d.trunc().to_i64());

        signals.push(Signal {
            symbol: symbol.to_string(),
            direction,
            elapsed_minutes,
            trade_time,
            entry_price: decimal_cell(&row, "entry_price"),
            target_price: decimal_cell(&row, "target_price"),
            current_price: decimal_cell(&row, "current_price"),
            price_spread: decimal_cell(&row, "price_spread"),
            amount: decimal_cell(&row, "amount"),
            current_profit: decimal_cell(&row, "current_profit"),
            daily_profit: decimal_cell(&row, "daily_profit"),
            monthly_profit: decimal_cell(&row, "monthly_profit"),
            updated_at: fetched_at,
        });
    }

    Ok(signals)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    const FEED: &str = "crypto,position,trade_time(utc),elapsed_time(min),entry_price,target_price,current_price,price_spread,amount,current_profit,daily_profit,monthly_profit\r\n\
BTC,Long,2023-03-01 10:00:00,5,20000,20500,20100,0.5,0.01,1.2,3.4,10.5\r\n\
ETH,-,-,-,-,-,1500,-,-,-,-,-\r\n\
DOGE,None,2023-03-01 09:00:00,75,0.08,0.07,0.079,,,,,\r\n";

    #[test]
    fn test_parse_feed_rows() {
        let signals = parse_predictions(FEED, Utc::now()).unwrap();
        assert_eq!(signals.len(), 3);

        let btc = &signals[0];
        assert_eq!(btc.symbol, "btc");
        assert_eq!(btc.direction, Direction::Long);
        assert_eq!(btc.elapsed_minutes, Some(5));
        assert_eq!(btc.entry_price, Some(dec!(20000)));
        assert_eq!(btc.amount, Some(dec!(0.01)));
        assert_eq!(
            btc.trade_time.map(|t| t.to_rfc3339()),
            Some("2023-03-01T10:00:00+00:00".to_string())
        );
    }

    #[test]
    fn test_placeholder_row() {
        let signals = parse_predictions(FEED, Utc::now()).unwrap();
        let eth = &signals[1];
        assert_eq!(eth.direction, Direction::None);
        assert_eq!(eth.elapsed_minutes, None);
        assert_eq!(eth.current_price, Some(dec!(1500)));
        assert!(eth.is_placeholder());

        let doge = &signals[2];
        assert_eq!(doge.direction, Direction::None);
        assert_eq!(doge.elapsed_minutes, Some(75));
        assert!(!doge.is_placeholder());
        assert_eq!(doge.amount, None);
    }

    #[tokio::test]
    async fn test_fetch_from_feed() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/pred_table.csv")
            .with_status(200)
            .with_header("content-type", "text/csv")
            .with_body(FEED)
            .create_async()
            .await;

        let client = PredictionFeedClient::new(&format!("{}/pred_table.csv", server.url()), 60)
            .unwrap()
            .with_retry_base(Duration::ZERO);
        let signals = client.fetch().await.unwrap();

        assert_eq!(signals.len(), 3);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_server_errors_are_retried() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/pred_table.csv")
            .with_status(503)
            .expect(3)
            .create_async()
            .await;

        let client = PredictionFeedClient::new(&format!("{}/pred_table.csv", server.url()), 600)
            .unwrap()
            .with_retry_base(Duration::ZERO);
        let result = client.fetch().await;

        assert!(result.is_err());
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_client_errors_are_not_retried() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/pred_table.csv")
            .with_status(404)
            .expect(1)
            .create_async()
            .await;

        let client = PredictionFeedClient::new(&format!("{}/pred_table.csv", server.url()), 600)
            .unwrap()
            .with_retry_base(Duration::ZERO);
        let err = client.fetch().await.unwrap_err();

        assert!(err.to_string().contains("404"));
        mock.assert_async().await;
    }
}
