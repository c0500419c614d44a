//! All-market mini ticker WebSocket stream

use futures_util::{SinkExt, StreamExt};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::{mpsc::error::TrySendError, oneshot};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

use super::{StreamControl, TickSender};
use crate::error::{BotError, Result};
use crate::models::MiniMarketStats;

const MINI_TICKER_STREAM: &str = "!miniTicker@arr";
const RECONNECT_DELAY: Duration = Duration::from_secs(5);
const MAX_RECONNECT_ATTEMPTS: u32 = 10;

/// One element of the `!miniTicker@arr` payload
#[derive(Debug, Deserialize)]
struct MiniTickerEvent {
    #[serde(rename = "E")]
    event_time: i64,
    #[serde(rename = "s")]
    symbol: String,
    #[serde(rename = "c")]
    close: Decimal,
    #[serde(rename = "o")]
    open: Decimal,
    #[serde(rename = "h")]
    high: Decimal,
    #[serde(rename = "l")]
    low: Decimal,
    #[serde(rename = "v")]
    base_volume: Decimal,
    #[serde(rename = "q")]
    quote_volume: Decimal,
}

/// How a connection ended
enum Exit {
    Stopped,
    Disconnected,
}

/// Parse a payload and keep the tickers quoted in `quote`
fn parse_batch(text: &str, quote: &str) -> Result<Vec<MiniMarketStats>> {
    let events: Vec<MiniTickerEvent> = serde_json::from_str(text)?;
    Ok(events
        .into_iter()
        .filter_map(|e| {
            let asset = e.symbol.strip_suffix(quote)?;
            if asset.is_empty() {
                return None;
            }
            Some(MiniMarketStats {
                asset: asset.to_string(),
                last_price: e.close,
                open_price: e.open,
                high_price: e.high,
                low_price: e.low,
                base_volume: e.base_volume,
                quote_volume: e.quote_volume,
                time: e.event_time,
            })
        })
        .collect())
}

/// Spawn the producer. Batches are dropped when the tick channel is full.
pub(crate) fn spawn(ws_url: &str, quote: &str, ticks: TickSender) -> StreamControl {
    let url = format!("{}/{}", ws_url.trim_end_matches('/'), MINI_TICKER_STREAM);
    let quote = quote.to_string();
    let (stop_tx, stop_rx) = oneshot::channel();

    let done = tokio::spawn(async move {
        if let Err(e) = run(url, quote, ticks, stop_rx).await {
            error!("Mini ticker stream terminated: {}", e);
        }
    });

    StreamControl::new(stop_tx, done)
}

async fn run(
    url: String,
    quote: String,
    ticks: TickSender,
    mut stop: oneshot::Receiver<()>,
) -> Result<()> {
    let mut reconnect_attempts = 0;

    loop {
        match connect_and_read(&url, &quote, &ticks, &mut stop).await {
            Ok(Exit::Stopped) => {
                info!("Mini ticker stream stopped");
                return Ok(());
            }
            Ok(Exit::Disconnected) => {
                reconnect_attempts = 0;
            }
            Err(e) => {
                reconnect_attempts += 1;
                error!(
                    "Mini ticker connection failed (attempt {}): {}",
                    reconnect_attempts, e
                );
                if reconnect_attempts >= MAX_RECONNECT_ATTEMPTS {
                    return Err(BotError::Exchange(format!(
                        "max reconnection attempts ({}) exceeded",
                        MAX_RECONNECT_ATTEMPTS
                    )));
                }
            }
        }

        warn!("Reconnecting to {} in {:?}", url, RECONNECT_DELAY);
        tokio::select! {
            _ = tokio::time::sleep(RECONNECT_DELAY) => continue,
            _ = &mut stop => return Ok(()),
        }
    }
}

async fn connect_and_read(
    url: &str,
    quote: &str,
    ticks: &TickSender,
    stop: &mut oneshot::Receiver<()>,
) -> Result<Exit> {
    let (ws_stream, _) = connect_async(url).await?;
    info!("Connected to {}", url);

    let (mut write, mut read) = ws_stream.split();

    loop {
        tokio::select! {
            _ = &mut *stop => {
                let _ = write.send(Message::Close(None)).await;
                return Ok(Exit::Stopped);
            }
            msg = read.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    let batch = match parse_batch(&text, quote) {
                        Ok(batch) => batch,
                        Err(e) => {
                            warn!("Unparsable mini ticker payload: {}", e);
                            continue;
                        }
                    };
                    if batch.is_empty() {
                        continue;
                    }
                    match ticks.try_send(batch) {
                        Ok(()) => {}
                        Err(TrySendError::Full(batch)) => {
                            debug!("Tick channel full, dropping {} ticks", batch.len());
                        }
                        Err(TrySendError::Closed(_)) => {
                            info!("Tick channel closed, leaving stream");
                            return Ok(Exit::Stopped);
                        }
                    }
                }
                Some(Ok(Message::Ping(ping))) => {
                    write.send(Message::Pong(ping)).await?;
                }
                Some(Ok(Message::Close(_))) | None => {
                    info!("Mini ticker stream closed by server");
                    return Ok(Exit::Disconnected);
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(e.into()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    const PAYLOAD: &str = r#"[
        {"e":"24hrMiniTicker","E":1672515782136,"s":"BTCUSDT","c":"16542.10","o":"16500.00","h":"16600.00","l":"16400.00","v":"1000","q":"16500000"},
        {"e":"24hrMiniTicker","E":1672515782136,"s":"ETHBTC","c":"0.072","o":"0.071","h":"0.073","l":"0.070","v":"50","q":"3.6"},
        {"e":"24hrMiniTicker","E":1672515782137,"s":"USDT","c":"1","o":"1","h":"1","l":"1","v":"0","q":"0"}
    ]"#;

    #[test]
    fn test_parse_batch_keeps_quote_pairs_only() {
        let batch = parse_batch(PAYLOAD, "USDT").unwrap();

        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].asset, "BTC");
        assert_eq!(batch[0].last_price, dec!(16542.10));
        assert_eq!(batch[0].open_price, dec!(16500));
        assert_eq!(batch[0].time, 1672515782136);
    }

    #[test]
    fn test_parse_batch_rejects_garbage() {
        assert!(parse_batch("{\"result\":null,\"id\":1}", "USDT").is_err());
    }
}
