//! Reading feed poller.
//!
//! Fetches paginated readings from the sensor API (`results` array plus an
//! optional `next_cursor`) and runs each page set through the engine on a
//! fixed interval until shutdown.

use std::sync::Arc;

use anyhow::Result;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::app::App;
use crate::models::{RawReading, Reading};

// ---

pub fn spawn(app: Arc<App>, api_url: String) -> JoinHandle<()> {
    // ---
    tokio::spawn(async move {
        let client = reqwest::Client::new();
        let mut ticker = tokio::time::interval(app.config.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = app.shutdown.cancelled() => {
                    debug!("Reading poller stopped");
                    break;
                }
                _ = ticker.tick() => {}
            }

            match fetch_readings(&client, &api_url, app.config.api_max_pages).await {
                Ok(readings) if readings.is_empty() => debug!("Poll returned no readings"),
                Ok(readings) => {
                    app.refresh_thresholds().await;
                    let report = app.process(&readings).await;
                    debug!(readings = readings.len(), fired = report.fired.len(), "Poll processed");
                }
                Err(e) => warn!(error = %e, "Failed to fetch sensor readings"),
            }
        }
    })
}

/// Fetch paginated readings from the feed.
///
/// Items that fail to parse are skipped with a debug log; values that are not
/// numeric are dropped per parameter when narrowing into [`Reading`].
pub async fn fetch_readings(
    client: &reqwest::Client,
    base_url: &str,
    max_pages: u32,
) -> Result<Vec<Reading>> {
    // ---
    let mut all_data = Vec::new();
    let mut cursor: Option<String> = None;
    let mut page_count = 0;

    loop {
        if page_count >= max_pages {
            debug!(
                "Hit page limit of {}, stopping pagination. Fetched {} records so far.",
                max_pages,
                all_data.len()
            );
            break;
        }
        page_count += 1;

        let url = match &cursor {
            Some(cursor) => format!("{}?cursor={}", base_url, cursor),
            None => base_url.to_string(),
        };

        let response: serde_json::Value = client
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        all_data.extend(parse_page(&response, page_count));

        cursor = response
            .get("next_cursor")
            .and_then(|c| c.as_str())
            .map(String::from);

        if cursor.is_none() {
            break;
        }
    }

    info!(
        "Finished fetching {} readings from {} pages",
        all_data.len(),
        page_count
    );
    Ok(all_data)
}

/// Narrow one page's `results` into readings.
pub fn parse_page(response: &serde_json::Value, page: u32) -> Vec<Reading> {
    // ---
    let Some(items) = response.get("results").and_then(|d| d.as_array()) else {
        debug!(page, "Response missing 'results' array");
        return Vec::new();
    };

    items
        .iter()
        .enumerate()
        .filter_map(|(i, item)| match serde_json::from_value::<RawReading>(item.clone()) {
            Ok(raw) => Some(Reading::from(raw)),
            Err(e) => {
                debug!(page, item = i, error = %e, "Skipping unparsable reading");
                None
            }
        })
        .collect()
}
