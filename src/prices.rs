// src/prices.rs
use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::Decimal;
use tracing::debug;

use crate::error::FetchError;
use crate::sources::{ConvertRates, PriceSource};

/// Price API answering `?fsyms=A,B&tsyms=USD` with `{"A":{"USD":1.0}}`.
pub struct HttpPriceSource {
    url: String,
    client: Client,
}

impl HttpPriceSource {
    pub fn new(url: &str) -> eyre::Result<Self> {
        let client = Client::builder().timeout(Duration::from_secs(10)).build()?;
        Ok(Self {
            url: url.to_string(),
            client,
        })
    }
}

#[async_trait]
impl PriceSource for HttpPriceSource {
    async fn rates(&self, keys: &[String], currency: &str) -> Result<ConvertRates, FetchError> {
        if keys.is_empty() {
            return Ok(ConvertRates::new());
        }

        let fsyms = keys.join(",");
        debug!("📡 Fetching prices for {} in {}", fsyms, currency);

        let resp = self
            .client
            .get(&self.url)
            .query(&[("fsyms", fsyms.as_str()), ("tsyms", currency)])
            .send()
            .await
            .map_err(|e| FetchError::new(format!("price request failed: {}", e)))?;

        let raw: HashMap<String, HashMap<String, Decimal>> = resp
            .json()
            .await
            .map_err(|e| FetchError::new(format!("invalid price response: {}", e)))?;

        Ok(ConvertRates::from(raw))
    }
}
