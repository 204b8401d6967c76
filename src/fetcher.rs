use std::time::Duration;

use chrono::{DateTime, Utc};
use feed_rs::parser;
use reqwest::Client;
use tracing::debug;

use crate::error::{Error, Result};

pub const USER_AGENT: &str = "gator";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Channel {
    pub title: String,
    pub link: String,
    pub description: String,
}

/// One entry of a feed. Missing text fields are empty strings.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeedItem {
    pub title: String,
    pub link: String,
    pub description: String,
    pub published_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeedDocument {
    pub channel: Channel,
    pub items: Vec<FeedItem>,
}

pub struct FeedFetcher {
    client: Client,
}

impl FeedFetcher {
    pub fn new() -> Result<Self> {
        Self::with_user_agent(USER_AGENT)
    }

    pub fn with_user_agent(user_agent: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(user_agent)
            .build()
            .map_err(Error::HttpClient)?;

        Ok(Self { client })
    }

    pub async fn fetch(&self, url: &str) -> Result<FeedDocument> {
        debug!("GET {}", url);

        let network = |source| Error::Network {
            url: url.to_string(),
            source,
        };

        let response = self
            .client
            .get(url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(network)?;
        let bytes = response.bytes().await.map_err(network)?;

        parse_feed(&bytes)
    }
}

/// Parse RSS, Atom or JSON Feed markup into a [`FeedDocument`].
pub fn parse_feed(bytes: &[u8]) -> Result<FeedDocument> {
    let parsed = parser::parse(bytes).map_err(|e| Error::MalformedFeed(e.to_string()))?;

    let channel = Channel {
        title: parsed.title.map(|t| t.content).unwrap_or_default(),
        link: parsed
            .links
            .into_iter()
            .next()
            .map(|l| l.href)
            .unwrap_or_default(),
        description: parsed.description.map(|t| t.content).unwrap_or_default(),
    };

    let items = parsed
        .entries
        .into_iter()
        .map(|entry| {
            let description = entry
                .summary
                .map(|t| t.content)
                .or_else(|| entry.content.and_then(|c| c.body))
                .unwrap_or_default();

            FeedItem {
                title: entry.title.map(|t| t.content).unwrap_or_default(),
                link: entry
                    .links
                    .into_iter()
                    .next()
                    .map(|l| l.href)
                    .unwrap_or_default(),
                description,
                published_at: entry.published.or(entry.updated),
            }
        })
        .collect();

    Ok(FeedDocument { channel, items })
}
