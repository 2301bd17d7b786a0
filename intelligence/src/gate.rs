//! Confidence gate
//!
//! Scores the current intelligence text with a lexicon-based comparative
//! sentiment: the sum of word valences divided by the number of tokens,
//! clamped to `[-1, 1]`. The score gates dispatch and selects the fee tier.
//!
//! The feed is external and slow, so every fetch runs under a timeout. When
//! the fetch fails or times out the gate answers [`NEUTRAL_CONFIDENCE`].

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use tracing::{debug, warn};

use crate::config::GateConfig;
use crate::error::{IntelligenceError, Result};
use crate::types::{Confidence, NEUTRAL_CONFIDENCE};

/// Time range of intelligence text requested per trigger
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

impl TimeWindow {
    /// Window of `length` ending now
    pub fn ending_now(length: Duration) -> Self {
        let to = Utc::now();
        let from = chrono::Duration::from_std(length)
            .ok()
            .and_then(|d| to.checked_sub_signed(d))
            .unwrap_or(to);
        Self { from, to }
    }
}

/// Source of free-form intelligence text
#[async_trait]
pub trait IntelFeed: Send + Sync {
    async fn fetch_text(&self, window: TimeWindow) -> Result<String>;
}

/// Fixed text, used when no feed URL is configured and in tests
#[derive(Debug, Clone, Default)]
pub struct StaticIntelFeed {
    text: String,
}

impl StaticIntelFeed {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

#[async_trait]
impl IntelFeed for StaticIntelFeed {
    async fn fetch_text(&self, _window: TimeWindow) -> Result<String> {
        Ok(self.text.clone())
    }
}

/// HTTP feed: `GET {url}?from=..&to=..` returning plain text
#[derive(Debug, Clone)]
pub struct HttpIntelFeed {
    url: String,
    client: reqwest::Client,
}

impl HttpIntelFeed {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| IntelligenceError::feed(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { url: url.into(), client })
    }
}

#[async_trait]
impl IntelFeed for HttpIntelFeed {
    async fn fetch_text(&self, window: TimeWindow) -> Result<String> {
        let response = self
            .client
            .get(&self.url)
            .query(&[("from", window.from.to_rfc3339()), ("to", window.to.to_rfc3339())])
            .send()
            .await
            .map_err(|e| IntelligenceError::feed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(IntelligenceError::feed(format!("HTTP {}", status)));
        }
        response.text().await.map_err(|e| IntelligenceError::feed(e.to_string()))
    }
}

/// Word valences in the AFINN style, -5 (very negative) to 5 (very positive)
static BASE_LEXICON: Lazy<HashMap<&'static str, i32>> = Lazy::new(|| {
    HashMap::from([
        // Strongly negative
        ("bankrupt", -3),
        ("bankruptcy", -3),
        ("catastrophic", -4),
        ("collapse", -3),
        ("collapsed", -3),
        ("crash", -3),
        ("crashed", -3),
        ("disaster", -2),
        ("exploit", -3),
        ("exploited", -3),
        ("fraud", -4),
        ("hack", -3),
        ("hacked", -3),
        ("insolvent", -3),
        ("panic", -3),
        ("rug", -3),
        ("scam", -4),
        ("stolen", -3),
        ("terrible", -3),
        // Negative
        ("bad", -3),
        ("bearish", -2),
        ("concern", -2),
        ("concerns", -2),
        ("decline", -2),
        ("declined", -2),
        ("delay", -1),
        ("delayed", -1),
        ("depeg", -3),
        ("drop", -1),
        ("dropped", -1),
        ("dump", -2),
        ("fail", -2),
        ("failed", -2),
        ("fear", -2),
        ("halt", -2),
        ("halted", -2),
        ("lawsuit", -2),
        ("liquidated", -2),
        ("liquidation", -2),
        ("loss", -3),
        ("losses", -3),
        ("outage", -2),
        ("plunge", -2),
        ("risk", -2),
        ("risky", -2),
        ("sell", -1),
        ("selloff", -2),
        ("slump", -2),
        ("uncertain", -1),
        ("uncertainty", -1),
        ("volatile", -1),
        ("warning", -3),
        ("weak", -2),
        ("worse", -3),
        ("worst", -3),
        // Positive
        ("adoption", 2),
        ("approve", 2),
        ("approved", 2),
        ("boost", 1),
        ("breakthrough", 3),
        ("bullish", 2),
        ("gain", 2),
        ("gains", 2),
        ("good", 3),
        ("great", 3),
        ("grow", 1),
        ("growth", 2),
        ("inflow", 1),
        ("inflows", 1),
        ("launch", 1),
        ("optimistic", 2),
        ("outperform", 2),
        ("partnership", 2),
        ("profit", 2),
        ("profitable", 2),
        ("rally", 2),
        ("record", 1),
        ("recover", 2),
        ("recovery", 2),
        ("rise", 1),
        ("soar", 2),
        ("stable", 2),
        ("strong", 2),
        ("success", 2),
        ("surge", 2),
        ("upgrade", 1),
        ("win", 4),
        // Strongly positive
        ("amazing", 4),
        ("excellent", 3),
        ("outstanding", 5),
        ("superb", 5),
    ])
});

/// Parse an AFINN-style word list: one `word<TAB>valence` entry per line.
/// Blank lines and `#` comments are skipped.
pub fn parse_lexicon(text: &str) -> Result<HashMap<String, i32>> {
    let mut lexicon = HashMap::new();
    for (index, raw) in text.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let (word, valence) = line
            .rsplit_once('\t')
            .or_else(|| line.rsplit_once(char::is_whitespace))
            .ok_or_else(|| IntelligenceError::config(format!("lexicon line {}: expected word and valence", index + 1)))?;
        let valence: i32 = valence
            .trim()
            .parse()
            .map_err(|_| IntelligenceError::config(format!("lexicon line {}: invalid valence {:?}", index + 1, valence.trim())))?;
        if !(-5..=5).contains(&valence) {
            return Err(IntelligenceError::config(format!("lexicon line {}: valence must be within -5..=5", index + 1)));
        }
        lexicon.insert(word.trim().to_lowercase(), valence);
    }
    Ok(lexicon)
}

pub fn load_lexicon_file(path: &Path) -> Result<HashMap<String, i32>> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| IntelligenceError::config(format!("cannot read lexicon {}: {}", path.display(), e)))?;
    parse_lexicon(&text)
}

/// Words that flip the valence of the next token
const NEGATORS: &[&str] = &["not", "no", "never", "dont", "don't", "isnt", "isn't", "wont", "won't", "without"];

/// Deterministic lexicon scorer
#[derive(Debug, Clone)]
pub struct SentimentScorer {
    lexicon: HashMap<String, i32>,
}

impl Default for SentimentScorer {
    fn default() -> Self {
        Self::new(&HashMap::new())
    }
}

impl SentimentScorer {
    /// Base lexicon plus `extra` entries, which override base valences
    pub fn new(extra: &HashMap<String, i32>) -> Self {
        let mut lexicon: HashMap<String, i32> = BASE_LEXICON.iter().map(|(w, v)| (w.to_string(), *v)).collect();
        for (word, valence) in extra {
            lexicon.insert(word.to_lowercase(), (*valence).clamp(-5, 5));
        }
        Self { lexicon }
    }

    /// Comparative score in `[-1, 1]`; empty text scores neutral
    pub fn score(&self, text: &str) -> Confidence {
        let lowered = text.to_lowercase();
        let tokens: Vec<&str> = lowered
            .split(|c: char| !(c.is_alphanumeric() || c == '\'' || c == '-'))
            .filter(|t| !t.is_empty())
            .collect();

        if tokens.is_empty() {
            return NEUTRAL_CONFIDENCE;
        }

        let mut total = 0i64;
        for (i, token) in tokens.iter().enumerate() {
            if let Some(&valence) = self.lexicon.get(*token) {
                let negated = i > 0 && NEGATORS.contains(&tokens[i - 1]);
                let signed = if negated { -valence } else { valence };
                total += signed as i64;
            }
        }

        (total as f64 / tokens.len() as f64).clamp(-1.0, 1.0)
    }
}

/// Why the gate answered neutral instead of scoring
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateFallback {
    Timeout,
    FeedError,
}

/// One gate evaluation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GateScore {
    pub confidence: Confidence,
    pub fallback: Option<GateFallback>,
}

/// Scores intelligence text and decides whether a trigger may proceed
pub struct ConfidenceGate {
    feed: Arc<dyn IntelFeed>,
    scorer: SentimentScorer,
    timeout: Duration,
    window: Duration,
    threshold: f64,
}

impl std::fmt::Debug for ConfidenceGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfidenceGate")
            .field("timeout", &self.timeout)
            .field("window", &self.window)
            .field("threshold", &self.threshold)
            .finish()
    }
}

/// HTTP feed when `intel_url` is set, otherwise an empty static feed
pub fn feed_from_config(config: &GateConfig) -> Result<Arc<dyn IntelFeed>> {
    Ok(match &config.intel_url {
        Some(url) => Arc::new(HttpIntelFeed::new(url, config.timeout())?),
        None => Arc::new(StaticIntelFeed::default()),
    })
}

impl ConfidenceGate {
    /// Fails only when the configured lexicon file cannot be loaded
    pub fn new(feed: Arc<dyn IntelFeed>, config: &GateConfig) -> Result<Self> {
        Ok(Self {
            feed,
            scorer: SentimentScorer::new(&config.effective_lexicon()?),
            timeout: config.timeout(),
            window: config.window(),
            threshold: config.threshold,
        })
    }

    /// Build the gate and its feed from configuration
    pub fn from_config(config: &GateConfig) -> Result<Self> {
        Self::new(feed_from_config(config)?, config)
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Fetch and score; never fails
    pub async fn score(&self) -> GateScore {
        self.score_within(self.timeout).await
    }

    /// Like [`ConfidenceGate::score`], giving up at `limit` when that comes
    /// before the configured feed timeout
    pub async fn score_within(&self, limit: Duration) -> GateScore {
        let timeout = self.timeout.min(limit);
        let window = TimeWindow::ending_now(self.window);
        match tokio::time::timeout(timeout, self.feed.fetch_text(window)).await {
            Ok(Ok(text)) => {
                let confidence = self.scorer.score(&text);
                debug!(confidence, chars = text.len(), "Scored intelligence text");
                GateScore {
                    confidence,
                    fallback: None,
                }
            }
            Ok(Err(e)) => {
                warn!(error = %e, "Intelligence feed failed, using neutral confidence");
                GateScore {
                    confidence: NEUTRAL_CONFIDENCE,
                    fallback: Some(GateFallback::FeedError),
                }
            }
            Err(_) => {
                debug!(timeout_ms = timeout.as_millis() as u64, "Intelligence feed timed out");
                GateScore {
                    confidence: NEUTRAL_CONFIDENCE,
                    fallback: Some(GateFallback::Timeout),
                }
            }
        }
    }

    /// A trigger proceeds only with confidence strictly above the threshold
    pub fn admits(&self, confidence: Confidence) -> bool {
        confidence > self.threshold
    }
}
