use std::time::Duration;

/// Runtime-wide settings shared by the listener registry and router.
///
/// Values resolve from the environment (through `dotenvy`) when not set
/// explicitly: `CHOREO_TOPIC_PREFIX`, `CHOREO_GROUP_ID`, `CHOREO_API_KEY`.
#[derive(Clone, Debug)]
pub struct RuntimeConfig {
    /// Namespace prefix applied to every topic on the wire.
    pub topic_prefix: String,
    /// Consumer group id handed to the broker per subscription.
    pub group_id: String,
    /// Optional tenant/API key stamped into every envelope.
    pub api_key: Option<String>,
    /// Upper bound on waiting for a new consumption task to confirm it
    /// started. Registration blocks at most this long.
    pub subscribe_timeout: Duration,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        dotenvy::dotenv().ok();
        Self {
            topic_prefix: std::env::var("CHOREO_TOPIC_PREFIX").unwrap_or_default(),
            group_id: std::env::var("CHOREO_GROUP_ID")
                .unwrap_or_else(|_| "choreo-consumer".to_string()),
            api_key: std::env::var("CHOREO_API_KEY").ok(),
            subscribe_timeout: Duration::from_secs(5),
        }
    }
}

impl RuntimeConfig {
    #[must_use]
    pub fn with_topic_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.topic_prefix = prefix.into();
        self
    }

    #[must_use]
    pub fn with_group_id(mut self, group_id: impl Into<String>) -> Self {
        self.group_id = group_id.into();
        self
    }

    #[must_use]
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    #[must_use]
    pub fn with_subscribe_timeout(mut self, timeout: Duration) -> Self {
        self.subscribe_timeout = timeout;
        self
    }

    /// The wire form of a logical topic.
    pub fn prefixed_topic(&self, topic: &str) -> String {
        format!("{}{topic}", self.topic_prefix)
    }
}
