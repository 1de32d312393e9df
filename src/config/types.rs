use serde::Deserialize;
use std::time::Duration;

/// Main configuration structure for Sumi-Harvest
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    pub resources: ResourcesConfig,
    #[serde(default)]
    pub dedup: DedupConfig,
    #[serde(default)]
    pub backoff: BackoffConfig,
    pub output: OutputConfig,
    #[serde(default, rename = "task")]
    pub tasks: Vec<TaskEntry>,
}

/// Worker pool and retry behavior
#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    /// Number of concurrent workers (and so the maximum fetches in flight)
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Retries allowed after the first attempt
    #[serde(rename = "max-retries", default = "default_max_retries")]
    pub max_retries: u32,

    /// Delay before a retry, scaled by the domain's pacing multiplier (milliseconds)
    #[serde(rename = "base-delay-ms", default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Upper bound on a single fetch (milliseconds)
    #[serde(rename = "fetch-timeout-ms", default = "default_fetch_timeout_ms")]
    pub fetch_timeout_ms: u64,

    /// Delay before a task retries leasing after a pool came up empty (milliseconds)
    #[serde(rename = "pool-retry-delay-ms", default = "default_pool_retry_delay_ms")]
    pub pool_retry_delay_ms: u64,

    /// Amount added to a task's priority value on each retry
    #[serde(rename = "retry-priority-penalty", default = "default_retry_priority_penalty")]
    pub retry_priority_penalty: u32,

    /// How long an egress resource stays out of rotation after a block
    #[serde(rename = "egress-cooldown-secs", default = "default_egress_cooldown_secs")]
    pub egress_cooldown_secs: u64,

    /// How long an identity stays out of rotation after a block
    #[serde(rename = "identity-cooldown-secs", default = "default_identity_cooldown_secs")]
    pub identity_cooldown_secs: u64,

    /// Window after an exclusion during which further blocks from the same
    /// domain are charged to the domain instead of the resources
    #[serde(rename = "domain-block-window-secs", default = "default_domain_block_window_secs")]
    pub domain_block_window_secs: u64,

    /// Persist detector state every N terminal tasks
    #[serde(rename = "persist-every", default = "default_persist_every")]
    pub persist_every: u64,
}

impl SchedulerConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }

    pub fn pool_retry_delay(&self) -> Duration {
        Duration::from_millis(self.pool_retry_delay_ms)
    }

    pub fn egress_cooldown(&self) -> Duration {
        Duration::from_secs(self.egress_cooldown_secs)
    }

    pub fn identity_cooldown(&self) -> Duration {
        Duration::from_secs(self.identity_cooldown_secs)
    }

    pub fn domain_block_window(&self) -> Duration {
        Duration::from_secs(self.domain_block_window_secs)
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            fetch_timeout_ms: default_fetch_timeout_ms(),
            pool_retry_delay_ms: default_pool_retry_delay_ms(),
            retry_priority_penalty: default_retry_priority_penalty(),
            egress_cooldown_secs: default_egress_cooldown_secs(),
            identity_cooldown_secs: default_identity_cooldown_secs(),
            domain_block_window_secs: default_domain_block_window_secs(),
            persist_every: default_persist_every(),
        }
    }
}

/// Static resource lists for the two pools
#[derive(Debug, Clone, Deserialize)]
pub struct ResourcesConfig {
    /// Proxy URLs, or "direct" for no proxy
    pub egress: Vec<String>,

    /// Client identities (user-agent strings)
    pub identities: Vec<String>,

    /// Whether pool exclusions survive a restart
    #[serde(rename = "persist-exclusions", default)]
    pub persist_exclusions: bool,
}

/// Duplicate detection settings
#[derive(Debug, Clone, Deserialize)]
pub struct DedupConfig {
    /// Number of most recent records compared for near duplicates
    #[serde(rename = "scan-window", default = "default_scan_window")]
    pub scan_window: usize,

    /// Minimum Jaccard similarity for a fuzzy duplicate
    #[serde(rename = "similarity-threshold", default = "default_similarity_threshold")]
    pub similarity_threshold: f64,

    /// Words per shingle in the similarity key
    #[serde(rename = "shingle-size", default = "default_shingle_size")]
    pub shingle_size: usize,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            scan_window: default_scan_window(),
            similarity_threshold: default_similarity_threshold(),
            shingle_size: default_shingle_size(),
        }
    }
}

/// Which pacing policy new domains start from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PolicyKind {
    QLearning,
    Proportional,
}

/// Adaptive pacing controller settings
#[derive(Debug, Clone, Deserialize)]
pub struct BackoffConfig {
    #[serde(rename = "min-multiplier", default = "default_min_multiplier")]
    pub min_multiplier: f64,

    #[serde(rename = "max-multiplier", default = "default_max_multiplier")]
    pub max_multiplier: f64,

    /// Experiences collected per domain before a learning step
    #[serde(rename = "batch-size", default = "default_batch_size")]
    pub batch_size: usize,

    #[serde(rename = "learning-rate", default = "default_learning_rate")]
    pub learning_rate: f64,

    #[serde(default = "default_discount")]
    pub discount: f64,

    /// Probability of a random action once a domain has experience
    #[serde(rename = "exploration-rate", default = "default_exploration_rate")]
    pub exploration_rate: f64,

    /// Number of recent outcomes the health ratios are computed over
    #[serde(rename = "health-window", default = "default_health_window")]
    pub health_window: usize,

    /// Force an increase whenever a block signal is observed
    #[serde(rename = "escalate-on-block", default = "default_true")]
    pub escalate_on_block: bool,

    #[serde(default = "default_policy")]
    pub policy: PolicyKind,
}

impl BackoffConfig {
    /// Clamps a multiplier into the configured bounds
    pub fn clamp(&self, multiplier: f64) -> f64 {
        multiplier.clamp(self.min_multiplier, self.max_multiplier)
    }
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            min_multiplier: default_min_multiplier(),
            max_multiplier: default_max_multiplier(),
            batch_size: default_batch_size(),
            learning_rate: default_learning_rate(),
            discount: default_discount(),
            exploration_rate: default_exploration_rate(),
            health_window: default_health_window(),
            escalate_on_block: true,
            policy: default_policy(),
        }
    }
}

/// Output configuration
#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    /// Path to the SQLite database file
    #[serde(rename = "database-path")]
    pub database_path: String,

    /// Optional path of a markdown report written after each run
    #[serde(rename = "report-path", default)]
    pub report_path: Option<String>,
}

/// A fetch task declared in the configuration file
#[derive(Debug, Clone, Deserialize)]
pub struct TaskEntry {
    pub url: String,

    /// Lower values are fetched first
    #[serde(default)]
    pub priority: u32,
}

fn default_concurrency() -> usize {
    8
}

fn default_max_retries() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    500
}

fn default_fetch_timeout_ms() -> u64 {
    30_000
}

fn default_pool_retry_delay_ms() -> u64 {
    100
}

fn default_retry_priority_penalty() -> u32 {
    1
}

fn default_egress_cooldown_secs() -> u64 {
    300
}

fn default_identity_cooldown_secs() -> u64 {
    600
}

fn default_domain_block_window_secs() -> u64 {
    60
}

fn default_persist_every() -> u64 {
    50
}

fn default_scan_window() -> usize {
    256
}

fn default_similarity_threshold() -> f64 {
    0.85
}

fn default_shingle_size() -> usize {
    4
}

fn default_min_multiplier() -> f64 {
    0.5
}

fn default_max_multiplier() -> f64 {
    2.0
}

fn default_batch_size() -> usize {
    32
}

fn default_learning_rate() -> f64 {
    0.3
}

fn default_discount() -> f64 {
    0.9
}

fn default_exploration_rate() -> f64 {
    0.05
}

fn default_health_window() -> usize {
    20
}

fn default_true() -> bool {
    true
}

fn default_policy() -> PolicyKind {
    PolicyKind::QLearning
}
