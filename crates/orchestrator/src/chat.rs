//! Ingress guard for chat-originated objectives.
//!
//! Chat intermediaries tend to paraphrase a reply and send it back as if it
//! were a new request. Text passing through here is cleaned, then checked
//! for echo shape, sender cooldown and exact repeats, in that order.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

const TASK_ID_PATTERN: &str = r"(?i)task_[0-9a-f]{10,}";
const EMOJI_PATTERN: &str = concat!(
    r"[\x{1F300}-\x{1F9FF}\x{2600}-\x{27BF}\x{FE00}-\x{FE0F}",
    r"\x{1FA00}-\x{1FA6F}\x{1FA70}-\x{1FAFF}\x{2702}-\x{27B0}\x{200D}]"
);
const EMOJI_ECHO_THRESHOLD: usize = 3;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ChatGuardConfig {
    pub cooldown_secs: u64,
    pub dedup_window_secs: u64,
    /// Above this many pending chat tasks the whole chat table is dropped.
    pub max_pending: usize,
    /// Lowercase substrings that mark text as one of our own replies.
    pub echo_patterns: Vec<String>,
    /// Words a genuine request is expected to contain.
    pub genuine_keywords: Vec<String>,
    /// Leading verbs that mark text as a genuine request.
    pub command_verbs: Vec<String>,
    /// Resource links that mark text as a genuine request.
    pub resource_url_pattern: String,
    /// Stripped from the start of the text before any check.
    pub mention_prefix_pattern: String,
}

impl Default for ChatGuardConfig {
    fn default() -> Self {
        Self {
            cooldown_secs: 30,
            dedup_window_secs: 120,
            max_pending: 5,
            echo_patterns: DEFAULT_ECHO_PATTERNS.iter().map(|s| s.to_string()).collect(),
            genuine_keywords: DEFAULT_GENUINE_KEYWORDS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            command_verbs: DEFAULT_COMMAND_VERBS.iter().map(|s| s.to_string()).collect(),
            resource_url_pattern: r"https?://github\.com/".to_string(),
            mention_prefix_pattern: r"^@agent1[qpzry9x8gf2tvdw0s3jn54khce6mua7l]{59}\s*"
                .to_string(),
        }
    }
}

/// The `[chat]` section: guard tunables plus how chat objectives are routed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ChatConfig {
    #[serde(flatten)]
    pub guard: ChatGuardConfig,
    /// Dispatch to any paired device when the sender has none of its own.
    pub fallback_to_any_device: bool,
    /// Run the plan in-process when no device can be resolved.
    pub local_fallback: bool,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            guard: ChatGuardConfig::default(),
            fallback_to_any_device: true,
            local_fallback: false,
        }
    }
}

const DEFAULT_COMMAND_VERBS: &[&str] = &[
    "generate", "analyze", "analyse", "review", "audit", "check", "inspect", "scan", "clone",
    "create", "build", "run", "test", "summarize", "summarise", "compare", "look", "give", "get",
    "show", "find", "list", "tell", "explain", "help", "what", "how", "can",
];

const DEFAULT_GENUINE_KEYWORDS: &[&str] = &[
    "generate", "weekly", "report", "analyze", "analyse", "review", "audit", "health", "score",
    "check", "inspect", "github.com", "repo", "clone", "scan", "hello", "hi", "help", "what",
    "how", "create", "build", "run", "test", "summary", "status",
];

const DEFAULT_ECHO_PATTERNS: &[&str] = &[
    "task dispatched",
    "task executed",
    "execution complete",
    "standing by for results",
    "awaiting exec",
    "awaiting result",
    "awaiting execution",
    "report generation dispatched",
    "report complete!",
    "report dispatched",
    "report mode activated",
    "report generated!",
    "report delivered!",
    "report in flight",
    "report in motion",
    "report landed",
    "report creation initiated",
    "mission running",
    "mission accomplished",
    "mission unclear",
    "mission should i execute",
    "intel compiling",
    "pipeline:",
    "pipeline running",
    "pipeline active",
    "repos scanned",
    "repos scanning",
    "gen + post",
    "scan_directory",
    "generate_report",
    "post_summary",
    "clone_repo",
    "analyze_repo",
    "generate_health_report",
    "wait for it",
    "spinning in loops",
    "looping through messages",
    "breaking the cyc",
    "stuck in the recursion",
    "ready for slack",
    "slack integration pending",
    "slack blocked",
    "slack posting",
    "integration not configured",
    "standing by for your",
    "standing by!",
    "what mission should i",
    "what do you want me to do",
    "what should i do next",
    "no objective received",
    "no directive received",
    "no task received",
    "i need instructions",
    "give me a job",
    "hold up",
    "commits tracked",
    "commits captured",
    "commits logged",
    "commits across",
    "weekly report generated",
    "weekly scan done",
    "three repos",
    "3 repos scanned",
    "scan complete but empty",
    "ghost town",
    "ready when you are",
    "ready to rock",
    "ready to post",
    "let's go!",
    "let's ship",
    "let's execute",
    "let's roll",
    "let's complete",
    "rockin' the commits",
    "documentation is the breakfast",
    "step pipeline:",
    "-step pipeline",
    "weekly dev intel",
    "dev intel across",
    "data-pipeline:",
    "mission complete!",
    "drop your mission",
    "deploy!",
    "no objective detected",
    "summarise_text",
    "standing by",
    "scan complete",
    "# weekly dev report",
    "**period**:",
    "was rejected",
    "policy check failed",
    "no paired device",
    "could not reach",
    "planning failed",
    "result acknowledged",
];

/// Why a chat message was dropped without reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Suppression {
    Empty,
    Echo,
    Cooldown,
    Duplicate,
}

impl fmt::Display for Suppression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Suppression::Empty => "empty after cleaning",
            Suppression::Echo => "echo of an earlier reply",
            Suppression::Cooldown => "sender in cooldown",
            Suppression::Duplicate => "duplicate text",
        })
    }
}

#[derive(Debug, Default)]
struct GuardState {
    last_dispatch: HashMap<String, Instant>,
    seen: HashMap<String, Instant>,
}

#[derive(Debug)]
pub struct ChatGuard {
    config: ChatGuardConfig,
    mention_prefix: Regex,
    command_verbs: Regex,
    genuine_keywords: Regex,
    resource_url: Regex,
    task_id: Regex,
    emoji: Regex,
    state: Mutex<GuardState>,
}

impl ChatGuard {
    pub fn new(config: ChatGuardConfig) -> Result<Self, regex::Error> {
        let command_verbs = word_alternation("^", &config.command_verbs)?;
        let genuine_keywords = word_alternation("", &config.genuine_keywords)?;
        Ok(Self {
            mention_prefix: Regex::new(&config.mention_prefix_pattern)?,
            resource_url: RegexBuilder::new(&config.resource_url_pattern)
                .case_insensitive(true)
                .build()?,
            task_id: Regex::new(TASK_ID_PATTERN)?,
            emoji: Regex::new(EMOJI_PATTERN)?,
            command_verbs,
            genuine_keywords,
            config,
            state: Mutex::new(GuardState::default()),
        })
    }

    pub fn config(&self) -> &ChatGuardConfig {
        &self.config
    }

    /// Strips a leading mention and surrounding whitespace.
    pub fn clean(&self, text: &str) -> String {
        self.mention_prefix.replace(text.trim(), "").trim().to_string()
    }

    /// Heuristic only: a leading command verb or a resource link always
    /// passes; otherwise reply-shaped text, task ids, emoji runs or a lack
    /// of any request keyword mark the text as an echo.
    pub fn is_echo(&self, text: &str) -> bool {
        let cleaned = self.clean(text);
        if self.command_verbs.is_match(&cleaned) || self.resource_url.is_match(text) {
            return false;
        }

        let lower = cleaned.to_lowercase();
        if self
            .config
            .echo_patterns
            .iter()
            .any(|p| !p.is_empty() && lower.contains(&p.to_lowercase()))
        {
            return true;
        }
        if self.task_id.is_match(text) {
            return true;
        }
        if self.emoji.find_iter(text).count() >= EMOJI_ECHO_THRESHOLD {
            return true;
        }
        !self.genuine_keywords.is_match(&cleaned)
    }

    pub fn admit(&self, sender: &str, text: &str) -> Result<String, Suppression> {
        self.admit_at(sender, text, Instant::now())
    }

    /// Runs the clean, echo, cooldown and dedup checks. On success returns
    /// the cleaned text and remembers it for the dedup window.
    pub fn admit_at(&self, sender: &str, text: &str, now: Instant) -> Result<String, Suppression> {
        let cleaned = self.clean(text);
        if cleaned.is_empty() {
            return Err(Suppression::Empty);
        }
        if self.is_echo(&cleaned) {
            return Err(Suppression::Echo);
        }

        let cooldown = Duration::from_secs(self.config.cooldown_secs);
        let dedup = Duration::from_secs(self.config.dedup_window_secs);
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state
            .last_dispatch
            .retain(|_, at| now.saturating_duration_since(*at) < cooldown);
        state
            .seen
            .retain(|_, at| now.saturating_duration_since(*at) < dedup);

        if state.last_dispatch.contains_key(sender) {
            return Err(Suppression::Cooldown);
        }

        let digest = hex::encode(Sha256::digest(cleaned.as_bytes()));
        if state.seen.contains_key(&digest) {
            return Err(Suppression::Duplicate);
        }
        state.seen.insert(digest, now);
        Ok(cleaned)
    }

    /// Starts the cooldown window for `sender`.
    pub fn record_dispatch(&self, sender: &str) {
        self.record_dispatch_at(sender, Instant::now());
    }

    pub fn record_dispatch_at(&self, sender: &str, now: Instant) {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .last_dispatch
            .insert(sender.to_string(), now);
    }
}

fn word_alternation(anchor: &str, words: &[String]) -> Result<Regex, regex::Error> {
    let alternation = words
        .iter()
        .filter(|w| !w.trim().is_empty())
        .map(|w| regex::escape(w.trim()))
        .collect::<Vec<_>>()
        .join("|");
    // An empty list must match nothing, not everything.
    let pattern = if alternation.is_empty() {
        r"\b\B".to_string()
    } else {
        format!(r"{anchor}\b(?:{alternation})\b")
    };
    RegexBuilder::new(&pattern).case_insensitive(true).build()
}
