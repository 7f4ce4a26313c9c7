//! Centralized constants for geminichat.
//! Magic numbers, endpoint strings, and limits live here.

// ─── Models ───────────────────────────────────────────────────────────────────

pub mod models {
    pub const DEFAULT_MODEL: &str = "gemini-2.5-flash";

    /// Models offered by the `/model` command listing.
    pub const KNOWN_MODELS: &[&str] = &[
        "gemini-2.5-flash",
        "gemini-2.5-pro",
        "gemini-2.0-flash",
        "gemini-2.0-flash-lite",
    ];
}

// ─── API Endpoints ────────────────────────────────────────────────────────────

pub mod endpoints {
    pub const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com";
    pub const API_VERSION: &str = "v1beta";
    pub const API_KEY_HEADER: &str = "x-goog-api-key";
}

// ─── Default Settings ─────────────────────────────────────────────────────────

pub mod defaults {
    pub const API_KEY_ENV: &str = "GOOGLE_API_KEY";
    pub const TEMPERATURE: f32 = 0.7;
    pub const TOP_P: f32 = 0.95;
    pub const ROLLBACK_USER_TURN_ON_FAILURE: bool = true;
}

// ─── Limits ───────────────────────────────────────────────────────────────────

pub mod limits {
    pub const MAX_THINKING_BUDGET: u32 = 24_576;
}

// ─── Context Caching ──────────────────────────────────────────────────────────

pub mod caching {
    pub const POLL_INTERVAL_SECS: u64 = 10;
    pub const MAX_WAIT_SECS: u64 = 600;
    pub const DEFAULT_TTL_SECS: u64 = 3_600;

    /// TTL presets offered when creating a cache.
    pub const TTL_PRESETS: &[(&str, u64)] = &[
        ("5m", 300),
        ("1h", 3_600),
        ("6h", 21_600),
        ("12h", 43_200),
        ("1d", 86_400),
    ];
}

// ─── Rendering ────────────────────────────────────────────────────────────────

pub mod messages {
    pub const BLOCKED_PREFIX: &str = "Response blocked due to: ";
    pub const EMPTY_RESPONSE: &str = "No text content received.";
}
