//! Shared constants for the integration tests

// ============================================================================
// Library
// ============================================================================

pub const ALBUM_TITLE: &str = "Kind of Blue";
pub const ALBUM_ARTIST: &str = "Miles Davis";

/// Duration every agreeing mock provider reports, in seconds.
pub const AGREED_DURATION: i32 = 245;

// ============================================================================
// Timing
// ============================================================================

/// Upper bound for any state change the tests wait on.
pub const WAIT_TIMEOUT_MS: u64 = 5_000;
