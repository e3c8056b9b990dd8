//! Anti-bot challenge handling: detection, the bypass state machine and
//! per-page stealth overrides

pub mod detect;
pub mod machine;
pub mod stealth;

pub use detect::{classify_page, has_error_markers, has_valid_content, is_challenge_page, PageVerdict};
pub use machine::{transition, BypassConfig, BypassEvent, BypassState, Navigator};
