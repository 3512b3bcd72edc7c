//! Exit codes of the helper binary.
//! Library failures use `VaultLoginError::exit_code()` (1-6); these cover the rest.

pub const SUCCESS: i32 = 0;
pub const NOT_IMPLEMENTED: i32 = 1; // store/erase/list
pub const INTERNAL_ERROR: i32 = 1; // stdin or output failure
