//! Time-based one-time codes.

pub mod generator;
pub mod validator;

pub use generator::{derive, DerivedCode, CODE_DIGITS, WINDOW_SECS};
pub use validator::{clean_secret, is_valid_secret, MIN_SECRET_LEN};
