pub mod error;
pub mod key;
pub mod types;

pub use error::{CacheError, Result};
pub use key::{CacheParams, MAX_KEY_LEN, ParamValue};
pub use types::{CacheEntry, CacheKey, Category, ClearReport, now_millis};
