pub mod error;
pub mod ids;
pub mod store;
pub mod types;

pub use error::{StoreError, StoreResult};
pub use ids::{MessageId, ThreadId};
pub use store::{STORE_DIRECTORY_NAME, THREADS_FILE_NAME, ThreadStore};
pub use types::{
    DEFAULT_THREAD_TITLE, Message, Role, TITLE_MAX_CHARS, Thread, current_unix_timestamp_seconds,
};
