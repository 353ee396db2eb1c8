//! Conversation threads and their persistence.
//!
//! - [`ThreadKey`] / [`SessionKeyResolver`]: map a user identifier to the key
//!   of one conversation thread
//! - [`CheckpointStore`]: keyed, append-only storage of [`ConversationState`]
//! - [`MemoryCheckpointStore`]: bounded in-memory store with idle expiry
//! - [`FileCheckpointStore`]: one JSON file per thread, usable as the
//!   backing store of the memory store
//!
//! # Example
//!
//! ```rust
//! use oracle_chat::llm::Message;
//! use oracle_chat::session::{CheckpointStore, MemoryCheckpointStore, SessionKeyResolver};
//!
//! # tokio_test_block(async {
//! let key = SessionKeyResolver::default().resolve("alice", None).unwrap();
//! assert_eq!(key.as_str(), "alice_42");
//!
//! let store = MemoryCheckpointStore::default();
//! store.append(&key, &[Message::user("Hello!")]).await.unwrap();
//! assert_eq!(store.load(&key).await.unwrap().unwrap().len(), 1);
//! # });
//! # fn tokio_test_block<F: std::future::Future>(f: F) -> F::Output {
//! #     tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(f)
//! # }
//! ```

mod checkpoint;
mod file_store;
mod keys;

pub use checkpoint::{
    CheckpointStore, ConversationState, DEFAULT_IDLE_TIMEOUT, DEFAULT_MAX_THREADS,
    MemoryCheckpointStore,
};
pub use file_store::FileCheckpointStore;
pub use keys::{
    DEFAULT_THREAD_INDEX, FixedThreadIndex, SessionKeyResolver, ThreadIndexAllocator, ThreadKey,
};
