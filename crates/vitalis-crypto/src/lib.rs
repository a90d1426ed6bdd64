//! # Vitalis Crypto
//!
//! At-rest encryption for the Vitalis local store.
//!
//! - [`StoreKey`]: 32-byte ChaCha20-Poly1305 key with associated-data sealing
//! - [`StoreKeyManager`]: generate-once, load-thereafter key lifecycle
//! - [`CredentialStore`]: where the key lives (file or in-memory)

pub mod credential;
pub mod error;
pub mod store_key;

pub use credential::{
    CredentialStore, FileCredentialStore, KeyOrigin, MemoryCredentialStore, STORE_KEY_ACCOUNT,
    StoreKeyManager,
};
pub use error::{CryptoError, CryptoResult};
pub use store_key::{KEY_SIZE, NONCE_SIZE, StoreKey};
