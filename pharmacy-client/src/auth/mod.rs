//! Authentication and session lifecycle.
//!
//! - [`token`]: JWT expiry inspection (no signature verification)
//! - [`session`]: credentials, profile, and status types
//! - [`storage`]: persistence port and adapters
//! - [`manager`]: login, logout, refresh, and the authenticated request path
//! - [`scheduler`]: background refresh ahead of expiry

pub mod manager;
pub mod scheduler;
pub mod session;
pub mod storage;
pub mod token;


pub use manager::SessionManager;
pub use scheduler::RefreshScheduler;
pub use session::{AuthStatus, Role, SecretToken, Session, UserProfile};
pub use storage::{FileStore, MemoryStore, PersistedSession, SessionStore};
pub use token::{TokenClaims, decode_claims, is_token_valid, refresh_delay, remaining_lifetime};
