//! Persistence for the user roster and the credential set.
//!
//! Stores are passed explicitly to whoever needs them; there is no ambient
//! global handle.

mod file;
mod memory;
mod traits;

pub use file::{write_atomic, FileStore};
pub use memory::MemoryStore;
pub use traits::{CredentialStore, PanelStore, UserStore};
