mod credential_set;
mod keypair;
mod short_id;

pub use credential_set::CredentialSet;
pub use keypair::{KeyPair, KeyPairError, PrivateKey, PublicKey};
pub use short_id::{generate_short_ids, ShortId, ShortIdError};
