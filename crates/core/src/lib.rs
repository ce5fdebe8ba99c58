pub mod credentials;
pub mod engine;
pub mod links;
pub mod panel;
pub mod presence;
pub mod retention;
pub mod rng;
pub mod rotation;
pub mod routing;
pub mod scheduler;
pub mod store;

pub use credentials::{
    generate_short_ids, CredentialSet, KeyPair, KeyPairError, PrivateKey, PublicKey, ShortId,
    ShortIdError,
};

// Re-export engine types
pub use engine::{
    default_document, load_template, merge_defaults, ClientEntry, CommandControl, ConfigDocument,
    ConfigSynthesizer, EngineControl, RealitySettings, ReloadController, ReloadPath,
};

// Re-export link types
pub use links::{AddressSource, Dialect, EncodedLink, LinkEncoder, SubscriptionLinks, VlessDescriptor};

pub use panel::{
    NewUser, Panel, PanelBuilder, SyncRecord, SyncStatus, Synced, TickOutcome, UserStats,
    UserUpdate,
};
pub use presence::{NoPresence, PresenceSource, StaticPresence};
pub use retention::{sweep_engine_logs, SweepReport};
pub use rng::{OsRandom, RandomSource, SeededRandom};
pub use rotation::{CredentialRotator, RotationOutcome, RotationSettings};
pub use routing::{RoutingConfig, RoutingPolicy, RoutingRule};
pub use scheduler::Scheduler;
pub use store::{CredentialStore, FileStore, MemoryStore, PanelStore, UserStore};
