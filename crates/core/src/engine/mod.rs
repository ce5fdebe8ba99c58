//! Engine configuration document: synthesis, persistence and reload.

mod document;
mod reload;
mod synthesizer;

pub use document::{
    default_document, load_template, merge_defaults, ClientEntry, ConfigDocument,
    RealitySettings, INBOUND_TAG,
};
pub use reload::{CommandControl, EngineControl, ReloadController, ReloadPath};
pub use synthesizer::ConfigSynthesizer;
