pub mod config;
pub mod error;
pub mod normalize;
pub mod types;

pub use config::{AppConfig, FileConfig, IngestSettings, PathsConfig, StagesConfig, UnresolvedPolicy};
pub use error::IngestError;
pub use normalize::{normalize, normalize_opt, NormalizedKey};
pub use types::*;
