pub mod app_config;
pub mod config;
pub mod facets;
pub mod kontragents;
pub mod media;
pub mod orders;
pub mod paging;
pub mod password;
pub mod slug;

use thiserror::Error;

pub use app_config::{AppConfig, Environment};
pub use config::{load_app_config, load_app_config_from_env};
pub use facets::{Facet, FacetKind, FacetOption, FilterError, FilterTarget};
pub use kontragents::{KontragentError, KontragentIdentity, OwnershipForm};
pub use orders::{OrderError, OrderStatus, PricedLine};
pub use paging::Page;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    #[error("invalid value for {var}: {reason}")]
    InvalidEnvVar { var: String, reason: String },
}
