pub mod capability;
pub mod engine;
pub mod store;

pub use capability::{AccountGrant, AppGrant, Capability, CookbookGrant, Shape, SystemGrant};
pub use engine::{PermissionEngine, ResourceRef};
pub use store::{PermissionStore, SqlitePermissionStore};

#[derive(Debug, thiserror::Error)]
pub enum PermissionError {
    #[error("sqlite open failed at {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: rusqlite::Error,
    },
    #[error("failed to create permissions database parent {path}: {source}")]
    CreateParent {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("sqlite statement failed: {source}")]
    Sql {
        #[source]
        source: rusqlite::Error,
    },
    #[error("permission lookup failed for `{capability}`: {message}")]
    LookupFailed {
        capability: Capability,
        message: String,
    },
    #[error("capability `{capability}` is checked against {} records, not {requested}", .capability.shape())]
    WrongShape {
        capability: Capability,
        requested: Shape,
    },
    #[error("unknown capability `{0}`")]
    UnknownCapability(String),
    #[error("unknown cookbook or app `{0}`")]
    UnknownResource(String),
}
