//! Collection catalog.
//!
//! Everything the gateway knows about locally stored collections is derived
//! from the content store on each request:
//!
//! - [`discover()`] walks the store and yields one [`ArtifactRecord`] per
//!   deployed archive whose property bag identifies it;
//! - [`VersionGroup`] holds every version of one `namespace.name`, keeping
//!   track of the latest one;
//! - [`Catalog`] folds records into groups.
//!
//! Versions order by semantic-version precedence, except that a prerelease
//! never outranks a release (`1.0.0-dev0 < 0.0.1`).

mod catalog;
mod discover;
pub mod error;
mod group;
mod properties;
mod record;

pub use crate::catalog::Catalog;
pub use crate::discover::{Filter, discover, parse_filename};
pub use crate::group::VersionGroup;
pub use crate::properties::CollectionProperties;
pub use crate::record::{ArtifactRecord, precedence};
