//! Document store paths.
//!
//! A path is a `/`-separated list of segments that alternates between
//! collection names and document ids: `tenants/{tenantId}/zones/{zoneId}`.
//! Collection paths have an odd number of segments, document paths an even
//! number. Leading and trailing slashes are ignored; empty segments are
//! rejected.

use core::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::id::{DocumentId, TenantId, ZoneId};

/// Top-level collection holding tenant records.
pub const TENANTS_COLLECTION: &str = "tenants";

/// Collection of zones under a tenant.
pub const ZONES_COLLECTION: &str = "zones";

/// Errors that can occur when parsing a path.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum PathError {
    /// The path has no segments.
    #[error("path cannot be empty")]
    Empty,
    /// Two slashes with nothing between them.
    #[error("path contains an empty segment: {0}")]
    EmptySegment(String),
    /// A collection path was expected.
    #[error("not a collection path (odd number of segments required): {0}")]
    NotACollection(String),
    /// A document path was expected.
    #[error("not a document path (even number of segments required): {0}")]
    NotADocument(String),
    /// An id that would span more than one segment.
    #[error("invalid path segment: {0:?}")]
    InvalidSegment(String),
}

/// Check that an id can stand as a single path segment.
///
/// # Errors
///
/// Returns `PathError::InvalidSegment` if the id is empty, contains `/`, or
/// is `.` or `..`.
pub fn validate_segment(id: &str) -> Result<&str, PathError> {
    if id.is_empty() || id.contains('/') || id == "." || id == ".." {
        return Err(PathError::InvalidSegment(id.to_owned()));
    }
    Ok(id)
}

fn segments(raw: &str) -> Result<Vec<String>, PathError> {
    let trimmed = raw.trim_matches('/');
    if trimmed.is_empty() {
        return Err(PathError::Empty);
    }
    trimmed
        .split('/')
        .map(|segment| {
            if segment.is_empty() {
                Err(PathError::EmptySegment(raw.to_owned()))
            } else {
                Ok(segment.to_owned())
            }
        })
        .collect()
}

/// Path to a collection, e.g. `tenants/t1/zones`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CollectionPath(String);

impl CollectionPath {
    /// Parse a collection path.
    ///
    /// # Errors
    ///
    /// Returns an error if the path is empty, has an empty segment, or has
    /// an even number of segments.
    pub fn parse(raw: &str) -> Result<Self, PathError> {
        let parts = segments(raw)?;
        if parts.len() % 2 == 0 {
            return Err(PathError::NotACollection(raw.to_owned()));
        }
        Ok(Self(parts.join("/")))
    }

    /// The root `tenants` collection.
    #[must_use]
    pub fn tenants() -> Self {
        Self(TENANTS_COLLECTION.to_owned())
    }

    /// Zones belonging to a tenant: `tenants/{tenantId}/zones`.
    #[must_use]
    pub fn zones(tenant_id: &TenantId) -> Self {
        Self::tenants().doc(tenant_id.as_str()).collection(ZONES_COLLECTION)
    }

    /// A dependent sub-collection of a zone:
    /// `tenants/{tenantId}/zones/{zoneId}/{name}`.
    #[must_use]
    pub fn zone_subcollection(tenant_id: &TenantId, zone_id: &ZoneId, name: &str) -> Self {
        Self::zones(tenant_id)
            .doc(zone_id.as_str())
            .collection(name)
    }

    /// Path of a document directly inside this collection.
    #[must_use]
    pub fn doc(&self, id: &str) -> DocumentPath {
        DocumentPath(format!("{}/{id}", self.0))
    }

    /// Collection name (the last segment).
    #[must_use]
    pub fn name(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or(&self.0)
    }

    /// Document that owns this collection, if it is not a root collection.
    #[must_use]
    pub fn parent(&self) -> Option<DocumentPath> {
        self.0
            .rsplit_once('/')
            .map(|(parent, _)| DocumentPath(parent.to_owned()))
    }

    /// The path as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Path to a single document, e.g. `tenants/t1/zones/z1`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DocumentPath(String);

impl DocumentPath {
    /// Parse a document path.
    ///
    /// # Errors
    ///
    /// Returns an error if the path is empty, has an empty segment, or has
    /// an odd number of segments.
    pub fn parse(raw: &str) -> Result<Self, PathError> {
        let parts = segments(raw)?;
        if parts.len() % 2 != 0 {
            return Err(PathError::NotADocument(raw.to_owned()));
        }
        Ok(Self(parts.join("/")))
    }

    /// Tenant record: `tenants/{tenantId}`.
    #[must_use]
    pub fn tenant(tenant_id: &TenantId) -> Self {
        CollectionPath::tenants().doc(tenant_id.as_str())
    }

    /// Zone record: `tenants/{tenantId}/zones/{zoneId}`.
    #[must_use]
    pub fn zone(tenant_id: &TenantId, zone_id: &ZoneId) -> Self {
        CollectionPath::zones(tenant_id).doc(zone_id.as_str())
    }

    /// Sub-collection nested under this document.
    #[must_use]
    pub fn collection(&self, name: &str) -> CollectionPath {
        CollectionPath(format!("{}/{name}", self.0))
    }

    /// Collection containing this document.
    #[must_use]
    pub fn parent(&self) -> CollectionPath {
        let parent = self
            .0
            .rsplit_once('/')
            .map_or_else(String::new, |(parent, _)| parent.to_owned());
        CollectionPath(parent)
    }

    /// Document id (the last segment).
    #[must_use]
    pub fn id(&self) -> DocumentId {
        DocumentId::new(self.0.rsplit('/').next().unwrap_or(&self.0))
    }

    /// The path as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

macro_rules! impl_path_conversions {
    ($name:ident) => {
        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl FromStr for $name {
            type Err = PathError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::parse(s)
            }
        }

        impl TryFrom<String> for $name {
            type Error = PathError;

            fn try_from(s: String) -> Result<Self, Self::Error> {
                Self::parse(&s)
            }
        }

        impl From<$name> for String {
            fn from(path: $name) -> Self {
                path.0
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

impl_path_conversions!(CollectionPath);
impl_path_conversions!(DocumentPath);
