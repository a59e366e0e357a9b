//! Identifier types.

/// A network port number.
pub type Port = u16;

/// The phleet id of one running process participating in the cluster.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    serde::Serialize,
    serde::Deserialize,
)]
#[serde(transparent)]
pub struct ComponentId(pub i32);

impl std::fmt::Display for ComponentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "component:{}", self.0)
    }
}

impl From<i32> for ComponentId {
    fn from(id: i32) -> Self {
        Self(id)
    }
}

/// The correlation tag of an asynchronous request.
///
/// A component hands this out with a request and gets it back on the
/// matching reply, which may arrive much later (pending service requests,
/// release notifications).
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    serde::Serialize,
    serde::Deserialize,
)]
#[serde(transparent)]
pub struct MatchTag(pub i32);

impl std::fmt::Display for MatchTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "match:{}", self.0)
    }
}

impl From<i32> for MatchTag {
    fn from(tag: i32) -> Self {
        Self(tag)
    }
}
