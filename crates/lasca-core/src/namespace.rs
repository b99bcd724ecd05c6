use crate::id::Id;

/// Namespace for queue messages. Created on the main shard and read-only
/// afterwards; name uniqueness is not enforced.
#[derive(Debug, Clone, PartialEq)]
pub struct Namespace {
    pub id: Id,
    pub name: String,
}
