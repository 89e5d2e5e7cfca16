use crate::fields::Fields;
use crate::group::GroupSpec;
use crate::operation::Operation;
use crate::tuple::Tuple;
use std::sync::Arc;

/// One entry of the pipeline's node table.
#[derive(Clone, Debug)]
pub enum Node {
    /// In-memory tuples with their declared fields.
    Source {
        name: String,
        fields: Fields,
        data: Arc<Vec<Tuple>>,
    },

    /// Per-record operation (map, filter, assertion).
    Each(Operation),

    /// Per-group aggregation, chained after a group or another aggregation.
    Every(Operation),

    /// Multi-branch grouping / join; one input per branch.
    Group(GroupSpec),
}

impl Node {
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Source { name, .. } => name,
            Self::Each(op) | Self::Every(op) => &op.name,
            Self::Group(spec) => &spec.name,
        }
    }

    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Source { .. } => "Source",
            Self::Each(_) => "Each",
            Self::Every(_) => "Every",
            Self::Group(_) => "Group",
        }
    }
}
