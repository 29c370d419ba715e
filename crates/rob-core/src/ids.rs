//! Newtype identifiers for model components.
//!
//! Ids are handed out by [`crate::Model`] in insertion order and index
//! directly into the model's component vectors.

use serde::{Deserialize, Serialize};

macro_rules! define_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        pub struct $name(usize);

        impl $name {
            pub fn new(index: usize) -> Self {
                Self(index)
            }

            pub fn index(self) -> usize {
                self.0
            }
        }
    };
}

define_id!(
    /// Identifier of a decision variable.
    VarId
);
define_id!(
    /// Identifier of an uncertain parameter.
    UncId
);
define_id!(
    /// Identifier of an uncertainty region.
    RegionId
);
define_id!(
    /// Identifier of a constraint.
    ConsId
);
define_id!(
    /// Identifier of an objective.
    ObjId
);
