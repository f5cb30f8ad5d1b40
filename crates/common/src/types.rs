use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! id_type {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{:.8}", self.0.simple().to_string())
            }
        }
    };
}

id_type!(
    /// Unique identifier for a spatial world.
    WorldId
);

id_type!(
    /// Unique identifier for a region of a world. Survives merges: the
    /// destination keeps its id, the source id is retired.
    RegionId
);

id_type!(
    /// Unique identifier for a registered loader.
    LoaderId
);
