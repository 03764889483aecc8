use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// Ids persist as bare uuid strings; v7 keeps them roughly creation-ordered.
macro_rules! define_store_id {
    ($name:ident) => {
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            pub fn new_v7() -> Self {
                Self(Uuid::now_v7())
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(formatter, "{}", self.0)
            }
        }
    };
}

define_store_id!(ThreadId);
define_store_id!(MessageId);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_serialize_as_their_display_form() {
        let id = MessageId::new_v7();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{id}\""));

        let decoded: MessageId = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, id);
    }

    #[test]
    fn fresh_ids_are_distinct() {
        assert_ne!(ThreadId::new_v7(), ThreadId::new_v7());
    }
}
