//! Type-safe row identifiers.
//!
//! Every collection owned by the backend is keyed by a UUID. Each id is a
//! newtype around [`uuid::Uuid`] so that a ticket id can never be passed
//! where a user id is expected.

use std::fmt;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

macro_rules! row_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema,
        )]
        #[serde(transparent)]
        pub struct $name(uuid::Uuid);

        impl $name {
            /// Creates a new random id (UUID v4).
            #[must_use]
            pub fn new() -> Self {
                Self(uuid::Uuid::new_v4())
            }

            /// Creates an id from an existing [`uuid::Uuid`].
            #[must_use]
            pub const fn from_uuid(uuid: uuid::Uuid) -> Self {
                Self(uuid)
            }

            /// Returns the inner [`uuid::Uuid`].
            #[must_use]
            pub const fn as_uuid(&self) -> &uuid::Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<uuid::Uuid> for $name {
            fn from(uuid: uuid::Uuid) -> Self {
                Self(uuid)
            }
        }

        impl From<$name> for uuid::Uuid {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl std::str::FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                s.parse().map(Self)
            }
        }
    };
}

row_id!(
    /// Identifier of an auth user and their `profiles` row.
    UserId
);
row_id!(
    /// Identifier of a `tickets` row.
    TicketId
);
row_id!(
    /// Identifier of a `purchases` row.
    PurchaseId
);
row_id!(
    /// Identifier of a `wallet_transactions` row.
    TransactionId
);
row_id!(
    /// Identifier of a `cases` row.
    CaseId
);
row_id!(
    /// Identifier of a `daily_vouchers` row.
    VoucherId
);

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn new_generates_unique_ids() {
        assert_ne!(TicketId::new(), TicketId::new());
    }

    #[test]
    fn display_is_uuid_format() {
        let s = format!("{}", UserId::new());
        assert_eq!(s.len(), 36);
        assert!(s.contains('-'));
    }

    #[test]
    fn serializes_as_bare_uuid() {
        let uuid = uuid::Uuid::new_v4();
        let id = PurchaseId::from_uuid(uuid);
        let Ok(json) = serde_json::to_string(&id) else {
            panic!("serialization failed");
        };
        assert_eq!(json, format!("\"{uuid}\""));
    }

    #[test]
    fn parses_from_str() {
        let uuid = uuid::Uuid::new_v4();
        let Ok(id) = uuid.to_string().parse::<VoucherId>() else {
            panic!("parse failed");
        };
        assert_eq!(*id.as_uuid(), uuid);
        assert!("not-a-uuid".parse::<VoucherId>().is_err());
    }
}
