// Models module - Database entity representations

use chrono::{Days, NaiveDate};

/// Longest plan duration or maintenance frequency accepted, in days
pub const MAX_PERIOD_DAYS: i32 = 3650;

/// `date + days`, or `None` when `days` is negative or the result is out of range
pub fn add_days(date: NaiveDate, days: i64) -> Option<NaiveDate> {
    let days = u64::try_from(days).ok()?;
    date.checked_add_days(Days::new(days))
}

/// Error returned when a TEXT column holds a value outside its enum
#[derive(Debug, Clone, thiserror::Error)]
#[error("unknown {kind} value: {value}")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

/// Declares an enum stored as a TEXT column and sent over JSON as the same string.
///
/// Row structs decode these with `#[sqlx(try_from = "String")]` and queries bind
/// `value.as_str()`.
macro_rules! text_enum {
    (
        $(#[$meta:meta])*
        pub enum $name:ident {
            $($variant:ident => $text:literal),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
        pub enum $name {
            $(
                #[serde(rename = $text)]
                $variant,
            )+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub const fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text,)+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = $crate::models::UnknownVariant;

            fn from_str(value: &str) -> Result<Self, Self::Err> {
                match value {
                    $($text => Ok($name::$variant),)+
                    other => Err($crate::models::UnknownVariant {
                        kind: stringify!($name),
                        value: other.to_string(),
                    }),
                }
            }
        }

        impl TryFrom<String> for $name {
            type Error = $crate::models::UnknownVariant;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                value.parse()
            }
        }
    };
}

pub mod gym_class;
pub mod inventory;
pub mod maintenance;
pub mod member;
pub mod membership;
pub mod membership_request;
pub mod notification;
pub mod payment;
pub mod plan;
pub mod user;

pub use gym_class::{ClassReservation, GymClass};
pub use inventory::{InventoryItem, InventoryMovement};
pub use maintenance::MaintenanceRecord;
pub use member::Member;
pub use membership::Membership;
pub use membership_request::MembershipRequest;
pub use notification::Notification;
pub use payment::Payment;
pub use plan::Plan;
pub use user::User;
