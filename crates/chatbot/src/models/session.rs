use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

/// The plan a caller is on, which decides their daily message allowance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum UserType {
    Guest,
    Regular,
}

/// An authenticated caller as seen by handlers and tools.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub user_id: String,
    pub user_type: UserType,
}

impl Session {
    pub fn new<S: Into<String>>(user_id: S, user_type: UserType) -> Self {
        Self {
            user_id: user_id.into(),
            user_type,
        }
    }

    pub fn is_guest(&self) -> bool {
        self.user_type == UserType::Guest
    }
}
