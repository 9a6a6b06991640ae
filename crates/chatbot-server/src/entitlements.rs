use chatbot::models::session::UserType;
use serde::Deserialize;

/// Daily message allowance per user type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct Entitlements {
    #[serde(default = "default_guest_max")]
    pub guest_max_messages_per_day: usize,
    #[serde(default = "default_regular_max")]
    pub regular_max_messages_per_day: usize,
}

impl Default for Entitlements {
    fn default() -> Self {
        Self {
            guest_max_messages_per_day: default_guest_max(),
            regular_max_messages_per_day: default_regular_max(),
        }
    }
}

impl Entitlements {
    pub fn max_messages_per_day(&self, user_type: UserType) -> usize {
        match user_type {
            UserType::Guest => self.guest_max_messages_per_day,
            UserType::Regular => self.regular_max_messages_per_day,
        }
    }
}

fn default_guest_max() -> usize {
    20
}

fn default_regular_max() -> usize {
    100
}
