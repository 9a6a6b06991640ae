use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

/// Who authored a message. Tool results are kept as their own role so they never count as
/// user-authored turns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    Tool,
}
