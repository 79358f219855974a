//! Output formats understood by the supervisor's log subscriber.
//!
//! Values arrive from every configuration layer as lowercase text, so the
//! enum parses case-insensitively and serialises in `snake_case`.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Shape of each log line written to standard error.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum LogFormat {
    /// One JSON object per event with fields flattened to the top level.
    #[default]
    Json,
    /// Terse text lines for reading in a terminal.
    Compact,
}
