//! Health status types for the bridge.

use serde::{Deserialize, Serialize};

/// Health of the bridge, derived from its worker slot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Health {
    /// No worker provisioned yet
    #[default]
    Unprovisioned,
    /// Worker running and accepting requests
    Ready,
    /// Worker output closed; requests will fail until re-provisioned
    Defunct,
}
