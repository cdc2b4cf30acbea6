use std::fmt;

use serde::{Deserialize, Serialize};

/// Opaque key owned by the booking flow that created the appointment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AppointmentId(String);

impl AppointmentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AppointmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AppointmentId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for AppointmentId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl AsRef<str> for AppointmentId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
