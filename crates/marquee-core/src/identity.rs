use serde::{Deserialize, Serialize};

/// Stable identity of the physical device.
///
/// `id` is resolved once at startup and immutable afterwards. The serial
/// number is learned later from the venue service's find response; once
/// present it supersedes `id` as the canonical identifier for every
/// subsequent protocol call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceIdentity {
    pub id: String,
    #[serde(default)]
    pub serial_number: Option<String>,
}

impl DeviceIdentity {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            serial_number: None,
        }
    }

    /// Identifier used on the wire: serial number when known, else `id`.
    pub fn canonical_id(&self) -> &str {
        self.serial_number.as_deref().unwrap_or(&self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serial_number_supersedes_resolved_id() {
        let mut identity = DeviceIdentity::new("device-17");
        assert_eq!(identity.canonical_id(), "device-17");
        identity.serial_number = Some("SN-0042".into());
        assert_eq!(identity.canonical_id(), "SN-0042");
    }
}
