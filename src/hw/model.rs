use serde::Serialize;

/// Advertised name of a reader, classified once at discovery time.
#[derive(Debug, Clone, Eq, PartialEq, Hash, Serialize, derive_more::Display)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum DeviceName {
    /// A resolved, human-readable name.
    #[display("{_0}")]
    Named(String),
    /// The radio reported no name.
    #[display("<unnamed>")]
    Unnamed,
    /// The radio reported its own address in place of a name.
    #[display("{_0}")]
    AddressPlaceholder(String),
}

impl DeviceName {
    /// Classifies an optional advertised name.
    #[must_use]
    pub fn classify(raw: Option<&str>) -> Self {
        match raw.map(str::trim) {
            None | Some("") => Self::Unnamed,
            Some(name) if looks_like_address(name) => Self::AddressPlaceholder(name.to_string()),
            Some(name) => Self::Named(name.to_string()),
        }
    }

    /// Returns the resolved name, if any.
    #[must_use]
    pub fn as_named(&self) -> Option<&str> {
        match self {
            Self::Named(name) => Some(name),
            Self::Unnamed | Self::AddressPlaceholder(_) => None,
        }
    }
}

/// Returns whether a value is a colon-separated run of hex octets (`AA:BB:...`).
pub(crate) fn looks_like_address(value: &str) -> bool {
    let mut octets = 0usize;
    for octet in value.split(':') {
        if octet.len() != 2 || !octet.bytes().all(|byte| byte.is_ascii_hexdigit()) {
            return false;
        }
        octets += 1;
    }
    octets >= 2
}

/// A reader discovered by the radio.
#[derive(Debug, Clone, Eq, PartialEq, Hash, Serialize)]
pub struct Device {
    id: String,
    name: DeviceName,
    address: String,
}

impl Device {
    /// Creates a device record.
    #[must_use]
    pub fn new(id: impl Into<String>, name: DeviceName, address: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name,
            address: address.into(),
        }
    }

    /// Returns the identifier that is stable per physical device.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns the classified advertised name.
    #[must_use]
    pub fn name(&self) -> &DeviceName {
        &self.name
    }

    /// Returns the connection target.
    #[must_use]
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Returns whether this device answers to an id or address.
    pub(crate) fn matches_target(&self, target: &str) -> bool {
        self.id.eq_ignore_ascii_case(target) || self.address.eq_ignore_ascii_case(target)
    }
}

impl From<DiscoveredDevice> for Device {
    fn from(discovered: DiscoveredDevice) -> Self {
        let name = DeviceName::classify(discovered.local_name.as_deref());
        Self {
            id: discovered.id,
            name,
            address: discovered.address,
        }
    }
}

/// Raw device-found payload as reported by a radio backend.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct DiscoveredDevice {
    id: String,
    local_name: Option<String>,
    address: String,
}

impl DiscoveredDevice {
    /// Creates a raw device-found record.
    #[must_use]
    pub fn new(id: impl Into<String>, local_name: Option<String>, address: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            local_name,
            address: address.into(),
        }
    }

    /// Returns the backend-specific device identifier.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns the advertised local name, if present.
    #[must_use]
    pub fn local_name(&self) -> Option<&str> {
        self.local_name.as_deref()
    }
}
