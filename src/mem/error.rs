use std::fmt;

/// Fatal simulator errors. All of these abort the run; there is no
/// per-request recovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FatalError {
    /// Bad scheme name, out-of-range page size, malformed address-codec mask.
    Config(String),
    /// A structural invariant was violated: duplicate tag within a set,
    /// cuckoo rank overflow, a forced TagBuffer clear that did not make
    /// room, victim-buffer state corruption.
    InvariantViolated(String),
    /// The page mapper could not allocate a unique physical page.
    OutOfAddressSpace(String),
    /// A DRAM device returned a response cycle earlier than the request.
    DeviceFailure(String),
}

impl FatalError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::InvariantViolated(msg.into())
    }
}

impl fmt::Display for FatalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FatalError::Config(msg) => write!(f, "ConfigError: {msg}"),
            FatalError::InvariantViolated(msg) => write!(f, "InvariantViolated: {msg}"),
            FatalError::OutOfAddressSpace(msg) => write!(f, "OutOfAddressSpace: {msg}"),
            FatalError::DeviceFailure(msg) => write!(f, "DeviceFailure: {msg}"),
        }
    }
}

impl std::error::Error for FatalError {}
