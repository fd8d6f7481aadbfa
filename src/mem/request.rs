pub type Cycle = u64;

/// Coherence request kinds as seen at the memory controller boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessKind {
    /// Shared read.
    Gets,
    /// Exclusive read.
    Getx,
    /// Clean write-back. Never forwarded to a DRAM device.
    Puts,
    /// Dirty write-back.
    Putx,
}

impl AccessKind {
    pub fn is_load(self) -> bool {
        matches!(self, Self::Gets | Self::Getx)
    }

    pub fn is_writeback(self) -> bool {
        matches!(self, Self::Puts | Self::Putx)
    }
}

/// Load/store view of a request, after the GETS/GETX vs PUTS/PUTX split.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReqType {
    Load,
    Store,
}

impl From<AccessKind> for ReqType {
    fn from(kind: AccessKind) -> Self {
        if kind.is_load() {
            ReqType::Load
        } else {
            ReqType::Store
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MesiState {
    M,
    E,
    S,
    I,
}

/// One memory request travelling through the controller.
///
/// `line_addr` is a pre-shifted 64-byte line address: bit 0 is the line bit.
/// The controller rewrites `line_addr` to the remapped physical address for
/// the duration of the scheme access and restores it afterwards.
#[derive(Debug, Clone)]
pub struct MemRequest {
    pub line_addr: u64,
    pub kind: AccessKind,
    pub cycle: Cycle,
    pub state: MesiState,
    /// GETS with `no_excl` set downgrades to S instead of E.
    pub no_excl: bool,
}

impl MemRequest {
    pub fn new(line_addr: u64, kind: AccessKind, cycle: Cycle) -> Self {
        Self {
            line_addr,
            kind,
            cycle,
            state: MesiState::I,
            no_excl: false,
        }
    }

    pub fn req_type(&self) -> ReqType {
        self.kind.into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_classification() {
        assert!(AccessKind::Gets.is_load());
        assert!(AccessKind::Getx.is_load());
        assert!(!AccessKind::Putx.is_load());
        assert!(AccessKind::Puts.is_writeback());
        assert_eq!(ReqType::from(AccessKind::Getx), ReqType::Load);
        assert_eq!(ReqType::from(AccessKind::Putx), ReqType::Store);
    }
}
