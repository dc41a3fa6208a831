use std::fmt;

/// Absolute 32-bit address in the target's address space.
///
/// Catalog entries, scratch allocations and import slots are all
/// expressed as fixed load-time addresses; position-independent modules
/// are rejected at load, so no load bias is ever applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VirtAddr(pub u32);

impl VirtAddr {
    pub fn addr(self) -> u32 {
        self.0
    }

    /// Offset this address by `rhs`, or `None` if it leaves the 32-bit space.
    pub fn checked_add(self, rhs: u32) -> Option<VirtAddr> {
        self.0.checked_add(rhs).map(VirtAddr)
    }

    /// Little-endian encoding as it appears in a payload.
    pub fn to_le_bytes(self) -> [u8; 4] {
        self.0.to_le_bytes()
    }
}

impl fmt::Display for VirtAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:x}", self.0)
    }
}

impl fmt::LowerHex for VirtAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::LowerHex::fmt(&self.0, f)
    }
}

impl From<VirtAddr> for u32 {
    fn from(addr: VirtAddr) -> u32 {
        addr.0
    }
}

/// The eight 32-bit general-purpose registers, in encoding order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Reg32 {
    Eax,
    Ecx,
    Edx,
    Ebx,
    Esp,
    Ebp,
    Esi,
    Edi,
}

impl Reg32 {
    pub const ALL: [Reg32; 8] = [
        Reg32::Eax,
        Reg32::Ecx,
        Reg32::Edx,
        Reg32::Ebx,
        Reg32::Esp,
        Reg32::Ebp,
        Reg32::Esi,
        Reg32::Edi,
    ];

    /// Register selected by the low three bits of `index`.
    pub fn from_index(index: u8) -> Reg32 {
        Self::ALL[(index & 7) as usize]
    }

    pub fn index(self) -> u8 {
        self as u8
    }

    pub fn name(self) -> &'static str {
        match self {
            Reg32::Eax => "EAX",
            Reg32::Ecx => "ECX",
            Reg32::Edx => "EDX",
            Reg32::Ebx => "EBX",
            Reg32::Esp => "ESP",
            Reg32::Ebp => "EBP",
            Reg32::Esi => "ESI",
            Reg32::Edi => "EDI",
        }
    }
}

impl fmt::Display for Reg32 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
