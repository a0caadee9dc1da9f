//! Protocol version word exchanged in LOGIN7 and echoed in LOGINACK.

use core::fmt;

/// Raw TDS version word.
///
/// The high byte is the major/minor pair (`0x74` for 7.4); the low bytes
/// distinguish sub-revisions such as 7.3A and 7.3B. Ordering follows the
/// numeric value, which matches release order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TdsVersion(u32);

impl TdsVersion {
    /// SQL Server 2005.
    pub const V7_2: Self = Self(0x7209_0002);
    /// SQL Server 2008.
    pub const V7_3A: Self = Self(0x730A_0003);
    /// SQL Server 2008 R2.
    pub const V7_3B: Self = Self(0x730B_0003);
    /// Version requested by default.
    pub const V7_4: Self = Self(0x7400_0004);

    /// Wrap a raw version word.
    #[must_use]
    pub const fn new(version: u32) -> Self {
        Self(version)
    }

    /// The raw version word.
    #[must_use]
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Minor number of the 7.x line taken from the high byte.
    #[must_use]
    pub const fn minor(self) -> u8 {
        (self.0 >> 24) as u8 & 0x0F
    }

    const fn revision(self) -> Option<char> {
        match self.0 {
            0x730A_0003 => Some('A'),
            0x730B_0003 => Some('B'),
            _ => None,
        }
    }
}

impl Default for TdsVersion {
    fn default() -> Self {
        Self::V7_4
    }
}

impl fmt::Display for TdsVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TDS 7.{}", self.minor())?;
        if let Some(revision) = self.revision() {
            write!(f, "{revision}")?;
        }
        Ok(())
    }
}

impl From<u32> for TdsVersion {
    fn from(value: u32) -> Self {
        Self(value)
    }
}
