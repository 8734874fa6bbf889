use core::fmt;

/// Attribute type code.
///
/// Unknown codes are preserved as-is so records written by other
/// implementations survive a round trip.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AttributeType(pub u32);

impl AttributeType {
    pub const STANDARD_INFORMATION: Self = Self(0x10);
    pub const ATTRIBUTE_LIST: Self = Self(0x20);
    pub const FILE_NAME: Self = Self(0x30);
    pub const OBJECT_ID: Self = Self(0x40);
    pub const SECURITY_DESCRIPTOR: Self = Self(0x50);
    pub const VOLUME_NAME: Self = Self(0x60);
    pub const VOLUME_INFORMATION: Self = Self(0x70);
    pub const DATA: Self = Self(0x80);
    pub const INDEX_ROOT: Self = Self(0x90);
    pub const INDEX_ALLOCATION: Self = Self(0xA0);
    pub const BITMAP: Self = Self(0xB0);
    pub const REPARSE_POINT: Self = Self(0xC0);
    pub const EA_INFORMATION: Self = Self(0xD0);
    pub const EA: Self = Self(0xE0);
    pub const LOGGED_UTILITY_STREAM: Self = Self(0x100);
    /// Attribute list terminator
    pub const END: Self = Self(0xFFFF_FFFF);

    pub fn name(&self) -> Option<&'static str> {
        Some(match *self {
            Self::STANDARD_INFORMATION => "$STANDARD_INFORMATION",
            Self::ATTRIBUTE_LIST => "$ATTRIBUTE_LIST",
            Self::FILE_NAME => "$FILE_NAME",
            Self::OBJECT_ID => "$OBJECT_ID",
            Self::SECURITY_DESCRIPTOR => "$SECURITY_DESCRIPTOR",
            Self::VOLUME_NAME => "$VOLUME_NAME",
            Self::VOLUME_INFORMATION => "$VOLUME_INFORMATION",
            Self::DATA => "$DATA",
            Self::INDEX_ROOT => "$INDEX_ROOT",
            Self::INDEX_ALLOCATION => "$INDEX_ALLOCATION",
            Self::BITMAP => "$BITMAP",
            Self::REPARSE_POINT => "$REPARSE_POINT",
            Self::EA_INFORMATION => "$EA_INFORMATION",
            Self::EA => "$EA",
            Self::LOGGED_UTILITY_STREAM => "$LOGGED_UTILITY_STREAM",
            _ => return None,
        })
    }
}

impl fmt::Debug for AttributeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => f.write_str(name),
            None => write!(f, "AttributeType({:#x})", self.0),
        }
    }
}

bitflags::bitflags! {
    /// Attribute record header flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct AttributeFlags: u16 {
        const COMPRESSED = 0x0001;
        const ENCRYPTED = 0x4000;
        const SPARSE = 0x8000;
    }
}
