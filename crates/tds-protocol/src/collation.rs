//! Collation to code page resolution for VARCHAR decoding.
//!
//! A TDS collation is five bytes: a 4-byte info word (LCID in the low 20
//! bits, comparison flags and version above it) and a 1-byte sort id. A
//! non-zero sort id selects a SQL collation whose code page is fixed by the
//! sort id alone; otherwise the code page follows the LCID.
//!
//! | Code Page | Encoding | Languages |
//! |-----------|----------|-----------|
//! | 874 | Windows-874 | Thai |
//! | 932 | Shift_JIS | Japanese |
//! | 936 | GBK | Simplified Chinese |
//! | 949 | EUC-KR | Korean |
//! | 950 | Big5 | Traditional Chinese |
//! | 1250-1258 | Windows-125x | European, Cyrillic, Greek, Turkish, Hebrew, Arabic, Baltic, Vietnamese |
//! | 65001 | UTF-8 | `_UTF8` collations |
//!
//! Code pages 437 and 850 resolve but have no decoder; decoding a value in
//! such a column fails with [`ProtocolError::UnsupportedCollation`].

use bytes::Buf;
use encoding_rs::Encoding;

use crate::codec::ensure;
use crate::error::ProtocolError;

/// Flag bit indicating UTF-8 collation (SQL Server 2019+).
pub const COLLATION_FLAG_UTF8: u32 = 0x0800_0000;

/// Mask to extract the LCID from the collation info.
pub const LCID_MASK: u32 = 0x000F_FFFF;

/// UTF-8 code page number.
pub const CODE_PAGE_UTF8: u16 = 65001;

/// A five-byte TDS collation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Collation {
    /// LCID and flags.
    pub info: u32,
    /// SQL sort id, zero for Windows collations.
    pub sort_id: u8,
}

impl Collation {
    /// Wire size.
    pub const SIZE: usize = 5;

    /// Decode from 5 bytes.
    pub fn decode(src: &mut impl Buf) -> Result<Self, ProtocolError> {
        ensure(src, Self::SIZE)?;
        Ok(Self {
            info: src.get_u32_le(),
            sort_id: src.get_u8(),
        })
    }

    /// Locale id.
    #[must_use]
    pub const fn lcid(&self) -> u32 {
        self.info & LCID_MASK
    }

    /// Whether this is a `_UTF8` collation.
    #[must_use]
    pub const fn is_utf8(&self) -> bool {
        self.info & COLLATION_FLAG_UTF8 != 0
    }

    /// Resolve the Windows code page for this collation.
    pub fn code_page(&self) -> Result<u16, ProtocolError> {
        if self.is_utf8() {
            return Ok(CODE_PAGE_UTF8);
        }
        let unsupported = ProtocolError::UnsupportedCollation {
            lcid: self.lcid(),
            sort_id: self.sort_id,
        };
        if self.sort_id != 0 {
            return code_page_for_sort_id(self.sort_id).ok_or(unsupported);
        }
        code_page_for_lcid(self.lcid()).ok_or(unsupported)
    }
}

/// Code page of a SQL collation sort id.
#[must_use]
pub fn code_page_for_sort_id(sort_id: u8) -> Option<u16> {
    match sort_id {
        30..=34 => Some(437),
        40..=44 | 49 | 55..=61 => Some(850),
        50..=54 | 71..=75 | 183..=186 | 210..=217 => Some(1252),
        80..=98 => Some(1250),
        104..=108 => Some(1251),
        112..=124 => Some(1253),
        128..=130 => Some(1254),
        136..=138 => Some(1255),
        144..=146 => Some(1256),
        152..=160 => Some(1257),
        192 | 200 => Some(932),
        194 | 201 => Some(949),
        196 | 202 => Some(950),
        198 | 203 => Some(936),
        204..=206 => Some(874),
        _ => None,
    }
}

/// Code page of an LCID, applying the legacy remaps when no exact match
/// exists.
#[must_use]
pub fn code_page_for_lcid(lcid: u32) -> Option<u16> {
    if let Some(cp) = exact_code_page(lcid) {
        return Some(cp);
    }
    match lcid {
        // Sort-order variants of the CJK locales.
        0x10404 | 0x10804 | 0x10C04 | 0x11004 | 0x11404 | 0x10411 | 0x10412 => {
            exact_code_page(lcid & 0x3FFF)
        }
        // Lithuanian (classic).
        0x827 => exact_code_page(0x427),
        // Kazakh.
        0x43F => Some(1251),
        // Georgian (modern sort).
        0x10437 => Some(1252),
        _ => None,
    }
}

fn exact_code_page(lcid: u32) -> Option<u16> {
    match lcid {
        0x0411 => Some(932),
        0x0804 | 0x1004 => Some(936),
        0x0404 | 0x0C04 | 0x1404 => Some(950),
        0x0412 => Some(949),
        0x041E => Some(874),
        0x042A => Some(1258),

        0x0405 | 0x0415 | 0x040E | 0x041A | 0x081A | 0x141A | 0x101A | 0x041B | 0x0424 | 0x0418
        | 0x041C => Some(1250),

        0x0419 | 0x0422 | 0x0423 | 0x0402 | 0x042F | 0x0C1A | 0x201A | 0x0440 | 0x0843 | 0x0444
        | 0x0450 | 0x0485 => Some(1251),

        0x0408 => Some(1253),
        0x041F | 0x042C => Some(1254),
        0x040D => Some(1255),

        0x0401 | 0x0801 | 0x0C01 | 0x1001 | 0x1401 | 0x1801 | 0x1C01 | 0x2001 | 0x2401 | 0x2801
        | 0x2C01 | 0x3001 | 0x3401 | 0x3801 | 0x3C01 | 0x4001 | 0x0429 | 0x0420 | 0x048C
        | 0x0463 => Some(1256),

        0x0425..=0x0427 => Some(1257),

        0x0409 | 0x0809 | 0x0C09 | 0x1009 | 0x1409 | 0x1809 | 0x040C | 0x080C | 0x0C0C | 0x100C
        | 0x140C | 0x0407 | 0x0807 | 0x0C07 | 0x1007 | 0x1407 | 0x040A | 0x080A | 0x0C0A
        | 0x100A | 0x140A | 0x180A | 0x1C0A | 0x200A | 0x240A | 0x280A | 0x2C0A | 0x300A
        | 0x340A | 0x380A | 0x3C0A | 0x400A | 0x440A | 0x480A | 0x4C0A | 0x500A | 0x0410
        | 0x0810 | 0x0816 | 0x0416 | 0x0413 | 0x0813 | 0x0406 | 0x0414 | 0x0814 | 0x041D
        | 0x081D | 0x040B | 0x040F | 0x0403 | 0x0456 | 0x042D | 0x0436 | 0x0421 | 0x043E
        | 0x0441 | 0x0437 => Some(1252),

        _ => None,
    }
}

/// Decoder for a Windows code page, if one exists.
#[must_use]
pub fn encoding_for_code_page(code_page: u16) -> Option<&'static Encoding> {
    match code_page {
        CODE_PAGE_UTF8 => Some(encoding_rs::UTF_8),
        874 => Some(encoding_rs::WINDOWS_874),
        932 => Some(encoding_rs::SHIFT_JIS),
        936 => Some(encoding_rs::GBK),
        949 => Some(encoding_rs::EUC_KR),
        950 => Some(encoding_rs::BIG5),
        1250 => Some(encoding_rs::WINDOWS_1250),
        1251 => Some(encoding_rs::WINDOWS_1251),
        1252 => Some(encoding_rs::WINDOWS_1252),
        1253 => Some(encoding_rs::WINDOWS_1253),
        1254 => Some(encoding_rs::WINDOWS_1254),
        1255 => Some(encoding_rs::WINDOWS_1255),
        1256 => Some(encoding_rs::WINDOWS_1256),
        1257 => Some(encoding_rs::WINDOWS_1257),
        1258 => Some(encoding_rs::WINDOWS_1258),
        _ => None,
    }
}

/// A resolved column or session encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodePageEncoding {
    /// The source collation.
    pub collation: Collation,
    /// Resolved code page.
    pub code_page: u16,
    /// Decoder, absent for code pages without one.
    pub encoding: Option<&'static Encoding>,
}

impl CodePageEncoding {
    /// Resolve a collation.
    pub fn resolve(collation: Collation) -> Result<Self, ProtocolError> {
        let code_page = collation.code_page()?;
        Ok(Self {
            collation,
            code_page,
            encoding: encoding_for_code_page(code_page),
        })
    }

    /// Decode single-byte or multi-byte character data.
    pub fn decode(&self, bytes: &[u8]) -> Result<String, ProtocolError> {
        let encoding = self.encoding.ok_or(ProtocolError::UnsupportedCollation {
            lcid: self.collation.lcid(),
            sort_id: self.collation.sort_id,
        })?;
        let (text, _, _) = encoding.decode(bytes);
        Ok(text.into_owned())
    }
}
