use nom::bytes::complete::{tag, take};
use nom::multi::count;
use nom::number::complete::{le_u16, le_u32, le_u64, le_u8};
use nom::sequence::tuple;
use nom::IResult;

use crate::errors::CorruptStructureError;

pub(crate) const SIGNATURE: &[u8] =
    &[0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1];

/// Size of the header structure. In version 4 files the header is padded
/// to a full 4096-byte sector.
pub(crate) const HEADER_SIZE: usize = 512;

/// Number of DIFAT entries stored in the header itself.
pub(crate) const HEADER_DIFAT_ENTRIES: usize = 109;

pub(crate) const DIRECTORY_ENTRY_SIZE: usize = 128;

/// Sector indexes greater than this one have special meanings.
pub(crate) const MAXREGSECT: u32 = 0xFFFFFFFA;
pub(crate) const ENDOFCHAIN: u32 = 0xFFFFFFFE;
pub(crate) const FREESECT: u32 = 0xFFFFFFFF;
pub(crate) const NOSTREAM: u32 = 0xFFFFFFFF;

/// The compound file header.
pub(crate) struct Header {
    pub major_version: u16,
    pub byte_order: u16,
    pub sector_shift: u16,
    pub mini_sector_shift: u16,
    pub num_dir_sectors: u32,
    pub num_fat_sectors: u32,
    pub first_dir_sector: u32,
    pub mini_stream_cutoff: u32,
    pub first_mini_fat_sector: u32,
    pub num_mini_fat_sectors: u32,
    pub first_difat_sector: u32,
    pub difat: Vec<u32>,
}

impl Header {
    /// Parses the 512-byte header, including the signature.
    pub fn parse(input: &[u8]) -> IResult<&[u8], Header> {
        let (
            remainder,
            (
                _signature,
                _clsid,
                _minor_version,
                major_version,
                byte_order,
                sector_shift,
                mini_sector_shift,
                _reserved,
                num_dir_sectors,
                num_fat_sectors,
                first_dir_sector,
                _transaction_signature,
                mini_stream_cutoff,
                first_mini_fat_sector,
                num_mini_fat_sectors,
                first_difat_sector,
                _num_difat_sectors,
                difat,
            ),
        ) = tuple((
            tag(SIGNATURE),
            take(16_usize), // clsid, must be zero but nobody checks
            le_u16,         // minor version
            le_u16,         // major version
            le_u16,         // byte order
            le_u16,         // sector shift
            le_u16,         // mini sector shift
            take(6_usize),  // reserved
            le_u32,         // number of directory sectors
            le_u32,         // number of FAT sectors
            le_u32,         // first directory sector
            le_u32,         // transaction signature
            le_u32,         // mini stream cutoff
            le_u32,         // first mini FAT sector
            le_u32,         // number of mini FAT sectors
            le_u32,         // first DIFAT sector
            le_u32,         // number of DIFAT sectors
            count(le_u32, HEADER_DIFAT_ENTRIES),
        ))(input)?;

        let header = Header {
            major_version,
            byte_order,
            sector_shift,
            mini_sector_shift,
            num_dir_sectors,
            num_fat_sectors,
            first_dir_sector,
            mini_stream_cutoff,
            first_mini_fat_sector,
            num_mini_fat_sectors,
            first_difat_sector,
            difat,
        };

        Ok((remainder, header))
    }

    /// Checks that the values in the header allow parsing the rest of the
    /// file.
    pub fn validate(&self) -> Result<(), CorruptStructureError> {
        if self.byte_order != 0xFFFE {
            return Err(CorruptStructureError::InvalidHeader {
                field: "byte_order",
                value: self.byte_order.into(),
            });
        }
        if self.sector_shift != 9 && self.sector_shift != 12 {
            return Err(CorruptStructureError::InvalidHeader {
                field: "sector_shift",
                value: self.sector_shift.into(),
            });
        }
        if self.mini_sector_shift == 0
            || self.mini_sector_shift >= self.sector_shift
        {
            return Err(CorruptStructureError::InvalidHeader {
                field: "mini_sector_shift",
                value: self.mini_sector_shift.into(),
            });
        }
        if self.first_dir_sector > MAXREGSECT {
            return Err(CorruptStructureError::InvalidHeader {
                field: "first_dir_sector",
                value: self.first_dir_sector,
            });
        }
        Ok(())
    }
}

/// A directory entry as stored in the file, before it's linked into the
/// tree.
pub(crate) struct RawEntry {
    pub name: Vec<u16>,
    /// Length of the name in bytes, including the null terminator.
    pub name_len: u16,
    pub object_type: u8,
    pub left_sibling: u32,
    pub right_sibling: u32,
    pub child: u32,
    pub start_sector: u32,
    pub size: u64,
}

impl RawEntry {
    pub const STORAGE: u8 = 1;
    pub const STREAM: u8 = 2;
    pub const ROOT: u8 = 5;

    /// Returns the entry name, or `None` if the declared name length is
    /// invalid.
    pub fn name(&self) -> Option<String> {
        if self.name_len % 2 != 0 || self.name_len > 64 {
            return None;
        }
        let mut units = &self.name[..(self.name_len / 2) as usize];
        while let Some((0, rest)) = units.split_last() {
            units = rest;
        }
        Some(String::from_utf16_lossy(units))
    }

    /// Parses a 128-byte directory entry.
    pub fn parse(input: &[u8]) -> IResult<&[u8], RawEntry> {
        let (
            remainder,
            (
                name,
                name_len,
                object_type,
                _color,
                left_sibling,
                right_sibling,
                child,
                _clsid,
                _state_bits,
                _creation_time,
                _modified_time,
                start_sector,
                size,
            ),
        ) = tuple((
            count(le_u16, 32),
            le_u16,
            le_u8,
            le_u8,
            le_u32,
            le_u32,
            le_u32,
            take(16_usize),
            le_u32,
            le_u64,
            le_u64,
            le_u32,
            le_u64,
        ))(input)?;

        Ok((
            remainder,
            RawEntry {
                name,
                name_len,
                object_type,
                left_sibling,
                right_sibling,
                child,
                start_sector,
                size,
            },
        ))
    }
}

/// Interprets a sector as an array of little-endian `u32`.
pub(crate) fn u32_table(sector: &[u8]) -> impl Iterator<Item = u32> + '_ {
    sector
        .chunks_exact(4)
        .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
}
