/*! Parser for OLE Compound File Binary Format files.

The OLE CF format (also known as Compound File Binary Format or CFBF) is a
container format used by many Microsoft file formats including DOC, XLS,
PPT and MSI. It works like a small FAT file system stored inside a single
file: the file is split in sectors, a file allocation table (FAT) links the
sectors that belong to the same stream, and a directory made of 128-byte
entries arranges the streams in a tree of storages. Small streams are stored
in 64-byte mini sectors inside a special stream called the mini stream.

This parser doesn't trust anything in the file. Every sector chain is
walked with cycle detection, and every stream reachable from the root is
checked against its chain when the file is parsed. Once
[`CompoundFile::parse`] succeeds, any stream can be read.

Read more about the Compound File Binary File format here:
  https://learn.microsoft.com/en-us/openspecs/windows_protocols/ms-cfb/53989ce4-7b05-4f8d-829b-d08d6148375b
*/

use bitvec::prelude::*;
use log::debug;

use crate::errors::{AnalysisError, CorruptStructureError};

mod parser;

use parser::{
    u32_table, Header, RawEntry, DIRECTORY_ENTRY_SIZE, ENDOFCHAIN, FREESECT,
    HEADER_SIZE, MAXREGSECT, NOSTREAM, SIGNATURE,
};

#[cfg(test)]
mod tests;

/// Returns `true` if `data` starts with the compound file signature.
pub fn is_compound_file(data: &[u8]) -> bool {
    data.starts_with(SIGNATURE)
}

/// Type of a directory entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryType {
    /// The root storage. There's exactly one per file.
    Root,
    /// A storage, which works like a directory.
    Storage,
    /// A stream, which works like a file.
    Stream,
}

/// A node in the directory tree of a compound file.
///
/// Entries live in an arena owned by [`CompoundFile`] and refer to each
/// other by their index in that arena. The root is always at index 0.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryEntry {
    /// Index of this entry in [`CompoundFile::entries`].
    pub index: usize,
    /// Entry name.
    pub name: String,
    /// Entry type.
    pub entry_type: EntryType,
    /// First sector (or mini sector) of the stream.
    pub start_sector: u32,
    /// Stream size in bytes.
    pub size: u64,
    /// Index of the parent storage, `None` for the root.
    pub parent: Option<usize>,
    /// Indexes of the entries contained in this storage, sorted as they
    /// appear in the red-black tree of siblings.
    pub children: Vec<usize>,
    sectors: Vec<u32>,
    in_mini_stream: bool,
}

impl DirectoryEntry {
    /// Returns `true` if the entry is a stream.
    pub fn is_stream(&self) -> bool {
        self.entry_type == EntryType::Stream
    }

    /// Returns `true` if the entry is a storage or the root storage.
    pub fn is_storage(&self) -> bool {
        matches!(self.entry_type, EntryType::Storage | EntryType::Root)
    }

    /// Returns `true` if `name` matches the entry name. As in the compound
    /// file format itself, the comparison is case-insensitive.
    pub fn has_name(&self, name: &str) -> bool {
        self.name
            .chars()
            .flat_map(char::to_uppercase)
            .eq(name.chars().flat_map(char::to_uppercase))
    }
}

/// A parsed compound file.
///
/// The directory tree and allocation tables are parsed when the file is
/// created, streams are copied out on demand with
/// [`CompoundFile::read_stream`].
pub struct CompoundFile<'a> {
    data: &'a [u8],
    major_version: u16,
    sector_size: usize,
    mini_sector_size: usize,
    mini_stream_cutoff: u64,
    num_sectors: usize,
    fat: Vec<u32>,
    mini_fat: Vec<u32>,
    mini_stream: Vec<u8>,
    entries: Vec<DirectoryEntry>,
}

impl<'a> CompoundFile<'a> {
    /// Parses a compound file.
    ///
    /// Returns [`AnalysisError::Format`] if `data` doesn't start with the
    /// compound file signature, and [`AnalysisError::CorruptStructure`]
    /// if any of the structures in the file is inconsistent.
    pub fn parse(data: &'a [u8]) -> Result<Self, AnalysisError> {
        if !is_compound_file(data) {
            return Err(AnalysisError::Format);
        }

        let (_, header) = Header::parse(data).map_err(|_| {
            CorruptStructureError::TruncatedHeader { size: data.len() }
        })?;

        header.validate()?;

        let sector_size = 1_usize << header.sector_shift;

        // The header occupies the first sector, sector 0 starts right
        // after it. The last sector can be incomplete.
        let num_sectors = data
            .len()
            .saturating_sub(sector_size.max(HEADER_SIZE))
            .div_ceil(sector_size);

        let mut cf = Self {
            data,
            major_version: header.major_version,
            sector_size,
            mini_sector_size: 1_usize << header.mini_sector_shift,
            mini_stream_cutoff: header.mini_stream_cutoff.into(),
            num_sectors,
            fat: Vec::new(),
            mini_fat: Vec::new(),
            mini_stream: Vec::new(),
            entries: Vec::new(),
        };

        cf.fat = cf.load_fat(&header)?;

        let mut walker = ChainWalker::new();
        let directory = cf.load_directory(&header, &mut walker)?;

        cf.mini_fat = cf.load_mini_fat(&header, &mut walker)?;
        cf.entries = cf.build_tree(&directory)?;
        cf.load_mini_stream(&mut walker)?;
        cf.resolve_streams(&mut walker)?;

        debug!(
            "compound file v{}: {} sectors of {} bytes, {} directory entries",
            cf.major_version,
            cf.num_sectors,
            cf.sector_size,
            cf.entries.len()
        );

        Ok(cf)
    }

    /// Major version of the file format (3 or 4).
    pub fn major_version(&self) -> u16 {
        self.major_version
    }

    /// Size of the sectors in bytes (512 or 4096).
    pub fn sector_size(&self) -> usize {
        self.sector_size
    }

    /// Returns the root storage.
    pub fn root(&self) -> &DirectoryEntry {
        &self.entries[0]
    }

    /// Returns all the entries reachable from the root, the root being the
    /// first one.
    pub fn entries(&self) -> &[DirectoryEntry] {
        self.entries.as_slice()
    }

    /// Returns the entry at the given index.
    pub fn entry(&self, index: usize) -> Option<&DirectoryEntry> {
        self.entries.get(index)
    }

    /// Returns an iterator over the direct children of `entry`.
    pub fn children<'b>(
        &'b self,
        entry: &'b DirectoryEntry,
    ) -> impl Iterator<Item = &'b DirectoryEntry> + 'b {
        let entries = self.entries.as_slice();
        entry.children.iter().map(move |i| &entries[*i])
    }

    /// Finds a direct child of `entry` by name (case-insensitive).
    pub fn child<'b>(
        &'b self,
        entry: &'b DirectoryEntry,
        name: &str,
    ) -> Option<&'b DirectoryEntry> {
        self.children(entry).find(|child| child.has_name(name))
    }

    /// Returns the entry at `path`, where path components are separated by
    /// `/`. The root itself is not part of the path, `"Macros/VBA/dir"`
    /// is a valid path.
    pub fn open(&self, path: &str) -> Option<&DirectoryEntry> {
        path.split('/')
            .filter(|component| !component.is_empty())
            .try_fold(self.root(), |entry, name| self.child(entry, name))
    }

    /// Returns the path of `entry`, relative to the root.
    pub fn path(&self, entry: &DirectoryEntry) -> String {
        let mut names = Vec::new();
        let mut current = entry;
        while let Some(parent) = current.parent {
            names.push(current.name.as_str());
            current = &self.entries[parent];
        }
        names.reverse();
        names.join("/")
    }

    /// Iterates over the whole directory tree in depth-first pre-order,
    /// starting at the root.
    pub fn walk(&self) -> Walk<'_, 'a> {
        Walk { cf: self, stack: vec![0] }
    }

    /// Copies the content of a stream.
    pub fn read_stream(
        &self,
        entry: &DirectoryEntry,
    ) -> Result<Vec<u8>, AnalysisError> {
        if !entry.is_stream() {
            return Err(CorruptStructureError::InvalidEntry {
                entry: entry.index as u32,
                reason: "not a stream",
            }
            .into());
        }
        let mut data = Vec::with_capacity(entry.size as usize);
        self.copy_sectors(
            &entry.sectors,
            entry.size,
            entry.in_mini_stream,
            &self.path(entry),
            Some(&mut data),
        )?;
        Ok(data)
    }
}

impl<'a> CompoundFile<'a> {
    /// Returns the part of sector `sector` present in the file. The slice
    /// is shorter than a sector if the file is truncated, and empty if the
    /// sector is completely out of the file.
    fn sector(&self, sector: u32) -> &'a [u8] {
        if sector > MAXREGSECT || sector as usize >= self.num_sectors {
            return &[];
        }
        let start = (sector as usize + 1) * self.sector_size;
        let end = (start + self.sector_size).min(self.data.len());
        &self.data[start..end]
    }

    /// Like [`CompoundFile::sector`], but the sector must be complete.
    fn full_sector(
        &self,
        sector: u32,
        chain: &str,
    ) -> Result<&'a [u8], CorruptStructureError> {
        let data = self.sector(sector);
        if data.len() != self.sector_size {
            return Err(CorruptStructureError::SectorOutOfRange {
                sector,
                chain: chain.to_string(),
            });
        }
        Ok(data)
    }

    /// Collects the FAT sector indexes from the DIFAT, and reads the FAT.
    fn load_fat(
        &self,
        header: &Header,
    ) -> Result<Vec<u32>, CorruptStructureError> {
        let num_fat_sectors = header.num_fat_sectors as usize;

        if num_fat_sectors > self.num_sectors {
            return Err(CorruptStructureError::SizeMismatch {
                chain: "FAT".to_string(),
                declared: header.num_fat_sectors as u64
                    * self.sector_size as u64,
                capacity: (self.num_sectors * self.sector_size) as u64,
            });
        }

        let mut fat_sectors: Vec<u32> = header
            .difat
            .iter()
            .copied()
            .filter(|sector| *sector != FREESECT)
            .collect();

        // The header contains the first 109 entries of the DIFAT, the rest
        // is stored in a chain of DIFAT sectors where the last entry of each
        // sector points to the next one.
        let mut visited = bitvec![0; self.num_sectors];
        let mut current = header.first_difat_sector;

        while fat_sectors.len() < num_fat_sectors && current <= MAXREGSECT {
            let sector = self.full_sector(current, "DIFAT")?;
            if visited[current as usize] {
                return Err(CorruptStructureError::ChainCycle {
                    sector: current,
                    chain: "DIFAT".to_string(),
                });
            }
            visited.set(current as usize, true);

            let entries: Vec<u32> = u32_table(sector).collect();
            let Some((next, entries)) = entries.split_last() else {
                break;
            };

            fat_sectors
                .extend(entries.iter().filter(|sector| **sector != FREESECT));

            current = *next;
        }

        fat_sectors.truncate(num_fat_sectors);

        if fat_sectors.len() < num_fat_sectors {
            return Err(CorruptStructureError::SizeMismatch {
                chain: "FAT".to_string(),
                declared: header.num_fat_sectors as u64
                    * self.sector_size as u64,
                capacity: (fat_sectors.len() * self.sector_size) as u64,
            });
        }

        let mut fat =
            Vec::with_capacity(num_fat_sectors * self.sector_size / 4);

        for sector in fat_sectors {
            fat.extend(u32_table(self.full_sector(sector, "FAT")?));
        }

        Ok(fat)
    }

    /// Reads the sectors that contain the directory entries.
    fn load_directory(
        &self,
        header: &Header,
        walker: &mut ChainWalker,
    ) -> Result<Vec<u8>, CorruptStructureError> {
        let sectors = walker.walk(
            &self.fat,
            header.first_dir_sector,
            None,
            "directory",
        )?;

        // Version 3 files always have 0 in this field.
        if self.major_version == 4
            && header.num_dir_sectors as usize != sectors.len()
        {
            return Err(CorruptStructureError::SizeMismatch {
                chain: "directory".to_string(),
                declared: header.num_dir_sectors as u64
                    * self.sector_size as u64,
                capacity: (sectors.len() * self.sector_size) as u64,
            });
        }

        let mut directory = Vec::with_capacity(sectors.len() * self.sector_size);

        for sector in sectors {
            directory.extend_from_slice(self.full_sector(sector, "directory")?);
        }

        Ok(directory)
    }

    /// Reads the mini FAT, which links the mini sectors in the mini stream.
    fn load_mini_fat(
        &self,
        header: &Header,
        walker: &mut ChainWalker,
    ) -> Result<Vec<u32>, CorruptStructureError> {
        if header.num_mini_fat_sectors == 0
            || header.first_mini_fat_sector == ENDOFCHAIN
        {
            return Ok(Vec::new());
        }

        let sectors = walker.walk(
            &self.fat,
            header.first_mini_fat_sector,
            None,
            "mini FAT",
        )?;

        if sectors.len() != header.num_mini_fat_sectors as usize {
            return Err(CorruptStructureError::SizeMismatch {
                chain: "mini FAT".to_string(),
                declared: header.num_mini_fat_sectors as u64
                    * self.sector_size as u64,
                capacity: (sectors.len() * self.sector_size) as u64,
            });
        }

        let mut mini_fat = Vec::with_capacity(sectors.len() * self.sector_size / 4);

        for sector in sectors {
            mini_fat.extend(u32_table(self.full_sector(sector, "mini FAT")?));
        }

        Ok(mini_fat)
    }

    /// Links the raw directory entries into a tree, starting at the root
    /// entry. Only entries reachable from the root end up in the arena.
    fn build_tree(
        &self,
        directory: &[u8],
    ) -> Result<Vec<DirectoryEntry>, CorruptStructureError> {
        let raw = directory
            .chunks_exact(DIRECTORY_ENTRY_SIZE)
            .enumerate()
            .map(|(id, chunk)| {
                RawEntry::parse(chunk).map(|(_, entry)| entry).map_err(|_| {
                    CorruptStructureError::InvalidEntry {
                        entry: id as u32,
                        reason: "truncated entry",
                    }
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        match raw.first() {
            Some(root) if root.object_type == RawEntry::ROOT => {}
            _ => {
                return Err(CorruptStructureError::InvalidEntry {
                    entry: 0,
                    reason: "first entry is not the root storage",
                })
            }
        }

        let mut visited = bitvec![0; raw.len()];
        visited.set(0, true);

        let mut entries = vec![self.new_entry(0, 0, &raw[0], None)?];
        let mut pending = vec![(0_usize, 0_u32)];

        while let Some((parent, id)) = pending.pop() {
            let siblings =
                sibling_tree(&raw, raw[id as usize].child, id, &mut visited)?;

            for child_id in siblings {
                let child = &raw[child_id as usize];

                match child.object_type {
                    RawEntry::STORAGE | RawEntry::STREAM => {}
                    RawEntry::ROOT => {
                        return Err(CorruptStructureError::InvalidEntry {
                            entry: child_id,
                            reason: "root storage inside the tree",
                        })
                    }
                    _ => {
                        return Err(CorruptStructureError::InvalidEntry {
                            entry: child_id,
                            reason: "unallocated entry inside the tree",
                        })
                    }
                }

                let index = entries.len();
                entries.push(self.new_entry(
                    index,
                    child_id,
                    child,
                    Some(parent),
                )?);
                entries[parent].children.push(index);

                if child.object_type == RawEntry::STORAGE {
                    pending.push((index, child_id));
                }
            }
        }

        Ok(entries)
    }

    fn new_entry(
        &self,
        index: usize,
        id: u32,
        raw: &RawEntry,
        parent: Option<usize>,
    ) -> Result<DirectoryEntry, CorruptStructureError> {
        let name = raw.name().ok_or(CorruptStructureError::InvalidEntry {
            entry: id,
            reason: "invalid name length",
        })?;

        let entry_type = match raw.object_type {
            RawEntry::ROOT => EntryType::Root,
            RawEntry::STORAGE => EntryType::Storage,
            _ => EntryType::Stream,
        };

        // In version 3 files the most significant 32 bits of the size may
        // contain garbage.
        let size = if self.major_version == 3 {
            raw.size & 0xFFFF_FFFF
        } else {
            raw.size
        };

        Ok(DirectoryEntry {
            index,
            name,
            entry_type,
            start_sector: raw.start_sector,
            size,
            parent,
            children: Vec::new(),
            sectors: Vec::new(),
            in_mini_stream: false,
        })
    }

    /// Reads the mini stream, whose location is given by the root entry.
    fn load_mini_stream(
        &mut self,
        walker: &mut ChainWalker,
    ) -> Result<(), CorruptStructureError> {
        let root = &self.entries[0];
        let (size, start) = (root.size, root.start_sector);

        let sectors =
            self.stream_chain(walker, start, size, false, "mini stream")?;

        let mut mini_stream = Vec::with_capacity(size as usize);
        self.copy_sectors(
            &sectors,
            size,
            false,
            "mini stream",
            Some(&mut mini_stream),
        )?;

        self.entries[0].sectors = sectors;
        self.mini_stream = mini_stream;

        Ok(())
    }

    /// Resolves and checks the sector chain of every stream in the tree.
    fn resolve_streams(
        &mut self,
        walker: &mut ChainWalker,
    ) -> Result<(), CorruptStructureError> {
        for index in 1..self.entries.len() {
            let entry = &self.entries[index];
            if !entry.is_stream() {
                continue;
            }

            let path = self.path(entry);
            let in_mini_stream = entry.size < self.mini_stream_cutoff;
            let (start, size) = (entry.start_sector, entry.size);

            let sectors =
                self.stream_chain(walker, start, size, in_mini_stream, &path)?;

            self.copy_sectors(&sectors, size, in_mini_stream, &path, None)?;

            let entry = &mut self.entries[index];
            entry.sectors = sectors;
            entry.in_mini_stream = in_mini_stream;
        }
        Ok(())
    }

    /// Follows the chain of a stream that starts at `start` and has `size`
    /// bytes. The chain must have enough sectors for holding `size` bytes,
    /// sectors beyond that point are ignored.
    fn stream_chain(
        &self,
        walker: &mut ChainWalker,
        start: u32,
        size: u64,
        in_mini_stream: bool,
        chain: &str,
    ) -> Result<Vec<u32>, CorruptStructureError> {
        let (table, unit, available) = if in_mini_stream {
            (&self.mini_fat, self.mini_sector_size, self.mini_stream.len())
        } else {
            (&self.fat, self.sector_size, self.data.len())
        };

        // No stream can be larger than the data that contains it. Checking
        // this first also keeps the sector count within `usize`.
        if size > available as u64 {
            return Err(CorruptStructureError::SizeMismatch {
                chain: chain.to_string(),
                declared: size,
                capacity: available as u64,
            });
        }

        let needed = (size as usize).div_ceil(unit);
        let sectors = walker.walk(table, start, Some(needed), chain)?;

        if sectors.len() < needed {
            return Err(CorruptStructureError::SizeMismatch {
                chain: chain.to_string(),
                declared: size,
                capacity: (sectors.len() * unit) as u64,
            });
        }

        Ok(sectors)
    }

    /// Copies `size` bytes from the given sectors into `output`. When
    /// `output` is `None` it only checks that the data is present.
    fn copy_sectors(
        &self,
        sectors: &[u32],
        size: u64,
        in_mini_stream: bool,
        chain: &str,
        mut output: Option<&mut Vec<u8>>,
    ) -> Result<(), CorruptStructureError> {
        let unit =
            if in_mini_stream { self.mini_sector_size } else { self.sector_size };

        let mut remaining = size as usize;

        for sector in sectors {
            let data = if in_mini_stream {
                let start = (*sector as usize).saturating_mul(unit);
                let end = start.saturating_add(unit).min(self.mini_stream.len());
                self.mini_stream.get(start..end).unwrap_or_default()
            } else {
                self.sector(*sector)
            };

            let wanted = remaining.min(unit);

            if data.len() < wanted {
                return Err(CorruptStructureError::SectorOutOfRange {
                    sector: *sector,
                    chain: chain.to_string(),
                });
            }

            if let Some(output) = output.as_mut() {
                output.extend_from_slice(&data[..wanted]);
            }

            remaining -= wanted;
        }

        Ok(())
    }
}

/// Returns the entries in the red-black tree of siblings rooted at `root`,
/// in order. `parent` is the storage that contains the tree, and is used
/// only for error reporting.
fn sibling_tree(
    raw: &[RawEntry],
    root: u32,
    parent: u32,
    visited: &mut BitVec,
) -> Result<Vec<u32>, CorruptStructureError> {
    let mut result = Vec::new();
    let mut stack = Vec::new();
    let mut current = root;

    loop {
        while current != NOSTREAM {
            let entry = raw.get(current as usize).ok_or(
                CorruptStructureError::EntryOutOfRange {
                    entry: current,
                    parent,
                },
            )?;
            if visited[current as usize] {
                return Err(CorruptStructureError::DirectoryCycle {
                    entry: current,
                });
            }
            visited.set(current as usize, true);
            stack.push(current);
            current = entry.left_sibling;
        }
        match stack.pop() {
            Some(id) => {
                result.push(id);
                current = raw[id as usize].right_sibling;
            }
            None => break,
        }
    }

    Ok(result)
}

/// Follows sector chains in an allocation table, detecting cycles.
///
/// The bitmap used for detecting cycles is reused between walks, so that
/// checking many streams doesn't allocate a bitmap per stream.
struct ChainWalker {
    visited: BitVec,
}

impl ChainWalker {
    fn new() -> Self {
        Self { visited: BitVec::new() }
    }

    /// Returns the sectors in the chain that starts at `start`. If `limit`
    /// is `Some(n)` the walk stops after `n` sectors, if not it continues
    /// until the end-of-chain marker.
    fn walk(
        &mut self,
        table: &[u32],
        start: u32,
        limit: Option<usize>,
        chain: &str,
    ) -> Result<Vec<u32>, CorruptStructureError> {
        if self.visited.len() < table.len() {
            self.visited.resize(table.len(), false);
        }

        let mut sectors = Vec::new();
        let mut current = start;

        let result = loop {
            if current == ENDOFCHAIN
                || limit.is_some_and(|limit| sectors.len() >= limit)
            {
                break Ok(());
            }
            let index = current as usize;
            if index >= table.len() {
                break Err(CorruptStructureError::SectorOutOfRange {
                    sector: current,
                    chain: chain.to_string(),
                });
            }
            if self.visited[index] {
                break Err(CorruptStructureError::ChainCycle {
                    sector: current,
                    chain: chain.to_string(),
                });
            }
            self.visited.set(index, true);
            sectors.push(current);
            current = table[index];
        };

        for sector in &sectors {
            self.visited.set(*sector as usize, false);
        }

        result.map(|_| sectors)
    }
}

/// Depth-first iterator over the directory tree, returned by
/// [`CompoundFile::walk`].
pub struct Walk<'b, 'a> {
    cf: &'b CompoundFile<'a>,
    stack: Vec<usize>,
}

impl<'b, 'a> Iterator for Walk<'b, 'a> {
    type Item = &'b DirectoryEntry;

    fn next(&mut self) -> Option<Self::Item> {
        let entry = &self.cf.entries[self.stack.pop()?];
        self.stack.extend(entry.children.iter().rev());
        Some(entry)
    }
}
