/*! Errors returned by this crate.

[`AnalysisError`] is fatal for the analyzed file. [`DecompressionError`] is
fatal only for the module it refers to, and is reported inside the
[`crate::AnalysisReport`] instead of being returned to the caller.
*/

use thiserror::Error;

/// Error returned by [`crate::analyze`] and [`crate::Analyzer::analyze`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AnalysisError {
    /// The data doesn't start with the signature of any supported container
    /// (OLE compound file or ZIP-based package).
    #[error("unsupported file format, not an OLE compound file or OOXML package")]
    Format,

    /// The container is recognized, but its internal structure is
    /// inconsistent.
    #[error(transparent)]
    CorruptStructure(#[from] CorruptStructureError),
}

/// Inconsistencies found while parsing a container or the metadata of a
/// VBA project.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum CorruptStructureError {
    /// The file is too short for holding a compound file header.
    #[error("truncated compound file header ({size} bytes)")]
    TruncatedHeader {
        /// Size of the input.
        size: usize,
    },

    /// Some header field has a value that makes the file unparseable.
    #[error("invalid value {value:#x} for header field `{field}`")]
    InvalidHeader {
        /// Name of the header field.
        field: &'static str,
        /// Value found in the file.
        value: u32,
    },

    /// A sector index that points outside the file or the allocation table.
    #[error("sector {sector} out of range in {chain}")]
    SectorOutOfRange {
        /// The sector index.
        sector: u32,
        /// Description of the chain being followed.
        chain: String,
    },

    /// A sector chain that visits the same sector twice.
    #[error("cycle detected at sector {sector} in {chain}")]
    ChainCycle {
        /// The sector visited twice.
        sector: u32,
        /// Description of the chain being followed.
        chain: String,
    },

    /// The number of sectors in a chain doesn't match the declared size.
    #[error("{chain} declares {declared} bytes, but its chain holds {capacity}")]
    SizeMismatch {
        /// Description of the chain.
        chain: String,
        /// Size declared by the header or directory entry.
        declared: u64,
        /// Number of bytes that the chain can actually hold.
        capacity: u64,
    },

    /// A directory entry index that is out of range.
    #[error("directory entry {entry} referenced by entry {parent} doesn't exist")]
    EntryOutOfRange {
        /// The missing entry.
        entry: u32,
        /// The entry that references it.
        parent: u32,
    },

    /// The directory tree visits the same entry twice.
    #[error("cycle detected in directory tree at entry {entry}")]
    DirectoryCycle {
        /// The entry visited twice.
        entry: u32,
    },

    /// A directory entry with an unexpected type or content.
    #[error("invalid directory entry {entry}: {reason}")]
    InvalidEntry {
        /// Index of the entry.
        entry: u32,
        /// What is wrong with it.
        reason: &'static str,
    },

    /// The VBA project metadata stream (`dir`) can't be decompressed.
    #[error("can not decompress `{stream}`: {err}")]
    ProjectStream {
        /// Path of the metadata stream.
        stream: String,
        /// The decompression error.
        err: DecompressionError,
    },

    /// A malformed record in the VBA project metadata.
    #[error("invalid project record {id:#06x} at offset {offset}: {reason}")]
    InvalidProjectRecord {
        /// Record identifier.
        id: u16,
        /// Offset of the record within the decompressed `dir` stream.
        offset: usize,
        /// What is wrong with it.
        reason: &'static str,
    },

    /// A module listed in the project metadata doesn't have a stream.
    #[error("module `{module}` refers to missing stream `{stream}`")]
    MissingModuleStream {
        /// Name of the module.
        module: String,
        /// Path of the missing stream.
        stream: String,
    },

    /// The ZIP container of an OOXML package is broken.
    #[error("invalid package: {reason}")]
    Package {
        /// Description returned by the ZIP reader.
        reason: String,
    },
}

/// Error produced while decompressing a module.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum DecompressionError {
    /// The source offset declared in the project metadata is beyond the end
    /// of the module stream.
    #[error("source offset {offset} beyond end of stream ({size} bytes)")]
    InvalidSourceOffset {
        /// The declared offset.
        offset: u32,
        /// Size of the module stream.
        size: usize,
    },

    /// The compressed container doesn't start with `0x01`.
    #[error("invalid signature byte {found:#04x} at offset {offset}")]
    InvalidSignature {
        /// Offset of the signature byte.
        offset: usize,
        /// The byte found.
        found: u8,
    },

    /// A chunk header with the wrong signature bits, or an uncompressed
    /// chunk with a size other than 4096.
    #[error("invalid chunk header {header:#06x} at offset {offset}")]
    InvalidChunkHeader {
        /// Offset of the header.
        offset: usize,
        /// The header value.
        header: u16,
    },

    /// A chunk or chunk header extends beyond the end of the input.
    #[error("truncated chunk at offset {offset}")]
    TruncatedChunk {
        /// Offset of the chunk header.
        offset: usize,
    },

    /// A copy token that refers to data before the start of the chunk, or
    /// that would produce more than 4096 bytes in the chunk.
    #[error(
        "invalid copy token at offset {offset}: distance {distance}, \
         length {length}, {available} bytes in window"
    )]
    InvalidCopyToken {
        /// Offset of the token.
        offset: usize,
        /// Back-reference distance.
        distance: usize,
        /// Number of bytes to copy.
        length: usize,
        /// Bytes already written in the current chunk.
        available: usize,
    },

    /// A literal token that would produce more than 4096 bytes in the chunk.
    #[error("chunk at offset {offset} decompresses to more than 4096 bytes")]
    ChunkOverflow {
        /// Offset of the chunk header.
        offset: usize,
    },

    /// The decompressed data exceeds the configured limit.
    #[error("decompressed size exceeds the limit of {limit} bytes")]
    LimitExceeded {
        /// The limit.
        limit: usize,
    },
}

/// Error returned when a pattern database can't be compiled.
#[derive(Error, Debug)]
pub enum PatternError {
    /// A regular expression in the database is invalid.
    #[error("invalid regular expression `{pattern}`: {err}")]
    InvalidRegex {
        /// The regular expression.
        pattern: String,
        /// Error returned by the regex compiler.
        err: Box<regex::Error>,
    },

    /// The keyword automaton couldn't be built.
    #[error("can not build keyword matcher: {0}")]
    Automaton(#[from] aho_corasick::BuildError),
}
