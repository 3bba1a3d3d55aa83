/*! Locates the VBA project stored in a compound file or an OOXML package.

A VBA project is a storage named `VBA` that contains a `dir` stream with the
project metadata, plus one stream per module. In legacy Office documents the
storage lives inside the document itself (`Macros/VBA` in Word documents,
`_VBA_PROJECT_CUR/VBA` in Excel workbooks). In OOXML packages the project is
a compound file stored as a part of the ZIP archive, usually named
`vbaProject.bin`.

Read more about the VBA file format specification here:
 https://learn.microsoft.com/en-us/openspecs/office_file_formats/ms-ovba/575462ba-bf67-4190-9fac-c275523c75fc
*/

use encoding_rs::Encoding;
use log::debug;
use serde::Serialize;

use crate::compression;
use crate::errors::{AnalysisError, CorruptStructureError};
use crate::olecf::{CompoundFile, DirectoryEntry};

mod dir;
pub(crate) mod package;

#[cfg(test)]
mod tests;

/// Maximum size of the decompressed `dir` stream used by [`locate`].
pub const DEFAULT_DIR_LIMIT: usize = 16 * 1024 * 1024;

/// Type of a VBA module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ModuleKind {
    /// A standard module, extracted as a `.bas` file.
    Procedural,
    /// A class module, form or document module (`ThisDocument`,
    /// `ThisWorkbook`, `Sheet1`), extracted as a `.cls` file.
    Document,
}

impl ModuleKind {
    /// File extension used when the module is extracted.
    pub fn extension(&self) -> &'static str {
        match self {
            ModuleKind::Procedural => "bas",
            ModuleKind::Document => "cls",
        }
    }
}

/// Project-wide information from the `dir` stream.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProjectInfo {
    /// Project name.
    pub name: String,
    /// Version of the project as `major.minor`, if present.
    pub version: Option<String>,
    /// Code page used for MBCS strings, including the module sources.
    pub code_page: u16,
    /// Names of the referenced libraries and projects.
    pub references: Vec<String>,
    /// Project description.
    pub doc_string: String,
}

/// A module listed in the project metadata, with its raw stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleStream {
    /// Module name.
    pub name: String,
    /// Name of the stream that holds the module, inside the `VBA` storage.
    pub stream_name: String,
    /// Full path of the stream.
    pub stream_path: String,
    /// Module type.
    pub kind: ModuleKind,
    /// Offset of the compressed source code within the stream.
    pub source_offset: u32,
    /// Raw content of the stream.
    pub data: Vec<u8>,
}

impl ModuleStream {
    /// Decompresses the source code of this module, producing at most
    /// `limit` bytes.
    pub fn decompress(
        &self,
        limit: usize,
    ) -> Result<Vec<u8>, crate::errors::DecompressionError> {
        compression::decompress_module(&self.data, self.source_offset, limit)
    }
}

/// A VBA project and its modules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VbaProject {
    /// Information from the `dir` stream.
    pub info: ProjectInfo,
    /// Path of the `VBA` storage.
    pub storage_path: String,
    /// Name of the package part that contains the project, if the project
    /// was found inside an OOXML package.
    pub package_part: Option<String>,
    /// Modules, in the order they appear in the `dir` stream.
    pub modules: Vec<ModuleStream>,
}

impl VbaProject {
    /// Encoding that corresponds to the project code page.
    pub fn encoding(&self) -> &'static Encoding {
        encoding_for_code_page(self.info.code_page)
    }
}

/// Maps a Windows code page identifier to an encoding. Unknown code pages
/// fall back to Windows-1252, which is what most projects use.
pub fn encoding_for_code_page(code_page: u16) -> &'static Encoding {
    match code_page {
        874 => encoding_rs::WINDOWS_874,
        932 => encoding_rs::SHIFT_JIS,
        936 => encoding_rs::GBK,
        949 => encoding_rs::EUC_KR,
        950 => encoding_rs::BIG5,
        1250 => encoding_rs::WINDOWS_1250,
        1251 => encoding_rs::WINDOWS_1251,
        1253 => encoding_rs::WINDOWS_1253,
        1254 => encoding_rs::WINDOWS_1254,
        1255 => encoding_rs::WINDOWS_1255,
        1256 => encoding_rs::WINDOWS_1256,
        1257 => encoding_rs::WINDOWS_1257,
        1258 => encoding_rs::WINDOWS_1258,
        10000 => encoding_rs::MACINTOSH,
        20866 => encoding_rs::KOI8_R,
        65001 => encoding_rs::UTF_8,
        _ => encoding_rs::WINDOWS_1252,
    }
}

/// A place where the streams of a `VBA` storage can be read from.
///
/// Implemented for storages inside a compound file, and for the directories
/// of a ZIP archive that holds the streams as individual files.
pub(crate) trait ProjectStorage {
    /// Path of the `VBA` storage.
    fn path(&self) -> String;

    /// Reads a stream from the storage, `None` if it doesn't exist.
    fn read_stream(
        &mut self,
        name: &str,
    ) -> Result<Option<Vec<u8>>, AnalysisError>;
}

struct OleStorage<'b, 'a> {
    cf: &'b CompoundFile<'a>,
    storage: &'b DirectoryEntry,
}

impl ProjectStorage for OleStorage<'_, '_> {
    fn path(&self) -> String {
        self.cf.path(self.storage)
    }

    fn read_stream(
        &mut self,
        name: &str,
    ) -> Result<Option<Vec<u8>>, AnalysisError> {
        self.cf
            .child(self.storage, name)
            .filter(|entry| entry.is_stream())
            .map(|entry| self.cf.read_stream(entry))
            .transpose()
    }
}

/// Finds the VBA project in a compound file.
///
/// Returns `Ok(None)` if the file doesn't contain a project. If more than
/// one `VBA` storage exists, the first one in depth-first order is used.
pub fn locate(
    cf: &CompoundFile,
) -> Result<Option<VbaProject>, AnalysisError> {
    locate_with_limit(cf, DEFAULT_DIR_LIMIT)
}

pub(crate) fn locate_with_limit(
    cf: &CompoundFile,
    dir_limit: usize,
) -> Result<Option<VbaProject>, AnalysisError> {
    let storage = cf.walk().find(|entry| {
        entry.is_storage()
            && entry.has_name("VBA")
            && cf.child(entry, "dir").is_some_and(|dir| dir.is_stream())
    });

    match storage {
        Some(storage) => {
            load_project(&mut OleStorage { cf, storage }, dir_limit).map(Some)
        }
        None => Ok(None),
    }
}

/// Reads the project metadata and the streams of every module listed in
/// it.
pub(crate) fn load_project(
    storage: &mut impl ProjectStorage,
    dir_limit: usize,
) -> Result<VbaProject, AnalysisError> {
    let storage_path = storage.path();
    let dir_path = join(&storage_path, "dir");

    debug!("loading VBA project from `{}`", storage_path);

    let compressed = storage.read_stream("dir")?.ok_or_else(|| {
        CorruptStructureError::MissingModuleStream {
            module: "dir".to_string(),
            stream: dir_path.clone(),
        }
    })?;

    let dir = compression::decompress(&compressed, dir_limit).map_err(|err| {
        CorruptStructureError::ProjectStream { stream: dir_path, err }
    })?;

    let records = dir::parse_dir(&dir)?;
    let mut modules = Vec::with_capacity(records.modules.len());

    for module in records.modules {
        let stream_path = join(&storage_path, &module.stream_name);
        let data = storage.read_stream(&module.stream_name)?.ok_or_else(|| {
            CorruptStructureError::MissingModuleStream {
                module: module.name.clone(),
                stream: stream_path.clone(),
            }
        })?;
        modules.push(ModuleStream {
            name: module.name,
            stream_name: module.stream_name,
            stream_path,
            kind: module.kind,
            source_offset: module.source_offset,
            data,
        });
    }

    debug!(
        "VBA project `{}` has {} modules",
        records.info.name,
        modules.len()
    );

    Ok(VbaProject {
        info: records.info,
        storage_path,
        package_part: None,
        modules,
    })
}

fn join(storage: &str, name: &str) -> String {
    if storage.is_empty() {
        name.to_string()
    } else {
        format!("{storage}/{name}")
    }
}
