/*! Locates VBA projects inside OOXML packages (`.docm`, `.xlsm`, ...).

The package is a ZIP archive. The project is normally a compound file stored
as a part named `vbaProject.bin`, but any part that starts with the compound
file signature is considered. Some tools also store the streams of the
`VBA` storage as individual files in the archive (`VBA/dir`,
`VBA/Module1`, ...), that layout is supported too.
*/

use std::collections::HashMap;
use std::io::{Cursor, Read};

use log::debug;
use zip::ZipArchive;

use crate::errors::{AnalysisError, CorruptStructureError};
use crate::olecf::{is_compound_file, CompoundFile};
use crate::vba::{load_project, locate_with_limit, ProjectStorage, VbaProject};

const ZIP_SIGNATURE: &[u8] = &[0x50, 0x4B, 0x03, 0x04];

/// Returns `true` if `data` starts with the signature of a ZIP archive.
pub(crate) fn is_package(data: &[u8]) -> bool {
    data.starts_with(ZIP_SIGNATURE)
}

fn package_error(err: zip::result::ZipError) -> AnalysisError {
    CorruptStructureError::Package { reason: err.to_string() }.into()
}

/// Reads the part at `index`, which can't be larger than `limit` bytes.
fn read_part(
    archive: &mut ZipArchive<Cursor<&[u8]>>,
    index: usize,
    limit: usize,
) -> Result<Vec<u8>, AnalysisError> {
    let part = archive.by_index(index).map_err(package_error)?;
    let name = part.name().to_string();

    if part.size() > limit as u64 {
        return Err(CorruptStructureError::Package {
            reason: format!("part `{name}` is larger than {limit} bytes"),
        }
        .into());
    }

    // The size in the archive can't be trusted, the read is bounded anyway.
    let mut data = Vec::with_capacity(part.size() as usize);
    part.take(limit as u64 + 1).read_to_end(&mut data).map_err(|err| {
        CorruptStructureError::Package {
            reason: format!("can not read part `{name}`: {err}"),
        }
    })?;

    if data.len() > limit {
        return Err(CorruptStructureError::Package {
            reason: format!("part `{name}` is larger than {limit} bytes"),
        }
        .into());
    }

    Ok(data)
}

/// Returns `true` if the part at `index` starts with the compound file
/// signature.
///
/// Parts that can't be opened, for instance because they use an unsupported
/// compression method, are not compound files.
fn is_compound_part(
    archive: &mut ZipArchive<Cursor<&[u8]>>,
    index: usize,
    name: &str,
) -> Result<bool, AnalysisError> {
    let part = match archive.by_index(index) {
        Ok(part) => part,
        Err(err) => {
            debug!("skipping package part `{name}`: {err}");
            return Ok(false);
        }
    };
    if part.is_dir() {
        return Ok(false);
    }
    let mut magic = Vec::with_capacity(8);
    part.take(8).read_to_end(&mut magic).map_err(|err| {
        CorruptStructureError::Package { reason: err.to_string() }
    })?;
    Ok(is_compound_file(&magic))
}

/// Finds the VBA project in an OOXML package.
pub(crate) fn locate_in_package(
    data: &[u8],
    part_limit: usize,
    dir_limit: usize,
) -> Result<Option<VbaProject>, AnalysisError> {
    let mut archive =
        ZipArchive::new(Cursor::new(data)).map_err(package_error)?;

    let names = (0..archive.len())
        .map(|index| {
            archive
                .by_index_raw(index)
                .map(|part| part.name().to_string())
                .map_err(package_error)
        })
        .collect::<Result<Vec<_>, _>>()?;

    let mut indexes: Vec<usize> = (0..names.len()).collect();

    // Parts named `vbaProject.bin` go first, the sort is stable so the rest
    // keep the archive order.
    indexes.sort_by_key(|index| !is_vba_project_part(&names[*index]));

    for index in indexes {
        if !is_compound_part(&mut archive, index, &names[index])? {
            continue;
        }

        let part = read_part(&mut archive, index, part_limit)?;
        let cf = CompoundFile::parse(&part)?;

        if let Some(mut project) = locate_with_limit(&cf, dir_limit)? {
            debug!("VBA project found in package part `{}`", names[index]);
            project.package_part = Some(names[index].clone());
            return Ok(Some(project));
        }
    }

    // Streams stored as individual files, look for any `.../VBA/dir`.
    let dir = names.iter().find(|name| {
        let mut components = name.rsplit('/');
        components.next().is_some_and(|c| c.eq_ignore_ascii_case("dir"))
            && components.next().is_some_and(|c| c.eq_ignore_ascii_case("vba"))
    });

    let Some(dir) = dir else {
        return Ok(None);
    };

    let prefix = dir[..dir.len() - "dir".len()].to_string();

    let entries = names
        .iter()
        .enumerate()
        .filter_map(|(index, name)| {
            let stream = name.get(prefix.len()..)?;
            name.get(..prefix.len())?
                .eq_ignore_ascii_case(&prefix)
                .then(|| (stream.to_lowercase(), index))
        })
        .collect();

    let mut storage = ZipStorage {
        archive,
        path: prefix.trim_end_matches('/').to_string(),
        entries,
        part_limit,
    };

    load_project(&mut storage, dir_limit).map(Some)
}

fn is_vba_project_part(name: &str) -> bool {
    name.rsplit('/')
        .next()
        .is_some_and(|name| name.eq_ignore_ascii_case("vbaProject.bin"))
}

/// A `VBA` storage whose streams are files in a ZIP archive.
struct ZipStorage<'a> {
    archive: ZipArchive<Cursor<&'a [u8]>>,
    path: String,
    /// Maps lowercase stream names to archive indexes.
    entries: HashMap<String, usize>,
    part_limit: usize,
}

impl ProjectStorage for ZipStorage<'_> {
    fn path(&self) -> String {
        self.path.clone()
    }

    fn read_stream(
        &mut self,
        name: &str,
    ) -> Result<Option<Vec<u8>>, AnalysisError> {
        match self.entries.get(&name.to_lowercase()) {
            Some(index) => {
                read_part(&mut self.archive, *index, self.part_limit).map(Some)
            }
            None => Ok(None),
        }
    }
}
