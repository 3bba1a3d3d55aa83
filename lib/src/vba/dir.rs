use encoding_rs::Encoding;
use log::debug;
use nom::bytes::complete::take;
use nom::number::complete::{le_u16, le_u32};
use nom::sequence::tuple;
use nom::IResult;

use crate::errors::CorruptStructureError;
use crate::vba::{encoding_for_code_page, ModuleKind, ProjectInfo};

const PROJECT_CODE_PAGE: u16 = 0x0003;
const PROJECT_NAME: u16 = 0x0004;
const PROJECT_DOC_STRING: u16 = 0x0005;
const PROJECT_VERSION: u16 = 0x0009;
const PROJECT_MODULES: u16 = 0x000F;
const DIR_TERMINATOR: u16 = 0x0010;
const REFERENCE_NAME: u16 = 0x0016;
const MODULE_NAME: u16 = 0x0019;
const MODULE_STREAM_NAME: u16 = 0x001A;
const MODULE_PROCEDURAL: u16 = 0x0021;
const MODULE_DOCUMENT: u16 = 0x0022;
const MODULE_TERMINATOR: u16 = 0x002B;
const MODULE_OFFSET: u16 = 0x0031;
const MODULE_STREAM_NAME_UNICODE: u16 = 0x0032;
const REFERENCE_NAME_UNICODE: u16 = 0x003E;
const PROJECT_DOC_STRING_UNICODE: u16 = 0x0040;
const MODULE_NAME_UNICODE: u16 = 0x0047;

/// Module descriptor, as found in the `dir` stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ModuleRecord {
    pub name: String,
    pub stream_name: String,
    pub kind: ModuleKind,
    pub source_offset: u32,
}

/// Content of the `dir` stream after decompression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ProjectRecords {
    pub info: ProjectInfo,
    pub modules: Vec<ModuleRecord>,
}

/// A record in the `dir` stream: identifier and payload.
struct Record<'a> {
    id: u16,
    payload: &'a [u8],
}

impl<'a> Record<'a> {
    fn parse(input: &'a [u8]) -> IResult<&'a [u8], Record<'a>> {
        let (input, (id, size)) = tuple((le_u16, le_u32))(input)?;

        // In PROJECTVERSION the size field is always 4, but it's followed
        // by a 4-byte major version and a 2-byte minor version.
        let size = if id == PROJECT_VERSION { 6 } else { size as usize };
        let (input, payload) = take(size)(input)?;

        Ok((input, Record { id, payload }))
    }

    fn u16(&self, offset: usize) -> Result<u16, CorruptStructureError> {
        le_u16::<_, nom::error::Error<_>>(self.payload)
            .map(|(_, value)| value)
            .map_err(|_| self.invalid(offset, "payload too short"))
    }

    fn u32(&self, offset: usize) -> Result<u32, CorruptStructureError> {
        le_u32::<_, nom::error::Error<_>>(self.payload)
            .map(|(_, value)| value)
            .map_err(|_| self.invalid(offset, "payload too short"))
    }

    fn invalid(
        &self,
        offset: usize,
        reason: &'static str,
    ) -> CorruptStructureError {
        CorruptStructureError::InvalidProjectRecord {
            id: self.id,
            offset,
            reason,
        }
    }
}

/// Module descriptor being built while its records are parsed.
#[derive(Default)]
struct PartialModule {
    name: String,
    name_unicode: Option<String>,
    stream_name: Option<String>,
    stream_name_unicode: Option<String>,
    kind: Option<ModuleKind>,
    source_offset: u32,
}

fn decode_utf16(payload: &[u8]) -> String {
    let units: Vec<u16> = payload
        .chunks_exact(2)
        .map(|c| u16::from_le_bytes([c[0], c[1]]))
        .collect();
    String::from_utf16_lossy(&units)
}

fn decode(encoding: &'static Encoding, payload: &[u8]) -> String {
    encoding.decode_without_bom_handling(payload).0.into_owned()
}

/// Parses the decompressed `dir` stream.
pub(crate) fn parse_dir(
    dir: &[u8],
) -> Result<ProjectRecords, CorruptStructureError> {
    let mut info = ProjectInfo {
        code_page: 1252,
        ..Default::default()
    };

    let mut encoding = encoding_for_code_page(info.code_page);
    let mut doc_string_unicode = None;
    let mut module_count: Option<(u16, usize)> = None;
    let mut modules = Vec::new();
    let mut current: Option<PartialModule> = None;
    let mut previous_id = None;
    let mut input = dir;

    while !input.is_empty() {
        let offset = dir.len() - input.len();

        let (remainder, record) = Record::parse(input).map_err(|_| {
            CorruptStructureError::InvalidProjectRecord {
                id: le_u16::<_, nom::error::Error<_>>(input)
                    .map(|(_, id)| id)
                    .unwrap_or_default(),
                offset,
                reason: "truncated record",
            }
        })?;

        input = remainder;

        match record.id {
            PROJECT_CODE_PAGE => {
                info.code_page = record.u16(offset)?;
                encoding = encoding_for_code_page(info.code_page);
            }
            PROJECT_NAME => {
                info.name = decode(encoding, record.payload);
            }
            PROJECT_DOC_STRING => {
                info.doc_string = decode(encoding, record.payload);
            }
            PROJECT_DOC_STRING_UNICODE => {
                doc_string_unicode = Some(decode_utf16(record.payload));
            }
            PROJECT_VERSION => {
                let major = record.u32(offset)?;
                let minor = u16::from_le_bytes([
                    record.payload[4],
                    record.payload[5],
                ]);
                info.version = Some(format!("{major}.{minor}"));
            }
            REFERENCE_NAME => {
                info.references.push(decode(encoding, record.payload));
            }
            REFERENCE_NAME_UNICODE => {
                // Always follows the MBCS version of the same name.
                if previous_id == Some(REFERENCE_NAME) {
                    if let Some(name) = info.references.last_mut() {
                        *name = decode_utf16(record.payload);
                    }
                }
            }
            PROJECT_MODULES => {
                module_count = Some((record.u16(offset)?, offset));
            }
            MODULE_NAME => {
                if current.is_some() {
                    return Err(record.invalid(offset, "unterminated module"));
                }
                current = Some(PartialModule {
                    name: decode(encoding, record.payload),
                    ..Default::default()
                });
            }
            MODULE_NAME_UNICODE
            | MODULE_STREAM_NAME
            | MODULE_STREAM_NAME_UNICODE
            | MODULE_OFFSET
            | MODULE_PROCEDURAL
            | MODULE_DOCUMENT
            | MODULE_TERMINATOR => {
                let Some(module) = current.as_mut() else {
                    return Err(
                        record.invalid(offset, "module record outside module")
                    );
                };
                match record.id {
                    MODULE_NAME_UNICODE => {
                        module.name_unicode =
                            Some(decode_utf16(record.payload));
                    }
                    MODULE_STREAM_NAME => {
                        module.stream_name =
                            Some(decode(encoding, record.payload));
                    }
                    MODULE_STREAM_NAME_UNICODE => {
                        module.stream_name_unicode =
                            Some(decode_utf16(record.payload));
                    }
                    MODULE_OFFSET => {
                        module.source_offset = record.u32(offset)?;
                    }
                    MODULE_PROCEDURAL => {
                        module.kind = Some(ModuleKind::Procedural);
                    }
                    MODULE_DOCUMENT => {
                        module.kind = Some(ModuleKind::Document);
                    }
                    _ => {
                        if let Some(module) = current.take() {
                            modules.push(finish_module(module, &record, offset)?);
                        }
                    }
                }
            }
            DIR_TERMINATOR => break,
            id => {
                debug!("skipping dir record {:#06x} at offset {}", id, offset);
            }
        }

        previous_id = Some(record.id);
    }

    if let Some(module) = current {
        return Err(CorruptStructureError::InvalidProjectRecord {
            id: MODULE_NAME,
            offset: dir.len(),
            reason: if module.stream_name.is_some() {
                "unterminated module"
            } else {
                "module without stream name"
            },
        });
    }

    match module_count {
        Some((count, _)) if count as usize == modules.len() => {}
        Some((_, offset)) => {
            return Err(CorruptStructureError::InvalidProjectRecord {
                id: PROJECT_MODULES,
                offset,
                reason: "module count doesn't match module records",
            })
        }
        None if modules.is_empty() => {}
        None => {
            return Err(CorruptStructureError::InvalidProjectRecord {
                id: PROJECT_MODULES,
                offset: 0,
                reason: "missing module count",
            })
        }
    }

    if let Some(doc_string) = doc_string_unicode {
        info.doc_string = doc_string;
    }

    Ok(ProjectRecords { info, modules })
}

fn finish_module(
    module: PartialModule,
    record: &Record,
    offset: usize,
) -> Result<ModuleRecord, CorruptStructureError> {
    let stream_name = module
        .stream_name_unicode
        .filter(|name| !name.is_empty())
        .or(module.stream_name)
        .ok_or(record.invalid(offset, "module without stream name"))?;

    Ok(ModuleRecord {
        name: module
            .name_unicode
            .filter(|name| !name.is_empty())
            .unwrap_or(module.name),
        stream_name,
        // A module without type record is treated as a standard module.
        kind: module.kind.unwrap_or(ModuleKind::Procedural),
        source_offset: module.source_offset,
    })
}
