use pretty_assertions::assert_eq;

use crate::compression::compress;
use crate::errors::{AnalysisError, CorruptStructureError};
use crate::olecf::CompoundFile;
use crate::tests::cfb::CfbBuilder;
use crate::tests::project::ProjectBuilder;
use crate::vba::dir::{parse_dir, ModuleRecord};
use crate::vba::{encoding_for_code_page, locate, ModuleKind};

fn record(dir: &mut Vec<u8>, id: u16, payload: &[u8]) {
    dir.extend(id.to_le_bytes());
    dir.extend((payload.len() as u32).to_le_bytes());
    dir.extend(payload);
}

fn utf16(s: &str) -> Vec<u8> {
    s.encode_utf16().flat_map(|u| u.to_le_bytes()).collect()
}

fn invalid_record(dir: &[u8]) -> (u16, usize, &'static str) {
    match parse_dir(dir) {
        Err(CorruptStructureError::InvalidProjectRecord { id, offset, reason }) => {
            (id, offset, reason)
        }
        other => panic!("expecting invalid project record, got {:?}", other),
    }
}

#[test]
fn project_records() {
    let project = ProjectBuilder::new("Project")
        .doc_string("Some description")
        .reference("stdole")
        .reference("Office")
        .document_module("ThisDocument", "")
        .module("Module1", "")
        .with_cache(100);

    let records = parse_dir(&project.dir_records()).unwrap();

    assert_eq!(records.info.name, "Project");
    assert_eq!(records.info.code_page, 1252);
    assert_eq!(records.info.version.as_deref(), Some("1534863902.7"));
    assert_eq!(records.info.doc_string, "Some description");
    assert_eq!(records.info.references, vec!["stdole", "Office"]);

    assert_eq!(
        records.modules,
        vec![
            ModuleRecord {
                name: "ThisDocument".to_string(),
                stream_name: "ThisDocument".to_string(),
                kind: ModuleKind::Document,
                source_offset: 0,
            },
            ModuleRecord {
                name: "Module1".to_string(),
                stream_name: "Module1".to_string(),
                kind: ModuleKind::Procedural,
                source_offset: 100,
            },
        ]
    );
}

#[test]
fn default_code_page() {
    let mut dir = Vec::new();
    record(&mut dir, 0x0004, b"Project");
    record(&mut dir, 0x0010, b"");

    let records = parse_dir(&dir).unwrap();

    assert_eq!(records.info.name, "Project");
    assert_eq!(records.info.code_page, 1252);
    assert_eq!(records.info.version, None);
    assert!(records.modules.is_empty());
}

#[test]
fn records_after_terminator_are_ignored() {
    let mut dir = Vec::new();
    record(&mut dir, 0x0004, b"Project");
    record(&mut dir, 0x0010, b"");
    dir.extend([0xFF; 3]);

    assert_eq!(parse_dir(&dir).unwrap().info.name, "Project");
}

#[test]
fn mbcs_names_use_code_page() {
    let mut dir = Vec::new();
    record(&mut dir, 0x0003, &1251_u16.to_le_bytes());
    // "Проект" in Windows-1251.
    record(&mut dir, 0x0004, &[0xCF, 0xF0, 0xEE, 0xE5, 0xEA, 0xF2]);
    record(&mut dir, 0x0005, &[0xCE, 0xEF, 0xE8, 0xF1]);
    record(&mut dir, 0x0016, &[0xC1, 0xE8, 0xE1]);
    record(&mut dir, 0x0010, b"");

    let records = parse_dir(&dir).unwrap();

    assert_eq!(records.info.code_page, 1251);
    assert_eq!(records.info.name, "Проект");
    assert_eq!(records.info.doc_string, "Опис");
    assert_eq!(records.info.references, vec!["Биб"]);
}

#[test]
fn unicode_names_preferred() {
    let mut dir = Vec::new();
    record(&mut dir, 0x0005, b"doc ?");
    record(&mut dir, 0x0040, &utf16("doc ✓"));
    record(&mut dir, 0x0016, b"lib ?");
    record(&mut dir, 0x003E, &utf16("lib ✓"));
    record(&mut dir, 0x000F, &1_u16.to_le_bytes());
    record(&mut dir, 0x0019, b"Modul ?");
    record(&mut dir, 0x0047, &utf16("Modul ✓"));
    record(&mut dir, 0x001A, b"Stream ?");
    record(&mut dir, 0x0032, &utf16("Stream ✓"));
    record(&mut dir, 0x0031, &0_u32.to_le_bytes());
    record(&mut dir, 0x002B, b"");
    record(&mut dir, 0x0010, b"");

    let records = parse_dir(&dir).unwrap();

    assert_eq!(records.info.doc_string, "doc ✓");
    assert_eq!(records.info.references, vec!["lib ✓"]);
    assert_eq!(records.modules[0].name, "Modul ✓");
    assert_eq!(records.modules[0].stream_name, "Stream ✓");
}

#[test]
fn unicode_reference_without_mbcs_name() {
    let mut dir = Vec::new();
    record(&mut dir, 0x0016, b"first");
    record(&mut dir, 0x000D, b"*\\G{...}");
    record(&mut dir, 0x003E, &utf16("orphan"));
    record(&mut dir, 0x0010, b"");

    assert_eq!(parse_dir(&dir).unwrap().info.references, vec!["first"]);
}

#[test]
fn empty_unicode_names_are_ignored() {
    let project = ProjectBuilder::new("Project").module("Module1", "");
    let mut dir = project.dir_records();

    // Replace the Unicode stream name with an empty one.
    let needle = utf16("Module1");
    let position = dir
        .windows(needle.len() + 6)
        .position(|w| w[0] == 0x32 && w[1] == 0 && w[6..] == needle[..])
        .unwrap();
    dir.drain(position + 6..position + 6 + needle.len());
    dir[position + 2..position + 6].copy_from_slice(&0_u32.to_le_bytes());

    let records = parse_dir(&dir).unwrap();
    assert_eq!(records.modules[0].stream_name, "Module1");
}

#[test]
fn module_without_type_is_procedural() {
    let mut dir = Vec::new();
    record(&mut dir, 0x000F, &1_u16.to_le_bytes());
    record(&mut dir, 0x0019, b"Module1");
    record(&mut dir, 0x001A, b"Module1");
    record(&mut dir, 0x002B, b"");

    let records = parse_dir(&dir).unwrap();
    assert_eq!(records.modules[0].kind, ModuleKind::Procedural);
}

#[test]
fn module_count_mismatch() {
    let project = ProjectBuilder::new("Project")
        .module("Module1", "")
        .module("Module2", "")
        .module_count(3);

    let (id, _, reason) = invalid_record(&project.dir_records());
    assert_eq!(id, 0x000F);
    assert_eq!(reason, "module count doesn't match module records");
}

#[test]
fn missing_module_count() {
    let mut dir = Vec::new();
    record(&mut dir, 0x0019, b"Module1");
    record(&mut dir, 0x001A, b"Module1");
    record(&mut dir, 0x002B, b"");
    record(&mut dir, 0x0010, b"");

    assert_eq!(invalid_record(&dir), (0x000F, 0, "missing module count"));
}

#[test]
fn unterminated_module() {
    let mut dir = Vec::new();
    record(&mut dir, 0x000F, &2_u16.to_le_bytes());
    record(&mut dir, 0x0019, b"Module1");
    record(&mut dir, 0x001A, b"Module1");
    let offset = dir.len();
    record(&mut dir, 0x0019, b"Module2");

    assert_eq!(invalid_record(&dir), (0x0019, offset, "unterminated module"));

    // Stream ends inside a module.
    let mut dir = Vec::new();
    record(&mut dir, 0x000F, &1_u16.to_le_bytes());
    record(&mut dir, 0x0019, b"Module1");
    record(&mut dir, 0x001A, b"Module1");

    assert_eq!(
        invalid_record(&dir),
        (0x0019, dir.len(), "unterminated module")
    );
}

#[test]
fn module_without_stream_name() {
    let mut dir = Vec::new();
    record(&mut dir, 0x000F, &1_u16.to_le_bytes());
    record(&mut dir, 0x0019, b"Module1");
    let offset = dir.len();
    record(&mut dir, 0x002B, b"");

    assert_eq!(
        invalid_record(&dir),
        (0x002B, offset, "module without stream name")
    );
}

#[test]
fn record_outside_module() {
    let mut dir = Vec::new();
    record(&mut dir, 0x0004, b"Project");
    record(&mut dir, 0x0031, &0_u32.to_le_bytes());

    assert_eq!(invalid_record(&dir), (0x0031, 13, "module record outside module"));
}

#[test]
fn truncated_record() {
    let mut dir = Vec::new();
    record(&mut dir, 0x0004, b"Project");
    dir.extend(0x0005_u16.to_le_bytes());
    dir.extend(100_u32.to_le_bytes());
    dir.extend(b"short");

    assert_eq!(invalid_record(&dir), (0x0005, 13, "truncated record"));

    // Not even a full record header.
    assert_eq!(invalid_record(&[0x04]), (0, 0, "truncated record"));
}

#[test]
fn short_payloads() {
    let mut dir = Vec::new();
    record(&mut dir, 0x0003, &[0xE4]);

    assert_eq!(invalid_record(&dir), (0x0003, 0, "payload too short"));
}

#[test]
fn code_pages() {
    assert_eq!(encoding_for_code_page(1252), encoding_rs::WINDOWS_1252);
    assert_eq!(encoding_for_code_page(1251), encoding_rs::WINDOWS_1251);
    assert_eq!(encoding_for_code_page(932), encoding_rs::SHIFT_JIS);
    assert_eq!(encoding_for_code_page(65001), encoding_rs::UTF_8);
    assert_eq!(encoding_for_code_page(12345), encoding_rs::WINDOWS_1252);
}

#[test]
fn module_extensions() {
    assert_eq!(ModuleKind::Procedural.extension(), "bas");
    assert_eq!(ModuleKind::Document.extension(), "cls");
}

#[test]
fn locate_project() {
    let project = ProjectBuilder::new("Project")
        .document_module("ThisWorkbook", "")
        .module("Module1", "Sub Foo()\r\nEnd Sub\r\n")
        .with_stream_name("Stream1")
        .with_cache(10);

    let mut cfb = CfbBuilder::new();
    cfb.add_path("Workbook", &[0; 5000]);
    project.add_to(&mut cfb, "_VBA_PROJECT_CUR");
    let data = cfb.build();

    let cf = CompoundFile::parse(&data).unwrap();
    let vba = locate(&cf).unwrap().unwrap();

    assert_eq!(vba.storage_path, "_VBA_PROJECT_CUR/VBA");
    assert_eq!(vba.package_part, None);
    assert_eq!(vba.info.name, "Project");
    assert_eq!(vba.encoding(), encoding_rs::WINDOWS_1252);
    assert_eq!(vba.modules.len(), 2);

    let module = &vba.modules[1];

    assert_eq!(module.name, "Module1");
    assert_eq!(module.stream_name, "Stream1");
    assert_eq!(module.stream_path, "_VBA_PROJECT_CUR/VBA/Stream1");
    assert_eq!(module.source_offset, 10);
    assert_eq!(module.data.len(), 10 + compress(b"Sub Foo()\r\nEnd Sub\r\n").len());
    assert_eq!(
        module.decompress(1024).unwrap(),
        b"Sub Foo()\r\nEnd Sub\r\n"
    );
}

#[test]
fn locate_skips_storages_without_dir() {
    let mut cfb = CfbBuilder::new();
    // Found first in depth-first order, but it isn't a project.
    cfb.add_path("A/VBA/Module1", b"garbage");
    ProjectBuilder::new("Real").module("Module1", "").add_to(&mut cfb, "B");
    let data = cfb.build();

    let cf = CompoundFile::parse(&data).unwrap();
    let vba = locate(&cf).unwrap().unwrap();

    assert_eq!(vba.storage_path, "B/VBA");
    assert_eq!(vba.info.name, "Real");
}

#[test]
fn locate_first_project() {
    let mut cfb = CfbBuilder::new();
    ProjectBuilder::new("First").add_to(&mut cfb, "A");
    ProjectBuilder::new("Second").add_to(&mut cfb, "B");
    let data = cfb.build();

    let cf = CompoundFile::parse(&data).unwrap();
    assert_eq!(locate(&cf).unwrap().unwrap().info.name, "First");
}

#[test]
fn locate_without_project() {
    let mut cfb = CfbBuilder::new();
    cfb.add_path("WordDocument", &[0; 100]);
    cfb.add_path("VBA", b"a stream, not a storage");
    let data = cfb.build();

    let cf = CompoundFile::parse(&data).unwrap();
    assert_eq!(locate(&cf).unwrap(), None);
}

#[test]
fn dir_stream_not_compressed() {
    let mut cfb = CfbBuilder::new();
    let project = ProjectBuilder::new("Project");
    cfb.add_path("Macros/VBA/dir", &project.dir_records());
    let data = cfb.build();

    let cf = CompoundFile::parse(&data).unwrap();

    assert!(matches!(
        locate(&cf),
        Err(AnalysisError::CorruptStructure(
            CorruptStructureError::ProjectStream { ref stream, .. }
        )) if stream == "Macros/VBA/dir"
    ));
}
