use pretty_assertions::assert_eq;

use crate::errors::{AnalysisError, CorruptStructureError};
use crate::olecf::{is_compound_file, CompoundFile, EntryType};
use crate::tests::cfb::{field, put_u32, CfbBuilder};

fn parse_err(data: &[u8]) -> CorruptStructureError {
    match CompoundFile::parse(data) {
        Err(AnalysisError::CorruptStructure(err)) => err,
        Err(err) => panic!("unexpected error: {:?}", err),
        Ok(_) => panic!("corrupt file was parsed"),
    }
}

fn sample() -> CfbBuilder {
    let mut cfb = CfbBuilder::new();
    cfb.add_path("WordDocument", &[0x57; 5000]);
    cfb.add_path("Macros/VBA/dir", b"small stream");
    cfb.add_path("Macros/VBA/ThisDocument", &[0x54; 200]);
    cfb.add_path("Macros/PROJECT", b"ID=\"{}\"");
    cfb.add_path("Empty", b"");
    cfb
}

#[test]
fn signature() {
    assert!(is_compound_file(&CfbBuilder::new().build()));
    assert!(!is_compound_file(b"PK\x03\x04"));
    assert!(!is_compound_file(&[0xD0, 0xCF, 0x11, 0xE0]));

    assert!(matches!(
        CompoundFile::parse(b"not a compound file"),
        Err(AnalysisError::Format)
    ));
}

#[test]
fn directory_tree() {
    let data = sample().build();
    let cf = CompoundFile::parse(&data).unwrap();

    assert_eq!(cf.major_version(), 3);
    assert_eq!(cf.sector_size(), 512);
    assert_eq!(cf.root().entry_type, EntryType::Root);
    assert_eq!(cf.root().name, "Root Entry");
    assert_eq!(cf.root().parent, None);

    // Siblings are sorted by name length first.
    let names: Vec<&str> =
        cf.children(cf.root()).map(|e| e.name.as_str()).collect();
    assert_eq!(names, vec!["Empty", "Macros", "WordDocument"]);

    let paths: Vec<String> = cf.walk().map(|e| cf.path(e)).collect();
    assert_eq!(
        paths,
        vec![
            "",
            "Empty",
            "Macros",
            "Macros/VBA",
            "Macros/VBA/dir",
            "Macros/VBA/ThisDocument",
            "Macros/PROJECT",
            "WordDocument",
        ]
    );

    let vba = cf.open("Macros/VBA").unwrap();
    assert!(vba.is_storage());
    assert!(!vba.is_stream());
    assert_eq!(vba.entry_type, EntryType::Storage);
    assert_eq!(cf.path(vba), "Macros/VBA");
    assert_eq!(cf.entry(vba.parent.unwrap()).unwrap().name, "Macros");
    assert_eq!(cf.entries().len(), 8);
}

#[test]
fn names_are_case_insensitive() {
    let data = sample().build();
    let cf = CompoundFile::parse(&data).unwrap();

    assert!(cf.open("macros/vba/DIR").is_some());
    assert!(cf.open("/Macros//VBA/dir").is_some());
    assert!(cf.open("Macros/VBA/missing").is_none());
    assert!(cf.open("WordDocument/child").is_none());
    assert!(cf.root().has_name("ROOT ENTRY"));
}

#[test]
fn child_lookup() {
    let data = sample().build();
    let cf = CompoundFile::parse(&data).unwrap();

    // Storages that contain a `dir` stream, found from the walk.
    let dirs: Vec<_> = cf
        .walk()
        .filter(|entry| entry.is_storage())
        .filter_map(|storage| cf.child(storage, "DIR"))
        .collect();

    assert_eq!(dirs.len(), 1);
    assert_eq!(cf.path(dirs[0]), "Macros/VBA/dir");

    let macros = cf.child(cf.root(), "macros").unwrap();
    let vba = cf.child(macros, "vba").unwrap();
    assert!(std::ptr::eq(vba, cf.open("Macros/VBA").unwrap()));
    assert!(cf.child(vba, "PROJECT").is_none());
}

#[test]
fn read_streams() {
    let data = sample().build();
    let cf = CompoundFile::parse(&data).unwrap();

    let read = |path: &str| cf.read_stream(cf.open(path).unwrap()).unwrap();

    // Stored in regular sectors.
    assert_eq!(read("WordDocument"), vec![0x57; 5000]);
    // Stored in the mini stream.
    assert_eq!(read("Macros/VBA/dir"), b"small stream");
    assert_eq!(read("Macros/VBA/ThisDocument"), vec![0x54; 200]);
    assert_eq!(read("Empty"), b"");

    let macros = cf.open("Macros").unwrap();
    assert_eq!(
        cf.read_stream(macros),
        Err(AnalysisError::CorruptStructure(
            CorruptStructureError::InvalidEntry {
                entry: macros.index as u32,
                reason: "not a stream",
            }
        ))
    );
}

#[test]
fn version4() {
    let data = sample().version4().build();
    let cf = CompoundFile::parse(&data).unwrap();

    assert_eq!(cf.major_version(), 4);
    assert_eq!(cf.sector_size(), 4096);
    assert_eq!(
        cf.read_stream(cf.open("WordDocument").unwrap()).unwrap(),
        vec![0x57; 5000]
    );
    assert_eq!(
        cf.read_stream(cf.open("Macros/VBA/dir").unwrap()).unwrap(),
        b"small stream"
    );
}

#[test]
fn difat_sector() {
    let data = sample().difat_sector().build();
    let cf = CompoundFile::parse(&data).unwrap();

    assert_eq!(
        cf.read_stream(cf.open("WordDocument").unwrap()).unwrap(),
        vec![0x57; 5000]
    );
}

#[test]
fn difat_cycle() {
    let (mut data, layout) = sample().difat_sector().build_with_layout();
    let difat = layout.difat_sector.unwrap();

    // The DIFAT sector has no FAT sectors and points to itself.
    let offset = layout.sector_offset(difat);
    data[offset..offset + 512].fill(0xFF);
    put_u32(&mut data, offset + 508, difat);

    assert_eq!(
        parse_err(&data),
        CorruptStructureError::ChainCycle {
            sector: difat,
            chain: "DIFAT".to_string()
        }
    );
}

#[test]
fn invalid_header_fields() {
    let data = sample().build();

    let mut bad = data.clone();
    bad[28] = 0xFF; // byte order
    assert!(matches!(
        parse_err(&bad),
        CorruptStructureError::InvalidHeader { field: "byte_order", .. }
    ));

    let mut bad = data.clone();
    bad[30] = 10; // sector shift
    assert_eq!(
        parse_err(&bad),
        CorruptStructureError::InvalidHeader { field: "sector_shift", value: 10 }
    );

    let mut bad = data.clone();
    bad[32] = 9; // mini sector shift
    assert_eq!(
        parse_err(&bad),
        CorruptStructureError::InvalidHeader {
            field: "mini_sector_shift",
            value: 9
        }
    );

    let mut bad = data.clone();
    put_u32(&mut bad, 48, 0xFFFFFFFD); // first directory sector
    assert!(matches!(
        parse_err(&bad),
        CorruptStructureError::InvalidHeader { field: "first_dir_sector", .. }
    ));
}

#[test]
fn too_many_fat_sectors() {
    let mut data = sample().build();
    put_u32(&mut data, 44, 1000);

    assert!(matches!(
        parse_err(&data),
        CorruptStructureError::SizeMismatch { ref chain, .. } if chain == "FAT"
    ));
}

#[test]
fn fat_sector_out_of_range() {
    let (mut data, layout) = sample().build_with_layout();
    assert!(layout.difat_sector.is_none());

    // First DIFAT entry in the header.
    put_u32(&mut data, 76, 5000);

    assert_eq!(
        parse_err(&data),
        CorruptStructureError::SectorOutOfRange {
            sector: 5000,
            chain: "FAT".to_string()
        }
    );
}

#[test]
fn chain_out_of_range() {
    let (mut data, layout) = sample().build_with_layout();
    let dir = layout.dir_sectors[0];

    put_u32(&mut data, layout.fat_entry(dir), 100_000);

    assert_eq!(
        parse_err(&data),
        CorruptStructureError::SectorOutOfRange {
            sector: 100_000,
            chain: "directory".to_string()
        }
    );
}

#[test]
fn mini_fat_cycle() {
    let mut cfb = CfbBuilder::new();
    let stream = cfb.add_stream(0, "Stream", &[0x41; 300]);
    let (mut data, layout) = cfb.build_with_layout();

    // Mini sector 2 points back to mini sector 1.
    let start = layout.starts[stream];
    let mini_fat = layout.sector_offset(layout.mini_fat_sectors[0]);
    put_u32(&mut data, mini_fat + (start as usize + 2) * 4, start + 1);

    assert_eq!(
        parse_err(&data),
        CorruptStructureError::ChainCycle {
            sector: start + 1,
            chain: "Stream".to_string()
        }
    );
}

#[test]
fn unallocated_entry_in_tree() {
    let mut cfb = CfbBuilder::new();
    let stream = cfb.add_stream(0, "Stream", b"abc");
    let (mut data, layout) = cfb.build_with_layout();

    data[layout.dir_entry(stream) + field::OBJECT_TYPE] = 0;

    assert_eq!(
        parse_err(&data),
        CorruptStructureError::InvalidEntry {
            entry: stream as u32,
            reason: "unallocated entry inside the tree"
        }
    );
}

#[test]
fn first_entry_is_not_root() {
    let (mut data, layout) = sample().build_with_layout();
    data[layout.dir_entry(0) + field::OBJECT_TYPE] = 1;

    assert_eq!(
        parse_err(&data),
        CorruptStructureError::InvalidEntry {
            entry: 0,
            reason: "first entry is not the root storage"
        }
    );
}

#[test]
fn invalid_name_length() {
    let mut cfb = CfbBuilder::new();
    let stream = cfb.add_stream(0, "Stream", b"abc");
    let (mut data, layout) = cfb.build_with_layout();

    data[layout.dir_entry(stream) + field::NAME_LEN] = 65;

    assert_eq!(
        parse_err(&data),
        CorruptStructureError::InvalidEntry {
            entry: stream as u32,
            reason: "invalid name length"
        }
    );
}

#[test]
fn v3_size_high_bits_ignored() {
    let mut cfb = CfbBuilder::new();
    let stream = cfb.add_stream(0, "Stream", b"abc");
    let (mut data, layout) = cfb.build_with_layout();

    put_u32(&mut data, layout.dir_entry(stream) + field::SIZE + 4, 0xDEAD);

    let cf = CompoundFile::parse(&data).unwrap();
    let entry = cf.open("Stream").unwrap();

    assert_eq!(entry.size, 3);
    assert_eq!(cf.read_stream(entry).unwrap(), b"abc");
}

#[test]
fn unreachable_entries_are_ignored() {
    let mut cfb = CfbBuilder::new();
    cfb.add_stream(0, "A", b"a");
    let hidden = cfb.add_stream(0, "B", b"b");
    let (mut data, layout) = cfb.build_with_layout();

    // Entries are balanced as A <- B -> NOSTREAM, with B at the top.
    // Point the root to A, so B is no longer reachable.
    let a = hidden as u32 - 1;
    put_u32(&mut data, layout.dir_entry(0) + field::CHILD, a);

    let cf = CompoundFile::parse(&data).unwrap();
    assert_eq!(cf.entries().len(), 2);
    assert!(cf.open("A").is_some());
    assert!(cf.open("B").is_none());
}
