use dumpe::constants::*;
use dumpe::types::*;
use dumpe::*;
use std::path::PathBuf;
use std::sync::Once;

static IMAGE_BASE: u64 = 0x400000;
static IMAGE_BASE_64: u64 = 0x140000000;
static FILE_ALIGNMENT: u32 = 0x200;
static SOURCE_SIZE: usize = 0x840;
static SYMBOL_TABLE_OFFSET: u32 = 0x800;
static DEBUG_DATA_OFFSET: u32 = 0x810;
static LINENUMBERS_OFFSET: u32 = 0x700;

static INIT_LOGGER: Once = Once::new();
fn init_logger() {
    INIT_LOGGER.call_once(|| {
        env_logger::builder()
            .is_test(false)
            .filter_level(log::LevelFilter::Info)
            .format_timestamp(None)
            .format_module_path(false)
            .format_level(true)
            .format_target(false)
            .write_style(env_logger::WriteStyle::Auto)
            .init();
    });
}

fn put_u16(data: &mut [u8], offset: usize, value: u16) {
    data[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
}

fn put_u32(data: &mut [u8], offset: usize, value: u32) {
    data[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

fn get_u32(data: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes(data[offset..offset + 4].try_into().unwrap())
}

struct TestSection {
    name:                   [u8; 8],
    virtual_size:           u32,
    virtual_address:        u32,
    size_of_raw_data:       u32,
    pointer_to_raw_data:    u32,
    pointer_to_linenumbers: u32,
    characteristics:        u32,
}

struct ImageLayout {
    data_name:             [u8; 8],
    pe64:                  bool,
    debug_directory:       bool,
    data_virtual_size:     u32,
    data_size_of_raw_data: u32,
}

impl Default for ImageLayout {
    fn default() -> Self {
        Self {
            data_name:             *b".data\0\0\0",
            pe64:                  false,
            debug_directory:       true,
            data_virtual_size:     0x100,
            data_size_of_raw_data: 0x200,
        }
    }
}

/// Builds a PE32 image with `.text`, a data section with the given name, `.bss` without raw data
/// and `.rdata` holding a debug directory, followed by a symbol table and debug data.
fn synthetic_image(data_name: &[u8; 8]) -> Vec<u8> {
    build_image(&ImageLayout {
        data_name: *data_name,
        ..Default::default()
    })
}

fn build_image(layout: &ImageLayout) -> Vec<u8> {
    let image_base = if layout.pe64 { IMAGE_BASE_64 } else { IMAGE_BASE };
    let sections = [
        TestSection {
            name:                   *b".text\0\0\0",
            virtual_size:           0x100,
            virtual_address:        0x1000,
            size_of_raw_data:       0x200,
            pointer_to_raw_data:    0x200,
            pointer_to_linenumbers: LINENUMBERS_OFFSET,
            characteristics:        IMAGE_SCN_CNT_CODE | IMAGE_SCN_MEM_EXECUTE | IMAGE_SCN_MEM_READ,
        },
        TestSection {
            name:                   layout.data_name,
            virtual_size:           layout.data_virtual_size,
            virtual_address:        0x2000,
            size_of_raw_data:       layout.data_size_of_raw_data,
            pointer_to_raw_data:    0x400,
            pointer_to_linenumbers: 0,
            characteristics:        IMAGE_SCN_CNT_INITIALIZED_DATA
                | IMAGE_SCN_MEM_READ
                | IMAGE_SCN_MEM_WRITE,
        },
        TestSection {
            name:                   *b".bss\0\0\0\0",
            virtual_size:           0x180,
            virtual_address:        0x3000,
            size_of_raw_data:       0,
            pointer_to_raw_data:    0,
            pointer_to_linenumbers: 0,
            characteristics:        IMAGE_SCN_CNT_UNINITIALIZED_DATA
                | IMAGE_SCN_MEM_READ
                | IMAGE_SCN_MEM_WRITE,
        },
        TestSection {
            name:                   *b".rdata\0\0",
            virtual_size:           0x100,
            virtual_address:        0x4000,
            size_of_raw_data:       0x200,
            pointer_to_raw_data:    0x600,
            pointer_to_linenumbers: 0,
            characteristics:        IMAGE_SCN_CNT_INITIALIZED_DATA | IMAGE_SCN_MEM_READ,
        },
    ];

    let mut data = vec![0u8; SOURCE_SIZE];
    for (index, byte) in data.iter_mut().enumerate().skip(0x200) {
        *byte = (index % 253) as u8;
    }

    put_u16(&mut data, 0, PE_DOS_MAGIC);
    put_u32(&mut data, PE_PTR_OFFSET as usize, 0x40);
    put_u32(&mut data, 0x40, PE_NT_SIGNATURE);

    let coff = 0x44;
    put_u16(&mut data, coff, 0x14c);
    put_u16(&mut data, coff + 2, sections.len() as u16);
    put_u32(&mut data, coff + 4, 0);
    put_u32(&mut data, coff + 8, SYMBOL_TABLE_OFFSET);
    put_u32(&mut data, coff + 12, 1);
    let size_of_optional_header = if layout.pe64 { 240 } else { 224 };
    put_u16(&mut data, coff + 16, size_of_optional_header as u16);
    put_u16(&mut data, coff + 18, 0x102);

    let standard = coff + 20;
    put_u16(&mut data, standard, if layout.pe64 { PE_64_MAGIC } else { PE_32_MAGIC });
    put_u32(&mut data, standard + 4, 0x200);
    put_u32(&mut data, standard + 8, 0x400);
    put_u32(&mut data, standard + 12, 0x200);
    put_u32(&mut data, standard + 16, 0x1000);
    put_u32(&mut data, standard + 20, 0x1000);

    // fields after the image base are shifted by its size
    let (windows, shift, directories) = if layout.pe64 {
        let windows = standard + PE_64_WINDOWS_HEADER_OFFSET as usize;
        data[windows..windows + 8].copy_from_slice(&image_base.to_le_bytes());
        (windows, 4, standard + PE_64_DATA_DIRECTORY_OFFSET as usize)
    } else {
        put_u32(&mut data, standard + 24, 0x2000);
        let windows = standard + PE_32_WINDOWS_HEADER_OFFSET as usize;
        put_u32(&mut data, windows, image_base as u32);
        (windows, 0, standard + PE_32_DATA_DIRECTORY_OFFSET as usize)
    };
    put_u32(&mut data, windows + shift + 4, 0x1000);
    put_u32(&mut data, windows + shift + 8, FILE_ALIGNMENT);
    put_u32(&mut data, windows + shift + 28, 0x5000);
    put_u32(&mut data, windows + shift + 32, 0x200);
    put_u32(&mut data, windows + shift + 36, 0x1234);
    put_u16(&mut data, windows + shift + 40, 3);
    put_u32(&mut data, directories - 4, 16);

    data[directories..directories + 16 * 8].fill(0);
    if layout.debug_directory {
        let debug = directories + IMAGE_DIRECTORY_ENTRY_DEBUG * 8;
        put_u32(&mut data, debug, 0x4000);
        put_u32(&mut data, debug + 4, DEBUG_DIRECTORY_SIZE as u32);
    }

    let table = standard + size_of_optional_header;
    data[table..0x200].fill(0);
    for (index, section) in sections.iter().enumerate() {
        let offset = table + index * 40;
        data[offset..offset + 8].copy_from_slice(&section.name);
        put_u32(&mut data, offset + 8, section.virtual_size);
        put_u32(&mut data, offset + 12, section.virtual_address);
        put_u32(&mut data, offset + 16, section.size_of_raw_data);
        put_u32(&mut data, offset + 20, section.pointer_to_raw_data);
        put_u32(&mut data, offset + 24, 0);
        put_u32(&mut data, offset + 28, section.pointer_to_linenumbers);
        put_u16(&mut data, offset + 32, 0);
        put_u16(&mut data, offset + 34, 0);
        put_u32(&mut data, offset + 36, section.characteristics);
    }

    // debug directory at the start of .rdata, pointing into the trailer
    let entry = 0x600;
    data[entry..entry + DEBUG_DIRECTORY_SIZE as usize].fill(0);
    put_u32(&mut data, entry + 12, IMAGE_DEBUG_TYPE_CODEVIEW);
    put_u32(&mut data, entry + 16, 0x10);
    put_u32(&mut data, entry + 24, DEBUG_DATA_OFFSET);

    data
}

fn dump_data_name() -> [u8; 8] { DEFAULT_DATA_SECTION_NAME.as_bytes().try_into().unwrap() }

fn pattern(size: usize, seed: u8) -> Vec<u8> {
    (0..size).map(|index| (index as u8).wrapping_mul(7).wrapping_add(seed) | 1).collect()
}

fn bss_snapshot(size: usize) -> (Snapshot, Vec<u8>) {
    let bss = pattern(size, 0x31);
    let snapshot =
        Snapshot::new(IMAGE_BASE).with_region(RegionKind::Bss, IMAGE_BASE + 0x3000, bss.clone());
    (snapshot, bss)
}

fn temp_path(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("dumpe-{}-{}", std::process::id(), name))
}

#[test]
fn parse_image() {
    init_logger();

    let data = synthetic_image(b".data\0\0\0");
    let image = Image::parse(&data[..]);
    assert!(image.is_ok(), "image successfully parsed");

    let image = image.unwrap();
    assert_eq!(image.section_table().len(), 4, "all sections parsed");
    assert_eq!(image.windows_header().file_alignment(), FILE_ALIGNMENT);
    assert_eq!(image.windows_header().image_base(), IMAGE_BASE);
    assert_eq!(image.find_section(".bss"), Some(2), "bss section found by name");
    assert_eq!(image.find_section(".BSS"), None, "section names are compared exactly");
    assert_eq!(
        image
            .data_directory(DataDirectoryType::Debug)
            .and_then(|directory| section_for_data_directory(image.section_table(), directory)),
        Some(3),
        "debug directory located in .rdata"
    );
}

#[test]
fn grow_bss_section() {
    init_logger();

    let source = synthetic_image(b".data\0\0\0");
    let (snapshot, bss) = bss_snapshot(0x180);
    let output = dump_image(&source, &snapshot, &DumpOptions::default()).unwrap();

    // 0x180 bytes of bss grow the section by one file alignment unit
    assert_eq!(output.len(), SOURCE_SIZE + 0x200, "output grew by the aligned bss size");

    let image = Image::parse(&output[..]).unwrap();
    let sections = image.section_table();
    assert_eq!({ sections[2].pointer_to_raw_data }, 0x600, "bss placed after .data");
    assert_eq!({ sections[2].size_of_raw_data }, 0x200, "bss raw size rounded up");
    assert_eq!(&output[0x600..0x780], &bss[..], "bss contents dumped");
    assert!(output[0x780..0x800].iter().all(|&b| b == 0), "bss padding zeroed");

    assert_eq!({ sections[3].pointer_to_raw_data }, 0x800, ".rdata shifted by the growth");
    assert_eq!(&output[0x81c..0xa00], &source[0x61c..0x800], ".rdata contents moved");
    assert_eq!(&output[0xa00..], &source[0x800..], "trailer moved");
    assert_eq!(&output[0x200..0x600], &source[0x200..0x600], "leading sections unchanged");
}

#[test]
fn patch_offsets_after_growth() {
    init_logger();

    let source = synthetic_image(b".data\0\0\0");
    let (snapshot, _) = bss_snapshot(0x180);
    let output = dump_image(&source, &snapshot, &DumpOptions::default()).unwrap();
    let image = Image::parse(&output[..]).unwrap();

    assert_eq!(
        { image.coff_header().pointer_to_symbol_table },
        SYMBOL_TABLE_OFFSET + 0x200,
        "symbol table relocated into the shifted trailer"
    );
    assert_eq!(
        { image.section_table()[0].pointer_to_linenumbers },
        LINENUMBERS_OFFSET + 0x200,
        "line numbers inside .rdata follow the section"
    );
    assert_eq!(
        get_u32(&output, 0x800 + 24),
        DEBUG_DATA_OFFSET + 0x200,
        "debug data pointer relocated"
    );
    assert_eq!(get_u32(&output, 0x800 + 20), 0, "debug data address left alone");

    assert_eq!({ image.standard_header().size_of_initialized_data }, 0x600);
    assert_eq!({ image.standard_header().size_of_uninitialized_data }, 0);
    assert_eq!(image.windows_header().size_of_headers(), 0x200);
}

#[test]
fn round_trip_classification() {
    init_logger();

    let source = synthetic_image(b".data\0\0\0");
    let (snapshot, _) = bss_snapshot(0x100);
    let output = dump_image(&source, &snapshot, &DumpOptions::default()).unwrap();

    let original = Image::parse(&source[..]).unwrap();
    let image = Image::parse(&output[..]).unwrap();
    assert_eq!(image.section_table().len(), original.section_table().len());
    assert_eq!(
        image.windows_header().file_alignment(),
        original.windows_header().file_alignment()
    );
    assert_eq!(original.section_table()[2].content(), SectionContent::Uninitialized);
    assert_eq!(
        image.section_table()[2].content(),
        SectionContent::Initialized,
        "grown section is initialized"
    );
    let characteristics = image.section_table()[2].characteristics;
    assert_eq!(
        characteristics & (IMAGE_SCN_MEM_READ | IMAGE_SCN_MEM_WRITE),
        IMAGE_SCN_MEM_READ | IMAGE_SCN_MEM_WRITE,
        "unrelated flags kept"
    );
    assert_eq!(characteristics & IMAGE_SCN_CNT_UNINITIALIZED_DATA, 0);
}

#[test]
fn dump_data_region() {
    init_logger();

    let source = synthetic_image(b".data\0\0\0");
    let data = pattern(0x80, 0x55);
    let (snapshot, _) = bss_snapshot(0x100);
    let snapshot = snapshot.with_region(RegionKind::Data, IMAGE_BASE + 0x2040, data.clone());
    let output = dump_image(&source, &snapshot, &DumpOptions::default()).unwrap();

    assert_eq!(&output[0x440..0x4c0], &data[..], "data region dumped in place");
    assert_eq!(&output[0x400..0x440], &source[0x400..0x440], "rest of .data unchanged");
    assert_eq!(&output[0x4c0..0x600], &source[0x4c0..0x600], "rest of .data unchanged");

    let image = Image::parse(&output[..]).unwrap();
    assert_eq!({ image.section_table()[1].pointer_to_raw_data }, 0x400);
    assert_eq!({ image.section_table()[1].size_of_raw_data }, 0x200);
}

#[test]
fn dump_named_data_section() {
    init_logger();

    let source = synthetic_image(&dump_data_name());
    let section = pattern(0x100, 0x77);
    let (mut snapshot, _) = bss_snapshot(0x100);
    snapshot.capture(IMAGE_BASE + 0x2000, section.clone());
    let output = dump_image(&source, &snapshot, &DumpOptions::default()).unwrap();

    assert_eq!(&output[0x400..0x500], &section[..], "whole data section dumped");
    assert_eq!(&output[0x500..0x600], &source[0x500..0x600], "raw data past the section kept");
}

#[test]
fn data_section_disagrees_with_region() {
    init_logger();

    let source = synthetic_image(&dump_data_name());
    let (snapshot, _) = bss_snapshot(0x100);
    let snapshot = snapshot.with_region(RegionKind::Data, IMAGE_BASE + 0x4000, pattern(0x10, 1));
    let result = dump_image(&source, &snapshot, &DumpOptions::default());
    assert!(
        matches!(
            result,
            Err(DumpError::SectionMismatch(ref name)) if name == DEFAULT_DATA_SECTION_NAME
        ),
        "data region outside the data section is rejected"
    );
}

#[test]
fn merge_overlapping_bss() {
    init_logger();

    let source = synthetic_image(b".data\0\0\0");
    let merged = pattern(0x180, 0x13);
    let mut snapshot = Snapshot::new(IMAGE_BASE)
        .with_region(RegionKind::Bss, IMAGE_BASE + 0x3000, merged[..0x100].to_vec())
        .with_region(RegionKind::StaticBss, IMAGE_BASE + 0x3080, merged[0x80..].to_vec());
    snapshot.capture(IMAGE_BASE + 0x3000, merged.clone());

    let image = Image::parse(&source[..]).unwrap();
    let analysis = Analysis::analyze(&image, &snapshot, &DumpOptions::default()).unwrap();
    assert!(analysis.static_bss.is_none(), "static bss merged into bss");
    assert_eq!(
        analysis.bss.map(|placement| placement.region),
        Some(Region::new(IMAGE_BASE + 0x3000, 0x180)),
        "merged region covers both"
    );

    let output = dump_image(&source, &snapshot, &DumpOptions::default()).unwrap();
    assert_eq!(output.len(), SOURCE_SIZE + 0x200, "merged region is written once");
    assert_eq!(&output[0x600..0x780], &merged[..], "merged contents without gap");
}

#[test]
fn separate_bss_regions_in_one_section() {
    init_logger();

    let source = synthetic_image(b".data\0\0\0");
    let bss = pattern(0x40, 0x21);
    let static_bss = pattern(0x40, 0x43);
    let snapshot = Snapshot::new(IMAGE_BASE)
        .with_region(RegionKind::Bss, IMAGE_BASE + 0x3000, bss.clone())
        .with_region(RegionKind::StaticBss, IMAGE_BASE + 0x3100, static_bss.clone());
    let output = dump_image(&source, &snapshot, &DumpOptions::default()).unwrap();

    assert_eq!(output.len(), SOURCE_SIZE + 0x200, "shared section grows once");
    assert_eq!(&output[0x600..0x640], &bss[..]);
    assert!(output[0x640..0x700].iter().all(|&b| b == 0), "gap between regions zeroed");
    assert_eq!(&output[0x700..0x740], &static_bss[..]);

    let image = Image::parse(&output[..]).unwrap();
    assert_eq!({ image.section_table()[3].pointer_to_raw_data }, 0x800);
}

#[test]
fn zero_growth_region() {
    init_logger();

    // a bss region filling the raw data of .data leaves the layout unchanged
    let source = synthetic_image(b".data\0\0\0");
    let bss = pattern(0x200, 0x5);
    let snapshot =
        Snapshot::new(IMAGE_BASE).with_region(RegionKind::Bss, IMAGE_BASE + 0x2000, bss.clone());
    let options = DumpOptions {
        checksum: false,
        ..Default::default()
    };
    let output = dump_image(&source, &snapshot, &options).unwrap();

    assert_eq!(output.len(), SOURCE_SIZE, "no growth");
    assert_eq!(&output[0x400..0x600], &bss[..]);
    let image = Image::parse(&output[..]).unwrap();
    let original = Image::parse(&source[..]).unwrap();
    assert_eq!({ image.section_table()[1].pointer_to_raw_data }, 0x400);
    assert_eq!({ image.section_table()[1].size_of_raw_data }, 0x200);
    assert_eq!(
        { image.coff_header().pointer_to_symbol_table },
        { original.coff_header().pointer_to_symbol_table },
        "offsets unchanged"
    );
}

#[test]
fn identity_relocation() {
    let source = synthetic_image(b".data\0\0\0");
    let image = Image::parse(&source[..]).unwrap();
    let sections = image.section_table();
    for offset in [0, 0x1, 0x200, 0x3ff, 0x400, 0x650, 0x7ff, 0x800, 0x83f, 0x10000] {
        assert_eq!(
            relocate_offset(offset, sections, sections),
            offset,
            "identity for {:#x}",
            offset
        );
    }
}

fn section(name: &[u8], pointer: u32, size: u32, characteristics: u32) -> SectionHeader {
    let mut header = SectionHeader::default();
    header.name[..name.len()].copy_from_slice(name);
    header.pointer_to_raw_data = pointer;
    header.size_of_raw_data = size;
    header.virtual_size = size;
    header.characteristics = characteristics;
    header
}

#[test]
fn relocate_trailing_offset() {
    let source = [
        section(b"HEADER", 0, 64, 0),
        section(b"TEXT", 64, 256, IMAGE_SCN_CNT_CODE),
        section(b"DATA", 320, 64, IMAGE_SCN_CNT_INITIALIZED_DATA),
        section(b"BSS", 384, 0, IMAGE_SCN_CNT_UNINITIALIZED_DATA),
    ];
    let mut destination = source;
    destination[3].size_of_raw_data = 128;
    destination[3].mark_dumped();

    assert_eq!({ destination[3].pointer_to_raw_data }, 384);
    assert_eq!(destination[3].content(), SectionContent::Initialized);
    assert_eq!(relocate_offset(450, &source, &destination), 578, "trailing offset shifted");
    assert_eq!(relocate_offset(100, &source, &destination), 100, "offset before growth kept");
    assert_eq!(relocate_offset(0, &source, &destination), 0, "unused field kept");
}

#[test]
fn relocate_following_section() {
    let source = [
        section(b".text", 0x200, 0x200, IMAGE_SCN_CNT_CODE),
        section(b".bss", 0, 0, IMAGE_SCN_CNT_UNINITIALIZED_DATA),
        section(b".rdata", 0x400, 0x200, IMAGE_SCN_CNT_INITIALIZED_DATA),
    ];
    let mut destination = source;
    destination[1].pointer_to_raw_data = 0x400;
    destination[1].size_of_raw_data = 0x400;
    destination[2].pointer_to_raw_data = 0x800;

    assert_eq!(relocate_offset(0x450, &source, &destination), 0x850);
    assert_eq!(relocate_offset(0x600, &source, &destination), 0xa00);
    assert_eq!(relocate_offset(0x300, &source, &destination), 0x300);
}

#[test]
fn section_content_transitions() {
    assert_eq!(SectionContent::of(IMAGE_SCN_CNT_UNINITIALIZED_DATA), SectionContent::Uninitialized);
    assert_eq!(SectionContent::of(IMAGE_SCN_CNT_INITIALIZED_DATA), SectionContent::Initialized);
    assert_eq!(
        SectionContent::of(IMAGE_SCN_CNT_INITIALIZED_DATA | IMAGE_SCN_CNT_UNINITIALIZED_DATA),
        SectionContent::Initialized,
        "both flags count as initialized"
    );
    assert_eq!(SectionContent::of(IMAGE_SCN_CNT_CODE), SectionContent::Other);
    assert_eq!(SectionContent::Uninitialized.dumped(), SectionContent::Initialized);
    assert_eq!(SectionContent::Initialized.dumped(), SectionContent::Initialized);
    assert_eq!(SectionContent::Other.dumped(), SectionContent::Initialized);

    let characteristics = IMAGE_SCN_CNT_UNINITIALIZED_DATA | IMAGE_SCN_MEM_WRITE;
    assert_eq!(
        SectionContent::Initialized.apply(characteristics),
        IMAGE_SCN_CNT_INITIALIZED_DATA | IMAGE_SCN_MEM_WRITE
    );
}

#[test]
fn image_checksum_verifies() {
    init_logger();

    let source = synthetic_image(b".data\0\0\0");
    let (snapshot, _) = bss_snapshot(0x180);
    let output = dump_image(&source, &snapshot, &DumpOptions::default()).unwrap();
    let image = Image::parse(&output[..]).unwrap();

    let stored = image.windows_header().check_sum();
    assert_ne!(stored, 0, "checksum computed");

    let mut zeroed = output.clone();
    let offset = image.header_offsets().windows_header as usize + 36;
    put_u32(&mut zeroed, offset, 0);
    assert_eq!(image_checksum(&zeroed), stored, "checksum verifies");
}

#[test]
fn checksum_disabled() {
    init_logger();

    let source = synthetic_image(b".data\0\0\0");
    let (snapshot, _) = bss_snapshot(0x180);
    let options = DumpOptions {
        checksum: false,
        ..Default::default()
    };
    let output = dump_image(&source, &snapshot, &options).unwrap();
    let image = Image::parse(&output[..]).unwrap();
    assert_eq!(image.windows_header().check_sum(), 0, "checksum left zero");
}

#[test]
fn image_checksum_known_values() {
    assert_eq!(image_checksum(&[]), 0);
    assert_eq!(image_checksum(&[1, 2, 3, 4]), 0x0608, "words summed plus length");
    assert_eq!(image_checksum(&[0xff, 0xff, 2, 0]), 0x0006, "carry folded back in");
    assert_eq!(image_checksum(&[0x34, 0x12, 0x01]), 0x1238, "odd trailing byte is a low byte");
}

#[test]
fn dump_pe64_image() {
    init_logger();

    let source = build_image(&ImageLayout {
        pe64: true,
        ..Default::default()
    });
    let bss = pattern(0x180, 0x61);
    let snapshot = Snapshot::new(IMAGE_BASE_64).with_region(
        RegionKind::Bss,
        IMAGE_BASE_64 + 0x3000,
        bss.clone(),
    );
    let output = dump_image(&source, &snapshot, &DumpOptions::default()).unwrap();
    assert_eq!(output.len(), SOURCE_SIZE + 0x200);

    let image = Image::parse(&output[..]).unwrap();
    assert!(
        matches!(image.windows_header(), GenericWindowsHeader::WindowsHeader64(_)),
        "image stays PE32+"
    );
    assert_eq!(image.windows_header().image_base(), IMAGE_BASE_64, "wide image base kept");
    assert_eq!(image.windows_header().size_of_headers(), 0x200);
    assert_eq!({ image.section_table()[2].pointer_to_raw_data }, 0x600);
    assert_eq!({ image.section_table()[2].size_of_raw_data }, 0x200);
    assert_eq!(&output[0x600..0x780], &bss[..]);
    assert_eq!({ image.coff_header().pointer_to_symbol_table }, SYMBOL_TABLE_OFFSET + 0x200);
    assert_eq!(get_u32(&output, 0x800 + 24), DEBUG_DATA_OFFSET + 0x200);

    let stored = image.windows_header().check_sum();
    let mut zeroed = output.clone();
    let offset = image.header_offsets().windows_header as usize + 40;
    assert_eq!(get_u32(&output, offset), stored, "checksum stored after the wide image base");
    put_u32(&mut zeroed, offset, 0);
    assert_eq!(image_checksum(&zeroed), stored, "checksum verifies");
}

#[test]
fn dump_without_debug_directory() {
    init_logger();

    let source = build_image(&ImageLayout {
        debug_directory: false,
        ..Default::default()
    });
    let image = Image::parse(&source[..]).unwrap();
    let debug = image.data_directory(DataDirectoryType::Debug).copied().unwrap_or_default();
    assert_eq!(section_for_data_directory(image.section_table(), &debug), None);

    let (snapshot, _) = bss_snapshot(0x180);
    let output = dump_image(&source, &snapshot, &DumpOptions::default()).unwrap();
    assert_eq!(output.len(), SOURCE_SIZE + 0x200);
    assert_eq!(
        get_u32(&output, 0x800 + 24),
        DEBUG_DATA_OFFSET,
        "bytes of an absent debug directory are not touched"
    );
    let image = Image::parse(&output[..]).unwrap();
    assert_eq!({ image.coff_header().pointer_to_symbol_table }, SYMBOL_TABLE_OFFSET + 0x200);
}

#[test]
fn data_region_spanning_sections() {
    init_logger();

    let source = synthetic_image(b".data\0\0\0");
    let (snapshot, _) = bss_snapshot(0x100);
    let snapshot =
        snapshot.with_region(RegionKind::Data, IMAGE_BASE + 0x2100, pattern(0x1000, 0x19));
    let result = dump_image(&source, &snapshot, &DumpOptions::default());
    assert!(
        matches!(result, Err(DumpError::RegionSpansSections(RegionKind::Data))),
        "spanning data region rejected: {:?}",
        result
    );
}

#[test]
fn bss_regions_in_different_sections() {
    init_logger();

    // .data has virtual space past its raw data for the static bss to grow into
    let source = build_image(&ImageLayout {
        data_virtual_size: 0x400,
        ..Default::default()
    });
    let bss = pattern(0x180, 0x27);
    let static_bss = pattern(0x300, 0x49);
    let snapshot = Snapshot::new(IMAGE_BASE)
        .with_region(RegionKind::Bss, IMAGE_BASE + 0x3000, bss.clone())
        .with_region(RegionKind::StaticBss, IMAGE_BASE + 0x2000, static_bss.clone());

    let image = Image::parse(&source[..]).unwrap();
    let analysis = Analysis::analyze(&image, &snapshot, &DumpOptions::default()).unwrap();
    assert_eq!(analysis.bss.map(|placement| placement.section), Some(2));
    assert_eq!(analysis.static_bss.map(|placement| placement.section), Some(1));
    assert_eq!(analysis.output_size, SOURCE_SIZE as u64 + 0x400, "growths add up");

    let output = dump_image(&source, &snapshot, &DumpOptions::default()).unwrap();
    assert_eq!(output.len() as u64, analysis.output_size);
    assert_eq!(&output[0x400..0x700], &static_bss[..], "static bss dumped into .data");
    assert_eq!(&output[0x800..0x980], &bss[..], "bss dumped into .bss");

    let image = Image::parse(&output[..]).unwrap();
    let sections = image.section_table();
    assert_eq!({ sections[1].size_of_raw_data }, 0x400, ".data grown");
    assert_eq!({ sections[2].pointer_to_raw_data }, 0x800, ".bss after grown .data");
    assert_eq!({ sections[3].pointer_to_raw_data }, 0xa00, ".rdata shifted by both growths");
    assert_eq!({ image.coff_header().pointer_to_symbol_table }, SYMBOL_TABLE_OFFSET + 0x400);
}

#[test]
fn output_size_with_unaligned_raw_data() {
    init_logger();

    let source = build_image(&ImageLayout {
        data_virtual_size: 0x400,
        data_size_of_raw_data: 0x180,
        ..Default::default()
    });
    let bss = pattern(0x300, 0x3b);
    let snapshot =
        Snapshot::new(IMAGE_BASE).with_region(RegionKind::Bss, IMAGE_BASE + 0x2000, bss.clone());

    let image = Image::parse(&source[..]).unwrap();
    let analysis = Analysis::analyze(&image, &snapshot, &DumpOptions::default()).unwrap();
    assert_eq!(
        analysis.bss.map(|placement| placement.growth),
        Some(0x200),
        "growth measured from the aligned raw size"
    );

    let output = dump_image(&source, &snapshot, &DumpOptions::default()).unwrap();
    assert_eq!(output.len() as u64, analysis.output_size, "estimated size is exact");
    assert_eq!(&output[0x400..0x700], &bss[..]);
    let image = Image::parse(&output[..]).unwrap();
    assert_eq!({ image.section_table()[1].size_of_raw_data }, 0x400);
    assert_eq!({ image.section_table()[3].pointer_to_raw_data }, 0x800);
}

#[test]
fn region_wrapping_address_space() {
    init_logger();

    let start = u64::MAX - 0xf;
    assert_eq!(Region::new(start, 0x20).end(), None);
    assert_eq!(Region::new(start, 0x10).end(), None, "end past the last address wraps");
    assert_eq!(Region::new(start, 0xf).end(), Some(u64::MAX));

    let source = synthetic_image(b".data\0\0\0");
    let snapshot = Snapshot::new(IMAGE_BASE).with_region(RegionKind::Bss, start, pattern(0x20, 7));
    let result = dump_image(&source, &snapshot, &DumpOptions::default());
    assert!(
        matches!(
            result,
            Err(DumpError::RegionOutsideImage(RegionKind::Bss, address, 0x20)) if address == start
        ),
        "wrapping region rejected: {:?}",
        result
    );
}

#[test]
fn dump_to_file() {
    init_logger();

    let source = synthetic_image(b".data\0\0\0");
    let source_path = temp_path("source.exe");
    std::fs::write(&source_path, &source).unwrap();
    let output_path = temp_path("dumped.bin");
    let expected_path = temp_path("dumped.bin.exe");
    std::fs::write(&expected_path, b"stale").unwrap();

    let (snapshot, _) = bss_snapshot(0x180);
    let written =
        dump_file(&source_path, &output_path, &snapshot, &DumpOptions::default()).unwrap();
    assert_eq!(written, expected_path, "executable extension appended");

    let expected = dump_image(&source, &snapshot, &DumpOptions::default()).unwrap();
    let output = std::fs::read(&written).unwrap();
    assert_eq!(output, expected, "file dump matches in-memory dump");

    std::fs::remove_file(&source_path).ok();
    std::fs::remove_file(&written).ok();
}

#[test]
fn output_path_extension() {
    assert_eq!(normalize_output_path("out.exe"), PathBuf::from("out.exe"));
    assert_eq!(normalize_output_path("out.EXE"), PathBuf::from("out.EXE"));
    assert_eq!(normalize_output_path("out"), PathBuf::from("out.exe"));
    assert_eq!(normalize_output_path("out.bin"), PathBuf::from("out.bin.exe"));
}

#[test]
fn bad_magic_names_file() {
    init_logger();

    let mut source = synthetic_image(b".data\0\0\0");
    source[0] = b'X';
    let source_path = temp_path("bad-magic.exe");
    std::fs::write(&source_path, &source).unwrap();
    let output_path = temp_path("bad-magic-out.exe");

    let (snapshot, _) = bss_snapshot(0x100);
    let result = dump_file(&source_path, &output_path, &snapshot, &DumpOptions::default());
    match result {
        Err(DumpError::InvalidImage { file, source }) => {
            assert!(file.contains("bad-magic.exe"), "error names the file: {}", file);
            assert!(matches!(source, ImageReadError::InvalidHeader(_)));
        }
        other => panic!("expected invalid image error, got {:?}", other),
    }
    assert!(!output_path.exists(), "no output created");

    std::fs::remove_file(&source_path).ok();
}

#[test]
fn region_spanning_sections_aborts() {
    init_logger();

    let source = synthetic_image(b".data\0\0\0");
    let source_path = temp_path("spanning.exe");
    std::fs::write(&source_path, &source).unwrap();
    let output_path = temp_path("spanning-out.exe");

    let snapshot = Snapshot::new(IMAGE_BASE).with_region(
        RegionKind::Bss,
        IMAGE_BASE + 0x2080,
        pattern(0x1000, 9),
    );
    let result = dump_file(&source_path, &output_path, &snapshot, &DumpOptions::default());
    assert!(
        matches!(result, Err(DumpError::RegionSpansSections(RegionKind::Bss))),
        "spanning region rejected: {:?}",
        result
    );
    assert!(!output_path.exists(), "no output created");

    std::fs::remove_file(&source_path).ok();
}

#[test]
fn region_outside_image() {
    init_logger();

    let source = synthetic_image(b".data\0\0\0");
    let snapshot = Snapshot::new(IMAGE_BASE).with_region(RegionKind::Bss, 0x1000, pattern(0x10, 3));
    let result = dump_image(&source, &snapshot, &DumpOptions::default());
    assert!(matches!(result, Err(DumpError::RegionOutsideImage(RegionKind::Bss, _, _))));
}

#[test]
fn empty_regions_are_skipped() {
    init_logger();

    let source = synthetic_image(b".data\0\0\0");
    let snapshot = Snapshot::new(IMAGE_BASE);
    let output = dump_image(&source, &snapshot, &DumpOptions::default()).unwrap();
    assert_eq!(output.len(), SOURCE_SIZE);
    assert_eq!(&output[0x200..0x600], &source[0x200..0x600], "sections copied unchanged");
}

#[test]
fn missing_memory_is_reported() {
    init_logger();

    let source = synthetic_image(&dump_data_name());
    let (snapshot, _) = bss_snapshot(0x100);
    let result = dump_image(&source, &snapshot, &DumpOptions::default());
    assert!(
        matches!(
            result,
            Err(DumpError::MemoryUnavailable(address, 0x100)) if address == IMAGE_BASE + 0x2000
        ),
        "uncaptured data section reported"
    );
}

#[test]
fn resource_lookup_order() {
    init_logger();

    let user = MemoryStore::parse("emacs.font:Consolas\nFont:Courier\nemacs.background:Black\n");
    let machine = MemoryStore::parse("emacs.font:Arial\nemacs.cursorColor:Red\n");
    let overrides = MemoryStore::parse("Emacs.Background:White\ngarbage line\n");
    let database = ResourceDatabase::new("emacs")
        .with_overrides(overrides)
        .with_store(user)
        .with_store(machine);

    assert_eq!(
        database.lookup("emacs.background", "Emacs.Background").as_deref(),
        Some("White"),
        "override wins"
    );
    assert_eq!(
        database.lookup("emacs.font", "Emacs.Font").as_deref(),
        Some("Consolas"),
        "user store before machine store"
    );
    assert_eq!(
        database.lookup("emacs.other", "font").as_deref(),
        Some("Courier"),
        "class looked up in stores"
    );
    assert_eq!(database.lookup("EMACS.CURSORCOLOR", "x").as_deref(), Some("Red"));
    assert_eq!(
        database.lookup("emacs.menu.attributeBackground", "x").as_deref(),
        Some("SystemMenu"),
        "defaults by name"
    );
    assert_eq!(
        database.lookup("emacs.unknown", "emacs.foreground"),
        None,
        "defaults are not looked up by class"
    );
}

#[test]
fn resource_lookup_inhibited() {
    let mut database = ResourceDatabase::new("emacs")
        .with_overrides(MemoryStore::parse("emacs.font:Mono"))
        .with_store(MemoryStore::parse("emacs.geometry:80x25"));
    database.set_inhibit_stores(true);

    assert_eq!(database.lookup("emacs.font", "Font").as_deref(), Some("Mono"));
    assert_eq!(database.lookup("emacs.geometry", "Geometry"), None);
    assert_eq!(database.lookup("emacs.foreground", "Foreground"), None);
}

#[test]
fn resource_table_parsing() {
    let store = MemoryStore::parse("a.b:1\nA.B:2\n\nno separator\nc:\n");
    assert_eq!(store.len(), 2, "duplicates and lines without separator skipped");
    assert_eq!(store.get("a.B").as_deref(), Some("1"));
    assert_eq!(store.get("c").as_deref(), Some(""), "empty values kept");
    assert!(MemoryStore::parse("\n").is_empty());
}

#[test]
fn resource_file_store() {
    let missing = FileStore::open(temp_path("missing.rdb")).unwrap();
    assert_eq!(missing.get("anything"), None, "missing file is an empty store");

    let path = temp_path("store.rdb");
    std::fs::write(&path, "app.title:Hello:World\napp.title:Ignored\n").unwrap();
    let store = FileStore::open(&path).unwrap();
    assert_eq!(store.get("APP.TITLE").as_deref(), Some("Hello:World"), "first entry wins");
    std::fs::remove_file(&path).ok();
}
