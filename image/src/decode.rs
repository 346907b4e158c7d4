//! # PE Decoder
//!
//! Builds an [`ImageDescription`] out of raw file bytes using the `object`
//! crate's PE reader. Both PE32 and PE32+ are accepted; the header kind is
//! detected from the optional header magic.

use object::pe;
use object::read::pe::{ImageNtHeaders, ImageOptionalHeader, Import, PeFile};
use object::{FileKind, LittleEndian as LE};

use crate::exception::RUNTIME_FUNCTION_SIZE;
use crate::{
    DelayImportDescriptor, ImageDescription, ImageError, ImageKind, ImageResult, ImportDescriptor,
    ImportedFunction, Machine, RelocationBlock, RelocationEntry, RuntimeFunction, Section,
    SectionFlags,
};

/// Decode a PE32 / PE32+ file into an image description.
pub fn decode(data: &[u8]) -> ImageResult<ImageDescription> {
    match FileKind::parse(data)? {
        FileKind::Pe32 => decode_as::<pe::ImageNtHeaders32>(data),
        FileKind::Pe64 => decode_as::<pe::ImageNtHeaders64>(data),
        _ => Err(ImageError::NotPortableExecutable),
    }
}

fn decode_as<Pe: ImageNtHeaders>(data: &[u8]) -> ImageResult<ImageDescription> {
    let file = PeFile::<Pe>::parse(data)?;
    let nt = file.nt_headers();
    let header = nt.file_header();
    let optional = nt.optional_header();

    let machine = Machine::from_raw(header.machine.get(LE));
    let kind = if header.characteristics.get(LE) & pe::IMAGE_FILE_DLL != 0 {
        ImageKind::Library
    } else {
        ImageKind::Executable
    };
    let dynamic_base =
        optional.dll_characteristics() & pe::IMAGE_DLLCHARACTERISTICS_DYNAMIC_BASE != 0;

    let image = ImageDescription {
        image_base: optional.image_base(),
        entry_point: optional.address_of_entry_point(),
        image_size: optional.size_of_image(),
        machine,
        kind,
        dynamic_base,
        sections: decode_sections(&file, data)?,
        relocations: decode_relocations(&file, data)?,
        imports: decode_imports(&file, data)?,
        delay_imports: decode_delay_imports(&file, data)?,
        exception_functions: decode_exception_directory(&file, data)?,
    };

    log::debug!(
        "decoded {} {:?} image: base={:#x} size={:#x} entry={:#x} sections={} relocs={} imports={} delay={} unwind={}",
        image.machine,
        image.kind,
        image.image_base,
        image.image_size,
        image.entry_point,
        image.sections.len(),
        image.relocation_count(),
        image.imports.len(),
        image.delay_imports.len(),
        image.exception_functions.len()
    );

    Ok(image)
}

// ============================================================================
// SECTIONS
// ============================================================================

fn decode_sections<Pe: ImageNtHeaders>(file: &PeFile<'_, Pe>, data: &[u8]) -> ImageResult<Vec<Section>> {
    let mut sections = Vec::new();

    for header in file.section_table().iter() {
        let virtual_address = header.virtual_address.get(LE);
        let virtual_size = header.virtual_size.get(LE);
        let raw_size = header.size_of_raw_data.get(LE);
        let raw_offset = header.pointer_to_raw_data.get(LE) as usize;

        // Some linkers leave VirtualSize at zero; the raw size is all we have then.
        let len = if virtual_size == 0 {
            raw_size
        } else {
            raw_size.min(virtual_size)
        } as usize;

        let payload = raw_offset
            .checked_add(len)
            .and_then(|end| data.get(raw_offset..end))
            .ok_or(ImageError::SectionOutOfFile { virtual_address })?;

        let name_len = header.name.iter().position(|&b| b == 0).unwrap_or(header.name.len());
        let name = String::from_utf8_lossy(&header.name[..name_len]);

        let section = Section::new(
            &name,
            virtual_address,
            virtual_size,
            SectionFlags::from_characteristics(header.characteristics.get(LE)),
        )
        .with_data(payload.to_vec());

        log::trace!(
            "section {:<8} rva={:#010x} vsize={:#x} raw={:#x} flags={:?}",
            section.name,
            section.virtual_address,
            section.virtual_size,
            section.data.len(),
            section.flags
        );
        sections.push(section);
    }

    Ok(sections)
}

// ============================================================================
// BASE RELOCATIONS
// ============================================================================

fn decode_relocations<Pe: ImageNtHeaders>(
    file: &PeFile<'_, Pe>,
    data: &[u8],
) -> ImageResult<Vec<RelocationBlock>> {
    let mut blocks = Vec::new();
    let table = file.section_table();

    let Some(mut iter) = file.data_directories().relocation_blocks(data, &table)? else {
        return Ok(blocks);
    };

    while let Some(relocs) = iter.next()? {
        let page_rva = relocs.virtual_address();
        let mut block = RelocationBlock::new(page_rva);
        for reloc in relocs {
            let offset = reloc.virtual_address.wrapping_sub(page_rva) as u16;
            block.entries.push(RelocationEntry::new(offset, reloc.typ));
        }
        blocks.push(block);
    }

    Ok(blocks)
}

// ============================================================================
// IMPORTS
// ============================================================================

fn imported_function(import: Import<'_>) -> ImportedFunction {
    match import {
        Import::Ordinal(ordinal) => ImportedFunction::ByOrdinal(ordinal),
        Import::Name(hint, name) => ImportedFunction::ByName {
            hint,
            name: String::from_utf8_lossy(name).into_owned(),
        },
    }
}

fn decode_imports<Pe: ImageNtHeaders>(
    file: &PeFile<'_, Pe>,
    data: &[u8],
) -> ImageResult<Vec<ImportDescriptor>> {
    let mut imports = Vec::new();
    let sections = file.section_table();

    let Some(table) = file.data_directories().import_table(data, &sections)? else {
        return Ok(imports);
    };

    let mut descriptors = table.descriptors()?;
    while let Some(descriptor) = descriptors.next()? {
        let module = String::from_utf8_lossy(table.name(descriptor.name.get(LE))?).into_owned();
        let thunk_rva = descriptor.first_thunk.get(LE);

        // Bound images may only carry the address table.
        let lookup_rva = match descriptor.original_first_thunk.get(LE) {
            0 => thunk_rva,
            rva => rva,
        };

        let mut entry = ImportDescriptor::new(&module, thunk_rva);
        let mut thunks = table.thunks(lookup_rva)?;
        while let Some(thunk) = thunks.next::<Pe>()? {
            entry.functions.push(imported_function(table.import::<Pe>(thunk)?));
        }

        log::trace!("import {} ({} functions) iat={:#x}", entry.module, entry.functions.len(), thunk_rva);
        imports.push(entry);
    }

    Ok(imports)
}

fn decode_delay_imports<Pe: ImageNtHeaders>(
    file: &PeFile<'_, Pe>,
    data: &[u8],
) -> ImageResult<Vec<DelayImportDescriptor>> {
    let mut imports = Vec::new();
    let sections = file.section_table();

    let Some(table) = file.data_directories().delay_load_import_table(data, &sections)? else {
        return Ok(imports);
    };

    let mut descriptors = table.descriptors()?;
    while let Some(descriptor) = descriptors.next()? {
        let module = String::from_utf8_lossy(table.name(descriptor.dll_name_rva.get(LE))?).into_owned();
        let mut entry = DelayImportDescriptor::new(
            &module,
            descriptor.import_address_table_rva.get(LE),
            descriptor.module_handle_rva.get(LE),
        );

        let mut thunks = table.thunks(descriptor.import_name_table_rva.get(LE))?;
        while let Some(thunk) = thunks.next::<Pe>()? {
            entry.functions.push(imported_function(table.import::<Pe>(thunk)?));
        }

        log::trace!(
            "delay import {} ({} functions) iat={:#x} handle={:#x}",
            entry.module,
            entry.functions.len(),
            entry.thunk_rva,
            entry.module_handle_rva
        );
        imports.push(entry);
    }

    Ok(imports)
}

// ============================================================================
// EXCEPTION DIRECTORY
// ============================================================================

fn decode_exception_directory<Pe: ImageNtHeaders>(
    file: &PeFile<'_, Pe>,
    data: &[u8],
) -> ImageResult<Vec<RuntimeFunction>> {
    // Only x64 images carry table-based unwind data in this format.
    if !file.nt_headers().is_type_64() {
        return Ok(Vec::new());
    }

    let Some(directory) = file.data_directory(pe::IMAGE_DIRECTORY_ENTRY_EXCEPTION) else {
        return Ok(Vec::new());
    };

    let bytes = directory.data(data, &file.section_table())?;
    if bytes.len() % RUNTIME_FUNCTION_SIZE != 0 {
        return Err(ImageError::BadExceptionDirectory { size: bytes.len() });
    }

    Ok(bytes
        .chunks_exact(RUNTIME_FUNCTION_SIZE)
        .filter_map(|chunk| <&[u8; RUNTIME_FUNCTION_SIZE]>::try_from(chunk).ok())
        .map(RuntimeFunction::from_record)
        .collect())
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const FILE_ALIGNMENT: usize = 0x200;
    const TEXT_RVA: u32 = 0x1000;
    const RELOC_RVA: u32 = 0x2000;
    const RDATA_RVA: u32 = 0x3000;
    const RDATA_FILE: usize = 3 * FILE_ALIGNMENT;

    // .rdata layout
    const IMPORT_DIR: u32 = RDATA_RVA;
    const IMPORT_INT: u32 = RDATA_RVA + 0x40;
    const IMPORT_IAT: u32 = RDATA_RVA + 0x60;
    const IMPORT_NAME: u32 = RDATA_RVA + 0xC0;
    const IMPORT_HINT_NAME: u32 = RDATA_RVA + 0xD0;
    const DELAY_DIR: u32 = RDATA_RVA + 0x100;
    const DELAY_NAME: u32 = RDATA_RVA + 0x180;
    const DELAY_HANDLE: u32 = RDATA_RVA + 0x1A0;
    const DELAY_IAT: u32 = RDATA_RVA + 0x1B0;
    const DELAY_INT: u32 = RDATA_RVA + 0x1C0;
    const DELAY_HINT_NAME: u32 = RDATA_RVA + 0x1E0;
    const PDATA: u32 = RDATA_RVA + 0x200;

    fn put_u16(buf: &mut [u8], at: usize, value: u16) {
        buf[at..at + 2].copy_from_slice(&value.to_le_bytes());
    }

    fn put_u32(buf: &mut [u8], at: usize, value: u32) {
        buf[at..at + 4].copy_from_slice(&value.to_le_bytes());
    }

    fn put_u64(buf: &mut [u8], at: usize, value: u64) {
        buf[at..at + 8].copy_from_slice(&value.to_le_bytes());
    }

    fn rdata(rva: u32) -> usize {
        RDATA_FILE + (rva - RDATA_RVA) as usize
    }

    fn put_bytes(buf: &mut [u8], rva: u32, bytes: &[u8]) {
        let at = rdata(rva);
        buf[at..at + bytes.len()].copy_from_slice(bytes);
    }

    fn put_directory(buf: &mut [u8], dirs: usize, index: usize, rva: u32, size: u32) {
        put_u32(buf, dirs + index * 8, rva);
        put_u32(buf, dirs + index * 8 + 4, size);
    }

    /// Minimal PE32+ file: headers, `.text` with an absolute pointer,
    /// `.reloc` with one DIR64 entry covering it and `.rdata` holding an
    /// import table, a delay-load table and two unwind records.
    fn synthetic_pe64(characteristics: u16, dll_characteristics: u16) -> Vec<u8> {
        let mut file = vec![0u8; FILE_ALIGNMENT * 5];

        // DOS header
        file[0..2].copy_from_slice(b"MZ");
        let nt = 0x80;
        put_u32(&mut file, 0x3c, nt as u32);

        // NT signature + file header
        file[nt..nt + 4].copy_from_slice(b"PE\0\0");
        let fh = nt + 4;
        put_u16(&mut file, fh, pe::IMAGE_FILE_MACHINE_AMD64);
        put_u16(&mut file, fh + 2, 3); // NumberOfSections
        put_u16(&mut file, fh + 16, 240); // SizeOfOptionalHeader
        put_u16(&mut file, fh + 18, characteristics);

        // Optional header (PE32+)
        let oh = fh + 20;
        put_u16(&mut file, oh, pe::IMAGE_NT_OPTIONAL_HDR64_MAGIC);
        put_u32(&mut file, oh + 16, TEXT_RVA + 0x10); // AddressOfEntryPoint
        put_u32(&mut file, oh + 20, TEXT_RVA); // BaseOfCode
        put_u64(&mut file, oh + 24, 0x1_4000_0000); // ImageBase
        put_u32(&mut file, oh + 32, 0x1000); // SectionAlignment
        put_u32(&mut file, oh + 36, FILE_ALIGNMENT as u32); // FileAlignment
        put_u16(&mut file, oh + 48, 6); // MajorSubsystemVersion
        put_u32(&mut file, oh + 56, 0x4000); // SizeOfImage
        put_u32(&mut file, oh + 60, FILE_ALIGNMENT as u32); // SizeOfHeaders
        put_u16(&mut file, oh + 68, pe::IMAGE_SUBSYSTEM_WINDOWS_CUI);
        put_u16(&mut file, oh + 70, dll_characteristics);
        put_u32(&mut file, oh + 108, 16); // NumberOfRvaAndSizes

        let dirs = oh + 112;
        put_directory(&mut file, dirs, pe::IMAGE_DIRECTORY_ENTRY_IMPORT, IMPORT_DIR, 40);
        put_directory(&mut file, dirs, pe::IMAGE_DIRECTORY_ENTRY_EXCEPTION, PDATA, 24);
        put_directory(&mut file, dirs, pe::IMAGE_DIRECTORY_ENTRY_BASERELOC, RELOC_RVA, 12);
        put_directory(&mut file, dirs, pe::IMAGE_DIRECTORY_ENTRY_DELAY_IMPORT, DELAY_DIR, 64);

        // Section headers
        let sh = oh + 240;
        file[sh..sh + 5].copy_from_slice(b".text");
        put_u32(&mut file, sh + 8, 0x20); // VirtualSize
        put_u32(&mut file, sh + 12, TEXT_RVA);
        put_u32(&mut file, sh + 16, FILE_ALIGNMENT as u32); // SizeOfRawData
        put_u32(&mut file, sh + 20, FILE_ALIGNMENT as u32); // PointerToRawData
        put_u32(&mut file, sh + 36, 0x6000_0020);

        let sh = sh + 40;
        file[sh..sh + 6].copy_from_slice(b".reloc");
        put_u32(&mut file, sh + 8, 12);
        put_u32(&mut file, sh + 12, RELOC_RVA);
        put_u32(&mut file, sh + 16, FILE_ALIGNMENT as u32);
        put_u32(&mut file, sh + 20, 2 * FILE_ALIGNMENT as u32);
        put_u32(&mut file, sh + 36, 0x4200_0040);

        let sh = sh + 40;
        file[sh..sh + 6].copy_from_slice(b".rdata");
        put_u32(&mut file, sh + 8, 2 * FILE_ALIGNMENT as u32);
        put_u32(&mut file, sh + 12, RDATA_RVA);
        put_u32(&mut file, sh + 16, 2 * FILE_ALIGNMENT as u32);
        put_u32(&mut file, sh + 20, RDATA_FILE as u32);
        put_u32(&mut file, sh + 36, 0x4000_0040);

        // .text payload: an absolute pointer at +8
        let text = FILE_ALIGNMENT;
        put_u64(&mut file, text + 8, 0x1_4000_1010);
        file[text + 0x10] = 0xC3;

        // .reloc payload: one block, DIR64 at +8, one padding entry
        let reloc = 2 * FILE_ALIGNMENT;
        put_u32(&mut file, reloc, TEXT_RVA);
        put_u32(&mut file, reloc + 4, 12);
        put_u16(&mut file, reloc + 8, (RelocationEntry::DIR64 << 12) | 0x008);
        put_u16(&mut file, reloc + 10, 0);

        // Import descriptor followed by the null terminator
        let desc = rdata(IMPORT_DIR);
        put_u32(&mut file, desc, IMPORT_INT); // OriginalFirstThunk
        put_u32(&mut file, desc + 12, IMPORT_NAME);
        put_u32(&mut file, desc + 16, IMPORT_IAT); // FirstThunk
        put_bytes(&mut file, IMPORT_NAME, b"KERNEL32.dll\0");
        put_bytes(&mut file, IMPORT_HINT_NAME, b"\x15\0GetTickCount\0");
        for table in [IMPORT_INT, IMPORT_IAT] {
            put_u64(&mut file, rdata(table), u64::from(IMPORT_HINT_NAME));
            put_u64(&mut file, rdata(table) + 8, pe::IMAGE_ORDINAL_FLAG64 | 7);
        }

        // Delay-load descriptor followed by the null terminator
        let desc = rdata(DELAY_DIR);
        put_u32(&mut file, desc, 1); // Attributes: RVA based
        put_u32(&mut file, desc + 4, DELAY_NAME);
        put_u32(&mut file, desc + 8, DELAY_HANDLE);
        put_u32(&mut file, desc + 12, DELAY_IAT);
        put_u32(&mut file, desc + 16, DELAY_INT);
        put_bytes(&mut file, DELAY_NAME, b"USER32.dll\0");
        put_bytes(&mut file, DELAY_HINT_NAME, b"\0\0MessageBoxA\0");
        put_u64(&mut file, rdata(DELAY_INT), u64::from(DELAY_HINT_NAME));

        // .pdata: two functions inside .text
        let pdata = rdata(PDATA);
        for (i, (begin, end, unwind)) in [(0x1000, 0x1010, 0x3300), (0x1010, 0x1020, 0x3308)]
            .into_iter()
            .enumerate()
        {
            put_u32(&mut file, pdata + i * 12, begin);
            put_u32(&mut file, pdata + i * 12 + 4, end);
            put_u32(&mut file, pdata + i * 12 + 8, unwind);
        }

        file
    }

    #[test]
    fn test_decode_synthetic_pe64() {
        let bytes = synthetic_pe64(
            pe::IMAGE_FILE_EXECUTABLE_IMAGE | pe::IMAGE_FILE_LARGE_ADDRESS_AWARE,
            pe::IMAGE_DLLCHARACTERISTICS_DYNAMIC_BASE,
        );
        let image = decode(&bytes).expect("synthetic image decodes");

        assert_eq!(image.machine, Machine::Amd64);
        assert_eq!(image.kind, ImageKind::Executable);
        assert!(image.dynamic_base);
        assert_eq!(image.image_base, 0x1_4000_0000);
        assert_eq!(image.image_size, 0x4000);
        assert_eq!(image.entry_point, TEXT_RVA + 0x10);

        assert_eq!(image.sections.len(), 3);
        let text = &image.sections[0];
        assert_eq!(text.name, ".text");
        assert_eq!(text.virtual_address, TEXT_RVA);
        assert_eq!(text.data.len(), 0x20);
        assert_eq!(text.flags, SectionFlags::READ | SectionFlags::EXECUTE);
        assert_eq!(&text.data[8..16], &0x1_4000_1010u64.to_le_bytes());
        assert_eq!(image.sections[2].name, ".rdata");
        assert_eq!(image.sections[2].flags, SectionFlags::READ);

        assert_eq!(image.relocations.len(), 1);
        assert_eq!(image.relocations[0].page_rva, TEXT_RVA);
        assert_eq!(
            image.relocations[0].entries,
            vec![RelocationEntry::new(8, RelocationEntry::DIR64)]
        );
    }

    #[test]
    fn test_decode_import_table() {
        let bytes = synthetic_pe64(pe::IMAGE_FILE_EXECUTABLE_IMAGE, 0);
        let image = decode(&bytes).expect("synthetic image decodes");

        assert_eq!(image.imports.len(), 1);
        let kernel32 = &image.imports[0];
        assert_eq!(kernel32.module, "KERNEL32.dll");
        assert_eq!(kernel32.thunk_rva, IMPORT_IAT);
        assert_eq!(
            kernel32.functions,
            vec![
                ImportedFunction::ByName {
                    hint: 0x15,
                    name: "GetTickCount".into()
                },
                ImportedFunction::ByOrdinal(7),
            ]
        );
    }

    #[test]
    fn test_bound_import_reads_address_table() {
        let mut bytes = synthetic_pe64(pe::IMAGE_FILE_EXECUTABLE_IMAGE, 0);
        // No lookup table: names come from the address table
        put_u32(&mut bytes, rdata(IMPORT_DIR), 0);

        let image = decode(&bytes).expect("synthetic image decodes");
        let kernel32 = &image.imports[0];
        assert_eq!(kernel32.thunk_rva, IMPORT_IAT);
        assert_eq!(kernel32.functions.len(), 2);
        assert!(matches!(&kernel32.functions[0], ImportedFunction::ByName { hint: 0x15, name } if name == "GetTickCount"));
        assert_eq!(kernel32.functions[1], ImportedFunction::ByOrdinal(7));
    }

    #[test]
    fn test_decode_delay_import_table() {
        let bytes = synthetic_pe64(pe::IMAGE_FILE_EXECUTABLE_IMAGE, 0);
        let image = decode(&bytes).expect("synthetic image decodes");

        assert_eq!(image.delay_imports.len(), 1);
        let user32 = &image.delay_imports[0];
        assert_eq!(user32.module, "USER32.dll");
        assert_eq!(user32.thunk_rva, DELAY_IAT);
        assert_eq!(user32.module_handle_rva, DELAY_HANDLE);
        assert_eq!(user32.functions, vec![ImportedFunction::named("MessageBoxA")]);
    }

    #[test]
    fn test_decode_exception_directory() {
        let bytes = synthetic_pe64(pe::IMAGE_FILE_EXECUTABLE_IMAGE, 0);
        let image = decode(&bytes).expect("synthetic image decodes");

        assert_eq!(
            image.exception_functions,
            vec![
                RuntimeFunction {
                    begin_rva: 0x1000,
                    end_rva: 0x1010,
                    unwind_info_rva: 0x3300
                },
                RuntimeFunction {
                    begin_rva: 0x1010,
                    end_rva: 0x1020,
                    unwind_info_rva: 0x3308
                },
            ]
        );
    }

    #[test]
    fn test_exception_directory_size_must_be_whole_records() {
        let mut bytes = synthetic_pe64(pe::IMAGE_FILE_EXECUTABLE_IMAGE, 0);
        let oh = 0x80 + 4 + 20;
        put_u32(&mut bytes, oh + 112 + pe::IMAGE_DIRECTORY_ENTRY_EXCEPTION * 8 + 4, 20);
        assert!(matches!(decode(&bytes), Err(ImageError::BadExceptionDirectory { size: 20 })));
    }

    #[test]
    fn test_decode_library_without_dynamic_base() {
        let bytes = synthetic_pe64(pe::IMAGE_FILE_EXECUTABLE_IMAGE | pe::IMAGE_FILE_DLL, 0);
        let image = decode(&bytes).expect("synthetic image decodes");
        assert_eq!(image.kind, ImageKind::Library);
        assert!(!image.dynamic_base);
    }

    #[test]
    fn test_decode_rejects_non_pe() {
        assert!(decode(b"\x7fELF\x02\x01\x01\0\0\0\0\0\0\0\0\0").is_err());
        assert!(decode(&[]).is_err());
    }

    #[test]
    fn test_section_past_end_of_file() {
        let mut bytes = synthetic_pe64(pe::IMAGE_FILE_EXECUTABLE_IMAGE, 0);
        bytes.truncate(2 * FILE_ALIGNMENT);
        // .reloc raw data now lies outside the file
        assert!(decode(&bytes).is_err());
    }
}
