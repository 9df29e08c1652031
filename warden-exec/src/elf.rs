//! Extracting a binary's transitive shared-library dependencies by
//! parsing its ELF `.dynstr` section.
//!
//! This does not use a crate for ELF parsing: nothing else in this
//! lineage of crates reads ELF headers, and the subset needed here
//! (locating one named section and streaming its string table) is
//! small enough to read directly.

use regex::Regex;
use std::{
    fs::File,
    io::{Read, Seek, SeekFrom},
    path::Path,
    sync::OnceLock,
};
use warden_core::{Error, Result};

const ELF_MAGIC: [u8; 4] = [0x7f, b'E', b'L', b'F'];
const ELFCLASS32: u8 = 1;
const ELFCLASS64: u8 = 2;
const ELFDATA2LSB: u8 = 1;
const ELFDATA2MSB: u8 = 2;

/// Default runpaths searched for a needed library's class.
pub const DEFAULT_SEARCH_PATHS: &[&str] = &["/lib", "/usr/lib", "/usr/local/lib"];

fn library_name_pattern() -> &'static Regex
{
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^lib.+\.so[.0-9]*$").unwrap())
}

/// The result of walking one ELF object's `.dynstr` section.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ElfDeps
{
    /// Shared library names referenced by the object (e.g. `libc.so.6`).
    pub libraries: Vec<String>,
    /// Additional search paths the object names (entries beginning
    /// with `/`), in addition to [`DEFAULT_SEARCH_PATHS`].
    pub search_paths: Vec<String>,
}

/// Parses ELF objects to discover their dynamic-linking dependencies.
pub struct ElfDepWalker;

impl ElfDepWalker
{
    /// Walk `path`'s `.dynstr` section, classifying each referenced
    /// string as a library name or a search path.
    ///
    /// Fails with [`Error::NotElf`] if the file is not a valid ELF
    /// object, or has no `.dynstr` section (e.g. a statically linked
    /// binary, which is treated as having no dependencies).
    pub fn walk(path: &Path) -> Result<ElfDeps>
    {
        let mut file = File::open(path)
            .map_err(|_| Error::NotElf(path.display().to_string()))?;

        let header = ElfHeader::read(&mut file)
            .ok_or_else(|| Error::NotElf(path.display().to_string()))?;

        let dynstr = Self::find_dynstr(&mut file, &header);

        let Some((offset, size)) = dynstr else {
            return Ok(ElfDeps{
                libraries: Vec::new(),
                search_paths: DEFAULT_SEARCH_PATHS.iter().map(|s| s.to_string()).collect(),
            });
        };

        file.seek(SeekFrom::Start(offset)).map_err(Error::FsError)?;
        let mut buf = vec![0u8; size as usize];
        file.read_exact(&mut buf).map_err(Error::FsError)?;

        let mut libraries = Vec::new();
        let mut search_paths: Vec<String> =
            DEFAULT_SEARCH_PATHS.iter().map(|s| s.to_string()).collect();

        for entry in buf.split(|&b| b == 0) {
            if entry.is_empty() {
                continue;
            }

            let Ok(name) = std::str::from_utf8(entry) else { continue };

            if library_name_pattern().is_match(name) {
                libraries.push(name.to_owned());
            } else if name.starts_with('/') {
                search_paths.push(name.to_owned());
            }
        }

        Ok(ElfDeps{libraries, search_paths})
    }

    fn find_dynstr(file: &mut File, header: &ElfHeader) -> Option<(u64, u64)>
    {
        let shstrtab = read_section_header(file, header, header.shstrndx)?;

        for index in 0 .. header.shnum {
            let section = read_section_header(file, header, index)?;
            let name = read_cstr_at(file, shstrtab.offset + section.name_offset as u64)?;
            if name == ".dynstr" {
                return Some((section.offset, section.size));
            }
        }

        None
    }
}

struct ElfHeader
{
    is_64: bool,
    little_endian: bool,
    shoff: u64,
    shentsize: u16,
    shnum: u16,
    shstrndx: u16,
}

impl ElfHeader
{
    fn read(file: &mut File) -> Option<Self>
    {
        let mut ident = [0u8; 16];
        file.seek(SeekFrom::Start(0)).ok()?;
        file.read_exact(&mut ident).ok()?;

        if ident[0 .. 4] != ELF_MAGIC {
            return None;
        }

        let is_64 = match ident[4] {
            ELFCLASS32 => false,
            ELFCLASS64 => true,
            _          => return None,
        };

        let little_endian = match ident[5] {
            ELFDATA2LSB => true,
            ELFDATA2MSB => false,
            _           => return None,
        };

        if is_64 {
            // e_shoff at 0x28 (u64), e_shentsize at 0x3a (u16),
            // e_shnum at 0x3c (u16), e_shstrndx at 0x3e (u16).
            let mut rest = [0u8; 0x40 - 0x28];
            file.seek(SeekFrom::Start(0x28)).ok()?;
            file.read_exact(&mut rest).ok()?;

            let shoff      = read_u64(&rest[0x00 .. 0x08], little_endian);
            let shentsize  = read_u16(&rest[0x12 .. 0x14], little_endian);
            let shnum      = read_u16(&rest[0x14 .. 0x16], little_endian);
            let shstrndx   = read_u16(&rest[0x16 .. 0x18], little_endian);

            Some(Self{is_64, little_endian, shoff, shentsize, shnum, shstrndx})
        } else {
            // e_shoff at 0x20 (u32), e_shentsize at 0x2e (u16),
            // e_shnum at 0x30 (u16), e_shstrndx at 0x32 (u16).
            let mut rest = [0u8; 0x34 - 0x20];
            file.seek(SeekFrom::Start(0x20)).ok()?;
            file.read_exact(&mut rest).ok()?;

            let shoff      = read_u32(&rest[0x00 .. 0x04], little_endian) as u64;
            let shentsize  = read_u16(&rest[0x0e .. 0x10], little_endian);
            let shnum      = read_u16(&rest[0x10 .. 0x12], little_endian);
            let shstrndx   = read_u16(&rest[0x12 .. 0x14], little_endian);

            Some(Self{is_64, little_endian, shoff, shentsize, shnum, shstrndx})
        }
    }
}

struct SectionHeader
{
    name_offset: u32,
    offset: u64,
    size: u64,
}

fn read_section_header(file: &mut File, header: &ElfHeader, index: u16) -> Option<SectionHeader>
{
    let at = header.shoff + (index as u64) * (header.shentsize as u64);
    file.seek(SeekFrom::Start(at)).ok()?;

    if header.is_64 {
        // sh_name(u32) sh_type(u32) sh_flags(u64) sh_addr(u64) sh_offset(u64) sh_size(u64)
        let mut buf = [0u8; 0x28];
        file.read_exact(&mut buf).ok()?;
        Some(SectionHeader{
            name_offset: read_u32(&buf[0x00 .. 0x04], header.little_endian),
            offset:      read_u64(&buf[0x18 .. 0x20], header.little_endian),
            size:        read_u64(&buf[0x20 .. 0x28], header.little_endian),
        })
    } else {
        // sh_name(u32) sh_type(u32) sh_flags(u32) sh_addr(u32) sh_offset(u32) sh_size(u32) ...
        let mut buf = [0u8; 0x18];
        file.read_exact(&mut buf).ok()?;
        Some(SectionHeader{
            name_offset: read_u32(&buf[0x00 .. 0x04], header.little_endian),
            offset:      read_u32(&buf[0x10 .. 0x14], header.little_endian) as u64,
            size:        read_u32(&buf[0x14 .. 0x18], header.little_endian) as u64,
        })
    }
}

fn read_cstr_at(file: &mut File, offset: u64) -> Option<String>
{
    file.seek(SeekFrom::Start(offset)).ok()?;

    let mut name = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        file.read_exact(&mut byte).ok()?;
        if byte[0] == 0 {
            break;
        }
        name.push(byte[0]);
    }

    String::from_utf8(name).ok()
}

fn read_u16(bytes: &[u8], little_endian: bool) -> u16
{
    let arr: [u8; 2] = bytes.try_into().unwrap();
    if little_endian { u16::from_le_bytes(arr) } else { u16::from_be_bytes(arr) }
}

fn read_u32(bytes: &[u8], little_endian: bool) -> u32
{
    let arr: [u8; 4] = bytes.try_into().unwrap();
    if little_endian { u32::from_le_bytes(arr) } else { u32::from_be_bytes(arr) }
}

fn read_u64(bytes: &[u8], little_endian: bool) -> u64
{
    let arr: [u8; 8] = bytes.try_into().unwrap();
    if little_endian { u64::from_le_bytes(arr) } else { u64::from_be_bytes(arr) }
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn rejects_non_elf_file()
    {
        let dir = std::env::temp_dir().join(format!("warden-elf-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("not-elf");
        std::fs::write(&path, b"#!/bin/sh\necho hi\n").unwrap();

        assert!(matches!(ElfDepWalker::walk(&path), Err(Error::NotElf(_))));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn library_name_pattern_classifies_expected_names()
    {
        let pattern = library_name_pattern();
        assert!(pattern.is_match("libc.so.6"));
        assert!(pattern.is_match("libm.so"));
        assert!(!pattern.is_match("/usr/lib"));
        assert!(!pattern.is_match("ld-linux-x86-64.so.2"));
    }
}
