//! Builder for minimal ELF files with a dynamic section.

#![allow(dead_code)]

use oki::elf::{DT_NEEDED, DT_RPATH, DT_RUNPATH};
use std::{
    fs,
    io,
    os::unix::fs::PermissionsExt,
    path::{Path, PathBuf},
};

const ET_REL: u16 = 1;
const ET_DYN: u16 = 3;
const EM_X86_64: u16 = 62;
const SHT_STRTAB: u32 = 3;
const SHT_DYNAMIC: u32 = 6;

#[derive(Debug, Clone)]
pub struct Elf {
    wide: bool,
    big_endian: bool,
    e_type: u16,
    dynamic: bool,
    entries: Vec<(u64, String)>,
}

impl Default for Elf {
    fn default() -> Self {
        Self {
            wide: true,
            big_endian: false,
            e_type: ET_DYN,
            dynamic: true,
            entries: vec![],
        }
    }
}

impl Elf {
    pub fn new() -> Self {
        Self::default()
    }

    /// A 32 bit big endian object.
    pub fn elf32_be() -> Self {
        Self {
            wide: false,
            big_endian: true,
            ..Self::default()
        }
    }

    /// A statically linked binary without a dynamic section.
    pub fn without_dynamic() -> Self {
        Self {
            dynamic: false,
            ..Self::default()
        }
    }

    /// A relocatable object, not an executable or shared object.
    pub fn relocatable() -> Self {
        Self {
            e_type: ET_REL,
            ..Self::default()
        }
    }

    pub fn needed(mut self, name: &str) -> Self {
        self.entries.push((DT_NEEDED, name.to_string()));
        self
    }

    pub fn runpath<P: AsRef<Path>>(mut self, path: P) -> Self {
        let path = path.as_ref().to_string_lossy().into_owned();
        self.entries.push((DT_RUNPATH, path));
        self
    }

    pub fn rpath<P: AsRef<Path>>(mut self, path: P) -> Self {
        let path = path.as_ref().to_string_lossy().into_owned();
        self.entries.push((DT_RPATH, path));
        self
    }

    fn put(&self, buf: &mut [u8], offset: usize, value: u64, size: usize) {
        let bytes = value.to_be_bytes();
        let bytes = &bytes[8 - size..];
        let target = &mut buf[offset..offset + size];
        target.copy_from_slice(bytes);
        if !self.big_endian {
            target.reverse();
        }
    }

    fn word(&self) -> usize {
        if self.wide {
            8
        } else {
            4
        }
    }

    pub fn build(&self) -> Vec<u8> {
        let word = self.word();
        let (header, section, dynamic) = if self.wide { (64, 64, 16) } else { (52, 40, 8) };
        // Offsets of sh_offset, sh_size and sh_link.
        let (sh_offset, sh_size, sh_link) = if self.wide { (24, 32, 40) } else { (16, 20, 24) };

        let mut strings = vec![0u8];
        let mut entries = vec![];
        for (tag, value) in &self.entries {
            entries.push((*tag, strings.len() as u64));
            strings.extend_from_slice(value.as_bytes());
            strings.push(0);
        }
        entries.push((0, 0));

        let strings_offset = header;
        let dynamic_offset = align(strings_offset + strings.len());
        let dynamic_length = entries.len() * dynamic;
        let shoff = align(dynamic_offset + dynamic_length);
        let shnum = if self.dynamic { 3 } else { 2 };

        let mut buf = vec![0u8; shoff + shnum * section];
        buf[..4].copy_from_slice(b"\x7fELF");
        buf[4] = if self.wide { 2 } else { 1 };
        buf[5] = if self.big_endian { 2 } else { 1 };
        buf[6] = 1;

        self.put(&mut buf, 16, self.e_type.into(), 2);
        self.put(&mut buf, 18, EM_X86_64.into(), 2);
        self.put(&mut buf, 20, 1, 4);
        if self.wide {
            self.put(&mut buf, 40, shoff as u64, 8);
            self.put(&mut buf, 52, header as u64, 2);
            self.put(&mut buf, 58, section as u64, 2);
            self.put(&mut buf, 60, shnum as u64, 2);
        } else {
            self.put(&mut buf, 32, shoff as u64, 4);
            self.put(&mut buf, 40, header as u64, 2);
            self.put(&mut buf, 46, section as u64, 2);
            self.put(&mut buf, 48, shnum as u64, 2);
        }

        buf[strings_offset..strings_offset + strings.len()].copy_from_slice(&strings);

        if self.dynamic {
            for (i, (tag, value)) in entries.iter().enumerate() {
                let offset = dynamic_offset + i * dynamic;
                self.put(&mut buf, offset, *tag, word);
                self.put(&mut buf, offset + word, *value, word);
            }
        }

        // Section 0 is the null section.
        let strtab = shoff + section;
        self.put(&mut buf, strtab + 4, SHT_STRTAB.into(), 4);
        self.put(&mut buf, strtab + sh_offset, strings_offset as u64, word);
        self.put(&mut buf, strtab + sh_size, strings.len() as u64, word);

        if self.dynamic {
            let dynsec = shoff + 2 * section;
            self.put(&mut buf, dynsec + 4, SHT_DYNAMIC.into(), 4);
            self.put(&mut buf, dynsec + sh_offset, dynamic_offset as u64, word);
            self.put(&mut buf, dynsec + sh_size, dynamic_length as u64, word);
            self.put(&mut buf, dynsec + sh_link, 1, 4);
        }

        buf
    }

    /// Write the file with executable permissions and return its path.
    pub fn write<P: AsRef<Path>>(&self, path: P) -> io::Result<PathBuf> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, self.build())?;
        fs::set_permissions(path, fs::Permissions::from_mode(0o755))?;
        Ok(path.to_path_buf())
    }
}

fn align(offset: usize) -> usize {
    (offset + 7) & !7
}
