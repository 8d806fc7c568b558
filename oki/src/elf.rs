//! Reader for the dynamic section of ELF executables and shared objects.
//!
//! Only the parts needed to discover library dependencies are parsed:
//! the file header, the section headers, the `SHT_DYNAMIC` section and
//! the string table it links to.  Both classes (32 and 64 bit) and
//! both byte orders are supported.

use crate::error::Error;
use std::{
    convert::TryFrom,
    fs::File,
    io,
    mem,
    os::unix::fs::FileExt,
    path::Path,
};
use zerocopy::{
    byteorder::{BigEndian, ByteOrder, LittleEndian},
    AsBytes, FromBytes,
};

/// Dynamic section tags.
pub const DT_NULL: u64 = 0;
pub const DT_NEEDED: u64 = 1;
pub const DT_RPATH: u64 = 15;
pub const DT_RUNPATH: u64 = 29;

const ELFMAG: [u8; 4] = *b"\x7fELF";
const ELFCLASS32: u8 = 1;
const ELFCLASS64: u8 = 2;
const ELFDATA2LSB: u8 = 1;
const ELFDATA2MSB: u8 = 2;
const EV_CURRENT: u8 = 1;

const ET_EXEC: u16 = 2;
const ET_DYN: u16 = 3;

const SHT_STRTAB: u32 = 3;
const SHT_DYNAMIC: u32 = 6;

/// The class and byte order independent identification bytes.
#[derive(Debug, AsBytes, FromBytes, Default)]
#[repr(C)]
struct Ident {
    magic: [u8; 4],
    class: u8,
    data: u8,
    version: u8,
    osabi: u8,
    abi_version: u8,
    pad: [u8; 7],
}

impl Ident {
    const LENGTH: usize = mem::size_of::<Self>();
}

/// Sizes and field offsets of the structures of one ELF class.
#[derive(Debug)]
struct Layout {
    wide: bool,
    header: usize,
    e_type: usize,
    e_shoff: usize,
    e_shentsize: usize,
    e_shnum: usize,
    section: usize,
    sh_type: usize,
    sh_offset: usize,
    sh_size: usize,
    sh_link: usize,
    dynamic: usize,
    d_val: usize,
}

const ELF32: Layout = Layout {
    wide: false,
    header: 52,
    e_type: 16,
    e_shoff: 32,
    e_shentsize: 46,
    e_shnum: 48,
    section: 40,
    sh_type: 4,
    sh_offset: 16,
    sh_size: 20,
    sh_link: 24,
    dynamic: 8,
    d_val: 4,
};

const ELF64: Layout = Layout {
    wide: true,
    header: 64,
    e_type: 16,
    e_shoff: 40,
    e_shentsize: 58,
    e_shnum: 60,
    section: 64,
    sh_type: 4,
    sh_offset: 24,
    sh_size: 32,
    sh_link: 40,
    dynamic: 16,
    d_val: 8,
};

/// Decodes fields of one structure in the file's byte order.
struct Fields<'a> {
    buf: &'a [u8],
    big_endian: bool,
    wide: bool,
}

impl Fields<'_> {
    fn u16(&self, offset: usize) -> u16 {
        let buf = &self.buf[offset..offset + 2];
        if self.big_endian {
            BigEndian::read_u16(buf)
        } else {
            LittleEndian::read_u16(buf)
        }
    }

    fn u32(&self, offset: usize) -> u32 {
        let buf = &self.buf[offset..offset + 4];
        if self.big_endian {
            BigEndian::read_u32(buf)
        } else {
            LittleEndian::read_u32(buf)
        }
    }

    /// Read an address-sized field, `Elf32_Word` or `Elf64_Xword`.
    fn word(&self, offset: usize) -> u64 {
        if !self.wide {
            return self.u32(offset).into();
        }
        let buf = &self.buf[offset..offset + 8];
        if self.big_endian {
            BigEndian::read_u64(buf)
        } else {
            LittleEndian::read_u64(buf)
        }
    }
}

/// An opened ELF image.
struct Image<'a> {
    file: File,
    path: &'a Path,
    length: u64,
    layout: &'static Layout,
    big_endian: bool,
}

impl<'a> Image<'a> {
    fn open(path: &'a Path) -> Result<Self, Error> {
        let file = File::open(path)?;
        let length = file.metadata()?.len();

        let mut ident = Ident::default();
        if length < Ident::LENGTH as u64 {
            return Err(invalid(path, "not an ELF file"));
        }
        file.read_exact_at(ident.as_bytes_mut(), 0)?;
        if ident.magic != ELFMAG {
            return Err(invalid(path, "not an ELF file"));
        }

        let layout = match ident.class {
            ELFCLASS32 => &ELF32,
            ELFCLASS64 => &ELF64,
            _ => return Err(invalid(path, "unknown ELF class")),
        };
        let big_endian = match ident.data {
            ELFDATA2LSB => false,
            ELFDATA2MSB => true,
            _ => return Err(invalid(path, "unknown ELF data encoding")),
        };
        if ident.version != EV_CURRENT {
            return Err(invalid(path, "unknown ELF version"));
        }

        Ok(Self {
            file,
            path,
            length,
            layout,
            big_endian,
        })
    }

    fn error(&self, reason: &'static str) -> Error {
        invalid(self.path, reason)
    }

    fn fields<'b>(&self, buf: &'b [u8]) -> Fields<'b> {
        Fields {
            buf,
            big_endian: self.big_endian,
            wide: self.layout.wide,
        }
    }

    /// Read `length` bytes at `offset`, which must be inside the file.
    fn read_at(&self, offset: u64, length: u64) -> Result<Vec<u8>, Error> {
        match offset.checked_add(length) {
            Some(end) if end <= self.length => (),
            _ => return Err(self.error("truncated file")),
        }
        let mut buf = vec![0; length as usize];
        self.file.read_exact_at(&mut buf, offset).map_err(|err| {
            if err.kind() == io::ErrorKind::UnexpectedEof {
                self.error("truncated file")
            } else {
                err.into()
            }
        })?;
        Ok(buf)
    }

    /// Return the raw section headers.
    fn sections(&self) -> Result<Vec<Vec<u8>>, Error> {
        let layout = self.layout;
        let header = self.read_at(0, layout.header as u64)?;
        let header = self.fields(&header);

        match header.u16(layout.e_type) {
            ET_EXEC | ET_DYN => (),
            _ => return Err(self.error("not an executable or shared object")),
        }

        let shoff = header.word(layout.e_shoff);
        let shentsize = usize::from(header.u16(layout.e_shentsize));
        let mut shnum = u64::from(header.u16(layout.e_shnum));
        if shoff == 0 {
            return Err(self.error("missing section headers"));
        }
        if shentsize < layout.section {
            return Err(self.error("invalid section header size"));
        }
        if shnum == 0 {
            // Extended numbering keeps the count in the first header.
            let first = self.read_at(shoff, layout.section as u64)?;
            shnum = self.fields(&first).word(layout.sh_size);
        }

        let table = self.read_at(shoff, shnum.saturating_mul(shentsize as u64))?;
        Ok(table
            .chunks_exact(shentsize)
            .map(|section| section[..layout.section].to_vec())
            .collect())
    }

    /// Read the content of a section.
    fn section_data(&self, section: &[u8]) -> Result<Vec<u8>, Error> {
        let section = self.fields(section);
        self.read_at(
            section.word(self.layout.sh_offset),
            section.word(self.layout.sh_size),
        )
    }
}

fn invalid(path: &Path, reason: &'static str) -> Error {
    Error::Elf {
        path: path.to_path_buf(),
        reason,
    }
}

/// The dependency information declared in an ELF dynamic section.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Dynamic {
    /// Imported libraries (`DT_NEEDED`) in declaration order.
    pub needed: Vec<String>,
    /// Raw `DT_RUNPATH` values.
    pub runpath: Vec<String>,
    /// Raw `DT_RPATH` values.
    pub rpath: Vec<String>,
}

impl Dynamic {
    /// Parse the dynamic section of the ELF file at `path`.
    ///
    /// Statically linked binaries have no dynamic section and return
    /// an empty result.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let path = path.as_ref();
        let image = Image::open(path)?;
        let layout = image.layout;
        let sections = image.sections()?;

        let dynamic = match sections
            .iter()
            .find(|section| image.fields(section).u32(layout.sh_type) == SHT_DYNAMIC)
        {
            Some(section) => section,
            None => return Ok(Self::default()),
        };

        let link = image.fields(dynamic).u32(layout.sh_link) as usize;
        let strtab = sections
            .get(link)
            .filter(|section| image.fields(section).u32(layout.sh_type) == SHT_STRTAB)
            .ok_or_else(|| image.error("invalid dynamic string table"))?;
        let strings = image.section_data(strtab)?;
        let entries = image.section_data(dynamic)?;

        let mut result = Self::default();
        for entry in entries.chunks_exact(layout.dynamic) {
            let entry = image.fields(entry);
            let tag = entry.word(0);
            let list = match tag {
                DT_NULL => break,
                DT_NEEDED => &mut result.needed,
                DT_RUNPATH => &mut result.runpath,
                DT_RPATH => &mut result.rpath,
                _ => continue,
            };
            let value = string_at(&strings, entry.word(layout.d_val))
                .ok_or_else(|| image.error("invalid dynamic string"))?;
            list.push(value);
        }

        Ok(result)
    }

    /// Return the search path entries the loader honors for this binary.
    ///
    /// `DT_RPATH` is ignored if a `DT_RUNPATH` is present.
    pub fn search_path(&self) -> &[String] {
        if self.runpath.is_empty() {
            &self.rpath
        } else {
            &self.runpath
        }
    }
}

/// Return the NUL-terminated UTF-8 string at `offset`.
fn string_at(strings: &[u8], offset: u64) -> Option<String> {
    let start = usize::try_from(offset).ok()?;
    let tail = strings.get(start..)?;
    let length = tail.iter().position(|c| *c == 0)?;
    String::from_utf8(tail[..length].to_vec()).ok()
}
