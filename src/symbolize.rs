//! Symbol and source-line resolution for recorded addresses.
//!
//! Input is an (object path, file offset) pair produced by
//! [`crate::maps_file::AddressMap::translate`]. The offset is converted to
//! the object's virtual address space through its section table, then
//! resolved two ways: function name from the symbol table ranges, and
//! file:line from DWARF when the object carries debug info. Both lookups
//! run over fully owned data, so a symbolizer can be cached per object and
//! outlives nothing.

use std::borrow::Cow;
use std::fs::File;
use std::path::Path;

use object::{Object, ObjectSection, ObjectSymbol};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SymbolizeError {
    #[error("cannot open object {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("cannot parse object {path}: {message}")]
    Parse { path: String, message: String },
}

/// One symbol-table entry covering `[addr, addr + size)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolEntry {
    pub addr: u64,
    pub size: u64,
    pub name: String,
}

/// What resolution found for one address.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SymbolInfo {
    /// Function name, demangled unless disabled.
    pub symbol: Option<String>,
    /// `file:line` from DWARF, when available.
    pub location: Option<String>,
}

type DwarfContext = addr2line::Context<gimli::EndianRcSlice<gimli::RunTimeEndian>>;

/// All resolution state for one object file, fully owned.
pub struct ObjectSymbols {
    /// Sized symbols sorted by address.
    symbols: Vec<SymbolEntry>,
    /// `(file_offset_start, size, vaddr)` per allocated section, for
    /// offset-to-vaddr translation.
    section_ranges: Vec<(u64, u64, u64)>,
    dwarf: Option<DwarfContext>,
}

impl ObjectSymbols {
    /// Parse `path` and build the lookup tables. DWARF is optional; a
    /// stripped object still resolves names through its dynamic symbols.
    pub fn load(path: &Path) -> Result<Self, SymbolizeError> {
        let file = File::open(path).map_err(|source| SymbolizeError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let mmap = unsafe { memmap2::Mmap::map(&file) }.map_err(|source| SymbolizeError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let object = object::File::parse(&*mmap).map_err(|e| SymbolizeError::Parse {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;

        let mut symbols: Vec<SymbolEntry> = object
            .symbols()
            .chain(object.dynamic_symbols())
            .filter(|s| s.is_definition() && s.size() > 0)
            .filter_map(|s| {
                s.name().ok().map(|name| SymbolEntry {
                    addr: s.address(),
                    size: s.size(),
                    name: name.to_string(),
                })
            })
            .collect();
        symbols.sort_by_key(|s| s.addr);
        symbols.dedup_by_key(|s| s.addr);

        let mut section_ranges: Vec<(u64, u64, u64)> = object
            .sections()
            .filter_map(|s| {
                let (file_start, size) = s.file_range()?;
                (size > 0).then_some((file_start, size, s.address()))
            })
            .collect();
        section_ranges.sort_unstable();

        let dwarf = load_dwarf(&object);

        Ok(Self {
            symbols,
            section_ranges,
            dwarf,
        })
    }

    /// A symbolizer built from pre-parsed entries, for callers that have
    /// no object file (and for tests).
    pub fn from_entries(mut symbols: Vec<SymbolEntry>) -> Self {
        symbols.sort_by_key(|s| s.addr);
        Self {
            symbols,
            section_ranges: Vec::new(),
            dwarf: None,
        }
    }

    /// Translate a file offset into the object's virtual address space.
    /// Identity when no section covers the offset (common for synthetic
    /// test fixtures, and harmless: lookups just miss).
    pub fn offset_to_vaddr(&self, offset: u64) -> u64 {
        for (file_start, size, vaddr) in &self.section_ranges {
            if *file_start <= offset && offset < file_start + size {
                return offset - file_start + vaddr;
            }
        }
        offset
    }

    /// Resolve one file offset.
    pub fn lookup(&self, offset: u64, demangle: bool) -> SymbolInfo {
        let vaddr = self.offset_to_vaddr(offset);

        let symbol = self.symbol_at(vaddr).map(|entry| {
            if demangle {
                demangle_name(&entry.name)
            } else {
                entry.name.clone()
            }
        });

        let location = self.dwarf.as_ref().and_then(|ctx| {
            let loc = ctx.find_location(vaddr).ok().flatten()?;
            let file = loc.file?;
            let line = loc.line?;
            Some(format!("{file}:{line}"))
        });

        SymbolInfo { symbol, location }
    }

    fn symbol_at(&self, vaddr: u64) -> Option<&SymbolEntry> {
        let idx = self.symbols.partition_point(|s| s.addr <= vaddr);
        if idx == 0 {
            return None;
        }
        let entry = &self.symbols[idx - 1];
        (vaddr < entry.addr + entry.size).then_some(entry)
    }
}

fn demangle_name(name: &str) -> String {
    rustc_demangle::demangle(name).to_string()
}

/// Build a DWARF context over owned copies of the debug sections. A
/// missing or malformed .debug_* set degrades to name-only resolution.
fn load_dwarf(object: &object::File<'_>) -> Option<DwarfContext> {
    let endian = if object.is_little_endian() {
        gimli::RunTimeEndian::Little
    } else {
        gimli::RunTimeEndian::Big
    };

    let load_section =
        |id: gimli::SectionId| -> Result<gimli::EndianRcSlice<gimli::RunTimeEndian>, gimli::Error> {
            let data = object
                .section_by_name(id.name())
                .and_then(|section| section.uncompressed_data().ok())
                .unwrap_or(Cow::Borrowed(&[]));
            let bytes: std::rc::Rc<[u8]> = std::rc::Rc::from(data.into_owned());
            Ok(gimli::EndianRcSlice::new(bytes, endian))
        };

    let dwarf = gimli::Dwarf::load(&load_section).ok()?;
    addr2line::Context::from_dwarf(dwarf).ok()
}
