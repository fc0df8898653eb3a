//! Looking up symbol addresses in the executable image of a tracee.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;

use goblin::elf::{header::ET_DYN, program_header::PT_LOAD, section_header::SHN_UNDEF, Elf};
use nix::unistd::{sysconf, Pid, SysconfVar};
use proc_maps::MapRange;
use tracing::debug;

use crate::error::{Error, Result};

/// Resolves named symbols of a running tracee to addresses.
pub trait SymbolResolver {
    /// Return the address of the defined symbol `name` in the executable of `pid`, or
    /// `None` if it has no such symbol.
    fn lookup(&self, pid: Pid, name: &str) -> Result<Option<u64>>;
}

fn exe_path(pid: Pid) -> PathBuf {
    PathBuf::from(format!("/proc/{}/exe", pid.as_raw()))
}

/// Parses the executable image in-process.
///
/// Addresses are relocated by the load bias of position-independent executables, so
/// they can be compared with the tracee's instruction pointer.
#[derive(Clone, Copy, Debug, Default)]
pub struct ElfSymbols;

impl SymbolResolver for ElfSymbols {
    fn lookup(&self, pid: Pid, name: &str) -> Result<Option<u64>> {
        let exe = exe_path(pid);
        let image = fs::read(&exe).map_err(|source| Error::Symbols { pid, source })?;
        let elf = Elf::parse(&image)?;

        let symtab = elf.syms.iter().map(|sym| (sym, elf.strtab.get_at(sym.st_name)));
        let dynsym = elf.dynsyms.iter().map(|sym| (sym, elf.dynstrtab.get_at(sym.st_name)));

        let found = symtab
            .chain(dynsym)
            .find(|(sym, sym_name)| *sym_name == Some(name) && sym.st_shndx != SHN_UNDEF as usize)
            .map(|(sym, _)| sym.st_value);

        let addr = match found {
            Some(addr) => addr,
            None => return Ok(None),
        };

        let bias = if elf.header.e_type == ET_DYN {
            load_bias(pid, &elf)?
        } else {
            0
        };
        debug!(pid = pid.as_raw(), name, addr, bias, "resolved symbol");

        Ok(Some(addr.wrapping_add(bias)))
    }
}

// Difference between where the image was mapped and where it was linked to be.
fn load_bias(pid: Pid, elf: &Elf) -> Result<u64> {
    let page_size = sysconf(SysconfVar::PAGE_SIZE)?.unwrap_or(4096) as u64;

    let linked = elf.program_headers
        .iter()
        .filter(|ph| ph.p_type == PT_LOAD)
        .map(|ph| ph.p_vaddr & !(page_size - 1))
        .min()
        .unwrap_or(0);

    let target = fs::read_link(exe_path(pid)).map_err(|source| Error::Symbols { pid, source })?;
    let maps = proc_maps::get_process_maps(pid.as_raw())
        .map_err(|source| Error::Symbols { pid, source })?;

    match image_base(&maps, &target) {
        Some(mapped) => Ok(mapped.wrapping_sub(linked)),
        None => {
            let source = io::Error::new(io::ErrorKind::NotFound, "executable is not mapped");
            Err(Error::Symbols { pid, source })
        },
    }
}

// Start address of the mapping of file offset 0 of `exe`.
fn image_base(maps: &[MapRange], exe: &Path) -> Option<u64> {
    maps.iter()
        .find(|map| map.offset == 0 && map.filename() == Some(exe))
        .map(|map| map.start() as u64)
}

/// Runs `nm` against the executable image.
///
/// Addresses are link-time addresses, which only match runtime addresses for
/// executables that are not position-independent.
#[derive(Clone, Copy, Debug, Default)]
pub struct NmSymbols;

impl SymbolResolver for NmSymbols {
    fn lookup(&self, pid: Pid, name: &str) -> Result<Option<u64>> {
        let output = Command::new("nm")
            .arg(exe_path(pid))
            .output()
            .map_err(|source| Error::Symbols { pid, source })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);

            // `nm` fails on stripped images, which just means no symbol.
            if stderr.contains("no symbols") {
                return Ok(None);
            }

            let source = io::Error::new(io::ErrorKind::Other, format!("nm: {}", stderr.trim()));
            return Err(Error::Symbols { pid, source });
        }

        Ok(parse_nm(&String::from_utf8_lossy(&output.stdout), name))
    }
}

// Find the address of defined symbol `name` in `nm` output. Undefined symbols are
// printed without an address, and are skipped.
fn parse_nm(output: &str, name: &str) -> Option<u64> {
    output
        .lines()
        .filter_map(|line| {
            let fields: Vec<_> = line.split_whitespace().collect();

            match fields.as_slice() {
                [addr, _kind, sym] if *sym == name => u64::from_str_radix(addr, 16).ok(),
                _ => None,
            }
        })
        .next()
}

/// Always answers with the same address, whatever the tracee or symbol.
#[derive(Clone, Copy, Debug, Default)]
pub struct FixedAddress(pub Option<u64>);

impl SymbolResolver for FixedAddress {
    fn lookup(&self, _pid: Pid, _name: &str) -> Result<Option<u64>> {
        Ok(self.0)
    }
}
