// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Zero-copy ELF64 view over payloads embedded in the boot image
//! OWNERS: @kernel-team
//! PUBLIC API: BootImage, ElfImage (valid/entry/segments/segment_*/load_segment), ElfError
//! DEPENDS_ON: mm::BootMemory
//! INVARIANTS: Every read is bounds checked; nothing is relocated; images are RISC-V ET_EXEC

use core::fmt;

use crate::mm::BootMemory;

pub const PT_LOAD: u32 = 1;

const ELF_MAGIC: [u8; 4] = *b"\x7fELF";
const ELFCLASS64: u8 = 2;
const ELFDATA2LSB: u8 = 1;
const EV_CURRENT: u8 = 1;
const ET_EXEC: u16 = 2;
const EM_RISCV: u16 = 243;
const EHDR_SIZE: usize = 64;
const PHDR_SIZE: usize = 56;

/// Errors surfaced while copying a segment.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ElfError {
    /// No program header with that index.
    BadIndex,
    /// The program header does not describe a `PT_LOAD` segment.
    NotLoadable,
    /// The segment's file bytes lie outside the image.
    SourceOutOfBounds,
}

impl fmt::Display for ElfError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ElfError::BadIndex => "no such program header",
            ElfError::NotLoadable => "segment is not loadable",
            ElfError::SourceOutOfBounds => "segment bytes lie outside the image",
        })
    }
}

/// The flat blob the ROM leaves in memory.
#[derive(Clone, Copy)]
pub struct BootImage<'a> {
    bytes: &'a [u8],
}

impl<'a> BootImage<'a> {
    pub const fn new(bytes: &'a [u8]) -> Self {
        Self { bytes }
    }

    /// # Safety
    ///
    /// `addr..addr + len` must be readable and stay unmodified for `'a`.
    pub unsafe fn from_raw(addr: usize, len: usize) -> Self {
        // SAFETY: forwarded to the caller.
        Self { bytes: unsafe { core::slice::from_raw_parts(addr as *const u8, len) } }
    }

    pub const fn bytes(&self) -> &'a [u8] {
        self.bytes
    }

    pub const fn len(&self) -> usize {
        self.bytes.len()
    }

    pub const fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// ELF view of the payload starting at `offset`.
    pub fn payload(&self, offset: usize) -> Option<ElfImage<'a>> {
        self.bytes.get(offset..).map(ElfImage::new)
    }
}

#[derive(Clone, Copy, Debug)]
struct ProgramHeader {
    p_type: u32,
    offset: usize,
    vaddr: usize,
    filesz: usize,
    memsz: usize,
}

/// Read-only view of one ELF64 image.
#[derive(Clone, Copy)]
pub struct ElfImage<'a> {
    bytes: &'a [u8],
}

impl<'a> ElfImage<'a> {
    pub const fn new(bytes: &'a [u8]) -> Self {
        Self { bytes }
    }

    /// Checks the header and that every loadable segment lies inside the image
    /// and ends below the top of the address space.
    /// Program header 0 must be loadable: it is the code segment.
    pub fn valid(&self) -> bool {
        if self.bytes.len() < EHDR_SIZE || self.bytes[..4] != ELF_MAGIC {
            return false;
        }
        if self.bytes[4] != ELFCLASS64 || self.bytes[5] != ELFDATA2LSB || self.bytes[6] != EV_CURRENT
        {
            return false;
        }
        if le_u16(self.bytes, 16) != Some(ET_EXEC) || le_u16(self.bytes, 18) != Some(EM_RISCV) {
            return false;
        }
        if le_u16(self.bytes, 54).map(usize::from) != Some(PHDR_SIZE) {
            return false;
        }
        let phnum = self.segments();
        if phnum == 0 {
            return false;
        }
        let table_end = self
            .phoff()
            .and_then(|off| phnum.checked_mul(PHDR_SIZE).and_then(|len| off.checked_add(len)));
        if !matches!(table_end, Some(end) if end <= self.bytes.len()) {
            return false;
        }
        if self.segment_type(0) != Some(PT_LOAD) {
            return false;
        }
        (0..phnum).all(|i| match self.header(i) {
            Some(ph) if ph.p_type == PT_LOAD => {
                ph.filesz <= ph.memsz
                    && ph.vaddr.checked_add(ph.memsz).is_some()
                    && matches!(ph.offset.checked_add(ph.filesz), Some(end) if end <= self.bytes.len())
            }
            Some(_) => true,
            None => false,
        })
    }

    pub fn entry(&self) -> usize {
        le_u64(self.bytes, 24).unwrap_or(0) as usize
    }

    /// Number of program-header entries, loadable or not.
    pub fn segments(&self) -> usize {
        le_u16(self.bytes, 56).map(usize::from).unwrap_or(0)
    }

    pub fn segment_type(&self, index: usize) -> Option<u32> {
        self.header(index).map(|ph| ph.p_type)
    }

    /// Virtual address the segment is linked at.
    pub fn segment_address(&self, index: usize) -> Option<usize> {
        self.header(index).map(|ph| ph.vaddr)
    }

    /// Size of the segment in memory, including its zero-filled tail.
    pub fn segment_size(&self, index: usize) -> Option<usize> {
        self.header(index).map(|ph| ph.memsz)
    }

    /// Copies segment `index` to its link address and zero-fills the tail.
    /// Returns the number of bytes placed in memory.
    pub fn load_segment<M: BootMemory + ?Sized>(
        &self,
        index: usize,
        mem: &mut M,
    ) -> Result<usize, ElfError> {
        let ph = self.header(index).ok_or(ElfError::BadIndex)?;
        if ph.p_type != PT_LOAD {
            return Err(ElfError::NotLoadable);
        }
        let end = ph.offset.checked_add(ph.filesz).ok_or(ElfError::SourceOutOfBounds)?;
        let src = self.bytes.get(ph.offset..end).ok_or(ElfError::SourceOutOfBounds)?;
        mem.write(ph.vaddr, src);
        if ph.memsz > ph.filesz {
            mem.fill(ph.vaddr + ph.filesz, 0, ph.memsz - ph.filesz);
        }
        Ok(ph.memsz)
    }

    fn phoff(&self) -> Option<usize> {
        le_u64(self.bytes, 32).map(|v| v as usize)
    }

    fn header(&self, index: usize) -> Option<ProgramHeader> {
        if index >= self.segments() {
            return None;
        }
        let base = self.phoff()?.checked_add(index.checked_mul(PHDR_SIZE)?)?;
        Some(ProgramHeader {
            p_type: le_u32(self.bytes, base)?,
            offset: le_u64(self.bytes, base + 8)? as usize,
            vaddr: le_u64(self.bytes, base + 16)? as usize,
            filesz: le_u64(self.bytes, base + 32)? as usize,
            memsz: le_u64(self.bytes, base + 40)? as usize,
        })
    }
}

fn le_u16(bytes: &[u8], off: usize) -> Option<u16> {
    let raw = bytes.get(off..off.checked_add(2)?)?;
    Some(u16::from_le_bytes(raw.try_into().ok()?))
}

fn le_u32(bytes: &[u8], off: usize) -> Option<u32> {
    let raw = bytes.get(off..off.checked_add(4)?)?;
    Some(u32::from_le_bytes(raw.try_into().ok()?))
}

fn le_u64(bytes: &[u8], off: usize) -> Option<u64> {
    let raw = bytes.get(off..off.checked_add(8)?)?;
    Some(u64::from_le_bytes(raw.try_into().ok()?))
}
