// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Host doubles: sparse memory, ELF and boot-image builders, a recording MMU.

use std::cell::Cell;
use std::collections::BTreeMap;

use crate::config::MAX_APPS;
use crate::elf::PT_LOAD;
use crate::hal::Mmu;
use crate::info::BootMap;
use crate::layout::MemoryLayout;
use crate::mm::{BootMemory, PageTablePage, PAGE_SIZE};

/// Page-granular memory that materialises zeroed pages on first write.
#[derive(Default)]
pub struct SimMemory {
    pages: BTreeMap<usize, Box<PageTablePage>>,
}

impl SimMemory {
    pub fn new() -> Self {
        Self::default()
    }

    fn page_mut(&mut self, page: usize) -> &mut PageTablePage {
        self.pages.entry(page).or_insert_with(|| Box::new(PageTablePage::new()))
    }

    fn page_bytes(page: &mut PageTablePage) -> &mut [u8] {
        // SAFETY: a table page is PAGE_SIZE bytes of plain integers.
        unsafe { std::slice::from_raw_parts_mut(page as *mut PageTablePage as *mut u8, PAGE_SIZE) }
    }

    fn for_each_byte(&mut self, addr: usize, len: usize, mut f: impl FnMut(usize, &mut u8)) {
        for i in 0..len {
            let a = addr + i;
            let page = self.page_mut(a & !(PAGE_SIZE - 1));
            f(i, &mut Self::page_bytes(page)[a & (PAGE_SIZE - 1)]);
        }
    }

    pub fn read(&self, addr: usize, len: usize) -> Vec<u8> {
        (0..len)
            .map(|i| {
                let a = addr + i;
                self.pages.get(&(a & !(PAGE_SIZE - 1))).map_or(0, |page| {
                    // SAFETY: a table page is PAGE_SIZE bytes of plain integers.
                    let bytes = unsafe {
                        std::slice::from_raw_parts(&**page as *const PageTablePage as *const u8, PAGE_SIZE)
                    };
                    bytes[a & (PAGE_SIZE - 1)]
                })
            })
            .collect()
    }

    /// Pages touched so far.
    pub fn resident(&self) -> usize {
        self.pages.len()
    }
}

impl BootMemory for SimMemory {
    fn table(&mut self, pa: usize) -> &mut PageTablePage {
        assert_eq!(pa % PAGE_SIZE, 0, "table at unaligned address {:#x}", pa);
        self.page_mut(pa)
    }

    fn table_ref(&self, pa: usize) -> Option<&PageTablePage> {
        self.pages.get(&pa).map(|page| &**page)
    }

    fn write(&mut self, addr: usize, bytes: &[u8]) {
        self.for_each_byte(addr, bytes.len(), |i, b| *b = bytes[i]);
    }

    fn fill(&mut self, addr: usize, value: u8, len: usize) {
        self.for_each_byte(addr, len, |_, b| *b = value);
    }
}

struct Segment {
    p_type: u32,
    vaddr: u64,
    data: Vec<u8>,
    memsz: u64,
}

/// Emits minimal RISC-V ET_EXEC images.
pub struct ElfBuilder {
    entry: u64,
    segments: Vec<Segment>,
}

impl ElfBuilder {
    pub fn new(entry: usize) -> Self {
        Self { entry: entry as u64, segments: Vec::new() }
    }

    pub fn load(self, vaddr: usize, data: &[u8], memsz: usize) -> Self {
        self.segment(PT_LOAD, vaddr, data, memsz)
    }

    pub fn segment(mut self, p_type: u32, vaddr: usize, data: &[u8], memsz: usize) -> Self {
        self.segments.push(Segment {
            p_type,
            vaddr: vaddr as u64,
            data: data.to_vec(),
            memsz: memsz as u64,
        });
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let phoff = 64usize;
        let mut offset = phoff + 56 * self.segments.len();
        let mut out = vec![0u8; offset];
        out[..4].copy_from_slice(b"\x7fELF");
        out[4] = 2;
        out[5] = 1;
        out[6] = 1;
        out[16..18].copy_from_slice(&2u16.to_le_bytes());
        out[18..20].copy_from_slice(&243u16.to_le_bytes());
        out[20..24].copy_from_slice(&1u32.to_le_bytes());
        out[24..32].copy_from_slice(&self.entry.to_le_bytes());
        out[32..40].copy_from_slice(&(phoff as u64).to_le_bytes());
        out[52..54].copy_from_slice(&64u16.to_le_bytes());
        out[54..56].copy_from_slice(&56u16.to_le_bytes());
        out[56..58].copy_from_slice(&(self.segments.len() as u16).to_le_bytes());
        for (i, seg) in self.segments.iter().enumerate() {
            let ph = phoff + 56 * i;
            out[ph..ph + 4].copy_from_slice(&seg.p_type.to_le_bytes());
            out[ph + 8..ph + 16].copy_from_slice(&(offset as u64).to_le_bytes());
            out[ph + 16..ph + 24].copy_from_slice(&seg.vaddr.to_le_bytes());
            out[ph + 24..ph + 32].copy_from_slice(&seg.vaddr.to_le_bytes());
            out[ph + 32..ph + 40].copy_from_slice(&(seg.data.len() as u64).to_le_bytes());
            out[ph + 40..ph + 48].copy_from_slice(&seg.memsz.to_le_bytes());
            out[ph + 48..ph + 56].copy_from_slice(&(PAGE_SIZE as u64).to_le_bytes());
            offset += seg.data.len();
        }
        for seg in &self.segments {
            out.extend_from_slice(&seg.data);
        }
        out
    }
}

/// Assembles a boot image and the descriptor that goes with it.
pub struct BlobBuilder {
    bytes: Vec<u8>,
    bm: BootMap,
}

impl BlobBuilder {
    pub fn new(layout: &MemoryLayout) -> Self {
        let mut bm = BootMap::EMPTY;
        bm.mem_base = layout.ram_base;
        bm.mem_top = layout.ram_top;
        bm.mio_base = layout.mio_base;
        bm.mio_top = layout.mio_top;
        Self { bytes: Vec::new(), bm }
    }

    fn append(&mut self, payload: &[u8]) -> u32 {
        while self.bytes.len() % 8 != 0 {
            self.bytes.push(0);
        }
        let offset = self.bytes.len() as u32;
        self.bytes.extend_from_slice(payload);
        offset
    }

    pub fn setup(mut self, elf: &[u8]) -> Self {
        self.bm.setup_offset = self.append(elf);
        self
    }

    pub fn init(mut self, elf: &[u8]) -> Self {
        self.bm.init_offset = self.append(elf);
        self
    }

    pub fn system(mut self, elf: &[u8]) -> Self {
        self.bm.system_offset = self.append(elf);
        self
    }

    pub fn app(mut self, slot: usize, elf: &[u8]) -> Self {
        assert!(slot < MAX_APPS);
        self.bm.application_offset[slot] = self.append(elf);
        self
    }

    pub fn extras(mut self, bytes: &[u8]) -> Self {
        self.bm.extras_offset = self.append(bytes);
        self
    }

    pub fn cpus(mut self, n: u32) -> Self {
        self.bm.n_cpus = n;
        self
    }

    pub fn build(mut self) -> (Vec<u8>, BootMap) {
        self.bm.img_size = self.bytes.len() as u32;
        (self.bytes, self.bm)
    }
}

/// Remembers what the sequencer asked the MMU to do.
#[derive(Default)]
pub struct RecordingMmu {
    pub root: Cell<Option<usize>>,
    pub flushes: Cell<usize>,
}

impl Mmu for RecordingMmu {
    fn set_root(&self, satp: usize) {
        self.root.set(Some(satp));
    }

    fn flush_tlb(&self) {
        self.flushes.set(self.flushes.get() + 1);
    }
}
