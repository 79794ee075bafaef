//! # Known-good stacks for stack faults
//!
//! Overflowing the boot stack runs into its guard page and raises `#PF`,
//! but the processor then pushes the exception frame onto the very stack
//! that just overflowed, which faults again and ends in a triple fault.
//! [`IstStackVector`] gives `#DF`, `#SS` and `#PF` their own stacks through
//! the interrupt stack table (IST) of a task-state segment:
//!
//! ```text
//! base                                                          base + pages
//! | IST1 (#DF) 16K | IST2 (#SS) 16K | IST3 (#PF) 16K | TSS | GDT copy + TSS desc |
//!                 ^top             ^top             ^top
//! ```
//!
//! The firmware's GDT is copied with one 16-byte TSS descriptor appended,
//! loaded with `lgdt`, and the task register points at the new descriptor.
//! The three IDT gates are edited in place; their handlers stay the
//! firmware's.

#![allow(unsafe_code)]

use bitfield_struct::bitfield;
use firmware_addresses::{PageSize, Size4K, align_up, pages_spanning};
use firmware_special_pool::{StackFaultVector, StackGuardError};
use log::{info, warn};

/// Size of each IST stack.
pub const IST_STACK_BYTES: u64 = 16 * 1024;

/// Pattern the IST stacks are filled with, so their high-water mark can be
/// read from a memory dump.
pub const STACK_FILL: u64 = u64::from_le_bytes(*b"StackByt");

pub const DOUBLE_FAULT: u8 = 8;
pub const STACK_SEGMENT_FAULT: u8 = 12;
pub const PAGE_FAULT: u8 = 14;

/// Exception vectors moved to a dedicated stack, with their IST slot.
pub const ROUTED_VECTORS: [(u8, u8); 3] = [(DOUBLE_FAULT, 1), (STACK_SEGMENT_FAULT, 2), (PAGE_FAULT, 3)];

const IST_STACKS: usize = ROUTED_VECTORS.len();

/// 64-bit task-state segment. Only the IST slots are used.
#[repr(C, packed)]
#[derive(Copy, Clone, Default)]
#[allow(dead_code)]
pub struct Tss64 {
    reserved0: u32,
    rsp: [u64; 3],
    reserved1: u64,
    ist: [u64; 7],
    reserved2: u64,
    reserved3: u16,
    iopb_offset: u16,
}

impl Tss64 {
    /// A TSS whose slots `IST1..` hold `tops`; no I/O permission bitmap.
    #[allow(clippy::cast_possible_truncation)]
    #[must_use]
    pub fn with_ist(tops: &[u64]) -> Self {
        let mut ist = [0; 7];
        for (slot, top) in ist.iter_mut().zip(tops) {
            *slot = *top;
        }
        Self {
            ist,
            iopb_offset: size_of::<Self>() as u16,
            ..Self::default()
        }
    }

    /// Stack top of IST slot `slot` (1-based), 0 if unused.
    #[must_use]
    pub fn ist(&self, slot: u8) -> u64 {
        let ist = self.ist;
        usize::from(slot)
            .checked_sub(1)
            .and_then(|i| ist.get(i).copied())
            .unwrap_or(0)
    }
}

/// Low half of a 64-bit available-TSS descriptor.
#[bitfield(u64)]
pub struct TssDescriptorLow {
    pub limit_low: u16,
    pub base_low: u16,
    pub base_mid: u8,
    /// 0x9: available 64-bit TSS.
    #[bits(4)]
    pub descriptor_type: u8,
    /// Clear for system descriptors.
    pub code_or_data: bool,
    #[bits(2)]
    pub dpl: u8,
    pub present: bool,
    #[bits(4)]
    pub limit_high: u8,
    pub available: bool,
    #[bits(2)]
    reserved: u8,
    pub granularity: bool,
    pub base_high: u8,
}

/// High half: bits 32..63 of the base.
#[bitfield(u64)]
pub struct TssDescriptorHigh {
    pub base_upper: u32,
    reserved: u32,
}

/// The two GDT slots a TSS takes in long mode.
#[repr(C)]
#[derive(Copy, Clone)]
pub struct TssDescriptor {
    pub low: TssDescriptorLow,
    pub high: TssDescriptorHigh,
}

impl TssDescriptor {
    pub const AVAILABLE_TSS: u8 = 0x9;

    /// Byte-granular descriptor for the TSS at `base`.
    #[allow(clippy::cast_possible_truncation)]
    #[must_use]
    pub const fn new(base: u64, limit: u32) -> Self {
        let low = TssDescriptorLow::new()
            .with_limit_low(limit as u16)
            .with_limit_high(((limit >> 16) & 0xF) as u8)
            .with_base_low(base as u16)
            .with_base_mid((base >> 16) as u8)
            .with_base_high((base >> 24) as u8)
            .with_descriptor_type(Self::AVAILABLE_TSS)
            .with_present(true);
        let high = TssDescriptorHigh::new().with_base_upper((base >> 32) as u32);
        Self { low, high }
    }

    #[must_use]
    pub fn base(&self) -> u64 {
        u64::from(self.low.base_low())
            | (u64::from(self.low.base_mid()) << 16)
            | (u64::from(self.low.base_high()) << 24)
            | (u64::from(self.high.base_upper()) << 32)
    }
}

/// First quadword of an IDT gate.
#[bitfield(u64)]
pub struct GateLow {
    pub offset_low: u16,
    pub selector: u16,
    /// IST slot the processor switches to; 0 keeps the current stack.
    #[bits(3)]
    pub ist: u8,
    #[bits(5)]
    reserved: u8,
    #[bits(4)]
    pub gate_type: u8,
    zero: bool,
    #[bits(2)]
    pub dpl: u8,
    pub present: bool,
    pub offset_mid: u16,
}

/// Operand of `sgdt`/`lgdt`/`sidt`.
#[repr(C, packed)]
#[derive(Copy, Clone, Default)]
pub struct DescriptorTablePointer {
    pub limit: u16,
    pub base: u64,
}

impl DescriptorTablePointer {
    #[must_use]
    pub fn table_bytes(&self) -> usize {
        usize::from(self.limit) + 1
    }
}

/// Where the stacks, TSS and GDT copy go in one allocation.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct TaskLayout {
    pub base: u64,
    pub pages: u64,
    pub stack_tops: [u64; IST_STACKS],
    pub tss: u64,
    pub gdt: u64,
    /// Bytes of the firmware GDT copied in front of the TSS descriptor.
    pub copied_gdt: usize,
}

impl TaskLayout {
    /// Pages needed next to a GDT of `gdt_bytes`, or `None` if one more
    /// descriptor would not fit a GDT.
    #[must_use]
    pub fn pages(gdt_bytes: usize) -> Option<u64> {
        Self::at(0, gdt_bytes).map(|layout| layout.pages)
    }

    /// The layout of an allocation at `base` for a GDT of `gdt_bytes`.
    #[must_use]
    pub fn at(base: u64, gdt_bytes: usize) -> Option<Self> {
        let extended = gdt_bytes.checked_add(size_of::<TssDescriptor>())?;
        if gdt_bytes % 8 != 0 || extended > 0x1_0000 {
            return None;
        }
        let stacks = IST_STACK_BYTES * IST_STACKS as u64;
        let mut stack_tops = [0; IST_STACKS];
        for (i, top) in stack_tops.iter_mut().enumerate() {
            *top = base + IST_STACK_BYTES * (i as u64 + 1);
        }
        let tss = base + stacks;
        let gdt = align_up(tss + size_of::<Tss64>() as u64, 16)?;
        let end = gdt + extended as u64;
        Some(Self {
            base,
            pages: pages_spanning(end - base)?,
            stack_tops,
            tss,
            gdt,
            copied_gdt: gdt_bytes,
        })
    }

    /// Selector of the appended TSS descriptor.
    #[allow(clippy::cast_possible_truncation)]
    #[must_use]
    pub const fn tss_selector(&self) -> u16 {
        self.copied_gdt as u16
    }

    /// `lgdt` operand for the extended copy.
    #[allow(clippy::cast_possible_truncation)]
    #[must_use]
    pub const fn gdtr(&self) -> DescriptorTablePointer {
        DescriptorTablePointer {
            limit: (self.copied_gdt + size_of::<TssDescriptor>() - 1) as u16,
            base: self.gdt,
        }
    }

    #[allow(clippy::cast_possible_truncation)]
    #[must_use]
    pub const fn tss_descriptor(&self) -> TssDescriptor {
        TssDescriptor::new(self.tss, (size_of::<Tss64>() - 1) as u32)
    }
}

/// Point the gate `low` quadword at IST slot `ist`.
#[must_use]
pub const fn gate_with_ist(low: u64, ist: u8) -> u64 {
    GateLow::from_bits(low).with_ist(ist).into_bits()
}

/// `#DF`, `#SS` and `#PF` on IST stacks of a freshly loaded TSS.
#[derive(Copy, Clone, Debug, Default)]
pub struct IstStackVector;

impl StackFaultVector for IstStackVector {
    #[cfg(target_arch = "x86_64")]
    fn arm(&self) -> Result<(), StackGuardError> {
        use uefi::boot::{self, AllocateType, MemoryType, Tpl};

        // SAFETY: reads the GDTR.
        let old = unsafe { cpu::store_gdtr() };
        let Some(pages) = TaskLayout::pages(old.table_bytes()) else {
            warn!("GDT of {} bytes has no room for a TSS descriptor", old.table_bytes());
            return Err(StackGuardError::VectorRejected);
        };
        let Ok(count) = usize::try_from(pages) else {
            return Err(StackGuardError::VectorRejected);
        };
        let region = boot::allocate_pages(AllocateType::AnyPages, MemoryType::BOOT_SERVICES_DATA, count)
            .map_err(|e| {
                warn!("No {pages} pages for the IST stacks: {:?}", e.status());
                StackGuardError::VectorRejected
            })?;
        let base = region.as_ptr().addr() as u64;
        let layout = TaskLayout::at(base, old.table_bytes()).ok_or(StackGuardError::VectorRejected)?;

        // SAFETY: the region is ours and `layout` stays inside it; at
        // HIGH_LEVEL no interrupt sees the tables half-edited.
        unsafe {
            let _tpl = boot::raise_tpl(Tpl::HIGH_LEVEL);
            let words = usize::try_from(pages * Size4K::SIZE / 8).unwrap_or(0);
            let fill = region.as_ptr().cast::<u64>();
            for i in 0..words {
                fill.add(i).write(STACK_FILL);
            }
            cpu::install(&layout, old);
        }
        info!(
            "IST stacks at {:#x}..{:#x}, TSS at {:#x} (selector {:#x})",
            layout.base,
            layout.tss,
            layout.tss,
            layout.tss_selector()
        );
        Ok(())
    }

    #[cfg(not(target_arch = "x86_64"))]
    fn arm(&self) -> Result<(), StackGuardError> {
        Err(StackGuardError::VectorRejected)
    }
}

#[cfg(target_arch = "x86_64")]
mod cpu {
    use super::{DescriptorTablePointer, ROUTED_VECTORS, TaskLayout, Tss64, gate_with_ist};
    use core::arch::asm;
    use core::ptr;

    pub unsafe fn store_gdtr() -> DescriptorTablePointer {
        let mut gdtr = DescriptorTablePointer::default();
        unsafe {
            asm!("sgdt [{}]", in(reg) &raw mut gdtr, options(nostack, preserves_flags));
        }
        gdtr
    }

    unsafe fn store_idtr() -> DescriptorTablePointer {
        let mut idtr = DescriptorTablePointer::default();
        unsafe {
            asm!("sidt [{}]", in(reg) &raw mut idtr, options(nostack, preserves_flags));
        }
        idtr
    }

    /// Write the TSS and GDT copy, load them and reroute the gates.
    ///
    /// # Safety
    /// `layout` describes writable memory that stays resident; interrupts
    /// must be off.
    pub unsafe fn install(layout: &TaskLayout, old: DescriptorTablePointer) {
        unsafe {
            ptr::write_unaligned(layout.tss as *mut Tss64, Tss64::with_ist(&layout.stack_tops));

            let gdt = layout.gdt as *mut u8;
            ptr::copy_nonoverlapping(old.base as *const u8, gdt, layout.copied_gdt);
            ptr::write_unaligned(gdt.add(layout.copied_gdt).cast(), layout.tss_descriptor());

            let gdtr = layout.gdtr();
            asm!("lgdt [{}]", in(reg) &raw const gdtr, options(readonly, nostack, preserves_flags));
            asm!("ltr {0:x}", in(reg) layout.tss_selector(), options(nostack, preserves_flags));

            let idtr = store_idtr();
            let gates = idtr.base as *mut u64;
            for (vector, ist) in ROUTED_VECTORS {
                if (usize::from(vector) + 1) * 16 > idtr.table_bytes() {
                    continue;
                }
                let low = gates.add(usize::from(vector) * 2);
                low.write_volatile(gate_with_ist(low.read_volatile(), ist));
            }
        }
    }
}
