use firmware_addresses::{LeafSize, PhysicalAddress, VirtualAddress};

#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PagingError {
    #[error("flat 4-level paging is not available on this platform")]
    Unsupported,
    #[error("no present mapping covers {0}")]
    NotMapped(VirtualAddress),
    #[error("{address} is mapped by a {size} leaf, not a 4K leaf")]
    NotFineGrained {
        address: VirtualAddress,
        size: LeafSize,
    },
    #[error("{0} is already mapped by a 4K leaf")]
    NotLargePage(VirtualAddress),
    #[error("{0} is outside the addressable range")]
    AddressOutOfRange(VirtualAddress),
    #[error("{0} is already disabled")]
    AlreadyDisabled(VirtualAddress),
    #[error("{0} was not disabled by this editor")]
    NotDisabled(VirtualAddress),
    #[error("no frame available for a new page table")]
    OutOfTableFrames,
    #[error("table frame {0} is not tracked by this editor")]
    ForeignTable(PhysicalAddress),
}
