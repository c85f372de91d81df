//! Arena placement helpers.
//!
//! Every structure in this crate lays itself out inside a caller-provided
//! byte buffer instead of allocating its own storage: a header at offset 0
//! followed by fixed-size tables, so the whole thing can live in a `Vec<u8>`,
//! a `memmap2::Mmap`, or a raw `mmap(2)` region managed elsewhere.

use crate::error::{Error, Result};

/// Rounds `value` up to the next multiple of `align` (`align` must be a
/// power of two).
#[inline]
pub fn align_up(value: usize, align: usize) -> usize {
    debug_assert!(align.is_power_of_two());
    (value + align - 1) & !(align - 1)
}

/// Checks that `buf`'s address and length satisfy a structure's placement
/// requirements.
pub fn check_place(buf: &[u8], required_align: usize, required_len: usize) -> Result<()> {
    if (buf.as_ptr() as usize) % required_align != 0 {
        return Err(Error::BadAlignment);
    }
    if buf.len() < required_len {
        return Err(Error::SmallPlace);
    }
    Ok(())
}

/// Same check for a mutable buffer about to be built into.
pub fn check_place_mut(buf: &mut [u8], required_align: usize, required_len: usize) -> Result<()> {
    if (buf.as_ptr() as usize) % required_align != 0 {
        return Err(Error::BadAlignment);
    }
    if buf.len() < required_len {
        return Err(Error::SmallPlace);
    }
    Ok(())
}

/// Casts a byte range of `buf` to a mutable slice of `T`, for placing
/// fixed-width records (cache elements, hash table cells, domain-set
/// records) directly inside the arena. The caller must have already
/// validated alignment and length via [`check_place_mut`].
///
/// # Safety
/// `offset..offset + len * size_of::<T>()` must be within `buf`, properly
/// aligned for `T`, and not aliased by any other live reference.
#[inline]
pub unsafe fn slice_mut<T>(buf: &mut [u8], offset: usize, len: usize) -> &mut [T] {
    let ptr = buf.as_mut_ptr().add(offset) as *mut T;
    std::slice::from_raw_parts_mut(ptr, len)
}

/// Read-only counterpart of [`slice_mut`].
///
/// # Safety
/// Same preconditions as [`slice_mut`], without the aliasing requirement.
#[inline]
pub unsafe fn slice_ref<T>(buf: &[u8], offset: usize, len: usize) -> &[T] {
    let ptr = buf.as_ptr().add(offset) as *const T;
    std::slice::from_raw_parts(ptr, len)
}

/// Casts a single byte range to `&mut T`.
///
/// # Safety
/// Same preconditions as [`slice_mut`] with `len == 1`.
#[inline]
pub unsafe fn place_mut<T>(buf: &mut [u8], offset: usize) -> &mut T {
    &mut *(buf.as_mut_ptr().add(offset) as *mut T)
}

/// Read-only counterpart of [`place_mut`].
///
/// # Safety
/// Same preconditions as [`place_mut`].
#[inline]
pub unsafe fn place_ref<T>(buf: &[u8], offset: usize) -> &T {
    &*(buf.as_ptr().add(offset) as *const T)
}

/// Optional mmap-backed arena convenience, split between an owned-file
/// path ([`MmapArena::open`]) and a borrowed-bytes path ([`load_file`]).
/// None of the core structures touch the filesystem themselves; this
/// exists purely for callers who want a file-backed arena.
pub mod mmap {
    use memmap2::Mmap;
    use std::fs::File;
    use std::path::Path;

    /// An arena backed by a memory-mapped file.
    pub struct MmapArena {
        mmap: Mmap,
    }

    impl MmapArena {
        /// Maps `path` read-only.
        pub fn open(path: impl AsRef<Path>) -> std::io::Result<Self> {
            let file = File::open(path)?;
            // Safety: the caller guarantees the file is not concurrently
            // truncated or modified for the lifetime of the returned arena.
            let mmap = unsafe { Mmap::map(&file)? };
            Ok(Self { mmap })
        }

        /// Returns the mapped bytes.
        pub fn as_bytes(&self) -> &[u8] {
            &self.mmap[..]
        }
    }

    /// Reads `path` fully into memory and hands it back as an owned buffer,
    /// for callers who would rather own a `Vec<u8>` than keep a mapping
    /// alive.
    pub fn load_file(path: impl AsRef<Path>) -> std::io::Result<Vec<u8>> {
        std::fs::read(path)
    }
}
