use std::ptr::NonNull;
use std::slice;

#[cfg(unix)]
#[allow(unused)]
mod unix {
    use core::ffi::c_void;

    pub const PROT_READ: i32 = 0x1;
    pub const PROT_WRITE: i32 = 0x2;

    pub const MAP_PRIVATE: i32 = 0x02;

    #[cfg(target_os = "linux")]
    pub const MAP_ANON: i32 = 0x20;
    #[cfg(not(target_os = "linux"))]
    pub const MAP_ANON: i32 = 0x1000;

    pub const MAP_FAILED: isize = -1;

    extern "C" {
        pub fn mmap(
            addr: *mut c_void,
            length: usize,
            prot: i32,
            flags: i32,
            fd: i32,
            offset: isize,
        ) -> *mut c_void;

        pub fn munmap(addr: *mut c_void, length: usize) -> i32;
    }

    /// # Safety
    /// The result must be checked for null.
    pub unsafe fn anonymous_mmap(len: usize) -> *mut u8 {
        // SAFETY: an anonymous private mapping touches no existing memory.
        let p = unsafe {
            mmap(core::ptr::null_mut(), len, PROT_READ | PROT_WRITE, MAP_PRIVATE | MAP_ANON, -1, 0)
        };
        if (p as isize) == MAP_FAILED {
            core::ptr::null_mut()
        } else {
            p as *mut u8
        }
    }

    /// # Safety
    /// `ptr` and `len` must describe a live mapping from [`anonymous_mmap`].
    pub unsafe fn anonymous_munmap(ptr: *mut u8, len: usize) {
        // SAFETY: guaranteed by the caller.
        let _ = unsafe { munmap(ptr.cast(), len) };
    }
}

#[cfg(unix)]
fn map_memory(size: usize) -> Option<NonNull<u8>> {
    // SAFETY: the null case is handled by `NonNull::new`.
    let ptr = unsafe { unix::anonymous_mmap(size) };
    NonNull::new(ptr)
}

#[cfg(unix)]
fn unmap_memory(ptr: NonNull<u8>, size: usize) {
    // SAFETY: every `Page` owns exactly one mapping of `size` bytes.
    unsafe { unix::anonymous_munmap(ptr.as_ptr(), size) };
}

#[cfg(not(unix))]
fn page_layout(size: usize) -> std::alloc::Layout {
    std::alloc::Layout::from_size_align(size, 4096).unwrap_or_else(|_| std::alloc::Layout::new::<u8>())
}

#[cfg(not(unix))]
fn map_memory(size: usize) -> Option<NonNull<u8>> {
    // SAFETY: `size` is never zero; pages are at least one header long.
    NonNull::new(unsafe { std::alloc::alloc_zeroed(page_layout(size)) })
}

#[cfg(not(unix))]
fn unmap_memory(ptr: NonNull<u8>, size: usize) {
    // SAFETY: `ptr` came from `map_memory` with the same size.
    unsafe { std::alloc::dealloc(ptr.as_ptr(), page_layout(size)) };
}

/// A zero-initialised region of memory obtained from the operating system,
/// released when dropped.
#[derive(Debug)]
pub struct Page {
    ptr: NonNull<u8>,
    len: usize,
}

impl Page {
    /// Maps `len` bytes. Returns `None` if the operating system refuses.
    pub fn map(len: usize) -> Option<Self> {
        debug_assert!(len > 0);
        map_memory(len).map(|ptr| Self { ptr, len })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: the mapping is readable, initialised and lives as long as `self`.
        unsafe { slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: as above, and `&mut self` guarantees exclusive access.
        unsafe { slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }
}

impl Drop for Page {
    fn drop(&mut self) {
        unmap_memory(self.ptr, self.len);
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn pages_are_zeroed_and_writable() {
        let mut page = Page::map(4096).unwrap();
        assert_eq!(page.len(), 4096);
        assert!(page.as_slice().iter().all(|&b| b == 0));

        page.as_mut_slice()[4095] = 0xAB;
        assert_eq!(page.as_slice()[4095], 0xAB);
    }
}
