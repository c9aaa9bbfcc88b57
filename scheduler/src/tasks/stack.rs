use std::{io, ptr::NonNull};

use x86_64::VirtAddr;

/// Required alignment of the initial stack pointer
const STACK_ALIGN: u64 = 16;

/// A task stack and the guard page below it.
///
/// Backed by a private anonymous mapping. The lowest page is mapped
/// `PROT_NONE` so running off the end of the stack faults instead of
/// corrupting a neighbour. The mapping is released on drop.
#[derive(Debug)]
pub struct Stack {
    base: NonNull<u8>,
    mapped: usize,
    guard: usize,
}

impl Stack {
    /// Map a stack with at least `size` usable bytes, rounded up to whole pages.
    pub fn new(size: usize) -> io::Result<Self> {
        let page = page_size();
        let usable = size.div_ceil(page).max(1) * page;
        let mapped = usable + page;

        let base = unsafe {
            libc::mmap(
                core::ptr::null_mut(),
                mapped,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if base == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }

        if unsafe { libc::mprotect(base, page, libc::PROT_NONE) } != 0 {
            let err = io::Error::last_os_error();
            unsafe { libc::munmap(base, mapped) };
            return Err(err);
        }

        let base = NonNull::new(base.cast::<u8>()).ok_or_else(|| io::Error::from(io::ErrorKind::OutOfMemory))?;
        trace!("mapped {:#x} byte stack at {:p}", usable, base);
        Ok(Stack {
            base,
            mapped,
            guard: page,
        })
    }

    /// Highest usable address, aligned for an initial stack pointer.
    pub fn top(&self) -> VirtAddr {
        VirtAddr::new(self.base.as_ptr() as u64 + self.mapped as u64).align_down(STACK_ALIGN)
    }

    /// Lowest usable address, just above the guard page.
    pub fn bottom(&self) -> VirtAddr {
        VirtAddr::new(self.base.as_ptr() as u64 + self.guard as u64)
    }

    /// Usable bytes between the guard page and the top.
    pub fn len(&self) -> usize {
        self.mapped - self.guard
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, addr: VirtAddr) -> bool {
        addr >= self.bottom() && addr < self.top()
    }
}

impl Drop for Stack {
    fn drop(&mut self) {
        if unsafe { libc::munmap(self.base.as_ptr().cast(), self.mapped) } != 0 {
            error!("failed to unmap stack at {:p}: {}", self.base, io::Error::last_os_error());
        }
    }
}

fn page_size() -> usize {
    match unsafe { libc::sysconf(libc::_SC_PAGESIZE) } {
        size if size > 0 => size as usize,
        _ => 4096,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stack_is_page_rounded_and_aligned() {
        let stack = Stack::new(10_000).unwrap();
        assert!(stack.len() >= 10_000);
        assert_eq!(stack.len() % page_size(), 0);
        assert!(stack.top().is_aligned(STACK_ALIGN));
        assert_eq!(stack.top() - stack.bottom(), stack.len() as u64);
    }

    #[test]
    fn stack_memory_is_writable_end_to_end() {
        let stack = Stack::new(page_size()).unwrap();
        let bottom = stack.bottom().as_mut_ptr::<u8>();
        let last = (stack.top() - 1u64).as_mut_ptr::<u8>();
        unsafe {
            bottom.write(0xAA);
            last.write(0x55);
            assert_eq!(bottom.read(), 0xAA);
            assert_eq!(last.read(), 0x55);
        }
        assert!(stack.contains(stack.bottom()));
        assert!(!stack.contains(stack.top()));
    }

    #[test]
    fn zero_sized_request_still_gets_a_page() {
        let stack = Stack::new(0).unwrap();
        assert_eq!(stack.len(), page_size());
        assert!(!stack.is_empty());
    }
}
