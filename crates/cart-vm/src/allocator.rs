use cart_common::error::MemoryError;

use crate::system::Page;

/// Bytes reserved in front of every block: its payload size and a state tag.
pub const HEADER_SIZE: usize = 16;
/// Payload sizes are rounded up to a multiple of this.
pub const ALIGN: usize = 8;

const TAG_FREE: u64 = 0xF4EE;
const TAG_USED: u64 = 0x05ED;

/// A live allocation. `offset` is the payload offset inside the page; the
/// header sits in the `HEADER_SIZE` bytes right before it.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct Block {
    page: usize,
    offset: usize,
    size: usize,
}

impl Block {
    pub fn size(&self) -> usize {
        self.size
    }

    fn header(&self) -> usize {
        self.offset - HEADER_SIZE
    }

    fn end(&self) -> usize {
        self.offset + self.size
    }
}

/// An entry of the free list. `offset` is the header offset inside the page.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct FreeBlock {
    pub page: usize,
    pub offset: usize,
    pub size: usize,
}

impl FreeBlock {
    fn end(&self) -> usize {
        self.offset + HEADER_SIZE + self.size
    }

    fn position(&self) -> (usize, usize) {
        (self.page, self.offset)
    }
}

/// First-fit allocator over pages mapped from the operating system. The free
/// list is kept in address order and neighbours are merged as soon as both
/// are free. Blocks never straddle pages.
#[derive(Debug)]
pub struct Allocator {
    page_size: usize,
    pages: Vec<Page>,
    free: Vec<FreeBlock>,
    allocated: usize,
    mapped: usize,
}

impl Allocator {
    pub fn new(page_size: usize) -> Self {
        assert!(page_size.is_power_of_two(), "page size must be a power of two");
        assert!(page_size >= HEADER_SIZE * 2, "page size {page_size} is too small");
        Self { page_size, pages: Vec::new(), free: Vec::new(), allocated: 0, mapped: 0 }
    }

    /// Reserves `size` zeroed bytes.
    pub fn allocate(&mut self, size: usize) -> Result<Block, MemoryError> {
        let size = align(size.max(1)).ok_or(MemoryError::OutOfMemory { requested: size })?;
        let block = match self.take(size) {
            Some(block) => block,
            None => {
                self.map_page(size)?;
                self.take(size).ok_or(MemoryError::OutOfMemory { requested: size })?
            }
        };

        self.write_header(block.page, block.header(), block.size, TAG_USED);
        self.pages[block.page].as_mut_slice()[block.offset..block.end()].fill(0);
        self.allocated += block.size;
        log::trace!("allocate {} bytes at page {} offset {}", block.size, block.page, block.offset);
        Ok(block)
    }

    /// Returns a block to the free list.
    pub fn free(&mut self, block: Block) {
        debug_assert_eq!(
            self.read_header(block.page, block.header()),
            (block.size, TAG_USED),
            "freeing a block that is not live"
        );
        self.allocated -= block.size;
        log::trace!("free {} bytes at page {} offset {}", block.size, block.page, block.offset);
        self.insert_free(FreeBlock { page: block.page, offset: block.header(), size: block.size });
    }

    /// Makes `block` at least `size` bytes long, in place when the following
    /// free block is large enough, otherwise by moving the contents.
    pub fn grow(&mut self, block: Block, size: usize) -> Result<Block, MemoryError> {
        let size = align(size).ok_or(MemoryError::OutOfMemory { requested: size })?;
        if size <= block.size {
            return Ok(block);
        }
        let extra = size - block.size;

        let idx = self.free.partition_point(|free| free.position() < (block.page, block.end()));
        if let Some(&next) = self.free.get(idx) {
            let available = HEADER_SIZE + next.size;
            if next.page == block.page && next.offset == block.end() && available >= extra {
                let grown = if available - extra >= HEADER_SIZE + ALIGN {
                    let rest =
                        FreeBlock { page: next.page, offset: next.offset + extra, size: next.size - extra };
                    self.free[idx] = rest;
                    self.write_header(rest.page, rest.offset, rest.size, TAG_FREE);
                    Block { size, ..block }
                } else {
                    self.free.remove(idx);
                    Block { size: block.size + available, ..block }
                };

                self.write_header(grown.page, grown.header(), grown.size, TAG_USED);
                self.pages[grown.page].as_mut_slice()[block.end()..grown.end()].fill(0);
                self.allocated += grown.size - block.size;
                return Ok(grown);
            }
        }

        let grown = self.allocate(size)?;
        let contents = self.bytes(&block).to_vec();
        self.bytes_mut(&grown)[..contents.len()].copy_from_slice(&contents);
        self.free(block);
        Ok(grown)
    }

    pub fn bytes(&self, block: &Block) -> &[u8] {
        &self.pages[block.page].as_slice()[block.offset..block.end()]
    }

    pub fn bytes_mut(&mut self, block: &Block) -> &mut [u8] {
        &mut self.pages[block.page].as_mut_slice()[block.offset..block.end()]
    }

    /// Payload bytes of all live blocks.
    pub fn allocated_bytes(&self) -> usize {
        self.allocated
    }

    /// Bytes obtained from the operating system.
    pub fn mapped_bytes(&self) -> usize {
        self.mapped
    }

    /// Payload bytes of all free blocks.
    pub fn free_bytes(&self) -> usize {
        self.free.iter().map(|free| free.size).sum()
    }

    pub fn free_blocks(&self) -> &[FreeBlock] {
        &self.free
    }

    fn take(&mut self, size: usize) -> Option<Block> {
        let idx = self.free.iter().position(|free| free.size >= size)?;
        let free = self.free[idx];

        if free.size >= size + HEADER_SIZE + ALIGN {
            // Carve the allocation off the tail so the free header stays put.
            let rest = FreeBlock { size: free.size - size - HEADER_SIZE, ..free };
            self.free[idx] = rest;
            self.write_header(rest.page, rest.offset, rest.size, TAG_FREE);
            Some(Block { page: free.page, offset: rest.end() + HEADER_SIZE, size })
        } else {
            self.free.remove(idx);
            Some(Block { page: free.page, offset: free.offset + HEADER_SIZE, size: free.size })
        }
    }

    fn map_page(&mut self, size: usize) -> Result<(), MemoryError> {
        let mut len = self.page_size;
        while len < size + HEADER_SIZE {
            len = len.checked_mul(2).ok_or(MemoryError::OutOfMemory { requested: size })?;
        }
        let page = Page::map(len).ok_or(MemoryError::OutOfMemory { requested: len })?;
        log::debug!("mapped page {} of {len} bytes", self.pages.len());

        self.pages.push(page);
        self.mapped += len;
        self.insert_free(FreeBlock { page: self.pages.len() - 1, offset: 0, size: len - HEADER_SIZE });
        Ok(())
    }

    fn insert_free(&mut self, mut block: FreeBlock) {
        let idx = self.free.partition_point(|free| free.position() < block.position());
        debug_assert!(self.free.get(idx).map_or(true, |next| next.position() != block.position()));

        if let Some(next) = self.free.get(idx) {
            if next.page == block.page && block.end() == next.offset {
                block.size += HEADER_SIZE + next.size;
                self.free.remove(idx);
            }
        }

        if let Some(prev) = idx.checked_sub(1).and_then(|idx| self.free.get_mut(idx)) {
            if prev.page == block.page && prev.end() == block.offset {
                prev.size += HEADER_SIZE + block.size;
                let prev = *prev;
                self.write_header(prev.page, prev.offset, prev.size, TAG_FREE);
                return;
            }
        }

        self.free.insert(idx, block);
        self.write_header(block.page, block.offset, block.size, TAG_FREE);
    }

    fn write_header(&mut self, page: usize, offset: usize, size: usize, tag: u64) {
        let header = &mut self.pages[page].as_mut_slice()[offset..offset + HEADER_SIZE];
        header[..8].copy_from_slice(&(size as u64).to_ne_bytes());
        header[8..].copy_from_slice(&tag.to_ne_bytes());
    }

    fn read_header(&self, page: usize, offset: usize) -> (usize, u64) {
        let header = &self.pages[page].as_slice()[offset..offset + HEADER_SIZE];
        let mut word = [0; 8];
        word.copy_from_slice(&header[..8]);
        let size = u64::from_ne_bytes(word) as usize;
        word.copy_from_slice(&header[8..]);
        (size, u64::from_ne_bytes(word))
    }
}

fn align(size: usize) -> Option<usize> {
    Some(size.checked_add(ALIGN - 1)? & !(ALIGN - 1))
}
