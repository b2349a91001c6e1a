use crate::access::rid::RecordId;
use crate::storage::buffer::{BufferPoolManager, PageReadGuard};
use crate::storage::page::btree_leaf_page::BTreeLeafPage;
use crate::storage::page::PageId;
use anyhow::Result;

/// Forward cursor over a run of sibling leaves.
///
/// The iterator owns exactly one pin at a time: the guard on the current
/// leaf. Advancing off the end of a leaf releases that pin before the next
/// sibling is fetched; reaching the end of the chain releases it for good.
/// The leaf bytes are parsed once per page into an owned copy, so entry
/// access does not reparse the guard.
pub struct TreeIterator {
    buffer_pool: BufferPoolManager,
    _guard: Option<PageReadGuard>,
    leaf: Option<BTreeLeafPage>,
    index: usize,
}

impl TreeIterator {
    /// Cursor over an empty tree.
    pub(crate) fn exhausted(buffer_pool: BufferPoolManager) -> Self {
        Self {
            buffer_pool,
            _guard: None,
            leaf: None,
            index: 0,
        }
    }

    /// Cursor at slot `index` of `leaf_id`. An index past the leaf's last
    /// slot rolls over to the next sibling (or the end of the chain).
    pub(crate) fn new(
        buffer_pool: BufferPoolManager,
        leaf_id: PageId,
        index: usize,
    ) -> Result<Self> {
        let guard = buffer_pool.fetch_page(leaf_id)?;
        let leaf = BTreeLeafPage::from_data(&guard);
        let mut iter = Self {
            buffer_pool,
            _guard: Some(guard),
            leaf: Some(leaf),
            index,
        };
        iter.skip_exhausted_leaf()?;
        Ok(iter)
    }

    /// Move to the next sibling while the current position is past the
    /// current leaf's entries.
    fn skip_exhausted_leaf(&mut self) -> Result<()> {
        while let Some(leaf) = &self.leaf {
            if self.index < leaf.size() as usize {
                break;
            }
            let next = leaf.next_page_id();
            self._guard = None; // release the pin before taking the next one
            match next {
                Some(next_id) => {
                    let guard = self.buffer_pool.fetch_page(next_id)?;
                    self.leaf = Some(BTreeLeafPage::from_data(&guard));
                    self._guard = Some(guard);
                    self.index = 0;
                }
                None => self.leaf = None,
            }
        }
        Ok(())
    }

    /// True once the cursor has moved past the last entry of the last leaf.
    pub fn is_end(&self) -> bool {
        self.leaf.is_none()
    }

    /// The entry under the cursor, or None at the end.
    pub fn entry(&self) -> Option<(&[u8], RecordId)> {
        let leaf = self.leaf.as_ref()?;
        Some((leaf.key_at(self.index), leaf.record_id_at(self.index)))
    }

    /// Step to the next entry, hopping to the right sibling at the end of
    /// the current leaf.
    pub fn advance(&mut self) -> Result<()> {
        if self.leaf.is_some() {
            self.index += 1;
            self.skip_exhausted_leaf()?;
        }
        Ok(())
    }
}
