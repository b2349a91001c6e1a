pub mod iterator;
pub mod key;

use self::iterator::TreeIterator;
use self::key::{encode_i64, KeyComparator};
use crate::access::rid::RecordId;
use crate::storage::error::StorageError;
use crate::storage::page::btree_internal_page::BTreeInternalPage;
use crate::storage::page::btree_leaf_page::BTreeLeafPage;
use crate::storage::page::btree_page::{node_type_of, NodeHeader, NodeType, NODE_HEADER_SIZE};
use crate::storage::page::header_page::{HeaderPage, HEADER_PAGE_ID};
use crate::storage::page::{Page, PageId};
use crate::storage::BufferPoolManager;
use anyhow::{bail, Context, Result};
use parking_lot::Mutex;
use std::cmp::Ordering;
use std::path::Path;

/// Disk-resident B+tree mapping fixed-width keys to record ids. Keys are
/// unique. Every public operation runs under one tree-wide mutex; pages are
/// pinned through buffer pool guards for exactly the duration they are
/// read or written.
///
/// The root page id is persisted in the header page under the index name,
/// so an index survives reopening the same file.
pub struct BPlusTree<C: KeyComparator> {
    index_name: String,
    buffer_pool: BufferPoolManager,
    comparator: C,
    key_size: usize,
    leaf_max_size: Option<u16>,
    internal_max_size: Option<u16>,
    root: Mutex<Option<PageId>>,
}

impl<C: KeyComparator> BPlusTree<C> {
    pub fn new(
        index_name: &str,
        buffer_pool: BufferPoolManager,
        comparator: C,
        key_size: usize,
    ) -> Result<Self> {
        Self::open(index_name, buffer_pool, comparator, key_size, None, None)
    }

    /// Like `new`, but with explicit node capacities instead of the
    /// page-derived ones. Small capacities make structural changes easy to
    /// exercise in tests.
    pub fn with_max_sizes(
        index_name: &str,
        buffer_pool: BufferPoolManager,
        comparator: C,
        key_size: usize,
        leaf_max_size: u16,
        internal_max_size: u16,
    ) -> Result<Self> {
        Self::open(
            index_name,
            buffer_pool,
            comparator,
            key_size,
            Some(leaf_max_size),
            Some(internal_max_size),
        )
    }

    fn open(
        index_name: &str,
        buffer_pool: BufferPoolManager,
        comparator: C,
        key_size: usize,
        leaf_max_size: Option<u16>,
        internal_max_size: Option<u16>,
    ) -> Result<Self> {
        if key_size == 0 {
            bail!("key size must be non-zero");
        }

        // The header page occupies the first slot of a fresh file.
        if buffer_pool.num_pages()? == 0 {
            let (page_id, mut guard) = buffer_pool.new_page()?;
            if page_id != HEADER_PAGE_ID {
                bail!("header page allocated at {}, expected page 0", page_id);
            }
            guard.copy_from_slice(HeaderPage::new().data());
        }

        let root = {
            let guard = buffer_pool.fetch_page(HEADER_PAGE_ID)?;
            let header = HeaderPage::from_data(&guard);
            header.get_record(index_name).flatten()
        };

        Ok(Self {
            index_name: index_name.to_string(),
            buffer_pool,
            comparator,
            key_size,
            leaf_max_size,
            internal_max_size,
            root: Mutex::new(root),
        })
    }

    pub fn is_empty(&self) -> bool {
        self.root.lock().is_none()
    }

    pub fn root_page_id(&self) -> Option<PageId> {
        *self.root.lock()
    }

    /// Point lookup.
    pub fn get(&self, key: &[u8]) -> Result<Option<RecordId>> {
        self.check_key(key)?;
        let root = self.root.lock();
        let Some(root_id) = *root else {
            return Ok(None);
        };

        let leaf_id = self.find_leaf(root_id, key, false)?;
        let guard = self.buffer_pool.fetch_page(leaf_id)?;
        let leaf = BTreeLeafPage::from_data(&guard);
        Ok(leaf.lookup(key, &self.comparator))
    }

    /// Insert a unique key. Returns false (and changes nothing) when the
    /// key is already present.
    pub fn insert(&self, key: &[u8], rid: RecordId) -> Result<bool> {
        self.check_key(key)?;
        let mut root = self.root.lock();
        match *root {
            None => {
                self.start_new_tree(&mut root, key, rid)?;
                Ok(true)
            }
            Some(root_id) => self.insert_into_leaf(&mut root, root_id, key, rid),
        }
    }

    /// Remove a key. Absent keys are a silent no-op.
    pub fn remove(&self, key: &[u8]) -> Result<()> {
        self.check_key(key)?;
        let mut root = self.root.lock();
        let Some(root_id) = *root else {
            return Ok(());
        };

        let leaf_id = self.find_leaf(root_id, key, false)?;
        let mut guard = self.buffer_pool.fetch_page_write(leaf_id)?;
        let mut leaf = BTreeLeafPage::from_data(&guard);
        if leaf.lookup(key, &self.comparator).is_none() {
            return Ok(());
        }
        leaf.remove(key, &self.comparator);
        guard.copy_from_slice(leaf.data());
        drop(guard);

        self.coalesce_or_redistribute(&mut root, leaf_id)
    }

    /// Forward cursor over the whole index, starting at the smallest key.
    pub fn iter(&self) -> Result<TreeIterator> {
        let root = self.root.lock();
        let Some(root_id) = *root else {
            return Ok(TreeIterator::exhausted(self.buffer_pool.clone()));
        };
        let leaf_id = self.find_leaf(root_id, &[], true)?;
        TreeIterator::new(self.buffer_pool.clone(), leaf_id, 0)
    }

    /// Forward cursor positioned at the first key >= `key`.
    pub fn iter_from(&self, key: &[u8]) -> Result<TreeIterator> {
        self.check_key(key)?;
        let root = self.root.lock();
        let Some(root_id) = *root else {
            return Ok(TreeIterator::exhausted(self.buffer_pool.clone()));
        };

        let leaf_id = self.find_leaf(root_id, key, false)?;
        let index = {
            let guard = self.buffer_pool.fetch_page(leaf_id)?;
            let leaf = BTreeLeafPage::from_data(&guard);
            leaf.key_index(key, &self.comparator)
        };
        TreeIterator::new(self.buffer_pool.clone(), leaf_id, index)
    }

    /// Test surface: read whitespace-separated integers and insert each
    /// as (key, synthesized record id).
    pub fn insert_from_file(&self, path: &Path) -> Result<()> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {:?}", path))?;
        for token in contents.split_whitespace() {
            let key: i64 = token
                .parse()
                .with_context(|| format!("Invalid integer: {}", token))?;
            self.insert(&encode_i64(key, self.key_size), RecordId::from_key(key))?;
        }
        Ok(())
    }

    /// Test surface: read whitespace-separated integers and remove each.
    pub fn remove_from_file(&self, path: &Path) -> Result<()> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {:?}", path))?;
        for token in contents.split_whitespace() {
            let key: i64 = token
                .parse()
                .with_context(|| format!("Invalid integer: {}", token))?;
            self.remove(&encode_i64(key, self.key_size))?;
        }
        Ok(())
    }

    fn check_key(&self, key: &[u8]) -> Result<()> {
        if key.len() != self.key_size {
            return Err(StorageError::InvalidKeyWidth {
                expected: self.key_size,
                got: key.len(),
            }
            .into());
        }
        Ok(())
    }

    /// Descend from the root to the leaf owning `key` (or the leftmost
    /// leaf). Each level holds one pin, released before the next fetch.
    fn find_leaf(&self, root_id: PageId, key: &[u8], leftmost: bool) -> Result<PageId> {
        let mut page_id = root_id;
        loop {
            let guard = self.buffer_pool.fetch_page(page_id)?;
            match node_type_of(&guard) {
                Some(NodeType::Leaf) => return Ok(page_id),
                Some(NodeType::Internal) => {
                    let node = BTreeInternalPage::from_data(&guard);
                    page_id = if leftmost {
                        node.value_at(0)
                    } else {
                        node.lookup(key, &self.comparator)
                    };
                }
                None => bail!("page {} is not a b+tree node", page_id),
            }
        }
    }

    fn start_new_tree(&self, root: &mut Option<PageId>, key: &[u8], rid: RecordId) -> Result<()> {
        let (page_id, mut guard) = self.buffer_pool.new_page()?;
        let mut leaf = BTreeLeafPage::new(page_id, None, self.key_size, self.leaf_max_size);
        leaf.insert(key, rid, &self.comparator);
        guard.copy_from_slice(leaf.data());
        drop(guard);

        *root = Some(page_id);
        self.update_root_page_id(*root)
    }

    fn insert_into_leaf(
        &self,
        root: &mut Option<PageId>,
        root_id: PageId,
        key: &[u8],
        rid: RecordId,
    ) -> Result<bool> {
        let leaf_id = self.find_leaf(root_id, key, false)?;
        let mut guard = self.buffer_pool.fetch_page_write(leaf_id)?;
        let mut leaf = BTreeLeafPage::from_data(&guard);

        if leaf.lookup(key, &self.comparator).is_some() {
            return Ok(false);
        }

        if leaf.size() < leaf.max_size() {
            leaf.insert(key, rid, &self.comparator);
            guard.copy_from_slice(leaf.data());
            return Ok(true);
        }

        // Full leaf: split, then place the pair in the half that owns it.
        let (new_id, mut new_guard) = self.buffer_pool.new_page()?;
        let mut new_leaf = BTreeLeafPage::new(
            new_id,
            leaf.parent_page_id(),
            self.key_size,
            self.leaf_max_size,
        );
        leaf.move_half_to(&mut new_leaf);
        new_leaf.set_next_page_id(leaf.next_page_id());
        leaf.set_next_page_id(Some(new_id));

        if self.comparator.compare(key, new_leaf.key_at(0)) == Ordering::Less {
            leaf.insert(key, rid, &self.comparator);
        } else {
            new_leaf.insert(key, rid, &self.comparator);
        }

        let separator = new_leaf.key_at(0).to_vec();
        let old_parent = leaf.parent_page_id();
        guard.copy_from_slice(leaf.data());
        new_guard.copy_from_slice(new_leaf.data());
        drop(guard);
        drop(new_guard);

        self.insert_into_parent(root, leaf_id, old_parent, &separator, new_id)?;
        Ok(true)
    }

    /// Hook `new_id` into the parent of `old_id` under `key`, splitting
    /// parents (and ultimately growing a new root) as needed. Both children
    /// are already consistent on disk when this runs.
    fn insert_into_parent(
        &self,
        root: &mut Option<PageId>,
        old_id: PageId,
        old_parent: Option<PageId>,
        key: &[u8],
        new_id: PageId,
    ) -> Result<()> {
        let Some(parent_id) = old_parent else {
            // The old node was the root: grow the tree by one level.
            let (new_root_id, mut guard) = self.buffer_pool.new_page()?;
            let mut new_root =
                BTreeInternalPage::new(new_root_id, None, self.key_size, self.internal_max_size);
            new_root.populate_new_root(old_id, key, new_id);
            guard.copy_from_slice(new_root.data());
            drop(guard);

            self.set_parent(old_id, Some(new_root_id))?;
            self.set_parent(new_id, Some(new_root_id))?;
            *root = Some(new_root_id);
            return self.update_root_page_id(*root);
        };

        let mut guard = self.buffer_pool.fetch_page_write(parent_id)?;
        let mut parent = BTreeInternalPage::from_data(&guard);

        if parent.size() < parent.max_size() {
            parent.insert_node_after(old_id, key, new_id);
            guard.copy_from_slice(parent.data());
            return Ok(());
        }

        // Parent is full too: split it and keep promoting.
        let (sibling_id, mut sibling_guard) = self.buffer_pool.new_page()?;
        let mut sibling = BTreeInternalPage::new(
            sibling_id,
            parent.parent_page_id(),
            self.key_size,
            self.internal_max_size,
        );
        let moved = parent.move_half_to(&mut sibling);
        let promoted = sibling.key_at(0).to_vec();
        let grandparent = parent.parent_page_id();

        let new_on_sibling = self.comparator.compare(key, &promoted) != Ordering::Less;
        if new_on_sibling {
            // The anchor slot moved with the upper half.
            sibling.insert_node_after(old_id, key, new_id);
        } else {
            parent.insert_node_after(old_id, key, new_id);
        }

        guard.copy_from_slice(parent.data());
        sibling_guard.copy_from_slice(sibling.data());
        drop(guard);
        drop(sibling_guard);

        for child in moved {
            self.set_parent(child, Some(sibling_id))?;
        }
        if new_on_sibling {
            self.set_parent(new_id, Some(sibling_id))?;
        }

        self.insert_into_parent(root, parent_id, grandparent, &promoted, sibling_id)
    }

    /// Restore the fill invariant for `node_id` after a removal, merging or
    /// rotating with a sibling and recursing up on merges.
    fn coalesce_or_redistribute(&self, root: &mut Option<PageId>, node_id: PageId) -> Result<()> {
        let (node_type, size, max_size, parent) = {
            let guard = self.buffer_pool.fetch_page(node_id)?;
            let Some(node_type) = node_type_of(&guard) else {
                bail!("page {} is not a b+tree node", node_id);
            };
            let mut header = NodeHeader::new();
            header.data.copy_from_slice(&guard[..NODE_HEADER_SIZE]);
            (node_type, header.size(), header.max_size(), header.parent_page_id())
        };

        let min_size = (max_size + 1) / 2;
        if size >= min_size {
            return Ok(());
        }

        let Some(parent_id) = parent else {
            // Root underflow has two special cases; anything else is legal.
            match node_type {
                NodeType::Leaf if size == 0 => {
                    *root = None;
                    self.update_root_page_id(*root)?;
                    self.buffer_pool.delete_page(node_id)?;
                }
                NodeType::Internal if size == 1 => {
                    self.adjust_root(root, node_id)?;
                }
                _ => {}
            }
            return Ok(());
        };

        let mut parent_guard = self.buffer_pool.fetch_page_write(parent_id)?;
        let mut parent = BTreeInternalPage::from_data(&parent_guard);

        // Prefer the left sibling; the leftmost child has only a right one.
        let node_index = parent.value_index(node_id);
        let (sibling_index, use_right) = if node_index == 0 {
            (1, true)
        } else {
            (node_index - 1, false)
        };
        let sibling_id = parent.value_at(sibling_index);

        match node_type {
            NodeType::Leaf => {
                let mut node_guard = self.buffer_pool.fetch_page_write(node_id)?;
                let mut node = BTreeLeafPage::from_data(&node_guard);
                let mut sibling_guard = self.buffer_pool.fetch_page_write(sibling_id)?;
                let mut sibling = BTreeLeafPage::from_data(&sibling_guard);

                if node.size() + sibling.size() <= node.max_size() {
                    // Coalesce: the right node always folds into the left.
                    let (mut left, mut left_guard, mut right, right_guard, right_id) = if use_right
                    {
                        (node, node_guard, sibling, sibling_guard, sibling_id)
                    } else {
                        (sibling, sibling_guard, node, node_guard, node_id)
                    };
                    right.move_all_to(&mut left);

                    let right_index = parent.value_index(right_id);
                    parent.remove(right_index);

                    left_guard.copy_from_slice(left.data());
                    drop(left_guard);
                    drop(right_guard);
                    self.buffer_pool.delete_page(right_id)?;

                    parent_guard.copy_from_slice(parent.data());
                    drop(parent_guard);
                    return self.coalesce_or_redistribute(root, parent_id);
                }

                // Redistribute: shift one entry, refresh the separator.
                if use_right {
                    sibling.move_first_to_end_of(&mut node);
                    parent.set_key_at(sibling_index, sibling.key_at(0));
                } else {
                    sibling.move_last_to_front_of(&mut node);
                    parent.set_key_at(node_index, node.key_at(0));
                }
                node_guard.copy_from_slice(node.data());
                sibling_guard.copy_from_slice(sibling.data());
                parent_guard.copy_from_slice(parent.data());
                Ok(())
            }
            NodeType::Internal => {
                let mut node_guard = self.buffer_pool.fetch_page_write(node_id)?;
                let mut node = BTreeInternalPage::from_data(&node_guard);
                let mut sibling_guard = self.buffer_pool.fetch_page_write(sibling_id)?;
                let mut sibling = BTreeInternalPage::from_data(&sibling_guard);

                if node.size() + sibling.size() <= node.max_size() {
                    let (mut left, mut left_guard, mut right, right_guard, left_id, right_id) =
                        if use_right {
                            (node, node_guard, sibling, sibling_guard, node_id, sibling_id)
                        } else {
                            (sibling, sibling_guard, node, node_guard, sibling_id, node_id)
                        };

                    // The parent separator drops down to caption the first
                    // moved child.
                    let right_index = parent.value_index(right_id);
                    let middle_key = parent.key_at(right_index).to_vec();
                    let moved = right.move_all_to(&mut left, &middle_key);
                    parent.remove(right_index);

                    left_guard.copy_from_slice(left.data());
                    drop(left_guard);
                    drop(right_guard);

                    for child in moved {
                        self.set_parent(child, Some(left_id))?;
                    }
                    self.buffer_pool.delete_page(right_id)?;

                    parent_guard.copy_from_slice(parent.data());
                    drop(parent_guard);
                    return self.coalesce_or_redistribute(root, parent_id);
                }

                // Redistribute one child through the parent separator.
                let moved_child;
                if use_right {
                    let middle_key = parent.key_at(sibling_index).to_vec();
                    let new_separator = sibling.key_at(1).to_vec();
                    moved_child = sibling.move_first_to_end_of(&mut node, &middle_key);
                    parent.set_key_at(sibling_index, &new_separator);
                } else {
                    let middle_key = parent.key_at(node_index).to_vec();
                    let (moved_key, child) = sibling.move_last_to_front_of(&mut node, &middle_key);
                    parent.set_key_at(node_index, &moved_key);
                    moved_child = child;
                }
                node_guard.copy_from_slice(node.data());
                sibling_guard.copy_from_slice(sibling.data());
                parent_guard.copy_from_slice(parent.data());
                drop(node_guard);
                drop(sibling_guard);
                drop(parent_guard);

                self.set_parent(moved_child, Some(node_id))
            }
        }
    }

    /// The root internal node is down to one child: that child becomes the
    /// root and the old root page is freed.
    fn adjust_root(&self, root: &mut Option<PageId>, old_root_id: PageId) -> Result<()> {
        let new_root_id = {
            let guard = self.buffer_pool.fetch_page(old_root_id)?;
            BTreeInternalPage::from_data(&guard).value_at(0)
        };

        self.set_parent(new_root_id, None)?;
        *root = Some(new_root_id);
        self.update_root_page_id(*root)?;
        self.buffer_pool.delete_page(old_root_id)?;
        Ok(())
    }

    /// Rewrite a node's parent pointer in place.
    fn set_parent(&self, page_id: PageId, parent: Option<PageId>) -> Result<()> {
        let mut guard = self.buffer_pool.fetch_page_write(page_id)?;
        let mut header = NodeHeader::new();
        header.data.copy_from_slice(&guard[..NODE_HEADER_SIZE]);
        header.set_parent_page_id(parent);
        guard[..NODE_HEADER_SIZE].copy_from_slice(&header.data);
        Ok(())
    }

    /// Persist the root page id under the index name, inserting the header
    /// record on first use and updating it afterwards.
    fn update_root_page_id(&self, root: Option<PageId>) -> Result<()> {
        let mut guard = self.buffer_pool.fetch_page_write(HEADER_PAGE_ID)?;
        let mut header = HeaderPage::from_data(&guard);
        let result = if header.get_record(&self.index_name).is_some() {
            header.update_record(&self.index_name, root)
        } else {
            header.insert_record(&self.index_name, root)
        };
        result.map_err(|e| anyhow::anyhow!("{}: {}", self.index_name, e))?;
        guard.copy_from_slice(header.data());
        Ok(())
    }

    /// Walk the whole tree and check the structural invariants: separator
    /// bounds, fill factors, parent links, uniform depth, and the leaf
    /// chain. Intended for tests and debugging; errors describe the first
    /// violation found.
    pub fn verify_integrity(&self) -> Result<()> {
        let root = self.root.lock();
        let Some(root_id) = *root else {
            return Ok(());
        };

        let mut leaves = Vec::new();
        self.verify_node(root_id, None, None, None, &mut leaves)?;

        // The sibling chain must visit exactly the in-order leaves.
        let mut chained = Vec::new();
        let mut current = Some(self.find_leaf(root_id, &[], true)?);
        while let Some(page_id) = current {
            chained.push(page_id);
            let guard = self.buffer_pool.fetch_page(page_id)?;
            current = BTreeLeafPage::from_data(&guard).next_page_id();
        }
        if chained != leaves {
            bail!(
                "leaf chain {:?} does not match in-order leaves {:?}",
                chained,
                leaves
            );
        }
        Ok(())
    }

    /// Check one node and its subtree. `low`/`high` bound every key in the
    /// subtree as `low <= key < high`. Returns the subtree height.
    fn verify_node(
        &self,
        page_id: PageId,
        expected_parent: Option<PageId>,
        low: Option<&[u8]>,
        high: Option<&[u8]>,
        leaves: &mut Vec<PageId>,
    ) -> Result<u32> {
        let guard = self.buffer_pool.fetch_page(page_id)?;
        let Some(node_type) = node_type_of(&guard) else {
            bail!("page {} is not a b+tree node", page_id);
        };

        let in_bounds = |key: &[u8]| -> bool {
            if let Some(low) = low {
                if self.comparator.compare(key, low) == Ordering::Less {
                    return false;
                }
            }
            if let Some(high) = high {
                if self.comparator.compare(key, high) != Ordering::Less {
                    return false;
                }
            }
            true
        };

        match node_type {
            NodeType::Leaf => {
                let leaf = BTreeLeafPage::from_data(&guard);
                drop(guard);
                if leaf.parent_page_id() != expected_parent {
                    bail!(
                        "leaf {}: parent {:?}, expected {:?}",
                        page_id,
                        leaf.parent_page_id(),
                        expected_parent
                    );
                }
                if expected_parent.is_some() && leaf.size() < leaf.min_size() {
                    bail!("leaf {} underfull: {}/{}", page_id, leaf.size(), leaf.max_size());
                }
                if leaf.size() > leaf.max_size() {
                    bail!("leaf {} overfull: {}/{}", page_id, leaf.size(), leaf.max_size());
                }
                for i in 0..leaf.size() as usize {
                    let key = leaf.key_at(i);
                    if !in_bounds(key) {
                        bail!("leaf {}: key {} out of separator bounds", page_id, i);
                    }
                    if i > 0
                        && self.comparator.compare(leaf.key_at(i - 1), key) != Ordering::Less
                    {
                        bail!("leaf {}: keys not strictly increasing at {}", page_id, i);
                    }
                }
                leaves.push(page_id);
                Ok(1)
            }
            NodeType::Internal => {
                let node = BTreeInternalPage::from_data(&guard);
                drop(guard);
                if node.parent_page_id() != expected_parent {
                    bail!(
                        "internal {}: parent {:?}, expected {:?}",
                        page_id,
                        node.parent_page_id(),
                        expected_parent
                    );
                }
                let size = node.size();
                if expected_parent.is_none() && size < 2 {
                    bail!("root internal {} has {} children", page_id, size);
                }
                if expected_parent.is_some() && size < node.min_size() {
                    bail!("internal {} underfull: {}/{}", page_id, size, node.max_size());
                }
                if size > node.max_size() {
                    bail!("internal {} overfull: {}/{}", page_id, size, node.max_size());
                }
                for i in 1..size as usize {
                    let key = node.key_at(i);
                    if !in_bounds(key) {
                        bail!("internal {}: separator {} out of bounds", page_id, i);
                    }
                    if i > 1
                        && self.comparator.compare(node.key_at(i - 1), key) != Ordering::Less
                    {
                        bail!(
                            "internal {}: separators not strictly increasing at {}",
                            page_id,
                            i
                        );
                    }
                }

                let mut height = None;
                for i in 0..size as usize {
                    let child_low = if i == 0 { low } else { Some(node.key_at(i)) };
                    let child_high = if i + 1 < size as usize {
                        Some(node.key_at(i + 1))
                    } else {
                        high
                    };
                    let child_height = self.verify_node(
                        node.value_at(i),
                        Some(page_id),
                        child_low,
                        child_high,
                        leaves,
                    )?;
                    match height {
                        None => height = Some(child_height),
                        Some(h) if h != child_height => {
                            bail!("internal {}: uneven child depths", page_id)
                        }
                        _ => {}
                    }
                }
                Ok(height.unwrap_or(0) + 1)
            }
        }
    }

    /// Level-order rendering of the tree structure, for debugging.
    pub fn to_debug_string(&self) -> Result<String> {
        use std::fmt::Write;

        let root = self.root.lock();
        let Some(root_id) = *root else {
            return Ok("(empty)".to_string());
        };

        let mut out = String::new();
        let mut level = vec![root_id];
        while !level.is_empty() {
            let mut next_level = Vec::new();
            for page_id in &level {
                let guard = self.buffer_pool.fetch_page(*page_id)?;
                match node_type_of(&guard) {
                    Some(NodeType::Internal) => {
                        let node = BTreeInternalPage::from_data(&guard);
                        write!(out, "{} ", node).ok();
                        for i in 0..node.size() as usize {
                            next_level.push(node.value_at(i));
                        }
                    }
                    Some(NodeType::Leaf) => {
                        let leaf = BTreeLeafPage::from_data(&guard);
                        write!(out, "{} ", leaf).ok();
                    }
                    None => bail!("page {} is not a b+tree node", page_id),
                }
            }
            out.push('\n');
            level = next_level;
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::key::IntComparator;
    use super::*;
    use crate::storage::buffer::lru::LruReplacer;
    use crate::storage::PageManager;
    use tempfile::TempDir;

    const KEY_SIZE: usize = 8;

    fn test_tree(leaf_max: u16, internal_max: u16) -> (TempDir, BPlusTree<IntComparator>) {
        let dir = TempDir::new().unwrap();
        let file_path = dir.path().join("index.db");
        let page_manager = PageManager::create(&file_path).unwrap();
        let buffer_pool =
            BufferPoolManager::new(page_manager, Box::new(LruReplacer::new()), 64);
        let tree = BPlusTree::with_max_sizes(
            "test_index",
            buffer_pool,
            IntComparator,
            KEY_SIZE,
            leaf_max,
            internal_max,
        )
        .unwrap();
        (dir, tree)
    }

    fn key(k: i64) -> Vec<u8> {
        encode_i64(k, KEY_SIZE)
    }

    fn insert(tree: &BPlusTree<IntComparator>, k: i64) -> bool {
        tree.insert(&key(k), RecordId::from_key(k)).unwrap()
    }

    fn collect(tree: &BPlusTree<IntComparator>) -> Vec<i64> {
        let mut out = Vec::new();
        let mut iter = tree.iter().unwrap();
        while !iter.is_end() {
            let (k, _) = iter.entry().unwrap();
            out.push(i64::from_le_bytes(k.try_into().unwrap()));
            iter.advance().unwrap();
        }
        out
    }

    #[test]
    fn test_empty_tree() {
        let (_dir, tree) = test_tree(4, 4);
        assert!(tree.is_empty());
        assert_eq!(tree.get(&key(1)).unwrap(), None);
        tree.remove(&key(1)).unwrap(); // no-op
        assert!(collect(&tree).is_empty());
    }

    #[test]
    fn test_insert_and_get() {
        let (_dir, tree) = test_tree(4, 4);
        assert!(insert(&tree, 3));
        assert!(insert(&tree, 1));
        assert!(insert(&tree, 2));

        assert_eq!(tree.get(&key(1)).unwrap(), Some(RecordId::from_key(1)));
        assert_eq!(tree.get(&key(2)).unwrap(), Some(RecordId::from_key(2)));
        assert_eq!(tree.get(&key(9)).unwrap(), None);
        tree.verify_integrity().unwrap();
    }

    #[test]
    fn test_duplicate_insert_rejected() {
        let (_dir, tree) = test_tree(4, 4);
        assert!(insert(&tree, 7));
        assert!(!insert(&tree, 7));
        assert_eq!(collect(&tree), vec![7]);
    }

    #[test]
    fn test_mis_sized_key_rejected() {
        let (_dir, tree) = test_tree(4, 4);
        assert!(tree.insert(&[1, 2, 3], RecordId::from_key(1)).is_err());
        assert!(tree.get(&[1, 2, 3]).is_err());
    }

    #[test]
    fn test_root_split() {
        let (_dir, tree) = test_tree(4, 4);
        for k in 1..=5 {
            assert!(insert(&tree, k));
        }
        assert_eq!(collect(&tree), vec![1, 2, 3, 4, 5]);
        tree.verify_integrity().unwrap();

        for k in 1..=5 {
            assert_eq!(tree.get(&key(k)).unwrap(), Some(RecordId::from_key(k)));
        }
    }

    #[test]
    fn test_many_inserts_sequential() {
        let (_dir, tree) = test_tree(4, 4);
        for k in 1..=100 {
            assert!(insert(&tree, k));
            tree.verify_integrity().unwrap();
        }
        assert_eq!(collect(&tree), (1..=100).collect::<Vec<_>>());
    }

    #[test]
    fn test_many_inserts_reverse() {
        let (_dir, tree) = test_tree(4, 4);
        for k in (1..=100).rev() {
            assert!(insert(&tree, k));
            tree.verify_integrity().unwrap();
        }
        assert_eq!(collect(&tree), (1..=100).collect::<Vec<_>>());
    }

    #[test]
    fn test_remove_until_empty() {
        let (_dir, tree) = test_tree(4, 4);
        for k in 1..=50 {
            insert(&tree, k);
        }
        for k in 1..=50 {
            tree.remove(&key(k)).unwrap();
            tree.verify_integrity().unwrap();
        }
        assert!(tree.is_empty());
        assert_eq!(tree.root_page_id(), None);
    }

    #[test]
    fn test_reinsert_after_emptying() {
        let (_dir, tree) = test_tree(4, 4);
        insert(&tree, 42);
        tree.remove(&key(42)).unwrap();
        assert!(tree.is_empty());

        assert!(insert(&tree, 42));
        assert_eq!(collect(&tree), vec![42]);
        tree.verify_integrity().unwrap();
    }

    #[test]
    fn test_iter_from_mid_key() {
        let (_dir, tree) = test_tree(4, 4);
        for k in (2..=20).step_by(2) {
            insert(&tree, k);
        }

        // 7 is absent: the cursor lands on the next larger key.
        let mut iter = tree.iter_from(&key(7)).unwrap();
        let mut seen = Vec::new();
        while !iter.is_end() {
            let (k, _) = iter.entry().unwrap();
            seen.push(i64::from_le_bytes(k.try_into().unwrap()));
            iter.advance().unwrap();
        }
        assert_eq!(seen, vec![8, 10, 12, 14, 16, 18, 20]);
    }

    #[test]
    fn test_reopen_finds_root() {
        let dir = TempDir::new().unwrap();
        let file_path = dir.path().join("index.db");

        {
            let page_manager = PageManager::create(&file_path).unwrap();
            let buffer_pool =
                BufferPoolManager::new(page_manager, Box::new(LruReplacer::new()), 64);
            let tree = BPlusTree::with_max_sizes(
                "orders_pk",
                buffer_pool.clone(),
                IntComparator,
                KEY_SIZE,
                4,
                4,
            )
            .unwrap();
            for k in 1..=10 {
                tree.insert(&encode_i64(k, KEY_SIZE), RecordId::from_key(k))
                    .unwrap();
            }
            buffer_pool.flush_all().unwrap();
        }

        {
            let page_manager = PageManager::open(&file_path).unwrap();
            let buffer_pool =
                BufferPoolManager::new(page_manager, Box::new(LruReplacer::new()), 64);
            let tree = BPlusTree::with_max_sizes(
                "orders_pk",
                buffer_pool,
                IntComparator,
                KEY_SIZE,
                4,
                4,
            )
            .unwrap();
            assert!(!tree.is_empty());
            for k in 1..=10 {
                assert_eq!(
                    tree.get(&encode_i64(k, KEY_SIZE)).unwrap(),
                    Some(RecordId::from_key(k))
                );
            }
            tree.verify_integrity().unwrap();
        }
    }

    #[test]
    fn test_debug_string_smoke() {
        let (_dir, tree) = test_tree(4, 4);
        assert_eq!(tree.to_debug_string().unwrap(), "(empty)");
        for k in 1..=5 {
            insert(&tree, k);
        }
        let rendered = tree.to_debug_string().unwrap();
        assert!(rendered.contains("Internal"));
        assert!(rendered.contains("Leaf"));
    }
}
