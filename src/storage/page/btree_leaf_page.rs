use crate::access::btree::key::KeyComparator;
use crate::access::rid::RecordId;
use crate::storage::page::btree_page::{NodeHeader, LEAF_NODE_TYPE, NODE_HEADER_SIZE};
use crate::storage::page::{Page, PageId};
use crate::storage::PAGE_SIZE;
use std::cmp::Ordering;

// Common node header + next_page_id (4 bytes) + 4 reserved bytes.
pub const LEAF_HEADER_SIZE: usize = NODE_HEADER_SIZE + 8;

/// Leaf node: a dense array of (key, record id) pairs in ascending key
/// order, plus a forward pointer to the right sibling. Entries are
/// `key_size + 6` bytes each and start at `LEAF_HEADER_SIZE`.
pub struct BTreeLeafPage {
    data: [u8; PAGE_SIZE],
}

impl Page for BTreeLeafPage {
    fn page_id(&self) -> PageId {
        self.header().page_id()
    }

    fn data(&self) -> &[u8; PAGE_SIZE] {
        &self.data
    }

    fn data_mut(&mut self) -> &mut [u8; PAGE_SIZE] {
        &mut self.data
    }
}

impl BTreeLeafPage {
    /// Initialize an empty leaf. `max_size` defaults to the page-derived
    /// capacity; tests pass a small override.
    pub fn new(
        page_id: PageId,
        parent_page_id: Option<PageId>,
        key_size: usize,
        max_size: Option<u16>,
    ) -> Self {
        let entry_size = key_size + RecordId::SIZE;
        let derived = ((PAGE_SIZE - LEAF_HEADER_SIZE) / entry_size) as u16;

        let mut page = Self {
            data: [0; PAGE_SIZE],
        };
        let mut header = NodeHeader::new();
        header.set_page_type(LEAF_NODE_TYPE);
        header.set_page_id(page_id);
        header.set_parent_page_id(parent_page_id);
        header.set_size(0);
        header.set_max_size(max_size.unwrap_or(derived));
        header.set_key_size(key_size as u16);
        page.write_header(&header);
        page.set_next_page_id(None);
        page
    }

    pub fn from_data(data: &[u8; PAGE_SIZE]) -> Self {
        debug_assert_eq!(data[0], LEAF_NODE_TYPE);
        Self { data: *data }
    }

    fn header(&self) -> NodeHeader {
        let mut header = NodeHeader::new();
        header.data.copy_from_slice(&self.data[..NODE_HEADER_SIZE]);
        header
    }

    fn write_header(&mut self, header: &NodeHeader) {
        self.data[..NODE_HEADER_SIZE].copy_from_slice(&header.data);
    }

    pub fn size(&self) -> u16 {
        self.header().size()
    }

    fn set_size(&mut self, val: u16) {
        let mut header = self.header();
        header.set_size(val);
        self.write_header(&header);
    }

    pub fn max_size(&self) -> u16 {
        self.header().max_size()
    }

    /// Minimum entries for a non-root leaf.
    pub fn min_size(&self) -> u16 {
        (self.max_size() + 1) / 2
    }

    pub fn key_size(&self) -> usize {
        self.header().key_size() as usize
    }

    pub fn parent_page_id(&self) -> Option<PageId> {
        self.header().parent_page_id()
    }

    pub fn set_parent_page_id(&mut self, parent: Option<PageId>) {
        let mut header = self.header();
        header.set_parent_page_id(parent);
        self.write_header(&header);
    }

    pub fn next_page_id(&self) -> Option<PageId> {
        let off = NODE_HEADER_SIZE;
        let id = u32::from_le_bytes([
            self.data[off],
            self.data[off + 1],
            self.data[off + 2],
            self.data[off + 3],
        ]);
        if id == 0 { None } else { Some(PageId(id)) }
    }

    pub fn set_next_page_id(&mut self, next: Option<PageId>) {
        let raw = next.map(|p| p.0).unwrap_or(0);
        self.data[NODE_HEADER_SIZE..NODE_HEADER_SIZE + 4].copy_from_slice(&raw.to_le_bytes());
    }

    fn entry_size(&self) -> usize {
        self.key_size() + RecordId::SIZE
    }

    fn entry_offset(&self, index: usize) -> usize {
        LEAF_HEADER_SIZE + index * self.entry_size()
    }

    pub fn key_at(&self, index: usize) -> &[u8] {
        debug_assert!(index < self.size() as usize);
        let off = self.entry_offset(index);
        &self.data[off..off + self.key_size()]
    }

    pub fn record_id_at(&self, index: usize) -> RecordId {
        debug_assert!(index < self.size() as usize);
        let off = self.entry_offset(index) + self.key_size();
        RecordId::from_bytes(&self.data[off..off + RecordId::SIZE])
    }

    fn write_entry(&mut self, index: usize, key: &[u8], rid: RecordId) {
        let off = self.entry_offset(index);
        let key_size = self.key_size();
        self.data[off..off + key_size].copy_from_slice(key);
        self.data[off + key_size..off + key_size + RecordId::SIZE]
            .copy_from_slice(&rid.to_bytes());
    }

    /// Exact-match point lookup by binary search.
    pub fn lookup<C: KeyComparator>(&self, key: &[u8], cmp: &C) -> Option<RecordId> {
        let size = self.size() as usize;
        if size == 0 {
            return None;
        }
        if cmp.compare(key, self.key_at(0)) == Ordering::Less
            || cmp.compare(key, self.key_at(size - 1)) == Ordering::Greater
        {
            return None;
        }

        let (mut low, mut high) = (0usize, size - 1);
        while low <= high {
            let mid = low + (high - low) / 2;
            match cmp.compare(key, self.key_at(mid)) {
                Ordering::Greater => low = mid + 1,
                Ordering::Less => {
                    if mid == 0 {
                        break;
                    }
                    high = mid - 1;
                }
                Ordering::Equal => return Some(self.record_id_at(mid)),
            }
        }
        None
    }

    /// Smallest index whose key is >= `key`, or `size` if there is none.
    /// Positions iterators.
    pub fn key_index<C: KeyComparator>(&self, key: &[u8], cmp: &C) -> usize {
        let size = self.size() as usize;
        for i in 0..size {
            if cmp.compare(key, self.key_at(i)) != Ordering::Greater {
                return i;
            }
        }
        size
    }

    /// Ordered insert. The caller guarantees the key is absent and the
    /// leaf is not full. Returns the new size.
    pub fn insert<C: KeyComparator>(&mut self, key: &[u8], rid: RecordId, cmp: &C) -> u16 {
        let size = self.size() as usize;
        debug_assert!(size < self.max_size() as usize);

        let index = self.key_index(key, cmp);
        debug_assert!(index == size || cmp.compare(key, self.key_at(index)) == Ordering::Less);

        if index < size {
            let src = self.entry_offset(index);
            let dst = self.entry_offset(index + 1);
            let len = (size - index) * self.entry_size();
            self.data.copy_within(src..src + len, dst);
        }
        self.write_entry(index, key, rid);
        self.set_size(size as u16 + 1);
        self.size()
    }

    /// Remove `key` if present, keeping the array dense. Returns the size
    /// after the call (unchanged when the key is absent).
    pub fn remove<C: KeyComparator>(&mut self, key: &[u8], cmp: &C) -> u16 {
        let size = self.size() as usize;
        let index = self.key_index(key, cmp);
        if index == size || cmp.compare(key, self.key_at(index)) != Ordering::Equal {
            return self.size();
        }

        if index + 1 < size {
            let src = self.entry_offset(index + 1);
            let dst = self.entry_offset(index);
            let len = (size - index - 1) * self.entry_size();
            self.data.copy_within(src..src + len, dst);
        }
        self.set_size(size as u16 - 1);
        self.size()
    }

    /// Relocate the upper half of the entries to an empty right sibling.
    pub fn move_half_to(&mut self, recipient: &mut Self) {
        debug_assert_eq!(recipient.size(), 0);
        let size = self.size() as usize;
        let moved = size / 2;
        let start = size - moved;

        let src = self.entry_offset(start);
        let len = moved * self.entry_size();
        recipient.data[LEAF_HEADER_SIZE..LEAF_HEADER_SIZE + len]
            .copy_from_slice(&self.data[src..src + len]);
        recipient.set_size(moved as u16);
        self.set_size(start as u16);
    }

    /// Append every entry to `recipient` (the left sibling) and splice this
    /// leaf out of the chain.
    pub fn move_all_to(&mut self, recipient: &mut Self) {
        let size = self.size() as usize;
        let dst_start = recipient.size() as usize;
        debug_assert!(dst_start + size <= recipient.max_size() as usize);

        let src = self.entry_offset(0);
        let len = size * self.entry_size();
        let dst = recipient.entry_offset(dst_start);
        recipient.data[dst..dst + len].copy_from_slice(&self.data[src..src + len]);
        recipient.set_size((dst_start + size) as u16);
        recipient.set_next_page_id(self.next_page_id());
        self.set_size(0);
    }

    /// Pop the leftmost entry and append it to `recipient` (the left
    /// sibling). The caller refreshes the parent separator for this page.
    pub fn move_first_to_end_of(&mut self, recipient: &mut Self) {
        let size = self.size() as usize;
        debug_assert!(size > 0);
        let key = self.key_at(0).to_vec();
        let rid = self.record_id_at(0);

        let src = self.entry_offset(1);
        let dst = self.entry_offset(0);
        let len = (size - 1) * self.entry_size();
        self.data.copy_within(src..src + len, dst);
        self.set_size(size as u16 - 1);

        let dst_index = recipient.size() as usize;
        recipient.write_entry(dst_index, &key, rid);
        recipient.set_size(dst_index as u16 + 1);
    }

    /// Pop the rightmost entry and prepend it to `recipient` (the right
    /// sibling). The caller refreshes the parent separator for `recipient`.
    pub fn move_last_to_front_of(&mut self, recipient: &mut Self) {
        let size = self.size() as usize;
        debug_assert!(size > 0);
        let key = self.key_at(size - 1).to_vec();
        let rid = self.record_id_at(size - 1);
        self.set_size(size as u16 - 1);

        let recipient_size = recipient.size() as usize;
        if recipient_size > 0 {
            let src = recipient.entry_offset(0);
            let dst = recipient.entry_offset(1);
            let len = recipient_size * recipient.entry_size();
            recipient.data.copy_within(src..src + len, dst);
        }
        recipient.write_entry(0, &key, rid);
        recipient.set_size(recipient_size as u16 + 1);
    }
}

impl std::fmt::Display for BTreeLeafPage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Leaf[{} parent={:?} next={:?} size={}/{}]",
            self.page_id(),
            self.parent_page_id(),
            self.next_page_id(),
            self.size(),
            self.max_size()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::btree::key::{encode_i64, IntComparator};

    const KEY_SIZE: usize = 8;

    fn leaf(page_id: u32, max_size: u16) -> BTreeLeafPage {
        BTreeLeafPage::new(PageId(page_id), None, KEY_SIZE, Some(max_size))
    }

    fn insert_keys(page: &mut BTreeLeafPage, keys: &[i64]) {
        for &k in keys {
            page.insert(&encode_i64(k, KEY_SIZE), RecordId::from_key(k), &IntComparator);
        }
    }

    fn keys_of(page: &BTreeLeafPage) -> Vec<i64> {
        (0..page.size() as usize)
            .map(|i| i64::from_le_bytes(page.key_at(i).try_into().unwrap()))
            .collect()
    }

    #[test]
    fn test_insert_keeps_order() {
        let mut page = leaf(1, 10);
        insert_keys(&mut page, &[5, 1, 9, 3, 7]);
        assert_eq!(keys_of(&page), vec![1, 3, 5, 7, 9]);
    }

    #[test]
    fn test_lookup() {
        let mut page = leaf(1, 10);
        insert_keys(&mut page, &[2, 4, 6]);
        let cmp = IntComparator;

        assert_eq!(
            page.lookup(&encode_i64(4, KEY_SIZE), &cmp),
            Some(RecordId::from_key(4))
        );
        assert_eq!(page.lookup(&encode_i64(3, KEY_SIZE), &cmp), None);
        assert_eq!(page.lookup(&encode_i64(0, KEY_SIZE), &cmp), None);
        assert_eq!(page.lookup(&encode_i64(9, KEY_SIZE), &cmp), None);
    }

    #[test]
    fn test_key_index() {
        let mut page = leaf(1, 10);
        insert_keys(&mut page, &[10, 20, 30]);
        let cmp = IntComparator;

        assert_eq!(page.key_index(&encode_i64(5, KEY_SIZE), &cmp), 0);
        assert_eq!(page.key_index(&encode_i64(20, KEY_SIZE), &cmp), 1);
        assert_eq!(page.key_index(&encode_i64(25, KEY_SIZE), &cmp), 2);
        assert_eq!(page.key_index(&encode_i64(99, KEY_SIZE), &cmp), 3);
    }

    #[test]
    fn test_remove() {
        let mut page = leaf(1, 10);
        insert_keys(&mut page, &[1, 2, 3]);
        let cmp = IntComparator;

        assert_eq!(page.remove(&encode_i64(2, KEY_SIZE), &cmp), 2);
        assert_eq!(keys_of(&page), vec![1, 3]);

        // Absent key leaves the page untouched.
        assert_eq!(page.remove(&encode_i64(7, KEY_SIZE), &cmp), 2);
        assert_eq!(keys_of(&page), vec![1, 3]);
    }

    #[test]
    fn test_move_half() {
        let mut left = leaf(1, 10);
        let mut right = leaf(2, 10);
        insert_keys(&mut left, &[1, 2, 3, 4, 5]);

        left.move_half_to(&mut right);
        assert_eq!(keys_of(&left), vec![1, 2, 3]);
        assert_eq!(keys_of(&right), vec![4, 5]);
    }

    #[test]
    fn test_move_all_splices_chain() {
        let mut left = leaf(1, 10);
        let mut right = leaf(2, 10);
        insert_keys(&mut left, &[1, 2]);
        insert_keys(&mut right, &[3, 4]);
        left.set_next_page_id(Some(PageId(2)));
        right.set_next_page_id(Some(PageId(9)));

        right.move_all_to(&mut left);
        assert_eq!(keys_of(&left), vec![1, 2, 3, 4]);
        assert_eq!(left.next_page_id(), Some(PageId(9)));
        assert_eq!(right.size(), 0);
    }

    #[test]
    fn test_rotate_first_to_left() {
        let mut left = leaf(1, 10);
        let mut right = leaf(2, 10);
        insert_keys(&mut left, &[1]);
        insert_keys(&mut right, &[5, 6, 7]);

        right.move_first_to_end_of(&mut left);
        assert_eq!(keys_of(&left), vec![1, 5]);
        assert_eq!(keys_of(&right), vec![6, 7]);
    }

    #[test]
    fn test_rotate_last_to_right() {
        let mut left = leaf(1, 10);
        let mut right = leaf(2, 10);
        insert_keys(&mut left, &[1, 2, 3]);
        insert_keys(&mut right, &[9]);

        left.move_last_to_front_of(&mut right);
        assert_eq!(keys_of(&left), vec![1, 2]);
        assert_eq!(keys_of(&right), vec![3, 9]);
    }

    #[test]
    fn test_from_data_roundtrip() {
        let mut page = leaf(7, 10);
        insert_keys(&mut page, &[11, 22]);
        page.set_next_page_id(Some(PageId(8)));

        let copy = BTreeLeafPage::from_data(page.data());
        assert_eq!(copy.page_id(), PageId(7));
        assert_eq!(copy.next_page_id(), Some(PageId(8)));
        assert_eq!(keys_of(&copy), vec![11, 22]);
    }

    #[test]
    fn test_derived_capacity() {
        let page = BTreeLeafPage::new(PageId(1), None, KEY_SIZE, None);
        let expected = (PAGE_SIZE - LEAF_HEADER_SIZE) / (KEY_SIZE + RecordId::SIZE);
        assert_eq!(page.max_size() as usize, expected);
    }
}
