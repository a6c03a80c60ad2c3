use bytemuck::{Pod, Zeroable};

/// Host supplied document identifier. The engine only stores, compares and
/// returns it.
#[repr(transparent)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RecordLocator(pub u64);

unsafe impl Zeroable for RecordLocator {}
unsafe impl Pod for RecordLocator {}

impl From<u64> for RecordLocator {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

/// Dense segment-local doc ids mapped to record locators.
#[derive(Debug, Default, Clone)]
pub struct DocMap {
    locators: Vec<RecordLocator>,
}

impl DocMap {
    pub fn with_capacity(capacity_hint: usize) -> Self {
        Self {
            locators: Vec::with_capacity(capacity_hint),
        }
    }

    pub fn from_locators(locators: Vec<RecordLocator>) -> Self {
        Self { locators }
    }

    pub fn append(&mut self, locator: RecordLocator) -> u32 {
        let id = self.locators.len() as u32;
        self.locators.push(locator);
        id
    }

    /// Panics on an unknown id: every id handed out by a segment must be mapped.
    #[inline]
    pub fn locator_of(&self, local_id: u32) -> RecordLocator {
        match self.locators.get(local_id as usize) {
            Some(locator) => *locator,
            None => panic!(
                "doc id {local_id} out of range for a document map of {} entries",
                self.locators.len()
            ),
        }
    }

    /// Appends every document of `old_map` to `new_map` in id order and returns
    /// the old id -> new id array. Locators are not deduplicated, so one source
    /// never maps onto another source's documents.
    pub fn build_remap(old_map: &DocMap, new_map: &mut DocMap) -> Vec<u32> {
        new_map.locators.reserve(old_map.len());
        old_map
            .locators
            .iter()
            .map(|&locator| new_map.append(locator))
            .collect()
    }

    pub fn get(&self, local_id: u32) -> Option<RecordLocator> {
        self.locators.get(local_id as usize).copied()
    }

    pub fn len(&self) -> usize {
        self.locators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locators.is_empty()
    }

    pub fn locators(&self) -> &[RecordLocator] {
        &self.locators
    }

    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.locators)
    }
}
