//! Read-only facade over a module's output.

use std::sync::Arc;

use crate::module::{Module, Node};

/// Consumer handle bound to one [`Module`]. It exposes the four read modes
/// and typed helpers, and none of the module's configuration.
///
/// Every typed read is all-or-nothing: it returns `None` and consumes nothing
/// when too few bytes are buffered.
#[derive(Debug, Clone)]
pub struct DataSource {
    module: Arc<Module>,
}

impl DataSource {
    pub fn new(module: &Arc<Module>) -> Self {
        Self {
            module: Arc::clone(module),
        }
    }

    pub fn bytes_available(&self) -> usize {
        self.module.bytes_in_buffer()
    }

    pub fn read_exactly(&self, count: usize) -> Vec<u8> {
        self.module.read_exactly(count)
    }

    pub fn read_at_least(&self, count: usize) -> Vec<u8> {
        self.module.read_at_least(count)
    }

    pub fn read_up_to(&self, count: usize) -> Vec<u8> {
        self.module.read_up_to(count)
    }

    pub fn read_all(&self) -> Vec<u8> {
        self.module.read_all()
    }

    /// Fill `dest` completely. Returns `false` (leaving `dest` untouched) when
    /// the module holds fewer than `dest.len()` bytes.
    pub fn fill(&self, dest: &mut [u8]) -> bool {
        if dest.is_empty() {
            return true;
        }
        let data = self.module.read_exactly(dest.len());
        if data.len() != dest.len() {
            return false;
        }
        dest.copy_from_slice(&data);
        true
    }

    fn array<const N: usize>(&self) -> Option<[u8; N]> {
        let mut bytes = [0u8; N];
        self.fill(&mut bytes).then_some(bytes)
    }

    pub fn next_u32(&self) -> Option<u32> {
        self.array().map(u32::from_le_bytes)
    }

    pub fn next_u64(&self) -> Option<u64> {
        self.array().map(u64::from_le_bytes)
    }

    /// Uniform in `[0, 1)`, built from the top 53 bits of a `u64`.
    pub fn next_f64(&self) -> Option<f64> {
        self.next_u64()
            .map(|v| (v >> 11) as f64 * (1.0 / (1u64 << 53) as f64))
    }

    pub fn next_bool(&self) -> Option<bool> {
        self.array::<1>().map(|[b]| b & 1 == 1)
    }
}

impl Node for DataSource {
    fn module(&self) -> &Arc<Module> {
        &self.module
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reads_delegate_to_module() {
        let module = Module::passive("facade");
        let source = DataSource::new(&module);
        module.add_data(&[1, 2, 3, 4]);
        assert_eq!(source.bytes_available(), 4);
        assert!(source.read_exactly(5).is_empty());
        assert_eq!(source.read_up_to(3), vec![1, 2, 3]);
        assert_eq!(source.read_all(), vec![4]);
        module.dispose();
    }

    #[test]
    fn test_typed_reads() {
        let module = Module::passive("typed");
        let source = module.data_source();
        module.add_data(&[0x78, 0x56, 0x34, 0x12]);
        assert_eq!(source.next_u32(), Some(0x1234_5678));
        assert_eq!(source.next_u32(), None);

        module.add_data(&[0xFF; 8]);
        let f = source.next_f64().unwrap();
        assert!((0.0..1.0).contains(&f));

        module.add_data(&[0x03]);
        assert_eq!(source.next_bool(), Some(true));
        assert_eq!(source.next_bool(), None);
        module.dispose();
    }

    #[test]
    fn test_fill_is_all_or_nothing() {
        let module = Module::passive("fill");
        let source = module.data_source();
        module.add_data(&[7; 3]);
        let mut dest = [0u8; 4];
        assert!(!source.fill(&mut dest));
        assert_eq!(dest, [0; 4]);
        assert_eq!(source.bytes_available(), 3);
        module.add_data(&[8]);
        assert!(source.fill(&mut dest));
        assert_eq!(dest, [7, 7, 7, 8]);
        module.dispose();
    }
}
