// SPDX-License-Identifier: CEPL-1.0
use bitflags::bitflags;

bitflags! {
    #[repr(transparent)]
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct ShaderStages: u32 {
        const VERTEX = 1 << 0;
        const FRAGMENT = 1 << 1;
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BindingKind {
    UniformBuffer,
    CombinedImageSampler,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Binding {
    pub index: u32,
    pub kind: BindingKind,
    pub stages: ShaderStages,
    /// Array length; sampler bindings hold the whole texture table.
    pub count: u32,
}

/// Ordered list of descriptor bindings for the single set layout. Index is
/// registration order.
#[derive(Clone, Debug)]
pub struct BindingTable {
    bindings: Vec<Binding>,
    max_textures: u32,
}

impl BindingTable {
    pub fn new(max_textures: u32) -> Self {
        Self {
            bindings: Vec::new(),
            max_textures,
        }
    }

    pub fn register(&mut self, kind: BindingKind, stages: ShaderStages) -> u32 {
        let index = self.bindings.len() as u32;
        let count = match kind {
            BindingKind::CombinedImageSampler => self.max_textures,
            BindingKind::UniformBuffer => 1,
        };
        self.bindings.push(Binding {
            index,
            kind,
            stages,
            count,
        });
        index
    }

    pub fn bindings(&self) -> &[Binding] {
        &self.bindings
    }

    pub fn get(&self, index: u32) -> Option<&Binding> {
        self.bindings.get(index as usize)
    }

    /// First binding of `kind`, if any was registered.
    pub fn find(&self, kind: BindingKind) -> Option<&Binding> {
        self.bindings.iter().find(|b| b.kind == kind)
    }

    /// Pool requirements for `sets` descriptor sets: one entry per binding,
    /// its array length multiplied by the set count.
    pub fn pool_sizes(&self, sets: u32) -> Vec<(BindingKind, u32)> {
        self.bindings
            .iter()
            .map(|b| (b.kind, b.count * sets))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn indices_follow_registration_order() {
        let mut table = BindingTable::new(16);
        let ubo = table.register(BindingKind::UniformBuffer, ShaderStages::VERTEX);
        let tex = table.register(BindingKind::CombinedImageSampler, ShaderStages::FRAGMENT);
        assert_eq!((ubo, tex), (0, 1));
        assert_eq!(table.get(0).map(|b| b.count), Some(1));
        assert_eq!(table.get(1).map(|b| b.count), Some(16));
    }

    #[test]
    fn pool_scales_with_set_count() {
        let mut table = BindingTable::new(8);
        table.register(BindingKind::UniformBuffer, ShaderStages::VERTEX);
        table.register(BindingKind::CombinedImageSampler, ShaderStages::FRAGMENT);
        assert_eq!(
            table.pool_sizes(2),
            vec![
                (BindingKind::UniformBuffer, 2),
                (BindingKind::CombinedImageSampler, 16),
            ]
        );
    }

    #[test]
    fn find_returns_first_of_kind() {
        let mut table = BindingTable::new(4);
        table.register(BindingKind::CombinedImageSampler, ShaderStages::FRAGMENT);
        table.register(BindingKind::UniformBuffer, ShaderStages::VERTEX);
        assert_eq!(table.find(BindingKind::UniformBuffer).map(|b| b.index), Some(1));
    }
}
