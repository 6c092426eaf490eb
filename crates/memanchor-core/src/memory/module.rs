/// A module mapped into the target process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleInfo {
    pub name: String,
    pub base: u64,
    pub size: u64,
}

impl ModuleInfo {
    pub fn contains(&self, address: u64) -> bool {
        address >= self.base && address < self.base + self.size
    }
}

/// Address-sorted module ranges for static-address classification.
#[derive(Debug, Clone, Default)]
pub struct ModuleMap {
    modules: Vec<ModuleInfo>,
}

impl ModuleMap {
    pub fn new(mut modules: Vec<ModuleInfo>) -> Self {
        modules.sort_by_key(|m| m.base);
        Self { modules }
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    /// The module containing `address`, if the address is static.
    pub fn find(&self, address: u64) -> Option<&ModuleInfo> {
        let idx = self.modules.partition_point(|m| m.base <= address);
        let module = self.modules.get(idx.checked_sub(1)?)?;
        module.contains(address).then_some(module)
    }

    /// Case-insensitive lookup by module name.
    pub fn by_name(&self, name: &str) -> Option<&ModuleInfo> {
        self.modules
            .iter()
            .find(|m| m.name.eq_ignore_ascii_case(name))
    }

    pub fn iter(&self) -> impl Iterator<Item = &ModuleInfo> {
        self.modules.iter()
    }
}
