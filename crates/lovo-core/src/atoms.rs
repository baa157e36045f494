/// Per-atom topology metadata the alignment needs: a name, a chain and a
/// residue/molecule identifier for every atom index. Structure parsing
/// lives outside this workspace; callers implement this for whatever
/// topology representation they already have.
pub trait Atomer {
    fn len(&self) -> usize;
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
    fn name(&self, idx: usize) -> &str;
    fn chain(&self, idx: usize) -> &str;
    /// Residue/molecule identifier of the atom.
    fn mol_id(&self, idx: usize) -> i32;
}

/// Minimal column-oriented `Atomer` implementation, handy for tests and for
/// callers without a richer topology type.
#[derive(Debug, Default, Clone)]
pub struct AtomTable {
    names: Vec<String>,
    chains: Vec<String>,
    mol_ids: Vec<i32>,
}

impl AtomTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, name: &str, chain: &str, mol_id: i32) {
        self.names.push(name.to_string());
        self.chains.push(chain.to_string());
        self.mol_ids.push(mol_id);
    }
}

impl Atomer for AtomTable {
    fn len(&self) -> usize {
        self.names.len()
    }

    fn name(&self, idx: usize) -> &str {
        &self.names[idx]
    }

    fn chain(&self, idx: usize) -> &str {
        &self.chains[idx]
    }

    fn mol_id(&self, idx: usize) -> i32 {
        self.mol_ids[idx]
    }
}
