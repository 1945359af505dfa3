use super::ValueType;
use std::collections::HashMap;
use std::fmt;

/// Index of a local variable in a method
#[derive(Copy, Clone, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct LocalId(u32);

impl LocalId {
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for LocalId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_fmt(format_args!("local{}", self.0))
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LocalVariable {
    /// Unique name of the local in the method
    pub name: String,

    /// Type of value stored in the local
    pub value_type: ValueType,
}

/// Registry of the local variables of one method
///
/// Structuring needs extra locals for flags, dispatch selectors, and for parking operand stack
/// values across jumps that WASM can't carry values through. Those get registered here next to
/// the locals from the original method.
#[derive(Clone, Debug, Default)]
pub struct Locals {
    variables: Vec<LocalVariable>,

    /// Locals indexed by name
    by_name: HashMap<String, LocalId>,

    /// Locals used to park the stack, indexed by stack depth and type
    stack_slots: HashMap<(usize, ValueType), LocalId>,
}

impl Locals {
    pub fn new() -> Locals {
        Locals::default()
    }

    /// Register a new local
    ///
    /// If the name is already taken, a numeric suffix is added to make it unique.
    pub fn add(&mut self, name: &str, value_type: ValueType) -> LocalId {
        let mut unique_name = name.to_string();
        let mut suffix = 0;
        while self.by_name.contains_key(&unique_name) {
            suffix += 1;
            unique_name = format!("{}_{}", name, suffix);
        }

        let local_id = LocalId(self.variables.len() as u32);
        self.by_name.insert(unique_name.clone(), local_id);
        self.variables.push(LocalVariable {
            name: unique_name,
            value_type,
        });
        local_id
    }

    /// Get the local used to park the stack value at `depth` (counting from the bottom)
    pub fn stack_slot(&mut self, depth: usize, value_type: ValueType) -> LocalId {
        if let Some(local_id) = self.stack_slots.get(&(depth, value_type)) {
            return *local_id;
        }
        let local_id = self.add(&format!("s{}{}", depth, value_type), value_type);
        self.stack_slots.insert((depth, value_type), local_id);
        local_id
    }

    pub fn get(&self, local_id: LocalId) -> Option<&LocalVariable> {
        self.variables.get(local_id.index())
    }

    pub fn lookup(&self, name: &str) -> Option<LocalId> {
        self.by_name.get(name).copied()
    }

    /// Name of a local, or a placeholder for unknown locals
    pub fn name(&self, local_id: LocalId) -> String {
        match self.get(local_id) {
            Some(local) => local.name.clone(),
            None => format!("{:?}", local_id),
        }
    }

    pub fn len(&self) -> usize {
        self.variables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.variables.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (LocalId, &LocalVariable)> {
        self.variables
            .iter()
            .enumerate()
            .map(|(idx, local)| (LocalId(idx as u32), local))
    }
}
