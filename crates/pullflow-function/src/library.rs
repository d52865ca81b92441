//! Named function bodies that datasets resolve their handles against.

use std::collections::BTreeMap;

use crate::def::FunctionDef;
use crate::error::{FunctionError, Result};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FunctionLibrary {
    functions: BTreeMap<String, FunctionDef>,
}

impl FunctionLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a body, rejecting invalid bodies and duplicate names.
    pub fn add(&mut self, def: FunctionDef) -> Result<()> {
        def.validate()?;
        if self.functions.contains_key(&def.name) {
            return Err(FunctionError::InvalidArgument(format!(
                "function '{}' is already in the library",
                def.name
            )));
        }
        self.functions.insert(def.name.clone(), def);
        Ok(())
    }

    pub fn with(mut self, def: FunctionDef) -> Result<Self> {
        self.add(def)?;
        Ok(self)
    }

    pub fn get(&self, name: &str) -> Option<&FunctionDef> {
        self.functions.get(name)
    }

    /// Like `get`, but an unknown handle is an instantiation failure.
    pub fn lookup(&self, name: &str) -> Result<&FunctionDef> {
        self.get(name).ok_or_else(|| {
            FunctionError::Instantiation(format!("function '{name}' not found in library"))
        })
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.functions.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    /// Parse a JSON array of function bodies.
    pub fn from_json(s: &str) -> Result<Self> {
        let defs: Vec<FunctionDef> = serde_json::from_str(s)
            .map_err(|e| FunctionError::InvalidArgument(format!("function library json: {e}")))?;
        let mut lib = Self::new();
        for def in defs {
            lib.add(def)?;
        }
        Ok(lib)
    }

    pub fn to_json(&self) -> Result<String> {
        let defs: Vec<&FunctionDef> = self.functions.values().collect();
        serde_json::to_string_pretty(&defs)
            .map_err(|e| FunctionError::InvalidArgument(format!("function library json: {e}")))
    }
}
