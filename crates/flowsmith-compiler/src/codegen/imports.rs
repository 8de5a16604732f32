/// Ordered, deduplicated set of `from module import name` statements.
#[derive(Debug, Default, Clone)]
pub struct ImportSet {
    /// Modules in first-use order, each with its names in first-use order.
    modules: Vec<(String, Vec<String>)>,
}

impl ImportSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a use of `module.name`. Repeated uses are ignored.
    pub fn add(&mut self, module: &str, name: &str) {
        match self.modules.iter_mut().find(|(m, _)| m == module) {
            Some((_, names)) => {
                if !names.iter().any(|n| n == name) {
                    names.push(name.to_string());
                }
            }
            None => self.modules.push((module.to_string(), vec![name.to_string()])),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// One `from m import a, b` line per module.
    pub fn render(&self) -> Vec<String> {
        self.modules
            .iter()
            .map(|(module, names)| format!("from {} import {}", module, names.join(", ")))
            .collect()
    }
}
