/// Supplies names for tables, derived tables and CTEs that were not aliased explicitly.
///
/// One generator lives for exactly one compile/evaluation; it is threaded through every
/// render call so all generated names in a statement are unique.
#[derive(Debug, Clone)]
pub struct AliasGenerator {
    prefix: String,
    counter: u32,
}

impl AliasGenerator {
    pub fn new() -> Self {
        Self::with_prefix("t")
    }

    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            counter: 1,
        }
    }

    pub fn next(&mut self) -> String {
        let alias = format!("{}{}", self.prefix, self.counter);
        self.counter += 1;
        alias
    }
}

impl Default for AliasGenerator {
    fn default() -> Self {
        Self::new()
    }
}
