//! Key-by-key merge of configuration layers.

use toml::{Table, Value};

/// Merge `layer` over `base`. Tables merge recursively; any other value in
/// `layer` replaces the one in `base`, arrays included.
pub fn overlay(base: &mut Table, layer: Table) {
    for (key, value) in layer {
        match (base.get_mut(&key), value) {
            (Some(Value::Table(existing)), Value::Table(incoming)) => overlay(existing, incoming),
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}
