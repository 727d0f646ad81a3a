use crate::state::TableState;
use serde::{Deserialize, Serialize};

/// Object counts for one table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableStatus {
    pub name: String,
    pub family: String,
    pub chains: usize,
    pub rules: usize,
    pub sets: usize,
    pub maps: usize,
    pub elements: usize,
    pub flowtables: usize,
    pub counters: usize,
}

impl TableStatus {
    pub fn from_table(table: &TableState) -> Self {
        Self {
            name: table.table.name.clone().unwrap_or_default(),
            family: table.table.family.map(|f| f.to_string()).unwrap_or_default(),
            chains: table.chains.len(),
            rules: table.rule_count(),
            sets: table.sets.len(),
            maps: table.maps.len(),
            elements: table.element_count(),
            flowtables: table.flowtables.len(),
            counters: table.counters.len(),
        }
    }

    pub fn display(&self) {
        println!("  • {} ({})", self.name, self.family);
        println!("    Chains: {}, Rules: {}", self.chains, self.rules);
        println!(
            "    Sets: {}, Maps: {}, Elements: {}",
            self.sets, self.maps, self.elements
        );
        if self.flowtables > 0 || self.counters > 0 {
            println!(
                "    Flowtables: {}, Counters: {}",
                self.flowtables, self.counters
            );
        }
    }
}

/// Print a status block for every table
pub fn display_status(tables: &[TableStatus]) {
    println!("🔥 nftables ({}):", tables.len());
    if tables.is_empty() {
        println!("  (none)");
    }
    for table in tables {
        table.display();
    }
}
