use ns_core::{Chain, Counter, Element, Family, Flowtable, Map, Rule, Set, Table};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// (family, table name)
pub type TableKey = (Family, String);

/// A committed table and everything it owns
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableState {
    pub table: Table,
    pub flowtables: BTreeMap<String, Flowtable>,
    pub chains: BTreeMap<String, ChainState>,
    pub sets: BTreeMap<String, SetState>,
    pub maps: BTreeMap<String, MapState>,
    pub counters: BTreeMap<String, Counter>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainState {
    pub chain: Chain,
    pub rules: Vec<Rule>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetState {
    pub set: Set,
    pub elements: Vec<Element>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MapState {
    pub map: Map,
    pub elements: Vec<Element>,
}

/// The whole forest of tables
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Ruleset {
    pub tables: BTreeMap<TableKey, TableState>,
}

/// Engine-wide handle counter. Every attempted add/create/insert advances it,
/// including those in checks and in transactions that fail.
#[derive(Debug, Default)]
pub struct HandleAllocator {
    last: AtomicU64,
}

impl HandleAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hand out the next handle
    pub fn allocate(&self) -> u64 {
        self.last.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// The most recently handed out handle, 0 before the first
    pub fn last(&self) -> u64 {
        self.last.load(Ordering::SeqCst)
    }
}

impl TableState {
    pub fn new(table: Table) -> Self {
        Self {
            table,
            flowtables: BTreeMap::new(),
            chains: BTreeMap::new(),
            sets: BTreeMap::new(),
            maps: BTreeMap::new(),
            counters: BTreeMap::new(),
        }
    }

    pub fn rule_count(&self) -> usize {
        self.chains.values().map(|c| c.rules.len()).sum()
    }

    pub fn element_count(&self) -> usize {
        self.sets.values().map(|s| s.elements.len()).sum::<usize>()
            + self.maps.values().map(|m| m.elements.len()).sum::<usize>()
    }

    /// Drop every rule and every set/map element, keeping the objects themselves
    pub fn flush(&mut self) {
        for chain in self.chains.values_mut() {
            chain.rules.clear();
        }
        for set in self.sets.values_mut() {
            set.elements.clear();
        }
        for map in self.maps.values_mut() {
            map.elements.clear();
        }
    }
}

impl ChainState {
    pub fn new(chain: Chain) -> Self {
        Self {
            chain,
            rules: Vec::new(),
        }
    }
}

impl SetState {
    pub fn new(set: Set) -> Self {
        Self {
            set,
            elements: Vec::new(),
        }
    }

    pub fn find_element<T: AsRef<str>>(&self, key: &[T]) -> Option<&Element> {
        position_of(&self.elements, key).map(|idx| &self.elements[idx])
    }
}

impl MapState {
    pub fn new(map: Map) -> Self {
        Self {
            map,
            elements: Vec::new(),
        }
    }

    pub fn find_element<T: AsRef<str>>(&self, key: &[T]) -> Option<&Element> {
        position_of(&self.elements, key).map(|idx| &self.elements[idx])
    }
}

/// Index of the element whose key tuple equals `key` exactly
pub(crate) fn position_of<T: AsRef<str>>(elements: &[Element], key: &[T]) -> Option<usize> {
    elements.iter().position(|elem| {
        elem.key.len() == key.len() && elem.key.iter().zip(key).all(|(a, b)| a == b.as_ref())
    })
}

impl Ruleset {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn table(&self, family: Family, name: &str) -> Option<&TableState> {
        self.tables.get(&(family, name.to_string()))
    }

    /// Tables ordered by family name, then table name
    pub fn sorted_tables(&self) -> Vec<&TableState> {
        let mut tables: Vec<(&TableKey, &TableState)> = self.tables.iter().collect();
        tables.sort_by(|(a, _), (b, _)| (a.0.as_str(), &a.1).cmp(&(b.0.as_str(), &b.1)));
        tables.into_iter().map(|(_, table)| table).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handle_allocator_counts_up_from_one() {
        let handles = HandleAllocator::new();
        assert_eq!(handles.last(), 0);
        assert_eq!(handles.allocate(), 1);
        assert_eq!(handles.allocate(), 2);
        assert_eq!(handles.last(), 2);
    }

    fn table(family: Family, name: &str) -> TableState {
        TableState::new(Table {
            family: Some(family),
            name: Some(name.into()),
            ..Default::default()
        })
    }

    #[test]
    fn test_sorted_tables_use_family_names() {
        let mut ruleset = Ruleset::new();
        for (family, name) in [(Family::Ip6, "b"), (Family::Ip, "z"), (Family::Inet, "a"), (Family::Ip, "a")] {
            ruleset.tables.insert((family, name.into()), table(family, name));
        }

        let order: Vec<(Family, String)> = ruleset
            .sorted_tables()
            .iter()
            .map(|t| (t.table.family.unwrap(), t.table.name.clone().unwrap()))
            .collect();
        assert_eq!(
            order,
            vec![
                (Family::Inet, "a".to_string()),
                (Family::Ip, "a".to_string()),
                (Family::Ip, "z".to_string()),
                (Family::Ip6, "b".to_string()),
            ]
        );
    }

    #[test]
    fn test_find_element_matches_whole_tuple() {
        let mut set = SetState::new(Set {
            name: "s".into(),
            ..Default::default()
        });
        set.elements.push(Element {
            set: Some("s".into()),
            key: vec!["10.0.0.1".into(), "tcp".into()],
            ..Default::default()
        });

        assert!(set.find_element(&["10.0.0.1", "tcp"]).is_some());
        assert!(set.find_element(&["10.0.0.1"]).is_none());
        assert!(set.find_element(&["tcp", "10.0.0.1"]).is_none());
    }

    #[test]
    fn test_flush_keeps_objects() {
        let mut t = table(Family::Ip, "t");
        let mut chain = ChainState::new(Chain {
            name: "c".into(),
            ..Default::default()
        });
        chain.rules.push(Rule {
            chain: "c".into(),
            rule: "drop".into(),
            ..Default::default()
        });
        t.chains.insert("c".into(), chain);

        assert_eq!(t.rule_count(), 1);
        t.flush();
        assert_eq!(t.rule_count(), 0);
        assert_eq!(t.chains.len(), 1);
    }
}
