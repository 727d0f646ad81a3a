use crate::refs::check_references;
use crate::state::{
    ChainState, HandleAllocator, MapState, Ruleset, SetState, TableKey, TableState, position_of,
};
use ns_core::util::{join, substitute_defines};
use ns_core::{
    Chain, Counter, Define, Element, Flowtable, Map, NftError, Object, Result, Rule, Set, Table,
    Transaction, Verb,
};
use std::collections::BTreeMap;
use tracing::debug;

/// Existence rule shared by every object kind: `add`/`destroy` accept either state,
/// `create` needs the object absent, every other verb needs it present.
fn check_existence(verb: Verb, exists: bool, kind: &str, name: &str) -> Result<()> {
    match verb {
        Verb::Add | Verb::Destroy => Ok(()),
        Verb::Create if exists => Err(NftError::already_exists(format!("{} {:?} already exists", kind, name))),
        Verb::Create => Ok(()),
        _ if !exists => Err(NftError::not_found(format!("no such {} {:?}", kind, name))),
        _ => Ok(()),
    }
}

fn unhandled(verb: Verb, kind: &str) -> NftError {
    NftError::UnhandledOperation {
        verb: verb.to_string(),
        kind: kind.to_string(),
    }
}

/// Name of the target of a `delete` that may refer to its object by handle instead
fn resolve_name<T>(
    objects: &BTreeMap<String, T>,
    kind: &str,
    verb: Verb,
    name: &str,
    handle: Option<u64>,
    handle_of: impl Fn(&T) -> Option<u64>,
) -> Result<String> {
    match (verb, handle) {
        (Verb::Delete, Some(handle)) => objects
            .iter()
            .find(|(_, obj)| handle_of(obj) == Some(handle))
            .map(|(name, _)| name.clone())
            .ok_or_else(|| NftError::not_found(format!("no {} with handle {}", kind, handle))),
        _ => Ok(name.to_string()),
    }
}

fn object_table_key(object: &Object) -> Result<TableKey> {
    match (object.family(), object.table_name()) {
        (Some(family), Some(table)) => Ok((family, table.to_string())),
        _ => Err(NftError::validation(object.kind().as_str(), "no family or table specified")),
    }
}

impl Ruleset {
    /// Apply every operation of `tx` in order, stopping at the first failure.
    ///
    /// On error `self` is left partially modified; callers apply to a clone and only
    /// publish it on success. Handles drawn from `handles` are spent either way.
    pub fn apply(&mut self, tx: &Transaction, defines: &[Define], handles: &HandleAllocator) -> Result<()> {
        for op in tx.operations() {
            self.apply_operation(op.verb, &op.object, defines, handles)?;
        }
        Ok(())
    }

    fn apply_operation(
        &mut self,
        verb: Verb,
        object: &Object,
        defines: &[Define],
        handles: &HandleAllocator,
    ) -> Result<()> {
        let handle = if verb.allocates_handle() {
            handles.allocate()
        } else {
            handles.last()
        };
        debug!("applying {} {} (handle counter {})", verb, object.kind(), handle);

        if let Object::Table(table) = object {
            return self.apply_table(verb, table, handle);
        }

        let key = object_table_key(object)?;
        let Some(table) = self.tables.get_mut(&key) else {
            return Err(NftError::not_found(format!("no such table \"{} {}\"", key.0, key.1)));
        };

        match object {
            Object::Table(_) => Err(unhandled(verb, "table")),
            Object::Chain(chain) => table.apply_chain(verb, chain, handle),
            Object::Rule(rule) => table.apply_rule(verb, rule, handle, defines),
            Object::Set(set) => table.apply_set(verb, set, handle, defines),
            Object::Map(map) => table.apply_map(verb, map, handle, defines),
            Object::Element(element) => table.apply_element(verb, element, defines),
            Object::Flowtable(flowtable) => table.apply_flowtable(verb, flowtable, handle),
            Object::Counter(counter) => table.apply_counter(verb, counter, handle),
        }
    }

    fn apply_table(&mut self, verb: Verb, table: &Table, handle: u64) -> Result<()> {
        let family = table
            .family
            .ok_or_else(|| NftError::validation("table", "no family specified"))?;

        if let (Verb::Delete, Some(by_handle)) = (verb, table.handle) {
            let key = self
                .tables
                .iter()
                .find(|((f, _), t)| *f == family && t.table.handle == Some(by_handle))
                .map(|(key, _)| key.clone())
                .ok_or_else(|| NftError::not_found(format!("no table with handle {}", by_handle)))?;
            self.tables.remove(&key);
            return Ok(());
        }

        let name = table.name.clone().unwrap_or_default();
        let key = (family, name);
        let display_name = format!("{} {}", key.0, key.1);
        check_existence(verb, self.tables.contains_key(&key), "table", &display_name)?;

        match verb {
            Verb::Add | Verb::Create => {
                self.tables.entry(key).or_insert_with(|| {
                    TableState::new(Table {
                        handle: Some(handle),
                        ..table.clone()
                    })
                });
            }
            Verb::Delete | Verb::Destroy => {
                self.tables.remove(&key);
            }
            Verb::Flush => {
                if let Some(existing) = self.tables.get_mut(&key) {
                    existing.flush();
                }
            }
            _ => return Err(unhandled(verb, "table")),
        }
        Ok(())
    }
}

impl TableState {
    fn apply_chain(&mut self, verb: Verb, chain: &Chain, handle: u64) -> Result<()> {
        let name = resolve_name(&self.chains, "chain", verb, &chain.name, chain.handle, |c| c.chain.handle)?;
        check_existence(verb, self.chains.contains_key(&name), "chain", &name)?;

        match verb {
            Verb::Add | Verb::Create => {
                self.chains.entry(name).or_insert_with(|| {
                    ChainState::new(Chain {
                        handle: Some(handle),
                        ..chain.clone()
                    })
                });
            }
            Verb::Flush => {
                if let Some(existing) = self.chains.get_mut(&name) {
                    existing.rules.clear();
                }
            }
            Verb::Delete | Verb::Destroy => {
                self.chains.remove(&name);
            }
            _ => return Err(unhandled(verb, "chain")),
        }
        Ok(())
    }

    fn apply_rule(&mut self, verb: Verb, rule: &Rule, handle: u64, defines: &[Define]) -> Result<()> {
        if !self.chains.contains_key(&rule.chain) {
            return Err(NftError::not_found(format!("no such chain {:?}", rule.chain)));
        }

        let body = substitute_defines(&rule.rule, defines);
        if matches!(verb, Verb::Add | Verb::Insert | Verb::Replace) {
            check_references(self, &body)?;
        }

        let Some(chain) = self.chains.get_mut(&rule.chain) else {
            return Err(NftError::not_found(format!("no such chain {:?}", rule.chain)));
        };
        let reference = chain.resolve_position(rule)?;

        match verb {
            Verb::Add | Verb::Insert => {
                let position = match (verb, reference) {
                    (Verb::Add, Some(idx)) => idx + 1,
                    (Verb::Add, None) => chain.rules.len(),
                    (_, Some(idx)) => idx,
                    (_, None) => 0,
                };
                chain.rules.insert(
                    position,
                    Rule {
                        rule: body,
                        index: None,
                        handle: Some(handle),
                        ..rule.clone()
                    },
                );
            }
            Verb::Replace => {
                let idx = reference.ok_or_else(|| NftError::validation("rule", "must specify Handle with replace"))?;
                chain.rules[idx] = Rule {
                    rule: body,
                    index: None,
                    handle: chain.rules[idx].handle,
                    ..rule.clone()
                };
            }
            Verb::Delete => {
                let idx = reference.ok_or_else(|| NftError::validation("rule", "must specify Handle with delete"))?;
                chain.rules.remove(idx);
            }
            _ => return Err(unhandled(verb, "rule")),
        }
        Ok(())
    }

    fn apply_set(&mut self, verb: Verb, set: &Set, handle: u64, defines: &[Define]) -> Result<()> {
        let name = resolve_name(&self.sets, "set", verb, &set.name, set.handle, |s| s.set.handle)?;
        check_existence(verb, self.sets.contains_key(&name), "set", &name)?;

        match verb {
            Verb::Add | Verb::Create => {
                self.sets.entry(name).or_insert_with(|| {
                    SetState::new(Set {
                        set_type: set.set_type.as_deref().map(|t| substitute_defines(t, defines)),
                        type_of: set.type_of.as_deref().map(|t| substitute_defines(t, defines)),
                        handle: Some(handle),
                        ..set.clone()
                    })
                });
            }
            Verb::Flush => {
                if let Some(existing) = self.sets.get_mut(&name) {
                    existing.elements.clear();
                }
            }
            Verb::Delete | Verb::Destroy => {
                self.sets.remove(&name);
            }
            _ => return Err(unhandled(verb, "set")),
        }
        Ok(())
    }

    fn apply_map(&mut self, verb: Verb, map: &Map, handle: u64, defines: &[Define]) -> Result<()> {
        let name = resolve_name(&self.maps, "map", verb, &map.name, map.handle, |m| m.map.handle)?;
        check_existence(verb, self.maps.contains_key(&name), "map", &name)?;

        match verb {
            Verb::Add | Verb::Create => {
                self.maps.entry(name).or_insert_with(|| {
                    MapState::new(Map {
                        map_type: map.map_type.as_deref().map(|t| substitute_defines(t, defines)),
                        type_of: map.type_of.as_deref().map(|t| substitute_defines(t, defines)),
                        handle: Some(handle),
                        ..map.clone()
                    })
                });
            }
            Verb::Flush => {
                if let Some(existing) = self.maps.get_mut(&name) {
                    existing.elements.clear();
                }
            }
            Verb::Delete | Verb::Destroy => {
                self.maps.remove(&name);
            }
            _ => return Err(unhandled(verb, "map")),
        }
        Ok(())
    }

    fn apply_element(&mut self, verb: Verb, element: &Element, defines: &[Define]) -> Result<()> {
        let element = Element {
            key: element.key.iter().map(|k| substitute_defines(k, defines)).collect(),
            value: element.value.iter().map(|v| substitute_defines(v, defines)).collect(),
            ..element.clone()
        };

        // destroy validates like the add it stands in for
        if matches!(verb, Verb::Add | Verb::Create | Verb::Destroy) && !element.value.is_empty() {
            check_references(self, &join(&element.value))?;
        }

        let elements = match (&element.set, &element.map) {
            (Some(set), _) => match self.sets.get_mut(set) {
                Some(existing) => &mut existing.elements,
                None => return Err(NftError::not_found(format!("no such set {:?}", set))),
            },
            (None, Some(map)) => match self.maps.get_mut(map) {
                Some(existing) => &mut existing.elements,
                None => return Err(NftError::not_found(format!("no such map {:?}", map))),
            },
            (None, None) => {
                return Err(NftError::validation("element", "no set/map name specified for element"));
            }
        };

        let existing = position_of(elements, &element.key);
        let key = join(&element.key);
        check_existence(verb, existing.is_some(), "element", &key)?;

        match (verb, existing) {
            (Verb::Add, Some(idx)) => elements[idx] = element,
            (Verb::Add | Verb::Create, None) => elements.push(element),
            (Verb::Delete | Verb::Destroy, Some(idx)) => {
                elements.remove(idx);
            }
            (Verb::Destroy, None) => {}
            _ => return Err(unhandled(verb, "element")),
        }
        Ok(())
    }

    fn apply_flowtable(&mut self, verb: Verb, flowtable: &Flowtable, handle: u64) -> Result<()> {
        let name = resolve_name(&self.flowtables, "flowtable", verb, &flowtable.name, flowtable.handle, |f| f.handle)?;
        check_existence(verb, self.flowtables.contains_key(&name), "flowtable", &name)?;

        match verb {
            Verb::Add | Verb::Create => {
                self.flowtables.entry(name).or_insert_with(|| Flowtable {
                    handle: Some(handle),
                    ..flowtable.clone()
                });
            }
            Verb::Delete | Verb::Destroy => {
                self.flowtables.remove(&name);
            }
            _ => return Err(unhandled(verb, "flowtable")),
        }
        Ok(())
    }

    fn apply_counter(&mut self, verb: Verb, counter: &Counter, handle: u64) -> Result<()> {
        let name = resolve_name(&self.counters, "counter", verb, &counter.name, counter.handle, |c| c.handle)?;
        check_existence(verb, self.counters.contains_key(&name), "counter", &name)?;

        match verb {
            Verb::Add | Verb::Create => {
                self.counters.entry(name).or_insert_with(|| Counter {
                    packets: Some(counter.packets.unwrap_or(0)),
                    bytes: Some(counter.bytes.unwrap_or(0)),
                    handle: Some(handle),
                    ..counter.clone()
                });
            }
            Verb::Reset => {
                if let Some(existing) = self.counters.get_mut(&name) {
                    existing.packets = Some(0);
                    existing.bytes = Some(0);
                }
            }
            Verb::Delete | Verb::Destroy => {
                self.counters.remove(&name);
            }
            _ => return Err(unhandled(verb, "counter")),
        }
        Ok(())
    }
}

impl ChainState {
    /// Resolve the rule a positioned operation refers to, by handle or by index
    fn resolve_position(&self, rule: &Rule) -> Result<Option<usize>> {
        if let Some(handle) = rule.handle {
            return self
                .rules
                .iter()
                .position(|r| r.handle == Some(handle))
                .map(Some)
                .ok_or_else(|| {
                    NftError::not_found(format!("no rule with handle {} in chain {:?}", handle, self.chain.name))
                });
        }
        if let Some(index) = rule.index {
            if index >= self.rules.len() {
                return Err(NftError::not_found(format!(
                    "no rule with index {} in chain {:?}",
                    index, self.chain.name
                )));
            }
            return Ok(Some(index));
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ns_core::{EngineConfig, Family};

    fn transaction() -> Transaction {
        Transaction::for_config(&EngineConfig::for_table(Family::Ip, "t"))
    }

    fn apply(ruleset: &mut Ruleset, tx: &Transaction) -> Result<()> {
        assert!(tx.err().is_none(), "{:?}", tx.err());
        ruleset.apply(tx, &[], &HandleAllocator::new())
    }

    #[test]
    fn test_handles_count_every_allocating_operation() {
        let mut ruleset = Ruleset::new();
        let mut tx = transaction();
        tx.add(Table::default());
        tx.add(Table::default());
        tx.add(Chain { name: "c".into(), ..Default::default() });
        tx.flush(Chain { name: "c".into(), ..Default::default() });
        tx.add(Counter { name: "cnt".into(), ..Default::default() });
        let handles = HandleAllocator::new();
        ruleset.apply(&tx, &[], &handles).unwrap();

        assert_eq!(handles.last(), 4);
        let table = ruleset.table(Family::Ip, "t").unwrap();
        assert_eq!(table.table.handle, Some(1));
        assert_eq!(table.chains["c"].chain.handle, Some(3));
        assert_eq!(table.counters["cnt"].handle, Some(4));
        assert_eq!(table.counters["cnt"].packets, Some(0));
    }

    #[test]
    fn test_create_and_existence_errors() {
        let mut ruleset = Ruleset::new();
        let mut tx = transaction();
        tx.create(Table::default());
        tx.create(Set { name: "s".into(), set_type: Some("ipv4_addr".into()), ..Default::default() });
        apply(&mut ruleset, &tx).unwrap();

        let mut tx = transaction();
        tx.create(Set { name: "s".into(), set_type: Some("ipv4_addr".into()), ..Default::default() });
        assert!(apply(&mut ruleset.clone(), &tx).unwrap_err().is_already_exists());

        let mut tx = transaction();
        tx.flush(Map { name: "m".into(), ..Default::default() });
        assert!(apply(&mut ruleset.clone(), &tx).unwrap_err().is_not_found());

        let mut tx = transaction();
        tx.destroy(Map { name: "m".into(), map_type: Some("ipv4_addr : verdict".into()), ..Default::default() });
        tx.destroy(Counter { name: "nosuch".into(), ..Default::default() });
        apply(&mut ruleset, &tx).unwrap();
    }

    #[test]
    fn test_child_of_missing_table_is_not_found() {
        let mut ruleset = Ruleset::new();
        let mut tx = transaction();
        tx.destroy(Chain { name: "c".into(), ..Default::default() });
        let err = apply(&mut ruleset, &tx).unwrap_err();
        assert!(err.is_not_found());
        assert!(err.to_string().contains("no such table \"ip t\""), "{}", err);

        let mut tx = transaction();
        tx.destroy(Table::default());
        apply(&mut ruleset, &tx).unwrap();
    }

    #[test]
    fn test_element_add_overwrites_and_create_conflicts() {
        let mut ruleset = Ruleset::new();
        let mut tx = transaction();
        tx.add(Table::default());
        tx.add(Chain { name: "c".into(), ..Default::default() });
        tx.add(Map { name: "m".into(), map_type: Some("ipv4_addr : verdict".into()), ..Default::default() });
        tx.add(Element { map: Some("m".into()), key: vec!["10.0.0.1".into()], value: vec!["goto c".into()], ..Default::default() });
        tx.add(Element { map: Some("m".into()), key: vec!["10.0.0.1".into()], value: vec!["drop".into()], ..Default::default() });
        apply(&mut ruleset, &tx).unwrap();

        let map = &ruleset.table(Family::Ip, "t").unwrap().maps["m"];
        assert_eq!(map.elements.len(), 1);
        assert_eq!(map.find_element(&["10.0.0.1"]).unwrap().value, vec!["drop"]);

        let mut tx = transaction();
        tx.create(Element { map: Some("m".into()), key: vec!["10.0.0.1".into()], value: vec!["accept".into()], ..Default::default() });
        assert!(apply(&mut ruleset.clone(), &tx).unwrap_err().is_already_exists());

        let mut tx = transaction();
        tx.add(Element { map: Some("m".into()), key: vec!["10.0.0.2".into()], value: vec!["jump nosuch".into()], ..Default::default() });
        assert!(apply(&mut ruleset.clone(), &tx).unwrap_err().is_not_found());
    }

    #[test]
    fn test_delete_by_handle() {
        let mut ruleset = Ruleset::new();
        let mut tx = transaction();
        tx.add(Table::default());
        tx.add(Chain { name: "c".into(), ..Default::default() });
        tx.add(Set { name: "s".into(), set_type: Some("ipv4_addr".into()), ..Default::default() });
        apply(&mut ruleset, &tx).unwrap();

        let mut tx = transaction();
        tx.delete(Set { handle: Some(3), ..Default::default() });
        tx.delete(Chain { handle: Some(2), ..Default::default() });
        apply(&mut ruleset, &tx).unwrap();

        let table = ruleset.table(Family::Ip, "t").unwrap();
        assert!(table.sets.is_empty());
        assert!(table.chains.is_empty());

        let mut tx = transaction();
        tx.delete(Chain { handle: Some(2), ..Default::default() });
        assert!(apply(&mut ruleset.clone(), &tx).unwrap_err().is_not_found());

        let mut tx = transaction();
        tx.delete(Table { family: Some(Family::Ip), handle: Some(1), ..Default::default() });
        apply(&mut ruleset, &tx).unwrap();
        assert!(ruleset.tables.is_empty());
    }

    #[test]
    fn test_defines_are_substituted() {
        let defines = EngineConfig::for_table(Family::Ip, "t").effective_defines();
        let mut ruleset = Ruleset::new();
        let mut tx = transaction();
        tx.add(Table::default());
        tx.add(Chain { name: "c".into(), ..Default::default() });
        tx.add(Set { name: "s".into(), set_type: Some("$INET_ADDR".into()), ..Default::default() });
        tx.add_rule("c", "$IP saddr @s drop");
        ruleset.apply(&tx, &defines, &HandleAllocator::new()).unwrap();

        let table = ruleset.table(Family::Ip, "t").unwrap();
        assert_eq!(table.sets["s"].set.set_type.as_deref(), Some("ipv4_addr"));
        assert_eq!(table.chains["c"].rules[0].rule, "ip saddr @s drop");
        assert_eq!(tx.to_string().lines().last(), Some("add rule ip t c $IP saddr @s drop"));
    }
}
