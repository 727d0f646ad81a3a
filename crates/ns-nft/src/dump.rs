use crate::state::Ruleset;
use ns_core::util::{split, split_comment, split_map_value, unescape};
use ns_core::{
    BaseChainHook, BaseChainType, Chain, Counter, Element, EngineConfig, Family, Flowtable, Map,
    NftError, Object, ObjectKind, Result, Rule, Set, SetPolicy, Table, Transaction, Verb,
};
use regex::Regex;
use std::collections::BTreeSet;
use std::sync::LazyLock;
use std::time::Duration;

static LINE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\w+) (\w+) (\S+) (\S+)(?: (.*))?$").expect("valid dump line regex")
});

static BODY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\S+)(?: \{ ?(.*?) ?\})?$").expect("valid object body regex"));

static COMMENT_CLAUSE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"comment "((?:[^"\\]|\\.)*)" ;"#).expect("valid comment clause regex")
});

static BASE_CHAIN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"type (\S+) hook (\S+)(?: device "([^"]*)")? priority (\S+) ;"#)
        .expect("valid base chain regex")
});

static FLOWTABLE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"hook ingress priority (\S+) ;").expect("valid flowtable regex"));

static DEVICES_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"devices = \{ ([^}]*) \}").expect("valid devices regex"));

static COUNTER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"packets (\d+) bytes (\d+) ;").expect("valid counter regex"));

static ELEMENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\S+) \{ (.*) \}$").expect("valid element regex"));

/// Render the ruleset as replayable `add` commands.
///
/// Per table: the table, then its flowtables, chains, sets, maps and counters by name,
/// then the rules of each chain and the elements of each set and map.
pub fn dump(ruleset: &Ruleset) -> String {
    let mut out = String::new();

    for table in ruleset.sorted_tables() {
        let mut objects: Vec<Object> = vec![Table {
            handle: None,
            ..table.table.clone()
        }
        .into()];

        objects.extend(table.flowtables.values().map(|f| Object::from(Flowtable { handle: None, ..f.clone() })));
        objects.extend(table.chains.values().map(|c| Object::from(Chain { handle: None, ..c.chain.clone() })));
        objects.extend(table.sets.values().map(|s| Object::from(Set { handle: None, ..s.set.clone() })));
        objects.extend(table.maps.values().map(|m| Object::from(Map { handle: None, ..m.map.clone() })));
        objects.extend(table.counters.values().map(|c| Object::from(Counter { handle: None, ..c.clone() })));

        for chain in table.chains.values() {
            objects.extend(chain.rules.iter().map(|r| {
                Object::from(Rule {
                    index: None,
                    handle: None,
                    ..r.clone()
                })
            }));
        }
        for set in table.sets.values() {
            objects.extend(set.elements.iter().cloned().map(Object::from));
        }
        for map in table.maps.values() {
            objects.extend(map.elements.iter().cloned().map(Object::from));
        }

        for object in objects {
            // writing into a String cannot fail
            let _ = object.write_operation(Verb::Add, &mut out);
        }
    }

    out
}

/// Parses dump text back into a transaction
pub struct DumpParser<'a> {
    config: &'a EngineConfig,
    /// (family, table, name) of every map known so far, so that value-less element
    /// lines (as in `delete element`) can be routed to a map rather than a set
    maps: BTreeSet<(Family, String, String)>,
}

impl<'a> DumpParser<'a> {
    pub fn new(config: &'a EngineConfig) -> Self {
        Self {
            config,
            maps: BTreeSet::new(),
        }
    }

    pub fn with_known_maps(mut self, maps: impl IntoIterator<Item = (Family, String, String)>) -> Self {
        self.maps.extend(maps);
        self
    }

    /// Parse every non-blank, non-`#` line of `text`
    pub fn parse(mut self, text: &str) -> Result<Transaction> {
        let mut tx = Transaction::for_config(self.config);

        for (idx, raw) in text.lines().enumerate() {
            let lineno = idx + 1;
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let (verb, object) = self.parse_line(line).map_err(|e| NftError::parse(lineno, e))?;
            tx.operation(verb, object);
            if let Some(err) = tx.err() {
                return Err(NftError::parse(lineno, err.to_string()));
            }
        }

        Ok(tx)
    }

    fn parse_line(&mut self, line: &str) -> std::result::Result<(Verb, Object), String> {
        let caps = LINE_RE
            .captures(line)
            .ok_or_else(|| format!("could not parse {:?}", line))?;

        let verb: Verb = caps[1].parse().map_err(|e: NftError| e.to_string())?;
        let kind: ObjectKind = caps[2].parse().map_err(|e: NftError| e.to_string())?;
        let family: Family = caps[3].parse().map_err(|e: NftError| e.to_string())?;
        let table = caps[4].to_string();
        let rest = caps.get(5).map(|m| m.as_str()).unwrap_or("");

        let object: Object = match kind {
            ObjectKind::Table => parse_table(family, table, rest)?.into(),
            ObjectKind::Chain => parse_chain(family, table, rest)?.into(),
            ObjectKind::Rule => parse_rule(family, table, rest)?.into(),
            ObjectKind::Set => parse_set(family, table, rest)?.into(),
            ObjectKind::Map => {
                let map = parse_map(family, table.clone(), rest)?;
                self.maps.insert((family, table, map.name.clone()));
                map.into()
            }
            ObjectKind::Element => self.parse_element(family, table, rest)?.into(),
            ObjectKind::Flowtable => parse_flowtable(family, table, rest)?.into(),
            ObjectKind::Counter => parse_counter(family, table, rest)?.into(),
        };

        Ok((verb, object))
    }

    fn parse_element(&self, family: Family, table: String, rest: &str) -> std::result::Result<Element, String> {
        let caps = ELEMENT_RE
            .captures(rest)
            .ok_or_else(|| format!("could not parse element {:?}", rest))?;
        let name = caps[1].to_string();
        let body = &caps[2];

        let mut element = Element {
            family: Some(family),
            table: Some(table.clone()),
            ..Element::default()
        };

        if let Some((key, comment, value)) = split_map_value(body) {
            element.map = Some(name);
            element.key = split(&key);
            element.comment = comment;
            element.value = split(&value);
        } else {
            let (key, comment) = split_comment(body);
            if self.maps.contains(&(family, table, name.clone())) {
                element.map = Some(name);
            } else {
                element.set = Some(name);
            }
            element.key = split(&key);
            element.comment = comment;
        }

        Ok(element)
    }
}

/// Parse dump text into a transaction, with no prior knowledge of existing maps
pub fn parse_dump(text: &str, config: &EngineConfig) -> Result<Transaction> {
    DumpParser::new(config).parse(text)
}

fn parse_handle(value: &str) -> std::result::Result<u64, String> {
    value
        .parse()
        .map_err(|_| format!("invalid handle {:?}", value))
}

/// `name`, `name { body }` or `handle N`
fn parse_name_and_body(rest: &str) -> std::result::Result<(String, Option<u64>, String), String> {
    if let Some(handle) = rest.strip_prefix("handle ") {
        return Ok((String::new(), Some(parse_handle(handle.trim())?), String::new()));
    }
    let caps = BODY_RE
        .captures(rest)
        .ok_or_else(|| format!("could not parse object {:?}", rest))?;
    let body = caps.get(2).map(|m| m.as_str().to_string()).unwrap_or_default();
    Ok((caps[1].to_string(), None, body))
}

/// Pull the `comment "..." ;` clause out of a braced body
fn take_comment(body: &str) -> (String, Option<String>) {
    match COMMENT_CLAUSE_RE.captures(body) {
        Some(caps) => (COMMENT_CLAUSE_RE.replace(body, "").trim().to_string(), Some(unescape(&caps[1]))),
        None => (body.to_string(), None),
    }
}

fn parse_table(family: Family, name: String, rest: &str) -> std::result::Result<Table, String> {
    // `delete table ip handle 5` puts "handle" in the table position
    if name == "handle" {
        return Ok(Table {
            family: Some(family),
            handle: Some(parse_handle(rest.trim())?),
            ..Table::default()
        });
    }

    let body = rest.trim().trim_start_matches('{').trim_end_matches('}');
    let (_, comment) = take_comment(body.trim());
    Ok(Table {
        family: Some(family),
        name: Some(name),
        comment,
        handle: None,
    })
}

fn parse_chain(family: Family, table: String, rest: &str) -> std::result::Result<Chain, String> {
    let (name, handle, body) = parse_name_and_body(rest)?;
    let (body, comment) = take_comment(&body);

    let mut chain = Chain {
        family: Some(family),
        table: Some(table),
        name,
        comment,
        handle,
        ..Chain::default()
    };

    if let Some(caps) = BASE_CHAIN_RE.captures(&body) {
        chain.chain_type = Some(caps[1].parse::<BaseChainType>().map_err(|e| e.to_string())?);
        chain.hook = Some(caps[2].parse::<BaseChainHook>().map_err(|e| e.to_string())?);
        chain.device = caps.get(3).map(|m| m.as_str().to_string());
        chain.priority = Some(caps[4].to_string());
    }

    Ok(chain)
}

fn parse_rule(family: Family, table: String, rest: &str) -> std::result::Result<Rule, String> {
    let (chain, mut remainder) = rest
        .split_once(' ')
        .map(|(chain, remainder)| (chain, remainder.trim()))
        .unwrap_or((rest, ""));
    if chain.is_empty() {
        return Err("no chain name for rule".to_string());
    }

    let mut rule = Rule {
        family: Some(family),
        table: Some(table),
        chain: chain.to_string(),
        ..Rule::default()
    };

    for keyword in ["index", "handle"] {
        let Some(after) = remainder.strip_prefix(keyword).and_then(|r| r.strip_prefix(' ')) else {
            continue;
        };
        let (value, tail) = after.split_once(' ').unwrap_or((after, ""));
        if keyword == "index" {
            rule.index = Some(value.parse().map_err(|_| format!("invalid index {:?}", value))?);
        } else {
            rule.handle = Some(parse_handle(value)?);
        }
        remainder = tail.trim();
        break;
    }

    let (body, comment) = split_comment(remainder);
    rule.rule = body;
    rule.comment = comment;
    Ok(rule)
}

fn parse_seconds(value: &str) -> std::result::Result<Duration, String> {
    let (digits, scale) = match value.char_indices().last() {
        Some((idx, 's')) => (&value[..idx], 1),
        Some((idx, 'm')) => (&value[..idx], 60),
        Some((idx, 'h')) => (&value[..idx], 3600),
        Some((idx, 'd')) => (&value[..idx], 86400),
        _ => (value, 1),
    };
    digits
        .parse::<u64>()
        .ok()
        .and_then(|n| n.checked_mul(scale))
        .map(Duration::from_secs)
        .ok_or_else(|| format!("invalid duration {:?}", value))
}

/// Fields shared by sets and maps
#[derive(Default)]
struct SetLikeClauses {
    type_: Option<String>,
    type_of: Option<String>,
    flags: Vec<String>,
    timeout: Option<Duration>,
    gc_interval: Option<Duration>,
    size: Option<u64>,
    policy: Option<SetPolicy>,
    auto_merge: Option<bool>,
    comment: Option<String>,
}

fn parse_set_like(body: &str) -> std::result::Result<SetLikeClauses, String> {
    let (body, comment) = take_comment(body);
    let mut clauses = SetLikeClauses {
        comment,
        ..SetLikeClauses::default()
    };

    for clause in body.split(';').map(str::trim).filter(|c| !c.is_empty()) {
        let (keyword, value) = clause.split_once(' ').unwrap_or((clause, ""));
        match keyword {
            "type" => clauses.type_ = Some(value.to_string()),
            "typeof" => clauses.type_of = Some(value.to_string()),
            "flags" => clauses.flags = value.split(',').map(|f| f.trim().to_string()).collect(),
            "timeout" => clauses.timeout = Some(parse_seconds(value)?),
            "gc-interval" => clauses.gc_interval = Some(parse_seconds(value)?),
            "size" => clauses.size = Some(value.parse().map_err(|_| format!("invalid size {:?}", value))?),
            "policy" => clauses.policy = Some(value.parse().map_err(|e: NftError| e.to_string())?),
            "auto-merge" => clauses.auto_merge = Some(true),
            other => return Err(format!("unknown set/map clause {:?}", other)),
        }
    }

    Ok(clauses)
}

fn parse_set(family: Family, table: String, rest: &str) -> std::result::Result<Set, String> {
    let (name, handle, body) = parse_name_and_body(rest)?;
    let clauses = parse_set_like(&body)?;
    Ok(Set {
        family: Some(family),
        table: Some(table),
        name,
        set_type: clauses.type_,
        type_of: clauses.type_of,
        flags: clauses.flags,
        timeout: clauses.timeout,
        gc_interval: clauses.gc_interval,
        size: clauses.size,
        policy: clauses.policy,
        auto_merge: clauses.auto_merge,
        comment: clauses.comment,
        handle,
    })
}

fn parse_map(family: Family, table: String, rest: &str) -> std::result::Result<Map, String> {
    let (name, handle, body) = parse_name_and_body(rest)?;
    let clauses = parse_set_like(&body)?;
    if clauses.auto_merge.is_some() {
        return Err("maps do not support auto-merge".to_string());
    }
    Ok(Map {
        family: Some(family),
        table: Some(table),
        name,
        map_type: clauses.type_,
        type_of: clauses.type_of,
        flags: clauses.flags,
        timeout: clauses.timeout,
        gc_interval: clauses.gc_interval,
        size: clauses.size,
        policy: clauses.policy,
        comment: clauses.comment,
        handle,
    })
}

fn parse_flowtable(family: Family, table: String, rest: &str) -> std::result::Result<Flowtable, String> {
    let (name, handle, body) = parse_name_and_body(rest)?;
    let devices = DEVICES_RE
        .captures(&body)
        .map(|caps| caps[1].split(',').map(|d| d.trim().to_string()).collect())
        .unwrap_or_default();

    Ok(Flowtable {
        family: Some(family),
        table: Some(table),
        name,
        priority: FLOWTABLE_RE.captures(&body).map(|caps| caps[1].to_string()),
        devices,
        handle,
    })
}

fn parse_counter(family: Family, table: String, rest: &str) -> std::result::Result<Counter, String> {
    let (name, handle, body) = parse_name_and_body(rest)?;
    let (body, comment) = take_comment(&body);
    let (packets, bytes) = match COUNTER_RE.captures(&body) {
        Some(caps) => (
            Some(caps[1].parse().map_err(|_| format!("invalid packet count {:?}", &caps[1]))?),
            Some(caps[2].parse().map_err(|_| format!("invalid byte count {:?}", &caps[2]))?),
        ),
        None => (None, None),
    };

    Ok(Counter {
        family: Some(family),
        table: Some(table),
        name,
        comment,
        packets,
        bytes,
        handle,
    })
}
