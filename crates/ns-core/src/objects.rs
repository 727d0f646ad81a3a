use crate::error::{NftError, Result};
use crate::types::{BaseChainHook, BaseChainType, Family, parse_priority};
use crate::util::{join, quote};
use crate::verb::Verb;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Write};
use std::str::FromStr;
use std::time::Duration;

/// The kinds of object a transaction can operate on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectKind {
    Table,
    Chain,
    Rule,
    Set,
    Map,
    Element,
    Flowtable,
    Counter,
}

impl ObjectKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Table => "table",
            Self::Chain => "chain",
            Self::Rule => "rule",
            Self::Set => "set",
            Self::Map => "map",
            Self::Element => "element",
            Self::Flowtable => "flowtable",
            Self::Counter => "counter",
        }
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ObjectKind {
    type Err = NftError;

    /// Accepts both singular and plural forms ("chain", "chains")
    fn from_str(s: &str) -> Result<Self> {
        let singular = s.strip_suffix('s').unwrap_or(s);
        match singular {
            "table" => Ok(Self::Table),
            "chain" => Ok(Self::Chain),
            "rule" => Ok(Self::Rule),
            "set" => Ok(Self::Set),
            "map" => Ok(Self::Map),
            "element" => Ok(Self::Element),
            "flowtable" => Ok(Self::Flowtable),
            "counter" => Ok(Self::Counter),
            _ => Err(NftError::validation(
                "object type",
                format!("unsupported object type {:?}", s),
            )),
        }
    }
}

/// Set/map lookup policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SetPolicy {
    Performance,
    Memory,
}

impl SetPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Performance => "performance",
            Self::Memory => "memory",
        }
    }
}

impl fmt::Display for SetPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SetPolicy {
    type Err = NftError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "performance" => Ok(Self::Performance),
            "memory" => Ok(Self::Memory),
            other => Err(NftError::validation("set", format!("unknown policy {:?}", other))),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Table {
    pub family: Option<Family>,
    pub name: Option<String>,
    pub comment: Option<String>,
    pub handle: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chain {
    pub family: Option<Family>,
    pub table: Option<String>,
    pub name: String,
    /// Base chains set `chain_type`, `hook` and `priority` together
    pub chain_type: Option<BaseChainType>,
    pub hook: Option<BaseChainHook>,
    pub priority: Option<String>,
    pub device: Option<String>,
    pub comment: Option<String>,
    pub handle: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    pub family: Option<Family>,
    pub table: Option<String>,
    pub chain: String,
    pub rule: String,
    pub comment: Option<String>,
    /// Position relative to an existing rule, by offset
    pub index: Option<usize>,
    /// Identity of an existing rule, or of this rule once committed
    pub handle: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Set {
    pub family: Option<Family>,
    pub table: Option<String>,
    pub name: String,
    pub set_type: Option<String>,
    pub type_of: Option<String>,
    pub flags: Vec<String>,
    pub timeout: Option<Duration>,
    pub gc_interval: Option<Duration>,
    pub size: Option<u64>,
    pub policy: Option<SetPolicy>,
    pub auto_merge: Option<bool>,
    pub comment: Option<String>,
    pub handle: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Map {
    pub family: Option<Family>,
    pub table: Option<String>,
    pub name: String,
    pub map_type: Option<String>,
    pub type_of: Option<String>,
    pub flags: Vec<String>,
    pub timeout: Option<Duration>,
    pub gc_interval: Option<Duration>,
    pub size: Option<u64>,
    pub policy: Option<SetPolicy>,
    pub comment: Option<String>,
    pub handle: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Element {
    pub family: Option<Family>,
    pub table: Option<String>,
    /// Exactly one of `set` and `map` names the container
    pub set: Option<String>,
    pub map: Option<String>,
    pub key: Vec<String>,
    pub value: Vec<String>,
    pub comment: Option<String>,
}

impl Element {
    /// Name of the containing set or map
    pub fn container(&self) -> &str {
        self.set.as_deref().or(self.map.as_deref()).unwrap_or("")
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Flowtable {
    pub family: Option<Family>,
    pub table: Option<String>,
    pub name: String,
    pub priority: Option<String>,
    pub devices: Vec<String>,
    pub handle: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counter {
    pub family: Option<Family>,
    pub table: Option<String>,
    pub name: String,
    pub comment: Option<String>,
    pub packets: Option<u64>,
    pub bytes: Option<u64>,
    pub handle: Option<u64>,
}

/// Any object a transaction operation can target
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Object {
    Table(Table),
    Chain(Chain),
    Rule(Rule),
    Set(Set),
    Map(Map),
    Element(Element),
    Flowtable(Flowtable),
    Counter(Counter),
}

macro_rules! object_from {
    ($($variant:ident),*) => {
        $(
            impl From<$variant> for Object {
                fn from(obj: $variant) -> Self {
                    Object::$variant(obj)
                }
            }
        )*
    };
}

object_from!(Table, Chain, Rule, Set, Map, Element, Flowtable, Counter);

fn not_implemented(verb: Verb, kind: ObjectKind) -> NftError {
    NftError::validation(kind.as_str(), format!("{} is not implemented for {}s", verb, kind))
}

fn forbid_handle(kind: ObjectKind, verb: Verb, handle: Option<u64>) -> Result<()> {
    if handle.is_some() {
        return Err(NftError::validation(
            kind.as_str(),
            format!("cannot specify Handle in {} operation", verb),
        ));
    }
    Ok(())
}

fn require_name(kind: ObjectKind, name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(NftError::validation(
            kind.as_str(),
            format!("no name specified for {}", kind),
        ));
    }
    Ok(())
}

/// `delete` accepts either a name or a handle; the other verbs need a name
fn require_name_or_handle(kind: ObjectKind, verb: Verb, name: &str, handle: Option<u64>) -> Result<()> {
    if verb == Verb::Delete && handle.is_some() {
        return Ok(());
    }
    require_name(kind, name)
}

fn fill_scope(family: &mut Option<Family>, table: &mut Option<String>, default_family: Option<Family>, default_table: Option<&str>) {
    if family.is_none() {
        *family = default_family;
    }
    if table.is_none() {
        *table = default_table.map(str::to_string);
    }
}

fn require_scope(kind: ObjectKind, family: Option<Family>, table: Option<&str>) -> Result<()> {
    if family.is_none() {
        return Err(NftError::validation(kind.as_str(), "no family specified"));
    }
    if table.is_none_or(str::is_empty) {
        return Err(NftError::validation(kind.as_str(), "no table specified"));
    }
    Ok(())
}

impl Object {
    pub fn kind(&self) -> ObjectKind {
        match self {
            Self::Table(_) => ObjectKind::Table,
            Self::Chain(_) => ObjectKind::Chain,
            Self::Rule(_) => ObjectKind::Rule,
            Self::Set(_) => ObjectKind::Set,
            Self::Map(_) => ObjectKind::Map,
            Self::Element(_) => ObjectKind::Element,
            Self::Flowtable(_) => ObjectKind::Flowtable,
            Self::Counter(_) => ObjectKind::Counter,
        }
    }

    pub fn family(&self) -> Option<Family> {
        match self {
            Self::Table(o) => o.family,
            Self::Chain(o) => o.family,
            Self::Rule(o) => o.family,
            Self::Set(o) => o.family,
            Self::Map(o) => o.family,
            Self::Element(o) => o.family,
            Self::Flowtable(o) => o.family,
            Self::Counter(o) => o.family,
        }
    }

    /// Name of the table the object lives in (for a table, its own name)
    pub fn table_name(&self) -> Option<&str> {
        match self {
            Self::Table(o) => o.name.as_deref(),
            Self::Chain(o) => o.table.as_deref(),
            Self::Rule(o) => o.table.as_deref(),
            Self::Set(o) => o.table.as_deref(),
            Self::Map(o) => o.table.as_deref(),
            Self::Element(o) => o.table.as_deref(),
            Self::Flowtable(o) => o.table.as_deref(),
            Self::Counter(o) => o.table.as_deref(),
        }
    }

    /// Fill in a missing family/table from the engine's binding
    pub fn apply_defaults(&mut self, family: Option<Family>, table: Option<&str>) {
        match self {
            Self::Table(o) => fill_scope(&mut o.family, &mut o.name, family, table),
            Self::Chain(o) => fill_scope(&mut o.family, &mut o.table, family, table),
            Self::Rule(o) => fill_scope(&mut o.family, &mut o.table, family, table),
            Self::Set(o) => fill_scope(&mut o.family, &mut o.table, family, table),
            Self::Map(o) => fill_scope(&mut o.family, &mut o.table, family, table),
            Self::Element(o) => fill_scope(&mut o.family, &mut o.table, family, table),
            Self::Flowtable(o) => fill_scope(&mut o.family, &mut o.table, family, table),
            Self::Counter(o) => fill_scope(&mut o.family, &mut o.table, family, table),
        }
    }

    /// Check that the object is well-formed for `verb`
    pub fn validate(&self, verb: Verb) -> Result<()> {
        match self {
            // a table deleted by handle needs no name
            Self::Table(t) if verb == Verb::Delete && t.handle.is_some() => {
                if t.family.is_none() {
                    return Err(NftError::validation("table", "no family specified"));
                }
            }
            _ => require_scope(self.kind(), self.family(), self.table_name())?,
        }
        match self {
            Self::Table(o) => o.validate(verb),
            Self::Chain(o) => o.validate(verb),
            Self::Rule(o) => o.validate(verb),
            Self::Set(o) => o.validate(verb),
            Self::Map(o) => o.validate(verb),
            Self::Element(o) => o.validate(verb),
            Self::Flowtable(o) => o.validate(verb),
            Self::Counter(o) => o.validate(verb),
        }
    }

    /// Write the canonical nft command for `verb` on this object, newline-terminated
    pub fn write_operation(&self, verb: Verb, out: &mut impl Write) -> fmt::Result {
        match self {
            Self::Table(o) => o.write_operation(verb, out),
            Self::Chain(o) => o.write_operation(verb, out),
            Self::Rule(o) => o.write_operation(verb, out),
            Self::Set(o) => o.write_operation(verb, out),
            Self::Map(o) => o.write_operation(verb, out),
            Self::Element(o) => o.write_operation(verb, out),
            Self::Flowtable(o) => o.write_operation(verb, out),
            Self::Counter(o) => o.write_operation(verb, out),
        }
    }

    pub fn to_command(&self, verb: Verb) -> String {
        let mut out = String::new();
        // writing into a String cannot fail
        let _ = self.write_operation(verb, &mut out);
        out
    }
}

fn family_str(family: Option<Family>) -> &'static str {
    family.map(|f| f.as_str()).unwrap_or("")
}

impl Table {
    fn validate(&self, verb: Verb) -> Result<()> {
        match verb {
            Verb::Add | Verb::Create | Verb::Flush | Verb::Destroy => {
                forbid_handle(ObjectKind::Table, verb, self.handle)
            }
            Verb::Delete => Ok(()),
            _ => Err(not_implemented(verb, ObjectKind::Table)),
        }
    }

    fn write_operation(&self, verb: Verb, out: &mut impl Write) -> fmt::Result {
        let family = family_str(self.family);
        if let (Verb::Delete, Some(handle)) = (verb, self.handle) {
            return writeln!(out, "delete table {} handle {}", family, handle);
        }

        write!(out, "{} table {} {}", verb, family, self.name.as_deref().unwrap_or(""))?;
        if matches!(verb, Verb::Add | Verb::Create) {
            if let Some(comment) = &self.comment {
                write!(out, " {{ comment {} ; }}", quote(comment))?;
            }
        }
        writeln!(out)
    }
}

impl Chain {
    pub fn is_base_chain(&self) -> bool {
        self.hook.is_some()
    }

    fn validate(&self, verb: Verb) -> Result<()> {
        let kind = ObjectKind::Chain;

        if self.hook.is_none() && (self.chain_type.is_some() || self.priority.is_some()) {
            return Err(NftError::validation(
                kind.as_str(),
                format!("regular chain {:?} must not specify Type or Priority", self.name),
            ));
        }
        if self.hook.is_some() && (self.chain_type.is_none() || self.priority.is_none()) {
            return Err(NftError::validation(
                kind.as_str(),
                format!("base chain {:?} must specify Type and Priority", self.name),
            ));
        }
        if self.device.is_some() && !self.hook.is_some_and(|h| h.takes_device()) {
            return Err(NftError::validation(
                kind.as_str(),
                format!("chain {:?} may only specify Device with the ingress or egress hook", self.name),
            ));
        }
        if let (Some(priority), Some(family)) = (&self.priority, self.family) {
            parse_priority(family, priority).map_err(|e| {
                NftError::validation(kind.as_str(), format!("invalid base chain priority: {}", e))
            })?;
        }

        match verb {
            Verb::Add | Verb::Create | Verb::Flush | Verb::Destroy => {
                require_name(kind, &self.name)?;
                forbid_handle(kind, verb, self.handle)
            }
            Verb::Delete => require_name_or_handle(kind, verb, &self.name, self.handle),
            _ => Err(not_implemented(verb, kind)),
        }
    }

    fn write_operation(&self, verb: Verb, out: &mut impl Write) -> fmt::Result {
        let family = family_str(self.family);
        let table = self.table.as_deref().unwrap_or("");
        if let (Verb::Delete, Some(handle)) = (verb, self.handle) {
            return writeln!(out, "delete chain {} {} handle {}", family, table, handle);
        }

        write!(out, "{} chain {} {} {}", verb, family, table, self.name)?;
        if matches!(verb, Verb::Add | Verb::Create) && (self.hook.is_some() || self.comment.is_some()) {
            write!(out, " {{")?;
            if let (Some(chain_type), Some(hook), Some(priority)) =
                (self.chain_type, self.hook, &self.priority)
            {
                write!(out, " type {} hook {}", chain_type, hook)?;
                if let Some(device) = &self.device {
                    write!(out, " device {}", quote(device))?;
                }
                write!(out, " priority {} ;", priority)?;
            }
            if let Some(comment) = &self.comment {
                write!(out, " comment {} ;", quote(comment))?;
            }
            write!(out, " }}")?;
        }
        writeln!(out)
    }
}

impl Rule {
    fn validate(&self, verb: Verb) -> Result<()> {
        let kind = ObjectKind::Rule;
        if self.chain.is_empty() {
            return Err(NftError::validation(kind.as_str(), "no chain name specified for rule"));
        }
        if self.index.is_some() && self.handle.is_some() {
            return Err(NftError::validation(kind.as_str(), "cannot specify both Index and Handle"));
        }

        match verb {
            Verb::Add | Verb::Insert => self.require_body(),
            Verb::Replace => {
                self.require_body()?;
                self.require_handle(verb)
            }
            Verb::Delete => self.require_handle(verb),
            _ => Err(not_implemented(verb, kind)),
        }
    }

    fn require_body(&self) -> Result<()> {
        if self.rule.is_empty() {
            return Err(NftError::validation("rule", "no rule specified"));
        }
        Ok(())
    }

    fn require_handle(&self, verb: Verb) -> Result<()> {
        if self.handle.is_none() {
            return Err(NftError::validation("rule", format!("must specify Handle with {}", verb)));
        }
        Ok(())
    }

    fn write_operation(&self, verb: Verb, out: &mut impl Write) -> fmt::Result {
        write!(
            out,
            "{} rule {} {} {}",
            verb,
            family_str(self.family),
            self.table.as_deref().unwrap_or(""),
            self.chain
        )?;
        if let Some(index) = self.index {
            write!(out, " index {}", index)?;
        } else if let Some(handle) = self.handle {
            write!(out, " handle {}", handle)?;
        }

        if matches!(verb, Verb::Add | Verb::Insert | Verb::Replace) {
            write!(out, " {}", self.rule)?;
            if let Some(comment) = &self.comment {
                write!(out, " comment {}", quote(comment))?;
            }
        }
        writeln!(out)
    }
}

/// Validation shared by sets and maps
fn validate_set_like(
    kind: ObjectKind,
    verb: Verb,
    name: &str,
    type_: Option<&str>,
    type_of: Option<&str>,
    handle: Option<u64>,
) -> Result<()> {
    match verb {
        Verb::Add | Verb::Create | Verb::Destroy => {
            require_name(kind, name)?;
            if type_.is_some() == type_of.is_some() {
                return Err(NftError::validation(
                    kind.as_str(),
                    format!("{} must specify either Type or TypeOf", kind),
                ));
            }
            forbid_handle(kind, verb, handle)
        }
        Verb::Flush => {
            require_name(kind, name)?;
            forbid_handle(kind, verb, handle)
        }
        Verb::Delete => require_name_or_handle(kind, verb, name, handle),
        _ => Err(not_implemented(verb, kind)),
    }
}

/// Body clauses shared by sets and maps
struct SetLikeBody<'a> {
    type_: Option<&'a str>,
    type_of: Option<&'a str>,
    flags: &'a [String],
    timeout: Option<Duration>,
    gc_interval: Option<Duration>,
    size: Option<u64>,
    policy: Option<SetPolicy>,
    auto_merge: bool,
    comment: Option<&'a str>,
}

impl SetLikeBody<'_> {
    fn write(&self, out: &mut impl Write) -> fmt::Result {
        write!(out, " {{")?;
        if let Some(type_) = self.type_ {
            write!(out, " type {} ;", type_)?;
        } else if let Some(type_of) = self.type_of {
            write!(out, " typeof {} ;", type_of)?;
        }
        if !self.flags.is_empty() {
            write!(out, " flags {} ;", self.flags.join(","))?;
        }
        if let Some(timeout) = self.timeout {
            write!(out, " timeout {}s ;", timeout.as_secs())?;
        }
        if let Some(gc_interval) = self.gc_interval {
            write!(out, " gc-interval {}s ;", gc_interval.as_secs())?;
        }
        if let Some(size) = self.size {
            write!(out, " size {} ;", size)?;
        }
        if let Some(policy) = self.policy {
            write!(out, " policy {} ;", policy)?;
        }
        if self.auto_merge {
            write!(out, " auto-merge ;")?;
        }
        if let Some(comment) = self.comment {
            write!(out, " comment {} ;", quote(comment))?;
        }
        write!(out, " }}")
    }
}

impl Set {
    fn validate(&self, verb: Verb) -> Result<()> {
        validate_set_like(
            ObjectKind::Set,
            verb,
            &self.name,
            self.set_type.as_deref(),
            self.type_of.as_deref(),
            self.handle,
        )
    }

    fn write_operation(&self, verb: Verb, out: &mut impl Write) -> fmt::Result {
        let family = family_str(self.family);
        let table = self.table.as_deref().unwrap_or("");
        if let (Verb::Delete, Some(handle)) = (verb, self.handle) {
            return writeln!(out, "delete set {} {} handle {}", family, table, handle);
        }

        write!(out, "{} set {} {} {}", verb, family, table, self.name)?;
        if matches!(verb, Verb::Add | Verb::Create) {
            SetLikeBody {
                type_: self.set_type.as_deref(),
                type_of: self.type_of.as_deref(),
                flags: &self.flags,
                timeout: self.timeout,
                gc_interval: self.gc_interval,
                size: self.size,
                policy: self.policy,
                auto_merge: self.auto_merge.unwrap_or(false),
                comment: self.comment.as_deref(),
            }
            .write(out)?;
        }
        writeln!(out)
    }
}

impl Map {
    fn validate(&self, verb: Verb) -> Result<()> {
        validate_set_like(
            ObjectKind::Map,
            verb,
            &self.name,
            self.map_type.as_deref(),
            self.type_of.as_deref(),
            self.handle,
        )
    }

    fn write_operation(&self, verb: Verb, out: &mut impl Write) -> fmt::Result {
        let family = family_str(self.family);
        let table = self.table.as_deref().unwrap_or("");
        if let (Verb::Delete, Some(handle)) = (verb, self.handle) {
            return writeln!(out, "delete map {} {} handle {}", family, table, handle);
        }

        write!(out, "{} map {} {} {}", verb, family, table, self.name)?;
        if matches!(verb, Verb::Add | Verb::Create) {
            SetLikeBody {
                type_: self.map_type.as_deref(),
                type_of: self.type_of.as_deref(),
                flags: &self.flags,
                timeout: self.timeout,
                gc_interval: self.gc_interval,
                size: self.size,
                policy: self.policy,
                auto_merge: false,
                comment: self.comment.as_deref(),
            }
            .write(out)?;
        }
        writeln!(out)
    }
}

impl Element {
    fn validate(&self, verb: Verb) -> Result<()> {
        let kind = ObjectKind::Element;
        match (&self.set, &self.map) {
            (Some(_), Some(_)) => {
                return Err(NftError::validation(kind.as_str(), "must specify either Set or Map, not both"));
            }
            (None, None) => {
                return Err(NftError::validation(kind.as_str(), "no set/map name specified for element"));
            }
            _ => {}
        }
        if self.container().is_empty() {
            return Err(NftError::validation(kind.as_str(), "no set/map name specified for element"));
        }
        if self.key.is_empty() {
            return Err(NftError::validation(kind.as_str(), "no key specified for element"));
        }

        match verb {
            Verb::Add | Verb::Create | Verb::Destroy => {
                if self.map.is_some() && self.value.is_empty() {
                    return Err(NftError::validation(kind.as_str(), "no map value specified for element"));
                }
                if self.set.is_some() && !self.value.is_empty() {
                    return Err(NftError::validation(kind.as_str(), "set element cannot have a value"));
                }
                Ok(())
            }
            Verb::Delete => Ok(()),
            _ => Err(not_implemented(verb, kind)),
        }
    }

    fn write_operation(&self, verb: Verb, out: &mut impl Write) -> fmt::Result {
        write!(
            out,
            "{} element {} {} {} {{ {}",
            verb,
            family_str(self.family),
            self.table.as_deref().unwrap_or(""),
            self.container(),
            join(&self.key)
        )?;

        if matches!(verb, Verb::Add | Verb::Create) {
            if let Some(comment) = &self.comment {
                write!(out, " comment {}", quote(comment))?;
            }
            if !self.value.is_empty() {
                write!(out, " : {}", join(&self.value))?;
            }
        }
        writeln!(out, " }}")
    }
}

impl Flowtable {
    fn validate(&self, verb: Verb) -> Result<()> {
        let kind = ObjectKind::Flowtable;
        if let (Some(priority), Some(family)) = (&self.priority, self.family) {
            parse_priority(family, priority).map_err(|e| {
                NftError::validation(kind.as_str(), format!("invalid flowtable priority: {}", e))
            })?;
        }

        match verb {
            Verb::Add | Verb::Create | Verb::Destroy => {
                require_name(kind, &self.name)?;
                forbid_handle(kind, verb, self.handle)
            }
            Verb::Delete => require_name_or_handle(kind, verb, &self.name, self.handle),
            _ => Err(not_implemented(verb, kind)),
        }
    }

    fn write_operation(&self, verb: Verb, out: &mut impl Write) -> fmt::Result {
        let family = family_str(self.family);
        let table = self.table.as_deref().unwrap_or("");
        if let (Verb::Delete, Some(handle)) = (verb, self.handle) {
            return writeln!(out, "delete flowtable {} {} handle {}", family, table, handle);
        }

        write!(out, "{} flowtable {} {} {}", verb, family, table, self.name)?;
        if matches!(verb, Verb::Add | Verb::Create) {
            write!(out, " {{")?;
            // ingress is the only hook flowtables support
            if let Some(priority) = &self.priority {
                write!(out, " hook ingress priority {} ;", priority)?;
            }
            if !self.devices.is_empty() {
                write!(out, " devices = {{ {} }} ;", self.devices.join(", "))?;
            }
            write!(out, " }}")?;
        }
        writeln!(out)
    }
}

impl Counter {
    fn validate(&self, verb: Verb) -> Result<()> {
        let kind = ObjectKind::Counter;
        match verb {
            Verb::Add | Verb::Create | Verb::Destroy | Verb::Reset => {
                require_name(kind, &self.name)?;
                forbid_handle(kind, verb, self.handle)
            }
            Verb::Delete => require_name_or_handle(kind, verb, &self.name, self.handle),
            _ => Err(not_implemented(verb, kind)),
        }
    }

    fn write_operation(&self, verb: Verb, out: &mut impl Write) -> fmt::Result {
        let family = family_str(self.family);
        let table = self.table.as_deref().unwrap_or("");
        if let (Verb::Delete, Some(handle)) = (verb, self.handle) {
            return writeln!(out, "delete counter {} {} handle {}", family, table, handle);
        }

        write!(out, "{} counter {} {} {}", verb, family, table, self.name)?;
        if matches!(verb, Verb::Add | Verb::Create)
            && (self.packets.is_some() || self.bytes.is_some() || self.comment.is_some())
        {
            write!(out, " {{")?;
            if self.packets.is_some() || self.bytes.is_some() {
                write!(
                    out,
                    " packets {} bytes {} ;",
                    self.packets.unwrap_or(0),
                    self.bytes.unwrap_or(0)
                )?;
            }
            if let Some(comment) = &self.comment {
                write!(out, " comment {} ;", quote(comment))?;
            }
            write!(out, " }}")?;
        }
        writeln!(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scoped(mut obj: Object) -> Object {
        obj.apply_defaults(Some(Family::Ip), Some("mytable"));
        obj
    }

    fn base_chain() -> Chain {
        Chain {
            name: "mychain".into(),
            chain_type: Some(BaseChainType::Nat),
            hook: Some(BaseChainHook::Postrouting),
            priority: Some("srcnat".into()),
            ..Default::default()
        }
    }

    #[test]
    fn test_validate() {
        let cases: Vec<(&str, Verb, Object, Option<&str>)> = vec![
            // Tables
            ("add table", Verb::Add, Table::default().into(), None),
            ("add table with comment", Verb::Add, Table { comment: Some("foo".into()), ..Default::default() }.into(), None),
            ("flush table", Verb::Flush, Table::default().into(), None),
            ("delete table by handle", Verb::Delete, Table { handle: Some(5), ..Default::default() }.into(), None),
            ("invalid add table", Verb::Add, Table { handle: Some(5), ..Default::default() }.into(), Some("cannot specify Handle")),
            ("invalid insert table", Verb::Insert, Table::default().into(), Some("not implemented")),
            // Chains
            ("add chain", Verb::Add, Chain { name: "mychain".into(), ..Default::default() }.into(), None),
            ("add base chain", Verb::Add, base_chain().into(), None),
            (
                "add ingress chain with device",
                Verb::Add,
                Chain {
                    name: "ing".into(),
                    chain_type: Some(BaseChainType::Filter),
                    hook: Some(BaseChainHook::Ingress),
                    priority: Some("filter".into()),
                    device: Some("eth0".into()),
                    ..Default::default()
                }
                .into(),
                None,
            ),
            (
                "invalid device on postrouting chain",
                Verb::Add,
                Chain { device: Some("eth0".into()), ..base_chain() }.into(),
                Some("Device"),
            ),
            ("delete chain by handle (without name)", Verb::Delete, Chain { handle: Some(5), ..Default::default() }.into(), None),
            ("invalid add chain without name", Verb::Add, Chain::default().into(), Some("no name")),
            ("invalid add chain with handle", Verb::Add, Chain { name: "c".into(), handle: Some(5), ..Default::default() }.into(), Some("cannot specify Handle")),
            ("invalid destroy chain by handle", Verb::Destroy, Chain { handle: Some(5), ..Default::default() }.into(), Some("no name specified")),
            (
                "invalid base chain with no Type",
                Verb::Add,
                Chain { chain_type: None, ..base_chain() }.into(),
                Some("must specify Type and Priority"),
            ),
            (
                "invalid regular chain with Priority",
                Verb::Add,
                Chain { name: "c".into(), priority: Some("srcnat".into()), ..Default::default() }.into(),
                Some("must not specify Type or Priority"),
            ),
            (
                "invalid base chain priority",
                Verb::Add,
                Chain { priority: Some("blah".into()), ..base_chain() }.into(),
                Some("invalid base chain priority"),
            ),
            // Rules
            ("add rule", Verb::Add, Rule { chain: "c".into(), rule: "drop".into(), ..Default::default() }.into(), None),
            ("add rule relative to index", Verb::Add, Rule { chain: "c".into(), rule: "drop".into(), index: Some(2), ..Default::default() }.into(), None),
            ("insert rule relative to handle", Verb::Insert, Rule { chain: "c".into(), rule: "drop".into(), handle: Some(2), ..Default::default() }.into(), None),
            ("replace rule", Verb::Replace, Rule { chain: "c".into(), rule: "drop".into(), handle: Some(2), ..Default::default() }.into(), None),
            ("delete rule without body", Verb::Delete, Rule { chain: "c".into(), handle: Some(2), ..Default::default() }.into(), None),
            ("invalid flush rule", Verb::Flush, Rule { chain: "c".into(), rule: "drop".into(), ..Default::default() }.into(), Some("not implemented")),
            ("invalid create rule", Verb::Create, Rule { chain: "c".into(), rule: "drop".into(), ..Default::default() }.into(), Some("not implemented")),
            ("invalid add rule with no chain", Verb::Add, Rule { rule: "drop".into(), ..Default::default() }.into(), Some("no chain name")),
            ("invalid add rule with no body", Verb::Add, Rule { chain: "c".into(), ..Default::default() }.into(), Some("no rule")),
            (
                "invalid add rule with both Index and Handle",
                Verb::Add,
                Rule { chain: "c".into(), rule: "drop".into(), index: Some(2), handle: Some(5), ..Default::default() }.into(),
                Some("both Index and Handle"),
            ),
            ("invalid replace rule with no handle", Verb::Replace, Rule { chain: "c".into(), rule: "drop".into(), ..Default::default() }.into(), Some("must specify Handle")),
            ("invalid delete rule with no handle", Verb::Delete, Rule { chain: "c".into(), ..Default::default() }.into(), Some("must specify Handle")),
            // Sets and maps
            ("add set", Verb::Add, Set { name: "s".into(), set_type: Some("ipv4_addr".into()), ..Default::default() }.into(), None),
            ("flush set with extraneous type", Verb::Flush, Set { name: "s".into(), set_type: Some("ipv4_addr".into()), ..Default::default() }.into(), None),
            ("delete set by handle without name", Verb::Delete, Set { handle: Some(5), ..Default::default() }.into(), None),
            ("invalid add set without type", Verb::Add, Set { name: "s".into(), ..Default::default() }.into(), Some("must specify either Type or TypeOf")),
            (
                "invalid add set with both type and typeof",
                Verb::Add,
                Set { name: "s".into(), set_type: Some("ipv4_addr".into()), type_of: Some("ip addr".into()), ..Default::default() }.into(),
                Some("must specify either Type or TypeOf"),
            ),
            ("invalid destroy map without type", Verb::Destroy, Map { name: "m".into(), ..Default::default() }.into(), Some("must specify either Type or TypeOf")),
            ("invalid destroy map by handle", Verb::Destroy, Map { handle: Some(5), ..Default::default() }.into(), Some("no name specified for map")),
            // Elements
            ("add set element", Verb::Add, Element { set: Some("s".into()), key: vec!["10.0.0.1".into()], ..Default::default() }.into(), None),
            (
                "add map element",
                Verb::Add,
                Element { map: Some("m".into()), key: vec!["10.0.0.1".into()], value: vec!["drop".into()], ..Default::default() }.into(),
                None,
            ),
            ("delete map element without value", Verb::Delete, Element { map: Some("m".into()), key: vec!["10.0.0.1".into()], ..Default::default() }.into(), None),
            ("invalid element with no container", Verb::Add, Element { key: vec!["10.0.0.1".into()], ..Default::default() }.into(), Some("no set/map name")),
            (
                "invalid element with set and map",
                Verb::Add,
                Element { set: Some("s".into()), map: Some("m".into()), key: vec!["1".into()], ..Default::default() }.into(),
                Some("not both"),
            ),
            ("invalid element with no key", Verb::Add, Element { set: Some("s".into()), ..Default::default() }.into(), Some("no key")),
            ("invalid map element with no value", Verb::Add, Element { map: Some("m".into()), key: vec!["1".into()], ..Default::default() }.into(), Some("no map value")),
            ("invalid flush element", Verb::Flush, Element { set: Some("s".into()), key: vec!["1".into()], ..Default::default() }.into(), Some("not implemented")),
            // Flowtables and counters
            ("add flowtable", Verb::Add, Flowtable { name: "ft".into(), priority: Some("filter".into()), ..Default::default() }.into(), None),
            ("invalid flush flowtable", Verb::Flush, Flowtable { name: "ft".into(), ..Default::default() }.into(), Some("not implemented")),
            ("reset counter", Verb::Reset, Counter { name: "cnt".into(), ..Default::default() }.into(), None),
            ("delete counter by handle", Verb::Delete, Counter { handle: Some(3), ..Default::default() }.into(), None),
            ("invalid flush counter", Verb::Flush, Counter { name: "cnt".into(), ..Default::default() }.into(), Some("not implemented")),
        ];

        for (name, verb, object, expected) in cases {
            let result = scoped(object).validate(verb);
            match (result, expected) {
                (Ok(()), None) => {}
                (Ok(()), Some(msg)) => panic!("{}: expected error with {:?} but got none", name, msg),
                (Err(e), None) => panic!("{}: expected no error but got {}", name, e),
                (Err(e), Some(msg)) => assert!(
                    e.to_string().contains(msg),
                    "{}: expected error with {:?} but got {}",
                    name,
                    msg,
                    e
                ),
            }
        }
    }

    #[test]
    fn test_missing_scope_is_rejected() {
        let obj: Object = Chain { name: "c".into(), ..Default::default() }.into();
        let err = obj.validate(Verb::Add).unwrap_err();
        assert!(err.to_string().contains("no family"));
    }

    #[test]
    fn test_write_operations() {
        let cases: Vec<(Verb, Object, &str)> = vec![
            (Verb::Add, Table { comment: Some("managed".into()), ..Default::default() }.into(), "add table ip mytable { comment \"managed\" ; }\n"),
            (Verb::Delete, Table { handle: Some(4), ..Default::default() }.into(), "delete table ip handle 4\n"),
            (Verb::Destroy, Table::default().into(), "destroy table ip mytable\n"),
            (
                Verb::Add,
                Chain { comment: Some("foo".into()), ..base_chain() }.into(),
                "add chain ip mytable mychain { type nat hook postrouting priority srcnat ; comment \"foo\" ; }\n",
            ),
            (
                Verb::Add,
                Chain {
                    name: "ing".into(),
                    chain_type: Some(BaseChainType::Filter),
                    hook: Some(BaseChainHook::Ingress),
                    priority: Some("-150".into()),
                    device: Some("eth0".into()),
                    ..Default::default()
                }
                .into(),
                "add chain ip mytable ing { type filter hook ingress device \"eth0\" priority -150 ; }\n",
            ),
            (Verb::Flush, Chain { comment: Some("x".into()), ..base_chain() }.into(), "flush chain ip mytable mychain\n"),
            (Verb::Delete, Chain { handle: Some(9), ..Default::default() }.into(), "delete chain ip mytable handle 9\n"),
            (
                Verb::Insert,
                Rule { chain: "c".into(), rule: "masquerade".into(), comment: Some("snat".into()), index: Some(2), ..Default::default() }.into(),
                "insert rule ip mytable c index 2 masquerade comment \"snat\"\n",
            ),
            (
                Verb::Delete,
                Rule { chain: "c".into(), rule: "drop".into(), handle: Some(7), ..Default::default() }.into(),
                "delete rule ip mytable c handle 7\n",
            ),
            (
                Verb::Add,
                Set {
                    name: "s".into(),
                    set_type: Some("ipv4_addr".into()),
                    flags: vec!["interval".into(), "timeout".into()],
                    timeout: Some(Duration::from_secs(3600)),
                    gc_interval: Some(Duration::from_secs(60)),
                    size: Some(1024),
                    policy: Some(SetPolicy::Memory),
                    auto_merge: Some(true),
                    comment: Some("blocked".into()),
                    ..Default::default()
                }
                .into(),
                "add set ip mytable s { type ipv4_addr ; flags interval,timeout ; timeout 3600s ; gc-interval 60s ; size 1024 ; policy memory ; auto-merge ; comment \"blocked\" ; }\n",
            ),
            (
                Verb::Add,
                Map { name: "m".into(), type_of: Some("ip daddr : verdict".into()), ..Default::default() }.into(),
                "add map ip mytable m { typeof ip daddr : verdict ; }\n",
            ),
            (
                Verb::Add,
                Element {
                    map: Some("m".into()),
                    key: vec!["192.168.0.2".into(), "tcp".into(), "443".into()],
                    value: vec!["goto anotherchain".into()],
                    comment: Some("with a comment".into()),
                    ..Default::default()
                }
                .into(),
                "add element ip mytable m { 192.168.0.2 . tcp . 443 comment \"with a comment\" : goto anotherchain }\n",
            ),
            (
                Verb::Delete,
                Element { map: Some("m".into()), key: vec!["10.0.0.1".into()], value: vec!["drop".into()], ..Default::default() }.into(),
                "delete element ip mytable m { 10.0.0.1 }\n",
            ),
            (
                Verb::Add,
                Flowtable { name: "ft".into(), priority: Some("filter".into()), devices: vec!["eth0".into(), "eth1".into()], ..Default::default() }.into(),
                "add flowtable ip mytable ft { hook ingress priority filter ; devices = { eth0, eth1 } ; }\n",
            ),
            (
                Verb::Add,
                Counter { name: "cnt".into(), packets: Some(10), comment: Some("web".into()), ..Default::default() }.into(),
                "add counter ip mytable cnt { packets 10 bytes 0 ; comment \"web\" ; }\n",
            ),
            (Verb::Reset, Counter { name: "cnt".into(), packets: Some(10), ..Default::default() }.into(), "reset counter ip mytable cnt\n"),
        ];

        for (verb, object, expected) in cases {
            assert_eq!(scoped(object).to_command(verb), expected);
        }
    }

    #[test]
    fn test_object_kind_from_str() {
        assert_eq!("chains".parse::<ObjectKind>().unwrap(), ObjectKind::Chain);
        assert_eq!("set".parse::<ObjectKind>().unwrap(), ObjectKind::Set);
        assert_eq!("counters".parse::<ObjectKind>().unwrap(), ObjectKind::Counter);
        assert!("quota".parse::<ObjectKind>().is_err());
    }
}
