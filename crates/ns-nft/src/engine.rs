use crate::dump::{DumpParser, dump};
use crate::state::{HandleAllocator, Ruleset, TableState};
use crate::status::TableStatus;
use ns_core::{
    Counter, Define, Element, EngineConfig, Family, NftError, ObjectKind, Result, Rule, Table,
    Transaction,
};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

#[derive(Debug, Default)]
struct EngineState {
    ruleset: Ruleset,
    last_transaction: Option<Transaction>,
}

/// In-memory nftables: runs transactions atomically against a private ruleset
#[derive(Debug)]
pub struct Engine {
    config: EngineConfig,
    defines: Vec<Define>,
    handles: HandleAllocator,
    state: RwLock<EngineState>,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        let defines = config.effective_defines();
        Self {
            config,
            defines,
            handles: HandleAllocator::new(),
            state: RwLock::new(EngineState::default()),
        }
    }

    /// Engine bound to a single table, as most callers use it
    pub fn for_table(family: Family, table: impl Into<String>) -> Self {
        Self::new(EngineConfig::for_table(family, table))
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// A transaction that inherits this engine's family/table and destroy handling
    pub fn new_transaction(&self) -> Transaction {
        Transaction::for_config(&self.config)
    }

    /// Apply `tx` and publish the result, or leave the state untouched on any error
    pub async fn run(&self, tx: &Transaction) -> Result<()> {
        if let Some(err) = tx.err() {
            warn!("rejecting invalid transaction: {}", err);
            return Err(err.clone());
        }

        let mut state = self.state.write().await;
        state.last_transaction = Some(tx.clone());

        let mut working = state.ruleset.clone();
        if let Err(err) = working.apply(tx, &self.defines, &self.handles) {
            warn!("transaction failed, no changes made: {}", err);
            return Err(err);
        }

        state.ruleset = working;
        info!("committed transaction with {} operations", tx.num_operations());
        Ok(())
    }

    /// Apply `tx` to a throwaway copy of the state, reporting what `run` would report
    pub async fn check(&self, tx: &Transaction) -> Result<()> {
        if let Some(err) = tx.err() {
            return Err(err.clone());
        }

        let state = self.state.read().await;
        let mut working = state.ruleset.clone();
        working.apply(tx, &self.defines, &self.handles)?;
        debug!("check passed for {} operations", tx.num_operations());
        Ok(())
    }

    /// The last transaction passed to `run`, whether or not it succeeded
    pub async fn last_transaction(&self) -> Option<Transaction> {
        self.state.read().await.last_transaction.clone()
    }

    /// The most recently handed out object handle
    pub fn last_handle(&self) -> u64 {
        self.handles.last()
    }

    /// A copy of the committed ruleset
    pub async fn snapshot(&self) -> Ruleset {
        self.state.read().await.ruleset.clone()
    }

    fn bound_table(&self) -> Result<(Family, &str)> {
        match (self.config.family, self.config.table.as_deref()) {
            (Some(family), Some(table)) => Ok((family, table)),
            _ => Err(NftError::validation("engine", "not bound to a table")),
        }
    }

    async fn with_table<T>(&self, f: impl FnOnce(&TableState) -> Result<T>) -> Result<T> {
        let (family, name) = self.bound_table()?;
        let state = self.state.read().await;
        let table = state
            .ruleset
            .table(family, name)
            .ok_or_else(|| NftError::not_found(format!("no such table \"{} {}\"", family, name)))?;
        f(table)
    }

    /// Names of the objects of one kind ("chains", "sets", "maps", "flowtables", "counters")
    pub async fn list(&self, kind: &str) -> Result<Vec<String>> {
        let kind: ObjectKind = kind.parse()?;
        self.with_table(|table| {
            let names: Vec<String> = match kind {
                ObjectKind::Chain => table.chains.keys().cloned().collect(),
                ObjectKind::Set => table.sets.keys().cloned().collect(),
                ObjectKind::Map => table.maps.keys().cloned().collect(),
                ObjectKind::Flowtable => table.flowtables.keys().cloned().collect(),
                ObjectKind::Counter => table.counters.keys().cloned().collect(),
                other => {
                    return Err(NftError::validation(
                        "object type",
                        format!("unsupported object type {:?}", other.as_str()),
                    ));
                }
            };
            Ok(names)
        })
        .await
    }

    /// Rules of `chain` in order, with their handles
    pub async fn list_rules(&self, chain: &str) -> Result<Vec<Rule>> {
        self.with_table(|table| {
            table
                .chains
                .get(chain)
                .map(|c| c.rules.clone())
                .ok_or_else(|| NftError::not_found(format!("no such chain {:?}", chain)))
        })
        .await
    }

    /// Elements of the set or map `name`; `kind` is "set" or "map"
    pub async fn list_elements(&self, kind: &str, name: &str) -> Result<Vec<Element>> {
        let kind: ObjectKind = kind.parse()?;
        self.with_table(|table| {
            let elements = match kind {
                ObjectKind::Set => table.sets.get(name).map(|s| s.elements.clone()),
                ObjectKind::Map => table.maps.get(name).map(|m| m.elements.clone()),
                other => {
                    return Err(NftError::validation(
                        "object type",
                        format!("{} has no elements", other),
                    ));
                }
            };
            elements.ok_or_else(|| NftError::not_found(format!("no such {} {:?}", kind, name)))
        })
        .await
    }

    pub async fn list_counters(&self) -> Result<Vec<Counter>> {
        self.with_table(|table| Ok(table.counters.values().cloned().collect()))
            .await
    }

    /// Every table in the ruleset, in dump order
    pub async fn list_tables(&self) -> Vec<Table> {
        let state = self.state.read().await;
        state
            .ruleset
            .sorted_tables()
            .into_iter()
            .map(|t| t.table.clone())
            .collect()
    }

    pub async fn status(&self) -> Vec<TableStatus> {
        let state = self.state.read().await;
        state
            .ruleset
            .sorted_tables()
            .into_iter()
            .map(TableStatus::from_table)
            .collect()
    }

    /// The committed state as replayable command text
    pub async fn dump(&self) -> String {
        dump(&self.state.read().await.ruleset)
    }

    /// Parse dump text into a transaction without running it
    pub async fn parse_transaction(&self, text: &str) -> Result<Transaction> {
        let known_maps: Vec<(Family, String, String)> = {
            let state = self.state.read().await;
            state
                .ruleset
                .tables
                .iter()
                .flat_map(|((family, table), t)| {
                    t.maps.keys().map(move |map| (*family, table.clone(), map.clone()))
                })
                .collect()
        };

        DumpParser::new(&self.config)
            .with_known_maps(known_maps)
            .parse(text)
    }

    /// Parse dump text and run it as one transaction
    pub async fn parse_dump(&self, text: &str) -> Result<()> {
        let tx = self.parse_transaction(text).await?;
        self.run(&tx).await
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}
