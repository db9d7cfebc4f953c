//! Deterministic workload testing for table bindings
//!
//! Drives two [`Table`] bindings that share one [`MemoryStore`] with a seeded
//! random workload and compares every result against a shadow model.
//! Links are severed at random; the manager must replace them without the
//! workload noticing.
//!
//! ## Usage
//!
//! ```rust,ignore
//! let results = run_table_batch(0, 50, 300, TableDstConfig::new);
//! assert!(results.iter().all(|r| r.is_success()), "{}", summarize_table_batch(&results));
//! ```

use super::{full_key, Table, TableOptions};
use crate::config::PoolOverrides;
use crate::connection::{ConnectionManager, MemoryConnector, MemoryStore};
use crate::error::{StoreError, StoreResult};
use crate::rng::DeterministicRng;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::Arc;

const NAMESPACES: [&str; 2] = ["alpha", "beta"];

#[derive(Debug, Clone)]
pub struct TableDstConfig {
    pub seed: u64,
    /// Distinct keys per namespace
    pub num_keys: u64,
    /// Chance that a write carries an expiry
    pub expire_probability: f64,
    /// Chance of severing all links before an operation
    pub sever_probability: f64,
}

impl Default for TableDstConfig {
    fn default() -> Self {
        TableDstConfig {
            seed: 0,
            num_keys: 16,
            expire_probability: 0.3,
            sever_probability: 0.02,
        }
    }
}

impl TableDstConfig {
    pub fn new(seed: u64) -> Self {
        TableDstConfig {
            seed,
            ..Default::default()
        }
    }

    /// Few keys, so updates and deletes keep colliding
    pub fn contended(seed: u64) -> Self {
        TableDstConfig {
            seed,
            num_keys: 3,
            ..Default::default()
        }
    }

    /// Frequent link loss
    pub fn flaky(seed: u64) -> Self {
        TableDstConfig {
            seed,
            sever_probability: 0.2,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone)]
pub enum TableOp {
    Read { table: usize, key: String },
    Create { table: usize, key: String, value: Value, expire: Option<u64> },
    Update { table: usize, key: String, partial: Value, expire: Option<u64> },
    Delete { table: usize, key: String },
    Exists { table: usize, key: String },
    SetExpiration { table: usize, key: String, seconds: u64 },
    RemainingTtl { table: usize, key: String },
    SeverLinks,
}

#[derive(Debug, Clone)]
pub struct TableDstResult {
    pub seed: u64,
    pub total_operations: u64,
    pub reads: u64,
    pub writes: u64,
    pub updates: u64,
    pub expiry_ops: u64,
    pub severed: u64,
    pub connects: u64,
    pub invariant_violations: Vec<String>,
    pub last_op: Option<TableOp>,
}

impl TableDstResult {
    pub fn new(seed: u64) -> Self {
        TableDstResult {
            seed,
            total_operations: 0,
            reads: 0,
            writes: 0,
            updates: 0,
            expiry_ops: 0,
            severed: 0,
            connects: 0,
            invariant_violations: Vec::new(),
            last_op: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.invariant_violations.is_empty()
    }

    pub fn summary(&self) -> String {
        format!(
            "Seed {}: {} ops (r:{}, w:{}, u:{}, exp:{}, sever:{}, conn:{}), {} violations",
            self.seed,
            self.total_operations,
            self.reads,
            self.writes,
            self.updates,
            self.expiry_ops,
            self.severed,
            self.connects,
            self.invariant_violations.len()
        )
    }
}

/// Expected contents of one full key
#[derive(Debug, Clone)]
struct ShadowRecord {
    value: Value,
    expire: Option<u64>,
}

pub struct TableDstHarness {
    config: TableDstConfig,
    rng: DeterministicRng,
    store: MemoryStore,
    tables: Vec<Table>,
    shadow: HashMap<String, ShadowRecord>,
    result: TableDstResult,
}

impl TableDstHarness {
    pub fn new(config: TableDstConfig) -> StoreResult<Self> {
        let store = MemoryStore::new();
        let manager = Arc::new(ConnectionManager::with_layers(
            Arc::new(MemoryConnector::new(store.clone())),
            PoolOverrides::default().with_port(6379),
        ));
        let tables = NAMESPACES
            .iter()
            .map(|ns| Table::bind(manager.clone(), TableOptions::new(*ns)))
            .collect::<StoreResult<Vec<_>>>()?;

        Ok(TableDstHarness {
            rng: DeterministicRng::new(config.seed),
            result: TableDstResult::new(config.seed),
            config,
            store,
            tables,
            shadow: HashMap::new(),
        })
    }

    pub fn with_seed(seed: u64) -> StoreResult<Self> {
        Self::new(TableDstConfig::new(seed))
    }

    /// Run `operations` random operations, stopping at the first violation
    pub async fn run(&mut self, operations: usize) {
        for _ in 0..operations {
            let op = self.next_op();
            self.result.total_operations += 1;
            self.result.last_op = Some(op.clone());
            self.apply(op).await;
            if !self.result.invariant_violations.is_empty() {
                break;
            }
        }
        self.result.connects = self.store.connects();
    }

    pub fn result(&self) -> &TableDstResult {
        &self.result
    }

    pub fn store(&self) -> &MemoryStore {
        &self.store
    }

    fn next_op(&mut self) -> TableOp {
        if self.rng.gen_bool(self.config.sever_probability) {
            return TableOp::SeverLinks;
        }
        let table = self.rng.gen_range(0, self.tables.len() as u64) as usize;
        let key = self.gen_key();
        match self.rng.gen_range(0, 100) {
            0..=19 => TableOp::Read { table, key },
            20..=44 => {
                let value = self.gen_value();
                let expire = self.gen_expire();
                TableOp::Create { table, key, value, expire }
            }
            45..=64 => {
                let partial = if self.rng.gen_bool(0.05) {
                    json!(["not", "an", "object"])
                } else {
                    Value::Object(self.gen_fields())
                };
                let expire = self.gen_expire();
                TableOp::Update { table, key, partial, expire }
            }
            65..=74 => TableOp::Delete { table, key },
            75..=82 => TableOp::Exists { table, key },
            83..=91 => {
                let seconds = self.rng.gen_range(100, 10_000);
                TableOp::SetExpiration { table, key, seconds }
            }
            _ => TableOp::RemainingTtl { table, key },
        }
    }

    fn gen_key(&mut self) -> String {
        let n = self.rng.gen_range(0, self.config.num_keys);
        // Keys may contain the separator; namespaces may not
        if n % 4 == 3 {
            format!("k{}:sub", n)
        } else {
            format!("k{}", n)
        }
    }

    fn gen_expire(&mut self) -> Option<u64> {
        if self.rng.gen_bool(self.config.expire_probability) {
            // Far beyond the run's wall time, so nothing expires mid-run
            Some(self.rng.gen_range(100, 10_000))
        } else {
            None
        }
    }

    fn gen_fields(&mut self) -> Map<String, Value> {
        let names = ["a", "b", "c", "d"];
        let mut fields = Map::new();
        for _ in 0..self.rng.gen_range(1, 4) {
            let name = *self.rng.pick(&names);
            let value = match self.rng.gen_range(0, 3) {
                0 => json!(self.rng.gen_range(0, 1000)),
                1 => json!(format!("s{}", self.rng.gen_range(0, 50))),
                _ => json!([self.rng.gen_bool(0.5), null]),
            };
            fields.insert(name.to_string(), value);
        }
        fields
    }

    fn gen_value(&mut self) -> Value {
        match self.rng.gen_range(0, 10) {
            0..=5 => Value::Object(self.gen_fields()),
            6..=7 => json!([self.rng.gen_range(0, 100), "x"]),
            _ => json!(format!("plain-{}", self.rng.gen_range(0, 100))),
        }
    }

    fn violation(&mut self, message: String) {
        self.result.invariant_violations.push(message);
    }

    fn shadow_key(&self, table: usize, key: &str) -> String {
        full_key(self.tables[table].namespace().as_str(), key)
    }

    async fn apply(&mut self, op: TableOp) {
        match op {
            TableOp::SeverLinks => {
                self.result.severed += 1;
                self.store.sever_links();
            }
            TableOp::Read { table, key } => {
                self.result.reads += 1;
                let expected = self
                    .shadow
                    .get(&self.shadow_key(table, &key))
                    .map(|r| r.value.clone());
                match self.tables[table].read(&key).await {
                    Ok(actual) if actual == expected => {}
                    Ok(actual) => self.violation(format!(
                        "read {}: expected {:?}, got {:?}",
                        key, expected, actual
                    )),
                    Err(e) => self.violation(format!("read {} failed: {}", key, e)),
                }
            }
            TableOp::Create { table, key, value, expire } => {
                self.result.writes += 1;
                if expire.is_some() {
                    self.result.expiry_ops += 1;
                }
                match self.tables[table].create(&key, &value, expire).await {
                    Ok(()) => {
                        let full = self.shadow_key(table, &key);
                        self.shadow.insert(full, ShadowRecord { value, expire });
                    }
                    Err(e) => self.violation(format!("create {} failed: {}", key, e)),
                }
            }
            TableOp::Update { table, key, partial, expire } => {
                self.result.updates += 1;
                let full = self.shadow_key(table, &key);
                let outcome = self.tables[table].update(&key, &partial, expire).await;
                let existing = self.shadow.get(&full).map(|r| r.value.clone());
                match (&partial, existing, outcome) {
                    (Value::Object(_), _, Err(StoreError::Validation(_))) => {
                        self.violation(format!("update {}: object partial rejected", key));
                    }
                    (Value::Object(_), None, Ok(None)) => {}
                    (Value::Object(changes), Some(Value::Object(mut fields)), Ok(Some(merged))) => {
                        for (name, value) in changes {
                            fields.insert(name.clone(), value.clone());
                        }
                        let fields = Value::Object(fields);
                        if merged != fields {
                            self.violation(format!(
                                "update {}: expected {}, got {}",
                                key, fields, merged
                            ));
                        }
                        self.shadow.insert(full, ShadowRecord { value: fields, expire });
                    }
                    (Value::Object(_), Some(existing), Err(StoreError::TypeMismatch { .. }))
                        if !existing.is_object() => {}
                    (_, _, Err(StoreError::Validation(_))) if !partial.is_object() => {}
                    (_, existing, outcome) => self.violation(format!(
                        "update {} with {}: existing {:?}, outcome {:?}",
                        key, partial, existing, outcome
                    )),
                }
            }
            TableOp::Delete { table, key } => {
                self.result.writes += 1;
                let full = self.shadow_key(table, &key);
                let expected = self.shadow.remove(&full).is_some();
                match self.tables[table].delete(&key).await {
                    Ok(actual) if actual == expected => {}
                    Ok(actual) => self.violation(format!(
                        "delete {}: expected {}, got {}",
                        key, expected, actual
                    )),
                    Err(e) => self.violation(format!("delete {} failed: {}", key, e)),
                }
            }
            TableOp::Exists { table, key } => {
                self.result.reads += 1;
                let expected = self.shadow.contains_key(&self.shadow_key(table, &key));
                match self.tables[table].exists(&key).await {
                    Ok(actual) if actual == expected => {}
                    Ok(actual) => self.violation(format!(
                        "exists {}: expected {}, got {}",
                        key, expected, actual
                    )),
                    Err(e) => self.violation(format!("exists {} failed: {}", key, e)),
                }
            }
            TableOp::SetExpiration { table, key, seconds } => {
                self.result.expiry_ops += 1;
                let full = self.shadow_key(table, &key);
                let expected = self.shadow.contains_key(&full);
                match self.tables[table].set_expiration(&key, seconds).await {
                    Ok(actual) if actual == expected => {
                        if let Some(record) = self.shadow.get_mut(&full) {
                            record.expire = Some(seconds);
                        }
                    }
                    Ok(actual) => self.violation(format!(
                        "set_expiration {}: expected {}, got {}",
                        key, expected, actual
                    )),
                    Err(e) => self.violation(format!("set_expiration {} failed: {}", key, e)),
                }
            }
            TableOp::RemainingTtl { table, key } => {
                self.result.expiry_ops += 1;
                let expected = self
                    .shadow
                    .get(&self.shadow_key(table, &key))
                    .and_then(|r| r.expire);
                match (expected, self.tables[table].remaining_ttl(&key).await) {
                    (None, Ok(None)) => {}
                    (Some(limit), Ok(Some(ttl))) if ttl > 0 && ttl <= limit => {}
                    (expected, actual) => self.violation(format!(
                        "remaining_ttl {}: expected within {:?}, got {:?}",
                        key, expected, actual
                    )),
                }
            }
        }
    }
}

/// Run one harness per seed, each on its own single-threaded runtime
pub fn run_table_batch(
    start_seed: u64,
    num_seeds: usize,
    ops_per_seed: usize,
    config_fn: fn(u64) -> TableDstConfig,
) -> Vec<TableDstResult> {
    (0..num_seeds)
        .map(|i| {
            let seed = start_seed + i as u64;
            run_seed(config_fn(seed), ops_per_seed)
        })
        .collect()
}

fn run_seed(config: TableDstConfig, operations: usize) -> TableDstResult {
    let seed = config.seed;
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => return failed(seed, format!("runtime: {}", e)),
    };
    runtime.block_on(async move {
        match TableDstHarness::new(config) {
            Ok(mut harness) => {
                harness.run(operations).await;
                harness.result().clone()
            }
            Err(e) => failed(seed, format!("setup: {}", e)),
        }
    })
}

fn failed(seed: u64, reason: String) -> TableDstResult {
    let mut result = TableDstResult::new(seed);
    result.invariant_violations.push(reason);
    result
}

pub fn summarize_table_batch(results: &[TableDstResult]) -> String {
    let total = results.len();
    let passed = results.iter().filter(|r| r.is_success()).count();
    let failed = total - passed;
    let total_ops: u64 = results.iter().map(|r| r.total_operations).sum();

    let mut summary = format!(
        "Table DST Summary\n\
         =================\n\
         Seeds: {} total, {} passed, {} failed\n\
         Total operations: {}\n",
        total, passed, failed, total_ops
    );

    if failed > 0 {
        summary.push_str("\nFailed seeds:\n");
        for result in results.iter().filter(|r| !r.is_success()) {
            summary.push_str(&format!("  Seed {}: {}\n", result.seed, result.summary()));
            if let Some(op) = &result.last_op {
                summary.push_str(&format!("    last op: {:?}\n", op));
            }
            for violation in &result.invariant_violations {
                summary.push_str(&format!("    - {}\n", violation));
            }
        }
    }

    summary
}
