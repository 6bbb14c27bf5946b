//! Shader program pooling
//!
//! Filters with identical shader configuration share one compiled program.
//! Entries are keyed either by an explicit preset key or by a content hash
//! of the vertex and fragment sources, and reference-counted per filter.
//!
//! The pool is shared by every mounted slider of one runtime context, so it
//! is the only cross-instance resource; it is mutated only through
//! registration and release.

use crate::filter::FilterKind;
use crate::handle::{Filter, FilterId, ProgramHandle};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::time::Instant;

/// Default number of entries kept before pruning
pub const DEFAULT_MAX_POOL_SIZE: usize = 50;

/// Default share of idle entries evicted per prune
pub const DEFAULT_PRUNE_FRACTION: f64 = 0.2;

/// Shader pool configuration
#[derive(Debug, Clone, PartialEq)]
pub struct ShaderPoolConfig {
    /// Entry count above which idle entries are pruned
    pub max_pool_size: usize,

    /// Share of idle entries evicted per prune, rounded up
    pub prune_fraction: f64,

    /// Keep entries at zero instances until pruned
    pub retain_idle: bool,
}

impl Default for ShaderPoolConfig {
    fn default() -> Self {
        Self {
            max_pool_size: DEFAULT_MAX_POOL_SIZE,
            prune_fraction: DEFAULT_PRUNE_FRACTION,
            retain_idle: false,
        }
    }
}

/// Deterministic polynomial rolling hash (base 31) over the source bytes
pub fn shader_hash(source: &str) -> u32 {
    source
        .bytes()
        .fold(0u32, |hash, byte| hash.wrapping_mul(31).wrapping_add(u32::from(byte)))
}

/// Pool key for a vertex/fragment pair, before collision resolution
pub fn shader_key(vertex: &str, fragment: &str) -> String {
    let mut source = String::with_capacity(vertex.len() + fragment.len());
    source.push_str(vertex);
    source.push_str(fragment);
    format!("shader_{:08x}", shader_hash(&source))
}

struct ShaderEntry {
    program: ProgramHandle,
    instances: usize,
    usage_count: u64,
    /// Logical clock value of the last registration
    last_used: u64,
    created_at: Instant,
    filter_kind: FilterKind,
    /// Full sources for hash-keyed entries
    source: Option<String>,
}

/// Public view of a pool entry
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ShaderEntryInfo {
    pub key: String,
    pub instances: usize,
    pub usage_count: u64,
    pub filter_kind: FilterKind,
    pub age_ms: u128,
}

/// Shader pool statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ShaderPoolStats {
    /// Entries in the pool
    pub entries: usize,

    /// Entries at zero instances (only with idle retention)
    pub idle_entries: usize,

    /// Sum of instance counts
    pub instances: usize,

    /// Filters mapped to a key
    pub mapped_filters: usize,

    pub hits: u64,
    pub misses: u64,

    /// Programs that could not be extracted from their filter
    pub extraction_failures: u64,

    /// Idle entries removed by pruning
    pub evictions: u64,

    /// Hash matches whose sources differed
    pub collisions: u64,
}

#[derive(Default)]
struct PoolState {
    entries: HashMap<String, ShaderEntry>,
    filters: HashMap<FilterId, String>,
    clock: u64,
    stats: ShaderPoolStats,
}

impl PoolState {
    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    /// Find the entry in the `key`, `key_1`, `key_2`... chain holding
    /// `source`, else the first free slot of the chain
    ///
    /// The chain can have gaps once entries are released, so a free slot
    /// does not end the search for a match.
    fn resolve_key(&mut self, base: String, source: Option<&str>) -> String {
        let Some(source) = source else {
            return base;
        };
        let existing = self.entries.iter().find_map(|(key, entry)| {
            (in_chain(&base, key) && entry.source.as_deref() == Some(source)).then(|| key.clone())
        });
        if let Some(key) = existing {
            return key;
        }

        let mut candidate = base.clone();
        let mut suffix = 1;
        while self.entries.contains_key(&candidate) {
            self.stats.collisions += 1;
            candidate = format!("{base}_{suffix}");
            suffix += 1;
        }
        candidate
    }

    /// Register a hit on an existing entry
    fn hit(&mut self, key: &str, filter_id: FilterId) -> Option<ProgramHandle> {
        let now = self.tick();
        let entry = self.entries.get_mut(key)?;
        entry.instances += 1;
        entry.usage_count += 1;
        entry.last_used = now;
        let program = entry.program.clone();
        self.filters.insert(filter_id, key.to_string());
        self.stats.hits += 1;
        Some(program)
    }

    fn release(&mut self, filter_id: FilterId, retain_idle: bool) -> bool {
        let Some(key) = self.filters.remove(&filter_id) else {
            return false;
        };
        let remove = match self.entries.get_mut(&key) {
            Some(entry) => {
                entry.instances = entry.instances.saturating_sub(1);
                entry.instances == 0 && !retain_idle
            }
            None => false,
        };
        if remove {
            self.entries.remove(&key);
            tracing::trace!(%key, "shader program removed");
        }
        true
    }

    fn prune(&mut self, config: &ShaderPoolConfig) -> usize {
        if self.entries.len() <= config.max_pool_size {
            return 0;
        }

        let mut idle: Vec<(u64, String)> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.instances == 0)
            .map(|(key, entry)| (entry.last_used, key.clone()))
            .collect();
        if idle.is_empty() {
            return 0;
        }
        idle.sort();

        let fraction = config.prune_fraction.clamp(0.0, 1.0);
        let count = ((idle.len() as f64 * fraction).ceil() as usize).clamp(1, idle.len());
        for (_, key) in idle.into_iter().take(count) {
            self.entries.remove(&key);
        }
        self.stats.evictions += count as u64;
        count
    }
}

fn in_chain(base: &str, key: &str) -> bool {
    match key.strip_prefix(base) {
        Some("") => true,
        Some(rest) => rest
            .strip_prefix('_')
            .is_some_and(|n| !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit())),
        None => false,
    }
}

/// Shader program pool
///
/// # Example
///
/// ```no_run
/// use carousel_resources::{ShaderPoolConfig, ShaderResourceManager};
///
/// let pool = ShaderResourceManager::new(ShaderPoolConfig::default());
/// // let program = pool.get_shader_program("blur-preset", filter_id, &*filter);
/// println!("{} programs pooled", pool.stats().entries);
/// ```
pub struct ShaderResourceManager {
    state: Mutex<PoolState>,
    config: ShaderPoolConfig,
}

impl ShaderResourceManager {
    /// Create an empty pool
    pub fn new(config: ShaderPoolConfig) -> Self {
        Self {
            state: Mutex::new(PoolState::default()),
            config,
        }
    }

    /// Pool configuration
    pub fn config(&self) -> &ShaderPoolConfig {
        &self.config
    }

    /// Get or register the program for an explicit key
    ///
    /// On a miss the program is extracted from `filter`. If extraction
    /// fails the filter is still mapped to `key` and `None` is returned.
    /// Registering the same filter under the same key twice counts once.
    pub fn get_shader_program(
        &self,
        key: &str,
        filter_id: FilterId,
        filter: &dyn Filter,
    ) -> Option<ProgramHandle> {
        self.acquire(key.to_string(), None, filter_id, filter)
    }

    /// Get or register the program for a vertex/fragment source pair
    ///
    /// The key is the source hash; a hash match with different sources is
    /// given a suffixed key instead of sharing the program.
    pub fn get_shader_program_for_sources(
        &self,
        vertex: &str,
        fragment: &str,
        filter_id: FilterId,
        filter: &dyn Filter,
    ) -> Option<ProgramHandle> {
        let source = format!("{vertex}\u{0}{fragment}");
        self.acquire(shader_key(vertex, fragment), Some(source), filter_id, filter)
    }

    fn acquire(
        &self,
        base_key: String,
        source: Option<String>,
        filter_id: FilterId,
        filter: &dyn Filter,
    ) -> Option<ProgramHandle> {
        let kind = filter.kind();

        let key = {
            let mut state = self.state.lock();
            let key = state.resolve_key(base_key, source.as_deref());

            match state.filters.get(&filter_id) {
                Some(mapped) if *mapped == key => {
                    return state.entries.get(&key).map(|entry| entry.program.clone());
                }
                Some(_) => {
                    state.release(filter_id, self.config.retain_idle);
                }
                None => {}
            }

            if let Some(program) = state.hit(&key, filter_id) {
                tracing::trace!(%key, %filter_id, "shader pool hit");
                return Some(program);
            }
            key
        };

        // Extract without holding the pool lock
        let extracted = filter.program();

        let mut state = self.state.lock();
        if let Some(program) = state.hit(&key, filter_id) {
            return Some(program);
        }
        state.stats.misses += 1;
        state.filters.insert(filter_id, key.clone());

        match extracted {
            Ok(program) => {
                let now = state.tick();
                state.entries.insert(
                    key.clone(),
                    ShaderEntry {
                        program: program.clone(),
                        instances: 1,
                        usage_count: 1,
                        last_used: now,
                        created_at: Instant::now(),
                        filter_kind: kind,
                        source,
                    },
                );
                tracing::debug!(%key, %filter_id, "shader program registered");
                state.prune(&self.config);
                Some(program)
            }
            Err(err) => {
                state.stats.extraction_failures += 1;
                tracing::debug!(%key, %filter_id, %err, "shader program extraction failed");
                None
            }
        }
    }

    /// Drop a filter's reference
    ///
    /// The entry is deleted once its instance count reaches zero (unless
    /// idle retention is on). Returns `false` if the filter was not mapped.
    pub fn release_shader(&self, filter_id: FilterId) -> bool {
        self.state.lock().release(filter_id, self.config.retain_idle)
    }

    /// Release every filter mapped to a key starting with `prefix`
    ///
    /// Returns the number of filters released.
    pub fn release_shaders_by_prefix(&self, prefix: &str) -> usize {
        let mut state = self.state.lock();
        let filters: Vec<FilterId> = state
            .filters
            .iter()
            .filter(|(_, key)| key.starts_with(prefix))
            .map(|(filter_id, _)| *filter_id)
            .collect();
        for filter_id in &filters {
            state.release(*filter_id, self.config.retain_idle);
        }
        filters.len()
    }

    /// Evict idle entries above the pool cap, least recently used first
    ///
    /// Returns the number of entries evicted.
    pub fn prune_shader_pool(&self) -> usize {
        let evicted = self.state.lock().prune(&self.config);
        if evicted > 0 {
            tracing::debug!(evicted, "shader pool pruned");
        }
        evicted
    }

    /// Instance count for a key (0 if absent)
    pub fn instance_count(&self, key: &str) -> usize {
        self.state
            .lock()
            .entries
            .get(key)
            .map_or(0, |entry| entry.instances)
    }

    /// Whether the pool holds an entry for `key`
    pub fn contains(&self, key: &str) -> bool {
        self.state.lock().entries.contains_key(key)
    }

    /// Key a filter is mapped to
    pub fn key_for(&self, filter_id: FilterId) -> Option<String> {
        self.state.lock().filters.get(&filter_id).cloned()
    }

    /// Snapshot of every entry, sorted by key
    pub fn entries(&self) -> Vec<ShaderEntryInfo> {
        let state = self.state.lock();
        let mut entries: Vec<ShaderEntryInfo> = state
            .entries
            .iter()
            .map(|(key, entry)| ShaderEntryInfo {
                key: key.clone(),
                instances: entry.instances,
                usage_count: entry.usage_count,
                filter_kind: entry.filter_kind.clone(),
                age_ms: entry.created_at.elapsed().as_millis(),
            })
            .collect();
        entries.sort_by(|a, b| a.key.cmp(&b.key));
        entries
    }

    /// Pool statistics
    pub fn stats(&self) -> ShaderPoolStats {
        let state = self.state.lock();
        let mut stats = state.stats;
        stats.entries = state.entries.len();
        stats.idle_entries = state.entries.values().filter(|e| e.instances == 0).count();
        stats.instances = state.entries.values().map(|e| e.instances).sum();
        stats.mapped_filters = state.filters.len();
        stats
    }

    /// Drop every entry and mapping
    pub fn reset(&self) {
        *self.state.lock() = PoolState::default();
    }
}

impl Default for ShaderResourceManager {
    fn default() -> Self {
        Self::new(ShaderPoolConfig::default())
    }
}
