//! In-memory node used by the unit tests.
//!
//! Mimics the subset of server behavior the migration relies on: per-session
//! database selection, offset-cursor `SCAN`, lazy key expiry, `INFO`
//! sections in the server's text format, and injectable faults. A session
//! whose link was dropped fails every command until it reconnects.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::core::{Connector, NodeConnection, NodeEndpoint, NodeHandle, Role};
use crate::error::{MigrateError, Result};

const DUMP_PREFIX: &[u8] = b"DUMP:";

/// A fault attached to one key.
#[derive(Debug, Clone, Copy)]
pub enum Fault {
    /// `DUMP` fails permanently.
    DumpFails,
    /// `RESTORE` fails permanently.
    RestoreFails,
    /// `RESTORE` fails transiently this many times, then succeeds.
    TransientRestore(u32),
    /// The key is deleted between `SCAN` and `DUMP`.
    Vanishes,
    /// The session's link drops on the first `RESTORE` of the key.
    DropsLink,
}

#[derive(Debug, Clone)]
struct Entry {
    value: Vec<u8>,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| at > now)
    }
}

#[derive(Debug)]
struct State {
    role: Role,
    dbs: BTreeMap<u32, HashMap<Vec<u8>, Entry>>,
    fail_info: bool,
    role_reports: usize,
    demote_after: Option<usize>,
    fail_role_after: Option<usize>,
    fail_scan: Vec<u32>,
    drop_link_on_scan: bool,
    faults: HashMap<Vec<u8>, Fault>,
    selected: Vec<u32>,
    restore_calls: usize,
    reconnects: usize,
}

/// Shared in-memory server state.
#[derive(Debug, Clone)]
pub struct MemoryServer {
    state: Arc<Mutex<State>>,
}

impl MemoryServer {
    fn with_role(role: Role) -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                role,
                dbs: BTreeMap::new(),
                fail_info: false,
                role_reports: 0,
                demote_after: None,
                fail_role_after: None,
                fail_scan: Vec::new(),
                drop_link_on_scan: false,
                faults: HashMap::new(),
                selected: Vec::new(),
                restore_calls: 0,
                reconnects: 0,
            })),
        }
    }

    pub fn primary() -> Self {
        Self::with_role(Role::Primary)
    }

    pub fn replica() -> Self {
        Self::with_role(Role::Replica)
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    pub fn fail_info(&self, fail: bool) {
        self.lock().fail_info = fail;
    }

    /// Answer `INFO replication` `n` times, then become a replica.
    pub fn demote_after(&self, n: usize) {
        self.lock().demote_after = Some(n);
    }

    /// Answer `INFO replication` `n` times, then fail it.
    pub fn fail_role_after(&self, n: usize) {
        self.lock().fail_role_after = Some(n);
    }

    pub fn fail_scan_in(&self, db: u32) {
        self.lock().fail_scan.push(db);
    }

    /// Drop the link of the next session that runs `SCAN`.
    pub fn drop_link_on_scan(&self) {
        self.lock().drop_link_on_scan = true;
    }

    pub fn inject(&self, key: &[u8], fault: Fault) {
        self.lock().faults.insert(key.to_vec(), fault);
    }

    pub fn insert(&self, db: u32, key: &[u8], value: &[u8], ttl_ms: Option<u64>) {
        let expires_at = ttl_ms.map(|ms| Instant::now() + Duration::from_millis(ms));
        self.lock().dbs.entry(db).or_default().insert(
            key.to_vec(),
            Entry {
                value: value.to_vec(),
                expires_at,
            },
        );
    }

    pub fn get(&self, db: u32, key: &[u8]) -> Option<Vec<u8>> {
        let now = Instant::now();
        self.lock()
            .dbs
            .get(&db)
            .and_then(|keys| keys.get(key))
            .filter(|e| e.is_live(now))
            .map(|e| e.value.clone())
    }

    pub fn pttl(&self, db: u32, key: &[u8]) -> i64 {
        pttl_of(&self.lock(), db, key)
    }

    /// Live keys in `db`.
    pub fn len(&self, db: u32) -> usize {
        let now = Instant::now();
        self.lock()
            .dbs
            .get(&db)
            .map_or(0, |keys| keys.values().filter(|e| e.is_live(now)).count())
    }

    /// Every live key and value, by database.
    pub fn contents(&self) -> BTreeMap<u32, BTreeMap<Vec<u8>, Vec<u8>>> {
        let now = Instant::now();
        let state = self.lock();
        let mut out = BTreeMap::new();
        for (db, keys) in &state.dbs {
            let live: BTreeMap<_, _> = keys
                .iter()
                .filter(|(_, e)| e.is_live(now))
                .map(|(k, e)| (k.clone(), e.value.clone()))
                .collect();
            if !live.is_empty() {
                out.insert(*db, live);
            }
        }
        out
    }

    /// Every `SELECT` issued against this server, in order.
    pub fn selected(&self) -> Vec<u32> {
        self.lock().selected.clone()
    }

    pub fn restore_calls(&self) -> usize {
        self.lock().restore_calls
    }

    pub fn reconnects(&self) -> usize {
        self.lock().reconnects
    }
}

fn pttl_of(state: &State, db: u32, key: &[u8]) -> i64 {
    let now = Instant::now();
    match state.dbs.get(&db).and_then(|keys| keys.get(key)) {
        Some(e) if e.is_live(now) => match e.expires_at {
            Some(at) => at.saturating_duration_since(now).as_millis() as i64,
            None => -1,
        },
        _ => -2,
    }
}

fn render_keyspace(state: &State) -> String {
    let now = Instant::now();
    let mut out = String::from("# Keyspace\r\n");
    for (db, keys) in &state.dbs {
        let live: Vec<&Entry> = keys.values().filter(|e| e.is_live(now)).collect();
        if live.is_empty() {
            continue;
        }
        let ttls: Vec<u128> = live
            .iter()
            .filter_map(|e| e.expires_at)
            .map(|at| at.saturating_duration_since(now).as_millis())
            .collect();
        let avg_ttl = if ttls.is_empty() {
            0
        } else {
            ttls.iter().sum::<u128>() / ttls.len() as u128
        };
        out.push_str(&format!(
            "db{}:keys={},expires={},avg_ttl={}\r\n",
            db,
            live.len(),
            ttls.len(),
            avg_ttl
        ));
    }
    out
}

fn render_replication(role: Role) -> String {
    let role = match role {
        Role::Primary => "master",
        Role::Replica => "slave",
        Role::Unknown => "sentinel",
    };
    format!("# Replication\r\nrole:{}\r\nconnected_slaves:0\r\n", role)
}

/// Maps `host:port` strings to in-memory servers.
#[derive(Debug, Clone, Default)]
pub struct MemoryConnector {
    servers: Arc<Mutex<HashMap<String, MemoryServer>>>,
    attempts: Arc<AtomicUsize>,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, addr: &str, server: MemoryServer) {
        self.servers
            .lock()
            .unwrap()
            .insert(addr.to_string(), server);
    }

    pub fn connect_attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self, endpoint: &NodeEndpoint) -> Result<NodeHandle> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let server = self
            .servers
            .lock()
            .unwrap()
            .get(&endpoint.to_string())
            .cloned();
        match server {
            Some(server) => Ok(Box::new(MemoryNode {
                endpoint: endpoint.clone(),
                server,
                db: 0,
                linked: true,
            })),
            None => Err(MigrateError::connection(
                endpoint,
                format!(
                    "Error 111 connecting to {}. Connection refused.",
                    endpoint
                ),
            )),
        }
    }
}

/// One session to a [`MemoryServer`].
struct MemoryNode {
    endpoint: NodeEndpoint,
    server: MemoryServer,
    db: u32,
    linked: bool,
}

impl MemoryNode {
    fn check_link(&self, command: &str) -> Result<()> {
        if self.linked {
            Ok(())
        } else {
            Err(self.broken_pipe(command))
        }
    }

    fn broken_pipe(&self, command: &str) -> MigrateError {
        MigrateError::connection(&self.endpoint, format!("{} failed: broken pipe", command))
    }
}

#[async_trait]
impl NodeConnection for MemoryNode {
    fn endpoint(&self) -> &NodeEndpoint {
        &self.endpoint
    }

    async fn info(&mut self, section: &str) -> Result<String> {
        self.check_link("INFO")?;
        let mut state = self.server.lock();
        if state.fail_info {
            return Err(MigrateError::command("INFO", "ERR injected failure"));
        }
        match section {
            "keyspace" => Ok(render_keyspace(&state)),
            "replication" => {
                if state.fail_role_after == Some(state.role_reports) {
                    return Err(MigrateError::command("INFO", "ERR injected failure"));
                }
                if state.demote_after == Some(state.role_reports) {
                    state.role = Role::Replica;
                }
                state.role_reports += 1;
                Ok(render_replication(state.role))
            }
            _ => Ok(String::new()),
        }
    }

    async fn select(&mut self, db: u32) -> Result<()> {
        self.check_link("SELECT")?;
        self.server.lock().selected.push(db);
        self.db = db;
        Ok(())
    }

    async fn scan(&mut self, cursor: u64, count: usize) -> Result<(u64, Vec<Vec<u8>>)> {
        self.check_link("SCAN")?;
        let mut state = self.server.lock();
        if state.drop_link_on_scan {
            state.drop_link_on_scan = false;
            drop(state);
            self.linked = false;
            return Err(self.broken_pipe("SCAN"));
        }
        if state.fail_scan.contains(&self.db) {
            return Err(MigrateError::command("SCAN", "ERR injected failure"));
        }
        let now = Instant::now();
        let mut keys: Vec<Vec<u8>> = state
            .dbs
            .get(&self.db)
            .map(|keys| {
                keys.iter()
                    .filter(|(_, e)| e.is_live(now))
                    .map(|(k, _)| k.clone())
                    .collect()
            })
            .unwrap_or_default();
        keys.sort();

        let start = (cursor as usize).min(keys.len());
        let end = (start + count.max(1)).min(keys.len());
        let next = if end >= keys.len() { 0 } else { end as u64 };
        Ok((next, keys[start..end].to_vec()))
    }

    async fn pttl(&mut self, key: &[u8]) -> Result<i64> {
        self.check_link("PTTL")?;
        let state = self.server.lock();
        if matches!(state.faults.get(key), Some(Fault::Vanishes)) {
            return Ok(-2);
        }
        Ok(pttl_of(&state, self.db, key))
    }

    async fn dump(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.check_link("DUMP")?;
        let state = self.server.lock();
        match state.faults.get(key) {
            Some(Fault::DumpFails) => {
                return Err(MigrateError::command("DUMP", "ERR injected failure"))
            }
            Some(Fault::Vanishes) => return Ok(None),
            _ => {}
        }
        let now = Instant::now();
        Ok(state
            .dbs
            .get(&self.db)
            .and_then(|keys| keys.get(key))
            .filter(|e| e.is_live(now))
            .map(|e| [DUMP_PREFIX, e.value.as_slice()].concat()))
    }

    async fn restore(&mut self, key: &[u8], ttl_ms: u64, payload: &[u8]) -> Result<()> {
        self.check_link("RESTORE")?;
        let mut state = self.server.lock();
        state.restore_calls += 1;
        if matches!(state.faults.get(key), Some(Fault::DropsLink)) {
            state.faults.remove(key);
            drop(state);
            self.linked = false;
            return Err(self.broken_pipe("RESTORE"));
        }
        match state.faults.get_mut(key) {
            Some(Fault::RestoreFails) => {
                return Err(MigrateError::command(
                    "RESTORE",
                    "ERR DUMP payload version or checksum are wrong",
                ))
            }
            Some(Fault::TransientRestore(remaining)) if *remaining > 0 => {
                *remaining -= 1;
                return Err(MigrateError::transient(
                    "RESTORE",
                    "BUSY Redis is busy running a script",
                ));
            }
            _ => {}
        }
        let value = payload
            .strip_prefix(DUMP_PREFIX)
            .ok_or_else(|| MigrateError::command("RESTORE", "ERR Bad data format"))?
            .to_vec();
        let expires_at = (ttl_ms > 0).then(|| Instant::now() + Duration::from_millis(ttl_ms));
        let db = self.db;
        state
            .dbs
            .entry(db)
            .or_default()
            .insert(key.to_vec(), Entry { value, expires_at });
        Ok(())
    }

    async fn ping(&mut self) -> Result<()> {
        self.check_link("PING")
    }

    async fn reconnect(&mut self) -> Result<()> {
        self.server.lock().reconnects += 1;
        self.linked = true;
        self.db = 0;
        Ok(())
    }
}
