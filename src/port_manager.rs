//! Cross-process port leases for review surfaces.
//!
//! The registry is a small SQLite file shared by every running review process.
//! All read-modify-write happens inside `BEGIN IMMEDIATE` transactions, and OS
//! port binding is the ground truth: any recorded port that can be bound again
//! belongs to a process that exited without releasing it, and is purged.

use std::collections::HashSet;
use std::net::{Ipv4Addr, SocketAddrV4, TcpListener};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use log::{debug, info, warn};
use rusqlite::{params, Connection, Transaction, TransactionBehavior};

const BUSY_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, thiserror::Error)]
pub enum LeaseError {
    #[error("no free port in range {first}-{last}; release stale leases with `ports clear` or widen the range")]
    NoPortsAvailable { first: u16, last: u16 },
    #[error("port registry error: {0}")]
    Registry(#[from] rusqlite::Error),
    #[error("failed to prepare port registry at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// One row of the lease registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaseRecord {
    pub port: u16,
    pub label: String,
    pub pid: u32,
    pub created_at_unix_ms: i64,
}

/// An exclusively held port. The bound listener travels with the lease so the
/// port cannot be taken between acquisition and use.
pub struct PortLease {
    record: LeaseRecord,
    listener: Option<TcpListener>,
    registry_path: PathBuf,
    released: bool,
}

impl PortLease {
    pub fn port(&self) -> u16 {
        self.record.port
    }

    /// Hands the bound listener to the server that will serve on this port.
    pub fn take_listener(&mut self) -> Option<TcpListener> {
        self.listener.take()
    }
}

impl Drop for PortLease {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let result = open_registry(&self.registry_path)
            .and_then(|conn| delete_owned_row(&conn, self.record.port, self.record.pid));
        match result {
            Ok(_) => debug!("Ports: released port {} on drop", self.record.port),
            Err(err) => warn!(
                "Ports: failed to release port {} on drop: {}",
                self.record.port, err
            ),
        }
    }
}

fn now_unix_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_millis() as i64)
        .unwrap_or(0)
}

fn bind_local(port: u16) -> Option<TcpListener> {
    TcpListener::bind(SocketAddrV4::new(Ipv4Addr::LOCALHOST, port)).ok()
}

fn open_registry(path: &Path) -> Result<Connection, LeaseError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent).map_err(|source| LeaseError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        }
    }
    let conn = Connection::open(path)?;
    conn.busy_timeout(BUSY_TIMEOUT)?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS port_leases (
            port INTEGER PRIMARY KEY,
            label TEXT NOT NULL,
            pid INTEGER NOT NULL,
            created_at_unix_ms INTEGER NOT NULL
        )",
        [],
    )?;
    Ok(conn)
}

fn delete_owned_row(conn: &Connection, port: u16, pid: u32) -> Result<usize, LeaseError> {
    Ok(conn.execute(
        "DELETE FROM port_leases WHERE port = ?1 AND pid = ?2",
        params![port, pid],
    )?)
}

fn load_records(tx: &Transaction<'_>) -> Result<Vec<LeaseRecord>, LeaseError> {
    let mut stmt = tx.prepare(
        "SELECT port, label, pid, created_at_unix_ms FROM port_leases ORDER BY port ASC",
    )?;
    let rows = stmt.query_map([], |row| {
        Ok(LeaseRecord {
            port: row.get(0)?,
            label: row.get(1)?,
            pid: row.get(2)?,
            created_at_unix_ms: row.get(3)?,
        })
    })?;
    let mut records = Vec::new();
    for record in rows {
        records.push(record?);
    }
    Ok(records)
}

/// Drops rows whose port is bindable again and returns the surviving records.
fn sweep_stale(tx: &Transaction<'_>) -> Result<Vec<LeaseRecord>, LeaseError> {
    let mut live = Vec::new();
    for record in load_records(tx)? {
        if bind_local(record.port).is_some() {
            info!(
                "Ports: purging stale lease on {} (label={}, pid={})",
                record.port, record.label, record.pid
            );
            tx.execute("DELETE FROM port_leases WHERE port = ?1", params![record.port])?;
        } else {
            live.push(record);
        }
    }
    Ok(live)
}

pub struct PortManager {
    registry_path: PathBuf,
    first: u16,
    last: u16,
}

impl PortManager {
    pub fn new(registry_path: &Path, first: u16, last: u16) -> Self {
        let (first, last) = if first <= last {
            (first, last)
        } else {
            (last, first)
        };
        Self {
            registry_path: registry_path.to_path_buf(),
            first,
            last,
        }
    }

    pub fn range(&self) -> (u16, u16) {
        (self.first, self.last)
    }

    /// Leases the lowest free port in range for `label`.
    pub fn acquire(&self, label: &str) -> Result<PortLease, LeaseError> {
        let mut conn = open_registry(&self.registry_path)?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let live_ports: HashSet<u16> = sweep_stale(&tx)?
            .into_iter()
            .map(|record| record.port)
            .collect();

        for port in self.first..=self.last {
            if live_ports.contains(&port) {
                continue;
            }
            let Some(listener) = bind_local(port) else {
                continue;
            };
            let record = LeaseRecord {
                port,
                label: label.to_string(),
                pid: std::process::id(),
                created_at_unix_ms: now_unix_ms(),
            };
            tx.execute(
                "INSERT OR REPLACE INTO port_leases (port, label, pid, created_at_unix_ms)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    record.port,
                    record.label,
                    record.pid,
                    record.created_at_unix_ms
                ],
            )?;
            tx.commit()?;
            info!("Ports: leased {} to {}", port, label);
            return Ok(PortLease {
                record,
                listener: Some(listener),
                registry_path: self.registry_path.clone(),
                released: false,
            });
        }

        tx.commit()?;
        Err(LeaseError::NoPortsAvailable {
            first: self.first,
            last: self.last,
        })
    }

    pub fn release(&self, mut lease: PortLease) -> Result<(), LeaseError> {
        drop(lease.listener.take());
        lease.released = true;
        let conn = open_registry(&self.registry_path)?;
        let removed = delete_owned_row(&conn, lease.record.port, lease.record.pid)?;
        debug!(
            "Ports: released {} ({} registry rows)",
            lease.record.port, removed
        );
        Ok(())
    }

    /// Live leases after purging stale ones.
    pub fn list_active(&self) -> Result<Vec<LeaseRecord>, LeaseError> {
        let mut conn = open_registry(&self.registry_path)?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let live = sweep_stale(&tx)?;
        tx.commit()?;
        Ok(live)
    }

    /// Operator override: forget the lease on `port` whoever owns it.
    pub fn release_port(&self, port: u16) -> Result<bool, LeaseError> {
        let conn = open_registry(&self.registry_path)?;
        let removed = conn.execute("DELETE FROM port_leases WHERE port = ?1", params![port])?;
        Ok(removed > 0)
    }

    pub fn clear(&self) -> Result<usize, LeaseError> {
        let conn = open_registry(&self.registry_path)?;
        Ok(conn.execute("DELETE FROM port_leases", [])?)
    }
}

#[cfg(test)]
mod tests {
    use std::net::TcpListener;

    use super::{LeaseError, PortManager};

    fn manager(dir: &tempfile::TempDir, first: u16, last: u16) -> PortManager {
        PortManager::new(&dir.path().join("review").join("ports.db"), first, last)
    }

    #[test]
    fn test_sequential_acquires_return_distinct_ports() {
        let dir = tempfile::tempdir().expect("tempdir");
        let manager = manager(&dir, 47_310, 47_315);
        let first = manager.acquire("R_batch1").expect("first lease");
        let second = manager.acquire("S_batch1").expect("second lease");
        assert_ne!(first.port(), second.port());

        let active = manager.list_active().expect("list");
        assert_eq!(active.len(), 2);
        assert_eq!(active[0].label, "R_batch1");
        assert_eq!(active[0].pid, std::process::id());
    }

    #[test]
    fn test_released_port_can_be_acquired_again() {
        let dir = tempfile::tempdir().expect("tempdir");
        let manager = manager(&dir, 47_320, 47_325);
        let lease = manager.acquire("R_batch1").expect("lease");
        let port = lease.port();
        manager.release(lease).expect("release");
        assert!(manager.list_active().expect("list").is_empty());

        let again = manager.acquire("R_batch2").expect("lease again");
        assert_eq!(again.port(), port);
    }

    #[test]
    fn test_crashed_owner_is_purged_on_next_sweep() {
        let dir = tempfile::tempdir().expect("tempdir");
        let manager = manager(&dir, 47_330, 47_335);
        let mut lease = manager.acquire("T_batch1").expect("lease");
        let port = lease.port();
        // Simulated crash: the socket closes but the registry row is never removed.
        drop(lease.take_listener());
        std::mem::forget(lease);

        assert!(manager.list_active().expect("list").is_empty());
        let next = manager.acquire("T_batch2").expect("lease after crash");
        assert_eq!(next.port(), port);
    }

    #[test]
    fn test_exhausted_range_reports_no_ports_available() {
        let dir = tempfile::tempdir().expect("tempdir");
        let manager = manager(&dir, 47_340, 47_340);
        let _held = manager.acquire("R_batch1").expect("only port");
        assert!(matches!(
            manager.acquire("R_batch2"),
            Err(LeaseError::NoPortsAvailable {
                first: 47_340,
                last: 47_340
            })
        ));
    }

    #[test]
    fn test_ports_bound_by_other_programs_are_skipped() {
        let dir = tempfile::tempdir().expect("tempdir");
        let foreign = TcpListener::bind(("127.0.0.1", 47_350)).expect("foreign listener");
        let manager = manager(&dir, 47_350, 47_352);
        let lease = manager.acquire("C_batch1").expect("lease");
        assert_ne!(lease.port(), 47_350);
        drop(foreign);
    }

    #[test]
    fn test_dropped_lease_releases_registry_row() {
        let dir = tempfile::tempdir().expect("tempdir");
        let manager = manager(&dir, 47_360, 47_362);
        {
            let _lease = manager.acquire("D_batch1").expect("lease");
            assert_eq!(manager.list_active().expect("list").len(), 1);
        }
        assert!(manager.list_active().expect("list").is_empty());
    }

    #[test]
    fn test_release_port_and_clear_remove_rows() {
        let dir = tempfile::tempdir().expect("tempdir");
        let manager = manager(&dir, 47_370, 47_374);
        let first = manager.acquire("A_batch1").expect("first");
        let _second = manager.acquire("A_batch2").expect("second");

        assert!(manager.release_port(first.port()).expect("release port"));
        assert!(!manager.release_port(first.port()).expect("second release"));
        assert_eq!(manager.clear().expect("clear"), 1);
        assert!(manager.list_active().expect("list").is_empty());
    }
}
