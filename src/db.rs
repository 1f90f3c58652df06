//! Database connection pooling and the user-credential store used by
//! the login/register routes.
//!
//! The pool is a classic counting semaphore built on `Mutex` +
//! `Condvar`: a fixed number of `mysql::Conn` handles are created up
//! front, callers block on `acquire()` until one is free, and the
//! returned [`PooledConn`] guard returns its connection to the pool on
//! drop (RAII release, no explicit "give it back" call to forget).

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};

use mysql::prelude::Queryable;
use mysql::{Conn, Opts};
use tracing::{info, warn};

use crate::error::PoolError;

struct PoolInner {
    idle: Mutex<VecDeque<Conn>>,
    available: Condvar,
    closed: Mutex<bool>,
}

/// A bounded pool of MySQL connections.
#[derive(Clone)]
pub struct SqlConnPool {
    inner: Arc<PoolInner>,
}

impl SqlConnPool {
    /// Opens `size` connections to `url` up front and returns a pool
    /// ready to hand them out. Fails if any single connection can't be
    /// established, matching the original's "connect eagerly, fail
    /// fast at startup rather than on first request" behavior.
    pub fn new(url: &str, size: usize) -> Result<Self, PoolError> {
        let opts = Opts::from_url(url).map_err(mysql::Error::from)?;
        let mut idle = VecDeque::with_capacity(size);
        for _ in 0..size {
            idle.push_back(Conn::new(opts.clone())?);
        }
        info!(size, "database connection pool ready");
        Ok(Self {
            inner: Arc::new(PoolInner {
                idle: Mutex::new(idle),
                available: Condvar::new(),
                closed: Mutex::new(false),
            }),
        })
    }

    /// Blocks until a connection is free, then hands out an RAII guard
    /// that returns it to the pool when dropped.
    pub fn acquire(&self) -> Result<PooledConn, PoolError> {
        let mut idle = self.inner.idle.lock().unwrap();
        loop {
            if *self.inner.closed.lock().unwrap() {
                return Err(PoolError::Closed);
            }
            if let Some(conn) = idle.pop_front() {
                return Ok(PooledConn {
                    conn: Some(conn),
                    pool: self.inner.clone(),
                });
            }
            idle = self.inner.available.wait(idle).unwrap();
        }
    }

    /// Marks the pool closed; any thread currently blocked in
    /// `acquire()` wakes and receives `PoolError::Closed` instead of a
    /// connection.
    pub fn close(&self) {
        *self.inner.closed.lock().unwrap() = true;
        self.inner.available.notify_all();
    }
}

/// A connection checked out of a [`SqlConnPool`]. Returns itself to the
/// pool's idle queue on drop.
pub struct PooledConn {
    conn: Option<Conn>,
    pool: Arc<PoolInner>,
}

impl std::ops::Deref for PooledConn {
    type Target = Conn;
    fn deref(&self) -> &Conn {
        self.conn.as_ref().expect("conn taken only on drop")
    }
}

impl std::ops::DerefMut for PooledConn {
    fn deref_mut(&mut self) -> &mut Conn {
        self.conn.as_mut().expect("conn taken only on drop")
    }
}

impl Drop for PooledConn {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.idle.lock().unwrap().push_back(conn);
            self.pool.available.notify_one();
        }
    }
}

/// Credential lookup and registration, abstracted so the reactor can be
/// exercised against an in-memory fake in tests without a real MySQL
/// instance.
pub trait UserStore: Send + Sync {
    /// `Ok(true)` if `username`/`password` match an existing row.
    fn verify_login(&self, username: &str, password: &str) -> Result<bool, PoolError>;

    /// Registers a new user. `Ok(true)` on success, `Ok(false)` if the
    /// username is already taken.
    fn register(&self, username: &str, password: &str) -> Result<bool, PoolError>;
}

/// [`UserStore`] backed by a real MySQL `user` table (`username`,
/// `password` columns).
pub struct MySqlStore {
    pool: SqlConnPool,
}

impl MySqlStore {
    pub fn new(pool: SqlConnPool) -> Self {
        Self { pool }
    }
}

impl UserStore for MySqlStore {
    fn verify_login(&self, username: &str, password: &str) -> Result<bool, PoolError> {
        let mut conn = self.pool.acquire()?;
        let row: Option<String> = conn.exec_first(
            "SELECT password FROM user WHERE username = ?",
            (username,),
        )?;
        Ok(row.as_deref() == Some(password))
    }

    fn register(&self, username: &str, password: &str) -> Result<bool, PoolError> {
        let mut conn = self.pool.acquire()?;
        let existing: Option<String> = conn.exec_first(
            "SELECT username FROM user WHERE username = ?",
            (username,),
        )?;
        if existing.is_some() {
            warn!(username, "registration attempted for existing user");
            return Ok(false);
        }
        conn.exec_drop(
            "INSERT INTO user(username, password) VALUES (?, ?)",
            (username, password),
        )?;
        Ok(true)
    }
}

/// An in-process [`UserStore`] fake, used by integration tests and any
/// deployment that wants to run without a database.
#[derive(Default)]
pub struct InMemoryStore {
    users: Mutex<std::collections::HashMap<String, String>>,
}

impl UserStore for InMemoryStore {
    fn verify_login(&self, username: &str, password: &str) -> Result<bool, PoolError> {
        Ok(self.users.lock().unwrap().get(username).map(String::as_str) == Some(password))
    }

    fn register(&self, username: &str, password: &str) -> Result<bool, PoolError> {
        let mut users = self.users.lock().unwrap();
        if users.contains_key(username) {
            return Ok(false);
        }
        users.insert(username.to_string(), password.to_string());
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_memory_store_rejects_duplicate_registration() {
        let store = InMemoryStore::default();
        assert!(store.register("alice", "hunter2").unwrap());
        assert!(!store.register("alice", "different").unwrap());
    }

    #[test]
    fn in_memory_store_verifies_matching_credentials_only() {
        let store = InMemoryStore::default();
        store.register("alice", "hunter2").unwrap();
        assert!(store.verify_login("alice", "hunter2").unwrap());
        assert!(!store.verify_login("alice", "wrong").unwrap());
        assert!(!store.verify_login("bob", "hunter2").unwrap());
    }
}
