use std::collections::HashMap;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use redis::aio::ConnectionManager;
use redis::Value;

use crate::config::Config;
use crate::error::{Error, Result};

/// A single command argument; index and search commands mix text arguments
/// with raw binary blobs (packed vectors), so both shapes are first-class.
#[derive(Debug, Clone, PartialEq)]
pub enum CmdArg {
    Str(String),
    Bin(Vec<u8>),
}

impl CmdArg {
    fn append_to(&self, cmd: &mut redis::Cmd) {
        match self {
            CmdArg::Str(s) => {
                cmd.arg(s);
            }
            CmdArg::Bin(b) => {
                cmd.arg(&b[..]);
            }
        }
    }
}

impl From<&str> for CmdArg {
    fn from(s: &str) -> Self {
        CmdArg::Str(s.to_string())
    }
}

impl From<String> for CmdArg {
    fn from(s: String) -> Self {
        CmdArg::Str(s)
    }
}

/// Search/JSON module availability reported by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerCapabilities {
    pub search: bool,
    pub json: bool,
}

/// Wire client shared across models: a `ConnectionManager` plus capability
/// flags learned from command errors. All suspension points of the library
/// go through this type.
#[derive(Clone)]
pub struct RedisClient {
    conn: ConnectionManager,
    config: Config,
    supports_hexpire: Arc<AtomicBool>,
}

impl RedisClient {
    pub async fn new(config: Config) -> Result<Self> {
        let client = redis::Client::open(config.redis_url.as_str())
            .map_err(|e| Error::Config(format!("invalid Redis URL: {}", e)))?;
        let conn = client.get_connection_manager().await?;
        Ok(Self {
            conn,
            config,
            supports_hexpire: Arc::new(AtomicBool::new(true)),
        })
    }

    pub async fn from_env() -> Result<Self> {
        Self::new(Config::from_env()).await
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub async fn ping(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        redis::cmd("PING").query_async::<_, String>(&mut conn).await?;
        Ok(())
    }

    /// Probe the server's module capabilities from the INFO reply. Useful
    /// at startup; individual commands still surface typed capability
    /// errors when a module turns out to be missing.
    pub async fn capabilities(&self) -> Result<ServerCapabilities> {
        let mut conn = self.conn.clone();
        let info: String = redis::cmd("INFO")
            .arg("modules")
            .query_async(&mut conn)
            .await?;
        Ok(ServerCapabilities {
            search: info.contains("name=search"),
            json: info.contains("name=ReJSON"),
        })
    }

    // ── Key I/O ─────────────────────────────────────────────────────────

    pub async fn hset(&self, key: &str, pairs: &[(String, Vec<u8>)]) -> Result<()> {
        let mut cmd = redis::cmd("HSET");
        cmd.arg(key);
        for (field, value) in pairs {
            cmd.arg(field).arg(&value[..]);
        }
        let mut conn = self.conn.clone();
        cmd.query_async::<_, ()>(&mut conn).await?;
        Ok(())
    }

    /// HSETNX on a sentinel field; true when this call created the field.
    pub async fn hsetnx(&self, key: &str, field: &str, value: &[u8]) -> Result<bool> {
        let mut conn = self.conn.clone();
        let created: i32 = redis::cmd("HSETNX")
            .arg(key)
            .arg(field)
            .arg(value)
            .query_async(&mut conn)
            .await?;
        Ok(created == 1)
    }

    pub async fn hgetall(&self, key: &str) -> Result<HashMap<String, Vec<u8>>> {
        let mut conn = self.conn.clone();
        let map: HashMap<String, Vec<u8>> =
            redis::cmd("HGETALL").arg(key).query_async(&mut conn).await?;
        Ok(map)
    }

    pub async fn hdel(&self, key: &str, fields: &[String]) -> Result<()> {
        if fields.is_empty() {
            return Ok(());
        }
        let mut cmd = redis::cmd("HDEL");
        cmd.arg(key);
        for f in fields {
            cmd.arg(f);
        }
        let mut conn = self.conn.clone();
        cmd.query_async::<_, ()>(&mut conn).await?;
        Ok(())
    }

    pub async fn del(&self, key: &str) -> Result<u64> {
        let mut conn = self.conn.clone();
        let removed: u64 = redis::cmd("DEL").arg(key).query_async(&mut conn).await?;
        Ok(removed)
    }

    pub async fn exists(&self, key: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        let n: i32 = redis::cmd("EXISTS").arg(key).query_async(&mut conn).await?;
        Ok(n == 1)
    }

    pub async fn expire(&self, key: &str, seconds: i64) -> Result<bool> {
        let mut conn = self.conn.clone();
        let set: i32 = redis::cmd("EXPIRE")
            .arg(key)
            .arg(seconds)
            .query_async(&mut conn)
            .await?;
        Ok(set == 1)
    }

    /// Field-level TTL. Servers without HEXPIRE (pre-7.4) make this a no-op;
    /// the first miss flips a flag and logs a warning, subsequent calls skip
    /// the round trip. Returns whether the TTL was actually applied.
    pub async fn hexpire(&self, key: &str, field: &str, seconds: i64) -> Result<bool> {
        if !self.supports_hexpire.load(Ordering::Relaxed) {
            return Ok(false);
        }
        let mut conn = self.conn.clone();
        let res: std::result::Result<Value, redis::RedisError> = redis::cmd("HEXPIRE")
            .arg(key)
            .arg(seconds)
            .arg("FIELDS")
            .arg(1)
            .arg(field)
            .query_async(&mut conn)
            .await;
        match res {
            Ok(_) => Ok(true),
            Err(e) if e.to_string().contains("unknown command") => {
                self.supports_hexpire.store(false, Ordering::Relaxed);
                tracing::warn!(key, field, "server has no HEXPIRE; field TTL ignored");
                Ok(false)
            }
            Err(e) => Err(Error::Redis(e)),
        }
    }

    pub async fn get_string(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        let val: Option<String> = redis::cmd("GET").arg(key).query_async(&mut conn).await?;
        Ok(val)
    }

    pub async fn set_string(&self, key: &str, value: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        redis::cmd("SET")
            .arg(key)
            .arg(value)
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }

    // ── Sets (migration applied-set) ────────────────────────────────────

    pub async fn sadd(&self, key: &str, member: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        redis::cmd("SADD")
            .arg(key)
            .arg(member)
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }

    pub async fn srem(&self, key: &str, member: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        redis::cmd("SREM")
            .arg(key)
            .arg(member)
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }

    pub async fn smembers(&self, key: &str) -> Result<Vec<String>> {
        let mut conn = self.conn.clone();
        let members: Vec<String> = redis::cmd("SMEMBERS").arg(key).query_async(&mut conn).await?;
        Ok(members)
    }

    pub async fn sismember(&self, key: &str, member: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        let found: i32 = redis::cmd("SISMEMBER")
            .arg(key)
            .arg(member)
            .query_async(&mut conn)
            .await?;
        Ok(found == 1)
    }

    // ── JSON documents ──────────────────────────────────────────────────

    pub async fn json_set(&self, key: &str, value: &serde_json::Value) -> Result<()> {
        let payload = serde_json::to_string(value)?;
        let mut conn = self.conn.clone();
        redis::cmd("JSON.SET")
            .arg(key)
            .arg("$")
            .arg(payload)
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(|e| Error::from_redis_for("JSON.SET", e))?;
        Ok(())
    }

    /// JSON.SET with NX/XX; `Ok(false)` means the condition was not met.
    pub async fn json_set_cond(
        &self,
        key: &str,
        value: &serde_json::Value,
        when_absent: bool,
    ) -> Result<bool> {
        let payload = serde_json::to_string(value)?;
        let mut conn = self.conn.clone();
        let reply: Option<String> = redis::cmd("JSON.SET")
            .arg(key)
            .arg("$")
            .arg(payload)
            .arg(if when_absent { "NX" } else { "XX" })
            .query_async(&mut conn)
            .await
            .map_err(|e| Error::from_redis_for("JSON.SET", e))?;
        Ok(reply.is_some())
    }

    pub async fn json_get(&self, key: &str) -> Result<Option<serde_json::Value>> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = redis::cmd("JSON.GET")
            .arg(key)
            .arg("$")
            .query_async(&mut conn)
            .await
            .map_err(|e| Error::from_redis_for("JSON.GET", e))?;
        match raw {
            None => Ok(None),
            Some(text) => {
                // JSON.GET with a `$` path replies with a one-element array.
                let parsed: serde_json::Value = serde_json::from_str(&text)?;
                match parsed {
                    serde_json::Value::Array(mut items) if !items.is_empty() => {
                        Ok(Some(items.remove(0)))
                    }
                    other => Ok(Some(other)),
                }
            }
        }
    }

    pub async fn json_del(&self, key: &str) -> Result<u64> {
        let mut conn = self.conn.clone();
        let removed: u64 = redis::cmd("JSON.DEL")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| Error::from_redis_for("JSON.DEL", e))?;
        Ok(removed)
    }

    // ── Scan ────────────────────────────────────────────────────────────

    /// One SCAN page: returns the next cursor and the keys of this batch.
    /// A returned cursor of 0 means the iteration is complete.
    pub async fn scan_page(
        &self,
        cursor: u64,
        pattern: &str,
        count: usize,
    ) -> Result<(u64, Vec<String>)> {
        let mut conn = self.conn.clone();
        let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
            .arg(cursor)
            .arg("MATCH")
            .arg(pattern)
            .arg("COUNT")
            .arg(count)
            .query_async(&mut conn)
            .await?;
        Ok((next, keys))
    }

    // ── Search ──────────────────────────────────────────────────────────

    pub async fn ft_create(&self, args: &[CmdArg]) -> Result<()> {
        let mut cmd = redis::cmd("FT.CREATE");
        for arg in args {
            arg.append_to(&mut cmd);
        }
        let mut conn = self.conn.clone();
        cmd.query_async::<_, ()>(&mut conn)
            .await
            .map_err(|e| Error::from_redis_for("FT.CREATE", e))?;
        Ok(())
    }

    /// Drop an index, treating "no such index" as success.
    pub async fn ft_dropindex(&self, index_name: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let res: std::result::Result<(), redis::RedisError> = redis::cmd("FT.DROPINDEX")
            .arg(index_name)
            .query_async(&mut conn)
            .await;
        match res {
            Ok(()) => Ok(()),
            Err(e) => {
                let msg = e.to_string();
                if msg.contains("Unknown Index") || msg.contains("no such index") {
                    Ok(())
                } else {
                    Err(Error::from_redis_for("FT.DROPINDEX", e))
                }
            }
        }
    }

    pub async fn ft_search_raw(&self, args: &[CmdArg]) -> Result<Value> {
        let mut cmd = redis::cmd("FT.SEARCH");
        for arg in args {
            arg.append_to(&mut cmd);
        }
        let mut conn = self.conn.clone();
        let reply: Value = cmd
            .query_async(&mut conn)
            .await
            .map_err(|e| Error::from_redis_for("FT.SEARCH", e))?;
        Ok(reply)
    }

    pub async fn ft_info(&self, index_name: &str) -> Result<Value> {
        let mut conn = self.conn.clone();
        let reply: Value = redis::cmd("FT.INFO")
            .arg(index_name)
            .query_async(&mut conn)
            .await
            .map_err(|e| Error::from_redis_for("FT.INFO", e))?;
        Ok(reply)
    }

    // ── Pipelines ───────────────────────────────────────────────────────

    /// Run a caller-assembled pipeline in one round trip.
    pub async fn run_pipeline(&self, pipe: &redis::Pipeline) -> Result<()> {
        let mut conn = self.conn.clone();
        pipe.query_async::<_, ()>(&mut conn).await?;
        Ok(())
    }
}
