use std::time::Duration;

use anyhow::{bail, Context};
use async_trait::async_trait;
use redis::Commands;

use super::{network_prefix, Connector, ConnectorIndex, MethodPolicies};

/// Key layout of the redis connector:
///
/// - `<prefix>:<group key>:<request key>` holds the cached result;
/// - `<prefix>:group:<group key>` is the set of request keys in a group;
/// - `<prefix>:<reverse index>:<request key>` is the set of groups holding a request key.
#[derive(Clone, Debug)]
struct RedisKeys {
    prefix: String,
    reverse_index: String,
}

impl RedisKeys {
    fn value(&self, group_key: &str, request_key: &str) -> String {
        format!("{}:{group_key}:{request_key}", self.prefix)
    }

    fn group(&self, group_key: &str) -> String {
        format!("{}:group:{group_key}", self.prefix)
    }

    fn reverse(&self, request_key: &str) -> String {
        format!("{}:{}:{request_key}", self.prefix, self.reverse_index)
    }
}

pub struct RedisConnector {
    policies: MethodPolicies,
    pool: r2d2::Pool<redis::Client>,
    keys: RedisKeys,
}

impl RedisConnector {
    pub fn new(pool: r2d2::Pool<redis::Client>, key_prefix: String, reverse_index: String) -> Self {
        Self {
            policies: MethodPolicies::new(),
            pool,
            keys: RedisKeys {
                prefix: key_prefix,
                reverse_index,
            },
        }
    }

    /// Runs blocking redis commands on a pooled connection off the async runtime.
    async fn run<T, F>(&self, f: F) -> anyhow::Result<T>
    where
        F: FnOnce(&mut redis::Connection, &RedisKeys) -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let pool = self.pool.clone();
        let keys = self.keys.clone();

        tokio::task::spawn_blocking(move || {
            let mut conn = pool.get().context("fail to get redis connection")?;
            f(&mut conn, &keys)
        })
        .await
        .context("redis task failed")?
    }
}

fn groups_in_network(
    conn: &mut redis::Connection,
    keys: &RedisKeys,
    request_key: &str,
    prefix: &str,
) -> anyhow::Result<Vec<String>> {
    let mut groups: Vec<String> = conn
        .smembers::<_, Vec<String>>(keys.reverse(request_key))
        .context("fail to read reverse index")?
        .into_iter()
        .filter(|group| group.starts_with(prefix))
        .collect();

    groups.sort_unstable();
    Ok(groups)
}

fn remove_entries(
    conn: &mut redis::Connection,
    keys: &RedisKeys,
    entries: &[(String, String)],
) -> anyhow::Result<()> {
    if entries.is_empty() {
        return Ok(());
    }

    let mut pipe = redis::pipe();
    pipe.atomic();

    for (group_key, request_key) in entries {
        pipe.del(keys.value(group_key, request_key))
            .ignore()
            .srem(keys.group(group_key), request_key)
            .ignore()
            .srem(keys.reverse(request_key), group_key)
            .ignore();
    }

    pipe.query::<()>(conn).context("fail to delete cache entries")
}

/// Expiry in milliseconds to give a group set after adding a member that
/// expires in `ttl`, given the set's current `PTTL` (-2 missing, -1 persistent).
/// A persistent group keeps entries without TTL and must stay persistent.
fn group_expiry(current_pttl: i64, ttl: Duration) -> Option<u64> {
    let ttl = ttl_millis(ttl);

    match current_pttl {
        -1 => None,
        current if current < 0 => Some(ttl),
        current => Some(ttl.max(current as u64)),
    }
}

fn ttl_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

/// Value key plus both index sets in one transaction. Sets holding only
/// expiring members get an expiry too, so they do not outlive their values.
fn write_pipeline(
    keys: &RedisKeys,
    group_key: &str,
    request_key: &str,
    value: &str,
    ttl: Option<Duration>,
    group_expiry: Option<u64>,
) -> redis::Pipeline {
    let mut pipe = redis::pipe();
    pipe.atomic();

    let value_key = keys.value(group_key, request_key);
    let group = keys.group(group_key);
    let reverse = keys.reverse(request_key);

    match ttl {
        Some(ttl) => pipe.pset_ex(&value_key, value, ttl_millis(ttl)),
        None => pipe.set(&value_key, value),
    }
    .ignore()
    .sadd(&group, request_key)
    .ignore()
    .sadd(&reverse, group_key)
    .ignore();

    match (ttl, group_expiry) {
        (None, _) => {
            pipe.persist(&group).ignore();
        }
        (Some(_), Some(expiry)) => {
            pipe.pexpire(&group, expiry as i64).ignore();
        }
        (Some(_), None) => {}
    }

    // every group under one request key shares the method, hence the TTL
    if let Some(ttl) = ttl {
        pipe.pexpire(&reverse, ttl_millis(ttl) as i64).ignore();
    }

    pipe
}

#[async_trait]
impl Connector for RedisConnector {
    async fn get(
        &self,
        index: ConnectorIndex,
        group_key: &str,
        request_key: &str,
    ) -> anyhow::Result<Option<String>> {
        let group_key = group_key.to_string();
        let request_key = request_key.to_string();

        self.run(move |conn, keys| match index {
            ConnectorIndex::Primary => conn
                .get::<_, Option<String>>(keys.value(&group_key, &request_key))
                .context("fail to read cache value"),
            ConnectorIndex::Reverse => {
                let prefix = network_prefix(&group_key);

                for group in groups_in_network(conn, keys, &request_key, prefix)? {
                    let value: Option<String> = conn
                        .get(keys.value(&group, &request_key))
                        .context("fail to read cache value")?;

                    match value {
                        Some(value) => return Ok(Some(value)),
                        // value expired, drop the dangling reverse entry
                        None => {
                            let _: () = conn.srem(keys.reverse(&request_key), &group)?;
                        }
                    }
                }

                Ok(None)
            }
        })
        .await
    }

    async fn set(&self, group_key: &str, request_key: &str, value: &str) -> anyhow::Result<()> {
        let ttl = self.policies.ttl_for_request_key(request_key);
        let group_key = group_key.to_string();
        let request_key = request_key.to_string();
        let value = value.to_string();

        self.run(move |conn, keys| {
            let group_expiry = match ttl {
                Some(ttl) => {
                    let current: i64 = conn
                        .pttl(keys.group(&group_key))
                        .context("fail to read cache group ttl")?;
                    group_expiry(current, ttl)
                }
                None => None,
            };

            write_pipeline(keys, &group_key, &request_key, &value, ttl, group_expiry)
                .query::<()>(conn)
                .context("fail to write cache value")
        })
        .await
    }

    async fn delete(
        &self,
        index: ConnectorIndex,
        group_key: &str,
        request_key: Option<&str>,
    ) -> anyhow::Result<()> {
        let group_key = group_key.to_string();
        let request_key = request_key.map(str::to_string);

        self.run(move |conn, keys| {
            let entries: Vec<(String, String)> = match (index, request_key) {
                (ConnectorIndex::Primary, Some(request_key)) => vec![(group_key, request_key)],
                (ConnectorIndex::Primary, None) => {
                    let members: Vec<String> = conn
                        .smembers(keys.group(&group_key))
                        .context("fail to read cache group")?;

                    members
                        .into_iter()
                        .map(|request_key| (group_key.clone(), request_key))
                        .collect()
                }
                (ConnectorIndex::Reverse, Some(request_key)) => {
                    groups_in_network(conn, keys, &request_key, network_prefix(&group_key))?
                        .into_iter()
                        .map(|group| (group, request_key.clone()))
                        .collect()
                }
                (ConnectorIndex::Reverse, None) => {
                    bail!("reverse index delete requires a request key")
                }
            };

            remove_entries(conn, keys, &entries)
        })
        .await
    }

    fn method_policies(&self) -> &MethodPolicies {
        &self.policies
    }

    fn method_policies_mut(&mut self) -> &mut MethodPolicies {
        &mut self.policies
    }
}
