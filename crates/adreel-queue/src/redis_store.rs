//! Redis-backed job store.
//!
//! Layout under `{prefix}`:
//! - `{prefix}:job:{id}`: job document (JSON)
//! - `{prefix}:delayed`: zset of queued ids scored by `available_at` (ms)
//! - `{prefix}:ready`: zset of claimable jobs, score `-priority`, member
//!   `{created_ms:015}|{id}` so equal priorities pop oldest first
//! - `{prefix}:rank`: hash id -> `"{score} {member}"` for the ready zset
//! - `{prefix}:processing`: zset of ids scored by `updated_at` (ms)
//! - `{prefix}:completed`, `{prefix}:failed`: zsets scored by `completed_at`
//! - `{prefix}:external`: hash external job id -> id
//!
//! Claiming runs as one Lua script that promotes due delayed jobs and pops
//! the best ready one, so two workers can never lease the same job. Updates
//! run as a Lua compare-and-swap on `(status, attempts)`.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::{AsyncCommands, Script};
use tracing::{debug, info, warn};

use adreel_models::{Job, JobId, JobStatus};

use crate::error::{QueueError, QueueResult};
use crate::state;
use crate::store::JobStore;

/// Moves `ARGV[1]` (id) into the set matching `ARGV[2]` (status) with score
/// `ARGV[3]`, removing it from every other set.
const INDEX_FN: &str = r#"
local function index(prefix, id, status, score)
  local rank = redis.call('HGET', prefix .. ':rank', id)
  if rank then
    local member = string.match(rank, '^%S+ (.+)$')
    redis.call('ZREM', prefix .. ':ready', member)
  end
  redis.call('ZREM', prefix .. ':delayed', id)
  redis.call('ZREM', prefix .. ':processing', id)
  if status == 'queued' then
    redis.call('ZADD', prefix .. ':delayed', score, id)
  elseif status == 'processing' then
    redis.call('ZADD', prefix .. ':processing', score, id)
  else
    redis.call('HDEL', prefix .. ':rank', id)
    redis.call('ZADD', prefix .. ':' .. status, score, id)
  end
end
"#;

/// KEYS: none. ARGV: prefix, id, json, status, score, rank, external id.
const INSERT_SCRIPT: &str = r#"
local prefix, id = ARGV[1], ARGV[2]
if redis.call('SETNX', prefix .. ':job:' .. id, ARGV[3]) == 0 then
  return 0
end
redis.call('HSET', prefix .. ':rank', id, ARGV[6])
if ARGV[7] ~= '' then
  redis.call('HSET', prefix .. ':external', ARGV[7], id)
end
index(prefix, id, ARGV[4], ARGV[5])
return 1
"#;

/// ARGV: prefix, now (ms). Returns the leased id or nil.
const CLAIM_SCRIPT: &str = r#"
local prefix, now = ARGV[1], ARGV[2]
local due = redis.call('ZRANGEBYSCORE', prefix .. ':delayed', '-inf', now)
for _, id in ipairs(due) do
  local rank = redis.call('HGET', prefix .. ':rank', id)
  if rank then
    local score, member = string.match(rank, '^(%S+) (.+)$')
    redis.call('ZADD', prefix .. ':ready', score, member)
  end
  redis.call('ZREM', prefix .. ':delayed', id)
end
local popped = redis.call('ZPOPMIN', prefix .. ':ready')
if #popped == 0 then
  return false
end
local id = string.match(popped[1], '|(.+)$')
redis.call('ZADD', prefix .. ':processing', now, id)
return id
"#;

/// ARGV: prefix, id, expected status, expected attempts, json, status,
/// score, external id. Returns `ok`, `missing`, `terminal:<s>` or
/// `conflict:<s>`.
const UPDATE_SCRIPT: &str = r#"
local prefix, id = ARGV[1], ARGV[2]
local key = prefix .. ':job:' .. id
local raw = redis.call('GET', key)
if not raw then
  return 'missing'
end
local current = cjson.decode(raw)
if current['status'] == 'completed' or current['status'] == 'failed' then
  return 'terminal:' .. current['status']
end
if current['status'] ~= ARGV[3] or tonumber(current['attempts']) ~= tonumber(ARGV[4]) then
  return 'conflict:' .. current['status']
end
redis.call('SET', key, ARGV[5])
local old = current['external_job_id']
if type(old) == 'string' and old ~= ARGV[8] and redis.call('HGET', prefix .. ':external', old) == id then
  redis.call('HDEL', prefix .. ':external', old)
end
if ARGV[8] ~= '' then
  redis.call('HSET', prefix .. ':external', ARGV[8], id)
end
index(prefix, id, ARGV[6], ARGV[7])
return 'ok'
"#;

/// Job store backed by Redis.
pub struct RedisJobStore {
    client: redis::Client,
    prefix: String,
    insert: Script,
    claim: Script,
    update: Script,
}

impl RedisJobStore {
    /// Create a store. Does not connect until first use.
    pub fn new(redis_url: &str, prefix: impl Into<String>) -> QueueResult<Self> {
        let client = redis::Client::open(redis_url)?;
        Ok(Self {
            client,
            prefix: prefix.into(),
            insert: Script::new(&format!("{INDEX_FN}{INSERT_SCRIPT}")),
            claim: Script::new(CLAIM_SCRIPT),
            update: Script::new(&format!("{INDEX_FN}{UPDATE_SCRIPT}")),
        })
    }

    async fn conn(&self) -> QueueResult<redis::aio::MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| QueueError::connection_failed(e.to_string()))
    }

    fn key(&self, suffix: &str) -> String {
        format!("{}:{}", self.prefix, suffix)
    }

    fn job_key(&self, id: &str) -> String {
        format!("{}:job:{}", self.prefix, id)
    }

    async fn load(&self, conn: &mut redis::aio::MultiplexedConnection, id: &str) -> QueueResult<Option<Job>> {
        let raw: Option<String> = conn.get(self.job_key(id)).await?;
        raw.map(|r| serde_json::from_str(&r).map_err(QueueError::from))
            .transpose()
    }

    async fn load_many(&self, conn: &mut redis::aio::MultiplexedConnection, ids: &[String]) -> QueueResult<Vec<Job>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let keys: Vec<String> = ids.iter().map(|id| self.job_key(id)).collect();
        let raws: Vec<Option<String>> = redis::cmd("MGET").arg(&keys).query_async(conn).await?;

        let mut jobs = Vec::with_capacity(raws.len());
        for (id, raw) in ids.iter().zip(raws) {
            match raw.map(|r| serde_json::from_str::<Job>(&r)) {
                Some(Ok(job)) => jobs.push(job),
                Some(Err(e)) => warn!(job_id = %id, error = %e, "Skipping unreadable job document"),
                None => debug!(job_id = %id, "Indexed job has no document"),
            }
        }
        Ok(jobs)
    }

    async fn cas(&self, current: &Job, next: &Job) -> QueueResult<()> {
        let mut conn = self.conn().await?;
        let reply: String = self
            .update
            .arg(&self.prefix)
            .arg(next.id.as_str())
            .arg(current.status.as_str())
            .arg(current.attempts)
            .arg(serde_json::to_string(next)?)
            .arg(next.status.as_str())
            .arg(index_score(next))
            .arg(next.external_job_id.as_deref().unwrap_or(""))
            .invoke_async(&mut conn)
            .await?;

        match reply.split_once(':') {
            None if reply == "ok" => Ok(()),
            None => Err(QueueError::not_found(next.id.as_str())),
            Some(("terminal", status)) => Err(QueueError::TerminalState {
                id: next.id.to_string(),
                status: status.parse().unwrap_or(JobStatus::Failed),
            }),
            Some((_, status)) => Err(QueueError::Conflict {
                id: next.id.to_string(),
                expected: current.status,
                actual: status.parse().unwrap_or(current.status),
            }),
        }
    }
}

/// Score under which a job is indexed for its current status.
fn index_score(job: &Job) -> i64 {
    match job.status {
        JobStatus::Queued => job.available_at.timestamp_millis(),
        JobStatus::Processing => job.updated_at.timestamp_millis(),
        JobStatus::Completed | JobStatus::Failed => job
            .completed_at
            .unwrap_or(job.updated_at)
            .timestamp_millis(),
    }
}

/// Ready-zset rank: `"{-priority} {created_ms:015}|{id}"`.
fn rank(job: &Job) -> String {
    format!(
        "{} {:015}|{}",
        -i64::from(job.priority),
        job.created_at.timestamp_millis().max(0),
        job.id
    )
}

#[async_trait]
impl JobStore for RedisJobStore {
    async fn insert(&self, job: &Job) -> QueueResult<()> {
        let mut conn = self.conn().await?;
        let inserted: i64 = self
            .insert
            .arg(&self.prefix)
            .arg(job.id.as_str())
            .arg(serde_json::to_string(job)?)
            .arg(job.status.as_str())
            .arg(index_score(job))
            .arg(rank(job))
            .arg(job.external_job_id.as_deref().unwrap_or(""))
            .invoke_async(&mut conn)
            .await?;

        if inserted == 0 {
            return Err(QueueError::DuplicateJob(job.id.to_string()));
        }
        Ok(())
    }

    async fn get(&self, id: &JobId) -> QueueResult<Option<Job>> {
        let mut conn = self.conn().await?;
        self.load(&mut conn, id.as_str()).await
    }

    async fn find_by_external_id(&self, external_job_id: &str) -> QueueResult<Option<Job>> {
        let mut conn = self.conn().await?;
        let id: Option<String> = conn.hget(self.key("external"), external_job_id).await?;
        match id {
            Some(id) => self.load(&mut conn, &id).await,
            None => Ok(None),
        }
    }

    async fn claim_next(&self, now: DateTime<Utc>) -> QueueResult<Option<Job>> {
        let mut conn = self.conn().await?;
        loop {
            let leased: Option<String> = self
                .claim
                .arg(&self.prefix)
                .arg(now.timestamp_millis())
                .invoke_async(&mut conn)
                .await?;
            let Some(id) = leased else {
                return Ok(None);
            };

            let Some(current) = self.load(&mut conn, &id).await? else {
                warn!(job_id = %id, "Leased job has no document; dropping lease");
                let _: () = conn.zrem(self.key("processing"), &id).await?;
                continue;
            };

            let mut claimed = current.clone();
            if let Err(e) = state::claim(&mut claimed, now) {
                warn!(job_id = %id, error = %e, "Leased job is not claimable");
                if current.status == JobStatus::Processing {
                    let _: () = conn
                        .zadd(self.key("processing"), &id, index_score(&current))
                        .await?;
                } else {
                    let _: () = conn.zrem(self.key("processing"), &id).await?;
                }
                continue;
            }

            match self.cas(&current, &claimed).await {
                Ok(()) => return Ok(Some(claimed)),
                Err(e) if e.is_race() => {
                    warn!(job_id = %id, error = %e, "Lost claim race");
                    continue;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn update(&self, current: &Job, next: &Job) -> QueueResult<()> {
        self.cas(current, next).await
    }

    async fn list_stuck(&self, threshold: Duration, now: DateTime<Utc>) -> QueueResult<Vec<Job>> {
        let mut conn = self.conn().await?;
        let cutoff = now.timestamp_millis() - threshold.as_millis() as i64;
        let ids: Vec<String> = conn
            .zrangebyscore(self.key("processing"), "-inf", cutoff)
            .await?;

        let mut stuck = Vec::new();
        for job in self.load_many(&mut conn, &ids).await? {
            if job.status == JobStatus::Queued {
                // Lease taken by a claimer that died before writing.
                info!(job_id = %job.id, "Releasing orphaned claim lease");
                let _: () = conn.zrem(self.key("processing"), job.id.as_str()).await?;
                let _: () = conn
                    .zadd(self.key("delayed"), job.id.as_str(), index_score(&job))
                    .await?;
                continue;
            }
            if job.status == JobStatus::Processing {
                stuck.push(job);
            }
        }
        Ok(stuck)
    }

    async fn list_by_status(&self, status: JobStatus) -> QueueResult<Vec<Job>> {
        let mut conn = self.conn().await?;
        let ids: Vec<String> = match status {
            JobStatus::Queued => {
                let mut ids: Vec<String> = conn.zrange(self.key("delayed"), 0, -1).await?;
                let ready: Vec<String> = conn.zrange(self.key("ready"), 0, -1).await?;
                ids.extend(
                    ready
                        .into_iter()
                        .filter_map(|m| m.split_once('|').map(|(_, id)| id.to_string())),
                );
                ids
            }
            other => conn.zrange(self.key(other.as_str()), 0, -1).await?,
        };

        let jobs = self.load_many(&mut conn, &ids).await?;
        Ok(jobs.into_iter().filter(|j| j.status == status).collect())
    }

    async fn len(&self) -> QueueResult<usize> {
        let mut conn = self.conn().await?;
        let mut total = 0usize;
        for set in ["delayed", "ready", "processing", "completed", "failed"] {
            let n: usize = conn.zcard(self.key(set)).await?;
            total += n;
        }
        Ok(total)
    }

    async fn ping(&self) -> QueueResult<()> {
        let mut conn = self.conn().await?;
        redis::cmd("PING").query_async::<()>(&mut conn).await?;
        Ok(())
    }
}
