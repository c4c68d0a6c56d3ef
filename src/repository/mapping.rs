use anyhow::Result;
use chrono::{DateTime, TimeZone, Utc};
use sqlx::SqlitePool;

/// key 计数的纪元：2017-11-01 UTC（1 秒 1 个号，足够此用途）
fn key_epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2017, 11, 1, 0, 0, 0).unwrap()
}

const KEY_ALPHABET: &[u8; 64] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-_";

/// 把计数编码成短 key（base64url 字符表，高位在前）
fn derive_key(mut counter: u64) -> String {
    if counter == 0 {
        return "A".to_string();
    }
    let mut digits = Vec::new();
    while counter > 0 {
        digits.push(KEY_ALPHABET[(counter % 64) as usize]);
        counter /= 64;
    }
    digits.reverse();
    String::from_utf8(digits).unwrap_or_default()
}

/// 站点映射：短 key 对应一个源仓库 URL
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct SiteMapping {
    pub key: String,
    pub url: String,
    pub created_at: String,
}

#[derive(Clone)]
pub struct MappingRepository {
    db: SqlitePool,
}

impl MappingRepository {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// 按 key 查映射。查无此 key 是常态而非异常，返回 None。
    pub async fn resolve(&self, key: &str) -> Result<Option<SiteMapping>> {
        let mapping = sqlx::query_as::<_, SiteMapping>(
            "SELECT key, url, created_at FROM mappings WHERE key = ?",
        )
        .bind(key)
        .fetch_optional(&self.db)
        .await?;
        Ok(mapping)
    }

    /// 幂等注册：同一 URL 永远得到同一个 key。
    /// 新 key 来自时间窗计数；撞号时顺延计数重试。
    pub async fn register(&self, url: &str) -> Result<SiteMapping> {
        if let Some(existing) = self.find_by_url(url).await? {
            return Ok(existing);
        }

        let base = (Utc::now() - key_epoch()).num_seconds().max(0) as u64;
        for attempt in 0..8 {
            let key = derive_key(base + attempt);
            let created_at = Utc::now().to_rfc3339();
            let inserted = sqlx::query(
                "INSERT OR IGNORE INTO mappings (key, url, created_at) VALUES (?, ?, ?)",
            )
            .bind(&key)
            .bind(url)
            .bind(&created_at)
            .execute(&self.db)
            .await?;

            if inserted.rows_affected() > 0 {
                return Ok(SiteMapping {
                    key,
                    url: url.to_string(),
                    created_at,
                });
            }
            // 没插进去：要么 key 撞号（顺延重试），要么并发注册了同一 URL
            if let Some(existing) = self.find_by_url(url).await? {
                return Ok(existing);
            }
        }
        anyhow::bail!("注册站点映射失败：key 连续撞号")
    }

    async fn find_by_url(&self, url: &str) -> Result<Option<SiteMapping>> {
        let mapping = sqlx::query_as::<_, SiteMapping>(
            "SELECT key, url, created_at FROM mappings WHERE url = ?",
        )
        .bind(url)
        .fetch_optional(&self.db)
        .await?;
        Ok(mapping)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_pool() -> SqlitePool {
        // 内存库一条连接一个实例，池必须锁定单连接
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        sqlx::migrate!("./migrations").run(&pool).await.unwrap();
        pool
    }

    #[test]
    fn key_derivation_is_stable_and_short() {
        assert_eq!(derive_key(0), "A");
        assert_eq!(derive_key(1), "B");
        assert_eq!(derive_key(64), "BA");
        assert_eq!(derive_key(64 * 64 + 1), "BAB");
        // 相同计数相同 key，不同计数不同 key
        assert_eq!(derive_key(123_456_789), derive_key(123_456_789));
        assert_ne!(derive_key(123_456_789), derive_key(123_456_790));
    }

    #[test]
    fn keys_stay_url_safe() {
        for counter in [0u64, 7, 63, 64, 4095, 1 << 30] {
            let key = derive_key(counter);
            assert!(
                key.chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'),
                "非法字符：{key}"
            );
        }
    }

    #[tokio::test]
    async fn register_is_idempotent_per_url() {
        let repo = MappingRepository::new(test_pool().await);
        let first = repo.register("https://example.com/a.git").await.unwrap();
        let second = repo.register("https://example.com/a.git").await.unwrap();
        assert_eq!(first.key, second.key);

        let other = repo.register("https://example.com/b.git").await.unwrap();
        assert_ne!(first.key, other.key);
    }

    #[tokio::test]
    async fn resolve_round_trips_and_misses_as_none() {
        let repo = MappingRepository::new(test_pool().await);
        let created = repo.register("https://example.com/a.git").await.unwrap();

        let found = repo.resolve(&created.key).await.unwrap().unwrap();
        assert_eq!(found.url, "https://example.com/a.git");

        assert!(repo.resolve("nope").await.unwrap().is_none());
    }
}
