//! SQLite storage for channels, posts, comments, likes, and subscriptions.
//!
//! The dispatcher consumes this module through typed operations that mirror
//! the feed semantics one to one; every counter the in-memory index caches
//! (`subscribers`, `next_post_id`, per-post `comments`/`likes`) is updated in
//! the same transaction as the row mutation, so ids and counts never regress
//! across a restart.

use std::path::Path;

use rusqlite::{params, Connection, OptionalExtension};

use crate::rpc::{ChanInfo, CmtInfo, PostInfo, QueryBy, QueryCriteria, UserInfo};

#[derive(Debug)]
pub enum StorageError {
    Sqlite(rusqlite::Error),
    Io(std::io::Error),
    NotFound(String),
    AlreadyExists(String),
}

impl std::fmt::Display for StorageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageError::Sqlite(e) => write!(f, "sqlite error: {e}"),
            StorageError::Io(e) => write!(f, "io error: {e}"),
            StorageError::NotFound(msg) => write!(f, "not found: {msg}"),
            StorageError::AlreadyExists(msg) => write!(f, "already exists: {msg}"),
        }
    }
}

impl std::error::Error for StorageError {}

impl From<rusqlite::Error> for StorageError {
    fn from(e: rusqlite::Error) -> Self {
        StorageError::Sqlite(e)
    }
}

impl From<std::io::Error> for StorageError {
    fn from(e: std::io::Error) -> Self {
        StorageError::Io(e)
    }
}

/// Main storage handle wrapping a SQLite connection.
pub struct Storage {
    conn: Connection,
}

impl Storage {
    /// Open or create a database at the given path. Creates schema if needed.
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
        let storage = Self { conn };
        storage.create_schema()?;
        Ok(storage)
    }

    /// In-memory database for tests.
    pub fn open_in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        let storage = Self { conn };
        storage.create_schema()?;
        Ok(storage)
    }

    fn create_schema(&self) -> Result<(), StorageError> {
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS users (
                user_id     INTEGER PRIMARY KEY AUTOINCREMENT,
                did         TEXT NOT NULL UNIQUE,
                name        TEXT NOT NULL DEFAULT ''
            );

            CREATE TABLE IF NOT EXISTS channels (
                channel_id   INTEGER PRIMARY KEY,
                name         TEXT NOT NULL UNIQUE,
                intro        TEXT NOT NULL,
                owner_uid    INTEGER NOT NULL REFERENCES users(user_id),
                created_at   INTEGER NOT NULL,
                updated_at   INTEGER NOT NULL,
                subscribers  INTEGER NOT NULL DEFAULT 0,
                next_post_id INTEGER NOT NULL,
                avatar       BLOB NOT NULL
            );

            CREATE TABLE IF NOT EXISTS posts (
                channel_id  INTEGER NOT NULL REFERENCES channels(channel_id),
                post_id     INTEGER NOT NULL,
                created_at  INTEGER NOT NULL,
                updated_at  INTEGER NOT NULL,
                content     BLOB NOT NULL,
                comments    INTEGER NOT NULL DEFAULT 0,
                likes       INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (channel_id, post_id)
            );

            CREATE TABLE IF NOT EXISTS comments (
                channel_id  INTEGER NOT NULL,
                post_id     INTEGER NOT NULL,
                comment_id  INTEGER NOT NULL,
                reply_to    INTEGER NOT NULL DEFAULT 0,
                user_id     INTEGER NOT NULL REFERENCES users(user_id),
                content     BLOB NOT NULL,
                created_at  INTEGER NOT NULL,
                updated_at  INTEGER NOT NULL,
                likes       INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (channel_id, post_id, comment_id)
            );

            CREATE TABLE IF NOT EXISTS likes (
                user_id     INTEGER NOT NULL REFERENCES users(user_id),
                channel_id  INTEGER NOT NULL,
                post_id     INTEGER NOT NULL,
                comment_id  INTEGER NOT NULL DEFAULT 0,
                created_at  INTEGER NOT NULL,
                PRIMARY KEY (user_id, channel_id, post_id, comment_id)
            );

            CREATE TABLE IF NOT EXISTS subscriptions (
                user_id     INTEGER NOT NULL REFERENCES users(user_id),
                channel_id  INTEGER NOT NULL REFERENCES channels(channel_id),
                created_at  INTEGER NOT NULL,
                PRIMARY KEY (user_id, channel_id)
            );

            CREATE INDEX IF NOT EXISTS idx_posts_updated
                ON posts(channel_id, updated_at);
            CREATE INDEX IF NOT EXISTS idx_comments_post
                ON comments(channel_id, post_id, comment_id);
            CREATE INDEX IF NOT EXISTS idx_subscriptions_channel
                ON subscriptions(channel_id);
            ",
        )?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Users
    // -----------------------------------------------------------------------

    /// Look up or create the user row for a DID, refreshing the display name
    /// when the token carries one.
    pub fn upsert_user(&mut self, did: &str, name: &str) -> Result<UserInfo, StorageError> {
        self.conn.execute(
            "INSERT INTO users (did, name) VALUES (?1, ?2)
             ON CONFLICT(did) DO UPDATE SET name = excluded.name
             WHERE excluded.name <> ''",
            params![did, name],
        )?;
        let (uid, stored_name) = self.conn.query_row(
            "SELECT user_id, name FROM users WHERE did = ?1",
            params![did],
            |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)),
        )?;
        Ok(UserInfo {
            uid,
            name: stored_name,
            did: did.to_string(),
        })
    }

    // -----------------------------------------------------------------------
    // Channels
    // -----------------------------------------------------------------------

    pub fn create_channel(&mut self, info: &ChanInfo) -> Result<(), StorageError> {
        let inserted = self.conn.execute(
            "INSERT OR IGNORE INTO channels
             (channel_id, name, intro, owner_uid, created_at, updated_at,
              subscribers, next_post_id, avatar)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                info.chan_id as i64,
                info.name,
                info.intro,
                info.owner.uid,
                info.created_at as i64,
                info.upd_at as i64,
                info.subs as i64,
                info.next_post_id as i64,
                info.avatar,
            ],
        )?;
        if inserted == 0 {
            return Err(StorageError::AlreadyExists(format!(
                "channel {}",
                info.name
            )));
        }
        Ok(())
    }

    fn channel_column(by: QueryBy) -> &'static str {
        match by {
            QueryBy::None | QueryBy::Id => "channel_id",
            QueryBy::UpdatedAt => "updated_at",
            QueryBy::CreatedAt => "created_at",
        }
    }

    fn map_channel(row: &rusqlite::Row<'_>) -> rusqlite::Result<ChanInfo> {
        Ok(ChanInfo {
            chan_id: row.get::<_, i64>(0)? as u64,
            name: row.get(1)?,
            intro: row.get(2)?,
            owner: UserInfo {
                uid: row.get(3)?,
                name: row.get(4)?,
                did: row.get(5)?,
            },
            created_at: row.get::<_, i64>(6)? as u64,
            upd_at: row.get::<_, i64>(7)? as u64,
            subs: row.get::<_, i64>(8)? as u64,
            next_post_id: row.get::<_, i64>(9)? as u64,
            avatar: row.get(10)?,
        })
    }

    const CHANNEL_COLUMNS: &'static str = "c.channel_id, c.name, c.intro, u.user_id, u.name,
         u.did, c.created_at, c.updated_at, c.subscribers, c.next_post_id, c.avatar";

    pub fn query_channels(&self, qc: &QueryCriteria) -> Result<Vec<ChanInfo>, StorageError> {
        let column = Self::channel_column(qc.by);
        let sql = format!(
            "SELECT {cols} FROM channels c JOIN users u ON u.user_id = c.owner_uid
             WHERE (?1 = 0 OR c.{column} >= ?1) AND (?2 = 0 OR c.{column} <= ?2)
             ORDER BY c.{column} ASC
             LIMIT CASE WHEN ?3 = 0 THEN -1 ELSE ?3 END",
            cols = Self::CHANNEL_COLUMNS,
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(
            params![qc.lower as i64, qc.upper as i64, qc.maxcnt as i64],
            Self::map_channel,
        )?;
        let mut result = Vec::new();
        for row in rows {
            result.push(row?);
        }
        Ok(result)
    }

    pub fn query_subscribed_channels(
        &self,
        uid: i64,
        qc: &QueryCriteria,
    ) -> Result<Vec<ChanInfo>, StorageError> {
        let column = Self::channel_column(qc.by);
        let sql = format!(
            "SELECT {cols} FROM subscriptions s
             JOIN channels c ON c.channel_id = s.channel_id
             JOIN users u ON u.user_id = c.owner_uid
             WHERE s.user_id = ?1
               AND (?2 = 0 OR c.{column} >= ?2) AND (?3 = 0 OR c.{column} <= ?3)
             ORDER BY c.{column} ASC
             LIMIT CASE WHEN ?4 = 0 THEN -1 ELSE ?4 END",
            cols = Self::CHANNEL_COLUMNS,
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(
            params![uid, qc.lower as i64, qc.upper as i64, qc.maxcnt as i64],
            Self::map_channel,
        )?;
        let mut result = Vec::new();
        for row in rows {
            result.push(row?);
        }
        Ok(result)
    }

    /// Subscription rows for one channel; the consistency check behind the
    /// in-memory subscriber counter.
    pub fn subscriber_count(&self, chan_id: u64) -> Result<u64, StorageError> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM subscriptions WHERE channel_id = ?1",
            params![chan_id as i64],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    // -----------------------------------------------------------------------
    // Posts
    // -----------------------------------------------------------------------

    /// Insert a post and advance the channel's `next_post_id` and
    /// `updated_at` in the same transaction.
    pub fn add_post(&mut self, post: &PostInfo) -> Result<(), StorageError> {
        let tx = self.conn.transaction()?;
        tx.execute(
            "INSERT INTO posts (channel_id, post_id, created_at, updated_at, content)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                post.chan_id as i64,
                post.post_id as i64,
                post.created_at as i64,
                post.upd_at as i64,
                post.content,
            ],
        )?;
        tx.execute(
            "UPDATE channels SET next_post_id = ?1, updated_at = ?2 WHERE channel_id = ?3",
            params![
                (post.post_id + 1) as i64,
                post.upd_at as i64,
                post.chan_id as i64
            ],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn post_column(by: QueryBy) -> &'static str {
        match by {
            QueryBy::None | QueryBy::Id => "post_id",
            QueryBy::UpdatedAt => "updated_at",
            QueryBy::CreatedAt => "created_at",
        }
    }

    fn map_post(row: &rusqlite::Row<'_>) -> rusqlite::Result<PostInfo> {
        Ok(PostInfo {
            chan_id: row.get::<_, i64>(0)? as u64,
            post_id: row.get::<_, i64>(1)? as u64,
            created_at: row.get::<_, i64>(2)? as u64,
            upd_at: row.get::<_, i64>(3)? as u64,
            content: row.get(4)?,
            cmts: row.get::<_, i64>(5)? as u64,
            likes: row.get::<_, i64>(6)? as u64,
        })
    }

    const POST_COLUMNS: &'static str =
        "p.channel_id, p.post_id, p.created_at, p.updated_at, p.content, p.comments, p.likes";

    pub fn query_posts(
        &self,
        chan_id: u64,
        qc: &QueryCriteria,
    ) -> Result<Vec<PostInfo>, StorageError> {
        let column = Self::post_column(qc.by);
        let sql = format!(
            "SELECT {cols} FROM posts p
             WHERE p.channel_id = ?1
               AND (?2 = 0 OR p.{column} >= ?2) AND (?3 = 0 OR p.{column} <= ?3)
             ORDER BY p.{column} ASC
             LIMIT CASE WHEN ?4 = 0 THEN -1 ELSE ?4 END",
            cols = Self::POST_COLUMNS,
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(
            params![
                chan_id as i64,
                qc.lower as i64,
                qc.upper as i64,
                qc.maxcnt as i64
            ],
            Self::map_post,
        )?;
        let mut result = Vec::new();
        for row in rows {
            result.push(row?);
        }
        Ok(result)
    }

    pub fn query_liked_posts(
        &self,
        uid: i64,
        qc: &QueryCriteria,
    ) -> Result<Vec<PostInfo>, StorageError> {
        let column = Self::post_column(qc.by);
        let sql = format!(
            "SELECT {cols} FROM likes l
             JOIN posts p ON p.channel_id = l.channel_id AND p.post_id = l.post_id
             WHERE l.user_id = ?1 AND l.comment_id = 0
               AND (?2 = 0 OR p.{column} >= ?2) AND (?3 = 0 OR p.{column} <= ?3)
             ORDER BY p.{column} ASC
             LIMIT CASE WHEN ?4 = 0 THEN -1 ELSE ?4 END",
            cols = Self::POST_COLUMNS,
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(
            params![uid, qc.lower as i64, qc.upper as i64, qc.maxcnt as i64],
            Self::map_post,
        )?;
        let mut result = Vec::new();
        for row in rows {
            result.push(row?);
        }
        Ok(result)
    }

    // -----------------------------------------------------------------------
    // Comments
    // -----------------------------------------------------------------------

    /// Insert a comment, allocating the next per-post comment id and bumping
    /// the post's comment counter. Returns the new comment id.
    pub fn add_comment(&mut self, cmt: &CmtInfo) -> Result<u64, StorageError> {
        let tx = self.conn.transaction()?;
        let cmt_id: i64 = tx.query_row(
            "SELECT COALESCE(MAX(comment_id), 0) + 1 FROM comments
             WHERE channel_id = ?1 AND post_id = ?2",
            params![cmt.chan_id as i64, cmt.post_id as i64],
            |row| row.get(0),
        )?;
        tx.execute(
            "INSERT INTO comments
             (channel_id, post_id, comment_id, reply_to, user_id, content,
              created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                cmt.chan_id as i64,
                cmt.post_id as i64,
                cmt_id,
                cmt.reply_to_cmt as i64,
                cmt.user.uid,
                cmt.content,
                cmt.created_at as i64,
                cmt.upd_at as i64,
            ],
        )?;
        tx.execute(
            "UPDATE posts SET comments = comments + 1, updated_at = ?1
             WHERE channel_id = ?2 AND post_id = ?3",
            params![cmt.upd_at as i64, cmt.chan_id as i64, cmt.post_id as i64],
        )?;
        tx.execute(
            "UPDATE channels SET updated_at = ?1 WHERE channel_id = ?2",
            params![cmt.upd_at as i64, cmt.chan_id as i64],
        )?;
        tx.commit()?;
        Ok(cmt_id as u64)
    }

    pub fn comment_exists(
        &self,
        chan_id: u64,
        post_id: u64,
        cmt_id: u64,
    ) -> Result<bool, StorageError> {
        let found: Option<i64> = self
            .conn
            .query_row(
                "SELECT 1 FROM comments
                 WHERE channel_id = ?1 AND post_id = ?2 AND comment_id = ?3",
                params![chan_id as i64, post_id as i64, cmt_id as i64],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    pub fn query_comments(
        &self,
        chan_id: u64,
        post_id: u64,
        qc: &QueryCriteria,
    ) -> Result<Vec<CmtInfo>, StorageError> {
        let column = match qc.by {
            QueryBy::None | QueryBy::Id => "comment_id",
            QueryBy::UpdatedAt => "updated_at",
            QueryBy::CreatedAt => "created_at",
        };
        let sql = format!(
            "SELECT m.channel_id, m.post_id, m.comment_id, m.reply_to,
                    u.user_id, u.name, u.did, m.content, m.created_at,
                    m.updated_at, m.likes
             FROM comments m JOIN users u ON u.user_id = m.user_id
             WHERE m.channel_id = ?1 AND m.post_id = ?2
               AND (?3 = 0 OR m.{column} >= ?3) AND (?4 = 0 OR m.{column} <= ?4)
             ORDER BY m.{column} ASC
             LIMIT CASE WHEN ?5 = 0 THEN -1 ELSE ?5 END",
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(
            params![
                chan_id as i64,
                post_id as i64,
                qc.lower as i64,
                qc.upper as i64,
                qc.maxcnt as i64
            ],
            |row| {
                Ok(CmtInfo {
                    chan_id: row.get::<_, i64>(0)? as u64,
                    post_id: row.get::<_, i64>(1)? as u64,
                    cmt_id: row.get::<_, i64>(2)? as u64,
                    reply_to_cmt: row.get::<_, i64>(3)? as u64,
                    user: UserInfo {
                        uid: row.get(4)?,
                        name: row.get(5)?,
                        did: row.get(6)?,
                    },
                    content: row.get(7)?,
                    created_at: row.get::<_, i64>(8)? as u64,
                    upd_at: row.get::<_, i64>(9)? as u64,
                    likes: row.get::<_, i64>(10)? as u64,
                })
            },
        )?;
        let mut result = Vec::new();
        for row in rows {
            result.push(row?);
        }
        Ok(result)
    }

    // -----------------------------------------------------------------------
    // Likes
    // -----------------------------------------------------------------------

    pub fn like_exists(
        &self,
        uid: i64,
        chan_id: u64,
        post_id: u64,
        cmt_id: u64,
    ) -> Result<bool, StorageError> {
        let found: Option<i64> = self
            .conn
            .query_row(
                "SELECT 1 FROM likes
                 WHERE user_id = ?1 AND channel_id = ?2 AND post_id = ?3 AND comment_id = ?4",
                params![uid, chan_id as i64, post_id as i64, cmt_id as i64],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Record a like and bump the subject's counter. Returns the new total.
    pub fn add_like(
        &mut self,
        uid: i64,
        chan_id: u64,
        post_id: u64,
        cmt_id: u64,
        now: u64,
    ) -> Result<u64, StorageError> {
        let tx = self.conn.transaction()?;
        tx.execute(
            "INSERT INTO likes (user_id, channel_id, post_id, comment_id, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![uid, chan_id as i64, post_id as i64, cmt_id as i64, now as i64],
        )?;
        let total: i64 = if cmt_id == 0 {
            tx.execute(
                "UPDATE posts SET likes = likes + 1 WHERE channel_id = ?1 AND post_id = ?2",
                params![chan_id as i64, post_id as i64],
            )?;
            tx.query_row(
                "SELECT likes FROM posts WHERE channel_id = ?1 AND post_id = ?2",
                params![chan_id as i64, post_id as i64],
                |row| row.get(0),
            )?
        } else {
            tx.execute(
                "UPDATE comments SET likes = likes + 1
                 WHERE channel_id = ?1 AND post_id = ?2 AND comment_id = ?3",
                params![chan_id as i64, post_id as i64, cmt_id as i64],
            )?;
            tx.query_row(
                "SELECT likes FROM comments
                 WHERE channel_id = ?1 AND post_id = ?2 AND comment_id = ?3",
                params![chan_id as i64, post_id as i64, cmt_id as i64],
                |row| row.get(0),
            )?
        };
        tx.commit()?;
        Ok(total as u64)
    }

    pub fn remove_like(
        &mut self,
        uid: i64,
        chan_id: u64,
        post_id: u64,
        cmt_id: u64,
    ) -> Result<(), StorageError> {
        let tx = self.conn.transaction()?;
        let removed = tx.execute(
            "DELETE FROM likes
             WHERE user_id = ?1 AND channel_id = ?2 AND post_id = ?3 AND comment_id = ?4",
            params![uid, chan_id as i64, post_id as i64, cmt_id as i64],
        )?;
        if removed == 0 {
            return Err(StorageError::NotFound(format!(
                "like on {chan_id}/{post_id}/{cmt_id}"
            )));
        }
        if cmt_id == 0 {
            tx.execute(
                "UPDATE posts SET likes = likes - 1 WHERE channel_id = ?1 AND post_id = ?2",
                params![chan_id as i64, post_id as i64],
            )?;
        } else {
            tx.execute(
                "UPDATE comments SET likes = likes - 1
                 WHERE channel_id = ?1 AND post_id = ?2 AND comment_id = ?3",
                params![chan_id as i64, post_id as i64, cmt_id as i64],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Subscriptions
    // -----------------------------------------------------------------------

    pub fn is_subscriber(&self, uid: i64, chan_id: u64) -> Result<bool, StorageError> {
        let found: Option<i64> = self
            .conn
            .query_row(
                "SELECT 1 FROM subscriptions WHERE user_id = ?1 AND channel_id = ?2",
                params![uid, chan_id as i64],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    pub fn add_subscription(
        &mut self,
        uid: i64,
        chan_id: u64,
        now: u64,
    ) -> Result<(), StorageError> {
        let tx = self.conn.transaction()?;
        tx.execute(
            "INSERT INTO subscriptions (user_id, channel_id, created_at) VALUES (?1, ?2, ?3)",
            params![uid, chan_id as i64, now as i64],
        )?;
        tx.execute(
            "UPDATE channels SET subscribers = subscribers + 1 WHERE channel_id = ?1",
            params![chan_id as i64],
        )?;
        tx.commit()?;
        Ok(())
    }

    pub fn remove_subscription(&mut self, uid: i64, chan_id: u64) -> Result<(), StorageError> {
        let tx = self.conn.transaction()?;
        let removed = tx.execute(
            "DELETE FROM subscriptions WHERE user_id = ?1 AND channel_id = ?2",
            params![uid, chan_id as i64],
        )?;
        if removed == 0 {
            return Err(StorageError::NotFound(format!(
                "subscription to channel {chan_id}"
            )));
        }
        tx.execute(
            "UPDATE channels SET subscribers = subscribers - 1 WHERE channel_id = ?1",
            params![chan_id as i64],
        )?;
        tx.commit()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn owner(storage: &mut Storage) -> UserInfo {
        storage.upsert_user("did:vly:owner", "owner").unwrap()
    }

    fn channel(owner: &UserInfo, id: u64, name: &str) -> ChanInfo {
        ChanInfo {
            chan_id: id,
            name: name.to_string(),
            intro: format!("{name} intro"),
            owner: owner.clone(),
            created_at: 1_000 + id,
            upd_at: 1_000 + id,
            subs: 0,
            next_post_id: 1,
            avatar: vec![id as u8; 4],
        }
    }

    fn post(chan_id: u64, post_id: u64) -> PostInfo {
        PostInfo {
            chan_id,
            post_id,
            created_at: 2_000,
            upd_at: 2_000,
            content: b"hello".to_vec(),
            cmts: 0,
            likes: 0,
        }
    }

    #[test]
    fn upsert_user_is_stable_and_refreshes_name() {
        let mut storage = Storage::open_in_memory().unwrap();
        let first = storage.upsert_user("did:vly:alice", "").unwrap();
        let second = storage.upsert_user("did:vly:alice", "Alice").unwrap();
        let third = storage.upsert_user("did:vly:alice", "").unwrap();
        assert_eq!(first.uid, second.uid);
        assert_eq!(second.name, "Alice");
        assert_eq!(third.name, "Alice");
    }

    #[test]
    fn channel_name_collision_is_reported() {
        let mut storage = Storage::open_in_memory().unwrap();
        let owner = owner(&mut storage);
        storage.create_channel(&channel(&owner, 1, "news")).unwrap();
        let err = storage
            .create_channel(&channel(&owner, 2, "news"))
            .unwrap_err();
        assert!(matches!(err, StorageError::AlreadyExists(_)));
    }

    #[test]
    fn query_channels_respects_bounds_and_cap() {
        let mut storage = Storage::open_in_memory().unwrap();
        let owner = owner(&mut storage);
        for id in 1..=5 {
            storage
                .create_channel(&channel(&owner, id, &format!("chan-{id}")))
                .unwrap();
        }

        let all = storage.query_channels(&QueryCriteria::default()).unwrap();
        assert_eq!(all.len(), 5);
        assert_eq!(all[0].chan_id, 1);

        let bounded = storage
            .query_channels(&QueryCriteria {
                by: QueryBy::Id,
                lower: 2,
                upper: 4,
                maxcnt: 2,
            })
            .unwrap();
        assert_eq!(
            bounded.iter().map(|c| c.chan_id).collect::<Vec<_>>(),
            vec![2, 3]
        );
    }

    #[test]
    fn add_post_advances_channel_cursor() {
        let mut storage = Storage::open_in_memory().unwrap();
        let owner = owner(&mut storage);
        storage.create_channel(&channel(&owner, 1, "news")).unwrap();
        storage.add_post(&post(1, 1)).unwrap();

        let chans = storage.query_channels(&QueryCriteria::default()).unwrap();
        assert_eq!(chans[0].next_post_id, 2);
        assert_eq!(chans[0].upd_at, 2_000);

        let posts = storage.query_posts(1, &QueryCriteria::default()).unwrap();
        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0].content, b"hello");
    }

    #[test]
    fn comments_allocate_sequential_ids_and_bump_counter() {
        let mut storage = Storage::open_in_memory().unwrap();
        let owner = owner(&mut storage);
        let alice = storage.upsert_user("did:vly:alice", "alice").unwrap();
        storage.create_channel(&channel(&owner, 1, "news")).unwrap();
        storage.add_post(&post(1, 1)).unwrap();

        let make = |user: &UserInfo, reply_to| CmtInfo {
            chan_id: 1,
            post_id: 1,
            cmt_id: 0,
            reply_to_cmt: reply_to,
            user: user.clone(),
            content: b"hi".to_vec(),
            created_at: 2_100,
            upd_at: 2_100,
            likes: 0,
        };
        let first = storage.add_comment(&make(&alice, 0)).unwrap();
        let second = storage.add_comment(&make(&alice, first)).unwrap();
        assert_eq!((first, second), (1, 2));
        assert!(storage.comment_exists(1, 1, first).unwrap());
        assert!(!storage.comment_exists(1, 1, 99).unwrap());

        let posts = storage.query_posts(1, &QueryCriteria::default()).unwrap();
        assert_eq!(posts[0].cmts, 2);

        let cmts = storage
            .query_comments(1, 1, &QueryCriteria::default())
            .unwrap();
        assert_eq!(cmts.len(), 2);
        assert_eq!(cmts[1].reply_to_cmt, first);
        assert_eq!(cmts[0].user.did, "did:vly:alice");
    }

    #[test]
    fn likes_track_totals_per_subject() {
        let mut storage = Storage::open_in_memory().unwrap();
        let owner = owner(&mut storage);
        let alice = storage.upsert_user("did:vly:alice", "alice").unwrap();
        let bob = storage.upsert_user("did:vly:bob", "bob").unwrap();
        storage.create_channel(&channel(&owner, 1, "news")).unwrap();
        storage.add_post(&post(1, 1)).unwrap();

        assert_eq!(storage.add_like(alice.uid, 1, 1, 0, 2_200).unwrap(), 1);
        assert_eq!(storage.add_like(bob.uid, 1, 1, 0, 2_201).unwrap(), 2);
        assert!(storage.like_exists(alice.uid, 1, 1, 0).unwrap());

        let liked = storage
            .query_liked_posts(alice.uid, &QueryCriteria::default())
            .unwrap();
        assert_eq!(liked.len(), 1);
        assert_eq!(liked[0].likes, 2);

        storage.remove_like(alice.uid, 1, 1, 0).unwrap();
        assert!(!storage.like_exists(alice.uid, 1, 1, 0).unwrap());
        let posts = storage.query_posts(1, &QueryCriteria::default()).unwrap();
        assert_eq!(posts[0].likes, 1);
    }

    #[test]
    fn subscriptions_keep_channel_counter_consistent() {
        let mut storage = Storage::open_in_memory().unwrap();
        let owner = owner(&mut storage);
        let alice = storage.upsert_user("did:vly:alice", "alice").unwrap();
        storage.create_channel(&channel(&owner, 1, "news")).unwrap();

        storage.add_subscription(alice.uid, 1, 2_300).unwrap();
        assert!(storage.is_subscriber(alice.uid, 1).unwrap());
        assert_eq!(storage.subscriber_count(1).unwrap(), 1);

        let subbed = storage
            .query_subscribed_channels(alice.uid, &QueryCriteria::default())
            .unwrap();
        assert_eq!(subbed.len(), 1);
        assert_eq!(subbed[0].subs, 1);

        storage.remove_subscription(alice.uid, 1).unwrap();
        assert_eq!(storage.subscriber_count(1).unwrap(), 0);
        assert!(matches!(
            storage.remove_subscription(alice.uid, 1),
            Err(StorageError::NotFound(_))
        ));
    }
}
