use crate::config::LOOKUP_CHUNK_SIZE;
use crate::models::{Name, NamedEntity, NamedKind, NewRelease, Release};
use crate::store::Store;
use anyhow::{Context, Result};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use rustc_hash::FxHashMap;
use std::path::Path;
use tracing::{debug, info};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS label (
    id              INTEGER PRIMARY KEY,
    name            TEXT NOT NULL UNIQUE,
    display_name    TEXT NOT NULL,
    parent_label_id INTEGER REFERENCES label(id),
    CHECK (parent_label_id IS NULL OR parent_label_id <> id)
);

CREATE TABLE IF NOT EXISTS artist (
    id           INTEGER PRIMARY KEY,
    name         TEXT NOT NULL UNIQUE,
    display_name TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS "release" (
    id         INTEGER PRIMARY KEY,
    title      TEXT NOT NULL,
    release_id INTEGER NOT NULL UNIQUE,
    master_id  INTEGER UNIQUE
);

CREATE TABLE IF NOT EXISTS artist_alias (
    artist_id INTEGER NOT NULL REFERENCES artist(id),
    alias_id  INTEGER NOT NULL REFERENCES artist(id),
    PRIMARY KEY (artist_id, alias_id),
    CHECK (artist_id <> alias_id)
);

CREATE TABLE IF NOT EXISTS artist_group (
    artist_id INTEGER NOT NULL REFERENCES artist(id),
    group_id  INTEGER NOT NULL REFERENCES artist(id),
    PRIMARY KEY (artist_id, group_id),
    CHECK (artist_id <> group_id)
);

CREATE TABLE IF NOT EXISTS artist_release (
    artist_id  INTEGER NOT NULL REFERENCES artist(id),
    release_id INTEGER NOT NULL REFERENCES "release"(id),
    PRIMARY KEY (artist_id, release_id)
);

CREATE TABLE IF NOT EXISTS label_release (
    label_id   INTEGER NOT NULL REFERENCES label(id),
    release_id INTEGER NOT NULL REFERENCES "release"(id),
    PRIMARY KEY (label_id, release_id)
);

CREATE INDEX IF NOT EXISTS idx_label_parent ON label(parent_label_id);
"#;

/// Association tables first so foreign keys never dangle mid-drop.
const TABLES: &[&str] = &[
    "label_release",
    "artist_release",
    "artist_group",
    "artist_alias",
    "\"release\"",
    "artist",
    "label",
];

/// Opens (or creates) the database file with the pragmas used for bulk loads.
pub fn open_connection(path: &Path) -> Result<Connection> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {:?}", parent))?;
        }
    }
    let conn = Connection::open(path)
        .with_context(|| format!("Failed to open database: {}", path.display()))?;
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA foreign_keys = ON;
         PRAGMA synchronous = NORMAL;",
    )
    .context("Failed to configure database")?;
    Ok(conn)
}

pub fn create_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(SCHEMA)
        .context("Failed to create tables")?;
    info!("Tables created");
    Ok(())
}

pub fn drop_schema(conn: &Connection) -> Result<()> {
    for table in TABLES {
        conn.execute_batch(&format!("DROP TABLE IF EXISTS {table};"))
            .with_context(|| format!("Failed to drop table {table}"))?;
    }
    info!("Tables dropped");
    Ok(())
}

pub fn reset_schema(conn: &Connection) -> Result<()> {
    drop_schema(conn)?;
    create_schema(conn)
}

fn release_from_row(row: &Row<'_>) -> rusqlite::Result<Release> {
    Ok(Release {
        id: row.get(0)?,
        title: row.get(1)?,
        release_id: row.get(2)?,
        master_id: row.get(3)?,
    })
}

/// SQLite-backed [`Store`] holding one long-lived write transaction between
/// commits and a by-name cache of the entities it has touched.
pub struct SqliteStore {
    conn: Connection,
    names: FxHashMap<(NamedKind, String), NamedEntity>,
    in_transaction: bool,
    skip_existing: bool,
    commits: u64,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = open_connection(path)?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        create_schema(&conn)?;
        Ok(Self {
            conn,
            names: FxHashMap::default(),
            in_transaction: false,
            skip_existing: false,
            commits: 0,
        })
    }

    /// Skip, rather than fail on, inserts that collide with an existing key.
    pub fn with_skip_existing(mut self, skip: bool) -> Self {
        self.skip_existing = skip;
        self
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn commits(&self) -> u64 {
        self.commits
    }

    pub fn cached_entities(&self) -> usize {
        self.names.len()
    }

    /// Row counts for every table, in schema order.
    pub fn table_counts(&self) -> Result<Vec<(&'static str, i64)>> {
        let mut counts = Vec::with_capacity(TABLES.len());
        for &table in TABLES.iter().rev() {
            let count: i64 = self
                .conn
                .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |r| r.get(0))
                .with_context(|| format!("Failed to count rows in {table}"))?;
            counts.push((table.trim_matches('"'), count));
        }
        Ok(counts)
    }

    fn begin(&mut self) -> Result<()> {
        if !self.in_transaction {
            self.conn
                .execute_batch("BEGIN")
                .context("Failed to begin transaction")?;
            self.in_transaction = true;
        }
        Ok(())
    }

    fn replace_pairs(&mut self, table: &str, other: &str, id: i64, others: &[i64]) -> Result<()> {
        self.begin()?;
        self.conn
            .prepare_cached(&format!("DELETE FROM {table} WHERE artist_id = ?1"))?
            .execute(params![id])
            .with_context(|| format!("Failed to clear {table} for artist {id}"))?;
        let mut stmt = self.conn.prepare_cached(&format!(
            "INSERT INTO {table} (artist_id, {other}) VALUES (?1, ?2)"
        ))?;
        for other_id in others {
            stmt.execute(params![id, other_id])
                .with_context(|| format!("Failed to insert {table} ({id}, {other_id})"))?;
        }
        Ok(())
    }

    fn linked_ids(&mut self, table: &str, column: &str, release_pk: i64) -> Result<Vec<i64>> {
        let mut stmt = self.conn.prepare_cached(&format!(
            "SELECT {column} FROM {table} WHERE release_id = ?1"
        ))?;
        let ids = stmt
            .query_map(params![release_pk], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<i64>>>()?;
        Ok(ids)
    }

    fn link(&mut self, table: &str, column: &str, release_pk: i64, ids: &[i64]) -> Result<()> {
        self.begin()?;
        let mut stmt = self.conn.prepare_cached(&format!(
            "INSERT INTO {table} ({column}, release_id) VALUES (?1, ?2)"
        ))?;
        for id in ids {
            stmt.execute(params![id, release_pk])
                .with_context(|| format!("Failed to insert {table} ({id}, {release_pk})"))?;
        }
        Ok(())
    }

    fn find_release_by(&mut self, column: &str, value: i64) -> Result<Option<Release>> {
        let release = self
            .conn
            .prepare_cached(&format!(
                r#"SELECT id, title, release_id, master_id FROM "release" WHERE {column} = ?1"#
            ))?
            .query_row(params![value], release_from_row)
            .optional()?;
        Ok(release)
    }
}

impl Store for SqliteStore {
    fn insert_named(&mut self, kind: NamedKind, name: &Name) -> Result<Option<NamedEntity>> {
        self.begin()?;
        let table = kind.table();
        let sql = if self.skip_existing {
            format!("INSERT INTO {table} (name, display_name) VALUES (?1, ?2) ON CONFLICT(name) DO NOTHING")
        } else {
            format!("INSERT INTO {table} (name, display_name) VALUES (?1, ?2)")
        };
        let changed = self
            .conn
            .prepare_cached(&sql)?
            .execute(params![name.key, name.display])
            .with_context(|| format!("Failed to insert {table} {:?}", name.display))?;
        if changed == 0 {
            debug!(table, name = %name.display, "Name already present, skipping");
            return Ok(None);
        }
        let entity = NamedEntity {
            id: self.conn.last_insert_rowid(),
            kind,
            name: name.key.clone(),
            display_name: name.display.clone(),
        };
        self.names.insert((kind, name.key.clone()), entity.clone());
        Ok(Some(entity))
    }

    fn insert_release(&mut self, release: &NewRelease) -> Result<Option<Release>> {
        self.begin()?;
        let sql = if self.skip_existing {
            r#"INSERT INTO "release" (title, release_id, master_id) VALUES (?1, ?2, ?3) ON CONFLICT DO NOTHING"#
        } else {
            r#"INSERT INTO "release" (title, release_id, master_id) VALUES (?1, ?2, ?3)"#
        };
        let changed = self
            .conn
            .prepare_cached(sql)?
            .execute(params![release.title, release.release_id, release.master_id])
            .with_context(|| format!("Failed to insert release {}", release.release_id))?;
        if changed == 0 {
            debug!(release_id = release.release_id, "Release already present, skipping");
            return Ok(None);
        }
        Ok(Some(Release {
            id: self.conn.last_insert_rowid(),
            title: release.title.clone(),
            release_id: release.release_id,
            master_id: release.master_id,
        }))
    }

    fn find_by_name(&mut self, kind: NamedKind, key: &str) -> Result<Option<NamedEntity>> {
        if let Some(entity) = self.names.get(&(kind, key.to_string())) {
            return Ok(Some(entity.clone()));
        }
        let entity = self
            .conn
            .prepare_cached(&format!(
                "SELECT id, name, display_name FROM {} WHERE name = ?1",
                kind.table()
            ))?
            .query_row(params![key], |row| {
                Ok(NamedEntity {
                    id: row.get(0)?,
                    kind,
                    name: row.get(1)?,
                    display_name: row.get(2)?,
                })
            })
            .optional()?;
        if let Some(entity) = &entity {
            self.names.insert((kind, entity.name.clone()), entity.clone());
        }
        Ok(entity)
    }

    fn find_all_by_names(&mut self, kind: NamedKind, keys: &[String]) -> Result<Vec<NamedEntity>> {
        let mut found = Vec::new();
        let mut missing = Vec::new();
        for key in keys {
            match self.names.get(&(kind, key.clone())) {
                Some(entity) => found.push(entity.clone()),
                None => missing.push(key),
            }
        }

        for chunk in missing.chunks(LOOKUP_CHUNK_SIZE) {
            let placeholders = vec!["?"; chunk.len()].join(", ");
            let mut stmt = self.conn.prepare(&format!(
                "SELECT id, name, display_name FROM {} WHERE name IN ({placeholders})",
                kind.table()
            ))?;
            let rows = stmt
                .query_map(params_from_iter(chunk.iter()), |row| {
                    Ok(NamedEntity {
                        id: row.get(0)?,
                        kind,
                        name: row.get(1)?,
                        display_name: row.get(2)?,
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            for entity in rows {
                self.names.insert((kind, entity.name.clone()), entity.clone());
                found.push(entity);
            }
        }
        Ok(found)
    }

    fn find_release_by_release_id(&mut self, release_id: i64) -> Result<Option<Release>> {
        self.find_release_by("release_id", release_id)
    }

    fn find_release_by_master_id(&mut self, master_id: i64) -> Result<Option<Release>> {
        self.find_release_by("master_id", master_id)
    }

    fn set_parent_label(&mut self, label_id: i64, parent_id: i64) -> Result<()> {
        self.begin()?;
        self.conn
            .prepare_cached("UPDATE label SET parent_label_id = ?2 WHERE id = ?1")?
            .execute(params![label_id, parent_id])
            .with_context(|| format!("Failed to set parent of label {label_id}"))?;
        Ok(())
    }

    fn replace_sublabels(&mut self, label_id: i64, sublabel_ids: &[i64]) -> Result<()> {
        self.begin()?;
        self.conn
            .prepare_cached("UPDATE label SET parent_label_id = NULL WHERE parent_label_id = ?1")?
            .execute(params![label_id])
            .with_context(|| format!("Failed to clear sublabels of label {label_id}"))?;
        let mut stmt = self
            .conn
            .prepare_cached("UPDATE label SET parent_label_id = ?1 WHERE id = ?2")?;
        for sublabel_id in sublabel_ids {
            stmt.execute(params![label_id, sublabel_id])
                .with_context(|| format!("Failed to attach sublabel {sublabel_id}"))?;
        }
        Ok(())
    }

    fn replace_aliases(&mut self, artist_id: i64, alias_ids: &[i64]) -> Result<()> {
        self.replace_pairs("artist_alias", "alias_id", artist_id, alias_ids)
    }

    fn replace_groups(&mut self, artist_id: i64, group_ids: &[i64]) -> Result<()> {
        self.replace_pairs("artist_group", "group_id", artist_id, group_ids)
    }

    fn release_artist_ids(&mut self, release_pk: i64) -> Result<Vec<i64>> {
        self.linked_ids("artist_release", "artist_id", release_pk)
    }

    fn add_release_artists(&mut self, release_pk: i64, artist_ids: &[i64]) -> Result<()> {
        self.link("artist_release", "artist_id", release_pk, artist_ids)
    }

    fn release_label_ids(&mut self, release_pk: i64) -> Result<Vec<i64>> {
        self.linked_ids("label_release", "label_id", release_pk)
    }

    fn add_release_labels(&mut self, release_pk: i64, label_ids: &[i64]) -> Result<()> {
        self.link("label_release", "label_id", release_pk, label_ids)
    }

    fn commit(&mut self) -> Result<()> {
        if self.in_transaction {
            self.conn
                .execute_batch("COMMIT")
                .context("Failed to commit transaction")?;
            self.in_transaction = false;
        }
        self.commits += 1;
        Ok(())
    }

    fn evict_all(&mut self) {
        self.names.clear();
        self.names.shrink_to_fit();
        self.conn.flush_prepared_statement_cache();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::normalize;
    use tempfile::TempDir;

    fn store() -> SqliteStore {
        SqliteStore::open_in_memory().unwrap()
    }

    fn count(store: &SqliteStore, table: &str) -> i64 {
        store
            .connection()
            .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |r| r.get(0))
            .unwrap()
    }

    #[test]
    fn insert_and_find_by_name() {
        let mut s = store();
        let created = s
            .insert_named(NamedKind::Label, &normalize("Warp Records"))
            .unwrap()
            .unwrap();
        assert_eq!(created.name, "warp records");
        assert_eq!(created.display_name, "Warp Records");

        s.evict_all();
        let found = s.find_by_name(NamedKind::Label, "warp records").unwrap().unwrap();
        assert_eq!(found, created);
        assert!(s.find_by_name(NamedKind::Artist, "warp records").unwrap().is_none());
    }

    #[test]
    fn duplicate_name_fails_by_default() {
        let mut s = store();
        s.insert_named(NamedKind::Artist, &normalize("Aphex Twin")).unwrap();
        assert!(s.insert_named(NamedKind::Artist, &normalize("APHEX TWIN")).is_err());
    }

    #[test]
    fn duplicate_name_skipped_when_configured() {
        let mut s = store().with_skip_existing(true);
        s.insert_named(NamedKind::Artist, &normalize("Aphex Twin")).unwrap();
        let second = s.insert_named(NamedKind::Artist, &normalize("aphex twin")).unwrap();
        assert!(second.is_none());
        assert_eq!(count(&s, "artist"), 1);
    }

    #[test]
    fn find_all_by_names_drops_unknown_keys() {
        let mut s = store();
        s.insert_named(NamedKind::Artist, &normalize("DJ A")).unwrap();
        s.insert_named(NamedKind::Artist, &normalize("DJ B")).unwrap();
        s.evict_all();

        let keys = vec!["dj a".to_string(), "dj b".to_string(), "dj z".to_string()];
        let mut found: Vec<_> = s
            .find_all_by_names(NamedKind::Artist, &keys)
            .unwrap()
            .into_iter()
            .map(|e| e.display_name)
            .collect();
        found.sort();
        assert_eq!(found, vec!["DJ A", "DJ B"]);
    }

    #[test]
    fn releases_are_found_by_either_id() {
        let mut s = store();
        s.insert_release(&NewRelease {
            title: "Selected Ambient Works".into(),
            release_id: 456,
            master_id: Some(123),
        })
        .unwrap();
        assert_eq!(s.find_release_by_master_id(123).unwrap().unwrap().release_id, 456);
        assert_eq!(s.find_release_by_release_id(456).unwrap().unwrap().master_id, Some(123));
        assert!(s.find_release_by_release_id(123).unwrap().is_none());
    }

    #[test]
    fn replace_sublabels_resets_previous_children() {
        let mut s = store();
        let parent = s.insert_named(NamedKind::Label, &normalize("Parent")).unwrap().unwrap();
        let a = s.insert_named(NamedKind::Label, &normalize("A")).unwrap().unwrap();
        let b = s.insert_named(NamedKind::Label, &normalize("B")).unwrap().unwrap();

        s.replace_sublabels(parent.id, &[a.id]).unwrap();
        s.replace_sublabels(parent.id, &[b.id]).unwrap();

        let children: Vec<i64> = s
            .connection()
            .prepare("SELECT id FROM label WHERE parent_label_id = ?1")
            .unwrap()
            .query_map([parent.id], |r| r.get(0))
            .unwrap()
            .collect::<rusqlite::Result<_>>()
            .unwrap();
        assert_eq!(children, vec![b.id]);
    }

    #[test]
    fn self_alias_rejected_by_schema() {
        let mut s = store();
        let a = s.insert_named(NamedKind::Artist, &normalize("A")).unwrap().unwrap();
        assert!(s.replace_aliases(a.id, &[a.id]).is_err());
    }

    #[test]
    fn commit_persists_and_counts() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("test.sqlite3");
        {
            let mut s = SqliteStore::open(&path).unwrap();
            s.insert_named(NamedKind::Label, &normalize("Warp")).unwrap();
            s.commit().unwrap();
            s.insert_named(NamedKind::Label, &normalize("Uncommitted")).unwrap();
            assert_eq!(s.commits(), 1);
        }
        let s = SqliteStore::open(&path).unwrap();
        assert_eq!(count(&s, "label"), 1);
    }

    #[test]
    fn evict_all_clears_cache() {
        let mut s = store();
        s.insert_named(NamedKind::Label, &normalize("Warp")).unwrap();
        assert_eq!(s.cached_entities(), 1);
        s.evict_all();
        assert_eq!(s.cached_entities(), 0);
    }

    #[test]
    fn reset_schema_empties_tables() {
        let mut s = store();
        s.insert_named(NamedKind::Label, &normalize("Warp")).unwrap();
        s.commit().unwrap();
        reset_schema(s.connection()).unwrap();
        let counts = s.table_counts().unwrap();
        assert_eq!(counts.len(), 7);
        assert!(counts.iter().all(|(_, n)| *n == 0));
        assert_eq!(counts[0].0, "label");
    }
}
