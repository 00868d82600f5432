//! Read-only access to character records.

use std::path::Path;

use rusqlite::{params, Connection, OpenFlags, Row};

use crate::protocol::{Category, Entity};

/// Source of entities to review. Never written to by this crate.
pub trait CharacterStore {
    /// Entities in the requested order plus the ids that were not found.
    fn fetch_by_ids(&self, ids: &[i64]) -> Result<(Vec<Entity>, Vec<i64>), rusqlite::Error>;
    /// All entities, or one category, ordered by category code then name.
    fn fetch_by_category(&self, category: Option<Category>) -> Result<Vec<Entity>, rusqlite::Error>;
}

pub struct SqliteCharacterStore {
    conn: Connection,
}

const SELECT_COLUMNS: &str =
    "SELECT id, name, first_names, biography, type, birth_date, death_date FROM character";

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|text| !text.trim().is_empty())
}

fn entity_from_row(row: &Row<'_>) -> Result<Entity, rusqlite::Error> {
    let category: Option<String> = row.get(4)?;
    Ok(Entity {
        id: row.get(0)?,
        name: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
        alternate_name: non_blank(row.get(2)?),
        biography: non_blank(row.get(3)?),
        category: Category::from_code(category.as_deref().unwrap_or_default()),
        birth_date: non_blank(row.get(5)?),
        death_date: non_blank(row.get(6)?),
    })
}

impl SqliteCharacterStore {
    pub fn open(path: &Path) -> Result<Self, rusqlite::Error> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        Ok(Self { conn })
    }

    #[cfg(test)]
    pub fn from_connection(conn: Connection) -> Self {
        Self { conn }
    }

    fn fetch_one(&self, id: i64) -> Result<Option<Entity>, rusqlite::Error> {
        let mut stmt = self
            .conn
            .prepare_cached(&format!("{SELECT_COLUMNS} WHERE id = ?1"))?;
        let mut rows = stmt.query_map(params![id], entity_from_row)?;
        let entity = rows.next().transpose()?;
        Ok(entity)
    }
}

impl CharacterStore for SqliteCharacterStore {
    fn fetch_by_ids(&self, ids: &[i64]) -> Result<(Vec<Entity>, Vec<i64>), rusqlite::Error> {
        let mut entities = Vec::new();
        let mut missing = Vec::new();
        for id in ids {
            if entities.iter().any(|entity: &Entity| entity.id == *id) {
                continue;
            }
            match self.fetch_one(*id)? {
                Some(entity) => entities.push(entity),
                None => missing.push(*id),
            }
        }
        Ok((entities, missing))
    }

    fn fetch_by_category(&self, category: Option<Category>) -> Result<Vec<Entity>, rusqlite::Error> {
        let mut entities = Vec::new();
        match category {
            Some(category) => {
                let mut stmt = self.conn.prepare(&format!(
                    "{SELECT_COLUMNS} WHERE UPPER(type) = ?1 ORDER BY type, name, id"
                ))?;
                let rows = stmt.query_map(params![category.code().to_string()], entity_from_row)?;
                for entity in rows {
                    entities.push(entity?);
                }
            }
            None => {
                let mut stmt = self
                    .conn
                    .prepare(&format!("{SELECT_COLUMNS} ORDER BY type, name, id"))?;
                let rows = stmt.query_map([], entity_from_row)?;
                for entity in rows {
                    entities.push(entity?);
                }
            }
        }
        Ok(entities)
    }
}

#[cfg(test)]
pub(crate) fn seeded_connection(rows: &[(i64, &str, &str, &str)]) -> Connection {
    let conn = Connection::open_in_memory().expect("in-memory db");
    conn.execute(
        "CREATE TABLE character (
            id INTEGER PRIMARY KEY,
            name TEXT,
            first_names TEXT,
            biography TEXT,
            type TEXT,
            birth_date TEXT,
            death_date TEXT
        )",
        [],
    )
    .expect("create character table");
    for (id, name, category, biography) in rows {
        conn.execute(
            "INSERT INTO character (id, name, first_names, biography, type) VALUES (?1, ?2, '', ?3, ?4)",
            params![id, name, biography, category],
        )
        .expect("insert character");
    }
    conn
}

#[cfg(test)]
mod tests {
    use super::{seeded_connection, CharacterStore, SqliteCharacterStore};
    use crate::protocol::Category;

    fn store() -> SqliteCharacterStore {
        SqliteCharacterStore::from_connection(seeded_connection(&[
            (1, "VICTORIA", "R", "Queen of England"),
            (2, "ALFRED", "R", "King of Wessex"),
            (3, "PARIS", "T", "Capital of France"),
            (4, "NEWTON", "M", "English mathematician"),
        ]))
    }

    #[test]
    fn test_fetch_by_ids_preserves_order_and_reports_missing() {
        let (entities, missing) = store().fetch_by_ids(&[4, 99, 1, 4]).expect("fetch");
        let ids: Vec<i64> = entities.iter().map(|entity| entity.id).collect();
        assert_eq!(ids, vec![4, 1]);
        assert_eq!(missing, vec![99]);
        assert_eq!(entities[0].category, Category::MathematicalScientist);
        assert_eq!(entities[0].alternate_name, None);
    }

    #[test]
    fn test_fetch_by_category_orders_by_name() {
        let royals = store()
            .fetch_by_category(Some(Category::Royalty))
            .expect("fetch royals");
        let names: Vec<&str> = royals.iter().map(|entity| entity.name.as_str()).collect();
        assert_eq!(names, vec!["ALFRED", "VICTORIA"]);

        let everyone = store().fetch_by_category(None).expect("fetch all");
        let codes: Vec<char> = everyone.iter().map(|entity| entity.category.code()).collect();
        assert_eq!(codes, vec!['M', 'R', 'R', 'T']);
    }

    #[test]
    fn test_open_missing_database_fails() {
        let dir = tempfile::tempdir().expect("tempdir");
        assert!(SqliteCharacterStore::open(&dir.path().join("missing.db")).is_err());
    }
}
