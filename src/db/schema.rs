//! Schema fixtures
//!
//! The DDL a runner executes during setup, and the `Persons` row model the
//! cancellation scenarios write.

use crate::error::{ConfigError, ConfigResult};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio_postgres::types::ToSql;

/// Built-in fixture schema: one table plus a unique index on its key
pub const PERSONS_DDL: &str = "\
create table Persons
(
    Id char(36) not null,
    FirstName varchar(255) not null,
    LastName text not null,
    Position int not null,
    DateOfBirth timestamp null
);

create unique index Persons_Id_uindex
    on Persons (Id);
";

/// Where the setup script comes from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SchemaSource {
    /// The built-in [`PERSONS_DDL`]
    #[default]
    Persons,
    /// Script given inline in configuration
    Inline(String),
    /// Script read from a file
    File(PathBuf),
}

impl SchemaSource {
    /// Load the script text
    pub fn load(&self) -> ConfigResult<String> {
        match self {
            Self::Persons => Ok(PERSONS_DDL.to_string()),
            Self::Inline(script) => Ok(script.clone()),
            Self::File(path) => std::fs::read_to_string(path)
                .map_err(|e| ConfigError::NotFound(format!("{}: {}", path.display(), e))),
        }
    }
}

/// One row of the `Persons` table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Person {
    pub id: String,
    pub first_name: String,
    pub last_name: String,
    pub position: i32,
    pub date_of_birth: Option<NaiveDateTime>,
}

impl Person {
    pub const INSERT_SQL: &'static str = "insert into Persons (Id, FirstName, LastName, Position, DateOfBirth) \
         values ($1, $2, $3, $4, $5)";

    pub const COUNT_SQL: &'static str = "select count(*) from Persons";

    /// A person with a fresh random id
    pub fn new(first_name: impl Into<String>, last_name: impl Into<String>, position: i32) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            first_name: first_name.into(),
            last_name: last_name.into(),
            position,
            date_of_birth: None,
        }
    }

    /// Parameters for [`Person::INSERT_SQL`], in column order
    pub fn params(&self) -> [&(dyn ToSql + Sync); 5] {
        [
            &self.id,
            &self.first_name,
            &self.last_name,
            &self.position,
            &self.date_of_birth,
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_persons_ddl_has_table_and_index() {
        let ddl = SchemaSource::Persons.load().unwrap();
        assert!(ddl.contains("create table Persons"));
        assert!(ddl.contains("create unique index Persons_Id_uindex"));
        for column in ["Id", "FirstName", "LastName", "Position", "DateOfBirth"] {
            assert!(ddl.contains(column), "missing column {}", column);
        }
    }

    #[test]
    fn test_inline_source() {
        let source = SchemaSource::Inline("select 1".to_string());
        assert_eq!(source.load().unwrap(), "select 1");
    }

    #[test]
    fn test_missing_file_source() {
        let source = SchemaSource::File(PathBuf::from("/nonexistent/schema.sql"));
        assert!(matches!(source.load(), Err(ConfigError::NotFound(_))));
    }

    #[test]
    fn test_person_ids_are_unique_uuids() {
        let a = Person::new("F", "L", 1);
        let b = Person::new("F", "L", 1);
        assert_ne!(a.id, b.id);
        assert_eq!(a.id.len(), 36);
        assert_eq!(a.params().len(), 5);
    }
}
