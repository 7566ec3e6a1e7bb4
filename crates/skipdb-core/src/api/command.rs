//! Write commands as data, for hosts that queue or log operations before
//! running them.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Error;
use crate::types::CollectionId;

use super::database::SkipDB;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Command {
    CreateCollection {
        name: String,
    },
    Insert {
        collection: String,
        document: Value,
    },
    Delete {
        collection: String,
        id: Value,
    },
    CreateIndex {
        collection: String,
        name: String,
        expression: String,
        #[serde(default)]
        unique: bool,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum CommandOutput {
    CollectionCreated { col_id: CollectionId },
    Inserted,
    Deleted { found: bool },
    IndexCreated { nodes: u64 },
}

impl Command {
    pub fn execute(self, db: &SkipDB) -> Result<CommandOutput, Error> {
        match self {
            Command::CreateCollection { name } => Ok(CommandOutput::CollectionCreated {
                col_id: db.create_collection(&name)?,
            }),
            Command::Insert {
                collection,
                document,
            } => {
                db.insert(&collection, document)?;
                Ok(CommandOutput::Inserted)
            }
            Command::Delete { collection, id } => Ok(CommandOutput::Deleted {
                found: db.delete(&collection, &id)?,
            }),
            Command::CreateIndex {
                collection,
                name,
                expression,
                unique,
            } => {
                let nodes = db
                    .create_index(&collection)
                    .name(&name)
                    .expression(&expression)
                    .unique(unique)
                    .execute()?;
                Ok(CommandOutput::IndexCreated { nodes })
            }
        }
    }
}
