use crate::{
    error::{Error, ErrorOrigin},
    model::Schema,
};
use serde::{Deserialize, Serialize};
use std::fmt;

///
/// CommandKind
///

#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub enum CommandKind {
    Create,
    ReadBy,
    ReadAll,
    UpdateBy,
    DeleteBy,
    DeleteAll,
    Count,
}

impl CommandKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::ReadBy => "read_by",
            Self::ReadAll => "read_all",
            Self::UpdateBy => "update_by",
            Self::DeleteBy => "delete_by",
            Self::DeleteAll => "delete_all",
            Self::Count => "count",
        }
    }

    /// Commands addressed to a single row through the identity columns.
    #[must_use]
    pub const fn is_keyed(self) -> bool {
        matches!(self, Self::ReadBy | Self::UpdateBy | Self::DeleteBy)
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

///
/// Command
///
/// Dialect-free description of one store command.
///

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Command {
    pub entity: String,
    pub kind: CommandKind,
    pub columns: Vec<String>,
    pub key_columns: Vec<String>,
}

impl Command {
    /// Describe `kind` against every column of `schema`.
    #[must_use]
    pub fn for_schema(schema: &Schema, kind: CommandKind) -> Self {
        let columns = match kind {
            CommandKind::Create
            | CommandKind::ReadBy
            | CommandKind::ReadAll
            | CommandKind::UpdateBy => schema.columns(),
            CommandKind::DeleteBy | CommandKind::DeleteAll | CommandKind::Count => Vec::new(),
        };
        let key_columns = if kind.is_keyed() {
            schema.identity_columns()
        } else {
            Vec::new()
        };

        Self {
            entity: schema.name().to_string(),
            kind,
            columns,
            key_columns,
        }
    }

    /// Restrict the column list (partial updates).
    #[must_use]
    pub fn with_columns(mut self, columns: impl IntoIterator<Item = String>) -> Self {
        self.columns = columns.into_iter().collect();
        self
    }
}

///
/// CommandRenderer
///
/// Turns a command description into text a concrete store can execute.
///

pub trait CommandRenderer: Send + Sync {
    fn render(&self, command: &Command) -> Result<String, Error>;
}

///
/// PlainRenderer
/// Diagnostic rendering with no dialect.
///

#[derive(Clone, Copy, Debug, Default)]
pub struct PlainRenderer;

impl CommandRenderer for PlainRenderer {
    fn render(&self, command: &Command) -> Result<String, Error> {
        if command.kind.is_keyed() && command.key_columns.is_empty() {
            return Err(Error::unsupported(
                ErrorOrigin::Store,
                format!(
                    "{} on '{}' needs key columns",
                    command.kind, command.entity
                ),
            ));
        }

        let entity = &command.entity;
        let columns = command.columns.join(", ");
        let keys = command.key_columns.join(", ");

        let text = match command.kind {
            CommandKind::Create => format!("CREATE {entity} ({columns})"),
            CommandKind::ReadBy => format!("READ {entity} ({columns}) BY ({keys})"),
            CommandKind::ReadAll => format!("READ ALL {entity} ({columns})"),
            CommandKind::UpdateBy => format!("UPDATE {entity} SET ({columns}) BY ({keys})"),
            CommandKind::DeleteBy => format!("DELETE {entity} BY ({keys})"),
            CommandKind::DeleteAll => format!("DELETE ALL {entity}"),
            CommandKind::Count => format!("COUNT {entity}"),
        };

        Ok(text)
    }
}
