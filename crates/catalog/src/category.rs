use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use shopdesk_core::{Aggregate, AggregateId, AggregateRoot, DomainError};
use shopdesk_events::Event;

pub const AGGREGATE_TYPE: &str = "catalog.category";

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CategoryId(pub AggregateId);

impl CategoryId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for CategoryId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Aggregate root: Category.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Category {
    id: CategoryId,
    name: String,
    created_at: Option<DateTime<Utc>>,
    version: u64,
    created: bool,
}

impl Category {
    pub fn empty(id: CategoryId) -> Self {
        Self {
            id,
            name: String::new(),
            created_at: None,
            version: 0,
            created: false,
        }
    }

    pub fn is_created(&self) -> bool {
        self.created
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl AggregateRoot for Category {
    type Id = CategoryId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateCategory {
    pub category_id: CategoryId,
    pub name: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenameCategory {
    pub name: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CategoryCommand {
    Create(CreateCategory),
    Rename(RenameCategory),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryCreated {
    pub category_id: CategoryId,
    pub name: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryRenamed {
    pub category_id: CategoryId,
    pub name: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CategoryEvent {
    Created(CategoryCreated),
    Renamed(CategoryRenamed),
}

impl Event for CategoryEvent {
    fn event_type(&self) -> &'static str {
        match self {
            CategoryEvent::Created(_) => "catalog.category.created",
            CategoryEvent::Renamed(_) => "catalog.category.renamed",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            CategoryEvent::Created(e) => e.occurred_at,
            CategoryEvent::Renamed(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Category {
    type Command = CategoryCommand;
    type Event = CategoryEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            CategoryEvent::Created(e) => {
                self.id = e.category_id;
                self.name = e.name.clone();
                self.created_at = Some(e.occurred_at);
                self.created = true;
            }
            CategoryEvent::Renamed(e) => self.name = e.name.clone(),
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            CategoryCommand::Create(cmd) => {
                if self.created {
                    return Err(DomainError::conflict("category already exists"));
                }
                let name = clean_name(&cmd.name)?;
                Ok(vec![CategoryEvent::Created(CategoryCreated {
                    category_id: cmd.category_id,
                    name,
                    occurred_at: cmd.occurred_at,
                })])
            }
            CategoryCommand::Rename(cmd) => {
                if !self.created {
                    return Err(DomainError::not_found("Category not found"));
                }
                let name = clean_name(&cmd.name)?;
                if name == self.name {
                    return Ok(vec![]);
                }
                Ok(vec![CategoryEvent::Renamed(CategoryRenamed {
                    category_id: self.id,
                    name,
                    occurred_at: cmd.occurred_at,
                })])
            }
        }
    }
}

fn clean_name(raw: &str) -> Result<String, DomainError> {
    let name = raw.trim();
    if name.is_empty() {
        return Err(DomainError::validation("Category name cannot be empty."));
    }
    Ok(name.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use shopdesk_events::execute;

    fn create(id: CategoryId, name: &str) -> CategoryCommand {
        CategoryCommand::Create(CreateCategory {
            category_id: id,
            name: name.to_string(),
            occurred_at: Utc::now(),
        })
    }

    #[test]
    fn create_trims_name() {
        let id = CategoryId::new(AggregateId::new());
        let mut cat = Category::empty(id);
        execute(&mut cat, &create(id, "  BATTERY CELL ")).unwrap();
        assert_eq!(cat.name(), "BATTERY CELL");
        assert_eq!(cat.version(), 1);
    }

    #[test]
    fn blank_name_is_rejected() {
        let id = CategoryId::new(AggregateId::new());
        let err = Category::empty(id).handle(&create(id, "   ")).unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn rename_to_same_name_is_a_no_op() {
        let id = CategoryId::new(AggregateId::new());
        let mut cat = Category::empty(id);
        execute(&mut cat, &create(id, "Snacks")).unwrap();
        let events = cat
            .handle(&CategoryCommand::Rename(RenameCategory {
                name: " Snacks".to_string(),
                occurred_at: Utc::now(),
            }))
            .unwrap();
        assert!(events.is_empty());
    }
}
