//! Declared associations between entity types.
//!
//! A [`RelationRegistry`] is built once at startup and shared by reference
//! with every engine that needs to hydrate includes.

use crate::backend::QueryRow;
use crate::error::{QueryError, Result};
use crate::mapper::{mapper_for, Entity};
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Relation cardinality
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cardinality {
    HasOne,
    HasMany,
}

impl fmt::Display for Cardinality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cardinality::HasOne => write!(f, "HasOne"),
            Cardinality::HasMany => write!(f, "HasMany"),
        }
    }
}

/// One registered relation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationConfig {
    pub name: String,
    pub parent_table: String,
    pub child_table: String,
    /// Column on the child table holding the parent identity
    pub foreign_key: String,
    /// Identity column of the parent
    pub primary_key: String,
    pub cardinality: Cardinality,
}

/// Children mapped and grouped by foreign key, ready to attach.
pub(crate) trait PreparedRelation<P>: Send {
    fn apply(self: Box<Self>, parents: &mut [P]);
}

/// Type-erased half of a relation, keyed by parent type.
pub(crate) trait Association<P>: Send + Sync {
    fn config(&self) -> &RelationConfig;

    /// Map fetched child rows; nothing is attached yet.
    fn prepare(&self, rows: &[QueryRow]) -> Result<Box<dyn PreparedRelation<P>>>;
}

enum Setter<P, C> {
    One(Box<dyn Fn(&mut P, Option<C>) + Send + Sync>),
    Many(Box<dyn Fn(&mut P, Vec<C>) + Send + Sync>),
}

struct TypedAssociation<P, C> {
    config: RelationConfig,
    setter: Arc<Setter<P, C>>,
}

struct Grouped<P, C> {
    setter: Arc<Setter<P, C>>,
    children: HashMap<String, Vec<C>>,
}

impl<P, C> Association<P> for TypedAssociation<P, C>
where
    P: Entity,
    C: Entity + Clone,
{
    fn config(&self) -> &RelationConfig {
        &self.config
    }

    fn prepare(&self, rows: &[QueryRow]) -> Result<Box<dyn PreparedRelation<P>>> {
        let mapper = mapper_for::<C>();
        let mut children: HashMap<String, Vec<C>> = HashMap::new();
        for row in rows {
            let Some(key) = row.get(&self.config.foreign_key).and_then(|v| v.join_key()) else {
                continue;
            };
            children.entry(key).or_default().push(mapper.map_row(row)?);
        }
        Ok(Box::new(Grouped {
            setter: Arc::clone(&self.setter),
            children,
        }))
    }
}

impl<P, C> PreparedRelation<P> for Grouped<P, C>
where
    P: Entity,
    C: Entity + Clone,
{
    fn apply(self: Box<Self>, parents: &mut [P]) {
        for parent in parents.iter_mut() {
            let matches = parent
                .identity()
                .join_key()
                .and_then(|key| self.children.get(&key));
            match self.setter.as_ref() {
                Setter::Many(set) => set(parent, matches.cloned().unwrap_or_default()),
                // First match in child row order wins.
                Setter::One(set) => set(parent, matches.and_then(|c| c.first().cloned())),
            }
        }
    }
}

struct Entry {
    config: RelationConfig,
    // Holds an `Arc<dyn Association<P>>` for the parent type it is keyed by.
    association: Box<dyn Any + Send + Sync>,
}

/// Registry of relations, keyed by parent type and relation name.
#[derive(Default)]
pub struct RelationRegistry {
    entries: HashMap<TypeId, Vec<Entry>>,
}

impl RelationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a 1:1 relation; `foreign_key` lives on `C`'s table.
    pub fn has_one<P, C, F>(&mut self, name: &str, foreign_key: &str, setter: F) -> Result<&mut Self>
    where
        P: Entity,
        C: Entity + Clone,
        F: Fn(&mut P, Option<C>) + Send + Sync + 'static,
    {
        self.register::<P, C>(name, foreign_key, Cardinality::HasOne, Setter::One(Box::new(setter)))
    }

    /// Declare a 1:N relation; `foreign_key` lives on `C`'s table.
    pub fn has_many<P, C, F>(&mut self, name: &str, foreign_key: &str, setter: F) -> Result<&mut Self>
    where
        P: Entity,
        C: Entity + Clone,
        F: Fn(&mut P, Vec<C>) + Send + Sync + 'static,
    {
        self.register::<P, C>(name, foreign_key, Cardinality::HasMany, Setter::Many(Box::new(setter)))
    }

    fn register<P, C>(
        &mut self,
        name: &str,
        foreign_key: &str,
        cardinality: Cardinality,
        setter: Setter<P, C>,
    ) -> Result<&mut Self>
    where
        P: Entity,
        C: Entity + Clone,
    {
        let entries = self.entries.entry(TypeId::of::<P>()).or_default();
        if entries.iter().any(|e| e.config.name == name) {
            return Err(QueryError::Configuration(format!(
                "Relation `{}` is already registered for `{}`",
                name,
                P::TYPE_NAME
            )));
        }

        let config = RelationConfig {
            name: name.to_string(),
            parent_table: P::table_name(),
            child_table: C::table_name(),
            foreign_key: foreign_key.to_string(),
            primary_key: P::identity_column().to_string(),
            cardinality,
        };
        let association: Arc<dyn Association<P>> = Arc::new(TypedAssociation {
            config: config.clone(),
            setter: Arc::new(setter),
        });

        tracing::debug!(
            relation = %config.name,
            parent = %config.parent_table,
            child = %config.child_table,
            cardinality = %config.cardinality,
            "relq.relation registered"
        );

        entries.push(Entry {
            config,
            association: Box::new(association),
        });
        Ok(self)
    }

    /// Config of relation `name` on `P`
    pub fn get<P: Entity>(&self, name: &str) -> Result<&RelationConfig> {
        self.entry::<P>(name).map(|e| &e.config)
    }

    pub fn contains<P: Entity>(&self, name: &str) -> bool {
        self.entry::<P>(name).is_ok()
    }

    /// All relations declared on `P`, in registration order
    pub fn relations<P: Entity>(&self) -> Vec<&RelationConfig> {
        self.entries
            .get(&TypeId::of::<P>())
            .map(|entries| entries.iter().map(|e| &e.config).collect())
            .unwrap_or_default()
    }

    pub(crate) fn association<P: Entity>(&self, name: &str) -> Result<Arc<dyn Association<P>>> {
        let entry = self.entry::<P>(name)?;
        entry
            .association
            .downcast_ref::<Arc<dyn Association<P>>>()
            .cloned()
            .ok_or_else(|| unknown::<P>(name))
    }

    fn entry<P: Entity>(&self, name: &str) -> Result<&Entry> {
        self.entries
            .get(&TypeId::of::<P>())
            .and_then(|entries| entries.iter().find(|e| e.config.name == name))
            .ok_or_else(|| unknown::<P>(name))
    }
}

impl fmt::Debug for RelationRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.entries.values().flatten().map(|e| &e.config))
            .finish()
    }
}

fn unknown<P: Entity>(name: &str) -> QueryError {
    QueryError::UnknownRelation {
        entity: P::TYPE_NAME.to_string(),
        relation: name.to_string(),
    }
}
