//! Search query synthesis for one entity.
//!
//! Precedence: a manual override for the entity's name wins outright, otherwise
//! a category strategy layers queries from most to least specific and always
//! finishes with the literal display name.

use std::collections::HashSet;

use log::debug;

use crate::protocol::{Category, Entity};
use crate::query_overrides::QueryOverrides;
use crate::text_parser::{
    collapse_whitespace, extract_actual_name, extract_context, BiographyContext,
};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueryError {
    #[error("entity {entity_id} has no usable name to search for")]
    InsufficientData { entity_id: i64 },
}

/// Closed set of generation strategies selected by category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryStrategy {
    Place,
    Person,
    Scientist,
    Inventor,
    Navigator,
}

impl QueryStrategy {
    pub fn select(category: Category, context: &BiographyContext) -> Self {
        if category.is_structural() {
            return QueryStrategy::Place;
        }
        match category {
            Category::Innovator => QueryStrategy::Inventor,
            Category::MathematicalScientist | Category::NaturalScientist => {
                QueryStrategy::Scientist
            }
            _ if context.mentions_voyages => QueryStrategy::Navigator,
            _ => QueryStrategy::Person,
        }
    }

    /// Raw query list before dedup, capping, and the display-name fallback.
    pub fn generate(self, name: &str, actual_name: &str, context: &BiographyContext) -> Vec<String> {
        match self {
            QueryStrategy::Place => vec![
                format!("{name} architecture"),
                format!("{name} photograph"),
                format!("{name} building"),
                format!("{name} cityscape"),
            ],
            QueryStrategy::Person => person_queries(name, actual_name, context, &[]),
            QueryStrategy::Scientist => person_queries(
                name,
                actual_name,
                context,
                &[
                    format!("{actual_name} scientist portrait"),
                    format!("{actual_name} laboratory"),
                    format!("{actual_name} experiment engraving"),
                ],
            ),
            QueryStrategy::Inventor => person_queries(
                name,
                actual_name,
                context,
                &[
                    format!("{actual_name} inventor portrait"),
                    format!("{actual_name} invention"),
                    format!("{actual_name} patent drawing"),
                ],
            ),
            QueryStrategy::Navigator => person_queries(
                name,
                actual_name,
                context,
                &[
                    format!("{actual_name} explorer portrait"),
                    format!("{actual_name} voyage map"),
                    format!("{actual_name} expedition ship"),
                ],
            ),
        }
    }
}

fn person_queries(
    name: &str,
    actual_name: &str,
    context: &BiographyContext,
    subtype_queries: &[String],
) -> Vec<String> {
    let mut queries = Vec::new();

    if let (Some(country), Some(role)) = (context.country, context.role) {
        queries.push(format!("{actual_name} {country} {role} portrait"));
    }
    if let Some(country) = context.country {
        queries.push(format!("{actual_name} {country} portrait"));
        // A lone short surname is too ambiguous without the personal name.
        if actual_name.contains(' ') || name.chars().count() > 10 {
            queries.push(format!("{name} {country} portrait"));
        }
    }
    if let Some(role) = context.role {
        queries.push(format!("{actual_name} {role} portrait"));
    }
    if let Some(dynasty) = context.dynasty {
        queries.push(format!("{actual_name} {dynasty} portrait"));
    }
    if let Some(year) = context.earliest_year() {
        queries.push(format!("{actual_name} {year} portrait"));
        if let Some(country) = context.country {
            queries.push(format!("{actual_name} {country} {year} portrait"));
        }
    }

    queries.extend(subtype_queries.iter().cloned());

    queries.push(format!("{actual_name} portrait"));
    queries.push(format!("{actual_name} painting"));
    if actual_name != name {
        queries.push(format!("{name} portrait"));
    }
    queries
}

fn query_key(query: &str) -> String {
    collapse_whitespace(query).to_lowercase()
}

/// Drops blank and case/whitespace-duplicate queries, keeping first occurrences.
pub fn dedup_queries(queries: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut unique = Vec::new();
    for query in queries {
        let query = collapse_whitespace(&query);
        if query.is_empty() {
            continue;
        }
        if seen.insert(query_key(&query)) {
            unique.push(query);
        }
    }
    unique
}

pub struct QueryBuilder {
    overrides: QueryOverrides,
    max_queries: usize,
}

impl QueryBuilder {
    pub fn new(overrides: QueryOverrides, max_queries: usize) -> Self {
        Self {
            overrides,
            max_queries: max_queries.max(1),
        }
    }

    pub fn max_queries(&self) -> usize {
        self.max_queries
    }

    pub fn build_queries(&self, entity: &Entity) -> Result<Vec<String>, QueryError> {
        let name = collapse_whitespace(&entity.name);
        if name.is_empty() {
            return Err(QueryError::InsufficientData {
                entity_id: entity.id,
            });
        }

        if let Some(manual) = self.overrides.get(&name) {
            let mut queries = dedup_queries(manual.iter().cloned());
            queries.truncate(self.max_queries);
            if !queries.is_empty() {
                debug!(
                    "Queries[{}]: using {} manual overrides",
                    entity.label(),
                    queries.len()
                );
                return Ok(queries);
            }
        }

        let biography = entity.biography.as_deref().unwrap_or_default();
        let context = extract_context(
            biography,
            entity.birth_date.as_deref(),
            entity.death_date.as_deref(),
        );
        let strategy = QueryStrategy::select(entity.category, &context);
        let actual_name = match (strategy, entity.alternate_name.as_deref()) {
            (QueryStrategy::Place, _) | (_, None) => name.clone(),
            (_, Some(alternate)) => extract_actual_name(&name, alternate),
        };

        let fallback_key = query_key(&name);
        let mut queries: Vec<String> =
            dedup_queries(strategy.generate(&name, &actual_name, &context))
                .into_iter()
                .filter(|query| query_key(query) != fallback_key)
                .collect();
        queries.truncate(self.max_queries - 1);
        queries.push(name);

        debug!(
            "Queries[{}]: strategy={:?} count={} first={:?}",
            entity.label(),
            strategy,
            queries.len(),
            queries.first()
        );
        Ok(queries)
    }
}
