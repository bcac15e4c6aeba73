//! Eager loading
//!
//! A `Preloader` holds the relations requested for one query. Processing
//! issues one batched query per relation name (one per type for morph-to),
//! fetches independent relations concurrently and attaches the results to
//! their parents by key.

use std::fmt;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::{stream, FutureExt, StreamExt, TryStreamExt};
use tracing::debug;

use super::definition::RelationDefinition;
use super::existence::RelationQueries;
use super::kinds::RelationKind;
use super::query::RelationQueryBuilder;
use crate::backends::QueryClient;
use crate::error::ModelResult;
use crate::model::{Record, Schema};

/// Refinement applied to a preload query before it runs
pub type PreloadRefine =
    Arc<dyn Fn(RelationQueryBuilder) -> ModelResult<RelationQueryBuilder> + Send + Sync>;

#[derive(Clone)]
struct PreloadRequest {
    name: String,
    relation: Arc<RelationDefinition>,
    refine: Option<PreloadRefine>,
}

#[derive(Clone, Default)]
pub struct Preloader {
    requests: Vec<PreloadRequest>,
}

impl Preloader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    /// Requested relation names in registration order
    pub fn names(&self) -> Vec<&str> {
        self.requests.iter().map(|request| request.name.as_str()).collect()
    }

    /// Register a relation of `schema`. A dotted path preloads the tail on the
    /// related records; `refine` then applies to the innermost relation.
    pub fn preload(
        &mut self,
        schema: &Arc<Schema>,
        path: &str,
        refine: Option<PreloadRefine>,
    ) -> ModelResult<()> {
        let (head, rest) = match path.split_once('.') {
            Some((head, rest)) => (head, Some(rest)),
            None => (path, None),
        };
        let relation = schema.relation(head)?;

        let Some(rest) = rest else {
            self.upsert(head, relation, refine);
            return Ok(());
        };

        if relation.kind() != RelationKind::MorphTo {
            validate_path(&relation.related_schema()?, rest)?;
        }

        let existing = self.find(head).and_then(|request| request.refine.clone());
        let rest = rest.to_string();
        let nested: PreloadRefine = Arc::new(move |query: RelationQueryBuilder| {
            let query = match &existing {
                Some(previous) => previous(query)?,
                None => query,
            };
            query.preload_refined(&rest, refine.clone())
        });
        self.upsert(head, relation, Some(nested));
        Ok(())
    }

    fn find(&self, name: &str) -> Option<&PreloadRequest> {
        self.requests.iter().find(|request| request.name == name)
    }

    fn upsert(
        &mut self,
        name: &str,
        relation: Arc<RelationDefinition>,
        refine: Option<PreloadRefine>,
    ) {
        let request = PreloadRequest {
            name: name.to_string(),
            relation,
            refine,
        };
        match self.requests.iter_mut().find(|existing| existing.name == name) {
            Some(existing) => *existing = request,
            None => self.requests.push(request),
        }
    }

    /// Load every requested relation onto one parent
    pub async fn process_all_for_one(
        &self,
        parent: &mut Record,
        client: &Arc<dyn QueryClient>,
    ) -> ModelResult<()> {
        self.process_all_for_many(std::slice::from_mut(parent), client).await
    }

    /// Load every requested relation onto `parents`, one batch per relation name
    pub fn process_all_for_many<'a>(
        &'a self,
        parents: &'a mut [Record],
        client: &'a Arc<dyn QueryClient>,
    ) -> BoxFuture<'a, ModelResult<()>> {
        async move {
            if parents.is_empty() || self.requests.is_empty() {
                return Ok(());
            }

            let snapshot: Vec<Record> = parents.iter().map(Record::detached).collect();
            let concurrency = client.config().preload_concurrency.max(1);

            let pending: Vec<_> = self
                .requests
                .iter()
                .map(|request| fetch(request, &snapshot, client))
                .collect();
            let fetched: Vec<(Arc<RelationDefinition>, Vec<Record>)> = stream::iter(pending)
                .buffered(concurrency)
                .try_collect()
                .await?;

            for (relation, related) in fetched {
                relation.set_related_for_many(parents, related)?;
            }
            Ok(())
        }
        .boxed()
    }
}

async fn fetch(
    request: &PreloadRequest,
    parents: &[Record],
    client: &Arc<dyn QueryClient>,
) -> ModelResult<(Arc<RelationDefinition>, Vec<Record>)> {
    let mut related = Vec::new();
    for query in request.relation.eager_queries(parents, client.clone())? {
        let query = match &request.refine {
            Some(refine) => refine(query)?,
            None => query,
        };
        related.extend(query.exec().await?);
    }
    debug!(
        relation = %request.name,
        parents = parents.len(),
        related = related.len(),
        "preloaded relation"
    );
    Ok((request.relation.clone(), related))
}

fn validate_path(schema: &Arc<Schema>, path: &str) -> ModelResult<()> {
    let (head, rest) = match path.split_once('.') {
        Some((head, rest)) => (head, Some(rest)),
        None => (path, None),
    };
    let relation = schema.relation(head)?;
    match rest {
        Some(rest) if relation.kind() != RelationKind::MorphTo => {
            validate_path(&relation.related_schema()?, rest)
        }

        _ => Ok(()),
    }
}

impl fmt::Debug for Preloader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ModelError;
    use crate::model::SchemaBuilder;
    use crate::relationships::RelationOptions;
    use once_cell::sync::Lazy;

    static TEAM: Lazy<Arc<Schema>> = Lazy::new(|| {
        SchemaBuilder::new("Team", "teams")
            .column("id")
            .has_many("members", || MEMBER.clone(), RelationOptions::new())
            .build()
    });

    static MEMBER: Lazy<Arc<Schema>> = Lazy::new(|| {
        SchemaBuilder::new("Member", "members")
            .columns(&["id", "team_id"])
            .belongs_to("team", || TEAM.clone(), RelationOptions::new())
            .build()
    });

    #[test]
    fn test_unknown_relation_fails_on_registration() {
        let mut preloader = Preloader::new();
        assert!(matches!(
            preloader.preload(&TEAM, "players", None),
            Err(ModelError::UndefinedRelationship { .. })
        ));
        assert!(matches!(
            preloader.preload(&TEAM, "members.coach", None),
            Err(ModelError::UndefinedRelationship { .. })
        ));
        assert!(preloader.is_empty());
    }

    #[test]
    fn test_last_registration_wins_in_place() {
        let mut preloader = Preloader::new();
        preloader.preload(&TEAM, "members", None).unwrap();
        preloader.preload(&MEMBER, "team", None).unwrap();
        preloader.preload(&TEAM, "members.team", None).unwrap();
        assert_eq!(preloader.names(), vec!["members", "team"]);
    }
}
