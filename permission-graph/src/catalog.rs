// SPDX-License-Identifier: MIT OR Apache-2.0

//! Index of the typed links between entity types.
use std::collections::HashMap;
use std::sync::Arc;

use crate::cache::MemoCache;
use crate::schema::{LinkField, RelationKind, Schema};

/// Direction of a link relative to the collection it is looked up for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Links held by the collection, pointing at other collections.
    Outgoing,

    /// Links held by other collections, pointing at the collection.
    Incoming,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
struct LinkQuery {
    collection: usize,
    direction: Direction,
    relation: Option<RelationKind>,
}

/// A link field together with the entity type holding it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LinkRef {
    pub source: String,
    pub field: LinkField,
}

impl LinkRef {
    pub fn target(&self) -> &str {
        &self.field.target
    }
}

/// Outgoing and incoming links of every entity type with memoised, sorted lookups.
#[derive(Debug)]
pub struct LinkCatalog {
    names: Vec<String>,
    indices: HashMap<String, usize>,
    outgoing: Vec<Vec<LinkRef>>,
    incoming: Vec<Vec<LinkRef>>,
    sorted: MemoCache<LinkQuery, [LinkRef]>,
}

impl LinkCatalog {
    pub fn new(schema: &Schema) -> Self {
        let names: Vec<String> = schema
            .entities()
            .iter()
            .map(|entity| entity.name.clone())
            .collect();
        let indices: HashMap<String, usize> = names
            .iter()
            .enumerate()
            .map(|(index, name)| (name.clone(), index))
            .collect();

        let mut outgoing = vec![Vec::new(); names.len()];
        let mut incoming = vec![Vec::new(); names.len()];
        for (source, entity) in schema.entities().iter().enumerate() {
            for field in &entity.links {
                let link = LinkRef {
                    source: entity.name.clone(),
                    field: field.clone(),
                };
                // Targets are validated by `Schema::new`.
                if let Some(target) = indices.get(&field.target) {
                    incoming[*target].push(link.clone());
                }
                outgoing[source].push(link);
            }
        }

        Self {
            names,
            indices,
            outgoing,
            incoming,
            sorted: MemoCache::default(),
        }
    }

    /// Entity type names in declaration order.
    pub fn collections(&self) -> &[String] {
        &self.names
    }

    pub fn contains(&self, collection: &str) -> bool {
        self.indices.contains_key(collection)
    }

    /// Links of the given collection in one direction, optionally narrowed to one relation kind.
    ///
    /// Results are sorted by the collection on the other end of the link and then by field
    /// name. Unknown collections have no links.
    pub fn links(
        &self,
        collection: &str,
        direction: Direction,
        relation: Option<RelationKind>,
    ) -> Arc<[LinkRef]> {
        let Some(index) = self.indices.get(collection).copied() else {
            return Arc::from(Vec::new());
        };

        let query = LinkQuery {
            collection: index,
            direction,
            relation,
        };

        self.sorted.get_or_insert_with(query, || {
            let links = match direction {
                Direction::Outgoing => &self.outgoing[index],
                Direction::Incoming => &self.incoming[index],
            };

            let mut links: Vec<LinkRef> = links
                .iter()
                .filter(|link| relation.is_none_or(|relation| link.field.relation == relation))
                .cloned()
                .collect();

            links.sort_by(|a, b| {
                let (a_other, b_other) = match direction {
                    Direction::Outgoing => (a.target(), b.target()),
                    Direction::Incoming => (a.source.as_str(), b.source.as_str()),
                };
                a_other
                    .cmp(b_other)
                    .then_with(|| a.field.name.cmp(&b.field.name))
            });

            Arc::from(links)
        })
    }

    /// First non-excluded link held by `from` pointing at `to`.
    pub fn link_between(&self, from: &str, to: &str) -> Option<LinkRef> {
        self.links(from, Direction::Outgoing, None)
            .iter()
            .find(|link| !link.field.excluded && link.target() == to)
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use crate::schema::{EntityType, HierarchyKind, LinkField, RelationKind, Schema};

    use super::{Direction, LinkCatalog};

    fn schema() -> Schema {
        Schema::new(vec![
            EntityType::new("organization"),
            EntityType::new("blog").link(
                LinkField::new("organizationId", "organization").parent_of(HierarchyKind::Resource),
            ),
            EntityType::new("post")
                .link(LinkField::new("editorId", "user"))
                .link(LinkField::new("blogId", "blog").parent_of(HierarchyKind::Resource))
                .link(LinkField::new("archivedBlogId", "blog").excluded()),
            EntityType::new("user"),
        ])
        .unwrap()
    }

    #[test]
    fn sorted_lookups() {
        let catalog = LinkCatalog::new(&schema());

        let outgoing = catalog.links("post", Direction::Outgoing, None);
        let names: Vec<_> = outgoing.iter().map(|l| l.field.name.as_str()).collect();
        assert_eq!(names, vec!["archivedBlogId", "blogId", "editorId"]);

        let owned_by = catalog.links("post", Direction::Outgoing, Some(RelationKind::OwnedBy));
        assert_eq!(owned_by.len(), 1);
        assert_eq!(owned_by[0].field.name, "blogId");

        let incoming = catalog.links("blog", Direction::Incoming, None);
        assert_eq!(incoming.len(), 2);
        assert!(incoming.iter().all(|link| link.source == "post"));

        assert!(catalog.links("unknown", Direction::Outgoing, None).is_empty());
    }

    #[test]
    fn link_between_skips_excluded_links() {
        let catalog = LinkCatalog::new(&schema());

        let link = catalog.link_between("post", "blog").unwrap();
        assert_eq!(link.field.name, "blogId");
        assert!(catalog.link_between("blog", "post").is_none());
    }
}
