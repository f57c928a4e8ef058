// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test utilities.
//!
//! A small blogging schema with users organised in teams and organisations, and blogs, posts and
//! comments owned by organisations.
use crate::schema::{Document, EntityType, HierarchyKind, LinkField, Schema};
use crate::store::EntityMemoryStore;

pub fn setup_logging() {
    if std::env::var("RUST_LOG").is_ok() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();
    }
}

/// Subjects `user → team → organization`, resources `comment → post → blog → organization`.
///
/// Comments additionally reference their organisation, attachments are unsecured resources and
/// tags are not part of any hierarchy.
pub fn blog_schema() -> Schema {
    let entities = vec![
        EntityType::new("organization")
            .field("name")
            .member_of(HierarchyKind::Subject)
            .member_of(HierarchyKind::Resource),
        EntityType::new("team").field("name").link(
            LinkField::new("organizationId", "organization").parent_of(HierarchyKind::Subject),
        ),
        EntityType::new("user")
            .field("email")
            .link(
                LinkField::new("teamIds", "team")
                    .array()
                    .parent_of(HierarchyKind::Subject),
            ),
        EntityType::new("blog").field("title").link(
            LinkField::new("organizationId", "organization").parent_of(HierarchyKind::Resource),
        ),
        EntityType::new("post")
            .field("title")
            .link(LinkField::new("blogId", "blog").parent_of(HierarchyKind::Resource))
            .link(LinkField::new("authorId", "user")),
        EntityType::new("comment")
            .field("body")
            .link(LinkField::new("postId", "post").parent_of(HierarchyKind::Resource))
            .link(LinkField::new("organizationId", "organization")),
        EntityType::new("attachment")
            .link(LinkField::new("postId", "post").parent_of(HierarchyKind::Resource))
            .unsecured(),
        EntityType::new("tag").link(LinkField::new("postIds", "post").array().excluded()),
    ];

    match Schema::new(entities) {
        Ok(schema) => schema,
        Err(error) => panic!("invalid test schema: {error}"),
    }
}

/// Named documents of the populated blog fixture.
#[derive(Clone, Debug)]
pub struct BlogFixture {
    pub organization: Document,
    pub team: Document,
    pub user: Document,

    /// User without any team.
    pub guest: Document,

    pub blog: Document,
    pub post: Document,
    pub comment: Document,

    /// Comment without a post reference, owned through its organisation link.
    pub loose_comment: Document,
}

/// Insert the blog fixture into the store.
///
/// ```text
/// org1 ─ team1 ─ u1            u2
///   │
///   ├─ blog1 ─ post1 ─ comment1
///   │        └ post2
///   └─ blog2 ─ post3
///   └─ comment2
///
/// org2 ─ blog3 ─ post4
/// ```
pub fn populate(store: &EntityMemoryStore) -> BlogFixture {
    let organization = Document::new("organization", "org1");
    let team = Document::new("team", "team1").link("organizationId", ["org1"]);
    let user = Document::new("user", "u1").link("teamIds", ["team1"]);
    let guest = Document::new("user", "u2");
    let blog = Document::new("blog", "blog1").link("organizationId", ["org1"]);
    let post = Document::new("post", "post1")
        .link("blogId", ["blog1"])
        .link("authorId", ["u1"]);
    let comment = Document::new("comment", "comment1").link("postId", ["post1"]);
    let loose_comment = Document::new("comment", "comment2").link("organizationId", ["org1"]);

    let documents = [
        organization.clone(),
        team.clone(),
        user.clone(),
        guest.clone(),
        blog.clone(),
        post.clone(),
        comment.clone(),
        loose_comment.clone(),
        Document::new("organization", "org2"),
        Document::new("blog", "blog2").link("organizationId", ["org1"]),
        Document::new("blog", "blog3").link("organizationId", ["org2"]),
        Document::new("post", "post2").link("blogId", ["blog1"]),
        Document::new("post", "post3").link("blogId", ["blog2"]),
        Document::new("post", "post4").link("blogId", ["blog3"]),
        Document::new("tag", "tag1").link("postIds", ["post1", "post4"]),
    ];
    for document in documents {
        store.insert(document);
    }

    BlogFixture {
        organization,
        team,
        user,
        guest,
        blog,
        post,
        comment,
        loose_comment,
    }
}
