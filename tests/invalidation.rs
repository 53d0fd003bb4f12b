mod common;

use quire::{
    application::pagination::PageRequest,
    cache::{CacheConfig, InvalidationMode, ReadError, ServedFrom},
    source::ReadOptions,
};
use quire_api_types::ItemSummary;

use common::{Harness, item, tag};

fn slugs(items: &[ItemSummary]) -> Vec<&str> {
    items.iter().map(|item| item.slug.as_str()).collect()
}

fn first_page() -> PageRequest {
    PageRequest::new(None, None, None).expect("default page")
}

fn seeded(config: CacheConfig) -> Harness {
    let harness = Harness::new(config);
    let mut b = item("b", "B", 2);
    b.tags.push(tag("rust"));
    harness.source.upsert(item("a", "A", 3));
    harness.source.upsert(b);
    harness.source.upsert(item("c", "C", 1));
    harness
}

#[tokio::test]
async fn background_not_found_scrubs_lists() {
    let harness = seeded(CacheConfig::default());

    let list = harness
        .content()
        .browse_posts(first_page())
        .await
        .expect("list");
    assert_eq!(slugs(&list.data), ["a", "b", "c"]);
    harness
        .content()
        .read_post("b", ReadOptions::default())
        .await
        .expect("detail");

    harness.source.remove("b");
    harness.advance_secs(45);
    let stale = harness
        .content()
        .read_post("b", ReadOptions::default())
        .await
        .expect("stale detail still served");
    assert_eq!(stale.served_from, ServedFrom::Stale);
    harness.settle().await;

    let list = harness
        .content()
        .browse_posts(first_page())
        .await
        .expect("list after invalidation");
    assert!(!slugs(&list.data).contains(&"b"));

    let detail = harness
        .content()
        .read_post("b", ReadOptions::default())
        .await
        .expect_err("detail entry dropped");
    assert!(matches!(detail, ReadError::NotFound));
}

#[tokio::test]
async fn miss_not_found_filters_lists_and_keeps_their_age() {
    let harness = seeded(CacheConfig::default());
    let rust = PageRequest::new(None, None, Some("rust".to_string())).expect("tag page");

    harness
        .content()
        .browse_posts(first_page())
        .await
        .expect("list");
    harness
        .content()
        .browse_posts(rust.clone())
        .await
        .expect("tag list");
    let list_calls = harness.source.calls().list();

    harness.advance_secs(5);
    harness.source.remove("b");
    let err = harness
        .content()
        .read_post("b", ReadOptions::default())
        .await
        .expect_err("gone upstream");
    assert!(matches!(err, ReadError::NotFound));

    let list = harness
        .content()
        .browse_posts(first_page())
        .await
        .expect("rewritten list");
    assert_eq!(list.served_from, ServedFrom::Fresh);
    assert_eq!(slugs(&list.data), ["a", "c"]);

    let tagged = harness
        .content()
        .browse_posts(rust)
        .await
        .expect("rewritten tag list");
    assert!(tagged.data.is_empty());
    assert_eq!(harness.source.calls().list(), list_calls);

    harness.advance_secs(30);
    let aged = harness
        .content()
        .browse_posts(first_page())
        .await
        .expect("rewritten list ages from its original fetch");
    assert_eq!(aged.served_from, ServedFrom::Stale);
}

#[tokio::test]
async fn delete_mode_forces_lists_to_repopulate() {
    let harness = seeded(CacheConfig {
        invalidation_mode: InvalidationMode::Delete,
        ..CacheConfig::default()
    });

    harness
        .content()
        .browse_posts(first_page())
        .await
        .expect("list");
    harness.source.remove("b");

    let report = harness.content().invalidate("b").await;
    assert_eq!(report.lists_deleted, 1);
    assert_eq!(report.lists_rewritten, 0);

    let list = harness
        .content()
        .browse_posts(first_page())
        .await
        .expect("list after delete");
    assert_eq!(list.served_from, ServedFrom::Miss);
    assert_eq!(slugs(&list.data), ["a", "c"]);
}

#[tokio::test]
async fn explicit_invalidation_drops_every_detail_variant() {
    let harness = seeded(CacheConfig::default());
    let with_fields = ReadOptions {
        fields: Some("title".to_string()),
        ..Default::default()
    };
    harness
        .content()
        .read_post("b", ReadOptions::default())
        .await
        .expect("plain detail");
    harness
        .content()
        .read_post("b", with_fields.clone())
        .await
        .expect("fields detail");

    let report = harness.content().invalidate("b").await;
    assert_eq!(report.slug, "b");
    assert_eq!(report.details_deleted, 2);

    let reread = harness
        .content()
        .read_post("b", with_fields)
        .await
        .expect("re-read");
    assert_eq!(reread.served_from, ServedFrom::Miss);
}

#[tokio::test]
async fn purge_clears_the_namespace() {
    let harness = seeded(CacheConfig::default());
    harness
        .content()
        .browse_posts(first_page())
        .await
        .expect("list");
    harness
        .content()
        .read_post("a", ReadOptions::default())
        .await
        .expect("detail");
    harness
        .content()
        .browse_tags(quire::source::TagLimit::All)
        .await
        .expect("tags");

    let report = harness.content().purge().await;
    assert_eq!(report.keys_deleted, 3);

    let list = harness
        .content()
        .browse_posts(first_page())
        .await
        .expect("list after purge");
    assert_eq!(list.served_from, ServedFrom::Miss);
}

#[tokio::test]
async fn list_filtered_by_a_tag_named_lock_is_scrubbed() {
    let harness = Harness::new(CacheConfig::default());
    let mut b = item("b", "B", 1);
    b.tags.push(tag("lock"));
    harness.source.upsert(b);
    let locked = PageRequest::new(None, None, Some("lock".to_string())).expect("tag page");

    let list = harness
        .content()
        .browse_posts(locked.clone())
        .await
        .expect("tag list");
    assert_eq!(slugs(&list.data), ["b"]);
    harness
        .content()
        .read_post("b", ReadOptions::default())
        .await
        .expect("detail");

    harness.source.remove("b");
    let report = harness.content().invalidate("b").await;
    assert_eq!(report.lists_rewritten, 1);
    assert_eq!(report.details_deleted, 1);

    let list = harness
        .content()
        .browse_posts(locked)
        .await
        .expect("tag list after invalidation");
    assert_eq!(list.served_from, ServedFrom::Fresh);
    assert!(list.data.is_empty());
}
