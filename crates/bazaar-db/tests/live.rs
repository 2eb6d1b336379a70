//! Live integration tests for bazaar-db using `#[sqlx::test]`.
//!
//! Each test gets a fresh, fully-migrated Postgres database spun up by the
//! sqlx test harness. The `migrations` path is relative to the crate root
//! (`crates/bazaar-db/`), so `"../../migrations"` resolves to the workspace
//! migration directory.

use std::collections::HashSet;
use std::str::FromStr;
use std::time::Duration;

use bazaar_core::facets::{facet_views, matching_product_ids};
use bazaar_core::{
    Facet, FilterError, FilterTarget, KontragentIdentity, OrderError, OrderStatus, OwnershipForm,
    Page,
};
use bazaar_db::{
    add_to_cart, create_address, create_catalog, create_category, create_kontragent,
    create_or_merge_filter, create_order_from_cart, create_product, create_subcatalog, create_user,
    get_catalog_tree_by_slug, get_filter, get_live_filter_for_target, get_order, get_product, list_addresses, list_cart,
    list_catalog_tree, list_kontragents, list_products, list_tagged_products, rebuild_all_filters,
    remove_facet, replace_facet, resolve_subcatalog_by_slug, save_product, list_saved_products,
    set_favorite_kontragent, set_main_address, soft_delete_catalog, soft_delete_category,
    soft_delete_filter, soft_delete_product, update_order_status, update_product, DbError,
    NewOrder, NewProduct, ProductListFilters, ProductPatch,
};
use rust_decimal::Decimal;
use serde_json::json;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

struct Tree {
    catalog_id: i64,
    subcatalog_id: i64,
    category_id: i64,
}

async fn seed_tree(pool: &sqlx::PgPool, prefix: &str) -> Tree {
    let catalog = create_catalog(pool, "Электроника", &format!("{prefix}-elektronika"))
        .await
        .expect("create_catalog failed");
    let subcatalog = create_subcatalog(pool, catalog.id, "Телефоны", &format!("{prefix}.telefony"))
        .await
        .expect("create_subcatalog failed");
    let category = create_category(pool, subcatalog.id, "Смартфоны", &format!("{prefix}-smartfony"))
        .await
        .expect("create_category failed");
    Tree {
        catalog_id: catalog.id,
        subcatalog_id: subcatalog.id,
        category_id: category.id,
    }
}

fn new_product(tree: &Tree, slug: &str, price: &str, tags: &[&str]) -> NewProduct {
    let tags: Vec<String> = tags.iter().map(ToString::to_string).collect();
    NewProduct {
        title: format!("Product {slug}"),
        slug: slug.to_string(),
        description: None,
        price: Decimal::from_str(price).expect("valid decimal"),
        images: vec!["public\\uploads\\phone.jpg".to_string()],
        catalog_id: tree.catalog_id,
        subcatalog_id: tree.subcatalog_id,
        category_id: tree.category_id,
        brand_id: None,
        condition_id: None,
        relevance_id: None,
        category_filter: tags.clone(),
        subcatalog_filter: tags,
    }
}

fn brand_facet() -> Vec<Facet> {
    serde_json::from_value(json!([{
        "name": "brand",
        "type": "checkbox",
        "title": "Бренд",
        "options": [
            { "name": "apple", "products_id": [999] },
            { "name": "samsung" },
            { "name": "xiaomi" }
        ]
    }]))
    .expect("valid facet json")
}

fn option_ids(data: &[Facet], facet: &str, option: &str) -> Vec<i64> {
    data.iter()
        .find(|f| f.name == facet)
        .and_then(|f| f.options.iter().find(|o| o.name == option))
        .map(|o| o.products_id.clone())
        .unwrap_or_default()
}

async fn insert_user(pool: &sqlx::PgPool, email: &str) -> i64 {
    create_user(pool, "Test User", email, None, "$argon2id$placeholder")
        .await
        .unwrap_or_else(|e| panic!("create_user failed for '{email}': {e}"))
        .id
}

fn legal_entity(inn: &str) -> KontragentIdentity {
    KontragentIdentity::new(OwnershipForm::LegalEntity, "ООО Ромашка", Some(inn), None)
        .expect("valid identity")
}

// ---------------------------------------------------------------------------
// Section 1: Catalog hierarchy
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../migrations")]
async fn catalog_tree_lists_live_children(pool: sqlx::PgPool) {
    let tree = seed_tree(&pool, "t1").await;

    let trees = list_catalog_tree(&pool).await.expect("list_catalog_tree failed");
    assert_eq!(trees.len(), 1);
    assert_eq!(trees[0].catalog.id, tree.catalog_id);
    assert_eq!(trees[0].subcatalogs.len(), 1);
    assert_eq!(trees[0].subcatalogs[0].categories.len(), 1);
    assert_eq!(trees[0].subcatalogs[0].categories[0].id, tree.category_id);
}

#[sqlx::test(migrations = "../../migrations")]
async fn catalog_soft_delete_hides_tree_but_keeps_row(pool: sqlx::PgPool) {
    let tree = seed_tree(&pool, "t1").await;
    let product = create_product(&pool, new_product(&tree, "iphone", "100.00", &["apple"]))
        .await
        .expect("create_product failed");

    soft_delete_catalog(&pool, tree.catalog_id)
        .await
        .expect("soft_delete_catalog failed");

    assert!(list_catalog_tree(&pool).await.unwrap().is_empty());
    assert!(get_catalog_tree_by_slug(&pool, "t1-elektronika")
        .await
        .unwrap()
        .is_none());
    assert!(resolve_subcatalog_by_slug(&pool, "t1.telefony")
        .await
        .unwrap()
        .is_none());
    assert!(get_product(&pool, product.id).await.unwrap().is_none());

    let rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM catalogs WHERE id = $1")
        .bind(tree.catalog_id)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(rows, 1, "soft delete must keep the row");

    let err = soft_delete_catalog(&pool, tree.catalog_id).await.unwrap_err();
    assert!(matches!(err, DbError::NotFound));
}

#[sqlx::test(migrations = "../../migrations")]
async fn subcatalog_under_deleted_catalog_is_rejected(pool: sqlx::PgPool) {
    let tree = seed_tree(&pool, "t1").await;
    soft_delete_catalog(&pool, tree.catalog_id).await.unwrap();

    let err = create_subcatalog(&pool, tree.catalog_id, "Планшеты", "planshety")
        .await
        .unwrap_err();
    assert!(matches!(err, DbError::NotFound));
}

#[sqlx::test(migrations = "../../migrations")]
async fn live_slugs_are_unique_but_reusable_after_delete(pool: sqlx::PgPool) {
    create_catalog(&pool, "A", "same-slug").await.unwrap();
    let err = create_catalog(&pool, "B", "same-slug").await.unwrap_err();
    assert!(err.is_unique_violation());

    let catalogs = bazaar_db::list_catalogs(&pool).await.unwrap();
    soft_delete_catalog(&pool, catalogs[0].id).await.unwrap();
    create_catalog(&pool, "C", "same-slug")
        .await
        .expect("slug of a deleted row should be reusable");
}

// ---------------------------------------------------------------------------
// Section 2: Filters and the option index
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../migrations")]
async fn filter_create_derives_option_index_from_tags(pool: sqlx::PgPool) {
    let tree = seed_tree(&pool, "t1").await;
    let iphone = create_product(&pool, new_product(&tree, "iphone", "100.00", &["apple"]))
        .await
        .unwrap();
    let galaxy = create_product(&pool, new_product(&tree, "galaxy", "90.00", &["samsung"]))
        .await
        .unwrap();

    let row = create_or_merge_filter(&pool, FilterTarget::Subcatalog(tree.subcatalog_id), brand_facet())
        .await
        .expect("create_or_merge_filter failed");

    assert_eq!(option_ids(&row.data.0, "brand", "apple"), vec![iphone.id]);
    assert_eq!(option_ids(&row.data.0, "brand", "samsung"), vec![galaxy.id]);
    assert!(option_ids(&row.data.0, "brand", "xiaomi").is_empty());
}

#[sqlx::test(migrations = "../../migrations")]
async fn filter_merge_rejects_colliding_facet_names(pool: sqlx::PgPool) {
    let tree = seed_tree(&pool, "t1").await;
    let target = FilterTarget::Category(tree.category_id);
    let first = create_or_merge_filter(&pool, target, brand_facet()).await.unwrap();

    let err = create_or_merge_filter(&pool, target, brand_facet())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        DbError::Filter(FilterError::DuplicateFacet(ref name)) if name == "brand"
    ));

    let color: Vec<Facet> = serde_json::from_value(json!([
        { "name": "color", "type": "radio", "options": [{ "name": "black" }] }
    ]))
    .unwrap();
    let merged = create_or_merge_filter(&pool, target, color).await.unwrap();
    assert_eq!(merged.id, first.id, "merge must reuse the live row");
    assert_eq!(merged.data.0.len(), 2);
}

#[sqlx::test(migrations = "../../migrations")]
async fn filter_for_missing_target_is_not_found(pool: sqlx::PgPool) {
    let err = create_or_merge_filter(&pool, FilterTarget::Subcatalog(4242), brand_facet())
        .await
        .unwrap_err();
    assert!(matches!(err, DbError::NotFound));
}

#[sqlx::test(migrations = "../../migrations")]
async fn product_writes_keep_option_index_in_sync(pool: sqlx::PgPool) {
    let tree = seed_tree(&pool, "t1").await;
    let target = FilterTarget::Subcatalog(tree.subcatalog_id);
    let filter = create_or_merge_filter(&pool, target, brand_facet()).await.unwrap();

    let phone = create_product(&pool, new_product(&tree, "phone", "50.00", &["apple"]))
        .await
        .unwrap();
    let data = get_filter(&pool, filter.id).await.unwrap().unwrap().data.0;
    assert_eq!(option_ids(&data, "brand", "apple"), vec![phone.id]);

    update_product(
        &pool,
        phone.id,
        ProductPatch {
            subcatalog_filter: Some(vec!["xiaomi".to_string()]),
            ..ProductPatch::default()
        },
    )
    .await
    .expect("update_product failed");
    let data = get_filter(&pool, filter.id).await.unwrap().unwrap().data.0;
    assert!(option_ids(&data, "brand", "apple").is_empty());
    assert_eq!(option_ids(&data, "brand", "xiaomi"), vec![phone.id]);

    soft_delete_product(&pool, phone.id).await.unwrap();
    let data = get_filter(&pool, filter.id).await.unwrap().unwrap().data.0;
    assert!(option_ids(&data, "brand", "xiaomi").is_empty());
}

#[sqlx::test(migrations = "../../migrations")]
async fn category_delete_drops_products_from_parent_filter(pool: sqlx::PgPool) {
    let tree = seed_tree(&pool, "t1").await;
    let filter = create_or_merge_filter(&pool, FilterTarget::Subcatalog(tree.subcatalog_id), brand_facet())
        .await
        .unwrap();
    create_product(&pool, new_product(&tree, "phone", "50.00", &["apple"]))
        .await
        .unwrap();

    soft_delete_category(&pool, tree.category_id).await.unwrap();

    let data = get_filter(&pool, filter.id).await.unwrap().unwrap().data.0;
    assert!(option_ids(&data, "brand", "apple").is_empty());
}

#[sqlx::test(migrations = "../../migrations")]
async fn first_filter_row_sees_product_created_while_it_waits(pool: sqlx::PgPool) {
    let tree = seed_tree(&pool, "t1").await;

    // An uncommitted row for the same node parks the filter insert on the
    // partial unique index.
    let mut blocker = pool.begin().await.unwrap();
    sqlx::query("INSERT INTO catalog_filters (subcatalog_id, data) VALUES ($1, '[]'::jsonb)")
        .bind(tree.subcatalog_id)
        .execute(&mut *blocker)
        .await
        .unwrap();

    let filter_task = {
        let pool = pool.clone();
        let target = FilterTarget::Subcatalog(tree.subcatalog_id);
        tokio::spawn(async move { create_or_merge_filter(&pool, target, brand_facet()).await })
    };
    tokio::time::sleep(Duration::from_millis(200)).await;

    let product_task = {
        let pool = pool.clone();
        let product = new_product(&tree, "iphone", "100.00", &["apple"]);
        tokio::spawn(async move { create_product(&pool, product).await })
    };
    tokio::time::sleep(Duration::from_millis(200)).await;

    blocker.rollback().await.unwrap();
    filter_task.await.unwrap().expect("create_or_merge_filter failed");
    let product = product_task.await.unwrap().expect("create_product failed");

    let row = get_live_filter_for_target(&pool, FilterTarget::Subcatalog(tree.subcatalog_id))
        .await
        .unwrap()
        .expect("filter row");
    assert_eq!(option_ids(&row.data.0, "brand", "apple"), vec![product.id]);
}

#[sqlx::test(migrations = "../../migrations")]
async fn opposite_moves_and_category_delete_run_concurrently(pool: sqlx::PgPool) {
    let tree = seed_tree(&pool, "t1").await;
    let tablets = create_category(&pool, tree.subcatalog_id, "Планшеты", "t1-planshety")
        .await
        .unwrap();
    let tablet_tree = Tree {
        catalog_id: tree.catalog_id,
        subcatalog_id: tree.subcatalog_id,
        category_id: tablets.id,
    };
    for target in [
        FilterTarget::Subcatalog(tree.subcatalog_id),
        FilterTarget::Category(tree.category_id),
        FilterTarget::Category(tablets.id),
    ] {
        create_or_merge_filter(&pool, target, brand_facet()).await.unwrap();
    }
    let left = create_product(&pool, new_product(&tree, "left", "1.00", &["apple"]))
        .await
        .unwrap();
    let right = create_product(&pool, new_product(&tablet_tree, "right", "1.00", &["apple"]))
        .await
        .unwrap();

    let mut moves = Vec::new();
    for round in 0..10 {
        let (to_left, to_right) = if round % 2 == 0 {
            (tablets.id, tree.category_id)
        } else {
            (tree.category_id, tablets.id)
        };
        for (id, category_id) in [(left.id, to_left), (right.id, to_right)] {
            let pool = pool.clone();
            moves.push(tokio::spawn(async move {
                update_product(
                    &pool,
                    id,
                    ProductPatch {
                        category_id: Some(category_id),
                        ..ProductPatch::default()
                    },
                )
                .await
            }));
        }
    }
    for handle in moves {
        handle.await.unwrap().expect("concurrent move failed");
    }

    let mut creates = Vec::new();
    for i in 0..8 {
        let pool = pool.clone();
        let product = new_product(&tree, &format!("late-{i}"), "1.00", &["apple"]);
        creates.push(tokio::spawn(async move { create_product(&pool, product).await }));
    }
    let delete = {
        let pool = pool.clone();
        let category_id = tree.category_id;
        tokio::spawn(async move { soft_delete_category(&pool, category_id).await })
    };
    delete.await.unwrap().expect("soft_delete_category failed");
    for handle in creates {
        match handle.await.unwrap() {
            Ok(_) | Err(DbError::Invalid(_)) => {}
            Err(e) => panic!("create racing a category delete failed: {e}"),
        }
    }

    let live_under_deleted: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM products WHERE category_id = $1 AND deleted_at IS NULL",
    )
    .bind(tree.category_id)
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(live_under_deleted, 0);

    let mut live: Vec<i64> = sqlx::query_scalar(
        "SELECT id FROM products WHERE subcatalog_id = $1 AND deleted_at IS NULL",
    )
    .bind(tree.subcatalog_id)
    .fetch_all(&pool)
    .await
    .unwrap();
    live.sort_unstable();
    let row = get_live_filter_for_target(&pool, FilterTarget::Subcatalog(tree.subcatalog_id))
        .await
        .unwrap()
        .expect("subcatalog filter stays live");
    let mut indexed = option_ids(&row.data.0, "brand", "apple");
    indexed.sort_unstable();
    assert_eq!(indexed, live);
}

#[sqlx::test(migrations = "../../migrations")]
async fn facet_replace_allows_same_name_and_rejects_collisions(pool: sqlx::PgPool) {
    let tree = seed_tree(&pool, "t1").await;
    let phone = create_product(&pool, new_product(&tree, "phone", "50.00", &["apple", "black"]))
        .await
        .unwrap();
    let facets: Vec<Facet> = serde_json::from_value(json!([
        { "name": "brand", "type": "checkbox", "options": [{ "name": "apple" }] },
        { "name": "color", "type": "radio", "options": [{ "name": "white" }] }
    ]))
    .unwrap();
    let filter = create_or_merge_filter(&pool, FilterTarget::Subcatalog(tree.subcatalog_id), facets)
        .await
        .unwrap();

    let same_name: Facet = serde_json::from_value(json!({
        "name": "color", "type": "checkbox", "title": "Цвет",
        "options": [{ "name": "white" }, { "name": "black" }]
    }))
    .unwrap();
    let row = replace_facet(&pool, filter.id, "color", same_name)
        .await
        .expect("same-name replace should succeed");
    assert_eq!(option_ids(&row.data.0, "color", "black"), vec![phone.id]);

    let rename: Facet = serde_json::from_value(json!({ "name": "brand", "type": "radio" })).unwrap();
    let err = replace_facet(&pool, filter.id, "color", rename).await.unwrap_err();
    assert!(matches!(err, DbError::Filter(FilterError::DuplicateFacet(_))));
}

#[sqlx::test(migrations = "../../migrations")]
async fn facet_remove_and_filter_delete(pool: sqlx::PgPool) {
    let tree = seed_tree(&pool, "t1").await;
    let filter = create_or_merge_filter(&pool, FilterTarget::Category(tree.category_id), brand_facet())
        .await
        .unwrap();

    let err = remove_facet(&pool, filter.id, "color").await.unwrap_err();
    assert!(matches!(err, DbError::Filter(FilterError::FacetNotFound(_))));

    let row = remove_facet(&pool, filter.id, "brand").await.unwrap();
    assert!(row.data.0.is_empty());

    soft_delete_filter(&pool, filter.id).await.unwrap();
    assert!(get_filter(&pool, filter.id).await.unwrap().is_none());
}

#[sqlx::test(migrations = "../../migrations")]
async fn rebuild_repairs_a_corrupted_index(pool: sqlx::PgPool) {
    let tree = seed_tree(&pool, "t1").await;
    let phone = create_product(&pool, new_product(&tree, "phone", "50.00", &["samsung"]))
        .await
        .unwrap();
    let filter = create_or_merge_filter(&pool, FilterTarget::Subcatalog(tree.subcatalog_id), brand_facet())
        .await
        .unwrap();

    sqlx::query(
        "UPDATE catalog_filters SET data = jsonb_set(data, '{0,options,0,products_id}', '[1,2,3]') \
         WHERE id = $1",
    )
    .bind(filter.id)
    .execute(&pool)
    .await
    .unwrap();

    let changed = rebuild_all_filters(&pool).await.expect("rebuild failed");
    assert_eq!(changed, 1);
    let data = get_filter(&pool, filter.id).await.unwrap().unwrap().data.0;
    assert!(option_ids(&data, "brand", "apple").is_empty());
    assert_eq!(option_ids(&data, "brand", "samsung"), vec![phone.id]);

    assert_eq!(rebuild_all_filters(&pool).await.unwrap(), 0);
}

// ---------------------------------------------------------------------------
// Section 3: Products and faceted search
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../migrations")]
async fn product_hierarchy_must_line_up(pool: sqlx::PgPool) {
    let tree = seed_tree(&pool, "t1").await;
    let other = seed_tree(&pool, "t2").await;

    let mut product = new_product(&tree, "phone", "10.00", &[]);
    product.subcatalog_id = other.subcatalog_id;
    let err = create_product(&pool, product).await.unwrap_err();
    assert!(matches!(err, DbError::Invalid(_)));
}

#[sqlx::test(migrations = "../../migrations")]
async fn product_images_are_normalized(pool: sqlx::PgPool) {
    let tree = seed_tree(&pool, "t1").await;
    let product = create_product(&pool, new_product(&tree, "phone", "10.00", &[]))
        .await
        .unwrap();
    assert_eq!(product.images, vec!["uploads/phone.jpg".to_string()]);
}

#[sqlx::test(migrations = "../../migrations")]
async fn faceted_search_uses_or_semantics(pool: sqlx::PgPool) {
    let tree = seed_tree(&pool, "0101").await;
    let iphone = create_product(&pool, new_product(&tree, "iphone", "100.00", &["apple"]))
        .await
        .unwrap();
    let galaxy = create_product(&pool, new_product(&tree, "galaxy", "90.00", &["samsung"]))
        .await
        .unwrap();
    create_product(&pool, new_product(&tree, "redmi", "40.00", &["xiaomi"]))
        .await
        .unwrap();
    let hidden = create_product(&pool, new_product(&tree, "old-iphone", "10.00", &["apple"]))
        .await
        .unwrap();
    soft_delete_product(&pool, hidden.id).await.unwrap();

    let filter = create_or_merge_filter(&pool, FilterTarget::Subcatalog(tree.subcatalog_id), brand_facet())
        .await
        .unwrap();

    let tagged = list_tagged_products(&pool, FilterTarget::Subcatalog(tree.subcatalog_id))
        .await
        .unwrap();
    assert_eq!(tagged.len(), 3, "deleted products are not searchable");

    let selected = vec!["apple".to_string(), "samsung".to_string()];
    let matched = matching_product_ids(&tagged, &selected);
    let matched_set: HashSet<i64> = matched.iter().copied().collect();
    assert_eq!(matched_set, HashSet::from([iphone.id, galaxy.id]));

    let views = facet_views(&filter.data.0, &matched_set);
    let counts: Vec<(String, usize)> = views[0]
        .options
        .iter()
        .map(|o| (o.name.clone(), o.product_count))
        .collect();
    assert_eq!(
        counts,
        vec![
            ("apple".to_string(), 1),
            ("samsung".to_string(), 1),
            ("xiaomi".to_string(), 0)
        ]
    );

    let page = bazaar_db::list_products_by_ids(&pool, &matched).await.unwrap();
    assert_eq!(page.iter().map(|p| p.id).collect::<Vec<_>>(), matched);
}

#[sqlx::test(migrations = "../../migrations")]
async fn product_listing_filters_by_slug_and_pages(pool: sqlx::PgPool) {
    let tree = seed_tree(&pool, "t1").await;
    let other = seed_tree(&pool, "t2").await;
    for i in 0..3 {
        create_product(&pool, new_product(&tree, &format!("a-{i}"), "1.00", &[]))
            .await
            .unwrap();
    }
    create_product(&pool, new_product(&other, "b-0", "1.00", &[]))
        .await
        .unwrap();

    let filters = ProductListFilters {
        subcatalog_slug: Some("t1.telefony".to_string()),
        ..ProductListFilters::default()
    };
    let (rows, total) = list_products(&pool, &filters, Page::new(Some(2), Some(2)))
        .await
        .unwrap();
    assert_eq!(total, 3);
    assert_eq!(rows.len(), 1);

    let (_, all) = list_products(&pool, &ProductListFilters::default(), Page::default())
        .await
        .unwrap();
    assert_eq!(all, 4);
}

// ---------------------------------------------------------------------------
// Section 4: Kontragents
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../migrations")]
async fn first_kontragent_becomes_favorite(pool: sqlx::PgPool) {
    let user_id = insert_user(&pool, "a@example.com").await;

    let first = create_kontragent(&pool, user_id, &legal_entity("123456789"), false)
        .await
        .unwrap();
    let second = create_kontragent(&pool, user_id, &legal_entity("987654321"), false)
        .await
        .unwrap();
    assert!(first.is_favorite);
    assert!(!second.is_favorite);

    let third = create_kontragent(&pool, user_id, &legal_entity("111222333"), true)
        .await
        .unwrap();
    assert!(third.is_favorite);

    let favorites: Vec<i64> = list_kontragents(&pool, user_id)
        .await
        .unwrap()
        .into_iter()
        .filter(|k| k.is_favorite)
        .map(|k| k.id)
        .collect();
    assert_eq!(favorites, vec![third.id]);
}

#[sqlx::test(migrations = "../../migrations")]
async fn duplicate_inn_for_same_user_conflicts(pool: sqlx::PgPool) {
    let user_id = insert_user(&pool, "a@example.com").await;
    let other_user = insert_user(&pool, "b@example.com").await;

    create_kontragent(&pool, user_id, &legal_entity("123456789"), false)
        .await
        .unwrap();
    let err = create_kontragent(&pool, user_id, &legal_entity("123456789"), false)
        .await
        .unwrap_err();
    assert!(matches!(err, DbError::Conflict(_)));

    create_kontragent(&pool, other_user, &legal_entity("123456789"), false)
        .await
        .expect("inn uniqueness is per user");
}

#[sqlx::test(migrations = "../../migrations")]
async fn concurrent_favorite_changes_leave_one_favorite(pool: sqlx::PgPool) {
    let user_id = insert_user(&pool, "a@example.com").await;
    let mut ids = Vec::new();
    for inn in ["100000001", "100000002", "100000003", "100000004"] {
        ids.push(
            create_kontragent(&pool, user_id, &legal_entity(inn), false)
                .await
                .unwrap()
                .id,
        );
    }

    let mut handles = Vec::new();
    for _ in 0..3 {
        for &id in &ids {
            let pool = pool.clone();
            handles.push(tokio::spawn(async move {
                set_favorite_kontragent(&pool, user_id, id).await
            }));
        }
    }
    for handle in handles {
        handle.await.unwrap().expect("set_favorite_kontragent failed");
    }

    let favorites: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM kontragents WHERE user_id = $1 AND is_favorite AND deleted_at IS NULL",
    )
    .bind(user_id)
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(favorites, 1);
}

#[sqlx::test(migrations = "../../migrations")]
async fn foreign_kontragent_is_not_found(pool: sqlx::PgPool) {
    let owner = insert_user(&pool, "a@example.com").await;
    let stranger = insert_user(&pool, "b@example.com").await;
    let k = create_kontragent(&pool, owner, &legal_entity("123456789"), false)
        .await
        .unwrap();

    let err = set_favorite_kontragent(&pool, stranger, k.id).await.unwrap_err();
    assert!(matches!(err, DbError::NotFound));
    let err = list_addresses(&pool, stranger, k.id).await.unwrap_err();
    assert!(matches!(err, DbError::NotFound));
}

#[sqlx::test(migrations = "../../migrations")]
async fn one_main_address_per_kontragent(pool: sqlx::PgPool) {
    let user_id = insert_user(&pool, "a@example.com").await;
    let k = create_kontragent(&pool, user_id, &legal_entity("123456789"), false)
        .await
        .unwrap();

    let first = create_address(&pool, user_id, k.id, "Ташкент, ул. Навои 1", false)
        .await
        .unwrap();
    let second = create_address(&pool, user_id, k.id, "Самарканд, ул. Регистан 2", false)
        .await
        .unwrap();
    assert!(first.is_main);
    assert!(!second.is_main);

    set_main_address(&pool, user_id, k.id, second.id).await.unwrap();

    let addresses = list_addresses(&pool, user_id, k.id).await.unwrap();
    let main: Vec<i64> = addresses.iter().filter(|a| a.is_main).map(|a| a.id).collect();
    assert_eq!(main, vec![second.id]);
}

// ---------------------------------------------------------------------------
// Section 5: Cart, saved products, orders
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../migrations")]
async fn cart_add_sums_and_caps_quantity(pool: sqlx::PgPool) {
    let tree = seed_tree(&pool, "t1").await;
    let user_id = insert_user(&pool, "a@example.com").await;
    let product = create_product(&pool, new_product(&tree, "phone", "10.00", &[]))
        .await
        .unwrap();

    assert_eq!(add_to_cart(&pool, user_id, product.id, 2).await.unwrap(), 2);
    assert_eq!(add_to_cart(&pool, user_id, product.id, 3).await.unwrap(), 5);
    assert_eq!(add_to_cart(&pool, user_id, product.id, 999).await.unwrap(), 999);

    let err = add_to_cart(&pool, user_id, 4242, 1).await.unwrap_err();
    assert!(matches!(err, DbError::NotFound));
}

#[sqlx::test(migrations = "../../migrations")]
async fn saved_products_are_idempotent(pool: sqlx::PgPool) {
    let tree = seed_tree(&pool, "t1").await;
    let user_id = insert_user(&pool, "a@example.com").await;
    let product = create_product(&pool, new_product(&tree, "phone", "10.00", &[]))
        .await
        .unwrap();

    save_product(&pool, user_id, product.id).await.unwrap();
    save_product(&pool, user_id, product.id).await.unwrap();
    assert_eq!(list_saved_products(&pool, user_id).await.unwrap().len(), 1);

    soft_delete_product(&pool, product.id).await.unwrap();
    assert!(list_saved_products(&pool, user_id).await.unwrap().is_empty());
}

#[sqlx::test(migrations = "../../migrations")]
async fn checkout_snapshots_cart_and_clears_it(pool: sqlx::PgPool) {
    let tree = seed_tree(&pool, "t1").await;
    let user_id = insert_user(&pool, "a@example.com").await;
    let phone = create_product(&pool, new_product(&tree, "phone", "1999.90", &[]))
        .await
        .unwrap();
    let case = create_product(&pool, new_product(&tree, "case", "10.05", &[]))
        .await
        .unwrap();
    let k = create_kontragent(&pool, user_id, &legal_entity("123456789"), false)
        .await
        .unwrap();
    let address = create_address(&pool, user_id, k.id, "Ташкент", false)
        .await
        .unwrap();

    add_to_cart(&pool, user_id, phone.id, 2).await.unwrap();
    add_to_cart(&pool, user_id, case.id, 3).await.unwrap();

    let placed = create_order_from_cart(
        &pool,
        user_id,
        &NewOrder {
            kontragent_id: Some(k.id),
            address_id: Some(address.id),
            comment: Some("до обеда".to_string()),
        },
    )
    .await
    .expect("checkout failed");

    assert_eq!(placed.order.total, Decimal::from_str("4029.95").unwrap());
    assert_eq!(placed.order.status(), Ok(OrderStatus::New));
    assert_eq!(placed.items.len(), 2);
    assert!(list_cart(&pool, user_id).await.unwrap().is_empty());

    update_product(
        &pool,
        phone.id,
        ProductPatch {
            price: Some(Decimal::from(1)),
            ..ProductPatch::default()
        },
    )
    .await
    .unwrap();
    let fetched = get_order(&pool, placed.order.id, Some(user_id))
        .await
        .unwrap()
        .unwrap();
    let phone_line = fetched
        .items
        .iter()
        .find(|i| i.product_id == phone.id)
        .unwrap();
    assert_eq!(phone_line.price, Decimal::from_str("1999.90").unwrap());

    let err = create_order_from_cart(&pool, user_id, &NewOrder::default())
        .await
        .unwrap_err();
    assert!(matches!(err, DbError::Order(OrderError::EmptyCart)));
}

#[sqlx::test(migrations = "../../migrations")]
async fn checkout_rejects_foreign_kontragent(pool: sqlx::PgPool) {
    let tree = seed_tree(&pool, "t1").await;
    let owner = insert_user(&pool, "a@example.com").await;
    let buyer = insert_user(&pool, "b@example.com").await;
    let product = create_product(&pool, new_product(&tree, "phone", "1.00", &[]))
        .await
        .unwrap();
    let k = create_kontragent(&pool, owner, &legal_entity("123456789"), false)
        .await
        .unwrap();
    add_to_cart(&pool, buyer, product.id, 1).await.unwrap();

    let err = create_order_from_cart(
        &pool,
        buyer,
        &NewOrder {
            kontragent_id: Some(k.id),
            ..NewOrder::default()
        },
    )
    .await
    .unwrap_err();
    assert!(matches!(err, DbError::Invalid(_)));
    assert_eq!(list_cart(&pool, buyer).await.unwrap().len(), 1);
}

#[sqlx::test(migrations = "../../migrations")]
async fn checkout_keeps_lines_added_while_it_runs(pool: sqlx::PgPool) {
    let tree = seed_tree(&pool, "t1").await;
    let user_id = insert_user(&pool, "a@example.com").await;
    let first = create_product(&pool, new_product(&tree, "first", "5.00", &[]))
        .await
        .unwrap();
    let second = create_product(&pool, new_product(&tree, "second", "7.00", &[]))
        .await
        .unwrap();
    add_to_cart(&pool, user_id, first.id, 1).await.unwrap();

    // Hold the first line's row lock while adding a second line.
    let mut other = pool.begin().await.unwrap();
    sqlx::query("UPDATE cart_items SET quantity = 2 WHERE user_id = $1 AND product_id = $2")
        .bind(user_id)
        .bind(first.id)
        .execute(&mut *other)
        .await
        .unwrap();
    sqlx::query("INSERT INTO cart_items (user_id, product_id, quantity) VALUES ($1, $2, 1)")
        .bind(user_id)
        .bind(second.id)
        .execute(&mut *other)
        .await
        .unwrap();

    let checkout = {
        let pool = pool.clone();
        tokio::spawn(async move { create_order_from_cart(&pool, user_id, &NewOrder::default()).await })
    };
    tokio::time::sleep(Duration::from_millis(200)).await;
    other.commit().await.unwrap();

    let placed = checkout.await.unwrap().expect("checkout failed");
    let first_line = placed
        .items
        .iter()
        .find(|i| i.product_id == first.id)
        .expect("first line ordered");
    assert_eq!(first_line.quantity, 2);

    let ordered = placed.items.iter().any(|i| i.product_id == second.id);
    let in_cart = list_cart(&pool, user_id)
        .await
        .unwrap()
        .iter()
        .any(|line| line.product_id == second.id);
    assert!(
        ordered ^ in_cart,
        "second line must be ordered or left in the cart, exactly once"
    );
}

#[sqlx::test(migrations = "../../migrations")]
async fn order_status_follows_lifecycle(pool: sqlx::PgPool) {
    let tree = seed_tree(&pool, "t1").await;
    let user_id = insert_user(&pool, "a@example.com").await;
    let product = create_product(&pool, new_product(&tree, "phone", "1.00", &[]))
        .await
        .unwrap();
    add_to_cart(&pool, user_id, product.id, 1).await.unwrap();
    let order = create_order_from_cart(&pool, user_id, &NewOrder::default())
        .await
        .unwrap()
        .order;

    let err = update_order_status(&pool, order.id, OrderStatus::Delivered)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        DbError::Order(OrderError::InvalidTransition { .. })
    ));

    update_order_status(&pool, order.id, OrderStatus::Processing)
        .await
        .unwrap();
    let row = update_order_status(&pool, order.id, OrderStatus::Cancelled)
        .await
        .unwrap();
    assert_eq!(row.status, "cancelled");

    let err = update_order_status(&pool, 4242, OrderStatus::Processing)
        .await
        .unwrap_err();
    assert!(matches!(err, DbError::NotFound));
}
