//! List with label predicate pushdown and in-memory re-filtering.

mod common;

use statehouse::{
    CreateOptions, IdQuery, Kind, LabelOp, LabelQuery, LabelTerm, ListOptions, Resource,
};

use common::{default_state, path_resource};

async fn create_labeled(
    state: &statehouse::State,
    id: &str,
    labels: &[(&str, &str)],
) -> Resource {
    let mut res = path_resource("ns1", id);

    for (key, value) in labels {
        res.metadata_mut()
            .labels_mut()
            .insert(key.to_string(), value.to_string());
    }

    state.create(&mut res, CreateOptions::default()).await.unwrap();

    res
}

fn ids(mut resources: Vec<Resource>) -> Vec<String> {
    let mut ids: Vec<String> = resources
        .drain(..)
        .map(|res| res.metadata().id().to_string())
        .collect();
    ids.sort();
    ids
}

#[tokio::test]
async fn test_label_match_escaping() {
    let harness = default_state().await;
    let state = &harness.state;

    create_labeled(state, "res/escaping-1", &[("key.with.dots", "value'with'quotes")]).await;
    create_labeled(state, "res/escaping-2", &[("key.with.dots", "other")]).await;

    let items = state
        .list(
            &Kind::new("ns1", "path"),
            ListOptions::default().with_label_query(LabelQuery::new(vec![LabelTerm::equal(
                "key.with.dots",
                "value'with'quotes",
            )])),
        )
        .await
        .unwrap();

    assert_eq!(ids(items), vec!["res/escaping-1".to_string()]);
}

#[tokio::test]
async fn test_list_label_operators() {
    let harness = default_state().await;
    let state = &harness.state;

    create_labeled(state, "res/a", &[("env", "prod"), ("tier", "web")]).await;
    create_labeled(state, "res/b", &[("env", "dev"), ("tier", "db")]).await;
    create_labeled(state, "res/c", &[("tier", "cache")]).await;

    let kind = Kind::new("ns1", "path");

    // exists
    let items = state
        .list(
            &kind,
            ListOptions::default()
                .with_label_query(LabelQuery::new(vec![LabelTerm::exists("env")])),
        )
        .await
        .unwrap();
    assert_eq!(ids(items), vec!["res/a".to_string(), "res/b".to_string()]);

    // inverted exists
    let items = state
        .list(
            &kind,
            ListOptions::default()
                .with_label_query(LabelQuery::new(vec![LabelTerm::exists("env").inverted()])),
        )
        .await
        .unwrap();
    assert_eq!(ids(items), vec!["res/c".to_string()]);

    // in
    let items = state
        .list(
            &kind,
            ListOptions::default().with_label_query(LabelQuery::new(vec![LabelTerm::in_set(
                "tier",
                ["web", "cache"],
            )])),
        )
        .await
        .unwrap();
    assert_eq!(ids(items), vec!["res/a".to_string(), "res/c".to_string()]);

    // disjunction of two queries
    let items = state
        .list(
            &kind,
            ListOptions::default()
                .with_label_query(LabelQuery::new(vec![LabelTerm::equal("env", "prod")]))
                .with_label_query(LabelQuery::new(vec![LabelTerm::equal("tier", "db")])),
        )
        .await
        .unwrap();
    assert_eq!(ids(items), vec!["res/a".to_string(), "res/b".to_string()]);

    // conjunction within one query
    let items = state
        .list(
            &kind,
            ListOptions::default().with_label_query(LabelQuery::new(vec![
                LabelTerm::exists("env"),
                LabelTerm::equal("tier", "web"),
            ])),
        )
        .await
        .unwrap();
    assert_eq!(ids(items), vec!["res/a".to_string()]);
}

#[tokio::test]
async fn test_list_unsupported_operator_filters_in_memory() {
    let harness = default_state().await;
    let state = &harness.state;

    create_labeled(state, "res/w1", &[("weight", "1")]).await;
    create_labeled(state, "res/w2", &[("weight", "2")]).await;
    create_labeled(state, "res/w3", &[("weight", "3")]).await;

    // the ordering operator cannot be pushed down; the SQL predicate
    // degrades to true and the in-memory filter does the real work
    let lt = LabelTerm {
        key: "weight".to_string(),
        op: LabelOp::LtNumeric,
        values: vec!["3".to_string()],
        invert: false,
    };

    let items = state
        .list(
            &Kind::new("ns1", "path"),
            ListOptions::default().with_label_query(LabelQuery::new(vec![lt])),
        )
        .await
        .unwrap();

    assert_eq!(ids(items), vec!["res/w1".to_string(), "res/w2".to_string()]);
}

#[tokio::test]
async fn test_list_id_query() {
    let harness = default_state().await;
    let state = &harness.state;

    create_labeled(state, "res/1", &[]).await;
    create_labeled(state, "res/2", &[]).await;
    create_labeled(state, "res/3", &[]).await;

    let items = state
        .list(
            &Kind::new("ns1", "path"),
            ListOptions::default().with_id_query(IdQuery::matching(["res/1", "res/3"])),
        )
        .await
        .unwrap();

    assert_eq!(ids(items), vec!["res/1".to_string(), "res/3".to_string()]);
}

#[tokio::test]
async fn test_list_scopes_by_kind() {
    let harness = default_state().await;
    let state = &harness.state;

    create_labeled(state, "res/visible", &[]).await;

    let mut other_ns = path_resource("ns2", "res/other");
    state.create(&mut other_ns, CreateOptions::default()).await.unwrap();

    let items = state
        .list(&Kind::new("ns1", "path"), ListOptions::default())
        .await
        .unwrap();
    assert_eq!(ids(items), vec!["res/visible".to_string()]);

    let items = state
        .list(&Kind::new("ns3", "path"), ListOptions::default())
        .await
        .unwrap();
    assert!(items.is_empty());
}
