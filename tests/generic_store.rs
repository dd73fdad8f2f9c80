use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use firestore_generic_store::firestore::error::unavailable;
use firestore_generic_store::firestore::model::FieldPath;
use firestore_generic_store::firestore::remote::DriverOperation;
use firestore_generic_store::firestore::value::map_from_json;
use firestore_generic_store::firestore::{
    Aggregation, DocumentSnapshot, FieldUpdate, FilterOperator, FirestoreErrorCode, FirestoreValue, GenericStore,
    InMemoryDatastore, QueryParameter,
};
use serde_json::json;

fn new_store(collection: &str) -> (InMemoryDatastore, GenericStore) {
    let datastore = InMemoryDatastore::default();
    let store = GenericStore::new(Arc::new(datastore.clone()), collection).unwrap();
    (datastore, store)
}

fn body(value: serde_json::Value) -> BTreeMap<String, FirestoreValue> {
    map_from_json(value).unwrap()
}

async fn seed_people(store: &GenericStore) {
    let people = vec![
        body(json!({"name": "ada", "team": "core", "age": 36})),
        body(json!({"name": "alan", "team": "core", "age": 41})),
        body(json!({"name": "grace", "team": "infra", "age": 45})),
    ];
    store.create_docs_batch(people, None).await.unwrap();
}

#[tokio::test]
async fn predicates_over_empty_collection_match_nothing() {
    let (_, store) = new_store("people");
    let predicates = [
        QueryParameter::new("age", FilterOperator::GreaterThan, 30_i64),
        QueryParameter::new("team", FilterOperator::Equal, "core"),
    ];
    assert!(store.read_collection(&predicates).await.unwrap().is_empty());
    assert!(store.read_collection(&[]).await.unwrap().is_empty());
}

#[tokio::test]
async fn predicate_order_does_not_change_the_result_set() {
    let (_, store) = new_store("people");
    seed_people(&store).await;

    let by_age = QueryParameter::new("age", FilterOperator::GreaterThanOrEqual, 40_i64);
    let by_team = QueryParameter::new("team", FilterOperator::Equal, "core");

    let ids = |snapshots: Vec<DocumentSnapshot>| {
        snapshots
            .into_iter()
            .map(|snapshot| snapshot.id().to_string())
            .collect::<BTreeSet<_>>()
    };
    let forward = ids(store.read_collection(&[by_age.clone(), by_team.clone()]).await.unwrap());
    let reverse = ids(store.read_collection(&[by_team, by_age]).await.unwrap());
    assert_eq!(forward.len(), 1);
    assert_eq!(forward, reverse);
}

#[tokio::test]
async fn operators_parse_from_wire_strings() {
    let (_, store) = new_store("people");
    seed_people(&store).await;

    let teams = FirestoreValue::from_array(vec!["infra".into(), "ops".into()]);
    let predicate = QueryParameter::parse("team", "in", teams).unwrap();
    let matches = store.read_collection(&[predicate]).await.unwrap();
    assert_eq!(matches.len(), 1);

    let err = QueryParameter::parse("team", "like", "core").unwrap_err();
    assert_eq!(err.code, FirestoreErrorCode::InvalidArgument);
}

#[tokio::test]
async fn batch_create_generates_fresh_ids() {
    let (datastore, store) = new_store("people");
    store.create_doc(body(json!({"name": "existing"}))).await.unwrap();

    for n in [0_usize, 1, 5] {
        let docs = (0..n).map(|i| body(json!({"index": i}))).collect();
        let before = datastore.document_count("people");
        let ids = store.create_docs_batch(docs, Some(Vec::new())).await.unwrap();

        assert_eq!(ids.len(), n);
        assert_eq!(ids.iter().collect::<BTreeSet<_>>().len(), n);
        assert_eq!(datastore.document_count("people"), before + n);
        for id in &ids {
            assert_eq!(id.len(), 20);
            assert!(datastore.contains_document("people", id));
        }
    }
}

#[tokio::test]
async fn batch_create_keeps_caller_ids_in_order() {
    let (_, store) = new_store("people");
    let docs = vec![body(json!({"name": "ada"})), body(json!({"name": "alan"}))];
    let ids = store
        .create_docs_batch(docs, Some(vec!["first".into(), "second".into()]))
        .await
        .unwrap();
    assert_eq!(ids, vec!["first".to_string(), "second".to_string()]);

    let second = store.get_doc("second").await.unwrap();
    assert_eq!(second.data().unwrap().get("name"), Some(&FirestoreValue::from("alan")));
}

#[tokio::test]
async fn batch_create_rejects_mismatched_ids_before_writing() {
    let (datastore, store) = new_store("people");
    let docs = vec![body(json!({"name": "ada"})), body(json!({"name": "alan"}))];

    let err = store
        .create_docs_batch(docs, Some(vec!["only-one".into()]))
        .await
        .unwrap_err();

    assert_eq!(err.code, FirestoreErrorCode::InvalidArgument);
    assert_eq!(datastore.write_calls(), 0);
    assert_eq!(datastore.document_count("people"), 0);
}

#[tokio::test]
async fn batch_create_attempts_every_item_and_reports_first_failure() {
    let (datastore, store) = new_store("people");
    datastore
        .fail_writes_to("people", "b", unavailable("shard offline"))
        .unwrap();
    let docs = vec![body(json!({"n": 1})), body(json!({"n": 2})), body(json!({"n": 3}))];

    let err = store
        .create_docs_batch(docs, Some(vec!["a".into(), "b".into(), "c".into()]))
        .await
        .unwrap_err();

    assert_eq!(err.code, FirestoreErrorCode::Unavailable);
    assert_eq!(datastore.count_calls(DriverOperation::BulkSet), 3);
    assert!(datastore.contains_document("people", "a"));
    assert!(datastore.contains_document("people", "c"));
}

#[tokio::test]
async fn get_doc_returns_written_body_or_not_found() {
    let (_, store) = new_store("people");
    let written = body(json!({"name": "ada", "skills": ["math", "poetry"], "meta": {"born": 1815}}));
    let id = store.create_doc(written.clone()).await.unwrap();

    let snapshot = store.get_doc(&id).await.unwrap();
    assert_eq!(snapshot.id(), id);
    assert_eq!(snapshot.data(), Some(&written));

    let err = store.get_doc("does-not-exist").await.unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn get_doc_by_query_requires_exactly_one_match() {
    let (_, store) = new_store("people");
    seed_people(&store).await;

    let grace = [QueryParameter::new("name", FilterOperator::Equal, "grace")];
    let snapshot = store.get_doc_by_query(&grace).await.unwrap();
    assert_eq!(snapshot.data().unwrap().get("team"), Some(&FirestoreValue::from("infra")));

    let nobody = [QueryParameter::new("name", FilterOperator::Equal, "linus")];
    let err = store.get_doc_by_query(&nobody).await.unwrap_err();
    assert_eq!(err.code, FirestoreErrorCode::NotFound);

    let core = [QueryParameter::new("team", FilterOperator::Equal, "core")];
    let err = store.get_doc_by_query(&core).await.unwrap_err();
    assert_eq!(err.code, FirestoreErrorCode::FailedPrecondition);
}

#[tokio::test]
async fn update_doc_applies_nested_paths_and_sentinels() {
    let (_, store) = new_store("people");
    let id = store
        .create_doc(body(json!({"name": "ada", "stats": {"logins": 2}, "draft": true})))
        .await
        .unwrap();

    store
        .update_doc(
            &id,
            vec![
                FieldUpdate::new("stats.logins", FirestoreValue::numeric_increment(3_i64.into())).unwrap(),
                FieldUpdate::new("draft", FirestoreValue::delete_field()).unwrap(),
                FieldUpdate::new("seen_at", FirestoreValue::server_timestamp()).unwrap(),
            ],
        )
        .await
        .unwrap();

    let snapshot = store.get_doc(&id).await.unwrap();
    let logins = FieldPath::from_dot_separated("stats.logins").unwrap();
    assert_eq!(snapshot.get(&logins), Some(&FirestoreValue::from_integer(5)));
    assert!(snapshot.data().unwrap().get("draft").is_none());
    assert!(snapshot.data().unwrap().contains_key("seen_at"));
}

#[tokio::test]
async fn delete_doc_fails_the_second_time() {
    let (_, store) = new_store("people");
    let id = store.create_doc(body(json!({"name": "ada"}))).await.unwrap();

    store.delete_doc(&id).await.unwrap();
    let err = store.delete_doc(&id).await.unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn delete_docs_by_query_with_no_match_is_not_found() {
    let (datastore, store) = new_store("people");
    seed_people(&store).await;

    let nobody = [QueryParameter::new("team", FilterOperator::Equal, "sales")];
    let err = store.delete_docs_by_query(&nobody).await.unwrap_err();
    assert_eq!(err.code, FirestoreErrorCode::NotFound);
    assert_eq!(datastore.count_calls(DriverOperation::BulkDelete), 0);
}

#[tokio::test]
async fn delete_doc_by_query_with_no_match_is_not_found() {
    let (datastore, store) = new_store("people");
    seed_people(&store).await;

    let nobody = [QueryParameter::new("name", FilterOperator::Equal, "linus")];
    let err = store.delete_doc_by_query(&nobody).await.unwrap_err();
    assert_eq!(err.code, FirestoreErrorCode::NotFound);
    assert_eq!(datastore.count_calls(DriverOperation::Delete), 0);
    assert_eq!(datastore.document_count("people"), 3);
}

#[tokio::test]
async fn backend_errors_pass_through_unchanged() {
    let (_, store) = new_store("people");
    let id = store.create_doc(body(json!({"name": "ada"}))).await.unwrap();
    store.client().close().await.unwrap();

    let err = store.get_doc(&id).await.unwrap_err();
    assert_eq!(err.code, FirestoreErrorCode::Unavailable);
    assert_eq!(err.code_str(), "firestore/unavailable");

    let err = store.read_collection(&[]).await.unwrap_err();
    assert_eq!(err.code, FirestoreErrorCode::Unavailable);

    let err = store.delete_doc(&id).await.unwrap_err();
    assert_eq!(err.code, FirestoreErrorCode::Unavailable);
}

#[tokio::test]
async fn delete_docs_by_query_attempts_every_match_despite_a_failure() {
    let (datastore, store) = new_store("people");
    let docs = vec![
        body(json!({"team": "core"})),
        body(json!({"team": "core"})),
        body(json!({"team": "core"})),
        body(json!({"team": "infra"})),
    ];
    store
        .create_docs_batch(docs, Some(vec!["a".into(), "b".into(), "c".into(), "d".into()]))
        .await
        .unwrap();
    datastore
        .fail_writes_to("people", "a", unavailable("shard offline"))
        .unwrap();

    let core = [QueryParameter::new("team", FilterOperator::Equal, "core")];
    let err = store.delete_docs_by_query(&core).await.unwrap_err();

    assert_eq!(err.code, FirestoreErrorCode::Unavailable);
    let attempted: Vec<String> = datastore
        .calls()
        .into_iter()
        .filter(|call| call.operation == DriverOperation::BulkDelete)
        .map(|call| call.target)
        .collect();
    assert_eq!(attempted, vec!["people/a", "people/b", "people/c"]);
    assert!(datastore.contains_document("people", "a"));
    assert!(!datastore.contains_document("people", "b"));
    assert!(!datastore.contains_document("people", "c"));
    assert!(datastore.contains_document("people", "d"));
}

#[tokio::test]
async fn count_aggregation_matches_the_number_of_documents() {
    let (_, store) = new_store("people");
    seed_people(&store).await;

    let core = [QueryParameter::new("team", FilterOperator::Equal, "core")];
    assert_eq!(store.get_aggregation_with_query(&core, Aggregation::Count).await.unwrap(), 2);
    assert_eq!(store.get_aggregation_with_query(&[], Aggregation::Count).await.unwrap(), 3);
}

#[tokio::test]
async fn unsupported_aggregation_never_reaches_the_backend() {
    let (datastore, store) = new_store("people");
    seed_people(&store).await;

    let err = store
        .get_aggregation_with_query(&[], Aggregation::Sum("age".into()))
        .await
        .unwrap_err();
    assert_eq!(err.code, FirestoreErrorCode::InvalidArgument);
    assert_eq!(datastore.count_calls(DriverOperation::Aggregate), 0);

    let err = "median".parse::<Aggregation>().unwrap_err();
    assert_eq!(err.code, FirestoreErrorCode::InvalidArgument);
    assert_eq!("count".parse::<Aggregation>().unwrap(), Aggregation::Count);
}

#[tokio::test]
async fn generate_n_ids_creates_no_documents() {
    let (datastore, store) = new_store("people");
    let ids = store.generate_n_ids(4);
    assert_eq!(ids.len(), 4);
    assert_eq!(ids.iter().collect::<BTreeSet<_>>().len(), 4);
    assert_eq!(datastore.write_calls(), 0);
    assert_eq!(store.collection_id(), "people");
    assert_eq!(store.client().database_id().project_id(), "in-memory");
}
