mod common;

use axum::http::StatusCode;
use rstest::rstest;
use serde_json::json;

use common::{id_of, ids, Backend, TestApp};

#[rstest]
#[case::sqlite(Backend::Sqlite)]
#[case::embedded(Backend::Embedded)]
#[tokio::test]
async fn supplier_crud(#[case] backend: Backend) {
    let app = TestApp::new(backend).await;

    let (status, created) = app
        .post(
            "/api/suppliers",
            json!({ "name": "  Mill Co  ", "email": "mill@example.com", "phone": "2100000000" }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{created}");
    assert_eq!(created["name"], "Mill Co");
    let id = id_of(&created);

    let (status, _) = app
        .post("/api/suppliers", json!({ "name": "Bad", "email": "not-an-email" }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, _) = app.post("/api/suppliers", json!({ "name": "   " })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, updated) = app
        .patch(&format!("/api/suppliers/{id}"), json!({ "phone": null, "name": "Mill & Sons" }))
        .await;
    assert_eq!(status, StatusCode::OK, "{updated}");
    assert_eq!(updated["name"], "Mill & Sons");
    assert!(updated["phone"].is_null());
    assert_eq!(updated["email"], "mill@example.com");

    let (status, fetched) = app.get(&format!("/api/suppliers/{id}")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched["name"], "Mill & Sons");
    assert!(fetched["phone"].is_null());

    let (status, _) = app.delete(&format!("/api/suppliers/{id}")).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, body) = app.get(&format!("/api/suppliers/{id}")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].as_str().unwrap().contains("not found"));
    let (status, _) = app.delete(&format!("/api/suppliers/{id}")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[rstest]
#[case::sqlite(Backend::Sqlite)]
#[case::embedded(Backend::Embedded)]
#[tokio::test]
async fn deleting_a_supplier_cascades(#[case] backend: Backend) {
    let app = TestApp::new(backend).await;
    let s1 = app.create_supplier("Mill Co", None).await;
    let s2 = app.create_supplier("Dairy Ltd", None).await;
    let p1 = app.create_product("Flour", &s1, "τεμ").await;
    let p2 = app.create_product("Milk", &s2, "τεμ").await;
    app.add_to_order(&s1, &p1, "2").await;
    app.add_to_order(&s2, &p2, "1").await;

    let (status, _) = app.delete(&format!("/api/suppliers/{s1}")).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = app.get(&format!("/api/products/{p1}")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (_, products) = app.get("/api/products").await;
    assert_eq!(ids(&products), vec![p2.clone()]);

    let (_, orders) = app.get("/api/orders").await;
    let orders = orders.as_array().unwrap();
    assert_eq!(orders.len(), 1);
    assert_eq!(orders[0]["supplier_id"], s2.as_str());
}

#[rstest]
#[case::sqlite(Backend::Sqlite)]
#[case::embedded(Backend::Embedded)]
#[tokio::test]
async fn deleting_a_product_removes_its_order_lines(#[case] backend: Backend) {
    let app = TestApp::new(backend).await;
    let s1 = app.create_supplier("Mill Co", None).await;
    let p1 = app.create_product("Flour", &s1, "τεμ").await;
    let p2 = app.create_product("Sugar", &s1, "τεμ").await;
    app.add_to_order(&s1, &p1, "2").await;
    let (_, added) = app.add_to_order(&s1, &p2, "1").await;
    let order_id = added["order"]["id"].as_str().unwrap().to_string();

    let (status, _) = app.delete(&format!("/api/products/{p1}")).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (_, order) = app.get(&format!("/api/orders/{order_id}")).await;
    let items = order["items"].as_array().unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0]["product_id"], p2.as_str());
}

#[rstest]
#[case::sqlite(Backend::Sqlite)]
#[case::embedded(Backend::Embedded)]
#[tokio::test]
async fn product_listing_and_filters(#[case] backend: Backend) {
    let app = TestApp::new(backend).await;
    let s1 = app.create_supplier("Mill Co", None).await;
    let s2 = app.create_supplier("Dairy Ltd", None).await;
    let p1 = app.create_product("Flour", &s1, "κιβ").await;
    let p2 = app.create_product("Milk", &s2, "τεμ").await;

    let (status, _) = app
        .post(
            "/api/products",
            json!({ "name": "Ghost", "supplier_id": "00000000-0000-0000-0000-000000000002" }),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, filtered) = app.get(&format!("/api/products?supplier_id={s2}")).await;
    assert_eq!(ids(&filtered), vec![p2.clone()]);

    let (_, joined) = app.get("/api/products/with-suppliers").await;
    let joined = joined.as_array().unwrap();
    assert_eq!(joined.len(), 2);
    let flour = joined.iter().find(|p| p["id"] == p1.as_str()).unwrap();
    assert_eq!(flour["supplier"]["name"], "Mill Co");
    assert_eq!(flour["unit"], "κιβ");

    let (status, moved) = app
        .patch(&format!("/api/products/{p1}"), json!({ "supplier_id": s2, "unit": "kg" }))
        .await;
    assert_eq!(status, StatusCode::OK, "{moved}");
    assert_eq!(moved["supplier_id"], s2.as_str());
    assert_eq!(moved["unit"], "kg");
}

#[rstest]
#[case::sqlite(Backend::Sqlite)]
#[case::embedded(Backend::Embedded)]
#[tokio::test]
async fn product_search_is_sanitized_and_limited(#[case] backend: Backend) {
    let app = TestApp::new(backend).await;
    let s1 = app.create_supplier("Mill Co", None).await;
    for name in ["Flour", "Flower pot", "Sugar", "Corn flour"] {
        app.create_product(name, &s1, "τεμ").await;
    }

    let (status, hits) = app.get("/api/products/search?q=FLO").await;
    assert_eq!(status, StatusCode::OK);
    let mut names: Vec<String> = hits
        .as_array()
        .unwrap()
        .iter()
        .map(|h| h["name"].as_str().unwrap().to_string())
        .collect();
    names.sort();
    assert_eq!(names, vec!["Corn flour", "Flour", "Flower pot"]);
    assert_eq!(hits[0]["supplier"]["name"], "Mill Co");

    let (_, limited) = app.get("/api/products/search?q=flo&limit=1").await;
    assert_eq!(limited.as_array().unwrap().len(), 1);

    for term in ["f", "%25", "%25%25", "_f", ""] {
        let (status, none) = app.get(&format!("/api/products/search?q={term}")).await;
        assert_eq!(status, StatusCode::OK);
        assert!(none.as_array().unwrap().is_empty(), "term {term:?} matched {none}");
    }

    // wildcards are stripped, not interpreted
    let (_, stripped) = app.get("/api/products/search?q=flo%25ur").await;
    let stripped: Vec<&str> = stripped
        .as_array()
        .unwrap()
        .iter()
        .map(|h| h["name"].as_str().unwrap())
        .collect();
    assert!(stripped.contains(&"Flour"));
    assert!(stripped.contains(&"Corn flour"));
    assert!(!stripped.contains(&"Flower pot"));
}

#[rstest]
#[case::sqlite(Backend::Sqlite)]
#[case::embedded(Backend::Embedded)]
#[tokio::test]
async fn global_search_lists_suppliers_before_products(#[case] backend: Backend) {
    let app = TestApp::new(backend).await;
    let s1 = app.create_supplier("Milo Foods", None).await;
    app.create_product("Milk", &s1, "τεμ").await;
    app.create_product("Bread", &s1, "τεμ").await;

    let (status, hits) = app.get("/api/search?q=mil").await;
    assert_eq!(status, StatusCode::OK);
    let hits = hits.as_array().unwrap();
    assert_eq!(hits.len(), 2);
    assert_eq!(hits[0]["type"], "supplier");
    assert_eq!(hits[0]["supplier"]["name"], "Milo Foods");
    assert_eq!(hits[1]["type"], "product");
    assert_eq!(hits[1]["product"]["name"], "Milk");
}

#[rstest]
#[case::sqlite(Backend::Sqlite)]
#[case::embedded(Backend::Embedded)]
#[tokio::test]
async fn duplicate_lookup_excludes_the_given_supplier(#[case] backend: Backend) {
    let app = TestApp::new(backend).await;
    let s1 = app.create_supplier("Mill Co", None).await;
    let s2 = app.create_supplier("Dairy Ltd", None).await;
    let p1 = app.create_product("Flour", &s1, "τεμ").await;
    let p2 = app.create_product("flour", &s2, "τεμ").await;

    let (_, all) = app.get("/api/products/duplicates?name=FLOUR").await;
    let mut found = ids(&all);
    found.sort();
    let mut expected = vec![p1.clone(), p2.clone()];
    expected.sort();
    assert_eq!(found, expected);

    let (_, others) = app
        .get(&format!("/api/products/duplicates?name=Flour&exclude_supplier_id={s1}"))
        .await;
    assert_eq!(ids(&others), vec![p2]);

    let (_, none) = app.get("/api/products/duplicates?name=F").await;
    assert!(none.as_array().unwrap().is_empty());
}

#[rstest]
#[case::sqlite(Backend::Sqlite)]
#[case::embedded(Backend::Embedded)]
#[tokio::test]
async fn greek_names_match_regardless_of_case(#[case] backend: Backend) {
    let app = TestApp::new(backend).await;
    let s1 = app.create_supplier("Φάρμα", None).await;
    let fresh = app.create_product("ΓΆΛΑ ΦΡΈΣΚΟ", &s1, "τεμ").await;
    let goat = app.create_product("Γάλα κατσικίσιο", &s1, "τεμ").await;
    app.create_product("Γιαούρτι", &s1, "τεμ").await;

    // q=γάλα
    let (status, hits) = app
        .get("/api/products/search?q=%CE%B3%CE%AC%CE%BB%CE%B1")
        .await;
    assert_eq!(status, StatusCode::OK);
    let mut found = ids(&hits);
    found.sort();
    let mut expected = vec![fresh.clone(), goat];
    expected.sort();
    assert_eq!(found, expected);

    // name=γάλα φρέσκο
    let (status, dups) = app
        .get("/api/products/duplicates?name=%CE%B3%CE%AC%CE%BB%CE%B1%20%CF%86%CF%81%CE%AD%CF%83%CE%BA%CE%BF")
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ids(&dups), vec![fresh]);

    let global = app
        .state
        .services
        .catalog
        .search("γάλα")
        .await
        .unwrap();
    assert_eq!(global.len(), 2);
}

#[rstest]
#[case::sqlite(Backend::Sqlite)]
#[case::embedded(Backend::Embedded)]
#[tokio::test]
async fn reordering_is_all_or_nothing(#[case] backend: Backend) {
    let app = TestApp::new(backend).await;
    let a = app.create_supplier("Alpha", None).await;
    let b = app.create_supplier("Beta", None).await;
    let c = app.create_supplier("Gamma", None).await;

    let (_, listed) = app.get("/api/suppliers").await;
    assert_eq!(ids(&listed), vec![a.clone(), b.clone(), c.clone()]);

    let (status, _) = app
        .put("/api/suppliers/order", json!({ "ids": [c, a, b] }))
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (_, listed) = app.get("/api/suppliers").await;
    assert_eq!(ids(&listed), vec![c.clone(), a.clone(), b.clone()]);

    let (status, _) = app
        .put(
            "/api/suppliers/order",
            json!({ "ids": [a, "00000000-0000-0000-0000-000000000003", b] }),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (_, listed) = app.get("/api/suppliers").await;
    assert_eq!(ids(&listed), vec![c.clone(), a.clone(), b.clone()]);

    let (status, _) = app
        .put("/api/suppliers/order", json!({ "ids": [a, a] }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app
        .put(
            "/api/suppliers/order",
            json!([{ "id": b, "sort_order": 0 }, { "id": c, "sort_order": 5 }]),
        )
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (_, listed) = app.get("/api/suppliers").await;
    assert_eq!(ids(&listed), vec![b, a, c]);

    let (status, _) = app.put("/api/suppliers/order", json!({ "ids": [] })).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
}

#[rstest]
#[case::sqlite(Backend::Sqlite)]
#[case::embedded(Backend::Embedded)]
#[tokio::test]
async fn order_items_follow_their_sort_order(#[case] backend: Backend) {
    let app = TestApp::new(backend).await;
    let s1 = app.create_supplier("Mill Co", None).await;
    let p1 = app.create_product("Flour", &s1, "τεμ").await;
    let p2 = app.create_product("Sugar", &s1, "τεμ").await;
    let (_, first) = app.add_to_order(&s1, &p1, "1").await;
    let (_, second) = app.add_to_order(&s1, &p2, "1").await;
    let i1 = id_of(&first["item"]);
    let i2 = id_of(&second["item"]);
    let order_id = second["order"]["id"].as_str().unwrap().to_string();

    let (status, _) = app
        .put("/api/order-items/order", json!({ "ids": [i2, i1] }))
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (_, order) = app.get(&format!("/api/orders/{order_id}")).await;
    assert_eq!(ids(&order["items"]), vec![i2, i1]);
}

#[rstest]
#[case::sqlite(Backend::Sqlite)]
#[case::embedded(Backend::Embedded)]
#[tokio::test]
async fn settings_patch_and_reset(#[case] backend: Backend) {
    let app = TestApp::new(backend).await;

    let (status, defaults) = app.get("/api/settings").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(defaults["business_name"], "Αποθήκη");
    assert!(defaults.get("id").is_none());

    let (status, updated) = app
        .patch(
            "/api/settings",
            json!({ "business_name": "Corner Shop", "email": "shop@example.com", "pdf_footer": "Thanks" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{updated}");
    assert_eq!(updated["business_name"], "Corner Shop");
    assert_eq!(updated["email"], "shop@example.com");

    let (status, cleared) = app.patch("/api/settings", json!({ "pdf_footer": null })).await;
    assert_eq!(status, StatusCode::OK);
    assert!(cleared["pdf_footer"].is_null());
    assert_eq!(cleared["email"], "shop@example.com");

    let (status, _) = app.patch("/api/settings", json!({ "business_name": " " })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, _) = app.patch("/api/settings", json!({ "email": "nope" })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let s1 = app.create_supplier("Mill Co", None).await;
    let p1 = app.create_product("Flour", &s1, "τεμ").await;
    app.add_to_order(&s1, &p1, "1").await;

    let (status, _) = app.post("/api/admin/reset", json!({})).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    for uri in ["/api/suppliers", "/api/products", "/api/orders"] {
        let (_, rows) = app.get(uri).await;
        assert!(rows.as_array().unwrap().is_empty(), "{uri} not empty");
    }
    let (_, settings) = app.get("/api/settings").await;
    assert_eq!(settings["business_name"], "Αποθήκη");
}
