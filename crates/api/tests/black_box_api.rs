use std::sync::Arc;

use chrono::{Duration as ChronoDuration, NaiveDate, Utc};
use reqwest::StatusCode;
use serde_json::{json, Value};

use watergile_infra::config::AppConfig;
use watergile_infra::services::{AppServices, Backends, Clients};

struct TestServer {
    base_url: String,
    client: reqwest::Client,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    async fn spawn() -> Self {
        // Same router as prod, in-memory backends, ephemeral port.
        let clients = Clients::from_config(&AppConfig::default()).expect("clients");
        let services = Arc::new(AppServices::build(Backends::in_memory(), clients));
        let app = watergile_api::app::build_app(services);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{}", addr);

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url,
            client: reqwest::Client::new(),
            handle,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn post(&self, path: &str, body: Value) -> (StatusCode, Value) {
        let res = self.client.post(self.url(path)).json(&body).send().await.unwrap();
        let status = res.status();
        (status, res.json().await.unwrap_or(Value::Null))
    }

    async fn get(&self, path: &str) -> (StatusCode, Value) {
        let res = self.client.get(self.url(path)).send().await.unwrap();
        let status = res.status();
        (status, res.json().await.unwrap_or(Value::Null))
    }

    async fn create(&self, path: &str, body: Value) -> String {
        let (status, body) = self.post(path, body).await;
        assert_eq!(status, StatusCode::CREATED, "POST {path}: {body}");
        body["id"].as_str().unwrap().to_string()
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn in_days(days: i64) -> NaiveDate {
    Utc::now().date_naive() + ChronoDuration::days(days)
}

/// Active zone on Paris postcodes, served by one carrier, plus one active
/// product and one customer.
struct World {
    customer: String,
    product: String,
    zone: String,
}

impl World {
    async fn new(server: &TestServer) -> Self {
        let carrier = server
            .create(
                "/delivery/carriers",
                json!({ "name": "Camion", "delivery_type": { "type": "fixed", "price": "15" } }),
            )
            .await;
        let zone = server
            .create(
                "/delivery/zones",
                json!({
                    "code": "IDF",
                    "name": "Ile-de-France",
                    "country": "FR",
                    "pattern": { "type": "start", "prefix": "75" },
                    "carrier_ids": [carrier],
                }),
            )
            .await;
        let (status, _) = server.post(&format!("/delivery/zones/{zone}/activate"), json!({})).await;
        assert_eq!(status, StatusCode::OK);

        let product = server
            .create(
                "/products",
                json!({
                    "sku": "FT-100",
                    "name": "Fontaine",
                    "product_type": "storable",
                    "list_price": "10",
                }),
            )
            .await;
        let (status, _) = server.post(&format!("/products/{product}/activate"), json!({})).await;
        assert_eq!(status, StatusCode::OK);

        let customer = partner(server, "Watergile Client").await;
        Self {
            customer,
            product,
            zone,
        }
    }

    async fn order(&self, server: &TestServer, quantity: &str, stakeholders: &[&str]) -> String {
        let order = server
            .create(
                "/sales/orders",
                json!({ "customer_id": self.customer, "delivery_mode": "dispatch" }),
            )
            .await;
        let (status, body) = server
            .post(
                &format!("/sales/orders/{order}/lines"),
                json!({ "product_id": self.product, "quantity": quantity }),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "{body}");
        for stakeholder in stakeholders {
            let (status, body) = server
                .post(
                    &format!("/sales/orders/{order}/stakeholders"),
                    json!({ "partner_id": stakeholder }),
                )
                .await;
            assert_eq!(status, StatusCode::OK, "{body}");
        }
        order
    }
}

async fn partner(server: &TestServer, name: &str) -> String {
    server
        .create("/partners", json!({ "name": name, "is_company": true }))
        .await
}

async fn address(server: &TestServer, owner: &str, name: &str, zip: &str) -> String {
    server
        .create(
            "/addresses",
            json!({
                "name": name,
                "owners": [owner],
                "street": "1 rue de Rivoli",
                "zip": zip,
                "city": "Paris",
                "country": "FR",
                "address_type": "delivery",
            }),
        )
        .await
}

fn share(stakeholder: &str, address: &str, date: NaiveDate, quantity: &str) -> Value {
    json!({
        "stakeholder_id": stakeholder,
        "address_id": address,
        "date": date,
        "quantity": quantity,
    })
}

/// Two agencies of one order, each with its own or a shared site.
async fn expanded_order(server: &TestServer, world: &World, shared_site: bool) -> String {
    let a = partner(server, "Agence A").await;
    let b = partner(server, "Agence B").await;
    let (site_a, site_b) = if shared_site {
        let site = address(server, &world.customer, "Siège", "75008").await;
        (site.clone(), site)
    } else {
        (
            address(server, &a, "Site A", "75011").await,
            address(server, &b, "Site B", "75012").await,
        )
    };
    let date = in_days(10);
    let order = world.order(server, "10", &[&a, &b]).await;

    let (status, body) = server
        .post(
            &format!("/sales/orders/{order}/lines/1/expand"),
            json!({ "dispatches": [share(&a, &site_a, date, "4"), share(&b, &site_b, date, "6")] }),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    order
}

/// Confirmation opens the pickings; they are listed right away.
async fn confirm(server: &TestServer, order: &str) -> Vec<Value> {
    let (status, body) = server.post(&format!("/sales/orders/{order}/confirm"), json!({})).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["status"], "confirmed");
    let opened = body["pickings"].as_array().unwrap().clone();

    let (status, body) = server.get(&format!("/stock/orders/{order}/pickings")).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["items"].as_array().unwrap().len(), opened.len());
    opened
}

#[tokio::test]
async fn health_is_ok() {
    let server = TestServer::spawn().await;
    let res = server.client.get(server.url("/health")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn malformed_ids_are_rejected_with_400() {
    let server = TestServer::spawn().await;
    let (status, body) = server.get("/sales/orders/not-a-uuid").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid_id");
}

#[tokio::test]
async fn two_destinations_give_two_groups_and_two_pickings() {
    let server = TestServer::spawn().await;
    let world = World::new(&server).await;
    let order = expanded_order(&server, &world, false).await;

    let (_, body) = server.get(&format!("/sales/orders/{order}")).await;
    assert_eq!(body["dispatches"].as_array().unwrap().len(), 2);
    assert_eq!(body["groups"].as_array().unwrap().len(), 2);
    assert_eq!(body["lines"][0]["available_qty"], "0");

    let pickings = confirm(&server, &order).await;
    assert_eq!(pickings.len(), 2);
    for picking in &pickings {
        assert_eq!(picking["state"], "draft");
        let moves = picking["moves"].as_array().unwrap();
        assert_eq!(moves.len(), 1);
        assert!(picking["dispatch_id"].is_string());
        assert_eq!(moves[0]["dispatch_id"], picking["dispatch_id"]);
    }

    // Planning again does not duplicate pickings.
    let (status, body) = server.post(&format!("/stock/orders/{order}/pickings"), json!({})).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["items"].as_array().unwrap().len(), 2);
    let (_, body) = server.get(&format!("/stock/orders/{order}/pickings")).await;
    assert_eq!(body["items"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn shared_destination_gives_one_picking_with_two_moves() {
    let server = TestServer::spawn().await;
    let world = World::new(&server).await;
    let order = expanded_order(&server, &world, true).await;

    let (_, body) = server.get(&format!("/sales/orders/{order}")).await;
    assert_eq!(body["groups"].as_array().unwrap().len(), 1);

    let pickings = confirm(&server, &order).await;
    assert_eq!(pickings.len(), 1);
    assert!(pickings[0]["dispatch_id"].is_null());
    assert_eq!(pickings[0]["moves"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn siret_is_checked_before_a_partner_is_registered() {
    let server = TestServer::spawn().await;

    let (status, body) = server
        .post("/siret/validate", json!({ "siret": "732 829 320 00074" }))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["valid"], true);
    assert_eq!(body["siren"], "732829320");

    let (status, body) = server
        .post("/siret/validate", json!({ "siret": "73282932000075" }))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["valid"], false);

    let (status, body) = server
        .post(
            "/partners",
            json!({ "name": "Mauvais SIRET", "is_company": true, "siret": "73282932000075" }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST, "{body}");

    let (status, body) = server
        .post(
            "/partners",
            json!({ "name": "Bon SIRET", "is_company": true, "siret": "73282932000074" }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert_eq!(body["siret"], "73282932000074");
}

#[tokio::test]
async fn partner_pricelist_prices_only_its_partner_dispatches() {
    let server = TestServer::spawn().await;
    let world = World::new(&server).await;
    let order = expanded_order(&server, &world, false).await;

    let (_, body) = server.get(&format!("/sales/orders/{order}")).await;
    let dispatches = body["dispatches"].as_array().unwrap().clone();
    let agency_a = dispatches
        .iter()
        .find(|d| d["quantity"] == "4")
        .unwrap()["stakeholder_id"]
        .as_str()
        .unwrap()
        .to_string();

    let pricelist = server
        .create(
            "/pricelists",
            json!({
                "name": "Agence A",
                "partner_ids": [agency_a],
                "zone_ids": [world.zone],
                "items": [{ "product_id": world.product, "fixed_price": "8" }],
            }),
        )
        .await;

    let (status, body) = server
        .get(&format!(
            "/pricelists/{pricelist}/applicable?partner_id={agency_a}&zone_id={}",
            world.zone
        ))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["applicable"], true);
    let (_, body) = server
        .get(&format!("/pricelists/{pricelist}/applicable?partner_id={}", world.customer))
        .await;
    assert_eq!(body["applicable"], false);

    let (status, body) = server.get(&format!("/sales/orders/{order}/prices")).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    for priced in body["items"].as_array().unwrap() {
        if priced["stakeholder_id"] == agency_a.as_str() {
            assert_eq!(priced["unit_price"], "8");
            assert_eq!(priced["subtotal"], "32");
            assert_eq!(priced["pricelist_id"], pricelist.as_str());
        } else {
            assert_eq!(priced["unit_price"], "10");
            assert!(priced["pricelist_id"].is_null());
        }
    }
}

#[tokio::test]
async fn mismatched_mass_dispatch_is_rejected_without_side_effects() {
    let server = TestServer::spawn().await;
    let world = World::new(&server).await;
    let a = partner(&server, "Agence A").await;
    let b = partner(&server, "Agence B").await;
    let site = address(&server, &world.customer, "Siège", "75008").await;
    let order = world.order(&server, "4", &[&a, &b]).await;

    let (status, body) = server
        .post(
            &format!("/sales/orders/{order}/mass-dispatch"),
            json!({
                "line_nos": [1],
                "address_id": site,
                "date": in_days(10),
                "allocations": [
                    { "stakeholder_id": a, "quantity": "2" },
                    { "stakeholder_id": b, "quantity": "1" },
                ],
            }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST, "{body}");

    let (_, body) = server.get(&format!("/sales/orders/{order}")).await;
    assert!(body["dispatches"].as_array().unwrap().is_empty());
    assert!(body["groups"].as_array().unwrap().is_empty());

    // The matching allocation goes through on the same order.
    let (status, body) = server
        .post(
            &format!("/sales/orders/{order}/mass-dispatch"),
            json!({
                "line_nos": [1],
                "address_id": site,
                "date": in_days(10),
                "allocations": [
                    { "stakeholder_id": a, "quantity": "3" },
                    { "stakeholder_id": b, "quantity": "1" },
                ],
            }),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["dispatches"].as_array().unwrap().len(), 2);
    assert_eq!(body["groups"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn cancelling_a_picking_cancels_its_dispatch() {
    let server = TestServer::spawn().await;
    let world = World::new(&server).await;
    let order = expanded_order(&server, &world, false).await;
    let pickings = confirm(&server, &order).await;
    let picking = pickings[0]["id"].as_str().unwrap().to_string();
    let dispatch = pickings[0]["dispatch_id"].as_str().unwrap().to_string();

    let (status, body) = server.post(&format!("/stock/pickings/{picking}/cancel"), json!({})).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["state"], "cancelled");
    assert!(body["moves"][0]["dispatch_id"].is_null());

    let (status, body) = server.get(&format!("/sales/dispatches/{dispatch}")).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["state"], "cancelled");
}

#[tokio::test]
async fn cancelling_an_order_cancels_its_pickings() {
    let server = TestServer::spawn().await;
    let world = World::new(&server).await;
    let order = expanded_order(&server, &world, false).await;
    let pickings = confirm(&server, &order).await;
    assert_eq!(pickings.len(), 2);

    let (status, body) = server.post(&format!("/sales/orders/{order}/cancel"), json!({})).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["status"], "cancelled");

    let (_, body) = server.get(&format!("/stock/orders/{order}/pickings")).await;
    for picking in body["items"].as_array().unwrap() {
        assert_eq!(picking["state"], "cancelled");
        assert!(picking["moves"][0]["dispatch_id"].is_null());
    }

    let picking = pickings[0]["id"].as_str().unwrap();
    let (status, _) = server.post(&format!("/stock/pickings/{picking}/assign"), json!({})).await;
    assert_ne!(status, StatusCode::OK);
}

#[tokio::test]
async fn contact_form_redirects_and_stores_the_message() {
    let server = TestServer::spawn().await;
    let client = reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .unwrap();

    let res = client
        .post(server.url("/submit/contact"))
        .form(&[
            ("name", "Jeanne"),
            ("email", "jeanne@example.fr"),
            ("message", "Bonjour, je voudrais un devis."),
        ])
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::SEE_OTHER);
    assert_eq!(res.headers()["location"], "/thank-you");

    let res = client
        .post(server.url("/submit/contact"))
        .form(&[("name", "Jeanne"), ("email", "pas-un-email"), ("message", "Bonjour")])
        .send()
        .await
        .unwrap();
    assert_eq!(res.headers()["location"], "/contact-error");

    let (status, body) = server.get("/contact-messages").await;
    assert_eq!(status, StatusCode::OK);
    let items = body["items"].as_array().unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0]["subject"], "Contact depuis le site web");
    assert_eq!(items[0]["state"], "new");
}
