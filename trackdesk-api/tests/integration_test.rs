/// Integration tests for the Trackdesk API
///
/// These tests verify the full system works end-to-end:
/// - Authentication and role checks
/// - Program setup (offers, affiliates, links, coupons, rules, webhooks)
/// - Click redirect through postback conversion
/// - Traffic rules, smart links and daily caps on the tracking path
/// - Stripe and Shopify receivers
/// - Webhook delivery through the worker
///
/// They need `DATABASE_URL` and `JWT_SECRET`; run with `-- --ignored`.

mod common;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use common::TestContext;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::Service as _;
use trackdesk_shared::models::delivery::{Delivery, DeliveryStatus};
use trackdesk_shared::models::membership::{Membership, MembershipRole};
use trackdesk_shared::models::user::User;
use trackdesk_shared::signing::{compute_shopify_hmac, sign_payload};
use trackdesk_worker::deliverers::MockDeliverer;
use trackdesk_worker::orchestrator::{OrchestratorConfig, WorkerOrchestrator};
use uuid::Uuid;

async fn create_offer(ctx: &TestContext) -> Value {
    let (status, offer) = ctx
        .send(
            "POST",
            "/v1/offers",
            Some(json!({
                "name": "Spring Sale",
                "landing_url": "https://shop.example.com/spring",
                "status": "active",
                "payout_type": "cpa",
                "payout_amount_cents": 1500
            })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{}", offer);
    offer
}

async fn create_affiliate(ctx: &TestContext) -> Value {
    let (status, affiliate) = ctx
        .send(
            "POST",
            "/v1/affiliates",
            Some(json!({
                "name": "Jordan Partner",
                "email": format!("partner-{}@example.com", Uuid::new_v4()),
                "status": "active"
            })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{}", affiliate);
    affiliate
}

async fn create_link(ctx: &TestContext, body: Value) -> String {
    let (status, link) = ctx.send("POST", "/v1/links", Some(body)).await;
    assert_eq!(status, StatusCode::CREATED, "{}", link);
    link["code"].as_str().unwrap().to_string()
}

/// Clicks `/t/{code}` from `ip`, returning the status and `Location`
async fn click(ctx: &TestContext, code: &str, ip: &str, country: Option<&str>) -> (StatusCode, Option<String>) {
    let mut builder = Request::builder()
        .uri(format!("/t/{}", code))
        .header(header::USER_AGENT, "Mozilla/5.0 (Macintosh; Intel Mac OS X 14_1) Safari/605.1.15")
        .header("x-forwarded-for", ip);
    if let Some(country) = country {
        builder = builder.header("cf-ipcountry", country);
    }

    let (status, headers, _) = ctx.call(builder.body(Body::empty()).unwrap()).await;
    let location = headers
        .get(header::LOCATION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    (status, location)
}

fn host_of(location: &str) -> String {
    url::Url::parse(location).unwrap().host_str().unwrap().to_string()
}

/// Posts a provider webhook with one extra header
async fn deliver_integration(ctx: &TestContext, uri: &str, headers: &[(&str, String)], body: &Value) -> (StatusCode, Value) {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json");
    for (name, value) in headers {
        builder = builder.header(*name, value.as_str());
    }

    let (status, _, value) = ctx.call(builder.body(Body::from(body.to_string())).unwrap()).await;
    (status, value)
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_health() {
    let ctx = TestContext::new().await.unwrap();

    let request = Request::builder().uri("/health").body(Body::empty()).unwrap();
    let response = ctx.app.clone().call(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let health: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(health["database"], "connected");

    ctx.cleanup().await.unwrap();
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_requires_authentication() {
    let ctx = TestContext::new().await.unwrap();

    let request = Request::builder().uri("/v1/affiliates").body(Body::empty()).unwrap();
    let response = ctx.app.clone().call(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let (status, _) = ctx.send_as("not-a-token", "GET", "/v1/affiliates", None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    ctx.cleanup().await.unwrap();
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_affiliate_role_cannot_manage_program() {
    let ctx = TestContext::new().await.unwrap();
    let (_, token) = ctx.member(MembershipRole::Affiliate).await.unwrap();

    let (status, _) = ctx
        .send_as(
            &token,
            "POST",
            "/v1/offers",
            Some(json!({"name": "Sneaky", "landing_url": "https://example.com"})),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = ctx.send_as(&token, "GET", "/v1/webhooks", None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = ctx.send_as(&token, "GET", "/v1/payouts/preview", None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    ctx.cleanup().await.unwrap();
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_affiliate_crud() {
    let ctx = TestContext::new().await.unwrap();
    let affiliate = create_affiliate(&ctx).await;
    let id = affiliate["id"].as_str().unwrap().to_string();

    let (status, fetched) = ctx.send("GET", &format!("/v1/affiliates/{}", id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched["name"], "Jordan Partner");

    let (status, updated) = ctx
        .send("PUT", &format!("/v1/affiliates/{}", id), Some(json!({"tier": "gold"})))
        .await;
    assert_eq!(status, StatusCode::OK, "{}", updated);
    assert_eq!(updated["tier"], "gold");

    let (status, page) = ctx.send("GET", "/v1/affiliates", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(page["total"], 1);

    // Same email twice in one program
    let (status, _) = ctx
        .send(
            "POST",
            "/v1/affiliates",
            Some(json!({"name": "Copy", "email": affiliate["email"]})),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = ctx.send("DELETE", &format!("/v1/affiliates/{}", id), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = ctx.send("GET", &format!("/v1/affiliates/{}", id), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    ctx.cleanup().await.unwrap();
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_click_to_conversion() {
    let ctx = TestContext::new().await.unwrap();
    let offer = create_offer(&ctx).await;
    let affiliate = create_affiliate(&ctx).await;

    let (status, link) = ctx
        .send(
            "POST",
            "/v1/links",
            Some(json!({"affiliate_id": affiliate["id"], "offer_id": offer["id"]})),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{}", link);
    let code = link["code"].as_str().unwrap();

    let request = Request::builder()
        .uri(format!("/t/{}?sub1=spring", code))
        .header(header::USER_AGENT, "Mozilla/5.0 (X11; Linux x86_64) Firefox/120.0")
        .header("x-forwarded-for", "203.0.113.7")
        .body(Body::empty())
        .unwrap();
    let response = ctx.app.clone().call(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::FOUND);

    let location = response.headers()[header::LOCATION].to_str().unwrap();
    let location = url::Url::parse(location).unwrap();
    assert_eq!(location.host_str(), Some("shop.example.com"));
    let click_id = location
        .query_pairs()
        .find(|(k, _)| k == "click_id")
        .map(|(_, v)| v.to_string())
        .unwrap();

    let postback = format!("/t/postback?click_id={}&amount=49.90&order_id=A-1001", click_id);
    let (status, conversion) = ctx.send("GET", &postback, None).await;
    assert_eq!(status, StatusCode::OK, "{}", conversion);
    assert_eq!(conversion["commission_cents"], 1500);

    // Same order again
    let (status, duplicate) = ctx.send("GET", &postback, None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(duplicate["existing_id"], conversion["conversion_id"]);

    let (status, summary) = ctx.send("GET", "/v1/dashboard/summary", None).await;
    assert_eq!(status, StatusCode::OK, "{}", summary);

    let (status, _) = ctx.send("GET", "/t/does-not-exist", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    ctx.cleanup().await.unwrap();
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_coupon_lifecycle() {
    let ctx = TestContext::new().await.unwrap();
    let offer = create_offer(&ctx).await;
    let affiliate = create_affiliate(&ctx).await;

    let (status, coupon) = ctx
        .send(
            "POST",
            "/v1/coupons",
            Some(json!({
                "affiliate_id": affiliate["id"],
                "offer_id": offer["id"],
                "code": "SPRING10",
                "max_uses": 5
            })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{}", coupon);

    let (status, _) = ctx
        .send(
            "POST",
            "/v1/coupons",
            Some(json!({"affiliate_id": affiliate["id"], "code": "spring10"})),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = ctx
        .send(
            "POST",
            "/v1/coupons",
            Some(json!({"affiliate_id": affiliate["id"], "code": "no spaces"})),
        )
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let (status, list) = ctx.send("GET", "/v1/coupons", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(list["coupons"].as_array().unwrap().len(), 1);

    let id = coupon["id"].as_str().unwrap();
    let (status, _) = ctx.send("DELETE", &format!("/v1/coupons/{}", id), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    ctx.cleanup().await.unwrap();
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_rules_dry_run() {
    let ctx = TestContext::new().await.unwrap();

    let (status, rule) = ctx
        .send(
            "POST",
            "/v1/rules",
            Some(json!({
                "kind": "fraud",
                "name": "Flag big orders",
                "conditions": [
                    {"field": "amount_cents", "operator": "greater_than", "value": 100000}
                ],
                "actions": [{"type": "flag"}]
            })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{}", rule);

    let (status, verdict) = ctx
        .send(
            "POST",
            "/v1/rules/test",
            Some(json!({"kind": "fraud", "context": {"amount_cents": 250000}})),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{}", verdict);
    assert_eq!(verdict["flagged"], true);

    let (status, _) = ctx
        .send(
            "POST",
            "/v1/rules",
            Some(json!({"kind": "fraud", "name": "No actions", "actions": []})),
        )
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    ctx.cleanup().await.unwrap();
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_webhook_delivered_by_worker() {
    let ctx = TestContext::new().await.unwrap();

    let (status, webhook) = ctx
        .send(
            "POST",
            "/v1/webhooks",
            Some(json!({
                "url": "https://hooks.example.com/trackdesk",
                "events": ["conversion.created", "conversion.approved"]
            })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{}", webhook);
    assert!(webhook["secret"].as_str().unwrap().starts_with("whsec_"));
    let id = webhook["id"].as_str().unwrap().to_string();

    // Secret is only shown on create and rotate
    let (_, fetched) = ctx.send("GET", &format!("/v1/webhooks/{}", id), None).await;
    assert!(fetched.get("secret").is_none());

    let (status, delivery) = ctx.send("POST", &format!("/v1/webhooks/{}/test", id), None).await;
    assert_eq!(status, StatusCode::ACCEPTED, "{}", delivery);
    let delivery_id: Uuid = delivery["id"].as_str().unwrap().parse().unwrap();

    let deliverer = MockDeliverer::new();
    let orchestrator = WorkerOrchestrator::new(ctx.db.clone(), Arc::new(deliverer.clone()), OrchestratorConfig::default());

    let mut settled = None;
    for _ in 0..20 {
        orchestrator.process_batch().await.unwrap();
        let row = Delivery::find_by_id(&ctx.db, delivery_id).await.unwrap().unwrap();
        if row.status == DeliveryStatus::Succeeded {
            settled = Some(row);
            break;
        }
    }
    let settled = settled.expect("delivery was not sent");
    assert_eq!(settled.attempts, 1);

    let sent = deliverer
        .requests()
        .into_iter()
        .find(|r| r.header("X-Trackdesk-Delivery") == Some(delivery_id.to_string().as_str()))
        .unwrap();
    assert_eq!(sent.header("X-Trackdesk-Event"), Some("webhook.test"));

    let (status, deliveries) = ctx.send("GET", &format!("/v1/webhooks/{}/deliveries", id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(deliveries["deliveries"][0]["status"], "succeeded");

    ctx.cleanup().await.unwrap();
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_offer_round_trip() {
    let ctx = TestContext::new().await.unwrap();

    let (status, created) = ctx
        .send(
            "POST",
            "/v1/offers",
            Some(json!({
                "name": "Trail Shoes",
                "description": "Spring collection",
                "landing_url": "https://shop.example.com/trail",
                "status": "active",
                "payout_type": "revshare",
                "revshare_bps": 1250,
                "currency": "eur",
                "daily_conversion_cap": 25,
                "require_approval": true
            })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{}", created);

    let id = created["id"].as_str().unwrap();
    let (status, fetched) = ctx.send("GET", &format!("/v1/offers/{}", id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched, created);
    assert_eq!(fetched["revshare_bps"], 1250);
    assert_eq!(fetched["currency"], "EUR");
    assert_eq!(fetched["daily_conversion_cap"], 25);
    assert_eq!(fetched["require_approval"], true);

    ctx.cleanup().await.unwrap();
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_affiliate_status_transitions() {
    let ctx = TestContext::new().await.unwrap();

    let (status, affiliate) = ctx
        .send(
            "POST",
            "/v1/affiliates",
            Some(json!({"name": "Riley", "email": format!("riley-{}@example.com", Uuid::new_v4())})),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{}", affiliate);
    assert_eq!(affiliate["status"], "pending");
    let id = affiliate["id"].as_str().unwrap();

    let (status, approved) = ctx.send("POST", &format!("/v1/affiliates/{}/approve", id), None).await;
    assert_eq!(status, StatusCode::OK, "{}", approved);
    assert_eq!(approved["status"], "active");

    let (status, suspended) = ctx.send("POST", &format!("/v1/affiliates/{}/suspend", id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(suspended["status"], "suspended");

    // Only pending applications can be rejected
    let (status, _) = ctx.send("POST", &format!("/v1/affiliates/{}/reject", id), None).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, reinstated) = ctx.send("POST", &format!("/v1/affiliates/{}/approve", id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(reinstated["status"], "active");

    let (status, _) = ctx
        .send("POST", &format!("/v1/affiliates/{}/approve", Uuid::new_v4()), None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    ctx.cleanup().await.unwrap();
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_traffic_rule_blocks_and_redirects_clicks() {
    let ctx = TestContext::new().await.unwrap();
    let offer = create_offer(&ctx).await;
    let affiliate = create_affiliate(&ctx).await;
    let code = create_link(&ctx, json!({"affiliate_id": affiliate["id"], "offer_id": offer["id"]})).await;

    let (status, rule) = ctx
        .send(
            "POST",
            "/v1/rules",
            Some(json!({
                "kind": "traffic",
                "name": "Block bad subnet",
                "conditions": [{"field": "ip", "operator": "starts_with", "value": "198.51.100."}],
                "actions": [{"type": "block"}]
            })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{}", rule);

    let (status, _) = click(&ctx, &code, "198.51.100.66", None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, location) = click(&ctx, &code, "203.0.113.9", None).await;
    assert_eq!(status, StatusCode::FOUND);
    assert_eq!(host_of(&location.unwrap()), "shop.example.com");

    let rule_id = rule["id"].as_str().unwrap();
    let (status, updated) = ctx
        .send(
            "PUT",
            &format!("/v1/rules/{}", rule_id),
            Some(json!({"actions": [
                {"type": "block"},
                {"type": "redirect", "url": "https://blocked.example.com/sorry"}
            ]})),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{}", updated);

    let (status, location) = click(&ctx, &code, "198.51.100.66", None).await;
    assert_eq!(status, StatusCode::FOUND);
    assert_eq!(location.as_deref(), Some("https://blocked.example.com/sorry"));

    let (status, clicks) = ctx.send("GET", "/v1/clicks?status=blocked", None).await;
    assert_eq!(status, StatusCode::OK, "{}", clicks);
    assert_eq!(clicks["total"], 2);

    ctx.cleanup().await.unwrap();
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_smart_link_routing_and_fallback() {
    let ctx = TestContext::new().await.unwrap();
    let affiliate = create_affiliate(&ctx).await;

    let (status, smart_link) = ctx
        .send(
            "POST",
            "/v1/smart-links",
            Some(json!({
                "name": "Geo split",
                "fallback_url": "https://fallback.example.com/",
                "targets": [
                    {
                        "url": "https://de.example.com/shop",
                        "priority": 1,
                        "conditions": [{"field": "country", "operator": "equals", "value": "de"}]
                    },
                    {"url": "https://global.example.com/shop", "weight": 3}
                ]
            })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{}", smart_link);
    let smart_link_id = smart_link["id"].as_str().unwrap();

    let code = create_link(&ctx, json!({"affiliate_id": affiliate["id"], "smart_link_id": smart_link_id})).await;

    let (status, location) = click(&ctx, &code, "203.0.113.20", Some("DE")).await;
    assert_eq!(status, StatusCode::FOUND);
    let location = location.unwrap();
    assert_eq!(host_of(&location), "de.example.com");
    assert!(location.contains("click_id="));

    let (status, location) = click(&ctx, &code, "203.0.113.21", Some("US")).await;
    assert_eq!(status, StatusCode::FOUND);
    assert_eq!(host_of(&location.unwrap()), "global.example.com");

    let (status, _) = ctx
        .send("PUT", &format!("/v1/smart-links/{}", smart_link_id), Some(json!({"active": false})))
        .await;
    assert_eq!(status, StatusCode::OK);

    // Inactive links send traffic to the fallback untouched
    let (status, location) = click(&ctx, &code, "203.0.113.22", Some("DE")).await;
    assert_eq!(status, StatusCode::FOUND);
    assert_eq!(location.as_deref(), Some("https://fallback.example.com/"));

    ctx.cleanup().await.unwrap();
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_daily_cap_rejects_extra_conversions() {
    let ctx = TestContext::new().await.unwrap();

    let (status, offer) = ctx
        .send(
            "POST",
            "/v1/offers",
            Some(json!({
                "name": "Capped",
                "landing_url": "https://shop.example.com/capped",
                "status": "active",
                "payout_type": "cpa",
                "payout_amount_cents": 800,
                "daily_conversion_cap": 1
            })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{}", offer);
    let affiliate = create_affiliate(&ctx).await;

    let conversion = |order_id: &str| {
        json!({
            "referral_code": affiliate["referral_code"],
            "offer_id": offer["id"],
            "amount_cents": 5000,
            "order_id": order_id
        })
    };

    let (status, first) = ctx.send("POST", "/v1/conversions", Some(conversion("CAP-1"))).await;
    assert_eq!(status, StatusCode::CREATED, "{}", first);
    assert_eq!(first["status"], "approved");

    let (status, second) = ctx.send("POST", "/v1/conversions", Some(conversion("CAP-2"))).await;
    assert_eq!(status, StatusCode::CREATED, "{}", second);
    assert_eq!(second["status"], "rejected");
    assert_eq!(second["metadata"]["reason"], "cap_exceeded");

    ctx.cleanup().await.unwrap();
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_stripe_receiver() {
    let ctx = TestContext::new().await.unwrap();
    let offer = create_offer(&ctx).await;
    let affiliate = create_affiliate(&ctx).await;
    let secret = "whsec_trackdesk_test";

    let (status, _) = ctx
        .send("PUT", "/v1/integrations/stripe", Some(json!({"secret": secret})))
        .await;
    assert_eq!(status, StatusCode::OK);

    let uri = format!("/integrations/stripe/{}", ctx.tenant.slug);
    let signed = |body: &Value| {
        let header = sign_payload(secret, chrono::Utc::now().timestamp(), body.to_string().as_bytes());
        vec![("stripe-signature", header)]
    };

    let unattributed = json!({
        "type": "checkout.session.completed",
        "data": {"object": {"id": "cs_test_none", "amount_total": 2500, "currency": "usd", "metadata": {}}}
    });

    let forged = sign_payload("not-the-secret", chrono::Utc::now().timestamp(), unattributed.to_string().as_bytes());
    let (status, _) = deliver_integration(&ctx, &uri, &[("stripe-signature", forged)], &unattributed).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = deliver_integration(&ctx, &uri, &[], &unattributed).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, ack) = deliver_integration(&ctx, &uri, &signed(&unattributed), &unattributed).await;
    assert_eq!(status, StatusCode::OK, "{}", ack);
    assert_eq!(ack["status"], "ignored");

    let attributed = json!({
        "type": "checkout.session.completed",
        "data": {"object": {
            "id": "cs_test_credited",
            "amount_total": 4990,
            "currency": "usd",
            "metadata": {"referral_code": affiliate["referral_code"], "offer_id": offer["id"]}
        }}
    });
    let (status, ack) = deliver_integration(&ctx, &uri, &signed(&attributed), &attributed).await;
    assert_eq!(status, StatusCode::OK, "{}", ack);
    assert_eq!(ack["status"], "recorded");

    // Stripe retries deliver the same session again
    let (status, retry) = deliver_integration(&ctx, &uri, &signed(&attributed), &attributed).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(retry["status"], "duplicate");
    assert_eq!(retry["conversion_id"], ack["conversion_id"]);

    ctx.cleanup().await.unwrap();
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_shopify_receiver() {
    let ctx = TestContext::new().await.unwrap();
    let secret = "shpss_trackdesk_test";

    let (status, _) = ctx
        .send("PUT", "/v1/integrations/shopify", Some(json!({"secret": secret})))
        .await;
    assert_eq!(status, StatusCode::OK);

    let uri = format!("/integrations/shopify/{}", ctx.tenant.slug);
    let order = json!({"id": 5500112233u64, "total_price": "35.00", "currency": "usd"});

    let (status, _) = deliver_integration(
        &ctx,
        &uri,
        &[
            ("x-shopify-topic", "orders/create".to_string()),
            ("x-shopify-hmac-sha256", compute_shopify_hmac("wrong-secret", order.to_string().as_bytes())),
        ],
        &order,
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, ack) = deliver_integration(
        &ctx,
        &uri,
        &[
            ("x-shopify-topic", "orders/create".to_string()),
            ("x-shopify-hmac-sha256", compute_shopify_hmac(secret, order.to_string().as_bytes())),
        ],
        &order,
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{}", ack);
    assert_eq!(ack["status"], "ignored");

    let (status, _) = deliver_integration(
        &ctx,
        "/integrations/shopify/no-such-tenant",
        &[("x-shopify-hmac-sha256", compute_shopify_hmac(secret, order.to_string().as_bytes()))],
        &order,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    ctx.cleanup().await.unwrap();
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_last_owner_survives_concurrent_demotions() {
    let ctx = TestContext::new().await.unwrap();
    let (second, second_token) = ctx.member(MembershipRole::Owner).await.unwrap();

    let demote_second = format!("/v1/team/{}", second.id);
    let demote_first = format!("/v1/team/{}", ctx.user.id);
    let ((first_status, _), (second_status, _)) = tokio::join!(
        ctx.send("PUT", &demote_second, Some(json!({"role": "admin"}))),
        ctx.send_as(&second_token, "PUT", &demote_first, Some(json!({"role": "admin"}))),
    );

    let succeeded = [first_status, second_status]
        .iter()
        .filter(|s| **s == StatusCode::OK)
        .count();
    assert_eq!(succeeded, 1, "statuses: {} {}", first_status, second_status);

    let owners = Membership::count_with_role(&ctx.db, ctx.tenant.id, MembershipRole::Owner)
        .await
        .unwrap();
    assert_eq!(owners, 1);

    User::delete(&ctx.db, second.id).await.ok();
    ctx.cleanup().await.unwrap();
}
