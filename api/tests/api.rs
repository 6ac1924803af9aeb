use std::{collections::HashMap, sync::Arc};

use actix_web::{http::StatusCode, test, web};
use api::{app, config::Config, security::RateLimiter, state::AppState};
use chrono::Utc;
use common::{seed::seed_tasks, store::MemoryStore, telegram::sign_data_check_string};
use market::PriceFeed;
use serde_json::{json, Value};

const BOT_TOKEN: &str = "123456:TEST-TOKEN";
// nothing listens here, so every upstream price call fails fast
const OFFLINE: &str = "http://127.0.0.1:9";

fn config_with(overrides: &[(&str, &str)]) -> Config {
    let mut vars: HashMap<String, String> = [
        ("STORE_BACKEND", "memory"),
        ("TELEGRAM_BOT_TOKEN", BOT_TOKEN),
        ("ROUND_SECONDS", "0"),
        ("COINGECKO_URL", OFFLINE),
        ("BINANCE_URL", OFFLINE),
        ("PRICE_STREAM_ENABLED", "false"),
        ("ALLOWED_ORIGINS", "*"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect();
    for (key, value) in overrides {
        vars.insert(key.to_string(), value.to_string());
    }
    Config::from_lookup(|key| vars.get(key).cloned()).unwrap()
}

async fn state_with(overrides: &[(&str, &str)]) -> web::Data<AppState> {
    let config = config_with(overrides);
    let store = Arc::new(MemoryStore::new());
    seed_tasks(store.as_ref()).await.unwrap();
    let feed = PriceFeed::new(config.feed.clone()).unwrap();
    web::Data::new(AppState::new(store, Arc::new(feed), config))
}

macro_rules! test_app {
    ($state:expr) => {
        test::init_service(app($state, RateLimiter::new(1_000))).await
    };
}

macro_rules! call {
    ($app:expr, $req:expr) => {{
        let resp = test::call_service(&$app, $req.to_request()).await;
        let status = resp.status();
        let body: Value = test::read_body_json(resp).await;
        (status, body)
    }};
}

fn create_user(id: &str, username: &str) -> test::TestRequest {
    test::TestRequest::post()
        .uri("/api/user")
        .set_json(json!({ "id": id, "username": username }))
}

fn set_scores(id: &str, clicker: i64, betting: i64) -> test::TestRequest {
    test::TestRequest::put().uri("/api/user").set_json(json!({
        "id": id,
        "clicker_score": clicker,
        "betting_score": betting,
    }))
}

fn place_bet(user_id: &str, direction: &str, start: f64) -> test::TestRequest {
    test::TestRequest::post().uri("/api/betting").set_json(json!({
        "user_id": user_id,
        "type": direction,
        "amount": 10,
        "sol_price_start": start,
    }))
}

fn settle_bet(id: &str, end: f64) -> test::TestRequest {
    test::TestRequest::put()
        .uri("/api/betting")
        .set_json(json!({ "id": id, "sol_price_end": end }))
}

fn signed_init_data(user_json: &str, auth_date: i64) -> String {
    let fields = [
        ("auth_date", auth_date.to_string()),
        ("query_id", "AAHdF6IQAAAAAN0XohDhrOrc".to_string()),
        ("user", user_json.to_string()),
    ];
    let check_string = fields
        .iter()
        .map(|(key, value)| format!("{key}={value}"))
        .collect::<Vec<_>>()
        .join("\n");
    let hash = sign_data_check_string(&check_string, BOT_TOKEN);

    let mut query = url::form_urlencoded::Serializer::new(String::new());
    for (key, value) in &fields {
        query.append_pair(key, value);
    }
    query.append_pair("hash", &hash).finish()
}

#[actix_web::test]
async fn creates_and_fetches_a_user() {
    let app = test_app!(state_with(&[]).await);

    let (status, body) = call!(app, create_user("1001", "alice"));
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["user"]["id"], "1001");
    assert_eq!(body["user"]["total_score"], 0);
    assert_eq!(body["user"]["referral_code"].as_str().unwrap().len(), 8);

    let (status, body) = call!(app, test::TestRequest::get().uri("/api/user?id=1001"));
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["user"]["username"], "alice");
    assert_eq!(body["rank"], "unranked");
    assert_eq!(body["next_rank_at"], 1000);

    // posting again updates the profile instead of registering twice
    let (_, body) = call!(
        app,
        test::TestRequest::post()
            .uri("/api/user")
            .set_json(json!({ "id": "1001", "first_name": "Alice" }))
    );
    assert_eq!(body["user"]["first_name"], "Alice");
    assert_eq!(body["user"]["username"], "alice");
}

#[actix_web::test]
async fn user_lookup_errors() {
    let app = test_app!(state_with(&[]).await);

    let (status, body) = call!(app, test::TestRequest::get().uri("/api/user"));
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "User ID is required");

    let (status, body) = call!(app, test::TestRequest::get().uri("/api/user?id=404"));
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "User not found");

    let (status, body) = call!(
        app,
        test::TestRequest::post()
            .uri("/api/user")
            .insert_header(("content-type", "application/json"))
            .set_payload("{not json")
    );
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().starts_with("Invalid request body"));
}

#[actix_web::test]
async fn score_updates_keep_the_total() {
    let app = test_app!(state_with(&[]).await);
    call!(app, create_user("7", "bob"));

    let (status, body) = call!(
        app,
        test::TestRequest::put().uri("/api/user").set_json(json!({ "id": "7" }))
    );
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "No valid fields to update");

    let (status, body) = call!(app, set_scores("7", 40, 2));
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["user"]["total_score"], 42);
}

#[actix_web::test]
async fn clicks_spend_boost() {
    let app = test_app!(state_with(&[]).await);
    call!(app, create_user("9", "carol"));

    let (status, body) = call!(
        app,
        test::TestRequest::post()
            .uri("/api/user/clicks")
            .set_json(json!({ "id": "9", "taps": 5 }))
    );
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["points"], 10);
    assert_eq!(body["boost"], 495);
    assert_eq!(body["user"]["clicker_score"], 10);
    assert_eq!(body["user"]["total_score"], 10);

    let (status, _) = call!(
        app,
        test::TestRequest::post()
            .uri("/api/user/clicks")
            .set_json(json!({ "id": "9", "taps": 0 }))
    );
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[actix_web::test]
async fn referrals_link_back_to_the_referrer() {
    let app = test_app!(state_with(&[]).await);
    let (_, body) = call!(app, create_user("100", "host"));
    let code = body["user"]["referral_code"].as_str().unwrap().to_string();

    let (_, body) = call!(
        app,
        test::TestRequest::post().uri("/api/user").set_json(json!({
            "id": "200",
            "username": "guest",
            "referrer_code": code,
        }))
    );
    assert_eq!(body["user"]["referrer_id"], "100");

    let (status, body) = call!(
        app,
        test::TestRequest::get().uri("/api/user/referrals?id=100")
    );
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["referral_code"], code.as_str());
    assert!(body["referral_link"].as_str().unwrap().ends_with(&code));
    assert_eq!(body["referrals"].as_array().unwrap().len(), 1);
    assert_eq!(body["referrals"][0]["username"], "guest");
}

#[actix_web::test]
async fn bet_round_trip_credits_a_win_once() {
    let app = test_app!(state_with(&[]).await);
    call!(app, create_user("42", "dave"));

    let (status, body) = call!(app, place_bet("42", "UP", 100.0));
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["remaining_bets"], 9);
    assert_eq!(body["bet"]["result"], "PENDING");
    let bet_id = body["bet"]["id"].as_str().unwrap().to_string();

    let (status, body) = call!(app, settle_bet(&bet_id, 101.0));
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["bet"]["result"], "WIN");
    assert_eq!(body["bet"]["score_earned"], 10);

    let (status, body) = call!(app, settle_bet(&bet_id, 90.0));
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Bet already settled");

    let (_, body) = call!(app, test::TestRequest::get().uri("/api/user?id=42"));
    assert_eq!(body["user"]["betting_score"], 10);
    assert_eq!(body["user"]["total_score"], 10);

    let (_, body) = call!(app, test::TestRequest::get().uri("/api/betting?userId=42"));
    assert_eq!(body["bets"].as_array().unwrap().len(), 1);
}

#[actix_web::test]
async fn equal_prices_settle_as_a_draw() {
    let app = test_app!(state_with(&[]).await);
    call!(app, create_user("43", "erin"));

    let (_, body) = call!(app, place_bet("43", "DOWN", 150.0));
    let bet_id = body["bet"]["id"].as_str().unwrap().to_string();
    let (_, body) = call!(app, settle_bet(&bet_id, 150.0));
    assert_eq!(body["bet"]["result"], "DRAW");
    assert_eq!(body["bet"]["score_earned"], 0);
}

#[actix_web::test]
async fn daily_bet_limit_is_enforced() {
    let app = test_app!(state_with(&[("MAX_DAILY_BETS", "2")]).await);
    call!(app, create_user("50", "frank"));

    let (_, body) = call!(app, place_bet("50", "UP", 100.0));
    assert_eq!(body["remaining_bets"], 1);
    let bet_id = body["bet"]["id"].as_str().unwrap().to_string();
    call!(app, settle_bet(&bet_id, 101.0));

    let (_, body) = call!(app, place_bet("50", "DOWN", 100.0));
    assert_eq!(body["remaining_bets"], 0);
    let bet_id = body["bet"]["id"].as_str().unwrap().to_string();
    call!(app, settle_bet(&bet_id, 99.0));

    let (status, body) = call!(app, place_bet("50", "UP", 100.0));
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Daily betting limit reached (2 per day)");

    let (_, body) = call!(app, test::TestRequest::get().uri("/api/betting?userId=50"));
    assert_eq!(body["remaining_bets"], 0);
    assert!(body["seconds_left"].is_null());
}

#[actix_web::test]
async fn second_bet_waits_for_the_open_round() {
    let app = test_app!(state_with(&[("ROUND_SECONDS", "60")]).await);
    call!(app, create_user("53", "iris"));

    let (status, _) = call!(app, place_bet("53", "UP", 100.0));
    assert_eq!(status, StatusCode::OK);

    let (status, body) = call!(app, place_bet("53", "DOWN", 100.0));
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "a bet is already in progress");

    let (_, body) = call!(app, test::TestRequest::get().uri("/api/betting?userId=53"));
    assert_eq!(body["bets"].as_array().unwrap().len(), 1);
    assert_eq!(body["remaining_bets"], 9);
    let seconds_left = body["seconds_left"].as_i64().unwrap();
    assert!((1..=60).contains(&seconds_left));
}

#[actix_web::test]
async fn settling_during_countdown_is_rejected() {
    let app = test_app!(state_with(&[("ROUND_SECONDS", "60")]).await);
    call!(app, create_user("51", "gina"));

    let (_, body) = call!(app, place_bet("51", "UP", 100.0));
    let bet_id = body["bet"]["id"].as_str().unwrap().to_string();

    let (status, body) = call!(app, settle_bet(&bet_id, 120.0));
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().starts_with("countdown still running"));
}

#[actix_web::test]
async fn betting_rejects_unknown_users_and_bad_input() {
    let app = test_app!(state_with(&[]).await);

    let (status, body) = call!(app, place_bet("nobody", "UP", 100.0));
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "User not found");

    call!(app, create_user("52", "hank"));
    let (status, _) = call!(app, place_bet("52", "SIDEWAYS", 100.0));
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, _) = call!(app, place_bet("52", "UP", -1.0));
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = call!(app, settle_bet("missing", 100.0));
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "Bet not found");
}

#[actix_web::test]
async fn one_time_tasks_complete_once() {
    let app = test_app!(state_with(&[]).await);
    call!(app, create_user("60", "ivy"));

    let (status, body) = call!(app, test::TestRequest::get().uri("/api/task?userId=60"));
    assert_eq!(status, StatusCode::OK);
    let user_tasks = body["userTasks"].as_array().unwrap();
    assert_eq!(user_tasks.len(), 8);

    let one_time = user_tasks
        .iter()
        .find(|ut| ut["task"]["type"] == "ONE_TIME")
        .unwrap();
    let task_id = one_time["task_id"].as_str().unwrap().to_string();
    let reward = one_time["task"]["score_reward"].as_i64().unwrap();

    let complete = || {
        test::TestRequest::post()
            .uri("/api/task")
            .set_json(json!({ "userId": "60", "taskId": task_id }))
    };
    let (status, body) = call!(app, complete());
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["userTask"]["completed"], true);

    let (status, body) = call!(app, complete());
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Task already completed");

    let (_, body) = call!(app, test::TestRequest::get().uri("/api/user?id=60"));
    assert_eq!(body["user"]["clicker_score"], reward);
    assert_eq!(body["user"]["total_score"], reward);
}

#[actix_web::test]
async fn tasks_can_be_created_once_per_key() {
    let app = test_app!(state_with(&[]).await);
    call!(app, create_user("61", "jack"));

    let new_task = || {
        test::TestRequest::put().uri("/api/task").set_json(json!({
            "name": "Join the channel",
            "description": "Join the announcements channel",
            "type": "SOCIAL",
            "task_key": "join_channel",
        }))
    };
    let (status, body) = call!(app, new_task());
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["task"]["score_reward"], 10);

    let (status, body) = call!(app, new_task());
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Task with this task_key already exists");

    // existing users get the new task too
    let (_, body) = call!(app, test::TestRequest::get().uri("/api/task?userId=61"));
    assert_eq!(body["userTasks"].as_array().unwrap().len(), 9);

    let (status, body) = call!(
        app,
        test::TestRequest::post()
            .uri("/api/task")
            .set_json(json!({ "userId": "61", "taskId": "nope" }))
    );
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "User task not found");
}

#[actix_web::test]
async fn leaderboard_ranks_users() {
    let app = test_app!(state_with(&[]).await);
    for (id, name) in [("a", "ann"), ("b", "ben"), ("c", "cat")] {
        call!(app, create_user(id, name));
    }
    call!(app, set_scores("a", 300, 0));
    call!(app, set_scores("b", 150, 50));

    let (status, body) = call!(
        app,
        test::TestRequest::get().uri("/api/leaderboard?userId=b&limit=2")
    );
    assert_eq!(status, StatusCode::OK);
    let board = body["leaderboard"].as_array().unwrap();
    assert_eq!(board.len(), 2);
    assert_eq!(board[0]["id"], "a");
    assert_eq!(board[0]["rank"], 1);
    assert_eq!(board[1]["username"], "ben");

    assert_eq!(body["userRank"]["rank"], 2);
    assert_eq!(body["userRank"]["totalUsers"], 2);

    let (_, body) = call!(app, test::TestRequest::get().uri("/api/leaderboard"));
    assert_eq!(body["leaderboard"].as_array().unwrap().len(), 3);
    assert!(body["userRank"].is_null());

    let (status, body) = call!(
        app,
        test::TestRequest::get().uri("/api/leaderboard?userId=ghost")
    );
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["leaderboard"].as_array().unwrap().len(), 3);
    assert!(body["userRank"].is_null());
}

#[actix_web::test]
async fn sol_price_falls_back_to_mock_data() {
    let app = test_app!(state_with(&[]).await);

    let (status, body) = call!(
        app,
        test::TestRequest::get().uri("/api/sol-price?interval=5m&limit=10")
    );
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["mock"], true);
    assert_eq!(body["candles"].as_array().unwrap().len(), 10);

    let (status, _) = call!(
        app,
        test::TestRequest::get().uri("/api/sol-price?interval=7m")
    );
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = call!(app, test::TestRequest::post().uri("/api/sol-price"));
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["source"], "mock");
    assert_eq!(body["error"], "Using mock price due to API error");
    let price = body["price"].as_f64().unwrap();
    assert!((120.0..=125.0).contains(&price));
}

#[actix_web::test]
async fn verify_telegram_registers_then_recognises_the_user() {
    let app = test_app!(state_with(&[]).await);
    let user_json = r#"{"id":777000,"first_name":"Tele","username":"tele_user"}"#;
    let init_data = signed_init_data(user_json, Utc::now().timestamp());
    let verify = || {
        test::TestRequest::post()
            .uri("/api/verify-telegram")
            .set_json(json!({ "initData": init_data }))
    };

    let (status, body) = call!(app, verify());
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["valid"], true);
    assert_eq!(body["isNewUser"], true);
    assert_eq!(body["user"]["id"], "777000");
    assert_eq!(body["user"]["username"], "tele_user");

    let (_, body) = call!(app, verify());
    assert_eq!(body["isNewUser"], false);
}

#[actix_web::test]
async fn verify_telegram_rejects_tampered_data() {
    let app = test_app!(state_with(&[]).await);
    let user_json = r#"{"id":1,"first_name":"Mallory"}"#;
    let init_data = signed_init_data(user_json, Utc::now().timestamp()).replace("Mallory", "Admin");

    let (status, body) = call!(
        app,
        test::TestRequest::post()
            .uri("/api/verify-telegram")
            .set_json(json!({ "initData": init_data }))
    );
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "Invalid Telegram data");

    let (status, _) = call!(
        app,
        test::TestRequest::post()
            .uri("/api/verify-telegram")
            .set_json(json!({}))
    );
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[actix_web::test]
async fn verify_telegram_requires_user_data() {
    let app = test_app!(state_with(&[]).await);
    let fields = [("auth_date", Utc::now().timestamp().to_string())];
    let hash = sign_data_check_string(&format!("auth_date={}", fields[0].1), BOT_TOKEN);
    let mut query = url::form_urlencoded::Serializer::new(String::new());
    query.append_pair(fields[0].0, &fields[0].1);
    let init_data = query.append_pair("hash", &hash).finish();

    let (status, body) = call!(
        app,
        test::TestRequest::post()
            .uri("/api/verify-telegram")
            .set_json(json!({ "initData": init_data }))
    );
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "No user data found");
}

#[actix_web::test]
async fn webhook_acknowledges_updates_without_messages() {
    let app = test_app!(state_with(&[]).await);

    let (status, body) = call!(
        app,
        test::TestRequest::post()
            .uri("/api/telegram/webhook")
            .set_json(json!({ "update_id": 10 }))
    );
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "ok": true }));
}

#[actix_web::test]
async fn rate_limit_spares_health_checks() {
    let state = state_with(&[]).await;
    let app = test::init_service(app(state, RateLimiter::new(1))).await;

    let (status, _) = call!(app, test::TestRequest::get().uri("/api/leaderboard"));
    assert_eq!(status, StatusCode::OK);

    let (status, body) = call!(app, test::TestRequest::get().uri("/api/leaderboard"));
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body["error"], "Rate limit exceeded. Try again later.");

    for _ in 0..3 {
        let resp = test::call_service(&app, test::TestRequest::get().uri("/health").to_request()).await;
        assert_eq!(resp.status(), StatusCode::OK);
    }
}
