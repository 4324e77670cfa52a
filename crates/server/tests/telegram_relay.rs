//! End-to-end relay through the Telegram transport against a fake Bot API.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{
    extract::{Path, State},
    routing::post,
    Json, Router,
};
use serde_json::{json, Value};
use tokio::sync::watch;

use concierge_core::{
    LifecycleConfig, Messenger, RelayDispatcher, RelayRouter, RetryPolicy, SqliteTicketStore,
    TelegramConfig, TicketId, TicketRegistry, TicketStatus, TicketStore, UserId,
};
use concierge_server::telegram::{TelegramClient, TelegramPoller};

const GROUP: i64 = -100500;
const TOPIC: i64 = 555;

/// Bot API stand-in: serves queued updates and records every other call.
#[derive(Default)]
struct FakeBotApi {
    updates: Mutex<VecDeque<Value>>,
    calls: Mutex<Vec<(String, Value)>>,
}

impl FakeBotApi {
    fn push_update(&self, update: Value) {
        self.updates.lock().unwrap().push_back(update);
    }

    fn calls(&self, method: &str) -> Vec<Value> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(m, _)| m == method)
            .map(|(_, body)| body.clone())
            .collect()
    }
}

async fn bot_method(
    State(api): State<Arc<FakeBotApi>>,
    Path((_bot, method)): Path<(String, String)>,
    Json(body): Json<Value>,
) -> Json<Value> {
    if method == "getUpdates" {
        let next = api.updates.lock().unwrap().pop_front();
        if next.is_none() {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        return Json(json!({"ok": true, "result": next.into_iter().collect::<Vec<_>>()}));
    }

    api.calls
        .lock()
        .unwrap()
        .push((method.clone(), body.clone()));

    let result = match method.as_str() {
        "createForumTopic" => json!({"message_thread_id": TOPIC, "name": body["name"]}),
        "editForumTopic" | "answerCallbackQuery" => json!(true),
        _ => json!({"message_id": 1000}),
    };
    Json(json!({"ok": true, "result": result}))
}

struct Relay {
    api: Arc<FakeBotApi>,
    store: Arc<dyn TicketStore>,
    dispatcher: RelayDispatcher,
    shutdown: watch::Sender<bool>,
    poller: tokio::task::JoinHandle<()>,
}

async fn start_relay() -> Relay {
    let api = Arc::new(FakeBotApi::default());
    let app = Router::new()
        .route("/{bot}/{method}", post(bot_method))
        .with_state(Arc::clone(&api));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

    let telegram = Arc::new(
        TelegramClient::new(&TelegramConfig {
            bot_token: "123:abc".to_string(),
            admin_group_id: GROUP,
            api_base_url: format!("http://{}", addr),
            poll_timeout_secs: 0,
            restart_delay_secs: 1,
        })
        .unwrap(),
    );

    let store: Arc<dyn TicketStore> = Arc::new(SqliteTicketStore::in_memory().unwrap());
    let registry = Arc::new(TicketRegistry::new(Arc::clone(&store), RetryPolicy::none()));
    let router = Arc::new(RelayRouter::new(
        Arc::clone(&store),
        registry,
        Arc::clone(&telegram) as Arc<dyn Messenger>,
        LifecycleConfig::default(),
    ));
    let dispatcher = RelayDispatcher::new(router, Duration::from_secs(5));

    let (shutdown, shutdown_rx) = watch::channel(false);
    let poller = TelegramPoller::new(
        telegram,
        dispatcher.clone(),
        0,
        Duration::from_millis(100),
    );
    let poller = tokio::spawn(poller.run(shutdown_rx));

    Relay {
        api,
        store,
        dispatcher,
        shutdown,
        poller,
    }
}

impl Relay {
    async fn stop(self) {
        self.shutdown.send(true).unwrap();
        self.poller.await.unwrap();
        self.dispatcher.shutdown().await;
    }
}

/// Poll until `method` has been called `count` times.
async fn wait_for_calls(api: &FakeBotApi, method: &str, count: usize) -> Vec<Value> {
    for _ in 0..200 {
        let calls = api.calls(method);
        if calls.len() >= count {
            return calls;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("{} was not called {} times", method, count);
}

fn private_message(update_id: i64, message_id: i64, text: &str) -> Value {
    json!({
        "update_id": update_id,
        "message": {
            "message_id": message_id,
            "chat": {"id": 42, "type": "private"},
            "from": {"id": 42, "is_bot": false, "first_name": "Alice", "username": "alice"},
            "text": text
        }
    })
}

fn topic_message(update_id: i64, message_id: i64, text: &str) -> Value {
    json!({
        "update_id": update_id,
        "message": {
            "message_id": message_id,
            "message_thread_id": TOPIC,
            "is_topic_message": true,
            "chat": {"id": GROUP, "type": "supergroup"},
            "from": {"id": 7, "is_bot": false, "first_name": "Admin"},
            "text": text
        }
    })
}

#[tokio::test]
async fn test_first_message_opens_topic_and_forwards() {
    let relay = start_relay().await;
    relay.api.push_update(private_message(1, 10, "my order never arrived"));

    let forwards = wait_for_calls(&relay.api, "forwardMessage", 1).await;
    assert_eq!(forwards[0]["chat_id"], GROUP);
    assert_eq!(forwards[0]["from_chat_id"], 42);
    assert_eq!(forwards[0]["message_id"], 10);
    assert_eq!(forwards[0]["message_thread_id"], TOPIC);

    let topics = relay.api.calls("createForumTopic");
    assert_eq!(topics.len(), 1);
    assert_eq!(topics[0]["name"], "Ticket #1 - alice");

    let ticket = relay
        .store
        .get_open_ticket(UserId(42))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(ticket.id, TicketId(1));
    assert_eq!(ticket.channel_id.map(|c| c.0), Some(TOPIC));

    relay.stop().await;
}

#[tokio::test]
async fn test_admin_reply_is_copied_to_user() {
    let relay = start_relay().await;
    relay.api.push_update(private_message(1, 10, "hello"));
    wait_for_calls(&relay.api, "forwardMessage", 1).await;

    relay.api.push_update(topic_message(2, 20, "we are on it"));

    let copies = wait_for_calls(&relay.api, "copyMessage", 1).await;
    assert_eq!(copies[0]["chat_id"], 42);
    assert_eq!(copies[0]["from_chat_id"], GROUP);
    assert_eq!(copies[0]["message_id"], 20);
    assert!(copies[0].get("message_thread_id").is_none());

    relay.stop().await;
}

#[tokio::test]
async fn test_close_button_renames_topic() {
    let relay = start_relay().await;
    relay.api.push_update(private_message(1, 10, "hello"));
    wait_for_calls(&relay.api, "forwardMessage", 1).await;

    relay.api.push_update(json!({
        "update_id": 2,
        "callback_query": {
            "id": "cb-1",
            "from": {"id": 42, "is_bot": false, "username": "alice"},
            "message": {"message_id": 11, "chat": {"id": 42, "type": "private"}},
            "data": "close_1"
        }
    }));

    let renames = wait_for_calls(&relay.api, "editForumTopic", 1).await;
    assert_eq!(renames[0]["message_thread_id"], TOPIC);
    assert_eq!(renames[0]["name"], "CLOSED #1 - alice");
    assert_eq!(relay.api.calls("answerCallbackQuery")[0]["callback_query_id"], "cb-1");

    let ticket = relay.store.get_ticket(TicketId(1)).await.unwrap().unwrap();
    assert_eq!(ticket.status, TicketStatus::Closed);

    relay.stop().await;
}

#[tokio::test]
async fn test_typed_close_sends_confirmation_keyboard() {
    let relay = start_relay().await;
    relay.api.push_update(private_message(1, 10, "hello"));
    wait_for_calls(&relay.api, "forwardMessage", 1).await;

    relay.api.push_update(private_message(2, 11, "/close"));

    let mut prompt = None;
    for _ in 0..200 {
        prompt = relay
            .api
            .calls("sendMessage")
            .into_iter()
            .find(|call| call["chat_id"] == 42 && !call["reply_markup"].is_null());
        if prompt.is_some() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let prompt = prompt.expect("confirmation prompt");
    assert_eq!(
        prompt["reply_markup"]["inline_keyboard"],
        json!([
            [{"text": "Close", "callback_data": "close_1"}],
            [{"text": "Cancel", "callback_data": "cancel"}]
        ])
    );

    let ticket = relay.store.get_ticket(TicketId(1)).await.unwrap().unwrap();
    assert_eq!(ticket.status, TicketStatus::Open);

    relay.stop().await;
}
